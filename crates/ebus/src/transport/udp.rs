//! UDP L1 transport: a network-attached eBUS adapter reachable over a
//! connected UDP socket.

use super::RingBuffer;
use crate::error::{Error, Result};
use std::time::Duration;
use tokio::net::UdpSocket;

/// Additive latency budget for network transports (§4.1 default).
pub const DEFAULT_LATENCY: Duration = Duration::from_millis(30);

/// A network-attached eBUS adapter reachable over UDP.
pub struct UdpTransport {
    host: String,
    port: u16,
    socket: Option<UdpSocket>,
    ring: RingBuffer,
}

impl UdpTransport {
    /// Build a transport for `host:port`.
    pub fn new(host: String, port: u16) -> Self {
        Self {
            host,
            port,
            socket: None,
            ring: RingBuffer::new(super::ring::MIN_CAPACITY),
        }
    }

    pub(crate) async fn open(&mut self) -> Result<()> {
        let socket = UdpSocket::bind(("0.0.0.0", 0)).await?;
        socket.connect((self.host.as_str(), self.port)).await?;
        self.socket = Some(socket);
        Ok(())
    }

    pub(crate) async fn close(&mut self) {
        self.socket = None;
    }

    pub(crate) fn is_valid(&self) -> bool {
        self.socket.is_some()
    }

    pub(crate) async fn read(&mut self, timeout: Duration) -> Result<&[u8]> {
        let socket = self.socket.as_mut().ok_or(Error::NoSignal)?;
        let mut scratch = [0u8; 256];
        match tokio::time::timeout(timeout, socket.recv(&mut scratch)).await {
            Ok(Ok(n)) => {
                self.ring.fill_from(&scratch[..n])?;
                Ok(self.ring.as_slice())
            }
            Ok(Err(e)) => Err(Error::TransportIo(e)),
            Err(_elapsed) => Ok(self.ring.as_slice()),
        }
    }

    pub(crate) fn consume(&mut self, n: usize) {
        self.ring.consume(n);
    }

    pub(crate) async fn write(&mut self, data: &[u8]) -> Result<()> {
        let socket = self.socket.as_mut().ok_or(Error::NoSignal)?;
        socket.send(data).await?;
        Ok(())
    }

    pub(crate) fn latency(&self) -> Duration {
        DEFAULT_LATENCY
    }
}
