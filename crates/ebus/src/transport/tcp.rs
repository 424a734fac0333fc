//! TCP L1 transport: a network-attached eBUS adapter reachable over a
//! plain TCP stream.

use super::RingBuffer;
use crate::error::{Error, Result};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

/// Additive latency budget for network transports (§4.1 default).
pub const DEFAULT_LATENCY: Duration = Duration::from_millis(30);

/// A network-attached eBUS adapter reachable over TCP.
pub struct TcpTransport {
    host: String,
    port: u16,
    stream: Option<TcpStream>,
    ring: RingBuffer,
}

impl TcpTransport {
    /// Build a transport for `host:port`.
    pub fn new(host: String, port: u16) -> Self {
        Self {
            host,
            port,
            stream: None,
            ring: RingBuffer::new(super::ring::MIN_CAPACITY),
        }
    }

    pub(crate) async fn open(&mut self) -> Result<()> {
        let stream = TcpStream::connect((self.host.as_str(), self.port)).await?;
        stream.set_nodelay(true)?;
        self.stream = Some(stream);
        Ok(())
    }

    pub(crate) async fn close(&mut self) {
        self.stream = None;
    }

    pub(crate) fn is_valid(&self) -> bool {
        self.stream.is_some()
    }

    pub(crate) async fn read(&mut self, timeout: Duration) -> Result<&[u8]> {
        let stream = self.stream.as_mut().ok_or(Error::NoSignal)?;
        let mut scratch = [0u8; 256];
        match tokio::time::timeout(timeout, stream.read(&mut scratch)).await {
            Ok(Ok(0)) => Err(Error::TransportIo(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "peer closed connection",
            ))),
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
        let stream = self.stream.as_mut().ok_or(Error::NoSignal)?;
        stream.write_all(data).await?;
        Ok(())
    }

    pub(crate) fn latency(&self) -> Duration {
        DEFAULT_LATENCY
    }
}
