//! L1: byte-level transports (serial, TCP, UDP) and the connection string
//! that selects between them.
//!
//! Every transport shares one contract: `write` is fire-and-forget (the
//! transport never distinguishes its own echo from a peer's bytes), and
//! `read` only ever drains bytes the caller has explicitly confirmed via
//! [`Transport::consume`] - nothing is ever discarded silently.

mod ring;
mod serial;
mod tcp;
mod udp;

#[cfg(any(test, feature = "lab"))]
pub mod lab;

pub use ring::RingBuffer;
pub use serial::SerialTransport;
pub use tcp::TcpTransport;
pub use udp::UdpTransport;

use crate::error::{Error, Result};
use std::time::Duration;
use winnow::Parser;
use winnow::ascii::digit1;
use winnow::combinator::{alt, opt, preceded};
use winnow::token::{rest, take_until};

/// How a [`crate::device::Device`] should frame bytes exchanged with the
/// transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Framing {
    /// Raw bus bytes, arbitration performed locally.
    Plain,
    /// 2-byte host/adapter framing, arbitration performed by the adapter.
    Enhanced,
}

/// The parsed form of a device connection string, e.g. `enh:/dev/ttyUSB0`
/// or `udp:192.168.1.10:9999`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionSpec {
    /// Which framing the device layer should speak.
    pub framing: Framing,
    /// The endpoint to open.
    pub kind: EndpointKind,
}

/// The underlying endpoint named by a connection string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EndpointKind {
    /// A local serial device, e.g. `/dev/ttyUSB0`.
    Serial(String),
    /// A TCP endpoint, `host:port`.
    Tcp(String, u16),
    /// A UDP endpoint, `host:port`.
    Udp(String, u16),
}

fn port(input: &mut &str) -> winnow::Result<u16> {
    digit1
        .try_map(str::parse)
        .parse_next(input)
}

fn host_port<'s>(input: &mut &'s str) -> winnow::Result<(&'s str, u16)> {
    (take_until(1.., ":"), preceded(':', port)).parse_next(input)
}

fn endpoint(input: &mut &str) -> winnow::Result<EndpointKind> {
    alt((
        preceded("udp:", host_port).map(|(h, p)| EndpointKind::Udp(h.to_string(), p)),
        host_port.map(|(h, p)| EndpointKind::Tcp(h.to_string(), p)),
        rest.map(|s: &str| EndpointKind::Serial(s.to_string())),
    ))
    .parse_next(input)
}

fn connection_spec(input: &mut &str) -> winnow::Result<ConnectionSpec> {
    let enhanced = opt("enh:").parse_next(input)?.is_some();
    let kind = endpoint.parse_next(input)?;
    Ok(ConnectionSpec {
        framing: if enhanced { Framing::Enhanced } else { Framing::Plain },
        kind,
    })
}

impl ConnectionSpec {
    /// Parse a device connection string.
    ///
    /// Grammar: `["enh:"] (path | ["udp:"] host ":" port)`. A bare string
    /// with no colon is a serial device path; a string containing a colon
    /// (optionally `udp:`-prefixed) is a network endpoint.
    pub fn parse(input: &str) -> Result<Self> {
        connection_spec
            .parse(input)
            .map_err(|e| Error::invalid_field("device", format!("invalid connection string: {e}")))
    }
}

/// A concrete L1 transport.
///
/// The three hardware-facing kinds share nearly all of their contract
/// (§4.1); rather than an object-safe async trait (which would need an
/// extra proc-macro dependency just to host `async fn`s in a trait), the
/// transport hierarchy is a tagged union dispatching to each kind's own
/// inherent methods - the same flattening the rest of this crate applies
/// to `Device` and `Condition`.
pub enum Transport {
    /// Local serial device.
    Serial(SerialTransport),
    /// TCP endpoint.
    Tcp(TcpTransport),
    /// UDP endpoint.
    Udp(UdpTransport),
    /// In-memory loopback, for tests.
    #[cfg(any(test, feature = "lab"))]
    Lab(lab::LabTransport),
}

impl Transport {
    /// Build (but do not yet open) a transport for the given connection
    /// spec's endpoint, ignoring its framing (which is a [`Framing`]
    /// concern applied at L2).
    pub fn from_spec(spec: &ConnectionSpec) -> Self {
        match &spec.kind {
            EndpointKind::Serial(path) => Transport::Serial(SerialTransport::new(path.clone())),
            EndpointKind::Tcp(host, port) => {
                Transport::Tcp(TcpTransport::new(host.clone(), *port))
            }
            EndpointKind::Udp(host, port) => {
                Transport::Udp(UdpTransport::new(host.clone(), *port))
            }
        }
    }

    /// Open the underlying endpoint.
    pub async fn open(&mut self) -> Result<()> {
        match self {
            Transport::Serial(t) => t.open().await,
            Transport::Tcp(t) => t.open().await,
            Transport::Udp(t) => t.open().await,
            #[cfg(any(test, feature = "lab"))]
            Transport::Lab(t) => t.open().await,
        }
    }

    /// Close the endpoint. Idempotent.
    pub async fn close(&mut self) {
        match self {
            Transport::Serial(t) => t.close().await,
            Transport::Tcp(t) => t.close().await,
            Transport::Udp(t) => t.close().await,
            #[cfg(any(test, feature = "lab"))]
            Transport::Lab(t) => t.close().await,
        }
    }

    /// Whether the endpoint is currently open and usable.
    pub fn is_valid(&self) -> bool {
        match self {
            Transport::Serial(t) => t.is_valid(),
            Transport::Tcp(t) => t.is_valid(),
            Transport::Udp(t) => t.is_valid(),
            #[cfg(any(test, feature = "lab"))]
            Transport::Lab(t) => t.is_valid(),
        }
    }

    /// Read at least one byte into the internal ring buffer and return a
    /// view of everything currently buffered but not yet [`consume`]d, or
    /// times out after `timeout` with an empty slice.
    ///
    /// [`consume`]: Transport::consume
    pub async fn read(&mut self, timeout: Duration) -> Result<&[u8]> {
        match self {
            Transport::Serial(t) => t.read(timeout).await,
            Transport::Tcp(t) => t.read(timeout).await,
            Transport::Udp(t) => t.read(timeout).await,
            #[cfg(any(test, feature = "lab"))]
            Transport::Lab(t) => t.read(timeout).await,
        }
    }

    /// Mark `n` bytes at the front of the buffer as consumed.
    pub fn consume(&mut self, n: usize) {
        match self {
            Transport::Serial(t) => t.consume(n),
            Transport::Tcp(t) => t.consume(n),
            Transport::Udp(t) => t.consume(n),
            #[cfg(any(test, feature = "lab"))]
            Transport::Lab(t) => t.consume(n),
        }
    }

    /// Write `data` to the endpoint. Fire-and-forget: does not wait for an
    /// echo or acknowledgement.
    pub async fn write(&mut self, data: &[u8]) -> Result<()> {
        match self {
            Transport::Serial(t) => t.write(data).await,
            Transport::Tcp(t) => t.write(data).await,
            Transport::Udp(t) => t.write(data).await,
            #[cfg(any(test, feature = "lab"))]
            Transport::Lab(t) => t.write(data).await,
        }
    }

    /// Additive latency budget to apply on top of a logical timeout, to
    /// account for this transport's propagation delay.
    pub fn latency(&self) -> Duration {
        match self {
            Transport::Serial(t) => t.latency(),
            Transport::Tcp(t) => t.latency(),
            Transport::Udp(t) => t.latency(),
            #[cfg(any(test, feature = "lab"))]
            Transport::Lab(t) => t.latency(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_plain_serial_path() {
        let spec = ConnectionSpec::parse("/dev/ttyUSB0").unwrap();
        assert_eq!(spec.framing, Framing::Plain);
        assert_eq!(spec.kind, EndpointKind::Serial("/dev/ttyUSB0".into()));
    }

    #[test]
    fn parses_enhanced_serial_path() {
        let spec = ConnectionSpec::parse("enh:/dev/ttyUSB0").unwrap();
        assert_eq!(spec.framing, Framing::Enhanced);
        assert_eq!(spec.kind, EndpointKind::Serial("/dev/ttyUSB0".into()));
    }

    #[test]
    fn parses_tcp_endpoint() {
        let spec = ConnectionSpec::parse("192.168.1.10:9999").unwrap();
        assert_eq!(
            spec.kind,
            EndpointKind::Tcp("192.168.1.10".into(), 9999)
        );
    }

    #[test]
    fn parses_enhanced_udp_endpoint() {
        let spec = ConnectionSpec::parse("enh:udp:192.168.1.10:9999").unwrap();
        assert_eq!(spec.framing, Framing::Enhanced);
        assert_eq!(
            spec.kind,
            EndpointKind::Udp("192.168.1.10".into(), 9999)
        );
    }

    #[test]
    fn rejects_malformed_port() {
        assert!(ConnectionSpec::parse("192.168.1.10:notaport").is_err());
    }
}
