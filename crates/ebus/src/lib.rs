//! Async protocol engine for the eBUS heating-system field bus.
//!
//! eBUS is a 2400 bps, half-duplex, multi-master serial bus used by
//! central-heating and ventilation equipment. This crate implements the
//! five layers of the protocol stack, bottom to top:
//!
//! - [`transport`] (L1): byte-level serial/TCP/UDP endpoints.
//! - [`device`] (L2): arbitration, performed locally or by a smart
//!   adapter speaking the enhanced framing.
//! - [`protocol`] (L3): the bus state machine — telegram framing, CRC,
//!   ACK/NAK retry, auto-SYN.
//! - [`message`] (L4): the message catalog, field codecs, and
//!   availability conditions.
//! - [`dispatcher`] (L5): request queues, the poll scheduler, and the
//!   answer map for passive slave responses.
//!
//! This library never installs a global `tracing` subscriber; the
//! embedding binary chooses how spans and events are rendered.
//!
//! # Example
//!
//! ```ignore
//! use ebus::config::EngineConfig;
//! use ebus::device::Device;
//! use ebus::protocol::ProtocolEngine;
//!
//! #[tokio::main]
//! async fn main() -> ebus::error::Result<()> {
//!     let config = EngineConfig {
//!         device: "enh:/dev/ttyUSB0".into(),
//!         own_address: 0x31,
//!         ..Default::default()
//!     };
//!     let spec = config.connection_spec()?;
//!     let device = Device::from_spec(&spec);
//!     let mut engine = ProtocolEngine::new(device, config.protocol_config());
//!     engine.open().await?;
//!     while let Some(event) = engine.step().await? {
//!         tracing::debug!(?event, "telegram event");
//!     }
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod device;
pub mod dispatcher;
pub mod error;
pub mod message;
pub mod protocol;
pub mod symbol;
pub mod transport;
pub mod util;

pub use config::EngineConfig;
pub use error::{Error, Result};
