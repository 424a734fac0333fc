//! L2: a byte-oriented view of the bus with arbitration primitives, built
//! on top of an L1 [`Transport`](crate::transport::Transport).
//!
//! Two kinds share the interface and are dispatched through a tagged
//! union rather than a trait object, the same treatment the rest of this
//! crate gives `Device/PlainDevice/EnhancedDevice` (§9): a plain device
//! performs arbitration itself by comparing an echoed byte; an enhanced
//! device delegates arbitration to a smart adapter speaking the 2-byte
//! framed protocol in §4.2.

mod enhanced;
mod plain;

pub use enhanced::EnhancedDevice;
pub use plain::PlainDevice;

use crate::error::Result;
use crate::symbol::Symbol;
use crate::transport::{ConnectionSpec, Framing, Transport};
use std::time::Duration;

/// Outcome of an in-progress or completed arbitration attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArbitrationState {
    /// No arbitration in process.
    None,
    /// Arbitration start requested, awaiting the next SYN.
    Start,
    /// The host's own master byte could not be sent.
    Error,
    /// Arbitration is running: own byte sent, awaiting echo/adapter reply.
    Running,
    /// Arbitration lost to another participant.
    Lost,
    /// Arbitration timed out without a reply.
    Timeout,
    /// Arbitration won.
    Won,
}

/// A byte received alongside its arbitration context.
#[derive(Debug, Clone, Copy)]
pub struct Received {
    /// The received byte.
    pub value: Symbol,
    /// The arbitration state current at the time this byte was received.
    pub arbitration: ArbitrationState,
}

/// L2 device: either performing arbitration itself ([`PlainDevice`]) or
/// delegating it to an enhanced adapter ([`EnhancedDevice`]).
pub enum Device {
    /// Host performs arbitration by echo comparison.
    Plain(PlainDevice),
    /// Adapter performs arbitration and reports the outcome.
    Enhanced(EnhancedDevice),
}

impl Device {
    /// Build a device for the given connection spec: a transport plus the
    /// framing it was parsed with.
    pub fn from_spec(spec: &ConnectionSpec) -> Self {
        let transport = Transport::from_spec(spec);
        match spec.framing {
            Framing::Plain => Device::Plain(PlainDevice::new(transport)),
            Framing::Enhanced => Device::Enhanced(EnhancedDevice::new(transport)),
        }
    }

    /// Open the underlying transport.
    pub async fn open(&mut self) -> Result<()> {
        match self {
            Device::Plain(d) => d.open().await,
            Device::Enhanced(d) => d.open().await,
        }
    }

    /// Whether the device is open and usable.
    pub fn is_valid(&self) -> bool {
        match self {
            Device::Plain(d) => d.is_valid(),
            Device::Enhanced(d) => d.is_valid(),
        }
    }

    /// Write a single byte to the bus.
    pub async fn send(&mut self, value: Symbol) -> Result<()> {
        match self {
            Device::Plain(d) => d.send(value).await,
            Device::Enhanced(d) => d.send(value).await,
        }
    }

    /// Read the next byte, annotated with the current arbitration state.
    pub async fn recv(&mut self, timeout: Duration) -> Result<Received> {
        match self {
            Device::Plain(d) => d.recv(timeout).await,
            Device::Enhanced(d) => d.recv(timeout).await,
        }
    }

    /// Begin arbitrating for `master_address`, or cancel a pending
    /// request by passing [`crate::symbol::SYN`].
    pub async fn start_arbitration(&mut self, master_address: Symbol) -> Result<()> {
        match self {
            Device::Plain(d) => d.start_arbitration(master_address).await,
            Device::Enhanced(d) => d.start_arbitration(master_address).await,
        }
    }

    /// Whether an arbitration attempt is currently in progress.
    pub fn is_arbitrating(&self) -> bool {
        match self {
            Device::Plain(d) => d.is_arbitrating(),
            Device::Enhanced(d) => d.is_arbitrating(),
        }
    }

    /// Cancel a running arbitration, if any.
    pub fn cancel_arbitration(&mut self) -> bool {
        match self {
            Device::Plain(d) => d.cancel_arbitration(),
            Device::Enhanced(d) => d.cancel_arbitration(),
        }
    }
}
