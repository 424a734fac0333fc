//! Common test utilities for integration tests.
//!
//! Builds a [`ProtocolEngine`] wired to an in-memory loopback bus via the
//! `lab` transport, so scenarios from end to end run without real
//! hardware.

use ebus::device::{Device, PlainDevice};
use ebus::protocol::{ProtocolConfig, ProtocolEngine};
use ebus::transport::lab::{LabHarness, LabTransport};
use ebus::transport::Transport;

/// A protocol engine paired with the harness driving its loopback bus.
pub struct Rig {
    pub engine: ProtocolEngine,
    pub harness: LabHarness,
}

/// Build a rig with the given configuration, already opened.
pub async fn rig(config: ProtocolConfig) -> Rig {
    let (transport, harness) = LabTransport::pair();
    let device = Device::Plain(PlainDevice::new(Transport::Lab(transport)));
    let mut engine = ProtocolEngine::new(device, config);
    engine.open().await.expect("lab device always opens");
    Rig { engine, harness }
}
