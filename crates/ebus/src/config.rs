//! Ambient configuration (§4.6): the tunables a running daemon collects
//! from its command line / config file and hands down to the protocol
//! engine and dispatcher, rather than threading them as ambient globals.

use crate::error::Result;
use crate::protocol::ProtocolConfig;
use crate::symbol::Symbol;
use crate::transport::ConnectionSpec;
use std::time::Duration;

/// Every tunable collected before a [`crate::protocol::ProtocolEngine`]
/// and [`crate::dispatcher::Dispatcher`] can be built.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Device connection string, e.g. `enh:/dev/ttyUSB0` or
    /// `192.168.1.10:9999`.
    pub device: String,
    /// This host's own master address.
    pub own_address: Symbol,
    /// Whether to also claim the derived slave address for answering.
    pub answer: bool,
    /// Retries permitted after losing bus arbitration.
    pub bus_lost_retries: u32,
    /// Retries permitted after a failed send.
    pub failed_send_retries: u32,
    /// Maximum time to wait to acquire the bus for a send.
    pub bus_acquire_timeout: Duration,
    /// Maximum time to wait for a slave's response after ACKing.
    pub slave_recv_timeout: Duration,
    /// Auto-SYNs to wait after losing to a different-priority master.
    pub lock_count: u32,
    /// Whether this daemon may act as the fallback SYN generator.
    pub generate_syn: bool,
    /// Passive observation only; never transmits.
    pub read_only: bool,
    /// Extra latency budget added to every timeout, to absorb network
    /// transport jitter (§4.1).
    pub extra_latency: Duration,
    /// Spacing between two dequeues of the poll rotation.
    pub poll_interval: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        let protocol_defaults = ProtocolConfig::default();
        Self {
            device: String::new(),
            own_address: protocol_defaults.own_address,
            answer: protocol_defaults.answer,
            bus_lost_retries: protocol_defaults.bus_lost_retries,
            failed_send_retries: protocol_defaults.failed_send_retries,
            bus_acquire_timeout: Duration::from_secs(1),
            slave_recv_timeout: crate::protocol::SLAVE_RECV_TIMEOUT,
            lock_count: protocol_defaults.lock_count,
            generate_syn: protocol_defaults.generate_syn,
            read_only: protocol_defaults.read_only,
            extra_latency: Duration::ZERO,
            poll_interval: crate::dispatcher::DEFAULT_POLL_INTERVAL,
        }
    }
}

impl EngineConfig {
    /// Parse [`EngineConfig::device`] into a connection spec ready to
    /// build a [`crate::device::Device`] from.
    pub fn connection_spec(&self) -> Result<ConnectionSpec> {
        ConnectionSpec::parse(&self.device)
    }

    /// The subset of these tunables the protocol engine itself consumes.
    pub fn protocol_config(&self) -> ProtocolConfig {
        ProtocolConfig {
            own_address: self.own_address,
            answer: self.answer,
            bus_lost_retries: self.bus_lost_retries,
            failed_send_retries: self.failed_send_retries,
            lock_count: self.lock_count,
            generate_syn: self.generate_syn,
            read_only: self.read_only,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_matches_protocol_config_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.own_address, 0x03);
        assert_eq!(config.lock_count, 3);
        assert!(!config.generate_syn);
    }

    #[test]
    fn connection_spec_rejects_malformed_device_string() {
        let mut config = EngineConfig {
            device: "999.999.999.999:notaport".into(),
            ..Default::default()
        };
        assert!(config.connection_spec().is_err());
        config.device = "/dev/ttyUSB0".into();
        assert!(config.connection_spec().is_ok());
    }

    #[test]
    fn protocol_config_round_trips_tunables() {
        let config = EngineConfig {
            own_address: 0x10,
            lock_count: 5,
            ..Default::default()
        };
        let protocol = config.protocol_config();
        assert_eq!(protocol.own_address, 0x10);
        assert_eq!(protocol.lock_count, 5);
    }
}
