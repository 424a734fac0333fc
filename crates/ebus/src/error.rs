//! Error types for eBUS protocol operations.

use std::io;

/// Result type for eBUS operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while talking to an eBUS.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// I/O error from the underlying transport.
    #[error("transport I/O error: {0}")]
    TransportIo(#[from] io::Error),

    /// Invalid escape sequence, or enhanced-framing byte out of sequence.
    #[error("framing error: {0}")]
    Framing(String),

    /// A byte did not arrive within the expected window.
    #[error("timeout waiting for {0}")]
    Timeout(String),

    /// Arbitration was lost, or the bus dropped out mid-telegram.
    #[error("bus arbitration lost")]
    BusLost,

    /// The master part's CRC did not match.
    #[error("master CRC mismatch")]
    CrcMaster,

    /// The slave part's CRC did not match.
    #[error("slave CRC mismatch")]
    CrcSlave,

    /// The addressee answered NAK (after the single permitted retry).
    #[error("NAK received")]
    Nak,

    /// No bus activity has been seen for longer than the signal timeout.
    #[error("no signal on bus")]
    NoSignal,

    /// An address byte violates the master/slave nibble rules.
    #[error("invalid bus address: {0:#04x}")]
    InvalidAddress(u8),

    /// A field value could not be encoded or decoded.
    #[error("invalid field {field}: {reason}")]
    InvalidField {
        /// Name of the offending field.
        field: String,
        /// Human-readable reason.
        reason: String,
    },

    /// Catalog lookup found no matching message.
    #[error("message not found: {0}")]
    NotFound(String),

    /// A definition collides with one already present in the catalog.
    #[error("duplicate entry: {0}")]
    Duplicate(String),

    /// A numeric or positional value fell outside its permitted range.
    #[error("value out of range: {0}")]
    OutOfRange(String),

    /// The requested message is not permitted at the caller's access level.
    #[error("access denied for level {0}")]
    AccessDenied(String),

    /// The request was cancelled before or during execution.
    #[error("request cancelled")]
    Cancelled,
}

impl Error {
    /// Build an [`Error::InvalidField`] from a field name and reason.
    pub fn invalid_field(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidField {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Whether a caller may retry the operation that produced this error.
    ///
    /// Mirrors the propagation policy of the protocol engine: every kind is
    /// retryable except the two that indicate a persistent, non-transient
    /// condition.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::NoSignal | Self::InvalidAddress(_))
    }

    /// Whether this error should close the underlying device.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::TransportIo(_) | Self::NoSignal)
    }

    /// Whether this is a CRC mismatch of either part.
    pub fn is_crc(&self) -> bool {
        matches!(self, Self::CrcMaster | Self::CrcSlave)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_excludes_no_signal_and_invalid_address() {
        assert!(!Error::NoSignal.is_retryable());
        assert!(!Error::InvalidAddress(0xAA).is_retryable());
        assert!(Error::BusLost.is_retryable());
        assert!(Error::Nak.is_retryable());
        assert!(Error::CrcSlave.is_retryable());
    }

    #[test]
    fn fatal_closes_device() {
        assert!(Error::NoSignal.is_fatal());
        assert!(!Error::Nak.is_fatal());
        assert!(!Error::BusLost.is_fatal());
    }

    #[test]
    fn crc_predicate() {
        assert!(Error::CrcMaster.is_crc());
        assert!(Error::CrcSlave.is_crc());
        assert!(!Error::Nak.is_crc());
    }

    #[test]
    fn invalid_field_messages() {
        let err = Error::invalid_field("temperature", "reserved marker 0xFF");
        assert_eq!(
            err.to_string(),
            "invalid field temperature: reserved marker 0xFF"
        );
    }
}
