//! Crate-level error type
//!
//! Layer errors (`TransportError`, `CodecError`, `ConfigError`) are wrapped
//! here together with the failures raised by the transport engine and the
//! request orchestrator.

use crate::config::ConfigError;
use crate::core::state_machine::ConnectionState;
use crate::core::echonet::CodecError;
use crate::core::transport::TransportError;
use thiserror::Error;

/// Result alias used throughout the library
pub type Result<T> = std::result::Result<T, Error>;

/// Errors returned by the adapter, the session and the meter helpers
#[derive(Error, Debug)]
pub enum Error {
    /// Invalid port path or Route-B credentials
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigError),

    /// Serial channel open/write/close failure
    #[error("Channel error: {0}")]
    Channel(#[from] TransportError),

    /// Packet validation or parsing failure
    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    /// Active scan found no meter after all attempts
    #[error("No low-voltage smart electric energy meter was found")]
    NoMeterFound,

    /// PANA authentication failed on every attempt
    #[error("PANA authentication failed, check the Route-B ID and password")]
    AuthenticationFailed,

    /// No meter link-local address is known yet
    #[error("No meter address is available")]
    NoAddress,

    /// The dongle did not confirm a UDP send in time
    #[error("UDP send was not confirmed within {0} ms")]
    SendTimeout(u64),

    /// The dongle reported a non-zero UDP send status
    #[error("UDP send failed: {0}")]
    SendFailure(String),

    /// No reply with a matching transaction ID arrived in time
    #[error("No reply for transaction {tid:#06X} within {waited_ms} ms")]
    ResponseTimeout {
        /// Transaction ID of the request
        tid: u16,
        /// Milliseconds waited
        waited_ms: u64,
    },

    /// A control command got no `OK`/`FAIL` reply
    #[error("Command {0} timed out")]
    CommandTimeout(String),

    /// The dongle answered a control command with `FAIL`
    #[error("Command {command} rejected: {reply}")]
    CommandRejected {
        /// Command keyword
        command: String,
        /// Raw reply line
        reply: String,
    },

    /// Operation requires a connected adapter
    #[error("Smart meter is not connected")]
    NotConnected,

    /// Operation is not allowed in the current connection state
    #[error("Operation not allowed while {0}")]
    InvalidState(ConnectionState),

    /// The wait was abandoned because the connection was torn down
    #[error("Exchange cancelled by disconnect")]
    Cancelled,

    /// The meter answered with an unexpected service code or data
    #[error("Unexpected reply: {0}")]
    UnexpectedReply(String),

    /// Caller supplied an out-of-range argument to a meter helper
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
}

impl Error {
    /// Whether the orchestrator answers this failure with re-authentication
    pub fn triggers_rejoin(&self) -> bool {
        matches!(self, Self::ResponseTimeout { .. })
    }

    /// Whether this is a rejected UDP send
    pub fn is_send_failure(&self) -> bool {
        matches!(self, Self::SendFailure(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejoin_classification() {
        let timeout = Error::ResponseTimeout {
            tid: 1,
            waited_ms: 10_000,
        };
        assert!(timeout.triggers_rejoin());
        assert!(!Error::SendTimeout(5000).triggers_rejoin());
        assert!(Error::SendFailure("EVENT 21 FE80 0 01".into()).is_send_failure());
    }

    #[test]
    fn test_display() {
        let err = Error::ResponseTimeout {
            tid: 0x1A,
            waited_ms: 10_000,
        };
        assert_eq!(err.to_string(), "No reply for transaction 0x001A within 10000 ms");
        assert_eq!(
            Error::InvalidState(ConnectionState::Connected).to_string(),
            "Operation not allowed while connected"
        );
    }
}
