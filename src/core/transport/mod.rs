//! Line transport for the Wi-SUN dongle
//!
//! The dongle speaks a CRLF-delimited command protocol over a serial link.
//! A [`LineChannel`] owns the byte stream, splits it into lines and publishes
//! them to subscribers; the adapter only ever sees whole lines.

mod framing;
mod serial;

pub use framing::{erxudp_frame_len, DongleLineCodec, MAX_LINE_LENGTH};
pub use serial::{list_ports, SerialLineChannel};

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;
use tokio::sync::broadcast;

/// Line delimiter used by the dongle in both directions
pub const LINE_DELIMITER: &[u8] = b"\r\n";

/// Capacity of the line broadcast channel
pub const EVENT_CAPACITY: usize = 1024;

/// Transport error types
#[derive(Error, Debug)]
pub enum TransportError {
    /// Connection failed
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Port not found
    #[error("Port not found: {0}")]
    PortNotFound(String),

    /// Permission denied
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// I/O error
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// Not connected
    #[error("Not connected")]
    NotConnected,

    /// Send error
    #[error("Send error: {0}")]
    SendError(String),
}

/// Event published by a line channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    /// One line, delimiter stripped
    Line(Bytes),
    /// The underlying port closed
    Closed,
}

/// Transport statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChannelStats {
    /// Bytes written
    pub bytes_sent: u64,
    /// Lines received
    pub lines_received: u64,
}

/// Line-oriented byte channel to the dongle.
///
/// Subscribers obtained before [`open`](LineChannel::open) see every line
/// produced afterwards, across reopen cycles.
#[async_trait]
pub trait LineChannel: Send + Sync {
    /// Open the underlying port
    async fn open(&mut self) -> Result<(), TransportError>;

    /// Close the underlying port; publishes [`ChannelEvent::Closed`]
    async fn close(&mut self) -> Result<(), TransportError>;

    /// Write raw bytes (the caller appends the delimiter)
    async fn write(&mut self, data: &[u8]) -> Result<(), TransportError>;

    /// Check if the port is open
    fn is_open(&self) -> bool;

    /// Subscribe to line and close events
    fn subscribe(&self) -> broadcast::Receiver<ChannelEvent>;

    /// Human-readable description of the channel
    fn describe(&self) -> String;

    /// Get statistics
    fn stats(&self) -> ChannelStats {
        ChannelStats::default()
    }
}
