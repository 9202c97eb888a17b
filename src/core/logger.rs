//! Traffic recorder
//!
//! Writes the lines received from the dongle and the ECHONET Lite packets
//! sent to the meter to a file, one entry per line.

use crate::core::session::SessionEvent;
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

/// Record file format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum RecordFormat {
    /// Timestamped text
    #[default]
    Text,
    /// Timestamped hex bytes
    Hex,
    /// JSON lines
    JsonLines,
}

impl RecordFormat {
    /// File extension for the format
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Text => "txt",
            Self::Hex => "hex",
            Self::JsonLines => "jsonl",
        }
    }
}

/// Traffic direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrafficDirection {
    /// From the dongle
    Received,
    /// To the dongle
    Sent,
    /// Connection state notes
    Info,
}

impl TrafficDirection {
    fn tag(self) -> &'static str {
        match self {
            Self::Received => "RX",
            Self::Sent => "TX",
            Self::Info => "##",
        }
    }
}

/// A single record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrafficEntry {
    /// Local time of the record
    pub timestamp: DateTime<Local>,
    /// Direction
    pub direction: TrafficDirection,
    /// Line text, or upper-case hex for packets
    pub data: String,
}

impl TrafficEntry {
    /// Create an entry stamped now
    pub fn new(direction: TrafficDirection, data: impl Into<String>) -> Self {
        Self {
            timestamp: Local::now(),
            direction,
            data: data.into(),
        }
    }

    fn stamp(&self) -> impl std::fmt::Display + '_ {
        self.timestamp.format("%Y-%m-%d %H:%M:%S%.3f")
    }

    /// Format as text
    pub fn to_text(&self) -> String {
        format!("[{}] {} {}", self.stamp(), self.direction.tag(), self.data)
    }

    /// Format as spaced hex of the data bytes
    pub fn to_hex(&self) -> String {
        let hex: Vec<String> = self.data.bytes().map(|b| format!("{b:02X}")).collect();
        format!("[{}] {} {}", self.stamp(), self.direction.tag(), hex.join(" "))
    }

    /// Format as a JSON line
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}

/// Appends session traffic to a file
pub struct TrafficLogger {
    file: BufWriter<File>,
    format: RecordFormat,
    path: PathBuf,
    entries: usize,
}

impl TrafficLogger {
    /// Open `path` for appending
    pub fn create(path: impl AsRef<Path>, format: RecordFormat) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        tracing::info!(path = %path.display(), ?format, "Recording traffic");

        Ok(Self {
            file: BufWriter::new(file),
            format,
            path,
            entries: 0,
        })
    }

    /// Record file path
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Entries written so far
    pub fn entries(&self) -> usize {
        self.entries
    }

    /// Write one entry
    pub fn log(&mut self, entry: &TrafficEntry) -> io::Result<()> {
        let line = match self.format {
            RecordFormat::Text => entry.to_text(),
            RecordFormat::Hex => entry.to_hex(),
            RecordFormat::JsonLines => entry.to_json(),
        };
        writeln!(self.file, "{line}")?;
        self.entries += 1;
        if self.entries % 100 == 0 {
            self.file.flush()?;
        }
        Ok(())
    }

    /// Record a session event; returns whether it produced an entry
    pub fn record(&mut self, event: &SessionEvent) -> io::Result<bool> {
        let entry = match event {
            SessionEvent::LineReceived(line) => TrafficEntry::new(TrafficDirection::Received, line.as_str()),
            SessionEvent::PacketSent { raw, .. } => {
                TrafficEntry::new(TrafficDirection::Sent, hex::encode_upper(raw))
            }
            SessionEvent::StateChanged(state) => TrafficEntry::new(TrafficDirection::Info, format!("state {state}")),
            SessionEvent::PacketReceived { .. } => return Ok(false),
        };
        self.log(&entry)?;
        Ok(true)
    }

    /// Flush buffered entries to disk
    pub fn flush(&mut self) -> io::Result<()> {
        self.file.flush()
    }
}

impl Drop for TrafficLogger {
    fn drop(&mut self) {
        let _ = self.file.flush();
    }
}

/// Record file name with a timestamp
pub fn generate_record_filename(prefix: &str, format: RecordFormat) -> String {
    let timestamp = Local::now().format("%Y%m%d_%H%M%S");
    format!("{prefix}_{timestamp}.{}", format.extension())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::state_machine::ConnectionState;
    use bytes::Bytes;

    #[test]
    fn test_entry_formats() {
        let entry = TrafficEntry::new(TrafficDirection::Received, "OK");
        assert!(entry.to_text().ends_with("RX OK"));
        assert!(entry.to_hex().ends_with("RX 4F 4B"));

        let json: serde_json::Value = serde_json::from_str(&entry.to_json()).unwrap();
        assert_eq!(json["direction"], "Received");
        assert_eq!(json["data"], "OK");
    }

    #[test]
    fn test_record_session_events() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("traffic.txt");
        let mut logger = TrafficLogger::create(&path, RecordFormat::Text).unwrap();

        assert!(logger.record(&SessionEvent::LineReceived("EVENT 21 FE80::1 02 00".into())).unwrap());
        assert!(logger.record(&SessionEvent::StateChanged(ConnectionState::Connected)).unwrap());
        let packet_bytes = Bytes::from_static(&[0x10, 0x81, 0x00, 0x01]);
        let packet = crate::core::echonet::parse(
            &hex::decode("1081000105FF010288016201E700").unwrap(),
            &crate::core::echonet::StandardDecoders,
        )
        .unwrap()
        .unwrap();
        assert!(logger
            .record(&SessionEvent::PacketSent {
                packet,
                raw: packet_bytes,
            })
            .unwrap());
        assert_eq!(logger.entries(), 3);
        drop(logger);

        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].ends_with("RX EVENT 21 FE80::1 02 00"));
        assert!(lines[1].ends_with("## state connected"));
        assert!(lines[2].ends_with("TX 10810001"));
    }

    #[test]
    fn test_record_filename() {
        let name = generate_record_filename("routeb", RecordFormat::JsonLines);
        assert!(name.starts_with("routeb_"));
        assert!(name.ends_with(".jsonl"));
    }
}
