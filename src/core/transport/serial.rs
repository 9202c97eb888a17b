//! Serial port line channel

use super::{ChannelEvent, ChannelStats, DongleLineCodec, LineChannel, TransportError, EVENT_CAPACITY};
use async_trait::async_trait;
use futures::StreamExt;
use parking_lot::RwLock;
use std::path::Path;
use std::sync::Arc;
use tokio::io::{AsyncWriteExt, WriteHalf};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_serial::{DataBits, FlowControl, Parity, SerialPortBuilderExt, SerialStream, StopBits};
use tokio_util::codec::FramedRead;

/// Dongle serial port, 8N1 without flow control
pub struct SerialLineChannel {
    port: String,
    baud_rate: u32,
    writer: Option<WriteHalf<SerialStream>>,
    reader: Option<JoinHandle<()>>,
    tx: broadcast::Sender<ChannelEvent>,
    stats: Arc<RwLock<ChannelStats>>,
}

impl SerialLineChannel {
    /// Create a channel for `port`; nothing is opened yet
    pub fn new(port: &str, baud_rate: u32) -> Self {
        let (tx, _) = broadcast::channel(EVENT_CAPACITY);

        Self {
            port: port.to_string(),
            baud_rate,
            writer: None,
            reader: None,
            tx,
            stats: Arc::new(RwLock::new(ChannelStats::default())),
        }
    }

    fn map_open_error(&self, e: &serialport::Error) -> TransportError {
        match e.kind() {
            serialport::ErrorKind::NoDevice => TransportError::PortNotFound(self.port.clone()),
            serialport::ErrorKind::Io(std::io::ErrorKind::PermissionDenied) => {
                TransportError::PermissionDenied(self.port.clone())
            }
            serialport::ErrorKind::Io(std::io::ErrorKind::NotFound) => {
                TransportError::PortNotFound(self.port.clone())
            }
            _ => TransportError::ConnectionFailed(e.to_string()),
        }
    }
}

#[async_trait]
impl LineChannel for SerialLineChannel {
    async fn open(&mut self) -> Result<(), TransportError> {
        if self.writer.is_some() {
            return Ok(());
        }
        if self.port.starts_with('/') && !Path::new(&self.port).exists() {
            return Err(TransportError::PortNotFound(self.port.clone()));
        }

        let stream = tokio_serial::new(&self.port, self.baud_rate)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .flow_control(FlowControl::None)
            .open_native_async()
            .map_err(|e| self.map_open_error(&e))?;

        let (read_half, write_half) = tokio::io::split(stream);
        let mut lines = FramedRead::new(read_half, DongleLineCodec::new());
        let tx = self.tx.clone();
        let stats = self.stats.clone();
        let port = self.port.clone();

        self.reader = Some(tokio::spawn(async move {
            while let Some(item) = lines.next().await {
                match item {
                    Ok(line) => {
                        stats.write().lines_received += 1;
                        let _ = tx.send(ChannelEvent::Line(line));
                    }
                    Err(e) => {
                        tracing::warn!(port = %port, error = %e, "Serial read failed");
                        break;
                    }
                }
            }
            let _ = tx.send(ChannelEvent::Closed);
        }));
        self.writer = Some(write_half);
        *self.stats.write() = ChannelStats::default();

        tracing::info!(port = %self.port, baud = self.baud_rate, "Serial port opened");
        Ok(())
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
        let Some(mut writer) = self.writer.take() else {
            return Ok(());
        };
        let result = writer.shutdown().await;
        let _ = self.tx.send(ChannelEvent::Closed);
        tracing::info!(port = %self.port, "Serial port closed");
        result.map_err(TransportError::IoError)
    }

    async fn write(&mut self, data: &[u8]) -> Result<(), TransportError> {
        let writer = self.writer.as_mut().ok_or(TransportError::NotConnected)?;
        writer.write_all(data).await?;
        writer.flush().await?;
        self.stats.write().bytes_sent += data.len() as u64;
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.writer.is_some()
    }

    fn subscribe(&self) -> broadcast::Receiver<ChannelEvent> {
        self.tx.subscribe()
    }

    fn describe(&self) -> String {
        format!("{} @ {} baud (8N1)", self.port, self.baud_rate)
    }

    fn stats(&self) -> ChannelStats {
        *self.stats.read()
    }
}

impl Drop for SerialLineChannel {
    fn drop(&mut self) {
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
    }
}

/// List available serial ports
pub fn list_ports() -> Result<Vec<serialport::SerialPortInfo>, TransportError> {
    serialport::available_ports().map_err(|e| TransportError::IoError(e.into()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_device_path() {
        let mut channel = SerialLineChannel::new("/dev/routeb-does-not-exist", 115_200);
        let err = tokio_test::block_on(channel.open()).unwrap_err();
        assert!(matches!(err, TransportError::PortNotFound(ref p) if p == "/dev/routeb-does-not-exist"));
        assert!(!channel.is_open());
    }

    #[test]
    fn test_write_requires_open_port() {
        let mut channel = SerialLineChannel::new("/dev/ttyUSB0", 115_200);
        let err = tokio_test::block_on(channel.write(b"SKVER\r\n")).unwrap_err();
        assert!(matches!(err, TransportError::NotConnected));
        assert_eq!(channel.describe(), "/dev/ttyUSB0 @ 115200 baud (8N1)");
    }
}
