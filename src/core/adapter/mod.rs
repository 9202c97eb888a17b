//! Wi-SUN Route-B transport engine
//!
//! Drives the dongle from a closed port to an authenticated PANA session and
//! offers the request/response primitives the session layer builds on.
//!
//! # Example
//!
//! ```ignore
//! let adapter = Adapter::serial(config);
//! let info = adapter.connect().await?;
//! adapter.send_application_data(&packet).await?;
//! adapter.disconnect().await?;
//! ```
//!
//! Operations are single-flight: the engine keeps one pending exchange and
//! callers must await each operation before issuing the next.

mod command;
mod pending;

pub use command::{
    mask_echo, udp_send_frame, Command, ControlReply, Erxudp, Event, PanDescriptor,
    PanDescriptorBuilder, ECHONET_UDP_PORT,
};
pub use pending::{wait_until, Exchange, LineFilter, PendingSlot, WaitOutcome};

use crate::config::AdapterConfig;
use crate::core::state_machine::{ConnectionState, ConnectionStateMachine, InvalidTransition, StateTransition};
use crate::core::transport::{ChannelEvent, LineChannel, SerialLineChannel, EVENT_CAPACITY, LINE_DELIMITER};
use crate::error::{Error, Result};
use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{sleep, Instant};

/// Active scan attempts before giving up
pub const SCAN_ATTEMPTS: usize = 3;

/// PANA attempts per join
pub const JOIN_ATTEMPTS: usize = 3;

/// Largest payload a `SKSENDTO` length field can carry
pub const MAX_UDP_PAYLOAD: usize = 0xFFFF;

/// Addresses and PAN parameters of an authenticated link
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkInfo {
    /// Dongle MAC address
    pub source_mac: String,
    /// Dongle link-local address
    pub source_link_local_addr: String,
    /// Meter MAC address
    pub dest_mac: String,
    /// Meter link-local address
    pub dest_link_local_addr: String,
    /// Logical channel
    pub channel: u8,
    /// Channel page
    pub channel_page: u8,
    /// PAN ID
    pub pan_id: u16,
    /// Pairing ID
    pub pairing_id: String,
}

/// Event published by the adapter
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdapterEvent {
    /// Connection state changed
    StateChanged(ConnectionState),
    /// A line arrived (binary `ERXUDP` payloads rendered as hex)
    LineReceived(String),
    /// A UDP datagram arrived
    Datagram {
        /// Sender link-local address
        sender: String,
        /// Payload bytes
        payload: Bytes,
    },
}

struct Shared {
    config: AdapterConfig,
    channel: tokio::sync::Mutex<Box<dyn LineChannel>>,
    state: Mutex<ConnectionStateMachine>,
    netinfo: RwLock<Option<NetworkInfo>>,
    dest_addr: RwLock<Option<String>>,
    version: RwLock<Option<String>>,
    pending: PendingSlot,
    events: broadcast::Sender<AdapterEvent>,
    expected_closes: AtomicUsize,
}

impl Shared {
    fn emit(&self, event: AdapterEvent) {
        let _ = self.events.send(event);
    }

    fn transition(&self, to: ConnectionState, reason: &str) -> std::result::Result<(), InvalidTransition> {
        let transition = self.state.lock().transition(to, Some(reason))?;
        tracing::info!(from = %transition.from, to = %transition.to, reason, "Adapter state changed");
        self.emit(AdapterEvent::StateChanged(to));
        Ok(())
    }

    fn meter_address(&self) -> Option<String> {
        self.netinfo
            .read()
            .as_ref()
            .map(|info| info.dest_link_local_addr.clone())
            .or_else(|| self.dest_addr.read().clone())
    }

    fn finish_connect(&self, info: NetworkInfo) -> Result<()> {
        let transition = {
            let mut sm = self.state.lock();
            if sm.state() != ConnectionState::Connecting {
                return Err(Error::Cancelled);
            }
            *self.netinfo.write() = Some(info);
            sm.transition(ConnectionState::Connected, Some("PANA session established"))
                .map_err(|e| Error::InvalidState(e.from))?
        };
        tracing::info!(from = %transition.from, to = %transition.to, "Adapter state changed");
        self.emit(AdapterEvent::StateChanged(ConnectionState::Connected));
        Ok(())
    }

    /// Tear down to `Disconnected`; a no-op when already disconnecting
    async fn teardown(&self, reason: &str) -> Result<()> {
        if self.transition(ConnectionState::Disconnecting, reason).is_err() {
            return Ok(());
        }

        self.pending.cancel();
        *self.netinfo.write() = None;
        *self.dest_addr.write() = None;

        let closed = {
            let mut channel = self.channel.lock().await;
            if channel.is_open() {
                self.expected_closes.fetch_add(1, Ordering::SeqCst);
                channel.close().await
            } else {
                Ok(())
            }
        };
        if let Err(e) = &closed {
            tracing::warn!(error = %e, "Closing the channel failed");
        }

        let _ = self.transition(ConnectionState::Disconnected, reason);
        closed.map_err(Error::from)
    }

    async fn handle_line(&self, raw: &[u8]) {
        if let Some(rx) = Erxudp::parse(raw) {
            let line = rx.display_line(raw);
            tracing::debug!(line = %line, "RX");
            self.emit(AdapterEvent::LineReceived(line));
            self.emit(AdapterEvent::Datagram {
                sender: rx.sender,
                payload: rx.payload,
            });
            return;
        }

        let line = String::from_utf8_lossy(raw);
        let line = mask_echo(&line);
        tracing::debug!(line, "RX");

        if let Some(event) = Event::parse(line).filter(Event::ends_session) {
            tracing::warn!(code = event.code, "PANA session ended by the meter");
            self.pending.cancel();
            if let Err(e) = self.teardown("PANA session ended").await {
                tracing::warn!(error = %e, "Teardown after session end failed");
            }
        }

        self.emit(AdapterEvent::LineReceived(line.to_string()));
        self.pending.offer(line);
    }

    async fn handle_closed(&self) {
        let expected = self
            .expected_closes
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if expected {
            return;
        }
        tracing::warn!("Channel closed unexpectedly");
        if let Err(e) = self.teardown("channel closed").await {
            tracing::warn!(error = %e, "Teardown after channel loss failed");
        }
    }
}

async fn run_reader(shared: Arc<Shared>, mut lines: broadcast::Receiver<ChannelEvent>) {
    loop {
        match lines.recv().await {
            Ok(ChannelEvent::Line(line)) => shared.handle_line(&line).await,
            Ok(ChannelEvent::Closed) => shared.handle_closed().await,
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "Line reader lagged behind");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

/// Wi-SUN dongle driver
pub struct Adapter {
    shared: Arc<Shared>,
    lines: Mutex<Option<broadcast::Receiver<ChannelEvent>>>,
    reader: Mutex<Option<JoinHandle<()>>>,
}

impl Adapter {
    /// Create an adapter over `channel`
    pub fn new(config: AdapterConfig, channel: Box<dyn LineChannel>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let lines = channel.subscribe();

        Self {
            shared: Arc::new(Shared {
                config,
                channel: tokio::sync::Mutex::new(channel),
                state: Mutex::new(ConnectionStateMachine::new()),
                netinfo: RwLock::new(None),
                dest_addr: RwLock::new(None),
                version: RwLock::new(None),
                pending: PendingSlot::new(),
                events,
                expected_closes: AtomicUsize::new(0),
            }),
            lines: Mutex::new(Some(lines)),
            reader: Mutex::new(None),
        }
    }

    /// Create an adapter on the configured serial port
    pub fn serial(config: AdapterConfig) -> Self {
        let channel = SerialLineChannel::new(config.port(), config.baud_rate());
        Self::new(config, Box::new(channel))
    }

    /// Subscribe to adapter events
    pub fn subscribe(&self) -> broadcast::Receiver<AdapterEvent> {
        self.shared.events.subscribe()
    }

    /// Current connection state
    pub fn state(&self) -> ConnectionState {
        self.shared.state.lock().state()
    }

    /// Recorded state transitions, oldest first
    pub fn state_history(&self) -> Vec<StateTransition> {
        self.shared.state.lock().history().to_vec()
    }

    /// Network information, present while connected
    pub fn network_info(&self) -> Option<NetworkInfo> {
        self.shared.netinfo.read().clone()
    }

    /// Dongle firmware version reported by the last connect
    pub fn version(&self) -> Option<String> {
        self.shared.version.read().clone()
    }

    /// Adapter configuration
    pub fn config(&self) -> &AdapterConfig {
        &self.shared.config
    }

    /// Description of the underlying channel
    pub async fn describe(&self) -> String {
        self.shared.channel.lock().await.describe()
    }

    fn ensure_reader(&self) {
        let mut reader = self.reader.lock();
        if reader.is_some() {
            return;
        }
        if let Some(lines) = self.lines.lock().take() {
            *reader = Some(tokio::spawn(run_reader(self.shared.clone(), lines)));
        }
    }

    /// Open the port and run the full connect sequence.
    ///
    /// Any failure tears the connection down before it is returned.
    pub async fn connect(&self) -> Result<NetworkInfo> {
        self.ensure_reader();
        self.shared
            .transition(ConnectionState::Connecting, "connect")
            .map_err(|e| Error::InvalidState(e.from))?;

        match self.run_connect().await {
            Ok(info) => Ok(info),
            Err(e) => {
                tracing::warn!(error = %e, "Connect failed");
                let _ = self.shared.teardown("connect failed").await;
                Err(e)
            }
        }
    }

    async fn run_connect(&self) -> Result<NetworkInfo> {
        let config = &self.shared.config;
        self.shared.channel.lock().await.open().await?;

        let reply = self.send_control_command(&Command::Version).await?;
        let version = command::parse_version(&reply).unwrap_or(reply);
        tracing::info!(version = %version, "Dongle firmware");
        *self.shared.version.write() = Some(version);

        let reply = self.send_control_command(&Command::Info).await?;
        let (source_addr, source_mac) =
            command::parse_info(&reply).ok_or_else(|| Error::UnexpectedReply(reply.clone()))?;

        self.send_control_command(&Command::SetPassword(config.password()))
            .await?;
        self.send_control_command(&Command::SetRouteBId(config.id()))
            .await?;

        let pan = self.scan_for_pan().await?;

        let reply = self.send_control_command(&Command::LinkLocal(&pan.mac)).await?;
        let dest_addr = command::parse_link_local(&reply).ok_or_else(|| Error::UnexpectedReply(reply.clone()))?;
        *self.shared.dest_addr.write() = Some(dest_addr.clone());

        self.send_control_command(&Command::SetChannel(pan.channel)).await?;
        self.send_control_command(&Command::SetPanId(pan.pan_id)).await?;
        self.send_control_command(&Command::SetReceiveFormat).await?;
        sleep(config.timings().settle()).await;

        self.join_attempts(&dest_addr).await?;

        let info = NetworkInfo {
            source_mac,
            source_link_local_addr: source_addr,
            dest_mac: pan.mac,
            dest_link_local_addr: dest_addr,
            channel: pan.channel,
            channel_page: pan.channel_page,
            pan_id: pan.pan_id,
            pairing_id: pan.pairing_id,
        };
        self.shared.finish_connect(info.clone())?;
        tracing::info!(meter = %info.dest_link_local_addr, channel = info.channel, pan_id = info.pan_id, "Connected");
        Ok(info)
    }

    async fn write_command(&self, command: &Command<'_>) -> Result<()> {
        tracing::debug!(command = %command, "TX");
        let mut line = command.to_line().into_bytes();
        line.extend_from_slice(LINE_DELIMITER);
        self.shared.channel.lock().await.write(&line).await?;
        Ok(())
    }

    /// Send a command answered by a single line and return that line.
    ///
    /// `FAIL` replies become [`Error::CommandRejected`].
    pub async fn send_control_command(&self, command: &Command<'_>) -> Result<String> {
        let filter = command.reply_filter().ok_or_else(|| {
            Error::InvalidArgument(format!("{} is not a control command", command.keyword()))
        })?;

        let mut exchange = self.shared.pending.issue(filter);
        self.write_command(command).await?;

        let deadline = Instant::now() + self.shared.config.timings().command_timeout();
        match exchange.recv_until(deadline).await {
            WaitOutcome::Value(line) => match ControlReply::parse(&line) {
                Some(ControlReply::Fail(reply)) => Err(Error::CommandRejected {
                    command: command.keyword().to_string(),
                    reply,
                }),
                _ => Ok(line),
            },
            WaitOutcome::TimedOut => Err(Error::CommandTimeout(command.keyword().to_string())),
            WaitOutcome::Cancelled => Err(Error::Cancelled),
        }
    }

    async fn scan_once(&self) -> Result<Option<PanDescriptor>> {
        let period = self.shared.config.timings().scan_timeout();
        let mut exchange = self.shared.pending.issue(command::is_scan_line);
        self.write_command(&Command::ActiveScan).await?;

        let mut deadline = Instant::now() + period;
        let mut descriptor: Option<PanDescriptorBuilder> = None;
        loop {
            match exchange.recv_until(deadline).await {
                WaitOutcome::Value(line) => {
                    if line.starts_with("EPANDESC") {
                        descriptor = Some(PanDescriptorBuilder::default());
                        deadline = Instant::now() + period;
                    } else if line.starts_with("EVENT 22") {
                        return Ok(descriptor.and_then(|d| d.build()));
                    } else if let Some(builder) = descriptor.as_mut() {
                        builder.feed(&line);
                    }
                }
                WaitOutcome::TimedOut => return Ok(descriptor.and_then(|d| d.build())),
                WaitOutcome::Cancelled => return Err(Error::Cancelled),
            }
        }
    }

    /// Run active scans until a meter answers
    pub async fn scan_for_pan(&self) -> Result<PanDescriptor> {
        for attempt in 1..=SCAN_ATTEMPTS {
            if let Some(pan) = self.scan_once().await? {
                tracing::info!(attempt, mac = %pan.mac, channel = pan.channel, pan_id = pan.pan_id, "Meter found");
                return Ok(pan);
            }
            tracing::warn!(attempt, "Active scan found no meter");
        }
        Err(Error::NoMeterFound)
    }

    async fn join_once(&self, addr: &str) -> Result<bool> {
        let mut exchange = self.shared.pending.issue(command::is_join_result);
        self.write_command(&Command::Join(addr)).await?;

        let deadline = Instant::now() + self.shared.config.timings().join_timeout();
        match exchange.recv_until(deadline).await {
            WaitOutcome::Value(line) => Ok(Event::parse(&line).is_some_and(|e| e.code == Event::PANA_SUCCEEDED)),
            WaitOutcome::TimedOut => Ok(false),
            WaitOutcome::Cancelled => Err(Error::Cancelled),
        }
    }

    async fn join_attempts(&self, addr: &str) -> Result<()> {
        for attempt in 1..=JOIN_ATTEMPTS {
            if self.join_once(addr).await? {
                tracing::info!(attempt, "PANA authentication succeeded");
                return Ok(());
            }
            tracing::warn!(attempt, "PANA authentication failed");
            sleep(self.shared.config.timings().join_retry()).await;
        }
        Err(Error::AuthenticationFailed)
    }

    /// Re-run PANA authentication against `addr`, or the known meter address.
    ///
    /// Failure tears the connection down.
    pub async fn join_pan(&self, addr: Option<&str>) -> Result<()> {
        let addr = match addr {
            Some(addr) => addr.to_string(),
            None => self.shared.meter_address().ok_or(Error::NoAddress)?,
        };

        let result = self.join_attempts(&addr).await;
        if let Err(e) = &result {
            tracing::warn!(error = %e, "Re-authentication failed");
            let _ = self.shared.teardown("re-authentication failed").await;
        }
        result
    }

    /// Send `payload` to the meter over UDP and wait for the dongle's confirmation
    pub async fn send_application_data(&self, payload: &[u8]) -> Result<()> {
        if payload.len() > MAX_UDP_PAYLOAD {
            return Err(Error::InvalidArgument(format!(
                "payload of {} bytes exceeds {MAX_UDP_PAYLOAD}",
                payload.len()
            )));
        }
        let addr = self.shared.meter_address().ok_or(Error::NoAddress)?;
        let frame = udp_send_frame(&addr, payload);

        let mut exchange = self.shared.pending.issue(command::is_send_confirmation);
        tracing::debug!(dest = %addr, data = %hex::encode_upper(payload), "TX SKSENDTO");
        let written = self.shared.channel.lock().await.write(&frame).await;
        if let Err(e) = written {
            let _ = self.shared.teardown("write failed").await;
            return Err(e.into());
        }

        let timeout = self.shared.config.timings().send_timeout();
        match exchange.recv_until(Instant::now() + timeout).await {
            WaitOutcome::Value(line) => match Event::parse(&line).and_then(|e| e.send_status()) {
                Some(0) => Ok(()),
                _ => Err(Error::SendFailure(line)),
            },
            WaitOutcome::TimedOut => Err(Error::SendTimeout(self.shared.config.timings().send_timeout_ms)),
            WaitOutcome::Cancelled => Err(Error::Cancelled),
        }
    }

    /// Tear down to `Disconnected`; a no-op when already disconnected
    pub async fn disconnect(&self) -> Result<()> {
        self.shared.teardown("disconnect requested").await
    }
}

impl Drop for Adapter {
    fn drop(&mut self) {
        if let Some(reader) = self.reader.lock().take() {
            reader.abort();
        }
    }
}
