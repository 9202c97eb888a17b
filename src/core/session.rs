//! Request orchestrator
//!
//! A [`Session`] sits on top of the [`Adapter`] and turns the raw datagram
//! stream into ECHONET Lite request/reply exchanges. It assigns transaction
//! IDs, correlates replies, paces the meter and recovers a stale link by
//! re-running PANA authentication.

use crate::core::adapter::{wait_until, Adapter, AdapterEvent, NetworkInfo, WaitOutcome};
use crate::core::echonet::{compose, parse, Packet, PacketRequest, PropertyDecoder, StandardDecoders};
use crate::core::meter::MeterCache;
use crate::core::state_machine::ConnectionState;
use crate::error::{Error, Result};
use bytes::Bytes;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{sleep, Instant};

/// Send/correlate attempts per exchange before the recovery cycle
pub const EXCHANGE_ATTEMPTS: usize = 3;

/// Cycling 16-bit transaction ID source
#[derive(Debug)]
pub struct TransactionCounter(AtomicU16);

impl TransactionCounter {
    /// Counter starting at a random value
    pub fn new() -> Self {
        Self::starting_at(rand::random())
    }

    /// Counter starting at `seed`
    pub fn starting_at(seed: u16) -> Self {
        Self(AtomicU16::new(seed))
    }

    /// Next transaction ID; wraps from 0xFFFF to 0
    pub fn next_tid(&self) -> u16 {
        self.0.fetch_add(1, Ordering::Relaxed)
    }
}

impl Default for TransactionCounter {
    fn default() -> Self {
        Self::new()
    }
}

/// Session events
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// Adapter connection state changed
    StateChanged(ConnectionState),
    /// Raw line from the dongle, for diagnostics
    LineReceived(String),
    /// ECHONET Lite packet from the meter, solicited or not
    PacketReceived {
        /// Sender link-local address
        sender: String,
        /// Parsed packet
        packet: Packet,
    },
    /// ECHONET Lite packet handed to the dongle
    PacketSent {
        /// Parsed copy of the request
        packet: Packet,
        /// Wire bytes
        raw: Bytes,
    },
}

async fn forward_events(
    mut adapter_events: broadcast::Receiver<AdapterEvent>,
    events: broadcast::Sender<SessionEvent>,
    decoder: Arc<dyn PropertyDecoder>,
) {
    loop {
        let event = match adapter_events.recv().await {
            Ok(AdapterEvent::StateChanged(state)) => SessionEvent::StateChanged(state),
            Ok(AdapterEvent::LineReceived(line)) => SessionEvent::LineReceived(line),
            Ok(AdapterEvent::Datagram { sender, payload }) => match parse(&payload, decoder.as_ref()) {
                Ok(Some(packet)) => {
                    tracing::debug!(sender = %sender, tid = packet.tid, esv = %packet.esv, "ECHONET Lite packet received");
                    SessionEvent::PacketReceived { sender, packet }
                }
                Ok(None) => {
                    tracing::trace!(sender = %sender, len = payload.len(), "Ignoring non-ECHONET datagram");
                    continue;
                }
                Err(e) => {
                    tracing::warn!(sender = %sender, error = %e, "Dropping malformed ECHONET Lite packet");
                    continue;
                }
            },
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "Session event forwarder lagged behind");
                continue;
            }
            Err(broadcast::error::RecvError::Closed) => break,
        };
        let _ = events.send(event);
    }
}

/// ECHONET Lite session with a smart meter
pub struct Session {
    adapter: Arc<Adapter>,
    decoder: Arc<dyn PropertyDecoder>,
    tids: TransactionCounter,
    events: broadcast::Sender<SessionEvent>,
    forwarder: JoinHandle<()>,
    pub(crate) cache: Mutex<MeterCache>,
}

impl Session {
    /// Create a session decoding properties with [`StandardDecoders`].
    ///
    /// Must be called inside a tokio runtime.
    pub fn new(adapter: Adapter) -> Self {
        Self::with_decoder(adapter, Arc::new(StandardDecoders))
    }

    /// Create a session with a custom property decoder
    pub fn with_decoder(adapter: Adapter, decoder: Arc<dyn PropertyDecoder>) -> Self {
        let (events, _) = broadcast::channel(crate::core::transport::EVENT_CAPACITY);
        let forwarder = tokio::spawn(forward_events(adapter.subscribe(), events.clone(), decoder.clone()));

        Self {
            adapter: Arc::new(adapter),
            decoder,
            tids: TransactionCounter::new(),
            events,
            forwarder,
            cache: Mutex::new(MeterCache::default()),
        }
    }

    /// Underlying adapter
    pub fn adapter(&self) -> &Arc<Adapter> {
        &self.adapter
    }

    /// Subscribe to session events
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    /// Current connection state
    pub fn state(&self) -> ConnectionState {
        self.adapter.state()
    }

    /// Network information, present while connected
    pub fn network_info(&self) -> Option<NetworkInfo> {
        self.adapter.network_info()
    }

    /// Connect the adapter and forget values cached from a previous meter
    pub async fn connect(&self) -> Result<NetworkInfo> {
        self.cache.lock().clear();
        self.adapter.connect().await
    }

    /// Disconnect the adapter
    pub async fn disconnect(&self) -> Result<()> {
        self.adapter.disconnect().await
    }

    /// Next transaction ID
    pub fn assign_transaction_id(&self) -> u16 {
        self.tids.next_tid()
    }

    /// Send `request` and wait for the matching reply.
    ///
    /// A transaction ID is assigned when the request has none. A reply
    /// timeout re-authenticates before the next attempt; a send failure left
    /// over after all attempts gets one more re-authenticate-and-retry cycle.
    pub async fn exchange(&self, request: &PacketRequest) -> Result<Packet> {
        if !self.adapter.state().is_connected() {
            return Err(Error::NotConnected);
        }

        let mut request = request.clone();
        if request.tid.is_none() {
            request.tid = Some(u32::from(self.assign_transaction_id()));
        }
        let frame = compose(&request)?;
        let tid = u16::from_be_bytes([frame[2], frame[3]]);
        let pacing = self.adapter.config().timings().pacing();

        let mut last_error = None;
        for attempt in 1..=EXCHANGE_ATTEMPTS {
            match self.attempt(tid, &frame).await {
                Ok(reply) => {
                    sleep(pacing).await;
                    return Ok(reply);
                }
                Err(e) => {
                    tracing::warn!(attempt, tid, error = %e, "Exchange attempt failed");
                    let error = if e.triggers_rejoin() {
                        tracing::warn!(tid, "Re-authenticating after reply timeout");
                        match self.adapter.join_pan(None).await {
                            Ok(()) => e,
                            Err(rejoin) => rejoin,
                        }
                    } else {
                        e
                    };
                    sleep(pacing).await;
                    last_error = Some(error);
                    if !self.adapter.state().is_connected() {
                        break;
                    }
                }
            }
        }

        let error = last_error.unwrap_or(Error::NotConnected);
        if !error.is_send_failure() || !self.adapter.state().is_connected() {
            return Err(error);
        }

        tracing::warn!(tid, "Send keeps failing, re-authenticating once more");
        self.adapter.join_pan(None).await?;
        sleep(pacing).await;
        let result = self.attempt(tid, &frame).await;
        sleep(pacing).await;
        result.map_err(|e| {
            tracing::warn!(tid, error = %e, "Recovery attempt failed");
            error
        })
    }

    async fn attempt(&self, tid: u16, frame: &[u8]) -> Result<Packet> {
        let mut events = self.events.subscribe();
        self.adapter.send_application_data(frame).await?;

        if let Ok(Some(packet)) = parse(frame, self.decoder.as_ref()) {
            let _ = self.events.send(SessionEvent::PacketSent {
                packet,
                raw: Bytes::copy_from_slice(frame),
            });
        }

        let waited = self.adapter.config().timings().response_timeout();
        let reply = async {
            loop {
                match events.recv().await {
                    Ok(SessionEvent::PacketReceived { packet, .. }) if packet.tid == tid && packet.esv.is_reply() => {
                        return Some(packet);
                    }
                    Ok(SessionEvent::StateChanged(ConnectionState::Disconnecting | ConnectionState::Disconnected))
                    | Err(broadcast::error::RecvError::Closed) => return None,
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "Reply correlation lagged behind");
                    }
                }
            }
        };

        match wait_until(Instant::now() + waited, reply).await {
            WaitOutcome::Value(packet) => Ok(packet),
            WaitOutcome::TimedOut => Err(Error::ResponseTimeout {
                tid,
                waited_ms: self.adapter.config().timings().response_timeout_ms,
            }),
            WaitOutcome::Cancelled => Err(Error::Cancelled),
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.forwarder.abort();
    }
}
