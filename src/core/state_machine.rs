//! Connection State Machine
//!
//! Tracks the adapter lifecycle: Disconnected → Connecting → Connected →
//! Disconnecting → Disconnected. Every accepted transition is recorded with a
//! timestamp so the CLI and tests can inspect how a connection ended.

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{Duration, Instant};

/// Adapter connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    /// Port closed, no PANA session
    #[default]
    Disconnected,
    /// Running the connect sequence
    Connecting,
    /// PANA session established
    Connected,
    /// Tearing down
    Disconnecting,
}

impl ConnectionState {
    /// Check if the adapter can exchange packets
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected)
    }

    /// Check if state is a transitional state
    pub fn is_transitional(&self) -> bool {
        matches!(self, Self::Connecting | Self::Disconnecting)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disconnected => write!(f, "disconnected"),
            Self::Connecting => write!(f, "connecting"),
            Self::Connected => write!(f, "connected"),
            Self::Disconnecting => write!(f, "disconnecting"),
        }
    }
}

/// State transition event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateTransition {
    /// Previous state
    pub from: ConnectionState,
    /// New state
    pub to: ConnectionState,
    /// Timestamp
    pub timestamp: DateTime<Local>,
    /// Reason for transition
    pub reason: Option<String>,
}

/// Rejected transition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvalidTransition {
    /// State the machine was in
    pub from: ConnectionState,
    /// Requested state
    pub to: ConnectionState,
}

/// Connection state machine
#[derive(Debug)]
pub struct ConnectionStateMachine {
    state: ConnectionState,
    history: Vec<StateTransition>,
    max_history: usize,
    last_transition: Option<Instant>,
}

impl Default for ConnectionStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionStateMachine {
    /// Create a new state machine in `Disconnected`
    pub fn new() -> Self {
        Self {
            state: ConnectionState::Disconnected,
            history: Vec::new(),
            max_history: 64,
            last_transition: None,
        }
    }

    /// Get current state
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Get state history, oldest first
    pub fn history(&self) -> &[StateTransition] {
        &self.history
    }

    /// Get time in current state
    pub fn time_in_state(&self) -> Option<Duration> {
        self.last_transition.map(|t| t.elapsed())
    }

    /// Transition to a new state
    pub fn transition(
        &mut self,
        new_state: ConnectionState,
        reason: Option<&str>,
    ) -> Result<StateTransition, InvalidTransition> {
        if !self.is_valid_transition(new_state) {
            return Err(InvalidTransition {
                from: self.state,
                to: new_state,
            });
        }

        let transition = StateTransition {
            from: self.state,
            to: new_state,
            timestamp: Local::now(),
            reason: reason.map(String::from),
        };

        self.history.push(transition.clone());
        if self.history.len() > self.max_history {
            self.history.remove(0);
        }

        self.state = new_state;
        self.last_transition = Some(Instant::now());

        Ok(transition)
    }

    fn is_valid_transition(&self, new_state: ConnectionState) -> bool {
        use ConnectionState::{Connected, Connecting, Disconnected, Disconnecting};

        matches!(
            (self.state, new_state),
            (Disconnected, Connecting)
                | (Connecting, Connected)
                | (Connecting | Connected, Disconnecting)
                | (Disconnecting, Disconnected)
        )
    }
}
