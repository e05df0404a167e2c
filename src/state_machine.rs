//! Session state machine: Connecting → Negotiating → Idle ⇄ Recording,
//! Idle ⇄ Thinking → Speaking → Idle, any → Closed.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{info, warn};

use crate::error::{BridgeError, Result};

/// All possible states of a peer session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Connecting,
    Negotiating,
    Idle,
    Recording,
    Thinking,
    Speaking,
    Closed,
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionState::Connecting => write!(f, "Connecting"),
            SessionState::Negotiating => write!(f, "Negotiating"),
            SessionState::Idle => write!(f, "Idle"),
            SessionState::Recording => write!(f, "Recording"),
            SessionState::Thinking => write!(f, "Thinking"),
            SessionState::Speaking => write!(f, "Speaking"),
            SessionState::Closed => write!(f, "Closed"),
        }
    }
}

impl SessionState {
    /// Returns whether transitioning from `self` to `next` is valid.
    pub fn can_transition_to(self, next: SessionState) -> bool {
        if self == SessionState::Closed {
            return false;
        }
        matches!(
            (self, next),
            (SessionState::Connecting, SessionState::Negotiating)
                | (SessionState::Negotiating, SessionState::Idle)
                | (SessionState::Idle, SessionState::Recording)
                | (SessionState::Recording, SessionState::Idle)
                | (SessionState::Idle, SessionState::Thinking)
                | (SessionState::Thinking, SessionState::Speaking)
                | (SessionState::Thinking, SessionState::Idle) // failure, empty reply, interrupt
                | (SessionState::Speaking, SessionState::Idle) // drained or interrupt
                | (_, SessionState::Closed)
        )
    }

    /// Whether the media path is up and frames are flowing.
    pub fn media_ready(self) -> bool {
        matches!(
            self,
            SessionState::Idle
                | SessionState::Recording
                | SessionState::Thinking
                | SessionState::Speaking
        )
    }

    pub fn is_terminal(self) -> bool {
        self == SessionState::Closed
    }
}

/// State holder with a watch channel for observers.
pub struct StateMachine {
    state: RwLock<SessionState>,
    state_tx: watch::Sender<SessionState>,
}

impl StateMachine {
    pub fn new() -> Self {
        let (state_tx, _) = watch::channel(SessionState::Connecting);
        Self {
            state: RwLock::new(SessionState::Connecting),
            state_tx,
        }
    }

    /// Current state (non-blocking read).
    pub fn current(&self) -> SessionState {
        *self.state.read()
    }

    /// Attempt a state transition.
    pub fn transition(&self, next: SessionState) -> Result<SessionState> {
        let mut state = self.state.write();
        let current = *state;
        if !current.can_transition_to(next) {
            warn!(from = %current, to = %next, "invalid_transition");
            return Err(BridgeError::InvalidTransition {
                from: current,
                to: next,
            });
        }
        *state = next;
        self.state_tx.send_replace(next);
        info!(from = %current, to = %next, "state_transition");
        Ok(next)
    }

    /// Move to Closed from any state. Returns false if already closed.
    pub fn force_close(&self) -> bool {
        let mut state = self.state.write();
        let prev = *state;
        if prev == SessionState::Closed {
            return false;
        }
        *state = SessionState::Closed;
        self.state_tx.send_replace(SessionState::Closed);
        info!(from = %prev, "force_close");
        true
    }

    /// Subscribe to state changes.
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state_tx.subscribe()
    }
}

impl Default for StateMachine {
    fn default() -> Self {
        Self::new()
    }
}
