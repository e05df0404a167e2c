//! Generation epochs: CancellationToken + epoch guard.
//! Ensures stale worker completions cannot write audio or state after an interrupt.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use tokio_util::sync::CancellationToken;

/// Per-session epoch counter. Each interrupt advances the epoch, cancels all
/// work issued under the previous one, and issues a fresh CancellationToken.
pub struct EpochClock {
    current_token: RwLock<CancellationToken>,
    epoch: Arc<AtomicU64>,
}

impl EpochClock {
    pub fn new() -> Self {
        Self {
            current_token: RwLock::new(CancellationToken::new()),
            epoch: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Cancel all current work and advance the epoch. Returns the new epoch.
    pub fn advance(&self) -> u64 {
        let mut token_guard = self.current_token.write();
        token_guard.cancel();
        *token_guard = CancellationToken::new();
        self.epoch.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Read current epoch.
    pub fn current(&self) -> u64 {
        self.epoch.load(Ordering::SeqCst)
    }

    /// Whether `epoch` is still the live one.
    #[inline]
    pub fn is_current(&self, epoch: u64) -> bool {
        self.current() == epoch
    }

    /// Guard for work dispatched under the current epoch.
    pub fn guard(&self) -> EpochGuard {
        let token_guard = self.current_token.read();
        EpochGuard {
            epoch: Arc::clone(&self.epoch),
            my_epoch: self.epoch.load(Ordering::SeqCst),
            token: token_guard.child_token(),
        }
    }
}

impl Default for EpochClock {
    fn default() -> Self {
        Self::new()
    }
}

/// Guard that a worker checks between units of work.
/// Once the session epoch has moved past `my_epoch`, the work is stale.
#[derive(Clone)]
pub struct EpochGuard {
    epoch: Arc<AtomicU64>,
    my_epoch: u64,
    token: CancellationToken,
}

impl EpochGuard {
    /// Returns true if this work still belongs to the current epoch.
    #[inline]
    pub fn is_current(&self) -> bool {
        self.epoch.load(Ordering::SeqCst) == self.my_epoch
    }

    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Returns true if the worker should keep going.
    #[inline]
    pub fn should_continue(&self) -> bool {
        !self.is_cancelled() && self.is_current()
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn epoch(&self) -> u64 {
        self.my_epoch
    }
}
