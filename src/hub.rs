//! Registry of live sessions keyed by peer id. At most one session per peer:
//! opening a second session for the same peer closes the first.

use std::collections::HashMap;
use std::sync::Arc;

use crossbeam_channel as cb;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, info};
use uuid::Uuid;

use crate::audio::{CaptureSink, Frame};
use crate::config::BridgeConfig;
use crate::endpoint::{ChannelEndpoint, MediaEndpoint};
use crate::engine::Providers;
use crate::error::{BridgeError, Result};
use crate::metrics::MetricsRegistry;
use crate::session::SessionHandle;
use crate::signal::{Notification, Signal};
use crate::state_machine::SessionState;

pub type ProviderFactory = Arc<dyn Fn() -> Arc<Providers> + Send + Sync>;

/// What a caller gets back when a session opens.
pub struct OpenedSession {
    pub id: Uuid,
    pub notifications: mpsc::UnboundedReceiver<Notification>,
}

pub struct SessionHub {
    config: BridgeConfig,
    metrics: Arc<MetricsRegistry>,
    providers: ProviderFactory,
    sessions: Mutex<HashMap<String, SessionHandle>>,
}

impl SessionHub {
    /// `providers` is called once per session so no collaborator state is shared.
    pub fn new(config: BridgeConfig, metrics: Arc<MetricsRegistry>, providers: ProviderFactory) -> Self {
        Self {
            config,
            metrics,
            providers,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Start a session for `peer` on `endpoint`, replacing any existing one.
    /// Sessions that already ended on their own are forgotten first.
    pub fn open(&self, peer: &str, endpoint: Arc<dyn MediaEndpoint>) -> Result<OpenedSession> {
        let pruned = self.prune();
        if pruned > 0 {
            debug!(pruned, "ended sessions pruned");
        }
        let (handle, notifications) = SessionHandle::spawn(
            &self.config,
            (self.providers)(),
            endpoint,
            Arc::clone(&self.metrics),
        )?;
        let id = handle.id();

        let previous = self.sessions.lock().insert(peer.to_string(), handle);
        if let Some(old) = previous {
            info!(peer, old = %old.id(), new = %id, "session_replaced");
            let _ = old.signal(Signal::Disconnect);
        } else {
            info!(peer, session = %id, "session_opened");
        }
        Ok(OpenedSession { id, notifications })
    }

    /// Open a session whose outbound frames are delivered on a bounded channel.
    pub fn open_channel(&self, peer: &str) -> Result<(OpenedSession, cb::Receiver<Frame>)> {
        let (endpoint, frames) =
            ChannelEndpoint::new(self.config.endpoint_queue_frames, Arc::clone(&self.metrics));
        let opened = self.open(peer, Arc::new(endpoint))?;
        Ok((opened, frames))
    }

    pub fn signal(&self, peer: &str, signal: Signal) -> Result<()> {
        self.sessions
            .lock()
            .get(peer)
            .ok_or(BridgeError::SessionClosed)?
            .signal(signal)
    }

    pub fn signal_json(&self, peer: &str, raw: &str) -> Result<()> {
        self.signal(peer, Signal::parse(raw)?)
    }

    pub fn capture_sink(&self, peer: &str) -> Option<CaptureSink> {
        self.sessions.lock().get(peer).map(SessionHandle::capture_sink)
    }

    pub fn state(&self, peer: &str) -> Option<SessionState> {
        self.sessions.lock().get(peer).map(SessionHandle::state)
    }

    /// Disconnect `peer` and wait for its teardown. Returns false if no session existed.
    pub async fn close(&self, peer: &str) -> bool {
        let handle = self.sessions.lock().remove(peer);
        match handle {
            Some(handle) => {
                handle.close().await;
                info!(peer, "session_closed");
                true
            }
            None => false,
        }
    }

    /// Forget sessions whose loop has ended. Returns how many were removed.
    pub fn prune(&self) -> usize {
        let mut sessions = self.sessions.lock();
        let before = sessions.len();
        sessions.retain(|_, handle| !handle.is_finished());
        before - sessions.len()
    }

    pub fn peers(&self) -> Vec<String> {
        let mut peers: Vec<String> = self.sessions.lock().keys().cloned().collect();
        peers.sort();
        peers
    }

    pub fn len(&self) -> usize {
        self.sessions.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn metrics(&self) -> &Arc<MetricsRegistry> {
        &self.metrics
    }
}
