//! One session per connected peer: the aggregate that owns the pacer, the
//! outbound buffers, the capture buffer and the state machine, driven by a
//! single tokio task.

mod controller;

use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{info_span, Instrument};
use uuid::Uuid;

use crate::audio::{CaptureBuffer, CaptureSink, SampleRing, SentenceQueue};
use crate::config::BridgeConfig;
use crate::endpoint::MediaEndpoint;
use crate::engine::Providers;
use crate::error::{BridgeError, Result};
use crate::metrics::MetricsRegistry;
use crate::scheduler::WorkerPool;
use crate::signal::{Notification, Signal};
use crate::state_machine::{SessionState, StateMachine};

use controller::{ControllerParts, SessionController};

/// Caller-side handle to a running session.
///
/// Dropping the handle closes the session: the loop treats a dropped signal
/// channel as a disconnect.
pub struct SessionHandle {
    id: Uuid,
    signals: mpsc::UnboundedSender<Signal>,
    state: watch::Receiver<SessionState>,
    capture: CaptureSink,
    task: JoinHandle<()>,
}

impl SessionHandle {
    /// Build every session component and start the session loop on the
    /// current runtime. The session starts in `Connecting`.
    pub fn spawn(
        config: &BridgeConfig,
        providers: Arc<Providers>,
        endpoint: Arc<dyn MediaEndpoint>,
        metrics: Arc<MetricsRegistry>,
    ) -> Result<(Self, mpsc::UnboundedReceiver<Notification>)> {
        config.validate()?;
        let queue = Arc::new(SentenceQueue::new(config.max_queued_samples())?);
        let ring = Arc::new(SampleRing::new(config.ring_capacity())?);
        let capture = Arc::new(CaptureBuffer::new(config.max_recording_samples()));
        let pool = WorkerPool::new(
            config.worker_threads,
            config.engine_timeout(),
            Arc::clone(&metrics),
        )?;

        let state = Arc::new(StateMachine::new());
        let state_rx = state.subscribe();
        let (signal_tx, signal_rx) = mpsc::unbounded_channel();
        let (notify_tx, notify_rx) = mpsc::unbounded_channel();

        let (controller, inputs) = SessionController::new(ControllerParts {
            config: config.clone(),
            state,
            queue,
            ring,
            capture: Arc::clone(&capture),
            endpoint,
            providers,
            pool,
            metrics,
            notify: notify_tx,
            signals: signal_rx,
        });

        let id = Uuid::new_v4();
        let task = tokio::spawn(
            controller
                .run(inputs)
                .instrument(info_span!("session", id = %id)),
        );

        let handle = Self {
            id,
            signals: signal_tx,
            state: state_rx,
            capture: CaptureSink::new(capture),
            task,
        };
        Ok((handle, notify_rx))
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn signal(&self, signal: Signal) -> Result<()> {
        self.signals
            .send(signal)
            .map_err(|_| BridgeError::SessionClosed)
    }

    /// Parse a JSON control message and deliver it.
    pub fn signal_json(&self, raw: &str) -> Result<()> {
        self.signal(Signal::parse(raw)?)
    }

    /// Sink for inbound audio from the media endpoint.
    pub fn capture_sink(&self) -> CaptureSink {
        self.capture.clone()
    }

    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    pub fn state_watch(&self) -> watch::Receiver<SessionState> {
        self.state.clone()
    }

    /// Resolve once the session reaches `target`.
    pub async fn wait_for_state(&self, target: SessionState) -> Result<()> {
        let mut rx = self.state.clone();
        rx.wait_for(|s| *s == target)
            .await
            .map(|_| ())
            .map_err(|_| BridgeError::SessionClosed)
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Disconnect and wait for teardown to finish.
    pub async fn close(self) {
        let _ = self.signals.send(Signal::Disconnect);
        let _ = self.task.await;
    }
}
