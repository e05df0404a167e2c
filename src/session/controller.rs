//! Per-session event loop. Owns every session component and is the only
//! place that reacts to signals, worker completions and pacer events.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::audio::{
    CaptureBuffer, PushOutcome, Sample, SampleRing, Segment, SentenceQueue, ToneFeeder, ToneVoice,
};
use crate::cancellation::EpochClock;
use crate::config::BridgeConfig;
use crate::conversation::{ConversationHistory, Role};
use crate::endpoint::MediaEndpoint;
use crate::engine::{split_sentences, Providers};
use crate::error::EngineError;
use crate::metrics::{metric_names, MetricsRegistry};
use crate::pacer::{FramePacer, OutboundSource, PacerConfig, PacerEvent, PacerStats, SourceSwitch};
use crate::scheduler::WorkerPool;
use crate::signal::{Notification, Signal};
use crate::state_machine::{SessionState, StateMachine};

const TONE_LEAD_FRAMES: usize = 3;

/// Completion posted by the worker pool, tagged with its dispatch epoch.
#[derive(Debug)]
pub(crate) enum WorkerEvent {
    Transcribed {
        epoch: u64,
        partial: bool,
        result: Result<String, EngineError>,
    },
    Replied {
        epoch: u64,
        result: Result<String, EngineError>,
    },
    Synthesized {
        epoch: u64,
        seq: u64,
        result: Result<Vec<Sample>, EngineError>,
    },
}

impl WorkerEvent {
    fn epoch(&self) -> u64 {
        match self {
            WorkerEvent::Transcribed { epoch, .. }
            | WorkerEvent::Replied { epoch, .. }
            | WorkerEvent::Synthesized { epoch, .. } => *epoch,
        }
    }
}

struct PacerTask {
    cancel: CancellationToken,
    handle: JoinHandle<PacerStats>,
}

pub(crate) struct SessionController {
    config: BridgeConfig,
    state: Arc<StateMachine>,
    epochs: EpochClock,
    queue: Arc<SentenceQueue>,
    ring: Arc<SampleRing>,
    source: Arc<SourceSwitch>,
    capture: Arc<CaptureBuffer>,
    endpoint: Arc<dyn MediaEndpoint>,
    providers: Arc<Providers>,
    pool: WorkerPool,
    metrics: Arc<MetricsRegistry>,
    history: ConversationHistory,
    voice: String,
    pacer: Option<PacerTask>,
    tone: Option<ToneFeeder>,
    interim: Option<Interval>,
    interim_pending: bool,
    reply_pending: bool,
    notify: mpsc::UnboundedSender<Notification>,
    worker_tx: mpsc::UnboundedSender<WorkerEvent>,
    pacer_tx: mpsc::UnboundedSender<PacerEvent>,
}

/// Receivers the run loop selects over, kept outside the controller so
/// handlers can borrow it mutably.
pub(crate) struct ControllerInputs {
    signals: mpsc::UnboundedReceiver<Signal>,
    worker_rx: mpsc::UnboundedReceiver<WorkerEvent>,
    pacer_rx: mpsc::UnboundedReceiver<PacerEvent>,
}

pub(crate) struct ControllerParts {
    pub config: BridgeConfig,
    pub state: Arc<StateMachine>,
    pub queue: Arc<SentenceQueue>,
    pub ring: Arc<SampleRing>,
    pub capture: Arc<CaptureBuffer>,
    pub endpoint: Arc<dyn MediaEndpoint>,
    pub providers: Arc<Providers>,
    pub pool: WorkerPool,
    pub metrics: Arc<MetricsRegistry>,
    pub notify: mpsc::UnboundedSender<Notification>,
    pub signals: mpsc::UnboundedReceiver<Signal>,
}

impl SessionController {
    pub(crate) fn new(parts: ControllerParts) -> (Self, ControllerInputs) {
        let (worker_tx, worker_rx) = mpsc::unbounded_channel();
        let (pacer_tx, pacer_rx) = mpsc::unbounded_channel();
        let history = ConversationHistory::new(
            parts.config.system_prompt.clone(),
            parts.config.history_turns,
        );
        let voice = parts.config.default_voice.clone();

        let controller = Self {
            config: parts.config,
            state: parts.state,
            epochs: EpochClock::new(),
            queue: parts.queue,
            ring: parts.ring,
            source: Arc::new(SourceSwitch::new(OutboundSource::Queue)),
            capture: parts.capture,
            endpoint: parts.endpoint,
            providers: parts.providers,
            pool: parts.pool,
            metrics: parts.metrics,
            history,
            voice,
            pacer: None,
            tone: None,
            interim: None,
            interim_pending: false,
            reply_pending: false,
            notify: parts.notify,
            worker_tx,
            pacer_tx,
        };
        let inputs = ControllerInputs {
            signals: parts.signals,
            worker_rx,
            pacer_rx,
        };
        (controller, inputs)
    }

    pub(crate) async fn run(mut self, mut inputs: ControllerInputs) {
        info!(state = %self.state.current(), "session_started");
        self.publish_state();

        while !self.state.current().is_terminal() {
            tokio::select! {
                signal = inputs.signals.recv() => match signal {
                    Some(signal) => self.on_signal(signal),
                    None => self.close("signal channel dropped"),
                },
                Some(event) = inputs.worker_rx.recv() => self.on_worker_event(event),
                Some(event) = inputs.pacer_rx.recv() => self.on_pacer_event(event),
                _ = next_interim(&mut self.interim) => self.on_interim_tick(),
            }
        }

        if let Some(pacer) = self.pacer.take() {
            pacer.cancel.cancel();
            match pacer.handle.await {
                Ok(stats) => info!(
                    frames = stats.frames_sent,
                    resets = stats.schedule_resets,
                    "session_pacer_joined"
                ),
                Err(e) => warn!(error = %e, "pacer task failed"),
            }
        }
        info!("session_finished");
    }

    fn send(&self, notification: Notification) {
        // Receiver gone means nobody is listening; the session still runs to completion
        let _ = self.notify.send(notification);
    }

    fn publish_state(&self) {
        self.send(Notification::State {
            state: self.state.current(),
        });
    }

    fn transition(&self, next: SessionState) -> bool {
        match self.state.transition(next) {
            Ok(_) => {
                self.publish_state();
                true
            }
            Err(e) => {
                self.send(Notification::error(e.to_string()));
                false
            }
        }
    }

    fn require_media(&self, signal: &'static str) -> bool {
        let state = self.state.current();
        if state.media_ready() {
            return true;
        }
        warn!(signal, state = %state, "signal before media ready");
        self.send(Notification::error(format!("{signal} not allowed while {state}")));
        false
    }

    // ---- signals ----

    fn on_signal(&mut self, signal: Signal) {
        debug!(signal = signal.kind(), state = %self.state.current(), "signal_received");
        match signal {
            Signal::Offer { .. } => {
                self.transition(SessionState::Negotiating);
            }
            Signal::MediaReady => {
                if self.transition(SessionState::Idle) {
                    self.start_pacer();
                }
            }
            Signal::NegotiationFailed { reason } => {
                self.send(Notification::error(format!("negotiation failed: {reason}")));
                self.close("negotiation failed");
            }
            Signal::MicStart => {
                if self.require_media("mic_start") {
                    self.start_recording();
                }
            }
            Signal::MicStop => self.stop_recording(),
            Signal::StopSpeaking => {
                if matches!(
                    self.state.current(),
                    SessionState::Speaking | SessionState::Thinking
                ) {
                    self.interrupt();
                } else {
                    debug!(state = %self.state.current(), "nothing to interrupt");
                }
            }
            Signal::Speak { text } => self.speak(text),
            Signal::ToneStart { voice_id } => self.start_tone(&voice_id),
            Signal::ToneStop => self.stop_tone(),
            Signal::SetVoice { voice_id } => {
                if self.providers.synthesizer().supports_voice(&voice_id) {
                    info!(voice = %voice_id, "voice_set");
                    self.voice = voice_id.clone();
                    self.send(Notification::VoiceSet { voice_id });
                } else {
                    self.send(Notification::error(
                        EngineError::UnknownVoice(voice_id).to_string(),
                    ));
                }
            }
            Signal::SetProvider { provider } => match self.providers.select_reply(&provider) {
                Ok(()) => {
                    self.history.clear();
                    self.send(Notification::ProviderSet { provider });
                }
                Err(e) => self.send(Notification::error(e.to_string())),
            },
            Signal::SetModel { provider, model } => {
                match self.providers.select_model(&provider, &model) {
                    Ok(model) => {
                        self.history.clear();
                        self.send(Notification::ModelSet { provider, model });
                    }
                    Err(e) => self.send(Notification::error(e.to_string())),
                }
            }
            Signal::Ping => self.send(Notification::Pong),
            Signal::Disconnect => self.close("peer disconnected"),
        }
    }

    fn start_pacer(&mut self) {
        let cancel = CancellationToken::new();
        let pacer = FramePacer::new(
            Arc::clone(&self.queue),
            Arc::clone(&self.ring),
            Arc::clone(&self.source),
            Arc::clone(&self.endpoint),
            Arc::clone(&self.metrics),
            self.pacer_tx.clone(),
            PacerConfig {
                frame_samples: self.config.frame_samples,
                interval: self.config.frame_interval(),
                max_lag_ticks: self.config.max_lag_ticks,
            },
        );
        let handle = pacer.spawn(cancel.clone());
        self.pacer = Some(PacerTask { cancel, handle });
    }

    /// Drop queued and in-flight reply audio and return to Idle.
    fn interrupt(&mut self) {
        let epoch = self.epochs.advance();
        self.queue.flush();
        self.reply_pending = false;
        info!(epoch, from = %self.state.current(), "interrupted");
        if matches!(
            self.state.current(),
            SessionState::Speaking | SessionState::Thinking
        ) {
            self.transition(SessionState::Idle);
        }
    }

    fn start_recording(&mut self) {
        match self.state.current() {
            SessionState::Recording => {
                debug!("already recording");
                return;
            }
            SessionState::Speaking | SessionState::Thinking => self.interrupt(),
            _ => {
                // A new recording supersedes any transcription still in flight
                self.epochs.advance();
            }
        }
        self.capture.begin();
        if !self.transition(SessionState::Recording) {
            self.capture.discard();
            return;
        }
        self.interim = self.config.interim_interval_ms.map(|ms| {
            let period = Duration::from_millis(ms);
            let mut interval = tokio::time::interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            interval
        });
        self.interim_pending = false;
    }

    fn stop_recording(&mut self) {
        if self.state.current() != SessionState::Recording {
            warn!(state = %self.state.current(), "mic_stop without recording");
            return;
        }
        self.interim = None;
        let audio = self.capture.finish();
        info!(samples = audio.len(), "recording_finished");
        self.transition(SessionState::Idle);
        self.dispatch_transcription(audio, false);
    }

    fn on_interim_tick(&mut self) {
        if self.interim_pending || self.state.current() != SessionState::Recording {
            return;
        }
        let snapshot = self.capture.snapshot();
        if snapshot.is_empty() {
            return;
        }
        self.interim_pending = true;
        self.dispatch_transcription(snapshot, true);
    }

    fn dispatch_transcription(&self, audio: Vec<Sample>, partial: bool) {
        let transcriber = self.providers.transcriber();
        self.pool.dispatch(
            "transcription",
            metric_names::TRANSCRIBE_US,
            self.epochs.guard(),
            move || transcriber.transcribe(&audio),
            self.worker_tx.clone(),
            move |epoch, result| WorkerEvent::Transcribed {
                epoch,
                partial,
                result,
            },
        );
    }

    fn speak(&mut self, text: String) {
        if text.trim().is_empty() {
            self.send(Notification::error("empty text"));
            return;
        }
        if !self.require_media("speak") {
            return;
        }
        match self.state.current() {
            SessionState::Idle => {
                if !self.transition(SessionState::Thinking) {
                    return;
                }
            }
            SessionState::Thinking | SessionState::Speaking => {}
            other => {
                self.send(Notification::error(format!("speak not allowed while {other}")));
                return;
            }
        }
        self.enqueue_speech(&text);
    }

    /// Reserve a queue slot per sentence and synthesize each on the worker pool.
    fn enqueue_speech(&mut self, text: &str) {
        self.stop_tone();
        let sentences = split_sentences(text);
        if sentences.is_empty() {
            self.finish_if_drained();
            return;
        }
        debug!(sentences = sentences.len(), "dispatching synthesis");
        let synthesizer = self.providers.synthesizer();
        let jobs = sentences
            .into_iter()
            .map(|sentence| {
                let seq = self.queue.reserve();
                let synthesizer = Arc::clone(&synthesizer);
                let voice = self.voice.clone();
                (
                    move || synthesizer.synthesize(&sentence, &voice),
                    move |epoch: u64, result: Result<Vec<Sample>, EngineError>| {
                        WorkerEvent::Synthesized { epoch, seq, result }
                    },
                )
            })
            .collect();
        // Workers are claimed in sentence order so the first sentence is never starved
        self.pool.dispatch_ordered(
            "synthesis",
            metric_names::SYNTHESIZE_US,
            self.epochs.guard(),
            jobs,
            self.worker_tx.clone(),
        );
    }

    fn start_tone(&mut self, voice_id: &str) {
        let Some(voice) = ToneVoice::from_id(voice_id) else {
            self.send(Notification::error(
                EngineError::UnknownVoice(voice_id.to_string()).to_string(),
            ));
            return;
        };
        if !self.require_media("tone_start") {
            return;
        }
        if matches!(
            self.state.current(),
            SessionState::Speaking | SessionState::Thinking
        ) {
            self.interrupt();
        }
        self.stop_tone();

        match ToneFeeder::start(
            voice,
            Arc::clone(&self.ring),
            self.config.sample_rate,
            self.config.frame_samples,
            TONE_LEAD_FRAMES,
        ) {
            Ok(feeder) => {
                self.tone = Some(feeder);
                self.source.set(OutboundSource::Ring);
            }
            Err(e) => {
                error!(error = %e, "tone feeder failed to start");
                self.send(Notification::error(format!("tone failed: {e}")));
            }
        }
    }

    fn stop_tone(&mut self) {
        if let Some(mut feeder) = self.tone.take() {
            feeder.stop();
        }
        self.source.set(OutboundSource::Queue);
        self.ring.clear();
    }

    // ---- worker completions ----

    fn on_worker_event(&mut self, event: WorkerEvent) {
        if !self.epochs.is_current(event.epoch()) {
            if let WorkerEvent::Transcribed { partial: true, .. } = event {
                self.interim_pending = false;
            }
            self.metrics.increment(metric_names::STALE_COMPLETIONS, 1);
            debug!(
                epoch = event.epoch(),
                current = self.epochs.current(),
                "stale completion dropped"
            );
            return;
        }

        match event {
            WorkerEvent::Transcribed {
                partial: true,
                result,
                ..
            } => {
                self.interim_pending = false;
                match result {
                    Ok(text)
                        if !text.trim().is_empty()
                            && self.state.current() == SessionState::Recording =>
                    {
                        self.send(Notification::Transcription {
                            text,
                            partial: true,
                        });
                    }
                    Ok(_) => {}
                    Err(e) => debug!(error = %e, "interim transcription failed"),
                }
            }
            WorkerEvent::Transcribed {
                partial: false,
                result,
                ..
            } => self.on_transcript(result),
            WorkerEvent::Replied { result, .. } => self.on_reply(result),
            WorkerEvent::Synthesized { seq, result, .. } => self.on_synthesized(seq, result),
        }
    }

    fn on_transcript(&mut self, result: Result<String, EngineError>) {
        let text = match result {
            Ok(text) => text.trim().to_string(),
            Err(e) => {
                warn!(error = %e, "transcription failed");
                self.send(Notification::error(e.to_string()));
                return;
            }
        };
        info!(chars = text.len(), "transcribed");
        self.send(Notification::Transcription {
            text: text.clone(),
            partial: false,
        });
        if text.is_empty() {
            return;
        }

        let Some(generator) = self.providers.reply() else {
            debug!("no reply generator configured, transcript only");
            return;
        };
        if self.state.current() != SessionState::Idle {
            warn!(state = %self.state.current(), "transcript arrived while busy, not replying");
            return;
        }
        if !self.transition(SessionState::Thinking) {
            return;
        }
        self.send(Notification::AgentThinking);
        self.history.push(Role::User, text);
        self.reply_pending = true;

        let history = self.history.clone();
        self.pool.dispatch(
            "reply generation",
            metric_names::REPLY_US,
            self.epochs.guard(),
            move || generator.reply(&history),
            self.worker_tx.clone(),
            |epoch, result| WorkerEvent::Replied { epoch, result },
        );
    }

    fn on_reply(&mut self, result: Result<String, EngineError>) {
        self.reply_pending = false;
        match result {
            Ok(text) => {
                let text = text.trim().to_string();
                if text.is_empty() {
                    debug!("empty reply");
                    self.finish_if_drained();
                    return;
                }
                self.history.push(Role::Assistant, text.clone());
                self.send(Notification::AgentReply { text: text.clone() });
                self.enqueue_speech(&text);
            }
            Err(e) => {
                warn!(error = %e, "reply generation failed");
                self.send(Notification::error(e.to_string()));
                self.finish_if_drained();
            }
        }
    }

    fn on_synthesized(&mut self, seq: u64, result: Result<Vec<Sample>, EngineError>) {
        match result {
            Ok(samples) => match self.queue.push(Segment::new(seq, samples)) {
                PushOutcome::Queued { dropped } => {
                    if dropped > 0 {
                        self.metrics
                            .increment(metric_names::QUEUE_OVERFLOW_SEGMENTS, dropped as u64);
                    }
                    if self.state.current() == SessionState::Thinking
                        && self.transition(SessionState::Speaking)
                    {
                        self.send(Notification::Speaking);
                    }
                }
                PushOutcome::Evicted { dropped } => {
                    warn!(seq, "segment exceeds queue capacity, not played");
                    self.metrics
                        .increment(metric_names::QUEUE_OVERFLOW_SEGMENTS, dropped as u64);
                    self.finish_if_drained();
                }
                PushOutcome::Empty => self.finish_if_drained(),
                PushOutcome::Stale => debug!(seq, "segment arrived after flush"),
            },
            Err(e) => {
                warn!(seq, error = %e, "synthesis failed");
                self.queue.abandon(seq);
                self.send(Notification::error(e.to_string()));
                self.finish_if_drained();
            }
        }
    }

    // ---- pacer ----

    fn on_pacer_event(&mut self, event: PacerEvent) {
        match event {
            PacerEvent::Drained => self.finish_if_drained(),
            PacerEvent::TransportFailed(e) => {
                error!(error = %e, "transport failed");
                self.send(Notification::error(e.to_string()));
                self.close("transport failed");
            }
        }
    }

    /// Return to Idle once no reply is pending and all reserved audio has played.
    fn finish_if_drained(&mut self) {
        let state = self.state.current();
        if !matches!(state, SessionState::Thinking | SessionState::Speaking) {
            return;
        }
        if self.reply_pending || !self.queue.is_idle() {
            return;
        }
        self.transition(SessionState::Idle);
    }

    // ---- teardown ----

    fn close(&mut self, reason: &'static str) {
        if self.state.current().is_terminal() {
            return;
        }
        info!(reason, "session_closing");
        self.epochs.advance();
        if let Some(pacer) = &self.pacer {
            pacer.cancel.cancel();
        }
        self.stop_tone();
        self.queue.flush();
        self.capture.discard();
        self.interim = None;
        self.reply_pending = false;
        if self.state.force_close() {
            self.publish_state();
        }
        self.send(Notification::Closed);
    }
}

async fn next_interim(interim: &mut Option<Interval>) {
    match interim {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}
