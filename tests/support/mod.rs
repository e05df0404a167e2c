//! Scripted collaborators and helpers shared by the session scenario tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;

use voxbridge::conversation::ConversationHistory;
use voxbridge::metrics::MetricsRegistry;
use voxbridge::{
    BridgeConfig, EngineError, Frame, MediaEndpoint, Notification, Providers, ReplyGenerator,
    Sample, SessionHandle, SessionState, Signal, Synthesizer, Transcriber, TransportError,
};

pub const WAIT: Duration = Duration::from_secs(5);

/// Endpoint that keeps every frame it is given.
#[derive(Default)]
pub struct RecordingEndpoint {
    frames: Mutex<Vec<Frame>>,
    fail_after: Option<usize>,
}

impl RecordingEndpoint {
    pub fn failing_after(frames: usize) -> Self {
        Self {
            frames: Mutex::new(Vec::new()),
            fail_after: Some(frames),
        }
    }

    pub fn frame_count(&self) -> usize {
        self.frames.lock().len()
    }

    pub fn frames_since(&self, start: usize) -> Vec<Frame> {
        self.frames.lock().iter().skip(start).cloned().collect()
    }

    /// Distinct non-zero sample values in playback order, consecutive repeats collapsed.
    pub fn played_values(&self) -> Vec<Sample> {
        let mut values: Vec<Sample> = Vec::new();
        for frame in self.frames.lock().iter() {
            for &s in frame.samples() {
                if s != 0 && values.last() != Some(&s) {
                    values.push(s);
                }
            }
        }
        values
    }
}

impl MediaEndpoint for RecordingEndpoint {
    fn send(&self, frame: Frame) -> Result<(), TransportError> {
        let mut frames = self.frames.lock();
        if self.fail_after.is_some_and(|n| frames.len() >= n) {
            return Err(TransportError::Closed);
        }
        frames.push(frame);
        Ok(())
    }
}

/// Transcriber that returns a fixed result and keeps the audio it saw.
pub struct ScriptedTranscriber {
    result: Result<String, EngineError>,
    pub calls: Mutex<Vec<Vec<Sample>>>,
}

impl ScriptedTranscriber {
    pub fn saying(text: &str) -> Self {
        Self {
            result: Ok(text.to_string()),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn failing(message: &str) -> Self {
        Self {
            result: Err(EngineError::Transcription(message.to_string())),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }
}

impl Transcriber for ScriptedTranscriber {
    fn transcribe(&self, audio: &[Sample]) -> Result<String, EngineError> {
        self.calls.lock().push(audio.to_vec());
        self.result.clone()
    }
}

/// Synthesizer producing constant-valued audio per sentence.
/// A rule `(needle, delay_ms, value)` applies to sentences containing `needle`.
/// Sentences containing a `failing_on` needle fail instead.
pub struct ScriptedSynth {
    rules: Vec<(&'static str, u64, Sample)>,
    failures: Vec<&'static str>,
    samples_per_sentence: usize,
    pub voices: Mutex<Vec<String>>,
}

impl ScriptedSynth {
    pub fn new(samples_per_sentence: usize) -> Self {
        Self {
            rules: Vec::new(),
            failures: Vec::new(),
            samples_per_sentence,
            voices: Mutex::new(Vec::new()),
        }
    }

    pub fn rule(mut self, needle: &'static str, delay_ms: u64, value: Sample) -> Self {
        self.rules.push((needle, delay_ms, value));
        self
    }

    pub fn failing_on(mut self, needle: &'static str) -> Self {
        self.failures.push(needle);
        self
    }
}

impl Synthesizer for ScriptedSynth {
    fn synthesize(&self, text: &str, voice: &str) -> Result<Vec<Sample>, EngineError> {
        self.voices.lock().push(voice.to_string());
        if self.failures.iter().any(|needle| text.contains(needle)) {
            return Err(EngineError::Synthesis(format!("no audio for {text:?}")));
        }
        let (delay, value) = self
            .rules
            .iter()
            .find(|(needle, _, _)| text.contains(needle))
            .map(|&(_, delay, value)| (delay, value))
            .unwrap_or((0, 5));
        if delay > 0 {
            std::thread::sleep(Duration::from_millis(delay));
        }
        Ok(vec![value; self.samples_per_sentence])
    }

    fn supports_voice(&self, voice: &str) -> bool {
        voice.starts_with("en_")
    }
}

/// Reply generator with a canned answer or failure.
pub struct FixedReply {
    result: Result<String, EngineError>,
    model: Mutex<String>,
    pub calls: AtomicUsize,
    pub last_turns: Mutex<Vec<String>>,
    pub last_model: Mutex<Option<String>>,
}

impl FixedReply {
    pub fn new(text: &str) -> Self {
        Self::with_result(Ok(text.to_string()))
    }

    pub fn failing(message: &str) -> Self {
        Self::with_result(Err(EngineError::Reply(message.to_string())))
    }

    fn with_result(result: Result<String, EngineError>) -> Self {
        Self {
            result,
            model: Mutex::new("default".to_string()),
            calls: AtomicUsize::new(0),
            last_turns: Mutex::new(Vec::new()),
            last_model: Mutex::new(None),
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl ReplyGenerator for FixedReply {
    fn reply(&self, history: &ConversationHistory) -> Result<String, EngineError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last_turns.lock() = history.turns().map(|t| t.content.clone()).collect();
        *self.last_model.lock() = Some(self.model.lock().clone());
        self.result.clone()
    }

    fn set_model(&self, model: &str) {
        *self.model.lock() = if model.is_empty() {
            "default".to_string()
        } else {
            model.to_string()
        };
    }

    fn model(&self) -> Option<String> {
        Some(self.model.lock().clone())
    }
}

pub struct Harness {
    pub handle: SessionHandle,
    pub notifications: mpsc::UnboundedReceiver<Notification>,
    pub endpoint: Arc<RecordingEndpoint>,
    pub metrics: Arc<MetricsRegistry>,
}

pub fn start(config: BridgeConfig, providers: Providers, endpoint: RecordingEndpoint) -> Harness {
    let endpoint = Arc::new(endpoint);
    let metrics = Arc::new(MetricsRegistry::new());
    let (handle, notifications) = SessionHandle::spawn(
        &config,
        Arc::new(providers),
        Arc::clone(&endpoint) as Arc<dyn MediaEndpoint>,
        Arc::clone(&metrics),
    )
    .unwrap();
    Harness {
        handle,
        notifications,
        endpoint,
        metrics,
    }
}

impl Harness {
    pub fn send(&self, signal: Signal) {
        self.handle.signal(signal).unwrap();
    }

    /// Offer, then media ready; returns once the session is Idle.
    pub async fn connect(&mut self) {
        self.send(Signal::Offer { sdp: String::new() });
        self.send(Signal::MediaReady);
        self.wait_state(SessionState::Idle).await;
    }

    pub async fn wait_state(&self, state: SessionState) {
        tokio::time::timeout(WAIT, self.handle.wait_for_state(state))
            .await
            .unwrap_or_else(|_| panic!("timed out waiting for {state}"))
            .unwrap();
    }

    /// Skip notifications until one matches, panicking on timeout.
    pub async fn expect<F>(&mut self, mut pred: F) -> Notification
    where
        F: FnMut(&Notification) -> bool,
    {
        let deadline = tokio::time::Instant::now() + WAIT;
        loop {
            let next = tokio::time::timeout_at(deadline, self.notifications.recv())
                .await
                .expect("timed out waiting for notification")
                .expect("notification channel closed");
            if pred(&next) {
                return next;
            }
        }
    }

    /// Every notification up to and including the first match.
    pub async fn collect_until<F>(&mut self, mut pred: F) -> Vec<Notification>
    where
        F: FnMut(&Notification) -> bool,
    {
        let mut seen = Vec::new();
        let deadline = tokio::time::Instant::now() + WAIT;
        loop {
            let next = tokio::time::timeout_at(deadline, self.notifications.recv())
                .await
                .expect("timed out waiting for notification")
                .expect("notification channel closed");
            let done = pred(&next);
            seen.push(next);
            if done {
                return seen;
            }
        }
    }

    /// Record a one-frame utterance and stop the microphone.
    pub async fn utter(&mut self) {
        self.send(Signal::MicStart);
        self.wait_state(SessionState::Recording).await;
        self.handle.capture_sink().on_frame(&frame_of(3));
        self.send(Signal::MicStop);
    }

    /// Drain whatever notifications are already queued.
    pub fn drain(&mut self) -> Vec<Notification> {
        let mut out = Vec::new();
        while let Ok(n) = self.notifications.try_recv() {
            out.push(n);
        }
        out
    }
}

pub fn frame_of(value: Sample) -> Vec<Sample> {
    vec![value; voxbridge::FRAME_SAMPLES]
}
