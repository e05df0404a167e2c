//! Frame pacer: once per frame interval, pull one frame of samples from the
//! active outbound source and hand it to the media endpoint.
//!
//! Deadlines are computed from the start time (`start + k * interval`), so a
//! slow tick does not push later ticks back. If the pacer falls more than
//! `max_lag_ticks` behind it realigns instead of bursting the backlog.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::audio::{Frame, FrameSource, Sample, SampleRing, SentenceQueue};
use crate::endpoint::MediaEndpoint;
use crate::error::TransportError;
use crate::metrics::{metric_names, MetricsRegistry};

/// Which buffer feeds outbound frames. Exactly one is live at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutboundSource {
    /// Sentence queue: interruptible generated speech.
    Queue,
    /// Sample ring: diagnostic tone.
    Ring,
}

/// Atomically switchable outbound source, read once per tick.
pub struct SourceSwitch(AtomicU8);

impl SourceSwitch {
    pub fn new(source: OutboundSource) -> Self {
        Self(AtomicU8::new(source as u8))
    }

    pub fn set(&self, source: OutboundSource) {
        self.0.store(source as u8, Ordering::SeqCst);
    }

    pub fn get(&self) -> OutboundSource {
        if self.0.load(Ordering::SeqCst) == OutboundSource::Ring as u8 {
            OutboundSource::Ring
        } else {
            OutboundSource::Queue
        }
    }
}

/// Events the pacer reports back to the session loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PacerEvent {
    /// The active source ran dry after delivering audio.
    Drained,
    /// The endpoint refused a frame; the session cannot continue.
    TransportFailed(TransportError),
}

/// Wall-clock tick schedule. Tick `k` (1-based) is due at `base + (k - base_index) * interval`.
#[derive(Debug, Clone)]
pub struct TickSchedule {
    base: Instant,
    base_index: u64,
    interval: Duration,
    index: u64,
}

impl TickSchedule {
    pub fn new(start: Instant, interval: Duration) -> Self {
        Self {
            base: start,
            base_index: 0,
            interval,
            index: 0,
        }
    }

    /// Ticks emitted so far.
    pub fn ticks(&self) -> u64 {
        self.index
    }

    pub fn deadline(&self, tick: u64) -> Instant {
        let steps = tick.saturating_sub(self.base_index);
        self.base + self.interval * steps as u32
    }

    pub fn next_deadline(&self) -> Instant {
        self.deadline(self.index + 1)
    }

    /// Mark the next tick as emitted and return its index.
    pub fn advance(&mut self) -> u64 {
        self.index += 1;
        self.index
    }

    /// Re-anchor so the next tick is due at `now`.
    pub fn realign(&mut self, now: Instant) {
        self.base = now;
        self.base_index = self.index + 1;
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PacerStats {
    pub frames_sent: u64,
    pub schedule_resets: u64,
}

pub struct PacerConfig {
    pub frame_samples: usize,
    pub interval: Duration,
    pub max_lag_ticks: u32,
}

/// Paced outbound audio source for one session.
pub struct FramePacer {
    queue: Arc<SentenceQueue>,
    ring: Arc<SampleRing>,
    source: Arc<SourceSwitch>,
    endpoint: Arc<dyn MediaEndpoint>,
    metrics: Arc<MetricsRegistry>,
    events: mpsc::UnboundedSender<PacerEvent>,
    config: PacerConfig,
    had_audio: bool,
}

impl FramePacer {
    pub fn new(
        queue: Arc<SentenceQueue>,
        ring: Arc<SampleRing>,
        source: Arc<SourceSwitch>,
        endpoint: Arc<dyn MediaEndpoint>,
        metrics: Arc<MetricsRegistry>,
        events: mpsc::UnboundedSender<PacerEvent>,
        config: PacerConfig,
    ) -> Self {
        Self {
            queue,
            ring,
            source,
            endpoint,
            metrics,
            events,
            config,
            had_audio: false,
        }
    }

    /// Run on the current runtime until `cancel` fires or the transport fails.
    pub fn spawn(self, cancel: CancellationToken) -> JoinHandle<PacerStats> {
        tokio::spawn(self.run(cancel))
    }

    pub async fn run(mut self, cancel: CancellationToken) -> PacerStats {
        let mut schedule = TickSchedule::new(Instant::now(), self.config.interval);
        let max_lag = self.config.interval * self.config.max_lag_ticks;
        let mut scratch: Vec<Sample> = vec![0; self.config.frame_samples];
        let mut stats = PacerStats::default();

        info!(
            frame_samples = self.config.frame_samples,
            interval_us = self.config.interval.as_micros() as u64,
            "pacer_started"
        );

        loop {
            let deadline = schedule.next_deadline();
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = sleep_until(deadline) => {}
            }

            let now = Instant::now();
            let lag = now.saturating_duration_since(deadline);
            self.metrics
                .record(metric_names::TICK_LAG_US, lag.as_micros() as f64);
            if lag > max_lag {
                warn!(lag_ms = lag.as_millis() as u64, "pacer_behind_schedule, realigning");
                schedule.realign(now);
                stats.schedule_resets += 1;
                self.metrics.increment(metric_names::SCHEDULE_RESETS, 1);
            }

            let tick = schedule.advance();
            let pts = (tick - 1) * self.config.frame_samples as u64;
            if let Err(e) = self.tick(&mut scratch, pts) {
                error!(error = %e, tick, "pacer_send_failed");
                let _ = self.events.send(PacerEvent::TransportFailed(e));
                break;
            }
            stats.frames_sent += 1;
        }

        info!(frames = stats.frames_sent, resets = stats.schedule_resets, "pacer_stopped");
        stats
    }

    /// Produce and send exactly one frame.
    fn tick(&mut self, scratch: &mut [Sample], pts: u64) -> Result<(), TransportError> {
        let got = match self.source.get() {
            OutboundSource::Queue => self.queue.fill(scratch),
            OutboundSource::Ring => self.ring.fill(scratch),
        };
        scratch[got..].fill(0);

        if got < scratch.len() && (got > 0 || self.had_audio) {
            self.metrics.increment(metric_names::UNDERRUN_FRAMES, 1);
        }
        if self.had_audio && got == 0 {
            debug!(pts, "outbound source drained");
            let _ = self.events.send(PacerEvent::Drained);
        }
        self.had_audio = got > 0;

        self.endpoint.send(Frame::padded(scratch, scratch.len(), pts))?;
        self.metrics.increment(metric_names::FRAMES_SENT, 1);
        Ok(())
    }
}
