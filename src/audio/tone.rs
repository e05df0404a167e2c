//! Diagnostic sine tones played through the SampleRing.
//! A feeder thread keeps a few frames of tone buffered ahead of the pacer.

use std::f64::consts::TAU;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, info};

use super::{Sample, SampleRing};

/// Available diagnostic tones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ToneVoice {
    #[serde(rename = "sine-220")]
    Low,
    #[serde(rename = "sine-440")]
    Mid,
    #[serde(rename = "sine-880")]
    High,
}

impl ToneVoice {
    pub const ALL: [ToneVoice; 3] = [ToneVoice::Low, ToneVoice::Mid, ToneVoice::High];

    pub fn from_id(id: &str) -> Option<Self> {
        match id {
            "sine-220" => Some(ToneVoice::Low),
            "sine-440" => Some(ToneVoice::Mid),
            "sine-880" => Some(ToneVoice::High),
            _ => None,
        }
    }

    pub fn id(self) -> &'static str {
        match self {
            ToneVoice::Low => "sine-220",
            ToneVoice::Mid => "sine-440",
            ToneVoice::High => "sine-880",
        }
    }

    pub fn frequency(self) -> f64 {
        match self {
            ToneVoice::Low => 220.0,
            ToneVoice::Mid => 440.0,
            ToneVoice::High => 880.0,
        }
    }
}

/// Phase-continuous sine generator, so chunk boundaries do not click.
pub struct SineTone {
    phase: f64,
    phase_inc: f64,
    amplitude: f64,
}

impl SineTone {
    pub fn new(voice: ToneVoice, sample_rate: u32) -> Self {
        Self {
            phase: 0.0,
            phase_inc: TAU * voice.frequency() / sample_rate as f64,
            amplitude: 0.3,
        }
    }

    pub fn fill(&mut self, out: &mut [Sample]) {
        for s in out.iter_mut() {
            let value = self.amplitude * self.phase.sin() * i16::MAX as f64;
            *s = value.clamp(i16::MIN as f64, i16::MAX as f64) as Sample;
            self.phase += self.phase_inc;
        }
        self.phase %= TAU;
    }
}

const FEEDER_IDLE: Duration = Duration::from_millis(5);

/// Background writer that keeps the ring topped up with tone.
/// Stops on `stop()` or drop.
pub struct ToneFeeder {
    voice: ToneVoice,
    stop_flag: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl ToneFeeder {
    /// Keep at least `lead_frames` frames of tone buffered in `ring`.
    pub fn start(
        voice: ToneVoice,
        ring: Arc<SampleRing>,
        sample_rate: u32,
        frame_samples: usize,
        lead_frames: usize,
    ) -> std::io::Result<Self> {
        Self::spawn(voice, ring, sample_rate, frame_samples, lead_frames, FEEDER_IDLE)
    }

    fn spawn(
        voice: ToneVoice,
        ring: Arc<SampleRing>,
        sample_rate: u32,
        frame_samples: usize,
        lead_frames: usize,
        idle: Duration,
    ) -> std::io::Result<Self> {
        let stop_flag = Arc::new(AtomicBool::new(false));
        let stop = Arc::clone(&stop_flag);
        let target = (frame_samples * lead_frames).min(ring.capacity());

        let thread = std::thread::Builder::new()
            .name("tone-feeder".into())
            .spawn(move || {
                let mut tone = SineTone::new(voice, sample_rate);
                let mut chunk = vec![0 as Sample; frame_samples];
                while !stop.load(Ordering::Acquire) {
                    if ring.available() + frame_samples <= target {
                        tone.fill(&mut chunk);
                        ring.write(&chunk);
                    } else {
                        // Woken early by `stop`
                        std::thread::park_timeout(idle);
                    }
                }
                debug!(voice = voice.id(), "tone feeder exiting");
            })?;

        info!(voice = voice.id(), "tone_started");
        Ok(Self {
            voice,
            stop_flag,
            thread: Some(thread),
        })
    }

    pub fn voice(&self) -> ToneVoice {
        self.voice
    }

    /// Stop the feeder. Returns once the thread has written its last chunk,
    /// at most one chunk after the call.
    pub fn stop(&mut self) {
        self.stop_flag.store(true, Ordering::Release);
        if let Some(handle) = self.thread.take() {
            handle.thread().unpark();
            let _ = handle.join();
            info!(voice = self.voice.id(), "tone_stopped");
        }
    }
}

impl Drop for ToneFeeder {
    fn drop(&mut self) {
        self.stop();
    }
}
