//! Bridge configuration.
//! Defaults suit 48kHz mono WebRTC audio; a JSON file and `VOXBRIDGE_*`
//! environment variables can override any field.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{BridgeError, Result};

pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful voice assistant. Keep responses concise, \
one to three sentences. Speak naturally as in a conversation.";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    pub sample_rate: u32,
    /// Samples per outbound frame (20ms at 48kHz).
    pub frame_samples: usize,
    /// SampleRing capacity in seconds.
    pub ring_secs: f32,
    /// Cap on audio waiting in the SentenceQueue.
    pub max_queued_secs: f32,
    /// Cap on a single recording; later samples are dropped.
    pub max_recording_secs: f32,
    /// Ticks the pacer may fall behind before it realigns its schedule.
    pub max_lag_ticks: u32,
    /// Concurrent blocking engine calls per session.
    pub worker_threads: usize,
    /// Timeout applied to each engine call.
    pub engine_timeout_ms: u64,
    /// Period of advisory interim transcriptions while recording. Off when None.
    pub interim_interval_ms: Option<u64>,
    pub history_turns: usize,
    pub system_prompt: String,
    pub default_voice: String,
    pub synth_cache_capacity: usize,
    pub synth_cache_ttl_secs: u64,
    /// Frames buffered by `ChannelEndpoint` before it drops.
    pub endpoint_queue_frames: usize,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            sample_rate: 48_000,
            frame_samples: 960,
            ring_secs: 5.0,
            max_queued_secs: 180.0,
            max_recording_secs: 120.0,
            max_lag_ticks: 5,
            worker_threads: 2,
            engine_timeout_ms: 60_000,
            interim_interval_ms: None,
            history_turns: 10,
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            default_voice: "en_US-lessac-medium".to_string(),
            synth_cache_capacity: 256,
            synth_cache_ttl_secs: 600,
            endpoint_queue_frames: 50,
        }
    }
}

impl BridgeConfig {
    /// Load from a JSON file; missing fields keep their defaults.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: BridgeConfig = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Defaults overridden from the process environment.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `VOXBRIDGE_*` overrides read through `lookup`.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        fn parse<T: std::str::FromStr>(key: &str, raw: &str) -> Result<T> {
            raw.trim().parse().map_err(|_| BridgeError::Config {
                key: key.to_string(),
                message: format!("cannot parse {raw:?}"),
            })
        }

        if let Some(v) = lookup("VOXBRIDGE_RING_SECS") {
            self.ring_secs = parse("VOXBRIDGE_RING_SECS", &v)?;
        }
        if let Some(v) = lookup("VOXBRIDGE_MAX_QUEUED_SECS") {
            self.max_queued_secs = parse("VOXBRIDGE_MAX_QUEUED_SECS", &v)?;
        }
        if let Some(v) = lookup("VOXBRIDGE_MAX_RECORDING_SECS") {
            self.max_recording_secs = parse("VOXBRIDGE_MAX_RECORDING_SECS", &v)?;
        }
        if let Some(v) = lookup("VOXBRIDGE_WORKER_THREADS") {
            self.worker_threads = parse("VOXBRIDGE_WORKER_THREADS", &v)?;
        }
        if let Some(v) = lookup("VOXBRIDGE_ENGINE_TIMEOUT_MS") {
            self.engine_timeout_ms = parse("VOXBRIDGE_ENGINE_TIMEOUT_MS", &v)?;
        }
        if let Some(v) = lookup("VOXBRIDGE_INTERIM_INTERVAL_MS") {
            let ms: u64 = parse("VOXBRIDGE_INTERIM_INTERVAL_MS", &v)?;
            self.interim_interval_ms = (ms > 0).then_some(ms);
        }
        if let Some(v) = lookup("VOXBRIDGE_HISTORY_TURNS") {
            self.history_turns = parse("VOXBRIDGE_HISTORY_TURNS", &v)?;
        }
        if let Some(v) = lookup("VOXBRIDGE_SYSTEM_PROMPT") {
            if v.trim().is_empty() {
                warn!("VOXBRIDGE_SYSTEM_PROMPT is empty, keeping default");
            } else {
                self.system_prompt = v;
            }
        }
        if let Some(v) = lookup("VOXBRIDGE_VOICE") {
            self.default_voice = v;
        }
        Ok(())
    }

    /// Reject values that would violate buffer invariants.
    pub fn validate(&self) -> Result<()> {
        let invalid = |key: &str, message: &str| {
            Err(BridgeError::Config {
                key: key.to_string(),
                message: message.to_string(),
            })
        };
        if self.sample_rate == 0 {
            return invalid("sample_rate", "must be > 0");
        }
        if self.frame_samples == 0 {
            return invalid("frame_samples", "must be > 0");
        }
        if self.ring_capacity() == 0 {
            return invalid("ring_secs", "must hold at least one sample");
        }
        if !(self.max_queued_secs > 0.0) {
            return invalid("max_queued_secs", "must be > 0");
        }
        if !(self.max_recording_secs > 0.0) {
            return invalid("max_recording_secs", "must be > 0");
        }
        if self.worker_threads == 0 {
            return invalid("worker_threads", "must be > 0");
        }
        if self.history_turns == 0 {
            return invalid("history_turns", "must be > 0");
        }
        if self.endpoint_queue_frames == 0 {
            return invalid("endpoint_queue_frames", "must be > 0");
        }
        Ok(())
    }

    /// Duration of one frame.
    pub fn frame_interval(&self) -> Duration {
        Duration::from_micros(self.frame_samples as u64 * 1_000_000 / self.sample_rate as u64)
    }

    pub fn ring_capacity(&self) -> usize {
        self.secs_to_samples(self.ring_secs)
    }

    pub fn max_queued_samples(&self) -> usize {
        self.secs_to_samples(self.max_queued_secs)
    }

    pub fn max_recording_samples(&self) -> usize {
        self.secs_to_samples(self.max_recording_secs)
    }

    pub fn engine_timeout(&self) -> Duration {
        Duration::from_millis(self.engine_timeout_ms)
    }

    fn secs_to_samples(&self, secs: f32) -> usize {
        (self.sample_rate as f32 * secs.max(0.0)) as usize
    }
}
