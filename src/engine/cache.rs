//! In-memory LRU cache of synthesized sentences with TTL.
//! Key: blake3 hash of (voice | text). Short replies ("Sure.", "Okay.")
//! repeat often enough that re-synthesis is wasted worker time.

use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::{Duration, Instant};

use lru::LruCache;
use parking_lot::Mutex;
use tracing::debug;

use super::Synthesizer;
use crate::audio::Sample;
use crate::config::BridgeConfig;
use crate::error::{BridgeError, EngineError, Result};
use crate::metrics::{metric_names, MetricsRegistry};

struct CacheEntry {
    samples: Arc<[Sample]>,
    inserted_at: Instant,
}

pub struct CachedSynthesizer {
    inner: Arc<dyn Synthesizer>,
    cache: Mutex<LruCache<[u8; 32], CacheEntry>>,
    ttl: Duration,
    metrics: Arc<MetricsRegistry>,
}

impl CachedSynthesizer {
    pub fn new(
        inner: Arc<dyn Synthesizer>,
        capacity: usize,
        ttl: Duration,
        metrics: Arc<MetricsRegistry>,
    ) -> Result<Self> {
        let capacity = NonZeroUsize::new(capacity).ok_or(BridgeError::InvalidCapacity {
            component: "CachedSynthesizer",
        })?;
        Ok(Self {
            inner,
            cache: Mutex::new(LruCache::new(capacity)),
            ttl,
            metrics,
        })
    }

    /// Sized from `synth_cache_capacity` and `synth_cache_ttl_secs`.
    pub fn from_config(
        inner: Arc<dyn Synthesizer>,
        config: &BridgeConfig,
        metrics: Arc<MetricsRegistry>,
    ) -> Result<Self> {
        Self::new(
            inner,
            config.synth_cache_capacity,
            Duration::from_secs(config.synth_cache_ttl_secs),
            metrics,
        )
    }

    pub fn compute_key(voice: &str, text: &str) -> [u8; 32] {
        let mut hasher = blake3::Hasher::new();
        hasher.update(voice.as_bytes());
        hasher.update(b"|");
        hasher.update(text.as_bytes());
        *hasher.finalize().as_bytes()
    }

    fn get(&self, key: &[u8; 32]) -> Option<Arc<[Sample]>> {
        let mut cache = self.cache.lock();
        if let Some(entry) = cache.get(key) {
            if entry.inserted_at.elapsed() < self.ttl {
                return Some(Arc::clone(&entry.samples));
            }
            cache.pop(key);
        }
        None
    }

    pub fn len(&self) -> usize {
        self.cache.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Synthesizer for CachedSynthesizer {
    fn synthesize(&self, text: &str, voice: &str) -> std::result::Result<Vec<Sample>, EngineError> {
        let key = Self::compute_key(voice, text.trim());
        if let Some(samples) = self.get(&key) {
            self.metrics.increment(metric_names::SYNTH_CACHE_HITS, 1);
            debug!(voice, chars = text.len(), "synth cache hit");
            return Ok(samples.to_vec());
        }

        // Synthesize outside the lock; concurrent misses for the same key both synthesize
        let samples = self.inner.synthesize(text, voice)?;
        if !samples.is_empty() {
            self.cache.lock().put(
                key,
                CacheEntry {
                    samples: Arc::from(samples.as_slice()),
                    inserted_at: Instant::now(),
                },
            );
        }
        Ok(samples)
    }

    fn supports_voice(&self, voice: &str) -> bool {
        self.inner.supports_voice(voice)
    }
}
