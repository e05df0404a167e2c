//! Fixed-length outbound audio frame.

use std::sync::Arc;

use super::Sample;

/// Exactly `frame_samples` samples, immutable once built.
/// Cloning shares the sample storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    samples: Arc<[Sample]>,
    /// Presentation timestamp in samples since the pacer started.
    pts: u64,
}

impl Frame {
    /// Build a frame of `len` samples from `data`, zero-padding any shortfall.
    /// Extra samples beyond `len` are ignored.
    pub fn padded(data: &[Sample], len: usize, pts: u64) -> Self {
        let mut samples = vec![0; len];
        let n = data.len().min(len);
        samples[..n].copy_from_slice(&data[..n]);
        Self {
            samples: samples.into(),
            pts,
        }
    }

    pub fn silence(len: usize, pts: u64) -> Self {
        Self::padded(&[], len, pts)
    }

    pub fn samples(&self) -> &[Sample] {
        &self.samples
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn pts(&self) -> u64 {
        self.pts
    }

    pub fn is_silent(&self) -> bool {
        self.samples.iter().all(|&s| s == 0)
    }
}
