//! Inbound capture buffer for recorded speech.
//! The media endpoint appends from its own callback context; the session loop
//! starts and stops recordings and takes the audio once a recording ends.

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::warn;

use super::Sample;

struct CaptureState {
    samples: Vec<Sample>,
    active: bool,
    truncated: bool,
}

/// Growable sample buffer bounded by a recording's start and stop.
pub struct CaptureBuffer {
    inner: Mutex<CaptureState>,
    max_samples: usize,
}

impl CaptureBuffer {
    /// `max_samples` caps a single recording; anything past it is dropped.
    pub fn new(max_samples: usize) -> Self {
        Self {
            inner: Mutex::new(CaptureState {
                samples: Vec::new(),
                active: false,
                truncated: false,
            }),
            max_samples,
        }
    }

    /// Start a recording, discarding anything left from the previous one.
    pub fn begin(&self) {
        let mut state = self.inner.lock();
        state.samples.clear();
        state.active = true;
        state.truncated = false;
    }

    /// Append inbound audio. Returns how many samples were kept
    /// (zero when no recording is active).
    pub fn append(&self, samples: &[Sample]) -> usize {
        let mut state = self.inner.lock();
        if !state.active {
            return 0;
        }
        let room = self.max_samples.saturating_sub(state.samples.len());
        let take = samples.len().min(room);
        state.samples.extend_from_slice(&samples[..take]);
        if take < samples.len() && !state.truncated {
            state.truncated = true;
            warn!(max_samples = self.max_samples, "recording_truncated");
        }
        take
    }

    /// End the recording and hand off its audio. The buffer is left empty.
    pub fn finish(&self) -> Vec<Sample> {
        let mut state = self.inner.lock();
        state.active = false;
        std::mem::take(&mut state.samples)
    }

    /// End the recording and throw its audio away.
    pub fn discard(&self) {
        let mut state = self.inner.lock();
        state.active = false;
        state.samples = Vec::new();
    }

    /// Copy of the audio captured so far, for advisory interim transcription.
    pub fn snapshot(&self) -> Vec<Sample> {
        self.inner.lock().samples.clone()
    }

    pub fn is_active(&self) -> bool {
        self.inner.lock().active
    }

    pub fn len(&self) -> usize {
        self.inner.lock().samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Handle given to the media endpoint for inbound audio delivery.
/// Safe to call from any thread.
#[derive(Clone)]
pub struct CaptureSink {
    buffer: Arc<CaptureBuffer>,
}

impl CaptureSink {
    pub fn new(buffer: Arc<CaptureBuffer>) -> Self {
        Self { buffer }
    }

    /// Inbound frame callback.
    #[inline]
    pub fn on_frame(&self, samples: &[Sample]) {
        self.buffer.append(samples);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn appends_only_while_active() {
        let buf = CaptureBuffer::new(1_000);
        assert_eq!(buf.append(&[1, 2, 3]), 0);

        buf.begin();
        assert_eq!(buf.append(&[1, 2, 3]), 3);
        assert_eq!(buf.finish(), vec![1, 2, 3]);

        assert!(!buf.is_active());
        assert_eq!(buf.append(&[4]), 0);
        assert!(buf.is_empty());
    }

    #[test]
    fn begin_drops_previous_audio() {
        let buf = CaptureBuffer::new(1_000);
        buf.begin();
        buf.append(&[1, 1]);
        buf.begin();
        buf.append(&[2]);
        assert_eq!(buf.finish(), vec![2]);
    }

    #[test]
    fn recording_is_capped() {
        let buf = CaptureBuffer::new(5);
        buf.begin();
        assert_eq!(buf.append(&[1, 2, 3]), 3);
        assert_eq!(buf.append(&[4, 5, 6]), 2);
        assert_eq!(buf.append(&[7]), 0);
        assert_eq!(buf.finish(), vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn sink_delivers_from_other_threads_in_order() {
        let buf = Arc::new(CaptureBuffer::new(48_000 * 10));
        buf.begin();
        let sink = CaptureSink::new(Arc::clone(&buf));

        let handle = std::thread::spawn(move || {
            for i in 0..50i16 {
                sink.on_frame(&[i; 960]);
            }
        });
        handle.join().unwrap();

        let audio = buf.finish();
        assert_eq!(audio.len(), 50 * 960);
        for (i, frame) in audio.chunks(960).enumerate() {
            assert!(frame.iter().all(|&s| s == i as i16));
        }
    }

    #[test]
    fn snapshot_leaves_recording_running() {
        let buf = CaptureBuffer::new(100);
        buf.begin();
        buf.append(&[1, 2]);
        assert_eq!(buf.snapshot(), vec![1, 2]);
        assert!(buf.is_active());
        buf.append(&[3]);
        assert_eq!(buf.finish(), vec![1, 2, 3]);
    }

    #[test]
    fn discard_releases_audio() {
        let buf = CaptureBuffer::new(100);
        buf.begin();
        buf.append(&[1, 2]);
        buf.discard();
        assert!(!buf.is_active());
        assert!(buf.finish().is_empty());
    }
}
