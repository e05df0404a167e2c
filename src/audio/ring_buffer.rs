//! Audio ring buffer: fixed pre-allocated circular buffer for PCM samples.
//! Writes overwrite the oldest unread data, reads zero-pad. No allocation
//! after construction, no blocking beyond a short mutex hold.

use parking_lot::Mutex;

use super::{FrameSource, Sample};
use crate::error::{BridgeError, Result};

struct RingState {
    buffer: Box<[Sample]>,
    write_pos: usize,
    read_pos: usize,
    count: usize,
}

impl RingState {
    fn capacity(&self) -> usize {
        self.buffer.len()
    }

    fn write(&mut self, samples: &[Sample]) {
        let capacity = self.capacity();

        // Only the newest `capacity` samples can survive
        if samples.len() >= capacity {
            let tail = &samples[samples.len() - capacity..];
            self.buffer.copy_from_slice(tail);
            self.write_pos = 0;
            self.read_pos = 0;
            self.count = capacity;
            return;
        }

        let overflow = (self.count + samples.len()).saturating_sub(capacity);
        if overflow > 0 {
            self.read_pos = (self.read_pos + overflow) % capacity;
            self.count -= overflow;
        }

        let first = samples.len().min(capacity - self.write_pos);
        self.buffer[self.write_pos..self.write_pos + first].copy_from_slice(&samples[..first]);
        let rest = samples.len() - first;
        self.buffer[..rest].copy_from_slice(&samples[first..]);

        self.write_pos = (self.write_pos + samples.len()) % capacity;
        self.count += samples.len();
    }

    fn read_into(&mut self, out: &mut [Sample]) -> usize {
        let capacity = self.capacity();
        let to_read = out.len().min(self.count);

        let first = to_read.min(capacity - self.read_pos);
        out[..first].copy_from_slice(&self.buffer[self.read_pos..self.read_pos + first]);
        let rest = to_read - first;
        out[first..to_read].copy_from_slice(&self.buffer[..rest]);
        out[to_read..].fill(0);

        self.read_pos = (self.read_pos + to_read) % capacity;
        self.count -= to_read;
        to_read
    }

    fn clear(&mut self) {
        self.write_pos = 0;
        self.read_pos = 0;
        self.count = 0;
    }
}

/// Fixed-size, thread-safe ring buffer for i16 samples. Pre-allocated, never grows.
pub struct SampleRing {
    inner: Mutex<RingState>,
    capacity: usize,
}

impl SampleRing {
    pub fn new(capacity: usize) -> Result<Self> {
        if capacity == 0 {
            return Err(BridgeError::InvalidCapacity {
                component: "SampleRing",
            });
        }
        Ok(Self {
            inner: Mutex::new(RingState {
                buffer: vec![0; capacity].into_boxed_slice(),
                write_pos: 0,
                read_pos: 0,
                count: 0,
            }),
            capacity,
        })
    }

    /// Append samples, overwriting the oldest unread data if full.
    #[inline]
    pub fn write(&self, samples: &[Sample]) {
        if samples.is_empty() {
            return;
        }
        self.inner.lock().write(samples);
    }

    /// Fill `out` completely: unread samples first, zeros for the rest.
    /// Returns how many real samples were copied.
    #[inline]
    pub fn read_into(&self, out: &mut [Sample]) -> usize {
        self.inner.lock().read_into(out)
    }

    /// Read exactly `n` samples, zero-padded.
    pub fn read(&self, n: usize) -> Vec<Sample> {
        let mut out = vec![0; n];
        self.read_into(&mut out);
        out
    }

    /// Discard all buffered samples.
    pub fn clear(&self) {
        self.inner.lock().clear();
    }

    /// Number of unread samples.
    pub fn available(&self) -> usize {
        self.inner.lock().count
    }

    pub fn is_empty(&self) -> bool {
        self.available() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl FrameSource for SampleRing {
    fn fill(&self, out: &mut [Sample]) -> usize {
        self.read_into(out)
    }
}
