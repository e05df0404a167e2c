//! Sentence-level FIFO for synthesized speech.
//!
//! Each generated sentence becomes one [`Segment`] with a sequence number
//! reserved before synthesis starts. Segments may finish synthesis in any
//! order; the queue releases them strictly by sequence number. A flush drops
//! everything queued or half-played and makes every earlier reservation stale,
//! so a slow worker cannot re-populate the queue after an interrupt.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::warn;

use super::{FrameSource, Sample};
use crate::error::{BridgeError, Result};

/// Immutable chunk of generated audio, one per sentence.
#[derive(Debug, Clone)]
pub struct Segment {
    seq: u64,
    samples: Arc<[Sample]>,
}

impl Segment {
    pub fn new(seq: u64, samples: Vec<Sample>) -> Self {
        Self {
            seq,
            samples: samples.into(),
        }
    }

    pub fn seq(&self) -> u64 {
        self.seq
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
}

/// What happened to a pushed segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    /// Accepted. `dropped` older segments were discarded to respect the duration cap.
    Queued { dropped: usize },
    /// The segment alone exceeded the duration cap and was discarded along
    /// with `dropped` segments in total, itself included.
    Evicted { dropped: usize },
    /// Reservation predates the last flush (or was already played); discarded.
    Stale,
    /// No samples; treated as an abandoned reservation.
    Empty,
}

struct QueueState {
    pending: BTreeMap<u64, Segment>,
    abandoned: BTreeSet<u64>,
    current: Option<Segment>,
    offset: usize,
    /// Next sequence number handed out by `reserve`.
    next_seq: u64,
    /// Sequence number the consumer is waiting for.
    next_play: u64,
    queued_samples: usize,
}

impl QueueState {
    fn skip_abandoned(&mut self) {
        while self.abandoned.remove(&self.next_play) {
            self.next_play += 1;
        }
    }

    fn current_remaining(&self) -> usize {
        self.current
            .as_ref()
            .map(|seg| seg.len() - self.offset)
            .unwrap_or(0)
    }
}

/// Thread-safe ordered segment queue. Many producers, one consumer.
pub struct SentenceQueue {
    inner: Mutex<QueueState>,
    max_queued_samples: usize,
}

impl SentenceQueue {
    pub fn new(max_queued_samples: usize) -> Result<Self> {
        if max_queued_samples == 0 {
            return Err(BridgeError::InvalidCapacity {
                component: "SentenceQueue",
            });
        }
        Ok(Self {
            inner: Mutex::new(QueueState {
                pending: BTreeMap::new(),
                abandoned: BTreeSet::new(),
                current: None,
                offset: 0,
                next_seq: 0,
                next_play: 0,
                queued_samples: 0,
            }),
            max_queued_samples,
        })
    }

    /// Reserve the next playback slot.
    pub fn reserve(&self) -> u64 {
        let mut state = self.inner.lock();
        let seq = state.next_seq;
        state.next_seq += 1;
        seq
    }

    /// Queue a synthesized segment in its reserved slot.
    pub fn push(&self, segment: Segment) -> PushOutcome {
        let mut state = self.inner.lock();
        let seq = segment.seq();

        if seq < state.next_play || state.pending.contains_key(&seq) {
            return PushOutcome::Stale;
        }
        if seq >= state.next_seq {
            state.next_seq = seq + 1;
        }
        if segment.is_empty() {
            state.abandoned.insert(seq);
            state.skip_abandoned();
            return PushOutcome::Empty;
        }

        state.queued_samples += segment.len();
        state.pending.insert(seq, segment);

        let mut dropped = 0;
        while state.queued_samples > self.max_queued_samples {
            let Some((old_seq, old)) = state.pending.pop_first() else {
                break;
            };
            state.queued_samples -= old.len();
            state.abandoned.insert(old_seq);
            dropped += 1;
        }
        if dropped == 0 {
            return PushOutcome::Queued { dropped };
        }
        state.skip_abandoned();
        warn!(
            dropped,
            cap_samples = self.max_queued_samples,
            "sentence_queue_over_capacity"
        );
        if state.pending.contains_key(&seq) {
            PushOutcome::Queued { dropped }
        } else {
            PushOutcome::Evicted { dropped }
        }
    }

    /// Reserve and queue in one step.
    pub fn push_samples(&self, samples: Vec<Sample>) -> PushOutcome {
        let seq = self.reserve();
        self.push(Segment::new(seq, samples))
    }

    /// Give up a reservation that will never produce audio.
    pub fn abandon(&self, seq: u64) {
        let mut state = self.inner.lock();
        if seq < state.next_play || state.pending.contains_key(&seq) {
            return;
        }
        state.abandoned.insert(seq);
        state.skip_abandoned();
    }

    /// Move up to `out.len()` samples into `out`, crossing segment boundaries.
    /// Returns the number copied; never pads.
    pub fn pull_into(&self, out: &mut [Sample]) -> usize {
        let mut state = self.inner.lock();
        let mut written = 0;

        while written < out.len() {
            if state.current_remaining() == 0 {
                state.current = None;
                state.offset = 0;
                state.skip_abandoned();
                let next_play = state.next_play;
                match state.pending.remove(&next_play) {
                    Some(seg) => {
                        state.next_play += 1;
                        state.current = Some(seg);
                    }
                    None => break,
                }
            }

            let offset = state.offset;
            let Some(seg) = state.current.as_ref() else {
                break;
            };
            let n = (seg.len() - offset).min(out.len() - written);
            out[written..written + n].copy_from_slice(&seg.samples()[offset..offset + n]);
            state.offset += n;
            written += n;
        }

        state.queued_samples -= written;
        written
    }

    /// Remove and return up to `n` samples.
    pub fn pull(&self, n: usize) -> Vec<Sample> {
        let mut out = vec![0; n];
        let got = self.pull_into(&mut out);
        out.truncate(got);
        out
    }

    /// Discard all queued and in-progress audio and invalidate outstanding reservations.
    pub fn flush(&self) {
        let mut state = self.inner.lock();
        state.pending.clear();
        state.abandoned.clear();
        state.current = None;
        state.offset = 0;
        state.next_play = state.next_seq;
        state.queued_samples = 0;
    }

    /// Samples buffered and not yet pulled.
    pub fn available(&self) -> usize {
        self.inner.lock().queued_samples
    }

    pub fn is_empty(&self) -> bool {
        self.available() == 0
    }

    /// No buffered audio and every reservation resolved.
    pub fn is_idle(&self) -> bool {
        let state = self.inner.lock();
        state.queued_samples == 0 && state.pending.is_empty() && state.next_play == state.next_seq
    }

    /// Segments waiting, including the one being played.
    pub fn len(&self) -> usize {
        let state = self.inner.lock();
        state.pending.len() + usize::from(state.current_remaining() > 0)
    }
}

impl FrameSource for SentenceQueue {
    fn fill(&self, out: &mut [Sample]) -> usize {
        self.pull_into(out)
    }
}
