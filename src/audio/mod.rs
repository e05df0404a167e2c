//! Audio buffering primitives shared between the worker pool, the media
//! endpoint callback context and the session loop.
//! Everything here is 48kHz mono i16; rate conversion happens in the engines.

pub mod capture;
pub mod frame;
pub mod ring_buffer;
pub mod sentence_queue;
pub mod tone;

pub use capture::{CaptureBuffer, CaptureSink};
pub use frame::Frame;
pub use ring_buffer::SampleRing;
pub use sentence_queue::{PushOutcome, Segment, SentenceQueue};
pub use tone::{ToneFeeder, ToneVoice};

/// One PCM sample.
pub type Sample = i16;

pub const SAMPLE_RATE: u32 = 48_000;
/// 20ms at 48kHz.
pub const FRAME_SAMPLES: usize = 960;

/// Anything the pacer can pull outbound audio from.
pub trait FrameSource: Send + Sync {
    /// Copy up to `out.len()` samples into `out`, returning how many were written.
    /// Must not block.
    fn fill(&self, out: &mut [Sample]) -> usize;
}
