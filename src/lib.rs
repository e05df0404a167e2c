//! voxbridge: frame-paced audio bridge between bursty speech engines and a
//! 20ms real-time transport.
//!
//! Each connected peer gets a session: a tokio task that owns the outbound
//! sentence queue, the diagnostic tone ring, the inbound capture buffer and
//! the frame pacer, and drives the session state machine from signaling
//! messages and engine completions.

pub mod audio;
pub mod cancellation;
pub mod config;
pub mod conversation;
pub mod endpoint;
pub mod engine;
pub mod error;
pub mod hub;
pub mod metrics;
pub mod pacer;
pub mod scheduler;
pub mod session;
pub mod signal;
pub mod state_machine;

pub use audio::{CaptureSink, Frame, Sample, FRAME_SAMPLES, SAMPLE_RATE};
pub use config::BridgeConfig;
pub use endpoint::{ChannelEndpoint, MediaEndpoint};
pub use engine::{Providers, ReplyGenerator, Synthesizer, Transcriber};
pub use error::{BridgeError, EngineError, Result, TransportError};
pub use hub::SessionHub;
pub use session::SessionHandle;
pub use signal::{Notification, Signal};
pub use state_machine::SessionState;

/// Install the global tracing subscriber. `RUST_LOG` overrides the default
/// `voxbridge=debug` filter; `VOXBRIDGE_LOG_FORMAT=json` switches to JSON lines.
/// Safe to call more than once.
pub fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("voxbridge=debug"));
    let json = std::env::var("VOXBRIDGE_LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true);
    let _ = if json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
}
