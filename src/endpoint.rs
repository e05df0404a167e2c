//! Media endpoint boundary: the real-time transport that carries frames to
//! and from the remote peer. Negotiation, encryption and codecs live behind it.

use std::sync::Arc;

use crossbeam_channel as cb;
use tracing::debug;

use crate::audio::Frame;
use crate::error::TransportError;
use crate::metrics::{metric_names, MetricsRegistry};

/// Outbound half of the transport. `send` must only enqueue, never block.
pub trait MediaEndpoint: Send + Sync {
    fn send(&self, frame: Frame) -> Result<(), TransportError>;
}

/// Endpoint backed by a bounded crossbeam channel, for transports that drain
/// frames on their own thread. A full channel drops the frame; a dropped
/// receiver is a closed transport.
pub struct ChannelEndpoint {
    tx: cb::Sender<Frame>,
    metrics: Arc<MetricsRegistry>,
}

impl ChannelEndpoint {
    pub fn new(capacity: usize, metrics: Arc<MetricsRegistry>) -> (Self, cb::Receiver<Frame>) {
        let (tx, rx) = cb::bounded(capacity.max(1));
        (Self { tx, metrics }, rx)
    }
}

impl MediaEndpoint for ChannelEndpoint {
    fn send(&self, frame: Frame) -> Result<(), TransportError> {
        match self.tx.try_send(frame) {
            Ok(()) => Ok(()),
            Err(cb::TrySendError::Full(frame)) => {
                self.metrics.increment(metric_names::ENDPOINT_DROPPED, 1);
                debug!(pts = frame.pts(), "endpoint queue full, frame dropped");
                Ok(())
            }
            Err(cb::TrySendError::Disconnected(_)) => Err(TransportError::Closed),
        }
    }
}
