//! Error types for voxbridge.
//! Transport failures are fatal to a session, engine failures are recoverable.

use thiserror::Error;

use crate::state_machine::SessionState;

/// Failure reported by the media endpoint.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("media endpoint closed")]
    Closed,

    #[error("media endpoint send failed: {0}")]
    Send(String),
}

/// Failure reported by an external speech or language collaborator.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    #[error("transcription failed: {0}")]
    Transcription(String),

    #[error("synthesis failed: {0}")]
    Synthesis(String),

    #[error("reply generation failed: {0}")]
    Reply(String),

    #[error("{0} timed out")]
    Timeout(&'static str),

    #[error("worker task panicked: {0}")]
    WorkerPanicked(String),

    #[error("{0} cancelled before it started")]
    Cancelled(&'static str),

    #[error("unknown provider: {0}")]
    UnknownProvider(String),

    #[error("unknown voice: {0}")]
    UnknownVoice(String),
}

#[derive(Error, Debug)]
pub enum BridgeError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error("invalid transition: {from} -> {to}")]
    InvalidTransition { from: SessionState, to: SessionState },

    #[error("invalid capacity for {component}: must be > 0")]
    InvalidCapacity { component: &'static str },

    #[error("invalid configuration value for {key}: {message}")]
    Config { key: String, message: String },

    #[error("session closed")]
    SessionClosed,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, BridgeError>;
