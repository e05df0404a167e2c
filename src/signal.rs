//! Signaling messages. Signals flow in from the peer's control channel,
//! notifications flow back out. Both are JSON objects tagged by `type`.

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::state_machine::SessionState;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Signal {
    /// Peer started offer/answer negotiation.
    Offer {
        #[serde(default)]
        sdp: String,
    },
    /// Media path established.
    MediaReady,
    NegotiationFailed {
        #[serde(default)]
        reason: String,
    },
    MicStart,
    MicStop,
    /// Interrupt any reply in progress.
    StopSpeaking,
    /// Speak the text directly, bypassing transcription and reply generation.
    Speak { text: String },
    ToneStart { voice_id: String },
    ToneStop,
    SetVoice { voice_id: String },
    SetProvider { provider: String },
    /// Switch provider and the model it uses; an empty model means the provider's default.
    SetModel {
        provider: String,
        #[serde(default)]
        model: String,
    },
    Ping,
    Disconnect,
}

impl Signal {
    pub fn parse(raw: &str) -> Result<Self> {
        Ok(serde_json::from_str(raw)?)
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Signal::Offer { .. } => "offer",
            Signal::MediaReady => "media_ready",
            Signal::NegotiationFailed { .. } => "negotiation_failed",
            Signal::MicStart => "mic_start",
            Signal::MicStop => "mic_stop",
            Signal::StopSpeaking => "stop_speaking",
            Signal::Speak { .. } => "speak",
            Signal::ToneStart { .. } => "tone_start",
            Signal::ToneStop => "tone_stop",
            Signal::SetVoice { .. } => "set_voice",
            Signal::SetProvider { .. } => "set_provider",
            Signal::SetModel { .. } => "set_model",
            Signal::Ping => "ping",
            Signal::Disconnect => "disconnect",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Notification {
    State { state: SessionState },
    Transcription { text: String, partial: bool },
    AgentThinking,
    AgentReply { text: String },
    Speaking,
    ProviderSet { provider: String },
    ModelSet { provider: String, model: String },
    VoiceSet { voice_id: String },
    Error { message: String },
    Pong,
    Closed,
}

impl Notification {
    pub fn error(message: impl Into<String>) -> Self {
        Notification::Error {
            message: message.into(),
        }
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}
