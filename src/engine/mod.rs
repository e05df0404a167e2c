//! Speech and language collaborators.
//!
//! All three are blocking calls and only ever run on the worker pool. The
//! active implementations live behind `RwLock<Arc<dyn ...>>` so they can be
//! swapped while a session runs; a swap affects the next dispatch only.

pub mod cache;
pub mod ollama;

use std::collections::BTreeMap;
use std::sync::{Arc, OnceLock};

use parking_lot::RwLock;
use regex::Regex;
use tracing::info;

use crate::audio::Sample;
use crate::conversation::ConversationHistory;
use crate::error::EngineError;

pub use cache::CachedSynthesizer;
pub use ollama::OllamaReply;

/// Text to speech. Returns 48 kHz mono PCM.
pub trait Synthesizer: Send + Sync {
    fn synthesize(&self, text: &str, voice: &str) -> Result<Vec<Sample>, EngineError>;

    /// Whether `voice` can be passed to `synthesize`.
    fn supports_voice(&self, _voice: &str) -> bool {
        true
    }
}

/// Speech to text over 48 kHz mono PCM. Empty audio must yield `Ok("")`.
pub trait Transcriber: Send + Sync {
    fn transcribe(&self, audio: &[Sample]) -> Result<String, EngineError>;
}

/// Language-model reply to the conversation so far.
pub trait ReplyGenerator: Send + Sync {
    fn reply(&self, history: &ConversationHistory) -> Result<String, EngineError>;

    /// Use `model` for later replies; empty restores the default.
    /// Generators without a model choice ignore it.
    fn set_model(&self, _model: &str) {}

    /// Model answering replies, if the generator has one.
    fn model(&self) -> Option<String> {
        None
    }
}

struct ActiveReply {
    name: String,
    generator: Arc<dyn ReplyGenerator>,
}

/// Swappable set of collaborators for one session.
pub struct Providers {
    synthesizer: RwLock<Arc<dyn Synthesizer>>,
    transcriber: RwLock<Arc<dyn Transcriber>>,
    replies: RwLock<BTreeMap<String, Arc<dyn ReplyGenerator>>>,
    active_reply: RwLock<Option<ActiveReply>>,
}

impl Providers {
    /// Providers with no reply generator: transcripts are published, not answered.
    pub fn new(synthesizer: Arc<dyn Synthesizer>, transcriber: Arc<dyn Transcriber>) -> Self {
        Self {
            synthesizer: RwLock::new(synthesizer),
            transcriber: RwLock::new(transcriber),
            replies: RwLock::new(BTreeMap::new()),
            active_reply: RwLock::new(None),
        }
    }

    /// Register a reply generator under `name`. The first one registered becomes active.
    pub fn with_reply(self, name: impl Into<String>, generator: Arc<dyn ReplyGenerator>) -> Self {
        self.register_reply(name, generator);
        self
    }

    pub fn register_reply(&self, name: impl Into<String>, generator: Arc<dyn ReplyGenerator>) {
        let name = name.into();
        self.replies.write().insert(name.clone(), Arc::clone(&generator));
        let mut active = self.active_reply.write();
        if active.is_none() {
            *active = Some(ActiveReply { name, generator });
        }
    }

    /// Make a registered reply generator the active one.
    pub fn select_reply(&self, name: &str) -> Result<(), EngineError> {
        let generator = self
            .replies
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| EngineError::UnknownProvider(name.to_string()))?;
        *self.active_reply.write() = Some(ActiveReply {
            name: name.to_string(),
            generator,
        });
        info!(provider = name, "reply_provider_selected");
        Ok(())
    }

    /// Make `provider` active and point it at `model`. Returns the model now in use,
    /// empty when the provider has no model choice.
    pub fn select_model(&self, provider: &str, model: &str) -> Result<String, EngineError> {
        let generator = self
            .replies
            .read()
            .get(provider)
            .cloned()
            .ok_or_else(|| EngineError::UnknownProvider(provider.to_string()))?;
        generator.set_model(model.trim());
        let model = generator.model().unwrap_or_default();
        *self.active_reply.write() = Some(ActiveReply {
            name: provider.to_string(),
            generator,
        });
        info!(provider, model = %model, "reply_model_selected");
        Ok(model)
    }

    pub fn reply_names(&self) -> Vec<String> {
        self.replies.read().keys().cloned().collect()
    }

    pub fn active_reply_name(&self) -> Option<String> {
        self.active_reply.read().as_ref().map(|a| a.name.clone())
    }

    pub fn reply(&self) -> Option<Arc<dyn ReplyGenerator>> {
        self.active_reply
            .read()
            .as_ref()
            .map(|a| Arc::clone(&a.generator))
    }

    pub fn synthesizer(&self) -> Arc<dyn Synthesizer> {
        Arc::clone(&self.synthesizer.read())
    }

    pub fn transcriber(&self) -> Arc<dyn Transcriber> {
        Arc::clone(&self.transcriber.read())
    }

    pub fn set_synthesizer(&self, synthesizer: Arc<dyn Synthesizer>) {
        *self.synthesizer.write() = synthesizer;
    }

    pub fn set_transcriber(&self, transcriber: Arc<dyn Transcriber>) {
        *self.transcriber.write() = transcriber;
    }
}

fn sentence_end() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[.!?]+(?:\s+|$)").expect("sentence regex is valid"))
}

/// Split reply text into sentences at `.`, `!` or `?` followed by whitespace
/// or end of text. Fragments are trimmed; empty ones are dropped.
pub fn split_sentences(text: &str) -> Vec<String> {
    let mut sentences = Vec::new();
    let mut start = 0;
    let mut push = |fragment: &str| {
        let fragment = fragment.trim();
        if !fragment.is_empty() {
            sentences.push(fragment.to_string());
        }
    };
    for m in sentence_end().find_iter(text) {
        push(&text[start..m.end()]);
        start = m.end();
    }
    push(&text[start..]);
    sentences
}
