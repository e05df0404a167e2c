//! Ollama chat client used as a reply generator.
//! Non-streaming `/api/chat`; the whole reply is needed before sentence
//! splitting anyway.

use std::time::{Duration, Instant};

use parking_lot::RwLock;
use serde::Deserialize;
use tokio::runtime::Handle;
use tracing::{info, warn};

use super::ReplyGenerator;
use crate::conversation::ConversationHistory;
use crate::error::EngineError;

pub const DEFAULT_URL: &str = "http://localhost:11434";
pub const DEFAULT_MODEL: &str = "llama3.2:3b";

#[derive(Debug, Deserialize)]
struct ChatResponse {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    content: String,
}

pub struct OllamaReply {
    http: reqwest::Client,
    base_url: String,
    default_model: String,
    model: RwLock<String>,
}

impl OllamaReply {
    pub fn new(
        base_url: impl Into<String>,
        model: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, EngineError> {
        let http = reqwest::Client::builder()
            .pool_max_idle_per_host(2)
            .pool_idle_timeout(Duration::from_secs(90))
            .timeout(timeout)
            .build()
            .map_err(|e| EngineError::Reply(e.to_string()))?;

        let model = model.into();
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: RwLock::new(model.clone()),
            default_model: model,
        })
    }

    /// Reads `OLLAMA_URL` and `OLLAMA_MODEL`, falling back to a local default.
    pub fn from_env(timeout: Duration) -> Result<Self, EngineError> {
        let url = std::env::var("OLLAMA_URL").unwrap_or_else(|_| DEFAULT_URL.to_string());
        let model = std::env::var("OLLAMA_MODEL").unwrap_or_else(|_| DEFAULT_MODEL.to_string());
        Self::new(url, model, timeout)
    }

    pub fn chat_url(&self) -> String {
        format!("{}/api/chat", self.base_url)
    }

    fn build_body(&self, history: &ConversationHistory) -> serde_json::Value {
        let model = self.model.read().clone();
        serde_json::json!({
            "model": model,
            "messages": history.messages(),
            "stream": false,
        })
    }

    async fn chat(&self, body: serde_json::Value) -> Result<String, EngineError> {
        let resp = self
            .http
            .post(self.chat_url())
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    EngineError::Timeout("reply generation")
                } else {
                    EngineError::Reply(e.to_string())
                }
            })?;

        let status = resp.status();
        if !status.is_success() {
            let detail = resp.text().await.unwrap_or_default();
            warn!(status = status.as_u16(), "ollama request rejected");
            return Err(EngineError::Reply(format!("HTTP {}: {}", status.as_u16(), detail)));
        }

        let text = resp
            .text()
            .await
            .map_err(|e| EngineError::Reply(e.to_string()))?;
        parse_response(&text)
    }
}

fn parse_response(raw: &str) -> Result<String, EngineError> {
    let parsed: ChatResponse = serde_json::from_str(raw)
        .map_err(|e| EngineError::Reply(format!("malformed chat response: {e}")))?;
    Ok(parsed.message.content.trim().to_string())
}

impl ReplyGenerator for OllamaReply {
    /// Must be called from a runtime's blocking pool, never from an async task.
    fn reply(&self, history: &ConversationHistory) -> Result<String, EngineError> {
        let handle = Handle::try_current()
            .map_err(|_| EngineError::Reply("no async runtime available".into()))?;
        let started = Instant::now();
        let text = handle.block_on(self.chat(self.build_body(history)))?;
        info!(
            model = %self.model.read(),
            chars = text.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "ollama_reply"
        );
        Ok(text)
    }

    fn set_model(&self, model: &str) {
        let model = if model.is_empty() {
            self.default_model.clone()
        } else {
            model.to_string()
        };
        info!(model = %model, "ollama_model_set");
        *self.model.write() = model;
    }

    fn model(&self) -> Option<String> {
        Some(self.model.read().clone())
    }
}
