//! Ollama backend
//!
//! Classification goes through `/api/chat` with `format: "json"`; vectors
//! come from the batch endpoint `/api/embed`.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::Result;

use super::{http, AIBackend, CompletionOptions};

#[derive(Clone)]
pub struct OllamaBackend {
    http_client: Client,
    base_url: String,
    model: String,
}

impl OllamaBackend {
    pub fn new(base_url: &str, model: &str) -> Self {
        Self {
            http_client: http::client(),
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
        }
    }

    pub fn with_model(&self, model: &str) -> Self {
        Self {
            model: model.to_string(),
            ..self.clone()
        }
    }

    /// `OLLAMA_HOST` is required; `OLLAMA_MODEL` falls back to `default_model`
    pub fn from_env(default_model: &str) -> Option<Self> {
        let host = std::env::var("OLLAMA_HOST").ok()?;
        let model = std::env::var("OLLAMA_MODEL").unwrap_or_else(|_| default_model.to_string());
        Some(Self::new(&host, &model))
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 2],
    stream: bool,
    format: &'static str,
    options: ChatOptions,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

/// Ollama's sampling knobs; `num_predict` caps generated tokens
#[derive(Debug, Serialize)]
struct ChatOptions {
    temperature: f32,
    num_predict: u32,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    message: ReplyMessage,
}

#[derive(Debug, Deserialize)]
struct ReplyMessage {
    content: String,
}

#[derive(Debug, Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Debug, Deserialize)]
struct EmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

#[async_trait]
impl AIBackend for OllamaBackend {
    async fn complete_json(
        &self,
        system: &str,
        user: &str,
        options: &CompletionOptions,
    ) -> Result<String> {
        let request = ChatRequest {
            model: &self.model,
            messages: [
                ChatMessage {
                    role: "system",
                    content: system,
                },
                ChatMessage {
                    role: "user",
                    content: user,
                },
            ],
            stream: false,
            format: "json",
            options: ChatOptions {
                temperature: options.temperature,
                num_predict: options.max_tokens,
            },
        };

        let reply: ChatResponse = http::send_json(
            self.http_client.post(self.url("/api/chat")),
            &request,
            "Ollama chat",
        )
        .await?;
        debug!(model = %self.model, "Ollama reply: {}", reply.message.content);
        Ok(reply.message.content)
    }

    async fn embed(&self, model: &str, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let reply: EmbedResponse = http::send_json(
            self.http_client.post(self.url("/api/embed")),
            &EmbedRequest { model, input: texts },
            "Ollama embed",
        )
        .await?;
        Ok(reply.embeddings)
    }

    async fn health_check(&self) -> bool {
        http::probe(self.http_client.get(self.url("/api/tags"))).await
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn host(&self) -> &str {
        &self.base_url
    }
}
