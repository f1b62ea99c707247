//! Model servers for generation and embeddings
//!
//! The cascade needs two things from external models: a JSON-constrained
//! chat completion for the generative stage, and text embeddings for the
//! semantic and embedding stages. Every backend serves both.
//!
//! # Usage
//!
//! ```rust,ignore
//! let ai = AIClient::from_env("llama3.2").unwrap_or_else(AIClient::mock);
//! let vectors = ai.embed("all-minilm", &["Cash at Bank".to_string()]).await?;
//! ```
//!
//! # Environment
//!
//! | Variable | Meaning |
//! |----------|---------|
//! | `AI_BACKEND` | `ollama` (default), `openai_compatible` or `mock` |
//! | `OLLAMA_HOST` / `OLLAMA_MODEL` | Ollama server and chat model |
//! | `OPENAI_COMPATIBLE_HOST` / `OPENAI_COMPATIBLE_MODEL` | `/v1` server and chat model |
//! | `OPENAI_COMPATIBLE_API_KEY` | Bearer token, if the server wants one |
//!
//! Model variables override `[llm] model` from the config.

mod http;
mod mock;
mod ollama;
mod openai_compatible;
pub mod parsing;

pub use mock::{hashed_embedding, heuristic_classification, MockBackend};
pub use ollama::OllamaBackend;
pub use openai_compatible::OpenAICompatibleBackend;

use std::time::Duration;

use async_trait::async_trait;

use crate::error::{Error, Result};

/// Transport-level timeout for every model request
pub(crate) const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

/// Sampling parameters for a JSON completion
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionOptions {
    pub temperature: f32,
    pub max_tokens: u32,
}

impl Default for CompletionOptions {
    fn default() -> Self {
        Self {
            temperature: 0.0,
            max_tokens: 4000,
        }
    }
}

/// What the cascade needs from a model server.
///
/// Implementations are shared across classification workers, hence
/// `Send + Sync`.
#[async_trait]
pub trait AIBackend: Send + Sync {
    /// Chat completion constrained to a JSON object; returns the raw text
    async fn complete_json(
        &self,
        system: &str,
        user: &str,
        options: &CompletionOptions,
    ) -> Result<String>;

    /// Embed each text with `model`, preserving input order
    async fn embed(&self, model: &str, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    async fn health_check(&self) -> bool;

    /// Chat model name
    fn model(&self) -> &str;

    fn host(&self) -> &str;
}

/// The configured backend.
///
/// An enum rather than `Box<dyn AIBackend>` so matchers can clone it freely.
#[derive(Clone)]
pub enum AIClient {
    Ollama(OllamaBackend),
    /// vLLM, LocalAI, llama-server or a hosted `/v1` API
    OpenAICompatible(OpenAICompatibleBackend),
    /// In-process scripted backend for tests
    Mock(MockBackend),
}

/// Run `$call` against whichever backend `$client` wraps
macro_rules! dispatch {
    ($client:expr, $backend:ident => $call:expr) => {
        match $client {
            AIClient::Ollama($backend) => $call,
            AIClient::OpenAICompatible($backend) => $call,
            AIClient::Mock($backend) => $call,
        }
    };
}

impl AIClient {
    /// Pick a backend from `AI_BACKEND` (default `ollama`).
    ///
    /// `default_model` is the chat model when the backend's model variable
    /// is unset. Returns None when the backend's host variable is missing.
    pub fn from_env(default_model: &str) -> Option<Self> {
        let backend = std::env::var("AI_BACKEND").unwrap_or_else(|_| "ollama".to_string());

        match backend.to_lowercase().as_str() {
            "ollama" => OllamaBackend::from_env(default_model).map(AIClient::Ollama),
            "openai_compatible" | "openai" | "vllm" | "localai" | "llamacpp" => {
                OpenAICompatibleBackend::from_env(default_model).map(AIClient::OpenAICompatible)
            }
            "mock" => Some(AIClient::mock()),
            other => {
                tracing::warn!(backend = other, "Unknown AI_BACKEND, using ollama");
                OllamaBackend::from_env(default_model).map(AIClient::Ollama)
            }
        }
    }

    pub fn ollama(host: &str, model: &str) -> Self {
        AIClient::Ollama(OllamaBackend::new(host, model))
    }

    pub fn openai_compatible(host: &str, model: &str) -> Self {
        AIClient::OpenAICompatible(OpenAICompatibleBackend::new(host, model))
    }

    pub fn mock() -> Self {
        AIClient::Mock(MockBackend::new())
    }

    /// Same backend and host, different chat model
    pub fn with_model(&self, model: &str) -> Self {
        match self {
            AIClient::Ollama(b) => AIClient::Ollama(b.with_model(model)),
            AIClient::OpenAICompatible(b) => AIClient::OpenAICompatible(b.with_model(model)),
            AIClient::Mock(b) => AIClient::Mock(b.with_model(model)),
        }
    }

    pub fn backend_name(&self) -> &'static str {
        match self {
            AIClient::Ollama(_) => "ollama",
            AIClient::OpenAICompatible(_) => "openai_compatible",
            AIClient::Mock(_) => "mock",
        }
    }
}

#[async_trait]
impl AIBackend for AIClient {
    async fn complete_json(
        &self,
        system: &str,
        user: &str,
        options: &CompletionOptions,
    ) -> Result<String> {
        dispatch!(self, b => b.complete_json(system, user, options).await)
    }

    async fn embed(&self, model: &str, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        dispatch!(self, b => b.embed(model, texts).await)
    }

    async fn health_check(&self) -> bool {
        dispatch!(self, b => b.health_check().await)
    }

    fn model(&self) -> &str {
        dispatch!(self, b => b.model())
    }

    fn host(&self) -> &str {
        dispatch!(self, b => b.host())
    }
}

/// One embedding model on one backend.
///
/// The semantic and embedding stages each own one, with different models,
/// so their vectors live in different spaces.
#[derive(Clone)]
pub struct TextEncoder {
    client: AIClient,
    model: String,
}

impl TextEncoder {
    pub fn new(client: AIClient, model: impl Into<String>) -> Self {
        Self {
            client,
            model: model.into(),
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub async fn encode_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let vectors = self.client.embed(&self.model, texts).await?;
        if vectors.len() != texts.len() {
            return Err(Error::InvalidData(format!(
                "Embedding model {} returned {} vectors for {} inputs",
                self.model,
                vectors.len(),
                texts.len()
            )));
        }
        Ok(vectors)
    }

    pub async fn encode(&self, text: &str) -> Result<Vec<f32>> {
        let mut vectors = self.encode_batch(&[text.to_string()]).await?;
        vectors
            .pop()
            .ok_or_else(|| Error::InvalidData("Empty embedding response".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_env_mock() {
        std::env::set_var("AI_BACKEND", "mock");
        let client = AIClient::from_env("llama3.2").unwrap();
        assert_eq!(client.backend_name(), "mock");
        std::env::remove_var("AI_BACKEND");
    }

    #[test]
    fn test_direct_constructors() {
        let client = AIClient::ollama("http://localhost:11434/", "llama3.2");
        assert_eq!(client.model(), "llama3.2");
        assert_eq!(client.host(), "http://localhost:11434");

        let client = client.with_model("qwen2.5");
        assert_eq!(client.model(), "qwen2.5");
    }

    #[tokio::test]
    async fn test_encoder_preserves_order() {
        let encoder = TextEncoder::new(AIClient::mock(), "all-minilm");
        let texts = vec!["Cash at Bank".to_string(), "Office Rent".to_string()];
        let batch = encoder.encode_batch(&texts).await.unwrap();
        assert_eq!(batch.len(), 2);
        let single = encoder.encode("Office Rent").await.unwrap();
        assert_eq!(batch[1], single);
    }

    #[tokio::test]
    async fn test_encoder_empty_batch_skips_backend() {
        let mock = MockBackend::failing();
        let encoder = TextEncoder::new(AIClient::Mock(mock.clone()), "all-minilm");
        assert!(encoder.encode_batch(&[]).await.unwrap().is_empty());
        assert_eq!(mock.embed_calls(), 0);
    }
}
