//! Backend for servers speaking the OpenAI `/v1` API
//!
//! vLLM, LocalAI, llama-server and hosted OpenAI-style endpoints all work.
//! Chat uses `response_format: json_object`; embeddings come back tagged
//! with their input index and are re-sorted before returning.
//!
//! ```text
//! export AI_BACKEND=openai_compatible
//! export OPENAI_COMPATIBLE_HOST="http://192.168.1.100:8000"
//! export OPENAI_COMPATIBLE_MODEL="meta-llama/Llama-3.2-3B-Instruct"
//! ```

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Error, Result};

use super::{http, AIBackend, CompletionOptions};

#[derive(Clone)]
pub struct OpenAICompatibleBackend {
    http_client: Client,
    base_url: String,
    model: String,
    api_key: Option<String>,
}

impl OpenAICompatibleBackend {
    pub fn new(base_url: &str, model: &str) -> Self {
        Self {
            http_client: http::client(),
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
            api_key: None,
        }
    }

    pub fn with_api_key(base_url: &str, model: &str, api_key: &str) -> Self {
        Self {
            api_key: Some(api_key.to_string()),
            ..Self::new(base_url, model)
        }
    }

    pub fn with_model(&self, model: &str) -> Self {
        Self {
            model: model.to_string(),
            ..self.clone()
        }
    }

    /// `OPENAI_COMPATIBLE_HOST` is required; the model falls back to
    /// `default_model` and the API key is optional
    pub fn from_env(default_model: &str) -> Option<Self> {
        let host = std::env::var("OPENAI_COMPATIBLE_HOST").ok()?;
        let model = std::env::var("OPENAI_COMPATIBLE_MODEL")
            .unwrap_or_else(|_| default_model.to_string());
        Some(Self {
            api_key: std::env::var("OPENAI_COMPATIBLE_API_KEY").ok(),
            ..Self::new(&host, &model)
        })
    }

    fn request(&self, builder: RequestBuilder) -> RequestBuilder {
        match &self.api_key {
            Some(key) => builder.bearer_auth(key),
            None => builder,
        }
    }

    fn post(&self, path: &str) -> RequestBuilder {
        self.request(self.http_client.post(format!("{}{}", self.base_url, path)))
    }
}

#[derive(Debug, Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 2],
    temperature: f32,
    max_tokens: u32,
    response_format: ResponseFormat,
    stream: bool,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ReplyMessage,
}

#[derive(Debug, Deserialize)]
struct ReplyMessage {
    content: Option<String>,
}

#[derive(Debug, Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
    #[serde(default)]
    index: usize,
}

#[async_trait]
impl AIBackend for OpenAICompatibleBackend {
    async fn complete_json(
        &self,
        system: &str,
        user: &str,
        options: &CompletionOptions,
    ) -> Result<String> {
        let request = ChatCompletionRequest {
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
            temperature: options.temperature,
            max_tokens: options.max_tokens,
            response_format: ResponseFormat {
                kind: "json_object",
            },
            stream: false,
        };

        let reply: ChatCompletionResponse =
            http::send_json(self.post("/v1/chat/completions"), &request, "Chat completion").await?;
        let content = reply
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| Error::TransientExternal("Chat completion had no content".into()))?;
        debug!(model = %self.model, "Chat completion reply: {}", content);
        Ok(content)
    }

    async fn embed(&self, model: &str, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut reply: EmbeddingResponse = http::send_json(
            self.post("/v1/embeddings"),
            &EmbeddingRequest { model, input: texts },
            "Embeddings",
        )
        .await?;
        reply.data.sort_by_key(|d| d.index);
        Ok(reply.data.into_iter().map(|d| d.embedding).collect())
    }

    async fn health_check(&self) -> bool {
        let listing = self
            .http_client
            .get(format!("{}/v1/models", self.base_url));
        http::probe(self.request(listing)).await
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn host(&self) -> &str {
        &self.base_url
    }
}
