//! Test utilities for fsmap-core
//!
//! A mock LLM server speaking both the Ollama and the OpenAI-compatible
//! chat/embedding APIs, for exercising the real HTTP backends in tests.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use axum::{
    extract::{Json, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::oneshot;

use crate::ai::{hashed_embedding, heuristic_classification};

#[derive(Default)]
struct ServerState {
    failing: AtomicBool,
    requests: AtomicU64,
}

impl ServerState {
    /// Count the request; Some(error response) while failing
    fn check(&self) -> Option<Response> {
        self.requests.fetch_add(1, Ordering::SeqCst);
        self.failing.load(Ordering::SeqCst).then(|| {
            (StatusCode::INTERNAL_SERVER_ERROR, "mock failure").into_response()
        })
    }
}

/// Mock LLM server for tests
pub struct MockLlmServer {
    addr: SocketAddr,
    state: Arc<ServerState>,
    shutdown_tx: Option<oneshot::Sender<()>>,
}

impl MockLlmServer {
    /// Start the mock server on an available port
    pub async fn start() -> Self {
        let state = Arc::new(ServerState::default());
        let app = Router::new()
            .route("/api/tags", get(handle_tags))
            .route("/api/chat", post(handle_ollama_chat))
            .route("/api/embed", post(handle_ollama_embed))
            .route("/v1/models", get(handle_models))
            .route("/v1/chat/completions", post(handle_openai_chat))
            .route("/v1/embeddings", post(handle_openai_embeddings))
            .with_state(Arc::clone(&state));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    shutdown_rx.await.ok();
                })
                .await
                .unwrap();
        });

        Self {
            addr,
            state,
            shutdown_tx: Some(shutdown_tx),
        }
    }

    /// Get the base URL for this mock server
    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Make every chat and embedding endpoint answer 500
    pub fn set_failing(&self, failing: bool) {
        self.state.failing.store(failing, Ordering::SeqCst);
    }

    /// Chat and embedding requests received so far
    pub fn request_count(&self) -> u64 {
        self.state.requests.load(Ordering::SeqCst)
    }

    /// Stop the mock server
    pub fn stop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}

impl Drop for MockLlmServer {
    fn drop(&mut self) {
        self.stop();
    }
}

#[derive(Debug, Deserialize)]
struct IncomingMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatRequest {
    model: String,
    messages: Vec<IncomingMessage>,
}

#[derive(Debug, Deserialize)]
struct EmbedRequest {
    model: String,
    input: Vec<String>,
}

/// The line item is the last line of the user message
fn classify_last_user_line(messages: &[IncomingMessage]) -> String {
    let text = messages
        .iter()
        .rev()
        .find(|m| m.role == "user")
        .and_then(|m| m.content.lines().last())
        .unwrap_or_default();
    heuristic_classification(text).to_string()
}

async fn handle_tags() -> Json<Value> {
    Json(json!({ "models": [{ "name": "llama3.2:latest" }] }))
}

async fn handle_models() -> Json<Value> {
    Json(json!({ "object": "list", "data": [{ "id": "mock-model" }] }))
}

async fn handle_ollama_chat(
    State(state): State<Arc<ServerState>>,
    Json(request): Json<ChatRequest>,
) -> Response {
    if let Some(err) = state.check() {
        return err;
    }
    Json(json!({
        "model": request.model,
        "message": { "role": "assistant", "content": classify_last_user_line(&request.messages) },
        "done": true
    }))
    .into_response()
}

async fn handle_ollama_embed(
    State(state): State<Arc<ServerState>>,
    Json(request): Json<EmbedRequest>,
) -> Response {
    if let Some(err) = state.check() {
        return err;
    }
    let embeddings: Vec<Vec<f32>> = request
        .input
        .iter()
        .map(|text| hashed_embedding(&request.model, text))
        .collect();
    Json(json!({ "model": request.model, "embeddings": embeddings })).into_response()
}

async fn handle_openai_chat(
    State(state): State<Arc<ServerState>>,
    Json(request): Json<ChatRequest>,
) -> Response {
    if let Some(err) = state.check() {
        return err;
    }
    // Fenced on purpose: clients must strip markdown fences
    let content = format!("```json\n{}\n```", classify_last_user_line(&request.messages));
    Json(json!({
        "model": request.model,
        "choices": [{
            "index": 0,
            "message": { "role": "assistant", "content": content },
            "finish_reason": "stop"
        }]
    }))
    .into_response()
}

async fn handle_openai_embeddings(
    State(state): State<Arc<ServerState>>,
    Json(request): Json<EmbedRequest>,
) -> Response {
    if let Some(err) = state.check() {
        return err;
    }
    // Reverse order with explicit indexes; clients must sort by index
    let data: Vec<Value> = request
        .input
        .iter()
        .enumerate()
        .rev()
        .map(|(index, text)| {
            json!({
                "object": "embedding",
                "index": index,
                "embedding": hashed_embedding(&request.model, text)
            })
        })
        .collect();
    Json(json!({ "object": "list", "model": request.model, "data": data })).into_response()
}
