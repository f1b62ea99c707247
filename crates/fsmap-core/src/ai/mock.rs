//! Mock backend for testing
//!
//! Provides predictable completions and deterministic embeddings so the whole
//! cascade can run without a model server. Completions can be scripted per
//! test, and either capability can be switched into a failing mode.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::json;

use crate::error::{Error, Result};
use crate::normalize::normalize;

use super::{AIBackend, CompletionOptions};

/// Dimension of mock embedding vectors
pub const MOCK_EMBEDDING_DIM: usize = 64;

/// Keywords that make the mock answer "Balance Sheet"
const BALANCE_SHEET_HINTS: &[&str] = &[
    "bank", "cash", "payable", "receivable", "loan", "capital", "reserve", "asset", "debtor",
    "creditor", "deposit", "inventory", "stock", "advance", "provision", "gst", "tds",
];

/// Deterministic bag-of-trigrams embedding, unit length
///
/// The model name seeds the hash, so two models never share a vector space.
pub fn hashed_embedding(model: &str, text: &str) -> Vec<f32> {
    let mut vector = vec![0.0f32; MOCK_EMBEDDING_DIM];
    let padded: Vec<char> = format!("  {}  ", normalize(text)).chars().collect();

    for window in padded.windows(3) {
        let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
        for byte in model.bytes().chain(window.iter().collect::<String>().bytes()) {
            hash ^= u64::from(byte);
            hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
        }
        let slot = (hash % MOCK_EMBEDDING_DIM as u64) as usize;
        let sign = if (hash >> 32) & 1 == 0 { 1.0 } else { -1.0 };
        vector[slot] += sign;
    }

    let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 0.0 {
        for v in &mut vector {
            *v /= norm;
        }
    }
    vector
}

/// Canned classification for `primary_group`, keyword-driven
pub fn heuristic_classification(primary_group: &str) -> serde_json::Value {
    let text = normalize(primary_group);
    let balance_sheet = BALANCE_SHEET_HINTS.iter().any(|hint| text.contains(hint));

    if balance_sheet {
        json!({
            "fs": "Balance Sheet",
            "bs_main_category": "Assets",
            "bs_classification": "Current Assets",
            "bs_sub_classification": "Other Current Assets",
            "bs_sub_classification_2": null,
            "cf_classification": "Operating Activities",
            "cf_sub_classification": "Changes in Working Capital",
            "confidence": 0.9,
            "reasoning": "Mock: balance sheet keyword"
        })
    } else {
        json!({
            "fs": "Profit & Loss",
            "pl_classification": "Indirect Expenses",
            "pl_sub_classification": "Other expenses",
            "pl_classification_1": "D. Indirect Expenses",
            "cf_classification": "Operating Activities",
            "cf_sub_classification": "Operating Expenses",
            "expense_type": "Operating Expense",
            "confidence": 0.85,
            "reasoning": "Mock: defaulted to profit & loss"
        })
    }
}

/// Mock AI backend for testing
#[derive(Clone, Default)]
pub struct MockBackend {
    /// Whether health_check should return true
    pub healthy: bool,
    fail_completions: bool,
    fail_embeddings: bool,
    scripted: Arc<Mutex<VecDeque<String>>>,
    completion_calls: Arc<AtomicU64>,
    embed_calls: Arc<AtomicU64>,
}

impl MockBackend {
    /// Create a new mock backend (healthy by default)
    pub fn new() -> Self {
        Self {
            healthy: true,
            ..Default::default()
        }
    }

    /// Create an unhealthy mock backend
    pub fn unhealthy() -> Self {
        Self::default()
    }

    /// Create a backend whose completions and embeddings always fail
    pub fn failing() -> Self {
        Self {
            fail_completions: true,
            fail_embeddings: true,
            ..Self::default()
        }
    }

    /// Healthy embeddings, failing completions
    pub fn failing_completions() -> Self {
        Self {
            fail_completions: true,
            ..Self::new()
        }
    }

    /// Healthy completions, failing embeddings
    pub fn failing_embeddings() -> Self {
        Self {
            fail_embeddings: true,
            ..Self::new()
        }
    }

    /// Create a new instance with a different model (no-op for mock)
    pub fn with_model(&self, _model: &str) -> Self {
        self.clone()
    }

    /// Queue a raw completion; queued replies are served before the heuristic
    pub fn push_completion(&self, raw: impl Into<String>) {
        if let Ok(mut queue) = self.scripted.lock() {
            queue.push_back(raw.into());
        }
    }

    /// Number of completion requests received
    pub fn completion_calls(&self) -> u64 {
        self.completion_calls.load(Ordering::SeqCst)
    }

    /// Number of embedding requests received
    pub fn embed_calls(&self) -> u64 {
        self.embed_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AIBackend for MockBackend {
    async fn complete_json(
        &self,
        _system: &str,
        user: &str,
        _options: &CompletionOptions,
    ) -> Result<String> {
        self.completion_calls.fetch_add(1, Ordering::SeqCst);

        let scripted = self
            .scripted
            .lock()
            .map_err(|e| Error::TransientExternal(format!("Mock lock poisoned: {}", e)))?
            .pop_front();
        if let Some(raw) = scripted {
            return Ok(raw);
        }
        if self.fail_completions {
            return Err(Error::TransientExternal("Mock completion failure".into()));
        }

        // The item is the last line of the user message
        let item = user.lines().last().unwrap_or(user);
        Ok(heuristic_classification(item).to_string())
    }

    async fn embed(&self, model: &str, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        self.embed_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_embeddings {
            return Err(Error::TransientExternal("Mock embedding failure".into()));
        }
        Ok(texts.iter().map(|t| hashed_embedding(model, t)).collect())
    }

    async fn health_check(&self) -> bool {
        self.healthy
    }

    fn model(&self) -> &str {
        "mock"
    }

    fn host(&self) -> &str {
        "mock://localhost"
    }
}
