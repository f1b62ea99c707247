//! The five classification strategies of the cascade
//!
//! Every matcher answers a probe with the same [`Probe`] shape, so the
//! orchestrator can walk the stages in order without knowing how each one
//! scores. Exact and fuzzy are pure in-memory scans; semantic and embedding
//! encode the input through an embedding model and compare against a cached
//! vector index; the generative matcher is terminal and always answers.

mod embedding;
mod exact;
mod fuzzy;
mod llm;
mod semantic;
mod vector;
pub mod vector_cache;

pub use embedding::{EmbeddingMatcher, EmbeddingPayload, EMBEDDING_NAMESPACE};
pub use exact::ExactMatcher;
pub use fuzzy::FuzzyMatcher;
pub use llm::{LlmMatcher, LlmOutcome, FALLBACK_REASONING, LLM_FAILED_ROW, LLM_ROW};
pub use semantic::{SemanticMatcher, SEMANTIC_NAMESPACE};
pub use vector::{cosine_similarity, corpus_fingerprint, VectorIndex, VectorMatcher};
pub use vector_cache::{CacheLoad, CacheSource, VectorCache};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::models::{FsKind, MatchResult, Method};

/// Default size of `top_matches` diagnostics
pub const DEFAULT_TOP_N: usize = 5;

/// Answer of one matcher for one input
#[derive(Debug, Clone, PartialEq)]
pub enum Probe {
    /// Best candidate cleared the matcher's own threshold
    Match(MatchResult),
    /// Best candidate did not clear the threshold
    Below(MatchResult),
    /// Nothing to compare against, or no key hit
    Empty,
    /// The matcher could not run
    Degraded(String),
}

impl Probe {
    /// The accepted result, if any
    pub fn into_match(self) -> Option<MatchResult> {
        match self {
            Probe::Match(result) => Some(result),
            _ => None,
        }
    }
}

/// A cascade stage that may decline to answer
#[async_trait]
pub trait Matcher: Send + Sync {
    fn method(&self) -> Method;

    async fn probe(&self, text: &str) -> Probe;
}

/// One row of a `top_matches` diagnostic
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredRow {
    pub primary_group: String,
    pub fs: FsKind,
    pub score: f64,
}

/// Keep the best `n` by descending score; ties keep corpus order
pub(crate) fn top_n(mut scored: Vec<ScoredRow>, n: usize) -> Vec<ScoredRow> {
    scored.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    scored.truncate(n);
    scored
}

/// Classify a best candidate against a threshold
pub(crate) fn judge(result: MatchResult, threshold: f64) -> Probe {
    if result.confidence >= threshold {
        Probe::Match(result)
    } else {
        Probe::Below(result)
    }
}
