//! General-purpose phrase embeddings

use async_trait::async_trait;

use crate::ai::TextEncoder;
use crate::error::Result;
use crate::models::{MatchResult, Method, TrainingRow};

use super::vector::VectorMatcher;
use super::vector_cache::{CacheSource, VectorCache};
use super::{Matcher, Probe, ScoredRow};

/// Cache namespace for this stage
pub const SEMANTIC_NAMESPACE: &str = "semantic";

/// Semantic stage: a general-purpose embedding model, default threshold 0.85
#[derive(Clone)]
pub struct SemanticMatcher {
    inner: VectorMatcher,
}

impl SemanticMatcher {
    pub async fn build(
        encoder: TextEncoder,
        cache: VectorCache,
        rows: &[TrainingRow],
        threshold: f64,
    ) -> Self {
        Self {
            inner: VectorMatcher::build(Method::Semantic, encoder, cache, rows, threshold).await,
        }
    }

    pub async fn refresh(&mut self, rows: &[TrainingRow]) -> Result<CacheSource> {
        self.inner.refresh(rows).await
    }

    pub fn set_threshold(&mut self, threshold: f64) {
        self.inner.set_threshold(threshold);
    }

    pub fn last_source(&self) -> Option<&CacheSource> {
        self.inner.last_source()
    }

    pub fn is_ready(&self) -> bool {
        self.inner.index().is_some()
    }

    pub fn model(&self) -> &str {
        self.inner.model()
    }

    pub async fn match_text(&self, text: &str) -> Option<MatchResult> {
        self.inner.match_text(text).await
    }

    pub async fn top_matches(&self, text: &str, n: usize) -> Result<Vec<ScoredRow>> {
        self.inner.top_matches(text, n).await
    }
}

#[async_trait]
impl Matcher for SemanticMatcher {
    fn method(&self) -> Method {
        Method::Semantic
    }

    async fn probe(&self, text: &str) -> Probe {
        self.inner.probe(text).await
    }
}
