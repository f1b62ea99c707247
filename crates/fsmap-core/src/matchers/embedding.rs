//! Sentence embeddings, with import/export of the raw vectors

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::ai::TextEncoder;
use crate::error::Result;
use crate::models::{MatchResult, Method, TrainingRow};

use super::vector::{VectorIndex, VectorMatcher};
use super::vector_cache::{CacheSource, VectorCache};
use super::{Matcher, Probe, ScoredRow};

/// Cache namespace for this stage
pub const EMBEDDING_NAMESPACE: &str = "embeddings";

/// Raw vectors for external reuse
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingPayload {
    pub embeddings: Vec<Vec<f32>>,
    pub rows: Vec<TrainingRow>,
    pub primary_groups: Vec<String>,
}

/// Embedding stage: a dedicated sentence model, default threshold 0.80
#[derive(Clone)]
pub struct EmbeddingMatcher {
    inner: VectorMatcher,
}

impl EmbeddingMatcher {
    pub async fn build(
        encoder: TextEncoder,
        cache: VectorCache,
        rows: &[TrainingRow],
        threshold: f64,
    ) -> Self {
        Self {
            inner: VectorMatcher::build(Method::Embeddings, encoder, cache, rows, threshold).await,
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

    /// Current vectors, or None while degraded
    pub fn save_embeddings(&self) -> Option<EmbeddingPayload> {
        let index = self.inner.index()?;
        Some(EmbeddingPayload {
            embeddings: index.vectors().to_vec(),
            rows: index.rows().to_vec(),
            primary_groups: index.rows().iter().map(|r| r.primary_group.clone()).collect(),
        })
    }

    /// Adopt `payload` if it was computed for exactly the current corpus.
    ///
    /// Returns false, leaving the matcher untouched, when the row count or
    /// the ordered `primary_group` list differs.
    pub fn load_embeddings(&mut self, payload: EmbeddingPayload) -> bool {
        let current: Vec<&str> = self
            .inner
            .rows()
            .iter()
            .map(|r| r.primary_group.as_str())
            .collect();
        if payload.primary_groups.len() != current.len()
            || payload.embeddings.len() != current.len()
            || payload.rows.len() != current.len()
        {
            debug!(
                payload = payload.primary_groups.len(),
                corpus = current.len(),
                "Embedding payload size mismatch"
            );
            return false;
        }
        if payload
            .primary_groups
            .iter()
            .zip(&current)
            .any(|(a, b)| a != b)
        {
            debug!("Embedding payload rows differ from corpus");
            return false;
        }

        match VectorIndex::new(payload.rows, payload.embeddings) {
            Ok(index) => {
                self.inner.install(index, CacheSource::Payload);
                true
            }
            Err(e) => {
                warn!(error = %e, "Rejected embedding payload");
                false
            }
        }
    }
}

#[async_trait]
impl Matcher for EmbeddingMatcher {
    fn method(&self) -> Method {
        Method::Embeddings
    }

    async fn probe(&self, text: &str) -> Probe {
        self.inner.probe(text).await
    }
}
