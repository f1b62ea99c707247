//! Cosine-similarity matching over cached corpus vectors
//!
//! Shared by the semantic and embedding stages, which differ only in the
//! embedding model, the cache namespace and the default threshold.

use std::collections::HashMap;

use chrono::Utc;
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use crate::ai::TextEncoder;
use crate::error::{Error, Result};
use crate::models::{MatchResult, Method, TrainingRow};

use super::vector_cache::{CacheLoad, CacheSource, CachedVectors, VectorCache};
use super::{judge, top_n, Probe, ScoredRow};

/// Cosine similarity accumulated in f64; None for empty, mismatched or zero vectors
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> Option<f64> {
    if a.len() != b.len() || a.is_empty() {
        return None;
    }

    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;
    for (&x, &y) in a.iter().zip(b.iter()) {
        let x64 = f64::from(x);
        let y64 = f64::from(y);
        dot += x64 * y64;
        norm_a += x64 * x64;
        norm_b += y64 * y64;
    }
    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom <= f64::EPSILON {
        return None;
    }
    Some(dot / denom)
}

/// Hex SHA-256 of the sorted `primary_group` values
///
/// Row order does not matter; any change to any name changes the key.
pub fn corpus_fingerprint(rows: &[TrainingRow]) -> String {
    let mut names: Vec<&str> = rows.iter().map(|r| r.primary_group.as_str()).collect();
    names.sort_unstable();
    let mut hasher = Sha256::new();
    for name in names {
        hasher.update(name.as_bytes());
        hasher.update(b"\n");
    }
    hex::encode(hasher.finalize())
}

/// Corpus rows paired with their vectors
#[derive(Debug, Clone, PartialEq)]
pub struct VectorIndex {
    rows: Vec<TrainingRow>,
    vectors: Vec<Vec<f32>>,
    fingerprint: String,
}

impl VectorIndex {
    pub fn new(rows: Vec<TrainingRow>, vectors: Vec<Vec<f32>>) -> Result<Self> {
        if rows.len() != vectors.len() {
            return Err(Error::InvalidData(format!(
                "{} vectors for {} rows",
                vectors.len(),
                rows.len()
            )));
        }
        let fingerprint = corpus_fingerprint(&rows);
        Ok(Self {
            rows,
            vectors,
            fingerprint,
        })
    }

    pub fn rows(&self) -> &[TrainingRow] {
        &self.rows
    }

    pub fn vectors(&self) -> &[Vec<f32>] {
        &self.vectors
    }

    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Index and similarity of the closest row; first seen wins ties
    pub fn best(&self, query: &[f32]) -> Option<(usize, f64)> {
        let mut best: Option<(usize, f64)> = None;
        for (i, vector) in self.vectors.iter().enumerate() {
            let Some(sim) = cosine_similarity(query, vector) else {
                continue;
            };
            if best.map_or(true, |(_, top)| sim > top) {
                best = Some((i, sim));
            }
        }
        best
    }

    pub fn top(&self, query: &[f32], n: usize) -> Vec<ScoredRow> {
        let scored = self
            .rows
            .iter()
            .zip(&self.vectors)
            .filter_map(|(row, vector)| {
                cosine_similarity(query, vector).map(|score| ScoredRow {
                    primary_group: row.primary_group.clone(),
                    fs: row.fs,
                    score,
                })
            })
            .collect();
        top_n(scored, n)
    }

    fn to_cached(&self, model: &str) -> CachedVectors {
        CachedVectors {
            model: model.to_string(),
            fingerprint: self.fingerprint.clone(),
            primary_groups: self.rows.iter().map(|r| r.primary_group.clone()).collect(),
            vectors: self.vectors.clone(),
            rows: self.rows.clone(),
            created_at: Utc::now(),
        }
    }
}

/// Vectors from a cache hit, re-aligned to the current row order
///
/// The fingerprint only covers names, so the current rows (not the cached
/// snapshots) supply the classification columns.
fn align_cached(rows: &[TrainingRow], cached: CachedVectors) -> Option<VectorIndex> {
    let by_name: HashMap<String, Vec<f32>> = cached
        .primary_groups
        .into_iter()
        .zip(cached.vectors)
        .collect();
    let vectors = rows
        .iter()
        .map(|r| by_name.get(&r.primary_group).cloned())
        .collect::<Option<Vec<_>>>()?;
    VectorIndex::new(rows.to_vec(), vectors).ok()
}

/// Cosine matcher that owns an encoder, a cache and the current index
#[derive(Clone)]
pub struct VectorMatcher {
    method: Method,
    encoder: TextEncoder,
    cache: VectorCache,
    threshold: f64,
    rows: Vec<TrainingRow>,
    index: std::result::Result<VectorIndex, String>,
    last_source: Option<CacheSource>,
}

impl VectorMatcher {
    /// Build the index for `rows`, reading or writing the cache.
    ///
    /// Never fails: if encoding is impossible the matcher starts degraded
    /// and reports that on every probe.
    pub async fn build(
        method: Method,
        encoder: TextEncoder,
        cache: VectorCache,
        rows: &[TrainingRow],
        threshold: f64,
    ) -> Self {
        let mut matcher = Self {
            method,
            encoder,
            cache,
            threshold,
            rows: Vec::new(),
            index: Err("not built".to_string()),
            last_source: None,
        };
        if let Err(e) = matcher.refresh(rows).await {
            warn!(method = %method, error = %e, "Vector matcher unavailable");
        }
        matcher
    }

    /// Rebuild for a new corpus; a cache hit avoids re-encoding
    pub async fn refresh(&mut self, rows: &[TrainingRow]) -> Result<CacheSource> {
        self.rows = rows.to_vec();
        match self.compute_index(rows).await {
            Ok((index, source)) => {
                self.index = Ok(index);
                self.last_source = Some(source.clone());
                Ok(source)
            }
            Err(e) => {
                self.index = Err(e.to_string());
                self.last_source = None;
                Err(e)
            }
        }
    }

    async fn compute_index(&self, rows: &[TrainingRow]) -> Result<(VectorIndex, CacheSource)> {
        let fingerprint = corpus_fingerprint(rows);
        let model = self.encoder.model();

        let source = match self.cache.load(&fingerprint, model) {
            CacheLoad::Hit(cached) => match align_cached(rows, cached) {
                Some(index) => {
                    debug!(method = %self.method, rows = index.len(), "Vector cache hit");
                    return Ok((index, CacheSource::CacheHit));
                }
                None => CacheSource::ComputedAfterUnreadable(
                    "cached names do not cover the corpus".to_string(),
                ),
            },
            CacheLoad::Miss => CacheSource::ComputedOnMiss,
            CacheLoad::Unreadable(reason) => {
                warn!(method = %self.method, %reason, "Vector cache unreadable, recomputing");
                CacheSource::ComputedAfterUnreadable(reason)
            }
        };

        let texts: Vec<String> = rows.iter().map(|r| r.primary_group.clone()).collect();
        let vectors = self.encoder.encode_batch(&texts).await?;
        let index = VectorIndex::new(rows.to_vec(), vectors)?;

        match self.cache.save(&index.to_cached(model)) {
            Ok(Some(path)) => info!(
                method = %self.method,
                rows = index.len(),
                path = %path.display(),
                "Wrote vector cache"
            ),
            Ok(None) => {}
            Err(e) => warn!(method = %self.method, error = %e, "Vector cache write failed"),
        }
        Ok((index, source))
    }

    pub fn method(&self) -> Method {
        self.method
    }

    pub fn model(&self) -> &str {
        self.encoder.model()
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    pub fn set_threshold(&mut self, threshold: f64) {
        self.threshold = threshold;
    }

    /// Current corpus rows (kept even while degraded)
    pub fn rows(&self) -> &[TrainingRow] {
        &self.rows
    }

    pub fn index(&self) -> Option<&VectorIndex> {
        self.index.as_ref().ok()
    }

    /// How the current index was obtained
    pub fn last_source(&self) -> Option<&CacheSource> {
        self.last_source.as_ref()
    }

    /// Install an externally supplied index, bypassing the encoder
    pub(crate) fn install(&mut self, index: VectorIndex, source: CacheSource) {
        self.index = Ok(index);
        self.last_source = Some(source);
    }

    pub async fn probe(&self, text: &str) -> Probe {
        let index = match &self.index {
            Ok(index) => index,
            Err(reason) => return Probe::Degraded(reason.clone()),
        };
        if index.is_empty() {
            return Probe::Empty;
        }
        let query = match self.encoder.encode(text.trim()).await {
            Ok(query) => query,
            Err(e) => {
                warn!(method = %self.method, error = %e, "Failed to encode input");
                return Probe::Degraded(e.to_string());
            }
        };
        match index.best(&query) {
            Some((i, sim)) => judge(MatchResult::from_row(&index.rows[i], sim), self.threshold),
            None => Probe::Empty,
        }
    }

    pub async fn match_text(&self, text: &str) -> Option<MatchResult> {
        self.probe(text).await.into_match()
    }

    pub async fn top_matches(&self, text: &str, n: usize) -> Result<Vec<ScoredRow>> {
        let index = self
            .index
            .as_ref()
            .map_err(|reason| Error::TransientExternal(reason.clone()))?;
        if index.is_empty() {
            return Ok(Vec::new());
        }
        let query = self.encoder.encode(text.trim()).await?;
        Ok(index.top(&query, n))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::{AIClient, MockBackend};
    use crate::models::FsKind;
    use tempfile::TempDir;

    fn rows() -> Vec<TrainingRow> {
        vec![
            TrainingRow::new("Cash at Bank", FsKind::BalanceSheet),
            TrainingRow::new("Office Rent", FsKind::ProfitAndLoss),
            TrainingRow::new("Trade Payables", FsKind::BalanceSheet),
        ]
    }

    fn encoder(mock: &MockBackend) -> TextEncoder {
        TextEncoder::new(AIClient::Mock(mock.clone()), "all-minilm")
    }

    #[test]
    fn test_cosine() {
        assert_eq!(cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]), Some(1.0));
        assert_eq!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]), Some(0.0));
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 0.0]), None);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), None);
    }

    #[test]
    fn test_fingerprint_ignores_order_but_not_text() {
        let mut reversed = rows();
        reversed.reverse();
        assert_eq!(corpus_fingerprint(&rows()), corpus_fingerprint(&reversed));

        let mut edited = rows();
        edited[1].primary_group = "Office Rent Paid".into();
        assert_ne!(corpus_fingerprint(&rows()), corpus_fingerprint(&edited));
    }

    #[tokio::test]
    async fn test_build_then_hit_cache() {
        let dir = TempDir::new().unwrap();
        let mock = MockBackend::new();
        let cache = VectorCache::new(dir.path(), "embeddings");

        let first =
            VectorMatcher::build(Method::Embeddings, encoder(&mock), cache.clone(), &rows(), 0.8)
                .await;
        assert_eq!(first.last_source(), Some(&CacheSource::ComputedOnMiss));
        let calls_after_first = mock.embed_calls();

        let second =
            VectorMatcher::build(Method::Embeddings, encoder(&mock), cache, &rows(), 0.8).await;
        assert_eq!(second.last_source(), Some(&CacheSource::CacheHit));
        assert_eq!(mock.embed_calls(), calls_after_first);

        let a = first.probe("cash at bank").await;
        let b = second.probe("cash at bank").await;
        assert_eq!(a, b);
        assert!(matches!(a, Probe::Match(_)));
    }

    #[tokio::test]
    async fn test_degraded_when_encoder_fails() {
        let matcher = VectorMatcher::build(
            Method::Semantic,
            encoder(&MockBackend::failing_embeddings()),
            VectorCache::disabled("semantic"),
            &rows(),
            0.85,
        )
        .await;
        assert!(matcher.index().is_none());
        assert!(matches!(matcher.probe("Rent").await, Probe::Degraded(_)));
        assert!(matcher.top_matches("Rent", 5).await.is_err());
    }

    #[tokio::test]
    async fn test_empty_corpus_is_empty_probe() {
        let matcher = VectorMatcher::build(
            Method::Semantic,
            encoder(&MockBackend::new()),
            VectorCache::disabled("semantic"),
            &[],
            0.85,
        )
        .await;
        assert_eq!(matcher.probe("Rent").await, Probe::Empty);
    }

    #[tokio::test]
    async fn test_cache_hit_uses_current_columns() {
        let dir = TempDir::new().unwrap();
        let cache = VectorCache::new(dir.path(), "semantic");
        let mock = MockBackend::new();
        VectorMatcher::build(Method::Semantic, encoder(&mock), cache.clone(), &rows(), 0.5).await;

        let mut changed = rows();
        changed[1].fs = FsKind::BalanceSheet;
        let matcher =
            VectorMatcher::build(Method::Semantic, encoder(&mock), cache, &changed, 0.5).await;
        assert_eq!(matcher.last_source(), Some(&CacheSource::CacheHit));
        let result = matcher.match_text("Office Rent").await.unwrap();
        assert_eq!(result.predicted_fs, FsKind::BalanceSheet);
    }
}
