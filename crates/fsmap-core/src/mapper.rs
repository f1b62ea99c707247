//! Cascade orchestrator
//!
//! # Architecture
//!
//! ```text
//! input ─► exact ─► fuzzy ─► semantic ─► embeddings ─► llm
//!            │        │         │            │          │
//!            └────────┴─────────┴────────────┴──────────┴─► ClassificationRecord
//! ```
//!
//! Each stage either clears its threshold and ends the cascade or hands the
//! input to the next one. The generative stage is terminal and always
//! answers. The review threshold is applied afterwards to whichever result
//! won and never affects branching.
//!
//! Classification takes `&self`, so a single mapper behind an `Arc` can serve
//! any number of concurrent workers. Corpus refreshes, threshold changes and
//! domain changes take `&mut self` and therefore cannot overlap with
//! in-flight classification.

use std::sync::{Arc, Mutex, MutexGuard};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::ai::{AIClient, TextEncoder};
use crate::corpus::{CorpusSource, CorpusStats, TrainingCorpus, ValidationReport};
use crate::error::Result;
use crate::matchers::{
    CacheSource, EmbeddingMatcher, EmbeddingPayload, ExactMatcher, FuzzyMatcher, LlmMatcher,
    LlmOutcome, Matcher, Probe, ScoredRow, SemanticMatcher, VectorCache, EMBEDDING_NAMESPACE,
    SEMANTIC_NAMESPACE,
};
use crate::models::{
    ClassificationRecord, DecisionStep, MatchResult, Method, SessionStats, StageOutcome,
    TrainingRow,
};
use crate::normalize::opposite_fs;
use crate::prompts::PromptLibrary;
use crate::settings::{MapperConfig, Thresholds};

/// Result of a corpus refresh or of adding a training example
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RefreshStatus {
    pub total_rows: usize,
    /// False when the re-read corpus was identical and nothing was rebuilt
    pub changed: bool,
    pub report: ValidationReport,
    /// How each vector index was obtained; None if it is degraded or untouched
    pub semantic: Option<CacheSource>,
    pub embedding: Option<CacheSource>,
}

/// Per-stage candidates for one input
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopMatches {
    pub fuzzy: Vec<ScoredRow>,
    /// None while the stage is degraded
    pub semantic: Option<Vec<ScoredRow>>,
    pub embedding: Option<Vec<ScoredRow>>,
}

/// The five-stage classifier over one training corpus
pub struct AccountMapper {
    corpus: TrainingCorpus,
    config: MapperConfig,
    exact: ExactMatcher,
    fuzzy: FuzzyMatcher,
    semantic: SemanticMatcher,
    embedding: EmbeddingMatcher,
    llm: LlmMatcher,
    stats: Mutex<SessionStats>,
}

impl AccountMapper {
    /// Build every matcher for `corpus`.
    ///
    /// Exact, fuzzy and generative matchers are cheap and built inline. The
    /// two vector matchers each read their cache or encode the whole corpus,
    /// so they are built concurrently on runtime worker threads and awaited
    /// before the mapper is returned.
    pub async fn build(corpus: TrainingCorpus, config: MapperConfig, ai: AIClient) -> Result<Self> {
        config.thresholds.validate()?;
        let rows = corpus.rows();

        let exact = ExactMatcher::new(rows);
        let fuzzy = FuzzyMatcher::new(rows, config.thresholds.fuzzy);
        let prompts = PromptLibrary::new();
        let llm = LlmMatcher::from_library(ai.clone(), &config.llm, &prompts)?;

        let shared: Arc<[TrainingRow]> = rows.into();
        let semantic_task = {
            let rows = Arc::clone(&shared);
            let encoder = TextEncoder::new(ai.clone(), config.vectors.semantic_model.clone());
            let cache = VectorCache::new(config.vectors.cache_dir.clone(), SEMANTIC_NAMESPACE);
            let threshold = config.thresholds.semantic;
            tokio::spawn(
                async move { SemanticMatcher::build(encoder, cache, &rows, threshold).await },
            )
        };
        let embedding_task = {
            let rows = Arc::clone(&shared);
            let encoder = TextEncoder::new(ai.clone(), config.vectors.embedding_model.clone());
            let cache = VectorCache::new(config.vectors.cache_dir.clone(), EMBEDDING_NAMESPACE);
            let threshold = config.thresholds.embeddings;
            tokio::spawn(
                async move { EmbeddingMatcher::build(encoder, cache, &rows, threshold).await },
            )
        };
        let semantic = semantic_task.await?;
        let embedding = embedding_task.await?;

        info!(
            rows = corpus.len(),
            backend = ai.backend_name(),
            semantic_ready = semantic.is_ready(),
            embedding_ready = embedding.is_ready(),
            "Mapper ready"
        );

        Ok(Self {
            corpus,
            config,
            exact,
            fuzzy,
            semantic,
            embedding,
            llm,
            stats: Mutex::new(SessionStats::default()),
        })
    }

    /// Load the corpus from `source`, then build
    pub async fn from_source(
        source: &dyn CorpusSource,
        config: MapperConfig,
        ai: AIClient,
    ) -> Result<Self> {
        let (corpus, _) = TrainingCorpus::load(source)?;
        Self::build(corpus, config, ai).await
    }

    /// Run the cascade for one input.
    ///
    /// With `with_trail` the record carries one [`DecisionStep`] per stage
    /// visited; otherwise the trail is dropped.
    pub async fn classify_one(&self, text: &str, with_trail: bool) -> ClassificationRecord {
        let thresholds = self.config.thresholds;
        let stages: [&dyn Matcher; 4] = [&self.exact, &self.fuzzy, &self.semantic, &self.embedding];
        let mut trail = Vec::with_capacity(Method::all().len());

        for stage in stages {
            let method = stage.method();
            let threshold = thresholds.for_method(method);
            let (outcome, result) = match stage.probe(text).await {
                Probe::Match(result) | Probe::Below(result) => {
                    if result.confidence >= threshold {
                        (StageOutcome::Matched, Some(result))
                    } else {
                        (StageOutcome::BelowThreshold, Some(result))
                    }
                }
                Probe::Empty => (StageOutcome::NoCandidate, None),
                Probe::Degraded(reason) => (StageOutcome::Degraded(reason), None),
            };
            debug!(
                method = %method,
                confidence = result.as_ref().map(|r| r.confidence),
                threshold,
                outcome = ?outcome,
                "Cascade stage"
            );

            let matched = outcome == StageOutcome::Matched;
            trail.push(DecisionStep {
                method,
                outcome,
                result: result.clone(),
            });
            if let (true, Some(result)) = (matched, result) {
                return self.finish(text, method, result, trail, with_trail);
            }
        }

        let (result, llm_outcome) = self.llm.classify(text).await;
        let outcome = match &llm_outcome {
            LlmOutcome::Answered { .. } => StageOutcome::Matched,
            LlmOutcome::FellBack { last_error, .. } => StageOutcome::Degraded(last_error.clone()),
        };
        debug!(
            method = %Method::Llm,
            confidence = result.confidence,
            outcome = ?llm_outcome,
            "Cascade stage"
        );
        trail.push(DecisionStep {
            method: Method::Llm,
            outcome,
            result: Some(result.clone()),
        });
        self.finish(text, Method::Llm, result, trail, with_trail)
    }

    fn finish(
        &self,
        text: &str,
        method: Method,
        result: MatchResult,
        trail: Vec<DecisionStep>,
        with_trail: bool,
    ) -> ClassificationRecord {
        let needs_review = result.confidence < self.config.thresholds.review;

        {
            let mut stats = self.lock_stats();
            stats.predictions_made += 1;
            stats.method_distribution.record(method);
            if needs_review {
                stats.needs_review_count += 1;
            }
            if method == Method::Llm {
                stats.llm_call_count += 1;
            }
        }

        let matched_training_row = result.matched_training_row.clone().or_else(|| {
            result
                .matched_row
                .as_ref()
                .map(|row| row.primary_group.clone())
        });

        ClassificationRecord {
            primary_group: text.to_string(),
            predicted_fs: result.predicted_fs,
            confidence: result.confidence,
            method_used: method,
            matched_training_row,
            needs_review,
            low_confidence_alternative: needs_review.then(|| opposite_fs(result.predicted_fs)),
            reasoning: result.reasoning,
            columns: result.predicted_columns,
            matched_row_full: result.matched_row,
            decision_trail: with_trail.then_some(trail),
        }
    }

    fn lock_stats(&self) -> MutexGuard<'_, SessionStats> {
        self.stats.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Session counters, including the generative matcher's own
    pub fn session_stats(&self) -> SessionStats {
        let mut stats = self.lock_stats().clone();
        stats.llm_stats = self.llm.stats();
        stats
    }

    pub fn reset_session_stats(&self) {
        *self.lock_stats() = SessionStats::default();
        self.llm.reset_stats();
    }

    pub fn corpus(&self) -> &TrainingCorpus {
        &self.corpus
    }

    pub fn config(&self) -> &MapperConfig {
        &self.config
    }

    pub fn training_stats(&self) -> CorpusStats {
        self.corpus.stats()
    }

    pub fn search_training_data(&self, query: &str) -> Vec<&TrainingRow> {
        self.corpus.search(query)
    }

    pub fn thresholds(&self) -> Thresholds {
        self.config.thresholds
    }

    /// Replace all stage thresholds; rejected values leave the old ones in place
    pub fn set_thresholds(&mut self, thresholds: Thresholds) -> Result<()> {
        thresholds.validate()?;
        self.fuzzy.set_threshold(thresholds.fuzzy);
        self.semantic.set_threshold(thresholds.semantic);
        self.embedding.set_threshold(thresholds.embeddings);
        self.config.thresholds = thresholds;
        info!(
            exact = thresholds.exact,
            fuzzy = thresholds.fuzzy,
            semantic = thresholds.semantic,
            embeddings = thresholds.embeddings,
            review = thresholds.review,
            "Updated thresholds"
        );
        Ok(())
    }

    pub fn domain(&self) -> &str {
        self.llm.domain()
    }

    /// Switch the business domain used by the generative stage
    pub fn update_domain(&mut self, domain: &str) {
        self.llm.update_domain(domain);
        self.config.llm.domain = domain.to_string();
    }

    pub fn llm(&self) -> &LlmMatcher {
        &self.llm
    }

    pub fn semantic(&self) -> &SemanticMatcher {
        &self.semantic
    }

    pub fn embedding(&self) -> &EmbeddingMatcher {
        &self.embedding
    }

    /// Re-read the corpus from `source` and rebuild every matcher.
    ///
    /// Without `force`, an unchanged corpus is kept as is and nothing is
    /// rebuilt. A corpus that fails validation is rejected and the current
    /// one stays active.
    pub async fn refresh_corpus(
        &mut self,
        source: &dyn CorpusSource,
        force: bool,
    ) -> Result<RefreshStatus> {
        let (corpus, report) = TrainingCorpus::load(source)?;
        if !force && corpus.rows() == self.corpus.rows() {
            debug!(rows = corpus.len(), "Corpus unchanged, keeping matchers");
            return Ok(RefreshStatus {
                total_rows: self.corpus.len(),
                changed: false,
                report,
                semantic: self.semantic.last_source().cloned(),
                embedding: self.embedding.last_source().cloned(),
            });
        }
        Ok(self.replace_corpus(corpus, report).await)
    }

    /// Install `corpus` and rebuild every matcher from it
    pub async fn replace_corpus(
        &mut self,
        corpus: TrainingCorpus,
        report: ValidationReport,
    ) -> RefreshStatus {
        let rows = corpus.rows();
        self.exact.refresh(rows);
        self.fuzzy.refresh(rows);

        let (semantic, embedding) =
            tokio::join!(self.semantic.refresh(rows), self.embedding.refresh(rows));
        let semantic = semantic
            .map_err(|e| warn!(error = %e, "Semantic matcher degraded after refresh"))
            .ok();
        let embedding = embedding
            .map_err(|e| warn!(error = %e, "Embedding matcher degraded after refresh"))
            .ok();

        info!(rows = corpus.len(), "Rebuilt matchers");
        self.corpus = corpus;
        RefreshStatus {
            total_rows: self.corpus.len(),
            changed: true,
            report,
            semantic,
            embedding,
        }
    }

    /// Persist a new labeled example to `source` and rebuild from it.
    ///
    /// Fails without side effects on an empty name, an invalid `fs` label or
    /// a name that already exists after normalization.
    pub async fn add_training_example(
        &mut self,
        source: &dyn CorpusSource,
        primary_group: &str,
        fs: &str,
    ) -> Result<RefreshStatus> {
        let row = self.corpus.prepare_row(primary_group, fs)?;
        source.append_row(&row)?;
        info!(
            primary_group = %row.primary_group,
            fs = %row.fs,
            source = %source.describe(),
            "Added training example"
        );
        self.refresh_corpus(source, true).await
    }

    /// Best `n` candidates from each scoring stage
    pub async fn top_matches(&self, text: &str, n: usize) -> TopMatches {
        let fuzzy = self.fuzzy.top_matches(text, n);
        let (semantic, embedding) = tokio::join!(
            self.semantic.top_matches(text, n),
            self.embedding.top_matches(text, n)
        );
        TopMatches {
            fuzzy,
            semantic: semantic
                .map_err(|e| debug!(error = %e, "No semantic candidates"))
                .ok(),
            embedding: embedding
                .map_err(|e| debug!(error = %e, "No embedding candidates"))
                .ok(),
        }
    }

    pub fn save_embeddings(&self) -> Option<EmbeddingPayload> {
        self.embedding.save_embeddings()
    }

    pub fn load_embeddings(&mut self, payload: EmbeddingPayload) -> bool {
        self.embedding.load_embeddings(payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::MockBackend;
    use crate::matchers::{FALLBACK_REASONING, LLM_FAILED_ROW, LLM_ROW};
    use crate::models::{FsKind, EQUITY_PLACEHOLDER};
    use std::time::Duration;
    use tempfile::TempDir;

    fn corpus() -> TrainingCorpus {
        TrainingCorpus::new(vec![
            TrainingRow::new("Cash at Bank", FsKind::BalanceSheet),
            TrainingRow::new("Office Rent", FsKind::ProfitAndLoss),
            TrainingRow::new("Sundry Creditors", FsKind::BalanceSheet),
        ])
    }

    fn config(cache: &TempDir) -> MapperConfig {
        let mut config = MapperConfig::default();
        config.vectors.cache_dir = cache.path().to_path_buf();
        config.llm.retry_base_delay = Duration::from_millis(1);
        config
    }

    #[tokio::test]
    async fn test_exact_hit_ends_cascade() {
        let dir = TempDir::new().unwrap();
        let mapper = AccountMapper::build(corpus(), config(&dir), AIClient::mock())
            .await
            .unwrap();

        let record = mapper.classify_one("  cash AT bank ", true).await;
        assert_eq!(record.method_used, Method::Exact);
        assert_eq!(record.confidence, 1.0);
        assert!(!record.needs_review);
        assert!(record.low_confidence_alternative.is_none());
        assert_eq!(record.matched_training_row.as_deref(), Some("Cash at Bank"));
        assert_eq!(record.primary_group, "  cash AT bank ");

        let trail = record.decision_trail.unwrap();
        assert_eq!(trail.len(), 1);
        assert_eq!(trail[0].outcome, StageOutcome::Matched);
    }

    #[tokio::test]
    async fn test_trail_dropped_unless_requested() {
        let dir = TempDir::new().unwrap();
        let mapper = AccountMapper::build(corpus(), config(&dir), AIClient::mock())
            .await
            .unwrap();
        let record = mapper.classify_one("Office Rent", false).await;
        assert!(record.decision_trail.is_none());
    }

    #[tokio::test]
    async fn test_raised_exact_threshold_falls_through_to_fuzzy() {
        let dir = TempDir::new().unwrap();
        let mut config = config(&dir);
        config.thresholds.exact = 1.01;
        let mapper = AccountMapper::build(corpus(), config, AIClient::mock())
            .await
            .unwrap();

        let record = mapper.classify_one("Cash at Bank", true).await;
        assert_eq!(record.method_used, Method::Fuzzy);
        assert_eq!(record.predicted_fs, FsKind::BalanceSheet);

        let trail = record.decision_trail.unwrap();
        assert_eq!(trail[0].method, Method::Exact);
        assert_eq!(trail[0].outcome, StageOutcome::BelowThreshold);
        assert_eq!(trail[1].method, Method::Fuzzy);
        assert_eq!(trail[1].outcome, StageOutcome::Matched);
    }

    #[tokio::test]
    async fn test_fallback_when_generative_stage_fails() {
        let dir = TempDir::new().unwrap();
        let mut config = config(&dir);
        config.thresholds.semantic = 1.5;
        config.thresholds.embeddings = 1.5;
        let ai = AIClient::Mock(MockBackend::failing_completions());
        let mapper = AccountMapper::build(corpus(), config, ai).await.unwrap();

        let record = mapper.classify_one("Zorblax Discretionary Fund", true).await;
        assert_eq!(record.method_used, Method::Llm);
        assert_eq!(record.predicted_fs, FsKind::ProfitAndLoss);
        assert_eq!(record.confidence, 0.5);
        assert!(record.needs_review);
        assert_eq!(record.low_confidence_alternative, Some(FsKind::BalanceSheet));
        assert_eq!(record.reasoning.as_deref(), Some(FALLBACK_REASONING));
        assert_eq!(record.matched_training_row.as_deref(), Some(LLM_FAILED_ROW));
        assert_eq!(
            record.columns.columns.bs_main_category.as_deref(),
            Some(EQUITY_PLACEHOLDER[0])
        );

        let trail = record.decision_trail.unwrap();
        assert_eq!(trail.len(), 5);
        assert!(matches!(trail[4].outcome, StageOutcome::Degraded(_)));
    }

    #[tokio::test]
    async fn test_degraded_vector_stages_are_skipped() {
        let dir = TempDir::new().unwrap();
        let ai = AIClient::Mock(MockBackend::failing_embeddings());
        let mapper = AccountMapper::build(corpus(), config(&dir), ai).await.unwrap();
        assert!(!mapper.semantic().is_ready());

        let record = mapper.classify_one("Plant and Machinery", true).await;
        assert_eq!(record.method_used, Method::Llm);
        assert_eq!(record.matched_training_row.as_deref(), Some(LLM_ROW));

        let trail = record.decision_trail.unwrap();
        assert!(matches!(trail[2].outcome, StageOutcome::Degraded(_)));
        assert!(matches!(trail[3].outcome, StageOutcome::Degraded(_)));
    }

    #[tokio::test]
    async fn test_session_stats() {
        let dir = TempDir::new().unwrap();
        let mut config = config(&dir);
        config.thresholds.semantic = 1.5;
        config.thresholds.embeddings = 1.5;
        let mapper = AccountMapper::build(corpus(), config, AIClient::mock())
            .await
            .unwrap();

        mapper.classify_one("Cash at Bank", false).await;
        mapper.classify_one("office rent", false).await;
        mapper.classify_one("Zorblax Discretionary Fund", false).await;

        let stats = mapper.session_stats();
        assert_eq!(stats.predictions_made, 3);
        assert_eq!(stats.method_distribution.exact, 2);
        assert_eq!(stats.method_distribution.llm, 1);
        assert_eq!(stats.llm_call_count, 1);
        assert_eq!(stats.llm_stats.call_count, 1);

        mapper.reset_session_stats();
        assert_eq!(mapper.session_stats(), SessionStats::default());
    }

    #[tokio::test]
    async fn test_set_thresholds_validates() {
        let dir = TempDir::new().unwrap();
        let mut mapper = AccountMapper::build(corpus(), config(&dir), AIClient::mock())
            .await
            .unwrap();

        let bad = Thresholds {
            review: 2.0,
            ..Thresholds::default()
        };
        assert!(mapper.set_thresholds(bad).is_err());
        assert_eq!(mapper.thresholds(), Thresholds::default());

        let lower = Thresholds {
            fuzzy: 0.5,
            ..Thresholds::default()
        };
        mapper.set_thresholds(lower).unwrap();
        assert_eq!(mapper.thresholds().fuzzy, 0.5);
    }

    #[tokio::test]
    async fn test_update_domain() {
        let dir = TempDir::new().unwrap();
        let mut mapper = AccountMapper::build(corpus(), config(&dir), AIClient::mock())
            .await
            .unwrap();
        mapper.update_domain("Manufacturing");
        assert_eq!(mapper.domain(), "Manufacturing");
        assert!(mapper.llm().system_prompt().contains("Manufacturing"));
        assert_eq!(mapper.config().llm.domain, "Manufacturing");
    }

    #[tokio::test]
    async fn test_top_matches() {
        let dir = TempDir::new().unwrap();
        let mapper = AccountMapper::build(corpus(), config(&dir), AIClient::mock())
            .await
            .unwrap();
        let top = mapper.top_matches("Cash at Bnk", 2).await;
        assert_eq!(top.fuzzy.len(), 2);
        assert_eq!(top.fuzzy[0].primary_group, "Cash at Bank");
        assert_eq!(top.semantic.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_cascade_over_http_backend() {
        use crate::test_utils::MockLlmServer;

        let dir = TempDir::new().unwrap();
        let server = MockLlmServer::start().await;
        let ai = AIClient::ollama(&server.url(), "llama3.2");
        let mut config = config(&dir);
        config.thresholds.semantic = 1.5;
        config.thresholds.embeddings = 1.5;
        let mapper = AccountMapper::build(corpus(), config, ai).await.unwrap();
        assert!(mapper.semantic().is_ready());
        assert!(mapper.embedding().is_ready());

        let record = mapper.classify_one("Security Deposit Paid", true).await;
        assert_eq!(record.method_used, Method::Llm);
        assert_eq!(record.predicted_fs, FsKind::BalanceSheet);
        assert_eq!(record.confidence, 0.9);
        assert_eq!(record.matched_training_row.as_deref(), Some(LLM_ROW));
        // Balance Sheet lines never carry P&L columns
        assert!(record.columns.columns.pl_classification.is_none());
        assert!(record.columns.columns.expense_type.is_none());

        server.set_failing(true);
        let record = mapper.classify_one("Zorblax Discretionary Fund", false).await;
        assert_eq!(record.matched_training_row.as_deref(), Some(LLM_FAILED_ROW));
        assert_eq!(record.confidence, 0.5);

        let stats = mapper.llm().stats();
        assert_eq!(stats.call_count, 1);
        assert_eq!(stats.fallback_count, 1);
    }
}
