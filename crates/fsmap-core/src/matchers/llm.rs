//! Generative classification, the terminal cascade stage
//!
//! Never returns an error: failed attempts are retried with exponential
//! backoff and, once retries run out, a fixed fallback result is produced.
//! The statement hierarchy rule is applied to every result, fallback included.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::ai::parsing::{optional_string, parse_json_object};
use crate::ai::{AIBackend, AIClient, CompletionOptions};
use crate::domains::{self, domain_rules};
use crate::error::{Error, Result};
use crate::models::{
    ClassificationColumns, FsKind, LlmStats, MatchResult, CLASSIFICATION_COLUMNS,
};
use crate::prompts::{Prompt, PromptId, PromptLibrary};
use crate::settings::LlmSettings;

/// `matched_training_row` of a generated prediction
pub const LLM_ROW: &str = "LLM prediction";
/// `matched_training_row` of the fallback prediction
pub const LLM_FAILED_ROW: &str = "LLM prediction (failed)";
pub const FALLBACK_REASONING: &str = "API failed - default prediction";
pub const FALLBACK_FS: FsKind = FsKind::ProfitAndLoss;
pub const FALLBACK_CONFIDENCE: f64 = 0.50;

const DEFAULT_CONFIDENCE: f64 = 0.8;
const DEFAULT_REASONING: &str = "LLM classification";

/// How a generative classification ended
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum LlmOutcome {
    Answered { attempts: u32 },
    FellBack { attempts: u32, last_error: String },
}

/// One validated model answer
#[derive(Debug, Clone, PartialEq)]
struct LlmAnswer {
    fs: FsKind,
    confidence: f64,
    columns: ClassificationColumns,
    reasoning: String,
}

/// Generative matcher over an [`AIClient`]
pub struct LlmMatcher {
    client: AIClient,
    prompt: Prompt,
    domain: String,
    system_prompt: String,
    options: CompletionOptions,
    max_retries: u32,
    retry_base_delay: Duration,
    call_count: AtomicU64,
    attempt_count: AtomicU64,
    fallback_count: AtomicU64,
}

impl LlmMatcher {
    pub fn new(client: AIClient, settings: &LlmSettings, prompt: Prompt) -> Self {
        let mut matcher = Self {
            client,
            prompt,
            domain: String::new(),
            system_prompt: String::new(),
            // Sampling is always greedy; only the token budget is tunable
            options: CompletionOptions {
                temperature: 0.0,
                max_tokens: settings.max_tokens,
            },
            max_retries: settings.max_retries.max(1),
            retry_base_delay: settings.retry_base_delay,
            call_count: AtomicU64::new(0),
            attempt_count: AtomicU64::new(0),
            fallback_count: AtomicU64::new(0),
        };
        matcher.update_domain(&settings.domain);
        matcher
    }

    /// Build with the classification prompt from `prompts`
    pub fn from_library(
        client: AIClient,
        settings: &LlmSettings,
        prompts: &PromptLibrary,
    ) -> Result<Self> {
        let prompt = prompts.load(PromptId::ClassifyPrimaryGroup)?;
        Ok(Self::new(client, settings, prompt))
    }

    /// Switch the business domain and regenerate the system instruction
    pub fn update_domain(&mut self, domain: &str) {
        if !domains::is_known(domain) {
            warn!(domain, "Unknown domain, using general business rules");
        }
        let rules = domain_rules(domain);
        let mut vars = HashMap::new();
        vars.insert("domain", domain);
        vars.insert("domain_rules", rules.as_str());
        self.system_prompt = self.prompt.render_system(&vars);
        self.domain = domain.to_string();
    }

    pub fn domain(&self) -> &str {
        &self.domain
    }

    pub fn system_prompt(&self) -> &str {
        &self.system_prompt
    }

    pub fn client(&self) -> &AIClient {
        &self.client
    }

    pub fn stats(&self) -> LlmStats {
        LlmStats {
            call_count: self.call_count.load(Ordering::Relaxed),
            attempt_count: self.attempt_count.load(Ordering::Relaxed),
            fallback_count: self.fallback_count.load(Ordering::Relaxed),
        }
    }

    pub fn reset_stats(&self) {
        self.call_count.store(0, Ordering::Relaxed);
        self.attempt_count.store(0, Ordering::Relaxed);
        self.fallback_count.store(0, Ordering::Relaxed);
    }

    /// Classify `text`; always produces a result
    pub async fn match_text(&self, text: &str) -> MatchResult {
        self.classify(text).await.0
    }

    /// Classify `text` and report how many attempts it took
    pub async fn classify(&self, text: &str) -> (MatchResult, LlmOutcome) {
        let user = self.user_message(text);
        let mut last_error = String::new();

        for attempt in 0..self.max_retries {
            self.attempt_count.fetch_add(1, Ordering::Relaxed);
            match self.attempt(&user).await {
                Ok(answer) => {
                    self.call_count.fetch_add(1, Ordering::Relaxed);
                    debug!(
                        attempt = attempt + 1,
                        fs = %answer.fs,
                        confidence = answer.confidence,
                        "LLM classification"
                    );
                    let result = MatchResult::generated(
                        answer.fs,
                        answer.confidence,
                        answer.columns,
                        LLM_ROW,
                        Some(answer.reasoning),
                    );
                    return (
                        result,
                        LlmOutcome::Answered {
                            attempts: attempt + 1,
                        },
                    );
                }
                Err(e) => {
                    last_error = e.to_string();
                    warn!(
                        attempt = attempt + 1,
                        max = self.max_retries,
                        error = %e,
                        "LLM attempt failed"
                    );
                    if attempt + 1 < self.max_retries {
                        tokio::time::sleep(self.backoff(attempt)).await;
                    }
                }
            }
        }

        self.fallback_count.fetch_add(1, Ordering::Relaxed);
        warn!(
            attempts = self.max_retries,
            "LLM failed on every attempt, using default prediction"
        );
        (
            fallback_result(),
            LlmOutcome::FellBack {
                attempts: self.max_retries,
                last_error,
            },
        )
    }

    fn user_message(&self, text: &str) -> String {
        let mut vars = HashMap::new();
        vars.insert("primary_group", text.trim());
        self.prompt.render_user(&vars)
    }

    /// `base * 2^attempt`
    fn backoff(&self, attempt: u32) -> Duration {
        self.retry_base_delay
            .saturating_mul(2u32.saturating_pow(attempt))
    }

    async fn attempt(&self, user: &str) -> Result<LlmAnswer> {
        let raw = self
            .client
            .complete_json(&self.system_prompt, user, &self.options)
            .await?;
        parse_answer(&raw)
    }
}

/// The result used when every attempt failed
pub fn fallback_result() -> MatchResult {
    let mut columns = ClassificationColumns::default();
    columns.enforce_statement_rules(FALLBACK_FS);
    MatchResult::generated(
        FALLBACK_FS,
        FALLBACK_CONFIDENCE,
        columns,
        LLM_FAILED_ROW,
        Some(FALLBACK_REASONING.to_string()),
    )
}

fn parse_answer(raw: &str) -> Result<LlmAnswer> {
    let map = parse_json_object(raw)?;

    let fs_label = map
        .get("fs")
        .and_then(|v| v.as_str())
        .ok_or_else(|| Error::TransientExternal("Response missing 'fs' field".into()))?;
    let fs: FsKind = fs_label.parse().map_err(Error::TransientExternal)?;

    let confidence = map
        .get("confidence")
        .and_then(|v| v.as_f64())
        .filter(|c| (0.0..=1.0).contains(c))
        .unwrap_or(DEFAULT_CONFIDENCE);

    let mut columns = ClassificationColumns::default();
    for column in CLASSIFICATION_COLUMNS {
        columns.set(column, optional_string(&map, column));
    }
    columns.enforce_statement_rules(fs);

    let reasoning =
        optional_string(&map, "reasoning").unwrap_or_else(|| DEFAULT_REASONING.to_string());

    Ok(LlmAnswer {
        fs,
        confidence,
        columns,
        reasoning,
    })
}
