//! fsmap Core Library
//!
//! Classifies accounting "primary group" line items as Balance Sheet or
//! Profit & Loss and predicts their ten classification columns:
//! - Training corpus loading, validation and fingerprinting
//! - Matcher cascade (exact, fuzzy, semantic, embedding, LLM)
//! - Pluggable AI backends (Ollama, OpenAI-compatible, mock)
//! - Vector caches keyed by corpus fingerprint
//! - Resumable batch classification with checkpoints
//! - Encrypted database with staging and insert-once results
//! - Worker pool that drains pending staging items

pub mod ai;
pub mod batch;
pub mod corpus;
pub mod db;
pub mod domains;
pub mod error;
pub mod mapper;
pub mod matchers;
pub mod models;
pub mod normalize;
pub mod prompts;
pub mod runner;
pub mod settings;

/// Test utilities including a mock LLM server
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use ai::{AIBackend, AIClient, MockBackend, OllamaBackend, OpenAICompatibleBackend};
pub use batch::{BatchOptions, BatchOutcome, Checkpoint, CheckpointStatus};
pub use corpus::{CorpusSource, CsvCorpusSource, TrainingCorpus, ValidationReport};
pub use db::{Database, NewStagingItem, StoredClassification};
pub use error::{Error, Result};
pub use mapper::{AccountMapper, RefreshStatus, TopMatches};
pub use matchers::{CacheSource, Matcher, Probe, ScoredRow};
pub use models::{
    BatchStats, ClassificationColumns, ClassificationRecord, DecisionStep, FsKind, Method,
    PendingItem, SessionStats, StageOutcome, TrainingRow,
};
pub use prompts::{Prompt, PromptId, PromptLibrary, PromptSource};
pub use runner::{run_pending, RunProgress, RunReport};
pub use settings::{MapperConfig, Thresholds};
