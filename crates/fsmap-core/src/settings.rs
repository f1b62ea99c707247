//! Mapper configuration: cascade thresholds, batch sizing, model names
//!
//! ## Configuration Resolution
//!
//! Config is loaded with a two-layer resolution:
//! 1. An explicit path, or the override in the data dir
//!    (~/.local/share/fsmap/config/mapper.toml)
//! 2. Fall back to embedded defaults (compiled into binary)
//!
//! Keys missing from an override file keep their built-in default.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::models::Method;

/// Embedded default config (compiled into binary)
const DEFAULT_CONFIG: &str = include_str!("../../../config/mapper.toml");

/// Stage thresholds above this disable the stage
const MAX_STAGE_THRESHOLD: f64 = 1.5;

/// Per-stage confidence thresholds plus the post-hoc review threshold
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Thresholds {
    pub exact: f64,
    pub fuzzy: f64,
    pub semantic: f64,
    pub embeddings: f64,
    /// Not used for branching; flags the final result for review
    pub review: f64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            exact: 1.0,
            fuzzy: 0.85,
            semantic: 0.85,
            embeddings: 0.80,
            review: 0.70,
        }
    }
}

impl Thresholds {
    /// Threshold a stage must clear to end the cascade.
    ///
    /// The generative stage is terminal and always accepted.
    pub fn for_method(&self, method: Method) -> f64 {
        match method {
            Method::Exact => self.exact,
            Method::Fuzzy => self.fuzzy,
            Method::Semantic => self.semantic,
            Method::Embeddings => self.embeddings,
            Method::Llm => 0.0,
        }
    }

    pub fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("exact", self.exact),
            ("fuzzy", self.fuzzy),
            ("semantic", self.semantic),
            ("embeddings", self.embeddings),
        ] {
            if !(0.0..=MAX_STAGE_THRESHOLD).contains(&value) {
                return Err(Error::Config(format!(
                    "Threshold '{}' must be between 0.0 and {}, got {}",
                    name, MAX_STAGE_THRESHOLD, value
                )));
            }
        }
        if !(0.0..=1.0).contains(&self.review) {
            return Err(Error::Config(format!(
                "Review threshold must be between 0.0 and 1.0, got {}",
                self.review
            )));
        }
        Ok(())
    }
}

/// Batch and worker pool sizing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchSettings {
    pub checkpoint_interval: usize,
    pub workers: usize,
}

impl Default for BatchSettings {
    fn default() -> Self {
        Self {
            checkpoint_interval: 10,
            workers: 5,
        }
    }
}

/// Generative stage settings
#[derive(Debug, Clone, PartialEq)]
pub struct LlmSettings {
    pub model: String,
    pub max_retries: u32,
    pub retry_base_delay: Duration,
    pub max_tokens: u32,
    pub domain: String,
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            model: "llama3.2".to_string(),
            max_retries: 3,
            retry_base_delay: Duration::from_secs(2),
            max_tokens: 4000,
            domain: "General Business".to_string(),
        }
    }
}

/// Embedding models and cache location for the vector stages
#[derive(Debug, Clone, PartialEq)]
pub struct VectorSettings {
    pub semantic_model: String,
    pub embedding_model: String,
    pub cache_dir: PathBuf,
}

impl Default for VectorSettings {
    fn default() -> Self {
        Self {
            semantic_model: "nomic-embed-text".to_string(),
            embedding_model: "all-minilm".to_string(),
            cache_dir: default_cache_dir(),
        }
    }
}

/// Full mapper configuration
#[derive(Debug, Clone, Default)]
pub struct MapperConfig {
    pub thresholds: Thresholds,
    pub batch: BatchSettings,
    pub llm: LlmSettings,
    pub vectors: VectorSettings,
    /// File the config was read from (None for embedded defaults)
    pub source_path: Option<PathBuf>,
}

impl MapperConfig {
    /// Load from the default override location or embedded defaults
    pub fn load() -> Result<Self> {
        Self::load_from(None)
    }

    /// Load with an explicit override path (falls back to defaults if missing)
    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        let resolved = match path {
            Some(p) => Some(p.to_path_buf()),
            None => default_config_path(),
        };

        match resolved {
            Some(p) if p.exists() => {
                let content = fs::read_to_string(&p)
                    .map_err(|e| Error::Config(format!("Failed to read config: {}", e)))?;
                let mut config = parse_config(&content)?;
                config.source_path = Some(p);
                Ok(config)
            }
            _ => parse_config(DEFAULT_CONFIG),
        }
    }

    /// Re-read configuration from where it was loaded
    pub fn reload(&mut self) -> Result<()> {
        *self = Self::load_from(self.source_path.as_deref())?;
        Ok(())
    }
}

/// Default config override path
pub fn default_config_path() -> Option<PathBuf> {
    dirs::data_local_dir().map(|d| d.join("fsmap").join("config").join("mapper.toml"))
}

/// Default vector cache directory
pub fn default_cache_dir() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("fsmap").join("cache"))
        .unwrap_or_else(|| PathBuf::from("data/cache"))
}

#[derive(Debug, Deserialize)]
struct RawConfig {
    thresholds: Option<RawThresholds>,
    batch: Option<RawBatch>,
    llm: Option<RawLlm>,
    vectors: Option<RawVectors>,
}

#[derive(Debug, Deserialize)]
struct RawThresholds {
    exact: Option<f64>,
    fuzzy: Option<f64>,
    semantic: Option<f64>,
    embeddings: Option<f64>,
    review: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct RawBatch {
    checkpoint_interval: Option<usize>,
    workers: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct RawLlm {
    model: Option<String>,
    max_retries: Option<u32>,
    retry_base_delay_ms: Option<u64>,
    max_tokens: Option<u32>,
    domain: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawVectors {
    semantic_model: Option<String>,
    embedding_model: Option<String>,
    cache_dir: Option<PathBuf>,
}

/// Parse config from TOML content
fn parse_config(content: &str) -> Result<MapperConfig> {
    let raw: RawConfig = toml::from_str(content)?;

    let mut config = MapperConfig::default();

    if let Some(t) = raw.thresholds {
        let th = &mut config.thresholds;
        th.exact = t.exact.unwrap_or(th.exact);
        th.fuzzy = t.fuzzy.unwrap_or(th.fuzzy);
        th.semantic = t.semantic.unwrap_or(th.semantic);
        th.embeddings = t.embeddings.unwrap_or(th.embeddings);
        th.review = t.review.unwrap_or(th.review);
    }
    config.thresholds.validate()?;

    if let Some(b) = raw.batch {
        if let Some(interval) = b.checkpoint_interval {
            config.batch.checkpoint_interval = interval.max(1);
        }
        if let Some(workers) = b.workers {
            config.batch.workers = workers.max(1);
        }
    }

    if let Some(l) = raw.llm {
        if let Some(model) = l.model {
            config.llm.model = model;
        }
        if let Some(retries) = l.max_retries {
            config.llm.max_retries = retries.max(1);
        }
        if let Some(ms) = l.retry_base_delay_ms {
            config.llm.retry_base_delay = Duration::from_millis(ms);
        }
        if let Some(tokens) = l.max_tokens {
            config.llm.max_tokens = tokens;
        }
        if let Some(domain) = l.domain {
            config.llm.domain = domain;
        }
    }

    if let Some(v) = raw.vectors {
        if let Some(model) = v.semantic_model {
            config.vectors.semantic_model = model;
        }
        if let Some(model) = v.embedding_model {
            config.vectors.embedding_model = model;
        }
        if let Some(dir) = v.cache_dir {
            config.vectors.cache_dir = dir;
        }
    }

    Ok(config)
}
