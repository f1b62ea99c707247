//! Core command implementations and shared utilities
//!
//! This module contains:
//! - `open_db` - Shared utility to open the database
//! - `load_config` / `ai_client` / `load_mapper` - Build a ready mapper
//! - `cmd_init` - Initialize the database
//! - `cmd_status` - Show database, corpus and model configuration

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use fsmap_core::ai::AIClient;
use fsmap_core::corpus::{CorpusSource, CsvCorpusSource, TrainingCorpus};
use fsmap_core::db::{Database, DB_KEY_ENV};
use fsmap_core::domains;
use fsmap_core::{AccountMapper, MapperConfig};
use tracing::warn;

/// Ollama address used when no backend is configured in the environment
const DEFAULT_OLLAMA_HOST: &str = "http://localhost:11434";

/// Global flags shared by every command
#[derive(Debug, Clone)]
pub struct GlobalOpts {
    pub db: PathBuf,
    pub no_encrypt: bool,
    pub config: Option<PathBuf>,
    pub corpus: Option<PathBuf>,
}

/// Where training data is read from and written to
pub enum TrainingSource {
    Csv(CsvCorpusSource),
    Database(Database),
}

impl TrainingSource {
    pub fn as_source(&self) -> &dyn CorpusSource {
        match self {
            TrainingSource::Csv(csv) => csv,
            TrainingSource::Database(db) => db,
        }
    }
}

/// Open database with encryption by default, or unencrypted if --no-encrypt
pub fn open_db(db_path: &Path, no_encrypt: bool) -> Result<Database> {
    let path_str = db_path
        .to_str()
        .context("Database path is not valid UTF-8")?;
    if no_encrypt {
        Database::new_unencrypted(path_str).context("Failed to open database (unencrypted)")
    } else {
        Database::new(path_str).context("Failed to open database")
    }
}

pub fn load_config(opts: &GlobalOpts) -> Result<MapperConfig> {
    MapperConfig::load_from(opts.config.as_deref()).context("Failed to load mapper config")
}

/// The CSV given with --corpus, else the database training table
pub fn training_source(opts: &GlobalOpts) -> Result<TrainingSource> {
    match &opts.corpus {
        Some(path) => Ok(TrainingSource::Csv(CsvCorpusSource::new(path))),
        None => Ok(TrainingSource::Database(open_db(&opts.db, opts.no_encrypt)?)),
    }
}

/// AI client from the environment, else a local Ollama
pub fn ai_client(config: &MapperConfig) -> AIClient {
    AIClient::from_env(&config.llm.model).unwrap_or_else(|| {
        warn!(
            host = DEFAULT_OLLAMA_HOST,
            "No AI backend configured (set OLLAMA_HOST or AI_BACKEND), trying local Ollama"
        );
        AIClient::ollama(DEFAULT_OLLAMA_HOST, &config.llm.model)
    })
}

/// Apply a --domain override, warning on names outside the known list
pub fn apply_domain(config: &mut MapperConfig, domain: Option<&str>) {
    if let Some(domain) = domain {
        if !domains::is_known(domain) {
            warn!(domain, "Unknown domain, general business rules will be used");
        }
        config.llm.domain = domain.to_string();
    }
}

/// Load training data and build every matcher
pub async fn load_mapper(
    source: &dyn CorpusSource,
    config: MapperConfig,
    ai: AIClient,
) -> Result<AccountMapper> {
    let (corpus, report) = TrainingCorpus::load(source)
        .with_context(|| format!("Failed to load training data from {}", source.describe()))?;
    for warning in &report.warnings {
        println!("   ⚠️  {}", warning);
    }
    if corpus.is_empty() {
        println!("   💡 Tip: Training data is empty. Import some with 'fsmap corpus import'");
    }
    AccountMapper::build(corpus, config, ai)
        .await
        .context("Failed to build mapper")
}

pub fn cmd_init(db_path: &Path, no_encrypt: bool) -> Result<()> {
    println!("🔧 Initializing database at {}...", db_path.display());

    let db = open_db(db_path, no_encrypt)?;
    let rows = db.count_training_rows()?;
    println!("   Training rows: {}", rows);

    if no_encrypt {
        println!("   ⚠️  Encryption: DISABLED (--no-encrypt)");
    } else {
        println!("   🔒 Encryption: ENABLED");
    }

    println!("✅ Database initialized successfully!");
    println!();
    println!("Next steps:");
    println!("  1. Import training data: fsmap corpus import --file training.csv");
    println!("  2. Classify a line item: fsmap classify \"Sundry Debtors\"");

    Ok(())
}

pub fn cmd_status(opts: &GlobalOpts, config: &MapperConfig) -> Result<()> {
    println!();
    println!("📊 fsmap Status");
    println!("   ─────────────────────────────────────────────────────────────");
    println!("   Database: {}", opts.db.display());

    let has_key = std::env::var(DB_KEY_ENV).is_ok();
    if opts.no_encrypt {
        println!("   ⚠️  Encryption: DISABLED (--no-encrypt)");
    } else if has_key {
        println!("   🔒 Encryption: ENABLED ({}=***)", DB_KEY_ENV);
    } else {
        println!("   ❌ Encryption: REQUIRED but {} not set", DB_KEY_ENV);
    }

    if opts.db.exists() {
        match open_db(&opts.db, opts.no_encrypt) {
            Ok(db) => {
                println!("   Training rows: {}", db.count_training_rows()?);
                println!("   Staged items: {}", db.count_staging_items()?);
                println!("   Pending: {}", db.pending_items()?.len());
                println!("   Classified: {}", db.count_classifications()?);
            }
            Err(e) => println!("   ❌ Error opening database: {:#}", e),
        }
    } else {
        println!("   (database not initialized)");
    }

    if let Some(corpus) = &opts.corpus {
        println!("   Corpus CSV: {}", corpus.display());
    }

    println!();
    println!(
        "   Config: {}",
        config
            .source_path
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "(built-in defaults)".to_string())
    );
    let t = &config.thresholds;
    println!(
        "   Thresholds: exact {:.2} · fuzzy {:.2} · semantic {:.2} · embeddings {:.2} · review {:.2}",
        t.exact, t.fuzzy, t.semantic, t.embeddings, t.review
    );
    println!(
        "   Models: llm {} · semantic {} · embeddings {}",
        config.llm.model, config.vectors.semantic_model, config.vectors.embedding_model
    );
    println!("   Domain: {}", config.llm.domain);
    println!("   Vector cache: {}", config.vectors.cache_dir.display());

    Ok(())
}
