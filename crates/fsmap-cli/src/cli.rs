//! CLI argument definitions using clap
//!
//! This module contains all the clap structs and enums for parsing CLI arguments.
//! The actual command implementations are in the `commands` module.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// fsmap - Map ledger line items onto financial statements
#[derive(Parser)]
#[command(name = "fsmap")]
#[command(about = "Classify accounting primary groups as Balance Sheet or Profit & Loss", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Database path
    #[arg(long, default_value = "fsmap.db", global = true)]
    pub db: PathBuf,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Disable database encryption (not recommended for production)
    ///
    /// By default, the database is encrypted using SQLCipher.
    /// Set FSMAP_DB_KEY environment variable with your passphrase.
    /// Use --no-encrypt only for development or testing.
    #[arg(long, global = true)]
    pub no_encrypt: bool,

    /// Mapper config file (defaults to ~/.local/share/fsmap/config/mapper.toml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Read training data from this CSV file instead of the database
    #[arg(long, global = true)]
    pub corpus: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Initialize the database
    Init,

    /// Show database, corpus and model configuration
    Status,

    /// Classify a single primary group
    Classify {
        /// Line item text, e.g. "Sundry Debtors"
        text: String,

        /// Show the decision trail through every stage
        #[arg(long)]
        trail: bool,

        /// Also show the N best candidates from each scoring stage
        #[arg(long)]
        top: Option<usize>,

        /// Company domain for the generative stage
        #[arg(long)]
        domain: Option<String>,

        /// Print the record as JSON
        #[arg(long)]
        json: bool,
    },

    /// Classify every row of a CSV file with a primary_group column
    Batch {
        /// Input CSV file
        #[arg(short, long)]
        input: PathBuf,

        /// Output CSV file
        #[arg(short, long)]
        output: PathBuf,

        /// Resume from the checkpoint if it belongs to this input
        #[arg(long)]
        resume: bool,

        /// Checkpoint file (defaults to ~/.local/share/fsmap/progress_checkpoint.json)
        #[arg(long)]
        checkpoint: Option<PathBuf>,

        /// Save a checkpoint every N rows (default from config)
        #[arg(long)]
        interval: Option<usize>,

        /// Company domain for the generative stage
        #[arg(long)]
        domain: Option<String>,
    },

    /// Stage raw line items from a CSV file for `run`
    Stage {
        /// CSV with a primary_group column (raw_id and tenant_id optional)
        #[arg(short, long)]
        file: PathBuf,

        /// Tenant for rows without a tenant_id column
        #[arg(long)]
        tenant: Option<String>,
    },

    /// Classify all pending staged items and store the results
    Run {
        /// Concurrent workers (default from config, capped by the pool size)
        #[arg(short, long)]
        workers: Option<usize>,

        /// Company domain for the generative stage
        #[arg(long)]
        domain: Option<String>,
    },

    /// List stored classification results
    Results {
        /// Maximum rows to show
        #[arg(short, long, default_value = "20")]
        limit: i64,

        /// Only results flagged for review
        #[arg(long)]
        review: bool,
    },

    /// Manage training data
    Corpus {
        #[command(subcommand)]
        action: CorpusAction,
    },

    /// Inspect or clear a batch checkpoint
    Checkpoint {
        /// Checkpoint file (defaults to ~/.local/share/fsmap/progress_checkpoint.json)
        #[arg(long)]
        path: Option<PathBuf>,

        /// Delete the checkpoint
        #[arg(long)]
        clear: bool,
    },

    /// List company domains, or show the rules of one
    Domains {
        /// Domain whose rules to print
        #[arg(long)]
        show: Option<String>,
    },
}

#[derive(Subcommand)]
pub enum CorpusAction {
    /// Reload training data and rebuild matchers and vector caches
    Refresh {
        /// Rebuild even when the training data has not changed
        #[arg(long)]
        force: bool,
    },

    /// Add one labeled example
    Add {
        /// Primary group name
        primary_group: String,

        /// "Balance Sheet" or "Profit & Loss"
        fs: String,
    },

    /// Show corpus size and validation warnings
    Stats,

    /// Case-insensitive search over primary groups
    Search {
        query: String,

        /// Maximum rows to show
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },

    /// Load a training CSV into the database
    Import {
        /// CSV file with primary_group and fs columns
        #[arg(short, long)]
        file: PathBuf,
    },

    /// Write the training data to a CSV file
    Export {
        /// Output CSV file
        #[arg(short, long)]
        output: PathBuf,
    },

    /// Hide a training row from the corpus (database only)
    Remove {
        /// Exact primary group name
        primary_group: String,
    },
}
