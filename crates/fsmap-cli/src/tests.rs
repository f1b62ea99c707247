//! CLI command tests
//!
//! This module contains all tests for the CLI commands.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use fsmap_core::batch::{inspect_checkpoint, Checkpoint};
use fsmap_core::corpus::{CsvCorpusSource, TrainingCorpus};
use fsmap_core::db::Database;
use fsmap_core::models::FsKind;
use fsmap_core::{AIClient, AccountMapper, BatchOptions, MapperConfig};
use tempfile::TempDir;

use crate::cli::{Cli, Commands, CorpusAction};
use crate::commands::{self, GlobalOpts, TrainingSource};

const TRAINING_CSV: &str = "primary_group,fs,bs_main_category,bs_classification,pl_classification,pl_sub_classification
Cash at Bank,Balance Sheet,Assets,Current Assets,,
Sundry Debtors,Balance Sheet,Assets,Current Assets,,
Office Rent,Profit & Loss,,,Indirect Expenses,Rent
Sales of Goods,Profit & Loss,,,Revenue from Operations,Sale of Products
";

fn write_file(dir: &TempDir, name: &str, contents: &str) -> std::path::PathBuf {
    let path = dir.path().join(name);
    std::fs::write(&path, contents).unwrap();
    path
}

fn test_config(dir: &TempDir) -> MapperConfig {
    let mut config = MapperConfig::default();
    config.vectors.cache_dir = dir.path().join("cache");
    config.llm.retry_base_delay = Duration::from_millis(1);
    config
}

async fn test_mapper(dir: &TempDir) -> AccountMapper {
    let source = CsvCorpusSource::new(write_file(dir, "training.csv", TRAINING_CSV));
    commands::load_mapper(&source, test_config(dir), AIClient::mock())
        .await
        .unwrap()
}

fn seeded_db(dir: &TempDir) -> Database {
    let db = Database::in_memory().unwrap();
    let file = write_file(dir, "training.csv", TRAINING_CSV);
    commands::cmd_corpus_import(&db, &file).unwrap();
    db
}

// ========== Argument Parsing Tests ==========

#[test]
fn test_parse_classify_flags() {
    let cli = Cli::try_parse_from([
        "fsmap",
        "--no-encrypt",
        "classify",
        "Sundry Debtors",
        "--trail",
        "--top",
        "3",
    ])
    .unwrap();

    assert!(cli.no_encrypt);
    match cli.command {
        Commands::Classify {
            text,
            trail,
            top,
            json,
            domain,
        } => {
            assert_eq!(text, "Sundry Debtors");
            assert!(trail);
            assert_eq!(top, Some(3));
            assert!(!json);
            assert!(domain.is_none());
        }
        _ => panic!("expected classify"),
    }
}

#[test]
fn test_parse_global_flags_after_subcommand() {
    let cli = Cli::try_parse_from([
        "fsmap",
        "corpus",
        "stats",
        "--corpus",
        "training.csv",
        "--db",
        "other.db",
    ])
    .unwrap();

    assert_eq!(cli.db, Path::new("other.db"));
    assert_eq!(cli.corpus.as_deref(), Some(Path::new("training.csv")));
    assert!(matches!(
        cli.command,
        Commands::Corpus {
            action: CorpusAction::Stats
        }
    ));
}

#[test]
fn test_parse_batch_requires_input_and_output() {
    assert!(Cli::try_parse_from(["fsmap", "batch", "-i", "in.csv"]).is_err());

    let cli =
        Cli::try_parse_from(["fsmap", "batch", "-i", "in.csv", "-o", "out.csv", "--resume"])
            .unwrap();
    match cli.command {
        Commands::Batch {
            resume, interval, ..
        } => {
            assert!(resume);
            assert!(interval.is_none());
        }
        _ => panic!("expected batch"),
    }
}

#[test]
fn test_parse_results_defaults() {
    let cli = Cli::try_parse_from(["fsmap", "results"]).unwrap();
    match cli.command {
        Commands::Results { limit, review } => {
            assert_eq!(limit, 20);
            assert!(!review);
        }
        _ => panic!("expected results"),
    }
}

// ========== Core Command Tests ==========

#[test]
fn test_training_source_prefers_csv() {
    let dir = TempDir::new().unwrap();
    let opts = GlobalOpts {
        db: dir.path().join("fsmap.db"),
        no_encrypt: true,
        config: None,
        corpus: Some(dir.path().join("training.csv")),
    };

    let source = commands::training_source(&opts).unwrap();
    assert!(matches!(source, TrainingSource::Csv(_)));
    // No database file is created for a CSV source
    assert!(!opts.db.exists());
}

#[test]
fn test_cmd_init_creates_database() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("fsmap.db");

    commands::cmd_init(&path, true).unwrap();
    assert!(path.exists());

    let db = commands::open_db(&path, true).unwrap();
    assert_eq!(db.count_training_rows().unwrap(), 0);
}

#[test]
fn test_apply_domain_overrides_config() {
    let mut config = MapperConfig::default();
    commands::apply_domain(&mut config, Some("Manufacturing"));
    assert_eq!(config.llm.domain, "Manufacturing");

    commands::apply_domain(&mut config, None);
    assert_eq!(config.llm.domain, "Manufacturing");
}

#[test]
fn test_load_config_from_file() {
    let dir = TempDir::new().unwrap();
    let path = write_file(&dir, "mapper.toml", "[thresholds]\nfuzzy = 0.9\n");
    let opts = GlobalOpts {
        db: dir.path().join("fsmap.db"),
        no_encrypt: true,
        config: Some(path),
        corpus: None,
    };

    let config = commands::load_config(&opts).unwrap();
    assert_eq!(config.thresholds.fuzzy, 0.9);
    assert!(commands::cmd_status(&opts, &config).is_ok());
}

// ========== Corpus Command Tests ==========

#[test]
fn test_cmd_corpus_import_and_stats() {
    let dir = TempDir::new().unwrap();
    let db = seeded_db(&dir);
    assert_eq!(db.count_training_rows().unwrap(), 4);

    assert!(commands::cmd_corpus_stats(&db).is_ok());
    assert!(commands::cmd_corpus_search(&db, "debtor", 5).is_ok());
    assert!(commands::cmd_corpus_search(&db, "nothing like this", 5).is_ok());
}

#[test]
fn test_cmd_corpus_import_skips_invalid_rows() {
    let dir = TempDir::new().unwrap();
    let db = Database::in_memory().unwrap();
    let file = write_file(
        &dir,
        "mixed.csv",
        "primary_group,fs\nCash at Bank,Balance Sheet\n,Balance Sheet\nOffice Rent,Income Statement\n",
    );

    commands::cmd_corpus_import(&db, &file).unwrap();
    assert_eq!(db.count_training_rows().unwrap(), 1);
}

#[test]
fn test_cmd_corpus_import_missing_file() {
    let dir = TempDir::new().unwrap();
    let db = Database::in_memory().unwrap();
    let result = commands::cmd_corpus_import(&db, &dir.path().join("missing.csv"));
    assert!(result.is_err());
}

#[test]
fn test_cmd_corpus_export_round_trip() {
    let dir = TempDir::new().unwrap();
    let db = seeded_db(&dir);
    let output = dir.path().join("export.csv");

    commands::cmd_corpus_export(&db, &output).unwrap();

    let (exported, report) = TrainingCorpus::load(&CsvCorpusSource::new(&output)).unwrap();
    assert!(report.valid);
    assert_eq!(exported.len(), 4);
    assert!(exported.contains("Office Rent"));
}

#[test]
fn test_cmd_corpus_remove() {
    let dir = TempDir::new().unwrap();
    let db = seeded_db(&dir);

    commands::cmd_corpus_remove(&db, "Office Rent").unwrap();
    assert_eq!(db.count_training_rows().unwrap(), 3);

    // Removing again is a no-op
    commands::cmd_corpus_remove(&db, "Office Rent").unwrap();
    assert_eq!(db.count_training_rows().unwrap(), 3);
}

#[tokio::test]
async fn test_cmd_corpus_add_and_refresh() {
    let dir = TempDir::new().unwrap();
    let source = CsvCorpusSource::new(write_file(&dir, "training.csv", TRAINING_CSV));
    let mut mapper = commands::load_mapper(&source, test_config(&dir), AIClient::mock())
        .await
        .unwrap();

    commands::cmd_corpus_add(&mut mapper, &source, "Petty Cash", "Balance Sheet")
        .await
        .unwrap();
    assert_eq!(mapper.corpus().len(), 5);
    assert!(mapper.corpus().contains("petty cash"));

    let result = commands::cmd_corpus_add(&mut mapper, &source, "Petty Cash", "Neither").await;
    assert!(result.is_err());

    commands::cmd_corpus_refresh(&mut mapper, &source, false)
        .await
        .unwrap();
    assert_eq!(mapper.corpus().len(), 5);
}

// ========== Classification Command Tests ==========

#[tokio::test]
async fn test_cmd_classify_outputs() {
    let dir = TempDir::new().unwrap();
    let mapper = test_mapper(&dir).await;

    assert!(commands::cmd_classify(&mapper, "Sundry Debtors", true, Some(3), false)
        .await
        .is_ok());
    assert!(commands::cmd_classify(&mapper, "Loan from Directors", false, None, true)
        .await
        .is_ok());

    let stats = mapper.session_stats();
    assert_eq!(stats.predictions_made, 2);
}

#[tokio::test]
async fn test_cmd_batch_writes_results() {
    let dir = TempDir::new().unwrap();
    let mapper = test_mapper(&dir).await;
    let input = write_file(
        &dir,
        "input.csv",
        "primary_group\nCash at Bank\nOffice Rent\nSundry Debtor\n",
    );
    let output = dir.path().join("out.csv");
    let checkpoint = dir.path().join("checkpoint.json");
    let options = BatchOptions::new(input.display().to_string())
        .with_checkpoint(&checkpoint)
        .with_interval(1);

    commands::cmd_batch(&mapper, &input, &output, options)
        .await
        .unwrap();

    let written = std::fs::read_to_string(&output).unwrap();
    assert_eq!(written.lines().count(), 4);
    assert!(written.lines().next().unwrap().starts_with("primary_group"));
    // Finished batches leave no checkpoint behind
    assert!(!checkpoint.exists());
}

#[tokio::test]
async fn test_cmd_batch_rejects_input_without_column() {
    let dir = TempDir::new().unwrap();
    let mapper = test_mapper(&dir).await;
    let input = write_file(&dir, "input.csv", "name\nCash at Bank\n");
    let options = BatchOptions::new("input");

    let result = commands::cmd_batch(&mapper, &input, &dir.path().join("out.csv"), options).await;
    assert!(result.is_err());
}

#[test]
fn test_cmd_checkpoint_inspect_and_clear() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("checkpoint.json");

    // Missing checkpoint is not an error
    commands::cmd_checkpoint(Some(&path), true).unwrap();

    Checkpoint {
        input_id: "input.csv".to_string(),
        last_processed_idx: 4,
        results: Vec::new(),
        timestamp: chrono::Utc::now(),
    }
    .save(&path)
    .unwrap();

    commands::cmd_checkpoint(Some(&path), false).unwrap();
    assert!(path.exists());
    assert_eq!(inspect_checkpoint(&path).processed_rows, 5);

    commands::cmd_checkpoint(Some(&path), true).unwrap();
    assert!(!path.exists());
}

#[test]
fn test_cmd_domains() {
    assert!(commands::cmd_domains(None, "Manufacturing").is_ok());
    assert!(commands::cmd_domains(Some("Manufacturing"), "general").is_ok());
    assert!(commands::cmd_domains(Some("no such domain"), "general").is_ok());
}

// ========== Staging and Run Command Tests ==========

#[test]
fn test_read_staging_csv() {
    let dir = TempDir::new().unwrap();
    let file = write_file(
        &dir,
        "items.csv",
        "raw_id,primary_group,tenant_id\nA1,Cash at Bank,t-9\nA2,Office Rent,\nA3,,\n",
    );

    let items = commands::read_staging_csv(&file, Some("t-1")).unwrap();
    assert_eq!(items.len(), 3);
    assert_eq!(items[0].tenant_id.as_deref(), Some("t-9"));
    assert_eq!(items[0].raw_id.as_deref(), Some("A1"));
    assert_eq!(items[1].tenant_id.as_deref(), Some("t-1"));
    assert_eq!(items[1].primary_group.as_deref(), Some("Office Rent"));
    assert!(items[2].primary_group.is_none());
}

#[test]
fn test_read_staging_csv_requires_primary_group() {
    let dir = TempDir::new().unwrap();
    let file = write_file(&dir, "items.csv", "raw_id,name\nA1,Cash\n");
    assert!(commands::read_staging_csv(&file, None).is_err());
}

#[tokio::test]
async fn test_stage_run_and_results() {
    let dir = TempDir::new().unwrap();
    let db = seeded_db(&dir);
    let file = write_file(
        &dir,
        "items.csv",
        "raw_id,primary_group\n1,Cash at Bank\n2,Sundry Debtor\n3,Loan from Directors\n4,\n",
    );

    commands::cmd_stage(&db, &file, Some("acme")).unwrap();
    assert_eq!(db.count_staging_items().unwrap(), 4);
    // Blank rows are staged but never pending
    assert_eq!(db.pending_items().unwrap().len(), 3);

    let mapper = commands::load_mapper(&db, test_config(&dir), AIClient::mock())
        .await
        .unwrap();
    let mapper = Arc::new(mapper);
    commands::cmd_run(mapper.clone(), &db, 8).await.unwrap();

    assert!(db.pending_items().unwrap().is_empty());
    assert_eq!(db.count_classifications().unwrap(), 3);

    let stored = db.list_classifications(10, false).unwrap();
    let cash = stored
        .iter()
        .find(|s| s.record.primary_group == "Cash at Bank")
        .unwrap();
    assert_eq!(cash.record.predicted_fs, FsKind::BalanceSheet);
    assert_eq!(cash.tenant_id.as_deref(), Some("acme"));

    assert!(commands::cmd_results(&db, 10, false).is_ok());
    assert!(commands::cmd_results(&db, 10, true).is_ok());

    // Nothing left to do on a second run
    commands::cmd_run(mapper, &db, 8).await.unwrap();
    assert_eq!(db.count_classifications().unwrap(), 3);
}

#[test]
fn test_cmd_results_empty() {
    let db = Database::in_memory().unwrap();
    assert!(commands::cmd_results(&db, 20, false).is_ok());
}
