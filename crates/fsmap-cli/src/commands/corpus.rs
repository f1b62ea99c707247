//! Training data commands (refresh, add, stats, search, import, export, remove)

use std::path::Path;

use anyhow::{Context, Result};
use fsmap_core::corpus::{CorpusSource, CsvCorpusSource, TrainingCorpus};
use fsmap_core::db::Database;
use fsmap_core::matchers::CacheSource;
use fsmap_core::normalize::truncate_text;
use fsmap_core::{AccountMapper, RefreshStatus};

fn describe_cache(source: Option<&CacheSource>) -> String {
    match source {
        Some(CacheSource::CacheHit) => "loaded from cache".to_string(),
        Some(CacheSource::ComputedOnMiss) => "encoded (cache miss)".to_string(),
        Some(CacheSource::ComputedAfterUnreadable(reason)) => {
            format!("encoded (cache unreadable: {})", truncate_text(reason, 50))
        }
        Some(CacheSource::Payload) => "supplied by caller".to_string(),
        None => "unavailable".to_string(),
    }
}

fn print_refresh(status: &RefreshStatus) {
    println!("   Rows: {}", status.total_rows);
    for warning in &status.report.warnings {
        println!("   ⚠️  {}", warning);
    }
    if status.changed {
        println!("   Semantic index: {}", describe_cache(status.semantic.as_ref()));
        println!("   Embedding index: {}", describe_cache(status.embedding.as_ref()));
    } else {
        println!("   Unchanged, nothing rebuilt (use --force to rebuild)");
    }
}

pub async fn cmd_corpus_refresh(
    mapper: &mut AccountMapper,
    source: &dyn CorpusSource,
    force: bool,
) -> Result<()> {
    println!("🔄 Refreshing training data from {}...", source.describe());
    let status = mapper
        .refresh_corpus(source, force)
        .await
        .context("Failed to refresh training data")?;
    print_refresh(&status);
    println!("✅ Done");
    Ok(())
}

pub async fn cmd_corpus_add(
    mapper: &mut AccountMapper,
    source: &dyn CorpusSource,
    primary_group: &str,
    fs: &str,
) -> Result<()> {
    let status = mapper
        .add_training_example(source, primary_group, fs)
        .await
        .context("Failed to add training example")?;
    println!("✅ Added \"{}\" as {}", primary_group.trim(), fs.trim());
    print_refresh(&status);
    Ok(())
}

pub fn cmd_corpus_stats(source: &dyn CorpusSource) -> Result<()> {
    let (corpus, report) = TrainingCorpus::load(source)
        .with_context(|| format!("Failed to load training data from {}", source.describe()))?;
    let stats = corpus.stats();

    println!();
    println!("📚 Training Data ({})", source.describe());
    println!("   ─────────────────────────────");
    println!("   Rows in source: {}", report.stats.total_rows);
    println!("   Usable rows: {}", stats.total_rows);
    println!("   Balance Sheet: {}", stats.bs_count);
    println!("   Profit & Loss: {}", stats.pl_count);
    for warning in &report.warnings {
        println!("   ⚠️  {}", warning);
    }
    Ok(())
}

pub fn cmd_corpus_search(source: &dyn CorpusSource, query: &str, limit: usize) -> Result<()> {
    let (corpus, _) = TrainingCorpus::load(source)?;
    let hits = corpus.search(query);
    if hits.is_empty() {
        println!("No training rows match \"{}\"", query);
        return Ok(());
    }

    println!("{:<45} {:<14} {}", "PRIMARY GROUP", "STATEMENT", "CLASSIFICATION");
    println!("{}", "-".repeat(90));
    for row in hits.iter().take(limit) {
        let classification = row
            .columns
            .pl_classification
            .as_deref()
            .or(row.columns.bs_classification.as_deref())
            .unwrap_or("");
        println!(
            "{:<45} {:<14} {}",
            truncate_text(&row.primary_group, 45),
            row.fs.as_str(),
            classification
        );
    }
    if hits.len() > limit {
        println!("... and {} more", hits.len() - limit);
    }
    Ok(())
}

pub fn cmd_corpus_import(db: &Database, file: &Path) -> Result<()> {
    println!("📥 Importing training data from {}...", file.display());
    let (corpus, report) = TrainingCorpus::load(&CsvCorpusSource::new(file))
        .with_context(|| format!("Failed to load {}", file.display()))?;
    for warning in &report.warnings {
        println!("   ⚠️  {}", warning);
    }

    let imported = db
        .import_training_rows(corpus.rows())
        .context("Failed to import training rows")?;
    println!("✅ Imported {} rows ({} total)", imported, db.count_training_rows()?);
    Ok(())
}

pub fn cmd_corpus_export(source: &dyn CorpusSource, output: &Path) -> Result<()> {
    let (corpus, _) = TrainingCorpus::load(source)?;
    let file = std::fs::File::create(output)
        .with_context(|| format!("Failed to create {}", output.display()))?;
    corpus.export_csv(file)?;
    println!("✅ Exported {} rows to {}", corpus.len(), output.display());
    Ok(())
}

pub fn cmd_corpus_remove(db: &Database, primary_group: &str) -> Result<()> {
    let removed = db.deactivate_training_row(primary_group)?;
    if removed == 0 {
        println!("No active training row named \"{}\"", primary_group);
    } else {
        println!("🗑️  Removed \"{}\" from training data", primary_group);
        println!("   💡 Run 'fsmap corpus refresh' to rebuild the vector caches");
    }
    Ok(())
}
