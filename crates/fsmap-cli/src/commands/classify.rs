//! Classification commands (classify, batch, checkpoint)

use std::path::Path;

use anyhow::{Context, Result};
use fsmap_core::batch::{
    default_checkpoint_path, inspect_checkpoint, read_batch_input, write_batch_results,
};
use fsmap_core::matchers::ScoredRow;
use fsmap_core::models::{ClassificationRecord, Method, StageOutcome};
use fsmap_core::normalize::truncate_text;
use fsmap_core::{AccountMapper, BatchOptions, BatchStats};

pub async fn cmd_classify(
    mapper: &AccountMapper,
    text: &str,
    trail: bool,
    top: Option<usize>,
    json: bool,
) -> Result<()> {
    let record = mapper.classify_one(text, trail).await;

    if json {
        println!("{}", serde_json::to_string_pretty(&record)?);
        return Ok(());
    }

    print_record(&record);

    if let Some(n) = top {
        let matches = mapper.top_matches(text, n).await;
        println!();
        print_candidates("Fuzzy", Some(&matches.fuzzy), 100.0);
        print_candidates("Semantic", matches.semantic.as_deref(), 1.0);
        print_candidates("Embeddings", matches.embedding.as_deref(), 1.0);
    }

    Ok(())
}

fn print_record(record: &ClassificationRecord) {
    let icon = if record.needs_review { "⚠️ " } else { "✅" };
    println!();
    println!("{} {}", icon, record.primary_group.trim());
    println!("   ─────────────────────────────────────────────");
    println!("   Statement:  {}", record.predicted_fs);
    println!(
        "   Confidence: {:.1}% ({})",
        record.confidence * 100.0,
        record.method_used
    );
    if let Some(matched) = &record.matched_training_row {
        println!("   Matched:    {}", matched);
    }
    if let Some(alternative) = record.low_confidence_alternative {
        println!("   Review:     low confidence, alternative {}", alternative);
    }
    if let Some(reasoning) = &record.reasoning {
        println!("   Reasoning:  {}", truncate_text(reasoning, 100));
    }

    let columns = &record.columns.columns;
    for name in fsmap_core::models::CLASSIFICATION_COLUMNS {
        if let Some(value) = columns.get(name) {
            println!("   {:<24} {}", name, value);
        }
    }

    if let Some(trail) = &record.decision_trail {
        println!();
        println!("   Decision trail:");
        for step in trail {
            let outcome = match &step.outcome {
                StageOutcome::Matched => "matched".to_string(),
                StageOutcome::BelowThreshold => "below threshold".to_string(),
                StageOutcome::NoCandidate => "no candidate".to_string(),
                StageOutcome::Degraded(reason) => {
                    format!("degraded: {}", truncate_text(reason, 60))
                }
            };
            let confidence = step
                .result
                .as_ref()
                .map(|r| format!("{:.3}", r.confidence))
                .unwrap_or_else(|| "-".to_string());
            println!("   {:<11} {:>6}  {}", step.method.as_str(), confidence, outcome);
        }
    }
}

fn print_candidates(label: &str, rows: Option<&[ScoredRow]>, scale: f64) {
    match rows {
        None => println!("   {} candidates: (unavailable)", label),
        Some([]) => println!("   {} candidates: (none)", label),
        Some(rows) => {
            println!("   {} candidates:", label);
            for row in rows {
                println!(
                    "     {:>6.3}  {:<40} {}",
                    row.score / scale,
                    truncate_text(&row.primary_group, 40),
                    row.fs
                );
            }
        }
    }
}

pub async fn cmd_batch(
    mapper: &AccountMapper,
    input: &Path,
    output: &Path,
    options: BatchOptions,
) -> Result<()> {
    let items = read_batch_input(input)
        .with_context(|| format!("Failed to read batch input {}", input.display()))?;
    println!("📥 Classifying {} rows from {}...", items.len(), input.display());

    if let Some(path) = options.checkpoint_path.as_deref() {
        let status = inspect_checkpoint(path);
        if status.exists && options.resume {
            if status.input_id.as_deref() == Some(options.input_id.as_str()) {
                println!("   ↩️  Resuming after row {}", status.processed_rows);
            } else {
                println!("   Checkpoint belongs to another input, starting fresh");
            }
        }
    }

    let step = (items.len() / 20).max(1);
    let outcome = mapper
        .classify_batch(&items, &options, |done, total, _item| {
            if done % step == 0 || done == total {
                println!("   {}/{}", done, total);
            }
        })
        .await?;

    write_batch_results(output, &outcome.results)
        .with_context(|| format!("Failed to write results to {}", output.display()))?;

    println!();
    print_batch_stats(&outcome.stats);
    println!();
    println!("✅ Wrote {} results to {}", outcome.processed_count, output.display());
    Ok(())
}

pub fn print_batch_stats(stats: &BatchStats) {
    println!("📊 Results");
    println!("   ─────────────────────────────");
    println!("   Processed: {}", stats.total_processed);
    for method in Method::all() {
        let count = stats.method_distribution.get(*method);
        if count > 0 {
            println!("   {:<11} {}", method.as_str(), count);
        }
    }
    println!(
        "   Needs review: {} ({:.1}%)",
        stats.needs_review_count, stats.needs_review_percentage
    );
    println!("   Average confidence: {:.3}", stats.average_confidence);
}

pub fn cmd_checkpoint(path: Option<&Path>, clear: bool) -> Result<()> {
    let path = path
        .map(Path::to_path_buf)
        .unwrap_or_else(default_checkpoint_path);
    let status = inspect_checkpoint(&path);

    if !status.exists {
        println!("No checkpoint at {}", path.display());
        return Ok(());
    }

    println!("Checkpoint: {}", path.display());
    if let Some(input) = &status.input_id {
        println!("   Input: {}", input);
    }
    println!("   Rows processed: {}", status.processed_rows);
    if let Some(ts) = status.timestamp {
        println!("   Saved: {}", ts.format("%Y-%m-%d %H:%M:%S UTC"));
    }

    if clear {
        std::fs::remove_file(&path)
            .with_context(|| format!("Failed to remove {}", path.display()))?;
        println!("🗑️  Checkpoint removed");
    }
    Ok(())
}
