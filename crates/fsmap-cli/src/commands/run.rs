//! Staging and database run commands (stage, run, results)

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use fsmap_core::corpus::RawTable;
use fsmap_core::db::{Database, NewStagingItem};
use fsmap_core::normalize::truncate_text;
use fsmap_core::runner::run_pending;
use fsmap_core::AccountMapper;

use super::print_batch_stats;

/// Read staging rows from CSV: `primary_group` required, `raw_id` and
/// `tenant_id` optional
pub fn read_staging_csv(path: &Path, tenant: Option<&str>) -> Result<Vec<NewStagingItem>> {
    let file = std::fs::File::open(path)
        .with_context(|| format!("Failed to open {}", path.display()))?;
    let table = RawTable::from_csv(file).context("Failed to parse staging CSV")?;
    if !table.has_column("primary_group") {
        anyhow::bail!("{} has no primary_group column", path.display());
    }

    Ok(table
        .rows
        .into_iter()
        .map(|mut row| NewStagingItem {
            tenant_id: row
                .remove("tenant_id")
                .flatten()
                .or_else(|| tenant.map(str::to_string)),
            raw_id: row.remove("raw_id").flatten(),
            primary_group: row.remove("primary_group").flatten(),
        })
        .collect())
}

pub fn cmd_stage(db: &Database, file: &Path, tenant: Option<&str>) -> Result<()> {
    println!("📥 Staging line items from {}...", file.display());
    let items = read_staging_csv(file, tenant)?;
    let staged = db
        .insert_staging_items(&items)
        .context("Failed to stage items")?;
    let pending = db.pending_items()?.len();

    println!("   Staged: {}", staged);
    println!("   Pending classification: {}", pending);
    if pending > 0 {
        println!();
        println!("   💡 Run 'fsmap run' to classify them");
    }
    Ok(())
}

pub async fn cmd_run(mapper: Arc<AccountMapper>, db: &Database, workers: usize) -> Result<()> {
    let pending = db.pending_items()?.len();
    if pending == 0 {
        println!("✅ No pending items");
        return Ok(());
    }
    println!("⚙️  Classifying {} pending items...", pending);

    let step = (pending / 20).max(1);
    let report = run_pending(mapper, db, workers, move |p| {
        if p.done % step == 0 || p.done == p.total {
            println!("   {}/{}", p.done, p.total);
        }
    })
    .await
    .context("Classification run failed")?;

    println!();
    print_batch_stats(&report.stats);
    println!("   Stored: {}", report.inserted);
    if report.already_present > 0 {
        println!("   Already stored: {}", report.already_present);
    }
    if !report.failures.is_empty() {
        println!();
        println!("❌ {} items could not be stored:", report.failures.len());
        for failure in &report.failures {
            println!(
                "   #{:<6} {:<40} {}",
                failure.stg_id,
                truncate_text(&failure.primary_group, 40),
                failure.error
            );
        }
    }
    Ok(())
}

pub fn cmd_results(db: &Database, limit: i64, review_only: bool) -> Result<()> {
    let results = db.list_classifications(limit, review_only)?;
    if results.is_empty() {
        println!("No classifications stored yet.");
        return Ok(());
    }

    println!(
        "{:<7} {:<36} {:<14} {:>6}  {:<10} {}",
        "STG", "PRIMARY GROUP", "STATEMENT", "CONF", "METHOD", "REVIEW"
    );
    println!("{}", "-".repeat(90));
    for stored in &results {
        let r = &stored.record;
        println!(
            "{:<7} {:<36} {:<14} {:>6.3}  {:<10} {}",
            stored.stg_id,
            truncate_text(&r.primary_group, 36),
            r.predicted_fs.as_str(),
            r.confidence,
            r.method_used.as_str(),
            if r.needs_review { "⚠️" } else { "" }
        );
    }
    Ok(())
}
