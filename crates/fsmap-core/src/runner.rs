//! Classify every pending staging item with a bounded worker pool
//!
//! Workers pull items from a shared queue. Each worker checks out one pooled
//! connection when it starts and keeps it until the queue is drained, so no
//! two workers ever share a handle. Every item is committed in its own
//! transaction; a failed write rolls back that item only and is reported in
//! [`RunReport::failures`].

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::db::{insert_classification, Database, DbConn};
use crate::error::{Error, Result};
use crate::mapper::AccountMapper;
use crate::models::{BatchStats, ClassificationRecord, PendingItem};

/// An item whose result could not be stored
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemFailure {
    pub stg_id: i64,
    pub primary_group: String,
    pub error: String,
}

/// Outcome of one `run_pending` pass
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    pub total_pending: usize,
    pub inserted: usize,
    /// Results another writer stored first
    pub already_present: usize,
    pub failures: Vec<ItemFailure>,
    pub stats: BatchStats,
}

/// Progress event passed to the `run_pending` callback
#[derive(Debug)]
pub struct RunProgress<'a> {
    /// Items finished so far, including this one
    pub done: usize,
    pub total: usize,
    pub item: &'a PendingItem,
    pub record: &'a ClassificationRecord,
    pub stored: bool,
}

#[derive(Default)]
struct WorkerTally {
    inserted: usize,
    already_present: usize,
    failures: Vec<ItemFailure>,
    records: Vec<ClassificationRecord>,
}

/// Classify and store every pending item.
///
/// `workers` is clamped to the pool size. Returns early, without touching
/// the pool further, when nothing is pending.
pub async fn run_pending<F>(
    mapper: Arc<AccountMapper>,
    db: &Database,
    workers: usize,
    progress: F,
) -> Result<RunReport>
where
    F: Fn(RunProgress<'_>) + Send + Sync + 'static,
{
    let pending = db.pending_items()?;
    let total = pending.len();
    if total == 0 {
        info!("No pending items");
        return Ok(RunReport::default());
    }

    let workers = workers.clamp(1, db.max_connections()).min(total);
    info!(pending = total, workers, "Classifying pending items");

    let queue = Arc::new(Mutex::new(VecDeque::from(pending)));
    let done = Arc::new(AtomicUsize::new(0));
    let progress = Arc::new(progress);

    let mut handles = Vec::with_capacity(workers);
    for worker_id in 0..workers {
        let conn = db.conn()?;
        let queue = Arc::clone(&queue);
        let mapper = Arc::clone(&mapper);
        let done = Arc::clone(&done);
        let progress = Arc::clone(&progress);
        handles.push(tokio::spawn(async move {
            let mut conn = conn;
            let mut tally = WorkerTally::default();
            while let Some(item) = next_item(&queue) {
                let record = mapper.classify_one(&item.primary_group, false).await;
                let stored = match store(&mut conn, &item, &record) {
                    Ok(true) => {
                        tally.inserted += 1;
                        true
                    }
                    Ok(false) => {
                        debug!(worker_id, stg_id = item.stg_id, "Already classified");
                        tally.already_present += 1;
                        false
                    }
                    Err(e) => {
                        warn!(worker_id, stg_id = item.stg_id, error = %e, "Failed to store classification");
                        tally.failures.push(ItemFailure {
                            stg_id: item.stg_id,
                            primary_group: item.primary_group.clone(),
                            error: e.to_string(),
                        });
                        false
                    }
                };
                let finished = done.fetch_add(1, Ordering::Relaxed) + 1;
                progress(RunProgress {
                    done: finished,
                    total,
                    item: &item,
                    record: &record,
                    stored,
                });
                tally.records.push(record);
            }
            tally
        }));
    }

    let mut report = RunReport {
        total_pending: total,
        ..Default::default()
    };
    let mut records = Vec::with_capacity(total);
    for handle in handles {
        let tally = handle.await?;
        report.inserted += tally.inserted;
        report.already_present += tally.already_present;
        report.failures.extend(tally.failures);
        records.extend(tally.records);
    }
    report.stats = BatchStats::from_records(&records);

    info!(
        inserted = report.inserted,
        already_present = report.already_present,
        failed = report.failures.len(),
        "Pending run complete"
    );
    Ok(report)
}

fn next_item(queue: &Mutex<VecDeque<PendingItem>>) -> Option<PendingItem> {
    queue
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
        .pop_front()
}

/// Insert one result in its own transaction; dropping the transaction on
/// error rolls it back
fn store(conn: &mut DbConn, item: &PendingItem, record: &ClassificationRecord) -> Result<bool> {
    let tx = conn
        .transaction()
        .map_err(|e| Error::Persistence(e.to_string()))?;
    let inserted = insert_classification(&tx, item, record)
        .map_err(|e| Error::Persistence(e.to_string()))?;
    tx.commit().map_err(|e| Error::Persistence(e.to_string()))?;
    Ok(inserted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::AIClient;
    use crate::corpus::TrainingCorpus;
    use crate::db::NewStagingItem;
    use crate::models::{FsKind, Method, TrainingRow};
    use crate::settings::MapperConfig;
    use tempfile::TempDir;

    fn staged(tenant: &str, name: &str) -> NewStagingItem {
        NewStagingItem {
            tenant_id: Some(tenant.to_string()),
            raw_id: Some(format!("raw-{}", name)),
            primary_group: Some(name.to_string()),
        }
    }

    async fn mapper(dir: &TempDir) -> Arc<AccountMapper> {
        let corpus = TrainingCorpus::new(vec![
            TrainingRow::new("Cash at Bank", FsKind::BalanceSheet),
            TrainingRow::new("Office Rent", FsKind::ProfitAndLoss),
        ]);
        let mut config = MapperConfig::default();
        config.vectors.cache_dir = dir.path().to_path_buf();
        Arc::new(
            AccountMapper::build(corpus, config, AIClient::mock())
                .await
                .unwrap(),
        )
    }

    #[tokio::test]
    async fn test_run_pending_inserts_once() {
        let dir = TempDir::new().unwrap();
        let db = Database::in_memory().unwrap();
        db.insert_staging_items(&[
            staged("t1", "Cash at Bank"),
            staged("t1", "office rent"),
            staged("t2", "Cash at Bank"),
            NewStagingItem::default(),
            staged("t2", "   "),
        ])
        .unwrap();
        let mapper = mapper(&dir).await;

        let report = run_pending(Arc::clone(&mapper), &db, 3, |_| {})
            .await
            .unwrap();
        assert_eq!(report.total_pending, 3);
        assert_eq!(report.inserted, 3);
        assert!(report.failures.is_empty());
        assert_eq!(report.stats.method_distribution.exact, 3);
        assert_eq!(db.count_classifications().unwrap(), 3);

        // Second pass finds nothing to do
        let again = run_pending(mapper, &db, 3, |_| {}).await.unwrap();
        assert_eq!(again.total_pending, 0);
        assert_eq!(again.inserted, 0);
        assert_eq!(db.count_classifications().unwrap(), 3);
    }

    #[tokio::test]
    async fn test_run_pending_progress_and_stored_rows() {
        let dir = TempDir::new().unwrap();
        let db = Database::in_memory().unwrap();
        let stg_id = db.insert_staging_item(&staged("t1", "Office Rent")).unwrap();
        let mapper = mapper(&dir).await;

        let seen = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&seen);
        let report = run_pending(mapper, &db, 10, move |p| {
            assert_eq!(p.total, 1);
            assert!(p.stored);
            counter.fetch_add(1, Ordering::Relaxed);
        })
        .await
        .unwrap();
        assert_eq!(report.inserted, 1);
        assert_eq!(seen.load(Ordering::Relaxed), 1);

        let stored = db.get_classification(stg_id).unwrap().unwrap();
        assert_eq!(stored.tenant_id.as_deref(), Some("t1"));
        assert_eq!(stored.record.method_used, Method::Exact);
        assert_eq!(stored.record.predicted_fs, FsKind::ProfitAndLoss);
        assert_eq!(
            stored.record.matched_row_full.unwrap().primary_group,
            "Office Rent"
        );
    }

    #[test]
    fn test_store_is_insert_once() {
        let db = Database::in_memory().unwrap();
        let stg_id = db.insert_staging_item(&staged("t1", "Rent")).unwrap();
        let item = PendingItem {
            stg_id,
            tenant_id: Some("t1".into()),
            raw_id: None,
            primary_group: "Rent".into(),
        };
        let row = TrainingRow::new("Rent", FsKind::ProfitAndLoss);
        let record = ClassificationRecord {
            primary_group: "Rent".into(),
            predicted_fs: FsKind::ProfitAndLoss,
            confidence: 1.0,
            method_used: Method::Exact,
            matched_training_row: Some("Rent".into()),
            needs_review: false,
            low_confidence_alternative: None,
            reasoning: None,
            columns: crate::models::PredictedColumns {
                fs: FsKind::ProfitAndLoss,
                columns: Default::default(),
            },
            matched_row_full: Some(row),
            decision_trail: None,
        };

        let mut conn = db.conn().unwrap();
        assert!(store(&mut conn, &item, &record).unwrap());
        assert!(!store(&mut conn, &item, &record).unwrap());
        assert_eq!(db.count_classifications().unwrap(), 1);
    }
}
