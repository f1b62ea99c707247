//! File-based batch classification with resumable checkpoints
//!
//! A checkpoint holds every result produced so far plus the index of the
//! last processed input. It is rewritten every `checkpoint_interval` inputs
//! and removed once the whole batch completes, so a checkpoint on disk
//! always means an unfinished run.

use std::fs;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::mapper::AccountMapper;
use crate::models::{BatchStats, ClassificationRecord, CLASSIFICATION_COLUMNS};

/// Column every batch input file must have
pub const INPUT_COLUMN: &str = "primary_group";

/// Default checkpoint location (~/.local/share/fsmap/progress_checkpoint.json)
pub fn default_checkpoint_path() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("fsmap"))
        .unwrap_or_else(|| PathBuf::from("data"))
        .join("progress_checkpoint.json")
}

/// Saved progress of an unfinished batch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Identifies the input (usually its path); resume requires a match
    pub input_id: String,
    pub last_processed_idx: usize,
    pub results: Vec<ClassificationRecord>,
    pub timestamp: DateTime<Utc>,
}

impl Checkpoint {
    pub fn load(path: &Path) -> Result<Self> {
        let file = fs::File::open(path)?;
        Ok(serde_json::from_reader(BufReader::new(file))?)
    }

    /// Replace the checkpoint file as a whole
    pub fn save(&self, path: &Path) -> Result<()> {
        let dir = match path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        fs::create_dir_all(dir)?;
        let tmp = NamedTempFile::new_in(dir)?;
        {
            let mut writer = BufWriter::new(tmp.as_file());
            serde_json::to_writer_pretty(&mut writer, self)?;
            writer.flush()?;
        }
        tmp.persist(path).map_err(|e| Error::Io(e.error))?;
        Ok(())
    }
}

/// Summary of a checkpoint file, for "resume?" prompts
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CheckpointStatus {
    pub exists: bool,
    pub input_id: Option<String>,
    pub processed_rows: usize,
    pub timestamp: Option<DateTime<Utc>>,
}

/// Describe the checkpoint at `path`; missing or unreadable files report `exists: false`
pub fn inspect_checkpoint(path: &Path) -> CheckpointStatus {
    if !path.exists() {
        return CheckpointStatus::default();
    }
    match Checkpoint::load(path) {
        Ok(checkpoint) => CheckpointStatus {
            exists: true,
            input_id: Some(checkpoint.input_id),
            processed_rows: checkpoint.last_processed_idx + 1,
            timestamp: Some(checkpoint.timestamp),
        },
        Err(e) => {
            debug!(path = %path.display(), error = %e, "Ignoring unreadable checkpoint");
            CheckpointStatus::default()
        }
    }
}

/// How a batch run should checkpoint and resume
#[derive(Debug, Clone)]
pub struct BatchOptions {
    pub input_id: String,
    /// None disables checkpointing
    pub checkpoint_path: Option<PathBuf>,
    pub resume: bool,
    pub checkpoint_interval: usize,
}

impl BatchOptions {
    pub fn new(input_id: impl Into<String>) -> Self {
        Self {
            input_id: input_id.into(),
            checkpoint_path: None,
            resume: false,
            checkpoint_interval: 10,
        }
    }

    pub fn with_checkpoint(mut self, path: impl Into<PathBuf>) -> Self {
        self.checkpoint_path = Some(path.into());
        self
    }

    pub fn with_resume(mut self, resume: bool) -> Self {
        self.resume = resume;
        self
    }

    pub fn with_interval(mut self, interval: usize) -> Self {
        self.checkpoint_interval = interval.max(1);
        self
    }
}

/// Everything a finished batch produced
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchOutcome {
    pub results: Vec<ClassificationRecord>,
    pub stats: BatchStats,
    pub processed_count: usize,
    /// Input index the run resumed at, if a checkpoint was used
    pub resumed_from: Option<usize>,
}

impl AccountMapper {
    /// Classify `items` in order, checkpointing along the way.
    ///
    /// Blank items are skipped and produce no record. `progress` is called
    /// after each classified item with the 1-based input position, the
    /// input length and the item itself.
    pub async fn classify_batch<F>(
        &self,
        items: &[String],
        options: &BatchOptions,
        mut progress: F,
    ) -> Result<BatchOutcome>
    where
        F: FnMut(usize, usize, &str),
    {
        let interval = options.checkpoint_interval.max(1);
        let (mut results, start) = match self.resume_point(options) {
            Some(checkpoint) => {
                let start = checkpoint.last_processed_idx + 1;
                info!(
                    input = %options.input_id,
                    start_row = start + 1,
                    restored = checkpoint.results.len(),
                    "Resuming batch from checkpoint"
                );
                (checkpoint.results, Some(start))
            }
            None => (Vec::with_capacity(items.len()), None),
        };

        let total = items.len();
        for (idx, item) in items.iter().enumerate().skip(start.unwrap_or(0)) {
            if !item.trim().is_empty() {
                results.push(self.classify_one(item, false).await);
                progress(idx + 1, total, item);
            }

            // Counted by input position so blank rows still advance it
            if (idx + 1) % interval == 0 {
                if let Some(path) = &options.checkpoint_path {
                    let checkpoint = Checkpoint {
                        input_id: options.input_id.clone(),
                        last_processed_idx: idx,
                        results: results.clone(),
                        timestamp: Utc::now(),
                    };
                    match checkpoint.save(path) {
                        Ok(()) => debug!(row = idx + 1, "Saved checkpoint"),
                        Err(e) => warn!(path = %path.display(), error = %e, "Checkpoint write failed"),
                    }
                }
            }
        }

        if let Some(path) = &options.checkpoint_path {
            if path.exists() {
                if let Err(e) = fs::remove_file(path) {
                    warn!(path = %path.display(), error = %e, "Failed to remove checkpoint");
                }
            }
        }

        let stats = BatchStats::from_records(&results);
        info!(
            processed = results.len(),
            needs_review = stats.needs_review_count,
            llm_calls = stats.llm_calls,
            "Batch complete"
        );
        Ok(BatchOutcome {
            processed_count: results.len(),
            results,
            stats,
            resumed_from: start,
        })
    }

    fn resume_point(&self, options: &BatchOptions) -> Option<Checkpoint> {
        if !options.resume {
            return None;
        }
        let path = options.checkpoint_path.as_ref()?;
        if !path.exists() {
            return None;
        }
        match Checkpoint::load(path) {
            Ok(checkpoint) if checkpoint.input_id == options.input_id => Some(checkpoint),
            Ok(checkpoint) => {
                info!(
                    checkpoint_input = %checkpoint.input_id,
                    input = %options.input_id,
                    "Checkpoint belongs to another input, starting fresh"
                );
                None
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Unreadable checkpoint, starting fresh");
                None
            }
        }
    }
}

/// Read the `primary_group` column of a CSV file
pub fn read_batch_input(path: &Path) -> Result<Vec<String>> {
    let file = fs::File::open(path)
        .map_err(|e| Error::NotFound(format!("Batch input {}: {}", path.display(), e)))?;
    read_batch_csv(file)
}

pub fn read_batch_csv<R: Read>(reader: R) -> Result<Vec<String>> {
    let mut rdr = csv::ReaderBuilder::new().flexible(true).from_reader(reader);
    let column = rdr
        .headers()?
        .iter()
        .position(|h| h.trim() == INPUT_COLUMN)
        .ok_or_else(|| {
            Error::Validation(format!("Input file must have \"{}\" column", INPUT_COLUMN))
        })?;

    let mut items = Vec::new();
    for record in rdr.records() {
        let record = record?;
        items.push(record.get(column).unwrap_or("").to_string());
    }
    Ok(items)
}

/// Header row of a batch results file
pub fn result_headers() -> Vec<&'static str> {
    let mut headers = vec![
        "primary_group",
        "predicted_fs",
        "confidence",
        "method_used",
        "matched_training_row",
        "needs_review",
        "low_confidence_alternative",
        "reasoning",
        "fs",
    ];
    headers.extend_from_slice(&CLASSIFICATION_COLUMNS);
    headers.push("matched_row_full");
    headers
}

/// Write records as CSV, one row per record
pub fn write_batch_results(path: &Path, records: &[ClassificationRecord]) -> Result<()> {
    if let Some(dir) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(dir)?;
    }
    write_results_csv(fs::File::create(path)?, records)
}

pub fn write_results_csv<W: Write>(writer: W, records: &[ClassificationRecord]) -> Result<()> {
    let mut wtr = csv::Writer::from_writer(writer);
    wtr.write_record(result_headers())?;
    for record in records {
        let mut row = vec![
            record.primary_group.clone(),
            record.predicted_fs.to_string(),
            format!("{:.4}", record.confidence),
            record.method_used.to_string(),
            record.matched_training_row.clone().unwrap_or_default(),
            record.needs_review.to_string(),
            record
                .low_confidence_alternative
                .map(|fs| fs.to_string())
                .unwrap_or_default(),
            record.reasoning.clone().unwrap_or_default(),
            record.columns.fs.to_string(),
        ];
        row.extend(
            CLASSIFICATION_COLUMNS
                .iter()
                .map(|c| record.columns.columns.get(c).unwrap_or("").to_string()),
        );
        row.push(match &record.matched_row_full {
            Some(full) => serde_json::to_string(full)?,
            None => String::new(),
        });
        wtr.write_record(&row)?;
    }
    wtr.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::AIClient;
    use crate::corpus::TrainingCorpus;
    use crate::models::{FsKind, Method, TrainingRow};
    use crate::settings::MapperConfig;
    use tempfile::TempDir;

    async fn mapper(dir: &TempDir) -> AccountMapper {
        let corpus = TrainingCorpus::new(vec![
            TrainingRow::new("Cash at Bank", FsKind::BalanceSheet),
            TrainingRow::new("Office Rent", FsKind::ProfitAndLoss),
        ]);
        let mut config = MapperConfig::default();
        config.vectors.cache_dir = dir.path().join("cache");
        AccountMapper::build(corpus, config, AIClient::mock())
            .await
            .unwrap()
    }

    fn items(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_batch_skips_blank_and_reports_progress() {
        let dir = TempDir::new().unwrap();
        let mapper = mapper(&dir).await;
        let inputs = items(&["Cash at Bank", "  ", "office rent"]);

        let mut seen = Vec::new();
        let outcome = mapper
            .classify_batch(&inputs, &BatchOptions::new("in.csv"), |done, total, item| {
                seen.push((done, total, item.to_string()))
            })
            .await
            .unwrap();

        assert_eq!(outcome.processed_count, 2);
        assert_eq!(outcome.stats.method_distribution.exact, 2);
        assert_eq!(outcome.resumed_from, None);
        assert_eq!(
            seen,
            vec![(1, 3, "Cash at Bank".to_string()), (3, 3, "office rent".to_string())]
        );
    }

    #[tokio::test]
    async fn test_blank_row_on_interval_still_checkpoints() {
        let dir = TempDir::new().unwrap();
        let mapper = mapper(&dir).await;
        let path = dir.path().join("checkpoint.json");
        let inputs = items(&["Cash at Bank", "  ", "Office Rent"]);
        let options = BatchOptions::new("in.csv")
            .with_checkpoint(&path)
            .with_interval(2);

        let mut mid_run = Vec::new();
        mapper
            .classify_batch(&inputs, &options, |done, _, _| {
                mid_run.push((done, inspect_checkpoint(&path)))
            })
            .await
            .unwrap();

        assert_eq!(mid_run.len(), 2);
        assert!(!mid_run[0].1.exists);
        // the blank second row closed the first interval
        let (done, status) = &mid_run[1];
        assert_eq!(*done, 3);
        assert!(status.exists);
        assert_eq!(status.processed_rows, 2);
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_resume_from_matching_checkpoint() {
        let dir = TempDir::new().unwrap();
        let mapper = mapper(&dir).await;
        let path = dir.path().join("checkpoint.json");
        let inputs = items(&["Cash at Bank", "Office Rent", "Cash at Bank"]);

        let first = mapper.classify_one("Cash at Bank", false).await;
        Checkpoint {
            input_id: "in.csv".into(),
            last_processed_idx: 0,
            results: vec![first],
            timestamp: Utc::now(),
        }
        .save(&path)
        .unwrap();

        let status = inspect_checkpoint(&path);
        assert!(status.exists);
        assert_eq!(status.processed_rows, 1);

        let options = BatchOptions::new("in.csv")
            .with_checkpoint(&path)
            .with_resume(true);
        let mut calls = 0;
        let outcome = mapper
            .classify_batch(&inputs, &options, |_, _, _| calls += 1)
            .await
            .unwrap();

        assert_eq!(outcome.resumed_from, Some(1));
        assert_eq!(calls, 2);
        assert_eq!(outcome.processed_count, 3);
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_checkpoint_for_other_input_is_ignored() {
        let dir = TempDir::new().unwrap();
        let mapper = mapper(&dir).await;
        let path = dir.path().join("checkpoint.json");
        Checkpoint {
            input_id: "other.csv".into(),
            last_processed_idx: 5,
            results: Vec::new(),
            timestamp: Utc::now(),
        }
        .save(&path)
        .unwrap();

        let options = BatchOptions::new("in.csv")
            .with_checkpoint(&path)
            .with_resume(true);
        let outcome = mapper
            .classify_batch(&items(&["Office Rent"]), &options, |_, _, _| {})
            .await
            .unwrap();
        assert_eq!(outcome.resumed_from, None);
        assert_eq!(outcome.processed_count, 1);
        assert_eq!(outcome.results[0].method_used, Method::Exact);
    }

    #[test]
    fn test_inspect_missing_or_corrupt_checkpoint() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("checkpoint.json");
        assert!(!inspect_checkpoint(&path).exists);
        fs::write(&path, "{not json").unwrap();
        assert!(!inspect_checkpoint(&path).exists);
    }

    #[test]
    fn test_read_batch_csv() {
        let data = "id,primary_group\n1,Cash at Bank\n2,\n3,Office Rent\n";
        let items = read_batch_csv(data.as_bytes()).unwrap();
        assert_eq!(items, vec!["Cash at Bank", "", "Office Rent"]);

        let err = read_batch_csv("name\nRent\n".as_bytes()).unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[tokio::test]
    async fn test_write_results_csv() {
        let dir = TempDir::new().unwrap();
        let mapper = mapper(&dir).await;
        let record = mapper.classify_one("Office Rent", false).await;

        let mut out = Vec::new();
        write_results_csv(&mut out, &[record]).unwrap();
        let text = String::from_utf8(out).unwrap();
        let mut lines = text.lines();
        assert!(lines.next().unwrap().starts_with("primary_group,predicted_fs,confidence"));
        let row = lines.next().unwrap();
        assert!(row.starts_with("Office Rent,Profit & Loss,1.0000,exact,Office Rent,false"));
    }
}
