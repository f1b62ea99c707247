//! Training corpus: labeled primary groups loaded in bulk from a source
//!
//! A corpus is read as a [`RawTable`] (column names plus string cells) from a
//! [`CorpusSource`], validated, and converted into typed [`TrainingRow`]s.
//! Validation errors reject the whole load; warnings are reported but rows
//! that cannot be typed (blank `primary_group`, unknown `fs`) are skipped.

use std::collections::HashMap;
use std::fs::OpenOptions;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{Error, Result};
use crate::models::{
    ClassificationColumns, FsKind, TrainingRow, CLASSIFICATION_COLUMNS, REQUIRED_COLUMNS,
};
use crate::normalize::normalize;

/// Column names plus rows of optional string cells, as read from a source
#[derive(Debug, Clone, Default)]
pub struct RawTable {
    pub columns: Vec<String>,
    pub rows: Vec<HashMap<String, Option<String>>>,
}

impl RawTable {
    pub fn has_column(&self, name: &str) -> bool {
        self.columns.iter().any(|c| c == name)
    }

    /// Read a CSV with a header row. Blank cells become `None`.
    pub fn from_csv<R: Read>(reader: R) -> Result<Self> {
        let mut rdr = csv::ReaderBuilder::new().flexible(true).from_reader(reader);
        let columns: Vec<String> = rdr.headers()?.iter().map(|h| h.trim().to_string()).collect();

        let mut rows = Vec::new();
        for record in rdr.records() {
            let record = record?;
            let row = columns
                .iter()
                .enumerate()
                .map(|(i, col)| {
                    let cell = record
                        .get(i)
                        .map(str::trim)
                        .filter(|v| !v.is_empty())
                        .map(String::from);
                    (col.clone(), cell)
                })
                .collect();
            rows.push(row);
        }

        Ok(Self { columns, rows })
    }
}

/// Outcome of validating a raw corpus table
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub valid: bool,
    /// Block loading
    pub errors: Vec<String>,
    /// Reported only
    pub warnings: Vec<String>,
    pub stats: CorpusStats,
}

/// Size and composition of a corpus
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CorpusStats {
    pub total_rows: usize,
    pub bs_count: usize,
    pub pl_count: usize,
    pub last_loaded: Option<DateTime<Utc>>,
}

/// Where training rows come from
pub trait CorpusSource: Send + Sync {
    /// Bulk read of every active training row
    fn read_table(&self) -> Result<RawTable>;

    /// Persist one new training row
    fn append_row(&self, row: &TrainingRow) -> Result<()>;

    /// Human-readable description for logs
    fn describe(&self) -> String;
}

/// Validate a raw table and convert its usable rows.
///
/// Returns the report together with the typed rows. When the report is not
/// valid the row list is empty.
pub fn validate_table(table: &RawTable) -> (ValidationReport, Vec<TrainingRow>) {
    let mut report = ValidationReport::default();

    let missing: Vec<&str> = REQUIRED_COLUMNS
        .iter()
        .copied()
        .filter(|c| !table.has_column(c))
        .collect();
    if !missing.is_empty() {
        report
            .errors
            .push(format!("Missing required columns: {}", missing.join(", ")));
        report.stats.total_rows = table.rows.len();
        return (report, Vec::new());
    }

    let mut empty_counts: HashMap<&str, usize> = HashMap::new();
    let mut invalid_fs: Vec<String> = Vec::new();
    let mut seen: HashMap<String, usize> = HashMap::new();
    let mut rows = Vec::with_capacity(table.rows.len());

    for raw in &table.rows {
        let cell = |name: &str| raw.get(name).and_then(|v| v.as_deref());

        let primary_group = cell("primary_group").map(str::trim).unwrap_or("");
        if primary_group.is_empty() {
            *empty_counts.entry("primary_group").or_default() += 1;
        }
        let fs = match cell("fs") {
            None => {
                *empty_counts.entry("fs").or_default() += 1;
                None
            }
            Some(value) => match value.parse::<FsKind>() {
                Ok(fs) => Some(fs),
                Err(_) => {
                    if !invalid_fs.iter().any(|v| v == value) {
                        invalid_fs.push(value.to_string());
                    }
                    None
                }
            },
        };

        let (Some(fs), false) = (fs, primary_group.is_empty()) else {
            continue;
        };

        *seen.entry(normalize(primary_group)).or_default() += 1;

        let mut columns = ClassificationColumns::default();
        for name in CLASSIFICATION_COLUMNS {
            columns.set(name, cell(name).map(String::from));
        }
        rows.push(TrainingRow {
            primary_group: primary_group.to_string(),
            fs,
            columns,
        });
    }

    for col in REQUIRED_COLUMNS {
        if let Some(count) = empty_counts.get(col) {
            report
                .warnings
                .push(format!("Column '{}' has {} empty values", col, count));
        }
    }
    if !invalid_fs.is_empty() {
        report
            .warnings
            .push(format!("Invalid fs values found: {}", invalid_fs.join(", ")));
    }
    let duplicate_keys = seen.values().filter(|&&n| n > 1).count();
    if duplicate_keys > 0 {
        report.warnings.push(format!(
            "Found {} duplicate primary_group entries",
            duplicate_keys
        ));
    }

    report.stats = CorpusStats {
        total_rows: table.rows.len(),
        bs_count: rows.iter().filter(|r| r.fs == FsKind::BalanceSheet).count(),
        pl_count: rows.iter().filter(|r| r.fs == FsKind::ProfitAndLoss).count(),
        last_loaded: None,
    };
    report.valid = true;
    (report, rows)
}

/// In-memory training corpus
#[derive(Debug, Clone, Default)]
pub struct TrainingCorpus {
    rows: Vec<TrainingRow>,
    loaded_at: Option<DateTime<Utc>>,
}

impl TrainingCorpus {
    pub fn new(rows: Vec<TrainingRow>) -> Self {
        Self {
            rows,
            loaded_at: Some(Utc::now()),
        }
    }

    /// Read, validate and convert a corpus from `source`.
    ///
    /// An invalid table is rejected with [`Error::CorpusRejected`].
    pub fn load(source: &dyn CorpusSource) -> Result<(Self, ValidationReport)> {
        let table = source.read_table()?;
        let (mut report, rows) = validate_table(&table);
        if !report.valid {
            return Err(Error::CorpusRejected(report));
        }
        for warning in &report.warnings {
            warn!(source = %source.describe(), "Training data: {}", warning);
        }

        let corpus = Self::new(rows);
        report.stats.last_loaded = corpus.loaded_at;
        info!(
            source = %source.describe(),
            rows = corpus.len(),
            "Loaded training corpus"
        );
        Ok((corpus, report))
    }

    pub fn rows(&self) -> &[TrainingRow] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn stats(&self) -> CorpusStats {
        CorpusStats {
            total_rows: self.rows.len(),
            bs_count: self
                .rows
                .iter()
                .filter(|r| r.fs == FsKind::BalanceSheet)
                .count(),
            pl_count: self
                .rows
                .iter()
                .filter(|r| r.fs == FsKind::ProfitAndLoss)
                .count(),
            last_loaded: self.loaded_at,
        }
    }

    /// Case-insensitive substring search over `primary_group`
    pub fn search(&self, query: &str) -> Vec<&TrainingRow> {
        let needle = query.trim().to_lowercase();
        if needle.is_empty() {
            return Vec::new();
        }
        self.rows
            .iter()
            .filter(|r| r.primary_group.to_lowercase().contains(&needle))
            .collect()
    }

    /// Whether a row with the same normalized `primary_group` exists
    pub fn contains(&self, primary_group: &str) -> bool {
        let key = normalize(primary_group);
        self.rows.iter().any(|r| normalize(&r.primary_group) == key)
    }

    /// Build a new row from user input without adding it.
    ///
    /// Rejects empty names, invalid `fs` labels and normalized duplicates.
    pub fn prepare_row(&self, primary_group: &str, fs: &str) -> Result<TrainingRow> {
        let name = primary_group.trim();
        if name.is_empty() {
            return Err(Error::Validation("Primary group cannot be empty".into()));
        }
        let fs: FsKind = fs.parse().map_err(Error::Validation)?;
        if self.contains(name) {
            return Err(Error::Validation(format!(
                "Primary group \"{}\" already exists in training data",
                name
            )));
        }
        Ok(TrainingRow::new(name, fs))
    }

    /// Validate and append a new row, returning the new row count
    pub fn add_row(&mut self, primary_group: &str, fs: &str) -> Result<usize> {
        let row = self.prepare_row(primary_group, fs)?;
        self.rows.push(row);
        Ok(self.rows.len())
    }

    /// Write the corpus as CSV with all twelve columns
    pub fn export_csv<W: Write>(&self, writer: W) -> Result<()> {
        write_rows_csv(writer, &self.rows, true)
    }
}

/// Header row for corpus CSV files
pub fn corpus_headers() -> Vec<&'static str> {
    let mut headers = REQUIRED_COLUMNS.to_vec();
    headers.extend_from_slice(&CLASSIFICATION_COLUMNS);
    headers
}

fn write_rows_csv<W: Write>(writer: W, rows: &[TrainingRow], headers: bool) -> Result<()> {
    let mut wtr = csv::Writer::from_writer(writer);
    if headers {
        wtr.write_record(corpus_headers())?;
    }
    for row in rows {
        let mut record = vec![row.primary_group.as_str(), row.fs.as_str()];
        record.extend(
            CLASSIFICATION_COLUMNS
                .iter()
                .map(|c| row.columns.get(c).unwrap_or("")),
        );
        wtr.write_record(&record)?;
    }
    wtr.flush()?;
    Ok(())
}

/// Corpus stored in a CSV file with a header row
#[derive(Debug, Clone)]
pub struct CsvCorpusSource {
    path: PathBuf,
}

impl CsvCorpusSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl CorpusSource for CsvCorpusSource {
    fn read_table(&self) -> Result<RawTable> {
        let file = std::fs::File::open(&self.path).map_err(|e| {
            Error::NotFound(format!(
                "Training data {}: {}",
                self.path.display(),
                e
            ))
        })?;
        RawTable::from_csv(file)
    }

    fn append_row(&self, row: &TrainingRow) -> Result<()> {
        let existing = std::fs::metadata(&self.path)
            .map(|m| m.len() > 0)
            .unwrap_or(false);
        if !existing {
            let file = std::fs::File::create(&self.path)?;
            return write_rows_csv(file, std::slice::from_ref(row), true);
        }

        // Follow the file's own column order
        let headers: Vec<String> = csv::Reader::from_path(&self.path)?
            .headers()?
            .iter()
            .map(|h| h.trim().to_string())
            .collect();
        let record: Vec<&str> = headers
            .iter()
            .map(|h| match h.as_str() {
                "primary_group" => row.primary_group.as_str(),
                "fs" => row.fs.as_str(),
                other => row.columns.get(other).unwrap_or(""),
            })
            .collect();

        let mut file = OpenOptions::new().read(true).append(true).open(&self.path)?;
        // Without a final newline the record would join the last row
        file.seek(SeekFrom::End(-1))?;
        let mut last = [0u8; 1];
        file.read_exact(&mut last)?;
        if last[0] != b'\n' {
            file.write_all(b"\n")?;
        }
        let mut wtr = csv::Writer::from_writer(file);
        wtr.write_record(&record)?;
        wtr.flush()?;
        Ok(())
    }

    fn describe(&self) -> String {
        format!("csv:{}", self.path.display())
    }
}
