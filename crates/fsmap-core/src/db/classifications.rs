//! Classification results (the persistence sink)

use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;

use super::{parse_datetime, Database};
use crate::error::{Error, Result};
use crate::models::{
    ClassificationColumns, ClassificationRecord, FsKind, Method, PendingItem, PredictedColumns,
    TrainingRow,
};

/// Store `record` for `item` unless that staging item already has a result.
///
/// Takes a plain connection so callers can run it inside their own
/// transaction. Returns true when a row was written.
pub fn insert_classification(
    conn: &Connection,
    item: &PendingItem,
    record: &ClassificationRecord,
) -> Result<bool> {
    let c = &record.columns.columns;
    let matched_row_full = record
        .matched_row_full
        .as_ref()
        .map(serde_json::to_string)
        .transpose()?;

    let inserted = conn.execute(
        r#"
        INSERT INTO classifications (
            stg_id, raw_id, tenant_id, primary_group, fs, predicted_fs, confidence,
            bs_main_category, bs_classification, bs_sub_classification, bs_sub_classification_2,
            pl_classification, pl_sub_classification, pl_classification_1,
            cf_classification, cf_sub_classification, expense_type,
            method_used, matched_training_row, matched_row_full,
            needs_review, low_confidence_alternative, reasoning
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(stg_id) DO NOTHING
        "#,
        params![
            item.stg_id,
            item.raw_id,
            item.tenant_id,
            item.primary_group,
            record.columns.fs.as_str(),
            record.predicted_fs.as_str(),
            record.confidence,
            c.bs_main_category,
            c.bs_classification,
            c.bs_sub_classification,
            c.bs_sub_classification_2,
            c.pl_classification,
            c.pl_sub_classification,
            c.pl_classification_1,
            c.cf_classification,
            c.cf_sub_classification,
            c.expense_type,
            record.method_used.as_str(),
            record.matched_training_row,
            matched_row_full,
            record.needs_review,
            record.low_confidence_alternative.map(|fs| fs.as_str()),
            record.reasoning,
        ],
    )?;
    Ok(inserted > 0)
}

/// A persisted result with its staging identifiers
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StoredClassification {
    pub id: i64,
    pub stg_id: i64,
    pub tenant_id: Option<String>,
    pub raw_id: Option<String>,
    pub record: ClassificationRecord,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

const SELECT_COLUMNS: &str = r#"
    id, stg_id, tenant_id, raw_id, primary_group, predicted_fs, confidence,
    bs_main_category, bs_classification, bs_sub_classification, bs_sub_classification_2,
    pl_classification, pl_sub_classification, pl_classification_1,
    cf_classification, cf_sub_classification, expense_type,
    method_used, matched_training_row, matched_row_full,
    needs_review, low_confidence_alternative, reasoning, created_at
"#;

/// Row as stored, before the text columns are parsed
struct RawStored {
    id: i64,
    stg_id: i64,
    tenant_id: Option<String>,
    raw_id: Option<String>,
    primary_group: String,
    predicted_fs: String,
    confidence: f64,
    columns: ClassificationColumns,
    method_used: String,
    matched_training_row: Option<String>,
    matched_row_full: Option<String>,
    needs_review: bool,
    low_confidence_alternative: Option<String>,
    reasoning: Option<String>,
    created_at: String,
}

fn read_raw(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawStored> {
    Ok(RawStored {
        id: row.get(0)?,
        stg_id: row.get(1)?,
        tenant_id: row.get(2)?,
        raw_id: row.get(3)?,
        primary_group: row.get(4)?,
        predicted_fs: row.get(5)?,
        confidence: row.get(6)?,
        columns: ClassificationColumns {
            bs_main_category: row.get(7)?,
            bs_classification: row.get(8)?,
            bs_sub_classification: row.get(9)?,
            bs_sub_classification_2: row.get(10)?,
            pl_classification: row.get(11)?,
            pl_sub_classification: row.get(12)?,
            pl_classification_1: row.get(13)?,
            cf_classification: row.get(14)?,
            cf_sub_classification: row.get(15)?,
            expense_type: row.get(16)?,
        },
        method_used: row.get(17)?,
        matched_training_row: row.get(18)?,
        matched_row_full: row.get(19)?,
        needs_review: row.get(20)?,
        low_confidence_alternative: row.get(21)?,
        reasoning: row.get(22)?,
        created_at: row.get(23)?,
    })
}

impl RawStored {
    fn into_stored(raw: Self) -> Result<StoredClassification> {
        let predicted_fs: FsKind = raw.predicted_fs.parse().map_err(Error::InvalidData)?;
        let method_used: Method = raw.method_used.parse().map_err(Error::InvalidData)?;
        let low_confidence_alternative = raw
            .low_confidence_alternative
            .map(|s| s.parse::<FsKind>())
            .transpose()
            .map_err(Error::InvalidData)?;
        let matched_row_full = raw
            .matched_row_full
            .map(|json| serde_json::from_str::<TrainingRow>(&json))
            .transpose()?;

        Ok(StoredClassification {
            id: raw.id,
            stg_id: raw.stg_id,
            tenant_id: raw.tenant_id,
            raw_id: raw.raw_id,
            record: ClassificationRecord {
                primary_group: raw.primary_group,
                predicted_fs,
                confidence: raw.confidence,
                method_used,
                matched_training_row: raw.matched_training_row,
                needs_review: raw.needs_review,
                low_confidence_alternative,
                reasoning: raw.reasoning,
                columns: PredictedColumns {
                    fs: predicted_fs,
                    columns: raw.columns,
                },
                matched_row_full,
                decision_trail: None,
            },
            created_at: parse_datetime(&raw.created_at),
        })
    }
}

impl Database {
    /// Result stored for one staging item
    pub fn get_classification(&self, stg_id: i64) -> Result<Option<StoredClassification>> {
        let conn = self.conn()?;
        let raw = conn
            .query_row(
                &format!("SELECT {} FROM classifications WHERE stg_id = ?", SELECT_COLUMNS),
                params![stg_id],
                read_raw,
            )
            .optional()?;
        raw.map(RawStored::into_stored).transpose()
    }

    /// Most recent results first
    pub fn list_classifications(
        &self,
        limit: i64,
        needs_review_only: bool,
    ) -> Result<Vec<StoredClassification>> {
        let conn = self.conn()?;
        let sql = format!(
            "SELECT {} FROM classifications WHERE (? = 0 OR needs_review = 1) ORDER BY id DESC LIMIT ?",
            SELECT_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let raws = stmt
            .query_map(params![needs_review_only, limit], read_raw)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        raws.into_iter().map(RawStored::into_stored).collect()
    }

    pub fn count_classifications(&self) -> Result<i64> {
        let conn = self.conn()?;
        let count = conn.query_row("SELECT COUNT(*) FROM classifications", [], |row| row.get(0))?;
        Ok(count)
    }
}
