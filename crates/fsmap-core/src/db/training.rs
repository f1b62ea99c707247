//! Training corpus table

use std::collections::HashMap;

use rusqlite::{params, Connection};

use super::Database;
use crate::corpus::{CorpusSource, RawTable};
use crate::error::Result;
use crate::models::{TrainingRow, CLASSIFICATION_COLUMNS, REQUIRED_COLUMNS};

fn insert_row(conn: &Connection, row: &TrainingRow) -> Result<i64> {
    let c = &row.columns;
    conn.execute(
        r#"
        INSERT INTO training_rows (
            primary_group, fs,
            bs_main_category, bs_classification, bs_sub_classification, bs_sub_classification_2,
            pl_classification, pl_sub_classification, pl_classification_1,
            cf_classification, cf_sub_classification, expense_type
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
        params![
            row.primary_group,
            row.fs.as_str(),
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
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

impl Database {
    /// Add one active training row
    pub fn insert_training_row(&self, row: &TrainingRow) -> Result<i64> {
        let conn = self.conn()?;
        insert_row(&conn, row)
    }

    /// Add many rows in a single transaction
    pub fn import_training_rows(&self, rows: &[TrainingRow]) -> Result<usize> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        for row in rows {
            insert_row(&tx, row)?;
        }
        tx.commit()?;
        Ok(rows.len())
    }

    /// Hide every active row whose name matches exactly; returns rows affected
    pub fn deactivate_training_row(&self, primary_group: &str) -> Result<usize> {
        let conn = self.conn()?;
        let changed = conn.execute(
            "UPDATE training_rows SET is_active = 0 WHERE primary_group = ? AND is_active = 1",
            params![primary_group],
        )?;
        Ok(changed)
    }

    pub fn count_training_rows(&self) -> Result<i64> {
        let conn = self.conn()?;
        let count = conn.query_row(
            "SELECT COUNT(*) FROM training_rows WHERE is_active = 1",
            [],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    /// Active rows as an untyped table, in insertion order
    fn active_training_table(&self) -> Result<RawTable> {
        let conn = self.conn()?;
        let mut columns: Vec<String> = REQUIRED_COLUMNS.iter().map(|c| c.to_string()).collect();
        columns.extend(CLASSIFICATION_COLUMNS.iter().map(|c| c.to_string()));

        let sql = format!(
            "SELECT {} FROM training_rows WHERE is_active = 1 ORDER BY id",
            columns.join(", ")
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map([], |row| {
                let mut values = HashMap::with_capacity(columns.len());
                for (i, name) in columns.iter().enumerate() {
                    values.insert(name.clone(), row.get::<_, Option<String>>(i)?);
                }
                Ok(values)
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(RawTable { columns, rows })
    }
}

impl CorpusSource for Database {
    fn read_table(&self) -> Result<RawTable> {
        self.active_training_table()
    }

    fn append_row(&self, row: &TrainingRow) -> Result<()> {
        self.insert_training_row(row)?;
        Ok(())
    }

    fn describe(&self) -> String {
        format!("database {}", self.path())
    }
}
