//! Staging items (the pending-work source)

use rusqlite::params;
use serde::{Deserialize, Serialize};

use super::Database;
use crate::error::Result;
use crate::models::PendingItem;

/// A raw line item to stage
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewStagingItem {
    pub tenant_id: Option<String>,
    pub raw_id: Option<String>,
    pub primary_group: Option<String>,
}

impl Database {
    pub fn insert_staging_item(&self, item: &NewStagingItem) -> Result<i64> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO staging_items (tenant_id, raw_id, primary_group) VALUES (?, ?, ?)",
            params![item.tenant_id, item.raw_id, item.primary_group],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Stage many items in one transaction
    pub fn insert_staging_items(&self, items: &[NewStagingItem]) -> Result<usize> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO staging_items (tenant_id, raw_id, primary_group) VALUES (?, ?, ?)",
            )?;
            for item in items {
                stmt.execute(params![item.tenant_id, item.raw_id, item.primary_group])?;
            }
        }
        tx.commit()?;
        Ok(items.len())
    }

    /// Staged items with a non-blank name and no classification yet
    pub fn pending_items(&self) -> Result<Vec<PendingItem>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT DISTINCT s.id, s.tenant_id, s.raw_id, s.primary_group
            FROM staging_items s
            WHERE s.primary_group IS NOT NULL
              AND TRIM(s.primary_group) <> ''
              AND NOT EXISTS (
                  SELECT 1 FROM classifications c WHERE c.stg_id = s.id
              )
            ORDER BY s.id
            "#,
        )?;

        let items = stmt
            .query_map([], |row| {
                Ok(PendingItem {
                    stg_id: row.get(0)?,
                    tenant_id: row.get(1)?,
                    raw_id: row.get(2)?,
                    primary_group: row.get(3)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(items)
    }

    pub fn count_staging_items(&self) -> Result<i64> {
        let conn = self.conn()?;
        let count = conn.query_row("SELECT COUNT(*) FROM staging_items", [], |row| row.get(0))?;
        Ok(count)
    }
}
