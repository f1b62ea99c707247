//! Schema migrations, tracked with `PRAGMA user_version`

use rusqlite::Connection;
use tracing::{debug, info};

use crate::error::Result;

/// Migration `i` moves the schema from version `i` to `i + 1`.
/// Append only; never edit an entry that has shipped.
const MIGRATIONS: &[&str] = &[
    // 1: training corpus, staging items, results
    r#"
    -- Labeled examples; only active rows form the corpus
    CREATE TABLE training_rows (
        id INTEGER PRIMARY KEY,
        primary_group TEXT NOT NULL,
        fs TEXT NOT NULL,
        bs_main_category TEXT,
        bs_classification TEXT,
        bs_sub_classification TEXT,
        bs_sub_classification_2 TEXT,
        pl_classification TEXT,
        pl_sub_classification TEXT,
        pl_classification_1 TEXT,
        cf_classification TEXT,
        cf_sub_classification TEXT,
        expense_type TEXT,
        is_active BOOLEAN NOT NULL DEFAULT 1,
        created_at DATETIME DEFAULT CURRENT_TIMESTAMP
    );
    CREATE INDEX idx_training_rows_active ON training_rows(is_active);

    -- Raw line items from upstream ledgers
    CREATE TABLE staging_items (
        id INTEGER PRIMARY KEY,
        tenant_id TEXT,
        raw_id TEXT,
        primary_group TEXT,
        created_at DATETIME DEFAULT CURRENT_TIMESTAMP
    );

    -- One result per staging item
    CREATE TABLE classifications (
        id INTEGER PRIMARY KEY,
        stg_id INTEGER NOT NULL UNIQUE REFERENCES staging_items(id),
        raw_id TEXT,
        tenant_id TEXT,
        primary_group TEXT NOT NULL,
        fs TEXT,
        predicted_fs TEXT NOT NULL,
        confidence REAL NOT NULL,
        bs_main_category TEXT,
        bs_classification TEXT,
        bs_sub_classification TEXT,
        bs_sub_classification_2 TEXT,
        pl_classification TEXT,
        pl_sub_classification TEXT,
        pl_classification_1 TEXT,
        cf_classification TEXT,
        cf_sub_classification TEXT,
        expense_type TEXT,
        method_used TEXT NOT NULL,
        matched_training_row TEXT,
        matched_row_full TEXT,                   -- JSON of the matched training row
        needs_review BOOLEAN NOT NULL,
        low_confidence_alternative TEXT,
        reasoning TEXT,
        created_at DATETIME DEFAULT CURRENT_TIMESTAMP,
        updated_at DATETIME DEFAULT CURRENT_TIMESTAMP
    );
    CREATE INDEX idx_classifications_tenant ON classifications(tenant_id);
    CREATE INDEX idx_classifications_review ON classifications(needs_review);
    "#,
    // 2: lookups by tenant and by training row name
    r#"
    CREATE INDEX idx_staging_items_tenant ON staging_items(tenant_id);
    CREATE INDEX idx_training_rows_group ON training_rows(primary_group);
    "#,
];

/// Schema version after every migration has run
pub const SCHEMA_VERSION: i64 = MIGRATIONS.len() as i64;

pub fn user_version(conn: &Connection) -> Result<i64> {
    Ok(conn.query_row("PRAGMA user_version", [], |row| row.get(0))?)
}

/// Apply every migration newer than the database's `user_version`
pub fn migrate(conn: &mut Connection) -> Result<()> {
    // WAL is a property of the file, so once is enough
    conn.execute_batch("PRAGMA journal_mode = WAL; PRAGMA synchronous = NORMAL;")?;

    let current = user_version(conn)?;
    if current >= SCHEMA_VERSION {
        debug!(version = current, "Database schema up to date");
        return Ok(());
    }

    for (index, sql) in MIGRATIONS.iter().enumerate().skip(current as usize) {
        let version = index as i64 + 1;
        let tx = conn.transaction()?;
        tx.execute_batch(sql)?;
        tx.pragma_update(None, "user_version", version)?;
        tx.commit()?;
        debug!(version, "Applied migration");
    }

    info!(from = current, to = SCHEMA_VERSION, "Database schema migrated");
    Ok(())
}
