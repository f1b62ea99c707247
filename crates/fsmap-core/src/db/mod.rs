//! Database access layer with connection pooling and migrations
//!
//! This module is organized by domain:
//! - `training` - Training corpus table (also a [`CorpusSource`](crate::corpus::CorpusSource))
//! - `staging` - Raw line items waiting to be classified
//! - `classifications` - Insert-once classification results
//! - `schema` - Versioned migrations

use chrono::{DateTime, Utc};
use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use tracing::debug;

use crate::error::{Error, Result};

mod classifications;
pub mod schema;
mod staging;
mod training;

pub use classifications::{insert_classification, StoredClassification};
pub use staging::NewStagingItem;

pub type DbPool = Pool<SqliteConnectionManager>;
pub type DbConn = PooledConnection<SqliteConnectionManager>;

/// Environment variable for database encryption key
pub const DB_KEY_ENV: &str = "FSMAP_DB_KEY";

/// Connections per pool; bounds the number of classification workers
pub const POOL_SIZE: u32 = 10;

/// Pragmas every pooled connection needs, not just the first one
const CONNECTION_PRAGMAS: &str = "PRAGMA foreign_keys = ON; PRAGMA busy_timeout = 5000;";

/// Hex SQLCipher key derived from a passphrase with Argon2id.
///
/// The salt is fixed so a passphrase opens its database wherever the file
/// is moved.
fn derive_key(passphrase: &str) -> Result<String> {
    use argon2::{password_hash::SaltString, Argon2, PasswordHasher};

    // Changing this invalidates every existing encrypted database
    const APP_SALT: &[u8; 16] = b"fsmap-salt-v1-fx";

    let salt = SaltString::encode_b64(APP_SALT)
        .map_err(|e| Error::Encryption(format!("Invalid key salt: {}", e)))?;
    let hash = Argon2::default()
        .hash_password(passphrase.as_bytes(), &salt)
        .map_err(|e| Error::Encryption(format!("Key derivation failed: {}", e)))?;
    hash.hash
        .map(|output| hex::encode(output.as_bytes()))
        .ok_or_else(|| Error::Encryption("Key derivation produced no output".to_string()))
}

/// Parse a SQLite `CURRENT_TIMESTAMP` value
pub(crate) fn parse_datetime(s: &str) -> DateTime<Utc> {
    chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
        .map(|dt| dt.and_utc())
        .unwrap_or_else(|_| Utc::now())
}

/// Pooled handle to the training, staging and results tables.
///
/// Cloning shares the pool. Each classification worker checks out its own
/// [`DbConn`] and keeps it for the whole run.
#[derive(Clone)]
pub struct Database {
    pool: DbPool,
    db_path: String,
    encrypted: bool,
}

impl Database {
    /// Open an encrypted database keyed from `FSMAP_DB_KEY`.
    ///
    /// Fails when the variable is unset; use `new_unencrypted()` for
    /// development and tests.
    pub fn new(path: &str) -> Result<Self> {
        let passphrase = std::env::var(DB_KEY_ENV).map_err(|_| {
            Error::Encryption(format!(
                "Database encryption required. Set {} environment variable with your passphrase, \
                or use --no-encrypt for unencrypted databases (not recommended for production).",
                DB_KEY_ENV
            ))
        })?;
        Self::new_with_key(path, Some(&passphrase))
    }

    pub fn new_unencrypted(path: &str) -> Result<Self> {
        Self::new_with_key(path, None)
    }

    /// Open with an explicit passphrase (None for plaintext)
    pub fn new_with_key(path: &str, passphrase: Option<&str>) -> Result<Self> {
        let init_sql = match passphrase {
            Some(pass) => format!("PRAGMA key = 'x\"{}\"'; {}", derive_key(pass)?, CONNECTION_PRAGMAS),
            None => CONNECTION_PRAGMAS.to_string(),
        };
        let manager =
            SqliteConnectionManager::file(path).with_init(move |conn| conn.execute_batch(&init_sql));
        let pool = Pool::builder().max_size(POOL_SIZE).build(manager)?;

        let db = Self {
            pool,
            db_path: path.to_string(),
            encrypted: passphrase.is_some(),
        };
        let mut conn = db.conn()?;
        schema::migrate(&mut conn)?;
        debug!(path, encrypted = db.encrypted, "Database opened");

        Ok(db)
    }

    /// Throwaway database for tests.
    ///
    /// Backed by a file in the temp dir: pooled connections to `:memory:`
    /// would each see a separate empty database.
    pub fn in_memory() -> Result<Self> {
        use std::sync::atomic::{AtomicU64, Ordering};
        static NEXT: AtomicU64 = AtomicU64::new(0);

        let path = std::env::temp_dir().join(format!(
            "fsmap_test_{}_{}.db",
            std::process::id(),
            NEXT.fetch_add(1, Ordering::SeqCst)
        ));
        let _ = std::fs::remove_file(&path);
        Self::new_unencrypted(&path.to_string_lossy())
    }

    pub fn path(&self) -> &str {
        &self.db_path
    }

    /// Whether the database was opened with a key and SQLCipher accepted it
    pub fn is_encrypted(&self) -> Result<bool> {
        if !self.encrypted {
            return Ok(false);
        }
        let conn = self.conn()?;
        let cipher: rusqlite::Result<String> =
            conn.query_row("PRAGMA cipher_version;", [], |row| row.get(0));
        Ok(cipher.is_ok())
    }

    pub fn schema_version(&self) -> Result<i64> {
        let conn = self.conn()?;
        schema::user_version(&conn)
    }

    /// Get a connection from the pool
    pub fn conn(&self) -> Result<DbConn> {
        Ok(self.pool.get()?)
    }

    /// Largest number of connections the pool hands out at once
    pub fn max_connections(&self) -> usize {
        self.pool.max_size() as usize
    }
}
