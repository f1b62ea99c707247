//! Disk cache for corpus vectors
//!
//! One JSON file per (namespace, corpus fingerprint). Only raw vectors and
//! row snapshots are stored. Writes go to a temp file in the cache directory
//! and are renamed over the target, so a failed write never leaves a
//! half-written cache behind. Every failure here is non-fatal to callers.

use std::fs;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;

use crate::error::{Error, Result};
use crate::models::TrainingRow;

/// Serialized vectors for one corpus under one model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedVectors {
    pub model: String,
    pub fingerprint: String,
    /// Same order as `vectors` and `rows`
    pub primary_groups: Vec<String>,
    pub vectors: Vec<Vec<f32>>,
    pub rows: Vec<TrainingRow>,
    pub created_at: DateTime<Utc>,
}

impl CachedVectors {
    fn is_consistent(&self) -> bool {
        self.primary_groups.len() == self.vectors.len() && self.rows.len() == self.vectors.len()
    }
}

/// Result of a cache read
#[derive(Debug, Clone, PartialEq)]
pub enum CacheLoad {
    Hit(CachedVectors),
    /// No file, caching disabled, or a file written for another model
    Miss,
    /// A file exists but could not be read or parsed
    Unreadable(String),
}

/// How a vector index was obtained
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "source", content = "detail", rename_all = "snake_case")]
pub enum CacheSource {
    /// Loaded from the disk cache
    CacheHit,
    /// Encoded because no usable cache entry existed
    ComputedOnMiss,
    /// Encoded because the cache entry was unreadable
    ComputedAfterUnreadable(String),
    /// Supplied by the caller through an embedding payload
    Payload,
}

/// Cache location plus namespace (one per vector matcher)
#[derive(Debug, Clone)]
pub struct VectorCache {
    dir: Option<PathBuf>,
    namespace: String,
}

impl VectorCache {
    pub fn new(dir: impl Into<PathBuf>, namespace: &str) -> Self {
        Self {
            dir: Some(dir.into()),
            namespace: namespace.to_string(),
        }
    }

    /// A cache that never hits and never writes
    pub fn disabled(namespace: &str) -> Self {
        Self {
            dir: None,
            namespace: namespace.to_string(),
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// File that holds vectors for `fingerprint`
    pub fn path_for(&self, fingerprint: &str) -> Option<PathBuf> {
        self.dir
            .as_ref()
            .map(|d| d.join(format!("{}_{}.json", self.namespace, fingerprint)))
    }

    pub fn load(&self, fingerprint: &str, model: &str) -> CacheLoad {
        let Some(path) = self.path_for(fingerprint) else {
            return CacheLoad::Miss;
        };
        if !path.exists() {
            return CacheLoad::Miss;
        }

        let cached = match read_cached(&path) {
            Ok(cached) => cached,
            Err(e) => return CacheLoad::Unreadable(e.to_string()),
        };
        if !cached.is_consistent() {
            return CacheLoad::Unreadable(format!(
                "{} has mismatched vector and row counts",
                path.display()
            ));
        }
        if cached.model != model || cached.fingerprint != fingerprint {
            return CacheLoad::Miss;
        }
        CacheLoad::Hit(cached)
    }

    /// Replace the cache file for `cached.fingerprint`
    pub fn save(&self, cached: &CachedVectors) -> Result<Option<PathBuf>> {
        let (Some(dir), Some(path)) = (self.dir.as_ref(), self.path_for(&cached.fingerprint))
        else {
            return Ok(None);
        };
        fs::create_dir_all(dir)
            .map_err(|e| Error::Cache(format!("Failed to create {}: {}", dir.display(), e)))?;

        let tmp = NamedTempFile::new_in(dir)
            .map_err(|e| Error::Cache(format!("Failed to create temp file: {}", e)))?;
        {
            let mut writer = BufWriter::new(tmp.as_file());
            serde_json::to_writer(&mut writer, cached)
                .map_err(|e| Error::Cache(format!("Failed to serialize vectors: {}", e)))?;
            writer
                .flush()
                .map_err(|e| Error::Cache(format!("Failed to write vectors: {}", e)))?;
        }
        tmp.persist(&path)
            .map_err(|e| Error::Cache(format!("Failed to replace {}: {}", path.display(), e)))?;
        Ok(Some(path))
    }
}

fn read_cached(path: &Path) -> Result<CachedVectors> {
    let file = fs::File::open(path)
        .map_err(|e| Error::Cache(format!("Failed to open {}: {}", path.display(), e)))?;
    serde_json::from_reader(BufReader::new(file))
        .map_err(|e| Error::Cache(format!("Failed to parse {}: {}", path.display(), e)))
}
