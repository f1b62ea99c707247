//! Error types for fsmap

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Database pool error: {0}")]
    Pool(#[from] r2d2::Error),

    #[error("Encryption error: {0}")]
    Encryption(String),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Config parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Config error: {0}")]
    Config(String),

    /// Bad corpus shape, invalid `fs` value, empty or duplicate input
    #[error("Validation error: {0}")]
    Validation(String),

    /// Corpus failed validation; carries the full report
    #[error("Training data validation failed: {}", .0.errors.join("; "))]
    CorpusRejected(crate::corpus::ValidationReport),

    #[error("Invalid data: {0}")]
    InvalidData(String),

    #[error("Not found: {0}")]
    NotFound(String),

    /// Vector cache read/write failure (never fatal to classification)
    #[error("Cache error: {0}")]
    Cache(String),

    /// Write failure while committing a classification
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// Generative model call failed (network, malformed output, schema)
    #[error("External model error: {0}")]
    TransientExternal(String),
}

pub type Result<T> = std::result::Result<T, Error>;
