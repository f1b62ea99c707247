//! CLI command implementations
//!
//! Commands are organized by domain:
//! - `core` - init, status and shared utilities (open_db, load_mapper)
//! - `classify` - Single and batch classification, checkpoints
//! - `corpus` - Training data maintenance
//! - `domains` - Company domain listing
//! - `run` - Staging and database runs

pub mod classify;
pub mod core;
pub mod corpus;
pub mod domains;
pub mod run;

// Re-export command functions for main.rs
pub use classify::*;
pub use core::*;
pub use corpus::*;
pub use domains::*;
pub use run::*;
