//! smry-core: Cached hierarchical summary store
//!
//! This crate provides the core functionality for memoizing expensive
//! generated summaries of support data (tickets, issues, accounts), detecting
//! staleness via content fingerprinting, and composing individual summaries
//! into group and global roll-ups.

pub mod config;
pub mod coordinator;
pub mod db;
pub mod error;
pub mod fingerprint;
pub mod hierarchy;
pub mod models;
pub mod providers;
pub mod schema;

pub use config::Config;
pub use coordinator::Coordinator;
pub use db::Database;
pub use error::Error;
pub use error::Result;

/// Application name used for config directories and paths.
pub const APP_NAME: &str = "smry";

/// Returns the environment variable prefix for this application.
pub fn env_prefix() -> String {
    "SMRY".to_string()
}
