//! Storage configuration.
//!
//! # Responsibility
//! - Describe connection, pool and batching knobs in one serde-friendly shape.
//! - Provide defaults usable without any config file.
//!
//! # Invariants
//! - Every field has a default; partial JSON documents are accepted.

use serde::Deserialize;
use std::time::Duration;

/// Default rows per bulk-load statement.
pub const DEFAULT_BULK_CHUNK_ROWS: usize = 500;

/// How the transaction manager opens transactions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BeginBehavior {
    /// Locks are acquired on first read/write (SQLite default).
    #[default]
    Deferred,
    /// The write lock is acquired at `BEGIN`.
    Immediate,
}

/// Storage layer configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// How long a connection waits on a locked database.
    pub busy_timeout_ms: u64,
    /// Maximum pooled connections.
    pub pool_max_size: u32,
    /// Upper bound of rows per bulk-load statement.
    pub bulk_chunk_rows: usize,
    /// Transaction begin behavior for the transaction manager.
    pub begin: BeginBehavior,
    /// Enables WAL journaling for file databases.
    pub wal: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            busy_timeout_ms: 5_000,
            pool_max_size: 8,
            bulk_chunk_rows: DEFAULT_BULK_CHUNK_ROWS,
            begin: BeginBehavior::Deferred,
            wal: true,
        }
    }
}

impl StoreConfig {
    /// Parses a JSON config document; missing fields take defaults.
    pub fn from_json_str(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }

    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }
}
