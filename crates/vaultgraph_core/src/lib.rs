//! Persistence core for VaultGraph.
//! Stores the knowledge graph of a note vault in SQLite behind
//! executor-agnostic repositories, with an in-memory double for tests.

pub mod config;
pub mod context;
pub mod db;
pub mod error;
pub mod executor;
pub mod logging;
pub mod memory;
pub mod model;
pub mod repo;
pub mod search;
pub mod service;
pub mod tx;

pub use config::{BeginBehavior, StoreConfig};
pub use context::Context;
pub use db::{open_db, open_db_in_memory, open_pool, DbError, DbPool, DbResult};
pub use error::{ErrorKind, Outcome, RepoError, RepoResult, Resource};
pub use executor::{Executor, FromRow};
pub use logging::{default_log_level, init_logging, logging_status, LoggingError};
pub use memory::{MemoryStore, MemoryTransactionManager};
pub use model::edge::{Edge, EdgeId, EdgeType};
pub use model::ingestion::{IngestionRecord, IngestionStatus};
pub use model::metadata::{MetadataEntry, LAST_SYNC_AT_KEY};
pub use model::node::{Node, NodeId};
pub use model::position::Position;
pub use repo::edge_repo::{EdgeRepository, SqliteEdgeRepository};
pub use repo::history_repo::{HistoryRepository, SqliteHistoryRepository};
pub use repo::metadata_repo::{MetadataRepository, SqliteMetadataRepository};
pub use repo::node_repo::{NodeRepository, SqliteNodeRepository};
pub use repo::position_repo::{PositionRepository, SqlitePositionRepository};
pub use repo::Page;
pub use service::ingest::{GraphIngestor, IngestBatch, IngestMode, IngestOutcome, IngestStats};
pub use tx::{SqliteTransactionManager, TransactionManager, TxError, TxScope, TxState};

/// Minimal health-check API for early integration.
pub fn ping() -> &'static str {
    "pong"
}

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::{core_version, ping};

    #[test]
    fn ping_returns_pong() {
        assert_eq!(ping(), "pong");
    }

    #[test]
    fn version_is_not_empty() {
        assert!(!core_version().is_empty());
    }
}
