//! In-memory backend used as a test double.
//!
//! # Responsibility
//! - Implement every repository contract without SQLite.
//! - Reproduce transactional atomicity and isolation with snapshots.
//!
//! # Invariants
//! - All state lives in an explicit [`MemoryStore`] shared by `Arc`.
//! - Table locks are always acquired in one fixed order.
//! - Errors match the SQLite repositories kind for kind.
//!
//! Isolation is stricter than SQLite's: two transactions writing the same
//! table from the same snapshot cannot both commit.

mod edge_repo;
mod history_repo;
mod metadata_repo;
mod node_repo;
mod position_repo;
mod store;
mod tx;

pub use edge_repo::MemoryEdgeRepository;
pub use history_repo::MemoryHistoryRepository;
pub use metadata_repo::MemoryMetadataRepository;
pub use node_repo::MemoryNodeRepository;
pub use position_repo::MemoryPositionRepository;
pub use store::{MemoryExecutor, MemoryStore, TablesMut};
pub use tx::{MemoryTransactionManager, MemoryTx};
