//! Shared fixtures: the same repository checks run against SQLite and the
//! in-memory double.
#![allow(dead_code)]

use rusqlite::Connection;
use std::sync::Arc;
use vaultgraph_core::memory::{
    MemoryEdgeRepository, MemoryHistoryRepository, MemoryMetadataRepository,
    MemoryNodeRepository, MemoryPositionRepository, MemoryStore,
};
use vaultgraph_core::{
    open_db_in_memory, Edge, EdgeRepository, EdgeType, HistoryRepository, MetadataRepository,
    Node, NodeRepository, PositionRepository, SqliteEdgeRepository, SqliteHistoryRepository,
    SqliteMetadataRepository, SqliteNodeRepository, SqlitePositionRepository, StoreConfig,
};

/// One storage backend with its repositories and a non-transactional executor.
pub trait Backend {
    type Exec;
    type Nodes: NodeRepository<Self::Exec>;
    type Edges: EdgeRepository<Self::Exec>;
    type Positions: PositionRepository<Self::Exec>;
    type Metadata: MetadataRepository<Self::Exec>;
    type History: HistoryRepository<Self::Exec>;

    fn exec(&self) -> &Self::Exec;
    fn nodes(&self) -> &Self::Nodes;
    fn edges(&self) -> &Self::Edges;
    fn positions(&self) -> &Self::Positions;
    fn metadata(&self) -> &Self::Metadata;
    fn history(&self) -> &Self::History;
}

pub struct SqliteBackend {
    pub conn: Connection,
    nodes: SqliteNodeRepository,
    edges: SqliteEdgeRepository,
    positions: SqlitePositionRepository,
}

impl SqliteBackend {
    pub fn new() -> Self {
        Self::with_config(&StoreConfig::default())
    }

    pub fn with_config(config: &StoreConfig) -> Self {
        Self {
            conn: open_db_in_memory().unwrap(),
            nodes: SqliteNodeRepository::new(config),
            edges: SqliteEdgeRepository::new(config),
            positions: SqlitePositionRepository::new(config),
        }
    }
}

impl Backend for SqliteBackend {
    type Exec = Connection;
    type Nodes = SqliteNodeRepository;
    type Edges = SqliteEdgeRepository;
    type Positions = SqlitePositionRepository;
    type Metadata = SqliteMetadataRepository;
    type History = SqliteHistoryRepository;

    fn exec(&self) -> &Connection {
        &self.conn
    }
    fn nodes(&self) -> &Self::Nodes {
        &self.nodes
    }
    fn edges(&self) -> &Self::Edges {
        &self.edges
    }
    fn positions(&self) -> &Self::Positions {
        &self.positions
    }
    fn metadata(&self) -> &Self::Metadata {
        &SqliteMetadataRepository
    }
    fn history(&self) -> &Self::History {
        &SqliteHistoryRepository
    }
}

pub struct MemoryBackend {
    pub store: Arc<MemoryStore>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self {
            store: Arc::new(MemoryStore::new()),
        }
    }
}

impl Backend for MemoryBackend {
    type Exec = Arc<MemoryStore>;
    type Nodes = MemoryNodeRepository;
    type Edges = MemoryEdgeRepository;
    type Positions = MemoryPositionRepository;
    type Metadata = MemoryMetadataRepository;
    type History = MemoryHistoryRepository;

    fn exec(&self) -> &Arc<MemoryStore> {
        &self.store
    }
    fn nodes(&self) -> &Self::Nodes {
        &MemoryNodeRepository
    }
    fn edges(&self) -> &Self::Edges {
        &MemoryEdgeRepository
    }
    fn positions(&self) -> &Self::Positions {
        &MemoryPositionRepository
    }
    fn metadata(&self) -> &Self::Metadata {
        &MemoryMetadataRepository
    }
    fn history(&self) -> &Self::History {
        &MemoryHistoryRepository
    }
}

/// Expands each listed generic check into one test per backend.
macro_rules! on_both_backends {
    ($($check:ident),+ $(,)?) => {
        mod sqlite {
            $(
                #[test]
                fn $check() {
                    super::$check(&$crate::common::SqliteBackend::new());
                }
            )+
        }

        mod memory {
            $(
                #[test]
                fn $check() {
                    super::$check(&$crate::common::MemoryBackend::new());
                }
            )+
        }
    };
}

pub fn note(id: &str, title: &str) -> Node {
    Node::new(id, title).with_path(format!("{id}.md"))
}

pub fn link(source: &str, target: &str) -> Edge {
    Edge::new(source, target, EdgeType::Reference)
}

/// Stores nodes `ids` through the backend's batch path.
pub fn seed_nodes<B: Backend>(backend: &B, ids: &[&str]) {
    let nodes: Vec<Node> = ids.iter().map(|id| note(id, &format!("Note {id}"))).collect();
    backend
        .nodes()
        .create_batch(&vaultgraph_core::Context::background(), backend.exec(), &nodes)
        .unwrap();
}
