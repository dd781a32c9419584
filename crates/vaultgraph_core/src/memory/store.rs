//! Lock-ordered in-memory tables.

use crate::context::Context;
use crate::error::RepoResult;
use crate::model::edge::{Edge, EdgeId};
use crate::model::ingestion::IngestionRecord;
use crate::model::metadata::MetadataEntry;
use crate::model::node::{Node, NodeId};
use crate::model::position::Position;
use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

pub(crate) type NodeRows = BTreeMap<NodeId, Node>;
pub(crate) type EdgeRows = BTreeMap<EdgeId, Edge>;
pub(crate) type PositionRows = BTreeMap<NodeId, Position>;
pub(crate) type MetadataRows = BTreeMap<String, MetadataEntry>;
/// Insertion order doubles as the "started later" tie-breaker.
pub(crate) type HistoryRows = Vec<IngestionRecord>;

/// Rows of one table plus a counter bumped on every published write.
#[derive(Debug, Clone, Default)]
pub(crate) struct Table<T> {
    pub(crate) version: u64,
    pub(crate) rows: T,
}

/// Deep copy of every table, taken at transaction start.
#[derive(Debug, Clone, Default)]
pub(crate) struct Snapshot {
    pub(crate) nodes: Table<NodeRows>,
    pub(crate) edges: Table<EdgeRows>,
    pub(crate) positions: Table<PositionRows>,
    pub(crate) metadata: Table<MetadataRows>,
    pub(crate) history: Table<HistoryRows>,
}

/// Tables written through a [`TablesMut`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct Dirty {
    pub(crate) nodes: bool,
    pub(crate) edges: bool,
    pub(crate) positions: bool,
    pub(crate) metadata: bool,
    pub(crate) history: bool,
}

impl Dirty {
    pub(crate) fn any(self) -> bool {
        self.nodes || self.edges || self.positions || self.metadata || self.history
    }

    pub(crate) fn union(self, other: Dirty) -> Dirty {
        Dirty {
            nodes: self.nodes || other.nodes,
            edges: self.edges || other.edges,
            positions: self.positions || other.positions,
            metadata: self.metadata || other.metadata,
            history: self.history || other.history,
        }
    }
}

/// Mutable view over one consistent set of tables.
///
/// `*_mut` accessors record which tables were written.
pub struct TablesMut<'a> {
    nodes: &'a mut NodeRows,
    edges: &'a mut EdgeRows,
    positions: &'a mut PositionRows,
    metadata: &'a mut MetadataRows,
    history: &'a mut HistoryRows,
    dirty: Dirty,
}

impl<'a> TablesMut<'a> {
    pub(crate) fn new(
        nodes: &'a mut NodeRows,
        edges: &'a mut EdgeRows,
        positions: &'a mut PositionRows,
        metadata: &'a mut MetadataRows,
        history: &'a mut HistoryRows,
    ) -> Self {
        Self {
            nodes,
            edges,
            positions,
            metadata,
            history,
            dirty: Dirty::default(),
        }
    }

    pub(crate) fn nodes(&self) -> &NodeRows {
        self.nodes
    }

    pub(crate) fn nodes_mut(&mut self) -> &mut NodeRows {
        self.dirty.nodes = true;
        self.nodes
    }

    pub(crate) fn edges(&self) -> &EdgeRows {
        self.edges
    }

    pub(crate) fn edges_mut(&mut self) -> &mut EdgeRows {
        self.dirty.edges = true;
        self.edges
    }

    pub(crate) fn positions(&self) -> &PositionRows {
        self.positions
    }

    pub(crate) fn positions_mut(&mut self) -> &mut PositionRows {
        self.dirty.positions = true;
        self.positions
    }

    pub(crate) fn metadata(&self) -> &MetadataRows {
        self.metadata
    }

    pub(crate) fn metadata_mut(&mut self) -> &mut MetadataRows {
        self.dirty.metadata = true;
        self.metadata
    }

    pub(crate) fn history(&self) -> &HistoryRows {
        self.history
    }

    pub(crate) fn history_mut(&mut self) -> &mut HistoryRows {
        self.dirty.history = true;
        self.history
    }

    pub(crate) fn dirty(&self) -> Dirty {
        self.dirty
    }
}

/// Executor surface of the in-memory backend.
pub trait MemoryExecutor {
    /// Runs `op` against a consistent view of every table.
    fn with_tables<R>(
        &self,
        ctx: &Context,
        op: impl FnOnce(&mut TablesMut<'_>) -> RepoResult<R>,
    ) -> RepoResult<R>;
}

/// Shared in-memory database: one mutex per table.
///
/// Locks are always taken nodes, edges, positions, metadata, history, so
/// concurrent transactions cannot deadlock.
#[derive(Debug, Default)]
pub struct MemoryStore {
    nodes: Mutex<Table<NodeRows>>,
    edges: Mutex<Table<EdgeRows>>,
    positions: Mutex<Table<PositionRows>>,
    metadata: Mutex<Table<MetadataRows>>,
    history: Mutex<Table<HistoryRows>>,
}

/// Every table lock of a [`MemoryStore`], held together.
pub(crate) struct LockedTables<'a> {
    pub(crate) nodes: MutexGuard<'a, Table<NodeRows>>,
    pub(crate) edges: MutexGuard<'a, Table<EdgeRows>>,
    pub(crate) positions: MutexGuard<'a, Table<PositionRows>>,
    pub(crate) metadata: MutexGuard<'a, Table<MetadataRows>>,
    pub(crate) history: MutexGuard<'a, Table<HistoryRows>>,
}

impl LockedTables<'_> {
    pub(crate) fn snapshot(&self) -> Snapshot {
        Snapshot {
            nodes: (*self.nodes).clone(),
            edges: (*self.edges).clone(),
            positions: (*self.positions).clone(),
            metadata: (*self.metadata).clone(),
            history: (*self.history).clone(),
        }
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquires every table lock in the fixed order.
    pub(crate) fn lock_all(&self) -> LockedTables<'_> {
        LockedTables {
            nodes: self.nodes.lock().unwrap_or_else(PoisonError::into_inner),
            edges: self.edges.lock().unwrap_or_else(PoisonError::into_inner),
            positions: self.positions.lock().unwrap_or_else(PoisonError::into_inner),
            metadata: self.metadata.lock().unwrap_or_else(PoisonError::into_inner),
            history: self.history.lock().unwrap_or_else(PoisonError::into_inner),
        }
    }
}

impl MemoryExecutor for MemoryStore {
    fn with_tables<R>(
        &self,
        ctx: &Context,
        op: impl FnOnce(&mut TablesMut<'_>) -> RepoResult<R>,
    ) -> RepoResult<R> {
        ctx.check()?;
        let mut locked = self.lock_all();
        let LockedTables {
            nodes,
            edges,
            positions,
            metadata,
            history,
        } = &mut locked;

        let mut tables = TablesMut::new(
            &mut nodes.rows,
            &mut edges.rows,
            &mut positions.rows,
            &mut metadata.rows,
            &mut history.rows,
        );
        let result = op(&mut tables);
        let dirty = tables.dirty();

        // Bumped even on error; the op may have written before failing.
        bump_versions(&mut locked, dirty);
        result
    }
}

pub(crate) fn bump_versions(locked: &mut LockedTables<'_>, dirty: Dirty) {
    if dirty.nodes {
        locked.nodes.version += 1;
    }
    if dirty.edges {
        locked.edges.version += 1;
    }
    if dirty.positions {
        locked.positions.version += 1;
    }
    if dirty.metadata {
        locked.metadata.version += 1;
    }
    if dirty.history {
        locked.history.version += 1;
    }
}

impl<T: MemoryExecutor> MemoryExecutor for std::sync::Arc<T> {
    fn with_tables<R>(
        &self,
        ctx: &Context,
        op: impl FnOnce(&mut TablesMut<'_>) -> RepoResult<R>,
    ) -> RepoResult<R> {
        (**self).with_tables(ctx, op)
    }
}
