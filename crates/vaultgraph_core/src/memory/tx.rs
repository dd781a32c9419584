//! Copy-on-write transactions over a [`MemoryStore`].
//!
//! # Invariants
//! - A transaction works on a deep copy taken under every table lock, so it
//!   reads its own writes and nobody else sees them before commit.
//! - Commit publishes dirty tables under the same ordered locks; a table
//!   another transaction published since the copy was taken fails the commit.
//! - Rollback discards the copy, which restores the pre-transaction state.

use super::store::{bump_versions, Dirty, MemoryExecutor, MemoryStore, Snapshot, TablesMut};
use crate::context::Context;
use crate::error::{RepoError, RepoResult};
use crate::tx::{drive, ensure_active, TransactionManager, TxAction, TxError, TxScope, TxState};
use log::{debug, info};
use std::cell::{Cell, RefCell};
use std::mem;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

static NEXT_TX_ID: AtomicU64 = AtomicU64::new(1);

/// Transaction manager for the in-memory backend.
#[derive(Debug, Clone)]
pub struct MemoryTransactionManager {
    store: Arc<MemoryStore>,
}

impl MemoryTransactionManager {
    pub fn new(store: Arc<MemoryStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<MemoryStore> {
        &self.store
    }
}

impl TransactionManager for MemoryTransactionManager {
    type Scope = MemoryTx;

    fn with_transaction<T, F>(&self, ctx: &Context, f: F) -> Result<T, TxError>
    where
        F: FnOnce(&MemoryTx) -> RepoResult<T>,
    {
        ctx.check().map_err(TxError::Begin)?;
        let tx = MemoryTx::begin(Arc::clone(&self.store));
        drive(&tx, "memory", f)
    }
}

/// One open in-memory transaction.
pub struct MemoryTx {
    store: Arc<MemoryStore>,
    work: RefCell<Snapshot>,
    dirty: Cell<Dirty>,
    state: Cell<TxState>,
    id: u64,
}

impl MemoryTx {
    fn begin(store: Arc<MemoryStore>) -> Self {
        let work = store.lock_all().snapshot();
        let id = NEXT_TX_ID.fetch_add(1, Ordering::Relaxed);
        debug!("event=tx_begin module=tx status=ok backend=memory tx_id={id}");
        Self {
            store,
            work: RefCell::new(work),
            dirty: Cell::new(Dirty::default()),
            state: Cell::new(TxState::Active),
            id,
        }
    }

    fn publish(&self) -> RepoResult<()> {
        let dirty = self.dirty.get();
        if !dirty.any() {
            return Ok(());
        }

        let mut work = self.work.borrow_mut();
        let mut live = self.store.lock_all();

        let conflict = (dirty.nodes && live.nodes.version != work.nodes.version)
            || (dirty.edges && live.edges.version != work.edges.version)
            || (dirty.positions && live.positions.version != work.positions.version)
            || (dirty.metadata && live.metadata.version != work.metadata.version)
            || (dirty.history && live.history.version != work.history.version);
        if conflict {
            return Err(RepoError::generic(
                "a concurrent transaction committed conflicting writes first",
            ));
        }

        if dirty.nodes {
            live.nodes.rows = mem::take(&mut work.nodes.rows);
        }
        if dirty.edges {
            live.edges.rows = mem::take(&mut work.edges.rows);
        }
        if dirty.positions {
            live.positions.rows = mem::take(&mut work.positions.rows);
        }
        if dirty.metadata {
            live.metadata.rows = mem::take(&mut work.metadata.rows);
        }
        if dirty.history {
            live.history.rows = mem::take(&mut work.history.rows);
        }
        bump_versions(&mut live, dirty);
        Ok(())
    }
}

impl TxScope for MemoryTx {
    type Executor = MemoryTx;

    fn executor(&self) -> &MemoryTx {
        self
    }

    fn commit(&self) -> RepoResult<()> {
        ensure_active(self.state.get(), TxAction::Commit)?;
        self.publish()?;
        self.state.set(TxState::Committed);
        info!(
            "event=tx_finish module=tx status=ok backend=memory tx_id={} outcome={}",
            self.id,
            TxState::Committed
        );
        Ok(())
    }

    fn rollback(&self) -> RepoResult<()> {
        ensure_active(self.state.get(), TxAction::Rollback)?;
        *self.work.borrow_mut() = Snapshot::default();
        self.dirty.set(Dirty::default());
        self.state.set(TxState::RolledBack);
        info!(
            "event=tx_finish module=tx status=ok backend=memory tx_id={} outcome={}",
            self.id,
            TxState::RolledBack
        );
        Ok(())
    }

    fn state(&self) -> TxState {
        self.state.get()
    }
}

impl MemoryExecutor for MemoryTx {
    fn with_tables<R>(
        &self,
        ctx: &Context,
        op: impl FnOnce(&mut TablesMut<'_>) -> RepoResult<R>,
    ) -> RepoResult<R> {
        ctx.check()?;
        ensure_active(self.state.get(), TxAction::Execute)?;

        let mut work = self.work.borrow_mut();
        let Snapshot {
            nodes,
            edges,
            positions,
            metadata,
            history,
        } = &mut *work;
        let mut tables = TablesMut::new(
            &mut nodes.rows,
            &mut edges.rows,
            &mut positions.rows,
            &mut metadata.rows,
            &mut history.rows,
        );
        let result = op(&mut tables);
        self.dirty.set(self.dirty.get().union(tables.dirty()));
        result
    }
}
