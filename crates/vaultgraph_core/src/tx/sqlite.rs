//! SQLite-backed transaction manager over the connection pool.

use super::{drive, ensure_active, TransactionManager, TxAction, TxError, TxScope, TxState};
use crate::config::{BeginBehavior, StoreConfig};
use crate::context::Context;
use crate::db::{DbPool, PooledConn};
use crate::error::{translate, RepoError, RepoResult};
use crate::executor::{load_in_chunks, BulkInsert, BulkLoad, Executor};
use log::{debug, info, warn};
use rusqlite::Connection;
use std::cell::Cell;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

static NEXT_TX_ID: AtomicU64 = AtomicU64::new(1);

/// Opens transactions on pooled connections.
#[derive(Clone)]
pub struct SqliteTransactionManager {
    pool: DbPool,
    begin: BeginBehavior,
}

impl SqliteTransactionManager {
    pub fn new(pool: DbPool, config: &StoreConfig) -> Self {
        Self {
            pool,
            begin: config.begin,
        }
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }

    /// Checks out a bare (autocommit) connection, bounded by the context deadline.
    pub fn connection(&self, ctx: &Context) -> RepoResult<PooledConn> {
        ctx.check()?;
        let checked_out = match ctx.deadline() {
            Some(deadline) => self
                .pool
                .get_timeout(deadline.saturating_duration_since(Instant::now())),
            None => self.pool.get(),
        };
        checked_out.map_err(|err| {
            ctx.err().unwrap_or_else(|| RepoError::Generic {
                message: "no pooled connection available".to_string(),
                source: Some(Box::new(err)),
            })
        })
    }
}

impl TransactionManager for SqliteTransactionManager {
    type Scope = SqliteTx;

    fn with_transaction<T, F>(&self, ctx: &Context, f: F) -> Result<T, TxError>
    where
        F: FnOnce(&SqliteTx) -> RepoResult<T>,
    {
        let conn = self.connection(ctx).map_err(TxError::Begin)?;
        let tx = SqliteTx::begin(conn, ctx, self.begin).map_err(TxError::Begin)?;
        drive(&tx, "sqlite", f)
    }
}

/// One open SQLite transaction holding its pooled connection.
///
/// Dropping an active handle rolls it back so the connection returns to the
/// pool outside any transaction.
pub struct SqliteTx {
    conn: PooledConn,
    state: Cell<TxState>,
    id: u64,
    started_at: Instant,
}

impl SqliteTx {
    fn begin(conn: PooledConn, ctx: &Context, behavior: BeginBehavior) -> RepoResult<Self> {
        ctx.check()?;
        let sql = match behavior {
            BeginBehavior::Deferred => "BEGIN DEFERRED;",
            BeginBehavior::Immediate => "BEGIN IMMEDIATE;",
        };
        conn.execute_batch(sql).map_err(|err| translate(err, ctx))?;

        let id = NEXT_TX_ID.fetch_add(1, Ordering::Relaxed);
        debug!("event=tx_begin module=tx status=ok backend=sqlite tx_id={id}");
        Ok(Self {
            conn,
            state: Cell::new(TxState::Active),
            id,
            started_at: Instant::now(),
        })
    }

    fn finish(&self, sql: &str, next: TxState) -> RepoResult<()> {
        self.conn
            .execute_batch(sql)
            .map_err(|err| translate(err, &Context::background()))?;
        self.state.set(next);
        info!(
            "event=tx_finish module=tx status=ok backend=sqlite tx_id={} outcome={} duration_ms={}",
            self.id,
            next,
            self.started_at.elapsed().as_millis()
        );
        Ok(())
    }

    /// Current state, noticing a transaction SQLite ended on its own.
    ///
    /// An interrupt or an I/O error can make SQLite roll the whole
    /// transaction back; the connection is then in autocommit mode and any
    /// further statement would commit on its own.
    fn observed_state(&self) -> TxState {
        let state = self.state.get();
        if state == TxState::Active && self.conn.is_autocommit() {
            warn!(
                "event=tx_abort module=tx status=error backend=sqlite tx_id={} error_code=tx_aborted_by_backend duration_ms={}",
                self.id,
                self.started_at.elapsed().as_millis()
            );
            self.state.set(TxState::Aborted);
            return TxState::Aborted;
        }
        state
    }
}

impl TxScope for SqliteTx {
    type Executor = SqliteTx;

    fn executor(&self) -> &SqliteTx {
        self
    }

    fn commit(&self) -> RepoResult<()> {
        ensure_active(self.observed_state(), TxAction::Commit)?;
        self.finish("COMMIT;", TxState::Committed)
    }

    fn rollback(&self) -> RepoResult<()> {
        ensure_active(self.observed_state(), TxAction::Rollback)?;
        self.finish("ROLLBACK;", TxState::RolledBack)
    }

    fn state(&self) -> TxState {
        self.observed_state()
    }
}

impl Executor for SqliteTx {
    fn raw(&self) -> &Connection {
        &self.conn
    }

    fn ensure_open(&self) -> RepoResult<()> {
        ensure_active(self.observed_state(), TxAction::Execute)
    }

    fn bulk_loader(&self) -> Option<&dyn BulkLoad> {
        Some(self)
    }
}

impl BulkLoad for SqliteTx {
    fn bulk_insert(&self, ctx: &Context, insert: &BulkInsert<'_>) -> RepoResult<usize> {
        self.ensure_open()?;
        load_in_chunks(&self.conn, ctx, insert)
    }
}

impl Drop for SqliteTx {
    fn drop(&mut self) {
        if self.state.get() == TxState::Active && !self.conn.is_autocommit() {
            if let Err(err) = self.conn.execute_batch("ROLLBACK;") {
                warn!(
                    "event=tx_drop module=tx status=error backend=sqlite tx_id={} error={}",
                    self.id, err
                );
            }
        }
    }
}
