//! Executor abstraction shared by bare connections and transactions.
//!
//! # Responsibility
//! - Give repositories one call surface (fetch one, fetch many, exec,
//!   exec with named parameters, raw access) whatever the transactional
//!   context is.
//! - Advertise optional capabilities (bulk load, transaction start) instead of
//!   letting repositories inspect concrete types.
//! - Abort in-flight statements once the call context is done.
//!
//! # Invariants
//! - Every provided method checks the context before touching SQLite and
//!   interrupts the running statement when the context ends mid-flight.
//! - `bulk_loader()` is only `Some` when writes already run inside a
//!   transaction; `transaction_starter()` only on autocommit connections.

use crate::context::Context;
use crate::db::PooledConn;
use crate::error::{translate, RepoResult};
use rusqlite::types::{ToSql, Value};
use rusqlite::{params_from_iter, Connection, Params, Row, Transaction};

/// SQLite virtual machine steps between two cancellation checks.
const PROGRESS_HANDLER_OPS: i32 = 1_000;

/// SQLite's compiled-in limit of bind parameters per statement.
const MAX_BIND_PARAMS: usize = 32_766;

/// Destination type for `fetch_one` / `fetch_all`.
pub trait FromRow: Sized {
    fn from_row(row: &Row<'_>) -> RepoResult<Self>;
}

impl FromRow for i64 {
    fn from_row(row: &Row<'_>) -> RepoResult<Self> {
        Ok(row.get(0)?)
    }
}

impl FromRow for String {
    fn from_row(row: &Row<'_>) -> RepoResult<Self> {
        Ok(row.get(0)?)
    }
}

/// Capability: stream many rows through multi-row statements inside the
/// transaction the executor already holds.
pub trait BulkLoad {
    fn bulk_insert(&self, ctx: &Context, insert: &BulkInsert<'_>) -> RepoResult<usize>;
}

/// Capability: open a transaction on an executor that is not in one.
pub trait BeginTransaction {
    fn begin(&self, ctx: &Context) -> RepoResult<Transaction<'_>>;
}

/// Uniform data-access surface for repositories.
pub trait Executor {
    /// Raw connection for statement/row access the provided methods don't cover.
    fn raw(&self) -> &Connection;

    /// Fails when the executor can no longer be used (finished transaction).
    fn ensure_open(&self) -> RepoResult<()> {
        Ok(())
    }

    fn bulk_loader(&self) -> Option<&dyn BulkLoad> {
        None
    }

    fn transaction_starter(&self) -> Option<&dyn BeginTransaction> {
        None
    }

    /// Runs `op` against the raw connection under context supervision.
    fn with_raw<T>(
        &self,
        ctx: &Context,
        op: impl FnOnce(&Connection) -> RepoResult<T>,
    ) -> RepoResult<T> {
        self.ensure_open()?;
        guarded(self.raw(), ctx, op)
    }

    /// Fetches the first row of `sql`, if any.
    fn fetch_one<T: FromRow>(
        &self,
        ctx: &Context,
        sql: &str,
        params: impl Params,
    ) -> RepoResult<Option<T>> {
        self.with_raw(ctx, |conn| {
            let mut stmt = conn.prepare_cached(sql).map_err(|err| translate(err, ctx))?;
            let mut rows = stmt.query(params).map_err(|err| translate(err, ctx))?;
            match rows.next().map_err(|err| translate(err, ctx))? {
                Some(row) => Ok(Some(T::from_row(row)?)),
                None => Ok(None),
            }
        })
    }

    /// Fetches every row of `sql`.
    fn fetch_all<T: FromRow>(
        &self,
        ctx: &Context,
        sql: &str,
        params: impl Params,
    ) -> RepoResult<Vec<T>> {
        self.with_raw(ctx, |conn| {
            let mut stmt = conn.prepare_cached(sql).map_err(|err| translate(err, ctx))?;
            let mut rows = stmt.query(params).map_err(|err| translate(err, ctx))?;
            let mut items = Vec::new();
            while let Some(row) = rows.next().map_err(|err| translate(err, ctx))? {
                items.push(T::from_row(row)?);
            }
            Ok(items)
        })
    }

    /// Executes one statement with positional parameters; returns changed rows.
    fn exec(&self, ctx: &Context, sql: &str, params: impl Params) -> RepoResult<usize> {
        self.with_raw(ctx, |conn| {
            let mut stmt = conn.prepare_cached(sql).map_err(|err| translate(err, ctx))?;
            stmt.execute(params).map_err(|err| translate(err, ctx))
        })
    }

    /// Executes one statement with `:name` parameters; returns changed rows.
    fn exec_named(
        &self,
        ctx: &Context,
        sql: &str,
        params: &[(&str, &dyn ToSql)],
    ) -> RepoResult<usize> {
        self.with_raw(ctx, |conn| {
            let mut stmt = conn.prepare_cached(sql).map_err(|err| translate(err, ctx))?;
            stmt.execute(params).map_err(|err| translate(err, ctx))
        })
    }
}

/// One bulk insert request: a table, its column list and the rows to write.
#[derive(Debug, Clone, Copy)]
pub struct BulkInsert<'a> {
    pub table: &'static str,
    pub columns: &'static [&'static str],
    /// Appended after the VALUES list (e.g. an `ON CONFLICT … DO UPDATE`).
    pub conflict_clause: &'static str,
    pub rows: &'a [Vec<Value>],
    /// Upper bound of rows per statement.
    pub chunk_rows: usize,
}

impl BulkInsert<'_> {
    /// Rows per statement, bounded by the bind-parameter limit.
    pub fn rows_per_statement(&self) -> usize {
        let by_params = MAX_BIND_PARAMS / self.columns.len().max(1);
        self.chunk_rows.clamp(1, by_params.max(1))
    }

    /// `INSERT … VALUES (…), (…)` for `row_count` rows.
    pub fn statement_sql(&self, row_count: usize) -> String {
        let placeholders = format!("({})", vec!["?"; self.columns.len()].join(", "));
        let values = vec![placeholders.as_str(); row_count].join(", ");
        let mut sql = format!(
            "INSERT INTO {} ({}) VALUES {}",
            self.table,
            self.columns.join(", "),
            values
        );
        if !self.conflict_clause.is_empty() {
            sql.push(' ');
            sql.push_str(self.conflict_clause);
        }
        sql
    }
}

/// Multi-row load used by every [`BulkLoad`] implementation.
pub(crate) fn load_in_chunks(
    conn: &Connection,
    ctx: &Context,
    insert: &BulkInsert<'_>,
) -> RepoResult<usize> {
    let per_statement = insert.rows_per_statement();
    let mut affected = 0;
    for chunk in insert.rows.chunks(per_statement) {
        affected += guarded(conn, ctx, |conn| {
            let sql = insert.statement_sql(chunk.len());
            let mut stmt = conn.prepare_cached(&sql).map_err(|err| translate(err, ctx))?;
            stmt.execute(params_from_iter(chunk.iter().flatten()))
                .map_err(|err| translate(err, ctx))
        })?;
    }
    Ok(affected)
}

fn guarded<T>(
    conn: &Connection,
    ctx: &Context,
    op: impl FnOnce(&Connection) -> RepoResult<T>,
) -> RepoResult<T> {
    ctx.check()?;
    let watch = ctx.clone();
    conn.progress_handler(PROGRESS_HANDLER_OPS, Some(move || watch.is_done()));
    let result = op(conn);
    conn.progress_handler(PROGRESS_HANDLER_OPS, None::<fn() -> bool>);
    result
}

impl Executor for Connection {
    fn raw(&self) -> &Connection {
        self
    }

    // A connection on which the caller issued BEGIN by hand is already
    // transaction-scoped.
    fn bulk_loader(&self) -> Option<&dyn BulkLoad> {
        if self.is_autocommit() {
            None
        } else {
            Some(self)
        }
    }

    fn transaction_starter(&self) -> Option<&dyn BeginTransaction> {
        if self.is_autocommit() {
            Some(self)
        } else {
            None
        }
    }
}

impl BulkLoad for Connection {
    fn bulk_insert(&self, ctx: &Context, insert: &BulkInsert<'_>) -> RepoResult<usize> {
        load_in_chunks(self, ctx, insert)
    }
}

impl BeginTransaction for Connection {
    fn begin(&self, ctx: &Context) -> RepoResult<Transaction<'_>> {
        ctx.check()?;
        self.unchecked_transaction()
            .map_err(|err| translate(err, ctx))
    }
}

impl Executor for Transaction<'_> {
    fn raw(&self) -> &Connection {
        self
    }

    fn bulk_loader(&self) -> Option<&dyn BulkLoad> {
        Some(self)
    }
}

impl BulkLoad for Transaction<'_> {
    fn bulk_insert(&self, ctx: &Context, insert: &BulkInsert<'_>) -> RepoResult<usize> {
        load_in_chunks(self, ctx, insert)
    }
}

impl Executor for PooledConn {
    fn raw(&self) -> &Connection {
        self
    }

    fn bulk_loader(&self) -> Option<&dyn BulkLoad> {
        Executor::bulk_loader(&**self)
    }

    fn transaction_starter(&self) -> Option<&dyn BeginTransaction> {
        Executor::transaction_starter(&**self)
    }
}
