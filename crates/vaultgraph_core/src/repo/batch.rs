//! Shared batch-write and atomic-section helpers.
//!
//! # Responsibility
//! - Pick the write path for a batch from the executor's capabilities.
//! - Validate every item before any row is written.
//! - Run multi-statement writes inside a savepoint.
//! - Name the row behind a uniqueness failure, whatever tier wrote it.

use crate::context::Context;
use crate::error::{ErrorKind, RepoError, RepoResult};
use crate::executor::{BulkInsert, BulkLoad, Executor};
use crate::model::FieldError;
use log::debug;
use rusqlite::params_from_iter;

/// Write path chosen for one batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BatchTier {
    /// The executor is transaction-scoped; stream through its bulk loader.
    Bulk,
    /// Bare connection; open a transaction, bulk load, commit.
    OwnTransaction,
    /// No capability advertised; one statement per row inside a savepoint.
    PerRow,
}

impl BatchTier {
    pub(crate) fn as_str(self) -> &'static str {
        match self {
            Self::Bulk => "bulk",
            Self::OwnTransaction => "own_transaction",
            Self::PerRow => "per_row",
        }
    }
}

pub(crate) fn select_tier<E: Executor>(exec: &E) -> BatchTier {
    if exec.bulk_loader().is_some() {
        BatchTier::Bulk
    } else if exec.transaction_starter().is_some() {
        BatchTier::OwnTransaction
    } else {
        BatchTier::PerRow
    }
}

/// Writes `insert.rows` atomically through the best path `exec` supports.
///
/// Returns the number of rows SQLite reports as changed. A uniqueness failure
/// carries `conflict_value(index, field)` for the first row that collided.
pub(crate) fn write_batch<E: Executor>(
    exec: &E,
    ctx: &Context,
    insert: &BulkInsert<'_>,
    conflict_value: impl Fn(usize, Option<&str>) -> String,
) -> RepoResult<usize> {
    if insert.rows.is_empty() {
        return Ok(0);
    }
    ctx.check()?;

    load_rows(exec, ctx, insert).map_err(|err| match err {
        RepoError::DuplicateKey { field, value: None } => {
            let value = first_conflicting_row(exec, ctx, insert)
                .map(|index| conflict_value(index, field.as_deref()));
            RepoError::DuplicateKey { field, value }
        }
        other => other,
    })
}

fn load_rows<E: Executor>(exec: &E, ctx: &Context, insert: &BulkInsert<'_>) -> RepoResult<usize> {
    let tier = select_tier(exec);
    debug!(
        "event=batch_write module=repo status=start table={} rows={} tier={}",
        insert.table,
        insert.rows.len(),
        tier.as_str()
    );

    let written = if let Some(loader) = exec.bulk_loader() {
        atomically(exec, ctx, || loader.bulk_insert(ctx, insert))?
    } else if let Some(starter) = exec.transaction_starter() {
        let tx = starter.begin(ctx)?;
        let written = BulkLoad::bulk_insert(&tx, ctx, insert)?;
        tx.commit()?;
        written
    } else {
        let sql = insert.statement_sql(1);
        atomically(exec, ctx, || {
            let mut written = 0;
            for row in insert.rows {
                written += exec.exec(ctx, &sql, params_from_iter(row.iter()))?;
            }
            Ok(written)
        })?
    };

    debug!(
        "event=batch_write module=repo status=ok table={} rows={} written={} tier={}",
        insert.table,
        insert.rows.len(),
        written,
        tier.as_str()
    );
    Ok(written)
}

/// Replays `insert` one row at a time and returns the index of the first row
/// rejected as a duplicate. Every replayed row is rolled back.
fn first_conflicting_row<E: Executor>(
    exec: &E,
    ctx: &Context,
    insert: &BulkInsert<'_>,
) -> Option<usize> {
    exec.exec(ctx, "SAVEPOINT vg_replay;", []).ok()?;

    let sql = insert.statement_sql(1);
    let mut conflicting = None;
    for (index, row) in insert.rows.iter().enumerate() {
        if let Err(err) = exec.exec(ctx, &sql, params_from_iter(row.iter())) {
            if err.kind() == ErrorKind::DuplicateKey {
                conflicting = Some(index);
            }
            break;
        }
    }

    let cleanup = Context::background();
    let _ = exec.exec(&cleanup, "ROLLBACK TO vg_replay;", []);
    let _ = exec.exec(&cleanup, "RELEASE vg_replay;", []);
    debug!(
        "event=batch_conflict module=repo table={} row={:?}",
        insert.table, conflicting
    );
    conflicting
}

/// Runs `op` inside a savepoint on `exec`; partial writes are undone on error.
///
/// Works with or without an enclosing transaction.
pub(crate) fn atomically<E, T>(
    exec: &E,
    ctx: &Context,
    op: impl FnOnce() -> RepoResult<T>,
) -> RepoResult<T>
where
    E: Executor,
{
    exec.exec(ctx, "SAVEPOINT vg_atomic;", [])?;

    let cleanup = Context::background();
    let outcome = op().and_then(|value| {
        exec.exec(&cleanup, "RELEASE vg_atomic;", [])?;
        Ok(value)
    });

    if outcome.is_err() {
        let _ = exec.exec(&cleanup, "ROLLBACK TO vg_atomic;", []);
        let _ = exec.exec(&cleanup, "RELEASE vg_atomic;", []);
    }
    outcome
}

/// Validates every item; one failure is reported as-is, several together.
pub(crate) fn validate_all<T>(
    items: &[T],
    validate: impl Fn(&T) -> Result<(), FieldError>,
) -> RepoResult<()> {
    let mut first = None;
    let mut failed_indices = Vec::new();
    for (index, item) in items.iter().enumerate() {
        if let Err(err) = validate(item) {
            failed_indices.push(index);
            first.get_or_insert(err);
        }
    }

    match (failed_indices.len(), first) {
        (0, _) | (_, None) => Ok(()),
        (1, Some(err)) => Err(err.into()),
        (failed, Some(_)) => Err(RepoError::BatchPartialFailure {
            total: items.len(),
            failed,
            failed_indices,
        }),
    }
}
