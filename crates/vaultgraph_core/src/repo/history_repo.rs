//! Ingestion history repository contract and SQLite implementation.
//!
//! # Invariants
//! - Records are created `pending` or `running`.
//! - A record reaches `completed` or `failed` exactly once; later transitions
//!   fail with `Validation { field: "status" }` and change nothing.
//! - "Latest" means most recently started; ties go to the later insert.

use super::{placeholders, Page};
use crate::context::Context;
use crate::error::{RepoError, RepoResult, Resource};
use crate::executor::{Executor, FromRow};
use crate::model::ingestion::{IngestionRecord, IngestionStatus};
use crate::model::now_ms;
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Row};
use serde_json::Value as JsonValue;

const HISTORY_SELECT_SQL: &str = "SELECT
    id,
    started_at,
    completed_at,
    status,
    stats,
    error_message
FROM ingestion_history";

const NEWEST_FIRST: &str = "ORDER BY started_at DESC, rowid DESC";

/// Repository interface for ingestion run records.
pub trait HistoryRepository<E: ?Sized> {
    /// Stores a new record; `started_at` is assigned here.
    fn create(&self, ctx: &Context, exec: &E, record: &IngestionRecord)
        -> RepoResult<IngestionRecord>;
    fn get_by_id(&self, ctx: &Context, exec: &E, id: &str) -> RepoResult<IngestionRecord>;
    /// `pending -> running`.
    fn mark_running(&self, ctx: &Context, exec: &E, id: &str) -> RepoResult<IngestionRecord>;
    /// Finishes the run successfully with its statistics blob.
    fn complete(&self, ctx: &Context, exec: &E, id: &str, stats: &JsonValue)
        -> RepoResult<IngestionRecord>;
    /// Finishes the run as failed.
    fn fail(&self, ctx: &Context, exec: &E, id: &str, error_message: &str)
        -> RepoResult<IngestionRecord>;
    /// Newest first.
    fn list(&self, ctx: &Context, exec: &E, page: Page) -> RepoResult<Vec<IngestionRecord>>;
    fn latest(&self, ctx: &Context, exec: &E) -> RepoResult<Option<IngestionRecord>>;
    fn latest_with_status(
        &self,
        ctx: &Context,
        exec: &E,
        status: IngestionStatus,
    ) -> RepoResult<Option<IngestionRecord>>;
    fn count(&self, ctx: &Context, exec: &E) -> RepoResult<u64>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SqliteHistoryRepository;

impl FromRow for IngestionRecord {
    fn from_row(row: &Row<'_>) -> RepoResult<Self> {
        let status_text: String = row.get(3)?;
        let status = IngestionStatus::parse(&status_text).ok_or_else(|| {
            RepoError::generic(format!("stored ingestion status `{status_text}` is unknown"))
        })?;
        let stats_json: String = row.get(4)?;

        Ok(IngestionRecord {
            id: row.get(0)?,
            started_at: row.get(1)?,
            completed_at: row.get(2)?,
            status,
            stats: serde_json::from_str(&stats_json)?,
            error_message: row.get(5)?,
        })
    }
}

impl SqliteHistoryRepository {
    fn transition<E: Executor>(
        &self,
        ctx: &Context,
        exec: &E,
        id: &str,
        next: IngestionStatus,
        stats: Option<&JsonValue>,
        error_message: Option<&str>,
    ) -> RepoResult<IngestionRecord> {
        let predecessors = next.allowed_predecessors();
        let completed_at = next.is_terminal().then(now_ms);

        let mut bind_values = vec![
            Value::Text(next.as_str().to_string()),
            completed_at.map_or(Value::Null, Value::Integer),
            match stats {
                Some(stats) => Value::Text(serde_json::to_string(stats)?),
                None => Value::Null,
            },
            error_message.map_or(Value::Null, |message| Value::Text(message.to_string())),
            Value::Text(id.to_string()),
        ];
        bind_values.extend(
            predecessors
                .iter()
                .map(|status| Value::Text(status.as_str().to_string())),
        );

        let sql = format!(
            "UPDATE ingestion_history
             SET
                status = ?,
                completed_at = COALESCE(?, completed_at),
                stats = COALESCE(?, stats),
                error_message = COALESCE(?, error_message)
             WHERE id = ? AND status IN ({});",
            placeholders(predecessors.len())
        );
        let changed = exec.exec(ctx, &sql, params_from_iter(bind_values))?;

        let record = <Self as HistoryRepository<E>>::get_by_id(self, ctx, exec, id)?;
        if changed == 0 {
            record.status.check_transition(next)?;
            return Err(RepoError::generic("ingestion record changed concurrently"));
        }
        Ok(record)
    }

    fn newest<E: Executor>(
        &self,
        ctx: &Context,
        exec: &E,
        status: Option<IngestionStatus>,
    ) -> RepoResult<Option<IngestionRecord>> {
        match status {
            Some(status) => exec.fetch_one(
                ctx,
                &format!("{HISTORY_SELECT_SQL} WHERE status = ?1 {NEWEST_FIRST} LIMIT 1;"),
                params![status.as_str()],
            ),
            None => exec.fetch_one(
                ctx,
                &format!("{HISTORY_SELECT_SQL} {NEWEST_FIRST} LIMIT 1;"),
                [],
            ),
        }
    }
}

impl<E: Executor> HistoryRepository<E> for SqliteHistoryRepository {
    fn create(
        &self,
        ctx: &Context,
        exec: &E,
        record: &IngestionRecord,
    ) -> RepoResult<IngestionRecord> {
        record.validate()?;

        let started_at = now_ms();
        exec.exec(
            ctx,
            "INSERT INTO ingestion_history (
                id,
                started_at,
                completed_at,
                status,
                stats,
                error_message
            ) VALUES (?1, ?2, NULL, ?3, ?4, ?5);",
            params![
                record.id,
                started_at,
                record.status.as_str(),
                serde_json::to_string(&record.stats)?,
                record.error_message,
            ],
        )
        .map_err(|err| err.with_duplicate_value(&record.id))?;

        Ok(IngestionRecord {
            started_at,
            completed_at: None,
            ..record.clone()
        })
    }

    fn get_by_id(&self, ctx: &Context, exec: &E, id: &str) -> RepoResult<IngestionRecord> {
        exec.fetch_one(
            ctx,
            &format!("{HISTORY_SELECT_SQL} WHERE id = ?1;"),
            params![id],
        )?
        .ok_or_else(|| RepoError::not_found(Resource::IngestionRecord, id))
    }

    fn mark_running(&self, ctx: &Context, exec: &E, id: &str) -> RepoResult<IngestionRecord> {
        self.transition(ctx, exec, id, IngestionStatus::Running, None, None)
    }

    fn complete(
        &self,
        ctx: &Context,
        exec: &E,
        id: &str,
        stats: &JsonValue,
    ) -> RepoResult<IngestionRecord> {
        self.transition(ctx, exec, id, IngestionStatus::Completed, Some(stats), None)
    }

    fn fail(
        &self,
        ctx: &Context,
        exec: &E,
        id: &str,
        error_message: &str,
    ) -> RepoResult<IngestionRecord> {
        self.transition(
            ctx,
            exec,
            id,
            IngestionStatus::Failed,
            None,
            Some(error_message),
        )
    }

    fn list(&self, ctx: &Context, exec: &E, page: Page) -> RepoResult<Vec<IngestionRecord>> {
        if page.is_empty() {
            return Ok(Vec::new());
        }
        exec.fetch_all(
            ctx,
            &format!("{HISTORY_SELECT_SQL} {NEWEST_FIRST} LIMIT ?1 OFFSET ?2;"),
            params![page.limit, page.offset],
        )
    }

    fn latest(&self, ctx: &Context, exec: &E) -> RepoResult<Option<IngestionRecord>> {
        self.newest(ctx, exec, None)
    }

    fn latest_with_status(
        &self,
        ctx: &Context,
        exec: &E,
        status: IngestionStatus,
    ) -> RepoResult<Option<IngestionRecord>> {
        self.newest(ctx, exec, Some(status))
    }

    fn count(&self, ctx: &Context, exec: &E) -> RepoResult<u64> {
        let count: Option<i64> =
            exec.fetch_one(ctx, "SELECT COUNT(*) FROM ingestion_history;", [])?;
        Ok(count.unwrap_or_default().unsigned_abs())
    }
}
