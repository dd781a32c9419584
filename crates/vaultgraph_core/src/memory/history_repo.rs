//! In-memory ingestion history repository.

use super::store::{HistoryRows, MemoryExecutor};
use crate::context::Context;
use crate::error::{RepoError, RepoResult, Resource};
use crate::model::ingestion::{IngestionRecord, IngestionStatus};
use crate::model::now_ms;
use crate::repo::history_repo::HistoryRepository;
use crate::repo::Page;
use serde_json::Value as JsonValue;

#[derive(Debug, Clone, Copy, Default)]
pub struct MemoryHistoryRepository;

/// Records newest first: later start, then later insert.
fn newest_first(rows: &HistoryRows) -> Vec<IngestionRecord> {
    let mut ordered: Vec<(usize, &IngestionRecord)> = rows.iter().enumerate().collect();
    ordered.sort_by(|(seq_a, a), (seq_b, b)| {
        b.started_at
            .cmp(&a.started_at)
            .then_with(|| seq_b.cmp(seq_a))
    });
    ordered.into_iter().map(|(_, record)| record.clone()).collect()
}

impl MemoryHistoryRepository {
    fn transition<E: MemoryExecutor>(
        &self,
        ctx: &Context,
        exec: &E,
        id: &str,
        next: IngestionStatus,
        stats: Option<&JsonValue>,
        error_message: Option<&str>,
    ) -> RepoResult<IngestionRecord> {
        exec.with_tables(ctx, |tables| {
            let index = tables
                .history()
                .iter()
                .position(|record| record.id == id)
                .ok_or_else(|| RepoError::not_found(Resource::IngestionRecord, id))?;
            tables.history()[index].status.check_transition(next)?;

            let record = &mut tables.history_mut()[index];
            record.status = next;
            if next.is_terminal() {
                record.completed_at = Some(now_ms());
            }
            if let Some(stats) = stats {
                record.stats = stats.clone();
            }
            if let Some(message) = error_message {
                record.error_message = Some(message.to_string());
            }
            Ok(record.clone())
        })
    }
}

impl<E: MemoryExecutor> HistoryRepository<E> for MemoryHistoryRepository {
    fn create(
        &self,
        ctx: &Context,
        exec: &E,
        record: &IngestionRecord,
    ) -> RepoResult<IngestionRecord> {
        record.validate()?;
        exec.with_tables(ctx, |tables| {
            if tables.history().iter().any(|existing| existing.id == record.id) {
                return Err(RepoError::duplicate("ingestion_history.id", &record.id));
            }
            let stored = IngestionRecord {
                started_at: now_ms(),
                completed_at: None,
                ..record.clone()
            };
            tables.history_mut().push(stored.clone());
            Ok(stored)
        })
    }

    fn get_by_id(&self, ctx: &Context, exec: &E, id: &str) -> RepoResult<IngestionRecord> {
        exec.with_tables(ctx, |tables| {
            tables
                .history()
                .iter()
                .find(|record| record.id == id)
                .cloned()
                .ok_or_else(|| RepoError::not_found(Resource::IngestionRecord, id))
        })
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
        exec.with_tables(ctx, |tables| Ok(page.slice(&newest_first(tables.history()))))
    }

    fn latest(&self, ctx: &Context, exec: &E) -> RepoResult<Option<IngestionRecord>> {
        exec.with_tables(ctx, |tables| Ok(newest_first(tables.history()).into_iter().next()))
    }

    fn latest_with_status(
        &self,
        ctx: &Context,
        exec: &E,
        status: IngestionStatus,
    ) -> RepoResult<Option<IngestionRecord>> {
        exec.with_tables(ctx, |tables| {
            Ok(newest_first(tables.history())
                .into_iter()
                .find(|record| record.status == status))
        })
    }

    fn count(&self, ctx: &Context, exec: &E) -> RepoResult<u64> {
        exec.with_tables(ctx, |tables| Ok(tables.history().len() as u64))
    }
}
