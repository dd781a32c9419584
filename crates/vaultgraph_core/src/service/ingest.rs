//! Ingestion orchestration.
//!
//! # Responsibility
//! - Apply one batch of parsed nodes/edges atomically, as a rebuild or merge.
//! - Record every run in ingestion history.
//!
//! # Invariants
//! - The history record is `running` before any graph write starts and ends
//!   `completed` or `failed`.
//! - Graph writes and the `last_sync_at` fact commit together or not at all.
//! - Positions are never touched.
//! - Failure messages stored in history carry no backend detail.

use crate::config::StoreConfig;
use crate::context::Context;
use crate::error::RepoResult;
use crate::logging::sanitize_message;
use crate::memory::{
    MemoryEdgeRepository, MemoryHistoryRepository, MemoryMetadataRepository,
    MemoryNodeRepository, MemoryTransactionManager,
};
use crate::model::edge::Edge;
use crate::model::ingestion::{IngestionRecord, IngestionStatus};
use crate::model::metadata::LAST_SYNC_AT_KEY;
use crate::model::node::Node;
use crate::model::now_ms;
use crate::repo::edge_repo::{EdgeRepository, SqliteEdgeRepository};
use crate::repo::history_repo::{HistoryRepository, SqliteHistoryRepository};
use crate::repo::metadata_repo::{MetadataRepository, SqliteMetadataRepository};
use crate::repo::node_repo::{NodeRepository, SqliteNodeRepository};
use crate::tx::{SqliteTransactionManager, TransactionManager, TxError, TxScope};
use log::{error, info};
use serde::Serialize;
use std::fmt::{Display, Formatter};
use std::time::Instant;

/// Executor type handed to callbacks by manager `M`.
pub type ScopeExecutor<M> = <<M as TransactionManager>::Scope as TxScope>::Executor;

/// How a batch is applied to the stored graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IngestMode {
    /// Replace every node and edge with the batch.
    Rebuild,
    /// Insert new rows and update existing ones; nothing is removed.
    Merge,
}

impl IngestMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Rebuild => "rebuild",
            Self::Merge => "merge",
        }
    }
}

impl Display for IngestMode {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Parsed graph content produced by the ingestion pipeline.
#[derive(Debug, Clone, Default)]
pub struct IngestBatch {
    pub nodes: Vec<Node>,
    pub edges: Vec<Edge>,
}

/// Statistics stored with a completed run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IngestStats {
    pub nodes_written: usize,
    pub edges_written: usize,
    pub mode: IngestMode,
    pub duration_ms: u64,
}

/// Result of a successful run.
#[derive(Debug, Clone)]
pub struct IngestOutcome {
    pub record: IngestionRecord,
    pub stats: IngestStats,
}

/// Runs ingestion batches through any transaction manager.
pub struct GraphIngestor<M, N, G, H, K> {
    manager: M,
    nodes: N,
    edges: G,
    history: H,
    metadata: K,
}

impl
    GraphIngestor<
        SqliteTransactionManager,
        SqliteNodeRepository,
        SqliteEdgeRepository,
        SqliteHistoryRepository,
        SqliteMetadataRepository,
    >
{
    pub fn sqlite(manager: SqliteTransactionManager, config: &StoreConfig) -> Self {
        GraphIngestor::new(
            manager,
            SqliteNodeRepository::new(config),
            SqliteEdgeRepository::new(config),
            SqliteHistoryRepository,
            SqliteMetadataRepository,
        )
    }
}

impl
    GraphIngestor<
        MemoryTransactionManager,
        MemoryNodeRepository,
        MemoryEdgeRepository,
        MemoryHistoryRepository,
        MemoryMetadataRepository,
    >
{
    pub fn memory(manager: MemoryTransactionManager) -> Self {
        GraphIngestor::new(
            manager,
            MemoryNodeRepository,
            MemoryEdgeRepository,
            MemoryHistoryRepository,
            MemoryMetadataRepository,
        )
    }
}

impl<M, N, G, H, K> GraphIngestor<M, N, G, H, K>
where
    M: TransactionManager,
    N: NodeRepository<ScopeExecutor<M>>,
    G: EdgeRepository<ScopeExecutor<M>>,
    H: HistoryRepository<ScopeExecutor<M>>,
    K: MetadataRepository<ScopeExecutor<M>>,
{
    pub fn new(manager: M, nodes: N, edges: G, history: H, metadata: K) -> Self {
        Self {
            manager,
            nodes,
            edges,
            history,
            metadata,
        }
    }

    /// Applies `batch` in one transaction and records the run.
    ///
    /// On failure the graph is left as it was, the run is recorded `failed`
    /// and the write error is returned.
    pub fn ingest(
        &self,
        ctx: &Context,
        batch: &IngestBatch,
        mode: IngestMode,
    ) -> Result<IngestOutcome, TxError> {
        let started_at = Instant::now();
        info!(
            "event=ingest module=service status=start mode={} nodes={} edges={}",
            mode,
            batch.nodes.len(),
            batch.edges.len()
        );

        let record = self.manager.with_transaction(ctx, |tx| {
            self.history.create(
                ctx,
                tx.executor(),
                &IngestionRecord::start(IngestionStatus::Running),
            )
        })?;

        let written = self
            .manager
            .with_transaction(ctx, |tx| self.write_graph(ctx, tx.executor(), batch, mode));

        match written {
            Ok((nodes_written, edges_written)) => {
                let stats = IngestStats {
                    nodes_written,
                    edges_written,
                    mode,
                    duration_ms: elapsed_ms(started_at),
                };
                let stats_json = serde_json::to_value(&stats)
                    .map_err(|err| TxError::Operation(err.into()))?;
                // The graph is committed; closing the record must not depend
                // on `ctx` anymore.
                let background = Context::background();
                let record = self.manager.with_transaction(&background, |tx| {
                    self.history
                        .complete(&background, tx.executor(), &record.id, &stats_json)
                })?;

                info!(
                    "event=ingest module=service status=ok mode={} nodes_written={} edges_written={} duration_ms={}",
                    mode, nodes_written, edges_written, stats.duration_ms
                );
                Ok(IngestOutcome { record, stats })
            }
            Err(err) => {
                let message = failure_summary(&err);
                error!(
                    "event=ingest module=service status=error mode={} duration_ms={} error_code=ingest_failed severe={}",
                    mode,
                    elapsed_ms(started_at),
                    err.is_severe()
                );
                let background = Context::background();
                let recorded = self.manager.with_transaction(&background, |tx| {
                    self.history
                        .fail(&background, tx.executor(), &record.id, &message)
                });
                if let Err(record_err) = recorded {
                    error!(
                        "event=ingest_history module=service status=error error_code=history_write_failed error={}",
                        record_err
                    );
                }
                Err(err)
            }
        }
    }

    fn write_graph(
        &self,
        ctx: &Context,
        exec: &ScopeExecutor<M>,
        batch: &IngestBatch,
        mode: IngestMode,
    ) -> RepoResult<(usize, usize)> {
        let written = match mode {
            IngestMode::Rebuild => {
                self.edges.delete_all(ctx, exec)?;
                self.nodes.delete_all(ctx, exec)?;
                (
                    self.nodes.create_batch(ctx, exec, &batch.nodes)?,
                    self.edges.create_batch(ctx, exec, &batch.edges)?,
                )
            }
            IngestMode::Merge => (
                self.nodes.upsert_batch(ctx, exec, &batch.nodes)?,
                self.edges.upsert_batch(ctx, exec, &batch.edges)?,
            ),
        };
        self.metadata
            .set(ctx, exec, LAST_SYNC_AT_KEY, &now_ms().to_string())?;
        Ok(written)
    }
}

const MAX_FAILURE_MESSAGE_CHARS: usize = 240;

fn elapsed_ms(started_at: Instant) -> u64 {
    u64::try_from(started_at.elapsed().as_millis()).unwrap_or(u64::MAX)
}

/// History-safe description of a failed write.
fn failure_summary(err: &TxError) -> String {
    let summary = match err {
        TxError::Begin(_) => "transaction could not be started".to_string(),
        TxError::CommitFailed(_) => "changes could not be committed".to_string(),
        TxError::Aborted(source) => {
            format!("{}; transaction aborted by storage", source.public_message())
        }
        TxError::Operation(source) => source.public_message(),
        TxError::RollbackFailed { source, .. } => {
            format!("{}; rollback failed", source.public_message())
        }
    };
    sanitize_message(&summary, MAX_FAILURE_MESSAGE_CHARS)
}
