use std::sync::Arc;
use tempfile::TempDir;
use vaultgraph_core::memory::{
    MemoryEdgeRepository, MemoryHistoryRepository, MemoryMetadataRepository,
    MemoryNodeRepository, MemoryPositionRepository, MemoryStore,
};
use vaultgraph_core::{
    open_pool, Context, DbPool, Edge, EdgeRepository, EdgeType, ErrorKind, GraphIngestor,
    HistoryRepository, IngestBatch, IngestMode, IngestOutcome, IngestionRecord, IngestionStatus,
    MemoryTransactionManager, MetadataRepository, Node, NodeRepository, Page, Position,
    PositionRepository, SqliteEdgeRepository, SqliteHistoryRepository, SqliteMetadataRepository,
    SqliteNodeRepository, SqlitePositionRepository, SqliteTransactionManager, StoreConfig,
    TxError, LAST_SYNC_AT_KEY,
};

fn ctx() -> Context {
    Context::background()
}

/// Ingestor plus read access to the store it writes.
trait Harness {
    fn ingest(&self, batch: &IngestBatch, mode: IngestMode) -> Result<IngestOutcome, TxError>;
    fn node_ids(&self) -> Vec<String>;
    fn node_title(&self, id: &str) -> String;
    fn edge_count(&self) -> u64;
    fn place(&self, position: &Position);
    fn position_count(&self) -> u64;
    fn last_sync(&self) -> Option<String>;
    fn runs(&self) -> Vec<IngestionRecord>;
}

struct SqliteHarness {
    _dir: TempDir,
    pool: DbPool,
    config: StoreConfig,
    ingestor: GraphIngestor<
        SqliteTransactionManager,
        SqliteNodeRepository,
        SqliteEdgeRepository,
        SqliteHistoryRepository,
        SqliteMetadataRepository,
    >,
}

impl SqliteHarness {
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let config = StoreConfig::default();
        let pool = open_pool(dir.path().join("ingest.db"), &config).unwrap();
        let manager = SqliteTransactionManager::new(pool.clone(), &config);
        Self {
            ingestor: GraphIngestor::sqlite(manager, &config),
            pool,
            config,
            _dir: dir,
        }
    }
}

impl Harness for SqliteHarness {
    fn ingest(&self, batch: &IngestBatch, mode: IngestMode) -> Result<IngestOutcome, TxError> {
        self.ingestor.ingest(&ctx(), batch, mode)
    }

    fn node_ids(&self) -> Vec<String> {
        let conn = self.pool.get().unwrap();
        SqliteNodeRepository::new(&self.config)
            .get_all(&ctx(), &conn, Page::default())
            .unwrap()
            .into_iter()
            .map(|node| node.id)
            .collect()
    }

    fn node_title(&self, id: &str) -> String {
        let conn = self.pool.get().unwrap();
        SqliteNodeRepository::new(&self.config)
            .get_by_id(&ctx(), &conn, id)
            .unwrap()
            .title
    }

    fn edge_count(&self) -> u64 {
        let conn = self.pool.get().unwrap();
        SqliteEdgeRepository::new(&self.config)
            .count(&ctx(), &conn)
            .unwrap()
    }

    fn place(&self, position: &Position) {
        let conn = self.pool.get().unwrap();
        SqlitePositionRepository::new(&self.config)
            .upsert(&ctx(), &conn, position)
            .unwrap();
    }

    fn position_count(&self) -> u64 {
        let conn = self.pool.get().unwrap();
        SqlitePositionRepository::new(&self.config)
            .count(&ctx(), &conn)
            .unwrap()
    }

    fn last_sync(&self) -> Option<String> {
        let conn = self.pool.get().unwrap();
        SqliteMetadataRepository
            .get(&ctx(), &conn, LAST_SYNC_AT_KEY)
            .ok()
            .map(|entry| entry.value)
    }

    fn runs(&self) -> Vec<IngestionRecord> {
        let conn = self.pool.get().unwrap();
        SqliteHistoryRepository
            .list(&ctx(), &conn, Page::default())
            .unwrap()
    }
}

struct MemoryHarness {
    store: Arc<MemoryStore>,
    ingestor: GraphIngestor<
        MemoryTransactionManager,
        MemoryNodeRepository,
        MemoryEdgeRepository,
        MemoryHistoryRepository,
        MemoryMetadataRepository,
    >,
}

impl MemoryHarness {
    fn new() -> Self {
        let store = Arc::new(MemoryStore::new());
        Self {
            ingestor: GraphIngestor::memory(MemoryTransactionManager::new(Arc::clone(&store))),
            store,
        }
    }
}

impl Harness for MemoryHarness {
    fn ingest(&self, batch: &IngestBatch, mode: IngestMode) -> Result<IngestOutcome, TxError> {
        self.ingestor.ingest(&ctx(), batch, mode)
    }

    fn node_ids(&self) -> Vec<String> {
        MemoryNodeRepository
            .get_all(&ctx(), &self.store, Page::default())
            .unwrap()
            .into_iter()
            .map(|node| node.id)
            .collect()
    }

    fn node_title(&self, id: &str) -> String {
        MemoryNodeRepository
            .get_by_id(&ctx(), &self.store, id)
            .unwrap()
            .title
    }

    fn edge_count(&self) -> u64 {
        MemoryEdgeRepository.count(&ctx(), &self.store).unwrap()
    }

    fn place(&self, position: &Position) {
        MemoryPositionRepository
            .upsert(&ctx(), &self.store, position)
            .unwrap();
    }

    fn position_count(&self) -> u64 {
        MemoryPositionRepository.count(&ctx(), &self.store).unwrap()
    }

    fn last_sync(&self) -> Option<String> {
        MemoryMetadataRepository
            .get(&ctx(), &self.store, LAST_SYNC_AT_KEY)
            .ok()
            .map(|entry| entry.value)
    }

    fn runs(&self) -> Vec<IngestionRecord> {
        MemoryHistoryRepository
            .list(&ctx(), &self.store, Page::default())
            .unwrap()
    }
}

fn batch(ids: &[&str], links: &[(&str, &str)]) -> IngestBatch {
    IngestBatch {
        nodes: ids
            .iter()
            .map(|id| Node::new(*id, format!("Note {id}")))
            .collect(),
        edges: links
            .iter()
            .map(|(source, target)| Edge::new(*source, *target, EdgeType::Reference))
            .collect(),
    }
}

fn sorted(mut ids: Vec<String>) -> Vec<String> {
    ids.sort();
    ids
}

fn rebuild_replaces_graph_and_keeps_positions<H: Harness>(h: &H) {
    h.ingest(&batch(&["a", "b", "c"], &[("a", "b"), ("b", "c")]), IngestMode::Rebuild)
        .unwrap();
    h.place(&Position::new("a", 10.0, 20.0).locked());
    h.place(&Position::new("orphan", 0.0, 0.0));

    let outcome = h
        .ingest(&batch(&["a", "d"], &[("d", "a")]), IngestMode::Rebuild)
        .unwrap();

    assert_eq!(outcome.stats.nodes_written, 2);
    assert_eq!(outcome.stats.edges_written, 1);
    assert_eq!(outcome.stats.mode, IngestMode::Rebuild);
    assert_eq!(sorted(h.node_ids()), vec!["a", "d"]);
    assert_eq!(h.edge_count(), 1);
    assert_eq!(h.position_count(), 2);
}

fn merge_upserts_without_removing<H: Harness>(h: &H) {
    h.ingest(&batch(&["a", "b"], &[("a", "b")]), IngestMode::Rebuild)
        .unwrap();

    let mut update = batch(&["b", "c"], &[("b", "c")]);
    update.nodes[0].title = "Renamed".to_string();
    let outcome = h.ingest(&update, IngestMode::Merge).unwrap();

    assert_eq!(outcome.stats.mode, IngestMode::Merge);
    assert_eq!(sorted(h.node_ids()), vec!["a", "b", "c"]);
    assert_eq!(h.node_title("b"), "Renamed");
    assert_eq!(h.edge_count(), 2);
}

fn completed_run_records_stats_and_sync_time<H: Harness>(h: &H) {
    assert!(h.last_sync().is_none());

    let outcome = h
        .ingest(&batch(&["a", "b"], &[("a", "b")]), IngestMode::Rebuild)
        .unwrap();

    let record = &outcome.record;
    assert_eq!(record.status, IngestionStatus::Completed);
    assert!(record.completed_at.is_some());
    assert!(record.error_message.is_none());
    assert_eq!(record.stats["nodes_written"], 2);
    assert_eq!(record.stats["edges_written"], 1);
    assert_eq!(record.stats["mode"], "rebuild");
    assert!(record.stats["duration_ms"].is_u64());

    let synced: i64 = h.last_sync().unwrap().parse().unwrap();
    assert!(synced > 0);

    let runs = h.runs();
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].id, record.id);
    assert_eq!(runs[0].status, IngestionStatus::Completed);
}

fn failed_run_leaves_graph_untouched<H: Harness>(h: &H) {
    h.ingest(&batch(&["a", "b"], &[("a", "b")]), IngestMode::Rebuild)
        .unwrap();
    let synced_before = h.last_sync();

    let err = h
        .ingest(&batch(&["x"], &[("x", "missing")]), IngestMode::Rebuild)
        .unwrap_err();

    assert!(matches!(err, TxError::Operation(_)));
    assert_eq!(err.kind(), ErrorKind::Validation);
    assert_eq!(sorted(h.node_ids()), vec!["a", "b"]);
    assert_eq!(h.edge_count(), 1);
    assert_eq!(h.last_sync(), synced_before);

    let runs = h.runs();
    assert_eq!(runs.len(), 2);
    let failed = runs
        .iter()
        .find(|run| run.status == IngestionStatus::Failed)
        .unwrap();
    assert!(failed.completed_at.is_some());
    let message = failed.error_message.as_deref().unwrap();
    assert!(message.contains("reference"));
    assert!(!message.contains("FOREIGN KEY"));
    assert!(!message.contains('\n'));
}

fn invalid_nodes_fail_the_run<H: Harness>(h: &H) {
    let mut bad = batch(&["ok", "also-ok"], &[]);
    bad.nodes.push(Node::new("", "No id"));

    let err = h.ingest(&bad, IngestMode::Merge).unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Validation);
    assert!(h.node_ids().is_empty());
    assert_eq!(h.runs()[0].status, IngestionStatus::Failed);
}

macro_rules! on_both_harnesses {
    ($($check:ident),+ $(,)?) => {
        mod sqlite {
            $(
                #[test]
                fn $check() {
                    super::$check(&super::SqliteHarness::new());
                }
            )+
        }

        mod memory {
            $(
                #[test]
                fn $check() {
                    super::$check(&super::MemoryHarness::new());
                }
            )+
        }
    };
}

on_both_harnesses!(
    rebuild_replaces_graph_and_keeps_positions,
    merge_upserts_without_removing,
    completed_run_records_stats_and_sync_time,
    failed_run_leaves_graph_untouched,
    invalid_nodes_fail_the_run,
);
