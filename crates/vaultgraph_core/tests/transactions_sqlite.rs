use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::mpsc;
use std::thread;
use std::time::Duration;
use tempfile::TempDir;
use vaultgraph_core::{
    open_pool, BeginBehavior, Context, DbPool, Edge, EdgeRepository, EdgeType, ErrorKind,
    Executor, Node, NodeRepository, RepoError, SqliteEdgeRepository, SqliteNodeRepository,
    SqliteTransactionManager, StoreConfig, TransactionManager, TxError, TxScope, TxState,
};
use vaultgraph_core::tx::TxAction;

struct Fixture {
    _dir: TempDir,
    pool: DbPool,
    manager: SqliteTransactionManager,
    nodes: SqliteNodeRepository,
    edges: SqliteEdgeRepository,
}

fn fixture_with(config: StoreConfig) -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let pool = open_pool(dir.path().join("tx.db"), &config).unwrap();
    Fixture {
        manager: SqliteTransactionManager::new(pool.clone(), &config),
        pool,
        nodes: SqliteNodeRepository::new(&config),
        edges: SqliteEdgeRepository::new(&config),
        _dir: dir,
    }
}

fn fixture() -> Fixture {
    fixture_with(StoreConfig::default())
}

fn ctx() -> Context {
    Context::background()
}

impl Fixture {
    fn node_count(&self) -> u64 {
        let conn = self.pool.get().unwrap();
        self.nodes.count(&ctx(), &conn).unwrap()
    }

    fn edge_count(&self) -> u64 {
        let conn = self.pool.get().unwrap();
        self.edges.count(&ctx(), &conn).unwrap()
    }
}

#[test]
fn successful_callback_commits() {
    let f = fixture();

    let edge = f
        .manager
        .with_transaction(&ctx(), |tx| {
            f.nodes.create(&ctx(), tx.executor(), &Node::new("n1", "One"))?;
            f.nodes.create(&ctx(), tx.executor(), &Node::new("n2", "Two"))?;
            f.edges.create(
                &ctx(),
                tx.executor(),
                &Edge::new("n1", "n2", EdgeType::Reference),
            )
        })
        .unwrap();

    assert_eq!(f.node_count(), 2);
    let conn = f.pool.get().unwrap();
    assert_eq!(f.edges.get_by_id(&ctx(), &conn, edge.id).unwrap().source_id, "n1");
}

#[test]
fn callback_error_rolls_back_every_write() {
    let f = fixture();

    let err = f
        .manager
        .with_transaction(&ctx(), |tx| {
            f.nodes.create(&ctx(), tx.executor(), &Node::new("n1", "A"))?;
            f.nodes.create(&ctx(), tx.executor(), &Node::new("n2", "B"))?;
            f.edges.create(
                &ctx(),
                tx.executor(),
                &Edge::new("n1", "n2", EdgeType::Reference),
            )?;
            Err::<(), _>(RepoError::validation("input", "rejected by caller"))
        })
        .unwrap_err();

    match err {
        TxError::Operation(RepoError::Validation { field, .. }) => assert_eq!(field, "input"),
        other => panic!("unexpected error: {other:?}"),
    }
    let conn = f.pool.get().unwrap();
    assert!(f.nodes.get_by_id(&ctx(), &conn, "n1").unwrap_err().is_not_found());
    assert!(f.nodes.get_by_id(&ctx(), &conn, "n2").unwrap_err().is_not_found());
    assert!(f.edges.get_by_node(&ctx(), &conn, "n1").unwrap().is_empty());
    assert_eq!(f.edge_count(), 0);
}

#[test]
fn panic_rolls_back_and_propagates() {
    let f = fixture_with(StoreConfig {
        pool_max_size: 1,
        ..StoreConfig::default()
    });

    let outcome = catch_unwind(AssertUnwindSafe(|| {
        let _ = f.manager.with_transaction(&ctx(), |tx| -> Result<(), RepoError> {
            f.nodes
                .create(&ctx(), tx.executor(), &Node::new("n1", "One"))
                .unwrap();
            panic!("callback exploded")
        });
    }));

    let payload = outcome.unwrap_err();
    assert_eq!(payload.downcast_ref::<&str>(), Some(&"callback exploded"));
    assert_eq!(f.node_count(), 0);

    // The only pooled connection came back outside any transaction.
    let conn = f.pool.get().unwrap();
    assert!(conn.is_autocommit());
}

#[test]
fn finished_transaction_rejects_further_use() {
    let f = fixture();

    f.manager
        .with_transaction(&ctx(), |tx| {
            f.nodes.create(&ctx(), tx.executor(), &Node::new("n1", "One"))?;
            tx.commit()?;
            assert_eq!(tx.state(), TxState::Committed);

            let again = tx.commit().unwrap_err();
            assert!(matches!(
                again,
                RepoError::TransactionState {
                    state: TxState::Committed,
                    ..
                }
            ));
            assert_eq!(tx.rollback().unwrap_err().kind(), ErrorKind::TransactionState);

            let late = f
                .nodes
                .create(&ctx(), tx.executor(), &Node::new("n2", "Two"))
                .unwrap_err();
            assert_eq!(late.kind(), ErrorKind::TransactionState);
            Ok(())
        })
        .unwrap();

    assert_eq!(f.node_count(), 1);
}

#[test]
fn manual_rollback_then_success_persists_nothing() {
    let f = fixture();

    let value = f
        .manager
        .with_transaction(&ctx(), |tx| {
            f.nodes.create(&ctx(), tx.executor(), &Node::new("n1", "One"))?;
            tx.rollback()?;
            assert_eq!(tx.state(), TxState::RolledBack);
            Ok(7)
        })
        .unwrap();

    assert_eq!(value, 7);
    assert_eq!(f.node_count(), 0);
}

#[test]
fn error_after_manual_commit_keeps_committed_work() {
    let f = fixture();

    let err = f
        .manager
        .with_transaction(&ctx(), |tx| {
            f.nodes.create(&ctx(), tx.executor(), &Node::new("n1", "One"))?;
            tx.commit()?;
            Err::<(), _>(RepoError::generic("post-commit step failed"))
        })
        .unwrap_err();

    assert!(matches!(err, TxError::Operation(RepoError::Generic { .. })));
    assert!(!err.is_severe());
    assert_eq!(f.node_count(), 1);
}

#[test]
fn commit_failure_is_reported_separately_and_rolled_back() {
    let f = fixture_with(StoreConfig {
        pool_max_size: 1,
        ..StoreConfig::default()
    });

    let err = f
        .manager
        .with_transaction(&ctx(), |tx| {
            // Foreign keys are checked at COMMIT from here on.
            tx.executor()
                .raw()
                .execute_batch("PRAGMA defer_foreign_keys = ON;")?;
            f.nodes.create(&ctx(), tx.executor(), &Node::new("n1", "One"))?;
            f.edges.create(
                &ctx(),
                tx.executor(),
                &Edge::new("n1", "missing", EdgeType::Reference),
            )?;
            Ok(())
        })
        .unwrap_err();

    match &err {
        TxError::CommitFailed(source) => assert_eq!(source.kind(), ErrorKind::Validation),
        other => panic!("unexpected error: {other:?}"),
    }
    assert!(err.operation_error().is_none());
    assert_eq!(f.node_count(), 0);
    assert!(f.pool.get().unwrap().is_autocommit());
}

#[test]
fn uncommitted_writes_are_invisible_to_other_connections() {
    let f = fixture();
    let (written_tx, written_rx) = mpsc::channel();
    let (resume_tx, resume_rx) = mpsc::channel::<()>();

    thread::scope(|scope| {
        let shared = &f;
        let writer = scope.spawn(move || {
            shared.manager.with_transaction(&ctx(), |tx| {
                shared
                    .nodes
                    .create(&ctx(), tx.executor(), &Node::new("hidden", "Hidden"))?;
                written_tx.send(()).unwrap();
                resume_rx.recv().unwrap();
                Ok(())
            })
        });

        written_rx.recv().unwrap();
        let conn = f.pool.get().unwrap();
        let unseen = f.nodes.get_by_id(&ctx(), &conn, "hidden").unwrap_err();
        assert!(unseen.is_not_found());
        drop(conn);
        resume_tx.send(()).unwrap();
        writer.join().unwrap().unwrap();
    });

    assert_eq!(f.node_count(), 1);
}

#[test]
fn done_context_never_opens_a_transaction() {
    let f = fixture();
    let cancelled = Context::background();
    cancelled.cancel();

    let mut ran = false;
    let err = f
        .manager
        .with_transaction(&cancelled, |_| {
            ran = true;
            Ok(())
        })
        .unwrap_err();

    assert!(matches!(err, TxError::Begin(RepoError::Cancelled)));
    assert_eq!(err.kind(), ErrorKind::Cancelled);
    assert!(!ran);
}

#[test]
fn immediate_begin_behaves_like_deferred_for_callers() {
    let f = fixture_with(StoreConfig {
        begin: BeginBehavior::Immediate,
        ..StoreConfig::default()
    });

    f.manager
        .with_transaction(&ctx(), |tx| {
            f.nodes
                .create_batch(
                    &ctx(),
                    tx.executor(),
                    &[Node::new("a", "A"), Node::new("b", "B")],
                )
                .map(|_| ())
        })
        .unwrap();
    assert_eq!(f.node_count(), 2);
}

/// Inserts rows until `ctx` ends; SQLite then rolls the whole transaction back.
const RUNAWAY_INSERT: &str = "WITH RECURSIVE counter(n) AS (
        SELECT 1 UNION ALL SELECT n + 1 FROM counter
     )
     INSERT INTO metadata (key, value, updated_at)
     SELECT 'runaway-' || n, 'v', 0 FROM counter;";

#[test]
fn backend_abort_discards_everything_and_blocks_later_writes() {
    let f = fixture_with(StoreConfig {
        pool_max_size: 1,
        ..StoreConfig::default()
    });

    let err = f
        .manager
        .with_transaction(&ctx(), |tx| {
            f.nodes.create(&ctx(), tx.executor(), &Node::new("a", "A"))?;

            let short = Context::background().with_timeout(Duration::from_millis(50));
            let interrupted = tx.executor().exec(&short, RUNAWAY_INSERT, []).unwrap_err();
            assert_eq!(interrupted.kind(), ErrorKind::DeadlineExceeded);
            assert_eq!(tx.state(), TxState::Aborted);

            let late = f
                .nodes
                .create(&ctx(), tx.executor(), &Node::new("b", "B"))
                .unwrap_err();
            assert!(matches!(
                late,
                RepoError::TransactionState {
                    attempted: TxAction::Execute,
                    state: TxState::Aborted
                }
            ));
            assert_eq!(tx.rollback().unwrap_err().kind(), ErrorKind::TransactionState);

            Err::<(), _>(RepoError::generic("injected"))
        })
        .unwrap_err();

    assert!(matches!(err, TxError::Aborted(RepoError::Generic { .. })));
    assert!(err.operation_error().is_some());
    assert_eq!(f.node_count(), 0);

    let conn = f.pool.get().unwrap();
    assert!(conn.is_autocommit());
    let leaked: Option<i64> = conn
        .fetch_one(&ctx(), "SELECT COUNT(*) FROM metadata;", [])
        .unwrap();
    assert_eq!(leaked, Some(0));
}

#[test]
fn swallowed_backend_abort_fails_the_commit() {
    let f = fixture();

    let err = f
        .manager
        .with_transaction(&ctx(), |tx| {
            f.nodes.create(&ctx(), tx.executor(), &Node::new("a", "A"))?;
            let short = Context::background().with_timeout(Duration::from_millis(50));
            let _ = tx.executor().exec(&short, RUNAWAY_INSERT, []);
            let _ = f.nodes.create(&ctx(), tx.executor(), &Node::new("b", "B"));
            Ok(())
        })
        .unwrap_err();

    match &err {
        TxError::CommitFailed(source) => assert_eq!(source.kind(), ErrorKind::TransactionState),
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(f.node_count(), 0);
}
