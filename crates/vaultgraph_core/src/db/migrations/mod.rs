//! Schema steps for the graph store and the runner that applies them.
//!
//! # Invariants
//! - Step versions start at 1 and increase by exactly one.
//! - The schema version lives in `PRAGMA user_version` and only moves
//!   forward, inside the same write transaction as the step it records.
//! - Concurrent openers of one file apply each step once: the version is
//!   re-read after the write lock is taken.

use crate::db::{DbError, DbResult};
use log::{debug, info};
use rusqlite::{Connection, TransactionBehavior};
use std::time::Instant;

struct SchemaStep {
    version: u32,
    name: &'static str,
    sql: &'static str,
}

const SCHEMA_STEPS: &[SchemaStep] = &[
    SchemaStep {
        version: 1,
        name: "graph",
        sql: include_str!("0001_graph.sql"),
    },
    SchemaStep {
        version: 2,
        name: "search",
        sql: include_str!("0002_search.sql"),
    },
    SchemaStep {
        version: 3,
        name: "ingestion_history",
        sql: include_str!("0003_ingestion_history.sql"),
    },
];

/// Highest schema version this build can produce.
pub fn latest_version() -> u32 {
    SCHEMA_STEPS.last().map_or(0, |step| step.version)
}

/// Schema version recorded in the database.
pub fn schema_version(conn: &Connection) -> DbResult<u32> {
    Ok(conn.query_row("PRAGMA user_version;", [], |row| row.get::<_, u32>(0))?)
}

fn check_supported(version: u32) -> DbResult<()> {
    let latest = latest_version();
    if version > latest {
        return Err(DbError::UnsupportedSchemaVersion {
            db_version: version,
            latest_supported: latest,
        });
    }
    Ok(())
}

/// Brings `conn` up to [`latest_version`]; a current database is left alone.
pub fn apply_migrations(conn: &mut Connection) -> DbResult<()> {
    let observed = schema_version(conn)?;
    check_supported(observed)?;
    if observed == latest_version() {
        debug!("event=db_migrate module=db status=skip version={observed}");
        return Ok(());
    }

    let started_at = Instant::now();
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    // Another connection may have migrated while we waited for the lock.
    let from_version = schema_version(&tx)?;
    check_supported(from_version)?;

    let mut applied = 0;
    for step in SCHEMA_STEPS.iter().filter(|step| step.version > from_version) {
        let step_started_at = Instant::now();
        tx.execute_batch(step.sql)?;
        tx.pragma_update(None, "user_version", step.version)?;
        applied += 1;
        debug!(
            "event=db_migrate_step module=db status=ok version={} name={} duration_ms={}",
            step.version,
            step.name,
            step_started_at.elapsed().as_millis()
        );
    }
    tx.commit()?;

    info!(
        "event=db_migrate module=db status=ok from_version={} to_version={} steps={} duration_ms={}",
        from_version,
        latest_version(),
        applied,
        started_at.elapsed().as_millis()
    );
    Ok(())
}
