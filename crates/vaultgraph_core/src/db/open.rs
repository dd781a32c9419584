//! Connection and pool bootstrap utilities for SQLite.
//!
//! # Responsibility
//! - Open file or in-memory SQLite connections, or an r2d2 pool over a file.
//! - Configure connection pragmas required by core behavior.
//! - Trigger schema migrations before returning a usable connection.
//!
//! # Invariants
//! - Returned connections have `foreign_keys=ON` and a busy timeout.
//! - Returned connections/pools have migrations fully applied.

use super::migrations::apply_migrations;
use super::{DbError, DbResult};
use crate::config::StoreConfig;
use log::{error, info};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::Connection;
use std::path::Path;
use std::time::{Duration, Instant};

/// Pool of bootstrapped connections.
pub type DbPool = r2d2::Pool<SqliteConnectionManager>;
/// One connection checked out of a [`DbPool`].
pub type PooledConn = r2d2::PooledConnection<SqliteConnectionManager>;

/// Opens a SQLite database file and applies all pending migrations.
///
/// # Side effects
/// - Performs connection bootstrap and migration checks.
/// - Emits `db_open` logging events with duration and status.
pub fn open_db(path: impl AsRef<Path>) -> DbResult<Connection> {
    let config = StoreConfig::default();
    open_with(
        "file",
        || Connection::open(path),
        |conn| configure_connection(conn, config.busy_timeout(), config.wal),
    )
}

/// Opens an in-memory SQLite database and applies all pending migrations.
pub fn open_db_in_memory() -> DbResult<Connection> {
    let config = StoreConfig::default();
    open_with("memory", Connection::open_in_memory, |conn| {
        configure_connection(conn, config.busy_timeout(), false)
    })
}

/// Opens a connection pool over a database file.
///
/// Every pooled connection gets the same pragmas; migrations run once on the
/// first checked-out connection before the pool is returned.
pub fn open_pool(path: impl AsRef<Path>, config: &StoreConfig) -> DbResult<DbPool> {
    let started_at = Instant::now();
    info!(
        "event=db_open module=db status=start mode=pool max_size={}",
        config.pool_max_size
    );

    let busy_timeout = config.busy_timeout();
    let wal = config.wal;
    let manager = SqliteConnectionManager::file(path.as_ref())
        .with_init(move |conn| configure_connection(conn, busy_timeout, wal));

    let result: DbResult<DbPool> = r2d2::Pool::builder()
        .max_size(config.pool_max_size.max(1))
        .build(manager)
        .map_err(DbError::from)
        .and_then(|pool| {
            let mut conn = pool.get()?;
            apply_migrations(&mut conn)?;
            drop(conn);
            Ok(pool)
        });

    match result {
        Ok(pool) => {
            info!(
                "event=db_open module=db status=ok mode=pool duration_ms={}",
                started_at.elapsed().as_millis()
            );
            Ok(pool)
        }
        Err(err) => {
            error!(
                "event=db_open module=db status=error mode=pool duration_ms={} error_code=db_pool_failed error={}",
                started_at.elapsed().as_millis(),
                err
            );
            Err(err)
        }
    }
}

fn open_with(
    mode: &str,
    open: impl FnOnce() -> rusqlite::Result<Connection>,
    configure: impl FnOnce(&mut Connection) -> rusqlite::Result<()>,
) -> DbResult<Connection> {
    let started_at = Instant::now();
    info!("event=db_open module=db status=start mode={mode}");

    let mut conn = match open() {
        Ok(conn) => conn,
        Err(err) => {
            error!(
                "event=db_open module=db status=error mode={} duration_ms={} error_code=db_open_failed error={}",
                mode,
                started_at.elapsed().as_millis(),
                err
            );
            return Err(err.into());
        }
    };

    let bootstrap = configure(&mut conn)
        .map_err(DbError::from)
        .and_then(|()| apply_migrations(&mut conn));

    match bootstrap {
        Ok(()) => {
            info!(
                "event=db_open module=db status=ok mode={} duration_ms={}",
                mode,
                started_at.elapsed().as_millis()
            );
            Ok(conn)
        }
        Err(err) => {
            error!(
                "event=db_open module=db status=error mode={} duration_ms={} error_code=db_bootstrap_failed error={}",
                mode,
                started_at.elapsed().as_millis(),
                err
            );
            Err(err)
        }
    }
}

fn configure_connection(
    conn: &mut Connection,
    busy_timeout: Duration,
    wal: bool,
) -> rusqlite::Result<()> {
    conn.execute_batch("PRAGMA foreign_keys = ON;")?;
    conn.busy_timeout(busy_timeout)?;
    if wal {
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get::<_, String>(0))?;
    }
    Ok(())
}
