//! Position repository contract and SQLite implementation.
//!
//! # Invariants
//! - Positions are keyed by node id with no foreign key to `nodes`.
//! - Batch upserts never move a locked position unless the incoming
//!   position is itself locked; single `upsert` always replaces.

use super::batch::{validate_all, write_batch};
use super::{placeholders, Page, ID_LOOKUP_CHUNK};
use crate::config::{StoreConfig, DEFAULT_BULK_CHUNK_ROWS};
use crate::context::Context;
use crate::error::{RepoError, RepoResult, Resource};
use crate::executor::{BulkInsert, Executor, FromRow};
use crate::model::node::NodeId;
use crate::model::now_ms;
use crate::model::position::Position;
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Row};

const POSITION_COLUMNS: &[&str] = &["node_id", "x", "y", "z", "locked", "updated_at"];

const POSITION_SELECT_SQL: &str = "SELECT node_id, x, y, z, locked, updated_at FROM positions";

const POSITION_REPLACE_CLAUSE: &str = "ON CONFLICT(node_id) DO UPDATE SET
    x = excluded.x,
    y = excluded.y,
    z = excluded.z,
    locked = excluded.locked,
    updated_at = excluded.updated_at";

const POSITION_LAYOUT_CLAUSE: &str = "ON CONFLICT(node_id) DO UPDATE SET
    x = excluded.x,
    y = excluded.y,
    z = excluded.z,
    locked = excluded.locked,
    updated_at = excluded.updated_at
WHERE positions.locked = 0 OR excluded.locked = 1";

/// Repository interface for node positions, generic over the executor type.
pub trait PositionRepository<E: ?Sized> {
    /// Creates or replaces the position of `position.node_id`.
    fn upsert(&self, ctx: &Context, exec: &E, position: &Position) -> RepoResult<Position>;
    fn get_by_id(&self, ctx: &Context, exec: &E, node_id: &str) -> RepoResult<Position>;
    /// Unknown ids succeed.
    fn delete(&self, ctx: &Context, exec: &E, node_id: &str) -> RepoResult<()>;
    /// Writes layout results; locked positions keep their coordinates.
    ///
    /// Returns the number of positions inserted or moved.
    fn upsert_batch(&self, ctx: &Context, exec: &E, positions: &[Position])
        -> RepoResult<usize>;
    /// Ordered by node id.
    fn get_all(&self, ctx: &Context, exec: &E, page: Page) -> RepoResult<Vec<Position>>;
    fn get_by_ids(&self, ctx: &Context, exec: &E, node_ids: &[NodeId])
        -> RepoResult<Vec<Position>>;
    fn get_locked(&self, ctx: &Context, exec: &E) -> RepoResult<Vec<Position>>;
    fn set_locked(&self, ctx: &Context, exec: &E, node_id: &str, locked: bool)
        -> RepoResult<Position>;
    fn count(&self, ctx: &Context, exec: &E) -> RepoResult<u64>;
    fn delete_all(&self, ctx: &Context, exec: &E) -> RepoResult<usize>;
}

/// SQLite-backed position repository.
#[derive(Debug, Clone, Copy)]
pub struct SqlitePositionRepository {
    chunk_rows: usize,
}

impl SqlitePositionRepository {
    pub fn new(config: &StoreConfig) -> Self {
        Self {
            chunk_rows: config.bulk_chunk_rows,
        }
    }

    fn bulk_insert<'a>(
        &self,
        rows: &'a [Vec<Value>],
        conflict_clause: &'static str,
    ) -> BulkInsert<'a> {
        BulkInsert {
            table: "positions",
            columns: POSITION_COLUMNS,
            conflict_clause,
            rows,
            chunk_rows: self.chunk_rows,
        }
    }
}

impl Default for SqlitePositionRepository {
    fn default() -> Self {
        Self {
            chunk_rows: DEFAULT_BULK_CHUNK_ROWS,
        }
    }
}

impl FromRow for Position {
    fn from_row(row: &Row<'_>) -> RepoResult<Self> {
        Ok(Position {
            node_id: row.get(0)?,
            x: row.get(1)?,
            y: row.get(2)?,
            z: row.get(3)?,
            locked: row.get(4)?,
            updated_at: row.get(5)?,
        })
    }
}

impl<E: Executor> PositionRepository<E> for SqlitePositionRepository {
    fn upsert(&self, ctx: &Context, exec: &E, position: &Position) -> RepoResult<Position> {
        position.validate()?;

        let now = now_ms();
        let row = position_row(position, now);
        let sql = self.bulk_insert(&[], POSITION_REPLACE_CLAUSE).statement_sql(1);
        exec.exec(ctx, &sql, params_from_iter(row.iter()))?;

        Ok(Position {
            updated_at: now,
            ..position.clone()
        })
    }

    fn get_by_id(&self, ctx: &Context, exec: &E, node_id: &str) -> RepoResult<Position> {
        exec.fetch_one(
            ctx,
            &format!("{POSITION_SELECT_SQL} WHERE node_id = ?1;"),
            params![node_id],
        )?
        .ok_or_else(|| RepoError::not_found(Resource::Position, node_id))
    }

    fn delete(&self, ctx: &Context, exec: &E, node_id: &str) -> RepoResult<()> {
        exec.exec(ctx, "DELETE FROM positions WHERE node_id = ?1;", params![node_id])?;
        Ok(())
    }

    fn upsert_batch(
        &self,
        ctx: &Context,
        exec: &E,
        positions: &[Position],
    ) -> RepoResult<usize> {
        validate_all(positions, Position::validate)?;
        let now = now_ms();
        let rows: Vec<Vec<Value>> = positions
            .iter()
            .map(|position| position_row(position, now))
            .collect();
        write_batch(exec, ctx, &self.bulk_insert(&rows, POSITION_LAYOUT_CLAUSE), |index, _| {
            positions[index].node_id.clone()
        })
    }

    fn get_all(&self, ctx: &Context, exec: &E, page: Page) -> RepoResult<Vec<Position>> {
        if page.is_empty() {
            return Ok(Vec::new());
        }
        exec.fetch_all(
            ctx,
            &format!("{POSITION_SELECT_SQL} ORDER BY node_id ASC LIMIT ?1 OFFSET ?2;"),
            params![page.limit, page.offset],
        )
    }

    fn get_by_ids(
        &self,
        ctx: &Context,
        exec: &E,
        node_ids: &[NodeId],
    ) -> RepoResult<Vec<Position>> {
        let mut positions = Vec::with_capacity(node_ids.len());
        for chunk in node_ids.chunks(ID_LOOKUP_CHUNK) {
            let sql = format!(
                "{POSITION_SELECT_SQL} WHERE node_id IN ({}) ORDER BY node_id ASC;",
                placeholders(chunk.len())
            );
            positions.extend(exec.fetch_all::<Position>(
                ctx,
                &sql,
                params_from_iter(chunk.iter()),
            )?);
        }
        Ok(positions)
    }

    fn get_locked(&self, ctx: &Context, exec: &E) -> RepoResult<Vec<Position>> {
        exec.fetch_all(
            ctx,
            &format!("{POSITION_SELECT_SQL} WHERE locked = 1 ORDER BY node_id ASC;"),
            [],
        )
    }

    fn set_locked(
        &self,
        ctx: &Context,
        exec: &E,
        node_id: &str,
        locked: bool,
    ) -> RepoResult<Position> {
        let changed = exec.exec(
            ctx,
            "UPDATE positions SET locked = ?1, updated_at = ?2 WHERE node_id = ?3;",
            params![locked, now_ms(), node_id],
        )?;
        if changed == 0 {
            return Err(RepoError::not_found(Resource::Position, node_id));
        }
        <Self as PositionRepository<E>>::get_by_id(self, ctx, exec, node_id)
    }

    fn count(&self, ctx: &Context, exec: &E) -> RepoResult<u64> {
        let count: Option<i64> = exec.fetch_one(ctx, "SELECT COUNT(*) FROM positions;", [])?;
        Ok(count.unwrap_or_default().unsigned_abs())
    }

    fn delete_all(&self, ctx: &Context, exec: &E) -> RepoResult<usize> {
        exec.exec(ctx, "DELETE FROM positions;", [])
    }
}

fn position_row(position: &Position, updated_at: i64) -> Vec<Value> {
    vec![
        Value::Text(position.node_id.clone()),
        Value::Real(position.x),
        Value::Real(position.y),
        Value::Real(position.z),
        Value::Integer(i64::from(position.locked)),
        Value::Integer(updated_at),
    ]
}
