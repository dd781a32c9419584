//! In-memory position repository.

use super::store::MemoryExecutor;
use crate::context::Context;
use crate::error::{RepoError, RepoResult, Resource};
use crate::model::node::NodeId;
use crate::model::now_ms;
use crate::model::position::Position;
use crate::repo::batch::validate_all;
use crate::repo::position_repo::PositionRepository;
use crate::repo::Page;

#[derive(Debug, Clone, Copy, Default)]
pub struct MemoryPositionRepository;

impl<E: MemoryExecutor> PositionRepository<E> for MemoryPositionRepository {
    fn upsert(&self, ctx: &Context, exec: &E, position: &Position) -> RepoResult<Position> {
        position.validate()?;
        exec.with_tables(ctx, |tables| {
            let stored = Position {
                updated_at: now_ms(),
                ..position.clone()
            };
            tables
                .positions_mut()
                .insert(position.node_id.clone(), stored.clone());
            Ok(stored)
        })
    }

    fn get_by_id(&self, ctx: &Context, exec: &E, node_id: &str) -> RepoResult<Position> {
        exec.with_tables(ctx, |tables| {
            tables
                .positions()
                .get(node_id)
                .cloned()
                .ok_or_else(|| RepoError::not_found(Resource::Position, node_id))
        })
    }

    fn delete(&self, ctx: &Context, exec: &E, node_id: &str) -> RepoResult<()> {
        exec.with_tables(ctx, |tables| {
            if tables.positions().contains_key(node_id) {
                tables.positions_mut().remove(node_id);
            }
            Ok(())
        })
    }

    fn upsert_batch(
        &self,
        ctx: &Context,
        exec: &E,
        positions: &[Position],
    ) -> RepoResult<usize> {
        validate_all(positions, Position::validate)?;
        exec.with_tables(ctx, |tables| {
            let now = now_ms();
            let rows = tables.positions_mut();
            let mut written = 0;
            for position in positions {
                let pinned = rows
                    .get(&position.node_id)
                    .is_some_and(|existing| existing.locked && !position.locked);
                if pinned {
                    continue;
                }
                rows.insert(
                    position.node_id.clone(),
                    Position {
                        updated_at: now,
                        ..position.clone()
                    },
                );
                written += 1;
            }
            Ok(written)
        })
    }

    fn get_all(&self, ctx: &Context, exec: &E, page: Page) -> RepoResult<Vec<Position>> {
        exec.with_tables(ctx, |tables| {
            let positions: Vec<Position> = tables.positions().values().cloned().collect();
            Ok(page.slice(&positions))
        })
    }

    fn get_by_ids(
        &self,
        ctx: &Context,
        exec: &E,
        node_ids: &[NodeId],
    ) -> RepoResult<Vec<Position>> {
        exec.with_tables(ctx, |tables| {
            Ok(tables
                .positions()
                .values()
                .filter(|position| node_ids.contains(&position.node_id))
                .cloned()
                .collect())
        })
    }

    fn get_locked(&self, ctx: &Context, exec: &E) -> RepoResult<Vec<Position>> {
        exec.with_tables(ctx, |tables| {
            Ok(tables
                .positions()
                .values()
                .filter(|position| position.locked)
                .cloned()
                .collect())
        })
    }

    fn set_locked(
        &self,
        ctx: &Context,
        exec: &E,
        node_id: &str,
        locked: bool,
    ) -> RepoResult<Position> {
        exec.with_tables(ctx, |tables| {
            let position = tables
                .positions_mut()
                .get_mut(node_id)
                .ok_or_else(|| RepoError::not_found(Resource::Position, node_id))?;
            position.locked = locked;
            position.updated_at = now_ms();
            Ok(position.clone())
        })
    }

    fn count(&self, ctx: &Context, exec: &E) -> RepoResult<u64> {
        exec.with_tables(ctx, |tables| Ok(tables.positions().len() as u64))
    }

    fn delete_all(&self, ctx: &Context, exec: &E) -> RepoResult<usize> {
        exec.with_tables(ctx, |tables| {
            let removed = tables.positions().len();
            if removed > 0 {
                tables.positions_mut().clear();
            }
            Ok(removed)
        })
    }
}
