//! In-memory edge repository.

use super::store::{EdgeRows, MemoryExecutor, NodeRows};
use crate::context::Context;
use crate::error::{RepoError, RepoResult, Resource};
use crate::model::edge::{Edge, EdgeId, EdgeType, ID_FIELD, NATURAL_KEY_FIELD};
use crate::model::now_ms;
use crate::repo::batch::validate_all;
use crate::repo::edge_repo::EdgeRepository;
use crate::repo::Page;

#[derive(Debug, Clone, Copy, Default)]
pub struct MemoryEdgeRepository;

fn check_endpoints(nodes: &NodeRows, edge: &Edge) -> RepoResult<()> {
    if nodes.contains_key(&edge.source_id) && nodes.contains_key(&edge.target_id) {
        Ok(())
    } else {
        Err(RepoError::missing_reference(None))
    }
}

/// Id of another edge already holding `edge`'s natural key.
fn natural_key_owner(edges: &EdgeRows, edge: &Edge) -> Option<EdgeId> {
    edges
        .values()
        .find(|other| other.id != edge.id && other.natural_key() == edge.natural_key())
        .map(|other| other.id)
}

fn duplicate(edge: &Edge, field: &str) -> RepoError {
    RepoError::duplicate(field, edge.conflict_value(Some(field)))
}

fn filtered(edges: &EdgeRows, keep: impl Fn(&Edge) -> bool) -> Vec<Edge> {
    edges.values().filter(|edge| keep(edge)).cloned().collect()
}

impl<E: MemoryExecutor> EdgeRepository<E> for MemoryEdgeRepository {
    fn create(&self, ctx: &Context, exec: &E, edge: &Edge) -> RepoResult<Edge> {
        edge.validate()?;
        exec.with_tables(ctx, |tables| {
            check_endpoints(tables.nodes(), edge)?;
            if tables.edges().contains_key(&edge.id) {
                return Err(duplicate(edge, ID_FIELD));
            }
            if natural_key_owner(tables.edges(), edge).is_some() {
                return Err(duplicate(edge, NATURAL_KEY_FIELD));
            }
            let stored = Edge {
                created_at: now_ms(),
                ..edge.clone()
            };
            tables.edges_mut().insert(edge.id, stored.clone());
            Ok(stored)
        })
    }

    fn get_by_id(&self, ctx: &Context, exec: &E, id: EdgeId) -> RepoResult<Edge> {
        exec.with_tables(ctx, |tables| {
            tables
                .edges()
                .get(&id)
                .cloned()
                .ok_or_else(|| RepoError::not_found(Resource::Edge, id.to_string()))
        })
    }

    fn update(&self, ctx: &Context, exec: &E, edge: &Edge) -> RepoResult<Edge> {
        edge.validate()?;
        exec.with_tables(ctx, |tables| {
            let created_at = match tables.edges().get(&edge.id) {
                Some(existing) => existing.created_at,
                None => return Err(RepoError::not_found(Resource::Edge, edge.id.to_string())),
            };
            check_endpoints(tables.nodes(), edge)?;
            if natural_key_owner(tables.edges(), edge).is_some() {
                return Err(duplicate(edge, NATURAL_KEY_FIELD));
            }
            let stored = Edge {
                created_at,
                ..edge.clone()
            };
            tables.edges_mut().insert(edge.id, stored.clone());
            Ok(stored)
        })
    }

    fn delete(&self, ctx: &Context, exec: &E, id: EdgeId) -> RepoResult<()> {
        exec.with_tables(ctx, |tables| {
            if tables.edges().contains_key(&id) {
                tables.edges_mut().remove(&id);
            }
            Ok(())
        })
    }

    fn create_batch(&self, ctx: &Context, exec: &E, edges: &[Edge]) -> RepoResult<usize> {
        validate_all(edges, Edge::validate)?;
        exec.with_tables(ctx, |tables| {
            let now = now_ms();
            let mut staged = tables.edges().clone();
            for edge in edges {
                check_endpoints(tables.nodes(), edge)?;
                if staged.contains_key(&edge.id) {
                    return Err(duplicate(edge, ID_FIELD));
                }
                if natural_key_owner(&staged, edge).is_some() {
                    return Err(duplicate(edge, NATURAL_KEY_FIELD));
                }
                staged.insert(
                    edge.id,
                    Edge {
                        created_at: now,
                        ..edge.clone()
                    },
                );
            }
            *tables.edges_mut() = staged;
            Ok(edges.len())
        })
    }

    fn upsert_batch(&self, ctx: &Context, exec: &E, edges: &[Edge]) -> RepoResult<usize> {
        validate_all(edges, Edge::validate)?;
        exec.with_tables(ctx, |tables| {
            let now = now_ms();
            let mut staged = tables.edges().clone();
            for edge in edges {
                check_endpoints(tables.nodes(), edge)?;
                if let Some(existing) = staged.get(&edge.id) {
                    let created_at = existing.created_at;
                    if natural_key_owner(&staged, edge).is_some() {
                        return Err(duplicate(edge, NATURAL_KEY_FIELD));
                    }
                    staged.insert(
                        edge.id,
                        Edge {
                            created_at,
                            ..edge.clone()
                        },
                    );
                } else if let Some(owner) = natural_key_owner(&staged, edge) {
                    if let Some(existing) = staged.get_mut(&owner) {
                        existing.label = edge.label.clone();
                        existing.weight = edge.weight;
                    }
                } else {
                    staged.insert(
                        edge.id,
                        Edge {
                            created_at: now,
                            ..edge.clone()
                        },
                    );
                }
            }
            *tables.edges_mut() = staged;
            Ok(edges.len())
        })
    }

    fn get_all(&self, ctx: &Context, exec: &E, page: Page) -> RepoResult<Vec<Edge>> {
        exec.with_tables(ctx, |tables| {
            let mut edges: Vec<Edge> = tables.edges().values().cloned().collect();
            edges.sort_by(|a, b| {
                b.created_at
                    .cmp(&a.created_at)
                    .then_with(|| a.id.cmp(&b.id))
            });
            Ok(page.slice(&edges))
        })
    }

    fn get_by_ids(&self, ctx: &Context, exec: &E, ids: &[EdgeId]) -> RepoResult<Vec<Edge>> {
        exec.with_tables(ctx, |tables| Ok(filtered(tables.edges(), |edge| ids.contains(&edge.id))))
    }

    fn get_by_node(&self, ctx: &Context, exec: &E, node_id: &str) -> RepoResult<Vec<Edge>> {
        exec.with_tables(ctx, |tables| {
            Ok(filtered(tables.edges(), |edge| {
                edge.source_id == node_id || edge.target_id == node_id
            }))
        })
    }

    fn get_outgoing(&self, ctx: &Context, exec: &E, node_id: &str) -> RepoResult<Vec<Edge>> {
        exec.with_tables(ctx, |tables| {
            Ok(filtered(tables.edges(), |edge| edge.source_id == node_id))
        })
    }

    fn get_incoming(&self, ctx: &Context, exec: &E, node_id: &str) -> RepoResult<Vec<Edge>> {
        exec.with_tables(ctx, |tables| {
            Ok(filtered(tables.edges(), |edge| edge.target_id == node_id))
        })
    }

    fn get_by_type(&self, ctx: &Context, exec: &E, edge_type: EdgeType) -> RepoResult<Vec<Edge>> {
        exec.with_tables(ctx, |tables| {
            Ok(filtered(tables.edges(), |edge| edge.edge_type == edge_type))
        })
    }

    fn count(&self, ctx: &Context, exec: &E) -> RepoResult<u64> {
        exec.with_tables(ctx, |tables| Ok(tables.edges().len() as u64))
    }

    fn delete_all(&self, ctx: &Context, exec: &E) -> RepoResult<usize> {
        exec.with_tables(ctx, |tables| {
            let removed = tables.edges().len();
            if removed > 0 {
                tables.edges_mut().clear();
            }
            Ok(removed)
        })
    }
}
