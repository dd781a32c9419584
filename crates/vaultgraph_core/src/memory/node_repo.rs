//! In-memory node repository.

use super::store::MemoryExecutor;
use crate::context::Context;
use crate::error::{RepoError, RepoResult, Resource};
use crate::model::node::{Node, NodeId};
use crate::model::now_ms;
use crate::repo::batch::validate_all;
use crate::repo::node_repo::NodeRepository;
use crate::repo::Page;
use crate::search::fts::{phrase_hits, query_phrases, tokenize};
use crate::search::SEARCH_RESULT_LIMIT;
use std::collections::BTreeSet;

#[derive(Debug, Clone, Copy, Default)]
pub struct MemoryNodeRepository;

fn newest_first(nodes: &mut [Node]) {
    nodes.sort_by(|a, b| {
        b.created_at
            .cmp(&a.created_at)
            .then_with(|| a.id.cmp(&b.id))
    });
}

/// Total occurrences of every query phrase, or `None` when one is missing.
///
/// Phrases match inside a single column, never across title and content.
fn relevance(node: &Node, phrases: &[Vec<String>]) -> Option<usize> {
    let columns = [tokenize(&node.title), tokenize(&node.content)];

    let mut score = 0;
    for phrase in phrases {
        let hits: usize = columns
            .iter()
            .map(|tokens| phrase_hits(tokens, phrase))
            .sum();
        if hits == 0 {
            return None;
        }
        score += hits;
    }
    Some(score)
}

fn duplicate_id(id: &str) -> RepoError {
    RepoError::duplicate("nodes.id", id)
}

impl<E: MemoryExecutor> NodeRepository<E> for MemoryNodeRepository {
    fn create(&self, ctx: &Context, exec: &E, node: &Node) -> RepoResult<Node> {
        node.validate()?;
        exec.with_tables(ctx, |tables| {
            if tables.nodes().contains_key(&node.id) {
                return Err(duplicate_id(&node.id));
            }
            let now = now_ms();
            let stored = Node {
                created_at: now,
                updated_at: now,
                ..node.clone()
            };
            tables.nodes_mut().insert(node.id.clone(), stored.clone());
            Ok(stored)
        })
    }

    fn get_by_id(&self, ctx: &Context, exec: &E, id: &str) -> RepoResult<Node> {
        exec.with_tables(ctx, |tables| {
            tables
                .nodes()
                .get(id)
                .cloned()
                .ok_or_else(|| RepoError::not_found(Resource::Node, id))
        })
    }

    fn update(&self, ctx: &Context, exec: &E, node: &Node) -> RepoResult<Node> {
        node.validate()?;
        exec.with_tables(ctx, |tables| {
            let created_at = match tables.nodes().get(&node.id) {
                Some(existing) => existing.created_at,
                None => return Err(RepoError::not_found(Resource::Node, &node.id)),
            };
            let stored = Node {
                created_at,
                updated_at: now_ms(),
                ..node.clone()
            };
            tables.nodes_mut().insert(node.id.clone(), stored.clone());
            Ok(stored)
        })
    }

    fn delete(&self, ctx: &Context, exec: &E, id: &str) -> RepoResult<()> {
        exec.with_tables(ctx, |tables| {
            if tables.nodes().contains_key(id) {
                tables.nodes_mut().remove(id);
                tables
                    .edges_mut()
                    .retain(|_, edge| edge.source_id != id && edge.target_id != id);
            }
            if tables.positions().contains_key(id) {
                tables.positions_mut().remove(id);
            }
            Ok(())
        })
    }

    fn create_batch(&self, ctx: &Context, exec: &E, nodes: &[Node]) -> RepoResult<usize> {
        validate_all(nodes, Node::validate)?;
        exec.with_tables(ctx, |tables| {
            let mut seen = BTreeSet::new();
            for node in nodes {
                if tables.nodes().contains_key(&node.id) || !seen.insert(node.id.as_str()) {
                    return Err(duplicate_id(&node.id));
                }
            }

            let now = now_ms();
            let rows = tables.nodes_mut();
            for node in nodes {
                let stored = Node {
                    created_at: now,
                    updated_at: now,
                    ..node.clone()
                };
                rows.insert(node.id.clone(), stored);
            }
            Ok(nodes.len())
        })
    }

    fn upsert_batch(&self, ctx: &Context, exec: &E, nodes: &[Node]) -> RepoResult<usize> {
        validate_all(nodes, Node::validate)?;
        exec.with_tables(ctx, |tables| {
            let now = now_ms();
            let rows = tables.nodes_mut();
            for node in nodes {
                let created_at = rows.get(&node.id).map_or(now, |existing| existing.created_at);
                let stored = Node {
                    created_at,
                    updated_at: now,
                    ..node.clone()
                };
                rows.insert(node.id.clone(), stored);
            }
            Ok(nodes.len())
        })
    }

    fn get_all(&self, ctx: &Context, exec: &E, page: Page) -> RepoResult<Vec<Node>> {
        exec.with_tables(ctx, |tables| {
            let mut nodes: Vec<Node> = tables.nodes().values().cloned().collect();
            newest_first(&mut nodes);
            Ok(page.slice(&nodes))
        })
    }

    fn get_by_ids(&self, ctx: &Context, exec: &E, ids: &[NodeId]) -> RepoResult<Vec<Node>> {
        exec.with_tables(ctx, |tables| {
            let wanted: BTreeSet<&str> = ids.iter().map(String::as_str).collect();
            let mut nodes: Vec<Node> = wanted
                .into_iter()
                .filter_map(|id| tables.nodes().get(id).cloned())
                .collect();
            newest_first(&mut nodes);
            Ok(nodes)
        })
    }

    fn get_by_type(&self, ctx: &Context, exec: &E, node_type: &str) -> RepoResult<Vec<Node>> {
        exec.with_tables(ctx, |tables| {
            let mut nodes: Vec<Node> = tables
                .nodes()
                .values()
                .filter(|node| node.node_type == node_type)
                .cloned()
                .collect();
            newest_first(&mut nodes);
            Ok(nodes)
        })
    }

    fn get_by_path(&self, ctx: &Context, exec: &E, path: &str) -> RepoResult<Option<Node>> {
        exec.with_tables(ctx, |tables| {
            Ok(tables
                .nodes()
                .values()
                .filter(|node| node.path == path)
                .min_by(|a, b| {
                    a.created_at
                        .cmp(&b.created_at)
                        .then_with(|| a.id.cmp(&b.id))
                })
                .cloned())
        })
    }

    fn search(&self, ctx: &Context, exec: &E, query: &str) -> RepoResult<Vec<Node>> {
        let phrases = query_phrases(query);
        if phrases.is_empty() {
            return Ok(Vec::new());
        }

        exec.with_tables(ctx, |tables| {
            let mut hits: Vec<(usize, Node)> = tables
                .nodes()
                .values()
                .filter_map(|node| relevance(node, &phrases).map(|score| (score, node.clone())))
                .collect();
            hits.sort_by(|(score_a, a), (score_b, b)| {
                score_b
                    .cmp(score_a)
                    .then_with(|| b.created_at.cmp(&a.created_at))
                    .then_with(|| a.id.cmp(&b.id))
            });
            Ok(hits
                .into_iter()
                .take(SEARCH_RESULT_LIMIT as usize)
                .map(|(_, node)| node)
                .collect())
        })
    }

    fn count(&self, ctx: &Context, exec: &E) -> RepoResult<u64> {
        exec.with_tables(ctx, |tables| Ok(tables.nodes().len() as u64))
    }

    fn delete_all(&self, ctx: &Context, exec: &E) -> RepoResult<usize> {
        exec.with_tables(ctx, |tables| {
            let removed = tables.nodes().len();
            if removed > 0 {
                tables.nodes_mut().clear();
                tables.edges_mut().clear();
            }
            Ok(removed)
        })
    }
}
