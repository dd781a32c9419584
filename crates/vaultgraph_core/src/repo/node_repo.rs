//! Node repository contract and SQLite implementation.
//!
//! # Responsibility
//! - Provide CRUD, batch, query and full-text search APIs over `nodes`.
//! - Keep SQL details inside the persistence boundary.
//!
//! # Invariants
//! - Write paths call `Node::validate()` before SQL mutations.
//! - Deleting a node removes its position in the same atomic step; deleting
//!   all nodes leaves positions alone.
//! - Upserts never overwrite `created_at`.

use super::batch::{atomically, validate_all, write_batch};
use super::{placeholders, Page, ID_LOOKUP_CHUNK};
use crate::config::{StoreConfig, DEFAULT_BULK_CHUNK_ROWS};
use crate::context::Context;
use crate::error::{RepoError, RepoResult, Resource};
use crate::executor::{BulkInsert, Executor, FromRow};
use crate::model::node::{Node, NodeId};
use crate::model::now_ms;
use crate::search::fts::{build_match_expression, map_match_error};
use crate::search::SEARCH_RESULT_LIMIT;
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Row};
use serde_json::{Map, Value as JsonValue};
use std::collections::BTreeSet;

const NODE_COLUMNS: &[&str] = &[
    "id",
    "title",
    "node_type",
    "tags",
    "content",
    "metadata",
    "path",
    "in_degree",
    "out_degree",
    "centrality",
    "created_at",
    "updated_at",
];

const NODE_SELECT_SQL: &str = "SELECT
    nodes.id,
    nodes.title,
    nodes.node_type,
    nodes.tags,
    nodes.content,
    nodes.metadata,
    nodes.path,
    nodes.in_degree,
    nodes.out_degree,
    nodes.centrality,
    nodes.created_at,
    nodes.updated_at
FROM nodes";

const NODE_UPSERT_CLAUSE: &str = "ON CONFLICT(id) DO UPDATE SET
    title = excluded.title,
    node_type = excluded.node_type,
    tags = excluded.tags,
    content = excluded.content,
    metadata = excluded.metadata,
    path = excluded.path,
    in_degree = excluded.in_degree,
    out_degree = excluded.out_degree,
    centrality = excluded.centrality,
    updated_at = excluded.updated_at";

/// Repository interface for nodes, generic over the executor type.
pub trait NodeRepository<E: ?Sized> {
    /// Inserts `node`; returns it with storage timestamps filled in.
    fn create(&self, ctx: &Context, exec: &E, node: &Node) -> RepoResult<Node>;
    fn get_by_id(&self, ctx: &Context, exec: &E, id: &str) -> RepoResult<Node>;
    /// Replaces every mutable field; `created_at` is kept.
    fn update(&self, ctx: &Context, exec: &E, node: &Node) -> RepoResult<Node>;
    /// Deletes the node and its position. Unknown ids succeed.
    fn delete(&self, ctx: &Context, exec: &E, id: &str) -> RepoResult<()>;
    /// Inserts all nodes or none.
    fn create_batch(&self, ctx: &Context, exec: &E, nodes: &[Node]) -> RepoResult<usize>;
    /// Inserts new nodes and updates existing ones, all or none.
    fn upsert_batch(&self, ctx: &Context, exec: &E, nodes: &[Node]) -> RepoResult<usize>;
    /// Newest first, then by id.
    fn get_all(&self, ctx: &Context, exec: &E, page: Page) -> RepoResult<Vec<Node>>;
    /// Nodes among `ids` that exist; unknown ids are skipped.
    fn get_by_ids(&self, ctx: &Context, exec: &E, ids: &[NodeId]) -> RepoResult<Vec<Node>>;
    fn get_by_type(&self, ctx: &Context, exec: &E, node_type: &str) -> RepoResult<Vec<Node>>;
    fn get_by_path(&self, ctx: &Context, exec: &E, path: &str) -> RepoResult<Option<Node>>;
    /// Ranked free-text match over title and content, at most
    /// [`SEARCH_RESULT_LIMIT`] hits.
    fn search(&self, ctx: &Context, exec: &E, query: &str) -> RepoResult<Vec<Node>>;
    fn count(&self, ctx: &Context, exec: &E) -> RepoResult<u64>;
    /// Deletes every node (edges cascade, positions stay).
    fn delete_all(&self, ctx: &Context, exec: &E) -> RepoResult<usize>;
}

/// SQLite-backed node repository.
#[derive(Debug, Clone, Copy)]
pub struct SqliteNodeRepository {
    chunk_rows: usize,
}

impl SqliteNodeRepository {
    pub fn new(config: &StoreConfig) -> Self {
        Self {
            chunk_rows: config.bulk_chunk_rows,
        }
    }
}

impl Default for SqliteNodeRepository {
    fn default() -> Self {
        Self {
            chunk_rows: DEFAULT_BULK_CHUNK_ROWS,
        }
    }
}

impl FromRow for Node {
    fn from_row(row: &Row<'_>) -> RepoResult<Self> {
        let tags_json: String = row.get(3)?;
        let metadata_json: String = row.get(5)?;
        let tags: BTreeSet<String> = serde_json::from_str(&tags_json)?;
        let metadata: Map<String, JsonValue> = serde_json::from_str(&metadata_json)?;

        Ok(Node {
            id: row.get(0)?,
            title: row.get(1)?,
            node_type: row.get(2)?,
            tags,
            content: row.get(4)?,
            metadata,
            path: row.get(6)?,
            in_degree: row.get(7)?,
            out_degree: row.get(8)?,
            centrality: row.get(9)?,
            created_at: row.get(10)?,
            updated_at: row.get(11)?,
        })
    }
}

impl<E: Executor> NodeRepository<E> for SqliteNodeRepository {
    fn create(&self, ctx: &Context, exec: &E, node: &Node) -> RepoResult<Node> {
        node.validate()?;

        let now = now_ms();
        let row = node_row(node, now, now)?;
        let sql = self.bulk_insert(&[], "").statement_sql(1);
        exec.exec(ctx, &sql, params_from_iter(row.iter()))
            .map_err(|err| err.with_duplicate_value(&node.id))?;

        Ok(Node {
            created_at: now,
            updated_at: now,
            ..node.clone()
        })
    }

    fn get_by_id(&self, ctx: &Context, exec: &E, id: &str) -> RepoResult<Node> {
        exec.fetch_one(ctx, &format!("{NODE_SELECT_SQL} WHERE nodes.id = ?1;"), params![id])?
            .ok_or_else(|| RepoError::not_found(Resource::Node, id))
    }

    fn update(&self, ctx: &Context, exec: &E, node: &Node) -> RepoResult<Node> {
        node.validate()?;

        let changed = exec.exec_named(
            ctx,
            "UPDATE nodes
             SET
                title = :title,
                node_type = :node_type,
                tags = :tags,
                content = :content,
                metadata = :metadata,
                path = :path,
                in_degree = :in_degree,
                out_degree = :out_degree,
                centrality = :centrality,
                updated_at = :updated_at
             WHERE id = :id;",
            rusqlite::named_params! {
                ":title": node.title,
                ":node_type": node.node_type,
                ":tags": serde_json::to_string(&node.tags)?,
                ":content": node.content,
                ":metadata": serde_json::to_string(&node.metadata)?,
                ":path": node.path,
                ":in_degree": node.in_degree,
                ":out_degree": node.out_degree,
                ":centrality": node.centrality,
                ":updated_at": now_ms(),
                ":id": node.id,
            },
        )?;

        if changed == 0 {
            return Err(RepoError::not_found(Resource::Node, &node.id));
        }

        <Self as NodeRepository<E>>::get_by_id(self, ctx, exec, &node.id)
    }

    fn delete(&self, ctx: &Context, exec: &E, id: &str) -> RepoResult<()> {
        atomically(exec, ctx, || {
            exec.exec(ctx, "DELETE FROM nodes WHERE id = ?1;", params![id])?;
            exec.exec(ctx, "DELETE FROM positions WHERE node_id = ?1;", params![id])?;
            Ok(())
        })
    }

    fn create_batch(&self, ctx: &Context, exec: &E, nodes: &[Node]) -> RepoResult<usize> {
        validate_all(nodes, Node::validate)?;
        let rows = batch_rows(nodes)?;
        write_batch(exec, ctx, &self.bulk_insert(&rows, ""), |index, _| {
            nodes[index].id.clone()
        })
    }

    fn upsert_batch(&self, ctx: &Context, exec: &E, nodes: &[Node]) -> RepoResult<usize> {
        validate_all(nodes, Node::validate)?;
        let rows = batch_rows(nodes)?;
        write_batch(exec, ctx, &self.bulk_insert(&rows, NODE_UPSERT_CLAUSE), |index, _| {
            nodes[index].id.clone()
        })
    }

    fn get_all(&self, ctx: &Context, exec: &E, page: Page) -> RepoResult<Vec<Node>> {
        if page.is_empty() {
            return Ok(Vec::new());
        }
        exec.fetch_all(
            ctx,
            &format!("{NODE_SELECT_SQL} ORDER BY nodes.created_at DESC, nodes.id ASC LIMIT ?1 OFFSET ?2;"),
            params![page.limit, page.offset],
        )
    }

    fn get_by_ids(&self, ctx: &Context, exec: &E, ids: &[NodeId]) -> RepoResult<Vec<Node>> {
        let mut nodes = Vec::with_capacity(ids.len());
        for chunk in ids.chunks(ID_LOOKUP_CHUNK) {
            let sql = format!(
                "{NODE_SELECT_SQL} WHERE nodes.id IN ({}) ORDER BY nodes.created_at DESC, nodes.id ASC;",
                placeholders(chunk.len())
            );
            nodes.extend(exec.fetch_all::<Node>(ctx, &sql, params_from_iter(chunk.iter()))?);
        }
        Ok(nodes)
    }

    fn get_by_type(&self, ctx: &Context, exec: &E, node_type: &str) -> RepoResult<Vec<Node>> {
        exec.fetch_all(
            ctx,
            &format!(
                "{NODE_SELECT_SQL} WHERE nodes.node_type = ?1 ORDER BY nodes.created_at DESC, nodes.id ASC;"
            ),
            params![node_type],
        )
    }

    fn get_by_path(&self, ctx: &Context, exec: &E, path: &str) -> RepoResult<Option<Node>> {
        exec.fetch_one(
            ctx,
            &format!("{NODE_SELECT_SQL} WHERE nodes.path = ?1 ORDER BY nodes.created_at ASC, nodes.id ASC;"),
            params![path],
        )
    }

    fn search(&self, ctx: &Context, exec: &E, query: &str) -> RepoResult<Vec<Node>> {
        let Some(match_expr) = build_match_expression(query) else {
            return Ok(Vec::new());
        };

        exec.fetch_all(
            ctx,
            &format!(
                "{NODE_SELECT_SQL}
                 JOIN nodes_fts ON nodes_fts.rowid = nodes.row_id
                 WHERE nodes_fts MATCH ?1
                 ORDER BY bm25(nodes_fts), nodes.created_at DESC, nodes.id ASC
                 LIMIT ?2;"
            ),
            params![match_expr, SEARCH_RESULT_LIMIT],
        )
        .map_err(map_match_error)
    }

    fn count(&self, ctx: &Context, exec: &E) -> RepoResult<u64> {
        let count: Option<i64> = exec.fetch_one(ctx, "SELECT COUNT(*) FROM nodes;", [])?;
        Ok(count.unwrap_or_default().unsigned_abs())
    }

    fn delete_all(&self, ctx: &Context, exec: &E) -> RepoResult<usize> {
        exec.exec(ctx, "DELETE FROM nodes;", [])
    }
}

impl SqliteNodeRepository {
    fn bulk_insert<'a>(
        &self,
        rows: &'a [Vec<Value>],
        conflict_clause: &'static str,
    ) -> BulkInsert<'a> {
        BulkInsert {
            table: "nodes",
            columns: NODE_COLUMNS,
            conflict_clause,
            rows,
            chunk_rows: self.chunk_rows,
        }
    }
}

fn batch_rows(nodes: &[Node]) -> RepoResult<Vec<Vec<Value>>> {
    let now = now_ms();
    nodes.iter().map(|node| node_row(node, now, now)).collect()
}

fn node_row(node: &Node, created_at: i64, updated_at: i64) -> RepoResult<Vec<Value>> {
    Ok(vec![
        Value::Text(node.id.clone()),
        Value::Text(node.title.clone()),
        Value::Text(node.node_type.clone()),
        Value::Text(serde_json::to_string(&node.tags)?),
        Value::Text(node.content.clone()),
        Value::Text(serde_json::to_string(&node.metadata)?),
        Value::Text(node.path.clone()),
        Value::Integer(i64::from(node.in_degree)),
        Value::Integer(i64::from(node.out_degree)),
        Value::Real(node.centrality),
        Value::Integer(created_at),
        Value::Integer(updated_at),
    ])
}
