//! Edge repository contract and SQLite implementation.
//!
//! # Invariants
//! - Edges are keyed by their generated id; `(source_id, target_id,
//!   edge_type)` stays unique.
//! - Both endpoints must exist; deleting a node removes its edges.
//! - Adjacency queries return sets; callers must not rely on their order.

use super::batch::{validate_all, write_batch};
use super::{placeholders, Page, ID_LOOKUP_CHUNK};
use crate::config::{StoreConfig, DEFAULT_BULK_CHUNK_ROWS};
use crate::context::Context;
use crate::error::{RepoError, RepoResult, Resource};
use crate::executor::{BulkInsert, Executor, FromRow};
use crate::model::edge::{Edge, EdgeId, EdgeType};
use crate::model::now_ms;
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Row};
use uuid::Uuid;

const EDGE_COLUMNS: &[&str] = &[
    "id",
    "source_id",
    "target_id",
    "edge_type",
    "label",
    "weight",
    "created_at",
];

const EDGE_SELECT_SQL: &str = "SELECT
    id,
    source_id,
    target_id,
    edge_type,
    label,
    weight,
    created_at
FROM edges";

// Same id: replace everything but `created_at`. Same natural key under a new
// id: keep the stored id and refresh the mutable attributes.
const EDGE_UPSERT_CLAUSE: &str = "ON CONFLICT(id) DO UPDATE SET
    source_id = excluded.source_id,
    target_id = excluded.target_id,
    edge_type = excluded.edge_type,
    label = excluded.label,
    weight = excluded.weight
ON CONFLICT(source_id, target_id, edge_type) DO UPDATE SET
    label = excluded.label,
    weight = excluded.weight";

/// Repository interface for edges, generic over the executor type.
pub trait EdgeRepository<E: ?Sized> {
    fn create(&self, ctx: &Context, exec: &E, edge: &Edge) -> RepoResult<Edge>;
    fn get_by_id(&self, ctx: &Context, exec: &E, id: EdgeId) -> RepoResult<Edge>;
    /// Rewrites endpoints, type, label and weight in place.
    fn update(&self, ctx: &Context, exec: &E, edge: &Edge) -> RepoResult<Edge>;
    /// Unknown ids succeed.
    fn delete(&self, ctx: &Context, exec: &E, id: EdgeId) -> RepoResult<()>;
    fn create_batch(&self, ctx: &Context, exec: &E, edges: &[Edge]) -> RepoResult<usize>;
    /// Matches existing edges by id, then by natural key.
    fn upsert_batch(&self, ctx: &Context, exec: &E, edges: &[Edge]) -> RepoResult<usize>;
    fn get_all(&self, ctx: &Context, exec: &E, page: Page) -> RepoResult<Vec<Edge>>;
    fn get_by_ids(&self, ctx: &Context, exec: &E, ids: &[EdgeId]) -> RepoResult<Vec<Edge>>;
    /// Edges touching `node_id` in either direction.
    fn get_by_node(&self, ctx: &Context, exec: &E, node_id: &str) -> RepoResult<Vec<Edge>>;
    fn get_outgoing(&self, ctx: &Context, exec: &E, node_id: &str) -> RepoResult<Vec<Edge>>;
    fn get_incoming(&self, ctx: &Context, exec: &E, node_id: &str) -> RepoResult<Vec<Edge>>;
    fn get_by_type(&self, ctx: &Context, exec: &E, edge_type: EdgeType) -> RepoResult<Vec<Edge>>;
    fn count(&self, ctx: &Context, exec: &E) -> RepoResult<u64>;
    fn delete_all(&self, ctx: &Context, exec: &E) -> RepoResult<usize>;
}

/// SQLite-backed edge repository.
#[derive(Debug, Clone, Copy)]
pub struct SqliteEdgeRepository {
    chunk_rows: usize,
}

impl SqliteEdgeRepository {
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
            table: "edges",
            columns: EDGE_COLUMNS,
            conflict_clause,
            rows,
            chunk_rows: self.chunk_rows,
        }
    }
}

impl Default for SqliteEdgeRepository {
    fn default() -> Self {
        Self {
            chunk_rows: DEFAULT_BULK_CHUNK_ROWS,
        }
    }
}

impl FromRow for Edge {
    fn from_row(row: &Row<'_>) -> RepoResult<Self> {
        let id_text: String = row.get(0)?;
        let id = Uuid::parse_str(&id_text)
            .map_err(|_| RepoError::generic(format!("stored edge id `{id_text}` is malformed")))?;

        let type_text: String = row.get(3)?;
        let edge_type = EdgeType::parse(&type_text)
            .ok_or_else(|| RepoError::generic(format!("stored edge type `{type_text}` is unknown")))?;

        Ok(Edge {
            id,
            source_id: row.get(1)?,
            target_id: row.get(2)?,
            edge_type,
            label: row.get(4)?,
            weight: row.get(5)?,
            created_at: row.get(6)?,
        })
    }
}

impl<E: Executor> EdgeRepository<E> for SqliteEdgeRepository {
    fn create(&self, ctx: &Context, exec: &E, edge: &Edge) -> RepoResult<Edge> {
        edge.validate()?;

        let now = now_ms();
        let row = edge_row(edge, now);
        let sql = self.bulk_insert(&[], "").statement_sql(1);
        exec.exec(ctx, &sql, params_from_iter(row.iter()))
            .map_err(|err| err.with_duplicate_value_for(|field| edge.conflict_value(field)))?;

        Ok(Edge {
            created_at: now,
            ..edge.clone()
        })
    }

    fn get_by_id(&self, ctx: &Context, exec: &E, id: EdgeId) -> RepoResult<Edge> {
        exec.fetch_one(
            ctx,
            &format!("{EDGE_SELECT_SQL} WHERE id = ?1;"),
            params![id.to_string()],
        )?
        .ok_or_else(|| RepoError::not_found(Resource::Edge, id.to_string()))
    }

    fn update(&self, ctx: &Context, exec: &E, edge: &Edge) -> RepoResult<Edge> {
        edge.validate()?;

        let changed = exec.exec_named(
            ctx,
            "UPDATE edges
             SET
                source_id = :source_id,
                target_id = :target_id,
                edge_type = :edge_type,
                label = :label,
                weight = :weight
             WHERE id = :id;",
            rusqlite::named_params! {
                ":source_id": edge.source_id,
                ":target_id": edge.target_id,
                ":edge_type": edge.edge_type.as_str(),
                ":label": edge.label,
                ":weight": edge.weight,
                ":id": edge.id.to_string(),
            },
        )
        .map_err(|err| err.with_duplicate_value_for(|field| edge.conflict_value(field)))?;

        if changed == 0 {
            return Err(RepoError::not_found(Resource::Edge, edge.id.to_string()));
        }

        <Self as EdgeRepository<E>>::get_by_id(self, ctx, exec, edge.id)
    }

    fn delete(&self, ctx: &Context, exec: &E, id: EdgeId) -> RepoResult<()> {
        exec.exec(ctx, "DELETE FROM edges WHERE id = ?1;", params![id.to_string()])?;
        Ok(())
    }

    fn create_batch(&self, ctx: &Context, exec: &E, edges: &[Edge]) -> RepoResult<usize> {
        validate_all(edges, Edge::validate)?;
        let now = now_ms();
        let rows: Vec<Vec<Value>> = edges.iter().map(|edge| edge_row(edge, now)).collect();
        write_batch(exec, ctx, &self.bulk_insert(&rows, ""), |index, field| {
            edges[index].conflict_value(field)
        })
    }

    fn upsert_batch(&self, ctx: &Context, exec: &E, edges: &[Edge]) -> RepoResult<usize> {
        validate_all(edges, Edge::validate)?;
        let now = now_ms();
        let rows: Vec<Vec<Value>> = edges.iter().map(|edge| edge_row(edge, now)).collect();
        write_batch(exec, ctx, &self.bulk_insert(&rows, EDGE_UPSERT_CLAUSE), |index, field| {
            edges[index].conflict_value(field)
        })
    }

    fn get_all(&self, ctx: &Context, exec: &E, page: Page) -> RepoResult<Vec<Edge>> {
        if page.is_empty() {
            return Ok(Vec::new());
        }
        exec.fetch_all(
            ctx,
            &format!("{EDGE_SELECT_SQL} ORDER BY created_at DESC, id ASC LIMIT ?1 OFFSET ?2;"),
            params![page.limit, page.offset],
        )
    }

    fn get_by_ids(&self, ctx: &Context, exec: &E, ids: &[EdgeId]) -> RepoResult<Vec<Edge>> {
        let ids: Vec<String> = ids.iter().map(Uuid::to_string).collect();
        let mut edges = Vec::with_capacity(ids.len());
        for chunk in ids.chunks(ID_LOOKUP_CHUNK) {
            let sql = format!(
                "{EDGE_SELECT_SQL} WHERE id IN ({});",
                placeholders(chunk.len())
            );
            edges.extend(exec.fetch_all::<Edge>(ctx, &sql, params_from_iter(chunk.iter()))?);
        }
        Ok(edges)
    }

    fn get_by_node(&self, ctx: &Context, exec: &E, node_id: &str) -> RepoResult<Vec<Edge>> {
        exec.fetch_all(
            ctx,
            &format!("{EDGE_SELECT_SQL} WHERE source_id = ?1 OR target_id = ?1;"),
            params![node_id],
        )
    }

    fn get_outgoing(&self, ctx: &Context, exec: &E, node_id: &str) -> RepoResult<Vec<Edge>> {
        exec.fetch_all(
            ctx,
            &format!("{EDGE_SELECT_SQL} WHERE source_id = ?1;"),
            params![node_id],
        )
    }

    fn get_incoming(&self, ctx: &Context, exec: &E, node_id: &str) -> RepoResult<Vec<Edge>> {
        exec.fetch_all(
            ctx,
            &format!("{EDGE_SELECT_SQL} WHERE target_id = ?1;"),
            params![node_id],
        )
    }

    fn get_by_type(&self, ctx: &Context, exec: &E, edge_type: EdgeType) -> RepoResult<Vec<Edge>> {
        exec.fetch_all(
            ctx,
            &format!("{EDGE_SELECT_SQL} WHERE edge_type = ?1;"),
            params![edge_type.as_str()],
        )
    }

    fn count(&self, ctx: &Context, exec: &E) -> RepoResult<u64> {
        let count: Option<i64> = exec.fetch_one(ctx, "SELECT COUNT(*) FROM edges;", [])?;
        Ok(count.unwrap_or_default().unsigned_abs())
    }

    fn delete_all(&self, ctx: &Context, exec: &E) -> RepoResult<usize> {
        exec.exec(ctx, "DELETE FROM edges;", [])
    }
}

fn edge_row(edge: &Edge, created_at: i64) -> Vec<Value> {
    vec![
        Value::Text(edge.id.to_string()),
        Value::Text(edge.source_id.clone()),
        Value::Text(edge.target_id.clone()),
        Value::Text(edge.edge_type.as_str().to_string()),
        edge.label.clone().map_or(Value::Null, Value::Text),
        Value::Real(edge.weight),
        Value::Integer(created_at),
    ]
}
