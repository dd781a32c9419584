//! Vault metadata (key/value) repository.

use crate::context::Context;
use crate::error::{RepoError, RepoResult, Resource};
use crate::executor::{Executor, FromRow};
use crate::model::metadata::{validate_key, MetadataEntry};
use crate::model::now_ms;
use rusqlite::{params, Row};

pub trait MetadataRepository<E: ?Sized> {
    fn get(&self, ctx: &Context, exec: &E, key: &str) -> RepoResult<MetadataEntry>;
    /// Inserts or overwrites `key`.
    fn set(&self, ctx: &Context, exec: &E, key: &str, value: &str) -> RepoResult<MetadataEntry>;
    /// Unknown keys succeed.
    fn delete(&self, ctx: &Context, exec: &E, key: &str) -> RepoResult<()>;
    /// Every entry ordered by key.
    fn get_all(&self, ctx: &Context, exec: &E) -> RepoResult<Vec<MetadataEntry>>;
    fn delete_all(&self, ctx: &Context, exec: &E) -> RepoResult<usize>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SqliteMetadataRepository;

impl FromRow for MetadataEntry {
    fn from_row(row: &Row<'_>) -> RepoResult<Self> {
        Ok(MetadataEntry {
            key: row.get(0)?,
            value: row.get(1)?,
            updated_at: row.get(2)?,
        })
    }
}

impl<E: Executor> MetadataRepository<E> for SqliteMetadataRepository {
    fn get(&self, ctx: &Context, exec: &E, key: &str) -> RepoResult<MetadataEntry> {
        exec.fetch_one(
            ctx,
            "SELECT key, value, updated_at FROM metadata WHERE key = ?1;",
            params![key],
        )?
        .ok_or_else(|| RepoError::not_found(Resource::Metadata, key))
    }

    fn set(&self, ctx: &Context, exec: &E, key: &str, value: &str) -> RepoResult<MetadataEntry> {
        validate_key(key)?;

        let now = now_ms();
        exec.exec(
            ctx,
            "INSERT INTO metadata (key, value, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET
                value = excluded.value,
                updated_at = excluded.updated_at;",
            params![key, value, now],
        )?;

        Ok(MetadataEntry {
            key: key.to_string(),
            value: value.to_string(),
            updated_at: now,
        })
    }

    fn delete(&self, ctx: &Context, exec: &E, key: &str) -> RepoResult<()> {
        exec.exec(ctx, "DELETE FROM metadata WHERE key = ?1;", params![key])?;
        Ok(())
    }

    fn get_all(&self, ctx: &Context, exec: &E) -> RepoResult<Vec<MetadataEntry>> {
        exec.fetch_all(
            ctx,
            "SELECT key, value, updated_at FROM metadata ORDER BY key ASC;",
            [],
        )
    }

    fn delete_all(&self, ctx: &Context, exec: &E) -> RepoResult<usize> {
        exec.exec(ctx, "DELETE FROM metadata;", [])
    }
}
