//! In-memory metadata repository.

use super::store::MemoryExecutor;
use crate::context::Context;
use crate::error::{RepoError, RepoResult, Resource};
use crate::model::metadata::{validate_key, MetadataEntry};
use crate::model::now_ms;
use crate::repo::metadata_repo::MetadataRepository;

#[derive(Debug, Clone, Copy, Default)]
pub struct MemoryMetadataRepository;

impl<E: MemoryExecutor> MetadataRepository<E> for MemoryMetadataRepository {
    fn get(&self, ctx: &Context, exec: &E, key: &str) -> RepoResult<MetadataEntry> {
        exec.with_tables(ctx, |tables| {
            tables
                .metadata()
                .get(key)
                .cloned()
                .ok_or_else(|| RepoError::not_found(Resource::Metadata, key))
        })
    }

    fn set(&self, ctx: &Context, exec: &E, key: &str, value: &str) -> RepoResult<MetadataEntry> {
        validate_key(key)?;
        exec.with_tables(ctx, |tables| {
            let entry = MetadataEntry {
                key: key.to_string(),
                value: value.to_string(),
                updated_at: now_ms(),
            };
            tables.metadata_mut().insert(key.to_string(), entry.clone());
            Ok(entry)
        })
    }

    fn delete(&self, ctx: &Context, exec: &E, key: &str) -> RepoResult<()> {
        exec.with_tables(ctx, |tables| {
            if tables.metadata().contains_key(key) {
                tables.metadata_mut().remove(key);
            }
            Ok(())
        })
    }

    fn get_all(&self, ctx: &Context, exec: &E) -> RepoResult<Vec<MetadataEntry>> {
        exec.with_tables(ctx, |tables| Ok(tables.metadata().values().cloned().collect()))
    }

    fn delete_all(&self, ctx: &Context, exec: &E) -> RepoResult<usize> {
        exec.with_tables(ctx, |tables| {
            let removed = tables.metadata().len();
            if removed > 0 {
                tables.metadata_mut().clear();
            }
            Ok(removed)
        })
    }
}
