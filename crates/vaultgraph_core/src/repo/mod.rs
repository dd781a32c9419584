//! Repository layer contracts and SQLite implementations.
//!
//! # Responsibility
//! - Define per-entity data access contracts, generic over the executor the
//!   caller passes in.
//! - Isolate SQLite query details from orchestration code.
//!
//! # Invariants
//! - Repositories hold no connection; every call receives its executor.
//! - Write paths validate records before SQL mutations.
//! - Backend failures leave this layer translated into [`crate::error::RepoError`].

pub(crate) mod batch;
pub mod edge_repo;
pub mod history_repo;
pub mod metadata_repo;
pub mod node_repo;
pub mod position_repo;

/// Offset/limit window for paginated listings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    pub limit: u32,
    pub offset: u32,
}

impl Page {
    pub const DEFAULT_LIMIT: u32 = 100;

    pub fn new(limit: u32, offset: u32) -> Self {
        Self { limit, offset }
    }

    /// First `limit` rows.
    pub fn first(limit: u32) -> Self {
        Self::new(limit, 0)
    }

    /// Page following this one.
    pub fn next(self) -> Self {
        Self::new(self.limit, self.offset.saturating_add(self.limit))
    }

    pub(crate) fn is_empty(self) -> bool {
        self.limit == 0
    }

    /// Applies the window to an in-memory, already sorted sequence.
    pub(crate) fn slice<T: Clone>(self, items: &[T]) -> Vec<T> {
        items
            .iter()
            .skip(self.offset as usize)
            .take(self.limit as usize)
            .cloned()
            .collect()
    }
}

/// Ids bound per `IN (…)` lookup statement.
pub(crate) const ID_LOOKUP_CHUNK: usize = 500;

/// `?, ?, …` with `count` placeholders.
pub(crate) fn placeholders(count: usize) -> String {
    vec!["?"; count].join(", ")
}

impl Default for Page {
    fn default() -> Self {
        Self::first(Self::DEFAULT_LIMIT)
    }
}

#[cfg(test)]
mod tests {
    use super::Page;

    #[test]
    fn next_page_advances_offset() {
        let page = Page::first(20).next().next();
        assert_eq!(page, Page::new(20, 40));
    }

    #[test]
    fn slice_applies_window() {
        let items: Vec<u32> = (0..10).collect();
        assert_eq!(Page::new(3, 8).slice(&items), vec![8, 9]);
        assert!(Page::new(0, 0).slice(&items).is_empty());
    }
}
