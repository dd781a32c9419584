//! Full-text search support.
//!
//! # Responsibility
//! - Turn user query text into safe FTS5 match expressions.
//! - Provide the tokenizer the in-memory repositories rank with.
//!
//! # Invariants
//! - Blank queries match nothing instead of failing.

pub mod fts;

pub use fts::SEARCH_RESULT_LIMIT;
