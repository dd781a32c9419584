//! Graph domain model: nodes, edges, positions, vault metadata and
//! ingestion history.
//!
//! # Responsibility
//! - Define the records persisted by the repository layer.
//! - Validate record invariants before any write.
//!
//! # Invariants
//! - Node ids are supplied externally; edge ids are generated.
//! - Timestamps are Unix epoch milliseconds assigned by the storage layer.

use crate::error::RepoError;
use std::fmt::{Display, Formatter};
use std::time::{SystemTime, UNIX_EPOCH};

pub mod edge;
pub mod ingestion;
pub mod metadata;
pub mod node;
pub mod position;

/// Single-field validation failure raised by model `validate()` methods.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldError {
    pub field: &'static str,
    pub reason: String,
}

impl FieldError {
    pub fn new(field: &'static str, reason: impl Into<String>) -> Self {
        Self {
            field,
            reason: reason.into(),
        }
    }
}

impl Display for FieldError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.reason)
    }
}

impl std::error::Error for FieldError {}

impl From<FieldError> for RepoError {
    fn from(value: FieldError) -> Self {
        RepoError::Validation {
            field: value.field.to_string(),
            reason: value.reason,
        }
    }
}

/// Current wall clock as Unix epoch milliseconds.
pub fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| i64::try_from(elapsed.as_millis()).unwrap_or(i64::MAX))
        .unwrap_or_default()
}

pub(crate) fn require_text(field: &'static str, value: &str) -> Result<(), FieldError> {
    if value.trim().is_empty() {
        return Err(FieldError::new(field, "must not be empty"));
    }
    Ok(())
}
