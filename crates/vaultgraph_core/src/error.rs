//! Portable error taxonomy for repository and executor calls.
//!
//! # Responsibility
//! - Define the error kinds every storage failure is reported as.
//! - Translate SQLite failure codes into those kinds in one place.
//! - Provide the caller-facing outcome mapping (missing / conflict / failure).
//!
//! # Invariants
//! - No SQLite error code or message shape escapes `translate`.
//! - `public_message()` never contains paths, SQL or backend text.

use crate::context::Context;
use crate::db::DbError;
use crate::tx::{TxAction, TxState};
use rusqlite::ffi;
use rusqlite::ErrorCode;
use std::fmt::{Display, Formatter};
use thiserror::Error;

pub type RepoResult<T> = Result<T, RepoError>;

/// Boxed source error kept for diagnostics on `Generic`.
pub type BoxedSource = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Entity family named by `NotFound` errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Resource {
    Node,
    Edge,
    Position,
    Metadata,
    IngestionRecord,
}

impl Resource {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Node => "node",
            Self::Edge => "edge",
            Self::Position => "position",
            Self::Metadata => "metadata",
            Self::IngestionRecord => "ingestion record",
        }
    }
}

impl Display for Resource {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Repository-level error taxonomy.
#[derive(Debug, Error)]
pub enum RepoError {
    #[error("{resource} not found: {id}")]
    NotFound { resource: Resource, id: String },

    #[error("duplicate key{}", describe_duplicate(.field.as_deref(), .value.as_deref()))]
    DuplicateKey {
        field: Option<String>,
        value: Option<String>,
    },

    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("batch rejected: {failed} of {total} items invalid (indices {failed_indices:?})")]
    BatchPartialFailure {
        total: usize,
        failed: usize,
        failed_indices: Vec<usize>,
    },

    #[error("operation cancelled")]
    Cancelled,

    #[error("operation deadline exceeded")]
    DeadlineExceeded,

    /// Commit/rollback called on a transaction that already finished.
    #[error("cannot {attempted} transaction: already {state}")]
    TransactionState { attempted: TxAction, state: TxState },

    #[error("storage failure: {message}")]
    Generic {
        message: String,
        #[source]
        source: Option<BoxedSource>,
    },
}

/// Portable discriminant of [`RepoError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    NotFound,
    DuplicateKey,
    Validation,
    BatchPartialFailure,
    Cancelled,
    DeadlineExceeded,
    TransactionState,
    Generic,
}

/// Caller-facing outcome class for an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The addressed resource does not exist.
    Missing,
    /// The write collides with existing state.
    Conflict,
    /// Anything else; detail stays inside the storage layer.
    Failure,
}

impl RepoError {
    pub fn not_found(resource: Resource, id: impl Into<String>) -> Self {
        Self::NotFound {
            resource,
            id: id.into(),
        }
    }

    pub fn duplicate(field: impl Into<String>, value: impl Into<String>) -> Self {
        Self::DuplicateKey {
            field: Some(field.into()),
            value: Some(value.into()),
        }
    }

    pub fn validation(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Write names a row (e.g. an edge endpoint) that does not exist.
    pub fn missing_reference(field: Option<String>) -> Self {
        Self::Validation {
            field: field.unwrap_or_else(|| "reference".to_string()),
            reason: "referenced row does not exist".to_string(),
        }
    }

    pub fn generic(message: impl Into<String>) -> Self {
        Self::Generic {
            message: message.into(),
            source: None,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::DuplicateKey { .. } => ErrorKind::DuplicateKey,
            Self::Validation { .. } => ErrorKind::Validation,
            Self::BatchPartialFailure { .. } => ErrorKind::BatchPartialFailure,
            Self::Cancelled => ErrorKind::Cancelled,
            Self::DeadlineExceeded => ErrorKind::DeadlineExceeded,
            Self::TransactionState { .. } => ErrorKind::TransactionState,
            Self::Generic { .. } => ErrorKind::Generic,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.kind() == ErrorKind::NotFound
    }

    pub fn outcome(&self) -> Outcome {
        match self.kind() {
            ErrorKind::NotFound => Outcome::Missing,
            ErrorKind::DuplicateKey => Outcome::Conflict,
            _ => Outcome::Failure,
        }
    }

    /// Message safe to forward to untrusted clients.
    pub fn public_message(&self) -> String {
        match self {
            Self::NotFound { resource, .. } => format!("{resource} not found"),
            Self::DuplicateKey { .. } => "resource already exists".to_string(),
            Self::Validation { field, reason } => format!("invalid {field}: {reason}"),
            Self::BatchPartialFailure { total, failed, .. } => {
                format!("{failed} of {total} items are invalid")
            }
            Self::Cancelled | Self::DeadlineExceeded => "request timed out".to_string(),
            Self::TransactionState { .. } | Self::Generic { .. } => {
                "internal storage error".to_string()
            }
        }
    }

    /// Fills in the conflicting value on a `DuplicateKey` that lacks one.
    pub(crate) fn with_duplicate_value(self, value: &str) -> Self {
        self.with_duplicate_value_for(|_| value.to_string())
    }

    /// Like [`Self::with_duplicate_value`], with the value chosen by the
    /// reported field.
    pub(crate) fn with_duplicate_value_for(
        self,
        value_of: impl FnOnce(Option<&str>) -> String,
    ) -> Self {
        match self {
            Self::DuplicateKey { field, value: None } => {
                let value = value_of(field.as_deref());
                Self::DuplicateKey {
                    field,
                    value: Some(value),
                }
            }
            other => other,
        }
    }
}

impl From<DbError> for RepoError {
    fn from(value: DbError) -> Self {
        Self::Generic {
            message: "database bootstrap failed".to_string(),
            source: Some(Box::new(value)),
        }
    }
}

impl From<rusqlite::Error> for RepoError {
    fn from(value: rusqlite::Error) -> Self {
        translate(value, &Context::background())
    }
}

impl From<serde_json::Error> for RepoError {
    fn from(value: serde_json::Error) -> Self {
        Self::Generic {
            message: "stored json value is malformed".to_string(),
            source: Some(Box::new(value)),
        }
    }
}

fn describe_duplicate(field: Option<&str>, value: Option<&str>) -> String {
    match (field, value) {
        (Some(field), Some(value)) => format!(" on {field} = `{value}`"),
        (Some(field), None) => format!(" on {field}"),
        (None, Some(value)) => format!(" `{value}`"),
        (None, None) => String::new(),
    }
}

/// Translates a SQLite failure into the portable taxonomy.
///
/// `ctx` decides whether an interrupted statement was cancelled or timed out.
pub fn translate(err: rusqlite::Error, ctx: &Context) -> RepoError {
    if let rusqlite::Error::SqliteFailure(code, message) = &err {
        match code.code {
            ErrorCode::OperationInterrupted => {
                return ctx.err().unwrap_or(RepoError::Cancelled);
            }
            ErrorCode::ConstraintViolation => {
                let extended_code = code.extended_code;
                let detail = message.clone().unwrap_or_default();
                return translate_constraint(extended_code, &detail, err);
            }
            _ => {}
        }
    }

    RepoError::Generic {
        message: "sqlite operation failed".to_string(),
        source: Some(Box::new(err)),
    }
}

fn translate_constraint(extended_code: i32, detail: &str, err: rusqlite::Error) -> RepoError {
    let field = constraint_subject(detail);
    match extended_code {
        ffi::SQLITE_CONSTRAINT_PRIMARYKEY | ffi::SQLITE_CONSTRAINT_UNIQUE => RepoError::DuplicateKey {
            field,
            value: None,
        },
        ffi::SQLITE_CONSTRAINT_FOREIGNKEY => RepoError::missing_reference(field),
        ffi::SQLITE_CONSTRAINT_NOTNULL => RepoError::Validation {
            field: field.unwrap_or_else(|| "value".to_string()),
            reason: "is required".to_string(),
        },
        ffi::SQLITE_CONSTRAINT_CHECK => RepoError::Validation {
            field: field.unwrap_or_else(|| "value".to_string()),
            reason: "is out of range".to_string(),
        },
        _ => RepoError::Generic {
            message: "constraint violation".to_string(),
            source: Some(Box::new(err)),
        },
    }
}

/// Extracts `table.column[, table.column]` from a SQLite constraint message.
fn constraint_subject(message: &str) -> Option<String> {
    let (_, subject) = message.split_once("failed:")?;
    let subject = subject.trim();
    if subject.is_empty() {
        None
    } else {
        Some(subject.to_string())
    }
}
