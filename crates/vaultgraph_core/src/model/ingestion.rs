//! Ingestion run history.
//!
//! # Invariants
//! - A record is created `pending` or `running` and moves exactly once to a
//!   terminal status (`completed` / `failed`) with `completed_at` set.
//! - Terminal records are immutable; later transitions are rejected.

use super::FieldError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt::{Display, Formatter};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IngestionStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl IngestionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(Self::Pending),
            "running" => Some(Self::Running),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Statuses a record may be in right before moving to `self`.
    pub(crate) fn allowed_predecessors(self) -> &'static [IngestionStatus] {
        match self {
            Self::Pending => &[],
            Self::Running => &[Self::Pending],
            Self::Completed | Self::Failed => &[Self::Pending, Self::Running],
        }
    }

    /// Rejects moving from `self` to `next`.
    pub(crate) fn check_transition(self, next: IngestionStatus) -> Result<(), FieldError> {
        if next.allowed_predecessors().contains(&self) {
            return Ok(());
        }
        let reason = if self.is_terminal() {
            format!("record is already {self}")
        } else {
            format!("cannot move from {self} to {next}")
        };
        Err(FieldError::new("status", reason))
    }
}

impl Display for IngestionStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngestionRecord {
    pub id: String,
    pub started_at: i64,
    pub completed_at: Option<i64>,
    pub status: IngestionStatus,
    /// Opaque statistics blob; its shape is owned by the ingestion pipeline.
    pub stats: Value,
    pub error_message: Option<String>,
}

impl IngestionRecord {
    /// Starts a new record with a generated id.
    pub fn start(status: IngestionStatus) -> Self {
        Self::with_id(Uuid::new_v4().to_string(), status)
    }

    pub fn with_id(id: impl Into<String>, status: IngestionStatus) -> Self {
        Self {
            id: id.into(),
            started_at: 0,
            completed_at: None,
            status,
            stats: Value::Object(Default::default()),
            error_message: None,
        }
    }

    pub fn validate(&self) -> Result<(), FieldError> {
        super::require_text("id", &self.id)?;
        if self.status.is_terminal() {
            return Err(FieldError::new(
                "status",
                "records must be created pending or running",
            ));
        }
        Ok(())
    }
}
