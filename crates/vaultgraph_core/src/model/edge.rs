//! Edge (link) record.
//!
//! # Invariants
//! - `id` is generated and independent of the endpoints, so weight/label can
//!   change in place.
//! - `source_id != target_id`; `weight >= 0`.
//! - `(source_id, target_id, edge_type)` is the natural de-duplication key.

use super::node::NodeId;
use super::{require_text, FieldError};
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use uuid::Uuid;

/// Columns SQLite names when the natural key is violated.
pub const NATURAL_KEY_FIELD: &str = "edges.source_id, edges.target_id, edges.edge_type";
pub const ID_FIELD: &str = "edges.id";

/// Generated edge identifier.
pub type EdgeId = Uuid;

/// Closed set of link kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeType {
    /// Plain link to another note.
    Reference,
    /// Transclusion of another note.
    Embed,
}

impl EdgeType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Reference => "reference",
            Self::Embed => "embed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "reference" => Some(Self::Reference),
            "embed" => Some(Self::Embed),
            _ => None,
        }
    }
}

impl Display for EdgeType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Directed link between two nodes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Edge {
    pub id: EdgeId,
    pub source_id: NodeId,
    pub target_id: NodeId,
    pub edge_type: EdgeType,
    /// Display text of the link, when it differs from the target title.
    #[serde(default)]
    pub label: Option<String>,
    pub weight: f64,
    #[serde(default)]
    pub created_at: i64,
}

impl Edge {
    /// Creates an edge with a generated id and unit weight.
    pub fn new(
        source_id: impl Into<NodeId>,
        target_id: impl Into<NodeId>,
        edge_type: EdgeType,
    ) -> Self {
        Self::with_id(Uuid::new_v4(), source_id, target_id, edge_type)
    }

    /// Creates an edge with a caller-provided id (import paths).
    pub fn with_id(
        id: EdgeId,
        source_id: impl Into<NodeId>,
        target_id: impl Into<NodeId>,
        edge_type: EdgeType,
    ) -> Self {
        Self {
            id,
            source_id: source_id.into(),
            target_id: target_id.into(),
            edge_type,
            label: None,
            weight: 1.0,
            created_at: 0,
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn with_weight(mut self, weight: f64) -> Self {
        self.weight = weight;
        self
    }

    /// Natural de-duplication key.
    pub fn natural_key(&self) -> (&str, &str, EdgeType) {
        (&self.source_id, &self.target_id, self.edge_type)
    }

    /// Value reported when this edge collides on `field`: the natural key
    /// for [`NATURAL_KEY_FIELD`], the id otherwise.
    pub fn conflict_value(&self, field: Option<&str>) -> String {
        match field {
            Some(NATURAL_KEY_FIELD) => {
                format!("{} -> {} ({})", self.source_id, self.target_id, self.edge_type)
            }
            _ => self.id.to_string(),
        }
    }

    pub fn validate(&self) -> Result<(), FieldError> {
        require_text("source_id", &self.source_id)?;
        require_text("target_id", &self.target_id)?;
        if self.source_id == self.target_id {
            return Err(FieldError::new("target_id", "self-loops are not allowed"));
        }
        if !self.weight.is_finite() || self.weight < 0.0 {
            return Err(FieldError::new(
                "weight",
                format!("must be a non-negative number, got {}", self.weight),
            ));
        }
        Ok(())
    }
}
