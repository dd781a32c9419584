//! Node (note) record.
//!
//! # Invariants
//! - `id` is unique and supplied by the caller.
//! - `centrality` stays within `[0, 1]`; degree counters are unsigned.

use super::{require_text, FieldError};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeSet;

/// Externally supplied node identifier (usually a vault-relative note key).
pub type NodeId = String;

/// One note in the vault graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub id: NodeId,
    pub title: String,
    /// Free-form classification tag; empty when unclassified.
    #[serde(default)]
    pub node_type: String,
    #[serde(default)]
    pub tags: BTreeSet<String>,
    #[serde(default)]
    pub content: String,
    /// Open-ended attribute bag (frontmatter and the like).
    #[serde(default)]
    pub metadata: Map<String, Value>,
    /// Source location of the note.
    #[serde(default)]
    pub path: String,
    #[serde(default)]
    pub in_degree: u32,
    #[serde(default)]
    pub out_degree: u32,
    #[serde(default)]
    pub centrality: f64,
    #[serde(default)]
    pub created_at: i64,
    #[serde(default)]
    pub updated_at: i64,
}

impl Node {
    /// Creates a node with empty optional fields and zeroed statistics.
    pub fn new(id: impl Into<NodeId>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            node_type: String::new(),
            tags: BTreeSet::new(),
            content: String::new(),
            metadata: Map::new(),
            path: String::new(),
            in_degree: 0,
            out_degree: 0,
            centrality: 0.0,
            created_at: 0,
            updated_at: 0,
        }
    }

    pub fn with_content(mut self, content: impl Into<String>) -> Self {
        self.content = content.into();
        self
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = path.into();
        self
    }

    pub fn with_type(mut self, node_type: impl Into<String>) -> Self {
        self.node_type = node_type.into();
        self
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    /// Checks record invariants before persistence.
    pub fn validate(&self) -> Result<(), FieldError> {
        require_text("id", &self.id)?;
        require_text("title", &self.title)?;
        if !self.centrality.is_finite() || !(0.0..=1.0).contains(&self.centrality) {
            return Err(FieldError::new(
                "centrality",
                format!("must be within [0, 1], got {}", self.centrality),
            ));
        }
        Ok(())
    }
}
