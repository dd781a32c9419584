//! User-placed layout position of a node.
//!
//! Positions are keyed by node id without a foreign key so layout survives
//! bulk rebuilds of nodes and edges.

use super::node::NodeId;
use super::{require_text, FieldError};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub node_id: NodeId,
    pub x: f64,
    pub y: f64,
    #[serde(default)]
    pub z: f64,
    /// The user pinned this node; automatic layout must not move it.
    #[serde(default)]
    pub locked: bool,
    #[serde(default)]
    pub updated_at: i64,
}

impl Position {
    pub fn new(node_id: impl Into<NodeId>, x: f64, y: f64) -> Self {
        Self {
            node_id: node_id.into(),
            x,
            y,
            z: 0.0,
            locked: false,
            updated_at: 0,
        }
    }

    pub fn locked(mut self) -> Self {
        self.locked = true;
        self
    }

    pub fn validate(&self) -> Result<(), FieldError> {
        require_text("node_id", &self.node_id)?;
        for (field, value) in [("x", self.x), ("y", self.y), ("z", self.z)] {
            if !value.is_finite() {
                return Err(FieldError::new(field, "must be a finite number"));
            }
        }
        Ok(())
    }
}
