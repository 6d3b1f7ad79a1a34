//! Directed edges between steps and/or groups.

use serde::{Deserialize, Serialize};

/// The default port name a step or group emits when it declares no custom port.
pub const DEFAULT_PORT: &str = "output";

/// An edge endpoint: either a step or a block group.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum NodeRef {
    Step { id: String },
    Group { id: String },
}

impl NodeRef {
    pub fn step(id: impl Into<String>) -> Self {
        NodeRef::Step { id: id.into() }
    }

    pub fn group(id: impl Into<String>) -> Self {
        NodeRef::Group { id: id.into() }
    }

    pub fn id(&self) -> &str {
        match self {
            NodeRef::Step { id } | NodeRef::Group { id } => id,
        }
    }

    pub fn is_step(&self) -> bool {
        matches!(self, NodeRef::Step { .. })
    }

    pub fn is_group(&self) -> bool {
        matches!(self, NodeRef::Group { .. })
    }
}

/// A directed edge. Source and target may each be a step or a group,
/// giving four possible edge kinds (step→step, step→group, group→step,
/// group→group).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Edge {
    pub id: String,
    pub source: NodeRef,
    pub target: NodeRef,
    /// Required output port on the source; absent means "default `output` port only".
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_port: Option<String>,
    /// Optional boolean condition expression evaluated against the source's output.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
}

impl Edge {
    pub fn new(id: impl Into<String>, source: NodeRef, target: NodeRef) -> Self {
        Self {
            id: id.into(),
            source,
            target,
            source_port: None,
            condition: None,
        }
    }

    pub fn with_port(mut self, port: impl Into<String>) -> Self {
        self.source_port = Some(port.into());
        self
    }

    pub fn with_condition(mut self, condition: impl Into<String>) -> Self {
        self.condition = Some(condition.into());
        self
    }

    /// Whether this edge fires given the emitted port of its source.
    pub fn port_matches(&self, emitted_port: &str) -> bool {
        match &self.source_port {
            Some(required) => required == emitted_port,
            None => emitted_port == DEFAULT_PORT,
        }
    }
}
