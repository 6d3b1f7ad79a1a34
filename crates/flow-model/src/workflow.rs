//! Named collection of steps, groups and edges.

use crate::edge::Edge;
use crate::group::BlockGroup;
use crate::step::Step;
use crate::WorkflowError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub steps: Vec<Step>,
    #[serde(default)]
    pub groups: Vec<BlockGroup>,
    #[serde(default)]
    pub edges: Vec<Edge>,
    #[serde(default)]
    pub variables: HashMap<String, serde_json::Value>,
    #[serde(default)]
    pub input_schema: serde_json::Value,
    #[serde(default)]
    pub output_schema: serde_json::Value,
    #[serde(default)]
    pub version: u32,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

impl WorkflowDefinition {
    pub fn get_step(&self, id: &str) -> Option<&Step> {
        self.steps.iter().find(|s| s.id == id)
    }

    pub fn get_group(&self, id: &str) -> Option<&BlockGroup> {
        self.groups.iter().find(|g| g.id == id)
    }

    /// Steps of type `start` — the only valid entry points.
    pub fn find_start_nodes(&self) -> Vec<&Step> {
        self.steps.iter().filter(|s| s.is_start()).collect()
    }

    /// Minimal structural validation: step/group ID uniqueness, edges reference
    /// existing nodes, and at least one `start` step exists.
    pub fn validate(&self) -> Result<(), WorkflowError> {
        let mut seen = std::collections::HashSet::new();
        for s in &self.steps {
            if !seen.insert(s.id.as_str()) {
                return Err(WorkflowError::InvalidWorkflow(format!(
                    "duplicate step id: {}",
                    s.id
                )));
            }
        }
        let mut seen_groups = std::collections::HashSet::new();
        for g in &self.groups {
            if !seen_groups.insert(g.id.as_str()) {
                return Err(WorkflowError::InvalidWorkflow(format!(
                    "duplicate group id: {}",
                    g.id
                )));
            }
        }
        for e in &self.edges {
            for node in [&e.source, &e.target] {
                let exists = match node {
                    crate::edge::NodeRef::Step { id } => self.get_step(id).is_some(),
                    crate::edge::NodeRef::Group { id } => self.get_group(id).is_some(),
                };
                if !exists {
                    return Err(WorkflowError::ConnectionError(format!(
                        "edge {} references unknown node {}",
                        e.id,
                        node.id()
                    )));
                }
            }
        }
        if self.find_start_nodes().is_empty() {
            return Err(WorkflowError::InvalidWorkflow(
                "workflow has no start step".to_string(),
            ));
        }
        Ok(())
    }
}

pub struct WorkflowDefinitionBuilder {
    def: WorkflowDefinition,
}

impl WorkflowDefinitionBuilder {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        let now = chrono::Utc::now();
        Self {
            def: WorkflowDefinition {
                id: id.into(),
                name: name.into(),
                description: None,
                steps: Vec::new(),
                groups: Vec::new(),
                edges: Vec::new(),
                variables: HashMap::new(),
                input_schema: serde_json::Value::Null,
                output_schema: serde_json::Value::Null,
                version: 1,
                created_at: now,
                updated_at: now,
            },
        }
    }

    pub fn step(mut self, step: Step) -> Self {
        self.def.steps.push(step);
        self
    }

    pub fn group(mut self, group: BlockGroup) -> Self {
        self.def.groups.push(group);
        self
    }

    pub fn edge(mut self, edge: Edge) -> Self {
        self.def.edges.push(edge);
        self
    }

    pub fn build(self) -> WorkflowDefinition {
        self.def
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::edge::NodeRef;

    #[test]
    fn validate_rejects_workflow_with_no_start_step() {
        let def = WorkflowDefinitionBuilder::new("wf1", "Test")
            .step(Step::new("a", "A", "function"))
            .build();
        assert!(def.validate().is_err());
    }

    #[test]
    fn validate_rejects_dangling_edge() {
        let def = WorkflowDefinitionBuilder::new("wf1", "Test")
            .step(Step::new("a", "A", "start"))
            .edge(Edge::new("e1", NodeRef::step("a"), NodeRef::step("missing")))
            .build();
        assert!(def.validate().is_err());
    }

    #[test]
    fn validate_accepts_minimal_linear_workflow() {
        let def = WorkflowDefinitionBuilder::new("wf1", "Test")
            .step(Step::new("a", "A", "start"))
            .step(Step::new("b", "B", "function"))
            .edge(Edge::new("e1", NodeRef::step("a"), NodeRef::step("b")))
            .build();
        assert!(def.validate().is_ok());
    }
}
