//! Graph Model (§4.C).
//!
//! An immutable, precomputed view over a [`WorkflowDefinition`]: adjacency
//! lists keyed by node ID, indexed both ways (in-edges and out-edges), plus
//! fast ID → definition lookups. Built once per run and never mutated —
//! the executor walks it concurrently from multiple tasks.

use flow_model::{BlockGroup, Edge, NodeRef, Step, WorkflowDefinition, WorkflowError};
use std::collections::HashMap;

#[derive(Debug)]
pub struct Graph {
    steps_by_id: HashMap<String, Step>,
    groups_by_id: HashMap<String, BlockGroup>,
    /// Edges whose source is this node ID, in declaration order.
    out_edges: HashMap<String, Vec<Edge>>,
    /// Edges whose target is this node ID, in declaration order.
    in_edges: HashMap<String, Vec<Edge>>,
    start_step_ids: Vec<String>,
    /// Steps partitioned by the group they belong to, preserving declaration order.
    group_members: HashMap<String, Vec<String>>,
}

impl Graph {
    /// Builds the adjacency view from a validated workflow definition.
    pub fn build(workflow: &WorkflowDefinition) -> Result<Self, WorkflowError> {
        workflow.validate()?;

        let mut steps_by_id = HashMap::new();
        for step in &workflow.steps {
            steps_by_id.insert(step.id.clone(), step.clone());
        }

        let mut groups_by_id = HashMap::new();
        for group in &workflow.groups {
            groups_by_id.insert(group.id.clone(), group.clone());
        }

        let mut out_edges: HashMap<String, Vec<Edge>> = HashMap::new();
        let mut in_edges: HashMap<String, Vec<Edge>> = HashMap::new();
        for edge in &workflow.edges {
            out_edges
                .entry(edge.source.id().to_string())
                .or_default()
                .push(edge.clone());
            in_edges
                .entry(edge.target.id().to_string())
                .or_default()
                .push(edge.clone());
        }

        let start_step_ids = workflow
            .find_start_nodes()
            .into_iter()
            .map(|s| s.id.clone())
            .collect();

        let mut group_members: HashMap<String, Vec<String>> = HashMap::new();
        for step in &workflow.steps {
            if let Some(membership) = &step.group {
                group_members
                    .entry(membership.group_id.clone())
                    .or_default()
                    .push(step.id.clone());
            }
        }

        Ok(Self {
            steps_by_id,
            groups_by_id,
            out_edges,
            in_edges,
            start_step_ids,
            group_members,
        })
    }

    pub fn step(&self, id: &str) -> Option<&Step> {
        self.steps_by_id.get(id)
    }

    pub fn group(&self, id: &str) -> Option<&BlockGroup> {
        self.groups_by_id.get(id)
    }

    pub fn start_step_ids(&self) -> &[String] {
        &self.start_step_ids
    }

    /// Edges leaving `node_id`, in declaration order.
    pub fn out_edges(&self, node_id: &str) -> &[Edge] {
        self.out_edges.get(node_id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Edges entering `node_id`, in declaration order.
    pub fn in_edges(&self, node_id: &str) -> &[Edge] {
        self.in_edges.get(node_id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Step IDs tagged as members of `group_id`, in declaration order.
    pub fn group_member_ids(&self, group_id: &str) -> &[String] {
        self.group_members.get(group_id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Step IDs tagged with a specific `group_role` inside `group_id`.
    pub fn group_members_with_role<'a>(&'a self, group_id: &str, role: &'a str) -> Vec<&'a Step> {
        self.group_member_ids(group_id)
            .iter()
            .filter_map(|id| self.steps_by_id.get(id))
            .filter(|s| {
                s.group
                    .as_ref()
                    .map(|m| m.group_role == role)
                    .unwrap_or(false)
            })
            .collect()
    }

    pub fn resolve(&self, node: &NodeRef) -> bool {
        match node {
            NodeRef::Step { id } => self.steps_by_id.contains_key(id),
            NodeRef::Group { id } => self.groups_by_id.contains_key(id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flow_model::{Edge as ModelEdge, NodeRef as ModelNodeRef, Step as ModelStep, WorkflowDefinitionBuilder};

    #[test]
    fn builds_adjacency_from_linear_workflow() {
        let def = WorkflowDefinitionBuilder::new("wf1", "Test")
            .step(ModelStep::new("a", "A", "start"))
            .step(ModelStep::new("b", "B", "function"))
            .edge(ModelEdge::new("e1", ModelNodeRef::step("a"), ModelNodeRef::step("b")))
            .build();

        let graph = Graph::build(&def).unwrap();
        assert_eq!(graph.start_step_ids(), &["a".to_string()]);
        assert_eq!(graph.out_edges("a").len(), 1);
        assert_eq!(graph.in_edges("b").len(), 1);
        assert!(graph.out_edges("b").is_empty());
    }

    #[test]
    fn groups_steps_by_role() {
        use flow_model::{BlockGroup, BlockGroupType};
        let def = WorkflowDefinitionBuilder::new("wf1", "Test")
            .step(ModelStep::new("start", "Start", "start"))
            .group(BlockGroup::new("g1", "TryCatch", BlockGroupType::TryCatch))
            .step(ModelStep::new("t1", "Try", "function").in_group("g1", "try"))
            .step(ModelStep::new("c1", "Catch", "function").in_group("g1", "catch"))
            .build();

        let graph = Graph::build(&def).unwrap();
        assert_eq!(graph.group_member_ids("g1").len(), 2);
        assert_eq!(graph.group_members_with_role("g1", "try").len(), 1);
        assert_eq!(graph.group_members_with_role("g1", "catch").len(), 1);
    }

    #[test]
    fn build_fails_on_invalid_workflow() {
        let def = WorkflowDefinitionBuilder::new("wf1", "Test")
            .step(ModelStep::new("a", "A", "function"))
            .build();
        assert!(Graph::build(&def).is_err());
    }
}
