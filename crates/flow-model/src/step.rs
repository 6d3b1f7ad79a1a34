//! A single node in the workflow graph.

use serde::{Deserialize, Serialize};

/// What a step's group membership looks like: which group it belongs to and
/// the role it plays inside that group's control-flow construct.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GroupMembership {
    pub group_id: String,
    pub group_role: String,
}

/// Behaviour when a step's handler returns an error.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub enum OnError {
    #[default]
    StopWorkflow,
    ContinueRegularOutput,
    ContinueErrorOutput,
}

/// A single node in the workflow DAG.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Step {
    pub id: String,
    pub name: String,
    /// Handler type tag, e.g. "start", "condition", "function", "custom-block".
    #[serde(rename = "type")]
    pub step_type: String,
    /// Opaque, handler-specific configuration.
    #[serde(default)]
    pub config: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<GroupMembership>,
    /// Output ports this step may emit beyond the default `"output"`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_output_ports: Option<Vec<String>>,
    /// Whether a failed step may be routed to an edge with `source_port == "error"`.
    #[serde(default)]
    pub enable_error_port: bool,
    #[serde(default)]
    pub on_error: OnError,
    #[serde(default)]
    pub retry_on_fail: bool,
    #[serde(default = "default_max_tries")]
    pub max_tries: u32,
    #[serde(default)]
    pub wait_between_tries_ms: u64,
    #[serde(default)]
    pub disabled: bool,
}

fn default_max_tries() -> u32 {
    1
}

impl Step {
    pub fn new(id: impl Into<String>, name: impl Into<String>, step_type: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            step_type: step_type.into(),
            config: serde_json::Value::Object(Default::default()),
            group: None,
            custom_output_ports: None,
            enable_error_port: false,
            on_error: OnError::default(),
            retry_on_fail: false,
            max_tries: 1,
            wait_between_tries_ms: 0,
            disabled: false,
        }
    }

    pub fn with_config(mut self, config: serde_json::Value) -> Self {
        self.config = config;
        self
    }

    pub fn in_group(mut self, group_id: impl Into<String>, group_role: impl Into<String>) -> Self {
        self.group = Some(GroupMembership {
            group_id: group_id.into(),
            group_role: group_role.into(),
        });
        self
    }

    pub fn is_start(&self) -> bool {
        self.step_type == "start"
    }
}
