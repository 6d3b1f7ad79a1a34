//! Control-flow block groups.

use serde::{Deserialize, Serialize};

/// The six control-flow constructs a `BlockGroup` may implement.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum BlockGroupType {
    Parallel,
    TryCatch,
    IfElse,
    SwitchCase,
    Foreach,
    While,
}

impl BlockGroupType {
    pub fn as_str(&self) -> &'static str {
        match self {
            BlockGroupType::Parallel => "parallel",
            BlockGroupType::TryCatch => "try_catch",
            BlockGroupType::IfElse => "if_else",
            BlockGroupType::SwitchCase => "switch_case",
            BlockGroupType::Foreach => "foreach",
            BlockGroupType::While => "while",
        }
    }
}

/// A composite node driving one of the six control-flow interpreters over
/// its contained steps (identified by their `group_role`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockGroup {
    pub id: String,
    pub name: String,
    pub group_type: BlockGroupType,
    #[serde(default)]
    pub config: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pre_process: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub post_process: Option<String>,
}

impl BlockGroup {
    pub fn new(id: impl Into<String>, name: impl Into<String>, group_type: BlockGroupType) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            group_type,
            config: serde_json::Value::Object(Default::default()),
            pre_process: None,
            post_process: None,
        }
    }
}

/// Standard group-role tags used to partition a group's contained steps.
pub mod roles {
    pub const BODY: &str = "body";
    pub const TRY: &str = "try";
    pub const CATCH: &str = "catch";
    pub const FINALLY: &str = "finally";
    pub const THEN: &str = "then";
    pub const ELSE: &str = "else";
    pub const DEFAULT: &str = "default";

    pub fn case(n: usize) -> String {
        format!("case_{n}")
    }
}
