// src/platforms/mod.rs
//
// =============================================================================
// FLOWBRIDGE: PLATFORM REGISTRY
// =============================================================================
//
// The three supported descriptor languages and their node-type vocabularies.
//
// iFlytek Spark is the hub: every Dify <-> Coze conversion routes through it,
// which keeps the number of parser/generator pairs at 2*N instead of N^2.

use crate::model::NodeType;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub mod coze;
pub mod dify;
pub mod iflytek;

// ============================================================================
// 1. PLATFORM IDENTITY
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    /// iFlytek Spark agent descriptors (`flowMeta` / `flowData`). The hub.
    IFlytek,
    /// Dify app DSL (`app` / `workflow` / `kind`).
    Dify,
    /// Coze workflow exports (`schema`, optionally zip-packed).
    Coze,
}

impl Platform {
    pub const ALL: [Platform; 3] = [Platform::IFlytek, Platform::Dify, Platform::Coze];

    /// The mandatory intermediate for conversions between the other two.
    pub const fn hub() -> Platform {
        Platform::IFlytek
    }

    pub fn is_hub(self) -> bool {
        self == Self::hub()
    }

    /// The platform-native tag for a unified node type.
    ///
    /// Coze tags node types with small numeric strings; the other two use
    /// descriptive tokens. `Unsupported` has no tag anywhere.
    pub fn node_token(self, node_type: NodeType) -> Option<&'static str> {
        use NodeType::*;
        let token = match (self, node_type) {
            (Platform::IFlytek, Start) => "start_node",
            (Platform::IFlytek, End) => "end_node",
            (Platform::IFlytek, Llm) => "llm_node",
            (Platform::IFlytek, Code) => "code_node",
            (Platform::IFlytek, Condition) => "condition_node",
            (Platform::IFlytek, Classifier) => "classifier_node",
            (Platform::IFlytek, Iteration) => "iteration_node",

            (Platform::Dify, Start) => "start",
            (Platform::Dify, End) => "end",
            (Platform::Dify, Llm) => "llm",
            (Platform::Dify, Code) => "code",
            (Platform::Dify, Condition) => "if-else",
            (Platform::Dify, Classifier) => "question-classifier",
            (Platform::Dify, Iteration) => "iteration",

            (Platform::Coze, Start) => "1",
            (Platform::Coze, End) => "2",
            (Platform::Coze, Llm) => "3",
            (Platform::Coze, Code) => "4",
            (Platform::Coze, Condition) => "5",
            (Platform::Coze, Classifier) => "6",
            (Platform::Coze, Iteration) => "7",

            (_, Unsupported) => return None,
        };
        Some(token)
    }

    /// Reverse lookup: platform tag -> unified node type.
    pub fn node_type_from_token(self, token: &str) -> Option<NodeType> {
        use NodeType::*;
        for t in [Start, End, Llm, Code, Condition, Classifier, Iteration] {
            if self.node_token(t) == Some(token) {
                return Some(t);
            }
        }
        None
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Platform::IFlytek => "iflytek",
            Platform::Dify => "dify",
            Platform::Coze => "coze",
        };
        f.write_str(name)
    }
}

impl FromStr for Platform {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "iflytek" | "spark" | "xingchen" => Ok(Platform::IFlytek),
            "dify" => Ok(Platform::Dify),
            "coze" => Ok(Platform::Coze),
            other => Err(format!(
                "unknown platform '{other}' (expected one of: iflytek, dify, coze)"
            )),
        }
    }
}
