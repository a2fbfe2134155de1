// src/platforms/coze/mod.rs
//
// =============================================================================
// FLOWBRIDGE: COZE SCHEMA
// =============================================================================
//
// Wire types for Coze workflow exports: top-level `schema` (plus optional
// `workflow_id` / `export_format`), either bare YAML or inside a small zip
// archive. Node types are numeric strings; structured references carry
// `{blockID, name, source: "block-output"}`; loop internals are embedded as
// `blocks` on the container node.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

mod generator;
mod parser;

pub use generator::CozeGenerator;
pub use parser::CozeParser;

/// Conventional node IDs for the workflow entry and exit.
pub const START_NODE_ID: &str = "100001";
pub const END_NODE_ID: &str = "900001";

/// First ID handed out for internal nodes.
pub const FIRST_INTERNAL_ID: u64 = 100_100;

/// Fallback model when the source provider has no Coze mapping.
pub const DEFAULT_MODEL_NAME: &str = "GPT-4o";

// ============================================================================
// 1. ENVELOPE
// ============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CozeDocument {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workflow_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub export_format: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub schema: CozeSchema,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CozeSchema {
    #[serde(default)]
    pub nodes: Vec<CozeNode>,
    #[serde(default)]
    pub edges: Vec<CozeEdge>,
}

// ============================================================================
// 2. NODES
// ============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CozeNode {
    pub id: String,
    #[serde(rename = "type")]
    pub node_type: String,
    #[serde(default)]
    pub meta: CozeMeta,
    #[serde(default)]
    pub data: CozeNodeData,
    /// Loop internals, embedded on the container.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub blocks: Vec<CozeNode>,
    /// Edges between loop internals.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub edges: Vec<CozeEdge>,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct CozeMeta {
    #[serde(default)]
    pub position: CozePosition,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct CozePosition {
    #[serde(default)]
    pub x: f64,
    #[serde(default)]
    pub y: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CozeNodeData {
    #[serde(rename = "nodeMeta", default)]
    pub node_meta: CozeNodeMeta,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub outputs: Vec<CozeOutput>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inputs: Option<CozeInputs>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CozeNodeMeta {
    #[serde(default)]
    pub title: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub icon: String,
    #[serde(rename = "subTitle", default, skip_serializing_if = "String::is_empty")]
    pub sub_title: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CozeOutput {
    pub name: String,
    #[serde(rename = "type", default)]
    pub data_type: String,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub required: bool,
    /// Loop containers point their collected output at an inner block.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<CozeValue>,
}

/// `inputParameters` plus the per-type payloads (`llmParam`, `code`,
/// `branches`, `intents`, loop settings) in an open map.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CozeInputs {
    #[serde(rename = "inputParameters", default, skip_serializing_if = "Vec::is_empty")]
    pub input_parameters: Vec<CozeParam>,
    #[serde(flatten)]
    pub rest: Map<String, Value>,
}

// ============================================================================
// 3. PARAMETERS & REFERENCES
// ============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CozeParam {
    pub name: String,
    pub input: CozeInput,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CozeInput {
    #[serde(rename = "type", default)]
    pub data_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<CozeValue>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CozeValue {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub content: Value,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CozeBlockRef {
    #[serde(rename = "blockID")]
    pub block_id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub source: String,
}

impl CozeValue {
    pub fn reference(block_id: impl Into<String>, name: impl Into<String>) -> Self {
        CozeValue {
            kind: "ref".to_string(),
            content: serde_json::json!({
                "blockID": block_id.into(),
                "name": name.into(),
                "source": "block-output",
            }),
        }
    }

    pub fn literal(value: Value) -> Self {
        CozeValue {
            kind: "literal".to_string(),
            content: value,
        }
    }

    pub fn as_block_ref(&self) -> Option<CozeBlockRef> {
        if self.kind != "ref" {
            return None;
        }
        serde_json::from_value(self.content.clone()).ok()
    }
}

// ============================================================================
// 4. EDGES
// ============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CozeEdge {
    #[serde(rename = "sourceNodeID")]
    pub source: String,
    #[serde(rename = "targetNodeID")]
    pub target: String,
    #[serde(rename = "sourcePortID", default, skip_serializing_if = "Option::is_none")]
    pub source_port: Option<String>,
}

// ============================================================================
// 5. TYPED PAYLOAD VIEWS
// ============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CozeLlmParam {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub provider: String,
    #[serde(rename = "modelName", default)]
    pub model_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(rename = "maxTokens", default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(rename = "topK", default, skip_serializing_if = "Option::is_none")]
    pub top_k: Option<u32>,
    #[serde(rename = "topP", default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,
    #[serde(rename = "responseFormat", default, skip_serializing_if = "String::is_empty")]
    pub response_format: String,
    #[serde(rename = "systemPrompt", default, skip_serializing_if = "String::is_empty")]
    pub system_prompt: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub prompt: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CozeBranch {
    #[serde(rename = "branchId", default)]
    pub branch_id: String,
    #[serde(default)]
    pub level: u32,
    #[serde(default)]
    pub logic: String,
    #[serde(default)]
    pub conditions: Vec<CozeCondition>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CozeCondition {
    #[serde(default)]
    pub left: CozeBlockRef,
    #[serde(default)]
    pub operator: String,
    #[serde(default)]
    pub right: String,
    #[serde(rename = "varType", default, skip_serializing_if = "String::is_empty")]
    pub var_type: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CozeIntent {
    #[serde(rename = "intentId", default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    #[serde(rename = "isDefault", default, skip_serializing_if = "std::ops::Not::not")]
    pub is_default: bool,
}

/// Decode a typed view out of an inputs' open payload map.
pub fn inputs_view<T: Default + serde::de::DeserializeOwned>(inputs: &Option<CozeInputs>) -> T {
    match inputs {
        Some(i) => serde_json::from_value(Value::Object(i.rest.clone())).unwrap_or_default(),
        None => T::default(),
    }
}
