// src/platforms/iflytek/mod.rs
//
// =============================================================================
// FLOWBRIDGE: IFLYTEK SPARK SCHEMA (the hub dialect)
// =============================================================================
//
// Wire types for the `flowMeta` / `flowData` YAML descriptor. Node IDs are
// "<type_token>::<uuid>"; structured references live in input schemas as
// `value: {type: ref|literal, content: ...}`; prompt templates speak the
// bare `{{name}}` dialect bound through node inputs.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

mod generator;
mod parser;

pub use generator::IFlytekGenerator;
pub use parser::IFlytekParser;

/// The canonical user-query variable exposed by Start nodes.
pub const AGENT_USER_INPUT: &str = "AGENT_USER_INPUT";

/// Fallback Spark service when the source model has no iFlytek mapping.
pub const DEFAULT_SERVICE_ID: &str = "bm4";
pub const DEFAULT_DOMAIN: &str = "generalv3.5";

// ============================================================================
// 1. ENVELOPE
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowDocument {
    #[serde(rename = "flowMeta")]
    pub meta: FlowMeta,
    #[serde(rename = "flowData")]
    pub data: FlowData,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FlowMeta {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(rename = "avatarIcon", default, skip_serializing_if = "Option::is_none")]
    pub avatar_icon: Option<String>,
    #[serde(rename = "avatarColor", default, skip_serializing_if = "Option::is_none")]
    pub avatar_color: Option<String>,
    /// Opening statement shown before the first user turn.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prologue: Option<String>,
    #[serde(rename = "inputExample", default, skip_serializing_if = "Vec::is_empty")]
    pub input_example: Vec<String>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FlowData {
    #[serde(default)]
    pub nodes: Vec<FlowNode>,
    #[serde(default)]
    pub edges: Vec<FlowEdge>,
}

// ============================================================================
// 2. NODES
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowNode {
    pub id: String,
    #[serde(rename = "type", default)]
    pub node_type: String,
    pub data: FlowNodeData,
    #[serde(default)]
    pub position: FlowPosition,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<FlowSize>,
}

impl FlowNode {
    /// The type token, from the explicit field or the ID prefix.
    pub fn token(&self) -> &str {
        if !self.node_type.is_empty() {
            return &self.node_type;
        }
        self.id.split("::").next().unwrap_or(&self.id)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FlowNodeData {
    #[serde(default)]
    pub label: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub inputs: Vec<FlowPort>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub outputs: Vec<FlowPort>,
    #[serde(rename = "nodeParam", default, skip_serializing_if = "Map::is_empty")]
    pub node_param: Map<String, Value>,
    /// Sub-workflow of an iteration container.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iteration: Option<FlowSubGraph>,
    #[serde(rename = "parentId", default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FlowSubGraph {
    #[serde(default)]
    pub nodes: Vec<FlowNode>,
    #[serde(default)]
    pub edges: Vec<FlowEdge>,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct FlowPosition {
    #[serde(default)]
    pub x: f64,
    #[serde(default)]
    pub y: f64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct FlowSize {
    pub width: f64,
    pub height: f64,
}

// ============================================================================
// 3. PORTS & REFERENCES
// ============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FlowPort {
    pub name: String,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub required: bool,
    #[serde(default)]
    pub schema: FlowSchema,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FlowSchema {
    #[serde(rename = "type", default)]
    pub data_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<FlowValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
    #[serde(rename = "minLength", default, skip_serializing_if = "Option::is_none")]
    pub min_length: Option<u32>,
    #[serde(rename = "maxLength", default, skip_serializing_if = "Option::is_none")]
    pub max_length: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,
    #[serde(rename = "enum", default, skip_serializing_if = "Vec::is_empty")]
    pub one_of: Vec<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowValue {
    #[serde(rename = "type")]
    pub kind: FlowValueKind,
    #[serde(default)]
    pub content: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FlowValueKind {
    Ref,
    Literal,
}

/// Content payload of a `ref` value.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowRef {
    #[serde(rename = "nodeId")]
    pub node_id: String,
    pub name: String,
}

impl FlowValue {
    pub fn reference(node_id: impl Into<String>, name: impl Into<String>) -> Self {
        FlowValue {
            kind: FlowValueKind::Ref,
            content: serde_json::json!({
                "nodeId": node_id.into(),
                "name": name.into(),
            }),
        }
    }

    pub fn literal(value: Value) -> Self {
        FlowValue {
            kind: FlowValueKind::Literal,
            content: value,
        }
    }

    pub fn as_ref_content(&self) -> Option<FlowRef> {
        if self.kind != FlowValueKind::Ref {
            return None;
        }
        serde_json::from_value(self.content.clone()).ok()
    }
}

// ============================================================================
// 4. EDGES
// ============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FlowEdge {
    #[serde(default)]
    pub id: String,
    #[serde(rename = "sourceNodeId")]
    pub source: String,
    #[serde(rename = "targetNodeId")]
    pub target: String,
    #[serde(rename = "sourceHandle", default, skip_serializing_if = "Option::is_none")]
    pub source_handle: Option<String>,
    #[serde(rename = "targetHandle", default, skip_serializing_if = "Option::is_none")]
    pub target_handle: Option<String>,
}

// ============================================================================
// 5. NODE PARAM PAYLOADS
// ============================================================================
//
// `nodeParam` is an open map on the wire; these are the typed views the
// parser and generator agree on.

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LlmParam {
    #[serde(rename = "serviceId", default)]
    pub service_id: String,
    #[serde(default)]
    pub domain: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(rename = "maxTokens", default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(rename = "topK", default, skip_serializing_if = "Option::is_none")]
    pub top_k: Option<u32>,
    #[serde(rename = "topP", default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,
    #[serde(rename = "respFormat", default, skip_serializing_if = "Option::is_none")]
    pub resp_format: Option<String>,
    #[serde(rename = "systemTemplate", default, skip_serializing_if = "String::is_empty")]
    pub system_template: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub template: String,
    /// `chat` / `completion`.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub mode: String,
    #[serde(rename = "enableVision", default, skip_serializing_if = "std::ops::Not::not")]
    pub enable_vision: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CodeParam {
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub language: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dependencies: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EndParam {
    #[serde(rename = "outputMode", default)]
    pub output_mode: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub template: String,
    #[serde(rename = "streamOutput", default)]
    pub stream_output: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConditionParam {
    #[serde(default)]
    pub cases: Vec<CaseParam>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CaseParam {
    #[serde(rename = "caseId")]
    pub case_id: String,
    #[serde(default)]
    pub level: u32,
    #[serde(rename = "logicalOperator", default)]
    pub logical_operator: String,
    #[serde(default)]
    pub conditions: Vec<CondParam>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CondParam {
    #[serde(rename = "variableSelector", default)]
    pub variable_selector: Vec<String>,
    #[serde(rename = "compareOperator", default)]
    pub compare_operator: String,
    #[serde(rename = "compareValue", default)]
    pub compare_value: String,
    #[serde(rename = "varType", default, skip_serializing_if = "String::is_empty")]
    pub var_type: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClassifierParam {
    #[serde(rename = "serviceId", default)]
    pub service_id: String,
    #[serde(default)]
    pub domain: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(rename = "maxTokens", default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(rename = "intentChains", default)]
    pub intent_chains: Vec<IntentParam>,
    #[serde(rename = "queryVariable", default)]
    pub query_variable: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub instruction: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IntentParam {
    #[serde(rename = "intentId")]
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    #[serde(rename = "isDefault", default, skip_serializing_if = "std::ops::Not::not")]
    pub is_default: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IterationParam {
    #[serde(rename = "iteratorSelector", default, skip_serializing_if = "Option::is_none")]
    pub iterator_selector: Option<FlowRef>,
    #[serde(rename = "outputSelector", default, skip_serializing_if = "Option::is_none")]
    pub output_selector: Option<FlowRef>,
    #[serde(rename = "startNodeId", default, skip_serializing_if = "Option::is_none")]
    pub start_node_id: Option<String>,
    #[serde(rename = "isParallel", default)]
    pub is_parallel: bool,
    #[serde(rename = "parallelNums", default = "default_parallel_nums")]
    pub parallel_nums: u32,
    #[serde(rename = "errorHandleMode", default)]
    pub error_handle_mode: String,
    #[serde(rename = "outputType", default)]
    pub output_type: String,
}

fn default_parallel_nums() -> u32 {
    10
}

/// Decode a typed view out of `nodeParam`, tolerating absent fields.
pub fn param_view<T: Default + serde::de::DeserializeOwned>(param: &Map<String, Value>) -> T {
    serde_json::from_value(Value::Object(param.clone())).unwrap_or_default()
}
