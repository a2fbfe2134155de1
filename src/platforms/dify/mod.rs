// src/platforms/dify/mod.rs
//
// =============================================================================
// FLOWBRIDGE: DIFY SCHEMA
// =============================================================================
//
// Wire types for the Dify app DSL (`app` / `workflow` / `kind`). The graph
// is flat: iteration internals are top-level nodes pointing at their
// container via `parentId`, anchored by a synthetic `custom-iteration-start`
// child. Node IDs are 13-digit numeric strings; templates speak the
// addressed `{{#nodeId.field#}}` dialect.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

mod generator;
mod parser;

pub use generator::{ClassifierHandleStyle, DifyGenerator};
pub use parser::DifyParser;

/// DSL version this generator emits.
pub const DSL_VERSION: &str = "0.1.5";

/// Documented fallback when a source model has no Dify provider mapping.
pub const DEFAULT_PROVIDER: &str = "langgenius/openai/openai";
pub const DEFAULT_MODEL: &str = "gpt-4o";

/// Decoration appended to the default classifier class's display name.
pub const DEFAULT_CLASS_SUFFIX: &str = "(默认)";

/// UI node kinds.
pub const UI_TYPE_CUSTOM: &str = "custom";
pub const UI_TYPE_ITERATION_START: &str = "custom-iteration-start";

// ============================================================================
// 1. ENVELOPE
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DifyDocument {
    pub app: DifyApp,
    pub kind: String,
    pub version: String,
    pub workflow: DifyWorkflow,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DifyApp {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub icon: String,
    #[serde(default)]
    pub icon_background: String,
    #[serde(default)]
    pub mode: String,
    #[serde(default)]
    pub use_icon_as_answer_icon: bool,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DifyWorkflow {
    #[serde(default)]
    pub conversation_variables: Vec<Value>,
    #[serde(default)]
    pub environment_variables: Vec<Value>,
    #[serde(default)]
    pub features: Map<String, Value>,
    pub graph: DifyGraph,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DifyGraph {
    #[serde(default)]
    pub nodes: Vec<DifyNode>,
    #[serde(default)]
    pub edges: Vec<DifyEdge>,
}

// ============================================================================
// 2. NODES
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DifyNode {
    pub id: String,
    /// `custom` or `custom-iteration-start`.
    #[serde(rename = "type", default = "default_ui_type")]
    pub ui_type: String,
    pub data: DifyNodeData,
    #[serde(default)]
    pub position: DifyPosition,
    #[serde(
        rename = "positionAbsolute",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub position_absolute: Option<DifyPosition>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<f64>,
    #[serde(rename = "parentId", default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    /// `parent` on iteration internals.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extent: Option<String>,
    #[serde(rename = "zIndex", default, skip_serializing_if = "Option::is_none")]
    pub z_index: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub draggable: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selectable: Option<bool>,
    #[serde(rename = "sourcePosition", default = "default_source_position")]
    pub source_position: String,
    #[serde(rename = "targetPosition", default = "default_target_position")]
    pub target_position: String,
}

fn default_ui_type() -> String {
    UI_TYPE_CUSTOM.to_string()
}
fn default_source_position() -> String {
    "right".to_string()
}
fn default_target_position() -> String {
    "left".to_string()
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct DifyPosition {
    #[serde(default)]
    pub x: f64,
    #[serde(default)]
    pub y: f64,
}

/// Node payload: the type tag, titles, nesting flags, and an open map for
/// the per-type fields (`variables`, `model`, `cases`, ...).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DifyNodeData {
    #[serde(rename = "type")]
    pub node_type: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub desc: String,
    #[serde(default)]
    pub selected: bool,
    #[serde(
        rename = "isInIteration",
        default,
        skip_serializing_if = "std::ops::Not::not"
    )]
    pub is_in_iteration: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iteration_id: Option<String>,
    #[serde(flatten)]
    pub rest: Map<String, Value>,
}

// ============================================================================
// 3. EDGES
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DifyEdge {
    pub id: String,
    pub source: String,
    pub target: String,
    #[serde(rename = "sourceHandle", default = "default_handle_source")]
    pub source_handle: String,
    #[serde(rename = "targetHandle", default = "default_handle_target")]
    pub target_handle: String,
    #[serde(rename = "type", default = "default_edge_type")]
    pub edge_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<DifyEdgeData>,
    #[serde(rename = "zIndex", default, skip_serializing_if = "Option::is_none")]
    pub z_index: Option<i64>,
}

fn default_handle_source() -> String {
    "source".to_string()
}
fn default_handle_target() -> String {
    "target".to_string()
}
fn default_edge_type() -> String {
    "custom".to_string()
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DifyEdgeData {
    #[serde(rename = "sourceType", default)]
    pub source_type: String,
    #[serde(rename = "targetType", default)]
    pub target_type: String,
    #[serde(rename = "isInIteration", default)]
    pub is_in_iteration: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iteration_id: Option<String>,
}

// ============================================================================
// 4. TYPED DATA VIEWS
// ============================================================================
//
// Per-type views over `DifyNodeData.rest`, shared by parser and generator.

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StartView {
    #[serde(default)]
    pub variables: Vec<DifyStartVar>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DifyStartVar {
    pub variable: String,
    #[serde(default)]
    pub label: String,
    /// Form control: `text-input`, `number`, `paragraph`, `select`.
    #[serde(rename = "type", default)]
    pub form_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_length: Option<u32>,
    #[serde(default)]
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EndView {
    #[serde(default)]
    pub outputs: Vec<DifyEndOutput>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DifyEndOutput {
    pub variable: String,
    pub value_selector: Vec<String>,
    #[serde(default)]
    pub value_type: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DifyModel {
    #[serde(default)]
    pub provider: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub mode: String,
    #[serde(default)]
    pub completion_params: Map<String, Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LlmView {
    #[serde(default)]
    pub model: DifyModel,
    #[serde(default)]
    pub prompt_template: Vec<DifyPromptItem>,
    #[serde(default)]
    pub context: DifyContext,
    #[serde(default)]
    pub vision: DifyVision,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DifyPromptItem {
    #[serde(default)]
    pub role: String,
    #[serde(default)]
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DifyContext {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub variable_selector: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DifyVision {
    #[serde(default)]
    pub enabled: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CodeView {
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub code_language: String,
    #[serde(default)]
    pub variables: Vec<DifyCodeVariable>,
    #[serde(default)]
    pub outputs: Map<String, Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DifyCodeVariable {
    pub variable: String,
    pub value_selector: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConditionView {
    #[serde(default)]
    pub cases: Vec<DifyCase>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DifyCase {
    pub case_id: String,
    #[serde(default)]
    pub logical_operator: String,
    #[serde(default)]
    pub conditions: Vec<DifyCondition>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DifyCondition {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub variable_selector: Vec<String>,
    #[serde(default)]
    pub comparison_operator: String,
    #[serde(default)]
    pub value: String,
    #[serde(rename = "varType", default, skip_serializing_if = "String::is_empty")]
    pub var_type: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClassifierView {
    #[serde(default)]
    pub model: DifyModel,
    #[serde(default)]
    pub classes: Vec<DifyClass>,
    #[serde(default)]
    pub query_variable_selector: Vec<String>,
    #[serde(default)]
    pub instruction: String,
    #[serde(default)]
    pub instructions: String,
    #[serde(default)]
    pub topics: Vec<Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DifyClass {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IterationView {
    #[serde(default)]
    pub iterator_selector: Vec<String>,
    #[serde(default)]
    pub output_selector: Vec<String>,
    #[serde(default)]
    pub output_type: String,
    #[serde(default)]
    pub is_parallel: bool,
    #[serde(default = "default_parallel_nums")]
    pub parallel_nums: u32,
    #[serde(default)]
    pub error_handle_mode: String,
    #[serde(default)]
    pub start_node_id: String,
}

fn default_parallel_nums() -> u32 {
    10
}

/// Decode a typed view out of a node's open data map.
pub fn data_view<T: Default + serde::de::DeserializeOwned>(data: &DifyNodeData) -> T {
    serde_json::from_value(Value::Object(data.rest.clone())).unwrap_or_default()
}
