// src/model.rs
//
// =============================================================================
// FLOWBRIDGE: UNIFIED MODEL
// =============================================================================
//
// The platform-agnostic intermediate representation.
//
// Design Principles:
// 1. One tagged config variant per node type; every dispatch site is an
//    exhaustive match, so adding a node type is a compile error until every
//    parser and generator handles it.
// 2. Platform-proprietary fields live in per-platform opaque maps, written
//    by that platform's parser and read only by that platform's generator.
// 3. Documents are immutable once parsed; generators build fresh
//    platform-native trees instead of mutating the model.

use crate::platforms::Platform;
use crate::types::DataType;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

// ============================================================================
// 1. DOCUMENT ENVELOPE
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub version: String,
    pub metadata: Metadata,
    /// Proprietary top-level fields, preserved verbatim for lossless
    /// round-trips into the same platform.
    pub platform_meta: PlatformMeta,
    pub workflow: Workflow,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Metadata {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub ui: UiHints,
}

/// Purely presentational hints. Never consulted by conversion logic.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UiHints {
    #[serde(default)]
    pub opening_statement: Option<String>,
    #[serde(default)]
    pub suggested_questions: Vec<String>,
    #[serde(default)]
    pub icon: Option<String>,
    #[serde(default)]
    pub icon_background: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "platform", content = "fields", rename_all = "lowercase")]
pub enum PlatformMeta {
    IFlytek(BTreeMap<String, Value>),
    Dify(BTreeMap<String, Value>),
    Coze(BTreeMap<String, Value>),
    None,
}

impl PlatformMeta {
    pub fn platform(&self) -> Option<Platform> {
        match self {
            PlatformMeta::IFlytek(_) => Some(Platform::IFlytek),
            PlatformMeta::Dify(_) => Some(Platform::Dify),
            PlatformMeta::Coze(_) => Some(Platform::Coze),
            PlatformMeta::None => None,
        }
    }

    /// The stashed fields, when they belong to `platform`.
    pub fn fields_for(&self, platform: Platform) -> Option<&BTreeMap<String, Value>> {
        match (self, platform) {
            (PlatformMeta::IFlytek(m), Platform::IFlytek) => Some(m),
            (PlatformMeta::Dify(m), Platform::Dify) => Some(m),
            (PlatformMeta::Coze(m), Platform::Coze) => Some(m),
            _ => None,
        }
    }
}

// ============================================================================
// 2. WORKFLOW GRAPH
// ============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Workflow {
    pub nodes: Vec<Node>,
    pub edges: Vec<Edge>,
    #[serde(default)]
    pub variables: Vec<GlobalVariable>,
    #[serde(default)]
    pub features: Features,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GlobalVariable {
    pub name: String,
    pub data_type: DataType,
    #[serde(default)]
    pub default: Option<Value>,
}

/// Opaque feature toggles carried through without interpretation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Features {
    #[serde(default)]
    pub file_upload: Option<Value>,
    #[serde(default)]
    pub speech_to_text: Option<Value>,
    #[serde(default)]
    pub text_to_speech: Option<Value>,
}

impl Workflow {
    pub fn node(&self, id: &str) -> Option<&Node> {
        self.nodes.iter().find(|n| n.id == id)
    }

    /// Lookup across this workflow and every nested iteration body.
    pub fn node_deep(&self, id: &str) -> Option<&Node> {
        for n in &self.nodes {
            if n.id == id {
                return Some(n);
            }
            if let NodeConfig::Iteration(it) = &n.config {
                if let Some(found) = it.body.node_deep(id) {
                    return Some(found);
                }
            }
        }
        None
    }

    pub fn start_node(&self) -> Option<&Node> {
        self.nodes
            .iter()
            .find(|n| matches!(n.config, NodeConfig::Start(_)))
    }

    pub fn end_nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes
            .iter()
            .filter(|n| matches!(n.config, NodeConfig::End(_)))
    }

    /// All node IDs, including nested iteration bodies.
    pub fn all_ids(&self) -> Vec<String> {
        let mut out = Vec::new();
        for n in &self.nodes {
            out.push(n.id.clone());
            if let NodeConfig::Iteration(it) = &n.config {
                out.extend(it.body.all_ids());
            }
        }
        out
    }

    /// Depth-first visit over every node, nested bodies included.
    pub fn visit_nodes<'a>(&'a self, f: &mut dyn FnMut(&'a Node)) {
        for n in &self.nodes {
            f(n);
            if let NodeConfig::Iteration(it) = &n.config {
                it.body.visit_nodes(f);
            }
        }
    }
}

// ============================================================================
// 3. NODES
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeType {
    Start,
    End,
    Llm,
    Code,
    Condition,
    Classifier,
    Iteration,
    /// Reserved sentinel for platform node types with no unified mapping.
    /// Carried through generation as a marker, never silently dropped.
    Unsupported,
}

impl fmt::Display for NodeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            NodeType::Start => "start",
            NodeType::End => "end",
            NodeType::Llm => "llm",
            NodeType::Code => "code",
            NodeType::Condition => "condition",
            NodeType::Classifier => "classifier",
            NodeType::Iteration => "iteration",
            NodeType::Unsupported => "unsupported",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Size {
    pub width: f64,
    pub height: f64,
}

impl Default for Size {
    fn default() -> Self {
        Self {
            width: 244.0,
            height: 118.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    /// Globally unique within the workflow and any nested sub-workflows.
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub position: Position,
    #[serde(default)]
    pub size: Size,
    #[serde(default)]
    pub inputs: Vec<Input>,
    #[serde(default)]
    pub outputs: Vec<Output>,
    pub config: NodeConfig,
    /// Set when this node lives inside an Iteration body.
    #[serde(default)]
    pub iteration_id: Option<String>,
    /// Opaque platform-native fields, keyed by platform.
    #[serde(default)]
    pub platform_config: PlatformConfigs,
}

impl Node {
    pub fn node_type(&self) -> NodeType {
        match &self.config {
            NodeConfig::Start(_) => NodeType::Start,
            NodeConfig::End(_) => NodeType::End,
            NodeConfig::Llm(_) => NodeType::Llm,
            NodeConfig::Code(_) => NodeType::Code,
            NodeConfig::Condition(_) => NodeType::Condition,
            NodeConfig::Classifier(_) => NodeType::Classifier,
            NodeConfig::Iteration(_) => NodeType::Iteration,
            NodeConfig::Unsupported(_) => NodeType::Unsupported,
        }
    }

    pub fn output(&self, name: &str) -> Option<&Output> {
        self.outputs.iter().find(|o| o.name == name)
    }

    pub fn input(&self, name: &str) -> Option<&Input> {
        self.inputs.iter().find(|i| i.name == name)
    }
}

/// Typed per-platform stash. Only the owning platform's generator consults
/// its slot; cross-platform consumers must never read these.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PlatformConfigs {
    #[serde(default)]
    pub iflytek: BTreeMap<String, Value>,
    #[serde(default)]
    pub dify: BTreeMap<String, Value>,
    #[serde(default)]
    pub coze: BTreeMap<String, Value>,
}

impl PlatformConfigs {
    pub fn get(&self, platform: Platform) -> &BTreeMap<String, Value> {
        match platform {
            Platform::IFlytek => &self.iflytek,
            Platform::Dify => &self.dify,
            Platform::Coze => &self.coze,
        }
    }

    pub fn get_mut(&mut self, platform: Platform) -> &mut BTreeMap<String, Value> {
        match platform {
            Platform::IFlytek => &mut self.iflytek,
            Platform::Dify => &mut self.dify,
            Platform::Coze => &mut self.coze,
        }
    }
}

// ============================================================================
// 4. PORTS & REFERENCES
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Input {
    /// Unique within the node.
    pub name: String,
    pub data_type: DataType,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub default: Option<Value>,
    #[serde(default)]
    pub reference: Option<VariableReference>,
    #[serde(default)]
    pub constraints: Option<Constraints>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Constraints {
    #[serde(default)]
    pub min_length: Option<u32>,
    #[serde(default)]
    pub max_length: Option<u32>,
    #[serde(default)]
    pub pattern: Option<String>,
    #[serde(default)]
    pub one_of: Vec<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Output {
    pub name: String,
    pub data_type: DataType,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub default: Option<Value>,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum VariableReference {
    /// A produced value on a named node's named output.
    NodeOutput {
        node_id: String,
        output_name: String,
        data_type: DataType,
    },
    /// An inline literal.
    Literal { value: Value, data_type: DataType },
    /// Raw template text in any of the three dialects, kept verbatim.
    Template { text: String },
}

impl VariableReference {
    pub fn node_output(node_id: impl Into<String>, output: impl Into<String>, t: DataType) -> Self {
        VariableReference::NodeOutput {
            node_id: node_id.into(),
            output_name: output.into(),
            data_type: t,
        }
    }

    pub fn literal(value: Value, data_type: DataType) -> Self {
        VariableReference::Literal { value, data_type }
    }
}

// ============================================================================
// 5. EDGES
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeType {
    Default,
    /// Leaves a multi-branch node; the source handle selects the branch.
    Conditional,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Edge {
    pub id: String,
    pub source: String,
    pub target: String,
    #[serde(default)]
    pub source_handle: Option<String>,
    #[serde(default)]
    pub target_handle: Option<String>,
    pub edge_type: EdgeType,
    #[serde(default)]
    pub platform_config: BTreeMap<String, Value>,
}

// ============================================================================
// 6. NODE CONFIG VARIANTS
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NodeConfig {
    Start(StartConfig),
    End(EndConfig),
    Llm(LlmConfig),
    Code(CodeConfig),
    Condition(ConditionConfig),
    Classifier(ClassifierConfig),
    Iteration(Box<IterationConfig>),
    Unsupported(UnsupportedConfig),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StartConfig {
    /// The variables this workflow exposes to its caller.
    pub variables: Vec<StartVariable>,
    /// Present when this is the entry of an iteration body.
    #[serde(default)]
    pub parent_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartVariable {
    pub name: String,
    #[serde(default)]
    pub label: Option<String>,
    pub data_type: DataType,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub default: Option<Value>,
    #[serde(default)]
    pub constraints: Option<Constraints>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndMode {
    Template,
    Variables,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndConfig {
    pub mode: EndMode,
    #[serde(default)]
    pub template: Option<String>,
    #[serde(default)]
    pub stream_output: bool,
    pub outputs: Vec<EndOutput>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndOutput {
    pub variable: String,
    /// `[node_id, output_name]` selector path.
    pub value_selector: Vec<String>,
    pub data_type: DataType,
    #[serde(default)]
    pub reference: Option<VariableReference>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModelConfig {
    pub provider: String,
    pub name: String,
    #[serde(default)]
    pub mode: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModelParameters {
    #[serde(default)]
    pub temperature: Option<f64>,
    #[serde(default)]
    pub max_tokens: Option<u32>,
    #[serde(default)]
    pub top_k: Option<u32>,
    #[serde(default)]
    pub top_p: Option<f64>,
    #[serde(default)]
    pub response_format: ResponseFormat,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseFormat {
    #[default]
    Text,
    Json,
    Markdown,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PromptConfig {
    #[serde(default)]
    pub system: Option<String>,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub messages: Vec<PromptMessage>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptMessage {
    pub role: String,
    pub text: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ContextConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub variable_selector: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    pub model: ModelConfig,
    #[serde(default)]
    pub parameters: ModelParameters,
    pub prompt: PromptConfig,
    #[serde(default)]
    pub context: ContextConfig,
    #[serde(default)]
    pub vision: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CodeLanguage {
    Python3,
    Javascript,
}

impl CodeLanguage {
    pub fn as_str(self) -> &'static str {
        match self {
            CodeLanguage::Python3 => "python3",
            CodeLanguage::Javascript => "javascript",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "python3" | "python" | "py" => Some(CodeLanguage::Python3),
            "javascript" | "js" | "nodejs" => Some(CodeLanguage::Javascript),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CodeConfig {
    pub language: CodeLanguage,
    /// Preserved byte-for-byte across every conversion.
    pub source: String,
    #[serde(default)]
    pub dependencies: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogicalOperator {
    And,
    Or,
}

impl LogicalOperator {
    pub fn as_str(self) -> &'static str {
        match self {
            LogicalOperator::And => "and",
            LogicalOperator::Or => "or",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "and" | "&&" => Some(LogicalOperator::And),
            "or" | "||" => Some(LogicalOperator::Or),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComparisonOperator {
    Equal,
    NotEqual,
    Contains,
    NotContains,
    StartsWith,
    EndsWith,
    GreaterThan,
    LessThan,
    GreaterOrEqual,
    LessOrEqual,
    Empty,
    NotEmpty,
}

impl ComparisonOperator {
    /// The canonical wire token shared by all three platforms.
    pub fn as_str(self) -> &'static str {
        match self {
            ComparisonOperator::Equal => "eq",
            ComparisonOperator::NotEqual => "ne",
            ComparisonOperator::Contains => "contains",
            ComparisonOperator::NotContains => "not_contains",
            ComparisonOperator::StartsWith => "start_with",
            ComparisonOperator::EndsWith => "end_with",
            ComparisonOperator::GreaterThan => "gt",
            ComparisonOperator::LessThan => "lt",
            ComparisonOperator::GreaterOrEqual => "ge",
            ComparisonOperator::LessOrEqual => "le",
            ComparisonOperator::Empty => "empty",
            ComparisonOperator::NotEmpty => "not_empty",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        use ComparisonOperator::*;
        match s.to_ascii_lowercase().as_str() {
            "eq" | "=" | "==" | "is" | "equal" => Some(Equal),
            "ne" | "!=" | "<>" | "is_not" | "not_equal" => Some(NotEqual),
            "contains" | "in" => Some(Contains),
            "not_contains" | "not contains" | "not_in" => Some(NotContains),
            "start_with" | "start with" | "starts_with" => Some(StartsWith),
            "end_with" | "end with" | "ends_with" => Some(EndsWith),
            "gt" | ">" => Some(GreaterThan),
            "lt" | "<" => Some(LessThan),
            "ge" | ">=" => Some(GreaterOrEqual),
            "le" | "<=" => Some(LessOrEqual),
            "empty" | "null" | "is_empty" => Some(Empty),
            "not_empty" | "not null" | "is_not_empty" => Some(NotEmpty),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Condition {
    /// `[node_id, output_name]` selector for the left operand.
    pub variable_selector: Vec<String>,
    pub comparison_operator: ComparisonOperator,
    #[serde(default)]
    pub value: String,
    #[serde(default)]
    pub var_type: DataType,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConditionCase {
    /// Unique within the node.
    pub case_id: String,
    /// Empty conditions denote the default branch.
    pub conditions: Vec<Condition>,
    pub logical_operator: LogicalOperator,
    /// Evaluation ordering; the default branch sorts last.
    pub level: u32,
}

impl ConditionCase {
    pub fn is_default(&self) -> bool {
        self.conditions.is_empty()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConditionConfig {
    pub cases: Vec<ConditionCase>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassDef {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub is_default: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassifierConfig {
    pub model: ModelConfig,
    #[serde(default)]
    pub parameters: ModelParameters,
    pub classes: Vec<ClassDef>,
    /// Name of the variable holding the text to classify.
    pub query_variable: String,
    /// Instruction text; may embed template references.
    #[serde(default)]
    pub instruction: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IteratorSource {
    pub input_type: DataType,
    pub source_node: String,
    pub source_output: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorHandleMode {
    Terminated,
    ContinueOnError,
}

impl Default for ErrorHandleMode {
    fn default() -> Self {
        ErrorHandleMode::Terminated
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IterationExecution {
    #[serde(default)]
    pub is_parallel: bool,
    #[serde(default = "default_parallel_nums")]
    pub parallel_nums: u32,
    #[serde(default)]
    pub error_handle_mode: ErrorHandleMode,
}

fn default_parallel_nums() -> u32 {
    10
}

impl Default for IterationExecution {
    fn default() -> Self {
        Self {
            is_parallel: false,
            parallel_nums: default_parallel_nums(),
            error_handle_mode: ErrorHandleMode::Terminated,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputSelector {
    pub node_id: String,
    pub output_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IterationConfig {
    pub iterator: IteratorSource,
    #[serde(default)]
    pub execution: IterationExecution,
    /// A full workflow embedded in the container node.
    pub body: Workflow,
    /// Which inner node produces the collected output. `None` when the
    /// body's End node decides (or the body is empty).
    #[serde(default)]
    pub output_selector: Option<OutputSelector>,
    #[serde(default)]
    pub output_type: DataType,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnsupportedConfig {
    /// The platform's own tag for this node.
    pub platform_type: String,
    /// The untouched platform payload, for diagnostics.
    #[serde(default)]
    pub raw: Value,
}
