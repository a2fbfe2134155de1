// src/platforms/coze/parser.rs
//
// =============================================================================
// FLOWBRIDGE: COZE PARSER
// =============================================================================
//
// Lifts a Coze export (bare YAML or zip-packed) into the unified model.
// Loop containers embed their internals as `blocks`; those fold directly
// into the iteration body, which on Coze has no synthetic entry node.

use super::{
    inputs_view, CozeBlockRef, CozeBranch, CozeDocument, CozeEdge, CozeIntent, CozeLlmParam,
    CozeNode, CozeParam,
};
use crate::archive;
use crate::convert::PlatformParser;
use crate::error::{ConvertError, Location, Result, Warnings};
use crate::model::*;
use crate::platforms::Platform;
use crate::types::DataType;
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashSet;

pub struct CozeParser;

impl PlatformParser for CozeParser {
    fn parse(&self, bytes: &[u8], warnings: &mut Warnings) -> Result<Document> {
        // --- Phase 1: decode (zip framing first) ---
        let payload;
        let bytes = if archive::is_zip(bytes) {
            payload = archive::extract_descriptor(bytes)?;
            payload.as_slice()
        } else {
            bytes
        };

        let text = std::str::from_utf8(bytes)
            .map_err(|e| ConvertError::input(Platform::Coze, format!("not UTF-8: {e}")))?;
        let raw: serde_yaml::Value = serde_yaml::from_str(text)
            .map_err(|e| ConvertError::input(Platform::Coze, format!("malformed YAML: {e}")))?;

        // --- Phase 2: schema peel ---
        let mapping = raw
            .as_mapping()
            .ok_or_else(|| ConvertError::input(Platform::Coze, "top level is not a mapping"))?;
        if !mapping.contains_key(&serde_yaml::Value::from("schema")) {
            return Err(ConvertError::schema("missing required top-level key 'schema'"));
        }
        let coze: CozeDocument = serde_yaml::from_value(raw)
            .map_err(|e| ConvertError::input(Platform::Coze, format!("bad shape: {e}")))?;
        if coze.schema.nodes.is_empty() {
            return Err(ConvertError::schema("schema.nodes is empty"));
        }

        // --- Phases 3-6 ---
        let mut seen_ids = HashSet::new();
        let workflow = lift_workflow(
            &coze.schema.nodes,
            &coze.schema.edges,
            None,
            &mut seen_ids,
            warnings,
        )?;

        let mut meta_fields = std::collections::BTreeMap::new();
        if let Some(id) = &coze.workflow_id {
            meta_fields.insert("workflow_id".to_string(), Value::from(id.clone()));
        }

        Ok(Document {
            version: "1.0.0".to_string(),
            metadata: Metadata {
                name: coze.name.clone().unwrap_or_default(),
                description: coze.description.clone().unwrap_or_default(),
                created_at: None,
                updated_at: None,
                ui: UiHints::default(),
            },
            platform_meta: PlatformMeta::Coze(meta_fields),
            workflow,
        })
    }
}

// ============================================================================
// 1. TYPED PAYLOAD VIEWS
// ============================================================================

#[derive(Debug, Default, Deserialize)]
struct LlmView {
    #[serde(rename = "llmParam", default)]
    llm_param: CozeLlmParam,
}

#[derive(Debug, Default, Deserialize)]
struct CodeView {
    #[serde(default)]
    code: String,
    #[serde(default)]
    language: String,
}

#[derive(Debug, Default, Deserialize)]
struct EndView {
    #[serde(rename = "terminatePlan", default)]
    terminate_plan: String,
    #[serde(default)]
    content: String,
    #[serde(rename = "streamingOutput", default)]
    streaming_output: bool,
}

#[derive(Debug, Default, Deserialize)]
struct ConditionView {
    #[serde(default)]
    branches: Vec<CozeBranch>,
}

#[derive(Debug, Default, Deserialize)]
struct ClassifierView {
    #[serde(default)]
    intents: Vec<CozeIntent>,
    #[serde(rename = "queryVariable", default)]
    query_variable: String,
    #[serde(default)]
    instruction: String,
    #[serde(rename = "llmParam", default)]
    llm_param: CozeLlmParam,
}

#[derive(Debug, Default, Deserialize)]
struct LoopView {
    #[serde(rename = "loopOutput", default)]
    loop_output: Option<CozeBlockRef>,
    #[serde(default)]
    parallel: bool,
    #[serde(rename = "parallelSize", default = "default_parallel_size")]
    parallel_size: u32,
    #[serde(rename = "errorMode", default)]
    error_mode: String,
    #[serde(rename = "outputType", default)]
    output_type: String,
}

fn default_parallel_size() -> u32 {
    10
}

// ============================================================================
// 2. WORKFLOW LIFTING
// ============================================================================

fn lift_workflow(
    nodes: &[CozeNode],
    edges: &[CozeEdge],
    iteration_id: Option<&str>,
    seen_ids: &mut HashSet<String>,
    warnings: &mut Warnings,
) -> Result<Workflow> {
    let mut out_nodes = Vec::with_capacity(nodes.len());
    for node in nodes {
        if !seen_ids.insert(node.id.clone()) {
            return Err(ConvertError::schema_at(
                format!("duplicate node id '{}'", node.id),
                Location::node(node.id.clone()),
            ));
        }
        out_nodes.push(lift_node(node, iteration_id, seen_ids, warnings)?);
    }

    let out_edges = edges
        .iter()
        .enumerate()
        .map(|(i, e)| Edge {
            id: format!("edge-{i}-{}-{}", e.source, e.target),
            source: e.source.clone(),
            target: e.target.clone(),
            source_handle: e.source_port.clone(),
            target_handle: None,
            edge_type: if e.source_port.is_some() {
                EdgeType::Conditional
            } else {
                EdgeType::Default
            },
            platform_config: Default::default(),
        })
        .collect();

    Ok(Workflow {
        nodes: out_nodes,
        edges: out_edges,
        variables: Vec::new(),
        features: Features::default(),
    })
}

// ============================================================================
// 3. NODE DISPATCH
// ============================================================================

fn lift_node(
    node: &CozeNode,
    iteration_id: Option<&str>,
    seen_ids: &mut HashSet<String>,
    warnings: &mut Warnings,
) -> Result<Node> {
    let inputs = lift_inputs(node);
    let outputs = lift_outputs(node);

    let (config, outputs) = match Platform::Coze.node_type_from_token(&node.node_type) {
        Some(NodeType::Start) => (lift_start(&outputs, iteration_id), outputs),
        Some(NodeType::End) => (lift_end(node, &inputs), outputs),
        Some(NodeType::Llm) => lift_llm(node, outputs),
        Some(NodeType::Code) => (lift_code(node)?, outputs),
        Some(NodeType::Condition) => (lift_condition(node)?, outputs),
        Some(NodeType::Classifier) => lift_classifier(node, outputs),
        Some(NodeType::Iteration) => (
            lift_loop(node, seen_ids, warnings)?,
            outputs,
        ),
        Some(NodeType::Unsupported) | None => {
            warnings.push_at(
                "unsupported-node",
                format!(
                    "node type '{}' has no unified mapping; kept as placeholder",
                    node.node_type
                ),
                Some(node.id.clone()),
            );
            (
                NodeConfig::Unsupported(UnsupportedConfig {
                    platform_type: node.node_type.clone(),
                    raw: serde_json::to_value(&node.data).unwrap_or(Value::Null),
                }),
                outputs,
            )
        }
    };

    Ok(Node {
        id: node.id.clone(),
        title: node.data.node_meta.title.clone(),
        description: node.data.node_meta.description.clone(),
        position: Position {
            x: node.meta.position.x,
            y: node.meta.position.y,
        },
        size: Size::default(),
        inputs,
        outputs,
        config,
        iteration_id: iteration_id.map(str::to_string),
        platform_config: PlatformConfigs::default(),
    })
}

// ============================================================================
// 4. PORT & REFERENCE LIFTING
// ============================================================================

fn lift_inputs(node: &CozeNode) -> Vec<Input> {
    let Some(inputs) = &node.data.inputs else {
        return Vec::new();
    };
    inputs.input_parameters.iter().map(lift_param).collect()
}

fn lift_param(param: &CozeParam) -> Input {
    let data_type = DataType::from_platform(Platform::Coze, &param.input.data_type);
    let reference = param.input.value.as_ref().and_then(|v| {
        if let Some(r) = v.as_block_ref() {
            Some(VariableReference::NodeOutput {
                node_id: r.block_id,
                output_name: r.name,
                data_type,
            })
        } else if v.kind == "literal" {
            Some(VariableReference::Literal {
                value: v.content.clone(),
                data_type,
            })
        } else {
            None
        }
    });
    Input {
        name: param.name.clone(),
        data_type,
        required: false,
        default: None,
        reference,
        constraints: None,
    }
}

fn lift_outputs(node: &CozeNode) -> Vec<Output> {
    node.data
        .outputs
        .iter()
        .map(|o| Output {
            name: o.name.clone(),
            data_type: DataType::from_platform(Platform::Coze, &o.data_type),
            required: o.required,
            default: None,
            description: String::new(),
        })
        .collect()
}

// ============================================================================
// 5. PER-TYPE SUB-PARSERS
// ============================================================================

fn lift_start(outputs: &[Output], iteration_id: Option<&str>) -> NodeConfig {
    NodeConfig::Start(StartConfig {
        variables: outputs
            .iter()
            .map(|o| StartVariable {
                name: o.name.clone(),
                label: None,
                data_type: o.data_type,
                required: o.required,
                default: o.default.clone(),
                constraints: None,
            })
            .collect(),
        parent_id: iteration_id.map(str::to_string),
    })
}

fn lift_end(node: &CozeNode, inputs: &[Input]) -> NodeConfig {
    let view: EndView = inputs_view(&node.data.inputs);

    let outputs = inputs
        .iter()
        .map(|input| {
            let value_selector = match &input.reference {
                Some(VariableReference::NodeOutput {
                    node_id,
                    output_name,
                    ..
                }) => vec![node_id.clone(), output_name.clone()],
                _ => Vec::new(),
            };
            EndOutput {
                variable: input.name.clone(),
                value_selector,
                data_type: input.data_type,
                reference: input.reference.clone(),
            }
        })
        .collect();

    let is_template = view.terminate_plan == "useAnswerContent" || !view.content.is_empty();
    NodeConfig::End(EndConfig {
        mode: if is_template {
            EndMode::Template
        } else {
            EndMode::Variables
        },
        template: (!view.content.is_empty()).then(|| view.content.clone()),
        stream_output: view.streaming_output,
        outputs,
    })
}

fn lift_llm(node: &CozeNode, outputs: Vec<Output>) -> (NodeConfig, Vec<Output>) {
    let view: LlmView = inputs_view(&node.data.inputs);
    let p = view.llm_param;

    let config = LlmConfig {
        model: ModelConfig {
            provider: if p.provider.is_empty() {
                "coze".to_string()
            } else {
                p.provider.clone()
            },
            name: p.model_name.clone(),
            mode: "chat".to_string(),
        },
        parameters: ModelParameters {
            temperature: p.temperature,
            max_tokens: p.max_tokens,
            top_k: p.top_k,
            top_p: p.top_p,
            response_format: match p.response_format.as_str() {
                "json" | "JSON" => ResponseFormat::Json,
                "markdown" => ResponseFormat::Markdown,
                _ => ResponseFormat::Text,
            },
        },
        prompt: PromptConfig {
            system: (!p.system_prompt.is_empty()).then(|| p.system_prompt.clone()),
            user: (!p.prompt.is_empty()).then(|| p.prompt.clone()),
            messages: Vec::new(),
        },
        context: ContextConfig::default(),
        vision: false,
    };

    let outputs = if outputs.is_empty() {
        vec![Output {
            name: "output".to_string(),
            data_type: DataType::String,
            required: true,
            default: None,
            description: String::new(),
        }]
    } else {
        outputs
    };

    (NodeConfig::Llm(config), outputs)
}

fn lift_code(node: &CozeNode) -> Result<NodeConfig> {
    let view: CodeView = inputs_view(&node.data.inputs);

    if view.code.trim().is_empty() {
        return Err(ConvertError::schema_at(
            "code node without source text",
            Location::field(node.id.clone(), "inputs.code"),
        ));
    }

    Ok(NodeConfig::Code(CodeConfig {
        language: CodeLanguage::parse(&view.language).unwrap_or(CodeLanguage::Python3),
        source: view.code,
        dependencies: Vec::new(),
    }))
}

fn lift_condition(node: &CozeNode) -> Result<NodeConfig> {
    let view: ConditionView = inputs_view(&node.data.inputs);

    let mut cases = Vec::with_capacity(view.branches.len());
    for (i, branch) in view.branches.iter().enumerate() {
        let mut conditions = Vec::with_capacity(branch.conditions.len());
        for cond in &branch.conditions {
            let comparison_operator =
                ComparisonOperator::parse(&cond.operator).ok_or_else(|| {
                    ConvertError::schema_at(
                        format!("unknown condition operator '{}'", cond.operator),
                        Location::field(node.id.clone(), "inputs.branches"),
                    )
                })?;
            conditions.push(Condition {
                variable_selector: vec![cond.left.block_id.clone(), cond.left.name.clone()],
                comparison_operator,
                value: cond.right.clone(),
                var_type: DataType::from_platform(Platform::Coze, &cond.var_type),
            });
        }
        cases.push(ConditionCase {
            case_id: if branch.branch_id.is_empty() {
                format!("branch_{}", i + 1)
            } else {
                branch.branch_id.clone()
            },
            conditions,
            logical_operator: LogicalOperator::parse(&branch.logic)
                .unwrap_or(LogicalOperator::And),
            level: if branch.level == 0 {
                (i + 1) as u32
            } else {
                branch.level
            },
        });
    }

    Ok(NodeConfig::Condition(ConditionConfig { cases }))
}

fn lift_classifier(node: &CozeNode, outputs: Vec<Output>) -> (NodeConfig, Vec<Output>) {
    let view: ClassifierView = inputs_view(&node.data.inputs);

    let classes = view
        .intents
        .iter()
        .enumerate()
        .map(|(i, intent)| ClassDef {
            id: if intent.id.is_empty() {
                (i + 1).to_string()
            } else {
                intent.id.clone()
            },
            name: intent.name.clone(),
            description: intent.description.clone(),
            is_default: intent.is_default,
        })
        .collect();

    let config = ClassifierConfig {
        model: ModelConfig {
            provider: "coze".to_string(),
            name: view.llm_param.model_name.clone(),
            mode: "chat".to_string(),
        },
        parameters: ModelParameters::default(),
        classes,
        query_variable: if view.query_variable.is_empty() {
            "query".to_string()
        } else {
            view.query_variable.clone()
        },
        instruction: view.instruction.clone(),
    };

    let outputs = if outputs.is_empty() {
        vec![Output {
            name: "class_name".to_string(),
            data_type: DataType::String,
            required: true,
            default: None,
            description: String::new(),
        }]
    } else {
        outputs
    };

    (NodeConfig::Classifier(config), outputs)
}

fn lift_loop(
    node: &CozeNode,
    seen_ids: &mut HashSet<String>,
    warnings: &mut Warnings,
) -> Result<NodeConfig> {
    let view: LoopView = inputs_view(&node.data.inputs);

    let body = lift_workflow(&node.blocks, &node.edges, Some(&node.id), seen_ids, warnings)?;

    // The iterated collection arrives through the "input" parameter.
    let iterator = node
        .data
        .inputs
        .as_ref()
        .and_then(|i| {
            i.input_parameters
                .iter()
                .find(|p| p.name == "input")
                .or_else(|| i.input_parameters.first())
        })
        .and_then(|p| p.input.value.as_ref())
        .and_then(|v| v.as_block_ref())
        .map(|r| IteratorSource {
            input_type: DataType::ArrayString,
            source_node: r.block_id,
            source_output: r.name,
        })
        .ok_or_else(|| {
            ConvertError::schema_at(
                "loop without an input collection reference",
                Location::field(node.id.clone(), "inputs.inputParameters"),
            )
        })?;

    let output_selector = view
        .loop_output
        .as_ref()
        .map(|r| OutputSelector {
            node_id: r.block_id.clone(),
            output_name: r.name.clone(),
        })
        .or_else(|| {
            // Containers may instead point an output's value at a block.
            node.data.outputs.iter().find_map(|o| {
                o.value
                    .as_ref()
                    .and_then(|v| v.as_block_ref())
                    .map(|r| OutputSelector {
                        node_id: r.block_id,
                        output_name: r.name,
                    })
            })
        });

    Ok(NodeConfig::Iteration(Box::new(IterationConfig {
        iterator,
        execution: IterationExecution {
            is_parallel: view.parallel,
            parallel_nums: view.parallel_size,
            error_handle_mode: match view.error_mode.as_str() {
                "continue" | "continue_on_error" => ErrorHandleMode::ContinueOnError,
                _ => ErrorHandleMode::Terminated,
            },
        },
        body,
        output_selector,
        output_type: if view.output_type.is_empty() {
            DataType::ArrayString
        } else {
            DataType::from_platform(Platform::Coze, &view.output_type)
        },
    })))
}
