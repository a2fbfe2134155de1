// src/platforms/dify/parser.rs
//
// =============================================================================
// FLOWBRIDGE: DIFY PARSER
// =============================================================================
//
// Lifts the flat Dify graph into the nested unified model: iteration
// internals (nodes carrying `parentId`) are folded back into their
// container's body, with the synthetic `custom-iteration-start` child
// becoming the body's Start node.

use super::{
    data_view, ClassifierView, CodeView, ConditionView, DifyDocument, DifyEdge, DifyModel,
    DifyNode, EndView, IterationView, LlmView, StartView, DEFAULT_CLASS_SUFFIX,
    UI_TYPE_ITERATION_START,
};
use crate::convert::PlatformParser;
use crate::error::{ConvertError, Location, Result, Warnings};
use crate::model::*;
use crate::platforms::Platform;
use crate::types::DataType;
use serde_json::Value;
use std::collections::{HashMap, HashSet};

pub struct DifyParser;

impl PlatformParser for DifyParser {
    fn parse(&self, bytes: &[u8], warnings: &mut Warnings) -> Result<Document> {
        // --- Phase 1: decode ---
        let text = std::str::from_utf8(bytes)
            .map_err(|e| ConvertError::input(Platform::Dify, format!("not UTF-8: {e}")))?;
        let raw: serde_yaml::Value = serde_yaml::from_str(text)
            .map_err(|e| ConvertError::input(Platform::Dify, format!("malformed YAML: {e}")))?;

        // --- Phase 2: schema peel ---
        let mapping = raw
            .as_mapping()
            .ok_or_else(|| ConvertError::input(Platform::Dify, "top level is not a mapping"))?;
        for key in ["app", "kind", "workflow"] {
            if !mapping.contains_key(&serde_yaml::Value::from(key)) {
                return Err(ConvertError::schema(format!(
                    "missing required top-level key '{key}'"
                )));
            }
        }
        let dify: DifyDocument = serde_yaml::from_value(raw)
            .map_err(|e| ConvertError::input(Platform::Dify, format!("bad shape: {e}")))?;
        if dify.kind != "app" {
            return Err(ConvertError::schema(format!(
                "kind must be 'app', found '{}'",
                dify.kind
            )));
        }
        if dify.workflow.graph.nodes.is_empty() {
            return Err(ConvertError::schema("workflow.graph.nodes is empty"));
        }

        // --- Phases 3-6 ---
        let workflow = lift_graph(&dify, warnings)?;

        let features = &dify.workflow.features;
        let metadata = Metadata {
            name: dify.app.name.clone(),
            description: dify.app.description.clone(),
            created_at: None,
            updated_at: None,
            ui: UiHints {
                opening_statement: features
                    .get("opening_statement")
                    .and_then(Value::as_str)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string),
                suggested_questions: features
                    .get("suggested_questions")
                    .and_then(Value::as_array)
                    .map(|a| {
                        a.iter()
                            .filter_map(Value::as_str)
                            .map(str::to_string)
                            .collect()
                    })
                    .unwrap_or_default(),
                icon: Some(dify.app.icon.clone()).filter(|s| !s.is_empty()),
                icon_background: Some(dify.app.icon_background.clone()).filter(|s| !s.is_empty()),
            },
        };

        let mut meta_fields = dify.app.extra.clone();
        meta_fields.insert("mode".to_string(), Value::from(dify.app.mode.clone()));

        Ok(Document {
            version: dify.version.clone(),
            metadata,
            platform_meta: PlatformMeta::Dify(meta_fields),
            workflow,
        })
    }
}

// ============================================================================
// 1. GRAPH RECONSTRUCTION
// ============================================================================

fn lift_graph(dify: &DifyDocument, warnings: &mut Warnings) -> Result<Workflow> {
    let graph = &dify.workflow.graph;

    // Duplicate-ID check across the flat list.
    let mut seen = HashSet::new();
    for n in &graph.nodes {
        if !seen.insert(n.id.as_str()) {
            return Err(ConvertError::schema_at(
                format!("duplicate node id '{}'", n.id),
                Location::node(n.id.clone()),
            ));
        }
    }

    // Members of each iteration container, in document order.
    let mut members: HashMap<&str, Vec<&DifyNode>> = HashMap::new();
    for n in &graph.nodes {
        if let Some(parent) = &n.parent_id {
            members.entry(parent.as_str()).or_default().push(n);
        }
    }
    let member_ids: HashSet<&str> = graph
        .nodes
        .iter()
        .filter(|n| n.parent_id.is_some())
        .map(|n| n.id.as_str())
        .collect();

    // Edges split between the top level and the bodies they belong to.
    let mut body_edges: HashMap<&str, Vec<&DifyEdge>> = HashMap::new();
    let mut top_edges: Vec<&DifyEdge> = Vec::new();
    for e in &graph.edges {
        if member_ids.contains(e.source.as_str()) && member_ids.contains(e.target.as_str()) {
            let owner = graph
                .nodes
                .iter()
                .find(|n| n.id == e.source)
                .and_then(|n| n.parent_id.as_deref())
                .unwrap_or_default();
            body_edges.entry(owner).or_default().push(e);
        } else {
            top_edges.push(e);
        }
    }

    let mut nodes = Vec::new();
    for n in &graph.nodes {
        if n.parent_id.is_some() {
            continue; // folded into its container below
        }
        let body = members.get(n.id.as_str()).cloned().unwrap_or_default();
        let edges = body_edges.get(n.id.as_str()).cloned().unwrap_or_default();
        nodes.push(lift_node(n, &body, &edges, None, warnings)?);
    }

    let edges = top_edges
        .iter()
        .map(|e| lift_edge(e))
        .collect();

    let features = Features {
        file_upload: dify.workflow.features.get("file_upload").cloned(),
        speech_to_text: dify.workflow.features.get("speech_to_text").cloned(),
        text_to_speech: dify.workflow.features.get("text_to_speech").cloned(),
    };

    let variables = dify
        .workflow
        .environment_variables
        .iter()
        .filter_map(|v| {
            Some(GlobalVariable {
                name: v.get("name")?.as_str()?.to_string(),
                data_type: DataType::from_platform(
                    Platform::Dify,
                    v.get("value_type").and_then(Value::as_str).unwrap_or(""),
                ),
                default: v.get("value").cloned(),
            })
        })
        .collect();

    Ok(Workflow {
        nodes,
        edges,
        variables,
        features,
    })
}

fn lift_edge(edge: &DifyEdge) -> Edge {
    let source_handle = match edge.source_handle.as_str() {
        "source" | "" => None,
        other => Some(other.to_string()),
    };
    Edge {
        id: edge.id.clone(),
        source: edge.source.clone(),
        target: edge.target.clone(),
        edge_type: if source_handle.is_some() {
            EdgeType::Conditional
        } else {
            EdgeType::Default
        },
        source_handle,
        target_handle: match edge.target_handle.as_str() {
            "target" | "" => None,
            other => Some(other.to_string()),
        },
        platform_config: Default::default(),
    }
}

// ============================================================================
// 2. NODE DISPATCH
// ============================================================================

fn lift_node(
    node: &DifyNode,
    body: &[&DifyNode],
    body_edges: &[&DifyEdge],
    iteration_id: Option<&str>,
    warnings: &mut Warnings,
) -> Result<Node> {
    let token = node.data.node_type.as_str();

    let is_iteration_entry =
        node.ui_type == UI_TYPE_ITERATION_START || token == "iteration-start";

    let (config, inputs, outputs) = if is_iteration_entry {
        (
            NodeConfig::Start(StartConfig {
                variables: Vec::new(),
                parent_id: node.parent_id.clone(),
            }),
            Vec::new(),
            Vec::new(),
        )
    } else {
        match Platform::Dify.node_type_from_token(token) {
            Some(NodeType::Start) => lift_start(node),
            Some(NodeType::End) => lift_end(node),
            Some(NodeType::Llm) => lift_llm(node),
            Some(NodeType::Code) => lift_code(node, warnings)?,
            Some(NodeType::Condition) => lift_condition(node)?,
            Some(NodeType::Classifier) => lift_classifier(node),
            Some(NodeType::Iteration) => lift_iteration(node, body, body_edges, warnings)?,
            Some(NodeType::Unsupported) | None => {
                warnings.push_at(
                    "unsupported-node",
                    format!("node type '{token}' has no unified mapping; kept as placeholder"),
                    Some(node.id.clone()),
                );
                (
                    NodeConfig::Unsupported(UnsupportedConfig {
                        platform_type: token.to_string(),
                        raw: Value::Object(node.data.rest.clone()),
                    }),
                    Vec::new(),
                    Vec::new(),
                )
            }
        }
    };

    let mut lifted = Node {
        id: node.id.clone(),
        title: node.data.title.clone(),
        description: node.data.desc.clone(),
        position: Position {
            x: node.position.x,
            y: node.position.y,
        },
        size: Size {
            width: node.width.unwrap_or(244.0),
            height: node.height.unwrap_or(118.0),
        },
        inputs,
        outputs,
        config,
        iteration_id: node
            .data
            .iteration_id
            .clone()
            .or_else(|| iteration_id.map(str::to_string)),
        platform_config: PlatformConfigs::default(),
    };

    if !node.data.rest.is_empty() {
        lifted
            .platform_config
            .get_mut(Platform::Dify)
            .insert("data".to_string(), Value::Object(node.data.rest.clone()));
    }

    Ok(lifted)
}

type Lifted = (NodeConfig, Vec<Input>, Vec<Output>);

// ============================================================================
// 3. PER-TYPE SUB-PARSERS
// ============================================================================

fn lift_start(node: &DifyNode) -> Lifted {
    let view: StartView = data_view(&node.data);

    let mut variables = Vec::new();
    let mut outputs = Vec::new();
    for v in &view.variables {
        let data_type = match v.form_type.as_str() {
            "number" => DataType::Number,
            // text-input, paragraph, select all carry strings.
            _ => DataType::String,
        };
        let constraints = (v.max_length.is_some() || !v.options.is_empty()).then(|| Constraints {
            max_length: v.max_length,
            one_of: v.options.iter().map(|o| Value::from(o.clone())).collect(),
            ..Default::default()
        });
        variables.push(StartVariable {
            name: v.variable.clone(),
            label: Some(v.label.clone()).filter(|l| !l.is_empty()),
            data_type,
            required: v.required,
            default: v.default.clone(),
            constraints,
        });
        outputs.push(Output {
            name: v.variable.clone(),
            data_type,
            required: v.required,
            default: v.default.clone(),
            description: String::new(),
        });
    }

    (
        NodeConfig::Start(StartConfig {
            variables,
            parent_id: node.parent_id.clone(),
        }),
        Vec::new(),
        outputs,
    )
}

fn lift_end(node: &DifyNode) -> Lifted {
    let view: EndView = data_view(&node.data);

    let mut inputs = Vec::new();
    let mut outputs = Vec::new();
    for o in &view.outputs {
        let data_type = DataType::from_platform(Platform::Dify, &o.value_type);
        let reference = selector_ref(&o.value_selector, data_type);
        inputs.push(Input {
            name: o.variable.clone(),
            data_type,
            required: false,
            default: None,
            reference: reference.clone(),
            constraints: None,
        });
        outputs.push(EndOutput {
            variable: o.variable.clone(),
            value_selector: o.value_selector.clone(),
            data_type,
            reference,
        });
    }

    (
        NodeConfig::End(EndConfig {
            mode: EndMode::Variables,
            template: None,
            stream_output: false,
            outputs,
        }),
        inputs,
        Vec::new(),
    )
}

fn lift_llm(node: &DifyNode) -> Lifted {
    let view: LlmView = data_view(&node.data);

    let mut system = None;
    let mut user = None;
    let mut messages = Vec::new();
    for item in &view.prompt_template {
        match item.role.as_str() {
            "system" if system.is_none() => system = Some(item.text.clone()),
            "user" if user.is_none() => user = Some(item.text.clone()),
            _ => messages.push(PromptMessage {
                role: item.role.clone(),
                text: item.text.clone(),
            }),
        }
    }

    let config = LlmConfig {
        model: lift_model(&view.model),
        parameters: lift_parameters(&view.model),
        prompt: PromptConfig {
            system,
            user,
            messages,
        },
        context: ContextConfig {
            enabled: view.context.enabled,
            variable_selector: view.context.variable_selector.clone(),
        },
        vision: view.vision.enabled,
    };

    // Dify LLM nodes expose a single implicit `text` output.
    let outputs = vec![Output {
        name: "text".to_string(),
        data_type: DataType::String,
        required: true,
        default: None,
        description: String::new(),
    }];

    (NodeConfig::Llm(config), Vec::new(), outputs)
}

fn lift_model(model: &DifyModel) -> ModelConfig {
    ModelConfig {
        provider: model.provider.clone(),
        name: model.name.clone(),
        mode: if model.mode.is_empty() {
            "chat".to_string()
        } else {
            model.mode.clone()
        },
    }
}

fn lift_parameters(model: &DifyModel) -> ModelParameters {
    let p = &model.completion_params;
    ModelParameters {
        temperature: p.get("temperature").and_then(Value::as_f64),
        max_tokens: p
            .get("max_tokens")
            .and_then(Value::as_u64)
            .map(|v| v as u32),
        top_k: p.get("top_k").and_then(Value::as_u64).map(|v| v as u32),
        top_p: p.get("top_p").and_then(Value::as_f64),
        response_format: match p.get("response_format").and_then(Value::as_str) {
            Some("json") | Some("JSON") => ResponseFormat::Json,
            Some("markdown") => ResponseFormat::Markdown,
            _ => ResponseFormat::Text,
        },
    }
}

fn lift_code(node: &DifyNode, warnings: &mut Warnings) -> Result<Lifted> {
    let view: CodeView = data_view(&node.data);

    if view.code.trim().is_empty() {
        return Err(ConvertError::schema_at(
            "code node without source text",
            Location::field(node.id.clone(), "code"),
        ));
    }

    let language = match CodeLanguage::parse(&view.code_language) {
        Some(l) => l,
        None => {
            if !view.code_language.is_empty() {
                warnings.push_at(
                    "unknown-enum",
                    format!(
                        "unknown code_language '{}', assuming python3",
                        view.code_language
                    ),
                    Some(node.id.clone()),
                );
            }
            CodeLanguage::Python3
        }
    };

    let inputs = view
        .variables
        .iter()
        .map(|v| {
            let reference = selector_ref(&v.value_selector, DataType::String);
            Input {
                name: v.variable.clone(),
                data_type: DataType::String,
                required: false,
                default: None,
                reference,
                constraints: None,
            }
        })
        .collect();

    let outputs = view
        .outputs
        .iter()
        .map(|(name, entry)| Output {
            name: name.clone(),
            data_type: DataType::from_platform(
                Platform::Dify,
                entry.get("type").and_then(Value::as_str).unwrap_or(""),
            ),
            required: false,
            default: None,
            description: String::new(),
        })
        .collect();

    Ok((
        NodeConfig::Code(CodeConfig {
            language,
            source: view.code,
            dependencies: Vec::new(),
        }),
        inputs,
        outputs,
    ))
}

fn lift_condition(node: &DifyNode) -> Result<Lifted> {
    let view: ConditionView = data_view(&node.data);

    let mut cases = Vec::with_capacity(view.cases.len() + 1);
    for (i, case) in view.cases.iter().enumerate() {
        let mut conditions = Vec::with_capacity(case.conditions.len());
        for cond in &case.conditions {
            let comparison_operator = ComparisonOperator::parse(&cond.comparison_operator)
                .ok_or_else(|| {
                    ConvertError::schema_at(
                        format!(
                            "unknown comparison operator '{}'",
                            cond.comparison_operator
                        ),
                        Location::field(node.id.clone(), "cases"),
                    )
                })?;
            conditions.push(Condition {
                variable_selector: cond.variable_selector.clone(),
                comparison_operator,
                value: cond.value.clone(),
                var_type: DataType::from_platform(Platform::Dify, &cond.var_type),
            });
        }
        cases.push(ConditionCase {
            case_id: case.case_id.clone(),
            conditions,
            logical_operator: LogicalOperator::parse(&case.logical_operator)
                .unwrap_or(LogicalOperator::And),
            level: (i + 1) as u32,
        });
    }

    // The implicit ELSE branch becomes an explicit default case so that
    // spoke platforms with materialized defaults can address it.
    cases.push(ConditionCase {
        case_id: "false".to_string(),
        conditions: Vec::new(),
        logical_operator: LogicalOperator::And,
        level: 999,
    });

    Ok((
        NodeConfig::Condition(ConditionConfig { cases }),
        Vec::new(),
        Vec::new(),
    ))
}

fn lift_classifier(node: &DifyNode) -> Lifted {
    let view: ClassifierView = data_view(&node.data);

    let classes = view
        .classes
        .iter()
        .map(|c| {
            // The default class round-trips through its decorated name.
            let is_default =
                c.id == "default" || c.name.ends_with(DEFAULT_CLASS_SUFFIX);
            let name = c
                .name
                .strip_suffix(DEFAULT_CLASS_SUFFIX)
                .unwrap_or(&c.name)
                .to_string();
            ClassDef {
                id: c.id.clone(),
                name,
                description: String::new(),
                is_default,
            }
        })
        .collect();

    let query_variable = view
        .query_variable_selector
        .get(1)
        .cloned()
        .unwrap_or_else(|| "query".to_string());

    let instruction = if !view.instruction.is_empty() {
        view.instruction.clone()
    } else {
        view.instructions.clone()
    };

    let config = ClassifierConfig {
        model: lift_model(&view.model),
        parameters: lift_parameters(&view.model),
        classes,
        query_variable,
        instruction,
    };

    let outputs = vec![Output {
        name: "class_name".to_string(),
        data_type: DataType::String,
        required: true,
        default: None,
        description: String::new(),
    }];

    (NodeConfig::Classifier(config), Vec::new(), outputs)
}

fn lift_iteration(
    node: &DifyNode,
    body: &[&DifyNode],
    body_edges: &[&DifyEdge],
    warnings: &mut Warnings,
) -> Result<Lifted> {
    let view: IterationView = data_view(&node.data);

    let mut body_nodes = Vec::with_capacity(body.len());
    for inner in body {
        body_nodes.push(lift_node(inner, &[], &[], Some(&node.id), warnings)?);
    }

    let edges = body_edges.iter().map(|e| lift_edge(e)).collect();

    let body_workflow = Workflow {
        nodes: body_nodes,
        edges,
        variables: Vec::new(),
        features: Features::default(),
    };

    let iterator = match view.iterator_selector.as_slice() {
        [node_id, field, ..] => IteratorSource {
            input_type: DataType::ArrayString,
            source_node: node_id.clone(),
            source_output: field.clone(),
        },
        _ => {
            return Err(ConvertError::schema_at(
                "iteration without iterator_selector",
                Location::field(node.id.clone(), "iterator_selector"),
            ))
        }
    };

    let output_selector = match view.output_selector.as_slice() {
        [node_id, field, ..] => Some(OutputSelector {
            node_id: node_id.clone(),
            output_name: field.clone(),
        }),
        _ => None,
    };

    let output_type = if view.output_type.is_empty() {
        DataType::ArrayString
    } else {
        DataType::from_platform(Platform::Dify, &view.output_type)
    };

    let outputs = vec![Output {
        name: "output".to_string(),
        data_type: output_type,
        required: false,
        default: None,
        description: String::new(),
    }];

    let config = IterationConfig {
        iterator,
        execution: IterationExecution {
            is_parallel: view.is_parallel,
            parallel_nums: view.parallel_nums,
            error_handle_mode: match view.error_handle_mode.as_str() {
                "continue-on-error" | "continue_on_error" => ErrorHandleMode::ContinueOnError,
                _ => ErrorHandleMode::Terminated,
            },
        },
        body: body_workflow,
        output_selector,
        output_type,
    };

    Ok((
        NodeConfig::Iteration(Box::new(config)),
        Vec::new(),
        outputs,
    ))
}

fn selector_ref(selector: &[String], data_type: DataType) -> Option<VariableReference> {
    match selector {
        [node_id, field, ..] => Some(VariableReference::NodeOutput {
            node_id: node_id.clone(),
            output_name: field.clone(),
            data_type,
        }),
        _ => None,
    }
}
