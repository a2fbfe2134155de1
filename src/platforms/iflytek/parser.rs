// src/platforms/iflytek/parser.rs
//
// =============================================================================
// FLOWBRIDGE: IFLYTEK PARSER
// =============================================================================
//
// Lifts a flowMeta/flowData descriptor into the unified model.
//
// Phases: decode -> schema peel -> node scan -> edge scan -> reference
// lifting -> iteration nesting (recursive). Deterministic on identical
// input; the only shared state is the type-system tables.

use super::{
    param_view, CaseParam, ClassifierParam, CodeParam, ConditionParam, EndParam, FlowDocument,
    FlowEdge, FlowNode, FlowPort, FlowValueKind, IterationParam, LlmParam, AGENT_USER_INPUT,
};
use crate::convert::PlatformParser;
use crate::error::{ConvertError, Location, Result, Warnings};
use crate::model::*;
use crate::platforms::Platform;
use crate::types::DataType;
use crate::vars::ITERATION_START_MARKER;
use serde_json::Value;
use std::collections::HashSet;

pub struct IFlytekParser;

impl PlatformParser for IFlytekParser {
    fn parse(&self, bytes: &[u8], warnings: &mut Warnings) -> Result<Document> {
        // --- Phase 1: decode ---
        let text = std::str::from_utf8(bytes)
            .map_err(|e| ConvertError::input(Platform::IFlytek, format!("not UTF-8: {e}")))?;
        let raw: serde_yaml::Value = serde_yaml::from_str(text)
            .map_err(|e| ConvertError::input(Platform::IFlytek, format!("malformed YAML: {e}")))?;

        // --- Phase 2: schema peel ---
        let mapping = raw.as_mapping().ok_or_else(|| {
            ConvertError::input(Platform::IFlytek, "top level is not a mapping")
        })?;
        for key in ["flowMeta", "flowData"] {
            if !mapping.contains_key(&serde_yaml::Value::from(key)) {
                return Err(ConvertError::schema(format!(
                    "missing required top-level key '{key}'"
                )));
            }
        }
        let flow: FlowDocument = serde_yaml::from_value(raw)
            .map_err(|e| ConvertError::input(Platform::IFlytek, format!("bad shape: {e}")))?;

        if flow.data.nodes.is_empty() {
            return Err(ConvertError::schema("flowData.nodes is empty"));
        }

        // --- Phases 3-6 ---
        let mut seen_ids = HashSet::new();
        let mut workflow =
            lift_workflow(&flow.data.nodes, &flow.data.edges, None, &mut seen_ids, warnings)?;
        resolve_iterator_types(&mut workflow);

        let version = flow
            .meta
            .extra
            .get("version")
            .and_then(Value::as_str)
            .unwrap_or("1.0.0")
            .to_string();

        let metadata = Metadata {
            name: flow.meta.name.clone(),
            description: flow.meta.description.clone(),
            created_at: None,
            updated_at: None,
            ui: UiHints {
                opening_statement: flow.meta.prologue.clone(),
                suggested_questions: flow.meta.input_example.clone(),
                icon: flow.meta.avatar_icon.clone(),
                icon_background: flow.meta.avatar_color.clone(),
            },
        };

        Ok(Document {
            version,
            metadata,
            platform_meta: PlatformMeta::IFlytek(flow.meta.extra),
            workflow,
        })
    }
}

// ============================================================================
// 1. WORKFLOW LIFTING (recursive for iteration bodies)
// ============================================================================

fn lift_workflow(
    nodes: &[FlowNode],
    edges: &[FlowEdge],
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
        .map(|(i, e)| lift_edge(e, i))
        .collect();

    Ok(Workflow {
        nodes: out_nodes,
        edges: out_edges,
        variables: Vec::new(),
        features: Features::default(),
    })
}

fn lift_edge(edge: &FlowEdge, ordinal: usize) -> Edge {
    let id = if edge.id.is_empty() {
        format!("edge-{ordinal}")
    } else {
        edge.id.clone()
    };
    Edge {
        id,
        source: edge.source.clone(),
        target: edge.target.clone(),
        source_handle: edge.source_handle.clone(),
        target_handle: edge.target_handle.clone(),
        // Handles only appear on branch exits.
        edge_type: if edge.source_handle.is_some() {
            EdgeType::Conditional
        } else {
            EdgeType::Default
        },
        platform_config: Default::default(),
    }
}

// ============================================================================
// 2. NODE DISPATCH
// ============================================================================

fn lift_node(
    node: &FlowNode,
    iteration_id: Option<&str>,
    seen_ids: &mut HashSet<String>,
    warnings: &mut Warnings,
) -> Result<Node> {
    let token = node.token();
    let node_type = if node.id.contains(ITERATION_START_MARKER) {
        // Synthetic entry of an iteration body; behaves as a Start.
        Some(NodeType::Start)
    } else {
        Platform::IFlytek.node_type_from_token(token)
    };

    let inputs: Vec<Input> = node.data.inputs.iter().map(lift_input).collect();
    let outputs: Vec<Output> = node.data.outputs.iter().map(lift_output).collect();

    let config = match node_type {
        Some(NodeType::Start) => lift_start(node, &outputs, iteration_id),
        Some(NodeType::End) => lift_end(node, &inputs),
        Some(NodeType::Llm) => lift_llm(node, warnings),
        Some(NodeType::Code) => lift_code(node, warnings)?,
        Some(NodeType::Condition) => lift_condition(node)?,
        Some(NodeType::Classifier) => lift_classifier(node),
        Some(NodeType::Iteration) => lift_iteration(node, seen_ids, warnings)?,
        Some(NodeType::Unsupported) | None => {
            warnings.push_at(
                "unsupported-node",
                format!("node type '{token}' has no unified mapping; kept as placeholder"),
                Some(node.id.clone()),
            );
            NodeConfig::Unsupported(UnsupportedConfig {
                platform_type: token.to_string(),
                raw: serde_json::to_value(&node.data).unwrap_or(Value::Null),
            })
        }
    };

    let mut lifted = Node {
        id: node.id.clone(),
        title: node.data.label.clone(),
        description: node.data.description.clone(),
        position: Position {
            x: node.position.x,
            y: node.position.y,
        },
        size: node
            .size
            .map(|s| Size {
                width: s.width,
                height: s.height,
            })
            .unwrap_or_default(),
        inputs,
        outputs,
        config,
        iteration_id: iteration_id.map(str::to_string),
        platform_config: PlatformConfigs::default(),
    };

    // Stash proprietary knobs for lossless same-platform round-trips.
    if !node.data.node_param.is_empty() {
        lifted.platform_config.get_mut(Platform::IFlytek).insert(
            "nodeParam".to_string(),
            Value::Object(node.data.node_param.clone()),
        );
    }
    if !node.data.extra.is_empty() {
        for (k, v) in &node.data.extra {
            lifted
                .platform_config
                .get_mut(Platform::IFlytek)
                .insert(k.clone(), v.clone());
        }
    }

    Ok(lifted)
}

// ============================================================================
// 3. PORT & REFERENCE LIFTING
// ============================================================================

fn lift_input(port: &FlowPort) -> Input {
    let data_type = DataType::from_platform(Platform::IFlytek, &port.schema.data_type);

    let reference = port.schema.value.as_ref().and_then(|v| match v.kind {
        FlowValueKind::Ref => v.as_ref_content().map(|r| VariableReference::NodeOutput {
            node_id: r.node_id,
            output_name: r.name,
            data_type,
        }),
        FlowValueKind::Literal => Some(VariableReference::Literal {
            value: v.content.clone(),
            data_type,
        }),
    });

    let constraints = lift_constraints(port);

    Input {
        name: port.name.clone(),
        data_type,
        required: port.required,
        default: port.schema.default.clone(),
        reference,
        constraints,
    }
}

fn lift_constraints(port: &FlowPort) -> Option<Constraints> {
    let s = &port.schema;
    if s.min_length.is_none() && s.max_length.is_none() && s.pattern.is_none() && s.one_of.is_empty()
    {
        return None;
    }
    Some(Constraints {
        min_length: s.min_length,
        max_length: s.max_length,
        pattern: s.pattern.clone(),
        one_of: s.one_of.clone(),
    })
}

fn lift_output(port: &FlowPort) -> Output {
    Output {
        name: port.name.clone(),
        data_type: DataType::from_platform(Platform::IFlytek, &port.schema.data_type),
        required: port.required,
        default: port.schema.default.clone(),
        description: String::new(),
    }
}

// ============================================================================
// 4. PER-TYPE SUB-PARSERS
// ============================================================================

fn lift_start(node: &FlowNode, outputs: &[Output], iteration_id: Option<&str>) -> NodeConfig {
    // Start exposes its variables as node outputs.
    let variables = outputs
        .iter()
        .map(|o| StartVariable {
            name: o.name.clone(),
            label: None,
            data_type: o.data_type,
            required: o.required,
            default: o.default.clone(),
            constraints: None,
        })
        .collect();

    NodeConfig::Start(StartConfig {
        variables,
        parent_id: node
            .data
            .parent_id
            .clone()
            .or_else(|| iteration_id.map(str::to_string)),
    })
}

fn lift_end(node: &FlowNode, inputs: &[Input]) -> NodeConfig {
    let param: EndParam = param_view(&node.data.node_param);

    let mode = if param.output_mode == "template" || !param.template.is_empty() {
        EndMode::Template
    } else {
        EndMode::Variables
    };

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

    NodeConfig::End(EndConfig {
        mode,
        template: (!param.template.is_empty()).then(|| param.template.clone()),
        stream_output: param.stream_output,
        outputs,
    })
}

fn lift_llm(node: &FlowNode, warnings: &mut Warnings) -> NodeConfig {
    let param: LlmParam = param_view(&node.data.node_param);

    let response_format = match param.resp_format.as_deref() {
        None | Some("") | Some("text") => ResponseFormat::Text,
        Some("json") => ResponseFormat::Json,
        Some("markdown") => ResponseFormat::Markdown,
        Some(other) => {
            warnings.push_at(
                "unknown-enum",
                format!("unknown respFormat '{other}', using text"),
                Some(node.id.clone()),
            );
            ResponseFormat::Text
        }
    };

    NodeConfig::Llm(LlmConfig {
        model: ModelConfig {
            provider: if param.service_id.is_empty() {
                "spark".to_string()
            } else {
                param.service_id.clone()
            },
            name: param.domain.clone(),
            mode: if param.mode.is_empty() {
                "chat".to_string()
            } else {
                param.mode.clone()
            },
        },
        parameters: ModelParameters {
            temperature: param.temperature,
            max_tokens: param.max_tokens,
            top_k: param.top_k,
            top_p: param.top_p,
            response_format,
        },
        prompt: PromptConfig {
            system: (!param.system_template.is_empty()).then(|| param.system_template.clone()),
            user: (!param.template.is_empty()).then(|| param.template.clone()),
            messages: Vec::new(),
        },
        context: ContextConfig::default(),
        vision: param.enable_vision,
    })
}

fn lift_code(node: &FlowNode, warnings: &mut Warnings) -> Result<NodeConfig> {
    let param: CodeParam = param_view(&node.data.node_param);

    let language = match CodeLanguage::parse(&param.language) {
        Some(l) => l,
        None if param.language.is_empty() => CodeLanguage::Python3,
        None => {
            warnings.push_at(
                "unknown-enum",
                format!("unknown code language '{}', assuming python3", param.language),
                Some(node.id.clone()),
            );
            CodeLanguage::Python3
        }
    };

    if param.code.trim().is_empty() {
        return Err(ConvertError::schema_at(
            "code node without source text",
            Location::field(node.id.clone(), "nodeParam.code"),
        ));
    }

    Ok(NodeConfig::Code(CodeConfig {
        language,
        source: param.code,
        dependencies: param.dependencies,
    }))
}

fn lift_condition(node: &FlowNode) -> Result<NodeConfig> {
    let param: ConditionParam = param_view(&node.data.node_param);

    let mut cases = Vec::with_capacity(param.cases.len());
    for case in &param.cases {
        cases.push(lift_case(&node.id, case)?);
    }

    Ok(NodeConfig::Condition(ConditionConfig { cases }))
}

fn lift_case(node_id: &str, case: &CaseParam) -> Result<ConditionCase> {
    let logical_operator =
        LogicalOperator::parse(&case.logical_operator).unwrap_or(LogicalOperator::And);

    let mut conditions = Vec::with_capacity(case.conditions.len());
    for cond in &case.conditions {
        let comparison_operator =
            ComparisonOperator::parse(&cond.compare_operator).ok_or_else(|| {
                ConvertError::schema_at(
                    format!("unknown compare operator '{}'", cond.compare_operator),
                    Location::field(node_id.to_string(), "nodeParam.cases"),
                )
            })?;
        conditions.push(Condition {
            variable_selector: cond.variable_selector.clone(),
            comparison_operator,
            value: cond.compare_value.clone(),
            var_type: DataType::from_platform(Platform::IFlytek, &cond.var_type),
        });
    }

    Ok(ConditionCase {
        case_id: case.case_id.clone(),
        conditions,
        logical_operator,
        level: case.level,
    })
}

fn lift_classifier(node: &FlowNode) -> NodeConfig {
    let param: ClassifierParam = param_view(&node.data.node_param);

    let classes = param
        .intent_chains
        .iter()
        .map(|intent| ClassDef {
            id: intent.id.clone(),
            name: intent.name.clone(),
            description: intent.description.clone(),
            is_default: intent.is_default,
        })
        .collect();

    NodeConfig::Classifier(ClassifierConfig {
        model: ModelConfig {
            provider: if param.service_id.is_empty() {
                "spark".to_string()
            } else {
                param.service_id.clone()
            },
            name: param.domain.clone(),
            mode: "chat".to_string(),
        },
        parameters: ModelParameters {
            temperature: param.temperature,
            max_tokens: param.max_tokens,
            ..Default::default()
        },
        classes,
        query_variable: if param.query_variable.is_empty() {
            AGENT_USER_INPUT.to_string()
        } else {
            param.query_variable.clone()
        },
        instruction: param.instruction.clone(),
    })
}

fn lift_iteration(
    node: &FlowNode,
    seen_ids: &mut HashSet<String>,
    warnings: &mut Warnings,
) -> Result<NodeConfig> {
    let param: IterationParam = param_view(&node.data.node_param);

    let body = match &node.data.iteration {
        Some(sub) => lift_workflow(&sub.nodes, &sub.edges, Some(&node.id), seen_ids, warnings)?,
        None => Workflow::default(),
    };

    let iterator = match &param.iterator_selector {
        Some(sel) => IteratorSource {
            // Placeholder; fixed up once the outer scan can see the source
            // node's declared output type.
            input_type: DataType::ArrayString,
            source_node: sel.node_id.clone(),
            source_output: sel.name.clone(),
        },
        None => {
            return Err(ConvertError::schema_at(
                "iteration without iteratorSelector",
                Location::field(node.id.clone(), "nodeParam.iteratorSelector"),
            ))
        }
    };

    let output_selector = param.output_selector.as_ref().map(|sel| OutputSelector {
        node_id: sel.node_id.clone(),
        output_name: sel.name.clone(),
    });

    Ok(NodeConfig::Iteration(Box::new(IterationConfig {
        iterator,
        execution: IterationExecution {
            is_parallel: param.is_parallel,
            parallel_nums: param.parallel_nums,
            error_handle_mode: match param.error_handle_mode.as_str() {
                "continue_on_error" | "continueOnError" => ErrorHandleMode::ContinueOnError,
                _ => ErrorHandleMode::Terminated,
            },
        },
        body,
        output_selector,
        output_type: if param.output_type.is_empty() {
            DataType::ArrayString
        } else {
            DataType::from_platform(Platform::IFlytek, &param.output_type)
        },
    })))
}

// ============================================================================
// 5. POST-PASS: ITERATOR INPUT TYPES
// ============================================================================

/// Once every top-level node is lifted, pin each iterator's element type to
/// the declared type of the output it draws from.
fn resolve_iterator_types(workflow: &mut Workflow) {
    let declared: Vec<(String, String, DataType)> = {
        let mut all = Vec::new();
        workflow.visit_nodes(&mut |n| {
            for o in &n.outputs {
                all.push((n.id.clone(), o.name.clone(), o.data_type));
            }
        });
        all
    };

    for node in &mut workflow.nodes {
        if let NodeConfig::Iteration(cfg) = &mut node.config {
            if let Some((_, _, t)) = declared.iter().find(|(id, name, _)| {
                *id == cfg.iterator.source_node && *name == cfg.iterator.source_output
            }) {
                if t.is_array() {
                    cfg.iterator.input_type = *t;
                }
            }
        }
    }
}
