// src/platforms/coze/generator.rs
//
// =============================================================================
// FLOWBRIDGE: COZE GENERATOR
// =============================================================================
//
// Lowers a unified model into a Coze export. Node IDs become short
// numerics (Start 100001, End 900001, internals counted up from 100100);
// loop internals are embedded as `blocks` on the container; templates are
// lowered to the bare `{{name}}` dialect bound through inputParameters.
//
// As everywhere, the tree is built on SOURCE IDs and one finalize walk
// rewrites every `blockID` and endpoint through the accumulated map.

use super::{
    CozeDocument, CozeEdge, CozeInput, CozeInputs, CozeMeta, CozeNode, CozeNodeData,
    CozeNodeMeta, CozeOutput, CozeParam, CozePosition, CozeSchema, CozeValue, DEFAULT_MODEL_NAME,
    END_NODE_ID, FIRST_INTERNAL_ID, START_NODE_ID,
};
use crate::convert::PlatformGenerator;
use crate::error::{ConvertError, Result, Warnings};
use crate::idmap::{self, IdMapper, IdSource};
use crate::model::*;
use crate::platforms::Platform;
use crate::vars::{self, RefTarget};
use serde_json::{json, Map, Value};
use std::collections::{HashMap, HashSet};

pub struct CozeGenerator;

impl PlatformGenerator for CozeGenerator {
    fn generate(
        &self,
        doc: &Document,
        ids: &mut dyn IdSource,
        warnings: &mut Warnings,
    ) -> Result<Vec<u8>> {
        if doc.workflow.nodes.is_empty() {
            return Err(ConvertError::schema("refusing to emit an empty workflow"));
        }

        let mut emit = Emit {
            doc,
            mapper: IdMapper::new(),
            ids,
            warnings,
            case_handles: HashMap::new(),
            class_handles: HashMap::new(),
            iter_ctx: None,
            next_internal: FIRST_INTERNAL_ID,
            next_end: 0,
        };

        emit.allocate_ids();

        let mut schema = CozeSchema::default();
        for node in &doc.workflow.nodes {
            schema.nodes.push(emit.emit_node(node)?);
        }
        for edge in &doc.workflow.edges {
            schema.edges.push(emit.emit_edge(edge));
        }

        finalize_schema(&mut schema, &emit.mapper);

        let workflow_id = doc
            .platform_meta
            .fields_for(Platform::Coze)
            .and_then(|m| m.get("workflow_id"))
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| format!("73{:011}", emit.ids.numeric() % 100_000_000_000));

        let document = CozeDocument {
            workflow_id: Some(workflow_id),
            export_format: Some("yaml".to_string()),
            name: Some(doc.metadata.name.clone()).filter(|s| !s.is_empty()),
            description: Some(doc.metadata.description.clone()).filter(|s| !s.is_empty()),
            schema,
        };
        let yaml = serde_yaml::to_string(&document)
            .map_err(|e| ConvertError::input(Platform::Coze, format!("serialize: {e}")))?;
        Ok(yaml.into_bytes())
    }
}

// ============================================================================
// 1. EMISSION CONTEXT
// ============================================================================

struct Emit<'a> {
    doc: &'a Document,
    mapper: IdMapper,
    ids: &'a mut dyn IdSource,
    warnings: &'a mut Warnings,
    case_handles: HashMap<(String, String), String>,
    class_handles: HashMap<(String, String), String>,
    iter_ctx: Option<IterCtx>,
    next_internal: u64,
    next_end: u64,
}

struct IterCtx {
    container_id: String,
    body_start_id: Option<String>,
}

impl<'a> Emit<'a> {
    fn allocate_ids(&mut self) {
        let mut nodes: Vec<&Node> = Vec::new();
        self.doc.workflow.visit_nodes(&mut |n| nodes.push(n));

        for node in nodes {
            let new_id = match (&node.config, node.iteration_id.is_some()) {
                (NodeConfig::Start(cfg), _) if cfg.parent_id.is_none() => {
                    START_NODE_ID.to_string()
                }
                (NodeConfig::End(_), false) => {
                    let id = END_NODE_ID
                        .parse::<u64>()
                        .unwrap_or(900_001)
                        + self.next_end;
                    self.next_end += 1;
                    id.to_string()
                }
                _ => {
                    let short_numeric = !node.id.is_empty()
                        && node.id.len() <= 6
                        && node.id.bytes().all(|b| b.is_ascii_digit());
                    if short_numeric && !self.mapper.is_used(&node.id) {
                        node.id.clone()
                    } else {
                        let id = self.next_internal;
                        self.next_internal += 1;
                        id.to_string()
                    }
                }
            };
            self.mapper.insert(node.id.clone(), new_id);
        }
    }

    // ------------------------------------------------------------------
    // Node emission
    // ------------------------------------------------------------------

    fn emit_node(&mut self, node: &Node) -> Result<CozeNode> {
        let token = Platform::Coze
            .node_token(node.node_type())
            .unwrap_or("0")
            .to_string();

        let mut emitted = CozeNode {
            id: node.id.clone(),
            node_type: token,
            meta: CozeMeta {
                position: CozePosition {
                    x: node.position.x,
                    y: node.position.y,
                },
            },
            data: CozeNodeData {
                node_meta: CozeNodeMeta {
                    title: node.title.clone(),
                    description: node.description.clone(),
                    icon: String::new(),
                    sub_title: String::new(),
                },
                outputs: Vec::new(),
                inputs: None,
            },
            blocks: Vec::new(),
            edges: Vec::new(),
        };

        match &node.config {
            NodeConfig::Start(cfg) => self.emit_start(cfg, &mut emitted),
            NodeConfig::End(cfg) => self.emit_end(node, cfg, &mut emitted),
            NodeConfig::Llm(cfg) => self.emit_llm(node, cfg, &mut emitted),
            NodeConfig::Code(cfg) => self.emit_code(node, cfg, &mut emitted),
            NodeConfig::Condition(cfg) => self.emit_condition(node, cfg, &mut emitted),
            NodeConfig::Classifier(cfg) => self.emit_classifier(node, cfg, &mut emitted),
            NodeConfig::Iteration(cfg) => self.emit_loop(node, cfg, &mut emitted)?,
            NodeConfig::Unsupported(cfg) => {
                self.warnings.push_at(
                    "unsupported-node",
                    format!("emitting placeholder for '{}'", cfg.platform_type),
                    Some(node.id.clone()),
                );
            }
        }

        Ok(emitted)
    }

    fn emit_start(&mut self, cfg: &StartConfig, out: &mut CozeNode) {
        for var in &cfg.variables {
            out.data.outputs.push(CozeOutput {
                name: var.name.trim().to_string(),
                data_type: var.data_type.to_platform(Platform::Coze).to_string(),
                required: var.required,
                value: None,
            });
        }
    }

    fn emit_end(&mut self, node: &Node, cfg: &EndConfig, out: &mut CozeNode) {
        let mut params = Vec::new();
        for end_out in &cfg.outputs {
            let input = match (&end_out.reference, end_out.value_selector.as_slice()) {
                (Some(VariableReference::Literal { value, .. }), _) => CozeInput {
                    data_type: end_out.data_type.to_platform(Platform::Coze).to_string(),
                    value: Some(CozeValue::literal(value.clone())),
                },
                (_, [node_id, field]) => {
                    let (block, name) = self.map_ref(node_id, field);
                    CozeInput {
                        data_type: self
                            .selector_type(node_id, field, end_out.data_type)
                            .to_platform(Platform::Coze)
                            .to_string(),
                        value: Some(CozeValue::reference(block, name)),
                    }
                }
                _ => continue,
            };
            params.push(CozeParam {
                name: end_out.variable.clone(),
                input,
            });
        }

        let mut rest = Map::new();
        match cfg.mode {
            EndMode::Template => {
                rest.insert("terminatePlan".into(), Value::from("useAnswerContent"));
                let content = cfg
                    .template
                    .as_ref()
                    .map(|t| self.lower_template(node, t, &mut params))
                    .unwrap_or_default();
                rest.insert("content".into(), Value::from(content));
            }
            EndMode::Variables => {
                rest.insert("terminatePlan".into(), Value::from("returnVariables"));
            }
        }
        if cfg.stream_output {
            rest.insert("streamingOutput".into(), Value::from(true));
        }

        out.data.inputs = Some(CozeInputs {
            input_parameters: params,
            rest,
        });
    }

    fn emit_llm(&mut self, node: &Node, cfg: &LlmConfig, out: &mut CozeNode) {
        let mut params: Vec<CozeParam> = node
            .inputs
            .iter()
            .filter_map(|i| self.param_from_input(i))
            .collect();

        let system = cfg
            .prompt
            .system
            .as_ref()
            .map(|t| self.lower_template(node, t, &mut params))
            .unwrap_or_default();
        let prompt = cfg
            .prompt
            .user
            .as_ref()
            .map(|t| self.lower_template(node, t, &mut params))
            .unwrap_or_default();

        let model_name = if cfg.model.provider == "coze" {
            cfg.model.name.clone()
        } else {
            self.warnings.push_at(
                "lossy-provider",
                format!(
                    "provider '{}' has no Coze mapping; using {DEFAULT_MODEL_NAME}",
                    cfg.model.provider
                ),
                Some(node.id.clone()),
            );
            DEFAULT_MODEL_NAME.to_string()
        };

        let mut llm = Map::new();
        llm.insert("modelName".into(), Value::from(model_name));
        if let Some(t) = cfg.parameters.temperature.filter(|t| *t > 0.0) {
            llm.insert("temperature".into(), Value::from(t));
        }
        if let Some(m) = cfg.parameters.max_tokens.filter(|m| *m > 0) {
            llm.insert("maxTokens".into(), Value::from(m));
        }
        if let Some(k) = cfg.parameters.top_k.filter(|k| *k > 0) {
            llm.insert("topK".into(), Value::from(k));
        }
        if let Some(p) = cfg.parameters.top_p.filter(|p| *p > 0.0) {
            llm.insert("topP".into(), Value::from(p));
        }
        match cfg.parameters.response_format {
            ResponseFormat::Text => {}
            ResponseFormat::Json => {
                llm.insert("responseFormat".into(), Value::from("json"));
            }
            ResponseFormat::Markdown => {
                llm.insert("responseFormat".into(), Value::from("markdown"));
            }
        }
        if !system.is_empty() {
            llm.insert("systemPrompt".into(), Value::from(system));
        }
        if !prompt.is_empty() {
            llm.insert("prompt".into(), Value::from(prompt));
        }

        let mut rest = Map::new();
        rest.insert("llmParam".into(), Value::Object(llm));
        out.data.inputs = Some(CozeInputs {
            input_parameters: params,
            rest,
        });

        out.data.outputs = self.plain_outputs(node, "output");
    }

    fn emit_code(&mut self, node: &Node, cfg: &CodeConfig, out: &mut CozeNode) {
        let mut params = Vec::new();
        let mut arg_counter = 0;
        for input in &node.inputs {
            let Some(param) = self.param_from_input(input) else {
                continue;
            };
            let named = if param.name.trim().is_empty() {
                arg_counter += 1;
                CozeParam {
                    name: format!("arg{arg_counter}"),
                    input: param.input,
                }
            } else {
                param
            };
            params.push(named);
        }

        let mut rest = Map::new();
        // Source text travels byte-for-byte.
        rest.insert("code".into(), Value::from(cfg.source.clone()));
        rest.insert("language".into(), Value::from(cfg.language.as_str()));
        out.data.inputs = Some(CozeInputs {
            input_parameters: params,
            rest,
        });

        out.data.outputs = self.plain_outputs(node, "output");
    }

    fn emit_condition(&mut self, node: &Node, cfg: &ConditionConfig, out: &mut CozeNode) {
        let mut ordered: Vec<&ConditionCase> = cfg.cases.iter().collect();
        ordered.sort_by_key(|c| (c.is_default(), c.level));

        let mut used = HashSet::new();
        used.insert("false".to_string());

        let mut branches = Vec::new();
        for case in ordered {
            let handle = if case.is_default() {
                "false".to_string()
            } else {
                idmap::derive_case_handle(case, &mut used, self.ids)
            };
            self.case_handles
                .insert((node.id.clone(), case.case_id.clone()), handle.clone());
            if case.is_default() {
                continue; // the false port is implicit
            }

            let conditions: Vec<Value> = case
                .conditions
                .iter()
                .map(|c| {
                    let (block, name) = match c.variable_selector.as_slice() {
                        [node_id, field, ..] => self.map_ref(node_id, field),
                        _ => (String::new(), String::new()),
                    };
                    json!({
                        "left": {"blockID": block, "name": name, "source": "block-output"},
                        "operator": c.comparison_operator.as_str(),
                        "right": c.value,
                        "varType": c.var_type.to_platform(Platform::Coze),
                    })
                })
                .collect();

            branches.push(json!({
                "branchId": handle,
                "level": case.level,
                "logic": case.logical_operator.as_str(),
                "conditions": conditions,
            }));
        }

        let mut rest = Map::new();
        rest.insert("branches".into(), Value::from(branches));
        out.data.inputs = Some(CozeInputs {
            input_parameters: Vec::new(),
            rest,
        });
    }

    fn emit_classifier(&mut self, node: &Node, cfg: &ClassifierConfig, out: &mut CozeNode) {
        let mut params = Vec::new();
        let instruction = self.lower_template(node, &cfg.instruction, &mut params);

        // Ordinal intent handles; the default class keeps its canonical
        // token.
        let mut intents = Vec::new();
        let mut ordinal = 0;
        for class in &cfg.classes {
            let id = if class.is_default {
                "default".to_string()
            } else {
                ordinal += 1;
                ordinal.to_string()
            };
            self.class_handles
                .insert((node.id.clone(), class.id.clone()), id.clone());
            intents.push(json!({
                "intentId": id,
                "name": class.name,
                "description": class.description,
                "isDefault": class.is_default,
            }));
        }

        let mut rest = Map::new();
        rest.insert("intents".into(), Value::from(intents));
        rest.insert("queryVariable".into(), Value::from(cfg.query_variable.clone()));
        if !instruction.is_empty() {
            rest.insert("instruction".into(), Value::from(instruction));
        }
        rest.insert(
            "llmParam".into(),
            json!({"modelName": if cfg.model.provider == "coze" {
                cfg.model.name.clone()
            } else {
                DEFAULT_MODEL_NAME.to_string()
            }}),
        );
        out.data.inputs = Some(CozeInputs {
            input_parameters: params,
            rest,
        });

        out.data.outputs = self.plain_outputs(node, "class_name");
    }

    fn emit_loop(&mut self, node: &Node, cfg: &IterationConfig, out: &mut CozeNode) -> Result<()> {
        let body_start_id = cfg.body.start_node().map(|n| n.id.clone());

        // Internals only; the body's Start and End have no Coze node.
        self.iter_ctx = Some(IterCtx {
            container_id: node.id.clone(),
            body_start_id: body_start_id.clone(),
        });
        for inner in &cfg.body.nodes {
            if matches!(inner.config, NodeConfig::Start(_) | NodeConfig::End(_)) {
                continue;
            }
            let emitted = self.emit_node(inner)?;
            out.blocks.push(emitted);
        }

        let end_ids: HashSet<&str> = cfg.body.end_nodes().map(|n| n.id.as_str()).collect();
        for edge in &cfg.body.edges {
            let touches_start = body_start_id.as_deref() == Some(edge.source.as_str());
            if touches_start
                || end_ids.contains(edge.source.as_str())
                || end_ids.contains(edge.target.as_str())
            {
                continue;
            }
            let emitted = self.emit_edge(edge);
            out.edges.push(emitted);
        }

        let output_selector = self.resolve_loop_output(cfg);
        self.iter_ctx = None;

        let (iter_block, iter_name) =
            self.map_ref(&cfg.iterator.source_node, &cfg.iterator.source_output);
        let params = vec![CozeParam {
            name: "input".to_string(),
            input: CozeInput {
                data_type: cfg.iterator.input_type.to_platform(Platform::Coze).to_string(),
                value: Some(CozeValue::reference(iter_block, iter_name)),
            },
        }];

        let mut rest = Map::new();
        rest.insert("parallel".into(), Value::from(cfg.execution.is_parallel));
        rest.insert(
            "parallelSize".into(),
            Value::from(cfg.execution.parallel_nums),
        );
        rest.insert(
            "errorMode".into(),
            Value::from(match cfg.execution.error_handle_mode {
                ErrorHandleMode::Terminated => "terminated",
                ErrorHandleMode::ContinueOnError => "continue",
            }),
        );
        rest.insert(
            "outputType".into(),
            Value::from(cfg.output_type.to_platform(Platform::Coze)),
        );
        match &output_selector {
            Some((block, name)) => {
                rest.insert(
                    "loopOutput".into(),
                    json!({"blockID": block, "name": name, "source": "block-output"}),
                );
                out.data.outputs.push(CozeOutput {
                    name: "output".to_string(),
                    data_type: cfg.output_type.to_platform(Platform::Coze).to_string(),
                    required: false,
                    value: Some(CozeValue::reference(block.clone(), name.clone())),
                });
            }
            None => {
                self.warnings.push_at(
                    "empty-iteration",
                    "loop body is empty; container emitted without an output selector",
                    Some(node.id.clone()),
                );
            }
        }

        out.data.inputs = Some(CozeInputs {
            input_parameters: params,
            rest,
        });
        Ok(())
    }

    /// Same resolution ladder as the other generators: explicit choice,
    /// body End reference, best node by type, last internal node.
    fn resolve_loop_output(&mut self, cfg: &IterationConfig) -> Option<(String, String)> {
        if let Some(sel) = &cfg.output_selector {
            return Some((sel.node_id.clone(), sel.output_name.clone()));
        }

        if let Some(end) = cfg.body.end_nodes().next() {
            if let NodeConfig::End(end_cfg) = &end.config {
                if let Some(out) = end_cfg.outputs.first() {
                    if let [node_id, field] = out.value_selector.as_slice() {
                        return Some((node_id.clone(), field.clone()));
                    }
                }
            }
        }

        let mut best: Option<(&Node, u8)> = None;
        for inner in &cfg.body.nodes {
            let rank = match inner.node_type() {
                NodeType::Code => 4,
                NodeType::Llm => 3,
                NodeType::Classifier => 2,
                NodeType::Condition => 1,
                _ => 0,
            };
            if rank > 0 && best.map(|(_, r)| rank > r).unwrap_or(true) {
                best = Some((inner, rank));
            }
        }
        if let Some((inner, _)) = best {
            let field = inner
                .outputs
                .first()
                .map(|o| o.name.clone())
                .unwrap_or_else(|| "output".to_string());
            return Some((inner.id.clone(), field));
        }

        cfg.body
            .nodes
            .iter()
            .rev()
            .find(|n| !matches!(n.config, NodeConfig::Start(_) | NodeConfig::End(_)))
            .map(|n| (n.id.clone(), "output".to_string()))
    }

    // ------------------------------------------------------------------
    // Edges
    // ------------------------------------------------------------------

    fn emit_edge(&mut self, edge: &Edge) -> CozeEdge {
        let source_node = self.doc.workflow.node_deep(&edge.source);
        let source_port = match (&source_node, &edge.source_handle) {
            (Some(n), Some(handle)) => match &n.config {
                NodeConfig::Condition(_) => Some(
                    self.case_handles
                        .get(&(edge.source.clone(), handle.clone()))
                        .cloned()
                        .unwrap_or_else(|| handle.clone()),
                ),
                NodeConfig::Classifier(_) => Some(
                    self.class_handles
                        .get(&(edge.source.clone(), handle.clone()))
                        .cloned()
                        .unwrap_or_else(|| {
                            idmap::classifier_hash_handle(handle).to_string()
                        }),
                ),
                _ => Some(handle.clone()),
            },
            (_, Some(handle)) => Some(handle.clone()),
            _ => None,
        };

        CozeEdge {
            source: edge.source.clone(),
            target: edge.target.clone(),
            source_port,
        }
    }

    // ------------------------------------------------------------------
    // Reference plumbing
    // ------------------------------------------------------------------

    /// `(blockID, name)` with output-field aliasing and loop-item
    /// rewriting. IDs stay old until finalize.
    fn map_ref(&self, node_id: &str, field: &str) -> (String, String) {
        if let Some(ctx) = &self.iter_ctx {
            if vars::is_iteration_item_ref(node_id, field, ctx.body_start_id.as_deref()) {
                return (ctx.container_id.clone(), "item".to_string());
            }
        }
        let aliased = match self.doc.workflow.node_deep(node_id) {
            Some(producer) => vars::aliased_output(producer.node_type(), Platform::Coze, field),
            None => field.to_string(),
        };
        (node_id.to_string(), aliased)
    }

    fn selector_type(
        &self,
        node_id: &str,
        field: &str,
        declared: crate::types::DataType,
    ) -> crate::types::DataType {
        if let Some(producer) = self.doc.workflow.node_deep(node_id) {
            if let Some(output) = producer.output(field) {
                return output.data_type;
            }
            if let NodeConfig::Start(s) = &producer.config {
                if let Some(v) = s.variables.iter().find(|v| v.name == field) {
                    return v.data_type;
                }
            }
        }
        declared
    }

    fn param_from_input(&self, input: &Input) -> Option<CozeParam> {
        let reference = input.reference.as_ref()?;
        let value = match reference {
            VariableReference::NodeOutput {
                node_id,
                output_name,
                ..
            } => {
                let (block, name) = self.map_ref(node_id, output_name);
                CozeValue::reference(block, name)
            }
            VariableReference::Literal { value, .. } => CozeValue::literal(value.clone()),
            VariableReference::Template { text } => {
                CozeValue::literal(Value::from(text.clone()))
            }
        };
        Some(CozeParam {
            name: input.name.clone(),
            input: CozeInput {
                data_type: input.data_type.to_platform(Platform::Coze).to_string(),
                value: Some(value),
            },
        })
    }

    fn plain_outputs(&self, node: &Node, fallback: &str) -> Vec<CozeOutput> {
        if node.outputs.is_empty() {
            return vec![CozeOutput {
                name: fallback.to_string(),
                data_type: "string".to_string(),
                required: false,
                value: None,
            }];
        }
        node.outputs
            .iter()
            .map(|o| CozeOutput {
                name: o.name.clone(),
                data_type: o.data_type.to_platform(Platform::Coze).to_string(),
                required: o.required,
                value: None,
            })
            .collect()
    }

    /// Lower a template to the bare dialect, binding qualified references
    /// through inputParameters and repairing dangling `{{name` fragments.
    fn lower_template(
        &mut self,
        node: &Node,
        text: &str,
        params: &mut Vec<CozeParam>,
    ) -> String {
        let mut rewritten = {
            let doc = self.doc;
            let iter_ctx = &self.iter_ctx;
            vars::rewrite(text, |token| match &token.target {
                RefTarget::Qualified { node_id, output } => {
                    let (block, name) = map_ref_with(doc, iter_ctx, node_id, output);
                    let bound = bind_param(params, node, &block, &name);
                    Some(format!("{{{{{bound}}}}}"))
                }
                RefTarget::Named { .. } => None,
            })
        };

        for frag in vars::parse_dangling(&rewritten.clone()).iter().rev() {
            if let RefTarget::Named { name } = &frag.target {
                if node.input(name).is_some() || params.iter().any(|p| p.name == *name) {
                    rewritten.replace_range(frag.range.clone(), &format!("{{{{{name}}}}}"));
                } else {
                    self.warnings.push_at(
                        "dangling-template-ref",
                        format!("incomplete reference '{}' left intact", frag.text),
                        Some(node.id.clone()),
                    );
                }
            }
        }
        rewritten
    }
}

/// Free-function twin of `Emit::map_ref` usable inside rewrite closures.
fn map_ref_with(
    doc: &Document,
    iter_ctx: &Option<IterCtx>,
    node_id: &str,
    field: &str,
) -> (String, String) {
    if let Some(ctx) = iter_ctx {
        if vars::is_iteration_item_ref(node_id, field, ctx.body_start_id.as_deref()) {
            return (ctx.container_id.clone(), "item".to_string());
        }
    }
    let aliased = match doc.workflow.node_deep(node_id) {
        Some(producer) => vars::aliased_output(producer.node_type(), Platform::Coze, field),
        None => field.to_string(),
    };
    (node_id.to_string(), aliased)
}

/// Find or create the inputParameter binding `block.name`; returns the
/// parameter name the template should use.
fn bind_param(params: &mut Vec<CozeParam>, node: &Node, block: &str, name: &str) -> String {
    for p in params.iter() {
        if let Some(value) = &p.input.value {
            if let Some(r) = value.as_block_ref() {
                if r.block_id == block && r.name == name {
                    return p.name.clone();
                }
            }
        }
    }

    let mut candidate = name.to_string();
    let mut n = 1;
    loop {
        let taken = params.iter().any(|p| p.name == candidate);
        // An input with this name that binds something else would shadow
        // the parameter on the wire.
        let shadowed = match node.input(&candidate).and_then(|i| i.reference.as_ref()) {
            Some(VariableReference::NodeOutput {
                node_id,
                output_name,
                ..
            }) => !(node_id == block && output_name == name),
            Some(_) => true,
            None => false,
        };
        if !taken && !shadowed {
            break;
        }
        n += 1;
        candidate = format!("{name}_{n}");
    }

    params.push(CozeParam {
        name: candidate.clone(),
        input: CozeInput {
            data_type: "string".to_string(),
            value: Some(CozeValue::reference(block, name)),
        },
    });
    candidate
}

// ============================================================================
// 2. FINALIZE PASS
// ============================================================================

fn finalize_schema(schema: &mut CozeSchema, mapper: &IdMapper) {
    for node in &mut schema.nodes {
        finalize_node(node, mapper);
    }
    for edge in &mut schema.edges {
        edge.source = mapper.rewrite(&edge.source);
        edge.target = mapper.rewrite(&edge.target);
    }
}

fn finalize_node(node: &mut CozeNode, mapper: &IdMapper) {
    node.id = mapper.rewrite(&node.id);

    for output in &mut node.data.outputs {
        if let Some(value) = &mut output.value {
            rewrite_block_ids(&mut value.content, mapper);
        }
    }
    if let Some(inputs) = &mut node.data.inputs {
        for param in &mut inputs.input_parameters {
            if let Some(value) = &mut param.input.value {
                rewrite_block_ids(&mut value.content, mapper);
            }
        }
        for (_, value) in inputs.rest.iter_mut() {
            rewrite_block_ids(value, mapper);
        }
    }

    for inner in &mut node.blocks {
        finalize_node(inner, mapper);
    }
    for edge in &mut node.edges {
        edge.source = mapper.rewrite(&edge.source);
        edge.target = mapper.rewrite(&edge.target);
    }
}

/// Rewrite every `blockID` string in a JSON subtree.
fn rewrite_block_ids(value: &mut Value, mapper: &IdMapper) {
    match value {
        Value::Object(map) => {
            if let Some(Value::String(block)) = map.get("blockID") {
                let rewritten = mapper.rewrite(block);
                map.insert("blockID".to_string(), Value::from(rewritten));
            }
            for (_, v) in map.iter_mut() {
                rewrite_block_ids(v, mapper);
            }
        }
        Value::Array(items) => {
            for item in items {
                rewrite_block_ids(item, mapper);
            }
        }
        _ => {}
    }
}
