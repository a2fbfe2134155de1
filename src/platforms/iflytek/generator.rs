// src/platforms/iflytek/generator.rs
//
// =============================================================================
// FLOWBRIDGE: IFLYTEK GENERATOR
// =============================================================================
//
// Lowers a unified model into a flowMeta/flowData descriptor.
//
// The tree is built with SOURCE node IDs throughout; new "<token>::<uuid>"
// IDs are allocated into an IdMapper up front and a single finalize walk
// rewrites every ID-bearing field afterwards. Prompt templates are lowered
// to the bare `{{name}}` dialect, bound through node inputs.

use super::{
    CaseParam, CondParam, ConditionParam, EndParam, FlowData, FlowDocument, FlowEdge, FlowMeta,
    FlowNode, FlowNodeData, FlowPort, FlowPosition, FlowRef, FlowSchema, FlowSize, FlowSubGraph,
    FlowValue, IntentParam, IterationParam, DEFAULT_DOMAIN, DEFAULT_SERVICE_ID,
};
use crate::convert::PlatformGenerator;
use crate::error::{ConvertError, Result, Warnings};
use crate::idmap::{IdMapper, IdSource};
use crate::model::*;
use crate::platforms::Platform;
use crate::vars::{self, Dialect, RefTarget, ITERATION_START_MARKER};
use serde_json::{Map, Value};

/// Spark service IDs we can pass through unchanged.
const KNOWN_SERVICES: [&str; 4] = ["bm4", "spark", "xdeepseekv3", "x1"];

pub struct IFlytekGenerator;

impl PlatformGenerator for IFlytekGenerator {
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
        };

        emit.allocate_ids(&doc.workflow);

        let mut data = FlowData::default();
        for node in &doc.workflow.nodes {
            data.nodes.push(emit.emit_node(node)?);
        }
        for edge in &doc.workflow.edges {
            data.edges.push(emit.emit_edge(edge));
        }

        finalize(&mut data, &emit.mapper);

        let meta = envelope(doc);
        let out = FlowDocument { meta, data };
        let yaml = serde_yaml::to_string(&out)
            .map_err(|e| ConvertError::input(Platform::IFlytek, format!("serialize: {e}")))?;
        Ok(yaml.into_bytes())
    }
}

fn envelope(doc: &Document) -> FlowMeta {
    let extra = doc
        .platform_meta
        .fields_for(Platform::IFlytek)
        .cloned()
        .unwrap_or_default();
    FlowMeta {
        name: doc.metadata.name.clone(),
        description: doc.metadata.description.clone(),
        avatar_icon: doc.metadata.ui.icon.clone(),
        avatar_color: doc.metadata.ui.icon_background.clone(),
        prologue: doc.metadata.ui.opening_statement.clone(),
        input_example: doc.metadata.ui.suggested_questions.clone(),
        extra,
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
}

impl<'a> Emit<'a> {
    /// Allocate "<token>::<uuid>" IDs for every node, nested bodies
    /// included. Source IDs that already fit the shape are kept.
    fn allocate_ids(&mut self, workflow: &Workflow) {
        let mut nodes: Vec<&Node> = Vec::new();
        workflow.visit_nodes(&mut |n| nodes.push(n));

        for node in nodes {
            let token = self.token_for(node);
            let keep = node.id.starts_with(&format!("{token}::")) && !self.mapper.is_used(&node.id);
            let new_id = if keep {
                node.id.clone()
            } else if node.id.contains(ITERATION_START_MARKER)
                || matches!(&node.config, NodeConfig::Start(s) if s.parent_id.is_some())
            {
                format!("{ITERATION_START_MARKER}::{}", self.ids.uuid())
            } else {
                format!("{token}::{}", self.ids.uuid())
            };
            self.mapper.insert(node.id.clone(), new_id);
        }
    }

    fn token_for(&self, node: &Node) -> String {
        if let NodeConfig::Start(s) = &node.config {
            if s.parent_id.is_some() {
                return ITERATION_START_MARKER.to_string();
            }
        }
        match Platform::IFlytek.node_token(node.node_type()) {
            Some(t) => t.to_string(),
            None => match &node.config {
                NodeConfig::Unsupported(u) if !u.platform_type.is_empty() => {
                    u.platform_type.clone()
                }
                _ => "unsupported".to_string(),
            },
        }
    }

    // ------------------------------------------------------------------
    // Node emission
    // ------------------------------------------------------------------

    fn emit_node(&mut self, node: &Node) -> Result<FlowNode> {
        let mut data = FlowNodeData {
            label: node.title.clone(),
            description: node.description.clone(),
            ..Default::default()
        };

        match &node.config {
            NodeConfig::Start(cfg) => self.emit_start(cfg, &mut data),
            NodeConfig::End(cfg) => self.emit_end(node, cfg, &mut data),
            NodeConfig::Llm(cfg) => self.emit_llm(node, cfg, &mut data),
            NodeConfig::Code(cfg) => self.emit_code(node, cfg, &mut data),
            NodeConfig::Condition(cfg) => self.emit_condition(node, cfg, &mut data),
            NodeConfig::Classifier(cfg) => self.emit_classifier(node, cfg, &mut data),
            NodeConfig::Iteration(cfg) => self.emit_iteration(node, cfg, &mut data)?,
            NodeConfig::Unsupported(cfg) => {
                self.warnings.push_at(
                    "unsupported-node",
                    format!("emitting placeholder for '{}'", cfg.platform_type),
                    Some(node.id.clone()),
                );
            }
        }

        if let Some(parent) = &node.iteration_id {
            data.parent_id = Some(parent.clone());
        }

        Ok(FlowNode {
            id: node.id.clone(),
            node_type: self.token_for(node),
            data,
            position: FlowPosition {
                x: node.position.x,
                y: node.position.y,
            },
            size: Some(FlowSize {
                width: node.size.width,
                height: node.size.height,
            }),
        })
    }

    fn emit_start(&mut self, cfg: &StartConfig, data: &mut FlowNodeData) {
        for var in &cfg.variables {
            data.outputs.push(FlowPort {
                name: var.name.trim().to_string(),
                required: var.required,
                schema: FlowSchema {
                    data_type: var.data_type.to_platform(Platform::IFlytek).to_string(),
                    default: var.default.clone(),
                    max_length: var.constraints.as_ref().and_then(|c| c.max_length),
                    min_length: var.constraints.as_ref().and_then(|c| c.min_length),
                    pattern: var.constraints.as_ref().and_then(|c| c.pattern.clone()),
                    one_of: var
                        .constraints
                        .as_ref()
                        .map(|c| c.one_of.clone())
                        .unwrap_or_default(),
                    ..Default::default()
                },
            });
        }
        if let Some(parent) = &cfg.parent_id {
            data.parent_id = Some(parent.clone());
        }
    }

    fn emit_end(&mut self, node: &Node, cfg: &EndConfig, data: &mut FlowNodeData) {
        for out in &cfg.outputs {
            let value = end_output_value(out);
            data.inputs.push(FlowPort {
                name: out.variable.clone(),
                required: false,
                schema: FlowSchema {
                    data_type: self
                        .selector_type(out)
                        .to_platform(Platform::IFlytek)
                        .to_string(),
                    value,
                    ..Default::default()
                },
            });
        }

        let template = cfg
            .template
            .as_ref()
            .map(|t| self.lower_template(node, t));

        set_param(
            data,
            &EndParam {
                output_mode: match cfg.mode {
                    EndMode::Template => "template".to_string(),
                    EndMode::Variables => "variables".to_string(),
                },
                template: template.unwrap_or_default(),
                stream_output: cfg.stream_output,
            },
        );
    }

    /// value_type inference: the referenced node's declared output type
    /// wins over the input's own declaration.
    fn selector_type(&self, out: &EndOutput) -> crate::types::DataType {
        if let [node_id, field] = out.value_selector.as_slice() {
            if let Some(producer) = self.doc.workflow.node_deep(node_id) {
                if let Some(output) = producer.output(field) {
                    return output.data_type;
                }
            }
        }
        out.data_type
    }

    fn emit_llm(&mut self, node: &Node, cfg: &LlmConfig, data: &mut FlowNodeData) {
        self.emit_ports(node, data);

        let (service_id, domain) = if KNOWN_SERVICES.contains(&cfg.model.provider.as_str()) {
            (cfg.model.provider.clone(), cfg.model.name.clone())
        } else {
            self.warnings.push_at(
                "lossy-provider",
                format!(
                    "provider '{}' has no Spark mapping; using {DEFAULT_SERVICE_ID}/{DEFAULT_DOMAIN}",
                    cfg.model.provider
                ),
                Some(node.id.clone()),
            );
            (DEFAULT_SERVICE_ID.to_string(), DEFAULT_DOMAIN.to_string())
        };

        // Bind template references through inputs, then lower to {{name}}.
        let mut extra_inputs = Vec::new();
        let system = cfg
            .prompt
            .system
            .as_ref()
            .map(|t| self.lower_template_binding(node, t, &mut extra_inputs));
        let user = cfg
            .prompt
            .user
            .as_ref()
            .map(|t| self.lower_template_binding(node, t, &mut extra_inputs));
        data.inputs.extend(extra_inputs);

        let mut param = Map::new();
        param.insert("serviceId".into(), Value::from(service_id));
        param.insert("domain".into(), Value::from(domain));
        param.insert("mode".into(), Value::from(cfg.model.mode.clone()));
        // Only positive-valued sampling parameters are carried.
        if let Some(t) = cfg.parameters.temperature.filter(|t| *t > 0.0) {
            param.insert("temperature".into(), Value::from(t));
        }
        if let Some(m) = cfg.parameters.max_tokens.filter(|m| *m > 0) {
            param.insert("maxTokens".into(), Value::from(m));
        }
        if let Some(k) = cfg.parameters.top_k.filter(|k| *k > 0) {
            param.insert("topK".into(), Value::from(k));
        }
        if let Some(p) = cfg.parameters.top_p.filter(|p| *p > 0.0) {
            param.insert("topP".into(), Value::from(p));
        }
        if let Some(t) = system.filter(|t| !t.is_empty()) {
            param.insert("systemTemplate".into(), Value::from(t));
        }
        if let Some(t) = user.filter(|t| !t.is_empty()) {
            param.insert("template".into(), Value::from(t));
        }
        match cfg.parameters.response_format {
            ResponseFormat::Text => {}
            ResponseFormat::Json => {
                param.insert("respFormat".into(), Value::from("json"));
            }
            ResponseFormat::Markdown => {
                param.insert("respFormat".into(), Value::from("markdown"));
            }
        }
        if cfg.vision {
            param.insert("enableVision".into(), Value::from(true));
        }
        data.node_param = param;
    }

    fn emit_code(&mut self, node: &Node, cfg: &CodeConfig, data: &mut FlowNodeData) {
        // Only referenced inputs become variables; unnamed ones are
        // auto-named arg1, arg2, ...
        let mut arg_counter = 0;
        for input in &node.inputs {
            let Some(reference) = &input.reference else {
                continue;
            };
            let name = if input.name.trim().is_empty() {
                arg_counter += 1;
                format!("arg{arg_counter}")
            } else {
                input.name.clone()
            };
            data.inputs.push(FlowPort {
                name,
                required: input.required,
                schema: FlowSchema {
                    data_type: input.data_type.to_platform(Platform::IFlytek).to_string(),
                    value: self.reference_value(reference),
                    ..Default::default()
                },
            });
        }
        self.emit_outputs(node, data);

        let mut param = Map::new();
        // Source text travels byte-for-byte.
        param.insert("code".into(), Value::from(cfg.source.clone()));
        param.insert("language".into(), Value::from(cfg.language.as_str()));
        if !cfg.dependencies.is_empty() {
            param.insert(
                "dependencies".into(),
                Value::from(cfg.dependencies.clone()),
            );
        }
        data.node_param = param;
    }

    fn emit_condition(&mut self, node: &Node, cfg: &ConditionConfig, data: &mut FlowNodeData) {
        self.emit_ports(node, data);

        let mut cases: Vec<&ConditionCase> = cfg.cases.iter().collect();
        cases.sort_by_key(|c| (c.is_default(), c.level));

        let emitted = cases
            .iter()
            .map(|case| CaseParam {
                case_id: case.case_id.clone(),
                level: case.level,
                logical_operator: case.logical_operator.as_str().to_string(),
                conditions: case
                    .conditions
                    .iter()
                    .map(|c| CondParam {
                        variable_selector: self.alias_selector(&c.variable_selector),
                        compare_operator: c.comparison_operator.as_str().to_string(),
                        compare_value: c.value.clone(),
                        var_type: c.var_type.to_platform(Platform::IFlytek).to_string(),
                    })
                    .collect(),
            })
            .collect();

        set_param(data, &ConditionParam { cases: emitted });
    }

    fn emit_classifier(&mut self, node: &Node, cfg: &ClassifierConfig, data: &mut FlowNodeData) {
        self.emit_ports(node, data);

        let (service_id, domain) = if KNOWN_SERVICES.contains(&cfg.model.provider.as_str()) {
            (cfg.model.provider.clone(), cfg.model.name.clone())
        } else {
            (DEFAULT_SERVICE_ID.to_string(), DEFAULT_DOMAIN.to_string())
        };

        let instruction = self.lower_template(node, &cfg.instruction);

        let mut param = Map::new();
        param.insert("serviceId".into(), Value::from(service_id));
        param.insert("domain".into(), Value::from(domain));
        param.insert("queryVariable".into(), Value::from(cfg.query_variable.clone()));
        if !instruction.is_empty() {
            param.insert("instruction".into(), Value::from(instruction));
        }
        param.insert(
            "intentChains".into(),
            serde_json::to_value(
                cfg.classes
                    .iter()
                    .map(|c| IntentParam {
                        id: c.id.clone(),
                        name: c.name.clone(),
                        description: c.description.clone(),
                        is_default: c.is_default,
                    })
                    .collect::<Vec<_>>(),
            )
            .unwrap_or(Value::Null),
        );
        data.node_param = param;
    }

    fn emit_iteration(
        &mut self,
        node: &Node,
        cfg: &IterationConfig,
        data: &mut FlowNodeData,
    ) -> Result<()> {
        self.emit_ports(node, data);

        let mut sub = FlowSubGraph::default();
        let mut has_start = false;
        for inner in &cfg.body.nodes {
            if matches!(inner.config, NodeConfig::Start(_)) {
                has_start = true;
            }
            let mut emitted = self.emit_node(inner)?;
            emitted.data.parent_id = Some(node.id.clone());
            sub.nodes.push(emitted);
        }
        if !has_start {
            // The body always anchors on a synthetic entry node.
            let start_id = format!("{ITERATION_START_MARKER}::{}", self.ids.uuid());
            self.mapper.reserve(start_id.clone());
            sub.nodes.insert(
                0,
                FlowNode {
                    id: start_id,
                    node_type: ITERATION_START_MARKER.to_string(),
                    data: FlowNodeData {
                        label: "开始".to_string(),
                        parent_id: Some(node.id.clone()),
                        ..Default::default()
                    },
                    position: FlowPosition { x: 24.0, y: 68.0 },
                    size: Some(FlowSize {
                        width: 44.0,
                        height: 48.0,
                    }),
                },
            );
        }
        for edge in &cfg.body.edges {
            sub.edges.push(FlowEdge {
                id: edge.id.clone(),
                source: edge.source.clone(),
                target: edge.target.clone(),
                source_handle: edge.source_handle.clone(),
                target_handle: edge.target_handle.clone(),
            });
        }
        if !has_start {
            // Bodies lifted from formats without an explicit entry node
            // need edges from the synthetic start to every entry block.
            let start_id = sub.nodes[0].id.clone();
            let with_incoming: std::collections::HashSet<&str> =
                sub.edges.iter().map(|e| e.target.as_str()).collect();
            let entries: Vec<String> = sub
                .nodes
                .iter()
                .skip(1)
                .filter(|n| !with_incoming.contains(n.id.as_str()))
                .map(|n| n.id.clone())
                .collect();
            for target in entries {
                sub.edges.push(FlowEdge {
                    id: format!("{start_id}-{target}"),
                    source: start_id.clone(),
                    target,
                    source_handle: None,
                    target_handle: None,
                });
            }
        }
        data.iteration = Some(sub);

        let output_selector = self.resolve_iteration_output(cfg);
        set_param(
            data,
            &IterationParam {
                iterator_selector: Some(FlowRef {
                    node_id: cfg.iterator.source_node.clone(),
                    name: cfg.iterator.source_output.clone(),
                }),
                output_selector,
                start_node_id: None,
                is_parallel: cfg.execution.is_parallel,
                parallel_nums: cfg.execution.parallel_nums,
                error_handle_mode: match cfg.execution.error_handle_mode {
                    ErrorHandleMode::Terminated => "terminated".to_string(),
                    ErrorHandleMode::ContinueOnError => "continue_on_error".to_string(),
                },
                output_type: cfg.output_type.to_platform(Platform::IFlytek).to_string(),
            },
        );
        Ok(())
    }

    /// Output-selector resolution, in priority order: explicit selector,
    /// the body End's first reference, best processing node by type,
    /// last resort the final inner node.
    fn resolve_iteration_output(&mut self, cfg: &IterationConfig) -> Option<FlowRef> {
        if let Some(sel) = &cfg.output_selector {
            return Some(FlowRef {
                node_id: sel.node_id.clone(),
                name: sel.output_name.clone(),
            });
        }

        if let Some(end) = cfg.body.end_nodes().next() {
            if let NodeConfig::End(end_cfg) = &end.config {
                if let Some(out) = end_cfg.outputs.first() {
                    if let [node_id, field] = out.value_selector.as_slice() {
                        return Some(FlowRef {
                            node_id: node_id.clone(),
                            name: field.clone(),
                        });
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
        if let Some((node, _)) = best {
            let field = node
                .outputs
                .first()
                .map(|o| o.name.clone())
                .unwrap_or_else(|| "output".to_string());
            return Some(FlowRef {
                node_id: node.id.clone(),
                name: field,
            });
        }

        cfg.body
            .nodes
            .iter()
            .rev()
            .find(|n| !matches!(n.config, NodeConfig::Start(_) | NodeConfig::End(_)))
            .map(|n| FlowRef {
                node_id: n.id.clone(),
                name: "output".to_string(),
            })
    }

    /// Handles pass through unchanged: iFlytek addresses branches by the
    /// case/intent IDs the unified model already carries.
    fn emit_edge(&mut self, edge: &Edge) -> FlowEdge {
        FlowEdge {
            id: edge.id.clone(),
            source: edge.source.clone(),
            target: edge.target.clone(),
            source_handle: edge.source_handle.clone(),
            target_handle: edge.target_handle.clone(),
        }
    }

    // ------------------------------------------------------------------
    // Shared port plumbing
    // ------------------------------------------------------------------

    fn emit_ports(&mut self, node: &Node, data: &mut FlowNodeData) {
        for input in &node.inputs {
            data.inputs.push(FlowPort {
                name: input.name.clone(),
                required: input.required,
                schema: FlowSchema {
                    data_type: input.data_type.to_platform(Platform::IFlytek).to_string(),
                    value: input
                        .reference
                        .as_ref()
                        .and_then(|r| self.reference_value(r)),
                    default: input.default.clone(),
                    ..Default::default()
                },
            });
        }
        self.emit_outputs(node, data);
    }

    fn emit_outputs(&mut self, node: &Node, data: &mut FlowNodeData) {
        for output in &node.outputs {
            data.outputs.push(FlowPort {
                name: output.name.clone(),
                required: output.required,
                schema: FlowSchema {
                    data_type: output.data_type.to_platform(Platform::IFlytek).to_string(),
                    default: output.default.clone(),
                    ..Default::default()
                },
            });
        }
    }

    fn reference_value(&self, reference: &VariableReference) -> Option<FlowValue> {
        match reference {
            VariableReference::NodeOutput {
                node_id,
                output_name,
                ..
            } => {
                let field = self.alias_field(node_id, output_name);
                Some(FlowValue::reference(node_id.clone(), field))
            }
            VariableReference::Literal { value, .. } => Some(FlowValue::literal(value.clone())),
            VariableReference::Template { text } => {
                Some(FlowValue::literal(Value::from(text.clone())))
            }
        }
    }

    /// Output-field aliasing keyed by the producing node's type.
    fn alias_field(&self, node_id: &str, field: &str) -> String {
        match self.doc.workflow.node_deep(node_id) {
            Some(producer) => {
                vars::aliased_output(producer.node_type(), Platform::IFlytek, field)
            }
            None => field.to_string(),
        }
    }

    fn alias_selector(&self, selector: &[String]) -> Vec<String> {
        let mut out: Vec<String> = selector.to_vec();
        if let [node_id, field] = selector {
            out[1] = self.alias_field(node_id, field);
        }
        out
    }

    // ------------------------------------------------------------------
    // Template lowering (to the bare dialect)
    // ------------------------------------------------------------------

    /// Lower qualified tokens to `{{name}}` using the node's existing
    /// inputs; unknown references stay put with a warning.
    fn lower_template(&mut self, node: &Node, text: &str) -> String {
        let mut unresolved = Vec::new();
        let out = vars::rewrite(text, |token| match &token.target {
            RefTarget::Qualified { node_id, output } => {
                match input_for(node, node_id, output) {
                    Some(name) => Some(vars::render("", &name, Dialect::Bare)),
                    None => {
                        unresolved.push(token.text.clone());
                        None
                    }
                }
            }
            RefTarget::Named { .. } => None,
        });
        for t in unresolved {
            self.warnings.push_at(
                "unresolved-template-ref",
                format!("no input binds '{t}'; left verbatim"),
                Some(node.id.clone()),
            );
        }
        out
    }

    /// Like `lower_template`, but synthesizes binding inputs for
    /// qualified references with no existing input, and repairs dangling
    /// `{{name` fragments when a unique binding exists.
    fn lower_template_binding(
        &mut self,
        node: &Node,
        text: &str,
        extra_inputs: &mut Vec<FlowPort>,
    ) -> String {
        let mut rewritten = {
            let mapper = |token: &vars::TemplateToken| match &token.target {
                RefTarget::Qualified { node_id, output } => {
                    if let Some(name) = input_for(node, node_id, output) {
                        return Some(vars::render("", &name, Dialect::Bare));
                    }
                    // Synthesize a binding input named after the output.
                    let mut name = output.clone();
                    let mut n = 1;
                    while node.input(&name).is_some()
                        || extra_inputs.iter().any(|p| p.name == name)
                    {
                        n += 1;
                        name = format!("{output}_{n}");
                    }
                    let field = self.alias_field(node_id, output);
                    extra_inputs.push(FlowPort {
                        name: name.clone(),
                        required: false,
                        schema: FlowSchema {
                            data_type: "string".to_string(),
                            value: Some(FlowValue::reference(node_id.clone(), field)),
                            ..Default::default()
                        },
                    });
                    Some(vars::render("", &name, Dialect::Bare))
                }
                RefTarget::Named { .. } => None,
            };
            vars::rewrite(text, mapper)
        };

        // Dangling `{{name` repair: close the braces when the name binds
        // to a declared input.
        let dangling = vars::parse_dangling(&rewritten);
        for frag in dangling.iter().rev() {
            if let RefTarget::Named { name } = &frag.target {
                if node.input(name).is_some() {
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

/// Input whose reference points at `node_id.output`, if any.
fn input_for(node: &Node, node_id: &str, output: &str) -> Option<String> {
    node.inputs
        .iter()
        .find(|i| {
            matches!(&i.reference, Some(VariableReference::NodeOutput {
                node_id: n, output_name: o, ..
            }) if n == node_id && o == output)
        })
        .map(|i| i.name.clone())
}

fn end_output_value(out: &EndOutput) -> Option<FlowValue> {
    match (&out.reference, out.value_selector.as_slice()) {
        (Some(VariableReference::Literal { value, .. }), _) => {
            Some(FlowValue::literal(value.clone()))
        }
        (_, [node_id, field]) => Some(FlowValue::reference(node_id.clone(), field.clone())),
        _ => None,
    }
}

fn set_param<T: serde::Serialize>(data: &mut FlowNodeData, param: &T) {
    if let Ok(Value::Object(map)) = serde_json::to_value(param) {
        data.node_param = map;
    }
}

// ============================================================================
// 2. FINALIZE PASS
// ============================================================================

/// One walk over the finished tree, rewriting every site that transports a
/// node ID through the accumulated remap table.
fn finalize(data: &mut FlowData, mapper: &IdMapper) {
    for node in &mut data.nodes {
        finalize_node(node, mapper);
    }
    for edge in &mut data.edges {
        finalize_edge(edge, mapper);
    }
}

/// Edge IDs are rebuilt from the remapped endpoints so no stale source-side
/// ID survives textually.
fn finalize_edge(edge: &mut FlowEdge, mapper: &IdMapper) {
    edge.source = mapper.rewrite(&edge.source);
    edge.target = mapper.rewrite(&edge.target);
    edge.id = match &edge.source_handle {
        Some(handle) => format!("{}|{handle}|{}", edge.source, edge.target),
        None => format!("{}|{}", edge.source, edge.target),
    };
}

fn finalize_node(node: &mut FlowNode, mapper: &IdMapper) {
    node.id = mapper.rewrite(&node.id);

    if let Some(parent) = &node.data.parent_id {
        node.data.parent_id = Some(mapper.rewrite(parent));
    }

    for port in &mut node.data.inputs {
        if let Some(value) = &mut port.schema.value {
            finalize_value(value, mapper);
        }
    }

    finalize_param(&mut node.data.node_param, mapper);

    if let Some(sub) = &mut node.data.iteration {
        for inner in &mut sub.nodes {
            finalize_node(inner, mapper);
        }
        for edge in &mut sub.edges {
            finalize_edge(edge, mapper);
        }
    }
}

fn finalize_value(value: &mut FlowValue, mapper: &IdMapper) {
    if let Some(obj) = value.content.as_object_mut() {
        if let Some(Value::String(node_id)) = obj.get("nodeId") {
            let rewritten = mapper.rewrite(node_id);
            obj.insert("nodeId".to_string(), Value::from(rewritten));
        }
    }
}

fn finalize_param(param: &mut Map<String, Value>, mapper: &IdMapper) {
    for key in ["iteratorSelector", "outputSelector"] {
        if let Some(Value::Object(sel)) = param.get_mut(key) {
            if let Some(Value::String(node_id)) = sel.get("nodeId") {
                let rewritten = mapper.rewrite(node_id);
                sel.insert("nodeId".to_string(), Value::from(rewritten));
            }
        }
    }
    if let Some(Value::String(start)) = param.get("startNodeId") {
        let rewritten = mapper.rewrite(start);
        param.insert("startNodeId".to_string(), Value::from(rewritten));
    }
    if let Some(Value::Array(cases)) = param.get_mut("cases") {
        for case in cases {
            let Some(conds) = case
                .get_mut("conditions")
                .and_then(Value::as_array_mut)
            else {
                continue;
            };
            for cond in conds {
                if let Some(Value::Array(sel)) = cond.get_mut("variableSelector") {
                    if let Some(Value::String(head)) = sel.first() {
                        let rewritten = mapper.rewrite(head);
                        sel[0] = Value::from(rewritten);
                    }
                }
            }
        }
    }
}
