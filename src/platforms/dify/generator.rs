// src/platforms/dify/generator.rs
//
// =============================================================================
// FLOWBRIDGE: DIFY GENERATOR
// =============================================================================
//
// Lowers a unified model into the flat Dify graph. Iteration bodies are
// expanded into top-level nodes with parent pointers plus a synthetic
// `custom-iteration-start` child; templates are lowered to the addressed
// `{{#nodeId.field#}}` dialect.
//
// The tree is built with SOURCE IDs; fresh 13-digit numeric IDs accumulate
// in an IdMapper and one finalize walk rewrites every ID-bearing field,
// template substrings included.

use super::{
    DifyApp, DifyDocument, DifyEdge, DifyEdgeData, DifyGraph, DifyNode, DifyNodeData,
    DifyPosition, DifyWorkflow, DEFAULT_CLASS_SUFFIX, DEFAULT_MODEL, DEFAULT_PROVIDER,
    DSL_VERSION, UI_TYPE_CUSTOM, UI_TYPE_ITERATION_START,
};
use crate::convert::PlatformGenerator;
use crate::error::{ConvertError, Result, Warnings};
use crate::idmap::{self, IdMapper, IdSource};
use crate::model::*;
use crate::platforms::Platform;
use crate::types::DataType;
use crate::vars::{self, Dialect, RefTarget};
use serde_json::{json, Map, Value};
use std::collections::{HashMap, HashSet};

/// Which form classifier edge handles take. One generator instance uses
/// exactly one style.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ClassifierHandleStyle {
    /// Sanitized class name (`售后`, `refund_1`).
    #[default]
    Semantic,
    /// Index + 1 (`1`, `2`, ...).
    Ordinal,
}

#[derive(Default)]
pub struct DifyGenerator {
    pub classifier_handles: ClassifierHandleStyle,
}

impl PlatformGenerator for DifyGenerator {
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
            handle_style: self.classifier_handles,
            iter_ctx: None,
        };

        emit.allocate_ids();

        let mut graph = DifyGraph::default();
        for node in &doc.workflow.nodes {
            match &node.config {
                NodeConfig::Iteration(cfg) => emit.emit_iteration(node, cfg, &mut graph)?,
                _ => {
                    let emitted = emit.emit_node(node)?;
                    graph.nodes.push(emitted);
                }
            }
        }
        for edge in &doc.workflow.edges {
            let emitted = emit.emit_edge(edge, false, None);
            graph.edges.push(emitted);
        }

        finalize(&mut graph, &emit.mapper);

        let document = envelope(doc, graph);
        let yaml = serde_yaml::to_string(&document)
            .map_err(|e| ConvertError::input(Platform::Dify, format!("serialize: {e}")))?;
        Ok(yaml.into_bytes())
    }
}

fn envelope(doc: &Document, graph: DifyGraph) -> DifyDocument {
    let mut features = Map::new();
    features.insert(
        "opening_statement".to_string(),
        Value::from(
            doc.metadata
                .ui
                .opening_statement
                .clone()
                .unwrap_or_default(),
        ),
    );
    features.insert(
        "suggested_questions".to_string(),
        Value::from(doc.metadata.ui.suggested_questions.clone()),
    );
    features.insert(
        "file_upload".to_string(),
        doc.workflow
            .features
            .file_upload
            .clone()
            .unwrap_or_else(|| json!({"enabled": false})),
    );
    features.insert(
        "speech_to_text".to_string(),
        doc.workflow
            .features
            .speech_to_text
            .clone()
            .unwrap_or_else(|| json!({"enabled": false})),
    );
    features.insert(
        "text_to_speech".to_string(),
        doc.workflow
            .features
            .text_to_speech
            .clone()
            .unwrap_or_else(|| json!({"enabled": false})),
    );
    features.insert("retriever_resource".to_string(), json!({"enabled": false}));
    features.insert("sensitive_word_avoidance".to_string(), json!({"enabled": false}));

    let environment_variables = doc
        .workflow
        .variables
        .iter()
        .map(|v| {
            json!({
                "name": v.name,
                "value": v.default.clone().unwrap_or(Value::from("")),
                "value_type": v.data_type.to_platform(Platform::Dify),
            })
        })
        .collect();

    DifyDocument {
        app: DifyApp {
            name: doc.metadata.name.clone(),
            description: doc.metadata.description.clone(),
            icon: doc.metadata.ui.icon.clone().unwrap_or_else(|| "🤖".to_string()),
            icon_background: doc
                .metadata
                .ui
                .icon_background
                .clone()
                .unwrap_or_else(|| "#FFEAD5".to_string()),
            mode: "workflow".to_string(),
            use_icon_as_answer_icon: false,
            extra: Default::default(),
        },
        kind: "app".to_string(),
        version: DSL_VERSION.to_string(),
        workflow: DifyWorkflow {
            conversation_variables: Vec::new(),
            environment_variables,
            features,
            graph,
        },
    }
}

// ============================================================================
// 1. EMISSION CONTEXT
// ============================================================================

/// Per-conversion mutable state; owned by the call, never escapes it.
struct Emit<'a> {
    doc: &'a Document,
    mapper: IdMapper,
    ids: &'a mut dyn IdSource,
    warnings: &'a mut Warnings,
    /// (condition node id, source case_id) -> emitted handle.
    case_handles: HashMap<(String, String), String>,
    /// (classifier node id, source class id) -> emitted class id.
    class_handles: HashMap<(String, String), String>,
    handle_style: ClassifierHandleStyle,
    iter_ctx: Option<IterCtx>,
}

struct IterCtx {
    container_id: String,
    body_start_id: Option<String>,
}

impl<'a> Emit<'a> {
    /// Fresh numeric IDs for every node; source IDs that are already
    /// numeric are kept. Iteration-start children derive from their
    /// container as `<containerNew>start`.
    fn allocate_ids(&mut self) {
        let mut nodes: Vec<&Node> = Vec::new();
        self.doc.workflow.visit_nodes(&mut |n| nodes.push(n));

        for node in &nodes {
            let numeric = !node.id.is_empty() && node.id.bytes().all(|b| b.is_ascii_digit());
            let new_id = if numeric && !self.mapper.is_used(&node.id) {
                node.id.clone()
            } else {
                self.ids.numeric().to_string()
            };
            self.mapper.insert(node.id.clone(), new_id);
        }

        for node in &nodes {
            if matches!(node.config, NodeConfig::Iteration(_)) {
                let new_container = self.mapper.rewrite(&node.id);
                let start = format!("{new_container}start");
                self.mapper.insert(start_alias(&node.id), start);
            }
        }
    }

    // ------------------------------------------------------------------
    // Plain node emission
    // ------------------------------------------------------------------

    fn emit_node(&mut self, node: &Node) -> Result<DifyNode> {
        let token = Platform::Dify
            .node_token(node.node_type())
            .unwrap_or("custom-note");

        let mut data = DifyNodeData {
            node_type: token.to_string(),
            title: node.title.clone(),
            desc: node.description.clone(),
            selected: false,
            is_in_iteration: false,
            iteration_id: None,
            rest: Map::new(),
        };

        match &node.config {
            NodeConfig::Start(cfg) => self.emit_start(cfg, &mut data),
            NodeConfig::End(cfg) => self.emit_end(cfg, &mut data),
            NodeConfig::Llm(cfg) => self.emit_llm(node, cfg, &mut data),
            NodeConfig::Code(cfg) => self.emit_code(node, cfg, &mut data),
            NodeConfig::Condition(cfg) => self.emit_condition(node, cfg, &mut data),
            NodeConfig::Classifier(cfg) => self.emit_classifier(node, cfg, &mut data),
            NodeConfig::Iteration(_) => {
                // Containers route through emit_iteration; reaching this
                // arm means a nested iteration, which Dify cannot express.
                return Err(ConvertError::generation(
                    node.id.clone(),
                    "nested iteration containers are not expressible in this format",
                ));
            }
            NodeConfig::Unsupported(cfg) => {
                self.warnings.push_at(
                    "unsupported-node",
                    format!("emitting placeholder for '{}'", cfg.platform_type),
                    Some(node.id.clone()),
                );
                data.rest
                    .insert("original_type".to_string(), Value::from(cfg.platform_type.clone()));
            }
        }

        Ok(DifyNode {
            id: node.id.clone(),
            ui_type: UI_TYPE_CUSTOM.to_string(),
            data,
            position: DifyPosition {
                x: node.position.x,
                y: node.position.y,
            },
            position_absolute: None,
            width: Some(node.size.width),
            height: Some(node.size.height),
            parent_id: None,
            extent: None,
            z_index: None,
            draggable: None,
            selectable: None,
            source_position: "right".to_string(),
            target_position: "left".to_string(),
        })
    }

    fn emit_start(&mut self, cfg: &StartConfig, data: &mut DifyNodeData) {
        let mut variables = Vec::new();
        for var in &cfg.variables {
            // Form fields cannot carry structured types.
            if matches!(var.data_type, DataType::Object | DataType::ArrayObject) {
                self.warnings.push(
                    "unsupported-start-var",
                    format!(
                        "start variable '{}' of type {} cannot be a form field; dropped",
                        var.name, var.data_type
                    ),
                );
                continue;
            }
            let name = fix_variable_name(&var.name);
            let (form_type, default_len) = if var.data_type.is_numeric() {
                ("number", 48)
            } else {
                ("text-input", 200)
            };
            let max_length = var
                .constraints
                .as_ref()
                .and_then(|c| c.max_length)
                .unwrap_or(default_len);
            variables.push(json!({
                "variable": name,
                "label": var.label.clone().unwrap_or(name.clone()),
                "type": form_type,
                "max_length": max_length,
                "required": var.required,
                "options": [],
            }));
        }
        data.rest.insert("variables".to_string(), Value::from(variables));
    }

    fn emit_end(&mut self, cfg: &EndConfig, data: &mut DifyNodeData) {
        let outputs: Vec<Value> = cfg
            .outputs
            .iter()
            .filter_map(|out| {
                let selector = match (&out.reference, out.value_selector.as_slice()) {
                    (
                        Some(VariableReference::NodeOutput {
                            node_id,
                            output_name,
                            ..
                        }),
                        _,
                    ) => self.map_selector(node_id, output_name),
                    (_, [node_id, field]) => self.map_selector(node_id, field),
                    _ => return None,
                };
                let value_type = self.selector_type(&selector, out.data_type);
                Some(json!({
                    "variable": out.variable,
                    "value_selector": selector,
                    "value_type": value_type.to_platform(Platform::Dify),
                }))
            })
            .collect();
        data.rest.insert("outputs".to_string(), Value::from(outputs));
    }

    fn emit_llm(&mut self, node: &Node, cfg: &LlmConfig, data: &mut DifyNodeData) {
        let (provider, model_name) = self.map_provider(node, &cfg.model);

        let mut completion = Map::new();
        if let Some(t) = cfg.parameters.temperature.filter(|t| *t > 0.0) {
            completion.insert("temperature".to_string(), Value::from(t));
        }
        if let Some(m) = cfg.parameters.max_tokens.filter(|m| *m > 0) {
            completion.insert("max_tokens".to_string(), Value::from(m));
        }
        if let Some(k) = cfg.parameters.top_k.filter(|k| *k > 0) {
            completion.insert("top_k".to_string(), Value::from(k));
        }
        if let Some(p) = cfg.parameters.top_p.filter(|p| *p > 0.0) {
            completion.insert("top_p".to_string(), Value::from(p));
        }
        match cfg.parameters.response_format {
            ResponseFormat::Text => {}
            ResponseFormat::Json => {
                completion.insert("response_format".to_string(), Value::from("json"));
            }
            ResponseFormat::Markdown => {
                completion.insert("response_format".to_string(), Value::from("markdown"));
            }
        }

        data.rest.insert(
            "model".to_string(),
            json!({
                "provider": provider,
                "name": model_name,
                "mode": if cfg.model.mode.is_empty() { "chat" } else { cfg.model.mode.as_str() },
                "completion_params": completion,
            }),
        );

        let mut prompt_template = Vec::new();
        if let Some(system) = &cfg.prompt.system {
            let text = self.lower_template(node, system);
            prompt_template.push(json!({
                "id": self.ids.uuid(),
                "role": "system",
                "text": text,
            }));
        }
        if let Some(user) = &cfg.prompt.user {
            let text = self.lower_template(node, user);
            prompt_template.push(json!({
                "id": self.ids.uuid(),
                "role": "user",
                "text": text,
            }));
        }
        for msg in &cfg.prompt.messages {
            let text = self.lower_template(node, &msg.text);
            prompt_template.push(json!({
                "id": self.ids.uuid(),
                "role": msg.role,
                "text": text,
            }));
        }
        data.rest
            .insert("prompt_template".to_string(), Value::from(prompt_template));

        // Context never transfers across platforms: emitted empty and off.
        data.rest.insert(
            "context".to_string(),
            json!({"enabled": false, "variable_selector": []}),
        );
        data.rest
            .insert("vision".to_string(), json!({"enabled": cfg.vision}));
    }

    fn map_provider(&mut self, node: &Node, model: &ModelConfig) -> (String, String) {
        // Dify providers are plugin paths ("langgenius/openai/openai");
        // anything else has no faithful mapping.
        if model.provider.contains('/') {
            return (model.provider.clone(), model.name.clone());
        }
        self.warnings.push_at(
            "lossy-provider",
            format!(
                "provider '{}' has no Dify mapping; using {DEFAULT_PROVIDER}/{DEFAULT_MODEL}",
                model.provider
            ),
            Some(node.id.clone()),
        );
        (DEFAULT_PROVIDER.to_string(), DEFAULT_MODEL.to_string())
    }

    fn emit_code(&mut self, node: &Node, cfg: &CodeConfig, data: &mut DifyNodeData) {
        let mut variables = Vec::new();
        let mut arg_counter = 0;
        for input in &node.inputs {
            let Some(reference) = &input.reference else {
                continue;
            };
            let selector = match reference {
                VariableReference::NodeOutput {
                    node_id,
                    output_name,
                    ..
                } => self.map_selector(node_id, output_name),
                _ => continue,
            };
            let name = if input.name.trim().is_empty() {
                arg_counter += 1;
                format!("arg{arg_counter}")
            } else {
                input.name.clone()
            };
            variables.push(json!({
                "variable": name,
                "value_selector": selector,
            }));
        }
        data.rest.insert("variables".to_string(), Value::from(variables));

        data.rest
            .insert("code_language".to_string(), Value::from(cfg.language.as_str()));
        // Source text travels byte-for-byte.
        data.rest.insert("code".to_string(), Value::from(cfg.source.clone()));

        let mut outputs = Map::new();
        for out in &node.outputs {
            outputs.insert(
                out.name.clone(),
                json!({
                    "type": out.data_type.to_platform(Platform::Dify),
                    "children": Value::Null,
                }),
            );
        }
        data.rest.insert("outputs".to_string(), Value::Object(outputs));
    }

    fn emit_condition(&mut self, node: &Node, cfg: &ConditionConfig, data: &mut DifyNodeData) {
        let mut ordered: Vec<&ConditionCase> = cfg.cases.iter().collect();
        ordered.sort_by_key(|c| c.level);

        let mut used = HashSet::new();
        used.insert("false".to_string()); // reserved for the ELSE branch

        let mut cases = Vec::new();
        for case in ordered {
            if case.is_default() {
                // Dify's ELSE branch is implicit; edges route via "false".
                self.case_handles.insert(
                    (node.id.clone(), case.case_id.clone()),
                    "false".to_string(),
                );
                continue;
            }
            let handle = idmap::derive_case_handle(case, &mut used, self.ids);
            self.case_handles
                .insert((node.id.clone(), case.case_id.clone()), handle.clone());

            let conditions: Vec<Value> = case
                .conditions
                .iter()
                .map(|c| {
                    let selector = match c.variable_selector.as_slice() {
                        [node_id, field, ..] => self.map_selector(node_id, field),
                        other => other.to_vec(),
                    };
                    json!({
                        "id": self.ids.uuid(),
                        "variable_selector": selector,
                        "comparison_operator": c.comparison_operator.as_str(),
                        "value": c.value,
                        "varType": c.var_type.to_platform(Platform::Dify),
                    })
                })
                .collect();

            cases.push(json!({
                "case_id": handle,
                "logical_operator": case.logical_operator.as_str(),
                "conditions": conditions,
            }));
        }
        data.rest.insert("cases".to_string(), Value::from(cases));
    }

    fn emit_classifier(&mut self, node: &Node, cfg: &ClassifierConfig, data: &mut DifyNodeData) {
        let (provider, model_name) = self.map_provider(node, &cfg.model);

        let mut used = HashSet::new();
        used.insert("default".to_string());

        let mut classes = Vec::new();
        for (index, class) in cfg.classes.iter().enumerate() {
            let (id, name) = if class.is_default {
                // Canonical default token; display name keeps a marker so
                // the round trip can recognize it.
                (
                    "default".to_string(),
                    format!("{}{DEFAULT_CLASS_SUFFIX}", class.name),
                )
            } else {
                let id = match self.handle_style {
                    ClassifierHandleStyle::Semantic => {
                        idmap::semantic_class_handle(&class.name, &mut used)
                    }
                    ClassifierHandleStyle::Ordinal => (index + 1).to_string(),
                };
                (id, class.name.clone())
            };
            self.class_handles
                .insert((node.id.clone(), class.id.clone()), id.clone());
            classes.push(json!({"id": id, "name": name}));
        }

        let start_id = self
            .doc
            .workflow
            .start_node()
            .map(|n| n.id.clone())
            .unwrap_or_default();

        let query_variable = cfg.query_variable.clone();
        let instruction = vars::rewrite(&cfg.instruction, |token| match &token.target {
            RefTarget::Named { name } if *name == query_variable => {
                Some(vars::render(&start_id, name, Dialect::Addressed))
            }
            RefTarget::Qualified { node_id, output } => {
                let field = self.alias_field(node_id, output);
                Some(vars::render(node_id, &field, Dialect::Addressed))
            }
            _ => None,
        });

        data.rest.insert(
            "model".to_string(),
            json!({
                "provider": provider,
                "name": model_name,
                "mode": "chat",
                "completion_params": {},
            }),
        );
        data.rest.insert("classes".to_string(), Value::from(classes));
        data.rest.insert(
            "query_variable_selector".to_string(),
            Value::from(vec![start_id, query_variable]),
        );
        data.rest.insert("instruction".to_string(), Value::from(instruction));
        // Structurally required empty fields.
        data.rest.insert("instructions".to_string(), Value::from(""));
        data.rest.insert("topics".to_string(), json!([]));
    }

    // ------------------------------------------------------------------
    // Iteration expansion
    // ------------------------------------------------------------------

    fn emit_iteration(
        &mut self,
        node: &Node,
        cfg: &IterationConfig,
        graph: &mut DifyGraph,
    ) -> Result<()> {
        let body_start_id = cfg.body.start_node().map(|n| n.id.clone());
        let start_child_id = start_alias(&node.id);

        // 1. The container itself.
        let iterator_selector = self.map_selector(&cfg.iterator.source_node, &cfg.iterator.source_output);
        let output_selector = self.resolve_iteration_output(cfg);

        let mut data = DifyNodeData {
            node_type: "iteration".to_string(),
            title: node.title.clone(),
            desc: node.description.clone(),
            selected: false,
            is_in_iteration: false,
            iteration_id: None,
            rest: Map::new(),
        };
        data.rest
            .insert("iterator_selector".to_string(), Value::from(iterator_selector));
        data.rest.insert(
            "output_selector".to_string(),
            Value::from(output_selector.clone()),
        );
        data.rest.insert(
            "output_type".to_string(),
            Value::from(cfg.output_type.to_platform(Platform::Dify)),
        );
        data.rest
            .insert("is_parallel".to_string(), Value::from(cfg.execution.is_parallel));
        data.rest.insert(
            "parallel_nums".to_string(),
            Value::from(cfg.execution.parallel_nums),
        );
        data.rest.insert(
            "error_handle_mode".to_string(),
            Value::from(match cfg.execution.error_handle_mode {
                ErrorHandleMode::Terminated => "terminated",
                ErrorHandleMode::ContinueOnError => "continue-on-error",
            }),
        );
        data.rest
            .insert("start_node_id".to_string(), Value::from(start_child_id.clone()));
        if output_selector.is_empty() {
            self.warnings.push_at(
                "empty-iteration",
                "iteration body is empty; container emitted with start node only",
                Some(node.id.clone()),
            );
        }

        graph.nodes.push(DifyNode {
            id: node.id.clone(),
            ui_type: UI_TYPE_CUSTOM.to_string(),
            data,
            position: DifyPosition {
                x: node.position.x,
                y: node.position.y,
            },
            position_absolute: None,
            width: Some(node.size.width.max(508.0)),
            height: Some(node.size.height.max(298.0)),
            parent_id: None,
            extent: None,
            z_index: None,
            draggable: None,
            selectable: None,
            source_position: "right".to_string(),
            target_position: "left".to_string(),
        });

        // 2. The synthetic entry anchor, pinned at the local origin.
        graph.nodes.push(DifyNode {
            id: start_child_id.clone(),
            ui_type: UI_TYPE_ITERATION_START.to_string(),
            data: DifyNodeData {
                node_type: "iteration-start".to_string(),
                title: String::new(),
                desc: String::new(),
                selected: false,
                is_in_iteration: true,
                iteration_id: Some(node.id.clone()),
                rest: Map::new(),
            },
            position: DifyPosition { x: 24.0, y: 68.0 },
            position_absolute: None,
            width: Some(44.0),
            height: Some(48.0),
            parent_id: Some(node.id.clone()),
            extent: Some("parent".to_string()),
            z_index: Some(1002),
            draggable: Some(false),
            selectable: Some(false),
            source_position: "right".to_string(),
            target_position: "left".to_string(),
        });

        // 3. Internal processing nodes: everything but the body's own
        // Start and End.
        self.iter_ctx = Some(IterCtx {
            container_id: node.id.clone(),
            body_start_id: body_start_id.clone(),
        });
        for inner in &cfg.body.nodes {
            if matches!(inner.config, NodeConfig::Start(_) | NodeConfig::End(_)) {
                continue;
            }
            let mut emitted = self.emit_node(inner)?;
            emitted.parent_id = Some(node.id.clone());
            emitted.extent = Some("parent".to_string());
            emitted.z_index = Some(1001);
            emitted.data.is_in_iteration = true;
            emitted.data.iteration_id = Some(node.id.clone());
            graph.nodes.push(emitted);
        }

        // 4. Body edges, rewired around the synthetic anchor and the
        // removed End node.
        let end_ids: HashSet<&str> = cfg
            .body
            .end_nodes()
            .map(|n| n.id.as_str())
            .collect();
        for edge in &cfg.body.edges {
            if end_ids.contains(edge.target.as_str()) || end_ids.contains(edge.source.as_str()) {
                continue;
            }
            let from_start = body_start_id.as_deref() == Some(edge.source.as_str());
            let mut emitted = self.emit_edge(edge, true, Some(&node.id));
            if from_start {
                emitted.source = start_child_id.clone();
                if let Some(d) = &mut emitted.data {
                    d.source_type = "iteration-start".to_string();
                }
            }
            graph.edges.push(emitted);
        }

        // Bodies lifted from formats without an explicit entry node still
        // need the anchor wired to every entry block.
        if body_start_id.is_none() {
            let with_incoming: HashSet<&str> = cfg
                .body
                .edges
                .iter()
                .map(|e| e.target.as_str())
                .collect();
            for inner in &cfg.body.nodes {
                if matches!(inner.config, NodeConfig::Start(_) | NodeConfig::End(_))
                    || with_incoming.contains(inner.id.as_str())
                {
                    continue;
                }
                graph.edges.push(DifyEdge {
                    id: format!("{start_child_id}-source-{}", inner.id),
                    source: start_child_id.clone(),
                    target: inner.id.clone(),
                    source_handle: "source".to_string(),
                    target_handle: "target".to_string(),
                    edge_type: "custom".to_string(),
                    data: Some(DifyEdgeData {
                        source_type: "iteration-start".to_string(),
                        target_type: Platform::Dify
                            .node_token(inner.node_type())
                            .unwrap_or("custom")
                            .to_string(),
                        is_in_iteration: true,
                        iteration_id: Some(node.id.clone()),
                    }),
                    z_index: Some(1002),
                });
            }
        }
        self.iter_ctx = None;

        Ok(())
    }

    /// Output-selector resolution, in priority order:
    /// (a) the explicit selector / the body End's first reference,
    /// (b) the best processing node by type (Code > LLM > Classifier >
    ///     Condition) with its canonical Dify field,
    /// (c) the last internal node with field `output`.
    fn resolve_iteration_output(&mut self, cfg: &IterationConfig) -> Vec<String> {
        if let Some(sel) = &cfg.output_selector {
            return self.map_selector(&sel.node_id, &sel.output_name);
        }

        if let Some(end) = cfg.body.end_nodes().next() {
            if let NodeConfig::End(end_cfg) = &end.config {
                if let Some(out) = end_cfg.outputs.first() {
                    if let [node_id, field] = out.value_selector.as_slice() {
                        return self.map_selector_in(&cfg.body, node_id, field);
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
            let declared = inner
                .outputs
                .first()
                .map(|o| o.name.clone())
                .unwrap_or_else(|| "output".to_string());
            let field = vars::aliased_output(inner.node_type(), Platform::Dify, &declared);
            return vec![inner.id.clone(), field];
        }

        cfg.body
            .nodes
            .iter()
            .rev()
            .find(|n| !matches!(n.config, NodeConfig::Start(_) | NodeConfig::End(_)))
            .map(|n| vec![n.id.clone(), "output".to_string()])
            .unwrap_or_default()
    }

    // ------------------------------------------------------------------
    // Edges
    // ------------------------------------------------------------------

    fn emit_edge(
        &mut self,
        edge: &Edge,
        in_iteration: bool,
        iteration_id: Option<&str>,
    ) -> DifyEdge {
        let source_node = self.doc.workflow.node_deep(&edge.source);
        let target_node = self.doc.workflow.node_deep(&edge.target);

        let source_handle = match (source_node, &edge.source_handle) {
            (Some(n), Some(handle)) => match &n.config {
                NodeConfig::Condition(_) => self
                    .case_handles
                    .get(&(edge.source.clone(), handle.clone()))
                    .cloned()
                    .unwrap_or_else(|| handle.clone()),
                NodeConfig::Classifier(_) => self
                    .class_handles
                    .get(&(edge.source.clone(), handle.clone()))
                    .cloned()
                    .unwrap_or_else(|| {
                        // Deterministic fallback keeps conversion stable.
                        idmap::classifier_hash_handle(handle).to_string()
                    }),
                _ => handle.clone(),
            },
            (_, Some(handle)) => handle.clone(),
            _ => "source".to_string(),
        };

        DifyEdge {
            // Rebuilt from the remapped endpoints during finalize.
            id: format!("{}-{}-{}", edge.source, source_handle, edge.target),
            source: edge.source.clone(),
            target: edge.target.clone(),
            source_handle,
            target_handle: "target".to_string(),
            edge_type: "custom".to_string(),
            data: Some(DifyEdgeData {
                source_type: source_node
                    .and_then(|n| Platform::Dify.node_token(n.node_type()))
                    .unwrap_or("custom")
                    .to_string(),
                target_type: target_node
                    .and_then(|n| Platform::Dify.node_token(n.node_type()))
                    .unwrap_or("custom")
                    .to_string(),
                is_in_iteration: in_iteration,
                iteration_id: iteration_id.map(str::to_string),
            }),
            z_index: in_iteration.then_some(1002),
        }
    }

    // ------------------------------------------------------------------
    // Selector & template plumbing
    // ------------------------------------------------------------------

    /// `[node, field]` with output-field aliasing and iteration-item
    /// rewriting applied. IDs stay old until finalize.
    fn map_selector(&self, node_id: &str, field: &str) -> Vec<String> {
        if let Some(ctx) = &self.iter_ctx {
            if vars::is_iteration_item_ref(node_id, field, ctx.body_start_id.as_deref()) {
                return vec![ctx.container_id.clone(), "item".to_string()];
            }
        }
        vec![node_id.to_string(), self.alias_field(node_id, field)]
    }

    fn map_selector_in(&self, body: &Workflow, node_id: &str, field: &str) -> Vec<String> {
        match body.node_deep(node_id) {
            Some(producer) => vec![
                node_id.to_string(),
                vars::aliased_output(producer.node_type(), Platform::Dify, field),
            ],
            None => vec![node_id.to_string(), field.to_string()],
        }
    }

    fn alias_field(&self, node_id: &str, field: &str) -> String {
        match self.doc.workflow.node_deep(node_id) {
            Some(producer) => vars::aliased_output(producer.node_type(), Platform::Dify, field),
            None => field.to_string(),
        }
    }

    /// The declared output type behind a selector, falling back to the
    /// consumer's declaration.
    fn selector_type(&self, selector: &[String], declared: DataType) -> DataType {
        if let [node_id, field] = selector {
            if field == "item" {
                return declared;
            }
            if let Some(producer) = self.doc.workflow.node_deep(node_id) {
                if let Some(output) = producer.output(field) {
                    return output.data_type;
                }
                // Aliased fields still resolve through the first output.
                if let Some(output) = producer.outputs.first() {
                    return output.data_type;
                }
                if let NodeConfig::Start(s) = &producer.config {
                    if let Some(v) = s.variables.iter().find(|v| v.name == *field) {
                        return v.data_type;
                    }
                }
            }
        }
        declared
    }

    /// Lower a prompt/instruction template to the addressed dialect.
    ///
    /// Qualified tokens are aliased and kept on old IDs (finalize rewrites
    /// them); bare names resolve through the node's inputs. Dangling
    /// `{{name` fragments are completed when exactly one input binds the
    /// name, otherwise left intact with a warning.
    fn lower_template(&mut self, node: &Node, text: &str) -> String {
        let mut unresolved: Vec<String> = Vec::new();
        let mut rewritten = vars::rewrite(text, |token| match &token.target {
            RefTarget::Qualified { node_id, output } => {
                let selector = self.map_selector(node_id, output);
                Some(vars::render(&selector[0], &selector[1], Dialect::Addressed))
            }
            RefTarget::Named { name } => match named_binding(node, name) {
                Some((node_id, output)) => {
                    let selector = self.map_selector(&node_id, &output);
                    Some(vars::render(&selector[0], &selector[1], Dialect::Addressed))
                }
                None => {
                    unresolved.push(token.text.clone());
                    None
                }
            },
        });

        for frag in vars::parse_dangling(&rewritten.clone()).iter().rev() {
            if let RefTarget::Named { name } = &frag.target {
                match named_binding(node, name) {
                    Some((node_id, output)) => {
                        let selector = self.map_selector(&node_id, &output);
                        rewritten.replace_range(
                            frag.range.clone(),
                            &vars::render(&selector[0], &selector[1], Dialect::Addressed),
                        );
                    }
                    None => {
                        self.warnings.push_at(
                            "dangling-template-ref",
                            format!("incomplete reference '{}' left intact", frag.text),
                            Some(node.id.clone()),
                        );
                    }
                }
            }
        }

        for t in unresolved {
            self.warnings.push_at(
                "unresolved-template-ref",
                format!("no input binds '{t}'; left verbatim"),
                Some(node.id.clone()),
            );
        }
        rewritten
    }
}

/// Resolve a bare template name through the node's declared inputs.
fn named_binding(node: &Node, name: &str) -> Option<(String, String)> {
    let input = node.input(name)?;
    match &input.reference {
        Some(VariableReference::NodeOutput {
            node_id,
            output_name,
            ..
        }) => Some((node_id.clone(), output_name.clone())),
        _ => None,
    }
}

/// Placeholder ID the start child occupies until finalize.
fn start_alias(container_id: &str) -> String {
    format!("{container_id}::iteration-start")
}

fn fix_variable_name(name: &str) -> String {
    name.trim().replace([' ', '-'], "_")
}

// ============================================================================
// 2. FINALIZE PASS
// ============================================================================

const SELECTOR_KEYS: [&str; 4] = [
    "value_selector",
    "iterator_selector",
    "output_selector",
    "query_variable_selector",
];

/// One walk over the finished graph, rewriting every ID-bearing field:
/// node ids, parent pointers, selectors, start-node pointers, and template
/// substrings.
fn finalize(graph: &mut DifyGraph, mapper: &IdMapper) {
    for node in &mut graph.nodes {
        node.id = mapper.rewrite(&node.id);
        if let Some(parent) = &node.parent_id {
            node.parent_id = Some(mapper.rewrite(parent));
        }
        if let Some(iteration) = &node.data.iteration_id {
            node.data.iteration_id = Some(mapper.rewrite(iteration));
        }
        for (key, value) in node.data.rest.iter_mut() {
            finalize_value(key, value, mapper);
        }
    }
    for edge in &mut graph.edges {
        edge.source = mapper.rewrite(&edge.source);
        edge.target = mapper.rewrite(&edge.target);
        edge.id = format!("{}-{}-{}", edge.source, edge.source_handle, edge.target);
        if let Some(data) = &mut edge.data {
            if let Some(iteration) = &data.iteration_id {
                data.iteration_id = Some(mapper.rewrite(iteration));
            }
        }
    }
}

fn finalize_value(key: &str, value: &mut Value, mapper: &IdMapper) {
    match value {
        Value::Array(items) => {
            if SELECTOR_KEYS.contains(&key) {
                if let Some(Value::String(head)) = items.first() {
                    let rewritten = mapper.rewrite(head);
                    items[0] = Value::from(rewritten);
                }
                return;
            }
            for item in items {
                finalize_value(key, item, mapper);
            }
        }
        Value::Object(map) => {
            for (k, v) in map.iter_mut() {
                finalize_value(k, v, mapper);
            }
        }
        Value::String(text) => {
            if key == "start_node_id" {
                *text = mapper.rewrite(text);
            } else if key == "text" || key == "instruction" {
                *text = vars::rewrite(text, |token| match &token.target {
                    RefTarget::Qualified { node_id, output } => Some(vars::render(
                        &mapper.rewrite(node_id),
                        output,
                        Dialect::Addressed,
                    )),
                    _ => None,
                });
            }
        }
        _ => {}
    }
}
