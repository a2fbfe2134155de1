// src/validate.rs
//
// =============================================================================
// FLOWBRIDGE: STRUCTURAL VALIDATION
// =============================================================================
//
// Checks the unified-model invariants between parse and generation. We
// prefer failing fast with actionable findings rather than letting a
// malformed model reach a generator.
//
// Invariants checked (recursively into iteration bodies):
// 1. Edge endpoints reference existing nodes in the same workflow.
// 2. Exactly one Start, at least one End (bodies may trade the End for an
//    iteration output selector).
// 3. NodeOutput references respect topological order; no cycles outside
//    iteration boundaries.
// 4. NodeOutput references name an output the target actually exposes.
// 5. Condition cases: unique case_id, default branch last in level order.
// 6. Classifier: at most one default class.
// 7. Nested IDs are disjoint from the enclosing workflow's.

use crate::error::{ConvertError, Result};
use crate::model::{
    Document, NodeConfig, VariableReference, Workflow,
};
use crate::vars;
use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};
use std::collections::{HashMap, HashSet};

/// One finding; `node_id` is empty for workflow-level issues.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationIssue {
    pub node_id: String,
    pub message: String,
}

impl ValidationIssue {
    fn workflow(message: impl Into<String>) -> Self {
        Self {
            node_id: String::new(),
            message: message.into(),
        }
    }

    fn node(id: &str, message: impl Into<String>) -> Self {
        Self {
            node_id: id.to_string(),
            message: message.into(),
        }
    }
}

/// Validate a document; `Err(StructuralValidation)` lists every finding.
pub fn validate_document(doc: &Document) -> Result<()> {
    let issues = collect_issues(doc);
    if issues.is_empty() {
        return Ok(());
    }
    Err(ConvertError::StructuralValidation {
        issues: issues
            .into_iter()
            .map(|i| {
                if i.node_id.is_empty() {
                    i.message
                } else {
                    format!("[{}] {}", i.node_id, i.message)
                }
            })
            .collect(),
    })
}

/// Collect findings without failing; the CLI uses this for `validate`.
pub fn collect_issues(doc: &Document) -> Vec<ValidationIssue> {
    let mut issues = Vec::new();
    let mut seen_ids = HashSet::new();
    check_workflow(&doc.workflow, false, &mut seen_ids, &mut issues);
    issues
}

fn check_workflow(
    wf: &Workflow,
    is_iteration_body: bool,
    seen_ids: &mut HashSet<String>,
    issues: &mut Vec<ValidationIssue>,
) {
    if wf.nodes.is_empty() {
        issues.push(ValidationIssue::workflow("workflow contains no nodes"));
        return;
    }

    // --- ID uniqueness, across nesting levels (invariant 7) ---
    for n in &wf.nodes {
        if n.id.trim().is_empty() {
            issues.push(ValidationIssue::workflow("node with empty id"));
        } else if !seen_ids.insert(n.id.clone()) {
            issues.push(ValidationIssue::node(&n.id, "duplicate node id"));
        }
    }

    // --- Start/End cardinality (invariant 2) ---
    let start_count = wf
        .nodes
        .iter()
        .filter(|n| matches!(n.config, NodeConfig::Start(_)))
        .count();
    if start_count != 1 {
        issues.push(ValidationIssue::workflow(format!(
            "expected exactly one start node, found {start_count}"
        )));
    }
    let end_count = wf.end_nodes().count();
    if end_count == 0 && !is_iteration_body {
        issues.push(ValidationIssue::workflow("workflow has no end node"));
    }

    // --- Edge endpoints (invariant 1) + cycle detection (invariant 3) ---
    let mut graph: DiGraph<&str, ()> = DiGraph::new();
    let mut index: HashMap<&str, NodeIndex> = HashMap::new();
    for n in &wf.nodes {
        index.insert(n.id.as_str(), graph.add_node(n.id.as_str()));
    }
    for e in &wf.edges {
        match (index.get(e.source.as_str()), index.get(e.target.as_str())) {
            (Some(&s), Some(&t)) => {
                graph.add_edge(s, t, ());
            }
            (missing_src, _) => {
                let which = if missing_src.is_none() {
                    &e.source
                } else {
                    &e.target
                };
                issues.push(ValidationIssue::workflow(format!(
                    "edge '{}' references unknown node '{}'",
                    e.id, which
                )));
            }
        }
    }

    let topo_position: HashMap<&str, usize> = match toposort(&graph, None) {
        Ok(order) => order
            .iter()
            .enumerate()
            .map(|(pos, idx)| (graph[*idx], pos))
            .collect(),
        Err(cycle) => {
            issues.push(ValidationIssue::node(
                graph[cycle.node_id()],
                "workflow graph contains a cycle",
            ));
            HashMap::new()
        }
    };

    // --- Per-node checks ---
    for n in &wf.nodes {
        for input in &n.inputs {
            if let Some(reference) = &input.reference {
                check_reference(wf, &n.id, &input.name, reference, &topo_position, issues);
            }
        }

        match &n.config {
            NodeConfig::Condition(cfg) => {
                let mut case_ids = HashSet::new();
                for case in &cfg.cases {
                    if !case_ids.insert(case.case_id.as_str()) {
                        issues.push(ValidationIssue::node(
                            &n.id,
                            format!("duplicate case id '{}'", case.case_id),
                        ));
                    }
                }
                // Default branch must not precede a conditional one
                // (invariant 5: level ordering puts it last).
                let mut sorted: Vec<_> = cfg.cases.iter().collect();
                sorted.sort_by_key(|c| c.level);
                let first_default = sorted.iter().position(|c| c.is_default());
                if let Some(pos) = first_default {
                    if sorted.iter().skip(pos + 1).any(|c| !c.is_default()) {
                        issues.push(ValidationIssue::node(
                            &n.id,
                            "default case precedes conditional cases in level order",
                        ));
                    }
                }
            }
            NodeConfig::Classifier(cfg) => {
                let defaults = cfg.classes.iter().filter(|c| c.is_default).count();
                if defaults > 1 {
                    issues.push(ValidationIssue::node(
                        &n.id,
                        format!("{defaults} classes marked default (at most one allowed)"),
                    ));
                }
                if cfg.classes.is_empty() {
                    issues.push(ValidationIssue::node(&n.id, "classifier without classes"));
                }
            }
            NodeConfig::Iteration(cfg) => {
                // Bodies may omit End only when the container names its
                // own output selector (or the body is empty).
                let body_has_end = cfg.body.end_nodes().count() > 0;
                if !cfg.body.nodes.is_empty() && !body_has_end && cfg.output_selector.is_none() {
                    issues.push(ValidationIssue::node(
                        &n.id,
                        "iteration body has neither an end node nor an output selector",
                    ));
                }
                if !cfg.body.nodes.is_empty() {
                    check_workflow(&cfg.body, true, seen_ids, issues);
                }
            }
            NodeConfig::End(cfg) => {
                for out in &cfg.outputs {
                    if let Some(reference) = &out.reference {
                        check_reference(wf, &n.id, &out.variable, reference, &topo_position, issues);
                    }
                }
            }
            _ => {}
        }
    }
}

fn check_reference(
    wf: &Workflow,
    owner_id: &str,
    field: &str,
    reference: &VariableReference,
    topo_position: &HashMap<&str, usize>,
    issues: &mut Vec<ValidationIssue>,
) {
    if let Err(e) = vars::validate_reference(reference, wf) {
        issues.push(ValidationIssue::node(
            owner_id,
            format!("input '{field}': {e}"),
        ));
        return;
    }

    // Topological precedence (invariant 3): the producer must come before
    // the consumer. Only checkable when both live in this workflow level
    // and the graph was acyclic.
    if let VariableReference::NodeOutput { node_id, .. } = reference {
        if let (Some(&producer), Some(&consumer)) = (
            topo_position.get(node_id.as_str()),
            topo_position.get(owner_id),
        ) {
            if producer > consumer && wf.node(node_id).is_some() {
                issues.push(ValidationIssue::node(
                    owner_id,
                    format!("input '{field}' references downstream node '{node_id}'"),
                ));
            }
        }
    }
}
