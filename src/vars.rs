// src/vars.rs
//
// =============================================================================
// FLOWBRIDGE: VARIABLE REFERENCE SYSTEM
// =============================================================================
//
// Parse, validate, and rewrite variable references across three textual
// template dialects plus the structured selector form.
//
// Dialects:
//   D1 (bare)       {{name}}                    iFlytek & Coze prompt binding
//   D2 (addressed)  {{#nodeId.outputName#}}     Dify templates
//   D3 (canonical)  {{$nodes.nodeId.outputName}} internal round-trip form
//
// Rewrites always splice by the exact matched substring; text between
// matches is preserved byte-for-byte. Never string-replace a node-ID-like
// fragment in free text.

use crate::error::{ConvertError, Location, Result};
use crate::model::{NodeConfig, NodeType, VariableReference, Workflow};
use crate::platforms::Platform;
use lazy_static::lazy_static;
use regex::Regex;
use std::ops::Range;

lazy_static! {
    // The output-name group rejects dots, so the split lands on the LAST
    // dot; iFlytek ids ("llm_node::<uuid>") contain no dots of their own.
    static ref RE_ADDRESSED: Regex = Regex::new(r"\{\{#(.+?)\.([^.#}]+)#\}\}").unwrap();
    static ref RE_CANONICAL: Regex = Regex::new(r"\{\{\$nodes\.(.+?)\.([^.}]+)\}\}").unwrap();
    static ref RE_BARE: Regex = Regex::new(r"\{\{\s*([A-Za-z_][A-Za-z0-9_]*)\s*\}\}").unwrap();
    // Opening braces + identifier; completeness is checked by hand because
    // the regex crate has no lookahead.
    static ref RE_FRAGMENT: Regex = Regex::new(r"\{\{\s*([A-Za-z_][A-Za-z0-9_]*)").unwrap();
}

// ============================================================================
// 1. DIALECTS & TOKENS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    /// `{{name}}` — legal only where a single variable name is in scope.
    Bare,
    /// `{{#nodeId.outputName#}}`
    Addressed,
    /// `{{$nodes.nodeId.outputName}}`
    Canonical,
}

impl Dialect {
    /// The template dialect a platform's prompt fields speak.
    pub fn for_platform(platform: Platform) -> Dialect {
        match platform {
            Platform::Dify => Dialect::Addressed,
            Platform::IFlytek | Platform::Coze => Dialect::Bare,
        }
    }
}

/// What a template token points at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefTarget {
    /// A bare name; the owning node's inputs decide what it means.
    Named { name: String },
    /// A node-qualified output.
    Qualified { node_id: String, output: String },
}

/// One reference found in template text, with its exact matched span.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateToken {
    pub range: Range<usize>,
    pub text: String,
    pub dialect: Dialect,
    pub target: RefTarget,
}

// ============================================================================
// 2. PARSING
// ============================================================================

/// Find every reference in `text`, in document order.
///
/// Addressed and canonical forms are matched before bare ones so that
/// `{{#a.b#}}` is never re-reported as a bare `{{a}}`.
pub fn parse_refs(text: &str) -> Vec<TemplateToken> {
    let mut tokens: Vec<TemplateToken> = Vec::new();

    for caps in RE_ADDRESSED.captures_iter(text) {
        let whole = caps.get(0).unwrap();
        tokens.push(TemplateToken {
            range: whole.range(),
            text: whole.as_str().to_string(),
            dialect: Dialect::Addressed,
            target: RefTarget::Qualified {
                node_id: caps[1].to_string(),
                output: caps[2].to_string(),
            },
        });
    }

    for caps in RE_CANONICAL.captures_iter(text) {
        let whole = caps.get(0).unwrap();
        tokens.push(TemplateToken {
            range: whole.range(),
            text: whole.as_str().to_string(),
            dialect: Dialect::Canonical,
            target: RefTarget::Qualified {
                node_id: caps[1].to_string(),
                output: caps[2].to_string(),
            },
        });
    }

    for caps in RE_BARE.captures_iter(text) {
        let whole = caps.get(0).unwrap();
        if tokens.iter().any(|t| overlaps(&t.range, &whole.range())) {
            continue;
        }
        tokens.push(TemplateToken {
            range: whole.range(),
            text: whole.as_str().to_string(),
            dialect: Dialect::Bare,
            target: RefTarget::Named {
                name: caps[1].to_string(),
            },
        });
    }

    tokens.sort_by_key(|t| t.range.start);
    tokens
}

/// Incomplete `{{name` fragments (missing the closing braces).
///
/// Some hand-edited sources carry these; generation tries to repair them
/// when exactly one declared input matches the name.
pub fn parse_dangling(text: &str) -> Vec<TemplateToken> {
    let complete = parse_refs(text);
    let mut out = Vec::new();

    for caps in RE_FRAGMENT.captures_iter(text) {
        let whole = caps.get(0).unwrap();
        if complete.iter().any(|t| overlaps(&t.range, &whole.range())) {
            continue;
        }
        let rest = &text[whole.end()..];
        if rest.trim_start().starts_with("}}") {
            // Padded but complete, RE_BARE just missed it due to inner
            // whitespace followed by text; treat as complete.
            continue;
        }
        out.push(TemplateToken {
            range: whole.range(),
            text: whole.as_str().to_string(),
            dialect: Dialect::Bare,
            target: RefTarget::Named {
                name: caps[1].to_string(),
            },
        });
    }
    out
}

fn overlaps(a: &Range<usize>, b: &Range<usize>) -> bool {
    a.start < b.end && b.start < a.end
}

// ============================================================================
// 3. EMISSION & REWRITING
// ============================================================================

/// Render a node-qualified reference in the requested dialect.
pub fn render(node_id: &str, output: &str, dialect: Dialect) -> String {
    match dialect {
        Dialect::Bare => format!("{{{{{output}}}}}"),
        Dialect::Addressed => format!("{{{{#{node_id}.{output}#}}}}"),
        Dialect::Canonical => format!("{{{{$nodes.{node_id}.{output}}}}}"),
    }
}

/// Rewrite every reference in `text` through `map`, splicing replacements
/// in by exact matched range (reverse order so earlier ranges stay valid).
///
/// `map` returns `None` to leave a token untouched.
pub fn rewrite(text: &str, mut map: impl FnMut(&TemplateToken) -> Option<String>) -> String {
    let tokens = parse_refs(text);
    let mut out = text.to_string();
    for token in tokens.iter().rev() {
        if let Some(replacement) = map(token) {
            out.replace_range(token.range.clone(), &replacement);
        }
    }
    out
}

// ============================================================================
// 4. VALIDATION
// ============================================================================

/// Check a structured reference against a workflow.
pub fn validate_reference(reference: &VariableReference, workflow: &Workflow) -> Result<()> {
    match reference {
        VariableReference::NodeOutput {
            node_id,
            output_name,
            ..
        } => {
            let node = workflow.node_deep(node_id).ok_or_else(|| {
                ConvertError::ReferenceUndefined {
                    reference: format!("{node_id}.{output_name}"),
                    location: Location::node(node_id.clone()),
                }
            })?;
            // Start nodes expose their declared variables as outputs.
            let found = node.output(output_name).is_some()
                || matches!(&node.config, NodeConfig::Start(s)
                    if s.variables.iter().any(|v| v.name == *output_name));
            if !found {
                return Err(ConvertError::ReferenceUndefined {
                    reference: format!("{node_id}.{output_name}"),
                    location: Location::field(node_id.clone(), output_name.clone()),
                });
            }
            Ok(())
        }
        VariableReference::Literal { value, .. } => {
            if value.is_null() {
                return Err(ConvertError::schema("literal reference carries no value"));
            }
            Ok(())
        }
        VariableReference::Template { text } => {
            if text.trim().is_empty() {
                return Err(ConvertError::schema("template reference is empty"));
            }
            Ok(())
        }
    }
}

// ============================================================================
// 5. CROSS-PLATFORM OUTPUT-FIELD ALIASING
// ============================================================================

/// When lowering `NodeOutput{n, o}` to a target platform, the field name may
/// change depending on the *source* node's type. Code and Start keep the
/// user-declared name everywhere.
pub fn aliased_output(source_type: NodeType, target: Platform, declared: &str) -> String {
    match (source_type, target) {
        (NodeType::Classifier, _) => "class_name".to_string(),
        (NodeType::Llm, Platform::Dify) => "text".to_string(),
        (NodeType::Iteration, Platform::Dify) => "output".to_string(),
        _ => declared.to_string(),
    }
}

/// Marker embedded in the IDs of synthetic iteration entry nodes.
pub const ITERATION_START_MARKER: &str = "iteration-node-start";

/// Inside a sub-workflow, references to the body's own Start (or to a node
/// carrying the iteration-start marker) mean "the current element" and
/// rewrite to `[container_id, "item"]`.
pub fn is_iteration_item_ref(node_id: &str, output: &str, body_start_id: Option<&str>) -> bool {
    if node_id.contains(ITERATION_START_MARKER) {
        return true;
    }
    match body_start_id {
        Some(start) => node_id == start && matches!(output, "input" | "steps" | "item"),
        None => false,
    }
}

// ============================================================================
// 6. ID-FRAGMENT SANITIZER
// ============================================================================

/// Reduce arbitrary text to an ID-safe fragment: ASCII letters, digits,
/// underscore, and common CJK. Truncated to 20 code points. User-visible
/// strings are never sanitized; this is for handles and derived IDs only.
pub fn sanitize_id_fragment(s: &str) -> String {
    s.chars()
        .filter(|c| {
            c.is_ascii_alphanumeric()
                || *c == '_'
                || matches!(*c, '\u{4E00}'..='\u{9FFF}' | '\u{3400}'..='\u{4DBF}')
        })
        .take(20)
        .collect()
}
