use flowbridge::idmap::{derive_case_handle, SeededIds};
use flowbridge::model::{
    ComparisonOperator, Condition, ConditionCase, LogicalOperator, NodeType,
};
use flowbridge::platforms::Platform;
use flowbridge::types::DataType;
use flowbridge::vars::{
    aliased_output, parse_dangling, parse_refs, render, rewrite, sanitize_id_fragment, Dialect,
    RefTarget,
};
use std::collections::HashSet;

#[test]
fn test_parse_three_dialects() {
    let text = "a {{name}} b {{#node1.out#}} c {{$nodes.node2.result}} d";
    let tokens = parse_refs(text);
    assert_eq!(tokens.len(), 3);

    assert_eq!(tokens[0].dialect, Dialect::Bare);
    assert_eq!(tokens[0].text, "{{name}}");
    assert_eq!(
        tokens[0].target,
        RefTarget::Named {
            name: "name".to_string()
        }
    );

    assert_eq!(tokens[1].dialect, Dialect::Addressed);
    assert_eq!(
        tokens[1].target,
        RefTarget::Qualified {
            node_id: "node1".to_string(),
            output: "out".to_string()
        }
    );

    assert_eq!(tokens[2].dialect, Dialect::Canonical);
    assert_eq!(
        tokens[2].target,
        RefTarget::Qualified {
            node_id: "node2".to_string(),
            output: "result".to_string()
        }
    );
}

#[test]
fn test_addressed_is_not_reparsed_as_bare() {
    let tokens = parse_refs("{{#a.b#}}");
    assert_eq!(tokens.len(), 1);
    assert_eq!(tokens[0].dialect, Dialect::Addressed);
}

#[test]
fn test_addressed_splits_on_last_dot() {
    // iFlytek IDs carry "::" but no dots; a dotted prefix still resolves.
    let tokens = parse_refs("{{#llm_node::abc-def.output#}}");
    assert_eq!(
        tokens[0].target,
        RefTarget::Qualified {
            node_id: "llm_node::abc-def".to_string(),
            output: "output".to_string()
        }
    );
}

#[test]
fn test_rewrite_preserves_surrounding_text() {
    let text = "前缀 {{#n1.out#}} 中缀 {{free}} 后缀";
    let out = rewrite(text, |token| match &token.target {
        RefTarget::Qualified { node_id, output } => {
            Some(render(node_id, output, Dialect::Canonical))
        }
        RefTarget::Named { .. } => None,
    });
    assert_eq!(out, "前缀 {{$nodes.n1.out}} 中缀 {{free}} 后缀");
}

#[test]
fn test_render_dialects() {
    assert_eq!(render("n", "o", Dialect::Bare), "{{o}}");
    assert_eq!(render("n", "o", Dialect::Addressed), "{{#n.o#}}");
    assert_eq!(render("n", "o", Dialect::Canonical), "{{$nodes.n.o}}");
}

#[test]
fn test_dangling_fragment_detection() {
    let frags = parse_dangling("hello {{broken and {{whole}} more");
    assert_eq!(frags.len(), 1);
    assert_eq!(frags[0].text, "{{broken");

    assert!(parse_dangling("all {{good}} here").is_empty());
}

#[test]
fn test_sanitizer_keeps_cjk_and_truncates() {
    assert_eq!(sanitize_id_fragment("你好 world!@#"), "你好world");
    assert_eq!(sanitize_id_fragment("---"), "");
    let long = "a".repeat(40);
    assert_eq!(sanitize_id_fragment(&long).chars().count(), 20);
}

#[test]
fn test_output_field_aliasing() {
    assert_eq!(aliased_output(NodeType::Llm, Platform::Dify, "output"), "text");
    assert_eq!(
        aliased_output(NodeType::Classifier, Platform::Coze, "whatever"),
        "class_name"
    );
    assert_eq!(
        aliased_output(NodeType::Iteration, Platform::Dify, "result"),
        "output"
    );
    // Code and Start keep the user-declared name.
    assert_eq!(aliased_output(NodeType::Code, Platform::Dify, "result"), "result");
    assert_eq!(
        aliased_output(NodeType::Start, Platform::Coze, "query"),
        "query"
    );
    assert_eq!(aliased_output(NodeType::Llm, Platform::Coze, "output"), "output");
}

fn case(case_id: &str, operator: ComparisonOperator, value: &str) -> ConditionCase {
    ConditionCase {
        case_id: case_id.to_string(),
        conditions: vec![Condition {
            variable_selector: vec!["start".to_string(), "q".to_string()],
            comparison_operator: operator,
            value: value.to_string(),
            var_type: DataType::String,
        }],
        logical_operator: LogicalOperator::And,
        level: 1,
    }
}

#[test]
fn test_case_handle_keeps_canonical_tokens() {
    let mut used = HashSet::new();
    let mut ids = SeededIds::new(1);
    let handle = derive_case_handle(&case("true", ComparisonOperator::Equal, "x"), &mut used, &mut ids);
    assert_eq!(handle, "true");
}

#[test]
fn test_case_handle_semantic_derivation() {
    let mut used = HashSet::new();
    let mut ids = SeededIds::new(1);
    let handle = derive_case_handle(
        &case("branch::u1", ComparisonOperator::Equal, "退款"),
        &mut used,
        &mut ids,
    );
    assert_eq!(handle, "is_退款");

    // Same derivation again must stay unique within the node.
    let again = derive_case_handle(
        &case("branch::u2", ComparisonOperator::Equal, "退款"),
        &mut used,
        &mut ids,
    );
    assert_eq!(again, "is_退款_1");
}

#[test]
fn test_case_handle_empty_value_falls_back() {
    let mut used = HashSet::new();
    let mut ids = SeededIds::new(1);
    let handle = derive_case_handle(
        &case("branch::u3", ComparisonOperator::NotEmpty, "!!!"),
        &mut used,
        &mut ids,
    );
    assert_eq!(handle, "filled_condition");
}
