// Routing policy, validation failures, determinism, and round-trip
// stability of the conversion service.

use flowbridge::convert::{ConversionService, IdPolicy, StrategyRegistry};
use flowbridge::error::{ConvertError, Warnings};
use flowbridge::idmap::SeededIds;
use flowbridge::model::{NodeConfig, VariableReference};
use flowbridge::platforms::Platform;
use flowbridge::detect_platform;

const SIMPLE: &str = r#"
flowMeta:
  name: qa-bot
  description: one llm between start and end
  prologue: 你好！
flowData:
  nodes:
    - id: "start_node::00000000-0000-0000-0000-000000000051"
      type: start_node
      data:
        label: 开始
        outputs:
          - name: AGENT_USER_INPUT
            schema:
              type: string
    - id: "llm_node::00000000-0000-0000-0000-000000000052"
      type: llm_node
      data:
        label: 回答
        inputs:
          - name: query
            schema:
              type: string
              value:
                type: ref
                content:
                  nodeId: "start_node::00000000-0000-0000-0000-000000000051"
                  name: AGENT_USER_INPUT
        outputs:
          - name: output
            schema:
              type: string
        nodeParam:
          serviceId: bm4
          domain: generalv3.5
          temperature: 0.7
          template: "回答{{query}}"
    - id: "end_node::00000000-0000-0000-0000-000000000053"
      type: end_node
      data:
        label: 结束
        inputs:
          - name: result
            schema:
              type: string
              value:
                type: ref
                content:
                  nodeId: "llm_node::00000000-0000-0000-0000-000000000052"
                  name: output
  edges:
    - id: e1
      sourceNodeId: "start_node::00000000-0000-0000-0000-000000000051"
      targetNodeId: "llm_node::00000000-0000-0000-0000-000000000052"
    - id: e2
      sourceNodeId: "llm_node::00000000-0000-0000-0000-000000000052"
      targetNodeId: "end_node::00000000-0000-0000-0000-000000000053"
"#;

fn service() -> ConversionService {
    ConversionService::new().with_id_policy(IdPolicy::Seeded(7))
}

// ============================================================================
// Routing policy
// ============================================================================

#[test]
fn test_spoke_to_spoke_is_rejected_with_hub_recipe() {
    let err = service()
        .convert(b"whatever", Platform::Dify, Platform::Coze)
        .unwrap_err();

    assert_eq!(err.code(), "E_UNSUPPORTED_PATH");
    let message = err.to_string();
    assert!(message.contains("iflytek"), "hub must be named: {message}");

    let steps = err.suggestions();
    assert_eq!(steps.len(), 2);
    assert!(steps[0].contains("dify") && steps[0].contains("iflytek"));
    assert!(steps[1].contains("iflytek") && steps[1].contains("coze"));
}

#[test]
fn test_same_source_is_rejected() {
    for platform in Platform::ALL {
        let err = service()
            .convert(b"whatever", platform, platform)
            .unwrap_err();
        assert_eq!(err.code(), "E_SAME_SOURCE");
    }
}

// ============================================================================
// Parse/validation failures
// ============================================================================

#[test]
fn test_empty_workflow_is_a_schema_violation() {
    let empty = "flowMeta:\n  name: nothing\nflowData:\n  nodes: []\n  edges: []\n";
    let err = service()
        .convert(empty.as_bytes(), Platform::IFlytek, Platform::Dify)
        .unwrap_err();
    assert_eq!(err.code(), "E_SCHEMA");
}

#[test]
fn test_missing_top_level_key() {
    let err = service()
        .convert(b"flowMeta:\n  name: incomplete\n", Platform::IFlytek, Platform::Dify)
        .unwrap_err();
    assert_eq!(err.code(), "E_SCHEMA");
    assert!(err.to_string().contains("flowData"));
}

#[test]
fn test_malformed_yaml_is_an_input_error() {
    let err = service()
        .convert(b"flowMeta: [unclosed", Platform::IFlytek, Platform::Dify)
        .unwrap_err();
    assert_eq!(err.code(), "E_INPUT_FORMAT");
}

#[test]
fn test_edge_to_unknown_node_fails_structural_validation() {
    let broken = SIMPLE.replace(
        "targetNodeId: \"end_node::00000000-0000-0000-0000-000000000053\"",
        "targetNodeId: \"end_node::missing\"",
    );
    let err = service()
        .validate(broken.as_bytes(), Platform::IFlytek)
        .unwrap_err();
    match err {
        ConvertError::StructuralValidation { issues } => {
            assert!(issues.iter().any(|i| i.contains("end_node::missing")), "{issues:?}");
        }
        other => panic!("expected structural validation failure, got {other}"),
    }
}

#[test]
fn test_unsupported_node_becomes_placeholder_with_warning() {
    let with_unknown = SIMPLE.replace("type: llm_node", "type: magic_node");
    let outcome = service()
        .convert(with_unknown.as_bytes(), Platform::IFlytek, Platform::Dify)
        .expect("placeholder nodes must not abort the conversion");
    assert!(outcome
        .warnings
        .iter()
        .any(|w| w.code == "unsupported-node"));
}

// ============================================================================
// Detection
// ============================================================================

#[test]
fn test_format_detection_probes() {
    assert_eq!(detect_platform(SIMPLE.as_bytes()), Platform::IFlytek);
    assert_eq!(detect_platform(b"PK\x03\x04rest"), Platform::Coze);
    assert_eq!(
        detect_platform(b"app:\n  name: x\nkind: app\nworkflow:\n  graph: {}\n"),
        Platform::Dify
    );
    assert_eq!(
        detect_platform(b"workflow_id: '123'\nschema:\n  nodes: []\n"),
        Platform::Coze
    );
    assert_eq!(
        detect_platform(b"schema:\n  nodes: []\n"),
        Platform::Coze
    );
    // No probe matches: default to the hub.
    assert_eq!(detect_platform(b"hello: world\n"), Platform::IFlytek);
}

// ============================================================================
// Determinism
// ============================================================================

#[test]
fn test_seeded_conversion_is_byte_identical() {
    let a = service()
        .convert(SIMPLE.as_bytes(), Platform::IFlytek, Platform::Dify)
        .unwrap();
    let b = service()
        .convert(SIMPLE.as_bytes(), Platform::IFlytek, Platform::Dify)
        .unwrap();
    assert_eq!(a.bytes, b.bytes);

    let c = service()
        .convert(SIMPLE.as_bytes(), Platform::IFlytek, Platform::Coze)
        .unwrap();
    let d = service()
        .convert(SIMPLE.as_bytes(), Platform::IFlytek, Platform::Coze)
        .unwrap();
    assert_eq!(c.bytes, d.bytes);
}

// ============================================================================
// Round trips
// ============================================================================

/// Reparsing a same-platform regeneration is stable: counts, variables,
/// and reference structure survive even though IDs are reassigned.
#[test]
fn test_same_platform_reparse_is_stable() {
    let registry = StrategyRegistry::standard();
    let strategy = registry.strategy(Platform::IFlytek).expect("hub strategy");

    let mut warnings = Warnings::new();
    let original = strategy
        .parser
        .parse(SIMPLE.as_bytes(), &mut warnings)
        .expect("parse original");

    let mut ids = SeededIds::new(99);
    let regenerated = strategy
        .generator
        .generate(&original, &mut ids, &mut warnings)
        .expect("regenerate");
    let reparsed = strategy
        .parser
        .parse(&regenerated, &mut warnings)
        .expect("reparse");

    assert_eq!(reparsed.workflow.nodes.len(), original.workflow.nodes.len());
    assert_eq!(reparsed.workflow.edges.len(), original.workflow.edges.len());
    assert_eq!(reparsed.metadata.name, original.metadata.name);
    assert_eq!(
        reparsed.metadata.ui.opening_statement,
        original.metadata.ui.opening_statement
    );

    let start_vars = |doc: &flowbridge::Document| -> Vec<String> {
        match &doc.workflow.nodes[0].config {
            NodeConfig::Start(cfg) => cfg.variables.iter().map(|v| v.name.clone()).collect(),
            _ => panic!("first node must be start"),
        }
    };
    assert_eq!(start_vars(&reparsed), start_vars(&original));

    // The llm template text is untouched by a same-platform round trip.
    let llm_user = |doc: &flowbridge::Document| -> String {
        doc.workflow
            .nodes
            .iter()
            .find_map(|n| match &n.config {
                NodeConfig::Llm(cfg) => cfg.prompt.user.clone(),
                _ => None,
            })
            .expect("llm prompt")
    };
    assert_eq!(llm_user(&reparsed), llm_user(&original));
}

/// Hub round trip: iFlytek -> Dify -> iFlytek preserves node count, edge
/// count, and reference structure modulo ID renaming.
#[test]
fn test_hub_round_trip_preserves_structure() {
    let svc = service();
    let to_dify = svc
        .convert(SIMPLE.as_bytes(), Platform::IFlytek, Platform::Dify)
        .expect("outbound leg");
    let back = svc
        .convert(&to_dify.bytes, Platform::Dify, Platform::IFlytek)
        .expect("return leg");

    let (original, _) = svc.parse(SIMPLE.as_bytes(), Platform::IFlytek).unwrap();
    let (returned, _) = svc.parse(&back.bytes, Platform::IFlytek).unwrap();

    assert_eq!(returned.workflow.nodes.len(), original.workflow.nodes.len());
    assert_eq!(returned.workflow.edges.len(), original.workflow.edges.len());

    // Reference pairs (producer node kind -> consumer) form the same
    // structure: both documents wire start -> llm -> end.
    let ref_count = |doc: &flowbridge::Document| -> usize {
        let mut count = 0;
        doc.workflow.visit_nodes(&mut |n| {
            count += n
                .inputs
                .iter()
                .filter(|i| matches!(i.reference, Some(VariableReference::NodeOutput { .. })))
                .count();
        });
        count
    };
    assert_eq!(ref_count(&returned), ref_count(&original));

    // The start variable survives under its original name.
    let start = returned.workflow.start_node().expect("start node");
    match &start.config {
        NodeConfig::Start(cfg) => {
            assert_eq!(cfg.variables.len(), 1);
            assert_eq!(cfg.variables[0].name, "AGENT_USER_INPUT");
        }
        _ => unreachable!(),
    }

    // The end still consumes the llm's output.
    let end_ref = returned
        .workflow
        .nodes
        .iter()
        .find_map(|n| match &n.config {
            NodeConfig::End(cfg) => cfg.outputs.first().cloned(),
            _ => None,
        })
        .expect("end output");
    let llm_id = returned
        .workflow
        .nodes
        .iter()
        .find(|n| matches!(n.config, NodeConfig::Llm(_)))
        .map(|n| n.id.clone())
        .unwrap();
    assert_eq!(end_ref.value_selector[0], llm_id);
}
