// iFlytek -> Dify conversion scenarios.

use flowbridge::convert::{ConversionService, IdPolicy};
use flowbridge::platforms::Platform;
use serde_yaml::Value;

fn convert(input: &str) -> Value {
    let service = ConversionService::new().with_id_policy(IdPolicy::Seeded(42));
    let outcome = service
        .convert(input.as_bytes(), Platform::IFlytek, Platform::Dify)
        .expect("conversion should succeed");
    serde_yaml::from_slice(&outcome.bytes).expect("generated YAML must reparse")
}

fn graph_nodes(doc: &Value) -> &Vec<Value> {
    doc["workflow"]["graph"]["nodes"]
        .as_sequence()
        .expect("graph.nodes present")
}

fn graph_edges(doc: &Value) -> &Vec<Value> {
    doc["workflow"]["graph"]["edges"]
        .as_sequence()
        .expect("graph.edges present")
}

fn find_by_type<'a>(doc: &'a Value, node_type: &str) -> &'a Value {
    graph_nodes(doc)
        .iter()
        .find(|n| n["data"]["type"].as_str() == Some(node_type))
        .unwrap_or_else(|| panic!("no node of type {node_type}"))
}

fn id_of(node: &Value) -> &str {
    node["id"].as_str().expect("node id")
}

// ============================================================================
// Scenario: four start variables wired straight to the end
// ============================================================================

const BASIC_IO: &str = r#"
flowMeta:
  name: basic-io
  description: four start variables wired straight to the end
flowData:
  nodes:
    - id: "start_node::00000000-0000-0000-0000-000000000001"
      type: start_node
      data:
        label: 开始
        outputs:
          - name: input_01
            schema:
              type: string
          - name: input_num_01
            schema:
              type: integer
          - name: input_num_02
            schema:
              type: number
          - name: input_text_01
            schema:
              type: string
    - id: "end_node::00000000-0000-0000-0000-000000000002"
      type: end_node
      data:
        label: 结束
        inputs:
          - name: result1
            schema:
              type: string
              value:
                type: ref
                content:
                  nodeId: "start_node::00000000-0000-0000-0000-000000000001"
                  name: input_01
          - name: result2
            schema:
              type: integer
              value:
                type: ref
                content:
                  nodeId: "start_node::00000000-0000-0000-0000-000000000001"
                  name: input_num_01
          - name: result3
            schema:
              type: number
              value:
                type: ref
                content:
                  nodeId: "start_node::00000000-0000-0000-0000-000000000001"
                  name: input_num_02
          - name: result4
            schema:
              type: string
              value:
                type: ref
                content:
                  nodeId: "start_node::00000000-0000-0000-0000-000000000001"
                  name: input_text_01
  edges:
    - id: e1
      sourceNodeId: "start_node::00000000-0000-0000-0000-000000000001"
      targetNodeId: "end_node::00000000-0000-0000-0000-000000000002"
"#;

#[test]
fn test_basic_start_end_conversion() {
    let doc = convert(BASIC_IO);

    assert_eq!(doc["kind"].as_str(), Some("app"));
    assert_eq!(doc["app"]["name"].as_str(), Some("basic-io"));
    assert_eq!(graph_nodes(&doc).len(), 2);

    let start = find_by_type(&doc, "start");
    let start_id = id_of(start);
    assert!(
        start_id.bytes().all(|b| b.is_ascii_digit()),
        "start id must be numeric, got {start_id}"
    );

    let vars = start["data"]["variables"].as_sequence().expect("variables");
    assert_eq!(vars.len(), 4);
    let form_types: Vec<&str> = vars
        .iter()
        .map(|v| v["type"].as_str().unwrap())
        .collect();
    assert_eq!(form_types, ["text-input", "number", "number", "text-input"]);
    // Unconstrained lengths get the platform defaults.
    assert_eq!(vars[0]["max_length"].as_u64(), Some(200));
    assert_eq!(vars[1]["max_length"].as_u64(), Some(48));

    let end = find_by_type(&doc, "end");
    let outputs = end["data"]["outputs"].as_sequence().expect("outputs");
    assert_eq!(outputs.len(), 4);

    let expected = [
        ("result1", "input_01", "string"),
        ("result2", "input_num_01", "number"),
        ("result3", "input_num_02", "number"),
        ("result4", "input_text_01", "string"),
    ];
    for (out, (variable, field, value_type)) in outputs.iter().zip(expected) {
        assert_eq!(out["variable"].as_str(), Some(variable));
        let selector = out["value_selector"].as_sequence().unwrap();
        assert_eq!(selector[0].as_str(), Some(start_id));
        assert_eq!(selector[1].as_str(), Some(field));
        assert_eq!(out["value_type"].as_str(), Some(value_type));
    }

    let edges = graph_edges(&doc);
    assert_eq!(edges.len(), 1);
    assert_eq!(edges[0]["source"].as_str(), Some(start_id));
    assert_eq!(edges[0]["sourceHandle"].as_str(), Some("source"));
}

// ============================================================================
// Scenario: classifier with a default intent
// ============================================================================

const CLASSIFIER: &str = r#"
flowMeta:
  name: intent-routing
flowData:
  nodes:
    - id: "start_node::00000000-0000-0000-0000-000000000011"
      type: start_node
      data:
        label: 开始
        outputs:
          - name: AGENT_USER_INPUT
            schema:
              type: string
    - id: "classifier_node::00000000-0000-0000-0000-000000000012"
      type: classifier_node
      data:
        label: 意图分类
        outputs:
          - name: class_name
            schema:
              type: string
        nodeParam:
          serviceId: bm4
          domain: generalv3.5
          queryVariable: AGENT_USER_INPUT
          intentChains:
            - intentId: "intent::a1"
              name: 售后
            - intentId: "intent::a2"
              name: 退款
            - intentId: "intent::a3"
              name: 其他
              isDefault: true
    - id: "end_node::00000000-0000-0000-0000-000000000013"
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
                  nodeId: "classifier_node::00000000-0000-0000-0000-000000000012"
                  name: class_name
  edges:
    - id: e1
      sourceNodeId: "start_node::00000000-0000-0000-0000-000000000011"
      targetNodeId: "classifier_node::00000000-0000-0000-0000-000000000012"
    - id: e2
      sourceNodeId: "classifier_node::00000000-0000-0000-0000-000000000012"
      targetNodeId: "end_node::00000000-0000-0000-0000-000000000013"
      sourceHandle: "intent::a1"
    - id: e3
      sourceNodeId: "classifier_node::00000000-0000-0000-0000-000000000012"
      targetNodeId: "end_node::00000000-0000-0000-0000-000000000013"
      sourceHandle: "intent::a2"
    - id: e4
      sourceNodeId: "classifier_node::00000000-0000-0000-0000-000000000012"
      targetNodeId: "end_node::00000000-0000-0000-0000-000000000013"
      sourceHandle: "intent::a3"
"#;

#[test]
fn test_classifier_with_default_intent() {
    let doc = convert(CLASSIFIER);

    let start_id = id_of(find_by_type(&doc, "start")).to_string();
    let classifier = find_by_type(&doc, "question-classifier");
    let classifier_id = id_of(classifier).to_string();

    let classes = classifier["data"]["classes"].as_sequence().expect("classes");
    assert_eq!(classes.len(), 3);
    let ids: Vec<&str> = classes.iter().map(|c| c["id"].as_str().unwrap()).collect();
    assert_eq!(ids, ["售后", "退款", "default"]);
    // The default intent keeps a decorated display name.
    assert_eq!(classes[2]["name"].as_str(), Some("其他(默认)"));

    let selector = classifier["data"]["query_variable_selector"]
        .as_sequence()
        .expect("query selector");
    assert_eq!(selector[0].as_str(), Some(start_id.as_str()));
    assert_eq!(selector[1].as_str(), Some("AGENT_USER_INPUT"));

    // Structurally required empty fields.
    assert_eq!(classifier["data"]["instructions"].as_str(), Some(""));
    assert!(classifier["data"]["topics"].as_sequence().unwrap().is_empty());

    let handles: Vec<&str> = graph_edges(&doc)
        .iter()
        .filter(|e| e["source"].as_str() == Some(classifier_id.as_str()))
        .map(|e| e["sourceHandle"].as_str().unwrap())
        .collect();
    assert_eq!(handles, ["售后", "退款", "default"]);

    // The end output goes through the aliased classifier field.
    let end = find_by_type(&doc, "end");
    let selector = end["data"]["outputs"][0]["value_selector"]
        .as_sequence()
        .unwrap();
    assert_eq!(selector[0].as_str(), Some(classifier_id.as_str()));
    assert_eq!(selector[1].as_str(), Some("class_name"));
}

// ============================================================================
// Scenario: condition with two cases and a default branch
// ============================================================================

const CONDITION: &str = r#"
flowMeta:
  name: branching
flowData:
  nodes:
    - id: "start_node::00000000-0000-0000-0000-000000000021"
      type: start_node
      data:
        label: 开始
        outputs:
          - name: input_01
            schema:
              type: string
    - id: "condition_node::00000000-0000-0000-0000-000000000022"
      type: condition_node
      data:
        label: 分支
        nodeParam:
          cases:
            - caseId: "branch::c1"
              level: 1
              logicalOperator: and
              conditions:
                - variableSelector:
                    - "start_node::00000000-0000-0000-0000-000000000021"
                    - input_01
                  compareOperator: eq
                  compareValue: "yes"
            - caseId: "branch::c2"
              level: 2
              logicalOperator: and
              conditions:
                - variableSelector:
                    - "start_node::00000000-0000-0000-0000-000000000021"
                    - input_01
                  compareOperator: contains
                  compareValue: "帮助"
            - caseId: "branch::c3"
              level: 999
              logicalOperator: and
              conditions: []
    - id: "end_node::00000000-0000-0000-0000-000000000023"
      type: end_node
      data:
        label: 结束A
    - id: "end_node::00000000-0000-0000-0000-000000000024"
      type: end_node
      data:
        label: 结束B
  edges:
    - id: e1
      sourceNodeId: "start_node::00000000-0000-0000-0000-000000000021"
      targetNodeId: "condition_node::00000000-0000-0000-0000-000000000022"
    - id: e2
      sourceNodeId: "condition_node::00000000-0000-0000-0000-000000000022"
      targetNodeId: "end_node::00000000-0000-0000-0000-000000000023"
      sourceHandle: "branch::c1"
    - id: e3
      sourceNodeId: "condition_node::00000000-0000-0000-0000-000000000022"
      targetNodeId: "end_node::00000000-0000-0000-0000-000000000023"
      sourceHandle: "branch::c2"
    - id: e4
      sourceNodeId: "condition_node::00000000-0000-0000-0000-000000000022"
      targetNodeId: "end_node::00000000-0000-0000-0000-000000000024"
      sourceHandle: "branch::c3"
"#;

#[test]
fn test_condition_default_branch_maps_to_false() {
    let doc = convert(CONDITION);

    let start_id = id_of(find_by_type(&doc, "start")).to_string();
    let condition = find_by_type(&doc, "if-else");
    let condition_id = id_of(condition).to_string();

    // The default case is omitted; the two real cases follow level order.
    let cases = condition["data"]["cases"].as_sequence().expect("cases");
    assert_eq!(cases.len(), 2);
    assert_eq!(cases[0]["case_id"].as_str(), Some("is_yes"));
    assert_eq!(cases[1]["case_id"].as_str(), Some("contains_帮助"));

    let selector = cases[0]["conditions"][0]["variable_selector"]
        .as_sequence()
        .unwrap();
    assert_eq!(selector[0].as_str(), Some(start_id.as_str()));
    assert_eq!(selector[1].as_str(), Some("input_01"));

    let handles: Vec<&str> = graph_edges(&doc)
        .iter()
        .filter(|e| e["source"].as_str() == Some(condition_id.as_str()))
        .map(|e| e["sourceHandle"].as_str().unwrap())
        .collect();
    assert_eq!(handles, ["is_yes", "contains_帮助", "false"]);
}

// ============================================================================
// Scenario: iteration around an LLM
// ============================================================================

const ITERATION: &str = r#"
flowMeta:
  name: looped-summaries
flowData:
  nodes:
    - id: "start_node::00000000-0000-0000-0000-000000000031"
      type: start_node
      data:
        label: 开始
        outputs:
          - name: AGENT_USER_INPUT
            schema:
              type: string
    - id: "code_node::00000000-0000-0000-0000-000000000032"
      type: code_node
      data:
        label: 切分
        inputs:
          - name: text
            schema:
              type: string
              value:
                type: ref
                content:
                  nodeId: "start_node::00000000-0000-0000-0000-000000000031"
                  name: AGENT_USER_INPUT
        outputs:
          - name: output
            schema:
              type: array-string
        nodeParam:
          language: python3
          code: "def main(text):\n    return {\"output\": text.split(\"\\n\")}\n"
    - id: "iteration_node::00000000-0000-0000-0000-000000000033"
      type: iteration_node
      data:
        label: 循环
        outputs:
          - name: output
            schema:
              type: array-string
        nodeParam:
          isParallel: false
          outputType: array-string
          iteratorSelector:
            nodeId: "code_node::00000000-0000-0000-0000-000000000032"
            name: output
        iteration:
          nodes:
            - id: "iteration-node-start::00000000-0000-0000-0000-000000000034"
              type: iteration-node-start
              data:
                label: 开始
                outputs:
                  - name: input
                    schema:
                      type: string
            - id: "llm_node::00000000-0000-0000-0000-000000000035"
              type: llm_node
              data:
                label: 总结段落
                inputs:
                  - name: ARG1
                    schema:
                      type: string
                      value:
                        type: ref
                        content:
                          nodeId: "iteration-node-start::00000000-0000-0000-0000-000000000034"
                          name: input
                outputs:
                  - name: output
                    schema:
                      type: string
                nodeParam:
                  serviceId: bm4
                  domain: generalv3.5
                  temperature: 0.5
                  template: "总结{{ARG1}}"
            - id: "end_node::00000000-0000-0000-0000-000000000036"
              type: end_node
              data:
                label: 循环结束
                inputs:
                  - name: output
                    schema:
                      type: string
                      value:
                        type: ref
                        content:
                          nodeId: "llm_node::00000000-0000-0000-0000-000000000035"
                          name: output
          edges:
            - id: ie1
              sourceNodeId: "iteration-node-start::00000000-0000-0000-0000-000000000034"
              targetNodeId: "llm_node::00000000-0000-0000-0000-000000000035"
            - id: ie2
              sourceNodeId: "llm_node::00000000-0000-0000-0000-000000000035"
              targetNodeId: "end_node::00000000-0000-0000-0000-000000000036"
    - id: "end_node::00000000-0000-0000-0000-000000000037"
      type: end_node
      data:
        label: 结束
        inputs:
          - name: final
            schema:
              type: array-string
              value:
                type: ref
                content:
                  nodeId: "iteration_node::00000000-0000-0000-0000-000000000033"
                  name: output
  edges:
    - id: e1
      sourceNodeId: "start_node::00000000-0000-0000-0000-000000000031"
      targetNodeId: "code_node::00000000-0000-0000-0000-000000000032"
    - id: e2
      sourceNodeId: "code_node::00000000-0000-0000-0000-000000000032"
      targetNodeId: "iteration_node::00000000-0000-0000-0000-000000000033"
    - id: e3
      sourceNodeId: "iteration_node::00000000-0000-0000-0000-000000000033"
      targetNodeId: "end_node::00000000-0000-0000-0000-000000000037"
"#;

#[test]
fn test_iteration_expands_to_flat_graph() {
    let doc = convert(ITERATION);

    // start + code + container + iteration-start + inner llm + end.
    assert_eq!(graph_nodes(&doc).len(), 6);

    let code_id = id_of(find_by_type(&doc, "code")).to_string();
    let container = find_by_type(&doc, "iteration");
    let container_id = id_of(container).to_string();

    let anchor = graph_nodes(&doc)
        .iter()
        .find(|n| n["type"].as_str() == Some("custom-iteration-start"))
        .expect("synthetic iteration-start child");
    let anchor_id = id_of(anchor).to_string();
    assert_eq!(anchor_id, format!("{container_id}start"));
    assert_eq!(anchor["parentId"].as_str(), Some(container_id.as_str()));
    assert_eq!(anchor["draggable"].as_bool(), Some(false));
    assert_eq!(anchor["selectable"].as_bool(), Some(false));

    let llm = find_by_type(&doc, "llm");
    let llm_id = id_of(llm).to_string();
    assert_eq!(llm["parentId"].as_str(), Some(container_id.as_str()));
    assert_eq!(llm["extent"].as_str(), Some("parent"));
    assert_eq!(llm["data"]["isInIteration"].as_bool(), Some(true));
    assert_eq!(
        llm["data"]["iteration_id"].as_str(),
        Some(container_id.as_str())
    );

    // References to the body entry become the container's current item.
    let prompt = llm["data"]["prompt_template"][0]["text"].as_str().unwrap();
    assert_eq!(prompt, format!("总结{{{{#{container_id}.item#}}}}"));

    let iterator = container["data"]["iterator_selector"]
        .as_sequence()
        .unwrap();
    assert_eq!(iterator[0].as_str(), Some(code_id.as_str()));
    assert_eq!(iterator[1].as_str(), Some("output"));

    // The body End's first reference decides the collected output, through
    // the LLM field alias.
    let output = container["data"]["output_selector"].as_sequence().unwrap();
    assert_eq!(output[0].as_str(), Some(llm_id.as_str()));
    assert_eq!(output[1].as_str(), Some("text"));

    assert_eq!(
        container["data"]["start_node_id"].as_str(),
        Some(anchor_id.as_str())
    );

    // The anchor wires into the first body node.
    let entry_edge = graph_edges(&doc)
        .iter()
        .find(|e| e["source"].as_str() == Some(anchor_id.as_str()))
        .expect("edge out of the anchor");
    assert_eq!(entry_edge["target"].as_str(), Some(llm_id.as_str()));
    assert_eq!(entry_edge["data"]["isInIteration"].as_bool(), Some(true));

    // LLM context stays empty and disabled on this platform.
    assert_eq!(llm["data"]["context"]["enabled"].as_bool(), Some(false));
    assert!(llm["data"]["context"]["variable_selector"]
        .as_sequence()
        .unwrap()
        .is_empty());
}
