// iFlytek <-> Coze conversion scenarios, including zip-packed inputs.

use flowbridge::convert::{ConversionService, IdPolicy};
use flowbridge::detect_platform;
use flowbridge::platforms::Platform;
use serde_yaml::Value;

fn service() -> ConversionService {
    ConversionService::new().with_id_policy(IdPolicy::Seeded(42))
}

fn schema_nodes(doc: &Value) -> &Vec<Value> {
    doc["schema"]["nodes"].as_sequence().expect("schema.nodes")
}

fn find_by_type<'a>(doc: &'a Value, token: &str) -> &'a Value {
    schema_nodes(doc)
        .iter()
        .find(|n| n["type"].as_str() == Some(token))
        .unwrap_or_else(|| panic!("no node of type {token}"))
}

// ============================================================================
// Scenario: start -> python code -> end
// ============================================================================

const CODE_SOURCE: &str = "def main(name):\n    return {\"result\": [name]}\n";

const CODE_FLOW: &str = r#"
flowMeta:
  name: code-pipeline
flowData:
  nodes:
    - id: "start_node::00000000-0000-0000-0000-000000000041"
      type: start_node
      data:
        label: 开始
        outputs:
          - name: name
            schema:
              type: string
    - id: "code_node::00000000-0000-0000-0000-000000000042"
      type: code_node
      data:
        label: 代码
        inputs:
          - name: name
            schema:
              type: string
              value:
                type: ref
                content:
                  nodeId: "start_node::00000000-0000-0000-0000-000000000041"
                  name: name
        outputs:
          - name: result
            schema:
              type: array-string
        nodeParam:
          language: python3
          code: "def main(name):\n    return {\"result\": [name]}\n"
    - id: "end_node::00000000-0000-0000-0000-000000000043"
      type: end_node
      data:
        label: 结束
        inputs:
          - name: output
            schema:
              type: array-string
              value:
                type: ref
                content:
                  nodeId: "code_node::00000000-0000-0000-0000-000000000042"
                  name: result
  edges:
    - id: e1
      sourceNodeId: "start_node::00000000-0000-0000-0000-000000000041"
      targetNodeId: "code_node::00000000-0000-0000-0000-000000000042"
    - id: e2
      sourceNodeId: "code_node::00000000-0000-0000-0000-000000000042"
      targetNodeId: "end_node::00000000-0000-0000-0000-000000000043"
"#;

#[test]
fn test_code_workflow_to_coze() {
    let outcome = service()
        .convert(CODE_FLOW.as_bytes(), Platform::IFlytek, Platform::Coze)
        .expect("conversion should succeed");
    let doc: Value = serde_yaml::from_slice(&outcome.bytes).expect("reparse");

    assert_eq!(doc["export_format"].as_str(), Some("yaml"));
    assert!(doc["workflow_id"].as_str().is_some());
    assert_eq!(schema_nodes(&doc).len(), 3);

    let start = find_by_type(&doc, "1");
    let code = find_by_type(&doc, "4");
    let end = find_by_type(&doc, "2");

    // Conventional short numeric IDs.
    assert_eq!(start["id"].as_str(), Some("100001"));
    assert_eq!(code["id"].as_str(), Some("100100"));
    assert_eq!(end["id"].as_str(), Some("900001"));

    // Source text travels byte-for-byte.
    assert_eq!(code["data"]["inputs"]["code"].as_str(), Some(CODE_SOURCE));
    assert_eq!(code["data"]["inputs"]["language"].as_str(), Some("python3"));

    // The code input references the start block.
    let param = &code["data"]["inputs"]["inputParameters"][0];
    assert_eq!(param["name"].as_str(), Some("name"));
    assert_eq!(param["input"]["value"]["type"].as_str(), Some("ref"));
    let content = &param["input"]["value"]["content"];
    assert_eq!(content["blockID"].as_str(), Some("100001"));
    assert_eq!(content["name"].as_str(), Some("name"));
    assert_eq!(content["source"].as_str(), Some("block-output"));

    // The end input references the code block's fresh short ID.
    let end_param = &end["data"]["inputs"]["inputParameters"][0];
    assert_eq!(end_param["name"].as_str(), Some("output"));
    let content = &end_param["input"]["value"]["content"];
    assert_eq!(content["blockID"].as_str(), Some("100100"));
    assert_eq!(content["name"].as_str(), Some("result"));

    // Declared output keeps its element typing.
    let output = &code["data"]["outputs"][0];
    assert_eq!(output["name"].as_str(), Some("result"));
    assert_eq!(output["type"].as_str(), Some("array[string]"));

    let edges = doc["schema"]["edges"].as_sequence().unwrap();
    assert_eq!(edges.len(), 2);
    assert_eq!(edges[0]["sourceNodeID"].as_str(), Some("100001"));
    assert_eq!(edges[0]["targetNodeID"].as_str(), Some("100100"));
}

// ============================================================================
// Coze inputs: bare YAML and zip-packed
// ============================================================================

const COZE_FLOW: &str = r#"
workflow_id: "7340000000001"
export_format: yaml
name: coze-sample
schema:
  nodes:
    - id: "100001"
      type: "1"
      data:
        nodeMeta:
          title: 开始
        outputs:
          - name: query
            type: string
            required: true
    - id: "154321"
      type: "3"
      data:
        nodeMeta:
          title: 大模型
        outputs:
          - name: output
            type: string
        inputs:
          inputParameters:
            - name: input
              input:
                type: string
                value:
                  type: ref
                  content:
                    blockID: "100001"
                    name: query
                    source: block-output
          llmParam:
            modelName: GPT-4o
            temperature: 0.7
            prompt: "回答{{input}}"
    - id: "900001"
      type: "2"
      data:
        nodeMeta:
          title: 结束
        inputs:
          inputParameters:
            - name: answer
              input:
                type: string
                value:
                  type: ref
                  content:
                    blockID: "154321"
                    name: output
                    source: block-output
          terminatePlan: returnVariables
  edges:
    - sourceNodeID: "100001"
      targetNodeID: "154321"
    - sourceNodeID: "154321"
      targetNodeID: "900001"
"#;

/// Minimal stored-method zip around a single file.
fn stored_zip(name: &str, data: &[u8]) -> Vec<u8> {
    let mut out = vec![0x50, 0x4B, 0x03, 0x04];
    out.extend([20, 0]); // version needed
    out.extend([0, 0]); // flags
    out.extend([0, 0]); // method: stored
    out.extend([0, 0, 0, 0]); // mod time + date
    out.extend(0u32.to_le_bytes()); // crc-32 (unchecked)
    out.extend((data.len() as u32).to_le_bytes());
    out.extend((data.len() as u32).to_le_bytes());
    out.extend((name.len() as u16).to_le_bytes());
    out.extend(0u16.to_le_bytes()); // extra len
    out.extend(name.as_bytes());
    out.extend(data);
    out
}

#[test]
fn test_coze_yaml_to_iflytek() {
    let outcome = service()
        .convert(COZE_FLOW.as_bytes(), Platform::Coze, Platform::IFlytek)
        .expect("conversion should succeed");
    let doc: Value = serde_yaml::from_slice(&outcome.bytes).expect("reparse");

    let nodes = doc["flowData"]["nodes"].as_sequence().expect("nodes");
    assert_eq!(nodes.len(), 3);

    let llm = nodes
        .iter()
        .find(|n| n["type"].as_str() == Some("llm_node"))
        .expect("llm node");
    // The bare binding survives; the input carries the actual reference.
    assert_eq!(
        llm["data"]["nodeParam"]["template"].as_str(),
        Some("回答{{input}}")
    );
    let input_value = &llm["data"]["inputs"][0]["schema"]["value"];
    assert_eq!(input_value["type"].as_str(), Some("ref"));
    let start = nodes
        .iter()
        .find(|n| n["type"].as_str() == Some("start_node"))
        .expect("start node");
    assert_eq!(
        input_value["content"]["nodeId"].as_str(),
        start["id"].as_str()
    );
}

#[test]
fn test_zip_packed_coze_descriptor() {
    let zipped = stored_zip("workflow.yml", COZE_FLOW.as_bytes());

    assert_eq!(detect_platform(&zipped), Platform::Coze);

    let outcome = service()
        .convert(&zipped, Platform::Coze, Platform::IFlytek)
        .expect("zip input should convert");
    let doc: Value = serde_yaml::from_slice(&outcome.bytes).expect("reparse");
    assert_eq!(doc["flowMeta"]["name"].as_str(), Some("coze-sample"));
    assert_eq!(doc["flowData"]["nodes"].as_sequence().unwrap().len(), 3);
}

#[test]
fn test_broken_zip_is_an_input_error() {
    let garbage = b"PK\x03\x04but-then-nonsense";
    let err = service()
        .convert(garbage, Platform::Coze, Platform::IFlytek)
        .unwrap_err();
    assert_eq!(err.code(), "E_INPUT_FORMAT");
}
