use flowbridge::error::ConvertError;
use flowbridge::platforms::Platform;
use flowbridge::types::{coerce, compatibility, Compatibility, DataType};
use serde_json::{json, Value};

#[test]
fn test_forward_maps() {
    assert_eq!(DataType::Integer.to_platform(Platform::IFlytek), "integer");
    assert_eq!(DataType::Integer.to_platform(Platform::Dify), "number");
    assert_eq!(DataType::Integer.to_platform(Platform::Coze), "integer");

    // iFlytek spells float as "number"; Coze keeps it distinct.
    assert_eq!(DataType::Float.to_platform(Platform::IFlytek), "number");
    assert_eq!(DataType::Float.to_platform(Platform::Coze), "float");

    // Hyphenated arrays on iFlytek, bracketed elsewhere.
    assert_eq!(
        DataType::ArrayString.to_platform(Platform::IFlytek),
        "array-string"
    );
    assert_eq!(
        DataType::ArrayString.to_platform(Platform::Dify),
        "array[string]"
    );
    assert_eq!(
        DataType::ArrayNumber.to_platform(Platform::Coze),
        "array[float]"
    );

    assert_eq!(DataType::Object.to_platform(Platform::Dify), "object");
}

#[test]
fn test_reverse_maps_with_aliases() {
    assert_eq!(
        DataType::from_platform(Platform::IFlytek, "int"),
        DataType::Integer
    );
    assert_eq!(
        DataType::from_platform(Platform::Dify, "bool"),
        DataType::Boolean
    );
    assert_eq!(
        DataType::from_platform(Platform::IFlytek, "list"),
        DataType::ArrayString
    );
    assert_eq!(
        DataType::from_platform(Platform::Coze, "dict"),
        DataType::Object
    );
    // Dify collapses every numeric spelling into number.
    assert_eq!(
        DataType::from_platform(Platform::Dify, "double"),
        DataType::Number
    );
    assert_eq!(
        DataType::from_platform(Platform::Dify, "integer"),
        DataType::Number
    );
    // Coze keeps integers; "number" folds to float.
    assert_eq!(
        DataType::from_platform(Platform::Coze, "number"),
        DataType::Float
    );
    // Round trip through the forward map.
    assert_eq!(
        DataType::from_platform(Platform::IFlytek, "array-number"),
        DataType::ArrayNumber
    );
}

#[test]
fn test_unknown_type_falls_back_to_string() {
    assert_eq!(
        DataType::from_platform(Platform::Dify, "quaternion"),
        DataType::String
    );
    assert_eq!(DataType::from_platform(Platform::Coze, ""), DataType::String);
}

#[test]
fn test_compatibility_relation() {
    assert_eq!(
        compatibility(DataType::String, DataType::String),
        Compatibility::Identical
    );
    assert_eq!(
        compatibility(DataType::Integer, DataType::Float),
        Compatibility::Widening
    );
    assert_eq!(
        compatibility(DataType::String, DataType::Number),
        Compatibility::Lossy
    );
    assert_eq!(
        compatibility(DataType::Boolean, DataType::String),
        Compatibility::Lossy
    );
    // Object converts to nothing else.
    assert_eq!(
        compatibility(DataType::Object, DataType::String),
        Compatibility::Incompatible
    );
    // Arrays only element-wise, never against scalars.
    assert_eq!(
        compatibility(DataType::ArrayString, DataType::String),
        Compatibility::Incompatible
    );
    assert_eq!(
        compatibility(DataType::ArrayInteger, DataType::ArrayNumber),
        Compatibility::Widening
    );
    assert_eq!(
        compatibility(DataType::ArrayString, DataType::ArrayNumber),
        Compatibility::Lossy
    );
}

#[test]
fn test_numeric_coercion() {
    assert_eq!(
        coerce(&json!("42"), DataType::Integer).unwrap(),
        json!(42)
    );
    assert_eq!(
        coerce(&json!("3.5"), DataType::Float).unwrap(),
        json!(3.5)
    );
    assert_eq!(coerce(&json!(true), DataType::Integer).unwrap(), json!(1));

    let err = coerce(&json!("not-a-number"), DataType::Number).unwrap_err();
    assert!(matches!(err, ConvertError::TypeCoercion { .. }));
    assert_eq!(err.code(), "E_COERCION");
}

#[test]
fn test_boolean_coercion() {
    // Non-empty and not "false"/"0" is true.
    assert_eq!(coerce(&json!("yes"), DataType::Boolean).unwrap(), json!(true));
    assert_eq!(
        coerce(&json!("false"), DataType::Boolean).unwrap(),
        json!(false)
    );
    assert_eq!(coerce(&json!("0"), DataType::Boolean).unwrap(), json!(false));
    assert_eq!(coerce(&json!(""), DataType::Boolean).unwrap(), json!(false));
    assert_eq!(coerce(&json!(2), DataType::Boolean).unwrap(), json!(true));
    assert_eq!(
        coerce(&Value::Null, DataType::Boolean).unwrap(),
        json!(false)
    );
}

#[test]
fn test_array_and_object_coercion() {
    // A single value wraps into a singleton.
    assert_eq!(
        coerce(&json!("a"), DataType::ArrayString).unwrap(),
        json!(["a"])
    );
    assert_eq!(
        coerce(&json!(["1", "2"]), DataType::ArrayInteger).unwrap(),
        json!([1, 2])
    );

    assert_eq!(
        coerce(&json!(r#"{"k": 1}"#), DataType::Object).unwrap(),
        json!({"k": 1})
    );
    // Non-object values gain a {value: v} wrapper.
    assert_eq!(
        coerce(&json!(5), DataType::Object).unwrap(),
        json!({"value": 5})
    );
}

#[test]
fn test_string_coercion() {
    assert_eq!(coerce(&json!(42), DataType::String).unwrap(), json!("42"));
    assert_eq!(
        coerce(&json!("keep"), DataType::String).unwrap(),
        json!("keep")
    );
}
