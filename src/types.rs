// src/types.rs
//
// =============================================================================
// FLOWBRIDGE: UNIFIED TYPE SYSTEM
// =============================================================================
//
// One type vocabulary to rule the three platform dialects.
//
// Responsibilities:
// 1. The unified data-type enum.
// 2. Forward maps (unified -> platform string) per platform.
// 3. Alias folding + reverse maps (platform string -> unified).
// 4. Compatibility predicate and value coercion.
//
// The platforms disagree in two ways that matter here: Dify collapses
// integer/float into a single `number`, while iFlytek spells float as
// `number` but keeps `integer` distinct; and array types are hyphenated on
// iFlytek (`array-string`) but bracketed elsewhere (`array[string]`).

use crate::error::{ConvertError, Result};
use crate::platforms::Platform;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

// ============================================================================
// 1. THE UNIFIED TYPES
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataType {
    String,
    Integer,
    Float,
    /// Compatibility alias covering either numeric kind.
    Number,
    Boolean,
    ArrayString,
    ArrayInteger,
    ArrayFloat,
    ArrayNumber,
    ArrayBoolean,
    ArrayObject,
    Object,
}

impl Default for DataType {
    fn default() -> Self {
        DataType::String
    }
}

impl DataType {
    pub const ALL: [DataType; 12] = [
        DataType::String,
        DataType::Integer,
        DataType::Float,
        DataType::Number,
        DataType::Boolean,
        DataType::ArrayString,
        DataType::ArrayInteger,
        DataType::ArrayFloat,
        DataType::ArrayNumber,
        DataType::ArrayBoolean,
        DataType::ArrayObject,
        DataType::Object,
    ];

    pub fn unified_name(self) -> &'static str {
        match self {
            DataType::String => "string",
            DataType::Integer => "integer",
            DataType::Float => "float",
            DataType::Number => "number",
            DataType::Boolean => "boolean",
            DataType::ArrayString => "array[string]",
            DataType::ArrayInteger => "array[integer]",
            DataType::ArrayFloat => "array[float]",
            DataType::ArrayNumber => "array[number]",
            DataType::ArrayBoolean => "array[boolean]",
            DataType::ArrayObject => "array[object]",
            DataType::Object => "object",
        }
    }

    pub fn is_numeric(self) -> bool {
        matches!(self, DataType::Integer | DataType::Float | DataType::Number)
    }

    pub fn is_array(self) -> bool {
        self.element().is_some()
    }

    /// Element type of an array type.
    pub fn element(self) -> Option<DataType> {
        match self {
            DataType::ArrayString => Some(DataType::String),
            DataType::ArrayInteger => Some(DataType::Integer),
            DataType::ArrayFloat => Some(DataType::Float),
            DataType::ArrayNumber => Some(DataType::Number),
            DataType::ArrayBoolean => Some(DataType::Boolean),
            DataType::ArrayObject => Some(DataType::Object),
            _ => None,
        }
    }

    /// Array type with the given element, where one exists.
    pub fn array_of(element: DataType) -> DataType {
        match element {
            DataType::String => DataType::ArrayString,
            DataType::Integer => DataType::ArrayInteger,
            DataType::Float => DataType::ArrayFloat,
            DataType::Number => DataType::ArrayNumber,
            DataType::Boolean => DataType::ArrayBoolean,
            _ => DataType::ArrayObject,
        }
    }

    // ------------------------------------------------------------------
    // Forward maps (unified -> platform string)
    // ------------------------------------------------------------------

    pub fn to_platform(self, platform: Platform) -> &'static str {
        match platform {
            Platform::IFlytek => self.to_iflytek(),
            Platform::Dify => self.to_dify(),
            Platform::Coze => self.to_coze(),
        }
    }

    /// iFlytek keeps `integer` distinct but spells float as `number`;
    /// arrays are hyphenated.
    fn to_iflytek(self) -> &'static str {
        match self {
            DataType::String => "string",
            DataType::Integer => "integer",
            DataType::Float | DataType::Number => "number",
            DataType::Boolean => "boolean",
            DataType::ArrayString => "array-string",
            DataType::ArrayInteger => "array-integer",
            DataType::ArrayFloat | DataType::ArrayNumber => "array-number",
            DataType::ArrayBoolean => "array-boolean",
            DataType::ArrayObject => "array-object",
            DataType::Object => "object",
        }
    }

    /// Dify collapses all numerics into `number`; arrays are bracketed.
    fn to_dify(self) -> &'static str {
        match self {
            DataType::String => "string",
            DataType::Integer | DataType::Float | DataType::Number => "number",
            DataType::Boolean => "boolean",
            DataType::ArrayString => "array[string]",
            DataType::ArrayInteger | DataType::ArrayFloat | DataType::ArrayNumber => {
                "array[number]"
            }
            DataType::ArrayBoolean => "array[boolean]",
            DataType::ArrayObject => "array[object]",
            DataType::Object => "object",
        }
    }

    /// Coze preserves integer/float separately; arrays are bracketed.
    fn to_coze(self) -> &'static str {
        match self {
            DataType::String => "string",
            DataType::Integer => "integer",
            DataType::Float | DataType::Number => "float",
            DataType::Boolean => "boolean",
            DataType::ArrayString => "array[string]",
            DataType::ArrayInteger => "array[integer]",
            DataType::ArrayFloat | DataType::ArrayNumber => "array[float]",
            DataType::ArrayBoolean => "array[boolean]",
            DataType::ArrayObject => "array[object]",
            DataType::Object => "object",
        }
    }

    // ------------------------------------------------------------------
    // Reverse maps (platform string -> unified)
    // ------------------------------------------------------------------

    /// Lift a platform type string into the unified vocabulary.
    ///
    /// Aliases are folded first, then the forward table is consulted in
    /// reverse. Unknown inputs fall back to `string` — a safe choice that
    /// never loses the value, only its typing.
    pub fn from_platform(platform: Platform, raw: &str) -> DataType {
        let lowered = raw.trim().to_ascii_lowercase();
        let canonical = fold_alias(platform, &lowered);

        // Prefer the distinct numerics where the platform has them.
        let preference: &[DataType] = match platform {
            Platform::IFlytek => &[
                DataType::String,
                DataType::Integer,
                DataType::Number,
                DataType::Boolean,
                DataType::ArrayString,
                DataType::ArrayInteger,
                DataType::ArrayNumber,
                DataType::ArrayBoolean,
                DataType::ArrayObject,
                DataType::Object,
            ],
            Platform::Dify => &[
                DataType::String,
                DataType::Number,
                DataType::Boolean,
                DataType::ArrayString,
                DataType::ArrayNumber,
                DataType::ArrayBoolean,
                DataType::ArrayObject,
                DataType::Object,
            ],
            Platform::Coze => &[
                DataType::String,
                DataType::Integer,
                DataType::Float,
                DataType::Boolean,
                DataType::ArrayString,
                DataType::ArrayInteger,
                DataType::ArrayFloat,
                DataType::ArrayBoolean,
                DataType::ArrayObject,
                DataType::Object,
            ],
        };

        for candidate in preference {
            if candidate.to_platform(platform) == canonical {
                return *candidate;
            }
        }

        log::debug!("unknown {platform} type '{raw}', falling back to string");
        DataType::String
    }

    /// Parse a unified-vocabulary name (as used inside the model itself).
    pub fn from_unified(raw: &str) -> Option<DataType> {
        let lowered = raw.trim().to_ascii_lowercase();
        DataType::ALL
            .iter()
            .copied()
            .find(|t| t.unified_name() == lowered)
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.unified_name())
    }
}

/// Historical spellings seen in the wild, folded to the platform's
/// canonical string before the reverse lookup.
fn fold_alias(platform: Platform, s: &str) -> String {
    let common = match s {
        "int" | "long" => Some("integer"),
        "bool" => Some("boolean"),
        "str" | "text" => Some("string"),
        "dict" | "map" => Some("object"),
        _ => None,
    };
    if let Some(c) = common {
        // Platform-specific second fold (e.g. Dify has no `integer`).
        return fold_alias(platform, c);
    }

    match platform {
        Platform::IFlytek => match s {
            "float" | "double" => "number",
            "list" | "array" => "array-string",
            "array-float" | "array-double" => "array-number",
            other => other,
        },
        Platform::Dify => match s {
            "integer" | "float" | "double" => "number",
            "list" | "array" => "array[string]",
            "array[integer]" | "array[float]" | "array[double]" => "array[number]",
            other => other,
        },
        Platform::Coze => match s {
            "number" | "double" => "float",
            "list" | "array" => "array[string]",
            "array[number]" | "array[double]" => "array[float]",
            other => other,
        },
    }
    .to_string()
}

// ============================================================================
// 2. COMPATIBILITY
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compatibility {
    /// Identical types.
    Identical,
    /// Convertible without information loss (integer -> number).
    Widening,
    /// Convertible with a recorded warning (string <-> number, boolean).
    Lossy,
    /// Not convertible (object vs anything else, mismatched arrays).
    Incompatible,
}

impl Compatibility {
    pub fn is_compatible(self) -> bool {
        !matches!(self, Compatibility::Incompatible)
    }
}

/// Compatibility relation between two unified types.
pub fn compatibility(from: DataType, to: DataType) -> Compatibility {
    if from == to {
        return Compatibility::Identical;
    }

    match (from.element(), to.element()) {
        // Arrays are compatible only element-wise.
        (Some(fe), Some(te)) => match compatibility(fe, te) {
            Compatibility::Identical => Compatibility::Widening,
            other => other,
        },
        (Some(_), None) | (None, Some(_)) => Compatibility::Incompatible,
        (None, None) => {
            if from == DataType::Object || to == DataType::Object {
                return Compatibility::Incompatible;
            }
            if from.is_numeric() && to.is_numeric() {
                return Compatibility::Widening;
            }
            // The remaining scalars (string, boolean, numerics) coerce
            // pairwise, lossily.
            Compatibility::Lossy
        }
    }
}

// ============================================================================
// 3. VALUE COERCION
// ============================================================================

/// Coerce a JSON value to the requested unified type.
///
/// Failure is a typed error so callers can surface the offending literal.
pub fn coerce(value: &Value, target: DataType) -> Result<Value> {
    let fail = || ConvertError::TypeCoercion {
        value: compact(value),
        target,
    };

    match target {
        DataType::String => Ok(match value {
            Value::String(s) => Value::String(s.clone()),
            Value::Null => Value::String(String::new()),
            other => Value::String(compact(other)),
        }),

        DataType::Integer => match value {
            Value::Number(n) if n.is_i64() || n.is_u64() => Ok(value.clone()),
            Value::Number(n) => {
                let f = n.as_f64().ok_or_else(fail)?;
                Ok(Value::from(f as i64))
            }
            Value::Bool(b) => Ok(Value::from(*b as i64)),
            Value::String(s) => s
                .trim()
                .parse::<i64>()
                .map(Value::from)
                .map_err(|_| fail()),
            _ => Err(fail()),
        },

        DataType::Float | DataType::Number => match value {
            Value::Number(_) => Ok(value.clone()),
            Value::Bool(b) => Ok(Value::from(*b as i64 as f64)),
            // Decimal-point semantics: `parse::<f64>` accepts "1.5" and
            // "1e3" but rejects locale forms like "1,5".
            Value::String(s) => s
                .trim()
                .parse::<f64>()
                .map(Value::from)
                .map_err(|_| fail()),
            _ => Err(fail()),
        },

        DataType::Boolean => match value {
            Value::Bool(_) => Ok(value.clone()),
            Value::Number(n) => Ok(Value::Bool(n.as_f64().unwrap_or(0.0) != 0.0)),
            Value::String(s) => {
                let t = s.trim();
                Ok(Value::Bool(
                    !t.is_empty() && !t.eq_ignore_ascii_case("false") && t != "0",
                ))
            }
            Value::Null => Ok(Value::Bool(false)),
            _ => Err(fail()),
        },

        DataType::Object => match value {
            Value::Object(_) => Ok(value.clone()),
            Value::String(s) => match serde_json::from_str::<Value>(s) {
                Ok(Value::Object(m)) => Ok(Value::Object(m)),
                _ => Err(fail()),
            },
            // Anything else gains a `{value: v}` wrapper.
            other => Ok(serde_json::json!({ "value": other })),
        },

        array => {
            let element = array.element().unwrap_or(DataType::String);
            match value {
                Value::Array(items) => {
                    let coerced: Result<Vec<Value>> =
                        items.iter().map(|v| coerce(v, element)).collect();
                    Ok(Value::Array(coerced?))
                }
                // A single value wraps into a singleton.
                other => Ok(Value::Array(vec![coerce(other, element)?])),
            }
        }
    }
}

fn compact(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
