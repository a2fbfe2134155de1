// src/error.rs
//
// =============================================================================
// FLOWBRIDGE: ERROR & WARNING CHANNEL
// =============================================================================
//
// Fatal errors abort a conversion immediately and never produce partial
// output. Recoverable findings (type coercions, unsupported-node
// placeholders, lossy mappings) accumulate in the `Warnings` side channel
// and ride along with the converted bytes.

use crate::platforms::Platform;
use crate::types::DataType;
use serde::{Deserialize, Serialize};
use thiserror::Error;

// ============================================================================
// 1. FATAL ERRORS
// ============================================================================

/// Where in the source document an error was observed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Location {
    pub node_id: Option<String>,
    pub field: Option<String>,
}

impl Location {
    pub fn node(id: impl Into<String>) -> Self {
        Self {
            node_id: Some(id.into()),
            field: None,
        }
    }

    pub fn field(node_id: impl Into<String>, field: impl Into<String>) -> Self {
        Self {
            node_id: Some(node_id.into()),
            field: Some(field.into()),
        }
    }
}

#[derive(Debug, Error)]
pub enum ConvertError {
    /// Bytes are not a recognizable document: broken YAML, broken zip
    /// framing, or the wrong top-level shape for the claimed platform.
    #[error("invalid {platform} input: {message}")]
    InputFormat { platform: Platform, message: String },

    /// A required field is missing or an enumerated value is out of range.
    #[error("schema violation: {message}")]
    SchemaViolation {
        message: String,
        location: Location,
    },

    /// A variable reference targets a node or output that does not exist.
    #[error("undefined reference '{reference}'")]
    ReferenceUndefined {
        reference: String,
        location: Location,
    },

    /// X -> X conversion request.
    #[error("source and target are both {platform}; nothing to convert")]
    SameSource { platform: Platform },

    /// A spoke-to-spoke request. The message names the hub recipe.
    #[error(
        "direct {from} -> {to} conversion is unsupported; convert {from} -> {hub} first, then {hub} -> {to}"
    )]
    UnsupportedPath {
        from: Platform,
        to: Platform,
        hub: Platform,
    },

    /// The unified model failed structural validation between parse and
    /// generation.
    #[error("structural validation failed ({} issue(s))", issues.len())]
    StructuralValidation { issues: Vec<String> },

    /// A sub-generator rejected an otherwise valid-looking model.
    #[error("generation failed at node '{node_id}': {message}")]
    Generation { node_id: String, message: String },

    /// A value could not be coerced to the requested type.
    #[error("cannot coerce '{value}' to {target}")]
    TypeCoercion { value: String, target: DataType },
}

impl ConvertError {
    /// Stable machine-readable code. The CLI maps these to user-facing
    /// remediation text; the library only promises stability of the code.
    pub fn code(&self) -> &'static str {
        match self {
            ConvertError::InputFormat { .. } => "E_INPUT_FORMAT",
            ConvertError::SchemaViolation { .. } => "E_SCHEMA",
            ConvertError::ReferenceUndefined { .. } => "E_REF_UNDEFINED",
            ConvertError::SameSource { .. } => "E_SAME_SOURCE",
            ConvertError::UnsupportedPath { .. } => "E_UNSUPPORTED_PATH",
            ConvertError::StructuralValidation { .. } => "E_STRUCTURE",
            ConvertError::Generation { .. } => "E_GENERATION",
            ConvertError::TypeCoercion { .. } => "E_COERCION",
        }
    }

    /// One-line remediation hints, where a generic one exists.
    pub fn suggestions(&self) -> Vec<String> {
        match self {
            ConvertError::UnsupportedPath { from, to, hub } => vec![
                format!("step 1: convert the {from} document to {hub}"),
                format!("step 2: convert the {hub} result to {to}"),
            ],
            ConvertError::SameSource { .. } => {
                vec!["pick a target platform different from the source".into()]
            }
            ConvertError::SchemaViolation { location, .. } => location
                .node_id
                .iter()
                .map(|n| format!("inspect node '{n}' in the source document"))
                .collect(),
            ConvertError::TypeCoercion { target, .. } => {
                vec![format!("supply a literal that parses as {target}")]
            }
            _ => Vec::new(),
        }
    }

    pub fn schema(message: impl Into<String>) -> Self {
        ConvertError::SchemaViolation {
            message: message.into(),
            location: Location::default(),
        }
    }

    pub fn schema_at(message: impl Into<String>, location: Location) -> Self {
        ConvertError::SchemaViolation {
            message: message.into(),
            location,
        }
    }

    pub fn input(platform: Platform, message: impl Into<String>) -> Self {
        ConvertError::InputFormat {
            platform,
            message: message.into(),
        }
    }

    pub fn generation(node_id: impl Into<String>, message: impl Into<String>) -> Self {
        ConvertError::Generation {
            node_id: node_id.into(),
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, ConvertError>;

// ============================================================================
// 2. WARNING SIDE CHANNEL
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Warning {
    /// Stable short code, e.g. "unsupported-node", "lossy-provider".
    pub code: String,
    pub message: String,
    pub node_id: Option<String>,
}

/// Accumulator threaded through parsers and generators.
///
/// Pushing a warning also mirrors it to the `log` facade so long batch runs
/// leave a trace even when the caller drops the collector.
#[derive(Debug, Default)]
pub struct Warnings {
    items: Vec<Warning>,
}

impl Warnings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, code: &str, message: impl Into<String>) {
        self.push_at(code, message, None);
    }

    pub fn push_at(&mut self, code: &str, message: impl Into<String>, node_id: Option<String>) {
        let message = message.into();
        match &node_id {
            Some(id) => log::warn!("[{code}] {message} (node {id})"),
            None => log::warn!("[{code}] {message}"),
        }
        self.items.push(Warning {
            code: code.to_string(),
            message,
            node_id,
        });
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Warning> {
        self.items.iter()
    }

    pub fn into_vec(self) -> Vec<Warning> {
        self.items
    }
}
