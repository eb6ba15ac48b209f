//! Declarative command shapes.
//!
//! A [`CommandShape`] describes the fields a command accepts. Payloads are
//! built by walking the shape against raw input, so validation errors carry
//! the dotted path to the offending field, and the same shape renders the
//! JSON parameter schema handed to the LLM as a tool description.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt::{Display, Formatter};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    String,
    Integer,
    Float,
    Bool,
    List,
    Object,
}

impl FieldKind {
    fn json_type(self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Integer => "integer",
            Self::Float => "number",
            Self::Bool => "boolean",
            Self::List => "array",
            Self::Object => "object",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldSpec {
    pub name: String,
    pub kind: FieldKind,
    #[serde(default = "default_required")]
    pub required: bool,
    #[serde(default)]
    pub description: Option<String>,
    /// Nested shape, mandatory for `Object` fields.
    #[serde(default)]
    pub shape: Option<CommandShape>,
}

fn default_required() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct CommandShape {
    pub fields: Vec<FieldSpec>,
}

/// Shape validation failure, pointing at the field by dotted path.
#[derive(Debug, Clone, PartialEq)]
pub enum ShapeError {
    MissingField {
        path: String,
    },
    WrongKind {
        path: String,
        expected: FieldKind,
        found: &'static str,
    },
    /// An `Object` field without a nested shape.
    MissingShape {
        path: String,
    },
}

impl Display for ShapeError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MissingField { path } => write!(f, "missing required field: {}", path),
            Self::WrongKind {
                path,
                expected,
                found,
            } => write!(
                f,
                "field {} expects {} but got {}",
                path,
                expected.json_type(),
                found
            ),
            Self::MissingShape { path } => {
                write!(f, "object field {} declares no nested shape", path)
            }
        }
    }
}

impl std::error::Error for ShapeError {}

/// Builds a validated payload from raw input by walking the shape.
///
/// Output fields follow shape declaration order regardless of input order.
/// Unknown input fields are dropped.
pub fn build_payload(
    shape: &CommandShape,
    input: &crate::event::Payload,
) -> Result<crate::event::Payload, ShapeError> {
    build_at_path(shape, input, "")
}

fn build_at_path(
    shape: &CommandShape,
    input: &crate::event::Payload,
    prefix: &str,
) -> Result<crate::event::Payload, ShapeError> {
    let mut output = crate::event::Payload::new();
    for field in &shape.fields {
        let path = if prefix.is_empty() {
            field.name.clone()
        } else {
            format!("{}.{}", prefix, field.name)
        };
        let Some(value) = input.get(&field.name) else {
            if field.required {
                return Err(ShapeError::MissingField { path });
            }
            continue;
        };

        let accepted = match field.kind {
            FieldKind::String => value.is_string(),
            FieldKind::Integer => value.is_i64() || value.is_u64(),
            FieldKind::Float => value.is_number(),
            FieldKind::Bool => value.is_boolean(),
            FieldKind::List => value.is_array(),
            FieldKind::Object => value.is_object(),
        };
        if !accepted {
            return Err(ShapeError::WrongKind {
                path,
                expected: field.kind,
                found: value_kind(value),
            });
        }

        if field.kind == FieldKind::Object {
            let Some(nested_shape) = &field.shape else {
                return Err(ShapeError::MissingShape { path });
            };
            let Value::Object(nested_input) = value else {
                unreachable!("checked above");
            };
            let nested = build_at_path(nested_shape, nested_input, &path)?;
            output.insert(field.name.clone(), Value::Object(nested));
        } else {
            output.insert(field.name.clone(), value.clone());
        }
    }
    Ok(output)
}

fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Renders the shape as a JSON-schema-style parameter object for tool
/// descriptions.
pub fn tool_parameters(shape: &CommandShape) -> Value {
    let mut properties = serde_json::Map::new();
    let mut required = Vec::new();
    for field in &shape.fields {
        let mut property = serde_json::Map::new();
        property.insert(
            "type".to_string(),
            Value::String(field.kind.json_type().to_string()),
        );
        if let Some(description) = &field.description {
            property.insert(
                "description".to_string(),
                Value::String(description.clone()),
            );
        }
        if field.kind == FieldKind::Object {
            if let Some(nested) = &field.shape {
                let Value::Object(nested_schema) = tool_parameters(nested) else {
                    unreachable!("tool_parameters always returns an object");
                };
                for (key, value) in nested_schema {
                    if key != "type" {
                        property.insert(key, value);
                    }
                }
            }
        }
        properties.insert(field.name.clone(), Value::Object(property));
        if field.required {
            required.push(Value::String(field.name.clone()));
        }
    }

    let mut schema = serde_json::Map::new();
    schema.insert("type".to_string(), Value::String("object".to_string()));
    schema.insert("properties".to_string(), Value::Object(properties));
    schema.insert("required".to_string(), Value::Array(required));
    Value::Object(schema)
}

/// A command visible to event handlers and the orchestrator.
#[derive(Debug, Clone)]
pub struct CommandInfo {
    pub name: String,
    pub module: Option<String>,
    pub shape: Option<CommandShape>,
}

/// Read-only view of the currently registered commands.
#[derive(Debug, Clone, Default)]
pub struct CommandCatalog {
    pub entries: Vec<CommandInfo>,
}

impl CommandCatalog {
    pub fn contains(&self, name: &str) -> bool {
        self.entries.iter().any(|entry| entry.name == name)
    }

    pub fn names(&self) -> Vec<&str> {
        self.entries.iter().map(|entry| entry.name.as_str()).collect()
    }
}

#[cfg(test)]
#[path = "tests/command_tests.rs"]
mod tests;
