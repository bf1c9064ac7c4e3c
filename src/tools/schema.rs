//! Projection of tool parameter schemas into the shape the generation
//! capability expects, plus argument validation against the same schema.

use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::{json, Value};

use super::errors::ToolError;
use super::types::ToolSpec;

// ─── Model-facing schema ────────────────────────────────────────────────────

/// Parameter types the generation capability understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamType {
    String,
    Number,
    Boolean,
    Object,
    Array,
}

impl ParamType {
    /// Map a JSON Schema `type` node. `integer` becomes number; anything
    /// unrecognized becomes string.
    fn from_schema(node: Option<&Value>) -> Self {
        let name = match node {
            Some(Value::String(s)) => s.as_str(),
            // `["string", "null"]` style unions: first non-null member.
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(Value::as_str)
                .find(|t| *t != "null")
                .unwrap_or("string"),
            _ => "string",
        };
        match name {
            "number" | "integer" => ParamType::Number,
            "boolean" => ParamType::Boolean,
            "object" => ParamType::Object,
            "array" => ParamType::Array,
            _ => ParamType::String,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModelProperty {
    #[serde(rename = "type")]
    pub kind: ParamType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(rename = "enum", skip_serializing_if = "Option::is_none")]
    pub enum_values: Option<Vec<Value>>,
    /// Element type for arrays.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub items: Option<Box<ModelProperty>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModelParameters {
    #[serde(rename = "type")]
    pub kind: ParamType,
    pub properties: BTreeMap<String, ModelProperty>,
    pub required: Vec<String>,
}

/// A tool as presented to the generation capability.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModelToolSchema {
    pub name: String,
    pub description: String,
    pub parameters: ModelParameters,
}

impl ModelToolSchema {
    /// OpenAI-style `{"type": "function", "function": {...}}` wrapper.
    pub fn to_function_json(&self) -> Value {
        json!({
            "type": "function",
            "function": self,
        })
    }
}

/// Project a tool's JSON Schema into a [`ModelToolSchema`].
///
/// The model calls tools by id, so the id is used as the schema name.
pub fn to_model_schema(spec: &ToolSpec) -> ModelToolSchema {
    let properties = spec
        .parameters
        .get("properties")
        .and_then(Value::as_object)
        .map(|props| {
            props
                .iter()
                .map(|(name, node)| (name.clone(), project_property(node)))
                .collect()
        })
        .unwrap_or_default();

    ModelToolSchema {
        name: spec.id.clone(),
        description: spec.description.clone(),
        parameters: ModelParameters {
            kind: ParamType::Object,
            properties,
            required: required_fields(&spec.parameters),
        },
    }
}

fn project_property(node: &Value) -> ModelProperty {
    let kind = ParamType::from_schema(node.get("type"));
    ModelProperty {
        kind,
        description: node
            .get("description")
            .and_then(Value::as_str)
            .map(str::to_string),
        enum_values: node.get("enum").and_then(Value::as_array).cloned(),
        items: match (kind, node.get("items")) {
            (ParamType::Array, Some(items)) => Some(Box::new(project_property(items))),
            (ParamType::Array, None) => Some(Box::new(project_property(&Value::Null))),
            _ => None,
        },
    }
}

fn required_fields(schema: &Value) -> Vec<String> {
    schema
        .get("required")
        .and_then(Value::as_array)
        .map(|fields| {
            fields
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

// ─── Validation ─────────────────────────────────────────────────────────────

/// Check arguments against the tool's schema: must be an object, required
/// fields present, declared top-level types and enums respected.
pub fn validate_arguments(spec: &ToolSpec, args: &Value) -> Result<(), ToolError> {
    let Some(object) = args.as_object() else {
        return Err(ToolError::validation(format!(
            "arguments for '{}' must be a JSON object",
            spec.id
        )));
    };

    for field in required_fields(&spec.parameters) {
        match object.get(&field) {
            None | Some(Value::Null) => {
                return Err(ToolError::validation(format!(
                    "missing required field '{field}'"
                )))
            }
            Some(_) => {}
        }
    }

    let Some(props) = spec.parameters.get("properties").and_then(Value::as_object) else {
        return Ok(());
    };
    for (name, value) in object {
        let Some(node) = props.get(name) else {
            continue;
        };
        if value.is_null() {
            continue;
        }
        let expected = node.get("type").and_then(Value::as_str);
        let matches = match expected {
            Some("string") => value.is_string(),
            Some("integer") => value.is_i64() || value.is_u64(),
            Some("number") => value.is_number(),
            Some("boolean") => value.is_boolean(),
            Some("object") => value.is_object(),
            Some("array") => value.is_array(),
            _ => true,
        };
        if !matches {
            return Err(ToolError::validation(format!(
                "field '{name}' must be of type {}",
                expected.unwrap_or("unknown")
            )));
        }
        if let Some(allowed) = node.get("enum").and_then(Value::as_array) {
            if !allowed.contains(value) {
                return Err(ToolError::validation(format!(
                    "field '{name}' must be one of {}",
                    Value::Array(allowed.clone())
                )));
            }
        }
    }
    Ok(())
}

// ─── Tests ──────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;

    use super::*;
    use crate::tools::types::{ToolContext, ToolHandler, ToolOutput};

    struct Noop;

    #[async_trait]
    impl ToolHandler for Noop {
        async fn call(&self, _args: Value, _ctx: ToolContext) -> Result<ToolOutput, ToolError> {
            Ok(ToolOutput::default())
        }
    }

    fn spec(parameters: Value) -> ToolSpec {
        ToolSpec::new("search", "Search files", parameters, Arc::new(Noop))
    }

    #[test]
    fn test_projection_maps_types_and_required() {
        let schema = to_model_schema(&spec(json!({
            "type": "object",
            "properties": {
                "query": {"type": "string", "description": "Text to find"},
                "limit": {"type": "integer"},
                "mode": {"type": "string", "enum": ["fast", "full"]},
                "paths": {"type": "array", "items": {"type": "string"}},
                "when": {"type": "date-time"},
                "opt": {"type": ["boolean", "null"]}
            },
            "required": ["query"]
        })));

        let props = &schema.parameters.properties;
        assert_eq!(schema.name, "search");
        assert_eq!(schema.parameters.required, vec!["query"]);
        assert_eq!(props["limit"].kind, ParamType::Number);
        assert_eq!(props["when"].kind, ParamType::String);
        assert_eq!(props["opt"].kind, ParamType::Boolean);
        assert_eq!(
            props["mode"].enum_values,
            Some(vec![json!("fast"), json!("full")])
        );
        assert_eq!(
            props["paths"].items.as_deref().map(|p| p.kind),
            Some(ParamType::String)
        );
    }

    #[test]
    fn test_function_json_shape() {
        let schema = to_model_schema(&spec(json!({"type": "object"})));
        let json = schema.to_function_json();
        assert_eq!(json["type"], "function");
        assert_eq!(json["function"]["name"], "search");
        assert_eq!(json["function"]["parameters"]["type"], "object");
        assert_eq!(json["function"]["parameters"]["required"], json!([]));
    }

    #[test]
    fn test_validation_rejects_missing_required() {
        let spec = spec(json!({
            "type": "object",
            "properties": {"query": {"type": "string"}},
            "required": ["query"]
        }));
        let err = validate_arguments(&spec, &json!({})).unwrap_err();
        assert!(err.to_string().contains("missing required field 'query'"));
        assert!(validate_arguments(&spec, &json!({"query": "x"})).is_ok());
    }

    #[test]
    fn test_validation_checks_types_and_enums() {
        let spec = spec(json!({
            "type": "object",
            "properties": {
                "limit": {"type": "integer"},
                "mode": {"type": "string", "enum": ["fast", "full"]}
            }
        }));
        assert!(validate_arguments(&spec, &json!({"limit": "ten"})).is_err());
        assert!(validate_arguments(&spec, &json!({"limit": 1.5})).is_err());
        assert!(validate_arguments(&spec, &json!({"mode": "slow"})).is_err());
        assert!(validate_arguments(&spec, &json!({"limit": 3, "mode": "fast"})).is_ok());
        assert!(validate_arguments(&spec, &json!("not an object")).is_err());
    }
}
