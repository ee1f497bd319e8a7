//! Declared tool inputs and argument validation
//!
//! Every tool declares its fields once; the same declaration produces the JSON
//! schema offered to the model and validates arguments before any side effect.

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueKind {
    #[default]
    String,
    Integer,
    Number,
    Boolean,
    Array,
    Object,
    Any,
}

impl ValueKind {
    pub fn matches(&self, value: &Value) -> bool {
        match self {
            ValueKind::String => value.is_string(),
            ValueKind::Integer => value.is_i64() || value.is_u64(),
            ValueKind::Number => value.is_number(),
            ValueKind::Boolean => value.is_boolean(),
            ValueKind::Array => value.is_array(),
            ValueKind::Object => value.is_object(),
            ValueKind::Any => true,
        }
    }

    fn json_type(&self) -> Option<&'static str> {
        match self {
            ValueKind::String => Some("string"),
            ValueKind::Integer => Some("integer"),
            ValueKind::Number => Some("number"),
            ValueKind::Boolean => Some("boolean"),
            ValueKind::Array => Some("array"),
            ValueKind::Object => Some("object"),
            ValueKind::Any => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldSpec {
    pub name: String,
    #[serde(default)]
    pub kind: ValueKind,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub description: String,
}

impl FieldSpec {
    pub fn required(name: &str, kind: ValueKind, description: &str) -> Self {
        Self {
            name: name.to_string(),
            kind,
            required: true,
            description: description.to_string(),
        }
    }

    pub fn optional(name: &str, kind: ValueKind, description: &str) -> Self {
        Self {
            required: false,
            ..Self::required(name, kind, description)
        }
    }
}

/// Check arguments against declared fields.
///
/// Missing required fields and values of the wrong type are rejected; a `null`
/// optional field counts as absent. Undeclared extra fields are tolerated.
pub fn validate(fields: &[FieldSpec], args: &Map<String, Value>) -> Result<(), String> {
    for field in fields {
        match args.get(&field.name) {
            None | Some(Value::Null) if field.required => {
                return Err(format!("missing required field '{}'", field.name));
            }
            None | Some(Value::Null) => {}
            Some(value) if !field.kind.matches(value) => {
                return Err(format!(
                    "field '{}' must be of type {}",
                    field.name,
                    field.kind.json_type().unwrap_or("any")
                ));
            }
            Some(_) => {}
        }
    }
    Ok(())
}

/// JSON schema object for the model's tool definition
pub fn to_json_schema(fields: &[FieldSpec]) -> Value {
    let mut properties = Map::new();
    for field in fields {
        let mut property = json!({ "description": field.description });
        if let Some(kind) = field.kind.json_type() {
            property["type"] = json!(kind);
        }
        properties.insert(field.name.clone(), property);
    }
    let required: Vec<&str> = fields
        .iter()
        .filter(|f| f.required)
        .map(|f| f.name.as_str())
        .collect();

    json!({
        "type": "object",
        "properties": properties,
        "required": required,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fields() -> Vec<FieldSpec> {
        vec![
            FieldSpec::required("path", ValueKind::String, "Target path"),
            FieldSpec::optional("limit", ValueKind::Integer, "Max lines"),
        ]
    }

    fn args(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap_or_default()
    }

    #[test]
    fn test_validate_accepts_valid_arguments() {
        assert!(validate(&fields(), &args(json!({"path": "a.txt"}))).is_ok());
        assert!(validate(&fields(), &args(json!({"path": "a.txt", "limit": 3}))).is_ok());
        assert!(validate(&fields(), &args(json!({"path": "a", "limit": null}))).is_ok());
        assert!(validate(&fields(), &args(json!({"path": "a", "extra": true}))).is_ok());
    }

    #[test]
    fn test_validate_rejects_missing_and_mistyped() {
        let err = validate(&fields(), &args(json!({}))).unwrap_err();
        assert!(err.contains("missing required field 'path'"));

        let err = validate(&fields(), &args(json!({"path": 5}))).unwrap_err();
        assert!(err.contains("must be of type string"));

        let err = validate(&fields(), &args(json!({"path": "a", "limit": 1.5}))).unwrap_err();
        assert!(err.contains("integer"));
    }

    #[test]
    fn test_json_schema() {
        let schema = to_json_schema(&fields());
        assert_eq!(schema["type"], "object");
        assert_eq!(schema["properties"]["path"]["type"], "string");
        assert_eq!(schema["required"], json!(["path"]));
    }
}
