//! Attribute schemas for device facts and configuration fields.
//!
//! Only the type is interpreted here, to coerce values set by scripts. The
//! remaining flags are carried for external diff and compliance consumers.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Value type of an attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AttributeType {
    Text,
    LongText,
    Numeric,
    Binary,
    BinaryFile,
}

/// Declared attribute of a driver.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttributeSpec {
    /// Value type.
    #[serde(alias = "type")]
    pub kind: AttributeType,

    /// Human readable title.
    #[serde(default)]
    pub title: Option<String>,

    /// Whether versions of this attribute can be diffed.
    #[serde(default)]
    pub comparable: bool,

    /// Whether this attribute can be searched.
    #[serde(default)]
    pub searchable: bool,

    /// Whether compliance rules can check this attribute.
    #[serde(default)]
    pub checkable: bool,

    /// Export template, opaque to the engine.
    #[serde(default)]
    pub dump: Option<Value>,
}

impl AttributeSpec {
    /// Create a plain attribute of the given type.
    pub fn new(kind: AttributeType) -> Self {
        Self {
            kind,
            title: None,
            comparable: false,
            searchable: false,
            checkable: false,
            dump: None,
        }
    }

    /// Coerce a script value to this attribute's type.
    pub fn coerce(&self, value: Value) -> Result<Value, String> {
        match self.kind {
            AttributeType::Text | AttributeType::LongText => Ok(match value {
                Value::String(s) => Value::String(s),
                Value::Null => Value::String(String::new()),
                other => Value::String(other.to_string()),
            }),
            AttributeType::Numeric => match &value {
                Value::Number(_) => Ok(value),
                Value::String(s) => s
                    .trim()
                    .parse::<f64>()
                    .ok()
                    .and_then(serde_json::Number::from_f64)
                    .map(Value::Number)
                    .ok_or_else(|| format!("'{s}' is not a number")),
                other => Err(format!("{other} is not a number")),
            },
            AttributeType::Binary => match &value {
                Value::Bool(_) => Ok(value),
                Value::String(s) if s == "true" || s == "false" => Ok(Value::Bool(s == "true")),
                Value::Number(n) => Ok(Value::Bool(n.as_f64().is_some_and(|f| f != 0.0))),
                other => Err(format!("{other} is not a boolean")),
            },
            AttributeType::BinaryFile => {
                Err("binary file attributes can only be set by download".to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_coerce_text() {
        let spec = AttributeSpec::new(AttributeType::Text);
        assert_eq!(spec.coerce(json!(42)).unwrap(), json!("42"));
        assert_eq!(spec.coerce(json!("abc")).unwrap(), json!("abc"));
    }

    #[test]
    fn test_coerce_numeric_and_binary() {
        let spec = AttributeSpec::new(AttributeType::Numeric);
        assert_eq!(spec.coerce(json!(" 12.5 ")).unwrap(), json!(12.5));
        assert!(spec.coerce(json!("twelve")).is_err());

        let spec = AttributeSpec::new(AttributeType::Binary);
        assert_eq!(spec.coerce(json!("true")).unwrap(), json!(true));
        assert_eq!(spec.coerce(json!(0)).unwrap(), json!(false));
    }

    #[test]
    fn test_binary_file_not_settable() {
        let spec = AttributeSpec::new(AttributeType::BinaryFile);
        assert!(spec.coerce(json!("x")).is_err());
    }

    #[test]
    fn test_deserialize_with_type_alias() {
        let spec: AttributeSpec =
            serde_json::from_value(json!({"type": "LongText", "title": "Running config", "comparable": true}))
                .unwrap();
        assert_eq!(spec.kind, AttributeType::LongText);
        assert!(spec.comparable);
        assert!(!spec.checkable);
    }
}
