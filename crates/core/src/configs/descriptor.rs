//! Resolved configuration descriptors.

use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;
use serde_json::{Map, Value};

use super::schema::FieldType;

/// Which tier of the resolver chain produced a descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResolutionStrategy {
    ExplicitMapping,
    AutoDetect,
    /// Explicit class reached through the checkpoint's `model_type`.
    ModelTypeAlias,
}

impl fmt::Display for ResolutionStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResolutionStrategy::ExplicitMapping => f.write_str("explicit-mapping"),
            ResolutionStrategy::AutoDetect => f.write_str("auto-detect"),
            ResolutionStrategy::ModelTypeAlias => f.write_str("model-type-alias"),
        }
    }
}

/// A typed field value read from a checkpoint.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum FieldValue {
    Bool(bool),
    Integer(i64),
    Float(f64),
    String(String),
    IntegerList(Vec<i64>),
    StringList(Vec<String>),
    Object(Map<String, Value>),
    Any(Value),
}

impl FieldValue {
    /// Convert a raw JSON value to the declared type. `None` when the value
    /// does not fit. Integers widen to floats; floats never narrow.
    pub fn from_json(ty: FieldType, value: &Value) -> Option<Self> {
        match ty {
            FieldType::Bool => value.as_bool().map(FieldValue::Bool),
            FieldType::Integer => value.as_i64().map(FieldValue::Integer),
            FieldType::Float => value.as_f64().map(FieldValue::Float),
            FieldType::String => value.as_str().map(|s| FieldValue::String(s.to_string())),
            FieldType::IntegerList => value
                .as_array()?
                .iter()
                .map(Value::as_i64)
                .collect::<Option<Vec<_>>>()
                .map(FieldValue::IntegerList),
            FieldType::StringList => value
                .as_array()?
                .iter()
                .map(|v| v.as_str().map(str::to_string))
                .collect::<Option<Vec<_>>>()
                .map(FieldValue::StringList),
            FieldType::Object => value.as_object().cloned().map(FieldValue::Object),
            FieldType::Any => Some(FieldValue::Any(value.clone())),
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            FieldValue::Integer(v) => Some(*v),
            FieldValue::Any(v) => v.as_i64(),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            FieldValue::Float(v) => Some(*v),
            FieldValue::Integer(v) => Some(*v as f64),
            FieldValue::Any(v) => v.as_f64(),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            FieldValue::Bool(v) => Some(*v),
            FieldValue::Any(v) => v.as_bool(),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            FieldValue::String(v) => Some(v),
            FieldValue::Any(v) => v.as_str(),
            _ => None,
        }
    }
}

/// Name of the JSON kind of `value`, for error messages.
pub(crate) fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(n) if n.is_i64() || n.is_u64() => "integer",
        Value::Number(_) => "float",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// A checkpoint's configuration, instantiated against one configuration
/// class. Nested sub-configs are full descriptors in their own right.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConfigDescriptor {
    pub architecture_id: String,
    pub class_name: String,
    pub strategy: ResolutionStrategy,
    /// Parent slot this descriptor was read from; `None` at the top level.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub slot: Option<String>,
    pub fields: BTreeMap<String, FieldValue>,
    pub nested_configs: Vec<ConfigDescriptor>,
    /// Checkpoint keys the class does not declare, kept untyped.
    #[serde(skip_serializing_if = "Map::is_empty")]
    pub extra: Map<String, Value>,
}

impl ConfigDescriptor {
    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.fields.get(name)
    }

    pub fn get_i64(&self, name: &str) -> Option<i64> {
        self.get(name).and_then(FieldValue::as_i64)
    }

    pub fn get_f64(&self, name: &str) -> Option<f64> {
        self.get(name).and_then(FieldValue::as_f64)
    }

    pub fn get_str(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(FieldValue::as_str)
    }

    pub fn nested(&self, slot: &str) -> Option<&ConfigDescriptor> {
        self.nested_configs
            .iter()
            .find(|n| n.slot.as_deref() == Some(slot))
    }

    /// Depth-first walk over this descriptor and every nested one.
    pub fn walk(&self) -> Vec<&ConfigDescriptor> {
        let mut out = vec![self];
        for nested in &self.nested_configs {
            out.extend(nested.walk());
        }
        out
    }
}
