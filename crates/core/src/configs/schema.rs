//! Introspectable configuration classes.
//!
//! A [`ConfigClass`] describes the shape of one architecture's configuration
//! without any model code behind it: named, typed fields and nested
//! sub-config slots. Both tiers of the resolver chain (the explicit mapping
//! and the external configuration source) hand out classes in this form, and
//! the startup verifier checks them with [`ConfigClass::check_well_formed`].

use std::collections::HashSet;
use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use thiserror::Error;

use super::descriptor::FieldValue;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchemaError {
    #[error("configuration class has an empty name")]
    EmptyName,
    #[error("{class}: duplicate field or slot {name:?}")]
    DuplicateName { class: String, name: String },
    #[error("{class}: required field {field:?} must not declare a default")]
    RequiredWithDefault { class: String, field: String },
    #[error("{class}: default for {field:?} is not a valid {expected}")]
    DefaultTypeMismatch {
        class: String,
        field: String,
        expected: FieldType,
    },
    #[error("{class}: nested slot {slot:?}: {source}")]
    Nested {
        class: String,
        slot: String,
        #[source]
        source: Box<SchemaError>,
    },
}

/// Value type of a configuration field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    Bool,
    Integer,
    /// Accepts integers too (`"rope_theta": 1000000`).
    Float,
    String,
    IntegerList,
    StringList,
    Object,
    Any,
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FieldType::Bool => "bool",
            FieldType::Integer => "integer",
            FieldType::Float => "float",
            FieldType::String => "string",
            FieldType::IntegerList => "integer list",
            FieldType::StringList => "string list",
            FieldType::Object => "object",
            FieldType::Any => "any",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldSpec {
    pub name: String,
    #[serde(rename = "type")]
    pub ty: FieldType,
    #[serde(default)]
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
}

impl FieldSpec {
    pub fn required(name: impl Into<String>, ty: FieldType) -> Self {
        Self {
            name: name.into(),
            ty,
            required: true,
            default: None,
        }
    }

    pub fn optional(name: impl Into<String>, ty: FieldType) -> Self {
        Self {
            name: name.into(),
            ty,
            required: false,
            default: None,
        }
    }

    pub fn with_default(mut self, default: impl Into<Value>) -> Self {
        self.default = Some(default.into());
        self
    }
}

/// A child configuration held by a parent class.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NestedSpec {
    /// Parent key holding the sub-config (`vision_config`, `text_config`).
    pub slot: String,
    pub class: ConfigClass,
    #[serde(default)]
    pub required: bool,
    /// Read the child's fields from the parent's top level instead of from
    /// `slot`. Lets a class split a flat checkpoint into nested configs.
    #[serde(default)]
    pub flattened: bool,
}

impl NestedSpec {
    pub fn subtree(slot: impl Into<String>, class: ConfigClass) -> Self {
        Self {
            slot: slot.into(),
            class,
            required: true,
            flattened: false,
        }
    }

    pub fn flattened(slot: impl Into<String>, class: ConfigClass) -> Self {
        Self {
            slot: slot.into(),
            class,
            required: true,
            flattened: true,
        }
    }

    pub fn optional(mut self) -> Self {
        self.required = false;
        self
    }
}

fn one_or_many<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<String>),
    }
    Ok(match Option::<OneOrMany>::deserialize(deserializer)? {
        None => Vec::new(),
        Some(OneOrMany::One(s)) => vec![s],
        Some(OneOrMany::Many(v)) => v,
    })
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigClass {
    pub name: String,
    /// Checkpoint `model_type` values this class also answers to. Schema
    /// files may give a single `model_type` string instead.
    #[serde(
        default,
        alias = "model_type",
        deserialize_with = "one_or_many",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub model_types: Vec<String>,
    #[serde(default)]
    pub fields: Vec<FieldSpec>,
    #[serde(default)]
    pub nested: Vec<NestedSpec>,
}

impl ConfigClass {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            model_types: Vec::new(),
            fields: Vec::new(),
            nested: Vec::new(),
        }
    }

    /// Add a `model_type` alias. Aliases accumulate.
    pub fn with_model_type(mut self, model_type: impl Into<String>) -> Self {
        let model_type = model_type.into();
        if !self.model_types.contains(&model_type) {
            self.model_types.push(model_type);
        }
        self
    }

    pub fn field(mut self, spec: FieldSpec) -> Self {
        self.fields.push(spec);
        self
    }

    pub fn fields(mut self, specs: impl IntoIterator<Item = FieldSpec>) -> Self {
        self.fields.extend(specs);
        self
    }

    pub fn nested(mut self, spec: NestedSpec) -> Self {
        self.nested.push(spec);
        self
    }

    pub fn field_spec(&self, name: &str) -> Option<&FieldSpec> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Names read from the parent mapping when instantiating this class:
    /// its own fields, subtree slots, and the fields of flattened children.
    pub(crate) fn consumed_keys(&self) -> HashSet<&str> {
        let mut keys: HashSet<&str> = self.fields.iter().map(|f| f.name.as_str()).collect();
        for nested in &self.nested {
            if nested.flattened {
                keys.extend(nested.class.consumed_keys());
            } else {
                keys.insert(nested.slot.as_str());
            }
        }
        keys
    }

    /// Structural checks run once at startup.
    pub fn check_well_formed(&self) -> Result<(), SchemaError> {
        if self.name.trim().is_empty() {
            return Err(SchemaError::EmptyName);
        }
        let mut seen = HashSet::new();
        let names = self
            .fields
            .iter()
            .map(|f| f.name.as_str())
            .chain(self.nested.iter().map(|n| n.slot.as_str()));
        for name in names {
            if !seen.insert(name) {
                return Err(SchemaError::DuplicateName {
                    class: self.name.clone(),
                    name: name.to_string(),
                });
            }
        }
        for field in &self.fields {
            let Some(default) = &field.default else {
                continue;
            };
            if field.required {
                return Err(SchemaError::RequiredWithDefault {
                    class: self.name.clone(),
                    field: field.name.clone(),
                });
            }
            if FieldValue::from_json(field.ty, default).is_none() {
                return Err(SchemaError::DefaultTypeMismatch {
                    class: self.name.clone(),
                    field: field.name.clone(),
                    expected: field.ty,
                });
            }
        }
        for nested in &self.nested {
            nested
                .class
                .check_well_formed()
                .map_err(|source| SchemaError::Nested {
                    class: self.name.clone(),
                    slot: nested.slot.clone(),
                    source: Box::new(source),
                })?;
        }
        Ok(())
    }
}
