use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

/// The raw `config.json` of a checkpoint.
///
/// Only the keys every checkpoint shares are typed; everything else is kept
/// as-is for the configuration resolver to interpret.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct CheckpointDescriptor {
    #[serde(default, deserialize_with = "null_as_empty")]
    pub architectures: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_type: Option<String>,

    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

/// Some exported checkpoints write `"architectures": null`.
fn null_as_empty<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Vec<String>>::deserialize(deserializer)?.unwrap_or_default())
}

impl CheckpointDescriptor {
    pub fn from_json_str(s: &str) -> serde_json::Result<Self> {
        serde_json::from_str(s)
    }

    pub fn new(architectures: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            architectures: architectures.into_iter().map(Into::into).collect(),
            model_type: None,
            fields: Map::new(),
        }
    }

    pub fn with_model_type(mut self, model_type: impl Into<String>) -> Self {
        self.model_type = Some(model_type.into());
        self
    }

    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    /// First declared architecture.
    pub fn primary_architecture(&self) -> Option<&str> {
        self.architectures.first().map(String::as_str)
    }

    pub fn field(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }
}
