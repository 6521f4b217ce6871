//! Module manifest: what a guest declares about itself during negotiation.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;

use crate::error::KernelError;
use crate::event::EventType;

/// Configuration values handed to a guest, keyed by field key.
pub type ConfigValues = Map<String, Value>;

/// Declaration produced by a guest's `describe` export.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    #[serde(default)]
    pub events: Vec<EventType>,
    #[serde(default)]
    pub discord_commands: Vec<DiscordCommand>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<ConfigSchema>,
}

impl Manifest {
    pub fn from_slice(bytes: &[u8]) -> Result<Self, KernelError> {
        Ok(serde_json::from_slice(bytes)?)
    }

    /// Whether the module subscribed to `event_type`.
    pub fn handles(&self, event_type: &EventType) -> bool {
        self.events.iter().any(|e| e == event_type)
    }

    /// Validate user configuration against the declared schema.
    ///
    /// Modules without a schema accept any configuration unchanged.
    pub fn resolve_config(&self, values: &ConfigValues) -> Result<ConfigValues, KernelError> {
        match &self.config {
            Some(schema) => schema.resolve(values),
            None => Ok(values.clone()),
        }
    }
}

/// An application command the module wants registered.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DiscordCommand {
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub command_type: Option<u8>,
    pub name: String,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub name_localizations: HashMap<String, String>,
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub description_localizations: HashMap<String, String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<CommandOption>,
    #[serde(default)]
    pub default_member_permissions: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dm_permission: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nsfw: Option<bool>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CommandOption {
    #[serde(rename = "type")]
    pub option_type: u8,
    pub name: String,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub name_localizations: HashMap<String, String>,
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub description_localizations: HashMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub required: Option<bool>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub choices: Vec<CommandOptionChoice>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<CommandOption>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub channel_types: Vec<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_value: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_value: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_length: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_length: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub autocomplete: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandOptionChoice {
    pub name: String,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub name_localizations: HashMap<String, String>,
    pub value: Value,
}

/// Declared configuration fields.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConfigSchema {
    #[serde(default)]
    pub fields: Vec<ConfigField>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfigFieldType {
    String,
    Int,
    Float,
    Bool,
    Array,
}

impl ConfigFieldType {
    fn matches(self, value: &Value) -> bool {
        match self {
            ConfigFieldType::String => value.is_string(),
            ConfigFieldType::Int => value.is_i64() || value.is_u64(),
            ConfigFieldType::Float => value.is_number(),
            ConfigFieldType::Bool => value.is_boolean(),
            ConfigFieldType::Array => value.is_array(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigField {
    pub key: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(rename = "type")]
    pub field_type: ConfigFieldType,
    /// Element type of `array` fields.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub item_type: Option<ConfigFieldType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
    #[serde(default)]
    pub required: bool,
}

impl ConfigField {
    fn check(&self, value: &Value) -> Result<(), KernelError> {
        if !self.field_type.matches(value) {
            return Err(KernelError::Validation(format!(
                "config field '{}' must be of type {:?}",
                self.key, self.field_type
            )));
        }
        if let (Some(item_type), Some(items)) = (self.item_type, value.as_array()) {
            if let Some(pos) = items.iter().position(|item| !item_type.matches(item)) {
                return Err(KernelError::Validation(format!(
                    "config field '{}' item {} must be of type {:?}",
                    self.key, pos, item_type
                )));
            }
        }
        Ok(())
    }
}

impl ConfigSchema {
    /// Type-check `values`, fill defaults and reject missing required fields.
    /// Keys without a declaration pass through untouched.
    pub fn resolve(&self, values: &ConfigValues) -> Result<ConfigValues, KernelError> {
        let mut resolved = values.clone();
        for field in &self.fields {
            match values.get(&field.key) {
                Some(Value::Null) | None => match &field.default {
                    Some(default) => {
                        resolved.insert(field.key.clone(), default.clone());
                    }
                    None if field.required => {
                        return Err(KernelError::Validation(format!(
                            "missing required config field '{}'",
                            field.key
                        )));
                    }
                    None => {}
                },
                Some(value) => field.check(value)?,
            }
        }
        Ok(resolved)
    }
}
