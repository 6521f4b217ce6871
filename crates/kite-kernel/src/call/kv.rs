//! Key/value store calls and typed values.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Namespace used when a call leaves it empty.
pub const DEFAULT_NAMESPACE: &str = "default";

/// A typed value stored under a key.
///
/// Wire form: `{"type": "INT", "value": 3}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum KvValue {
    String(String),
    Int(i64),
    Float(f64),
    Bool(bool),
    Json(Value),
}

impl KvValue {
    pub fn type_name(&self) -> &'static str {
        match self {
            KvValue::String(_) => "STRING",
            KvValue::Int(_) => "INT",
            KvValue::Float(_) => "FLOAT",
            KvValue::Bool(_) => "BOOL",
            KvValue::Json(_) => "JSON",
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            KvValue::Int(v) => Some(*v),
            _ => None,
        }
    }
}

fn namespace_or_default(namespace: &str) -> &str {
    if namespace.is_empty() {
        DEFAULT_NAMESPACE
    } else {
        namespace
    }
}

fn default_increment() -> i64 {
    1
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KvKeyGetCall {
    #[serde(default)]
    pub namespace: String,
    pub key: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KvKeySetCall {
    #[serde(default)]
    pub namespace: String,
    pub key: String,
    pub value: KvValue,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KvKeyDeleteCall {
    #[serde(default)]
    pub namespace: String,
    pub key: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KvKeyIncreaseCall {
    #[serde(default)]
    pub namespace: String,
    pub key: String,
    #[serde(default = "default_increment")]
    pub increment: i64,
}

macro_rules! impl_namespace {
    ($($ty:ty),*) => {
        $(impl $ty {
            /// The namespace the call addresses, with the empty string mapped to
            /// [`DEFAULT_NAMESPACE`].
            pub fn namespace(&self) -> &str {
                namespace_or_default(&self.namespace)
            }
        })*
    };
}

impl_namespace!(KvKeyGetCall, KvKeySetCall, KvKeyDeleteCall, KvKeyIncreaseCall);

/// A stored entry, returned by every KV call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KvEntry {
    pub namespace: String,
    pub key: String,
    pub value: KvValue,
}
