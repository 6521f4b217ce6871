//! Host call envelope and taxonomy.
//!
//! Wire shape of a call issued by a guest:
//!
//! ```json
//! { "type": "KV_KEY_INCREASE", "config": { "timeout": 500 }, "data": { "key": "count" } }
//! ```
//!
//! and of the response written back:
//!
//! ```json
//! { "success": true, "data": { ... } }
//! { "success": false, "error": { "code": 201, "message": "..." } }
//! ```

pub mod discord;
pub mod kv;

pub use discord::{DiscordCall, DiscordCallKind};
pub use kv::{KvEntry, KvKeyDeleteCall, KvKeyGetCall, KvKeyIncreaseCall, KvKeySetCall, KvValue};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::HostError;

pub const SLEEP: &str = "SLEEP";
pub const KV_KEY_GET: &str = "KV_KEY_GET";
pub const KV_KEY_SET: &str = "KV_KEY_SET";
pub const KV_KEY_DELETE: &str = "KV_KEY_DELETE";
pub const KV_KEY_INCREASE: &str = "KV_KEY_INCREASE";

/// Per-call options supplied by the guest.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallConfig {
    /// Audit log reason forwarded to the platform.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Requested timeout in milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SleepCall {
    /// Milliseconds.
    pub duration: u64,
}

/// A fully decoded host call.
#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Sleep(SleepCall),
    KvKeyGet(KvKeyGetCall),
    KvKeySet(KvKeySetCall),
    KvKeyDelete(KvKeyDeleteCall),
    KvKeyIncrease(KvKeyIncreaseCall),
    Discord(DiscordCall),
}

impl Call {
    pub fn tag(&self) -> &'static str {
        match self {
            Call::Sleep(_) => SLEEP,
            Call::KvKeyGet(_) => KV_KEY_GET,
            Call::KvKeySet(_) => KV_KEY_SET,
            Call::KvKeyDelete(_) => KV_KEY_DELETE,
            Call::KvKeyIncrease(_) => KV_KEY_INCREASE,
            Call::Discord(call) => call.kind().tag(),
        }
    }

    pub fn response_shape(&self) -> ResponseShape {
        match self {
            Call::Discord(call) => call.kind().response_shape(),
            _ => ResponseShape::Object,
        }
    }

    /// Decode the `data` payload of a call with the given tag.
    ///
    /// Unknown tags fail with [`HostErrorKind::Unimplemented`](crate::HostErrorKind),
    /// malformed payloads with `ValidationFailed`.
    pub fn decode(tag: &str, data: Value) -> Result<Self, HostError> {
        let data = match data {
            Value::Null => Value::Object(Map::new()),
            other => other,
        };
        let invalid = |e: serde_json::Error| {
            HostError::validation(format!("invalid data for {}: {}", tag, e))
        };

        match tag {
            SLEEP => serde_json::from_value(data).map(Call::Sleep).map_err(invalid),
            KV_KEY_GET => serde_json::from_value(data).map(Call::KvKeyGet).map_err(invalid),
            KV_KEY_SET => serde_json::from_value(data).map(Call::KvKeySet).map_err(invalid),
            KV_KEY_DELETE => serde_json::from_value(data).map(Call::KvKeyDelete).map_err(invalid),
            KV_KEY_INCREASE => serde_json::from_value(data)
                .map(Call::KvKeyIncrease)
                .map_err(invalid),
            other => match DiscordCallKind::from_tag(other) {
                Some(kind) => DiscordCall::decode(kind, data)
                    .map(Call::Discord)
                    .map_err(invalid),
                None => Err(HostError::unimplemented(other)),
            },
        }
    }

    /// Request payload as sent on the wire.
    pub fn data(&self) -> Result<Value, serde_json::Error> {
        match self {
            Call::Sleep(req) => serde_json::to_value(req),
            Call::KvKeyGet(req) => serde_json::to_value(req),
            Call::KvKeySet(req) => serde_json::to_value(req),
            Call::KvKeyDelete(req) => serde_json::to_value(req),
            Call::KvKeyIncrease(req) => serde_json::to_value(req),
            Call::Discord(req) => req.to_value(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct RawEnvelope {
    #[serde(rename = "type")]
    call_type: String,
    #[serde(default)]
    config: CallConfig,
    #[serde(default)]
    data: Value,
}

/// A call together with its options.
#[derive(Debug, Clone, PartialEq)]
pub struct CallEnvelope {
    pub call: Call,
    pub config: CallConfig,
}

impl CallEnvelope {
    pub fn new(call: Call) -> Self {
        Self {
            call,
            config: CallConfig::default(),
        }
    }

    pub fn with_timeout(mut self, timeout_ms: u64) -> Self {
        self.config.timeout = Some(timeout_ms);
        self
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.config.reason = Some(reason.into());
        self
    }

    /// Decode an envelope from guest bytes. Nothing is dispatched if this fails.
    pub fn decode(bytes: &[u8]) -> Result<Self, HostError> {
        let raw: RawEnvelope = serde_json::from_slice(bytes)
            .map_err(|e| HostError::validation(format!("invalid call envelope: {}", e)))?;
        let call = Call::decode(&raw.call_type, raw.data)?;
        Ok(Self {
            call,
            config: raw.config,
        })
    }

    pub fn encode(&self) -> Result<Vec<u8>, serde_json::Error> {
        let raw = RawEnvelope {
            call_type: self.call.tag().to_string(),
            config: self.config.clone(),
            data: self.call.data()?,
        };
        serde_json::to_vec(&raw)
    }
}

/// Response written back to the guest for one call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<HostError>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl CallResponse {
    pub fn ok(data: Value) -> Self {
        Self {
            success: true,
            error: None,
            data: Some(data),
        }
    }

    pub fn err(error: HostError) -> Self {
        Self {
            success: false,
            error: Some(error),
            data: None,
        }
    }
}

impl From<Result<Value, HostError>> for CallResponse {
    fn from(result: Result<Value, HostError>) -> Self {
        match result {
            Ok(data) => CallResponse::ok(data),
            Err(e) => CallResponse::err(e),
        }
    }
}

/// Declared shape of a call's response payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseShape {
    /// A single JSON object.
    Object,
    /// A JSON array.
    List,
    /// No payload; normalized to `{}`.
    Empty,
    /// An object or `null`.
    OptionalObject,
}

impl ResponseShape {
    pub fn accepts(self, value: &Value) -> bool {
        match self {
            ResponseShape::Object => value.is_object(),
            ResponseShape::List => value.is_array(),
            ResponseShape::Empty | ResponseShape::OptionalObject => {
                value.is_null() || value.is_object()
            }
        }
    }

    /// Check `value` against the shape and normalize it for the guest.
    pub fn normalize(self, value: Value) -> Option<Value> {
        if !self.accepts(&value) {
            return None;
        }
        match self {
            ResponseShape::Empty => Some(Value::Object(Map::new())),
            _ => Some(value),
        }
    }
}
