//! Host environment contract and the collaborators behind it.
//!
//! The engine drives guests through [`HostEnvironment`]. A concrete
//! environment is assembled per deployment from shared collaborators:
//! a [`KvStore`], a [`PlatformClient`], a [`MetricsSink`], a
//! [`DeploymentLogSink`] and, for the dispatcher's usage gate, a
//! [`UsageSource`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::call::{CallConfig, CallEnvelope, DiscordCall, KvValue};
use crate::error::{HostError, KernelError};
use crate::event::EventType;
use crate::manifest::ConfigValues;

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }
    };
}

string_id!(
    /// Tenant scope an event or deployment belongs to (a guild id).
    ScopeId
);

string_id!(
    /// Identifier of one deployment.
    DeploymentId
);

/// Guest log level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u32)]
pub enum LogLevel {
    Debug = 0,
    Info = 1,
    Warn = 2,
    Error = 3,
}

impl TryFrom<u32> for LogLevel {
    type Error = u32;

    fn try_from(v: u32) -> Result<Self, u32> {
        match v {
            0 => Ok(LogLevel::Debug),
            1 => Ok(LogLevel::Info),
            2 => Ok(LogLevel::Warn),
            3 => Ok(LogLevel::Error),
            other => Err(other),
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        };
        f.write_str(s)
    }
}

/// Bounds a host call inherits from the invocation it is made for.
///
/// A call still in flight when the deadline passes or the token is canceled
/// ends with `Timeout` or `Canceled`.
#[derive(Debug, Clone, Default)]
pub struct CallInterrupt {
    pub deadline: Option<Instant>,
    pub cancel: CancellationToken,
}

impl CallInterrupt {
    pub fn new(deadline: Instant, cancel: CancellationToken) -> Self {
        Self {
            deadline: Some(deadline),
            cancel,
        }
    }

    /// No deadline and a token nobody cancels.
    pub fn none() -> Self {
        Self::default()
    }
}

/// Everything a running guest can reach outside its sandbox.
#[async_trait]
pub trait HostEnvironment: Send + Sync {
    /// Record a guest log line.
    async fn log(&self, level: LogLevel, message: String);

    /// Execute a decoded call on behalf of the guest handling an event for `scope`.
    async fn call(
        &self,
        scope: &ScopeId,
        envelope: CallEnvelope,
        interrupt: &CallInterrupt,
    ) -> Result<Value, HostError>;

    /// Resolved configuration for this deployment.
    async fn get_config(&self) -> Result<ConfigValues, HostError>;

    /// Called once per handled invocation, after all logs for it were written.
    async fn track_event_handled(
        &self,
        event_type: &EventType,
        success: bool,
        total_duration: Duration,
        execution_duration: Duration,
    );
}

/// Namespaced key/value storage, partitioned by scope.
#[async_trait]
pub trait KvStore: Send + Sync {
    async fn get(&self, scope: &ScopeId, namespace: &str, key: &str)
        -> Result<Option<KvValue>, HostError>;

    async fn set(
        &self,
        scope: &ScopeId,
        namespace: &str,
        key: &str,
        value: KvValue,
    ) -> Result<(), HostError>;

    /// Remove a key, returning the value it held.
    async fn delete(&self, scope: &ScopeId, namespace: &str, key: &str)
        -> Result<Option<KvValue>, HostError>;

    /// Atomically add `increment` to an integer value, treating a missing key as 0.
    async fn increase(
        &self,
        scope: &ScopeId,
        namespace: &str,
        key: &str,
        increment: i64,
    ) -> Result<KvValue, HostError>;
}

/// Error reported by the platform transport.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlatformError {
    /// The platform rejected the request with a JSON error code.
    #[error("platform error {code}: {message}")]
    Api { code: u32, message: String },

    /// The request never produced a platform response.
    #[error("transport error: {0}")]
    Transport(String),
}

/// Outbound client for the chat platform's REST API.
#[async_trait]
pub trait PlatformClient: Send + Sync {
    async fn execute(
        &self,
        scope: &ScopeId,
        call: &DiscordCall,
        config: &CallConfig,
    ) -> Result<Value, PlatformError>;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallMetric {
    pub deployment_id: DeploymentId,
    pub scope: ScopeId,
    pub call_type: String,
    pub success: bool,
    pub duration: Duration,
    pub recorded_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventMetric {
    pub deployment_id: DeploymentId,
    pub event_type: EventType,
    pub success: bool,
    pub total_duration: Duration,
    pub execution_duration: Duration,
    pub recorded_at: DateTime<Utc>,
}

#[async_trait]
pub trait MetricsSink: Send + Sync {
    async fn record_call(&self, metric: CallMetric);

    async fn record_event_handled(&self, metric: EventMetric);
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub deployment_id: DeploymentId,
    pub level: LogLevel,
    pub message: String,
    pub recorded_at: DateTime<Utc>,
}

#[async_trait]
pub trait DeploymentLogSink: Send + Sync {
    async fn write(&self, entry: LogEntry);
}

/// Consumption against the monthly execution-time budget of one tenant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageSnapshot {
    pub total_event_execution_time: Duration,
    pub monthly_execution_time_limit: Duration,
}

impl UsageSnapshot {
    pub fn unlimited() -> Self {
        Self {
            total_event_execution_time: Duration::ZERO,
            monthly_execution_time_limit: Duration::MAX,
        }
    }

    pub fn is_exhausted(&self) -> bool {
        self.total_event_execution_time >= self.monthly_execution_time_limit
    }
}

#[async_trait]
pub trait UsageSource: Send + Sync {
    async fn usage(&self, scope: &ScopeId) -> Result<UsageSnapshot, KernelError>;
}
