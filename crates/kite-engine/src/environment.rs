//! Per-deployment host environment.
//!
//! [`DeploymentEnvironment`] is what a guest's host calls reach: it forwards
//! calls to the [`HostCallBridge`], logs to the deployment log sink and
//! reports handled events to the metrics sink.

use std::sync::{Arc, OnceLock};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use kite_kernel::{
    CallEnvelope, CallInterrupt, ConfigValues, DeploymentId, DeploymentLogSink, EventMetric,
    EventType, HostEnvironment, HostError, KvStore, LogEntry, LogLevel, MetricsSink,
    PlatformClient, ScopeId, UsageSource,
};
use serde_json::Value;
use tracing::{debug, error, info, warn};

use crate::bridge::HostCallBridge;

/// Shared collaborators every deployment is wired to.
#[derive(Clone)]
pub struct Collaborators {
    pub kv: Arc<dyn KvStore>,
    pub platform: Arc<dyn PlatformClient>,
    pub metrics: Arc<dyn MetricsSink>,
    pub logs: Arc<dyn DeploymentLogSink>,
    pub usage: Arc<dyn UsageSource>,
}

pub struct DeploymentEnvironment {
    deployment_id: DeploymentId,
    bridge: HostCallBridge,
    config: OnceLock<ConfigValues>,
    logs: Arc<dyn DeploymentLogSink>,
    metrics: Arc<dyn MetricsSink>,
}

impl DeploymentEnvironment {
    pub fn new(
        deployment_id: DeploymentId,
        collaborators: &Collaborators,
        call_timeout_ceiling: Duration,
    ) -> Self {
        let bridge = HostCallBridge::new(
            deployment_id.clone(),
            collaborators.kv.clone(),
            collaborators.platform.clone(),
            collaborators.metrics.clone(),
            call_timeout_ceiling,
        );

        Self {
            deployment_id,
            bridge,
            config: OnceLock::new(),
            logs: collaborators.logs.clone(),
            metrics: collaborators.metrics.clone(),
        }
    }

    pub fn deployment_id(&self) -> &DeploymentId {
        &self.deployment_id
    }

    /// Install the validated configuration. Only the first call has an effect.
    pub fn set_config(&self, config: ConfigValues) -> bool {
        self.config.set(config).is_ok()
    }
}

#[async_trait]
impl HostEnvironment for DeploymentEnvironment {
    async fn log(&self, level: LogLevel, message: String) {
        let deployment = self.deployment_id.as_str();
        match level {
            LogLevel::Debug => debug!(deployment, "guest: {}", message),
            LogLevel::Info => info!(deployment, "guest: {}", message),
            LogLevel::Warn => warn!(deployment, "guest: {}", message),
            LogLevel::Error => error!(deployment, "guest: {}", message),
        }

        self.logs
            .write(LogEntry {
                deployment_id: self.deployment_id.clone(),
                level,
                message,
                recorded_at: Utc::now(),
            })
            .await;
    }

    async fn call(
        &self,
        scope: &ScopeId,
        envelope: CallEnvelope,
        interrupt: &CallInterrupt,
    ) -> Result<Value, HostError> {
        self.bridge.dispatch_within(scope, envelope, interrupt).await
    }

    async fn get_config(&self) -> Result<ConfigValues, HostError> {
        Ok(self.config.get().cloned().unwrap_or_default())
    }

    async fn track_event_handled(
        &self,
        event_type: &EventType,
        success: bool,
        total_duration: Duration,
        execution_duration: Duration,
    ) {
        self.metrics
            .record_event_handled(EventMetric {
                deployment_id: self.deployment_id.clone(),
                event_type: event_type.clone(),
                success,
                total_duration,
                execution_duration,
                recorded_at: Utc::now(),
            })
            .await;
    }
}
