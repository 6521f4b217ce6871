//! Collaborators that report through `tracing`.
//!
//! Used by the `kite` binary and as defaults when no persistent store is wired in.

use async_trait::async_trait;
use kite_kernel::{
    CallMetric, DeploymentLogSink, EventMetric, KernelError, LogEntry, LogLevel, MetricsSink,
    ScopeId, UsageSnapshot, UsageSource,
};
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, Default)]
pub struct TracingMetricsSink;

#[async_trait]
impl MetricsSink for TracingMetricsSink {
    async fn record_call(&self, metric: CallMetric) {
        debug!(
            deployment = %metric.deployment_id,
            scope = %metric.scope,
            call_type = %metric.call_type,
            success = metric.success,
            duration_ms = metric.duration.as_millis() as u64,
            "host call"
        );
    }

    async fn record_event_handled(&self, metric: EventMetric) {
        info!(
            deployment = %metric.deployment_id,
            event_type = %metric.event_type,
            success = metric.success,
            total_ms = metric.total_duration.as_millis() as u64,
            execution_us = metric.execution_duration.as_micros() as u64,
            "event handled"
        );
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TracingLogSink;

#[async_trait]
impl DeploymentLogSink for TracingLogSink {
    async fn write(&self, entry: LogEntry) {
        let deployment = entry.deployment_id.as_str();
        match entry.level {
            LogLevel::Debug => debug!(deployment, "{}", entry.message),
            LogLevel::Info => info!(deployment, "{}", entry.message),
            LogLevel::Warn => warn!(deployment, "{}", entry.message),
            LogLevel::Error => error!(deployment, "{}", entry.message),
        }
    }
}

/// Usage source that never gates dispatch.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnlimitedUsage;

#[async_trait]
impl UsageSource for UnlimitedUsage {
    async fn usage(&self, _scope: &ScopeId) -> Result<UsageSnapshot, KernelError> {
        Ok(UsageSnapshot::unlimited())
    }
}
