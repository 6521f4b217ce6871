use async_trait::async_trait;
use kite_kernel::call::{DiscordCall, DiscordCallKind};
use kite_kernel::{
    CallConfig, CallMetric, DeploymentLogSink, EventMetric, KernelError, LogEntry, MetricsSink,
    PlatformClient, PlatformError, ResponseShape, ScopeId, UsageSnapshot, UsageSource,
};
use parking_lot::Mutex;
use serde_json::{Value, json};
use std::collections::HashMap;
use std::time::Duration;

/// A platform call as the mock received it.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedCall {
    pub scope: ScopeId,
    pub call: DiscordCall,
    pub config: CallConfig,
}

/// A platform client with stubbed responses.
///
/// Unstubbed calls succeed with an empty value of the call's declared shape.
#[derive(Default)]
pub struct MockPlatformClient {
    responses: Mutex<HashMap<DiscordCallKind, Result<Value, PlatformError>>>,
    history: Mutex<Vec<RecordedCall>>,
    delay: Option<Duration>,
}

impl MockPlatformClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait this long before answering every call.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn respond(&self, kind: DiscordCallKind, value: Value) {
        self.responses.lock().insert(kind, Ok(value));
    }

    pub fn fail(&self, kind: DiscordCallKind, error: PlatformError) {
        self.responses.lock().insert(kind, Err(error));
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.history.lock().clone()
    }

    pub fn call_count(&self) -> usize {
        self.history.lock().len()
    }
}

fn empty_value(shape: ResponseShape) -> Value {
    match shape {
        ResponseShape::Object => json!({}),
        ResponseShape::List => json!([]),
        ResponseShape::Empty | ResponseShape::OptionalObject => Value::Null,
    }
}

#[async_trait]
impl PlatformClient for MockPlatformClient {
    async fn execute(
        &self,
        scope: &ScopeId,
        call: &DiscordCall,
        config: &CallConfig,
    ) -> Result<Value, PlatformError> {
        self.history.lock().push(RecordedCall {
            scope: scope.clone(),
            call: call.clone(),
            config: config.clone(),
        });

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let kind = call.kind();
        match self.responses.lock().get(&kind) {
            Some(stubbed) => stubbed.clone(),
            None => Ok(empty_value(kind.response_shape())),
        }
    }
}

/// Metrics sink that keeps everything it receives.
#[derive(Default)]
pub struct RecordingMetricsSink {
    calls: Mutex<Vec<CallMetric>>,
    events: Mutex<Vec<EventMetric>>,
}

impl RecordingMetricsSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<CallMetric> {
        self.calls.lock().clone()
    }

    pub fn events(&self) -> Vec<EventMetric> {
        self.events.lock().clone()
    }
}

#[async_trait]
impl MetricsSink for RecordingMetricsSink {
    async fn record_call(&self, metric: CallMetric) {
        self.calls.lock().push(metric);
    }

    async fn record_event_handled(&self, metric: EventMetric) {
        self.events.lock().push(metric);
    }
}

/// Deployment log sink that keeps every entry.
#[derive(Default)]
pub struct RecordingLogSink {
    entries: Mutex<Vec<LogEntry>>,
}

impl RecordingLogSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<LogEntry> {
        self.entries.lock().clone()
    }

    pub fn messages(&self) -> Vec<String> {
        self.entries.lock().iter().map(|e| e.message.clone()).collect()
    }
}

#[async_trait]
impl DeploymentLogSink for RecordingLogSink {
    async fn write(&self, entry: LogEntry) {
        self.entries.lock().push(entry);
    }
}

/// Usage source returning the same answer for every scope.
pub struct StaticUsage {
    snapshot: Mutex<Result<UsageSnapshot, String>>,
}

impl StaticUsage {
    pub fn unlimited() -> Self {
        Self {
            snapshot: Mutex::new(Ok(UsageSnapshot::unlimited())),
        }
    }

    pub fn exhausted() -> Self {
        Self {
            snapshot: Mutex::new(Ok(UsageSnapshot {
                total_event_execution_time: Duration::from_secs(3600),
                monthly_execution_time_limit: Duration::from_secs(3600),
            })),
        }
    }

    /// Every lookup fails with `message`.
    pub fn failing(message: impl Into<String>) -> Self {
        Self {
            snapshot: Mutex::new(Err(message.into())),
        }
    }

    pub fn set(&self, snapshot: UsageSnapshot) {
        *self.snapshot.lock() = Ok(snapshot);
    }
}

#[async_trait]
impl UsageSource for StaticUsage {
    async fn usage(&self, _scope: &ScopeId) -> Result<UsageSnapshot, KernelError> {
        self.snapshot
            .lock()
            .clone()
            .map_err(KernelError::Internal)
    }
}

/// Assert how many events a [`RecordingMetricsSink`] saw, and how many succeeded.
#[macro_export]
macro_rules! assert_events_handled {
    ($metrics:expr, $total:expr, $succeeded:expr) => {
        let events = $metrics.events();
        assert_eq!(
            events.len(),
            $total,
            "Expected {} handled events, got {}",
            $total,
            events.len()
        );
        let succeeded = events.iter().filter(|e| e.success).count();
        assert_eq!(
            succeeded, $succeeded,
            "Expected {} successful events, got {}",
            $succeeded, succeeded
        );
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use kite_kernel::call::DiscordCall;

    #[tokio::test]
    async fn test_mock_platform_defaults_to_empty_shape() {
        let platform = MockPlatformClient::new();
        let call = DiscordCall::decode(DiscordCallKind::RoleList, json!({})).unwrap();

        let out = platform
            .execute(&ScopeId::new("G1"), &call, &CallConfig::default())
            .await
            .unwrap();
        assert_eq!(out, json!([]));
        assert_eq!(platform.call_count(), 1);
        assert_eq!(platform.calls()[0].scope, ScopeId::new("G1"));
    }

    #[tokio::test]
    async fn test_static_usage() {
        let scope = ScopeId::new("G1");
        assert!(!StaticUsage::unlimited().usage(&scope).await.unwrap().is_exhausted());
        assert!(StaticUsage::exhausted().usage(&scope).await.unwrap().is_exhausted());
        assert!(StaticUsage::failing("down").usage(&scope).await.is_err());
    }
}
