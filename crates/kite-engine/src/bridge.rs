//! Host call bridge
//!
//! Executes decoded guest calls against the deployment's collaborators:
//! KV calls go to the [`KvStore`], `DISCORD_*` calls to the
//! [`PlatformClient`] and `SLEEP` is served locally. Every call runs under an
//! effective timeout of `min(requested, ceiling)`, ends early when the
//! invocation it belongs to runs out of time or is canceled, and produces
//! exactly one [`CallMetric`].

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use kite_kernel::call::kv::KvEntry;
use kite_kernel::call::{DiscordCall, SleepCall};
use kite_kernel::{
    Call, CallConfig, CallEnvelope, CallInterrupt, CallMetric, DeploymentId, HostError, HostErrorKind, KvStore,
    MetricsSink, PlatformClient, PlatformError, ScopeId,
};
use serde_json::{Value, json};
use tracing::debug;

/// Platform error codes with a dedicated [`HostErrorKind`].
const UNKNOWN_CHANNEL: u32 = 10003;
const UNKNOWN_GUILD: u32 = 10004;
const UNKNOWN_MESSAGE: u32 = 10008;
const UNKNOWN_BAN: u32 = 10026;
const MISSING_ACCESS: u32 = 50001;
const MISSING_PERMISSIONS: u32 = 50013;

/// Reduce a platform failure to the guest-visible taxonomy.
pub fn map_platform_error(err: PlatformError) -> HostError {
    match err {
        PlatformError::Api { code, message } => {
            let kind = match code {
                UNKNOWN_GUILD => HostErrorKind::DiscordGuildNotFound,
                UNKNOWN_CHANNEL => HostErrorKind::DiscordChannelNotFound,
                UNKNOWN_MESSAGE => HostErrorKind::DiscordMessageNotFound,
                UNKNOWN_BAN => HostErrorKind::DiscordBanNotFound,
                MISSING_ACCESS | MISSING_PERMISSIONS => HostErrorKind::MissingAccess,
                _ => HostErrorKind::DiscordUnknown,
            };
            HostError::new(kind, message)
        }
        PlatformError::Transport(message) => HostError::new(HostErrorKind::DiscordUnknown, message),
    }
}

fn key_not_found(namespace: &str, key: &str) -> HostError {
    HostError::new(
        HostErrorKind::KvKeyNotFound,
        format!("key {}/{} not found", namespace, key),
    )
}

fn entry(namespace: &str, key: String, value: kite_kernel::call::KvValue) -> Result<Value, HostError> {
    serde_json::to_value(KvEntry {
        namespace: namespace.to_string(),
        key,
        value,
    })
    .map_err(|e| HostError::unknown(e.to_string()))
}

async fn invocation_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline.into()).await,
        None => std::future::pending().await,
    }
}

pub struct HostCallBridge {
    deployment_id: DeploymentId,
    kv: Arc<dyn KvStore>,
    platform: Arc<dyn PlatformClient>,
    metrics: Arc<dyn MetricsSink>,
    call_timeout_ceiling: Duration,
}

impl HostCallBridge {
    pub fn new(
        deployment_id: DeploymentId,
        kv: Arc<dyn KvStore>,
        platform: Arc<dyn PlatformClient>,
        metrics: Arc<dyn MetricsSink>,
        call_timeout_ceiling: Duration,
    ) -> Self {
        Self {
            deployment_id,
            kv,
            platform,
            metrics,
            call_timeout_ceiling,
        }
    }

    pub fn call_timeout_ceiling(&self) -> Duration {
        self.call_timeout_ceiling
    }

    /// Requested timeout clamped to the ceiling. Zero or absent means the ceiling.
    pub fn effective_timeout(&self, requested_ms: Option<u64>) -> Duration {
        match requested_ms {
            Some(ms) if ms > 0 => Duration::from_millis(ms).min(self.call_timeout_ceiling),
            _ => self.call_timeout_ceiling,
        }
    }

    /// Execute one call on behalf of a guest handling an event for `scope`.
    pub async fn dispatch(&self, scope: &ScopeId, envelope: CallEnvelope) -> Result<Value, HostError> {
        self.dispatch_within(scope, envelope, &CallInterrupt::none()).await
    }

    /// Like [`dispatch`](Self::dispatch), bounded by the calling invocation.
    ///
    /// The metric is recorded however the call ends, including when
    /// `interrupt` cuts it short.
    pub async fn dispatch_within(
        &self,
        scope: &ScopeId,
        envelope: CallEnvelope,
        interrupt: &CallInterrupt,
    ) -> Result<Value, HostError> {
        let CallEnvelope { call, config } = envelope;
        let call_type = call.tag();
        let timeout = self.effective_timeout(config.timeout);
        let started = Instant::now();

        let work = async {
            match call {
                // Sleeping is the call itself; clamp it instead of racing it.
                Call::Sleep(req) => self.sleep(req, timeout).await,
                call => tokio::time::timeout(timeout, self.execute(scope, call, &config))
                    .await
                    .unwrap_or_else(|_| Err(HostError::timeout())),
            }
        };

        let result = tokio::select! {
            biased;
            _ = interrupt.cancel.cancelled() => Err(HostError::canceled()),
            _ = invocation_deadline(interrupt.deadline) => Err(HostError::timeout()),
            res = work => res,
        };

        let duration = started.elapsed();
        debug!(
            "Call {} for {} finished in {:?} (success: {})",
            call_type,
            self.deployment_id,
            duration,
            result.is_ok()
        );

        self.metrics
            .record_call(CallMetric {
                deployment_id: self.deployment_id.clone(),
                scope: scope.clone(),
                call_type: call_type.to_string(),
                success: result.is_ok(),
                duration,
                recorded_at: Utc::now(),
            })
            .await;

        result
    }

    async fn sleep(&self, req: SleepCall, timeout: Duration) -> Result<Value, HostError> {
        tokio::time::sleep(Duration::from_millis(req.duration).min(timeout)).await;
        Ok(json!({}))
    }

    async fn execute(
        &self,
        scope: &ScopeId,
        call: Call,
        config: &CallConfig,
    ) -> Result<Value, HostError> {
        match call {
            Call::Sleep(req) => self.sleep(req, self.call_timeout_ceiling).await,
            Call::KvKeyGet(req) => {
                let namespace = req.namespace();
                let value = self
                    .kv
                    .get(scope, namespace, &req.key)
                    .await?
                    .ok_or_else(|| key_not_found(namespace, &req.key))?;
                entry(namespace, req.key.clone(), value)
            }
            Call::KvKeySet(req) => {
                let namespace = req.namespace();
                self.kv
                    .set(scope, namespace, &req.key, req.value.clone())
                    .await?;
                entry(namespace, req.key.clone(), req.value.clone())
            }
            Call::KvKeyDelete(req) => {
                let namespace = req.namespace();
                let value = self
                    .kv
                    .delete(scope, namespace, &req.key)
                    .await?
                    .ok_or_else(|| key_not_found(namespace, &req.key))?;
                entry(namespace, req.key.clone(), value)
            }
            Call::KvKeyIncrease(req) => {
                let namespace = req.namespace();
                let value = self
                    .kv
                    .increase(scope, namespace, &req.key, req.increment)
                    .await?;
                entry(namespace, req.key.clone(), value)
            }
            Call::Discord(call) => self.execute_discord(scope, call, config).await,
        }
    }

    async fn execute_discord(
        &self,
        scope: &ScopeId,
        call: DiscordCall,
        config: &CallConfig,
    ) -> Result<Value, HostError> {
        let kind = call.kind();
        let value = self
            .platform
            .execute(scope, &call, config)
            .await
            .map_err(map_platform_error)?;

        kind.response_shape().normalize(value).ok_or_else(|| {
            HostError::new(
                HostErrorKind::DiscordUnknown,
                format!("unexpected response shape for {}", kind.tag()),
            )
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::MemoryKvStore;
    use kite_kernel::call::{DiscordCallKind, KvValue};
    use kite_testing::{MockPlatformClient, RecordingMetricsSink};
    use tokio_util::sync::CancellationToken;

    fn bridge(platform: Arc<MockPlatformClient>, metrics: Arc<RecordingMetricsSink>) -> HostCallBridge {
        HostCallBridge::new(
            DeploymentId::new("d1"),
            Arc::new(MemoryKvStore::new()),
            platform,
            metrics,
            Duration::from_millis(3000),
        )
    }

    fn envelope(raw: Value) -> CallEnvelope {
        CallEnvelope::decode(raw.to_string().as_bytes()).unwrap()
    }

    #[test]
    fn test_effective_timeout_is_clamped() {
        let bridge = bridge(Arc::new(MockPlatformClient::new()), Arc::new(RecordingMetricsSink::new()));
        assert_eq!(bridge.effective_timeout(None), Duration::from_millis(3000));
        assert_eq!(bridge.effective_timeout(Some(0)), Duration::from_millis(3000));
        assert_eq!(bridge.effective_timeout(Some(500)), Duration::from_millis(500));
        assert_eq!(bridge.effective_timeout(Some(10_000)), Duration::from_millis(3000));
    }

    #[test]
    fn test_platform_error_mapping() {
        let api = |code| PlatformError::Api {
            code,
            message: "nope".into(),
        };
        assert_eq!(map_platform_error(api(10004)).kind, HostErrorKind::DiscordGuildNotFound);
        assert_eq!(map_platform_error(api(10003)).kind, HostErrorKind::DiscordChannelNotFound);
        assert_eq!(map_platform_error(api(10008)).kind, HostErrorKind::DiscordMessageNotFound);
        assert_eq!(map_platform_error(api(10026)).kind, HostErrorKind::DiscordBanNotFound);
        assert_eq!(map_platform_error(api(50013)).kind, HostErrorKind::MissingAccess);

        let unknown = map_platform_error(api(40001));
        assert_eq!(unknown.kind, HostErrorKind::DiscordUnknown);
        assert_eq!(unknown.message, "nope");

        let transport = map_platform_error(PlatformError::Transport("reset".into()));
        assert_eq!(transport.kind, HostErrorKind::DiscordUnknown);
    }

    #[tokio::test]
    async fn test_kv_calls_round_trip_entries() {
        let metrics = Arc::new(RecordingMetricsSink::new());
        let bridge = bridge(Arc::new(MockPlatformClient::new()), metrics.clone());
        let scope = ScopeId::new("G1");

        let missing = bridge
            .dispatch(&scope, envelope(json!({"type": "KV_KEY_GET", "data": {"key": "count"}})))
            .await
            .unwrap_err();
        assert_eq!(missing.kind, HostErrorKind::KvKeyNotFound);

        let increased = bridge
            .dispatch(
                &scope,
                envelope(json!({"type": "KV_KEY_INCREASE", "data": {"key": "count", "increment": 2}})),
            )
            .await
            .unwrap();
        assert_eq!(increased["namespace"], "default");
        assert_eq!(increased["value"], json!({"type": "INT", "value": 2}));

        let got = bridge
            .dispatch(&scope, envelope(json!({"type": "KV_KEY_GET", "data": {"key": "count"}})))
            .await
            .unwrap();
        let entry: KvEntry = serde_json::from_value(got).unwrap();
        assert_eq!(entry.value, KvValue::Int(2));

        let deleted = bridge
            .dispatch(&scope, envelope(json!({"type": "KV_KEY_DELETE", "data": {"key": "count"}})))
            .await
            .unwrap();
        assert_eq!(deleted["value"]["value"], 2);

        let calls = metrics.calls();
        assert_eq!(calls.len(), 4);
        assert!(!calls[0].success);
        assert!(calls[1..].iter().all(|m| m.success));
        assert_eq!(calls[1].call_type, "KV_KEY_INCREASE");
    }

    #[tokio::test]
    async fn test_discord_call_shapes() {
        let platform = Arc::new(MockPlatformClient::new());
        platform.respond(DiscordCallKind::RoleList, json!([{"id": "r1"}]));
        platform.respond(DiscordCallKind::BanCreate, Value::Null);
        platform.respond(DiscordCallKind::GuildGet, json!([1, 2]));
        let bridge = bridge(platform.clone(), Arc::new(RecordingMetricsSink::new()));
        let scope = ScopeId::new("G1");

        let roles = bridge
            .dispatch(&scope, envelope(json!({"type": "DISCORD_ROLE_LIST"})))
            .await
            .unwrap();
        assert_eq!(roles, json!([{"id": "r1"}]));

        let ban = bridge
            .dispatch(
                &scope,
                envelope(json!({"type": "DISCORD_BAN_CREATE", "data": {"user_id": "u1"}})),
            )
            .await
            .unwrap();
        assert_eq!(ban, json!({}));

        let bad_shape = bridge
            .dispatch(&scope, envelope(json!({"type": "DISCORD_GUILD_GET"})))
            .await
            .unwrap_err();
        assert_eq!(bad_shape.kind, HostErrorKind::DiscordUnknown);
        assert_eq!(platform.calls().len(), 3);
    }

    #[tokio::test]
    async fn test_platform_errors_are_mapped() {
        let platform = Arc::new(MockPlatformClient::new());
        platform.fail(
            DiscordCallKind::ChannelGet,
            PlatformError::Api {
                code: 10003,
                message: "Unknown Channel".into(),
            },
        );
        let bridge = bridge(platform, Arc::new(RecordingMetricsSink::new()));

        let err = bridge
            .dispatch(
                &ScopeId::new("G1"),
                envelope(json!({"type": "DISCORD_CHANNEL_GET", "data": {"id": "c1"}})),
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind, HostErrorKind::DiscordChannelNotFound);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_call_times_out_at_ceiling() {
        let platform = Arc::new(MockPlatformClient::new().with_delay(Duration::from_secs(10)));
        let metrics = Arc::new(RecordingMetricsSink::new());
        let bridge = bridge(platform, metrics.clone());

        let started = tokio::time::Instant::now();
        let err = bridge
            .dispatch(
                &ScopeId::new("G1"),
                envelope(json!({"type": "DISCORD_GUILD_GET", "config": {"timeout": 10000}})),
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind, HostErrorKind::Timeout);
        assert!(started.elapsed() >= Duration::from_millis(3000));
        assert!(started.elapsed() < Duration::from_millis(3100));

        let calls = metrics.calls();
        assert_eq!(calls.len(), 1);
        assert!(!calls[0].success);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sleep_is_clamped_and_succeeds() {
        let bridge = bridge(Arc::new(MockPlatformClient::new()), Arc::new(RecordingMetricsSink::new()));

        let started = tokio::time::Instant::now();
        let out = bridge
            .dispatch(
                &ScopeId::new("G1"),
                envelope(json!({"type": "SLEEP", "data": {"duration": 10000}})),
            )
            .await
            .unwrap();
        assert_eq!(out, json!({}));
        assert!(started.elapsed() >= Duration::from_millis(3000));
        assert!(started.elapsed() < Duration::from_millis(3100));

        let started = tokio::time::Instant::now();
        bridge
            .dispatch(
                &ScopeId::new("G1"),
                envelope(json!({"type": "SLEEP", "config": {"timeout": 200}, "data": {"duration": 1000}})),
            )
            .await
            .unwrap();
        assert!(started.elapsed() >= Duration::from_millis(200));
        assert!(started.elapsed() < Duration::from_millis(300));
    }

    #[tokio::test]
    async fn test_invocation_deadline_ends_call_and_records_metric() {
        let metrics = Arc::new(RecordingMetricsSink::new());
        let bridge = bridge(Arc::new(MockPlatformClient::new()), metrics.clone());
        let interrupt = CallInterrupt::new(
            Instant::now() + Duration::from_millis(100),
            CancellationToken::new(),
        );

        let started = Instant::now();
        let err = bridge
            .dispatch_within(
                &ScopeId::new("G1"),
                envelope(json!({"type": "SLEEP", "data": {"duration": 2000}})),
                &interrupt,
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind, HostErrorKind::Timeout);
        assert!(started.elapsed() < Duration::from_millis(1000));

        let calls = metrics.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].call_type, "SLEEP");
        assert!(!calls[0].success);
    }

    #[tokio::test]
    async fn test_cancellation_ends_platform_call() {
        let platform = Arc::new(MockPlatformClient::new().with_delay(Duration::from_secs(2)));
        let metrics = Arc::new(RecordingMetricsSink::new());
        let bridge = bridge(platform, metrics.clone());
        let cancel = CancellationToken::new();
        let interrupt = CallInterrupt::new(Instant::now() + Duration::from_secs(5), cancel.clone());

        let canceler = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            cancel.cancel();
        });

        let err = bridge
            .dispatch_within(
                &ScopeId::new("G1"),
                envelope(json!({"type": "DISCORD_GUILD_GET"})),
                &interrupt,
            )
            .await
            .unwrap_err();
        canceler.await.unwrap();
        assert_eq!(err.kind, HostErrorKind::Canceled);
        assert_eq!(metrics.calls().len(), 1);
        assert!(!metrics.calls()[0].success);
    }
}
