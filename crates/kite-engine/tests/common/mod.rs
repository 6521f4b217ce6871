//! Shared harness for `kite-engine` integration tests.
//!
//! Declared with `mod common;` in each test file that needs it.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use kite_engine::{
    Collaborators, DeploymentEnvironment, DeploymentSpec, Engine, EngineConfig, MemoryKvStore,
    ModuleInstance, ResourceLimits, RuntimeConfig, WasmResult, WasmRuntime,
};
use kite_kernel::{ConfigValues, DeploymentId, Event, EventType, HostEnvironment, ScopeId};
use kite_testing::{MockPlatformClient, RecordingLogSink, RecordingMetricsSink, StaticUsage};
use serde_json::json;

pub const SCOPE: &str = "G1";

/// Recording collaborators plus shortcuts to build instances and engines on them.
///
/// Instances share the harness runtime, whose epoch ticker must outlive them.
pub struct Harness {
    pub runtime: Arc<WasmRuntime>,
    pub kv: Arc<MemoryKvStore>,
    pub platform: Arc<MockPlatformClient>,
    pub metrics: Arc<RecordingMetricsSink>,
    pub logs: Arc<RecordingLogSink>,
    pub usage: Arc<StaticUsage>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_usage(StaticUsage::unlimited())
    }

    pub fn with_usage(usage: StaticUsage) -> Self {
        Self {
            runtime: runtime(),
            kv: Arc::new(MemoryKvStore::new()),
            platform: Arc::new(MockPlatformClient::new()),
            metrics: Arc::new(RecordingMetricsSink::new()),
            logs: Arc::new(RecordingLogSink::new()),
            usage: Arc::new(usage),
        }
    }

    pub fn collaborators(&self) -> Collaborators {
        Collaborators {
            kv: self.kv.clone(),
            platform: self.platform.clone(),
            metrics: self.metrics.clone(),
            logs: self.logs.clone(),
            usage: self.usage.clone(),
        }
    }

    /// Compile `wat` and negotiate one instance wired to this harness.
    pub async fn instance(&self, wat: &str, limits: ResourceLimits) -> WasmResult<ModuleInstance> {
        let module = self.runtime.compile("test", wat.as_bytes())?;
        let env = DeploymentEnvironment::new(
            DeploymentId::new("test"),
            &self.collaborators(),
            Duration::from_secs(3),
        );
        env.set_config(ConfigValues::new());
        let env: Arc<dyn HostEnvironment> = Arc::new(env);
        self.runtime.instantiate(&module, env, limits).await
    }

    pub fn engine(&self, config: EngineConfig) -> Arc<Engine> {
        Arc::new(Engine::new(config, self.collaborators()).expect("engine"))
    }

    pub fn log_messages(&self) -> Vec<String> {
        self.logs.messages()
    }
}

pub fn runtime() -> Arc<WasmRuntime> {
    let config = RuntimeConfig::default().with_epoch_tick(Duration::from_millis(2));
    Arc::new(WasmRuntime::new(config).expect("runtime"))
}

pub fn spec(id: &str, scope: &str, wat: &str) -> DeploymentSpec {
    DeploymentSpec {
        id: DeploymentId::new(id),
        scope: ScopeId::new(scope),
        module: wat.as_bytes().to_vec(),
        config: ConfigValues::new(),
        limits: Default::default(),
        updated_at: Utc::now(),
    }
}

pub fn message_event(guild_id: &str) -> Event {
    Event::new(
        EventType::MessageCreate,
        guild_id,
        json!({ "content": "hello", "channel_id": "c1" }),
    )
}

pub fn scope() -> ScopeId {
    ScopeId::new(SCOPE)
}
