//! Kite Engine
//!
//! Runs untrusted plugin modules for chat-platform events:
//! - a wasm sandbox with memory, execution time and wall-clock limits
//! - the host/guest ABI and the bridge that executes guest host calls
//! - per-deployment instance pools
//! - the [`Engine`] that routes events to deployments behind a usage gate

pub mod bridge;
pub mod config;
pub mod deployment;
pub mod engine;
pub mod environment;
pub mod kv;
pub mod pool;
pub mod sinks;
pub mod wasm_runtime;

pub use bridge::{HostCallBridge, map_platform_error};
pub use config::EngineConfig;
pub use deployment::{
    Deployment, DeploymentError, DeploymentLimits, DeploymentSettings, DeploymentSpec,
    DispatchReport,
};
pub use engine::{
    DeploymentSource, Engine, EngineError, EngineEvent, EngineResult, EngineStats,
    IntoEngineReport, SkipReason,
};
pub use environment::{Collaborators, DeploymentEnvironment};
pub use kv::MemoryKvStore;
pub use pool::{InstanceFactory, InstancePool, PoolConfig, PoolError, PoolStats, PooledInstance};
pub use sinks::{TracingLogSink, TracingMetricsSink, UnlimitedUsage};
pub use wasm_runtime::{
    HandleError, HandleOutcome, HandleResult, InstanceState, ModuleInstance, ResourceLimits,
    RuntimeConfig, WasmError, WasmResult, WasmRuntime,
};

pub use kite_kernel;
