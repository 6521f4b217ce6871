//! Deployments
//!
//! A [`Deployment`] is one compiled module plus its configuration, its
//! environment and a pool of instances. Loading probes the module once:
//! the probe instance supplies the manifest the configuration is validated
//! against, then becomes the first idle instance.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use kite_kernel::{
    ConfigValues, DeploymentId, DiscordCommand, Event, HostEnvironment, LogLevel, Manifest,
    ScopeId,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::environment::{Collaborators, DeploymentEnvironment};
use crate::pool::{InstanceFactory, InstancePool, PoolConfig, PoolError, PoolStats};
use crate::wasm_runtime::{
    CompiledModule, HandleError, HandleOutcome, ModuleInstance, ResourceLimits, WasmError,
    WasmResult, WasmRuntime,
};

/// Per-deployment overrides of the engine-wide limits.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeploymentLimits {
    pub max_memory_pages: Option<u32>,
    pub max_total_time_ms: Option<u64>,
    pub max_execution_time_ms: Option<u64>,
}

impl DeploymentLimits {
    pub fn apply(&self, base: ResourceLimits) -> ResourceLimits {
        let mut limits = base;
        if let Some(pages) = self.max_memory_pages {
            limits = limits.with_max_memory_pages(pages);
        }
        if let Some(ms) = self.max_total_time_ms {
            limits = limits.with_max_total_time(Duration::from_millis(ms));
        }
        if let Some(ms) = self.max_execution_time_ms {
            limits = limits.with_max_execution_time(Duration::from_millis(ms));
        }
        limits
    }
}

/// Everything needed to load a deployment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeploymentSpec {
    pub id: DeploymentId,
    pub scope: ScopeId,
    /// Module in binary or text format.
    pub module: Vec<u8>,
    #[serde(default)]
    pub config: ConfigValues,
    #[serde(default)]
    pub limits: DeploymentLimits,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Error)]
pub enum DeploymentError {
    #[error("failed to compile module: {0}")]
    Compile(WasmError),

    #[error("module rejected during negotiation: {0}")]
    Negotiation(WasmError),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error(transparent)]
    Pool(#[from] PoolError),
}

/// Result of delivering one event to one deployment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchReport {
    pub deployment_id: DeploymentId,
    pub outcome: Option<HandleOutcome>,
    /// Set when no instance could be borrowed.
    pub pool_error: Option<String>,
}

impl DispatchReport {
    pub fn is_success(&self) -> bool {
        self.outcome.as_ref().is_some_and(HandleOutcome::is_success)
    }
}

struct DeploymentFactory {
    runtime: Arc<WasmRuntime>,
    module: Arc<CompiledModule>,
    env: Arc<DeploymentEnvironment>,
    limits: ResourceLimits,
}

#[async_trait]
impl InstanceFactory for DeploymentFactory {
    async fn create(&self) -> WasmResult<ModuleInstance> {
        let env: Arc<dyn HostEnvironment> = self.env.clone();
        self.runtime.instantiate(&self.module, env, self.limits).await
    }
}

/// Settings a deployment inherits from the engine.
#[derive(Debug, Clone)]
pub struct DeploymentSettings {
    pub limits: ResourceLimits,
    pub pool: PoolConfig,
    pub call_timeout_ceiling: Duration,
}

pub struct Deployment {
    id: DeploymentId,
    scope: ScopeId,
    updated_at: DateTime<Utc>,
    manifest: Manifest,
    env: Arc<DeploymentEnvironment>,
    pool: InstancePool,
}

impl Deployment {
    /// Compile, probe and validate a deployment.
    pub async fn load(
        runtime: Arc<WasmRuntime>,
        spec: DeploymentSpec,
        collaborators: &Collaborators,
        settings: &DeploymentSettings,
    ) -> Result<Self, DeploymentError> {
        let module = runtime
            .compile(spec.id.as_str(), &spec.module)
            .map_err(DeploymentError::Compile)?;

        let env = Arc::new(DeploymentEnvironment::new(
            spec.id.clone(),
            collaborators,
            settings.call_timeout_ceiling,
        ));
        let factory = Arc::new(DeploymentFactory {
            runtime,
            module,
            env: env.clone(),
            limits: spec.limits.apply(settings.limits),
        });

        let probe = factory
            .create()
            .await
            .map_err(DeploymentError::Negotiation)?;
        let manifest = probe.manifest().clone();
        let config = manifest
            .resolve_config(&spec.config)
            .map_err(|e| DeploymentError::InvalidConfig(e.to_string()))?;
        env.set_config(config);

        let pool = InstancePool::new(spec.id.to_string(), settings.pool.clone(), factory);
        pool.put_idle(probe);

        info!(
            "Loaded deployment {} for {} ({} events)",
            spec.id,
            spec.scope,
            manifest.events.len()
        );

        Ok(Self {
            id: spec.id,
            scope: spec.scope,
            updated_at: spec.updated_at,
            manifest,
            env,
            pool,
        })
    }

    pub fn id(&self) -> &DeploymentId {
        &self.id
    }

    pub fn scope(&self) -> &ScopeId {
        &self.scope
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    pub fn manifest(&self) -> &Manifest {
        &self.manifest
    }

    pub fn commands(&self) -> &[DiscordCommand] {
        &self.manifest.discord_commands
    }

    pub fn handles(&self, event: &Event) -> bool {
        self.manifest.handles(&event.event_type)
    }

    pub fn pool_stats(&self) -> PoolStats {
        self.pool.stats()
    }

    /// Borrow an instance, run the event and return or invalidate the instance.
    ///
    /// Metrics and logs for the invocation are written before this returns.
    pub async fn handle_event(
        &self,
        scope: &ScopeId,
        event: &Event,
        cancel: CancellationToken,
    ) -> DispatchReport {
        let mut instance = match self.pool.borrow().await {
            Ok(instance) => instance,
            Err(e) => {
                self.env
                    .log(LogLevel::Error, format!("no instance available: {}", e))
                    .await;
                return DispatchReport {
                    deployment_id: self.id.clone(),
                    outcome: None,
                    pool_error: Some(e.to_string()),
                };
            }
        };

        let outcome = instance.handle(scope, event, cancel).await;
        if let Err(e) = &outcome.outcome {
            self.env
                .log(e.into(), format!("failed to handle {}: {}", event.event_type, e))
                .await;
        }
        self.env
            .track_event_handled(
                &event.event_type,
                outcome.is_success(),
                outcome.result.total_duration,
                outcome.result.execution_duration,
            )
            .await;

        match &outcome.outcome {
            Err(e) if e.is_fatal() => {
                debug!("Invalidating instance {} of {}", instance.id(), self.id);
                instance.invalidate();
            }
            _ => instance.give_back(),
        }

        DispatchReport {
            deployment_id: self.id.clone(),
            outcome: Some(outcome),
            pool_error: None,
        }
    }

    pub fn close(&self) {
        self.pool.close();
    }
}

impl Drop for Deployment {
    fn drop(&mut self) {
        self.pool.close();
    }
}

impl From<&HandleError> for LogLevel {
    fn from(err: &HandleError) -> Self {
        if err.is_fatal() {
            LogLevel::Error
        } else {
            LogLevel::Warn
        }
    }
}
