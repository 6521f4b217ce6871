//! Engine
//!
//! Registry of deployments and the event dispatcher.
//!
//! App deployments are keyed by scope; global deployments receive matching
//! events of every scope. The registry sits behind a read/write lock: event
//! dispatch takes it shared and only long enough to snapshot the matching
//! deployments, so dispatch never blocks deployment replacement.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use error_stack::Report;
use futures::future::{join_all, try_join_all};
use kite_kernel::{DeploymentId, Event, EventType, KernelError, ScopeId};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::{RwLock, broadcast};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::EngineConfig;
use crate::deployment::{
    Deployment, DeploymentError, DeploymentSettings, DeploymentSpec, DispatchReport,
};
use crate::environment::Collaborators;
use crate::wasm_runtime::{CacheStats, WasmError, WasmRuntime};

/// Error-stack backed result alias for engine operations.
pub type EngineResult<T> = ::std::result::Result<T, Report<EngineError>>;

/// Extension trait to convert `Result<T, EngineError>` into [`EngineResult<T>`].
pub trait IntoEngineReport<T> {
    fn into_report(self) -> EngineResult<T>;
}

impl<T> IntoEngineReport<T> for ::std::result::Result<T, EngineError> {
    #[inline]
    fn into_report(self) -> EngineResult<T> {
        self.map_err(Report::new)
    }
}

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum EngineError {
    /// The wasm runtime could not be created.
    #[error("Runtime error: {0}")]
    Runtime(#[from] WasmError),

    /// A deployment failed to compile, negotiate or validate.
    #[error("Failed to load deployment {id}: {source}")]
    Deployment {
        id: DeploymentId,
        #[source]
        source: DeploymentError,
    },

    /// A deployment was handed to a scope it does not belong to.
    #[error("Deployment {id} belongs to {actual}, not {expected}")]
    ScopeMismatch {
        id: DeploymentId,
        expected: ScopeId,
        actual: ScopeId,
    },

    /// The deployment source could not be read.
    #[error("Deployment source error: {0}")]
    Source(#[from] KernelError),

    #[error("Engine is closed")]
    Closed,
}

/// Where deployments come from, typically the persistence layer.
#[async_trait]
pub trait DeploymentSource: Send + Sync {
    /// Every current deployment.
    async fn list_deployments(&self) -> Result<Vec<DeploymentSpec>, KernelError>;

    /// Deployments created or updated after `since`.
    async fn list_changed_since(
        &self,
        since: DateTime<Utc>,
    ) -> Result<Vec<DeploymentSpec>, KernelError>;

    /// Ids of every current deployment with its scope.
    async fn list_deployment_ids(&self) -> Result<Vec<(ScopeId, DeploymentId)>, KernelError>;
}

/// Why an event was not dispatched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SkipReason {
    /// The scope used up its monthly execution time.
    UsageExhausted,
    /// The usage snapshot could not be read.
    UsageUnavailable(String),
}

/// Engine lifecycle notifications.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEvent {
    /// A deployment was loaded; `scope` is `None` for global deployments.
    DeploymentLoaded {
        scope: Option<ScopeId>,
        deployment_id: DeploymentId,
    },
    DeploymentRemoved {
        scope: Option<ScopeId>,
        deployment_id: DeploymentId,
    },
    /// One deployment handled one event.
    EventHandled {
        scope: ScopeId,
        event_type: EventType,
        deployment_id: DeploymentId,
        success: bool,
    },
    EventSkipped {
        scope: ScopeId,
        event_type: EventType,
        reason: SkipReason,
    },
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EngineStats {
    pub scopes: usize,
    pub app_deployments: usize,
    pub global_deployments: usize,
    /// Invocations, one per deployment an event was delivered to
    pub events_handled: u64,
    /// Events dropped by the usage gate
    pub events_skipped: u64,
    pub module_cache: CacheStats,
}

pub struct Engine {
    settings: DeploymentSettings,
    refresh_interval: Duration,
    runtime: Arc<WasmRuntime>,
    collaborators: Collaborators,
    apps: RwLock<HashMap<ScopeId, Vec<Arc<Deployment>>>>,
    global: RwLock<Vec<Arc<Deployment>>>,
    event_tx: broadcast::Sender<EngineEvent>,
    events_handled: AtomicU64,
    events_skipped: AtomicU64,
    shutdown: CancellationToken,
}

impl Engine {
    pub fn new(config: EngineConfig, collaborators: Collaborators) -> EngineResult<Self> {
        let runtime = WasmRuntime::new(config.runtime_config())
            .map_err(EngineError::from)
            .into_report()?;
        let (event_tx, _) = broadcast::channel(1024);

        info!(
            "Kite engine started (execution budget {}ms, total budget {}ms)",
            config.max_execution_time_ms, config.max_total_time_ms
        );

        Ok(Self {
            settings: config.deployment_settings(),
            refresh_interval: config.refresh_interval(),
            runtime: Arc::new(runtime),
            collaborators,
            apps: RwLock::new(HashMap::new()),
            global: RwLock::new(Vec::new()),
            event_tx,
            events_handled: AtomicU64::new(0),
            events_skipped: AtomicU64::new(0),
            shutdown: CancellationToken::new(),
        })
    }

    pub fn runtime(&self) -> &Arc<WasmRuntime> {
        &self.runtime
    }

    /// Default interval for [`spawn_refresh`](Self::spawn_refresh).
    pub fn refresh_interval(&self) -> Duration {
        self.refresh_interval
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.event_tx.subscribe()
    }

    pub fn is_closed(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    fn emit(&self, event: EngineEvent) {
        // No subscribers is fine.
        let _ = self.event_tx.send(event);
    }

    async fn build(&self, spec: DeploymentSpec) -> EngineResult<Arc<Deployment>> {
        if self.is_closed() {
            return Err(EngineError::Closed).into_report();
        }

        let id = spec.id.clone();
        Deployment::load(
            self.runtime.clone(),
            spec,
            &self.collaborators,
            &self.settings,
        )
        .await
        .map(Arc::new)
        .map_err(|source| EngineError::Deployment { id, source })
        .into_report()
    }

    /// Load a deployment into its scope, replacing one with the same id.
    pub async fn load_app_deployment(&self, spec: DeploymentSpec) -> EngineResult<()> {
        let scope = spec.scope.clone();
        let deployment = self.build(spec).await?;
        let deployment_id = deployment.id().clone();

        let replaced = {
            let mut apps = self.apps.write().await;
            let list = apps.entry(scope.clone()).or_default();
            let replaced = list
                .iter()
                .position(|d| d.id() == &deployment_id)
                .map(|i| list.remove(i));
            list.push(deployment);
            replaced
        };
        if let Some(old) = replaced {
            debug!("Replaced deployment {} in {}", deployment_id, scope);
            old.close();
        }

        self.emit(EngineEvent::DeploymentLoaded {
            scope: Some(scope),
            deployment_id,
        });
        Ok(())
    }

    /// Build every spec, then swap the whole set for `scope`.
    ///
    /// Nothing changes when any spec fails to load.
    pub async fn replace_app_deployments(
        &self,
        scope: &ScopeId,
        specs: Vec<DeploymentSpec>,
    ) -> EngineResult<()> {
        if let Some(spec) = specs.iter().find(|s| &s.scope != scope) {
            return Err(EngineError::ScopeMismatch {
                id: spec.id.clone(),
                expected: scope.clone(),
                actual: spec.scope.clone(),
            })
            .into_report();
        }

        let built = try_join_all(specs.into_iter().map(|spec| self.build(spec))).await?;
        let loaded: Vec<DeploymentId> = built.iter().map(|d| d.id().clone()).collect();

        let old = {
            let mut apps = self.apps.write().await;
            if built.is_empty() {
                apps.remove(scope)
            } else {
                apps.insert(scope.clone(), built)
            }
        }
        .unwrap_or_default();

        for deployment in old {
            deployment.close();
            if !loaded.contains(deployment.id()) {
                self.emit(EngineEvent::DeploymentRemoved {
                    scope: Some(scope.clone()),
                    deployment_id: deployment.id().clone(),
                });
            }
        }
        for deployment_id in loaded {
            self.emit(EngineEvent::DeploymentLoaded {
                scope: Some(scope.clone()),
                deployment_id,
            });
        }
        Ok(())
    }

    /// Remove one deployment; returns whether it existed.
    pub async fn remove_app_deployment(&self, scope: &ScopeId, id: &DeploymentId) -> bool {
        let removed = {
            let mut apps = self.apps.write().await;
            let Some(list) = apps.get_mut(scope) else {
                return false;
            };
            let removed = list.iter().position(|d| d.id() == id).map(|i| list.remove(i));
            if list.is_empty() {
                apps.remove(scope);
            }
            removed
        };

        match removed {
            Some(deployment) => {
                deployment.close();
                info!("Removed deployment {} from {}", id, scope);
                self.emit(EngineEvent::DeploymentRemoved {
                    scope: Some(scope.clone()),
                    deployment_id: id.clone(),
                });
                true
            }
            None => false,
        }
    }

    /// Remove every deployment of `scope` not in `keep`; returns how many were removed.
    pub async fn truncate_app_deployments(&self, scope: &ScopeId, keep: &[DeploymentId]) -> usize {
        let removed: Vec<Arc<Deployment>> = {
            let mut apps = self.apps.write().await;
            let Some(list) = apps.get_mut(scope) else {
                return 0;
            };
            let (kept, removed) = list.drain(..).partition(|d| keep.contains(d.id()));
            *list = kept;
            if list.is_empty() {
                apps.remove(scope);
            }
            removed
        };

        for deployment in &removed {
            deployment.close();
            self.emit(EngineEvent::DeploymentRemoved {
                scope: Some(scope.clone()),
                deployment_id: deployment.id().clone(),
            });
        }
        if !removed.is_empty() {
            info!("Removed {} stale deployments from {}", removed.len(), scope);
        }
        removed.len()
    }

    /// Load a deployment that receives events of every scope.
    pub async fn load_global_deployment(&self, spec: DeploymentSpec) -> EngineResult<()> {
        let deployment = self.build(spec).await?;
        let deployment_id = deployment.id().clone();

        let replaced = {
            let mut global = self.global.write().await;
            let replaced = global
                .iter()
                .position(|d| d.id() == &deployment_id)
                .map(|i| global.remove(i));
            global.push(deployment);
            replaced
        };
        if let Some(old) = replaced {
            old.close();
        }

        self.emit(EngineEvent::DeploymentLoaded {
            scope: None,
            deployment_id,
        });
        Ok(())
    }

    pub async fn remove_global_deployment(&self, id: &DeploymentId) -> bool {
        let removed = {
            let mut global = self.global.write().await;
            global.iter().position(|d| d.id() == id).map(|i| global.remove(i))
        };
        let Some(deployment) = removed else {
            return false;
        };
        deployment.close();
        self.emit(EngineEvent::DeploymentRemoved {
            scope: None,
            deployment_id: id.clone(),
        });
        true
    }

    pub async fn deployments(&self, scope: &ScopeId) -> Vec<Arc<Deployment>> {
        self.apps
            .read()
            .await
            .get(scope)
            .cloned()
            .unwrap_or_default()
    }

    pub async fn global_deployments(&self) -> Vec<Arc<Deployment>> {
        self.global.read().await.clone()
    }

    async fn matching(&self, scope: &ScopeId, event: &Event) -> Vec<Arc<Deployment>> {
        let mut targets: Vec<Arc<Deployment>> = self
            .global
            .read()
            .await
            .iter()
            .filter(|d| d.handles(event))
            .cloned()
            .collect();

        if let Some(list) = self.apps.read().await.get(scope) {
            targets.extend(list.iter().filter(|d| d.handles(event)).cloned());
        }
        targets
    }

    fn skip(&self, scope: ScopeId, event_type: EventType, reason: SkipReason) {
        self.events_skipped.fetch_add(1, Ordering::Relaxed);
        self.emit(EngineEvent::EventSkipped {
            scope,
            event_type,
            reason,
        });
    }

    /// Deliver an event to every matching deployment of its scope and every
    /// matching global deployment.
    ///
    /// Events of unknown type, events without a matching deployment and events
    /// of a scope that exhausted its usage produce no reports.
    pub async fn handle_event(&self, event: &Event) -> Vec<DispatchReport> {
        if !event.event_type.is_known() {
            debug!("Ignoring event of unknown type {}", event.event_type);
            return Vec::new();
        }
        if self.is_closed() {
            return Vec::new();
        }

        let scope = ScopeId::new(event.guild_id.clone());
        let targets = self.matching(&scope, event).await;
        if targets.is_empty() {
            return Vec::new();
        }

        match self.collaborators.usage.usage(&scope).await {
            Ok(usage) if usage.is_exhausted() => {
                warn!(
                    "Skipping {} for {}: execution time budget exhausted ({:?} of {:?})",
                    event.event_type,
                    scope,
                    usage.total_event_execution_time,
                    usage.monthly_execution_time_limit
                );
                self.skip(scope, event.event_type.clone(), SkipReason::UsageExhausted);
                return Vec::new();
            }
            Ok(_) => {}
            Err(e) => {
                warn!("Skipping {} for {}: usage unavailable: {}", event.event_type, scope, e);
                self.skip(
                    scope,
                    event.event_type.clone(),
                    SkipReason::UsageUnavailable(e.to_string()),
                );
                return Vec::new();
            }
        }

        let cancel = self.shutdown.child_token();
        let reports = join_all(
            targets
                .iter()
                .map(|deployment| deployment.handle_event(&scope, event, cancel.clone())),
        )
        .await;

        self.events_handled
            .fetch_add(reports.len() as u64, Ordering::Relaxed);
        for report in &reports {
            self.emit(EngineEvent::EventHandled {
                scope: scope.clone(),
                event_type: event.event_type.clone(),
                deployment_id: report.deployment_id.clone(),
                success: report.is_success(),
            });
        }
        reports
    }

    /// Load every deployment of `source`, one scope at a time.
    ///
    /// A scope whose deployments fail to load keeps its previous set; the
    /// failure is logged. Returns the number of scopes loaded.
    pub async fn populate(&self, source: &dyn DeploymentSource) -> EngineResult<usize> {
        let specs = source
            .list_deployments()
            .await
            .map_err(EngineError::from)
            .into_report()?;

        let mut by_scope: HashMap<ScopeId, Vec<DeploymentSpec>> = HashMap::new();
        for spec in specs {
            by_scope.entry(spec.scope.clone()).or_default().push(spec);
        }

        let mut loaded = 0;
        for (scope, specs) in by_scope {
            match self.replace_app_deployments(&scope, specs).await {
                Ok(()) => loaded += 1,
                Err(report) => error!("Failed to populate {}: {:?}", scope, report),
            }
        }
        info!("Populated deployments for {} scopes", loaded);
        Ok(loaded)
    }

    fn updated_at(apps: &HashMap<ScopeId, Vec<Arc<Deployment>>>, spec: &DeploymentSpec) -> Option<DateTime<Utc>> {
        apps.get(&spec.scope)?
            .iter()
            .find(|d| d.id() == &spec.id)
            .map(|d| d.updated_at())
    }

    /// One refresh pass: load deployments changed since `since`, then drop
    /// deployments the source no longer lists.
    pub async fn refresh(&self, source: &dyn DeploymentSource, since: DateTime<Utc>) -> EngineResult<()> {
        let changed = source
            .list_changed_since(since)
            .await
            .map_err(EngineError::from)
            .into_report()?;

        for spec in changed {
            let current = Self::updated_at(&*self.apps.read().await, &spec);
            if current.is_some_and(|at| at >= spec.updated_at) {
                continue;
            }
            let id = spec.id.clone();
            if let Err(report) = self.load_app_deployment(spec).await {
                error!("Failed to refresh deployment {}: {:?}", id, report);
            }
        }

        let ids = source
            .list_deployment_ids()
            .await
            .map_err(EngineError::from)
            .into_report()?;
        let mut keep: HashMap<ScopeId, Vec<DeploymentId>> = HashMap::new();
        for (scope, id) in ids {
            keep.entry(scope).or_default().push(id);
        }

        let scopes: HashSet<ScopeId> = self.apps.read().await.keys().cloned().collect();
        for scope in scopes {
            let keep = keep.get(&scope).map(Vec::as_slice).unwrap_or_default();
            self.truncate_app_deployments(&scope, keep).await;
        }
        Ok(())
    }

    /// Refresh from `source` every `every` until `stop` or engine shutdown.
    pub fn spawn_refresh(
        self: &Arc<Self>,
        source: Arc<dyn DeploymentSource>,
        every: Duration,
        stop: CancellationToken,
    ) -> JoinHandle<()> {
        let engine = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.tick().await;
            let mut since = Utc::now();

            loop {
                tokio::select! {
                    _ = stop.cancelled() => break,
                    _ = engine.shutdown.cancelled() => break,
                    _ = ticker.tick() => {}
                }

                let started = Utc::now();
                match engine.refresh(source.as_ref(), since).await {
                    Ok(()) => since = started,
                    Err(report) => warn!("Deployment refresh failed: {:?}", report),
                }
            }
            debug!("Deployment refresh stopped");
        })
    }

    pub async fn stats(&self) -> EngineStats {
        let (scopes, app_deployments) = {
            let apps = self.apps.read().await;
            (apps.len(), apps.values().map(Vec::len).sum())
        };
        EngineStats {
            scopes,
            app_deployments,
            global_deployments: self.global.read().await.len(),
            events_handled: self.events_handled.load(Ordering::Relaxed),
            events_skipped: self.events_skipped.load(Ordering::Relaxed),
            module_cache: self.runtime.cache_stats(),
        }
    }

    /// Cancel in-flight invocations and close every deployment.
    pub async fn close(&self) {
        self.shutdown.cancel();

        let apps: Vec<Arc<Deployment>> = self
            .apps
            .write()
            .await
            .drain()
            .flat_map(|(_, list)| list)
            .collect();
        let global: Vec<Arc<Deployment>> = self.global.write().await.drain(..).collect();

        for deployment in apps.iter().chain(global.iter()) {
            deployment.close();
        }
        info!("Kite engine closed ({} deployments)", apps.len() + global.len());
    }
}
