//! Instance pool
//!
//! Bounded reuse of negotiated [`ModuleInstance`]s for one deployment.
//! A semaphore caps how many instances are borrowed at once; returned
//! instances wait in a LIFO idle list until reused or evicted. An instance
//! that failed fatally is never returned to the idle list.

use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::wasm_runtime::{ModuleInstance, WasmError, WasmResult};

/// Pool sizing and maintenance settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Maximum instances borrowed at once
    pub max_total: usize,
    /// Maximum idle instances kept for reuse
    pub max_idle: usize,
    /// Idle instances kept warm by the maintenance task
    pub min_idle: usize,
    /// How long `borrow` waits for a free slot
    pub borrow_timeout_ms: u64,
    /// Idle instances older than this are evicted
    pub idle_timeout_secs: u64,
    /// Interval of the maintenance task
    pub eviction_interval_secs: u64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_total: 4,
            max_idle: 4,
            min_idle: 0,
            borrow_timeout_ms: 5000,
            idle_timeout_secs: 60,
            eviction_interval_secs: 10,
        }
    }
}

impl PoolConfig {
    pub fn borrow_timeout(&self) -> Duration {
        Duration::from_millis(self.borrow_timeout_ms)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    pub fn eviction_interval(&self) -> Duration {
        Duration::from_secs(self.eviction_interval_secs.max(1))
    }
}

#[derive(Debug, Error)]
pub enum PoolError {
    #[error("pool is closed")]
    Closed,

    #[error("no instance available within {0:?}")]
    Exhausted(Duration),

    #[error("failed to create instance: {0}")]
    Factory(#[from] WasmError),
}

/// Creates fresh, negotiated instances for a pool.
#[async_trait]
pub trait InstanceFactory: Send + Sync {
    async fn create(&self) -> WasmResult<ModuleInstance>;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolStats {
    pub idle: usize,
    pub active: usize,
    pub created: u64,
    pub destroyed: u64,
}

struct IdleInstance {
    instance: ModuleInstance,
    idle_since: Instant,
}

struct PoolInner {
    name: String,
    config: PoolConfig,
    factory: Arc<dyn InstanceFactory>,
    permits: Arc<Semaphore>,
    idle: Mutex<Vec<IdleInstance>>,
    closed: AtomicBool,
    created: AtomicU64,
    destroyed: AtomicU64,
}

impl PoolInner {
    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    async fn create(&self) -> WasmResult<ModuleInstance> {
        let instance = self.factory.create().await?;
        self.created.fetch_add(1, Ordering::Relaxed);
        Ok(instance)
    }

    fn destroy(&self, instance: ModuleInstance) {
        debug!("Destroying instance {} of {}", instance.id(), self.name);
        drop(instance);
        self.destroyed.fetch_add(1, Ordering::Relaxed);
    }

    fn give_back(&self, instance: ModuleInstance) {
        if self.is_closed() || !instance.is_reusable() {
            self.destroy(instance);
            return;
        }

        let mut idle = self.idle.lock();
        if idle.len() >= self.config.max_idle {
            drop(idle);
            self.destroy(instance);
            return;
        }
        idle.push(IdleInstance {
            instance,
            idle_since: Instant::now(),
        });
    }

    fn take_idle(&self) -> Option<ModuleInstance> {
        loop {
            let candidate = self.idle.lock().pop()?;
            if candidate.instance.is_reusable() {
                return Some(candidate.instance);
            }
            self.destroy(candidate.instance);
        }
    }

    /// Evict idle instances past the idle timeout, keeping `min_idle`.
    fn evict_idle(&self) -> usize {
        let timeout = self.config.idle_timeout();
        let expired: Vec<IdleInstance> = {
            let mut idle = self.idle.lock();
            let excess = idle.len().saturating_sub(self.config.min_idle);
            // Oldest first; the list is LIFO.
            let count = idle
                .iter()
                .take(excess)
                .take_while(|i| i.idle_since.elapsed() >= timeout)
                .count();
            idle.drain(..count).collect()
        };

        let evicted = expired.len();
        for entry in expired {
            self.destroy(entry.instance);
        }
        evicted
    }

    async fn ensure_min_idle(&self) {
        while !self.is_closed() && self.idle.lock().len() < self.config.min_idle {
            match self.create().await {
                Ok(instance) => self.give_back(instance),
                Err(e) => {
                    warn!("Failed to warm instance for {}: {}", self.name, e);
                    return;
                }
            }
        }
    }
}

/// An instance on loan from an [`InstancePool`].
///
/// Dropping it without [`give_back`](Self::give_back) invalidates the instance.
pub struct PooledInstance {
    instance: Option<ModuleInstance>,
    pool: Arc<PoolInner>,
    _permit: OwnedSemaphorePermit,
}

impl std::fmt::Debug for PooledInstance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledInstance").finish_non_exhaustive()
    }
}

impl PooledInstance {
    /// Return the instance for reuse. Unusable instances are destroyed instead.
    pub fn give_back(mut self) {
        if let Some(instance) = self.instance.take() {
            self.pool.give_back(instance);
        }
    }

    /// Destroy the instance.
    pub fn invalidate(mut self) {
        if let Some(instance) = self.instance.take() {
            self.pool.destroy(instance);
        }
    }
}

impl Deref for PooledInstance {
    type Target = ModuleInstance;

    fn deref(&self) -> &ModuleInstance {
        // Only `give_back`, `invalidate` and `drop` take the instance, all consuming self.
        match &self.instance {
            Some(instance) => instance,
            None => unreachable!("pooled instance used after release"),
        }
    }
}

impl DerefMut for PooledInstance {
    fn deref_mut(&mut self) -> &mut ModuleInstance {
        match &mut self.instance {
            Some(instance) => instance,
            None => unreachable!("pooled instance used after release"),
        }
    }
}

impl Drop for PooledInstance {
    fn drop(&mut self) {
        if let Some(instance) = self.instance.take() {
            self.pool.destroy(instance);
        }
    }
}

pub struct InstancePool {
    inner: Arc<PoolInner>,
    maintenance: CancellationToken,
}

impl InstancePool {
    /// Create a pool and start its maintenance task. Must be called within a tokio runtime.
    pub fn new(name: impl Into<String>, config: PoolConfig, factory: Arc<dyn InstanceFactory>) -> Self {
        let inner = Arc::new(PoolInner {
            name: name.into(),
            permits: Arc::new(Semaphore::new(config.max_total)),
            config,
            factory,
            idle: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
            created: AtomicU64::new(0),
            destroyed: AtomicU64::new(0),
        });

        let maintenance = CancellationToken::new();
        tokio::spawn(maintain(
            Arc::downgrade(&inner),
            inner.config.eviction_interval(),
            maintenance.clone(),
        ));

        Self { inner, maintenance }
    }

    pub fn config(&self) -> &PoolConfig {
        &self.inner.config
    }

    /// Borrow an instance, reusing an idle one or creating a new one.
    pub async fn borrow(&self) -> Result<PooledInstance, PoolError> {
        if self.inner.is_closed() {
            return Err(PoolError::Closed);
        }

        let wait = self.inner.config.borrow_timeout();
        let permit = tokio::time::timeout(wait, self.inner.permits.clone().acquire_owned())
            .await
            .map_err(|_| PoolError::Exhausted(wait))?
            .map_err(|_| PoolError::Closed)?;

        let instance = match self.inner.take_idle() {
            Some(instance) => instance,
            None => self.inner.create().await?,
        };

        Ok(PooledInstance {
            instance: Some(instance),
            pool: self.inner.clone(),
            _permit: permit,
        })
    }

    /// Add an instance created outside the pool to the idle list.
    pub fn put_idle(&self, instance: ModuleInstance) {
        self.inner.created.fetch_add(1, Ordering::Relaxed);
        self.inner.give_back(instance);
    }

    /// Evict expired idle instances now; returns how many were destroyed.
    pub fn evict_idle(&self) -> usize {
        self.inner.evict_idle()
    }

    /// Create instances until `min_idle` are idle.
    pub async fn ensure_min_idle(&self) {
        self.inner.ensure_min_idle().await;
    }

    /// Stop lending; idle instances are destroyed, borrowed ones on return.
    pub fn close(&self) {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.maintenance.cancel();
        self.inner.permits.close();

        let drained: Vec<IdleInstance> = self.inner.idle.lock().drain(..).collect();
        for entry in drained {
            self.inner.destroy(entry.instance);
        }
        debug!("Closed pool {}", self.inner.name);
    }

    pub fn is_closed(&self) -> bool {
        self.inner.is_closed()
    }

    pub fn stats(&self) -> PoolStats {
        let active = if self.inner.is_closed() {
            0
        } else {
            self.inner
                .config
                .max_total
                .saturating_sub(self.inner.permits.available_permits())
        };
        PoolStats {
            idle: self.inner.idle.lock().len(),
            active,
            created: self.inner.created.load(Ordering::Relaxed),
            destroyed: self.inner.destroyed.load(Ordering::Relaxed),
        }
    }
}

impl Drop for InstancePool {
    fn drop(&mut self) {
        self.maintenance.cancel();
    }
}

async fn maintain(pool: Weak<PoolInner>, every: Duration, stop: CancellationToken) {
    let mut ticker = tokio::time::interval(every);
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = stop.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let Some(pool) = pool.upgrade() else {
            break;
        };
        if pool.is_closed() {
            break;
        }

        let evicted = pool.evict_idle();
        if evicted > 0 {
            debug!("Evicted {} idle instances of {}", evicted, pool.name);
        }
        pool.ensure_min_idle().await;
    }
}
