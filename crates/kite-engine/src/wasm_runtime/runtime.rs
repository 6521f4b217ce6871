//! WASM Runtime Core
//!
//! One wasmtime [`Engine`] shared by every deployment, the [`Linker`] with the
//! host functions, a compiled-module cache and the epoch ticker that drives
//! the watchdog.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use wasmtime::{Config, Engine, Linker, Module};

use kite_kernel::HostEnvironment;

use super::host::{InstanceData, add_host_functions};
use super::instance::ModuleInstance;
use super::types::{ResourceLimits, WasmError, WasmResult};

/// WASM runtime configuration
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Interval between epoch ticks; the watchdog resolution
    pub epoch_tick: Duration,
    /// Maximum cached modules
    pub max_cached_modules: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            epoch_tick: Duration::from_millis(5),
            max_cached_modules: 100,
        }
    }
}

impl RuntimeConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_epoch_tick(mut self, tick: Duration) -> Self {
        self.epoch_tick = tick;
        self
    }

    fn to_wasmtime_config(&self) -> Config {
        let mut config = Config::new();

        // Host functions await, guests are interrupted by epoch
        config.async_support(true);
        config.epoch_interruption(true);

        // Freestanding guests only
        config.wasm_threads(false);

        config
    }
}

/// Compiled module with metadata
#[derive(Debug)]
pub struct CompiledModule {
    pub name: String,
    pub module: Module,
    pub compile_time_ms: u64,
    pub size_bytes: usize,
    pub source_digest: SourceDigest,
}

/// SHA-256 of a module's source bytes.
pub type SourceDigest = [u8; 32];

/// Cache of compiled modules keyed by source digest.
///
/// Shared by every scope, so the key must not collide for distinct sources.
pub struct ModuleCache {
    modules: RwLock<HashMap<SourceDigest, Arc<CompiledModule>>>,
    max_entries: usize,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl ModuleCache {
    pub fn new(max_entries: usize) -> Self {
        Self {
            modules: RwLock::new(HashMap::new()),
            max_entries,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub fn get(&self, digest: &SourceDigest) -> Option<Arc<CompiledModule>> {
        let found = self.modules.read().get(digest).cloned();
        let counter = if found.is_some() {
            &self.hits
        } else {
            &self.misses
        };
        counter.fetch_add(1, Ordering::Relaxed);
        found
    }

    pub fn insert(&self, module: CompiledModule) -> Arc<CompiledModule> {
        let module = Arc::new(module);
        let mut modules = self.modules.write();

        if modules.len() >= self.max_entries
            && let Some(evict) = modules.keys().next().copied()
        {
            modules.remove(&evict);
        }

        modules.insert(module.source_digest, module.clone());
        module
    }

    pub fn clear(&self) {
        self.modules.write().clear();
    }

    pub fn stats(&self) -> CacheStats {
        let modules = self.modules.read();
        CacheStats {
            entries: modules.len(),
            total_size_bytes: modules.values().map(|m| m.size_bytes).sum(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }
}

/// Cache statistics
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    pub entries: usize,
    pub total_size_bytes: usize,
    pub hits: u64,
    pub misses: u64,
}

impl CacheStats {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// Background thread advancing the engine epoch.
///
/// A plain thread rather than a runtime task, so a guest spinning on a
/// single-threaded tokio runtime is still interrupted.
struct EpochTicker {
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl EpochTicker {
    fn start(engine: Engine, tick: Duration) -> WasmResult<Self> {
        let stop = Arc::new(AtomicBool::new(false));
        let flag = stop.clone();
        let handle = std::thread::Builder::new()
            .name("kite-epoch".to_string())
            .spawn(move || {
                while !flag.load(Ordering::Relaxed) {
                    std::thread::sleep(tick);
                    engine.increment_epoch();
                }
            })?;

        Ok(Self {
            stop,
            handle: Some(handle),
        })
    }
}

impl Drop for EpochTicker {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take()
            && handle.join().is_err()
        {
            warn!("Epoch ticker thread panicked");
        }
    }
}

/// WASM Runtime
pub struct WasmRuntime {
    config: RuntimeConfig,
    engine: Engine,
    linker: Linker<InstanceData>,
    cache: ModuleCache,
    modules_compiled: AtomicU64,
    _ticker: EpochTicker,
}

impl WasmRuntime {
    /// Create a new WASM runtime and start its epoch ticker.
    pub fn new(config: RuntimeConfig) -> WasmResult<Self> {
        let engine = Engine::new(&config.to_wasmtime_config())
            .map_err(|e| WasmError::Internal(format!("Failed to create engine: {}", e)))?;

        let mut linker = Linker::new(&engine);
        add_host_functions(&mut linker)?;

        let ticker = EpochTicker::start(engine.clone(), config.epoch_tick)?;
        info!(
            "WASM runtime created (epoch tick {:?}, cache {} modules)",
            config.epoch_tick, config.max_cached_modules
        );

        Ok(Self {
            cache: ModuleCache::new(config.max_cached_modules),
            config,
            engine,
            linker,
            modules_compiled: AtomicU64::new(0),
            _ticker: ticker,
        })
    }

    /// Create with default configuration
    pub fn default_runtime() -> WasmResult<Self> {
        Self::new(RuntimeConfig::default())
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// Compile a module from binary or text format; identical sources are compiled once.
    pub fn compile(&self, name: &str, bytes: &[u8]) -> WasmResult<Arc<CompiledModule>> {
        let digest = source_digest(bytes);
        if let Some(cached) = self.cache.get(&digest) {
            debug!("Using cached module for {}", name);
            return Ok(cached);
        }

        let start = Instant::now();
        let module = Module::new(&self.engine, bytes)
            .map_err(|e| WasmError::CompilationError(e.to_string()))?;
        let compile_time = start.elapsed().as_millis() as u64;
        self.modules_compiled.fetch_add(1, Ordering::Relaxed);

        info!(
            "Compiled module {} in {}ms ({} bytes)",
            name,
            compile_time,
            bytes.len()
        );

        Ok(self.cache.insert(CompiledModule {
            name: name.to_string(),
            module,
            compile_time_ms: compile_time,
            size_bytes: bytes.len(),
            source_digest: digest,
        }))
    }

    /// Instantiate and negotiate a new instance of `module`.
    pub async fn instantiate(
        &self,
        module: &CompiledModule,
        env: Arc<dyn HostEnvironment>,
        limits: ResourceLimits,
    ) -> WasmResult<ModuleInstance> {
        ModuleInstance::new(&self.engine, &self.linker, &module.module, env, limits).await
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    pub fn modules_compiled(&self) -> u64 {
        self.modules_compiled.load(Ordering::Relaxed)
    }
}

fn source_digest(data: &[u8]) -> SourceDigest {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_runtime_creation() {
        let runtime = WasmRuntime::default_runtime().unwrap();
        assert_eq!(runtime.config().epoch_tick, Duration::from_millis(5));
        assert_eq!(runtime.modules_compiled(), 0);
    }

    #[test]
    fn test_compile_is_cached_by_source() {
        let runtime = WasmRuntime::default_runtime().unwrap();
        let wat = r#"(module (func (export "noop")))"#;

        let first = runtime.compile("a", wat.as_bytes()).unwrap();
        let second = runtime.compile("b", wat.as_bytes()).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(runtime.modules_compiled(), 1);

        let stats = runtime.cache_stats();
        assert_eq!(stats.entries, 1);
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.hit_rate(), 0.5);
    }

    #[test]
    fn test_invalid_module_is_compilation_error() {
        let runtime = WasmRuntime::default_runtime().unwrap();
        let err = runtime.compile("bad", b"not wasm").unwrap_err();
        assert!(matches!(err, WasmError::CompilationError(_)));
    }

    #[test]
    fn test_distinct_sources_never_share_a_module() {
        let runtime = WasmRuntime::default_runtime().unwrap();
        let a = runtime.compile("a", b"(module (memory 1))").unwrap();
        let b = runtime.compile("b", b"(module (memory 2))").unwrap();

        assert!(!Arc::ptr_eq(&a, &b));
        assert_ne!(a.source_digest, b.source_digest);
        assert_eq!(a.source_digest, source_digest(b"(module (memory 1))"));
        assert_eq!(runtime.modules_compiled(), 2);
        assert_eq!(runtime.cache_stats().hits, 0);
    }

    #[test]
    fn test_cache_eviction_at_capacity() {
        let runtime = WasmRuntime::new(RuntimeConfig {
            max_cached_modules: 1,
            ..RuntimeConfig::default()
        })
        .unwrap();
        runtime.compile("a", b"(module)").unwrap();
        runtime.compile("b", b"(module (memory 1))").unwrap();
        assert_eq!(runtime.cache_stats().entries, 1);
    }
}
