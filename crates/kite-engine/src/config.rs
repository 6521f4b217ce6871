//! Engine configuration.
//!
//! ```toml
//! max_total_time_ms = 5000
//! max_execution_time_ms = 50
//! call_timeout_ceiling_ms = 3000
//!
//! [pool]
//! max_total = 4
//! ```
//!
//! Every field has a default, so an empty file (or none at all) is valid.
//! `KITE__POOL__MAX_TOTAL=8` style variables override file values.

use std::time::Duration;

use kite_kernel::config::{ConfigResult, ENV_PREFIX, load_with_env};
use serde::{Deserialize, Serialize};

use crate::deployment::DeploymentSettings;
use crate::pool::PoolConfig;
use crate::wasm_runtime::{ResourceLimits, RuntimeConfig};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub max_total_time_ms: u64,
    pub max_execution_time_ms: u64,
    pub max_memory_pages: u32,
    pub max_host_calls: u32,
    pub negotiation_timeout_ms: u64,
    /// Upper bound of every host call's timeout, engine-wide.
    pub call_timeout_ceiling_ms: u64,
    pub epoch_tick_ms: u64,
    pub max_cached_modules: usize,
    pub refresh_interval_secs: u64,
    pub pool: PoolConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_total_time_ms: 5000,
            max_execution_time_ms: 50,
            max_memory_pages: 32,
            max_host_calls: 1000,
            negotiation_timeout_ms: 250,
            call_timeout_ceiling_ms: 3000,
            epoch_tick_ms: 5,
            max_cached_modules: 100,
            refresh_interval_secs: 10,
            pool: PoolConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Load from an optional file plus `KITE__*` environment overrides.
    pub fn load(path: Option<&str>) -> ConfigResult<Self> {
        load_with_env(path, ENV_PREFIX)
    }

    pub fn resource_limits(&self) -> ResourceLimits {
        ResourceLimits {
            max_memory_pages: self.max_memory_pages,
            max_total_time: Duration::from_millis(self.max_total_time_ms),
            max_execution_time: Duration::from_millis(self.max_execution_time_ms),
            max_host_calls: self.max_host_calls,
            negotiation_timeout: Duration::from_millis(self.negotiation_timeout_ms),
        }
    }

    pub fn runtime_config(&self) -> RuntimeConfig {
        RuntimeConfig {
            epoch_tick: Duration::from_millis(self.epoch_tick_ms.max(1)),
            max_cached_modules: self.max_cached_modules,
            ..RuntimeConfig::default()
        }
    }

    pub fn deployment_settings(&self) -> DeploymentSettings {
        DeploymentSettings {
            limits: self.resource_limits(),
            pool: self.pool.clone(),
            call_timeout_ceiling: Duration::from_millis(self.call_timeout_ceiling_ms),
        }
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_secs.max(1))
    }
}
