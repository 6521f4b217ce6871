//! WASM type definitions
//!
//! Errors, limits and ABI constants shared by the sandbox.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Size of one linear memory page.
pub const WASM_PAGE_SIZE: u64 = 65536;

/// Guest ABI version. Only `Alpha` exists today.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u32)]
pub enum ApiVersion {
    Alpha = 0,
}

impl TryFrom<u32> for ApiVersion {
    type Error = WasmError;

    fn try_from(v: u32) -> Result<Self, WasmError> {
        match v {
            0 => Ok(ApiVersion::Alpha),
            other => Err(WasmError::UnsupportedApiVersion(other)),
        }
    }
}

/// Payload encoding spoken across the boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u32)]
pub enum ApiEncoding {
    Json = 0,
}

impl TryFrom<u32> for ApiEncoding {
    type Error = WasmError;

    fn try_from(v: u32) -> Result<Self, WasmError> {
        match v {
            0 => Ok(ApiEncoding::Json),
            other => Err(WasmError::UnsupportedApiEncoding(other)),
        }
    }
}

/// Lifecycle state of a module instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InstanceState {
    /// Created, negotiation not finished.
    Init,
    /// Idle and reusable.
    Ready,
    /// Handling exactly one event.
    Event,
}

impl fmt::Display for InstanceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            InstanceState::Init => "init",
            InstanceState::Ready => "ready",
            InstanceState::Event => "event",
        };
        f.write_str(s)
    }
}

/// WASM runtime errors
#[derive(Debug, Error)]
pub enum WasmError {
    #[error("Failed to compile WASM module: {0}")]
    CompilationError(String),

    #[error("Failed to instantiate WASM module: {0}")]
    InstantiationError(String),

    #[error("Export not found: {0}")]
    ExportNotFound(String),

    #[error("Unsupported API version: {0}")]
    UnsupportedApiVersion(u32),

    #[error("Unsupported API encoding: {0}")]
    UnsupportedApiEncoding(u32),

    #[error("Negotiation failed: {0}")]
    NegotiationFailed(String),

    #[error("Invalid module manifest: {0}")]
    InvalidManifest(String),

    #[error("Memory access out of bounds: offset={offset}, size={size}")]
    MemoryOutOfBounds { offset: u32, size: u32 },

    #[error("Payload too large: {0} bytes")]
    PayloadTooLarge(usize),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// WASM result type
pub type WasmResult<T> = Result<T, WasmError>;

/// Per-instance resource limits.
///
/// The memory ceiling is fixed when the store is created; the time budgets
/// apply to every single `handle` invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResourceLimits {
    /// Maximum linear memory pages (64KB each)
    pub max_memory_pages: u32,
    /// Wall-clock budget of one invocation
    pub max_total_time: Duration,
    /// Guest compute budget of one invocation, excluding host call time
    pub max_execution_time: Duration,
    /// Maximum `call` host calls per invocation
    pub max_host_calls: u32,
    /// Budget for each negotiation export
    pub negotiation_timeout: Duration,
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            max_memory_pages: 32, // 2MB
            max_total_time: Duration::from_secs(5),
            max_execution_time: Duration::from_millis(50),
            max_host_calls: 1000,
            negotiation_timeout: Duration::from_millis(250),
        }
    }
}

impl ResourceLimits {
    pub fn max_memory_bytes(&self) -> u64 {
        self.max_memory_pages as u64 * WASM_PAGE_SIZE
    }

    pub fn with_max_memory_pages(mut self, pages: u32) -> Self {
        self.max_memory_pages = pages;
        self
    }

    pub fn with_max_total_time(mut self, time: Duration) -> Self {
        self.max_total_time = time;
        self
    }

    pub fn with_max_execution_time(mut self, time: Duration) -> Self {
        self.max_execution_time = time;
        self
    }

    pub fn with_max_host_calls(mut self, calls: u32) -> Self {
        self.max_host_calls = calls;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_supported_api_pairs() {
        assert_eq!(ApiVersion::try_from(0).unwrap(), ApiVersion::Alpha);
        assert_eq!(ApiEncoding::try_from(0).unwrap(), ApiEncoding::Json);
        assert!(matches!(
            ApiVersion::try_from(1),
            Err(WasmError::UnsupportedApiVersion(1))
        ));
        assert!(matches!(
            ApiEncoding::try_from(7),
            Err(WasmError::UnsupportedApiEncoding(7))
        ));
    }

    #[test]
    fn test_resource_limits() {
        let limits = ResourceLimits::default().with_max_memory_pages(4);
        assert_eq!(limits.max_memory_bytes(), 4 * 65536);
        assert!(limits.max_execution_time < limits.max_total_time);
    }

    #[test]
    fn test_error_display() {
        let err = WasmError::MemoryOutOfBounds {
            offset: 100,
            size: 50,
        };
        assert!(err.to_string().contains("offset=100"));
        assert_eq!(InstanceState::Event.to_string(), "event");
    }
}
