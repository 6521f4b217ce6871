//! WASM Sandbox
//!
//! Runs untrusted guest modules for Kite deployments:
//! - ABI negotiation (version, encoding, manifest)
//! - Host functions in the `env` import module
//! - Bounds-checked copies across the linear memory boundary
//! - Memory ceiling per store, wall-clock and execution-time budgets per event
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        WasmRuntime                          │
//! │  ┌────────────┐  ┌──────────────┐  ┌──────────────────┐     │
//! │  │  Engine    │  │ Linker (env) │  │   ModuleCache    │     │
//! │  └─────┬──────┘  └──────────────┘  └──────────────────┘     │
//! │        │ increment_epoch every tick                         │
//! │  ┌─────┴──────┐                                             │
//! │  │EpochTicker │                                             │
//! │  └────────────┘                                             │
//! └────────────────────────────┬────────────────────────────────┘
//!                              │ instantiate
//! ┌────────────────────────────┴────────────────────────────────┐
//! │                      ModuleInstance                         │
//! │  Store<InstanceData>                                        │
//! │  ┌────────────┐  ┌────────────┐  ┌──────────────────────┐   │
//! │  │ Governor   │  │ Memory     │  │ event / response /   │   │
//! │  │ (budgets)  │  │ Limiter    │  │ call / config bufs   │   │
//! │  └────────────┘  └────────────┘  └──────────────────────┘   │
//! │        ▲ epoch callback                    │                │
//! │  ┌─────┴───────────────────────────────────┴────────────┐   │
//! │  │ guest: kite_handle ──► kite_get_event / kite_call /  │   │
//! │  │                       kite_set_event_response        │   │
//! │  └──────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────┘
//! ```

mod governor;
mod host;
mod instance;
mod memory;
pub mod runtime;
mod types;

pub use governor::{Budget, Governor, Interruption, Timings};
pub use host::{HOST_MODULE, InstanceData, MemoryLimiter};
pub use instance::{HandleError, HandleOutcome, HandleResult, ModuleInstance};
pub use memory::{GuestMemory, GuestPtr, GuestSlice};
pub use runtime::{
    CacheStats, CompiledModule, ModuleCache, RuntimeConfig, SourceDigest, WasmRuntime,
};
pub use types::{
    ApiEncoding, ApiVersion, InstanceState, ResourceLimits, WASM_PAGE_SIZE, WasmError, WasmResult,
};
