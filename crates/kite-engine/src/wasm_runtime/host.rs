//! Host functions
//!
//! The `env` module imported by every guest. Each function validates the
//! instance state, copies payloads across the boundary through
//! [`GuestMemory`] and answers with a status code (`0` ok, non-zero failure)
//! or a payload length.
//!
//! A status code is the answer to a misuse the guest can recover from. An
//! out-of-bounds region or a missing `memory` export is returned as an `Err`
//! instead, which traps the guest and invalidates the instance.

use std::sync::Arc;

use kite_kernel::{
    CallEnvelope, CallResponse, EventResponse, HostEnvironment, HostError, LogLevel, Manifest,
    ScopeId,
};
use tracing::{debug, warn};
use wasmtime::{Caller, Linker, ResourceLimiter};

use super::governor::Governor;
use super::memory::{GuestMemory, GuestPtr, GuestSlice};
use super::types::{InstanceState, ResourceLimits, WasmError, WasmResult};

/// Import module name shared by all host functions.
pub const HOST_MODULE: &str = "env";

pub const SET_MANIFEST: &str = "kite_set_manifest";
pub const GET_CONFIG_SIZE: &str = "kite_get_config_size";
pub const GET_CONFIG: &str = "kite_get_config";
pub const LOG: &str = "kite_log";
pub const CALL: &str = "kite_call";
pub const GET_EVENT: &str = "kite_get_event";
pub const SET_EVENT_RESPONSE: &str = "kite_set_event_response";
pub const GET_CALL_RESPONSE: &str = "kite_get_call_response";

const STATUS_OK: u32 = 0;
const STATUS_FAILED: u32 = 1;

/// Linear memory ceiling of one store.
#[derive(Debug, Clone, Copy)]
pub struct MemoryLimiter {
    pub max_memory_bytes: u64,
    pub max_table_elements: usize,
}

impl MemoryLimiter {
    pub fn new(limits: &ResourceLimits) -> Self {
        Self {
            max_memory_bytes: limits.max_memory_bytes(),
            max_table_elements: 10_000,
        }
    }
}

impl ResourceLimiter for MemoryLimiter {
    fn memory_growing(
        &mut self,
        current: usize,
        desired: usize,
        _maximum: Option<usize>,
    ) -> wasmtime::Result<bool> {
        let allowed = desired as u64 <= self.max_memory_bytes;
        if !allowed {
            debug!(
                "Denied memory growth from {} to {} bytes (ceiling {})",
                current, desired, self.max_memory_bytes
            );
        }
        Ok(allowed)
    }

    fn table_growing(
        &mut self,
        _current: usize,
        desired: usize,
        maximum: Option<usize>,
    ) -> wasmtime::Result<bool> {
        let max = maximum.unwrap_or(self.max_table_elements);
        Ok(desired <= max && desired <= self.max_table_elements)
    }
}

/// Per-instance state stored in the wasmtime `Store`.
pub struct InstanceData {
    pub state: InstanceState,
    pub env: Arc<dyn HostEnvironment>,
    pub limits: ResourceLimits,
    pub memory_limiter: MemoryLimiter,
    pub governor: Governor,
    /// Scope of the event being handled.
    pub scope: Option<ScopeId>,
    pub manifest: Option<Manifest>,
    /// `kite_call` invocations in the current event.
    pub calls: u32,
    pub event: Option<Vec<u8>>,
    pub event_response: Option<EventResponse>,
    pub call_response: Option<Vec<u8>>,
    pub config: Option<Vec<u8>>,
}

impl InstanceData {
    pub fn new(env: Arc<dyn HostEnvironment>, limits: ResourceLimits) -> Self {
        Self {
            state: InstanceState::Init,
            env,
            memory_limiter: MemoryLimiter::new(&limits),
            limits,
            governor: Governor::new(),
            scope: None,
            manifest: None,
            calls: 0,
            event: None,
            event_response: None,
            call_response: None,
            config: None,
        }
    }

    /// Stage an event for the next `handle` call.
    pub fn begin_event(&mut self, scope: ScopeId, event: Vec<u8>) {
        self.state = InstanceState::Event;
        self.scope = Some(scope);
        self.event = Some(event);
        self.event_response = None;
        self.call_response = None;
        self.config = None;
        self.calls = 0;
    }

    /// Drop event-scoped buffers and go back to `Ready`.
    pub fn end_event(&mut self) -> Option<EventResponse> {
        self.state = InstanceState::Ready;
        self.scope = None;
        self.event = None;
        self.call_response = None;
        self.config = None;
        self.event_response.take()
    }

    fn in_state(&self, state: InstanceState, function: &str) -> bool {
        if self.state == state {
            return true;
        }
        debug!(
            "Rejected {} in {} state (requires {})",
            function, self.state, state
        );
        false
    }
}

fn read(caller: &mut Caller<'_, InstanceData>, offset: u32, len: u32) -> WasmResult<Vec<u8>> {
    let memory = GuestMemory::from_caller(caller)?;
    memory.read(&*caller, GuestSlice::from_raw(offset, len))
}

fn write(caller: &mut Caller<'_, InstanceData>, offset: u32, bytes: &[u8]) -> WasmResult<()> {
    let memory = GuestMemory::from_caller(caller)?;
    memory.write(&mut *caller, GuestPtr(offset), bytes)
}

fn payload_len(bytes: &[u8]) -> WasmResult<u32> {
    u32::try_from(bytes.len()).map_err(|_| WasmError::PayloadTooLarge(bytes.len()))
}

/// Serialized config of the current event, fetched once and cached.
async fn load_config(caller: &mut Caller<'_, InstanceData>) -> Option<Vec<u8>> {
    if let Some(config) = &caller.data().config {
        return Some(config.clone());
    }

    let env = caller.data().env.clone();
    caller.data_mut().governor.start_host_call();
    let config = env.get_config().await;
    caller.data_mut().governor.end_host_call();

    match config.map(|c| serde_json::to_vec(&c)) {
        Ok(Ok(bytes)) => {
            caller.data_mut().config = Some(bytes.clone());
            Some(bytes)
        }
        Ok(Err(e)) => {
            warn!("Failed to encode config: {}", e);
            None
        }
        Err(e) => {
            warn!("Failed to get config: {}", e);
            None
        }
    }
}

/// Decode and execute one call, producing the response the guest will read.
async fn execute_call(
    caller: &mut Caller<'_, InstanceData>,
    bytes: &[u8],
) -> CallResponse {
    let data = caller.data();
    if data.calls > data.limits.max_host_calls {
        return CallResponse::err(HostError::validation(format!(
            "host call limit of {} exceeded",
            data.limits.max_host_calls
        )));
    }

    let envelope = match CallEnvelope::decode(bytes) {
        Ok(envelope) => envelope,
        Err(e) => return CallResponse::err(e),
    };
    let Some(scope) = data.scope.clone() else {
        return CallResponse::err(HostError::unknown("no event scope"));
    };
    let env = data.env.clone();
    let interrupt = data.governor.call_interrupt();

    caller.data_mut().governor.start_host_call();
    let result = env.call(&scope, envelope, &interrupt).await;
    caller.data_mut().governor.end_host_call();

    result.into()
}

async fn get_config_size(caller: &mut Caller<'_, InstanceData>) -> wasmtime::Result<u32> {
    if !caller.data().in_state(InstanceState::Event, GET_CONFIG_SIZE) {
        return Ok(0);
    }
    match load_config(caller).await {
        Some(config) => Ok(payload_len(&config)?),
        None => Ok(0),
    }
}

async fn get_config(caller: &mut Caller<'_, InstanceData>, offset: u32) -> wasmtime::Result<u32> {
    if !caller.data().in_state(InstanceState::Event, GET_CONFIG) {
        return Ok(STATUS_FAILED);
    }
    let Some(config) = load_config(caller).await else {
        return Ok(STATUS_FAILED);
    };
    write(caller, offset, &config)?;
    Ok(STATUS_OK)
}

async fn log(
    caller: &mut Caller<'_, InstanceData>,
    level: u32,
    offset: u32,
    len: u32,
) -> wasmtime::Result<u32> {
    if !caller.data().in_state(InstanceState::Event, LOG) {
        return Ok(STATUS_FAILED);
    }
    let Ok(level) = LogLevel::try_from(level) else {
        return Ok(STATUS_FAILED);
    };
    let bytes = read(caller, offset, len)?;
    let message = String::from_utf8_lossy(&bytes).into_owned();

    let env = caller.data().env.clone();
    caller.data_mut().governor.start_host_call();
    env.log(level, message).await;
    caller.data_mut().governor.end_host_call();
    Ok(STATUS_OK)
}

/// Returns the length of the staged call response, or 0 when nothing was staged.
async fn call(caller: &mut Caller<'_, InstanceData>, offset: u32, len: u32) -> wasmtime::Result<u32> {
    if !caller.data().in_state(InstanceState::Event, CALL) {
        return Ok(0);
    }
    caller.data_mut().calls += 1;
    let bytes = read(caller, offset, len)?;
    let response = execute_call(caller, &bytes).await;
    // A call cut short by the invocation's deadline or cancellation ends the guest too.
    caller.data_mut().governor.check()?;

    let body = match serde_json::to_vec(&response) {
        Ok(body) => body,
        Err(e) => {
            warn!("Failed to encode call response: {}", e);
            return Ok(0);
        }
    };
    let len = payload_len(&body)?;
    caller.data_mut().call_response = Some(body);
    Ok(len)
}

/// Register every host function on `linker`.
pub fn add_host_functions(linker: &mut Linker<InstanceData>) -> WasmResult<()> {
    let map_err = |e: wasmtime::Error| WasmError::Internal(e.to_string());

    linker
        .func_wrap(
            HOST_MODULE,
            SET_MANIFEST,
            |mut caller: Caller<'_, InstanceData>, offset: u32, len: u32| -> wasmtime::Result<u32> {
                if !caller.data().in_state(InstanceState::Ready, SET_MANIFEST) {
                    return Ok(STATUS_FAILED);
                }
                let bytes = read(&mut caller, offset, len)?;
                match Manifest::from_slice(&bytes) {
                    Ok(manifest) => {
                        caller.data_mut().manifest = Some(manifest);
                        Ok(STATUS_OK)
                    }
                    Err(e) => {
                        debug!("Rejected manifest: {}", e);
                        Ok(STATUS_FAILED)
                    }
                }
            },
        )
        .map_err(map_err)?;

    linker
        .func_wrap_async(
            HOST_MODULE,
            GET_CONFIG_SIZE,
            |mut caller: Caller<'_, InstanceData>, (): ()| {
                Box::new(async move { get_config_size(&mut caller).await })
            },
        )
        .map_err(map_err)?;

    linker
        .func_wrap_async(
            HOST_MODULE,
            GET_CONFIG,
            |mut caller: Caller<'_, InstanceData>, (offset,): (u32,)| {
                Box::new(async move { get_config(&mut caller, offset).await })
            },
        )
        .map_err(map_err)?;

    linker
        .func_wrap_async(
            HOST_MODULE,
            LOG,
            |mut caller: Caller<'_, InstanceData>, (level, offset, len): (u32, u32, u32)| {
                Box::new(async move { log(&mut caller, level, offset, len).await })
            },
        )
        .map_err(map_err)?;

    linker
        .func_wrap_async(
            HOST_MODULE,
            CALL,
            |mut caller: Caller<'_, InstanceData>, (offset, len): (u32, u32)| {
                Box::new(async move { call(&mut caller, offset, len).await })
            },
        )
        .map_err(map_err)?;

    linker
        .func_wrap(
            HOST_MODULE,
            GET_EVENT,
            |mut caller: Caller<'_, InstanceData>, offset: u32| -> wasmtime::Result<u32> {
                if !caller.data().in_state(InstanceState::Event, GET_EVENT) {
                    return Ok(STATUS_FAILED);
                }
                let Some(event) = caller.data_mut().event.take() else {
                    return Ok(STATUS_FAILED);
                };
                write(&mut caller, offset, &event)?;
                Ok(STATUS_OK)
            },
        )
        .map_err(map_err)?;

    linker
        .func_wrap(
            HOST_MODULE,
            SET_EVENT_RESPONSE,
            |mut caller: Caller<'_, InstanceData>, offset: u32, len: u32| -> wasmtime::Result<u32> {
                if !caller.data().in_state(InstanceState::Event, SET_EVENT_RESPONSE) {
                    return Ok(STATUS_FAILED);
                }
                let bytes = read(&mut caller, offset, len)?;
                match serde_json::from_slice::<EventResponse>(&bytes) {
                    Ok(response) => {
                        caller.data_mut().event_response = Some(response);
                        Ok(STATUS_OK)
                    }
                    Err(e) => {
                        debug!("Rejected event response: {}", e);
                        Ok(STATUS_FAILED)
                    }
                }
            },
        )
        .map_err(map_err)?;

    linker
        .func_wrap(
            HOST_MODULE,
            GET_CALL_RESPONSE,
            |mut caller: Caller<'_, InstanceData>, offset: u32| -> wasmtime::Result<u32> {
                if !caller.data().in_state(InstanceState::Event, GET_CALL_RESPONSE) {
                    return Ok(STATUS_FAILED);
                }
                let Some(response) = caller.data_mut().call_response.take() else {
                    return Ok(STATUS_FAILED);
                };
                write(&mut caller, offset, &response)?;
                Ok(STATUS_OK)
            },
        )
        .map_err(map_err)?;

    Ok(())
}
