//! Module instances
//!
//! A [`ModuleInstance`] owns one wasmtime store and walks the state machine
//! `Init -> Ready <-> Event`. Construction negotiates the ABI and reads the
//! manifest; a failure there is terminal and no instance is returned.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use kite_kernel::{Event, GuestError, HostEnvironment, Manifest, ScopeId};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use uuid::Uuid;
use wasmtime::{
    Engine, Instance, Linker, Module, Store, Trap, TypedFunc, UpdateDeadline, WasmParams,
    WasmResults,
};

use super::governor::{Budget, Interruption, Timings};
use super::host::InstanceData;
use super::types::{ApiEncoding, ApiVersion, InstanceState, ResourceLimits, WasmError, WasmResult};

pub const GET_API_VERSION: &str = "kite_get_api_version";
pub const GET_API_ENCODING: &str = "kite_get_api_encoding";
pub const DESCRIBE: &str = "kite_describe";
pub const HANDLE: &str = "kite_handle";

/// Durations measured for one invocation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HandleResult {
    pub total_duration: Duration,
    pub execution_duration: Duration,
}

impl From<Timings> for HandleResult {
    fn from(t: Timings) -> Self {
        Self {
            total_duration: t.total_duration,
            execution_duration: t.execution_duration,
        }
    }
}

/// Why an invocation did not succeed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HandleError {
    /// The guest reported a failure of its own logic.
    #[error("guest error: {0}")]
    Guest(GuestError),

    #[error("failed to encode event: {0}")]
    Encode(String),

    #[error("total time limit exceeded")]
    Timeout,

    #[error("execution time limit exceeded")]
    ExecutionTimeExceeded,

    #[error("invocation canceled")]
    Canceled,

    #[error("guest trapped: {0}")]
    Trap(String),

    #[error("instance not ready (state {0})")]
    NotReady(InstanceState),
}

impl HandleError {
    /// Fatal errors leave the instance in an unknown state; it must not be reused.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, HandleError::Guest(_) | HandleError::Encode(_))
    }
}

impl From<Interruption> for HandleError {
    fn from(i: Interruption) -> Self {
        match i {
            Interruption::TotalTimeExceeded => HandleError::Timeout,
            Interruption::ExecutionTimeExceeded => HandleError::ExecutionTimeExceeded,
            Interruption::Canceled => HandleError::Canceled,
        }
    }
}

fn classify(err: wasmtime::Error) -> HandleError {
    if let Some(interruption) = err.downcast_ref::<Interruption>() {
        return (*interruption).into();
    }
    if let Some(trap) = err.downcast_ref::<Trap>() {
        return HandleError::Trap(trap.to_string());
    }
    HandleError::Trap(err.to_string())
}

/// Result of [`ModuleInstance::handle`]: durations are reported even on failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandleOutcome {
    pub result: HandleResult,
    pub outcome: Result<(), HandleError>,
}

impl HandleOutcome {
    fn failed(error: HandleError) -> Self {
        Self {
            result: HandleResult::default(),
            outcome: Err(error),
        }
    }

    pub fn is_success(&self) -> bool {
        self.outcome.is_ok()
    }
}

/// How long a host function may overrun the invocation deadline before the
/// guest future is dropped outright.
const HOST_CALL_GRACE: Duration = Duration::from_millis(100);

/// Call a guest export under the governor.
///
/// The epoch callback stops guest code once a budget trips, and `kite_call`
/// ends itself at the invocation deadline. The select arms only fire for a
/// host function that keeps awaiting past both.
async fn guarded_call<P, R>(
    store: &mut Store<InstanceData>,
    func: TypedFunc<P, R>,
    params: P,
    budget: Budget,
    cancel: CancellationToken,
) -> (Timings, Result<R, HandleError>)
where
    P: WasmParams + Send + Sync,
    R: WasmResults + Send + Sync,
{
    store.data_mut().governor.arm(budget, cancel.clone());
    let backstop = tokio::time::Instant::now() + budget.max_total_time + HOST_CALL_GRACE;
    let canceled = async {
        cancel.cancelled().await;
        tokio::time::sleep(HOST_CALL_GRACE).await;
    };

    let result = tokio::select! {
        biased;
        res = func.call_async(&mut *store, params) => res.map_err(classify),
        _ = tokio::time::sleep_until(backstop) => Err(HandleError::Timeout),
        _ = canceled => Err(HandleError::Canceled),
    };

    (store.data_mut().governor.disarm(), result)
}

/// One sandboxed instance of a compiled module.
pub struct ModuleInstance {
    id: Uuid,
    store: Store<InstanceData>,
    handle_fn: TypedFunc<u32, ()>,
    manifest: Manifest,
    poisoned: bool,
    created_at: DateTime<Utc>,
}

impl ModuleInstance {
    /// Instantiate `module` and negotiate the ABI.
    pub async fn new(
        engine: &Engine,
        linker: &Linker<InstanceData>,
        module: &Module,
        env: Arc<dyn HostEnvironment>,
        limits: ResourceLimits,
    ) -> WasmResult<Self> {
        let mut store = Store::new(engine, InstanceData::new(env, limits));
        store.limiter(|data| &mut data.memory_limiter);
        store.set_epoch_deadline(1);
        store.epoch_deadline_callback(|mut ctx| match ctx.data_mut().governor.check() {
            Ok(()) => Ok(UpdateDeadline::Yield(1)),
            Err(interruption) => Err(wasmtime::Error::new(interruption)),
        });

        let negotiation = Budget {
            max_total_time: limits.negotiation_timeout,
            max_execution_time: limits.negotiation_timeout,
        };

        // Start functions run under the negotiation budget too.
        store
            .data_mut()
            .governor
            .arm(negotiation, CancellationToken::new());
        let instance = linker
            .instantiate_async(&mut store, module)
            .await
            .map_err(|e| WasmError::InstantiationError(classify(e).to_string()))?;
        store.data_mut().governor.disarm();
        store.data_mut().state = InstanceState::Ready;

        let version: u32 =
            negotiate(&mut store, &instance, GET_API_VERSION, negotiation).await?;
        ApiVersion::try_from(version)?;

        let encoding: u32 =
            negotiate(&mut store, &instance, GET_API_ENCODING, negotiation).await?;
        ApiEncoding::try_from(encoding)?;

        negotiate::<()>(&mut store, &instance, DESCRIBE, negotiation).await?;
        let manifest = store.data_mut().manifest.take().ok_or_else(|| {
            WasmError::InvalidManifest(format!("{} did not provide a manifest", DESCRIBE))
        })?;

        let handle_fn = instance
            .get_typed_func::<u32, ()>(&mut store, HANDLE)
            .map_err(|_| WasmError::ExportNotFound(HANDLE.to_string()))?;

        let id = Uuid::now_v7();
        debug!(
            "Negotiated instance {} ({} events, {} commands)",
            id,
            manifest.events.len(),
            manifest.discord_commands.len()
        );

        Ok(Self {
            id,
            store,
            handle_fn,
            manifest,
            poisoned: false,
            created_at: Utc::now(),
        })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn manifest(&self) -> &Manifest {
        &self.manifest
    }

    pub fn state(&self) -> InstanceState {
        self.store.data().state
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Whether the instance can take another event.
    pub fn is_reusable(&self) -> bool {
        !self.poisoned && self.state() == InstanceState::Ready
    }

    /// Deliver one event to the guest and wait for its response.
    pub async fn handle(
        &mut self,
        scope: &ScopeId,
        event: &Event,
        cancel: CancellationToken,
    ) -> HandleOutcome {
        if !self.is_reusable() {
            return HandleOutcome::failed(HandleError::NotReady(self.state()));
        }

        let bytes = match serde_json::to_vec(event) {
            Ok(bytes) => bytes,
            Err(e) => return HandleOutcome::failed(HandleError::Encode(e.to_string())),
        };
        let Ok(len) = u32::try_from(bytes.len()) else {
            return HandleOutcome::failed(HandleError::Encode(format!(
                "event of {} bytes is too large",
                bytes.len()
            )));
        };

        let limits = self.store.data().limits;
        let budget = Budget {
            max_total_time: limits.max_total_time,
            max_execution_time: limits.max_execution_time,
        };

        self.store.data_mut().begin_event(scope.clone(), bytes);
        let (timings, result) =
            guarded_call(&mut self.store, self.handle_fn.clone(), len, budget, cancel).await;
        let response = self.store.data_mut().end_event();

        let outcome = match result {
            Err(e) => {
                self.poisoned = e.is_fatal();
                Err(e)
            }
            Ok(()) => match response {
                Some(response) if !response.success => {
                    Err(HandleError::Guest(response.error.unwrap_or(GuestError {
                        code: 0,
                        message: "guest reported failure".to_string(),
                    })))
                }
                // A guest that never sets a response is treated as successful.
                _ => Ok(()),
            },
        };

        HandleOutcome {
            result: timings.into(),
            outcome,
        }
    }
}

async fn negotiate<R>(
    store: &mut Store<InstanceData>,
    instance: &Instance,
    export: &str,
    budget: Budget,
) -> WasmResult<R>
where
    R: WasmResults + Send + Sync,
{
    let func = instance
        .get_typed_func::<(), R>(&mut *store, export)
        .map_err(|_| WasmError::ExportNotFound(export.to_string()))?;

    let (_, result) = guarded_call(store, func, (), budget, CancellationToken::new()).await;
    result.map_err(|e| WasmError::NegotiationFailed(format!("{}: {}", export, e)))
}

impl std::fmt::Debug for ModuleInstance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleInstance")
            .field("id", &self.id)
            .field("state", &self.state())
            .field("poisoned", &self.poisoned)
            .field("created_at", &self.created_at)
            .finish()
    }
}
