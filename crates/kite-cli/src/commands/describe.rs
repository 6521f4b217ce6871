//! `kite describe` command implementation

use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use kite_engine::{DeploymentEnvironment, EngineConfig, WasmRuntime};
use kite_kernel::{DeploymentId, HostEnvironment};

use crate::dry_run;

/// Negotiate with a module and print its manifest as JSON.
pub async fn run(module: &Path) -> anyhow::Result<()> {
    let bytes =
        std::fs::read(module).with_context(|| format!("failed to read {}", module.display()))?;

    let config = EngineConfig::default();
    let runtime = WasmRuntime::new(config.runtime_config())?;
    let compiled = runtime.compile(&module.display().to_string(), &bytes)?;

    let env = DeploymentEnvironment::new(
        DeploymentId::new("describe"),
        &dry_run::collaborators(),
        config.deployment_settings().call_timeout_ceiling,
    );
    let env: Arc<dyn HostEnvironment> = Arc::new(env);
    let instance = runtime
        .instantiate(&compiled, env, config.resource_limits())
        .await?;

    println!("{}", serde_json::to_string_pretty(instance.manifest())?);
    Ok(())
}
