//! `kite run` command implementation

use std::path::Path;

use anyhow::{Context, anyhow};
use chrono::Utc;
use colored::Colorize;
use kite_engine::{DeploymentSpec, DispatchReport, Engine, EngineConfig};
use kite_kernel::{ConfigValues, DeploymentId, Event, ScopeId};

use crate::dry_run;

/// Load a module into a local engine and deliver every event in `events`.
pub async fn run(
    module: &Path,
    config: Option<&Path>,
    events: &Path,
    scope: &str,
    user_config: Option<&Path>,
) -> anyhow::Result<()> {
    let config_path = config.map(|p| p.to_string_lossy().into_owned());
    let engine_config = EngineConfig::load(config_path.as_deref())?;

    let bytes =
        std::fs::read(module).with_context(|| format!("failed to read {}", module.display()))?;
    let user_config: ConfigValues = match user_config {
        Some(path) => {
            let raw = std::fs::read(path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            serde_json::from_slice(&raw)
                .with_context(|| format!("{} is not a JSON object", path.display()))?
        }
        None => ConfigValues::new(),
    };

    let engine = Engine::new(engine_config, dry_run::collaborators())
        .map_err(|report| anyhow!("{report:?}"))?;

    let deployment_id = module
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "module".to_string());
    engine
        .load_app_deployment(DeploymentSpec {
            id: DeploymentId::new(deployment_id),
            scope: ScopeId::new(scope),
            module: bytes,
            config: user_config,
            limits: Default::default(),
            updated_at: Utc::now(),
        })
        .await
        .map_err(|report| anyhow!("{report:?}"))?;

    let lines = std::fs::read_to_string(events)
        .with_context(|| format!("failed to read {}", events.display()))?;
    for (index, line) in lines.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let mut event: Event = serde_json::from_str(line)
            .with_context(|| format!("{}:{}: invalid event", events.display(), index + 1))?;
        if event.guild_id.is_empty() {
            event.guild_id = scope.to_string();
        }

        let reports = engine.handle_event(&event).await;
        if reports.is_empty() {
            println!("{} {} not handled", "-".dimmed(), event.event_type);
        }
        for report in &reports {
            print_report(&event, report);
        }
    }

    engine.close().await;
    Ok(())
}

fn print_report(event: &Event, report: &DispatchReport) {
    let Some(outcome) = &report.outcome else {
        println!(
            "{} {} {}: {}",
            "✗".red(),
            report.deployment_id,
            event.event_type,
            report.pool_error.as_deref().unwrap_or("no instance available")
        );
        return;
    };

    let timing = format!(
        "total {:?}, execution {:?}",
        outcome.result.total_duration, outcome.result.execution_duration
    );
    match &outcome.outcome {
        Ok(()) => println!(
            "{} {} {} ({})",
            "✓".green(),
            report.deployment_id,
            event.event_type,
            timing.dimmed()
        ),
        Err(e) => println!(
            "{} {} {}: {} ({})",
            "✗".red(),
            report.deployment_id,
            event.event_type,
            e,
            timing.dimmed()
        ),
    }
}
