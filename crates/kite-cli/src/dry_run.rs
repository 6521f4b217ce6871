//! Collaborators for running modules without a platform connection.

use std::sync::Arc;

use async_trait::async_trait;
use kite_engine::{
    Collaborators, MemoryKvStore, TracingLogSink, TracingMetricsSink, UnlimitedUsage,
};
use kite_kernel::call::DiscordCall;
use kite_kernel::{CallConfig, PlatformClient, PlatformError, ResponseShape, ScopeId};
use serde_json::{Value, json};
use tracing::info;

/// Logs every platform call and answers with an empty value of the declared shape.
#[derive(Debug, Default)]
pub struct DryRunPlatformClient;

#[async_trait]
impl PlatformClient for DryRunPlatformClient {
    async fn execute(
        &self,
        scope: &ScopeId,
        call: &DiscordCall,
        config: &CallConfig,
    ) -> Result<Value, PlatformError> {
        let kind = call.kind();
        info!(
            scope = %scope,
            reason = config.reason.as_deref().unwrap_or(""),
            "dry run: {} {:?}",
            kind.tag(),
            call
        );

        Ok(match kind.response_shape() {
            ResponseShape::Object => json!({}),
            ResponseShape::List => json!([]),
            ResponseShape::Empty | ResponseShape::OptionalObject => Value::Null,
        })
    }
}

pub fn collaborators() -> Collaborators {
    Collaborators {
        kv: Arc::new(MemoryKvStore::new()),
        platform: Arc::new(DryRunPlatformClient),
        metrics: Arc::new(TracingMetricsSink),
        logs: Arc::new(TracingLogSink),
        usage: Arc::new(UnlimitedUsage),
    }
}
