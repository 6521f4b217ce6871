//! End-to-end scenarios: an engine wired to the mock collaborators.

use std::sync::Arc;

use chrono::Utc;
use kite_engine::{Collaborators, DeploymentSpec, Engine, EngineConfig, MemoryKvStore};
use kite_kernel::call::{DiscordCall, DiscordCallKind};
use kite_kernel::{ConfigValues, DeploymentId, Event, EventType, PlatformError, ScopeId};
use kite_testing::guests::{self, GuestBuilder, MESSAGE_CREATE};
use kite_testing::{
    MockPlatformClient, RecordingLogSink, RecordingMetricsSink, StaticUsage,
    assert_events_handled,
};
use serde_json::json;

struct World {
    platform: Arc<MockPlatformClient>,
    metrics: Arc<RecordingMetricsSink>,
    logs: Arc<RecordingLogSink>,
    engine: Engine,
}

fn world() -> World {
    let platform = Arc::new(MockPlatformClient::new());
    let metrics = Arc::new(RecordingMetricsSink::new());
    let logs = Arc::new(RecordingLogSink::new());
    let collaborators = Collaborators {
        kv: Arc::new(MemoryKvStore::new()),
        platform: platform.clone(),
        metrics: metrics.clone(),
        logs: logs.clone(),
        usage: Arc::new(StaticUsage::unlimited()),
    };
    let engine = Engine::new(EngineConfig::default(), collaborators).unwrap();
    World {
        platform,
        metrics,
        logs,
        engine,
    }
}

fn deployment(id: &str, wat: String) -> DeploymentSpec {
    DeploymentSpec {
        id: DeploymentId::new(id),
        scope: ScopeId::new("G1"),
        module: wat.into_bytes(),
        config: ConfigValues::new(),
        limits: Default::default(),
        updated_at: Utc::now(),
    }
}

fn message() -> Event {
    Event::new(EventType::MessageCreate, "G1", json!({ "content": "!ping" }))
}

#[tokio::test]
async fn test_reply_to_message() {
    let world = world();
    let wat = guests::caller(json!({
        "type": "DISCORD_MESSAGE_CREATE",
        "config": { "reason": "reply" },
        "data": { "channel_id": "c1", "content": "pong" }
    }));
    world
        .engine
        .load_app_deployment(deployment("pinger", wat))
        .await
        .unwrap();

    let reports = world.engine.handle_event(&message()).await;
    assert!(reports[0].is_success());

    let calls = world.platform.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].scope, ScopeId::new("G1"));
    assert_eq!(calls[0].config.reason.as_deref(), Some("reply"));
    let DiscordCall::MessageCreate(request) = &calls[0].call else {
        panic!("unexpected call {:?}", calls[0].call);
    };
    assert_eq!(request.channel_id, "c1");
    assert_eq!(request.body["content"], "pong");

    assert_events_handled!(world.metrics, 1, 1);
}

#[tokio::test]
async fn test_platform_errors_reach_the_guest() {
    let world = world();
    world.platform.fail(
        DiscordCallKind::MessageCreate,
        PlatformError::Api {
            code: 50013,
            message: "Missing Permissions".into(),
        },
    );
    let wat = guests::caller(json!({
        "type": "DISCORD_MESSAGE_CREATE",
        "data": { "channel_id": "c1", "content": "pong" }
    }));
    world
        .engine
        .load_app_deployment(deployment("pinger", wat))
        .await
        .unwrap();

    world.engine.handle_event(&message()).await;

    let logged = world.logs.messages();
    assert!(logged[0].contains(r#""code":5"#), "{}", logged[0]);
    assert!(world.metrics.calls().iter().all(|c| !c.success));
}

#[tokio::test]
async fn test_one_event_many_deployments() {
    let world = world();
    world
        .engine
        .load_app_deployment(deployment("counter", guests::counter()))
        .await
        .unwrap();
    world
        .engine
        .load_app_deployment(deployment("failing", guests::failing()))
        .await
        .unwrap();
    let chatty = GuestBuilder::new(&[MESSAGE_CREATE])
        .log(1, "seen")
        .respond_ok()
        .build();
    world
        .engine
        .load_app_deployment(deployment("chatty", chatty))
        .await
        .unwrap();

    let reports = world.engine.handle_event(&message()).await;
    assert_eq!(reports.len(), 3);
    assert_eq!(reports.iter().filter(|r| r.is_success()).count(), 2);
    assert_events_handled!(world.metrics, 3, 2);
    assert!(world.logs.messages().contains(&"seen".to_string()));
}
