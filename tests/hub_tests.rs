// ABOUTME: End-to-end tests for the messaging hub composition
// ABOUTME: Broadcast fan-out, command round trips, default handlers and shutdown

use agent_relay::hub::{create_messaging_hub, HubOptions, MessagingHub};
use agent_relay::registry::{AdapterRegistry, EnvCheck, EnvLookup};
use relay_core::event::{topics, Event, Severity};
use relay_core::router::command_fn;
use relay_core::testing::MockAdapter;
use relay_core::traits::{ChatAdapter, CommandContext};
use relay_core::CommandResult;
use std::sync::Arc;

fn all_enabled() -> EnvLookup {
    Arc::new(|_key: &str| Some("1".to_string()))
}

fn registry_with(mocks: &[Arc<MockAdapter>]) -> Arc<AdapterRegistry> {
    let registry = AdapterRegistry::with_known(Vec::new()).with_env_lookup(all_enabled());
    for mock in mocks {
        let name = mock.name().to_string();
        registry
            .register_adapter(
                &name,
                MockAdapter::shared_factory(Arc::clone(mock)),
                EnvCheck::var(format!("MOCK_{}", name.to_uppercase())),
            )
            .unwrap();
    }
    Arc::new(registry)
}

async fn hub_with(mocks: &[Arc<MockAdapter>], write_users: &[&str]) -> MessagingHub {
    create_messaging_hub(HubOptions {
        project: "proj".to_string(),
        write_users: write_users.iter().map(|u| u.to_string()).collect(),
        registry: Some(registry_with(mocks)),
        ..HubOptions::default()
    })
    .await
    .expect("hub should start with adapters loaded")
}

#[tokio::test]
async fn test_no_adapters_means_no_hub() {
    let registry = AdapterRegistry::with_known(Vec::new())
        .with_env_lookup(Arc::new(|_key: &str| None::<String>));
    let hub = create_messaging_hub(HubOptions {
        registry: Some(Arc::new(registry)),
        ..HubOptions::default()
    })
    .await;
    assert!(hub.is_none());
}

#[tokio::test]
async fn test_all_adapters_failing_means_no_hub() {
    let registry = AdapterRegistry::with_known(Vec::new()).with_env_lookup(all_enabled());
    let broken = Arc::new(MockAdapter::new("broken").failing_initialize());
    registry
        .register_adapter(
            "broken",
            MockAdapter::shared_factory(broken),
            EnvCheck::var("BROKEN"),
        )
        .unwrap();
    let hub = create_messaging_hub(HubOptions {
        registry: Some(Arc::new(registry)),
        ..HubOptions::default()
    })
    .await;
    assert!(hub.is_none());
}

#[tokio::test]
async fn test_broadcast_survives_failing_adapter() {
    let good = Arc::new(MockAdapter::new("good"));
    let bad = Arc::new(MockAdapter::new("bad"));
    bad.set_fail_send(true);
    let hub = hub_with(&[Arc::clone(&good), Arc::clone(&bad)], &[]).await;

    hub.publish(
        Event::new(topics::RALPH_STARTED, "Starting loop")
            .with_loop("l1")
            .with_severity(Severity::Info),
    );
    hub.flush().await;

    let sent = good.sent_messages();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].message.title, "🚀 Loop started");
    assert_eq!(sent[0].message.project, "proj");
    assert_eq!(sent[0].message.thread_id.as_deref(), Some("l1"));
    assert!(bad.sent_messages().is_empty());
    assert_eq!(bad.status().errors, 1);

    // Send failures are absorbed by the broadcaster, not dead-lettered
    assert_eq!(hub.bus().dead_letter_count(), 0);
}

#[tokio::test]
async fn test_publish_keeps_explicit_project() {
    let mock = Arc::new(MockAdapter::new("mock"));
    let hub = hub_with(&[Arc::clone(&mock)], &[]).await;

    hub.publish(Event::new("custom.thing", "x").with_project("other"));
    hub.flush().await;

    assert_eq!(mock.sent_messages()[0].message.project, "other");
}

#[tokio::test]
async fn test_default_channel_is_used_for_broadcasts() {
    let mock = Arc::new(MockAdapter::new("mock"));
    let hub = create_messaging_hub(HubOptions {
        default_channel: Some("alerts".to_string()),
        registry: Some(registry_with(&[Arc::clone(&mock)])),
        ..HubOptions::default()
    })
    .await
    .unwrap();

    hub.publish(Event::new(topics::BUILD_SUCCEEDED, "green"));
    hub.flush().await;

    assert_eq!(mock.sent_messages()[0].channel.as_deref(), Some("alerts"));
}

#[tokio::test]
async fn test_approve_requires_write_permission() {
    let mock = Arc::new(MockAdapter::new("mock"));
    let hub = hub_with(&[Arc::clone(&mock)], &["bob"]).await;

    assert!(mock.simulate_command("/approve g1", "alice", "c1").await);
    let sent = mock.sent_messages();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].channel.as_deref(), Some("c1"));
    assert_eq!(sent[0].message.severity, Severity::Warning);
    assert!(sent[0].message.body.contains("Permission denied"));

    assert!(mock.simulate_command("/approve g1 ship it", "bob", "c1").await);
    hub.flush().await;

    let sent = mock.sent_messages();
    assert_eq!(sent.len(), 3);
    let reply = sent
        .iter()
        .find(|s| s.message.body == "Gate g1 approved")
        .unwrap();
    assert_eq!(reply.channel.as_deref(), Some("c1"));
    assert_eq!(reply.message.project, "proj");

    // The published decision comes back through the broadcaster
    let broadcast = &sent
        .iter()
        .find(|s| s.message.title == "👍 Gate approved")
        .unwrap()
        .message;
    assert_eq!(broadcast.title, "👍 Gate approved");
    assert!(broadcast
        .fields
        .iter()
        .any(|f| f.label == "By" && f.value == "bob"));
    assert!(broadcast
        .fields
        .iter()
        .any(|f| f.label == "Reason" && f.value == "ship it"));
}

#[tokio::test]
async fn test_reject_without_gate_shows_usage() {
    let mock = Arc::new(MockAdapter::new("mock"));
    let hub = hub_with(&[mock], &["bob"]).await;

    let result = hub
        .dispatch("/reject", CommandContext::new("mock", "bob", "c1"))
        .await;
    assert!(!result.success);
    assert!(result.display_text().starts_with("Usage: /reject"));
}

#[tokio::test]
async fn test_ralph_status_reports_tracked_loops() {
    let mock = Arc::new(MockAdapter::new("mock"));
    let hub = hub_with(&[mock], &[]).await;
    let ctx = || CommandContext::new("mock", "alice", "c1");

    let empty = hub.dispatch("/ralph-status", ctx()).await;
    assert_eq!(empty.display_text(), "No loops tracked yet");

    hub.publish(
        Event::new(topics::RALPH_ITERATION, "refactoring parser")
            .with_loop("l1")
            .with_detail("iteration", 2),
    );
    hub.publish(Event::new(topics::RALPH_COMPLETED, "done").with_loop("l2"));
    hub.flush().await;

    let all = hub.dispatch("/ralph-status", ctx()).await;
    assert!(all.success);
    assert!(all.display_text().contains("l1: 🔄 running, iteration 2"));
    assert!(all.display_text().contains("l2: ✅ completed"));

    let one = hub.dispatch("/ralph-status l2", ctx()).await;
    assert_eq!(one.display_text(), "l2: ✅ completed - done");

    let missing = hub.dispatch("/ralph-status nope", ctx()).await;
    assert!(!missing.success);
}

#[tokio::test]
async fn test_status_and_health_commands() {
    let mock = Arc::new(MockAdapter::new("mock"));
    let hub = hub_with(&[mock], &[]).await;
    let ctx = CommandContext::new("mock", "alice", "c1");

    let status = hub.dispatch("/status", ctx.clone()).await;
    assert!(status.success);
    assert!(status.display_text().contains("Status for proj"));
    let data = status.data.unwrap();
    assert_eq!(data["subscribers"], 2);
    assert_eq!(data["adapters"][0], "mock");

    let health = hub.dispatch("/health", ctx.clone()).await;
    assert!(health.display_text().starts_with("mock: ✅ connected"));

    let help = hub.dispatch("/help", ctx).await;
    assert!(help.display_text().contains("/approve [🔐 write]"));
}

#[tokio::test]
async fn test_hub_status_snapshot() {
    let mock = Arc::new(MockAdapter::new("mock"));
    let hub = hub_with(&[mock], &[]).await;

    let status = hub.status();
    assert_eq!(status.project, "proj");
    assert_eq!(status.ready_adapters, vec!["mock".to_string()]);
    assert_eq!(status.subscribers, 2);
    assert_eq!(status.dead_letters, 0);
    assert_eq!(
        status.commands,
        vec!["approve", "health", "help", "ralph-status", "reject", "status"]
    );
}

#[tokio::test]
async fn test_ask_needs_a_registered_handler() {
    let mock = Arc::new(MockAdapter::new("mock"));
    let hub = hub_with(&[mock], &[]).await;
    let ctx = || CommandContext::new("mock", "alice", "c1");

    let result = hub.dispatch("/ask what broke?", ctx()).await;
    assert_eq!(
        result.display_text(),
        "No handler registered for command: ask"
    );

    hub.router().register_handler(
        "ask",
        command_fn(|args, _ctx| async move { Ok(CommandResult::ok(args.join(" "))) }),
    );
    let result = hub.dispatch("/ask what broke?", ctx()).await;
    assert_eq!(result.display_text(), "what broke?");
}

#[tokio::test]
async fn test_shutdown_stops_delivery() {
    let mock = Arc::new(MockAdapter::new("mock"));
    let hub = hub_with(&[Arc::clone(&mock)], &[]).await;

    let failed = hub.shutdown().await;
    assert!(failed.is_empty());
    assert_eq!(mock.shutdown_calls(), 1);
    assert_eq!(hub.bus().subscriber_count(), 0);

    hub.publish(Event::new(topics::BUILD_FAILED, "red"));
    hub.flush().await;
    assert!(mock.sent_messages().is_empty());
}

#[tokio::test]
async fn test_custom_permission_check_overrides_write_users() {
    let mock = Arc::new(MockAdapter::new("mock"));
    let hub = create_messaging_hub(HubOptions {
        write_users: vec!["bob".to_string()],
        registry: Some(registry_with(&[mock])),
        permission_check: Some(Arc::new(|user: &str, _permission: relay_core::Permission| {
            user == "carol"
        })),
        ..HubOptions::default()
    })
    .await
    .unwrap();

    assert!(!hub.router().uses_grant_set());
    let denied = hub
        .dispatch("/approve g1", CommandContext::new("mock", "bob", "c1"))
        .await;
    assert!(denied.display_text().contains("Permission denied"));
    let allowed = hub
        .dispatch("/approve g1", CommandContext::new("mock", "carol", "c1"))
        .await;
    assert!(allowed.success);
}
