// ABOUTME: Integration tests for the command router
// ABOUTME: Check ordering, permissions, rate limits and handler error conversion

use anyhow::anyhow;
use relay_core::commands::Permission;
use relay_core::router::{command_fn, CommandResult, CommandRouter, RouterConfig};
use relay_core::traits::CommandContext;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

fn ctx(user: &str) -> CommandContext {
    CommandContext::new("test", user, "channel-1")
}

fn counting(name: &'static str, counter: Arc<AtomicUsize>) -> Arc<dyn relay_core::CommandHandler> {
    command_fn(move |args, _ctx| {
        let counter = Arc::clone(&counter);
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(CommandResult::ok(format!("{} {}", name, args.join(" "))))
        }
    })
}

#[tokio::test]
async fn test_write_command_requires_grant() {
    let router = CommandRouter::default();
    let calls = Arc::new(AtomicUsize::new(0));
    router.register_handler("approve", counting("approved", Arc::clone(&calls)));

    let denied = router.dispatch("/approve g1", ctx("u1")).await;
    assert!(!denied.success);
    assert!(denied.error.unwrap().contains("Permission denied"));
    assert_eq!(calls.load(Ordering::SeqCst), 0);

    router.grant_permission("u1", Permission::Write);
    let allowed = router.dispatch("/approve g1", ctx("u1")).await;
    assert!(allowed.success);
    assert_eq!(allowed.message.as_deref(), Some("approved g1"));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_read_commands_allowed_for_anyone() {
    let router = CommandRouter::default();
    let calls = Arc::new(AtomicUsize::new(0));
    router.register_handler("status", counting("status", Arc::clone(&calls)));

    let result = router.dispatch("status", ctx("stranger")).await;
    assert!(result.success);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_eleventh_command_is_rate_limited() {
    let router = CommandRouter::default();
    let calls = Arc::new(AtomicUsize::new(0));
    router.register_handler("status", counting("status", Arc::clone(&calls)));

    for i in 0..10 {
        let result = router.dispatch("/status", ctx("u1")).await;
        assert!(result.success, "command {} should succeed", i + 1);
    }
    let limited = router.dispatch("/status", ctx("u1")).await;
    assert!(!limited.success);
    assert!(limited.error.unwrap().contains("Rate limit exceeded"));
    assert_eq!(calls.load(Ordering::SeqCst), 10);

    // A different user is unaffected
    assert!(router.dispatch("/status", ctx("u2")).await.success);
}

#[tokio::test(start_paused = true)]
async fn test_rate_limit_window_expires() {
    let router = CommandRouter::new(RouterConfig {
        rate_limit_window_secs: 30,
        rate_limit_max: 1,
    });
    router.register_handler("help", counting("help", Arc::new(AtomicUsize::new(0))));

    assert!(router.dispatch("help", ctx("u1")).await.success);
    assert!(!router.dispatch("help", ctx("u1")).await.success);

    tokio::time::advance(std::time::Duration::from_secs(30)).await;
    assert!(router.dispatch("help", ctx("u1")).await.success);
}

#[tokio::test(start_paused = true)]
async fn test_unknown_command_reported_before_rate_limit() {
    let router = CommandRouter::new(RouterConfig {
        rate_limit_window_secs: 60,
        rate_limit_max: 1,
    });
    router.register_handler("status", counting("status", Arc::new(AtomicUsize::new(0))));
    assert!(router.dispatch("status", ctx("u1")).await.success);
    assert!(!router.dispatch("status", ctx("u1")).await.success);

    let result = router.dispatch("/bogus", ctx("u1")).await;
    assert!(!result.success);
    let error = result.error.unwrap();
    assert!(error.contains("Unknown command"));
    assert!(error.contains("approve"));
    assert!(!error.contains("Rate limit"));
}

#[tokio::test(start_paused = true)]
async fn test_rate_limit_reported_before_permission() {
    let router = CommandRouter::new(RouterConfig {
        rate_limit_window_secs: 60,
        rate_limit_max: 1,
    });
    let first = router.dispatch("/approve g1", ctx("u1")).await;
    assert!(first.error.unwrap().contains("Permission denied"));

    let second = router.dispatch("/approve g1", ctx("u1")).await;
    assert!(second.error.unwrap().contains("Rate limit exceeded"));
}

#[tokio::test]
async fn test_permission_reported_before_missing_handler() {
    let router = CommandRouter::default();
    let result = router.dispatch("/reject g1", ctx("u1")).await;
    assert!(result.error.unwrap().contains("Permission denied"));

    router.grant_permission("u1", Permission::Write);
    let result = router.dispatch("/reject g1", ctx("u1")).await;
    assert!(result.error.unwrap().contains("No handler registered"));
}

#[tokio::test]
async fn test_empty_input_fails() {
    let router = CommandRouter::default();
    let result = router.dispatch("   ", ctx("u1")).await;
    assert!(!result.success);
    assert_eq!(result.error.as_deref(), Some("Empty command"));
}

#[tokio::test]
async fn test_command_name_is_case_insensitive() {
    let router = CommandRouter::default();
    let calls = Arc::new(AtomicUsize::new(0));
    router.register_handler("health", counting("health", Arc::clone(&calls)));
    assert!(router.dispatch("/HEALTH", ctx("u1")).await.success);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_handler_error_becomes_failure_result() {
    let router = CommandRouter::default();
    router.register_handler(
        "ask",
        command_fn(|_args, _ctx| async { Err::<CommandResult, _>(anyhow!("backend offline")) }),
    );

    let result = router.dispatch("/ask what broke?", ctx("u1")).await;
    assert!(!result.success);
    assert!(result.error.unwrap().contains("backend offline"));
}

#[tokio::test]
async fn test_handler_receives_args_and_context() {
    let router = CommandRouter::default();
    let seen = Arc::new(Mutex::new(None));
    let seen_clone = Arc::clone(&seen);
    router.register_handler(
        "ralph-status",
        command_fn(move |args, ctx| {
            let seen = Arc::clone(&seen_clone);
            async move {
                *seen.lock().unwrap() = Some((args, ctx.user_id.clone(), ctx.platform.clone()));
                Ok(CommandResult::ok("ok"))
            }
        }),
    );

    router
        .dispatch("/ralph-status Loop-A", ctx("u9"))
        .await;

    let (args, user, platform) = seen.lock().unwrap().clone().unwrap();
    assert_eq!(args, vec!["Loop-A".to_string()]);
    assert_eq!(user, "u9");
    assert_eq!(platform, "test");
}

#[tokio::test]
async fn test_custom_permission_check() {
    let router = CommandRouter::default().with_permission_check(Arc::new(
        |user: &str, permission: Permission| match permission {
            Permission::Read => true,
            Permission::Write => user.starts_with("admin-"),
        },
    ));
    router.register_handler("approve", counting("approved", Arc::new(AtomicUsize::new(0))));

    assert!(router.dispatch("/approve g1", ctx("admin-alice")).await.success);
    assert!(!router.dispatch("/approve g1", ctx("bob")).await.success);

    // The grant set is bypassed entirely
    assert!(!router.uses_grant_set());
    router.grant_permission("bob", Permission::Write);
    assert!(!router.dispatch("/approve g1", ctx("bob")).await.success);
    assert!(CommandRouter::default().uses_grant_set());
}

#[tokio::test]
async fn test_huge_rate_limit_window_still_dispatches() {
    let router = CommandRouter::new(RouterConfig {
        rate_limit_window_secs: u64::MAX,
        rate_limit_max: 1,
    });
    router.register_handler("help", counting("help", Arc::new(AtomicUsize::new(0))));

    assert!(router.dispatch("/help", ctx("u1")).await.success);
    let limited = router.dispatch("/help", ctx("u1")).await;
    assert!(limited.error.unwrap().contains("Rate limit exceeded"));
}

#[tokio::test]
async fn test_revoke_permission() {
    let router = CommandRouter::default();
    router.register_handler("approve", counting("approved", Arc::new(AtomicUsize::new(0))));
    router.grant_permission("u1", Permission::Write);
    assert!(router.dispatch("/approve g1", ctx("u1")).await.success);

    router.revoke_permission("u1", Permission::Write);
    let result = router.dispatch("/approve g1", ctx("u1")).await;
    assert!(result.error.unwrap().contains("Permission denied"));
}

#[test]
fn test_registered_commands_sorted() {
    let router = CommandRouter::default();
    router.register_handler("status", counting("s", Arc::new(AtomicUsize::new(0))));
    router.register_handler("Help", counting("h", Arc::new(AtomicUsize::new(0))));
    assert_eq!(router.registered_commands(), vec!["help", "status"]);
}
