// ABOUTME: Capability contract every chat platform binding implements
// ABOUTME: Plus the shared AdapterState bookkeeping that concrete bindings embed

use crate::message::Message;
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_util::future::BoxFuture;
use serde::Serialize;
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

// =============================================================================
// Inbound context
// =============================================================================

/// Transport metadata for one inbound command invocation
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CommandContext {
    /// Platform the command arrived on (e.g., "slack", "console")
    pub platform: String,
    /// Opaque user identifier, used for permissions and rate limiting
    pub user_id: String,
    pub channel_id: String,
    pub thread_id: Option<String>,
    pub guild_id: Option<String>,
    pub metadata: HashMap<String, String>,
}

impl CommandContext {
    pub fn new(
        platform: impl Into<String>,
        user_id: impl Into<String>,
        channel_id: impl Into<String>,
    ) -> Self {
        Self {
            platform: platform.into(),
            user_id: user_id.into(),
            channel_id: channel_id.into(),
            ..Default::default()
        }
    }

    pub fn with_thread(mut self, thread_id: impl Into<String>) -> Self {
        self.thread_id = Some(thread_id.into());
        self
    }
}

/// Called by an adapter for each inbound command: (command, args, context)
pub type CommandCallback =
    Arc<dyn Fn(String, Vec<String>, CommandContext) -> BoxFuture<'static, ()> + Send + Sync>;

/// Called by an adapter for inbound free text: (text, context)
pub type MessageCallback =
    Arc<dyn Fn(String, CommandContext) -> BoxFuture<'static, ()> + Send + Sync>;

/// Wrap an async closure as a [`CommandCallback`]
pub fn command_callback<F, Fut>(f: F) -> CommandCallback
where
    F: Fn(String, Vec<String>, CommandContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    Arc::new(
        move |command: String, args: Vec<String>, ctx: CommandContext| -> BoxFuture<'static, ()> {
            Box::pin(f(command, args, ctx))
        },
    )
}

/// Wrap an async closure as a [`MessageCallback`]
pub fn message_callback<F, Fut>(f: F) -> MessageCallback
where
    F: Fn(String, CommandContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    Arc::new(
        move |text: String, ctx: CommandContext| -> BoxFuture<'static, ()> {
            Box::pin(f(text, ctx))
        },
    )
}

// =============================================================================
// Outbound results
// =============================================================================

/// Outcome of a single send
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SendResult {
    pub message_id: String,
    pub channel_id: String,
    pub success: bool,
    pub error: Option<String>,
}

impl SendResult {
    pub fn sent(message_id: impl Into<String>, channel_id: impl Into<String>) -> Self {
        Self {
            message_id: message_id.into(),
            channel_id: channel_id.into(),
            success: true,
            error: None,
        }
    }

    pub fn failed(channel_id: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            message_id: String::new(),
            channel_id: channel_id.into(),
            success: false,
            error: Some(error.into()),
        }
    }
}

/// Health snapshot reported by an adapter
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AdapterHealth {
    pub connected: bool,
    pub platform: String,
    pub messages_sent: u64,
    pub messages_received: u64,
    pub errors: u64,
    pub last_error: Option<String>,
    pub connected_at: Option<DateTime<Utc>>,
}

// =============================================================================
// Capability contract
// =============================================================================

/// A platform binding (Slack, Discord, console, ...).
///
/// The hub only ever talks to platforms through this trait. Bindings own
/// their wire protocol, rendering and any per-platform rate limiting.
#[async_trait]
pub trait ChatAdapter: Send + Sync {
    /// Platform identifier (e.g., "slack", "console")
    fn name(&self) -> &str;

    /// Connect/authenticate. Errors here mark the adapter as failed to load.
    async fn initialize(&self) -> Result<()>;

    async fn shutdown(&self) -> Result<()>;

    /// Send a message to a channel, or to the adapter's default channel
    async fn send(&self, message: &Message, channel: Option<&str>) -> SendResult;

    /// Replace the content of a previously sent message
    async fn update(&self, message_id: &str, message: &Message) -> Result<()>;

    /// Install the callback for inbound commands
    fn on_command(&self, handler: CommandCallback);

    /// Install the callback for inbound free text
    fn on_message(&self, handler: MessageCallback);

    fn status(&self) -> AdapterHealth;
}

// =============================================================================
// Shared adapter bookkeeping
// =============================================================================

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

/// Counters, connection info and installed callbacks for one adapter.
///
/// Concrete bindings embed this and expose it through [`ChatAdapter::status`];
/// the fields themselves are only reachable through the methods below.
#[derive(Default)]
pub struct AdapterState {
    messages_sent: AtomicU64,
    messages_received: AtomicU64,
    errors: AtomicU64,
    last_error: Mutex<Option<String>>,
    connected_at: Mutex<Option<DateTime<Utc>>>,
    command_handler: RwLock<Option<CommandCallback>>,
    message_handler: RwLock<Option<MessageCallback>>,
}

impl AdapterState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_sent(&self) {
        self.messages_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_received(&self) {
        self.messages_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_error(&self, error: impl Into<String>) {
        self.errors.fetch_add(1, Ordering::Relaxed);
        *lock(&self.last_error) = Some(error.into());
    }

    pub fn mark_connected(&self) {
        *lock(&self.connected_at) = Some(Utc::now());
    }

    pub fn mark_disconnected(&self) {
        *lock(&self.connected_at) = None;
    }

    pub fn is_connected(&self) -> bool {
        lock(&self.connected_at).is_some()
    }

    pub fn messages_sent(&self) -> u64 {
        self.messages_sent.load(Ordering::Relaxed)
    }

    pub fn set_command_handler(&self, handler: CommandCallback) {
        *self
            .command_handler
            .write()
            .unwrap_or_else(|e| e.into_inner()) = Some(handler);
    }

    pub fn set_message_handler(&self, handler: MessageCallback) {
        *self
            .message_handler
            .write()
            .unwrap_or_else(|e| e.into_inner()) = Some(handler);
    }

    pub fn command_handler(&self) -> Option<CommandCallback> {
        self.command_handler
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn message_handler(&self) -> Option<MessageCallback> {
        self.message_handler
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Count an inbound command and hand it to the installed callback.
    /// Returns false when no callback is installed.
    pub async fn deliver_command(
        &self,
        command: String,
        args: Vec<String>,
        ctx: CommandContext,
    ) -> bool {
        self.record_received();
        match self.command_handler() {
            Some(handler) => {
                handler(command, args, ctx).await;
                true
            }
            None => {
                tracing::warn!(platform = %ctx.platform, command = %command, "No command handler installed");
                false
            }
        }
    }

    /// Count inbound free text and hand it to the installed callback
    pub async fn deliver_message(&self, text: String, ctx: CommandContext) -> bool {
        self.record_received();
        match self.message_handler() {
            Some(handler) => {
                handler(text, ctx).await;
                true
            }
            None => false,
        }
    }

    pub fn health(&self, platform: &str) -> AdapterHealth {
        let connected_at = *lock(&self.connected_at);
        AdapterHealth {
            connected: connected_at.is_some(),
            platform: platform.to_string(),
            messages_sent: self.messages_sent.load(Ordering::Relaxed),
            messages_received: self.messages_received.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            last_error: lock(&self.last_error).clone(),
            connected_at,
        }
    }
}

impl std::fmt::Debug for AdapterState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdapterState")
            .field("messages_sent", &self.messages_sent)
            .field("messages_received", &self.messages_received)
            .field("errors", &self.errors)
            .field("connected", &self.is_connected())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_health_counts() {
        let state = AdapterState::new();
        state.record_sent();
        state.record_sent();
        state.record_received();
        state.record_error("timeout");
        state.mark_connected();

        let health = state.health("slack");
        assert!(health.connected);
        assert_eq!(health.platform, "slack");
        assert_eq!(health.messages_sent, 2);
        assert_eq!(health.messages_received, 1);
        assert_eq!(health.errors, 1);
        assert_eq!(health.last_error.as_deref(), Some("timeout"));
        assert!(health.connected_at.is_some());

        state.mark_disconnected();
        assert!(!state.health("slack").connected);
    }

    #[tokio::test]
    async fn test_deliver_command_without_handler() {
        let state = AdapterState::new();
        let delivered = state
            .deliver_command("help".into(), vec![], CommandContext::default())
            .await;
        assert!(!delivered);
        assert_eq!(state.health("x").messages_received, 1);
    }

    #[tokio::test]
    async fn test_deliver_command_invokes_handler() {
        let state = AdapterState::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = Arc::clone(&calls);
        state.set_command_handler(command_callback(move |cmd, args, _ctx| {
            let calls = Arc::clone(&calls_clone);
            async move {
                assert_eq!(cmd, "approve");
                assert_eq!(args, vec!["g1".to_string()]);
                calls.fetch_add(1, Ordering::SeqCst);
            }
        }));

        let delivered = state
            .deliver_command(
                "approve".into(),
                vec!["g1".into()],
                CommandContext::new("console", "u1", "c1"),
            )
            .await;
        assert!(delivered);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
