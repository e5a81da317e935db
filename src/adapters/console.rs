// ABOUTME: Console binding that renders messages through the tracing log
// ABOUTME: Outbound only; useful for local runs and as a reference binding

use crate::registry::AdapterFactory;
use anyhow::Result;
use async_trait::async_trait;
use relay_core::message::Message;
use relay_core::traits::{
    AdapterHealth, AdapterState, ChatAdapter, CommandCallback, MessageCallback, SendResult,
};
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

pub const NAME: &str = "console";

const DEFAULT_CHANNEL: &str = "stdout";

pub struct ConsoleAdapter {
    default_channel: String,
    next_id: AtomicU64,
    state: AdapterState,
}

impl ConsoleAdapter {
    pub fn new(default_channel: impl Into<String>) -> Self {
        Self {
            default_channel: default_channel.into(),
            next_id: AtomicU64::new(1),
            state: AdapterState::new(),
        }
    }

    /// Config: `{"channel": "name"}` (optional)
    pub fn factory() -> AdapterFactory {
        Box::new(|config: &Value| {
            let channel = config
                .get("channel")
                .and_then(Value::as_str)
                .unwrap_or(DEFAULT_CHANNEL);
            Ok(Arc::new(ConsoleAdapter::new(channel)) as Arc<dyn ChatAdapter>)
        })
    }
}

#[async_trait]
impl ChatAdapter for ConsoleAdapter {
    fn name(&self) -> &str {
        NAME
    }

    async fn initialize(&self) -> Result<()> {
        self.state.mark_connected();
        tracing::info!(channel = %self.default_channel, "Console adapter connected");
        Ok(())
    }

    async fn shutdown(&self) -> Result<()> {
        self.state.mark_disconnected();
        Ok(())
    }

    async fn send(&self, message: &Message, channel: Option<&str>) -> SendResult {
        let channel = channel.unwrap_or(&self.default_channel);
        let message_id = format!("console-{}", self.next_id.fetch_add(1, Ordering::Relaxed));
        tracing::info!(
            platform = NAME,
            channel = %channel,
            message_id = %message_id,
            severity = %message.severity,
            color = %format!("#{:06X}", message.color()),
            project = %message.project,
            thread = message.thread_id.as_deref().unwrap_or("-"),
            "\n{}",
            message.to_plain_text()
        );
        self.state.record_sent();
        SendResult::sent(message_id, channel)
    }

    async fn update(&self, message_id: &str, message: &Message) -> Result<()> {
        tracing::info!(
            platform = NAME,
            message_id = %message_id,
            "(edited)\n{}",
            message.to_plain_text()
        );
        Ok(())
    }

    fn on_command(&self, handler: CommandCallback) {
        self.state.set_command_handler(handler);
    }

    fn on_message(&self, handler: MessageCallback) {
        self.state.set_message_handler(handler);
    }

    fn status(&self) -> AdapterHealth {
        self.state.health(NAME)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_console_send_counts() {
        let adapter = ConsoleAdapter::new("ops");
        adapter.initialize().await.unwrap();

        let first = adapter.send(&Message::reply("hello"), None).await;
        let second = adapter.send(&Message::reply("again"), Some("alerts")).await;

        assert!(first.success);
        assert_eq!(first.channel_id, "ops");
        assert_eq!(first.message_id, "console-1");
        assert_eq!(second.channel_id, "alerts");
        assert_eq!(second.message_id, "console-2");

        let health = adapter.status();
        assert!(health.connected);
        assert_eq!(health.messages_sent, 2);

        adapter.shutdown().await.unwrap();
        assert!(!adapter.status().connected);
    }

    #[tokio::test]
    async fn test_factory_reads_channel() {
        let adapter = ConsoleAdapter::factory()(&json!({"channel": "builds"})).unwrap();
        let result = adapter.send(&Message::reply("x"), None).await;
        assert_eq!(result.channel_id, "builds");
        assert_eq!(adapter.name(), "console");
    }
}
