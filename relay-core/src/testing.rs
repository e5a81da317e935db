// ABOUTME: Recording mock adapter for tests of the bus, registry and hub.
// ABOUTME: Can fail or panic on demand and inject inbound commands.

use crate::message::Message;
use crate::traits::{
    AdapterHealth, AdapterState, ChatAdapter, CommandCallback, CommandContext, MessageCallback,
    SendResult,
};
use anyhow::{bail, Result};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

/// A message captured by [`MockAdapter::send`]
#[derive(Debug, Clone)]
pub struct SentMessage {
    pub message_id: String,
    pub channel: Option<String>,
    pub message: Message,
}

/// In-memory adapter that records everything it is asked to do
pub struct MockAdapter {
    name: String,
    fail_initialize: bool,
    fail_send: AtomicBool,
    fail_shutdown: bool,
    panic_initialize: bool,
    panic_shutdown: bool,
    state: AdapterState,
    next_id: AtomicU64,
    sent: Mutex<Vec<SentMessage>>,
    updates: Mutex<Vec<(String, Message)>>,
    initialize_calls: AtomicU64,
    shutdown_calls: AtomicU64,
}

impl MockAdapter {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fail_initialize: false,
            fail_send: AtomicBool::new(false),
            fail_shutdown: false,
            panic_initialize: false,
            panic_shutdown: false,
            state: AdapterState::new(),
            next_id: AtomicU64::new(1),
            sent: Mutex::new(Vec::new()),
            updates: Mutex::new(Vec::new()),
            initialize_calls: AtomicU64::new(0),
            shutdown_calls: AtomicU64::new(0),
        }
    }

    /// Make `initialize` fail
    pub fn failing_initialize(mut self) -> Self {
        self.fail_initialize = true;
        self
    }

    /// Make `shutdown` fail
    pub fn failing_shutdown(mut self) -> Self {
        self.fail_shutdown = true;
        self
    }

    /// Make `initialize` panic
    pub fn panicking_initialize(mut self) -> Self {
        self.panic_initialize = true;
        self
    }

    /// Make `shutdown` panic
    pub fn panicking_shutdown(mut self) -> Self {
        self.panic_shutdown = true;
        self
    }

    /// Toggle send failures at runtime
    pub fn set_fail_send(&self, fail: bool) {
        self.fail_send.store(fail, Ordering::SeqCst);
    }

    pub fn sent_messages(&self) -> Vec<SentMessage> {
        self.sent.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn updates(&self) -> Vec<(String, Message)> {
        self.updates.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn initialize_calls(&self) -> u64 {
        self.initialize_calls.load(Ordering::SeqCst)
    }

    pub fn shutdown_calls(&self) -> u64 {
        self.shutdown_calls.load(Ordering::SeqCst)
    }

    /// Pretend a user typed a command on this platform. Resolves once the
    /// installed command callback has finished. Returns false when none is installed.
    pub async fn simulate_command(&self, raw: &str, user_id: &str, channel_id: &str) -> bool {
        let mut parts = raw.trim().trim_start_matches('/').split_whitespace();
        let command = parts.next().unwrap_or_default().to_string();
        let args = parts.map(str::to_string).collect();
        let ctx = CommandContext::new(self.name.clone(), user_id, channel_id);
        self.state.deliver_command(command, args, ctx).await
    }

    /// Factory that builds a fresh mock; `{"fail_initialize": true}` in the
    /// config makes initialize fail, `{"panic_initialize": true}` makes it panic.
    pub fn factory(
        name: &str,
    ) -> impl Fn(&Value) -> Result<Arc<dyn ChatAdapter>> + Send + Sync + 'static {
        let name = name.to_string();
        move |config: &Value| {
            let mut mock = MockAdapter::new(name.clone());
            if config
                .get("fail_initialize")
                .and_then(Value::as_bool)
                .unwrap_or(false)
            {
                mock = mock.failing_initialize();
            }
            if config
                .get("panic_initialize")
                .and_then(Value::as_bool)
                .unwrap_or(false)
            {
                mock = mock.panicking_initialize();
            }
            Ok(Arc::new(mock) as Arc<dyn ChatAdapter>)
        }
    }

    /// Factory that always hands out the same instance, so tests can inspect it
    pub fn shared_factory(
        mock: Arc<MockAdapter>,
    ) -> impl Fn(&Value) -> Result<Arc<dyn ChatAdapter>> + Send + Sync + 'static {
        move |_config: &Value| Ok(Arc::clone(&mock) as Arc<dyn ChatAdapter>)
    }
}

#[async_trait]
impl ChatAdapter for MockAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    async fn initialize(&self) -> Result<()> {
        self.initialize_calls.fetch_add(1, Ordering::SeqCst);
        if self.panic_initialize {
            panic!("{}: mock initialize panic", self.name);
        }
        if self.fail_initialize {
            self.state.record_error("mock initialize failure");
            bail!("{}: mock initialize failure", self.name);
        }
        self.state.mark_connected();
        Ok(())
    }

    async fn shutdown(&self) -> Result<()> {
        self.shutdown_calls.fetch_add(1, Ordering::SeqCst);
        if self.panic_shutdown {
            panic!("{}: mock shutdown panic", self.name);
        }
        self.state.mark_disconnected();
        if self.fail_shutdown {
            bail!("{}: mock shutdown failure", self.name);
        }
        Ok(())
    }

    async fn send(&self, message: &Message, channel: Option<&str>) -> SendResult {
        let channel_id = channel.unwrap_or("default").to_string();
        if self.fail_send.load(Ordering::SeqCst) {
            self.state.record_error("mock send failure");
            return SendResult::failed(channel_id, "mock send failure");
        }
        let message_id = format!(
            "{}-{}",
            self.name,
            self.next_id.fetch_add(1, Ordering::SeqCst)
        );
        self.sent
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(SentMessage {
                message_id: message_id.clone(),
                channel: channel.map(str::to_string),
                message: message.clone(),
            });
        self.state.record_sent();
        SendResult::sent(message_id, channel_id)
    }

    async fn update(&self, message_id: &str, message: &Message) -> Result<()> {
        self.updates
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((message_id.to_string(), message.clone()));
        Ok(())
    }

    fn on_command(&self, handler: CommandCallback) {
        self.state.set_command_handler(handler);
    }

    fn on_message(&self, handler: MessageCallback) {
        self.state.set_message_handler(handler);
    }

    fn status(&self) -> AdapterHealth {
        self.state.health(&self.name)
    }
}
