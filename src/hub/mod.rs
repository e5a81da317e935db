// ABOUTME: Composition root wiring the bus, formatter, router and adapter registry together
// ABOUTME: Events fan out to every ready adapter; adapter commands route back through the router

mod handlers;
pub mod loops;

use crate::registry::{AdapterEntryStatus, AdapterRegistry};
use futures_util::FutureExt;
use loops::LoopTracker;
use relay_core::bus::{handler_fn, BusConfig, EventBus};
use relay_core::event::Event;
use relay_core::formatter::MessageFormatter;
use relay_core::message::Message;
use relay_core::metrics;
use relay_core::router::{CommandResult, CommandRouter, PermissionCheck, RouterConfig};
use relay_core::traits::{command_callback, ChatAdapter, CommandContext};
use relay_core::Permission;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Weak};
use std::time::Instant;

/// Subscriber name of the event fan-out handler
pub const BROADCASTER_NAME: &str = "hub-broadcaster";
/// Subscriber name of the loop state tracker
pub const LOOP_TRACKER_NAME: &str = "loop-tracker";
/// Source stamped on events the hub publishes itself
pub const HUB_SOURCE: &str = "agent-relay";

/// Construction-time options for [`create_messaging_hub`]
pub struct HubOptions {
    /// Stamped onto published events that carry no project
    pub project: String,
    pub bus: BusConfig,
    pub router: RouterConfig,
    /// Users granted write permission at startup. Ignored when `permission_check` is set.
    pub write_users: Vec<String>,
    /// Per-adapter configuration handed to each factory
    pub adapter_configs: HashMap<String, Value>,
    /// Registry to load from; a fresh one over the built-in bindings when unset
    pub registry: Option<Arc<AdapterRegistry>>,
    /// Replaces the router's grant-based permission check, including `write_users`
    pub permission_check: Option<PermissionCheck>,
    /// Channel broadcasts go to; each adapter's own default when unset
    pub default_channel: Option<String>,
}

impl Default for HubOptions {
    fn default() -> Self {
        Self {
            project: relay_core::formatter::UNKNOWN_PROJECT.to_string(),
            bus: BusConfig::default(),
            router: RouterConfig::default(),
            write_users: Vec::new(),
            adapter_configs: HashMap::new(),
            registry: None,
            permission_check: None,
            default_channel: None,
        }
    }
}

/// Aggregated view returned by [`MessagingHub::status`]
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HubStatus {
    pub project: String,
    pub adapters: Vec<AdapterEntryStatus>,
    pub ready_adapters: Vec<String>,
    pub commands: Vec<String>,
    pub subscribers: usize,
    pub dead_letters: usize,
    pub uptime_secs: u64,
}

/// State shared by the hub and its default command handlers
#[derive(Clone)]
pub(crate) struct HubContext {
    pub project: String,
    pub bus: EventBus,
    pub registry: Arc<AdapterRegistry>,
    pub loops: Arc<LoopTracker>,
    pub started_at: Instant,
}

impl HubContext {
    pub fn publish(&self, mut event: Event) {
        if event.project.is_none() {
            event.project = Some(self.project.clone());
        }
        self.bus.publish(event);
    }
}

/// A running messaging hub. Dropping it does not stop adapters; call [`MessagingHub::shutdown`].
pub struct MessagingHub {
    ctx: HubContext,
    router: Arc<CommandRouter>,
}

/// Load every enabled adapter and wire up the hub.
///
/// Returns `None` when no adapter loaded: messaging is simply disabled and
/// the caller carries on without it.
pub async fn create_messaging_hub(options: HubOptions) -> Option<MessagingHub> {
    let registry = options
        .registry
        .unwrap_or_else(|| Arc::new(AdapterRegistry::new()));

    let loaded = registry
        .load_enabled_adapters(&options.adapter_configs)
        .await;
    if loaded.is_empty() {
        tracing::info!("No messaging adapters loaded; hub disabled");
        return None;
    }

    let bus = EventBus::new(options.bus);
    let mut router = CommandRouter::new(options.router);
    if let Some(check) = options.permission_check {
        router = router.with_permission_check(check);
        if !options.write_users.is_empty() {
            tracing::warn!(
                write_users = options.write_users.len(),
                "write_users ignored because a custom permission check is installed"
            );
        }
    } else {
        for user in &options.write_users {
            router.grant_permission(user, Permission::Write);
        }
    }
    let router = Arc::new(router);

    let ctx = HubContext {
        project: options.project,
        bus,
        registry,
        loops: Arc::new(LoopTracker::new()),
        started_at: Instant::now(),
    };

    handlers::register_default_commands(&router, &ctx);
    subscribe_broadcaster(&ctx, options.default_channel);
    subscribe_loop_tracker(&ctx);

    let adapters = ctx.registry.ready_adapters();
    for (name, adapter) in &adapters {
        wire_commands(name, adapter, &router, &ctx.project);
    }

    tracing::info!(
        project = %ctx.project,
        adapters = %adapters.iter().map(|(n, _)| n.as_str()).collect::<Vec<_>>().join(", "),
        write_users = options.write_users.len(),
        "Messaging hub started"
    );

    Some(MessagingHub { ctx, router })
}

/// Format every event once and send it to every ready adapter concurrently
fn subscribe_broadcaster(ctx: &HubContext, default_channel: Option<String>) {
    let registry = Arc::clone(&ctx.registry);
    let formatter = MessageFormatter::default();
    let default_channel: Option<Arc<str>> = default_channel.map(Arc::from);

    let handler = handler_fn(move |event: Event| {
        let registry = Arc::clone(&registry);
        let message = formatter.format_event(&event);
        let channel = default_channel.clone();
        async move {
            let adapters = registry.ready_adapters();
            let message = &message;
            let channel = channel.as_deref();
            let sends = adapters.iter().map(|(name, adapter)| async move {
                let outcome = AssertUnwindSafe(adapter.send(message, channel))
                    .catch_unwind()
                    .await;
                match outcome {
                    Ok(result) if result.success => {
                        tracing::debug!(adapter = %name, message_id = %result.message_id, "Event delivered");
                    }
                    Ok(result) => {
                        metrics::record_send_error(name);
                        tracing::warn!(
                            adapter = %name,
                            error = %result.error.unwrap_or_default(),
                            "Adapter failed to send event"
                        );
                    }
                    Err(_) => {
                        metrics::record_send_error(name);
                        tracing::error!(adapter = %name, "Adapter panicked while sending event");
                    }
                }
            });
            futures_util::future::join_all(sends).await;
            Ok(())
        }
    });
    ctx.bus.subscribe("*", handler, Some(BROADCASTER_NAME));
}

fn subscribe_loop_tracker(ctx: &HubContext) {
    let loops = Arc::clone(&ctx.loops);
    let handler = handler_fn(move |event: Event| {
        loops.record(&event);
        async { Ok(()) }
    });
    ctx.bus.subscribe("ralph.*", handler, Some(LOOP_TRACKER_NAME));
}

/// Route an adapter's inbound commands through the router and reply in place.
///
/// The callback holds the adapter weakly; the adapter owns the callback.
fn wire_commands(
    name: &str,
    adapter: &Arc<dyn ChatAdapter>,
    router: &Arc<CommandRouter>,
    project: &str,
) {
    let weak_adapter: Weak<dyn ChatAdapter> = Arc::downgrade(adapter);
    let router = Arc::clone(router);
    let project = project.to_string();
    let adapter_name = name.to_string();

    adapter.on_command(command_callback(
        move |command: String, args: Vec<String>, ctx: CommandContext| {
            let router = Arc::clone(&router);
            let weak_adapter = weak_adapter.clone();
            let project = project.clone();
            let adapter_name = adapter_name.clone();
            async move {
                let raw = std::iter::once(command)
                    .chain(args)
                    .collect::<Vec<_>>()
                    .join(" ");
                let channel = ctx.channel_id.clone();
                let thread = ctx.thread_id.clone();
                let result = router.dispatch(&raw, ctx).await;

                let Some(adapter) = weak_adapter.upgrade() else {
                    tracing::debug!(adapter = %adapter_name, "Adapter dropped before reply");
                    return;
                };
                let mut reply = reply_message(&result).with_thread(thread);
                reply.project = project;
                let sent = adapter.send(&reply, Some(&channel)).await;
                if !sent.success {
                    metrics::record_send_error(&adapter_name);
                    tracing::warn!(
                        adapter = %adapter_name,
                        channel = %channel,
                        error = %sent.error.unwrap_or_default(),
                        "Failed to send command reply"
                    );
                }
            }
        },
    ));
}

fn reply_message(result: &CommandResult) -> Message {
    if result.success {
        Message::reply(result.display_text())
    } else {
        Message::error_reply(result.display_text())
    }
}

impl MessagingHub {
    pub fn project(&self) -> &str {
        &self.ctx.project
    }

    /// Publish an event, stamping the hub's project when the event has none
    pub fn publish(&self, event: Event) {
        self.ctx.publish(event);
    }

    /// Run a command as if it arrived from an adapter
    pub async fn dispatch(&self, raw_input: &str, ctx: CommandContext) -> CommandResult {
        self.router.dispatch(raw_input, ctx).await
    }

    pub fn router(&self) -> &Arc<CommandRouter> {
        &self.router
    }

    pub fn bus(&self) -> &EventBus {
        &self.ctx.bus
    }

    pub fn registry(&self) -> &Arc<AdapterRegistry> {
        &self.ctx.registry
    }

    pub fn loops(&self) -> &LoopTracker {
        &self.ctx.loops
    }

    pub fn status(&self) -> HubStatus {
        HubStatus {
            project: self.ctx.project.clone(),
            adapters: self.ctx.registry.registry_status(),
            ready_adapters: self
                .ctx
                .registry
                .ready_adapters()
                .into_iter()
                .map(|(name, _)| name)
                .collect(),
            commands: self.router.registered_commands(),
            subscribers: self.ctx.bus.subscriber_count(),
            dead_letters: self.ctx.bus.dead_letter_count(),
            uptime_secs: self.ctx.started_at.elapsed().as_secs(),
        }
    }

    /// Wait for every in-flight delivery, retries included
    pub async fn flush(&self) {
        self.ctx.bus.flush().await;
    }

    /// Tear down the bus and shut down every adapter.
    /// Returns the names of adapters whose shutdown failed.
    pub async fn shutdown(&self) -> Vec<String> {
        self.ctx.bus.destroy();
        let failed = self.ctx.registry.shutdown_all().await;
        tracing::info!(failed = failed.len(), "Messaging hub shut down");
        failed
    }
}
