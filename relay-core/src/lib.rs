// ABOUTME: Platform-agnostic messaging core for agent-relay
// ABOUTME: Event bus, command router, message formatter and the adapter capability contract

pub mod bus;
pub mod commands;
pub mod event;
pub mod formatter;
pub mod message;
pub mod metrics;
pub mod router;
pub mod testing;
pub mod traits;

pub use bus::{handler_fn, BusConfig, DeadLetterEntry, EventBus, EventHandler, SubscriptionId};
pub use commands::{parse_command, CommandDef, ParsedCommand, Permission, COMMANDS};
pub use event::{topic_matches, topics, Event, Severity};
pub use formatter::{format_event, MessageFormatter};
pub use message::{Action, ActionStyle, Field, Message};
pub use router::{
    command_fn, CommandHandler, CommandResult, CommandRouter, DispatchError, PermissionCheck,
    RouterConfig,
};

// Re-export the adapter contract for convenient access
pub use traits::{
    command_callback, message_callback, AdapterHealth, AdapterState, ChatAdapter,
    CommandCallback, CommandContext, MessageCallback, SendResult,
};
