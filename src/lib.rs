// ABOUTME: Root library module exposing the hub, adapter registry and configuration
// ABOUTME: The platform-agnostic messaging core lives in relay-core and is re-exported here

pub mod adapters;
pub mod config;
pub mod hub;
pub mod paths;
pub mod registry;

// Re-export relay-core modules and types
pub use relay_core::{bus, commands, event, formatter, message, metrics, router, testing, traits};
pub use relay_core::{
    ChatAdapter, CommandContext, CommandResult, Event, EventBus, Message, Permission, Severity,
};

pub use hub::{create_messaging_hub, HubOptions, HubStatus, MessagingHub};
pub use registry::{AdapterRegistry, AdapterStatus, EnvCheck};
