// ABOUTME: Built-in platform bindings shipped with agent-relay
// ABOUTME: Console and JSON-lines bindings; SDK-backed platforms register themselves at runtime

pub mod console;
pub mod jsonl;

pub use console::ConsoleAdapter;
pub use jsonl::JsonlAdapter;

use crate::registry::KnownAdapter;

/// Enables the console binding when set
pub const CONSOLE_ENV: &str = "RELAY_CONSOLE";
/// Enables the jsonl binding and names its output file
pub const JSONL_ENV: &str = "RELAY_JSONL_PATH";

/// The static binding table every registry starts from
pub fn builtin_adapters() -> Vec<KnownAdapter> {
    vec![
        KnownAdapter {
            name: console::NAME,
            env_key: CONSOLE_ENV,
            factory: ConsoleAdapter::factory,
        },
        KnownAdapter {
            name: jsonl::NAME,
            env_key: JSONL_ENV,
            factory: JsonlAdapter::factory,
        },
    ]
}
