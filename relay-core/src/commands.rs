// ABOUTME: Static command table and inbound command parsing
// ABOUTME: Platform-agnostic /command handling shared by every adapter

use serde::Serialize;
use std::fmt;

/// Permission a user needs to run a command
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Permission {
    Read,
    Write,
}

impl Permission {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Read => "read",
            Self::Write => "write",
        }
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Permission {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "read" => Ok(Self::Read),
            "write" => Ok(Self::Write),
            other => anyhow::bail!("Unknown permission: {}", other),
        }
    }
}

/// Static definition of a chat command
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CommandDef {
    pub name: &'static str,
    pub permission: Permission,
    pub description: &'static str,
}

/// Every command the router accepts
pub const COMMANDS: &[CommandDef] = &[
    CommandDef {
        name: "status",
        permission: Permission::Read,
        description: "Show hub status: adapters, subscribers, dead letters",
    },
    CommandDef {
        name: "ralph-status",
        permission: Permission::Read,
        description: "Show the latest state of running loops",
    },
    CommandDef {
        name: "approve",
        permission: Permission::Write,
        description: "Approve a pending gate: approve <gateId> [reason]",
    },
    CommandDef {
        name: "reject",
        permission: Permission::Write,
        description: "Reject a pending gate: reject <gateId> [reason]",
    },
    CommandDef {
        name: "health",
        permission: Permission::Read,
        description: "Show per-adapter connection health",
    },
    CommandDef {
        name: "help",
        permission: Permission::Read,
        description: "List available commands",
    },
    CommandDef {
        name: "ask",
        permission: Permission::Read,
        description: "Ask the toolchain a question",
    },
];

pub fn find_command(name: &str) -> Option<&'static CommandDef> {
    COMMANDS.iter().find(|c| c.name == name)
}

pub fn command_names() -> Vec<&'static str> {
    COMMANDS.iter().map(|c| c.name).collect()
}

/// A command split into its name and arguments
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedCommand {
    /// Lower-cased command name, without the leading slash
    pub name: String,
    pub args: Vec<String>,
}

impl ParsedCommand {
    /// Get the first argument if present
    pub fn first_arg(&self) -> Option<&str> {
        self.args.first().map(|s| s.as_str())
    }
}

/// Parse raw command text such as `/approve g1 looks good`.
///
/// Strips one optional leading `/`, splits on whitespace and lower-cases the
/// command name. Arguments keep their case. Returns None for empty input.
pub fn parse_command(raw: &str) -> Option<ParsedCommand> {
    let trimmed = raw.trim();
    let without_slash = trimmed.strip_prefix('/').unwrap_or(trimmed);
    let mut parts = without_slash.split_whitespace();
    let name = parts.next()?.to_lowercase();
    Some(ParsedCommand {
        name,
        args: parts.map(str::to_string).collect(),
    })
}
