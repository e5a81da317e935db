// ABOUTME: Lifecycle event types published onto the event bus by the toolchain.
// ABOUTME: Defines Event, Severity, well-known topics and the topic pattern matching rule.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Well-known event topics emitted by the toolchain
pub mod topics {
    pub const RALPH_STARTED: &str = "ralph.started";
    pub const RALPH_ITERATION: &str = "ralph.iteration";
    pub const RALPH_COMPLETED: &str = "ralph.completed";
    pub const RALPH_FAILED: &str = "ralph.failed";
    pub const BUILD_SUCCEEDED: &str = "build.succeeded";
    pub const BUILD_FAILED: &str = "build.failed";
    pub const SECURITY_FINDING: &str = "security.finding";
    pub const GATE_PENDING: &str = "gate.pending";
    pub const GATE_APPROVED: &str = "gate.approved";
    pub const GATE_REJECTED: &str = "gate.rejected";
}

/// How loudly an event should be presented
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    #[default]
    Info,
    Warning,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Critical => "critical",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Severity {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "info" => Ok(Self::Info),
            "warning" | "warn" => Ok(Self::Warning),
            "critical" => Ok(Self::Critical),
            other => anyhow::bail!("Unknown severity: {}", other),
        }
    }
}

/// A fact emitted by the toolchain.
///
/// Events are immutable once published. The bus stamps `timestamp` when the
/// producer leaves it empty; the hub stamps `project`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    /// Dot-delimited classification, e.g. `ralph.completed`
    pub topic: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
    /// Producer identifier
    #[serde(default)]
    pub source: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub loop_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gate_id: Option<String>,
    #[serde(default)]
    pub severity: Severity,
    /// One-line human readable summary
    #[serde(default)]
    pub summary: String,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub details: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project: Option<String>,
}

impl Event {
    pub fn new(topic: impl Into<String>, summary: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            timestamp: None,
            source: String::new(),
            loop_id: None,
            gate_id: None,
            severity: Severity::Info,
            summary: summary.into(),
            details: Map::new(),
            project: None,
        }
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = source.into();
        self
    }

    pub fn with_severity(mut self, severity: Severity) -> Self {
        self.severity = severity;
        self
    }

    pub fn with_loop(mut self, loop_id: impl Into<String>) -> Self {
        self.loop_id = Some(loop_id.into());
        self
    }

    pub fn with_gate(mut self, gate_id: impl Into<String>) -> Self {
        self.gate_id = Some(gate_id.into());
        self
    }

    pub fn with_project(mut self, project: impl Into<String>) -> Self {
        self.project = Some(project.into());
        self
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    pub fn with_detail(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.details.insert(key.into(), value.into());
        self
    }

    /// Look up a string detail
    pub fn detail_str(&self, key: &str) -> Option<&str> {
        self.details.get(key).and_then(Value::as_str)
    }

    /// Look up a detail and render it as text regardless of its JSON type
    pub fn detail_text(&self, key: &str) -> Option<String> {
        self.details.get(key).map(value_to_text)
    }
}

/// Render a JSON value as display text (strings unquoted, everything else compact JSON)
pub fn value_to_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => "null".to_string(),
        other => other.to_string(),
    }
}

/// Check whether a subscription pattern matches a topic.
///
/// Supported forms: exact equality, `*` (everything), and `prefix.*` which
/// matches any topic starting with `prefix.`. No other wildcards exist.
pub fn topic_matches(pattern: &str, topic: &str) -> bool {
    if pattern == "*" || pattern == topic {
        return true;
    }
    match pattern.strip_suffix(".*") {
        Some(prefix) => topic
            .strip_prefix(prefix)
            .is_some_and(|rest| rest.starts_with('.')),
        None => false,
    }
}
