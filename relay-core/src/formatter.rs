// ABOUTME: Pure transformation from toolchain events to platform-neutral messages
// ABOUTME: Per-topic formatters with a generic severity-driven fallback

use crate::event::{topics, value_to_text, Event, Severity};
use crate::message::{Action, ActionStyle, Field, Message};
use chrono::Utc;
use std::collections::HashMap;
use std::sync::OnceLock;

/// Formats one event into a message
pub type FormatFn = fn(&Event) -> Message;

/// Project label used when an event carries none
pub const UNKNOWN_PROJECT: &str = "unknown";

/// Values at most this long are rendered as inline fields
const INLINE_FIELD_MAX: usize = 40;

/// Display color for a severity (RGB). Adapters apply it at render time via [`Message::color`].
pub fn severity_color(severity: Severity) -> u32 {
    match severity {
        Severity::Info => 0x3498DB,
        Severity::Warning => 0xF39C12,
        Severity::Critical => 0xE74C3C,
    }
}

pub fn severity_emoji(severity: Severity) -> &'static str {
    match severity {
        Severity::Info => "ℹ️",
        Severity::Warning => "⚠️",
        Severity::Critical => "🚨",
    }
}

/// Dispatches events to per-topic formatting functions.
#[derive(Clone)]
pub struct MessageFormatter {
    formatters: HashMap<String, FormatFn>,
}

impl MessageFormatter {
    /// A formatter with no topic-specific formatting; everything goes through the generic path
    pub fn empty() -> Self {
        Self {
            formatters: HashMap::new(),
        }
    }

    /// Register (or replace) the formatter for an exact topic
    pub fn register(mut self, topic: &str, format: FormatFn) -> Self {
        self.formatters.insert(topic.to_string(), format);
        self
    }

    pub fn has_formatter(&self, topic: &str) -> bool {
        self.formatters.contains_key(topic)
    }

    pub fn format_event(&self, event: &Event) -> Message {
        match self.formatters.get(&event.topic) {
            Some(format) => format(event),
            None => format_generic(event),
        }
    }
}

impl Default for MessageFormatter {
    fn default() -> Self {
        Self::empty()
            .register(topics::RALPH_STARTED, format_loop_started)
            .register(topics::RALPH_ITERATION, format_loop_iteration)
            .register(topics::RALPH_COMPLETED, format_loop_completed)
            .register(topics::RALPH_FAILED, format_loop_failed)
            .register(topics::BUILD_SUCCEEDED, format_build)
            .register(topics::BUILD_FAILED, format_build)
            .register(topics::SECURITY_FINDING, format_security_finding)
            .register(topics::GATE_PENDING, format_gate_pending)
            .register(topics::GATE_APPROVED, format_gate_decision)
            .register(topics::GATE_REJECTED, format_gate_decision)
    }
}

/// Format with the default topic table
pub fn format_event(event: &Event) -> Message {
    static DEFAULT: OnceLock<MessageFormatter> = OnceLock::new();
    DEFAULT.get_or_init(MessageFormatter::default).format_event(event)
}

/// Fallback: severity emoji title, summary body, every detail flattened into a field
pub fn format_generic(event: &Event) -> Message {
    let title = format!("{} {}", severity_emoji(event.severity), event.topic);
    let mut msg = base_message(event, title);
    msg.fields = event
        .details
        .iter()
        .map(|(key, value)| {
            let text = value_to_text(value);
            Field {
                label: key.clone(),
                inline: text.chars().count() <= INLINE_FIELD_MAX,
                value: text,
            }
        })
        .collect();
    msg
}

fn base_message(event: &Event, title: String) -> Message {
    Message {
        title,
        body: event.summary.clone(),
        severity: event.severity,
        fields: Vec::new(),
        actions: Vec::new(),
        thread_id: event.loop_id.clone().or_else(|| event.gate_id.clone()),
        project: event
            .project
            .clone()
            .unwrap_or_else(|| UNKNOWN_PROJECT.to_string()),
        timestamp: event.timestamp.unwrap_or_else(Utc::now),
        code_block: None,
        link_url: event.detail_str("url").map(str::to_string),
        link_text: event.detail_str("urlText").map(str::to_string),
    }
}

/// Push an inline field for a detail if present
fn push_detail(fields: &mut Vec<Field>, event: &Event, key: &str, label: &str) {
    if let Some(text) = event.detail_text(key) {
        fields.push(Field::inline(label, text));
    }
}

fn push_loop_field(fields: &mut Vec<Field>, event: &Event) {
    if let Some(loop_id) = &event.loop_id {
        fields.push(Field::inline("Loop", loop_id.clone()));
    }
}

/// Render a millisecond duration as "1h 2m 3s"
pub fn format_duration_ms(ms: u64) -> String {
    let total_secs = ms / 1000;
    let hours = total_secs / 3600;
    let minutes = (total_secs % 3600) / 60;
    let seconds = total_secs % 60;
    if hours > 0 {
        format!("{}h {}m {}s", hours, minutes, seconds)
    } else if minutes > 0 {
        format!("{}m {}s", minutes, seconds)
    } else if total_secs > 0 {
        format!("{}s", seconds)
    } else {
        format!("{}ms", ms)
    }
}

fn push_duration(fields: &mut Vec<Field>, event: &Event) {
    if let Some(ms) = event.details.get("durationMs").and_then(|v| v.as_u64()) {
        fields.push(Field::inline("Duration", format_duration_ms(ms)));
    }
}

fn format_loop_started(event: &Event) -> Message {
    let mut msg = base_message(event, "🚀 Loop started".to_string());
    push_loop_field(&mut msg.fields, event);
    push_detail(&mut msg.fields, event, "task", "Task");
    push_detail(&mut msg.fields, event, "maxIterations", "Max iterations");
    msg
}

fn format_loop_iteration(event: &Event) -> Message {
    let mut msg = base_message(event, "🔄 Loop iteration".to_string());
    push_loop_field(&mut msg.fields, event);
    push_detail(&mut msg.fields, event, "iteration", "Iteration");
    push_detail(&mut msg.fields, event, "maxIterations", "Max iterations");
    msg
}

fn format_loop_completed(event: &Event) -> Message {
    let mut msg = base_message(event, "✅ Loop completed".to_string());
    push_loop_field(&mut msg.fields, event);
    push_detail(&mut msg.fields, event, "iterations", "Iterations");
    push_duration(&mut msg.fields, event);
    msg
}

fn format_loop_failed(event: &Event) -> Message {
    let mut msg = base_message(event, "❌ Loop failed".to_string());
    push_loop_field(&mut msg.fields, event);
    push_detail(&mut msg.fields, event, "iteration", "Iteration");
    push_duration(&mut msg.fields, event);
    msg.code_block = event.detail_text("error");
    msg
}

fn format_build(event: &Event) -> Message {
    let passed = event.topic == topics::BUILD_SUCCEEDED;
    let title = if passed {
        "✅ Build passed"
    } else {
        "❌ Build failed"
    };
    let mut msg = base_message(event, title.to_string());
    push_detail(&mut msg.fields, event, "target", "Target");
    push_detail(&mut msg.fields, event, "branch", "Branch");
    push_detail(&mut msg.fields, event, "commit", "Commit");
    push_duration(&mut msg.fields, event);
    if !passed {
        msg.code_block = event.detail_text("output");
    }
    msg
}

fn format_security_finding(event: &Event) -> Message {
    let title = format!("{} Security finding", severity_emoji(event.severity));
    let mut msg = base_message(event, title);
    push_detail(&mut msg.fields, event, "rule", "Rule");
    if let Some(file) = event.detail_text("file") {
        let location = match event.detail_text("line") {
            Some(line) => format!("{}:{}", file, line),
            None => file,
        };
        msg.fields.push(Field::new("Location", location));
    }
    msg.code_block = event.detail_text("snippet");
    msg
}

fn format_gate_pending(event: &Event) -> Message {
    let mut msg = base_message(event, "⏸️ Approval required".to_string());
    if let Some(gate_id) = &event.gate_id {
        msg.fields.push(Field::inline("Gate", gate_id.clone()));
        msg.actions = vec![
            Action::new(
                format!("approve:{}", gate_id),
                "Approve",
                ActionStyle::Primary,
            ),
            Action::new(format!("reject:{}", gate_id), "Reject", ActionStyle::Danger),
        ];
    }
    push_loop_field(&mut msg.fields, event);
    msg
}

fn format_gate_decision(event: &Event) -> Message {
    let title = if event.topic == topics::GATE_APPROVED {
        "👍 Gate approved"
    } else {
        "👎 Gate rejected"
    };
    let mut msg = base_message(event, title.to_string());
    if let Some(gate_id) = &event.gate_id {
        msg.fields.push(Field::inline("Gate", gate_id.clone()));
    }
    push_detail(&mut msg.fields, event, "user", "By");
    push_detail(&mut msg.fields, event, "reason", "Reason");
    msg
}
