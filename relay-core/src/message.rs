// ABOUTME: Platform-neutral message rendering of an event
// ABOUTME: Adapters turn a Message into their own blocks, embeds or plain text

use crate::event::Severity;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A labelled value shown alongside the message body
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Field {
    pub label: String,
    pub value: String,
    #[serde(default)]
    pub inline: bool,
}

impl Field {
    pub fn new(label: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            value: value.into(),
            inline: false,
        }
    }

    pub fn inline(label: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            value: value.into(),
            inline: true,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionStyle {
    Primary,
    Danger,
    #[default]
    Secondary,
}

/// An interactive button. The id is what the platform sends back when clicked.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Action {
    pub id: String,
    pub label: String,
    #[serde(default)]
    pub style: ActionStyle,
}

impl Action {
    pub fn new(id: impl Into<String>, label: impl Into<String>, style: ActionStyle) -> Self {
        Self {
            id: id.into(),
            label: label.into(),
            style,
        }
    }
}

/// Platform-neutral message. Derived from an event and never mutated after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub title: String,
    pub body: String,
    pub severity: Severity,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub fields: Vec<Field>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub actions: Vec<Action>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thread_id: Option<String>,
    pub project: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code_block: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub link_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub link_text: Option<String>,
}

impl Message {
    /// Plain reply to a command
    pub fn reply(text: impl Into<String>) -> Self {
        Self {
            title: String::new(),
            body: text.into(),
            severity: Severity::Info,
            fields: Vec::new(),
            actions: Vec::new(),
            thread_id: None,
            project: String::new(),
            timestamp: Utc::now(),
            code_block: None,
            link_url: None,
            link_text: None,
        }
    }

    /// Reply to a command that failed
    pub fn error_reply(text: impl Into<String>) -> Self {
        Self {
            severity: Severity::Warning,
            ..Self::reply(text)
        }
    }

    /// Accent colour for platforms that render one, derived from severity
    pub fn color(&self) -> u32 {
        crate::formatter::severity_color(self.severity)
    }

    pub fn with_thread(mut self, thread_id: Option<String>) -> Self {
        self.thread_id = thread_id;
        self
    }

    /// Render as plain text for platforms without rich formatting
    pub fn to_plain_text(&self) -> String {
        let mut out = String::new();
        if !self.title.is_empty() {
            out.push_str(&self.title);
            out.push('\n');
        }
        out.push_str(&self.body);

        for field in &self.fields {
            out.push_str(&format!("\n{}: {}", field.label, field.value));
        }

        if let Some(code) = &self.code_block {
            out.push_str("\n```\n");
            out.push_str(code);
            if !code.ends_with('\n') {
                out.push('\n');
            }
            out.push_str("```");
        }

        if let Some(url) = &self.link_url {
            match &self.link_text {
                Some(text) => out.push_str(&format!("\n{}: {}", text, url)),
                None => out.push_str(&format!("\n{}", url)),
            }
        }

        if !self.actions.is_empty() {
            let labels: Vec<String> = self
                .actions
                .iter()
                .map(|a| format!("[{}]", a.label))
                .collect();
            out.push_str(&format!("\n{}", labels.join(" ")));
        }

        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reply_is_plain() {
        let msg = Message::reply("hello");
        assert_eq!(msg.to_plain_text(), "hello");
        assert_eq!(msg.severity, Severity::Info);
    }

    #[test]
    fn test_error_reply_is_warning() {
        let msg = Message::error_reply("nope");
        assert_eq!(msg.severity, Severity::Warning);
        assert_eq!(msg.body, "nope");
        assert_eq!(msg.color(), 0xF39C12);
    }

    #[test]
    fn test_plain_text_includes_everything() {
        let mut msg = Message::reply("Loop failed");
        msg.title = "🚨 ralph.failed".to_string();
        msg.fields.push(Field::inline("Iteration", "4"));
        msg.code_block = Some("panic at line 3".to_string());
        msg.link_url = Some("https://ci.example/run/1".to_string());
        msg.link_text = Some("CI run".to_string());
        msg.actions
            .push(Action::new("approve:g1", "Approve", ActionStyle::Primary));

        let text = msg.to_plain_text();
        assert!(text.starts_with("🚨 ralph.failed\nLoop failed"));
        assert!(text.contains("Iteration: 4"));
        assert!(text.contains("```\npanic at line 3\n```"));
        assert!(text.contains("CI run: https://ci.example/run/1"));
        assert!(text.ends_with("[Approve]"));
    }

    #[test]
    fn test_serializes_camel_case() {
        let mut msg = Message::reply("x");
        msg.thread_id = Some("loop-1".to_string());
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["threadId"], "loop-1");
        assert!(json.get("fields").is_none());
    }
}
