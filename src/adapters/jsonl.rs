// ABOUTME: JSON-lines binding that appends every outbound message to a file
// ABOUTME: Gives an auditable record of what the hub sent and where

use crate::paths;
use crate::registry::{AdapterFactory, ENABLEMENT_VALUE_KEY};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use relay_core::message::Message;
use relay_core::traits::{
    AdapterHealth, AdapterState, ChatAdapter, CommandCallback, MessageCallback, SendResult,
};
use serde::Serialize;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

pub const NAME: &str = "jsonl";

const DEFAULT_CHANNEL: &str = "default";

#[derive(Serialize)]
#[serde(tag = "kind", rename_all = "lowercase", rename_all_fields = "camelCase")]
enum Record<'a> {
    Send {
        message_id: &'a str,
        channel: &'a str,
        written_at: chrono::DateTime<Utc>,
        message: &'a Message,
    },
    Update {
        message_id: &'a str,
        written_at: chrono::DateTime<Utc>,
        message: &'a Message,
    },
}

pub struct JsonlAdapter {
    path: PathBuf,
    /// Serialises appends so records never interleave
    write_lock: Mutex<()>,
    state: AdapterState,
}

impl JsonlAdapter {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
            state: AdapterState::new(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Config: `{"path": "..."}`; falls back to the RELAY_JSONL_PATH value the
    /// registry resolved, then the XDG data dir
    pub fn factory() -> AdapterFactory {
        Box::new(|config: &Value| {
            let path = ["path", ENABLEMENT_VALUE_KEY]
                .iter()
                .filter_map(|key| config.get(*key).and_then(Value::as_str))
                .map(str::trim)
                .find(|p| !p.is_empty())
                .map(PathBuf::from)
                .unwrap_or_else(paths::default_outbox_file);
            Ok(Arc::new(JsonlAdapter::new(path)) as Arc<dyn ChatAdapter>)
        })
    }

    async fn append(&self, record: &Record<'_>) -> Result<()> {
        let mut line = serde_json::to_string(record).context("Failed to serialize record")?;
        line.push('\n');

        let _guard = self.write_lock.lock().await;
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .with_context(|| format!("Failed to open {}", self.path.display()))?;
        file.write_all(line.as_bytes())
            .await
            .with_context(|| format!("Failed to write {}", self.path.display()))?;
        file.flush().await?;
        Ok(())
    }
}

#[async_trait]
impl ChatAdapter for JsonlAdapter {
    fn name(&self) -> &str {
        NAME
    }

    async fn initialize(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .with_context(|| format!("Failed to create {}", parent.display()))?;
            }
        }
        // Touch the file so permission problems surface at load time
        tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .with_context(|| format!("Failed to open {}", self.path.display()))?;
        self.state.mark_connected();
        tracing::info!(path = %self.path.display(), "JSONL adapter ready");
        Ok(())
    }

    async fn shutdown(&self) -> Result<()> {
        self.state.mark_disconnected();
        Ok(())
    }

    async fn send(&self, message: &Message, channel: Option<&str>) -> SendResult {
        let channel = channel.unwrap_or(DEFAULT_CHANNEL);
        let message_id = uuid::Uuid::new_v4().to_string();
        let record = Record::Send {
            message_id: &message_id,
            channel,
            written_at: Utc::now(),
            message,
        };
        match self.append(&record).await {
            Ok(()) => {
                self.state.record_sent();
                SendResult::sent(message_id, channel)
            }
            Err(e) => {
                let error = format!("{:#}", e);
                self.state.record_error(error.clone());
                SendResult::failed(channel, error)
            }
        }
    }

    async fn update(&self, message_id: &str, message: &Message) -> Result<()> {
        let record = Record::Update {
            message_id,
            written_at: Utc::now(),
            message,
        };
        self.append(&record).await.inspect_err(|e| {
            self.state.record_error(format!("{:#}", e));
        })
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
    async fn test_send_appends_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("out.jsonl");
        let adapter = JsonlAdapter::new(&path);
        adapter.initialize().await.unwrap();

        let first = adapter.send(&Message::reply("one"), None).await;
        let second = adapter.send(&Message::reply("two"), Some("ops")).await;
        assert!(first.success && second.success);
        adapter
            .update(&first.message_id, &Message::reply("one (edited)"))
            .await
            .unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<Value> = content
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0]["kind"], "send");
        assert_eq!(lines[0]["channel"], "default");
        assert_eq!(lines[0]["message"]["body"], "one");
        assert_eq!(lines[1]["channel"], "ops");
        assert_eq!(lines[2]["kind"], "update");
        assert_eq!(lines[2]["messageId"], json!(first.message_id));

        assert_eq!(adapter.status().messages_sent, 2);
    }

    #[tokio::test]
    async fn test_initialize_fails_for_unwritable_path() {
        let dir = tempfile::tempdir().unwrap();
        // A directory cannot be opened for appending
        let adapter = JsonlAdapter::new(dir.path());
        assert!(adapter.initialize().await.is_err());
    }

    #[tokio::test]
    async fn test_factory_prefers_config_path_over_enablement_value() {
        let dir = tempfile::tempdir().unwrap();
        let configured = dir.path().join("configured.jsonl");
        let from_env = dir.path().join("env.jsonl");
        let adapter = JsonlAdapter::factory()(&json!({
            "path": configured.to_str().unwrap(),
            ENABLEMENT_VALUE_KEY: from_env.to_str().unwrap(),
        }))
        .unwrap();
        assert_eq!(adapter.name(), "jsonl");
        adapter.initialize().await.unwrap();
        assert!(configured.exists());
        assert!(!from_env.exists());
    }
}
