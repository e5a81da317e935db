// ABOUTME: Tracks the latest state of each long-running loop from ralph.* events
// ABOUTME: Backs the ralph-status command

use chrono::{DateTime, Utc};
use relay_core::event::{topics, Event};
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::sync::Mutex;

/// Oldest loops are forgotten beyond this many
const MAX_TRACKED_LOOPS: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LoopPhase {
    Running,
    Completed,
    Failed,
}

impl fmt::Display for LoopPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Running => f.write_str("🔄 running"),
            Self::Completed => f.write_str("✅ completed"),
            Self::Failed => f.write_str("❌ failed"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoopState {
    pub loop_id: String,
    pub phase: LoopPhase,
    pub last_topic: String,
    pub summary: String,
    pub iteration: Option<u64>,
    pub project: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl LoopState {
    pub fn describe(&self) -> String {
        let mut line = format!("{}: {}", self.loop_id, self.phase);
        if let Some(iteration) = self.iteration {
            line.push_str(&format!(", iteration {}", iteration));
        }
        if !self.summary.is_empty() {
            line.push_str(&format!(" - {}", self.summary));
        }
        line
    }
}

#[derive(Debug, Default)]
pub struct LoopTracker {
    loops: Mutex<HashMap<String, LoopState>>,
}

impl LoopTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one event into the tracked state. Events without a loop id are ignored.
    pub fn record(&self, event: &Event) {
        let Some(loop_id) = event.loop_id.as_deref() else {
            return;
        };
        let phase = match event.topic.as_str() {
            topics::RALPH_COMPLETED => LoopPhase::Completed,
            topics::RALPH_FAILED => LoopPhase::Failed,
            _ => LoopPhase::Running,
        };
        let iteration = event
            .details
            .get("iteration")
            .or_else(|| event.details.get("iterations"))
            .and_then(|v| v.as_u64());

        let mut loops = self.loops.lock().unwrap_or_else(|e| e.into_inner());
        let previous_iteration = loops.get(loop_id).and_then(|s| s.iteration);
        loops.insert(
            loop_id.to_string(),
            LoopState {
                loop_id: loop_id.to_string(),
                phase,
                last_topic: event.topic.clone(),
                summary: event.summary.clone(),
                iteration: iteration.or(previous_iteration),
                project: event.project.clone(),
                updated_at: event.timestamp.unwrap_or_else(Utc::now),
            },
        );

        if loops.len() > MAX_TRACKED_LOOPS {
            let oldest = loops
                .values()
                .min_by_key(|s| s.updated_at)
                .map(|s| s.loop_id.clone());
            if let Some(oldest) = oldest {
                loops.remove(&oldest);
            }
        }
    }

    pub fn get(&self, loop_id: &str) -> Option<LoopState> {
        self.loops
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(loop_id)
            .cloned()
    }

    /// All tracked loops, most recently updated first
    pub fn snapshot(&self) -> Vec<LoopState> {
        let mut loops: Vec<LoopState> = self
            .loops
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .cloned()
            .collect();
        loops.sort_by(|a, b| {
            b.updated_at
                .cmp(&a.updated_at)
                .then_with(|| a.loop_id.cmp(&b.loop_id))
        });
        loops
    }
}
