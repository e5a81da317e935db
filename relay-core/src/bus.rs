// ABOUTME: Topic-pattern publish/subscribe with per-handler retry and dead-lettering
// ABOUTME: Publish is fire-and-forget; failures are recoverable only via the dead-letter queue

use crate::event::{topic_matches, Event};
use crate::metrics;
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_util::stream::FuturesUnordered;
use futures_util::{FutureExt, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

// =============================================================================
// Configuration
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BusConfig {
    /// Total delivery attempts per handler per event
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Capacity of the dead-letter queue (oldest evicted first)
    #[serde(default = "default_max_dead_letters")]
    pub max_dead_letters: usize,
    /// Delay after failed attempt n is `n * retry_base_delay_ms`
    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,
}

fn default_max_retries() -> u32 {
    3
}

fn default_max_dead_letters() -> usize {
    100
}

fn default_retry_base_delay_ms() -> u64 {
    100
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            max_dead_letters: default_max_dead_letters(),
            retry_base_delay_ms: default_retry_base_delay_ms(),
        }
    }
}

impl BusConfig {
    fn retry_delay(&self, attempt: u32) -> Duration {
        Duration::from_millis(self.retry_base_delay_ms.saturating_mul(u64::from(attempt)))
    }
}

// =============================================================================
// Handlers
// =============================================================================

/// A bus subscriber. Returning an error triggers the retry loop.
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, event: &Event) -> Result<()>;
}

struct FnHandler<F>(F);

#[async_trait]
impl<F, Fut> EventHandler for FnHandler<F>
where
    F: Fn(Event) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    async fn handle(&self, event: &Event) -> Result<()> {
        (self.0)(event.clone()).await
    }
}

/// Wrap an async closure as an [`EventHandler`]
pub fn handler_fn<F, Fut>(f: F) -> Arc<dyn EventHandler>
where
    F: Fn(Event) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    Arc::new(FnHandler(f))
}

// =============================================================================
// Bus state
// =============================================================================

/// Identifier returned by [`EventBus::subscribe`]
pub type SubscriptionId = u64;

#[derive(Clone)]
struct Subscription {
    id: SubscriptionId,
    pattern: String,
    name: String,
    handler: Arc<dyn EventHandler>,
}

/// Record of an event whose handler exhausted its retry budget
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeadLetterEntry {
    pub event: Event,
    pub error: String,
    pub handler_name: String,
    pub timestamp: DateTime<Utc>,
}

/// Summary of one registered subscription
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubscriptionInfo {
    pub id: SubscriptionId,
    pub pattern: String,
    pub name: String,
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

struct BusInner {
    config: BusConfig,
    subscriptions: RwLock<Vec<Subscription>>,
    dead_letters: Mutex<VecDeque<DeadLetterEntry>>,
    next_id: AtomicU64,
    tracker: TaskTracker,
    cancel: Mutex<CancellationToken>,
}

impl BusInner {
    async fn deliver(&self, sub: Subscription, event: Arc<Event>, cancel: CancellationToken) {
        let attempts = self.config.max_retries.max(1);
        let mut last_error = String::new();

        for attempt in 1..=attempts {
            let outcome = AssertUnwindSafe(sub.handler.handle(&event))
                .catch_unwind()
                .await
                .unwrap_or_else(|_| Err(anyhow!("handler panicked")));

            match outcome {
                Ok(()) => {
                    if attempt > 1 {
                        tracing::debug!(
                            handler = %sub.name,
                            topic = %event.topic,
                            attempt,
                            "Handler succeeded after retry"
                        );
                    }
                    return;
                }
                Err(e) => {
                    last_error = format!("{:#}", e);
                    if attempt < attempts {
                        let delay = self.config.retry_delay(attempt);
                        tracing::warn!(
                            handler = %sub.name,
                            topic = %event.topic,
                            attempt,
                            max_attempts = attempts,
                            delay_ms = delay.as_millis() as u64,
                            error = %last_error,
                            "Handler failed, retrying"
                        );
                        metrics::record_delivery_retry(&sub.name);
                        tokio::select! {
                            _ = cancel.cancelled() => {
                                tracing::debug!(handler = %sub.name, "Delivery cancelled by bus teardown");
                                return;
                            }
                            _ = tokio::time::sleep(delay) => {}
                        }
                    }
                }
            }
        }

        if cancel.is_cancelled() {
            return;
        }

        tracing::error!(
            handler = %sub.name,
            topic = %event.topic,
            attempts,
            error = %last_error,
            "Handler exhausted retries, event dead-lettered"
        );
        metrics::record_dead_letter(&sub.name);
        self.push_dead_letter(DeadLetterEntry {
            event: (*event).clone(),
            error: last_error,
            handler_name: sub.name,
            timestamp: Utc::now(),
        });
    }

    fn push_dead_letter(&self, entry: DeadLetterEntry) {
        let mut queue = lock(&self.dead_letters);
        queue.push_back(entry);
        while queue.len() > self.config.max_dead_letters {
            queue.pop_front();
        }
    }
}

/// In-process event bus.
///
/// Cloning is cheap and every clone shares the same subscriptions and
/// dead-letter queue.
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

impl EventBus {
    pub fn new(config: BusConfig) -> Self {
        Self {
            inner: Arc::new(BusInner {
                config,
                subscriptions: RwLock::new(Vec::new()),
                dead_letters: Mutex::new(VecDeque::new()),
                next_id: AtomicU64::new(1),
                tracker: TaskTracker::new(),
                cancel: Mutex::new(CancellationToken::new()),
            }),
        }
    }

    pub fn config(&self) -> &BusConfig {
        &self.inner.config
    }

    /// Register a handler for a pattern: an exact topic, `prefix.*`, or `*`.
    ///
    /// Unnamed handlers are called `handler-<id>` in logs and dead letters.
    pub fn subscribe(
        &self,
        pattern: &str,
        handler: Arc<dyn EventHandler>,
        name: Option<&str>,
    ) -> SubscriptionId {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let name = name
            .map(str::to_string)
            .unwrap_or_else(|| format!("handler-{}", id));
        tracing::debug!(pattern = %pattern, handler = %name, "Subscribed");
        self.inner
            .subscriptions
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push(Subscription {
                id,
                pattern: pattern.to_string(),
                name,
                handler,
            });
        id
    }

    /// Remove every handler registered under exactly this pattern string.
    /// Returns how many were removed.
    pub fn unsubscribe(&self, pattern: &str) -> usize {
        let mut subs = self
            .inner
            .subscriptions
            .write()
            .unwrap_or_else(|e| e.into_inner());
        let before = subs.len();
        subs.retain(|s| s.pattern != pattern);
        let removed = before - subs.len();
        tracing::debug!(pattern = %pattern, removed, "Unsubscribed");
        removed
    }

    /// Deliver an event to every matching handler.
    ///
    /// Stamps a missing timestamp, then spawns a single delivery task that
    /// invokes the matching handlers in registration order, and returns
    /// without waiting. Handler
    /// errors never reach the caller. Must be called from within a tokio runtime;
    /// outside one the event is dropped with a warning.
    pub fn publish(&self, mut event: Event) {
        if event.timestamp.is_none() {
            event.timestamp = Some(Utc::now());
        }
        metrics::record_event_published(&event.topic);

        let matching: Vec<Subscription> = self
            .inner
            .subscriptions
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter(|s| topic_matches(&s.pattern, &event.topic))
            .cloned()
            .collect();

        tracing::debug!(
            topic = %event.topic,
            subscribers = matching.len(),
            "Publishing event"
        );
        if matching.is_empty() {
            return;
        }

        let runtime = match tokio::runtime::Handle::try_current() {
            Ok(handle) => handle,
            Err(_) => {
                tracing::warn!(topic = %event.topic, "publish called outside a tokio runtime, event dropped");
                return;
            }
        };

        let event = Arc::new(event);
        let cancel = lock(&self.inner.cancel).clone();
        let inner = Arc::clone(&self.inner);
        // One task per publish; FuturesUnordered polls newly pushed futures in
        // push order, so handlers start in registration order while their
        // retry loops still run independently.
        self.inner.tracker.spawn_on(
            async move {
                let mut deliveries: FuturesUnordered<_> = matching
                    .into_iter()
                    .map(|sub| inner.deliver(sub, Arc::clone(&event), cancel.clone()))
                    .collect();
                while deliveries.next().await.is_some() {}
            },
            &runtime,
        );
    }

    /// Wait until every delivery started so far has finished (including retries)
    pub async fn flush(&self) {
        self.inner.tracker.close();
        self.inner.tracker.wait().await;
        self.inner.tracker.reopen();
    }

    pub fn dead_letters(&self) -> Vec<DeadLetterEntry> {
        lock(&self.inner.dead_letters).iter().cloned().collect()
    }

    pub fn dead_letter_count(&self) -> usize {
        lock(&self.inner.dead_letters).len()
    }

    pub fn clear_dead_letters(&self) {
        lock(&self.inner.dead_letters).clear();
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner
            .subscriptions
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }

    pub fn subscriptions(&self) -> Vec<SubscriptionInfo> {
        self.inner
            .subscriptions
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .map(|s| SubscriptionInfo {
                id: s.id,
                pattern: s.pattern.clone(),
                name: s.name.clone(),
            })
            .collect()
    }

    /// Drop all subscriptions and dead letters and stop in-flight retry loops
    pub fn destroy(&self) {
        self.inner
            .subscriptions
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
        self.clear_dead_letters();
        let mut cancel = lock(&self.inner.cancel);
        cancel.cancel();
        *cancel = CancellationToken::new();
        tracing::debug!("Event bus destroyed");
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(BusConfig::default())
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("config", &self.inner.config)
            .field("subscribers", &self.subscriber_count())
            .field("dead_letters", &self.dead_letter_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = BusConfig::default();
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.max_dead_letters, 100);
        assert_eq!(config.retry_delay(1), Duration::from_millis(100));
        assert_eq!(config.retry_delay(2), Duration::from_millis(200));
    }

    #[test]
    fn test_config_deserializes_with_defaults() {
        let config: BusConfig = serde_json::from_str(r#"{"max_retries": 5}"#).unwrap();
        assert_eq!(config.max_retries, 5);
        assert_eq!(config.max_dead_letters, 100);
    }

    #[test]
    fn test_dead_letter_queue_is_bounded() {
        let bus = EventBus::new(BusConfig {
            max_dead_letters: 2,
            ..Default::default()
        });
        for i in 0..3 {
            bus.inner.push_dead_letter(DeadLetterEntry {
                event: Event::new("t", format!("event {}", i)),
                error: "boom".into(),
                handler_name: "h".into(),
                timestamp: Utc::now(),
            });
        }
        let letters = bus.dead_letters();
        assert_eq!(letters.len(), 2);
        assert_eq!(letters[0].event.summary, "event 1");
        assert_eq!(letters[1].event.summary, "event 2");
    }

    #[test]
    fn test_unnamed_handler_gets_generated_name() {
        let bus = EventBus::default();
        let id = bus.subscribe("*", handler_fn(|_e| async { Ok(()) }), None);
        let subs = bus.subscriptions();
        assert_eq!(subs[0].name, format!("handler-{}", id));
    }

    #[test]
    fn test_publish_outside_runtime_is_dropped() {
        let bus = EventBus::default();
        bus.subscribe("*", handler_fn(|_e| async { Ok(()) }), Some("noop"));
        bus.publish(Event::new("ralph.started", "no runtime"));
        assert_eq!(bus.dead_letter_count(), 0);
    }
}
