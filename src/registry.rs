// ABOUTME: Registry of known platform bindings with lazy loading and lifecycle tracking
// ABOUTME: Bindings register factories; only enabled ones are constructed and initialized

use anyhow::{anyhow, bail, Result};
use futures_util::FutureExt;
use relay_core::metrics;
use relay_core::traits::{AdapterHealth, ChatAdapter};
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex};

/// Config key under which a factory receives the value that enabled its binding
pub const ENABLEMENT_VALUE_KEY: &str = "env_value";

/// Factory function that creates a binding from its config
pub type AdapterFactory = Box<dyn Fn(&Value) -> Result<Arc<dyn ChatAdapter>> + Send + Sync>;

/// Source of configuration values used by enablement checks
pub type EnvLookup = Arc<dyn Fn(&str) -> Option<String> + Send + Sync>;

/// Enablement predicate: a designated configuration value (environment
/// variable by default) whose presence means the binding should be loaded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvCheck {
    pub key: String,
}

impl EnvCheck {
    pub fn var(key: impl Into<String>) -> Self {
        Self { key: key.into() }
    }

    /// The non-blank enablement value, if set
    pub fn value(&self, lookup: &EnvLookup) -> Option<String> {
        lookup(&self.key).filter(|v| !v.trim().is_empty())
    }

    pub fn is_enabled(&self, lookup: &EnvLookup) -> bool {
        self.value(lookup).is_some()
    }
}

/// Lifecycle state of one registered binding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AdapterStatus {
    Pending,
    Loading,
    Ready,
    Error,
    Shutdown,
}

impl fmt::Display for AdapterStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Loading => "loading",
            Self::Ready => "ready",
            Self::Error => "error",
            Self::Shutdown => "shutdown",
        };
        f.write_str(s)
    }
}

/// The instance lives only in `Ready`, so "instance iff ready" cannot be violated.
enum AdapterSlot {
    Pending,
    Loading,
    Ready(Arc<dyn ChatAdapter>),
    Error(String),
    Shutdown,
}

impl AdapterSlot {
    fn status(&self) -> AdapterStatus {
        match self {
            Self::Pending => AdapterStatus::Pending,
            Self::Loading => AdapterStatus::Loading,
            Self::Ready(_) => AdapterStatus::Ready,
            Self::Error(_) => AdapterStatus::Error,
            Self::Shutdown => AdapterStatus::Shutdown,
        }
    }
}

struct AdapterEntry {
    env_check: EnvCheck,
    factory: Arc<AdapterFactory>,
    slot: AdapterSlot,
}

/// Read-only view of one registry entry
#[derive(Debug, Clone, Serialize)]
pub struct AdapterEntryStatus {
    pub name: String,
    pub env_key: String,
    pub status: AdapterStatus,
    pub error: Option<String>,
    pub health: Option<AdapterHealth>,
}

/// A binding known to the registry before any custom registration
pub struct KnownAdapter {
    pub name: &'static str,
    pub env_key: &'static str,
    pub factory: fn() -> AdapterFactory,
}

/// Tracks every known platform binding and its lifecycle.
///
/// Owned by the composition root; there is no process-wide instance.
pub struct AdapterRegistry {
    entries: Mutex<HashMap<String, AdapterEntry>>,
    /// Registration order, so discovery and status output are stable
    order: Mutex<Vec<String>>,
    known: Vec<KnownAdapter>,
    env: EnvLookup,
}

impl AdapterRegistry {
    /// Registry pre-populated with the built-in bindings, reading the process environment
    pub fn new() -> Self {
        Self::with_known(crate::adapters::builtin_adapters())
    }

    /// Registry with a custom static binding table
    pub fn with_known(known: Vec<KnownAdapter>) -> Self {
        let registry = Self {
            entries: Mutex::new(HashMap::new()),
            order: Mutex::new(Vec::new()),
            known,
            env: Arc::new(|key: &str| std::env::var(key).ok()),
        };
        registry.initialize_registry();
        registry
    }

    /// Replace the configuration lookup used by enablement checks
    pub fn with_env_lookup(mut self, env: EnvLookup) -> Self {
        self.env = env;
        self
    }

    /// Look up a configuration value through the registry's lookup
    pub fn env_value(&self, key: &str) -> Option<String> {
        (self.env)(key)
    }

    fn lock_entries(&self) -> std::sync::MutexGuard<'_, HashMap<String, AdapterEntry>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn lock_order(&self) -> std::sync::MutexGuard<'_, Vec<String>> {
        self.order.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Reset to the static binding table, every entry `pending`.
    /// Custom registrations and loaded instances are discarded.
    pub fn initialize_registry(&self) {
        let mut entries = self.lock_entries();
        let mut order = self.lock_order();
        entries.clear();
        order.clear();
        for known in &self.known {
            entries.insert(
                known.name.to_string(),
                AdapterEntry {
                    env_check: EnvCheck::var(known.env_key),
                    factory: Arc::new((known.factory)()),
                    slot: AdapterSlot::Pending,
                },
            );
            order.push(known.name.to_string());
        }
        tracing::debug!(adapters = order.len(), "Adapter registry initialized");
    }

    /// Add a custom binding. Fails if the name is already taken.
    pub fn register_adapter<F>(&self, name: &str, factory: F, env_check: EnvCheck) -> Result<()>
    where
        F: Fn(&Value) -> Result<Arc<dyn ChatAdapter>> + Send + Sync + 'static,
    {
        let mut entries = self.lock_entries();
        if entries.contains_key(name) {
            bail!("Adapter already registered: {}", name);
        }
        let factory: AdapterFactory = Box::new(factory);
        entries.insert(
            name.to_string(),
            AdapterEntry {
                env_check,
                factory: Arc::new(factory),
                slot: AdapterSlot::Pending,
            },
        );
        self.lock_order().push(name.to_string());
        tracing::info!(adapter = %name, "Registered custom adapter");
        Ok(())
    }

    /// Names of bindings whose enablement value is currently set. Constructs nothing.
    pub fn discover_enabled_adapters(&self) -> Vec<String> {
        let checks: Vec<(String, EnvCheck)> = {
            let entries = self.lock_entries();
            self.lock_order()
                .iter()
                .filter_map(|name| {
                    entries
                        .get(name)
                        .map(|e| (name.clone(), e.env_check.clone()))
                })
                .collect()
        };
        checks
            .into_iter()
            .filter(|(_, check)| check.is_enabled(&self.env))
            .map(|(name, _)| name)
            .collect()
    }

    /// Construct and initialize one binding.
    ///
    /// `pending`/`error` entries move to `loading`, then `ready` or `error`.
    /// A `ready` entry returns its existing instance without reinitializing.
    /// The factory sees the enablement value under [`ENABLEMENT_VALUE_KEY`]
    /// unless the config already sets that key. A panicking factory or
    /// initialize leaves the entry in `error`.
    pub async fn load_adapter(&self, name: &str, config: &Value) -> Result<Arc<dyn ChatAdapter>> {
        let (factory, env_check) = {
            let mut entries = self.lock_entries();
            let entry = entries
                .get_mut(name)
                .ok_or_else(|| anyhow!("Unknown adapter: {}", name))?;
            match &entry.slot {
                AdapterSlot::Ready(instance) => return Ok(Arc::clone(instance)),
                AdapterSlot::Loading => bail!("Adapter {} is already loading", name),
                AdapterSlot::Shutdown => bail!("Adapter {} has been shut down", name),
                AdapterSlot::Pending | AdapterSlot::Error(_) => {}
            }
            entry.slot = AdapterSlot::Loading;
            (Arc::clone(&entry.factory), entry.env_check.clone())
        };

        tracing::info!(adapter = %name, "Loading adapter");
        let config = with_enablement_value(config, env_check.value(&self.env));
        let constructed = std::panic::catch_unwind(AssertUnwindSafe(|| factory(&config)))
            .unwrap_or_else(|_| Err(anyhow!("factory panicked")));
        let outcome = match constructed {
            Ok(instance) => {
                let initialized = AssertUnwindSafe(instance.initialize())
                    .catch_unwind()
                    .await
                    .unwrap_or_else(|_| Err(anyhow!("initialize panicked")));
                match initialized {
                    Ok(()) => Ok(instance),
                    Err(e) => Err(e.context(format!("Failed to initialize adapter {}", name))),
                }
            }
            Err(e) => Err(e.context(format!("Failed to construct adapter {}", name))),
        };

        let mut entries = self.lock_entries();
        let entry = entries
            .get_mut(name)
            .ok_or_else(|| anyhow!("Adapter {} was removed while loading", name))?;
        match outcome {
            Ok(instance) => {
                entry.slot = AdapterSlot::Ready(Arc::clone(&instance));
                metrics::record_adapter_load(name, true);
                tracing::info!(adapter = %name, "Adapter ready");
                Ok(instance)
            }
            Err(e) => {
                entry.slot = AdapterSlot::Error(format!("{:#}", e));
                metrics::record_adapter_load(name, false);
                tracing::error!(adapter = %name, error = %format!("{:#}", e), "Adapter failed to load");
                Err(e)
            }
        }
    }

    /// Load every discovered binding. A failing binding is logged and left
    /// out of the result; it never stops the others from loading.
    pub async fn load_enabled_adapters(
        &self,
        configs: &HashMap<String, Value>,
    ) -> HashMap<String, Arc<dyn ChatAdapter>> {
        let enabled = self.discover_enabled_adapters();
        let mut loaded = HashMap::new();
        if enabled.is_empty() {
            tracing::info!("No adapters enabled");
            return loaded;
        }

        let empty = Value::Object(Default::default());
        for name in &enabled {
            let config = configs.get(name).unwrap_or(&empty);
            match self.load_adapter(name, config).await {
                Ok(instance) => {
                    loaded.insert(name.clone(), instance);
                }
                Err(e) => {
                    tracing::warn!(adapter = %name, error = %format!("{:#}", e), "Skipping adapter");
                }
            }
        }

        if loaded.is_empty() {
            tracing::warn!(
                enabled = enabled.len(),
                "Every enabled adapter failed to load; messaging is unavailable"
            );
        } else {
            tracing::info!(loaded = loaded.len(), enabled = enabled.len(), "Adapters loaded");
        }
        loaded
    }

    /// The instance for a `ready` binding
    pub fn get_adapter(&self, name: &str) -> Option<Arc<dyn ChatAdapter>> {
        match self.lock_entries().get(name).map(|e| &e.slot) {
            Some(AdapterSlot::Ready(instance)) => Some(Arc::clone(instance)),
            _ => None,
        }
    }

    pub fn adapter_status(&self, name: &str) -> Option<AdapterStatus> {
        self.lock_entries().get(name).map(|e| e.slot.status())
    }

    /// Every `ready` binding, in registration order
    pub fn ready_adapters(&self) -> Vec<(String, Arc<dyn ChatAdapter>)> {
        let entries = self.lock_entries();
        self.lock_order()
            .iter()
            .filter_map(|name| match entries.get(name).map(|e| &e.slot) {
                Some(AdapterSlot::Ready(instance)) => Some((name.clone(), Arc::clone(instance))),
                _ => None,
            })
            .collect()
    }

    /// Status of every registered binding, in registration order
    pub fn registry_status(&self) -> Vec<AdapterEntryStatus> {
        let entries = self.lock_entries();
        self.lock_order()
            .iter()
            .filter_map(|name| {
                entries.get(name).map(|entry| AdapterEntryStatus {
                    name: name.clone(),
                    env_key: entry.env_check.key.clone(),
                    status: entry.slot.status(),
                    error: match &entry.slot {
                        AdapterSlot::Error(e) => Some(e.clone()),
                        _ => None,
                    },
                    health: match &entry.slot {
                        AdapterSlot::Ready(instance) => Some(instance.status()),
                        _ => None,
                    },
                })
            })
            .collect()
    }

    /// Shut down every `ready` binding concurrently. Each moves to `shutdown`
    /// whether or not its own shutdown succeeded. Returns the names that failed.
    pub async fn shutdown_all(&self) -> Vec<String> {
        let ready: Vec<(String, Arc<dyn ChatAdapter>)> = {
            let mut entries = self.lock_entries();
            let mut ready = Vec::new();
            for (name, entry) in entries.iter_mut() {
                if let AdapterSlot::Ready(instance) = &entry.slot {
                    let instance = Arc::clone(instance);
                    entry.slot = AdapterSlot::Shutdown;
                    ready.push((name.clone(), instance));
                }
            }
            ready
        };

        let results = futures_util::future::join_all(ready.into_iter().map(
            |(name, instance)| async move {
                let result = AssertUnwindSafe(instance.shutdown())
                    .catch_unwind()
                    .await
                    .unwrap_or_else(|_| Err(anyhow!("shutdown panicked")));
                (name, result)
            },
        ))
        .await;

        let mut failed = Vec::new();
        for (name, result) in results {
            match result {
                Ok(()) => tracing::info!(adapter = %name, "Adapter shut down"),
                Err(e) => {
                    tracing::error!(adapter = %name, error = %e, "Adapter shutdown failed");
                    failed.push(name);
                }
            }
        }
        failed.sort();
        failed
    }
}

fn with_enablement_value(config: &Value, value: Option<String>) -> Value {
    let mut config = match config {
        Value::Null => Value::Object(Default::default()),
        other => other.clone(),
    };
    if let (Value::Object(map), Some(value)) = (&mut config, value) {
        map.entry(ENABLEMENT_VALUE_KEY)
            .or_insert_with(|| Value::String(value));
    }
    config
}

impl Default for AdapterRegistry {
    fn default() -> Self {
        Self::new()
    }
}
