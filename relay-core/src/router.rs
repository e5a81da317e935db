// ABOUTME: Inbound command dispatch with rate limiting and permission checks
// ABOUTME: Every failure is returned as a CommandResult; nothing is thrown across dispatch

use crate::commands::{command_names, find_command, parse_command, Permission, COMMANDS};
use crate::metrics;
use crate::traits::CommandContext;
use anyhow::Result;
use async_trait::async_trait;
use futures_util::FutureExt;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;

// =============================================================================
// Configuration and results
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouterConfig {
    #[serde(default = "default_rate_limit_window_secs")]
    pub rate_limit_window_secs: u64,
    /// Commands allowed per user per window
    #[serde(default = "default_rate_limit_max")]
    pub rate_limit_max: u32,
}

fn default_rate_limit_window_secs() -> u64 {
    60
}

fn default_rate_limit_max() -> u32 {
    10
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            rate_limit_window_secs: default_rate_limit_window_secs(),
            rate_limit_max: default_rate_limit_max(),
        }
    }
}

impl RouterConfig {
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.rate_limit_window_secs)
    }
}

/// Outcome of a dispatched command
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CommandResult {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl CommandResult {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: Some(message.into()),
            ..Default::default()
        }
    }

    pub fn ok_with_data(message: impl Into<String>, data: Value) -> Self {
        Self {
            success: true,
            message: Some(message.into()),
            data: Some(data),
            ..Default::default()
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            ..Default::default()
        }
    }

    /// Text to show the user: the message on success, the error otherwise
    pub fn display_text(&self) -> &str {
        if self.success {
            self.message.as_deref().unwrap_or("Done")
        } else {
            self.error.as_deref().unwrap_or("Command failed")
        }
    }
}

/// Why a dispatch did not reach (or failed inside) a handler
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DispatchError {
    #[error("Empty command")]
    EmptyCommand,

    #[error("Unknown command: {command}. Valid commands: {valid}")]
    UnknownCommand { command: String, valid: String },

    #[error("Rate limit exceeded. Try again in {retry_after_secs}s")]
    RateLimitExceeded { retry_after_secs: u64 },

    #[error("Permission denied: '{command}' requires {permission} permission")]
    PermissionDenied {
        command: String,
        permission: Permission,
    },

    #[error("No handler registered for command: {0}")]
    NoHandlerRegistered(String),

    #[error("Command failed: {0}")]
    HandlerFailed(String),
}

impl DispatchError {
    /// Short tag used for metrics
    pub fn reason(&self) -> &'static str {
        match self {
            Self::EmptyCommand => "empty",
            Self::UnknownCommand { .. } => "unknown",
            Self::RateLimitExceeded { .. } => "rate_limited",
            Self::PermissionDenied { .. } => "permission",
            Self::NoHandlerRegistered(_) => "no_handler",
            Self::HandlerFailed(_) => "handler_error",
        }
    }
}

impl From<DispatchError> for CommandResult {
    fn from(e: DispatchError) -> Self {
        CommandResult::failure(e.to_string())
    }
}

// =============================================================================
// Handlers
// =============================================================================

#[async_trait]
pub trait CommandHandler: Send + Sync {
    async fn handle(&self, args: Vec<String>, ctx: CommandContext) -> Result<CommandResult>;
}

struct FnCommand<F>(F);

#[async_trait]
impl<F, Fut> CommandHandler for FnCommand<F>
where
    F: Fn(Vec<String>, CommandContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<CommandResult>> + Send + 'static,
{
    async fn handle(&self, args: Vec<String>, ctx: CommandContext) -> Result<CommandResult> {
        (self.0)(args, ctx).await
    }
}

/// Wrap an async closure as a [`CommandHandler`]
pub fn command_fn<F, Fut>(f: F) -> Arc<dyn CommandHandler>
where
    F: Fn(Vec<String>, CommandContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<CommandResult>> + Send + 'static,
{
    Arc::new(FnCommand(f))
}

/// Decides whether a user holds a permission
pub type PermissionCheck = Arc<dyn Fn(&str, Permission) -> bool + Send + Sync>;

// =============================================================================
// Rate limiting
// =============================================================================

#[derive(Debug, Clone, Copy)]
struct RateLimitBucket {
    count: u32,
    reset_at: Instant,
}

/// Once this many users are tracked, expired buckets are swept on the next check
const BUCKET_SWEEP_THRESHOLD: usize = 1024;

/// Window used when the configured one does not fit in an `Instant`
const MAX_WINDOW: Duration = Duration::from_secs(100 * 365 * 24 * 60 * 60);

/// Fixed-window counter per user. Buckets are created on a user's first
/// command and replaced once their window has elapsed.
#[derive(Debug)]
pub struct RateLimiter {
    window: Duration,
    max: u32,
    buckets: Mutex<HashMap<String, RateLimitBucket>>,
}

impl RateLimiter {
    pub fn new(window: Duration, max: u32) -> Self {
        Self {
            window,
            max,
            buckets: Mutex::new(HashMap::new()),
        }
    }

    fn window_end(&self, now: Instant) -> Instant {
        now.checked_add(self.window)
            .or_else(|| now.checked_add(MAX_WINDOW))
            .unwrap_or(now)
    }

    /// Count one request. Err carries the time until the window resets.
    pub fn check(&self, user_id: &str) -> std::result::Result<(), Duration> {
        let now = Instant::now();
        let mut buckets = self.buckets.lock().unwrap_or_else(|e| e.into_inner());
        if buckets.len() >= BUCKET_SWEEP_THRESHOLD {
            let before = buckets.len();
            buckets.retain(|_, bucket| now < bucket.reset_at);
            tracing::debug!(swept = before - buckets.len(), "Expired rate limit buckets removed");
        }
        let fresh = RateLimitBucket {
            count: 0,
            reset_at: self.window_end(now),
        };
        let bucket = buckets.entry(user_id.to_string()).or_insert(fresh);
        if now >= bucket.reset_at {
            *bucket = fresh;
        }
        if bucket.count >= self.max {
            return Err(bucket.reset_at.saturating_duration_since(now));
        }
        bucket.count += 1;
        Ok(())
    }

    /// Number of users with a bucket
    pub fn tracked_users(&self) -> usize {
        self.buckets.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn reset(&self, user_id: &str) {
        self.buckets
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(user_id);
    }
}

// =============================================================================
// Router
// =============================================================================

type Grants = Arc<RwLock<HashMap<String, HashSet<Permission>>>>;

fn granted(grants: &Grants, user_id: &str, permission: Permission) -> bool {
    match permission {
        Permission::Read => true,
        Permission::Write => grants
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(user_id)
            .is_some_and(|set| set.contains(&Permission::Write)),
    }
}

/// Parses, authorises and dispatches inbound commands.
///
/// Checks run in a fixed order: unknown command, rate limit, permission,
/// handler lookup. Callers can rely on that order when several apply.
pub struct CommandRouter {
    config: RouterConfig,
    handlers: RwLock<HashMap<String, Arc<dyn CommandHandler>>>,
    grants: Grants,
    permission_check: PermissionCheck,
    /// False once a custom permission check replaced the grant set
    uses_grants: bool,
    rate_limiter: RateLimiter,
}

impl CommandRouter {
    /// Router whose permission checks use its own grant set
    pub fn new(config: RouterConfig) -> Self {
        let grants: Grants = Arc::new(RwLock::new(HashMap::new()));
        let check_grants = Arc::clone(&grants);
        let permission_check: PermissionCheck =
            Arc::new(move |user: &str, permission: Permission| {
                granted(&check_grants, user, permission)
            });
        Self {
            rate_limiter: RateLimiter::new(config.window(), config.rate_limit_max),
            config,
            handlers: RwLock::new(HashMap::new()),
            grants,
            permission_check,
            uses_grants: true,
        }
    }

    /// Replace the permission check (e.g. with an external directory lookup).
    /// Grants made through [`CommandRouter::grant_permission`] are then ignored.
    pub fn with_permission_check(mut self, check: PermissionCheck) -> Self {
        self.permission_check = check;
        self.uses_grants = false;
        self
    }

    /// Whether permission checks consult the router's own grant set
    pub fn uses_grant_set(&self) -> bool {
        self.uses_grants
    }

    pub fn config(&self) -> &RouterConfig {
        &self.config
    }

    pub fn register_handler(&self, command: &str, handler: Arc<dyn CommandHandler>) {
        let name = command.to_lowercase();
        if find_command(&name).is_none() {
            tracing::warn!(command = %name, "Registering handler for a command outside the command table; it cannot be dispatched");
        }
        self.handlers
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(name, handler);
    }

    /// Command names that currently have a handler, sorted
    pub fn registered_commands(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .handlers
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }

    pub fn grant_permission(&self, user_id: &str, permission: Permission) {
        if !self.uses_grants {
            tracing::warn!(user_id = %user_id, permission = %permission, "Grant recorded but a custom permission check is installed; it has no effect");
        }
        tracing::info!(user_id = %user_id, permission = %permission, "Permission granted");
        self.grants
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .entry(user_id.to_string())
            .or_default()
            .insert(permission);
    }

    pub fn revoke_permission(&self, user_id: &str, permission: Permission) {
        tracing::info!(user_id = %user_id, permission = %permission, "Permission revoked");
        let mut grants = self.grants.write().unwrap_or_else(|e| e.into_inner());
        if let Some(set) = grants.get_mut(user_id) {
            set.remove(&permission);
            if set.is_empty() {
                grants.remove(user_id);
            }
        }
    }

    /// Whether the configured permission check allows the user
    pub fn has_permission(&self, user_id: &str, permission: Permission) -> bool {
        (self.permission_check)(user_id, permission)
    }

    /// Forget a user's rate-limit window
    pub fn reset_rate_limit(&self, user_id: &str) {
        self.rate_limiter.reset(user_id);
    }

    /// Parse and run a command. Never returns an error; failures come back as
    /// `CommandResult { success: false, error }`.
    pub async fn dispatch(&self, raw_input: &str, ctx: CommandContext) -> CommandResult {
        match self.try_dispatch(raw_input, ctx).await {
            Ok(result) => result,
            Err(e) => {
                metrics::record_command_rejected(e.reason());
                e.into()
            }
        }
    }

    async fn try_dispatch(
        &self,
        raw_input: &str,
        ctx: CommandContext,
    ) -> std::result::Result<CommandResult, DispatchError> {
        let parsed = parse_command(raw_input).ok_or(DispatchError::EmptyCommand)?;

        let def = find_command(&parsed.name).ok_or_else(|| DispatchError::UnknownCommand {
            command: parsed.name.clone(),
            valid: command_names().join(", "),
        })?;

        if let Err(retry_after) = self.rate_limiter.check(&ctx.user_id) {
            tracing::warn!(user_id = %ctx.user_id, command = %def.name, "Rate limit exceeded");
            return Err(DispatchError::RateLimitExceeded {
                retry_after_secs: retry_after.as_millis().div_ceil(1000) as u64,
            });
        }

        if !self.has_permission(&ctx.user_id, def.permission) {
            tracing::warn!(
                user_id = %ctx.user_id,
                command = %def.name,
                permission = %def.permission,
                "Permission denied"
            );
            return Err(DispatchError::PermissionDenied {
                command: def.name.to_string(),
                permission: def.permission,
            });
        }

        let handler = self
            .handlers
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(def.name)
            .cloned()
            .ok_or_else(|| DispatchError::NoHandlerRegistered(def.name.to_string()))?;

        metrics::record_command(def.name);
        tracing::debug!(
            command = %def.name,
            user_id = %ctx.user_id,
            platform = %ctx.platform,
            args = parsed.args.len(),
            "Dispatching command"
        );

        let outcome = AssertUnwindSafe(handler.handle(parsed.args, ctx))
            .catch_unwind()
            .await;
        match outcome {
            Ok(Ok(result)) => Ok(result),
            Ok(Err(e)) => {
                tracing::warn!(command = %def.name, error = %e, "Command handler failed");
                Err(DispatchError::HandlerFailed(format!("{:#}", e)))
            }
            Err(_) => {
                tracing::error!(command = %def.name, "Command handler panicked");
                Err(DispatchError::HandlerFailed("handler panicked".to_string()))
            }
        }
    }

    /// Render the command table with permission badges
    pub fn help_text(&self) -> String {
        let mut out = String::from("Available commands:\n");
        for cmd in COMMANDS {
            let badge = match cmd.permission {
                Permission::Read => "🔓 read",
                Permission::Write => "🔐 write",
            };
            out.push_str(&format!("  /{} [{}] - {}\n", cmd.name, badge, cmd.description));
        }
        out
    }
}

impl Default for CommandRouter {
    fn default() -> Self {
        Self::new(RouterConfig::default())
    }
}
