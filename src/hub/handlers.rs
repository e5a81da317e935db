// ABOUTME: Default command handlers installed on every hub's router
// ABOUTME: help, status, ralph-status, health, approve and reject

use super::{HubContext, HUB_SOURCE};
use crate::registry::AdapterStatus;
use anyhow::Result;
use relay_core::event::{topics, Event};
use relay_core::formatter::format_duration_ms;
use relay_core::router::{command_fn, CommandResult, CommandRouter};
use relay_core::traits::CommandContext;
use serde_json::json;
use std::sync::Arc;

pub(crate) fn register_default_commands(router: &Arc<CommandRouter>, ctx: &HubContext) {
    // Weak so the router does not keep itself alive through its own handler
    let weak_router = Arc::downgrade(router);
    router.register_handler(
        "help",
        command_fn(move |_args, _ctx| {
            let text = weak_router
                .upgrade()
                .map(|router| router.help_text())
                .unwrap_or_default();
            async move { Ok(CommandResult::ok(text)) }
        }),
    );

    let status_ctx = ctx.clone();
    router.register_handler(
        "status",
        command_fn(move |_args, _cmd| {
            let result = status(&status_ctx);
            async move { Ok(result) }
        }),
    );

    let loops_ctx = ctx.clone();
    router.register_handler(
        "ralph-status",
        command_fn(move |args, _cmd| {
            let result = ralph_status(&loops_ctx, args.first().map(String::as_str));
            async move { Ok(result) }
        }),
    );

    let health_ctx = ctx.clone();
    router.register_handler(
        "health",
        command_fn(move |_args, _cmd| {
            let result = health(&health_ctx);
            async move { Ok(result) }
        }),
    );

    let approve_ctx = ctx.clone();
    router.register_handler(
        "approve",
        command_fn(move |args, cmd| {
            let result = decide_gate(&approve_ctx, GateDecision::Approve, args, cmd);
            async move { result }
        }),
    );

    let reject_ctx = ctx.clone();
    router.register_handler(
        "reject",
        command_fn(move |args, cmd| {
            let result = decide_gate(&reject_ctx, GateDecision::Reject, args, cmd);
            async move { result }
        }),
    );
}

fn status(ctx: &HubContext) -> CommandResult {
    let ready: Vec<String> = ctx
        .registry
        .ready_adapters()
        .into_iter()
        .map(|(name, _)| name)
        .collect();
    let subscribers = ctx.bus.subscriber_count();
    let dead_letters = ctx.bus.dead_letter_count();
    let uptime = ctx.started_at.elapsed();

    let text = format!(
        "📊 Status for {}\nAdapters: {} ({})\nSubscribers: {}\nDead letters: {}\nUptime: {}",
        ctx.project,
        ready.len(),
        ready.join(", "),
        subscribers,
        dead_letters,
        format_duration_ms(uptime.as_millis() as u64),
    );
    CommandResult::ok_with_data(
        text,
        json!({
            "project": ctx.project,
            "adapters": ready,
            "subscribers": subscribers,
            "deadLetters": dead_letters,
            "uptimeSecs": uptime.as_secs(),
        }),
    )
}

fn ralph_status(ctx: &HubContext, loop_id: Option<&str>) -> CommandResult {
    let loops = match loop_id {
        Some(id) => match ctx.loops.get(id) {
            Some(state) => vec![state],
            None => return CommandResult::failure(format!("No loop tracked with id {}", id)),
        },
        None => ctx.loops.snapshot(),
    };
    if loops.is_empty() {
        return CommandResult::ok("No loops tracked yet");
    }

    let text = loops
        .iter()
        .map(|state| state.describe())
        .collect::<Vec<_>>()
        .join("\n");
    CommandResult::ok_with_data(text, json!({ "loops": loops }))
}

fn health(ctx: &HubContext) -> CommandResult {
    let entries = ctx.registry.registry_status();
    let mut lines = Vec::with_capacity(entries.len());
    for entry in &entries {
        let line = match (&entry.status, &entry.health) {
            (AdapterStatus::Ready, Some(health)) => format!(
                "{}: {} (sent {}, received {}, errors {})",
                entry.name,
                if health.connected {
                    "✅ connected"
                } else {
                    "⚠️ disconnected"
                },
                health.messages_sent,
                health.messages_received,
                health.errors
            ),
            (AdapterStatus::Error, _) => format!(
                "{}: ❌ error - {}",
                entry.name,
                entry.error.as_deref().unwrap_or("unknown")
            ),
            (status, _) => format!("{}: {}", entry.name, status),
        };
        lines.push(line);
    }
    CommandResult::ok_with_data(lines.join("\n"), json!({ "adapters": entries }))
}

#[derive(Debug, Clone, Copy)]
enum GateDecision {
    Approve,
    Reject,
}

impl GateDecision {
    fn command(self) -> &'static str {
        match self {
            Self::Approve => "approve",
            Self::Reject => "reject",
        }
    }

    fn topic(self) -> &'static str {
        match self {
            Self::Approve => topics::GATE_APPROVED,
            Self::Reject => topics::GATE_REJECTED,
        }
    }

    fn past_tense(self) -> &'static str {
        match self {
            Self::Approve => "approved",
            Self::Reject => "rejected",
        }
    }
}

fn decide_gate(
    ctx: &HubContext,
    decision: GateDecision,
    args: Vec<String>,
    cmd: CommandContext,
) -> Result<CommandResult> {
    let Some((gate_id, rest)) = args.split_first() else {
        return Ok(CommandResult::failure(format!(
            "Usage: /{} <gateId> [reason]",
            decision.command()
        )));
    };
    let reason = rest.join(" ");

    let mut event = Event::new(
        decision.topic(),
        format!("Gate {} {} by {}", gate_id, decision.past_tense(), cmd.user_id),
    )
    .with_source(HUB_SOURCE)
    .with_gate(gate_id.as_str())
    .with_detail("user", cmd.user_id.as_str())
    .with_detail("platform", cmd.platform.as_str());
    if !reason.is_empty() {
        event = event.with_detail("reason", reason.as_str());
    }

    tracing::info!(
        gate_id = %gate_id,
        user_id = %cmd.user_id,
        platform = %cmd.platform,
        decision = decision.command(),
        "Gate decision"
    );
    ctx.publish(event);

    Ok(CommandResult::ok_with_data(
        format!("Gate {} {}", gate_id, decision.past_tense()),
        json!({ "gateId": gate_id, "decision": decision.past_tense() }),
    ))
}
