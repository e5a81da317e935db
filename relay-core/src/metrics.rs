// ABOUTME: Counters for bus deliveries, command routing and adapter sends
// ABOUTME: Thin wrappers over the metrics facade; the binary decides whether to export them

pub fn record_event_published(topic: &str) {
    metrics::counter!("relay_events_published_total", "topic" => topic.to_string()).increment(1);
}

pub fn record_delivery_retry(handler: &str) {
    metrics::counter!("relay_delivery_retries_total", "handler" => handler.to_string())
        .increment(1);
}

pub fn record_dead_letter(handler: &str) {
    metrics::counter!("relay_dead_letters_total", "handler" => handler.to_string()).increment(1);
}

pub fn record_command(command: &str) {
    metrics::counter!("relay_commands_total", "command" => command.to_string()).increment(1);
}

/// `reason` is a short static tag: unknown, rate_limited, permission, no_handler, handler_error
pub fn record_command_rejected(reason: &'static str) {
    metrics::counter!("relay_commands_rejected_total", "reason" => reason).increment(1);
}

pub fn record_send_error(adapter: &str) {
    metrics::counter!("relay_send_errors_total", "adapter" => adapter.to_string()).increment(1);
}

pub fn record_adapter_load(adapter: &str, ok: bool) {
    let outcome = if ok { "ok" } else { "error" };
    metrics::counter!(
        "relay_adapter_loads_total",
        "adapter" => adapter.to_string(),
        "outcome" => outcome
    )
    .increment(1);
}
