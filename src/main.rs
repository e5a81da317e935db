// ABOUTME: Command line entry point for agent-relay
// ABOUTME: Runs the hub over stdin, publishes one-off events, and lists adapters and commands

use agent_relay::config::Config;
use agent_relay::registry::AdapterRegistry;
use agent_relay::router::CommandRouter;
use agent_relay::{create_messaging_hub, CommandContext, Event, MessagingHub, Severity};
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde_json::Value;
use tokio::io::AsyncBufReadExt;
use tokio_stream::wrappers::LinesStream;
use tokio_stream::StreamExt;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Messaging hub for toolchain events and chat commands
#[derive(Parser, Debug)]
#[command(name = "agent-relay", version, about)]
struct Cli {
    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Start the hub; stdin lines starting with `/` are commands, others are JSON events
    Serve {
        /// User id that stdin commands run as
        #[arg(long, default_value = "cli")]
        user: String,
    },

    /// Publish a single event and wait for delivery
    Publish {
        #[arg(long)]
        topic: String,

        #[arg(long)]
        summary: String,

        /// info, warning or critical
        #[arg(long, default_value = "info")]
        severity: String,

        #[arg(long)]
        loop_id: Option<String>,

        #[arg(long)]
        gate_id: Option<String>,

        /// Extra detail as key=value (value parsed as JSON when possible)
        #[arg(long = "detail", value_name = "KEY=VALUE")]
        details: Vec<String>,
    },

    /// Show which adapters are known and enabled
    Adapters,

    /// List the chat commands and their permissions
    Commands,
}

fn init_logging(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info".into());
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr),
            )
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

fn install_metrics_exporter(port: u16) -> Result<()> {
    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .context("Failed to install Prometheus exporter")?;
    tracing::info!(port, "Prometheus metrics listening");
    Ok(())
}

fn parse_detail(raw: &str) -> Result<(String, Value)> {
    let (key, value) = raw
        .split_once('=')
        .with_context(|| format!("Detail must be KEY=VALUE, got: {}", raw))?;
    let value = serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.to_string()));
    Ok((key.trim().to_string(), value))
}

async fn start_hub(config: &Config) -> Option<MessagingHub> {
    let hub = create_messaging_hub(config.hub_options()).await;
    if hub.is_none() {
        eprintln!(
            "No messaging adapters loaded. Enable one with {}=1 or {}=<file>.",
            agent_relay::adapters::CONSOLE_ENV,
            agent_relay::adapters::JSONL_ENV
        );
    }
    hub
}

async fn serve(config: Config, user: String) -> Result<()> {
    let Some(hub) = start_hub(&config).await else {
        return Ok(());
    };

    let stdin = tokio::io::BufReader::new(tokio::io::stdin());
    let mut lines = LinesStream::new(stdin.lines());

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Interrupted, shutting down");
                break;
            }
            line = lines.next() => {
                let Some(line) = line else {
                    tracing::info!("stdin closed, shutting down");
                    break;
                };
                let line = line.context("Failed to read stdin")?;
                handle_line(&hub, &user, line.trim()).await;
            }
        }
    }

    hub.flush().await;
    let failed = hub.shutdown().await;
    if !failed.is_empty() {
        tracing::warn!(adapters = %failed.join(", "), "Some adapters failed to shut down");
    }
    Ok(())
}

async fn handle_line(hub: &MessagingHub, user: &str, line: &str) {
    if line.is_empty() {
        return;
    }
    if line.starts_with('/') {
        let ctx = CommandContext::new("cli", user, "stdin");
        let result = hub.dispatch(line, ctx).await;
        println!("{}", result.display_text());
        return;
    }
    match serde_json::from_str::<Event>(line) {
        Ok(event) => hub.publish(event),
        Err(e) => tracing::warn!(error = %e, "Ignoring line that is neither a command nor an event"),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_logging(cli.log_json);

    match cli.command {
        Commands::Serve { user } => {
            let config = Config::load()?;
            if let Some(port) = config.metrics_port {
                install_metrics_exporter(port)?;
            }
            serve(config, user).await
        }
        Commands::Publish {
            topic,
            summary,
            severity,
            loop_id,
            gate_id,
            details,
        } => {
            let config = Config::load()?;
            let severity: Severity = severity.parse()?;
            let mut event = Event::new(topic, summary)
                .with_source("agent-relay-cli")
                .with_severity(severity);
            if let Some(loop_id) = loop_id {
                event = event.with_loop(loop_id);
            }
            if let Some(gate_id) = gate_id {
                event = event.with_gate(gate_id);
            }
            for raw in &details {
                let (key, value) = parse_detail(raw)?;
                event = event.with_detail(key, value);
            }

            let Some(hub) = start_hub(&config).await else {
                return Ok(());
            };
            hub.publish(event);
            hub.flush().await;
            let dead_letters = hub.bus().dead_letter_count();
            hub.shutdown().await;
            if dead_letters > 0 {
                anyhow::bail!("{} delivery failure(s); see log for details", dead_letters);
            }
            Ok(())
        }
        Commands::Adapters => {
            let registry = AdapterRegistry::new();
            let enabled = registry.discover_enabled_adapters();
            println!("{:<12} {:<20} ENABLED", "ADAPTER", "ENV");
            for entry in registry.registry_status() {
                let on = if enabled.contains(&entry.name) { "yes" } else { "no" };
                println!("{:<12} {:<20} {}", entry.name, entry.env_key, on);
            }
            Ok(())
        }
        Commands::Commands => {
            print!("{}", CommandRouter::default().help_text());
            Ok(())
        }
    }
}
