use std::path::PathBuf;

use anyhow::Context;
use crmd::daemon::{DaemonConfig, DaemonRuntime, open_service};
use serde::Serialize;
use tokio::io::AsyncReadExt;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

const DEFAULT_TAIL: usize = 20;

#[derive(Debug, Clone, PartialEq, Eq)]
enum CliMode {
    Run,
    /// Enqueue one JSON mutation from a file, or stdin when absent.
    Enqueue(Option<PathBuf>),
    Queue,
    Journal(usize),
    Logs(usize),
    Clients(Option<String>),
    Stats(String),
    Help,
}

fn parse_cli_mode<I>(args: I) -> anyhow::Result<CliMode>
where
    I: IntoIterator<Item = String>,
{
    let mut args = args.into_iter().skip(1);
    let Some(command) = args.next() else {
        return Ok(CliMode::Run);
    };
    let operand = args.next();
    if let Some(extra) = args.next() {
        anyhow::bail!("unexpected argument: {extra}");
    }
    let count = |value: Option<String>| -> anyhow::Result<usize> {
        match value {
            Some(value) => value
                .parse::<usize>()
                .with_context(|| format!("not a line count: {value}")),
            None => Ok(DEFAULT_TAIL),
        }
    };

    let takes_operand = !matches!(command.as_str(), "run" | "queue" | "--help" | "-h" | "help");
    if !takes_operand && let Some(extra) = &operand {
        anyhow::bail!("unexpected argument: {extra}");
    }

    let mode = match command.as_str() {
        "run" => CliMode::Run,
        "enqueue" => CliMode::Enqueue(operand.map(PathBuf::from)),
        "queue" => CliMode::Queue,
        "journal" => CliMode::Journal(count(operand)?),
        "logs" => CliMode::Logs(count(operand)?),
        "clients" => CliMode::Clients(operand),
        "stats" => CliMode::Stats(operand.context("stats needs an agent name")?),
        "--help" | "-h" | "help" => CliMode::Help,
        other => anyhow::bail!("unknown argument: {other}"),
    };
    Ok(mode)
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn print_help() {
    println!("Usage: crmd [COMMAND]");
    println!("  run              Start the sync worker (default)");
    println!("  enqueue [FILE]   Enqueue a JSON mutation from FILE or stdin");
    println!("  queue            Show entries not yet synced");
    println!("  journal [N]      Show the last N journal lines");
    println!("  logs [N]         Show the latest N system log entries");
    println!("  clients [AGENT]  List local records, optionally for one agent");
    println!("  stats AGENT      Per-status counts for one agent");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "crmd=info".into()))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let mode = parse_cli_mode(std::env::args())?;
    if mode == CliMode::Help {
        print_help();
        return Ok(());
    }

    let config = DaemonConfig::from_env()?;
    if mode == CliMode::Run {
        let daemon = DaemonRuntime::bootstrap(config).await?;
        return daemon.run().await;
    }

    let service = open_service(&config).await?;
    match mode {
        CliMode::Enqueue(path) => {
            let body = match path {
                Some(path) => tokio::fs::read_to_string(&path)
                    .await
                    .with_context(|| format!("failed to read {}", path.display()))?,
                None => {
                    let mut body = String::new();
                    tokio::io::stdin()
                        .read_to_string(&mut body)
                        .await
                        .context("failed to read request from stdin")?;
                    body
                }
            };
            let response = service.enqueue_json(&body).await;
            print_json(&response)?;
            if !response.success {
                std::process::exit(1);
            }
        }
        CliMode::Queue => print_json(&service.pending_queue().await?)?,
        CliMode::Journal(limit) => print_json(&service.journal_tail(limit).await?)?,
        CliMode::Logs(limit) => {
            let limit = u32::try_from(limit).unwrap_or(u32::MAX);
            print_json(&service.latest_logs(limit).await?)?
        }
        CliMode::Clients(Some(agent)) => print_json(&service.clients_for_agent(&agent).await?)?,
        CliMode::Clients(None) => print_json(&service.all_clients().await?)?,
        CliMode::Stats(agent) => print_json(&service.agent_stats(&agent).await?)?,
        CliMode::Run | CliMode::Help => {}
    }
    Ok(())
}
