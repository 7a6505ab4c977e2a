//! Agent Relay - command line entry point
//!
//! Sends one prompt to the remote agent and renders the answer as it streams.

use std::io::Write;
use std::process::ExitCode;
use std::time::Duration;

use agent_relay::agent::{Agent, SessionStream};
use agent_relay::config::Config;
use agent_relay::stream::ClientEvent;
use clap::Parser;
use futures::StreamExt;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Time given to background lease cleanup after an interrupt.
const SHUTDOWN_GRACE: Duration = Duration::from_millis(500);

#[derive(Debug, Parser)]
#[command(name = "agent-relay", version, about = "Stream an answer from a remote agent")]
struct Cli {
    /// Question to send to the agent
    prompt: String,

    /// Print every event as a JSON line instead of rendering text
    #[arg(long)]
    json: bool,
}

enum Finish {
    Completed,
    Failed,
    Interrupted,
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    // Logs go to stderr; stdout carries the answer
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "agent_relay=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let config = Config::from_env()?;
    info!(
        endpoint = %config.agent_endpoint,
        mcp_server = %config.mcp_server_url,
        max_attempts = config.max_attempts,
        "Loaded configuration"
    );

    let agent = Agent::from_config(&config)?;
    let mut session = agent.run(cli.prompt);
    info!(session_id = %session.id, "Session created");

    let finish = if cli.json {
        render_json(&mut session).await?
    } else {
        render_text(&mut session).await?
    };

    Ok(match finish {
        Finish::Completed => ExitCode::SUCCESS,
        Finish::Failed => ExitCode::FAILURE,
        Finish::Interrupted => {
            drop(session);
            tokio::time::sleep(SHUTDOWN_GRACE).await;
            ExitCode::from(130)
        }
    })
}

async fn render_json(session: &mut SessionStream) -> anyhow::Result<Finish> {
    let mut stdout = std::io::stdout();
    let mut finish = Finish::Completed;
    let interrupt = tokio::signal::ctrl_c();
    tokio::pin!(interrupt);

    loop {
        tokio::select! {
            event = session.events.next() => {
                let Some(event) = event else { break };
                if event.is_error() {
                    finish = Finish::Failed;
                }
                writeln!(stdout, "{}", serde_json::to_string(&event)?)?;
                stdout.flush()?;
            }
            _ = &mut interrupt => return Ok(Finish::Interrupted),
        }
    }
    Ok(finish)
}

async fn render_text(session: &mut SessionStream) -> anyhow::Result<Finish> {
    let mut stdout = std::io::stdout();
    let mut finish = Finish::Completed;
    // Part of the current segment already on screen
    let mut printed = String::new();
    let mut preview_open = true;
    let interrupt = tokio::signal::ctrl_c();
    tokio::pin!(interrupt);

    loop {
        tokio::select! {
            event = session.events.next() => {
                let Some(event) = event else { break };
                // The preview cannot move past this event until the next poll
                drop(session.preview.borrow_and_update());
                match event {
                    ClientEvent::Text { data } => {
                        match data.strip_prefix(printed.as_str()) {
                            Some(rest) => writeln!(stdout, "{rest}")?,
                            None => writeln!(stdout, "\n{data}")?,
                        }
                        printed.clear();
                    }
                    ClientEvent::ToolStatus { name } => {
                        end_line(&mut stdout, &mut printed)?;
                        eprintln!("[tool: {name}]");
                    }
                    ClientEvent::Warning { data } => {
                        end_line(&mut stdout, &mut printed)?;
                        eprintln!("warning: {data}");
                    }
                    ClientEvent::Error { data } => {
                        end_line(&mut stdout, &mut printed)?;
                        eprintln!("error: {data}");
                        finish = Finish::Failed;
                    }
                }
                stdout.flush()?;
            }
            changed = session.preview.changed(), if preview_open => {
                if changed.is_err() {
                    preview_open = false;
                    continue;
                }
                let current = session.preview.borrow_and_update().clone();
                if let Some(rest) = current.strip_prefix(printed.as_str()) {
                    if !rest.is_empty() {
                        write!(stdout, "{rest}")?;
                        stdout.flush()?;
                        printed = current;
                    }
                }
            }
            _ = &mut interrupt => {
                end_line(&mut stdout, &mut printed)?;
                eprintln!("interrupted");
                return Ok(Finish::Interrupted);
            }
        }
    }
    Ok(finish)
}

/// Terminate a partially printed segment.
fn end_line(stdout: &mut std::io::Stdout, printed: &mut String) -> std::io::Result<()> {
    if !printed.is_empty() {
        writeln!(stdout)?;
        printed.clear();
    }
    Ok(())
}
