//! CQ Session Console - Main entry point
//!
//! Console frontend for the guided recording session: renders the
//! controller's event stream as text, accepts operator commands on stdin
//! (`ready <location>`, `stop`), and prints the normalized metric table when
//! a result becomes available.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::signal;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use cq_common::config::SessionConfig;
use cq_common::metrics::MetricFilter;
use cq_console::cues::CuePlayer;
use cq_console::render::UiEvent;
use cq_console::session::{SessionController, SessionPhase};

/// Command-line arguments for cq-console
#[derive(Parser, Debug)]
#[command(name = "cq-console")]
#[command(about = "Guided EEG assessment session console")]
#[command(version)]
struct Args {
    /// Path to a TOML or JSON session config
    #[arg(short, long, env = "CQ_CONFIG")]
    config: Option<PathBuf>,

    /// Normalize a stored result document instead of running a session
    #[arg(short, long)]
    import: Option<PathBuf>,

    /// Disable audible cues (visual cues still render)
    #[arg(long)]
    no_cues: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "cq_console=info,cq_common=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();

    let mut config = SessionConfig::resolve(args.config.as_deref())
        .context("Failed to load session config")?;
    if args.no_cues {
        config.cues_enabled = false;
    }

    let cues = if config.cues_enabled {
        CuePlayer::new(true)
    } else {
        CuePlayer::disabled()
    };
    let controller = SessionController::new(config, cues);

    if let Some(path) = args.import.as_deref() {
        controller
            .load_result_file(path)
            .await
            .with_context(|| format!("Failed to import {}", path.display()))?;
        print_metric_table(&controller).await;
        return Ok(());
    }

    let session_id = controller
        .start()
        .await
        .context("Failed to start session")?;
    info!(%session_id, "session running; type 'ready <location>' or 'stop'");

    run_console(controller).await
}

/// Drive the console: render events, accept operator commands, stop on
/// ctrl-c.
async fn run_console(controller: Arc<SessionController>) -> Result<()> {
    let mut events = controller.subscribe();
    let mut stdin = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;
    let mut ended = false;

    loop {
        tokio::select! {
            event = events.recv() => {
                match event {
                    Ok(event) => {
                        let done = render_event(&controller, &event, &mut ended).await;
                        if done {
                            break;
                        }
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                        info!(skipped = n, "renderer lagged behind event stream");
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }
            line = stdin.next_line(), if stdin_open => {
                match line {
                    Ok(Some(line)) => handle_command(&controller, line.trim()).await,
                    // stdin closed; keep rendering until the session ends
                    _ => stdin_open = false,
                }
            }
            // Session over but the metric table never materialized (e.g. a
            // completed run with an unusable artifact): give up after a beat
            _ = tokio::time::sleep(std::time::Duration::from_secs(5)), if ended => break,
            _ = signal::ctrl_c() => {
                println!("Stopping session...");
                let reply = controller.stop().await;
                if !reply.stopped {
                    break;
                }
            }
        }
    }
    Ok(())
}

/// Render one event as console text. Returns true when the console should
/// exit (session over and, for completed sessions, metrics printed).
async fn render_event(
    controller: &Arc<SessionController>,
    event: &UiEvent,
    ended: &mut bool,
) -> bool {
    match event {
        UiEvent::PhaseChanged { phase, .. } => println!("[phase] {phase}"),
        UiEvent::StatusLine { text, .. } => println!("{text}"),
        UiEvent::EpochStarted {
            sequence,
            index,
            label,
            instruction,
            seconds,
            ..
        } => {
            println!("=== Epoch {sequence}/{index} [{label}] {seconds}s: {instruction}");
        }
        UiEvent::EpochProgress {
            label,
            seconds_remaining,
            ..
        } => println!("  {label}: {seconds_remaining}s remaining"),
        UiEvent::RepositionStarted {
            next_location,
            gated,
            message,
            ..
        } => {
            if let Some(message) = message {
                println!("{message}");
            }
            if *gated {
                println!(">>> Move electrode to {next_location}, then type: ready {next_location}");
            }
        }
        UiEvent::RepositionProgress {
            next_location,
            seconds_remaining,
            ..
        } => println!("  reposition to {next_location}: {seconds_remaining}s"),
        UiEvent::RepositionEnded { next_location, .. } => {
            println!("Reposition to {next_location} done");
        }
        UiEvent::CueFired {
            label, lookahead, ..
        } => {
            if *lookahead {
                println!("  * coming up next: {label}");
            } else {
                println!("  * task cue: {label}");
            }
        }
        UiEvent::BandpowerUpdated { locations, .. } => {
            for location in locations {
                let latest = controller.latest_bands(location).await;
                if !latest.is_empty() {
                    let cells: Vec<String> = latest
                        .iter()
                        .map(|(band, value)| format!("{band}={value:.2}"))
                        .collect();
                    println!("  ~ {location}: {}", cells.join(" "));
                }
            }
        }
        UiEvent::MetricsReady { provenance, .. } => {
            println!("Metrics ready ({provenance})");
            print_metric_table(controller).await;
            if *ended {
                return true;
            }
        }
        UiEvent::LogLine {
            stream, message, ..
        } => {
            if !message.is_empty() {
                println!("[{stream}] {message}");
            }
        }
        UiEvent::SessionEnded { phase, .. } => {
            println!("Session ended: {phase}");
            *ended = true;
            // A completed session still owes us the metric table
            if *phase != SessionPhase::Complete {
                return true;
            }
        }
    }
    false
}

async fn handle_command(controller: &Arc<SessionController>, line: &str) {
    if line.is_empty() {
        return;
    }
    if let Some(location) = line
        .strip_prefix("ready ")
        .or_else(|| line.strip_prefix("r "))
    {
        let reply = controller.ready(location.trim()).await;
        if !reply.ok {
            println!(
                "ready rejected: {}",
                reply.message.unwrap_or_else(|| "unknown reason".to_string())
            );
        }
    } else if line == "stop" {
        let reply = controller.stop().await;
        if !reply.stopped {
            println!(
                "stop rejected: {}",
                reply.reason.unwrap_or_else(|| "unknown reason".to_string())
            );
        }
    } else {
        println!("commands: ready <location> | stop");
    }
}

/// Print the canonical metric table and summary.
async fn print_metric_table(controller: &Arc<SessionController>) {
    let rows = controller.metric_rows(MetricFilter::All).await;
    if rows.is_empty() {
        println!("(no metrics)");
        return;
    }

    println!(
        "{:<6} {:<28} {:>10} {:<14} {:<12}",
        "Site", "Metric", "Value", "Normal", "Status"
    );
    for row in &rows {
        let value = if row.value.is_finite() {
            format!("{:.2}", row.value)
        } else {
            "n/a".to_string()
        };
        println!(
            "{:<6} {:<28} {:>10} {:<14} {:<12}",
            row.location, row.metric, value, row.normal_range, row.status
        );
    }

    if let Some(summary) = controller.summary().await {
        println!(
            "Summary: {} in range, {} out of range, {} missing",
            summary.in_range, summary.out_of_range, summary.missing
        );
        if !summary.probes.is_empty() {
            println!("Follow-up questions:");
            for probe in &summary.probes {
                println!("  - {probe}");
            }
        }
    }
}
