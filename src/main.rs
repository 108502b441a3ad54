mod config;
mod downloader;
mod filename;
mod normalize;
mod probe;
mod session;
mod settings;
mod transfer;

use std::io::Write;
use std::path::PathBuf;

use clap::{Parser, Subcommand};
use downloader::{DownloadEvent, DownloadManager, DownloadRequest};
use session::{CancelOutcome, SessionController};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[clap(name = "modelfetch", version, about)]
struct Cli {
    #[clap(subcommand)]
    command: Command,

    #[clap(flatten)]
    config: config::Config,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Download a file through the agent
    Get {
        url: String,

        /// Destination directory
        #[clap(long, conflicts_with = "to")]
        dir: Option<PathBuf>,

        /// Use one of the configured destination shortcuts
        #[clap(long, value_enum)]
        to: Option<config::Shortcut>,

        /// Print progress samples as JSON lines
        #[clap(long)]
        json: bool,
    },
    /// Check whether a URL is directly downloadable
    Probe { url: String },
}

/// Exit code used when the user interrupts twice
const INTERRUPTED_EXIT_CODE: i32 = 130;

#[derive(Debug, PartialEq, Eq)]
enum InterruptAction {
    Cancel(CancelOutcome),
    ForceExit,
}

/// The first Ctrl-C cancels the transfer; a repeat, or one with nothing to
/// cancel, exits without waiting for the agent.
fn on_interrupt(sessions: &SessionController, presses: u32) -> InterruptAction {
    if presses > 1 {
        return InterruptAction::ForceExit;
    }
    match sessions.cancel() {
        CancelOutcome::NothingRunning => InterruptAction::ForceExit,
        outcome => InterruptAction::Cancel(outcome),
    }
}

fn render_event(event: DownloadEvent, json: bool) {
    match event {
        DownloadEvent::Resolved {
            filename,
            content_length,
        } => {
            let size = content_length
                .map(|b| bytesize::ByteSize::b(b).to_string())
                .unwrap_or_else(|| "unknown size".into());
            eprintln!("Downloading {} ({})", filename, size);
        }
        DownloadEvent::Progress(sample) if json => match serde_json::to_string(&sample) {
            Ok(line) => println!("{}", line),
            Err(e) => tracing::warn!(error = %e, "Could not serialize progress"),
        },
        DownloadEvent::Progress(sample) => {
            let filled = sample.fraction().map_or(0, |f| (f * 30.0).round() as usize);
            let percent = sample
                .percent
                .map(|p| format!("{:5.1}%", p))
                .unwrap_or_else(|| "   ?  ".into());
            eprint!(
                "\r[{:<30}] {} {:>12} eta {:<8}",
                "#".repeat(filled.min(30)),
                percent,
                sample.speed.as_deref().unwrap_or("-"),
                sample.eta.as_deref().unwrap_or("-")
            );
            std::io::stderr().flush().ok();
        }
    }
}

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();
    color_eyre::install()?;

    let cli = Cli::parse();
    let manager = DownloadManager::from_config(&cli.config)?;

    match cli.command {
        Command::Probe { url } => {
            let result = manager.probe(&url).await;
            println!("{}", result);
            if !result.available {
                std::process::exit(1);
            }
        }
        Command::Get { url, dir, to, json } => {
            let destination = cli.config.destinations.resolve(dir, to);
            tracing::debug!(destination = ?destination, "Resolved destination");

            let sessions = manager.sessions();
            tokio::spawn(async move {
                let mut presses = 0;
                while tokio::signal::ctrl_c().await.is_ok() {
                    presses += 1;
                    eprintln!();
                    let id = sessions.active_id();
                    match on_interrupt(&sessions, presses) {
                        InterruptAction::Cancel(outcome) => tracing::info!(id = ?id, "{}", outcome),
                        InterruptAction::ForceExit => {
                            tracing::warn!(id = ?id, "Interrupted again, exiting");
                            std::process::exit(INTERRUPTED_EXIT_CODE);
                        }
                    }
                }
            });

            let request = DownloadRequest::new(url, destination);
            let status = manager
                .download(&request, |event| render_event(event, json))
                .await;

            eprintln!();
            println!("{}", status);
            if !status.is_success() {
                std::process::exit(1);
            }
        }
    }

    Ok(())
}
