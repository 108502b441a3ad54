//! Drives the download agent as a child process for one transfer.

use std::{
    fmt, io,
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};
use thiserror::Error;
use tokio::{
    io::{AsyncBufRead, AsyncBufReadExt, BufReader},
    process::Child,
    task::JoinHandle,
};
use tracing::{Level, debug, error, info, instrument, span, trace, warn};

use super::agent::AgentCommand;
use super::progress::{Aria2ProgressParser, ProgressParser, ProgressSample};
use crate::config::AgentConfig;
use crate::session::TransferSession;

/// How long an interrupted agent gets to exit before it is killed
const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(5);

/// Faults inside the engine itself, as opposed to agent failures
#[derive(Error, Debug)]
pub enum TransferError {
    #[error("IO error: {0}")]
    IoError(#[from] io::Error),

    #[error("Agent {0} stream was not captured")]
    MissingPipe(&'static str),
}

/// Terminal state of one transfer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferOutcome {
    Completed(PathBuf),
    Failed { code: Option<i32>, stderr: String },
    Cancelled,
    AgentMissing { program: String },
    Error(String),
}

impl TransferOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Completed(_))
    }
}

impl fmt::Display for TransferOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Completed(path) => write!(f, "Download complete: {}", path.display()),
            Self::Failed { code, stderr } => {
                let stderr = stderr.trim();
                match (stderr.is_empty(), code) {
                    (false, _) => write!(f, "Download error: {}", stderr),
                    (true, Some(code)) => write!(f, "Download error: agent exited with code {}", code),
                    (true, None) => write!(f, "Download error: agent was terminated"),
                }
            }
            Self::Cancelled => write!(f, "Download cancelled"),
            Self::AgentMissing { program } => write!(
                f,
                "Error: {} is not installed. Please install it to download files.",
                program
            ),
            Self::Error(msg) => write!(f, "Error: {}", msg),
        }
    }
}

pub struct TransferEngine {
    config: AgentConfig,
    parser: Arc<dyn ProgressParser>,
    grace_period: Duration,
}

impl TransferEngine {
    pub fn new(config: AgentConfig) -> Self {
        Self {
            config,
            parser: Arc::new(Aria2ProgressParser),
            grace_period: DEFAULT_GRACE_PERIOD,
        }
    }

    pub fn with_parser(mut self, parser: Arc<dyn ProgressParser>) -> Self {
        self.parser = parser;
        self
    }

    pub fn with_grace_period(mut self, grace_period: Duration) -> Self {
        self.grace_period = grace_period;
        self
    }

    /// Run the agent to completion, cancellation or failure.
    ///
    /// Progress samples are delivered in the order the agent prints them.
    /// The completed path is the one the agent reports, so an auto-renamed
    /// file is reported under its new name.
    /// Never fails: engine faults are folded into [`TransferOutcome::Error`].
    /// The session is only borrowed; the caller's guard clears it on drop.
    #[instrument(name = "transfer", level = "debug", skip(self, session, on_progress), fields(session = %session.id()))]
    pub async fn start_transfer<F>(
        &self,
        session: &TransferSession,
        url: &str,
        destination_dir: &Path,
        filename: &str,
        mut on_progress: F,
    ) -> TransferOutcome
    where
        F: FnMut(ProgressSample),
    {
        match self
            .run(session, url, destination_dir, filename, &mut on_progress)
            .await
        {
            Ok(outcome) => {
                info!(outcome = %outcome, "Transfer finished");
                outcome
            }
            Err(e) => {
                error!(error = %e, "Transfer failed");
                TransferOutcome::Error(e.to_string())
            }
        }
    }

    async fn run(
        &self,
        session: &TransferSession,
        url: &str,
        destination_dir: &Path,
        filename: &str,
        on_progress: &mut dyn FnMut(ProgressSample),
    ) -> Result<TransferOutcome, TransferError> {
        let dir = std::path::absolute(destination_dir)?;
        if !dir.exists() {
            tokio::fs::create_dir_all(&dir).await?;
            debug!(dir = ?dir, "Created destination directory");
        }
        let final_path = dir.join(filename);

        let mut child = match AgentCommand::new(&self.config)
            .command(url, &dir, filename)
            .spawn()
        {
            Ok(child) => child,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                warn!(program = ?self.config.program, "Download agent not found");
                return Ok(TransferOutcome::AgentMissing {
                    program: self.config.program.display().to_string(),
                });
            }
            Err(e) => return Err(e.into()),
        };
        session.attach_process(child.id());
        info!(pid = ?child.id(), path = ?final_path, "Agent started");

        let stdout = child.stdout.take().ok_or(TransferError::MissingPipe("stdout"))?;
        let stderr = child.stderr.take().ok_or(TransferError::MissingPipe("stderr"))?;
        let stderr_reader = collect_stderr(stderr);

        let token = session.token();
        let mut stdout = BufReader::new(stdout);
        let mut buf = Vec::new();
        let mut reported_path = None;

        let output_span = span!(Level::TRACE, "agent_output", path = ?final_path);
        loop {
            let line = tokio::select! {
                biased;
                _ = token.cancelled() => {
                    stderr_reader.abort();
                    self.interrupt(&mut child).await;
                    return Ok(TransferOutcome::Cancelled);
                }
                line = read_lossy_line(&mut stdout, &mut buf) => line?,
            };

            let Some(line) = line else { break };
            output_span.in_scope(|| trace!(line = %line, "Agent output"));
            if let Some(path) = self.parser.completed_path(&line) {
                reported_path = Some(dir.join(path));
            } else if let Some(sample) = self.parser.parse_line(&line) {
                on_progress(sample);
            }
        }

        // stdout closed; the agent is exiting
        let status = tokio::select! {
            biased;
            _ = token.cancelled() => {
                stderr_reader.abort();
                self.interrupt(&mut child).await;
                return Ok(TransferOutcome::Cancelled);
            }
            status = child.wait() => status?,
        };
        let stderr = stderr_reader.await.unwrap_or_default();

        if status.success() {
            Ok(TransferOutcome::Completed(reported_path.unwrap_or(final_path)))
        } else {
            warn!(code = ?status.code(), stderr = %stderr.trim(), "Agent exited with failure");
            Ok(TransferOutcome::Failed {
                code: status.code(),
                stderr,
            })
        }
    }

    /// Interrupt the agent, escalating to a kill after the grace period.
    /// Without a deliverable interrupt the agent is killed at once.
    async fn interrupt(&self, child: &mut Child) {
        info!(pid = ?child.id(), "Interrupting agent");

        if send_interrupt(child).await {
            match tokio::time::timeout(self.grace_period, child.wait()).await {
                Ok(status) => {
                    debug!(status = ?status, "Agent exited after interrupt");
                    return;
                }
                Err(_) => warn!("Agent ignored interrupt, killing"),
            }
        }

        if let Err(e) = child.kill().await {
            error!(error = %e, "Failed to kill agent");
        }
    }
}

#[cfg(unix)]
async fn send_interrupt(child: &Child) -> bool {
    let Some(pid) = child.id() else {
        return false;
    };
    let sent = tokio::process::Command::new("kill")
        .arg("-INT")
        .arg(pid.to_string())
        .status()
        .await
        .map(|s| s.success())
        .unwrap_or(false);
    if !sent {
        debug!(pid, "Could not deliver SIGINT");
    }
    sent
}

#[cfg(not(unix))]
async fn send_interrupt(_child: &Child) -> bool {
    false
}

/// Next line of agent output with invalid UTF-8 replaced, `None` at EOF.
/// Bytes read before a cancellation stay in `buf`.
async fn read_lossy_line<R>(reader: &mut R, buf: &mut Vec<u8>) -> io::Result<Option<String>>
where
    R: AsyncBufRead + Unpin,
{
    if reader.read_until(b'\n', buf).await? == 0 {
        return Ok(None);
    }
    let line = String::from_utf8_lossy(buf)
        .trim_end_matches(['\r', '\n'])
        .to_string();
    buf.clear();
    Ok(Some(line))
}

fn collect_stderr(stderr: tokio::process::ChildStderr) -> JoinHandle<String> {
    tokio::spawn(async move {
        let mut collected = String::new();
        let mut reader = BufReader::new(stderr);
        let mut buf = Vec::new();
        loop {
            match read_lossy_line(&mut reader, &mut buf).await {
                Ok(Some(line)) => {
                    debug!(line = %line, "Agent stderr");
                    collected.push_str(&line);
                    collected.push('\n');
                }
                Ok(None) => break,
                Err(e) => {
                    debug!(error = %e, "Agent stderr closed");
                    break;
                }
            }
        }
        collected
    })
}
