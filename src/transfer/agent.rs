//! Command line construction for the external download agent.

use std::ffi::OsString;
use std::path::Path;
use std::process::Stdio;
use tokio::process::Command;

use crate::config::AgentConfig;

/// Builds the agent invocation for one transfer
#[derive(Debug, Clone)]
pub struct AgentCommand<'a> {
    config: &'a AgentConfig,
}

impl<'a> AgentCommand<'a> {
    pub fn new(config: &'a AgentConfig) -> Self {
        Self { config }
    }

    pub fn args(&self, url: &str, dir: &Path, filename: &str) -> Vec<OsString> {
        let c = self.config;
        let mut args: Vec<OsString> = [
            format!("--summary-interval={}", c.summary_interval),
            format!("--max-connection-per-server={}", c.connections),
            format!("--split={}", c.split),
            "--file-allocation=none".to_string(),
            format!("--min-split-size={}", c.min_split_size),
            format!("--max-tries={}", c.max_tries),
            format!("--retry-wait={}", c.retry_wait),
            "--auto-file-renaming=true".to_string(),
            "--console-log-level=error".to_string(),
            "--enable-color=false".to_string(),
        ]
        .into_iter()
        .map(OsString::from)
        .collect();

        args.push("--dir".into());
        args.push(dir.as_os_str().to_owned());
        args.push("--out".into());
        args.push(filename.into());
        args.push(url.into());
        args
    }

    /// A ready-to-spawn command with piped output streams
    pub fn command(&self, url: &str, dir: &Path, filename: &str) -> Command {
        let mut cmd = Command::new(&self.config.program);
        cmd.args(self.args(url, dir, filename))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }
}
