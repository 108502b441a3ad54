//! Config module for modelfetch

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, ValueEnum};

/// Options passed to the download agent on every transfer.
#[derive(Parser, Debug, Clone)]
pub struct AgentConfig {
    /// Download agent executable
    #[clap(long = "agent", env = "MF_AGENT", default_value = "aria2c")]
    pub program: PathBuf,

    /// Parallel connections per server
    #[clap(long, env = "MF_CONNECTIONS", default_value_t = 16)]
    pub connections: u32,

    /// Number of pieces the file is split into
    #[clap(long, env = "MF_SPLIT", default_value_t = 16)]
    pub split: u32,

    /// Minimum split size, in the agent's size notation
    #[clap(long, env = "MF_MIN_SPLIT_SIZE", default_value = "1M")]
    pub min_split_size: String,

    /// Automatic retries performed by the agent
    #[clap(long, env = "MF_MAX_TRIES", default_value_t = 3)]
    pub max_tries: u32,

    /// Seconds the agent waits between retries
    #[clap(long, env = "MF_RETRY_WAIT", default_value_t = 0)]
    pub retry_wait: u32,

    /// Seconds between the agent's progress readouts
    #[clap(long, env = "MF_SUMMARY_INTERVAL", default_value_t = 1)]
    pub summary_interval: u32,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            program: PathBuf::from("aria2c"),
            connections: 16,
            split: 16,
            min_split_size: "1M".to_string(),
            max_tries: 3,
            retry_wait: 0,
            summary_interval: 1,
        }
    }
}

#[derive(Parser, Debug, Clone)]
pub struct ProbeConfig {
    /// Seconds to wait for the metadata probe
    #[clap(long, env = "MF_PROBE_TIMEOUT", default_value_t = 10)]
    pub probe_timeout: u64,

    #[clap(long, env = "MF_MAX_REDIRECTS", default_value_t = 10)]
    pub max_redirects: usize,
}

impl ProbeConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout)
    }
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            probe_timeout: 10,
            max_redirects: 10,
        }
    }
}

/// Destination shortcuts offered next to the free-form directory
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
#[clap(rename_all = "lowercase")]
pub enum Shortcut {
    Lora,
    Checkpoint,
    Vae,
}

#[derive(Parser, Debug, Clone)]
pub struct DestinationConfig {
    /// Destination used when neither a directory nor a shortcut is given
    #[clap(long = "default-dir", env = "MF_DEFAULT_DIR", default_value = "downloads/")]
    pub default_dir: PathBuf,

    #[clap(long, env = "MF_LORA_DIR", default_value = "models/Lora")]
    pub lora_dir: PathBuf,

    #[clap(long, env = "MF_CHECKPOINT_DIR", default_value = "models/Stable-diffusion")]
    pub checkpoint_dir: PathBuf,

    #[clap(long, env = "MF_VAE_DIR", default_value = "models/VAE")]
    pub vae_dir: PathBuf,
}

impl DestinationConfig {
    pub fn shortcut_dir(&self, shortcut: Shortcut) -> &PathBuf {
        match shortcut {
            Shortcut::Lora => &self.lora_dir,
            Shortcut::Checkpoint => &self.checkpoint_dir,
            Shortcut::Vae => &self.vae_dir,
        }
    }

    /// Pick the destination: explicit directory, then shortcut, then the default.
    pub fn resolve(&self, dir: Option<PathBuf>, shortcut: Option<Shortcut>) -> PathBuf {
        dir.or_else(|| shortcut.map(|s| self.shortcut_dir(s).clone()))
            .unwrap_or_else(|| self.default_dir.clone())
    }
}

#[derive(Parser, Debug, Clone)]
pub struct Config {
    /// JSON settings file holding `custom_api_key`
    #[clap(long, env = "MF_SETTINGS_FILE", default_value_t = get_default_settings_path())]
    pub settings_file: String,

    #[clap(flatten)]
    pub agent: AgentConfig,

    #[clap(flatten)]
    pub probe: ProbeConfig,

    #[clap(flatten)]
    pub destinations: DestinationConfig,
}

impl Config {
    pub fn settings_path(&self) -> PathBuf {
        PathBuf::from(&self.settings_file)
    }
}

/// Safely determine the default path for the settings file
fn get_default_settings_path() -> String {
    dirs::config_dir()
        .map(|dir| dir.join("modelfetch/config.json"))
        .and_then(|path| path.to_str().map(String::from))
        .unwrap_or_else(|| "config.json".to_string())
}
