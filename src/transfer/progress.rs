//! Decoding of the agent's human-readable status lines.

use regex::Regex;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::LazyLock;

/// Number directly in front of a percent sign, e.g. `42`, `(1%)`, `33.5%`
static PERCENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d+(?:\.\d+)?)%").expect("valid percent regex"));

/// One progress reading derived from a single line of agent output
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ProgressSample {
    /// Completion in the range 0..=100
    pub percent: Option<f32>,
    pub speed: Option<String>,
    pub eta: Option<String>,
}

impl ProgressSample {
    /// Completion as a fraction in 0..=1, for progress bars
    pub fn fraction(&self) -> Option<f32> {
        self.percent.map(|p| p / 100.0)
    }

    fn is_empty(&self) -> bool {
        self.percent.is_none() && self.speed.is_none() && self.eta.is_none()
    }
}

/// Turns one line of agent output into a progress reading.
///
/// Implementations must not panic on arbitrary input; lines that carry no
/// progress information yield `None`.
pub trait ProgressParser: Send + Sync {
    fn parse_line(&self, line: &str) -> Option<ProgressSample>;

    /// Path the agent reports for a finished file, which may differ from
    /// the requested name after auto-renaming.
    fn completed_path(&self, _line: &str) -> Option<PathBuf> {
        None
    }
}

/// Parser for aria2c console readouts.
///
/// Understands both the native readout
/// `[#2089b0 400.0KiB/33.2MiB(1%) CN:1 DL:115.7KiB ETA:4m51s]`
/// and compact token sets such as `[#id 42% 1.2MiB/s eta:10s]`.
#[derive(Debug, Clone, Copy, Default)]
pub struct Aria2ProgressParser;

impl ProgressParser for Aria2ProgressParser {
    fn parse_line(&self, line: &str) -> Option<ProgressSample> {
        let mut sample = ProgressSample::default();

        for raw in line.split_whitespace() {
            let parenthesized = raw.starts_with('(') && raw.trim_end_matches(']').ends_with(')');
            let token = raw.trim_matches(|c| matches!(c, '[' | ']' | '(' | ')'));
            if token.is_empty() {
                continue;
            }

            if sample.percent.is_none() && token.contains('%') {
                sample.percent = parse_percent(token);
                continue;
            }

            if sample.speed.is_none() {
                if token.ends_with("/s") {
                    sample.speed = Some(token.to_string());
                    continue;
                }
                if let Some(rate) = token.strip_prefix("DL:") {
                    sample.speed = Some(format!("{rate}/s"));
                    continue;
                }
            }

            if sample.eta.is_none() && token.contains(':') {
                let lower = token.to_ascii_lowercase();
                if parenthesized || lower.starts_with("eta:") {
                    sample.eta = Some(token.to_string());
                }
            }
        }

        (!sample.is_empty()).then_some(sample)
    }

    /// Reads a "Download Results" row such as
    /// `2089b0|OK  |   1.2MiB/s|/models/model.1.safetensors`
    fn completed_path(&self, line: &str) -> Option<PathBuf> {
        let mut fields = line.splitn(4, '|');
        let _gid = fields.next()?;
        if fields.next()?.trim() != "OK" {
            return None;
        }
        let _speed = fields.next()?;
        let path = fields.next()?.trim();
        (!path.is_empty()).then(|| PathBuf::from(path))
    }
}

fn parse_percent(token: &str) -> Option<f32> {
    let captures = PERCENT.captures(token)?;
    let value = captures.get(1)?.as_str().parse::<f32>().ok()?;
    (0.0..=100.0).contains(&value).then_some(value)
}
