//! Metadata-only availability probe run before committing to a transfer.

use bytesize::ByteSize;
use reqwest::{Client, StatusCode, header};
use std::{fmt, time::Duration};
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::config::ProbeConfig;
use crate::filename::{is_valid_filename, resolve_filename};

/// Why a URL was rejected by the probe
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Unavailable {
    #[error("HTTP status {0}")]
    Status(u16),

    #[error("empty file")]
    EmptyFile,

    #[error("not a direct file")]
    NotDirectFile,

    #[error("invalid filename")]
    InvalidFilename,

    #[error("timeout")]
    Timeout,

    #[error("connection error")]
    Connection,

    #[error("{0}")]
    Other(String),
}

/// Outcome of probing a URL. Produced once per request and never mutated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeResult {
    pub available: bool,
    pub filename: Option<String>,
    pub reason: Option<Unavailable>,
    pub content_length: Option<u64>,
    pub content_type: Option<String>,
}

impl ProbeResult {
    fn available(
        filename: String,
        content_length: Option<u64>,
        content_type: Option<String>,
    ) -> Self {
        Self {
            available: true,
            filename: Some(filename),
            reason: None,
            content_length,
            content_type,
        }
    }

    fn unavailable(reason: Unavailable) -> Self {
        Self {
            available: false,
            filename: None,
            reason: Some(reason),
            content_length: None,
            content_type: None,
        }
    }

    fn with_metadata(mut self, content_length: Option<u64>, content_type: Option<String>) -> Self {
        self.content_length = content_length;
        self.content_type = content_type;
        self
    }

    /// Human-readable rejection reason, if any
    pub fn error_reason(&self) -> Option<String> {
        self.reason.as_ref().map(|r| r.to_string())
    }
}

impl fmt::Display for ProbeResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.reason, &self.filename) {
            (Some(reason), _) => write!(f, "Unavailable: {}", reason),
            (None, Some(filename)) => {
                write!(f, "Available: {}", filename)?;
                if let Some(size) = self.content_length {
                    write!(f, " ({})", ByteSize::b(size))?;
                }
                if let Some(ref content_type) = self.content_type {
                    write!(f, " [{}]", content_type)?;
                }
                Ok(())
            }
            (None, None) => write!(f, "Available"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Prober {
    client: Client,
}

impl Prober {
    pub fn new(timeout: Duration, max_redirects: usize) -> reqwest::Result<Self> {
        let client = Client::builder()
            .redirect(reqwest::redirect::Policy::limited(max_redirects))
            .timeout(timeout)
            .build()?;
        Ok(Self { client })
    }

    pub fn from_config(config: &ProbeConfig) -> reqwest::Result<Self> {
        Self::new(config.timeout(), config.max_redirects)
    }

    /// Issue a HEAD request (redirects followed) and classify the response.
    /// Never fails: every fault is mapped to an unavailable result.
    #[instrument(name = "probe", level = "debug", skip(self))]
    pub async fn probe(&self, url: &str) -> ProbeResult {
        let response = match self.client.head(url).send().await {
            Ok(response) => response,
            Err(e) => {
                let reason = classify_request_error(&e);
                warn!(error = %e, reason = %reason, "Probe request failed");
                return ProbeResult::unavailable(reason);
            }
        };

        let status = response.status();
        let headers = response.headers();

        let content_length = headers
            .get(header::CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok());
        let content_type = headers
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        debug!(
            status = status.as_u16(),
            final_url = %response.url(),
            content_length = ?content_length,
            content_type = ?content_type,
            "Probe response"
        );

        if status != StatusCode::OK {
            return ProbeResult::unavailable(Unavailable::Status(status.as_u16()))
                .with_metadata(content_length, content_type);
        }

        if content_length == Some(0) {
            return ProbeResult::unavailable(Unavailable::EmptyFile)
                .with_metadata(content_length, content_type);
        }

        if content_type
            .as_deref()
            .is_some_and(|ct| ct.to_ascii_lowercase().contains("text/html"))
        {
            return ProbeResult::unavailable(Unavailable::NotDirectFile)
                .with_metadata(content_length, content_type);
        }

        let filename = resolve_filename(headers, response.url().as_str());
        if !is_valid_filename(&filename) {
            return ProbeResult::unavailable(Unavailable::InvalidFilename)
                .with_metadata(content_length, content_type);
        }

        info!(
            filename = %filename,
            size = %content_length.map(|s| ByteSize::b(s).to_string()).unwrap_or_else(|| "unknown".into()),
            "URL is available"
        );
        ProbeResult::available(filename, content_length, content_type)
    }
}

fn classify_request_error(e: &reqwest::Error) -> Unavailable {
    if e.is_timeout() {
        Unavailable::Timeout
    } else if e.is_connect() || e.is_request() {
        Unavailable::Connection
    } else {
        Unavailable::Other(e.to_string())
    }
}
