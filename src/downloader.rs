//! Orchestrates one download request: normalize, probe, transfer.

use std::{
    fmt,
    path::{Path, PathBuf},
    sync::Arc,
};
use tracing::{info, instrument, warn};

use crate::config::Config;
use crate::normalize::UrlNormalizer;
use crate::probe::{ProbeResult, Prober};
use crate::session::{CancelOutcome, SessionController, SessionError};
use crate::settings::Settings;
use crate::transfer::{ProgressSample, TransferEngine, TransferOutcome};

/// A user's request to fetch one URL into a directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadRequest {
    pub url: String,
    pub destination_dir: PathBuf,
}

impl DownloadRequest {
    pub fn new(url: impl Into<String>, destination_dir: impl AsRef<Path>) -> Self {
        Self {
            url: url.into(),
            destination_dir: destination_dir.as_ref().to_path_buf(),
        }
    }
}

/// Intermediate updates emitted while a request runs
#[derive(Debug, Clone, PartialEq)]
pub enum DownloadEvent {
    /// The probe accepted the URL and the transfer is about to start
    Resolved {
        filename: String,
        content_length: Option<u64>,
    },
    Progress(ProgressSample),
}

/// The single final status of a download attempt
#[derive(Debug, Clone, PartialEq)]
pub enum DownloadStatus {
    EmptyUrl,
    Busy(SessionError),
    Unavailable(ProbeResult),
    Transfer(TransferOutcome),
}

impl DownloadStatus {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Transfer(outcome) if outcome.is_success())
    }
}

impl fmt::Display for DownloadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmptyUrl => write!(f, "Error: please enter a URL"),
            Self::Busy(e) => write!(f, "Error: {}", e),
            Self::Unavailable(probe) => write!(
                f,
                "Error: URL is not downloadable ({})",
                probe.error_reason().unwrap_or_else(|| "unknown reason".into())
            ),
            Self::Transfer(outcome) => outcome.fmt(f),
        }
    }
}

pub struct DownloadManager {
    normalizer: UrlNormalizer,
    prober: Prober,
    engine: TransferEngine,
    sessions: Arc<SessionController>,
}

impl DownloadManager {
    pub fn new(normalizer: UrlNormalizer, prober: Prober, engine: TransferEngine) -> Self {
        Self {
            normalizer,
            prober,
            engine,
            sessions: SessionController::new(),
        }
    }

    pub fn from_config(config: &Config) -> reqwest::Result<Self> {
        let settings = Settings::load_or_default(&config.settings_path());
        Ok(Self::new(
            UrlNormalizer::new(settings.api_key()),
            Prober::from_config(&config.probe)?,
            TransferEngine::new(config.agent.clone()),
        ))
    }

    /// Shared handle for cancelling from another task
    pub fn sessions(&self) -> Arc<SessionController> {
        Arc::clone(&self.sessions)
    }

    pub fn cancel(&self) -> CancelOutcome {
        self.sessions.cancel()
    }

    /// Probe a URL without downloading it
    pub async fn probe(&self, url: &str) -> ProbeResult {
        self.prober.probe(&self.normalizer.normalize(url.trim())).await
    }

    /// Run a request to its final status. Overlapping requests are rejected.
    #[instrument(name = "download", skip(self, on_event), fields(url = %request.url))]
    pub async fn download<F>(&self, request: &DownloadRequest, mut on_event: F) -> DownloadStatus
    where
        F: FnMut(DownloadEvent),
    {
        let url = request.url.trim();
        if url.is_empty() {
            return DownloadStatus::EmptyUrl;
        }

        let session = match self.sessions.begin() {
            Ok(session) => session,
            Err(e) => {
                warn!(error = %e, "Download rejected");
                return DownloadStatus::Busy(e);
            }
        };

        let url = self.normalizer.normalize(url);
        let probe = self.prober.probe(&url).await;
        let filename = match (probe.available, probe.filename.clone()) {
            (true, Some(filename)) => filename,
            _ => {
                info!(reason = ?probe.error_reason(), "URL rejected by probe");
                return DownloadStatus::Unavailable(probe);
            }
        };

        if session.is_cancelled() {
            return DownloadStatus::Transfer(TransferOutcome::Cancelled);
        }

        on_event(DownloadEvent::Resolved {
            filename: filename.clone(),
            content_length: probe.content_length,
        });

        let outcome = self
            .engine
            .start_transfer(
                &session,
                &url,
                &request.destination_dir,
                &filename,
                |sample| on_event(DownloadEvent::Progress(sample)),
            )
            .await;
        DownloadStatus::Transfer(outcome)
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::config::AgentConfig;
    use crate::transfer::engine::tests::fake_agent;
    use std::time::Duration;
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn model_server() -> MockServer {
        let server = MockServer::start().await;
        Mock::given(method("HEAD"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header(
                        "content-disposition",
                        "attachment; filename=\"model.safetensors\"",
                    )
                    .insert_header("content-length", "16")
                    .set_body_bytes(vec![0u8; 16]),
            )
            .mount(&server)
            .await;
        server
    }

    fn manager(agent: PathBuf) -> DownloadManager {
        DownloadManager::new(
            UrlNormalizer::default(),
            Prober::new(Duration::from_secs(5), 10).unwrap(),
            TransferEngine::new(AgentConfig {
                program: agent,
                ..AgentConfig::default()
            }),
        )
    }

    #[tokio::test]
    async fn test_end_to_end_success() {
        let server = model_server().await;
        let tmp = tempfile::tempdir().unwrap();
        let agent = fake_agent(tmp.path(), "echo '[#1 50% 1MiB/s eta:1s]'\nexit 0");
        let dest = tmp.path().join("downloads");
        let manager = manager(agent);

        let mut events = Vec::new();
        let status = manager
            .download(
                &DownloadRequest::new(format!("{}/api/download/models/1", server.uri()), &dest),
                |event| events.push(event),
            )
            .await;

        let expected = dest.join("model.safetensors");
        assert!(status.is_success(), "{status}");
        assert!(status.to_string().contains(&expected.display().to_string()));
        assert_eq!(
            events.first(),
            Some(&DownloadEvent::Resolved {
                filename: "model.safetensors".into(),
                content_length: Some(16),
            })
        );
        assert!(matches!(events.get(1), Some(DownloadEvent::Progress(s)) if s.percent == Some(50.0)));

        let args = std::fs::read_to_string(tmp.path().join("args.txt")).unwrap();
        assert!(args.lines().any(|l| l == "model.safetensors"));
        assert!(args.lines().any(|l| l == dest.display().to_string()));
        assert!(!manager.sessions().is_active());
    }

    #[tokio::test]
    async fn test_end_to_end_agent_failure() {
        let server = model_server().await;
        let tmp = tempfile::tempdir().unwrap();
        let agent = fake_agent(tmp.path(), "echo 'disk full' >&2\nexit 7");
        let manager = manager(agent);

        let status = manager
            .download(
                &DownloadRequest::new(format!("{}/m", server.uri()), tmp.path().join("out")),
                |_| {},
            )
            .await;

        assert!(!status.is_success());
        assert!(status.to_string().contains("disk full"));
        assert!(!manager.sessions().is_active());
    }

    #[tokio::test]
    async fn test_unavailable_never_launches_agent() {
        let server = MockServer::start().await;
        Mock::given(method("HEAD"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        let tmp = tempfile::tempdir().unwrap();
        let agent = fake_agent(tmp.path(), "exit 0");
        let manager = manager(agent);

        let status = manager
            .download(
                &DownloadRequest::new(format!("{}/gone.bin", server.uri()), tmp.path()),
                |_| panic!("no events expected"),
            )
            .await;

        assert!(matches!(status, DownloadStatus::Unavailable(_)));
        assert!(status.to_string().contains("404"));
        assert!(!tmp.path().join("args.txt").exists());
        assert!(!manager.sessions().is_active());
    }

    #[tokio::test]
    async fn test_empty_url() {
        let tmp = tempfile::tempdir().unwrap();
        let manager = manager(tmp.path().join("unused"));

        let status = manager
            .download(&DownloadRequest::new("   ", tmp.path()), |_| {})
            .await;

        assert_eq!(status, DownloadStatus::EmptyUrl);
    }

    #[tokio::test]
    async fn test_overlapping_download_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let manager = manager(tmp.path().join("unused"));
        let running = manager.sessions().begin().unwrap();

        let status = manager
            .download(
                &DownloadRequest::new("https://example.com/file.bin", tmp.path()),
                |_| {},
            )
            .await;

        assert_eq!(
            status,
            DownloadStatus::Busy(SessionError::Busy { id: running.id() })
        );
        assert!(status.to_string().contains("already running"));
    }

    #[tokio::test]
    async fn test_cancel_without_transfer() {
        let tmp = tempfile::tempdir().unwrap();
        let manager = manager(tmp.path().join("unused"));

        assert_eq!(manager.cancel(), CancelOutcome::NothingRunning);
        assert!(!manager.sessions().is_active());
    }
}
