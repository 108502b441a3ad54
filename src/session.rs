//! Bookkeeping for the single in-flight transfer.
//!
//! A [`SessionController`] is shared between whoever starts downloads and
//! whoever cancels them. [`SessionController::begin`] hands out a
//! [`TransferSession`] guard; dropping the guard clears the controller on
//! every exit path, so a finished transfer can never be "cancelled" and a new
//! one can start right away.

use std::{
    fmt,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use ulid::Ulid;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error("A transfer is already running ({id})")]
    Busy { id: Ulid },
}

/// Result of a cancel request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CancelOutcome {
    Requested { id: Ulid },
    NothingRunning,
}

impl fmt::Display for CancelOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Requested { .. } => write!(f, "Cancelling the running download"),
            Self::NothingRunning => write!(f, "Nothing running to cancel"),
        }
    }
}

#[derive(Debug)]
struct ActiveSession {
    id: Ulid,
    token: CancellationToken,
    pid: Option<u32>,
}

#[derive(Debug, Default)]
pub struct SessionController {
    active: Mutex<Option<ActiveSession>>,
}

impl SessionController {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn lock(&self) -> MutexGuard<'_, Option<ActiveSession>> {
        // The guarded data stays consistent even if a holder panicked
        self.active.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Claim the controller for a new transfer. Rejects overlapping transfers.
    pub fn begin(self: &Arc<Self>) -> Result<TransferSession, SessionError> {
        let mut active = self.lock();
        if let Some(ref current) = *active {
            debug!(id = %current.id, "Rejecting transfer while another is active");
            return Err(SessionError::Busy { id: current.id });
        }

        let id = Ulid::new();
        let token = CancellationToken::new();
        *active = Some(ActiveSession {
            id,
            token: token.clone(),
            pid: None,
        });
        info!(id = %id, "Transfer session started");

        Ok(TransferSession {
            id,
            token,
            controller: Arc::clone(self),
        })
    }

    /// Ask the running transfer to stop. Non-blocking: the transfer's own
    /// loop interrupts the agent and reports the cancellation.
    pub fn cancel(&self) -> CancelOutcome {
        let active = self.lock();
        match active.as_ref() {
            Some(session) => {
                info!(id = %session.id, pid = ?session.pid, "Cancellation requested");
                session.token.cancel();
                CancelOutcome::Requested { id: session.id }
            }
            None => {
                debug!("Cancel requested with no active transfer");
                CancelOutcome::NothingRunning
            }
        }
    }

    pub fn is_active(&self) -> bool {
        self.lock().is_some()
    }

    pub fn active_id(&self) -> Option<Ulid> {
        self.lock().as_ref().map(|s| s.id)
    }

    /// Process id of the agent driven by the active session, once launched
    pub fn active_pid(&self) -> Option<u32> {
        self.lock().as_ref().and_then(|s| s.pid)
    }

    fn attach_pid(&self, id: Ulid, pid: Option<u32>) {
        if let Some(session) = self.lock().as_mut().filter(|s| s.id == id) {
            session.pid = pid;
        }
    }

    fn release(&self, id: Ulid) {
        let mut active = self.lock();
        if active.as_ref().is_some_and(|s| s.id == id) {
            *active = None;
            info!(id = %id, "Transfer session cleared");
        }
    }
}

/// Guard for one running transfer. Dropping it clears the controller.
#[derive(Debug)]
pub struct TransferSession {
    id: Ulid,
    token: CancellationToken,
    controller: Arc<SessionController>,
}

impl TransferSession {
    pub fn id(&self) -> Ulid {
        self.id
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Record the agent's process id so the controller can report it
    pub fn attach_process(&self, pid: Option<u32>) {
        self.controller.attach_pid(self.id, pid);
    }
}

impl Drop for TransferSession {
    fn drop(&mut self) {
        self.controller.release(self.id);
    }
}
