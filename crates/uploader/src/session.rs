//! Upload session record and its state machine.

use std::fmt;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde::{Deserialize, Serialize};

use crate::error::UploadError;

/// Lifecycle of one multipart upload session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    NotStarted,
    SessionOpen,
    Uploading,
    Finalizing,
    /// Archive assembled and confirmed.
    Completed,
    /// Every segment uploaded; the session was left open on request.
    Uploaded,
    /// A fatal failure; the session was discarded.
    Aborted,
    /// A fatal failure; the session (if any) was left for the caller.
    Failed,
}

impl SessionState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Uploaded | Self::Aborted | Self::Failed
        )
    }

    /// Whether `self -> next` is a legal transition.
    pub fn can_transition_to(self, next: SessionState) -> bool {
        use SessionState::*;
        matches!(
            (self, next),
            (NotStarted, SessionOpen | Failed)
                | (SessionOpen, Uploading | Aborted | Failed)
                | (Uploading, Finalizing | Uploaded | Aborted | Failed)
                | (Finalizing, Completed | Failed)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::NotStarted => "not_started",
            Self::SessionOpen => "session_open",
            Self::Uploading => "uploading",
            Self::Finalizing => "finalizing",
            Self::Completed => "completed",
            Self::Uploaded => "uploaded",
            Self::Aborted => "aborted",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Tracks one upload session (thread-safe).
pub struct UploadSession {
    inner: RwLock<SessionInner>,
}

struct SessionInner {
    vault_name: String,
    upload_id: Option<String>,
    block_size: u64,
    state: SessionState,
    error: String,
}

impl UploadSession {
    /// Creates a session that has not been opened yet.
    pub fn new(vault_name: &str, block_size: u64) -> Self {
        Self {
            inner: RwLock::new(SessionInner {
                vault_name: vault_name.to_string(),
                upload_id: None,
                block_size,
                state: SessionState::NotStarted,
                error: String::new(),
            }),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, SessionInner> {
        self.inner.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, SessionInner> {
        self.inner.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Records the session id and moves to `SessionOpen`.
    pub fn open(&self, upload_id: &str) -> Result<(), UploadError> {
        let mut s = self.write();
        Self::advance(&mut s, SessionState::SessionOpen)?;
        s.upload_id = Some(upload_id.to_string());
        Ok(())
    }

    /// Moves to `next`, rejecting illegal transitions.
    pub fn transition(&self, next: SessionState) -> Result<(), UploadError> {
        Self::advance(&mut self.write(), next)
    }

    /// Moves to a failure state (`Aborted` or `Failed`) and records why.
    pub fn fail(&self, next: SessionState, error: &str) -> Result<(), UploadError> {
        let mut s = self.write();
        Self::advance(&mut s, next)?;
        s.error = error.to_string();
        Ok(())
    }

    fn advance(s: &mut SessionInner, next: SessionState) -> Result<(), UploadError> {
        if !s.state.can_transition_to(next) {
            return Err(UploadError::InvalidTransition {
                from: s.state,
                to: next,
            });
        }
        s.state = next;
        Ok(())
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SessionState {
        self.read().state
    }

    /// Service-assigned session id, once opened.
    pub fn upload_id(&self) -> Option<String> {
        self.read().upload_id.clone()
    }

    /// Vault the archive is uploaded into.
    pub fn vault_name(&self) -> String {
        self.read().vault_name.clone()
    }

    /// Part size declared when the session was initiated.
    pub fn block_size(&self) -> u64 {
        self.read().block_size
    }

    /// Last recorded failure message (empty if none).
    pub fn error(&self) -> String {
        self.read().error.clone()
    }

    /// Returns `true` while the remote session is open and not yet closed.
    pub fn is_open(&self) -> bool {
        matches!(
            self.read().state,
            SessionState::SessionOpen | SessionState::Uploading | SessionState::Finalizing
        )
    }
}
