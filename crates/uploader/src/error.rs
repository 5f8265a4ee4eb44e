//! Upload error types.

use vaultpush_protocol::{ContentRange, ServiceError};
use vaultpush_transfer::TransferError;
use vaultpush_treehash::{Digest, TreeHashError};

use crate::session::SessionState;

/// Failure reported by a [`RemoteVault`](crate::RemoteVault) call.
#[derive(Debug, Clone, thiserror::Error)]
pub enum VaultError {
    #[error("service error: {0}")]
    Service(#[from] ServiceError),

    #[error("transport error: {0}")]
    Transport(String),
}

impl VaultError {
    /// Transport errors and throttling-style service codes may succeed on
    /// a later attempt.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Service(e) => e.is_transient(),
            Self::Transport(_) => true,
        }
    }
}

/// Errors produced while running an upload session.
#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("failed to begin upload session: {0}")]
    BeginFailed(#[source] VaultError),

    #[error("transfer error: {0}")]
    Transfer(#[from] TransferError),

    #[error("failed to complete upload session: {0}")]
    CompleteFailed(#[source] VaultError),

    #[error("archive checksum mismatch: submitted {expected}, service reported {actual}")]
    ChecksumMismatch { expected: Digest, actual: String },

    #[error("invalid session transition: {from} -> {to}")]
    InvalidTransition { from: SessionState, to: SessionState },

    #[error("tree hash error: {0}")]
    TreeHash(#[from] TreeHashError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl UploadError {
    /// Stable identifier for reporting.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvalidConfiguration(_) => "invalid_configuration",
            Self::BeginFailed(_) => "begin_failed",
            Self::Transfer(e) => e.kind(),
            Self::CompleteFailed(_) => "complete_failed",
            Self::ChecksumMismatch { .. } => "checksum_mismatch",
            Self::InvalidTransition { .. } => "invalid_transition",
            Self::TreeHash(e) => e.kind(),
            Self::Io(_) => "io",
            Self::Json(_) => "json",
        }
    }

    /// Byte range of the segment that triggered the error, if any.
    pub fn range(&self) -> Option<ContentRange> {
        match self {
            Self::Transfer(e) => e.range(),
            _ => None,
        }
    }
}
