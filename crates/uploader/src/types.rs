//! Data types for the upload flow.

use std::time::Duration;

use vaultpush_protocol::ContentRange;
use vaultpush_treehash::Digest;

use crate::error::UploadError;
use crate::session::SessionState;

/// Progress event emitted during an upload session.
#[derive(Debug, Clone)]
pub enum UploadEvent {
    /// A session was opened, or an existing one accepted.
    SessionOpened { upload_id: String, resumed: bool },
    /// Segments were planned and the pool started.
    Planned { segments: usize, bytes: u64 },
    /// A segment was accepted by the service.
    SegmentUploaded {
        index: u64,
        range: ContentRange,
        checksum: Digest,
        attempts: u32,
    },
    /// A segment failed transiently and will be retried.
    SegmentRetrying {
        index: u64,
        range: ContentRange,
        attempt: u32,
        delay: Duration,
        reason: String,
    },
    /// All segments uploaded; completing the session.
    Finalizing { tree_hash: Digest },
    /// Archive assembled.
    Completed { archive_id: String },
    /// All segments uploaded and the session left open.
    Uploaded { upload_id: String },
    /// Session discarded after a fatal failure.
    Aborted { error: String },
    /// Session ended with an error and was not discarded.
    Failed { error: String },
}

/// Outcome of one [`SessionOrchestrator::run`](crate::SessionOrchestrator::run).
#[derive(Debug)]
pub struct UploadReport {
    pub upload_id: Option<String>,
    pub state: SessionState,
    /// Size of the whole archive.
    pub total_size: u64,
    /// Bytes confirmed by the service in this run.
    pub bytes_uploaded: u64,
    /// Segments confirmed in this run.
    pub segments: usize,
    /// Whole-archive tree hash, when it was computed.
    pub tree_hash: Option<Digest>,
    pub archive_id: Option<String>,
    /// The first fatal error, if the run failed.
    pub error: Option<UploadError>,
}

impl UploadReport {
    pub(crate) fn new(total_size: u64) -> Self {
        Self {
            upload_id: None,
            state: SessionState::NotStarted,
            total_size,
            bytes_uploaded: 0,
            segments: 0,
            tree_hash: None,
            archive_id: None,
            error: None,
        }
    }

    /// Returns `true` for `Completed` and `Uploaded`.
    pub fn is_success(&self) -> bool {
        self.error.is_none()
            && matches!(self.state, SessionState::Completed | SessionState::Uploaded)
    }

    /// Kind of the fatal error, if any.
    pub fn error_kind(&self) -> Option<&'static str> {
        self.error.as_ref().map(UploadError::kind)
    }

    /// Byte range of the segment that caused the failure, if any.
    pub fn failed_range(&self) -> Option<ContentRange> {
        self.error.as_ref().and_then(UploadError::range)
    }

    /// Converts a failed report into its error.
    pub fn into_result(mut self) -> Result<Self, UploadError> {
        match self.error.take() {
            Some(err) => Err(err),
            None => Ok(self),
        }
    }
}
