//! Segment planning and bounded concurrent segment uploads.
//!
//! An archive is cut into fixed-size segments by [`plan`]. The
//! [`UploadWorkerPool`] pulls segments from a bounded queue, reads and tree
//! hashes each one, and hands it to a [`SegmentUploader`]. Transient
//! failures are re-enqueued up to the [`RetryPolicy`] ceiling; anything
//! fatal stops the pool after in-flight uploads settle.

mod planner;
mod pool;
mod progress;
mod queue;
mod retry;
mod source;
mod types;

pub use planner::{plan, segment_count, validate_block_size};
pub use pool::{EventSink, SegmentUploader, UploadFailure, UploadWorkerPool};
pub use progress::ThroughputMeter;
pub use retry::RetryPolicy;
pub use source::{ArchiveSource, FileSource, MemorySource};
pub use types::{PoolReport, Segment, SegmentEvent, SegmentReceipt, UploadTask};

use vaultpush_protocol::ContentRange;
use vaultpush_treehash::TreeHashError;

pub use vaultpush_treehash::LEAF_SIZE;

/// Default segment size: 128 MiB.
pub const DEFAULT_BLOCK_SIZE: u64 = 128 * 1024 * 1024;

/// Worker count used when none (or a non-positive one) is configured.
pub const DEFAULT_MAX_WORKERS: usize = 3;

/// Errors produced by the transfer crate.
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to read {range}: {source}")]
    Read {
        range: ContentRange,
        #[source]
        source: std::io::Error,
    },

    #[error("tree hash error: {0}")]
    TreeHash(#[from] TreeHashError),

    #[error("segment {index} ({range}) failed: {reason}")]
    Fatal {
        index: u64,
        range: ContentRange,
        reason: String,
    },

    #[error("segment {index} ({range}) failed after {attempts} attempts: {reason}")]
    RetriesExhausted {
        index: u64,
        range: ContentRange,
        attempts: u32,
        reason: String,
    },

    #[error("only {confirmed} of {planned} segments confirmed")]
    Incomplete { confirmed: usize, planned: usize },

    #[error("cancelled")]
    Cancelled,

    #[error("worker task failed: {0}")]
    Join(String),
}

impl TransferError {
    /// Stable identifier for reporting.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvalidConfiguration(_) => "invalid_configuration",
            Self::Io(_) | Self::Read { .. } => "io",
            Self::TreeHash(e) => e.kind(),
            Self::Fatal { .. } => "fatal",
            Self::RetriesExhausted { .. } => "retries_exhausted",
            Self::Incomplete { .. } => "incomplete",
            Self::Cancelled => "cancelled",
            Self::Join(_) => "internal",
        }
    }

    /// Byte range of the segment that triggered the error, if any.
    pub fn range(&self) -> Option<ContentRange> {
        match self {
            Self::Read { range, .. }
            | Self::Fatal { range, .. }
            | Self::RetriesExhausted { range, .. } => Some(*range),
            _ => None,
        }
    }
}
