use std::time::Duration;

use vaultpush_protocol::ContentRange;
use vaultpush_treehash::Digest;

/// A contiguous byte range of the archive, uploaded as one part.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Segment {
    /// Zero-based block index.
    pub index: u64,
    /// Offset of the first byte.
    pub start: u64,
    /// Length in bytes; only the final segment may be short.
    pub len: u64,
}

impl Segment {
    /// Offset one past the last byte.
    pub fn end(&self) -> u64 {
        self.start + self.len
    }

    /// Wire range for this segment.
    pub fn range(&self) -> ContentRange {
        ContentRange::for_span(self.start, self.len)
    }
}

/// A pending upload of one segment.
///
/// The body and its digests are filled in by the first worker that claims
/// the task and kept across retries.
#[derive(Debug)]
pub struct UploadTask {
    pub segment: Segment,
    /// Upload attempts made so far.
    pub attempts: u32,
    pub(crate) body: Option<Vec<u8>>,
    pub(crate) leaves: Vec<Digest>,
    pub(crate) checksum: Option<Digest>,
}

impl UploadTask {
    pub fn new(segment: Segment) -> Self {
        Self {
            segment,
            attempts: 0,
            body: None,
            leaves: Vec::new(),
            checksum: None,
        }
    }

    /// Segment tree hash, once computed.
    pub fn checksum(&self) -> Option<Digest> {
        self.checksum
    }
}

/// Confirmation of one uploaded segment.
#[derive(Debug, Clone)]
pub struct SegmentReceipt {
    pub segment: Segment,
    pub checksum: Digest,
    pub attempts: u32,
    /// 1 MiB leaf digests of the segment, in order.
    pub leaves: Vec<Digest>,
}

/// Result of a pool run in which every segment succeeded.
#[derive(Debug, Clone, Default)]
pub struct PoolReport {
    pub bytes_uploaded: u64,
    /// Receipts sorted by segment index.
    pub receipts: Vec<SegmentReceipt>,
}

impl PoolReport {
    /// Leaf digests of every uploaded segment, in archive order.
    pub fn leaf_digests(&self) -> Vec<Digest> {
        self.receipts
            .iter()
            .flat_map(|r| r.leaves.iter().copied())
            .collect()
    }
}

/// Per-segment progress emitted by the pool.
#[derive(Debug, Clone)]
pub enum SegmentEvent {
    /// The segment was accepted by the remote service.
    Uploaded {
        segment: Segment,
        checksum: Digest,
        attempts: u32,
    },
    /// A transient failure; the segment goes back on the queue.
    Retrying {
        segment: Segment,
        attempt: u32,
        delay: Duration,
        reason: String,
    },
}
