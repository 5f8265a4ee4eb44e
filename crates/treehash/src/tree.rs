use std::io::Read;
use std::path::Path;

use sha2::{Digest as _, Sha256};

use crate::{Digest, LEAF_SIZE, TreeHashError};

// ---------------------------------------------------------------------------
// Leaves
// ---------------------------------------------------------------------------

/// SHA-256 of a raw block. Any length is accepted, including zero.
pub fn leaf_hash(block: &[u8]) -> Digest {
    Digest::from_bytes(Sha256::digest(block).into())
}

/// Digests of consecutive 1 MiB leaves of `data`.
///
/// Empty input yields a single digest of the empty block, so the result is
/// never empty.
pub fn leaf_digests(data: &[u8]) -> Vec<Digest> {
    if data.is_empty() {
        return vec![leaf_hash(&[])];
    }
    data.chunks(LEAF_SIZE).map(leaf_hash).collect()
}

// ---------------------------------------------------------------------------
// Reduction
// ---------------------------------------------------------------------------

fn hash_pair(left: &Digest, right: &Digest) -> Digest {
    let mut hasher = Sha256::new();
    hasher.update(left.as_bytes());
    hasher.update(right.as_bytes());
    Digest::from_bytes(hasher.finalize().into())
}

fn next_level(level: &[Digest]) -> Vec<Digest> {
    level
        .chunks(2)
        .map(|pair| match pair {
            [left, right] => hash_pair(left, right),
            // Unpaired trailing digest moves up unchanged.
            [odd] => *odd,
            _ => unreachable!("chunks(2) yields one or two items"),
        })
        .collect()
}

/// Reduces ordered leaf digests to the tree hash root.
pub fn reduce(leaves: &[Digest]) -> Result<Digest, TreeHashError> {
    match leaves {
        [] => Err(TreeHashError::EmptyLeaves),
        [single] => Ok(*single),
        _ => {
            let mut level = next_level(leaves);
            while level.len() > 1 {
                level = next_level(&level);
            }
            Ok(level[0])
        }
    }
}

/// Tree hash of an in-memory block split into 1 MiB leaves.
pub fn tree_hash_bytes(data: &[u8]) -> Digest {
    let leaves = leaf_digests(data);
    // leaf_digests never returns an empty vector.
    reduce(&leaves).unwrap_or_else(|_| leaf_hash(&[]))
}

// ---------------------------------------------------------------------------
// Streaming
// ---------------------------------------------------------------------------

/// Incremental tree hasher.
///
/// Accepts data in arbitrary pieces and hashes every full 1 MiB leaf as soon
/// as it is complete, so at most one leaf is buffered.
#[derive(Debug, Clone)]
pub struct TreeHasher {
    pending: Vec<u8>,
    leaves: Vec<Digest>,
    total: u64,
}

impl Default for TreeHasher {
    fn default() -> Self {
        Self::new()
    }
}

impl TreeHasher {
    pub fn new() -> Self {
        Self {
            pending: Vec::with_capacity(LEAF_SIZE),
            leaves: Vec::new(),
            total: 0,
        }
    }

    /// Feeds more data.
    pub fn update(&mut self, mut data: &[u8]) {
        self.total += data.len() as u64;
        while !data.is_empty() {
            let room = LEAF_SIZE - self.pending.len();
            let take = room.min(data.len());
            self.pending.extend_from_slice(&data[..take]);
            data = &data[take..];

            if self.pending.len() == LEAF_SIZE {
                self.leaves.push(leaf_hash(&self.pending));
                self.pending.clear();
            }
        }
    }

    /// Bytes fed so far.
    pub fn total_bytes(&self) -> u64 {
        self.total
    }

    /// Completes hashing and returns every leaf digest in order.
    pub fn into_leaves(mut self) -> Vec<Digest> {
        if !self.pending.is_empty() || self.leaves.is_empty() {
            self.leaves.push(leaf_hash(&self.pending));
        }
        self.leaves
    }

    /// Completes hashing and returns the root.
    pub fn finish(self) -> Digest {
        let leaves = self.into_leaves();
        reduce(&leaves).unwrap_or_else(|_| leaf_hash(&[]))
    }
}

/// Tree hash of everything `reader` yields.
pub fn tree_hash_reader<R: Read>(mut reader: R) -> Result<Digest, TreeHashError> {
    let mut hasher = TreeHasher::new();
    let mut buf = vec![0u8; 64 * 1024];
    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hasher.finish())
}

/// Tree hash of the file at `path`.
pub fn tree_hash_file(path: &Path) -> Result<Digest, TreeHashError> {
    let file = std::fs::File::open(path)?;
    tree_hash_reader(std::io::BufReader::new(file))
}
