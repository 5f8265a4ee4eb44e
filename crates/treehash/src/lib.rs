//! SHA-256 tree hash over 1 MiB leaves.
//!
//! The archive is split into 1 MiB leaves, each leaf is hashed with SHA-256,
//! and the leaf digests are reduced pairwise until a single root remains.
//! An unpaired trailing digest is carried to the next level unchanged.
//!
//! The same reduction is used for a single segment and for the whole
//! archive, so segment checksums can be verified independently by the
//! remote service.

mod digest;
mod tree;

pub use digest::{Digest, DIGEST_LEN};
pub use tree::{
    TreeHasher, leaf_digests, leaf_hash, reduce, tree_hash_bytes, tree_hash_file,
    tree_hash_reader,
};

/// Leaf size for tree hashing: 1 MiB.
pub const LEAF_SIZE: usize = 1024 * 1024;

/// Errors produced by the tree hash crate.
#[derive(Debug, thiserror::Error)]
pub enum TreeHashError {
    #[error("tree hash requires at least one leaf digest")]
    EmptyLeaves,

    #[error("invalid hex digest: {0}")]
    InvalidHex(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl TreeHashError {
    /// Stable identifier for reporting.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::EmptyLeaves => "invalid_input",
            Self::InvalidHex(_) => "invalid_hex",
            Self::Io(_) => "io",
        }
    }
}
