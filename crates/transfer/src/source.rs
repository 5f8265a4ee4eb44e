//! Random-access archive sources.

use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use vaultpush_treehash::{Digest, LEAF_SIZE, TreeHashError, TreeHasher};

/// Immutable archive bytes readable at arbitrary offsets.
///
/// Every call is an independent positioned read, so concurrent workers never
/// share a cursor.
pub trait ArchiveSource: Send + Sync {
    /// Total archive size in bytes.
    fn len(&self) -> u64;

    /// Reads exactly `len` bytes starting at `offset`.
    fn read_at(&self, offset: u64, len: usize) -> std::io::Result<Vec<u8>>;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Tree hash of the whole archive, read one leaf at a time.
    fn tree_hash(&self) -> Result<Digest, TreeHashError> {
        let total = self.len();
        let mut hasher = TreeHasher::new();
        let mut offset = 0;
        while offset < total {
            let len = (total - offset).min(LEAF_SIZE as u64) as usize;
            hasher.update(&self.read_at(offset, len)?);
            offset += len as u64;
        }
        Ok(hasher.finish())
    }
}

// ---------------------------------------------------------------------------
// FileSource
// ---------------------------------------------------------------------------

/// An archive on disk.
///
/// The size is captured when the source is opened; each read opens its own
/// handle.
#[derive(Debug, Clone)]
pub struct FileSource {
    path: PathBuf,
    len: u64,
}

impl FileSource {
    pub fn open(path: &Path) -> std::io::Result<Self> {
        let len = std::fs::metadata(path)?.len();
        Ok(Self {
            path: path.to_path_buf(),
            len,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ArchiveSource for FileSource {
    fn len(&self) -> u64 {
        self.len
    }

    fn read_at(&self, offset: u64, len: usize) -> std::io::Result<Vec<u8>> {
        let mut file = std::fs::File::open(&self.path)?;
        file.seek(SeekFrom::Start(offset))?;
        let mut buf = vec![0u8; len];
        file.read_exact(&mut buf)?;
        Ok(buf)
    }
}

// ---------------------------------------------------------------------------
// MemorySource
// ---------------------------------------------------------------------------

/// An archive held in memory.
#[derive(Debug, Clone, Default)]
pub struct MemorySource {
    data: Vec<u8>,
}

impl MemorySource {
    pub fn new(data: Vec<u8>) -> Self {
        Self { data }
    }
}

impl ArchiveSource for MemorySource {
    fn len(&self) -> u64 {
        self.data.len() as u64
    }

    fn read_at(&self, offset: u64, len: usize) -> std::io::Result<Vec<u8>> {
        let start = usize::try_from(offset).map_err(|_| {
            std::io::Error::new(std::io::ErrorKind::InvalidInput, "offset too large")
        })?;
        self.data
            .get(start..start.saturating_add(len))
            .map(<[u8]>::to_vec)
            .ok_or_else(|| {
                std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    format!("read of {len} bytes at {offset} past end of archive"),
                )
            })
    }
}
