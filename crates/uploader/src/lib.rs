//! Multipart archive uploads to a cold-storage vault.
//!
//! This crate owns the session lifecycle. The embedding application
//! provides a [`RemoteVault`] implementation on top of its HTTP client;
//! everything else (planning, hashing, concurrent part uploads with retry,
//! finalization and abort) happens here.
//!
//! # Lifecycle
//!
//! 1. **Open**: initiate a session, or accept an existing upload id
//! 2. **Upload**: plan segments and run the worker pool
//! 3. **Finalize**: compute the archive tree hash and complete the session
//! 4. **Abort**: on a fatal upload failure, discard the session

pub mod config;
pub mod error;
pub mod logging;
pub mod memory;
pub mod orchestrator;
pub mod remote;
pub mod session;
pub mod types;

pub use config::UploadConfig;
pub use error::{UploadError, VaultError};
pub use memory::{CallCounts, MemoryVault, StoredArchive};
pub use orchestrator::SessionOrchestrator;
pub use remote::{RemoteVault, VaultFuture};
pub use session::{SessionState, UploadSession};
pub use types::{UploadEvent, UploadReport};
