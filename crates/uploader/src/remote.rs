//! Remote vault trait and the per-part adapter used by the worker pool.
//!
//! `RemoteVault` is implemented by the embedding application on top of its
//! HTTP client. Using a trait keeps session logic independent of the
//! transport and testable with [`MemoryVault`](crate::MemoryVault).

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tracing::warn;
use vaultpush_protocol::{
    AbortUploadRequest, CompleteUploadRequest, CompleteUploadResponse, InitiateUploadRequest,
    InitiateUploadResponse, UploadPartRequest, UploadPartResponse,
};
use vaultpush_transfer::{Segment, SegmentUploader, UploadFailure};
use vaultpush_treehash::Digest;

use crate::error::VaultError;

/// Boxed future returned by [`RemoteVault`] calls.
pub type VaultFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, VaultError>> + Send + 'a>>;

/// The four multipart operations of the vault service.
pub trait RemoteVault: Send + Sync {
    /// Opens a session and returns its id.
    fn initiate_upload<'a>(
        &'a self,
        req: &'a InitiateUploadRequest,
    ) -> VaultFuture<'a, InitiateUploadResponse>;

    /// Sends one part. `body` covers exactly `req.range`.
    fn upload_part<'a>(
        &'a self,
        req: &'a UploadPartRequest,
        body: &'a [u8],
    ) -> VaultFuture<'a, UploadPartResponse>;

    /// Assembles the uploaded parts into an archive.
    fn complete_upload<'a>(
        &'a self,
        req: &'a CompleteUploadRequest,
    ) -> VaultFuture<'a, CompleteUploadResponse>;

    /// Discards the session.
    fn abort_upload<'a>(&'a self, req: &'a AbortUploadRequest) -> VaultFuture<'a, ()>;
}

/// Uploads segments of one session through a [`RemoteVault`].
pub(crate) struct PartUploader {
    remote: Arc<dyn RemoteVault>,
    vault_name: String,
    upload_id: String,
}

impl PartUploader {
    pub(crate) fn new(remote: Arc<dyn RemoteVault>, vault_name: &str, upload_id: &str) -> Self {
        Self {
            remote,
            vault_name: vault_name.to_string(),
            upload_id: upload_id.to_string(),
        }
    }
}

impl SegmentUploader for PartUploader {
    fn upload<'a>(
        &'a self,
        segment: &'a Segment,
        checksum: &'a Digest,
        body: &'a [u8],
    ) -> Pin<Box<dyn Future<Output = Result<(), UploadFailure>> + Send + 'a>> {
        Box::pin(async move {
            let req = UploadPartRequest {
                vault_name: self.vault_name.clone(),
                upload_id: self.upload_id.clone(),
                range: segment.range(),
                checksum: checksum.to_hex(),
            };

            match self.remote.upload_part(&req, body).await {
                Ok(resp) if resp.checksum.eq_ignore_ascii_case(&req.checksum) => Ok(()),
                Ok(resp) => {
                    warn!(
                        segment = segment.index,
                        range = %req.range,
                        expected = %req.checksum,
                        actual = %resp.checksum,
                        "part checksum mismatch"
                    );
                    Err(UploadFailure::Fatal(format!(
                        "service reported part checksum {} for {}, expected {}",
                        resp.checksum, req.range, req.checksum
                    )))
                }
                Err(e) if e.is_transient() => Err(UploadFailure::Transient(e.to_string())),
                Err(e) => Err(UploadFailure::Fatal(e.to_string())),
            }
        })
    }
}
