//! Wire types for multipart uploads to a cold-storage vault.
//!
//! The vault service exposes four operations: initiate, upload part,
//! complete and abort. Requests and responses mirror the service's JSON
//! parameter names; sizes travel as decimal strings.

pub mod messages;
pub mod range;

pub use messages::{
    AbortUploadRequest, CompleteUploadRequest, CompleteUploadResponse, InitiateUploadRequest,
    InitiateUploadResponse, ServiceError, UploadPartRequest, UploadPartResponse,
};
pub use range::ContentRange;

/// Errors produced when decoding wire values.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("invalid content range: {0}")]
    InvalidRange(String),
}
