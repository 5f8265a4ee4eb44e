use serde::{Deserialize, Serialize};

use crate::range::ContentRange;

// ---------------------------------------------------------------------------
// Request payloads
// ---------------------------------------------------------------------------

/// Opens a multipart upload session in a vault.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitiateUploadRequest {
    pub vault_name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub archive_description: String,
    /// Part size in bytes; every part except the last has exactly this size.
    #[serde(with = "u64_string")]
    pub part_size: u64,
}

/// Metadata for one part. The body travels separately.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadPartRequest {
    pub vault_name: String,
    pub upload_id: String,
    pub range: ContentRange,
    /// Lowercase hex tree hash of the part body.
    pub checksum: String,
}

/// Closes the session and assembles the archive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompleteUploadRequest {
    pub vault_name: String,
    pub upload_id: String,
    #[serde(with = "u64_string")]
    pub archive_size: u64,
    /// Lowercase hex tree hash of the whole archive.
    pub checksum: String,
}

/// Discards the session and every part uploaded to it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AbortUploadRequest {
    pub vault_name: String,
    pub upload_id: String,
}

// ---------------------------------------------------------------------------
// Response payloads
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitiateUploadResponse {
    pub upload_id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub location: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadPartResponse {
    /// Tree hash the service computed for the received part.
    pub checksum: String,
}

/// Confirmation of a completed archive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompleteUploadResponse {
    pub archive_id: String,
    /// Tree hash the service computed over the assembled archive.
    pub checksum: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub location: String,
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Error body returned by the vault service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[serde(rename_all = "camelCase")]
#[error("{code}: {message}")]
pub struct ServiceError {
    pub code: String,
    #[serde(default)]
    pub message: String,
}

impl ServiceError {
    pub const THROTTLING: &'static str = "ThrottlingException";
    pub const REQUEST_TIMEOUT: &'static str = "RequestTimeoutException";
    pub const SERVICE_UNAVAILABLE: &'static str = "ServiceUnavailableException";
    pub const LIMIT_EXCEEDED: &'static str = "LimitExceededException";
    pub const RESOURCE_NOT_FOUND: &'static str = "ResourceNotFoundException";
    pub const ACCESS_DENIED: &'static str = "AccessDeniedException";
    pub const INVALID_PARAMETER: &'static str = "InvalidParameterValueException";
    pub const MISSING_PARAMETER: &'static str = "MissingParameterValueException";

    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }

    /// Whether repeating the same request may succeed.
    ///
    /// Unknown codes are treated as permanent.
    pub fn is_transient(&self) -> bool {
        matches!(
            self.code.as_str(),
            Self::THROTTLING | Self::REQUEST_TIMEOUT | Self::SERVICE_UNAVAILABLE | Self::LIMIT_EXCEEDED
        )
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Sizes are exchanged as decimal strings.
mod u64_string {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &u64, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(value)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u64, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn initiate_request_sends_part_size_as_string() {
        let req = InitiateUploadRequest {
            vault_name: "photos".into(),
            archive_description: String::new(),
            part_size: 134_217_728,
        };
        let json = serde_json::to_string(&req).unwrap();
        assert!(json.contains("\"partSize\":\"134217728\""));
        assert!(json.contains("\"vaultName\":\"photos\""));
        assert!(!json.contains("archiveDescription"));
        let parsed: InitiateUploadRequest = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, req);
    }

    #[test]
    fn upload_part_request_carries_range_header() {
        let req = UploadPartRequest {
            vault_name: "photos".into(),
            upload_id: "u1".into(),
            range: ContentRange::for_span(0, 1024),
            checksum: "ab".repeat(32),
        };
        let json = serde_json::to_string(&req).unwrap();
        assert!(json.contains("\"range\":\"bytes 0-1023/*\""));
        assert!(json.contains("\"uploadId\":\"u1\""));
    }

    #[test]
    fn complete_request_rejects_non_numeric_size() {
        let json = r#"{"vaultName":"v","uploadId":"u","archiveSize":"ten","checksum":"00"}"#;
        assert!(serde_json::from_str::<CompleteUploadRequest>(json).is_err());
    }

    #[test]
    fn complete_response_location_optional() {
        let json = r#"{"archiveId":"a1","checksum":"00"}"#;
        let parsed: CompleteUploadResponse = serde_json::from_str(json).unwrap();
        assert_eq!(parsed.archive_id, "a1");
        assert!(parsed.location.is_empty());
    }

    #[test]
    fn service_error_classification() {
        assert!(ServiceError::new(ServiceError::THROTTLING, "slow down").is_transient());
        assert!(ServiceError::new(ServiceError::REQUEST_TIMEOUT, "").is_transient());
        assert!(!ServiceError::new(ServiceError::ACCESS_DENIED, "").is_transient());
        assert!(!ServiceError::new(ServiceError::RESOURCE_NOT_FOUND, "no such upload").is_transient());
        assert!(!ServiceError::new("SomethingNew", "").is_transient());
    }

    #[test]
    fn service_error_display() {
        let err = ServiceError::new(ServiceError::RESOURCE_NOT_FOUND, "upload u1 not found");
        assert_eq!(err.to_string(), "ResourceNotFoundException: upload u1 not found");
    }
}
