//! Upload configuration.
//!
//! Read from a camelCase JSON file; every field has a default, so a file
//! containing only `{"vaultName": "..."}` is complete.

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;
use vaultpush_transfer::{DEFAULT_BLOCK_SIZE, DEFAULT_MAX_WORKERS, RetryPolicy};

use crate::error::UploadError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct UploadConfig {
    /// Target vault.
    pub vault_name: String,

    /// Archive description sent when the session is opened. Empty means
    /// one is derived from the source file name.
    pub description: String,

    /// Segment size in bytes; a multiple of 1 MiB.
    pub block_size: u64,

    /// First block to upload.
    pub start_block: u64,

    /// Last block to upload, inclusive. `None` means the last block.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_block: Option<u64>,

    /// Existing session to continue instead of opening a new one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub upload_id: Option<String>,

    /// Concurrent uploads. Zero or negative means the default.
    pub max_workers: i64,

    /// Complete the session once every segment is uploaded.
    pub finalize: bool,

    /// Abort the session after a fatal upload failure.
    pub abort_on_failure: bool,

    pub retry: RetryPolicy,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            vault_name: String::new(),
            description: String::new(),
            block_size: DEFAULT_BLOCK_SIZE,
            start_block: 0,
            end_block: None,
            upload_id: None,
            max_workers: DEFAULT_MAX_WORKERS as i64,
            finalize: true,
            abort_on_failure: true,
            retry: RetryPolicy::default(),
        }
    }
}

impl UploadConfig {
    pub fn new(vault_name: impl Into<String>) -> Self {
        Self {
            vault_name: vault_name.into(),
            ..Default::default()
        }
    }

    /// Loads a configuration file.
    pub fn load(path: &Path) -> Result<Self, UploadError> {
        let data = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&data)?;
        debug!(path = %path.display(), vault = %config.vault_name, "loaded upload config");
        Ok(config)
    }

    /// Writes the configuration as pretty-printed JSON.
    pub fn save(&self, path: &Path) -> Result<(), UploadError> {
        let data = serde_json::to_string_pretty(self)?;
        std::fs::write(path, data)?;
        Ok(())
    }

    /// Effective worker count.
    pub fn workers(&self) -> usize {
        if self.max_workers <= 0 {
            DEFAULT_MAX_WORKERS
        } else {
            self.max_workers as usize
        }
    }

    /// Checks everything that can be checked without the archive.
    pub fn validate(&self) -> Result<(), UploadError> {
        if self.vault_name.trim().is_empty() {
            return Err(UploadError::InvalidConfiguration(
                "vault name is required".into(),
            ));
        }
        vaultpush_transfer::validate_block_size(self.block_size)
            .map_err(|e| UploadError::InvalidConfiguration(e.to_string()))?;
        if let Some(end) = self.end_block
            && end < self.start_block
        {
            return Err(UploadError::InvalidConfiguration(format!(
                "end block {end} is before start block {}",
                self.start_block
            )));
        }
        if self.start_block > 0 && self.upload_id.is_none() {
            return Err(UploadError::InvalidConfiguration(
                "a start block requires an existing upload id".into(),
            ));
        }
        if let Some(id) = &self.upload_id
            && id.trim().is_empty()
        {
            return Err(UploadError::InvalidConfiguration(
                "upload id must not be empty".into(),
            ));
        }
        Ok(())
    }

    /// Description to send for `source_name`, falling back to
    /// `"Archive containing file <name>"`.
    pub fn description_for(&self, source_name: &str) -> String {
        if self.description.is_empty() {
            format!("Archive containing file {source_name}")
        } else {
            self.description.clone()
        }
    }
}
