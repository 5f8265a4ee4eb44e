//! Upload session orchestrator.
//!
//! Opens (or resumes) a multipart session, drives the worker pool over the
//! planned segments, then completes or aborts the session.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use vaultpush_protocol::{AbortUploadRequest, CompleteUploadRequest, InitiateUploadRequest};
use vaultpush_transfer::{
    ArchiveSource, EventSink, SegmentEvent, TransferError, UploadWorkerPool, plan,
};
use vaultpush_treehash::{Digest, reduce};

use crate::config::UploadConfig;
use crate::error::UploadError;
use crate::remote::{PartUploader, RemoteVault};
use crate::session::{SessionState, UploadSession};
use crate::types::{UploadEvent, UploadReport};

/// Drives one archive upload from session open to completion.
pub struct SessionOrchestrator {
    events_tx: mpsc::Sender<UploadEvent>,
    events_rx: Option<mpsc::Receiver<UploadEvent>>,
    cancel: CancellationToken,
}

impl Default for SessionOrchestrator {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionOrchestrator {
    pub fn new() -> Self {
        let (events_tx, events_rx) = mpsc::channel(256);
        Self {
            events_tx,
            events_rx: Some(events_rx),
            cancel: CancellationToken::new(),
        }
    }

    /// Takes the event receiver. Can only be called once.
    pub fn take_events(&mut self) -> Option<mpsc::Receiver<UploadEvent>> {
        self.events_rx.take()
    }

    /// Returns a token that cancels the running upload.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Uploads `source` according to `config`.
    ///
    /// `source_name` is used for the default archive description. The
    /// report always carries the terminal state; on failure it also holds
    /// the first fatal error.
    pub async fn run(
        &self,
        config: &UploadConfig,
        source: Arc<dyn ArchiveSource>,
        source_name: &str,
        remote: Arc<dyn RemoteVault>,
    ) -> UploadReport {
        let mut report = UploadReport::new(source.len());
        let session = UploadSession::new(&config.vault_name, config.block_size);

        let result = self
            .drive(config, &source, source_name, &remote, &session, &mut report)
            .await;

        if let Err(err) = result {
            self.settle_failure(config, &remote, &session, &err).await;
            report.error = Some(err);
        }

        report.state = session.state();
        report.upload_id = session.upload_id();
        report
    }

    async fn drive(
        &self,
        config: &UploadConfig,
        source: &Arc<dyn ArchiveSource>,
        source_name: &str,
        remote: &Arc<dyn RemoteVault>,
        session: &UploadSession,
        report: &mut UploadReport,
    ) -> Result<(), UploadError> {
        config.validate()?;
        let total_size = source.len();
        let segments = plan(
            total_size,
            config.block_size,
            config.start_block,
            config.end_block,
        )?;
        let planned_bytes: u64 = segments.iter().map(|s| s.len).sum();
        // Retained leaf digests only form the archive hash when this run
        // covers every byte.
        let covers_archive = config.start_block == 0
            && segments.last().map(|s| s.end()) == Some(total_size);
        self.check_cancelled()?;

        // 1. Open or resume the session
        let (upload_id, resumed) = match &config.upload_id {
            Some(id) => (id.clone(), true),
            None => {
                let req = InitiateUploadRequest {
                    vault_name: config.vault_name.clone(),
                    archive_description: config.description_for(source_name),
                    part_size: config.block_size,
                };
                let resp = remote
                    .initiate_upload(&req)
                    .await
                    .map_err(UploadError::BeginFailed)?;
                (resp.upload_id, false)
            }
        };
        session.open(&upload_id)?;
        info!(
            upload_id = %upload_id,
            vault = %config.vault_name,
            resumed,
            start_block = config.start_block,
            "upload session open"
        );
        self.emit(UploadEvent::SessionOpened {
            upload_id: upload_id.clone(),
            resumed,
        });

        // 2. Upload segments
        session.transition(SessionState::Uploading)?;
        info!(
            upload_id = %upload_id,
            segments = segments.len(),
            bytes = planned_bytes,
            workers = config.workers(),
            "uploading segments"
        );
        self.emit(UploadEvent::Planned {
            segments: segments.len(),
            bytes: planned_bytes,
        });

        let uploader = Arc::new(PartUploader::new(
            Arc::clone(remote),
            &config.vault_name,
            &upload_id,
        ));
        let pool = UploadWorkerPool::new(config.workers(), config.retry.clone())
            .with_cancel(self.cancel.clone())
            .with_expected_bytes(planned_bytes)
            .on_event(self.segment_sink());
        let pool_report = pool.run(segments, Arc::clone(source), uploader).await?;
        report.bytes_uploaded = pool_report.bytes_uploaded;
        report.segments = pool_report.receipts.len();

        if !config.finalize {
            session.transition(SessionState::Uploaded)?;
            info!(upload_id = %upload_id, "segments uploaded, session left open");
            self.emit(UploadEvent::Uploaded { upload_id });
            return Ok(());
        }

        // 3. Finalize
        session.transition(SessionState::Finalizing)?;
        let tree_hash = if covers_archive {
            reduce(&pool_report.leaf_digests())?
        } else {
            debug!(upload_id = %upload_id, "re-reading archive for tree hash");
            hash_source(source).await?
        };
        report.tree_hash = Some(tree_hash);
        info!(upload_id = %upload_id, tree_hash = %tree_hash, size = total_size, "completing upload");
        self.emit(UploadEvent::Finalizing { tree_hash });

        let req = CompleteUploadRequest {
            vault_name: config.vault_name.clone(),
            upload_id: upload_id.clone(),
            archive_size: total_size,
            checksum: tree_hash.to_hex(),
        };
        let resp = remote
            .complete_upload(&req)
            .await
            .map_err(UploadError::CompleteFailed)?;
        if !resp.checksum.eq_ignore_ascii_case(&req.checksum) {
            return Err(UploadError::ChecksumMismatch {
                expected: tree_hash,
                actual: resp.checksum,
            });
        }

        session.transition(SessionState::Completed)?;
        info!(upload_id = %upload_id, archive_id = %resp.archive_id, "upload completed");
        report.archive_id = Some(resp.archive_id.clone());
        self.emit(UploadEvent::Completed {
            archive_id: resp.archive_id,
        });
        Ok(())
    }

    /// Moves the session to `Aborted` or `Failed`.
    ///
    /// The remote session is aborted only while segments were being
    /// uploaded; a failure during finalization leaves it for the caller.
    async fn settle_failure(
        &self,
        config: &UploadConfig,
        remote: &Arc<dyn RemoteVault>,
        session: &UploadSession,
        err: &UploadError,
    ) {
        let message = err.to_string();
        let abortable = matches!(
            session.state(),
            SessionState::SessionOpen | SessionState::Uploading
        );
        let upload_id = session.upload_id();

        error!(
            upload_id = upload_id.as_deref().unwrap_or(""),
            kind = err.kind(),
            range = ?err.range(),
            error = %message,
            "upload failed"
        );

        let next = match upload_id {
            Some(id) if abortable && config.abort_on_failure => {
                self.abort(remote, &config.vault_name, &id).await;
                self.emit(UploadEvent::Aborted {
                    error: message.clone(),
                });
                SessionState::Aborted
            }
            _ => {
                self.emit(UploadEvent::Failed {
                    error: message.clone(),
                });
                SessionState::Failed
            }
        };
        if let Err(e) = session.fail(next, &message) {
            warn!(error = %e, "could not record session failure");
        }
    }

    /// Best-effort abort; errors are logged only.
    async fn abort(&self, remote: &Arc<dyn RemoteVault>, vault_name: &str, upload_id: &str) {
        let req = AbortUploadRequest {
            vault_name: vault_name.to_string(),
            upload_id: upload_id.to_string(),
        };
        match remote.abort_upload(&req).await {
            Ok(()) => info!(upload_id = %upload_id, "upload session aborted"),
            Err(e) => warn!(upload_id = %upload_id, error = %e, "abort failed"),
        }
    }

    fn segment_sink(&self) -> EventSink {
        let tx = self.events_tx.clone();
        Arc::new(move |event| {
            let event = match event {
                SegmentEvent::Uploaded {
                    segment,
                    checksum,
                    attempts,
                } => UploadEvent::SegmentUploaded {
                    index: segment.index,
                    range: segment.range(),
                    checksum,
                    attempts,
                },
                SegmentEvent::Retrying {
                    segment,
                    attempt,
                    delay,
                    reason,
                } => UploadEvent::SegmentRetrying {
                    index: segment.index,
                    range: segment.range(),
                    attempt,
                    delay,
                    reason,
                },
            };
            if tx.try_send(event).is_err() {
                debug!("event channel full or closed, dropping segment event");
            }
        })
    }

    fn emit(&self, event: UploadEvent) {
        if self.events_tx.try_send(event).is_err() {
            debug!("event channel full or closed, dropping event");
        }
    }

    fn check_cancelled(&self) -> Result<(), UploadError> {
        if self.cancel.is_cancelled() {
            return Err(TransferError::Cancelled.into());
        }
        Ok(())
    }
}

async fn hash_source(source: &Arc<dyn ArchiveSource>) -> Result<Digest, UploadError> {
    let source = Arc::clone(source);
    let digest = tokio::task::spawn_blocking(move || source.tree_hash())
        .await
        .map_err(|e| TransferError::Join(format!("task join error: {e}")))??;
    Ok(digest)
}
