//! In-memory vault service.
//!
//! Assembles parts by byte range and verifies part and archive tree hashes
//! the way the real service does. Failures can be injected per call.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};

use vaultpush_protocol::{
    AbortUploadRequest, CompleteUploadRequest, CompleteUploadResponse, ContentRange,
    InitiateUploadRequest, InitiateUploadResponse, ServiceError, UploadPartRequest,
    UploadPartResponse,
};
use vaultpush_treehash::tree_hash_bytes;

use crate::error::VaultError;
use crate::remote::{RemoteVault, VaultFuture};

/// Number of calls made to each operation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallCounts {
    pub initiate: usize,
    pub upload_part: usize,
    pub complete: usize,
    pub abort: usize,
}

/// An archive assembled by a completed session.
#[derive(Debug, Clone)]
pub struct StoredArchive {
    pub vault_name: String,
    pub description: String,
    pub data: Vec<u8>,
    pub checksum: String,
}

#[derive(Default)]
pub struct MemoryVault {
    state: Mutex<VaultState>,
}

#[derive(Default)]
struct VaultState {
    next_id: u64,
    sessions: HashMap<String, MemorySession>,
    archives: HashMap<String, StoredArchive>,
    calls: CallCounts,
    faults: Faults,
}

struct MemorySession {
    vault_name: String,
    description: String,
    part_size: u64,
    /// Parts keyed by start offset.
    parts: BTreeMap<u64, Part>,
}

struct Part {
    data: Vec<u8>,
    checksum: String,
}

#[derive(Default)]
struct Faults {
    initiate: Option<VaultError>,
    complete: Option<VaultError>,
    complete_checksum: Option<String>,
    /// Remaining transient failures per part index.
    transient: HashMap<u64, usize>,
    /// Part indices that always fail permanently.
    fatal: HashMap<u64, ServiceError>,
}

fn invalid(message: impl Into<String>) -> VaultError {
    VaultError::Service(ServiceError::new(ServiceError::INVALID_PARAMETER, message))
}

fn not_found(upload_id: &str) -> VaultError {
    VaultError::Service(ServiceError::new(
        ServiceError::RESOURCE_NOT_FOUND,
        format!("upload {upload_id} not found"),
    ))
}

impl MemoryVault {
    /// An empty vault with no sessions, archives or injected faults.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, VaultState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Makes the next initiate call fail with `err`.
    pub fn fail_initiate(&self, err: VaultError) {
        self.lock().faults.initiate = Some(err);
    }

    /// Makes the next complete call fail with `err`.
    pub fn fail_complete(&self, err: VaultError) {
        self.lock().faults.complete = Some(err);
    }

    /// Reports `checksum` instead of the computed one on completion.
    pub fn report_complete_checksum(&self, checksum: &str) {
        self.lock().faults.complete_checksum = Some(checksum.to_string());
    }

    /// Fails the part at `index` with a request timeout `times` times.
    pub fn fail_part_transiently(&self, index: u64, times: usize) {
        self.lock().faults.transient.insert(index, times);
    }

    /// Fails every upload of the part at `index` with `err`.
    pub fn fail_part_fatally(&self, index: u64, err: ServiceError) {
        self.lock().faults.fatal.insert(index, err);
    }

    /// Number of calls received per operation so far.
    pub fn calls(&self) -> CallCounts {
        self.lock().calls
    }

    /// The assembled archive with this id, if a session completed into it.
    pub fn archive(&self, archive_id: &str) -> Option<StoredArchive> {
        self.lock().archives.get(archive_id).cloned()
    }

    /// Sessions initiated and neither completed nor aborted.
    pub fn open_sessions(&self) -> usize {
        self.lock().sessions.len()
    }

    /// Ranges received so far for an open session, in offset order.
    pub fn uploaded_ranges(&self, upload_id: &str) -> Vec<ContentRange> {
        self.lock()
            .sessions
            .get(upload_id)
            .map(|s| {
                s.parts
                    .iter()
                    .map(|(start, part)| ContentRange::for_span(*start, part.data.len() as u64))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Part checksums received so far for an open session, in offset order.
    pub fn part_checksums(&self, upload_id: &str) -> Vec<String> {
        self.lock()
            .sessions
            .get(upload_id)
            .map(|s| s.parts.values().map(|p| p.checksum.clone()).collect())
            .unwrap_or_default()
    }

    fn do_initiate(&self, req: &InitiateUploadRequest) -> Result<InitiateUploadResponse, VaultError> {
        let mut st = self.lock();
        st.calls.initiate += 1;
        if let Some(err) = st.faults.initiate.take() {
            return Err(err);
        }
        if req.part_size == 0 || req.part_size % (1024 * 1024) != 0 {
            return Err(invalid(format!("invalid part size {}", req.part_size)));
        }

        st.next_id += 1;
        let upload_id = format!("upload-{}", st.next_id);
        st.sessions.insert(
            upload_id.clone(),
            MemorySession {
                vault_name: req.vault_name.clone(),
                description: req.archive_description.clone(),
                part_size: req.part_size,
                parts: BTreeMap::new(),
            },
        );
        Ok(InitiateUploadResponse {
            location: format!("/vaults/{}/multipart-uploads/{upload_id}", req.vault_name),
            upload_id,
        })
    }

    fn do_upload_part(
        &self,
        req: &UploadPartRequest,
        body: &[u8],
    ) -> Result<UploadPartResponse, VaultError> {
        let mut st = self.lock();
        st.calls.upload_part += 1;

        let part_size = match st.sessions.get(&req.upload_id) {
            Some(s) => s.part_size,
            None => return Err(not_found(&req.upload_id)),
        };
        let index = req.range.start / part_size;

        if let Some(err) = st.faults.fatal.get(&index) {
            return Err(VaultError::Service(err.clone()));
        }
        if let Some(left) = st.faults.transient.get_mut(&index)
            && *left > 0
        {
            *left -= 1;
            return Err(VaultError::Service(ServiceError::new(
                ServiceError::REQUEST_TIMEOUT,
                format!("timed out receiving {}", req.range),
            )));
        }

        // An empty archive is sent as a single empty part at 0-0.
        let empty_part = body.is_empty() && req.range.start == req.range.end;
        if !empty_part && req.range.len() != body.len() as u64 {
            return Err(invalid(format!(
                "range {} does not match body of {} bytes",
                req.range,
                body.len()
            )));
        }
        if req.range.start % part_size != 0 || body.len() as u64 > part_size {
            return Err(invalid(format!("range {} is not aligned to parts", req.range)));
        }
        let checksum = tree_hash_bytes(body).to_hex();
        if checksum != req.checksum {
            return Err(invalid(format!(
                "checksum mismatch for {}: computed {checksum}",
                req.range
            )));
        }

        if let Some(session) = st.sessions.get_mut(&req.upload_id) {
            session.parts.insert(
                req.range.start,
                Part {
                    data: body.to_vec(),
                    checksum: checksum.clone(),
                },
            );
        }
        Ok(UploadPartResponse { checksum })
    }

    fn do_complete(&self, req: &CompleteUploadRequest) -> Result<CompleteUploadResponse, VaultError> {
        let mut st = self.lock();
        st.calls.complete += 1;
        if let Some(err) = st.faults.complete.take() {
            return Err(err);
        }
        let Some(session) = st.sessions.get(&req.upload_id) else {
            return Err(not_found(&req.upload_id));
        };

        let mut data = Vec::with_capacity(req.archive_size as usize);
        for (start, part) in &session.parts {
            if *start != data.len() as u64 {
                return Err(invalid(format!("missing bytes before offset {start}")));
            }
            data.extend_from_slice(&part.data);
        }
        if data.len() as u64 != req.archive_size {
            return Err(invalid(format!(
                "archive size {} does not match {} uploaded bytes",
                req.archive_size,
                data.len()
            )));
        }
        let computed = tree_hash_bytes(&data).to_hex();
        if computed != req.checksum {
            return Err(invalid(format!("archive checksum mismatch: computed {computed}")));
        }

        let checksum = st.faults.complete_checksum.take().unwrap_or(computed);
        let Some(session) = st.sessions.remove(&req.upload_id) else {
            return Err(not_found(&req.upload_id));
        };
        st.next_id += 1;
        let archive_id = format!("archive-{}", st.next_id);
        st.archives.insert(
            archive_id.clone(),
            StoredArchive {
                vault_name: session.vault_name,
                description: session.description,
                data,
                checksum: checksum.clone(),
            },
        );
        Ok(CompleteUploadResponse {
            location: format!("/vaults/{}/archives/{archive_id}", req.vault_name),
            archive_id,
            checksum,
        })
    }

    fn do_abort(&self, req: &AbortUploadRequest) -> Result<(), VaultError> {
        let mut st = self.lock();
        st.calls.abort += 1;
        match st.sessions.remove(&req.upload_id) {
            Some(_) => Ok(()),
            None => Err(not_found(&req.upload_id)),
        }
    }
}

impl RemoteVault for MemoryVault {
    fn initiate_upload<'a>(
        &'a self,
        req: &'a InitiateUploadRequest,
    ) -> VaultFuture<'a, InitiateUploadResponse> {
        Box::pin(async move { self.do_initiate(req) })
    }

    fn upload_part<'a>(
        &'a self,
        req: &'a UploadPartRequest,
        body: &'a [u8],
    ) -> VaultFuture<'a, UploadPartResponse> {
        Box::pin(async move { self.do_upload_part(req, body) })
    }

    fn complete_upload<'a>(
        &'a self,
        req: &'a CompleteUploadRequest,
    ) -> VaultFuture<'a, CompleteUploadResponse> {
        Box::pin(async move { self.do_complete(req) })
    }

    fn abort_upload<'a>(&'a self, req: &'a AbortUploadRequest) -> VaultFuture<'a, ()> {
        Box::pin(async move { self.do_abort(req) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MIB: u64 = 1024 * 1024;

    fn initiate(vault: &MemoryVault) -> String {
        vault
            .do_initiate(&InitiateUploadRequest {
                vault_name: "v".into(),
                archive_description: "d".into(),
                part_size: MIB,
            })
            .unwrap()
            .upload_id
    }

    fn part(upload_id: &str, start: u64, body: &[u8]) -> UploadPartRequest {
        UploadPartRequest {
            vault_name: "v".into(),
            upload_id: upload_id.into(),
            range: ContentRange::for_span(start, body.len() as u64),
            checksum: tree_hash_bytes(body).to_hex(),
        }
    }

    #[test]
    fn assembles_parts_out_of_order() {
        let vault = MemoryVault::new();
        let id = initiate(&vault);
        let data: Vec<u8> = (0..(MIB as usize + 10)).map(|i| (i % 7) as u8).collect();
        let (a, b) = data.split_at(MIB as usize);

        vault.do_upload_part(&part(&id, MIB, b), b).unwrap();
        vault.do_upload_part(&part(&id, 0, a), a).unwrap();
        assert_eq!(vault.uploaded_ranges(&id).len(), 2);

        let resp = vault
            .do_complete(&CompleteUploadRequest {
                vault_name: "v".into(),
                upload_id: id.clone(),
                archive_size: data.len() as u64,
                checksum: tree_hash_bytes(&data).to_hex(),
            })
            .unwrap();
        let stored = vault.archive(&resp.archive_id).unwrap();
        assert_eq!(stored.data, data);
        assert_eq!(stored.description, "d");
        assert_eq!(vault.open_sessions(), 0);
    }

    #[test]
    fn rejects_bad_part_checksum() {
        let vault = MemoryVault::new();
        let id = initiate(&vault);
        let mut req = part(&id, 0, b"abc");
        req.checksum = tree_hash_bytes(b"abd").to_hex();
        let err = vault.do_upload_part(&req, b"abc").unwrap_err();
        assert!(!err.is_transient());
    }

    #[test]
    fn complete_rejects_gaps() {
        let vault = MemoryVault::new();
        let id = initiate(&vault);
        vault.do_upload_part(&part(&id, MIB, b"tail"), b"tail").unwrap();
        let err = vault
            .do_complete(&CompleteUploadRequest {
                vault_name: "v".into(),
                upload_id: id,
                archive_size: MIB + 4,
                checksum: String::new(),
            })
            .unwrap_err();
        assert!(err.to_string().contains("missing bytes"));
    }

    #[test]
    fn injected_transient_failures_run_out() {
        let vault = MemoryVault::new();
        let id = initiate(&vault);
        vault.fail_part_transiently(0, 2);
        let req = part(&id, 0, b"x");
        assert!(vault.do_upload_part(&req, b"x").unwrap_err().is_transient());
        assert!(vault.do_upload_part(&req, b"x").unwrap_err().is_transient());
        assert!(vault.do_upload_part(&req, b"x").is_ok());
        assert_eq!(vault.calls().upload_part, 3);
    }

    #[test]
    fn unknown_session_is_fatal() {
        let vault = MemoryVault::new();
        let err = vault
            .do_abort(&AbortUploadRequest {
                vault_name: "v".into(),
                upload_id: "nope".into(),
            })
            .unwrap_err();
        assert!(!err.is_transient());
        assert_eq!(vault.calls().abort, 1);
    }
}
