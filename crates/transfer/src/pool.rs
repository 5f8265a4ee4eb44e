//! Bounded-concurrency segment uploads with retry.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use vaultpush_treehash::{Digest, leaf_digests, reduce};

use crate::queue::TaskQueue;
use crate::{
    ArchiveSource, DEFAULT_MAX_WORKERS, PoolReport, RetryPolicy, Segment, SegmentEvent,
    SegmentReceipt, ThroughputMeter, TransferError, UploadTask,
};

/// Outcome of a failed upload call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadFailure {
    /// Worth retrying: timeouts, throttling, dropped connections.
    Transient(String),
    /// Retrying cannot help: authorization, unknown session, rejected part.
    Fatal(String),
}

/// Sends one segment to the remote service.
///
/// Implemented by the session layer on top of the actual vault client.
pub trait SegmentUploader: Send + Sync {
    fn upload<'a>(
        &'a self,
        segment: &'a Segment,
        checksum: &'a Digest,
        body: &'a [u8],
    ) -> Pin<Box<dyn Future<Output = Result<(), UploadFailure>> + Send + 'a>>;
}

/// Callback invoked with per-segment progress.
pub type EventSink = Arc<dyn Fn(SegmentEvent) + Send + Sync>;

/// Fixed-size pool of upload workers fed from a bounded queue.
pub struct UploadWorkerPool {
    max_workers: usize,
    retry: RetryPolicy,
    cancel: CancellationToken,
    events: Option<EventSink>,
    expected_bytes: Option<u64>,
}

impl UploadWorkerPool {
    /// Creates a pool with `max_workers` workers (0 means the default of 3).
    pub fn new(max_workers: usize, retry: RetryPolicy) -> Self {
        let max_workers = if max_workers == 0 {
            DEFAULT_MAX_WORKERS
        } else {
            max_workers
        };
        Self {
            max_workers,
            retry,
            cancel: CancellationToken::new(),
            events: None,
            expected_bytes: None,
        }
    }

    /// Stops the pool cooperatively when `cancel` fires.
    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Registers a progress callback.
    pub fn on_event(mut self, sink: EventSink) -> Self {
        self.events = Some(sink);
        self
    }

    /// Total bytes the segments cover, used for ETA logging.
    pub fn with_expected_bytes(mut self, bytes: u64) -> Self {
        self.expected_bytes = Some(bytes);
        self
    }

    /// Number of concurrent workers, after defaulting.
    pub fn max_workers(&self) -> usize {
        self.max_workers
    }

    /// Uploads every segment and waits for all of them to settle.
    ///
    /// Segments are produced lazily onto a queue of capacity `max_workers`;
    /// this call blocks on that queue when it is full. On the first fatal
    /// error no further uploads start: segments still being read are
    /// dropped, retry backoffs end early, in-flight uploads finish, and
    /// that error is returned.
    pub async fn run<I>(
        &self,
        segments: I,
        source: Arc<dyn ArchiveSource>,
        uploader: Arc<dyn SegmentUploader>,
    ) -> Result<PoolReport, TransferError>
    where
        I: IntoIterator<Item = Segment>,
    {
        let shared = Arc::new(Shared {
            queue: TaskQueue::new(self.max_workers),
            source,
            uploader,
            retry: self.retry.clone(),
            cancel: self.cancel.clone(),
            halted: self.cancel.child_token(),
            events: self.events.clone(),
            first_error: Mutex::new(None),
            receipts: Mutex::new(Vec::new()),
            uploaded: AtomicU64::new(0),
            busy: AtomicUsize::new(0),
            meter: ThroughputMeter::default(),
            expected_bytes: self.expected_bytes,
        });

        let mut workers = JoinSet::new();
        for id in 0..self.max_workers {
            workers.spawn(worker(id, Arc::clone(&shared)));
        }

        let watcher = {
            let shared = Arc::clone(&shared);
            tokio::spawn(async move {
                shared.cancel.cancelled().await;
                shared.fail(TransferError::Cancelled);
            })
        };

        let mut planned = 0usize;
        for segment in segments {
            if !shared.queue.push(UploadTask::new(segment)).await {
                debug!(segment = segment.index, "queue halted, stopping producer");
                break;
            }
            planned += 1;
        }
        shared.queue.close();
        debug!(planned, "all segments queued");

        while let Some(joined) = workers.join_next().await {
            if let Err(e) = joined {
                shared.fail(TransferError::Join(e.to_string()));
            }
        }
        watcher.abort();

        if let Some(err) = shared.take_error() {
            return Err(err);
        }

        let mut receipts = std::mem::take(&mut *lock(&shared.receipts));
        if receipts.len() != planned {
            return Err(TransferError::Incomplete {
                confirmed: receipts.len(),
                planned,
            });
        }
        receipts.sort_by_key(|r| r.segment.index);

        let bytes_uploaded = shared.uploaded.load(Ordering::Relaxed);
        info!(segments = planned, bytes_uploaded, "all segments uploaded");
        Ok(PoolReport {
            bytes_uploaded,
            receipts,
        })
    }
}

struct Shared {
    queue: TaskQueue,
    source: Arc<dyn ArchiveSource>,
    uploader: Arc<dyn SegmentUploader>,
    retry: RetryPolicy,
    cancel: CancellationToken,
    /// Fires on the first fatal error or on external cancellation.
    halted: CancellationToken,
    events: Option<EventSink>,
    first_error: Mutex<Option<TransferError>>,
    receipts: Mutex<Vec<SegmentReceipt>>,
    uploaded: AtomicU64,
    /// Workers currently holding a task; observability only.
    busy: AtomicUsize,
    meter: ThroughputMeter,
    expected_bytes: Option<u64>,
}

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

impl Shared {
    /// Halts the queue; only the first error is kept.
    fn fail(&self, err: TransferError) {
        if self.queue.halt() {
            error!(kind = err.kind(), error = %err, "upload pool halted");
            *lock(&self.first_error) = Some(err);
            self.halted.cancel();
        } else {
            debug!(error = %err, "additional failure after halt");
        }
    }

    fn take_error(&self) -> Option<TransferError> {
        lock(&self.first_error).take()
    }

    fn emit(&self, event: SegmentEvent) {
        if let Some(sink) = &self.events {
            sink(event);
        }
    }

    /// Reads the segment body and computes its digests, once per task.
    async fn prepare(&self, task: &mut UploadTask) -> Result<(), TransferError> {
        if task.body.is_some() {
            return Ok(());
        }
        let segment = task.segment;
        let source = Arc::clone(&self.source);
        let (body, leaves) = tokio::task::spawn_blocking(move || {
            let body = source.read_at(segment.start, segment.len as usize)?;
            let leaves = leaf_digests(&body);
            Ok::<_, std::io::Error>((body, leaves))
        })
        .await
        .map_err(|e| TransferError::Join(format!("task join error: {e}")))?
        .map_err(|source| TransferError::Read {
            range: segment.range(),
            source,
        })?;

        let checksum = reduce(&leaves)?;
        debug!(
            segment = segment.index,
            range = %segment.range(),
            checksum = %checksum,
            "segment hashed"
        );
        task.body = Some(body);
        task.leaves = leaves;
        task.checksum = Some(checksum);
        Ok(())
    }

    async fn process(&self, mut task: UploadTask) {
        let segment = task.segment;

        if let Err(err) = self.prepare(&mut task).await {
            self.fail(err);
            self.queue.complete();
            return;
        }
        let (Some(body), Some(checksum)) = (task.body.as_deref(), task.checksum) else {
            self.fail(TransferError::Join("segment payload missing after read".into()));
            self.queue.complete();
            return;
        };

        // Reading can take a while; the pool may have halted meanwhile.
        if self.queue.is_halted() {
            debug!(segment = segment.index, "pool halted, dropping prepared segment");
            self.queue.complete();
            return;
        }

        task.attempts += 1;
        let attempt = task.attempts;
        debug!(segment = segment.index, attempt, "uploading segment");

        let outcome = self.uploader.upload(&segment, &checksum, body).await;
        match outcome {
            Ok(()) => {
                let done = self.uploaded.fetch_add(segment.len, Ordering::Relaxed) + segment.len;
                self.meter.record(segment.len);
                let rate = self.meter.bytes_per_second();
                let eta = self
                    .expected_bytes
                    .and_then(|total| self.meter.eta(total.saturating_sub(done)));
                info!(
                    segment = segment.index,
                    range = %segment.range(),
                    attempts = attempt,
                    uploaded = done,
                    rate_bps = rate as u64,
                    eta_secs = eta.map(|d| d.as_secs()),
                    "segment uploaded"
                );

                lock(&self.receipts).push(SegmentReceipt {
                    segment,
                    checksum,
                    attempts: attempt,
                    leaves: std::mem::take(&mut task.leaves),
                });
                self.emit(SegmentEvent::Uploaded {
                    segment,
                    checksum,
                    attempts: attempt,
                });
                self.queue.complete();
            }
            Err(UploadFailure::Transient(reason)) if self.retry.allows_retry(attempt) => {
                let delay = self.retry.delay_for_attempt(attempt);
                warn!(
                    segment = segment.index,
                    range = %segment.range(),
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    reason = %reason,
                    "transient upload failure, re-enqueueing"
                );
                self.emit(SegmentEvent::Retrying {
                    segment,
                    attempt,
                    delay,
                    reason,
                });
                if !delay.is_zero() {
                    tokio::select! {
                        _ = self.halted.cancelled() => {}
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                if self.halted.is_cancelled() {
                    debug!(segment = segment.index, "pool halted during backoff");
                    if self.cancel.is_cancelled() {
                        self.fail(TransferError::Cancelled);
                    }
                    self.queue.complete();
                } else {
                    self.queue.requeue(task);
                }
            }
            Err(UploadFailure::Transient(reason)) => {
                self.fail(TransferError::RetriesExhausted {
                    index: segment.index,
                    range: segment.range(),
                    attempts: attempt,
                    reason,
                });
                self.queue.complete();
            }
            Err(UploadFailure::Fatal(reason)) => {
                self.fail(TransferError::Fatal {
                    index: segment.index,
                    range: segment.range(),
                    reason,
                });
                self.queue.complete();
            }
        }
    }
}

/// Halts the queue if a worker unwinds, so the producer cannot block on a
/// queue nobody drains.
struct PanicGuard<'a>(&'a Shared);

impl Drop for PanicGuard<'_> {
    fn drop(&mut self) {
        if std::thread::panicking() {
            self.0.fail(TransferError::Join("upload worker panicked".into()));
        }
    }
}

async fn worker(id: usize, shared: Arc<Shared>) {
    let _guard = PanicGuard(&shared);
    while let Some(task) = shared.queue.claim().await {
        let busy = shared.busy.fetch_add(1, Ordering::Relaxed) + 1;
        debug!(
            worker = id,
            segment = task.segment.index,
            busy,
            pending = shared.queue.pending(),
            "claimed segment"
        );
        shared.process(task).await;
        shared.busy.fetch_sub(1, Ordering::Relaxed);
    }
    debug!(worker = id, "worker exiting");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{MemorySource, plan};
    use std::collections::HashMap;
    use std::sync::atomic::AtomicBool;
    use std::time::Duration;
    use vaultpush_treehash::tree_hash_bytes;

    const MIB: u64 = 1024 * 1024;

    /// Scripted uploader: per-segment queue of failures before success.
    #[derive(Default)]
    struct MockUploader {
        script: Mutex<HashMap<u64, Vec<UploadFailure>>>,
        attempts: Mutex<HashMap<u64, u32>>,
        started: Mutex<Vec<u64>>,
        active: AtomicUsize,
        peak: AtomicUsize,
        overlap: AtomicBool,
        in_flight: Mutex<Vec<u64>>,
        delay: Duration,
        /// Attempt number at which a transient failure ends the run.
        exhaust_at: u32,
        /// Set once this uploader has reported a failure that ends the run.
        halted: AtomicBool,
        started_after_halt: Mutex<Vec<u64>>,
    }

    impl MockUploader {
        fn with_delay(delay: Duration) -> Self {
            Self {
                delay,
                ..Default::default()
            }
        }

        fn script(self, index: u64, failures: Vec<UploadFailure>) -> Self {
            self.script.lock().unwrap().insert(index, failures);
            self
        }

        fn exhaust_at(mut self, attempt: u32) -> Self {
            self.exhaust_at = attempt;
            self
        }

        fn started_after_halt(&self) -> Vec<u64> {
            self.started_after_halt.lock().unwrap().clone()
        }

        fn attempts(&self, index: u64) -> u32 {
            self.attempts.lock().unwrap().get(&index).copied().unwrap_or(0)
        }
    }

    impl SegmentUploader for MockUploader {
        fn upload<'a>(
            &'a self,
            segment: &'a Segment,
            checksum: &'a Digest,
            body: &'a [u8],
        ) -> Pin<Box<dyn Future<Output = Result<(), UploadFailure>> + Send + 'a>> {
            Box::pin(async move {
                assert_eq!(*checksum, tree_hash_bytes(body));
                assert_eq!(body.len() as u64, segment.len);

                {
                    let mut in_flight = self.in_flight.lock().unwrap();
                    if in_flight.contains(&segment.index) {
                        self.overlap.store(true, Ordering::SeqCst);
                    }
                    in_flight.push(segment.index);
                }
                let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
                self.peak.fetch_max(now, Ordering::SeqCst);
                self.started.lock().unwrap().push(segment.index);
                if self.halted.load(Ordering::SeqCst) {
                    self.started_after_halt.lock().unwrap().push(segment.index);
                }
                let attempt = {
                    let mut attempts = self.attempts.lock().unwrap();
                    let n = attempts.entry(segment.index).or_default();
                    *n += 1;
                    *n
                };

                let outcome = {
                    let mut script = self.script.lock().unwrap();
                    match script.get_mut(&segment.index) {
                        Some(failures) if !failures.is_empty() => Err(failures.remove(0)),
                        _ => Ok(()),
                    }
                };
                let ends_run = match &outcome {
                    Err(UploadFailure::Fatal(_)) => true,
                    Err(UploadFailure::Transient(_)) => attempt == self.exhaust_at,
                    Ok(()) => false,
                };
                // Only successful uploads take time, so failures cycle quickly.
                if outcome.is_ok() && !self.delay.is_zero() {
                    tokio::time::sleep(self.delay).await;
                }
                if ends_run {
                    self.halted.store(true, Ordering::SeqCst);
                }

                self.active.fetch_sub(1, Ordering::SeqCst);
                self.in_flight.lock().unwrap().retain(|i| *i != segment.index);
                outcome
            })
        }
    }

    /// Source whose reads of the listed offsets block for `delay`.
    struct SlowSource {
        inner: MemorySource,
        slow: Vec<u64>,
        delay: Duration,
    }

    impl ArchiveSource for SlowSource {
        fn len(&self) -> u64 {
            self.inner.len()
        }

        fn read_at(&self, offset: u64, len: usize) -> std::io::Result<Vec<u8>> {
            if self.slow.contains(&offset) {
                std::thread::sleep(self.delay);
            }
            self.inner.read_at(offset, len)
        }
    }

    fn slow_archive(len: usize, slow: Vec<u64>, delay: Duration) -> Arc<SlowSource> {
        Arc::new(SlowSource {
            inner: MemorySource::new((0..len).map(|i| (i % 241) as u8).collect()),
            slow,
            delay,
        })
    }

    fn archive(len: usize) -> Arc<MemorySource> {
        Arc::new(MemorySource::new((0..len).map(|i| (i % 241) as u8).collect()))
    }

    fn transient(n: usize) -> Vec<UploadFailure> {
        (0..n).map(|i| UploadFailure::Transient(format!("timeout {i}"))).collect()
    }

    #[tokio::test]
    async fn uploads_every_segment_once() {
        let source = archive(10 * MIB as usize + 17);
        let segments = plan(source.len(), MIB, 0, None).unwrap();
        let uploader = Arc::new(MockUploader::default());

        let pool = UploadWorkerPool::new(3, RetryPolicy::immediate(5));
        let report = pool.run(segments, source.clone(), uploader.clone()).await.unwrap();

        assert_eq!(report.bytes_uploaded, source.len());
        assert_eq!(report.receipts.len(), 11);
        for (i, r) in report.receipts.iter().enumerate() {
            assert_eq!(r.segment.index, i as u64);
            assert_eq!(r.attempts, 1);
            assert_eq!(uploader.attempts(i as u64), 1);
        }
    }

    #[tokio::test]
    async fn transient_failures_are_retried() {
        let source = archive(10 * MIB as usize);
        let segments = plan(source.len(), MIB, 0, None).unwrap();
        let uploader = Arc::new(MockUploader::default().script(4, transient(2)));

        let pool = UploadWorkerPool::new(3, RetryPolicy::immediate(5));
        let report = pool.run(segments, source, uploader.clone()).await.unwrap();

        assert_eq!(report.receipts.len(), 10);
        assert_eq!(uploader.attempts(4), 3);
        assert_eq!(report.receipts[4].attempts, 3);
        for i in (0..10).filter(|i| *i != 4) {
            assert_eq!(uploader.attempts(i), 1, "segment {i}");
        }
    }

    #[tokio::test]
    async fn retry_reuses_digest_and_emits_events() {
        let source = archive(2 * MIB as usize);
        let segments = plan(source.len(), MIB, 0, None).unwrap();
        let uploader = Arc::new(MockUploader::default().script(1, transient(1)));
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink: EventSink = {
            let events = Arc::clone(&events);
            Arc::new(move |e| events.lock().unwrap().push(e))
        };

        let pool = UploadWorkerPool::new(2, RetryPolicy::immediate(3)).on_event(sink);
        let report = pool.run(segments, source, uploader).await.unwrap();

        let events = events.lock().unwrap();
        let retries: Vec<_> = events
            .iter()
            .filter_map(|e| match e {
                SegmentEvent::Retrying { segment, attempt, .. } => Some((segment.index, *attempt)),
                _ => None,
            })
            .collect();
        assert_eq!(retries, vec![(1, 1)]);
        let uploaded = events
            .iter()
            .filter(|e| matches!(e, SegmentEvent::Uploaded { .. }))
            .count();
        assert_eq!(uploaded, 2);
        assert_eq!(report.receipts[1].attempts, 2);
    }

    #[tokio::test]
    async fn exhausted_retries_are_fatal() {
        let source = archive(48 * MIB as usize);
        let segments = plan(source.len(), MIB, 0, None).unwrap();
        let uploader = Arc::new(
            MockUploader::with_delay(Duration::from_millis(5))
                .script(2, transient(10))
                .exhaust_at(5),
        );

        let pool = UploadWorkerPool::new(3, RetryPolicy::immediate(5));
        let err = pool.run(segments, source, uploader.clone()).await.unwrap_err();

        match &err {
            TransferError::RetriesExhausted { index, attempts, .. } => {
                assert_eq!(*index, 2);
                assert_eq!(*attempts, 5);
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(err.kind(), "retries_exhausted");
        assert_eq!(err.range().unwrap().start, 2 * MIB);
        assert_eq!(uploader.attempts(2), 5);

        // Nothing is claimed after the halt: at most the tasks that were
        // queued or in flight when segment 2 failed were ever started.
        let started = uploader.started.lock().unwrap();
        let distinct: std::collections::HashSet<_> = started.iter().collect();
        assert!(distinct.len() < 48, "started {} segments", distinct.len());
        drop(started);
        assert_eq!(uploader.started_after_halt(), Vec::<u64>::new());
    }

    #[tokio::test]
    async fn fatal_failure_stops_pool() {
        let source = archive(30 * MIB as usize);
        let segments = plan(source.len(), MIB, 0, None).unwrap();
        let uploader = Arc::new(
            MockUploader::with_delay(Duration::from_millis(5))
                .script(1, vec![UploadFailure::Fatal("AccessDenied".into())]),
        );

        let pool = UploadWorkerPool::new(3, RetryPolicy::immediate(5));
        let err = pool.run(segments, source, uploader.clone()).await.unwrap_err();

        assert!(matches!(err, TransferError::Fatal { index: 1, .. }));
        assert_eq!(uploader.attempts(1), 1);
        let started = uploader.started.lock().unwrap().len();
        assert!(started < 30, "started {started} uploads");
        assert_eq!(uploader.started_after_halt(), Vec::<u64>::new());
    }

    #[tokio::test]
    async fn no_upload_starts_after_fatal_error() {
        // Segments 1 and 2 are still being read when segment 0 fails.
        let source = slow_archive(3 * MIB as usize, vec![MIB, 2 * MIB], Duration::from_millis(150));
        let segments = plan(source.len(), MIB, 0, None).unwrap();
        let uploader = Arc::new(
            MockUploader::default().script(0, vec![UploadFailure::Fatal("AccessDenied".into())]),
        );

        let pool = UploadWorkerPool::new(3, RetryPolicy::immediate(5));
        let err = pool.run(segments, source, uploader.clone()).await.unwrap_err();

        assert!(matches!(err, TransferError::Fatal { index: 0, .. }));
        assert_eq!(uploader.started_after_halt(), Vec::<u64>::new());
        assert_eq!(uploader.attempts(1), 0);
        assert_eq!(uploader.attempts(2), 0);
    }

    #[tokio::test]
    async fn fatal_error_interrupts_retry_backoff() {
        let source = slow_archive(2 * MIB as usize, vec![MIB], Duration::from_millis(50));
        let segments = plan(source.len(), MIB, 0, None).unwrap();
        let uploader = Arc::new(
            MockUploader::default()
                .script(0, transient(1))
                .script(1, vec![UploadFailure::Fatal("AccessDenied".into())]),
        );
        let retry = RetryPolicy {
            max_attempts: 5,
            initial_delay: Duration::from_secs(3),
            max_delay: Duration::from_secs(3),
            backoff_factor: 1.0,
        };

        let pool = UploadWorkerPool::new(2, retry);
        let started = std::time::Instant::now();
        let err = pool.run(segments, source, uploader.clone()).await.unwrap_err();

        assert!(matches!(err, TransferError::Fatal { index: 1, .. }));
        assert!(
            started.elapsed() < Duration::from_secs(1),
            "pool waited out the backoff: {:?}",
            started.elapsed()
        );
        assert_eq!(uploader.attempts(0), 1);
        assert_eq!(uploader.started_after_halt(), Vec::<u64>::new());
    }

    #[tokio::test]
    async fn cancellation_interrupts_retry_backoff() {
        let source = archive(MIB as usize);
        let segments = plan(source.len(), MIB, 0, None).unwrap();
        let uploader = Arc::new(MockUploader::default().script(0, transient(1)));
        let retry = RetryPolicy {
            max_attempts: 5,
            initial_delay: Duration::from_secs(3),
            max_delay: Duration::from_secs(3),
            backoff_factor: 1.0,
        };
        let cancel = CancellationToken::new();

        let pool = UploadWorkerPool::new(1, retry).with_cancel(cancel.clone());
        let started = std::time::Instant::now();
        let run = pool.run(segments, source, uploader.clone());
        let trigger = async {
            tokio::time::sleep(Duration::from_millis(30)).await;
            cancel.cancel();
        };
        let (result, ()) = tokio::join!(run, trigger);

        assert!(matches!(result.unwrap_err(), TransferError::Cancelled));
        assert!(started.elapsed() < Duration::from_secs(1));
        assert_eq!(uploader.attempts(0), 1);
    }

    #[tokio::test]
    async fn concurrency_never_exceeds_worker_count() {
        let source = archive(12 * MIB as usize);
        let segments = plan(source.len(), MIB, 0, None).unwrap();
        let uploader =
            Arc::new(MockUploader::with_delay(Duration::from_millis(10)).script(3, transient(2)));

        let pool = UploadWorkerPool::new(3, RetryPolicy::immediate(5));
        pool.run(segments, source, uploader.clone()).await.unwrap();

        let peak = uploader.peak.load(Ordering::SeqCst);
        assert!(peak <= 3, "peak concurrency {peak}");
        assert!(peak >= 2, "expected parallel uploads, peak {peak}");
        assert!(!uploader.overlap.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn zero_workers_uses_default() {
        let pool = UploadWorkerPool::new(0, RetryPolicy::default());
        assert_eq!(pool.max_workers(), DEFAULT_MAX_WORKERS);
    }

    #[tokio::test]
    async fn empty_archive_uploads_one_empty_segment() {
        let source = Arc::new(MemorySource::default());
        let segments = plan(0, MIB, 0, None).unwrap();
        let uploader = Arc::new(MockUploader::default());

        let pool = UploadWorkerPool::new(1, RetryPolicy::immediate(1));
        let report = pool.run(segments, source, uploader).await.unwrap();

        assert_eq!(report.bytes_uploaded, 0);
        assert_eq!(report.receipts.len(), 1);
        assert_eq!(report.receipts[0].checksum, tree_hash_bytes(&[]));
    }

    #[tokio::test]
    async fn read_failure_is_fatal_with_range() {
        let source = archive(MIB as usize);
        // Segment extends past the end of the source.
        let segments = vec![Segment {
            index: 0,
            start: 0,
            len: 2 * MIB,
        }];
        let uploader = Arc::new(MockUploader::default());

        let pool = UploadWorkerPool::new(1, RetryPolicy::immediate(1));
        let err = pool.run(segments, source, uploader.clone()).await.unwrap_err();

        assert!(matches!(err, TransferError::Read { .. }));
        assert_eq!(err.range().unwrap().end, 2 * MIB - 1);
        assert_eq!(uploader.attempts(0), 0);
    }

    #[tokio::test]
    async fn cancellation_halts_pool() {
        let source = archive(40 * MIB as usize);
        let segments = plan(source.len(), MIB, 0, None).unwrap();
        let uploader = Arc::new(MockUploader::with_delay(Duration::from_millis(20)));
        let cancel = CancellationToken::new();

        let pool = UploadWorkerPool::new(2, RetryPolicy::immediate(1)).with_cancel(cancel.clone());
        let run = pool.run(segments, source, uploader.clone());
        let trigger = async {
            tokio::time::sleep(Duration::from_millis(30)).await;
            cancel.cancel();
        };
        let (result, ()) = tokio::join!(run, trigger);

        assert!(matches!(result.unwrap_err(), TransferError::Cancelled));
        assert!(uploader.started.lock().unwrap().len() < 40);
    }

    #[tokio::test]
    async fn receipts_carry_leaf_digests() {
        let source = archive(3 * MIB as usize + 5);
        let segments = plan(source.len(), 2 * MIB, 0, None).unwrap();
        let uploader = Arc::new(MockUploader::default());

        let pool = UploadWorkerPool::new(2, RetryPolicy::immediate(1));
        let report = pool.run(segments, source.clone(), uploader).await.unwrap();

        let all = source.read_at(0, source.len() as usize).unwrap();
        assert_eq!(report.leaf_digests(), leaf_digests(&all));
        assert_eq!(reduce(&report.leaf_digests()).unwrap(), tree_hash_bytes(&all));
    }
}
