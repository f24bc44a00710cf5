use futures_util::future::join_all;
use rand::Rng;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::{format_speed, Chunk, PreparedUpload};
use crate::config::TransferConfig;
use crate::error::{ChunkUploadError, Result, TransferError};
use crate::protocol::{FileDataResponse, FileToken};
use crate::transport::FileStore;

/// Progress snapshot pushed after every acknowledged chunk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadProgress {
    pub loaded: usize,
    pub total: usize,
    pub throughput: String,
}

/// Summary of a completed upload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadReport {
    pub total_chunks: usize,
    pub passes: u32,
    pub bytes: u64,
}

enum ChunkOutcome {
    Uploaded,
    Exhausted,
}

struct UploadRun<'a, S: ?Sized, F> {
    store: &'a S,
    config: &'a TransferConfig,
    token: FileToken,
    cancel: &'a CancellationToken,
    on_progress: &'a F,
    total: usize,
    loaded: AtomicUsize,
    bytes: AtomicU64,
    started: Instant,
}

/// Register `prepared` with the store and upload all of its chunks.
///
/// Chunks go out in batches of at most `max_parallel_uploads`; each batch is
/// joined before the next starts. A chunk is tried `retry_limit + 1` times per
/// pass; chunks still failing are collected and resubmitted in a later pass
/// after an exponential backoff, up to `max_passes` passes.
pub async fn upload<S, F>(
    store: &S,
    prepared: &PreparedUpload,
    config: &TransferConfig,
    cancel: &CancellationToken,
    on_progress: F,
) -> Result<UploadReport>
where
    S: FileStore + ?Sized,
    F: Fn(UploadProgress) + Sync,
{
    config.validate()?;
    let descriptor = &prepared.descriptor;

    let token = match store.register(&descriptor.to_file_data()).await? {
        FileDataResponse::Successful(token) => token,
        FileDataResponse::Failed(reason) => {
            error!(file = %descriptor.file_name, %reason, "Metadata registration failed");
            return Err(TransferError::Registration(reason));
        }
    };
    if token.token.is_empty() {
        return Err(TransferError::MissingToken);
    }

    info!(
        file = %descriptor.file_name,
        chunks = descriptor.total_chunks,
        "Registered upload"
    );

    let run = UploadRun {
        store,
        config,
        token,
        cancel,
        on_progress: &on_progress,
        total: descriptor.total_chunks,
        loaded: AtomicUsize::new(0),
        bytes: AtomicU64::new(0),
        started: Instant::now(),
    };
    run.report();

    let mut pending: Vec<&Chunk> = prepared.chunks.iter().collect();
    let mut pass = 1;
    loop {
        let failed = run.pass(&pending).await?;
        if failed.is_empty() {
            break;
        }
        if pass >= config.max_passes {
            let mut failed: Vec<usize> = failed.iter().map(|c| c.index).collect();
            failed.sort_unstable();
            error!(?failed, passes = pass, "Giving up on chunks");
            return Err(TransferError::IncompleteUpload { failed });
        }

        pass += 1;
        let delay = backoff_delay(config, pass);
        warn!(failed = failed.len(), pass, ?delay, "Retrying failed chunks");
        tokio::select! {
            _ = cancel.cancelled() => return Err(TransferError::Cancelled),
            _ = tokio::time::sleep(delay) => {}
        }
        pending = failed;
    }

    info!(file = %descriptor.file_name, passes = pass, "Upload complete");
    Ok(UploadReport {
        total_chunks: run.total,
        passes: pass,
        bytes: run.bytes.load(Ordering::Relaxed),
    })
}

impl<S, F> UploadRun<'_, S, F>
where
    S: FileStore + ?Sized,
    F: Fn(UploadProgress) + Sync,
{
    /// One batch-barrier pool over `chunks`; returns the chunks that
    /// exhausted their retries.
    async fn pass<'c>(&self, chunks: &[&'c Chunk]) -> Result<Vec<&'c Chunk>> {
        let mut failed = Vec::new();
        for batch in chunks.chunks(self.config.max_parallel_uploads) {
            let outcomes = join_all(batch.iter().map(|chunk| self.upload_with_retry(chunk))).await;
            for (chunk, outcome) in batch.iter().zip(outcomes) {
                if let ChunkOutcome::Exhausted = outcome? {
                    failed.push(*chunk);
                }
            }
        }
        Ok(failed)
    }

    async fn upload_with_retry(&self, chunk: &Chunk) -> Result<ChunkOutcome> {
        for attempt in 0..=self.config.retry_limit {
            if self.cancel.is_cancelled() {
                return Err(TransferError::Cancelled);
            }
            let result = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Err(TransferError::Cancelled),
                result = self.store.upload_chunk(chunk, &self.token) => result,
            };
            match result {
                Ok(()) => {
                    debug!(index = chunk.index, attempt, "Chunk uploaded");
                    self.loaded.fetch_add(1, Ordering::Relaxed);
                    self.bytes.fetch_add(chunk.payload.len() as u64, Ordering::Relaxed);
                    self.report();
                    return Ok(ChunkOutcome::Uploaded);
                }
                Err(ChunkUploadError::Unauthorized) => {
                    error!(index = chunk.index, "Upload token rejected");
                    return Err(TransferError::Unauthorized);
                }
                Err(e) if attempt < self.config.retry_limit => {
                    warn!(
                        index = chunk.index,
                        error = %e,
                        "Retrying chunk ({}/{})",
                        attempt + 1,
                        self.config.retry_limit
                    );
                }
                Err(e) => {
                    error!(
                        index = chunk.index,
                        error = %e,
                        "Failed to upload chunk after {} retries",
                        self.config.retry_limit
                    );
                }
            }
        }
        Ok(ChunkOutcome::Exhausted)
    }

    fn report(&self) {
        let bytes = self.bytes.load(Ordering::Relaxed);
        (self.on_progress)(UploadProgress {
            loaded: self.loaded.load(Ordering::Relaxed),
            total: self.total,
            throughput: format_speed(bytes, self.started.elapsed().as_secs_f64()),
        });
    }
}

/// Delay before pass `pass` (2 and up): `base * 2^(pass - 2)`, capped, plus
/// up to half of `base` of jitter.
fn backoff_delay(config: &TransferConfig, pass: u32) -> Duration {
    let base = config.backoff_base();
    if base.is_zero() {
        return Duration::ZERO;
    }
    let exponent = pass.saturating_sub(2).min(16);
    let delay = base.saturating_mul(1 << exponent).min(config.backoff_max());
    let jitter_ms = rand::thread_rng().gen_range(0..=config.backoff_base_ms / 2);
    delay + Duration::from_millis(jitter_ms)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transfer::tests::pseudo_random;
    use crate::transport::testing::MemoryStore;
    use bytes::Bytes;
    use std::sync::Mutex;

    fn prepared(len: usize, chunk_size: usize) -> PreparedUpload {
        PreparedUpload::from_compressed(
            "clip.mp4",
            "video/mp4",
            Bytes::from(pseudo_random(len, 11)),
            chunk_size,
        )
        .unwrap()
    }

    fn fast_config() -> TransferConfig {
        TransferConfig {
            backoff_base_ms: 0,
            ..TransferConfig::default()
        }
    }

    #[tokio::test]
    async fn test_upload_all_chunks() {
        let store = MemoryStore::new();
        let prepared = prepared(1000, 100);
        let events = Mutex::new(Vec::new());

        let report = upload(&store, &prepared, &fast_config(), &CancellationToken::new(), |p| {
            events.lock().unwrap().push(p)
        })
        .await
        .unwrap();

        assert_eq!(report.total_chunks, 10);
        assert_eq!(report.passes, 1);
        assert_eq!(report.bytes, 1000);

        let received = store.received.lock().unwrap();
        let payloads: Vec<&[u8]> = received.values().map(|b| b.as_ref()).collect();
        assert_eq!(crate::buffer::concat_buffers(&payloads), prepared.compressed.to_vec());

        let registered = store.registered.lock().unwrap();
        assert_eq!(registered.len(), 1);
        assert_eq!(registered[0].total_chunks, 10);

        let events = events.lock().unwrap();
        assert_eq!(events.len(), 11);
        assert_eq!(events[0].loaded, 0);
        assert_eq!(events.last().unwrap().loaded, 10);
        assert!(events.iter().all(|e| e.total == 10));
    }

    #[tokio::test]
    async fn test_concurrency_bound() {
        let store = MemoryStore::new();
        let prepared = prepared(1200, 100);

        upload(&store, &prepared, &fast_config(), &CancellationToken::new(), |_| {})
            .await
            .unwrap();

        assert_eq!(store.max_in_flight.load(Ordering::SeqCst), MAX_PARALLEL);
        assert_eq!(store.in_flight.load(Ordering::SeqCst), 0);
    }

    const MAX_PARALLEL: usize = crate::config::MAX_PARALLEL_UPLOADS;

    #[tokio::test]
    async fn test_custom_pool_size() {
        let store = MemoryStore::new();
        let prepared = prepared(1200, 100);
        let config = TransferConfig {
            max_parallel_uploads: 2,
            ..fast_config()
        };

        upload(&store, &prepared, &config, &CancellationToken::new(), |_| {})
            .await
            .unwrap();

        assert_eq!(store.max_in_flight.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_retry_bound() {
        let mut store = MemoryStore::new();
        store.fail_first.insert(1, usize::MAX);
        let prepared = prepared(300, 100);
        let config = TransferConfig {
            max_passes: 1,
            ..fast_config()
        };

        let err = upload(&store, &prepared, &config, &CancellationToken::new(), |_| {})
            .await
            .unwrap_err();

        assert!(matches!(err, TransferError::IncompleteUpload { ref failed } if failed == &[1]));
        assert_eq!(store.attempts_for(1), config.retry_limit as usize + 1);
        assert_eq!(store.attempts_for(0), 1);
        assert_eq!(store.attempts_for(2), 1);
    }

    #[tokio::test]
    async fn test_failed_chunks_resubmitted_in_later_pass() {
        let mut store = MemoryStore::new();
        // Exhausts the first pass (4 attempts), succeeds on the second attempt of pass 2
        store.fail_first.insert(2, 5);
        let prepared = prepared(500, 100);
        let events = Mutex::new(Vec::new());

        let report = upload(&store, &prepared, &fast_config(), &CancellationToken::new(), |p| {
            events.lock().unwrap().push(p.loaded)
        })
        .await
        .unwrap();

        assert_eq!(report.passes, 2);
        assert_eq!(store.attempts_for(2), 6);
        assert_eq!(store.received.lock().unwrap().len(), 5);

        let loaded = events.lock().unwrap();
        assert!(loaded.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(*loaded.last().unwrap(), 5);
    }

    #[tokio::test]
    async fn test_passes_are_bounded() {
        let mut store = MemoryStore::new();
        store.fail_first.insert(0, usize::MAX);
        let prepared = prepared(100, 100);
        let config = TransferConfig {
            max_passes: 3,
            ..fast_config()
        };

        let err = upload(&store, &prepared, &config, &CancellationToken::new(), |_| {})
            .await
            .unwrap_err();

        assert!(matches!(err, TransferError::IncompleteUpload { .. }));
        assert_eq!(store.attempts_for(0), 3 * (config.retry_limit as usize + 1));
    }

    #[tokio::test]
    async fn test_registration_failure_aborts() {
        let mut store = MemoryStore::new();
        store.response = FileDataResponse::Failed("quota exceeded".to_string());
        let prepared = prepared(300, 100);

        let err = upload(&store, &prepared, &fast_config(), &CancellationToken::new(), |_| {})
            .await
            .unwrap_err();

        assert!(matches!(err, TransferError::Registration(ref r) if r == "quota exceeded"));
        assert_eq!(store.total_attempts(), 0);
    }

    #[tokio::test]
    async fn test_empty_token_aborts() {
        let mut store = MemoryStore::new();
        store.response = FileDataResponse::Successful(FileToken { token: String::new() });
        let prepared = prepared(300, 100);

        let err = upload(&store, &prepared, &fast_config(), &CancellationToken::new(), |_| {})
            .await
            .unwrap_err();

        assert!(matches!(err, TransferError::MissingToken));
        assert_eq!(store.total_attempts(), 0);
    }

    #[tokio::test]
    async fn test_rejected_token_is_not_retried() {
        let mut store = MemoryStore::new();
        store.reject_token = true;
        let prepared = prepared(100, 100);

        let err = upload(&store, &prepared, &fast_config(), &CancellationToken::new(), |_| {})
            .await
            .unwrap_err();

        assert!(matches!(err, TransferError::Unauthorized));
        assert_eq!(store.attempts_for(0), 1);
    }

    #[tokio::test]
    async fn test_cancelled_before_first_chunk() {
        let store = MemoryStore::new();
        let prepared = prepared(300, 100);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = upload(&store, &prepared, &fast_config(), &cancel, |_| {})
            .await
            .unwrap_err();

        assert!(matches!(err, TransferError::Cancelled));
        assert_eq!(store.total_attempts(), 0);
    }

    #[tokio::test]
    async fn test_cancel_interrupts_stalled_chunk() {
        let mut store = MemoryStore::new();
        store.stall = true;
        let prepared = prepared(300, 100);
        let cancel = CancellationToken::new();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });

        let result = tokio::time::timeout(
            Duration::from_secs(1),
            upload(&store, &prepared, &fast_config(), &cancel, |_| {}),
        )
        .await
        .expect("upload ignored cancellation");

        assert!(matches!(result, Err(TransferError::Cancelled)));
        assert!(store.received.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_invalid_config_rejected() {
        let store = MemoryStore::new();
        let prepared = prepared(300, 100);
        let config = TransferConfig {
            max_parallel_uploads: 0,
            ..fast_config()
        };

        let err = upload(&store, &prepared, &config, &CancellationToken::new(), |_| {})
            .await
            .unwrap_err();
        assert!(matches!(err, TransferError::InvalidConfig(_)));
        assert!(store.registered.lock().unwrap().is_empty());
    }

    #[test]
    fn test_backoff_delay() {
        let config = TransferConfig {
            backoff_base_ms: 100,
            backoff_max_ms: 350,
            ..TransferConfig::default()
        };
        let second = backoff_delay(&config, 2);
        assert!(second >= Duration::from_millis(100) && second <= Duration::from_millis(150));
        let third = backoff_delay(&config, 3);
        assert!(third >= Duration::from_millis(200) && third <= Duration::from_millis(250));
        let capped = backoff_delay(&config, 10);
        assert!(capped >= Duration::from_millis(350) && capped <= Duration::from_millis(400));

        assert_eq!(backoff_delay(&fast_config(), 4), Duration::ZERO);
    }
}
