//! Bounded parallel extraction over many grid files.
//!
//! Each file runs on a blocking thread under its own timeout. A file that
//! fails, panics or times out is recorded as an [`ExtractionFailure`] and the
//! rest of the batch carries on.
//!
//! A timed-out file gives its worker slot back immediately. Its blocking
//! thread is cancelled and left to finish on its own, so an extractor that
//! ignores cancellation can briefly push the number of running threads past
//! `workers`.

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::error::ExtractionFailure;
use crate::extract::{ExtractionRecord, Extractor};

/// Result of one file.
pub type FileResult = Result<Vec<ExtractionRecord>, ExtractionFailure>;

/// Per-file results keyed by path.
pub type ExtractionResults = BTreeMap<PathBuf, FileResult>;

/// Runs an [`Extractor`] over files with at most `workers` in flight.
pub struct ExtractionPool<E: Extractor> {
    extractor: Arc<E>,
    workers: usize,
    timeout: Duration,
}

impl<E: Extractor> ExtractionPool<E> {
    pub fn new(extractor: Arc<E>, workers: usize, timeout: Duration) -> Self {
        Self {
            extractor,
            workers: workers.max(1),
            timeout,
        }
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Extract every path. The result holds exactly one entry per distinct
    /// input path.
    #[instrument(skip(self, paths), fields(workers = self.workers, timeout_secs = self.timeout.as_secs()))]
    pub async fn extract_many<I>(&self, paths: I) -> ExtractionResults
    where
        I: IntoIterator<Item = PathBuf>,
    {
        let paths: BTreeSet<PathBuf> = paths.into_iter().collect();
        let total = paths.len();
        let start = Instant::now();
        info!(files = total, "Starting extraction");

        let semaphore = Arc::new(Semaphore::new(self.workers));
        let mut handles = Vec::with_capacity(total);

        for path in paths {
            let permit = match semaphore.clone().acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => break,
            };
            let extractor = self.extractor.clone();
            let timeout = self.timeout;
            let task_path = path.clone();

            let handle =
                tokio::spawn(async move { extract_one(extractor, task_path, timeout, permit).await });
            handles.push((path, handle));
        }

        let mut results = BTreeMap::new();
        let mut failed = 0;
        for (path, handle) in handles {
            let result = match handle.await {
                Ok(result) => result,
                Err(e) => Err(ExtractionFailure::Panicked(panic_message(e))),
            };
            if result.is_err() {
                failed += 1;
            }
            results.insert(path, result);
        }

        info!(
            files = total,
            failed,
            duration_ms = start.elapsed().as_millis() as u64,
            "Extraction complete"
        );
        results
    }
}

async fn extract_one<E: Extractor>(
    extractor: Arc<E>,
    path: PathBuf,
    timeout: Duration,
    permit: OwnedSemaphorePermit,
) -> FileResult {
    let cancel = CancellationToken::new();
    let start = Instant::now();
    debug!(path = %path.display(), "Extracting");

    let mut handle = {
        let cancel = cancel.clone();
        let path = path.clone();
        tokio::task::spawn_blocking(move || extractor.extract(&path, &cancel))
    };

    let outcome = tokio::time::timeout(timeout, &mut handle).await;
    drop(permit);

    match outcome {
        Ok(Ok(Ok(records))) => {
            info!(
                path = %path.display(),
                records = records.len(),
                duration_ms = start.elapsed().as_millis() as u64,
                "Extracted file"
            );
            Ok(records)
        }
        Ok(Ok(Err(e))) => {
            warn!(path = %path.display(), error = %e, "Extraction failed");
            Err(ExtractionFailure::Failed(e.to_string()))
        }
        Ok(Err(e)) => {
            let message = panic_message(e);
            error!(path = %path.display(), panic = %message, "Extraction task panicked");
            Err(ExtractionFailure::Panicked(message))
        }
        Err(_) => {
            cancel.cancel();
            warn!(path = %path.display(), timeout_secs = timeout.as_secs_f64(), "Extraction timed out");
            // Dropping the handle detaches the blocking thread
            drop(handle);
            Err(ExtractionFailure::TimedOut(timeout))
        }
    }
}

fn panic_message(e: JoinError) -> String {
    if !e.is_panic() {
        return e.to_string();
    }
    let payload = e.into_panic();
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
