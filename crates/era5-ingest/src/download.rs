//! Sequential, idempotent monthly downloads.
//!
//! - A period whose artifact already exists is skipped without a network call
//! - Retrieval goes to a `.partial` file that is renamed on success, so an
//!   interrupted download never looks complete
//! - Service errors are retried per [`RetryPolicy`]
//! - A pacing delay follows every newly downloaded file

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::fs;
use tracing::{error, info, instrument, warn};

use crate::archive::ArchiveClient;
use crate::config::RunConfig;
use crate::error::{ArchiveError, ClientInitError, DownloadError};
use crate::planner::{plan, Period, RequestDescriptor};
use crate::retry::RetryPolicy;

/// Where an artifact ended up and whether this call fetched it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnsuredFile {
    pub path: PathBuf,
    pub was_downloaded: bool,
}

/// Per-period result of [`DownloadOrchestrator::download_all`].
#[derive(Debug)]
pub enum DownloadOutcome {
    Downloaded(PathBuf),
    Skipped(PathBuf),
    Failed(DownloadError),
}

/// Outcomes of a download phase, in period order.
#[derive(Debug, Default)]
pub struct DownloadSummary {
    pub outcomes: Vec<(Period, DownloadOutcome)>,
}

impl DownloadSummary {
    pub fn downloaded(&self) -> usize {
        self.count(|o| matches!(o, DownloadOutcome::Downloaded(_)))
    }

    pub fn skipped(&self) -> usize {
        self.count(|o| matches!(o, DownloadOutcome::Skipped(_)))
    }

    pub fn failed(&self) -> Vec<Period> {
        self.outcomes
            .iter()
            .filter(|(_, o)| matches!(o, DownloadOutcome::Failed(_)))
            .map(|(p, _)| *p)
            .collect()
    }

    /// Paths of every artifact available after the phase.
    pub fn available_files(&self) -> Vec<PathBuf> {
        self.outcomes
            .iter()
            .filter_map(|(_, o)| match o {
                DownloadOutcome::Downloaded(p) | DownloadOutcome::Skipped(p) => Some(p.clone()),
                DownloadOutcome::Failed(_) => None,
            })
            .collect()
    }

    fn count(&self, f: impl Fn(&DownloadOutcome) -> bool) -> usize {
        self.outcomes.iter().filter(|(_, o)| f(o)).count()
    }
}

/// Drives an [`ArchiveClient`] over a sequence of periods.
pub struct DownloadOrchestrator {
    client: Arc<dyn ArchiveClient>,
    config: RunConfig,
    data_dir: PathBuf,
    retry: RetryPolicy,
    request_delay: Duration,
}

impl DownloadOrchestrator {
    pub fn new(client: Arc<dyn ArchiveClient>, config: RunConfig) -> Self {
        Self {
            client,
            data_dir: config.download.data_dir.clone(),
            retry: config.retry_policy(),
            request_delay: config.request_delay(),
            config,
        }
    }

    /// Final artifact path for a period.
    pub fn path_for(&self, period: Period) -> PathBuf {
        self.data_dir.join(period.file_name())
    }

    /// Make sure the artifact for `request` exists locally.
    #[instrument(skip(self, request), fields(period = %request.period))]
    pub async fn ensure_file(&self, request: &RequestDescriptor) -> Result<EnsuredFile, DownloadError> {
        let final_path = self.path_for(request.period);

        if fs::try_exists(&final_path).await.unwrap_or(false) {
            info!(path = %final_path.display(), "File already exists, skipping download");
            return Ok(EnsuredFile {
                path: final_path,
                was_downloaded: false,
            });
        }

        fs::create_dir_all(&self.data_dir)
            .await
            .map_err(|source| DownloadError::Io {
                path: self.data_dir.clone(),
                source,
            })?;
        let partial_path = partial_path(&final_path);

        let result = self
            .retry
            .run(
                |attempt| {
                    let partial_path = partial_path.clone();
                    async move {
                        info!(attempt, "Downloading");
                        self.client.retrieve(request, &partial_path).await
                    }
                },
                |e| matches!(e, ArchiveError::Service(_)),
            )
            .await;

        match result {
            Ok(()) => {
                fs::rename(&partial_path, &final_path)
                    .await
                    .map_err(|source| DownloadError::Io {
                        path: final_path.clone(),
                        source,
                    })?;
                info!(path = %final_path.display(), "Download completed");
                Ok(EnsuredFile {
                    path: final_path,
                    was_downloaded: true,
                })
            }
            Err(exhausted) => {
                fs::remove_file(&partial_path).await.ok();
                match exhausted.last_error {
                    ArchiveError::ClientInit(msg) => Err(ClientInitError(msg).into()),
                    ArchiveError::Service(msg) => {
                        error!(attempts = exhausted.attempts, error = %msg, "All download attempts failed");
                        Err(DownloadError::Exhausted {
                            period: request.period,
                            attempts: exhausted.attempts,
                            last_error: msg,
                        })
                    }
                }
            }
        }
    }

    /// Download every period in order, one request at a time.
    ///
    /// Per-period failures are recorded in the summary. Only a client
    /// initialisation failure stops the phase.
    pub async fn download_all(&self, periods: &[Period]) -> Result<DownloadSummary, ClientInitError> {
        let mut summary = DownloadSummary::default();

        for &period in periods {
            let request = plan(period, &self.config);
            let outcome = match self.ensure_file(&request).await {
                Ok(EnsuredFile {
                    path,
                    was_downloaded: true,
                }) => {
                    // Pace the archive after real requests only
                    tokio::time::sleep(self.request_delay).await;
                    DownloadOutcome::Downloaded(path)
                }
                Ok(EnsuredFile { path, .. }) => DownloadOutcome::Skipped(path),
                Err(DownloadError::ClientInit(e)) => {
                    error!(period = %period, error = %e, "Archive client unusable, aborting downloads");
                    return Err(e);
                }
                Err(e) => {
                    warn!(period = %period, error = %e, "No artifact for period");
                    DownloadOutcome::Failed(e)
                }
            };
            summary.outcomes.push((period, outcome));
        }

        info!(
            downloaded = summary.downloaded(),
            skipped = summary.skipped(),
            failed = summary.failed().len(),
            "Download phase complete"
        );
        Ok(summary)
    }

    /// Periods whose artifact is absent from the data directory.
    pub fn missing_files(&self, periods: &[Period]) -> Vec<Period> {
        missing_files(&self.data_dir, periods)
    }
}

/// Periods in `periods` with no artifact in `data_dir`.
pub fn missing_files(data_dir: &Path, periods: &[Period]) -> Vec<Period> {
    periods
        .iter()
        .copied()
        .filter(|p| !data_dir.join(p.file_name()).exists())
        .collect()
}

fn partial_path(final_path: &Path) -> PathBuf {
    let mut name = final_path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".partial");
    final_path.with_file_name(name)
}
