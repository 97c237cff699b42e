//! End-to-end run: download, extract, assemble, persist.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{info, instrument, warn};

use crate::archive::ArchiveClient;
use crate::assemble::{assemble, persist, AssemblyReport, WriteMode};
use crate::config::RunConfig;
use crate::download::{missing_files, DownloadOrchestrator, DownloadSummary};
use crate::error::{ClientInitError, ExtractionFailure, IngestError, Result};
use crate::extract::{ExtractionRecord, PointExtractor};
use crate::planner::{periods, Period};
use crate::pool::{ExtractionPool, ExtractionResults};

/// Which phases a run performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Mode {
    /// Download the configured year range, then extract what is available.
    #[default]
    Download,
    /// Extract every grid file already in the data directory.
    Extract,
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mode::Download => write!(f, "download"),
            Mode::Extract => write!(f, "extract"),
        }
    }
}

/// What a run did and what it could not do.
#[derive(Debug)]
pub struct RunReport {
    pub mode: Mode,
    /// Present in [`Mode::Download`]
    pub download: Option<DownloadSummary>,
    pub files_extracted: usize,
    pub extraction_failures: BTreeMap<PathBuf, ExtractionFailure>,
    /// Periods in the year range that contributed no records
    pub periods_without_output: Vec<Period>,
    /// Periods in the year range with no artifact on disk
    pub missing_files: Vec<Period>,
    pub assembly: AssemblyReport,
    /// `None` when nothing was extracted and the output was left untouched
    pub written: Option<AssemblyReport>,
    pub elapsed: Duration,
}

/// Run the pipeline.
///
/// `client` is required in [`Mode::Download`]. Only a client initialisation
/// failure, an unreadable data directory or an output write failure stop
/// the run; everything else ends up in the report.
#[instrument(skip(config, client), fields(years = %format!("{}-{}", config.years.start, config.years.end)))]
pub async fn run(
    config: &RunConfig,
    mode: Mode,
    write_mode: WriteMode,
    client: Option<Arc<dyn ArchiveClient>>,
) -> Result<RunReport> {
    let started = Instant::now();
    let periods = periods(config.years.start, config.years.end);
    let data_dir = &config.download.data_dir;

    info!(
        latitude = config.target.latitude,
        longitude = config.target.longitude,
        periods = periods.len(),
        data_dir = %data_dir.display(),
        "Starting ERA5 point extraction"
    );

    let (download, files) = match mode {
        Mode::Download => {
            let client = client.ok_or_else(|| {
                ClientInitError("download mode requires an archive client".to_string())
            })?;
            let orchestrator = DownloadOrchestrator::new(client, config.clone());
            let summary = orchestrator.download_all(&periods).await?;
            let files = summary.available_files();
            (Some(summary), files)
        }
        Mode::Extract => (None, list_grid_files(data_dir)?),
    };

    let extractor = Arc::new(PointExtractor::from_config(config));
    let pool = ExtractionPool::new(extractor, config.workers(), config.extraction_timeout());
    let results = pool.extract_many(files).await;
    let files_extracted = results.len();

    let periods_without_output = periods_without_output(data_dir, &periods, &results);
    let (records, extraction_failures) = split_results(results);

    let keys: Vec<String> = config.variables.iter().map(|v| v.key.clone()).collect();
    let (table, assembly) = assemble(&records, &keys);

    let written = if table.is_empty() {
        warn!(path = %config.output.path.display(), "No data extracted, output left untouched");
        None
    } else {
        Some(persist(&table, &config.output.path, write_mode)?)
    };

    let missing = missing_files(data_dir, &periods);
    for period in &missing {
        warn!(period = %period, file = %period.file_name(), "Missing monthly file");
    }
    for period in &periods_without_output {
        warn!(period = %period, "No output for period");
    }

    let elapsed = started.elapsed();
    info!(
        rows = table.len(),
        files = files_extracted,
        failed_files = extraction_failures.len(),
        missing = missing.len(),
        elapsed_secs = elapsed.as_secs_f64(),
        "Run complete"
    );

    Ok(RunReport {
        mode,
        download,
        files_extracted,
        extraction_failures,
        periods_without_output,
        missing_files: missing,
        assembly,
        written,
        elapsed,
    })
}

/// Every `*.grib` file directly inside `dir`, sorted.
pub fn list_grid_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let io_error = |source| IngestError::Io {
        path: dir.to_path_buf(),
        source,
    };

    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir).map_err(io_error)? {
        let path = entry.map_err(io_error)?.path();
        if path.is_file() && path.extension().is_some_and(|ext| ext == "grib") {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

fn split_results(
    results: ExtractionResults,
) -> (
    BTreeMap<PathBuf, Vec<ExtractionRecord>>,
    BTreeMap<PathBuf, ExtractionFailure>,
) {
    let mut records = BTreeMap::new();
    let mut failures = BTreeMap::new();
    for (path, result) in results {
        match result {
            Ok(file_records) => {
                records.insert(path, file_records);
            }
            Err(failure) => {
                failures.insert(path, failure);
            }
        }
    }
    (records, failures)
}

fn periods_without_output(
    data_dir: &Path,
    periods: &[Period],
    results: &ExtractionResults,
) -> Vec<Period> {
    periods
        .iter()
        .copied()
        .filter(|p| {
            !matches!(
                results.get(&data_dir.join(p.file_name())),
                Some(Ok(records)) if !records.is_empty()
            )
        })
        .collect()
}
