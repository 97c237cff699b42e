//! End-to-end runs over synthetic monthly GRIB files.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{NaiveDateTime, Timelike};
use era5_ingest::assemble::read_csv;
use era5_ingest::config::BackoffConfig;
use era5_ingest::{
    run, ArchiveClient, ArchiveError, IngestError, Mode, Period, RequestDescriptor, RunConfig,
    WriteMode,
};
use test_utils::fixtures::{era5_month, month_hours, params, write_file};
use test_utils::{assert_approx_eq, wave_height};

/// Value of each variable: distinct per parameter, varying by hour.
fn synthetic(parameter: u8, time: NaiveDateTime, _lat: f64, _lon: f64) -> f64 {
    match parameter {
        params::MWD => 200.0 + time.hour() as f64,
        params::DWI => 180.0 + time.hour() as f64,
        params::PP1D => 8.0 + time.hour() as f64 / 10.0,
        params::WIND => 5.0 + time.hour() as f64 / 4.0,
        _ => 1.0 + time.hour() as f64 / 20.0,
    }
}

fn config(root: &Path) -> RunConfig {
    let mut config = RunConfig::default();
    config.years.start = 2024;
    config.years.end = 2024;
    config.download.data_dir = root.join("grib");
    config.download.max_retries = 2;
    config.download.request_delay_secs = 0;
    config.download.backoff = BackoffConfig::Linear { base_secs: 0 };
    config.extraction.workers = Some(2);
    config.output.path = root.join("results").join("era5.csv");
    config
}

#[tokio::test]
async fn test_extract_mode_builds_full_table() {
    let root = tempfile::tempdir().unwrap();
    let config = config(root.path());
    let data_dir = &config.download.data_dir;
    std::fs::create_dir_all(data_dir).unwrap();
    write_file(data_dir, "ERA5_2024_01.grib", &era5_month(2024, 1, &params::ALL, synthetic));
    write_file(data_dir, "ERA5_2024_02.grib", &era5_month(2024, 2, &params::ALL, synthetic));

    let report = run(&config, Mode::Extract, WriteMode::Rebuild, None).await.unwrap();

    assert!(report.download.is_none());
    assert_eq!(report.files_extracted, 2);
    assert!(report.extraction_failures.is_empty());
    assert_eq!(report.missing_files.len(), 10);
    assert_eq!(report.periods_without_output.len(), 10);
    assert!(!report.periods_without_output.contains(&Period::new(2024, 1)));
    assert_eq!(report.assembly.conflicts, 0);

    let table = read_csv(&config.output.path).unwrap();
    assert_eq!(table.keys(), ["swh", "mwd", "pp1d", "wind", "dwi"]);

    let mut expected = month_hours(2024, 1);
    expected.extend(month_hours(2024, 2));
    assert_eq!(table.timestamps(), expected);

    for row in table.rows() {
        assert!(row.values.iter().all(Option::is_some), "gap at {}", row.timestamp);
    }

    let noon = expected[12];
    assert_approx_eq!(table.value(noon, "swh").unwrap(), 1.6, 1e-3);
    assert_approx_eq!(table.value(noon, "mwd").unwrap(), 212.0, 1e-3);
    assert_approx_eq!(table.value(noon, "wind").unwrap(), 8.0, 1e-3);
}

#[tokio::test]
async fn test_overlapping_files_resolve_by_path_order() {
    let root = tempfile::tempdir().unwrap();
    let config = config(root.path());
    let data_dir = config.download.data_dir.clone();
    std::fs::create_dir_all(&data_dir).unwrap();

    write_file(
        &data_dir,
        "ERA5_2024_01.grib",
        &era5_month(2024, 1, &[params::SWH], |_, _, _, _| 1.0),
    );
    // Sorts after the monthly file; its swh values must lose
    write_file(
        &data_dir,
        "ERA5_2024_01_rerun.grib",
        &era5_month(2024, 1, &[params::SWH, params::MWD], |p, _, _, _| {
            if p == params::SWH {
                9.0
            } else {
                90.0
            }
        }),
    );

    let report = run(&config, Mode::Extract, WriteMode::Rebuild, None).await.unwrap();
    assert_eq!(report.assembly.conflicts, month_hours(2024, 1).len());

    let table = read_csv(&config.output.path).unwrap();
    let first = month_hours(2024, 1)[0];
    assert_approx_eq!(table.value(first, "swh").unwrap(), 1.0, 1e-3);
    assert_approx_eq!(table.value(first, "mwd").unwrap(), 90.0, 1e-3);
    assert_eq!(table.value(first, "pp1d"), None);
}

#[tokio::test]
async fn test_append_preserves_earlier_rows() {
    let root = tempfile::tempdir().unwrap();
    let config = config(root.path());
    let data_dir = config.download.data_dir.clone();
    std::fs::create_dir_all(&data_dir).unwrap();

    let jan = write_file(&data_dir, "ERA5_2024_01.grib", &era5_month(2024, 1, &[params::SWH], synthetic));
    run(&config, Mode::Extract, WriteMode::Rebuild, None).await.unwrap();

    std::fs::remove_file(jan).unwrap();
    write_file(&data_dir, "ERA5_2024_02.grib", &era5_month(2024, 2, &[params::SWH], synthetic));
    run(&config, Mode::Extract, WriteMode::Append, None).await.unwrap();

    let table = read_csv(&config.output.path).unwrap();
    assert_eq!(table.len(), month_hours(2024, 1).len() + month_hours(2024, 2).len());
}

#[tokio::test]
async fn test_corrupt_file_does_not_stop_run() {
    let root = tempfile::tempdir().unwrap();
    let config = config(root.path());
    let data_dir = config.download.data_dir.clone();
    std::fs::create_dir_all(&data_dir).unwrap();

    write_file(&data_dir, "ERA5_2024_01.grib", &era5_month(2024, 1, &params::ALL, synthetic));
    write_file(&data_dir, "ERA5_2024_02.grib", b"GRIB this is not a grid file");

    let report = run(&config, Mode::Extract, WriteMode::Rebuild, None).await.unwrap();

    assert!(report.periods_without_output.contains(&Period::new(2024, 2)));
    let table = read_csv(&config.output.path).unwrap();
    assert_eq!(table.len(), month_hours(2024, 1).len());
}

#[tokio::test]
async fn test_no_data_leaves_output_untouched() {
    let root = tempfile::tempdir().unwrap();
    let config = config(root.path());
    std::fs::create_dir_all(&config.download.data_dir).unwrap();

    let report = run(&config, Mode::Extract, WriteMode::Rebuild, None).await.unwrap();

    assert!(report.written.is_none());
    assert!(!config.output.path.exists());
    assert_eq!(report.periods_without_output.len(), 12);
}

/// Serves synthetic months for January and February; everything else fails.
struct SyntheticArchive {
    calls: Mutex<HashMap<Period, u32>>,
}

#[async_trait]
impl ArchiveClient for SyntheticArchive {
    async fn retrieve(&self, request: &RequestDescriptor, target: &Path) -> Result<(), ArchiveError> {
        *self.calls.lock().unwrap().entry(request.period).or_insert(0) += 1;
        if request.period.month > 2 {
            return Err(ArchiveError::Service("not available".to_string()));
        }
        let data = era5_month(request.period.year, request.period.month, &params::ALL, synthetic);
        std::fs::write(target, data).map_err(|e| ArchiveError::Service(e.to_string()))
    }
}

#[tokio::test]
async fn test_download_mode_end_to_end() {
    let root = tempfile::tempdir().unwrap();
    let config = config(root.path());
    let archive = Arc::new(SyntheticArchive {
        calls: Mutex::new(HashMap::new()),
    });

    let report = run(&config, Mode::Download, WriteMode::Rebuild, Some(archive.clone() as Arc<dyn ArchiveClient>))
        .await
        .unwrap();

    let download = report.download.as_ref().unwrap();
    assert_eq!(download.downloaded(), 2);
    assert_eq!(download.failed().len(), 10);
    assert_eq!(report.files_extracted, 2);
    assert_eq!(
        read_csv(&config.output.path).unwrap().len(),
        month_hours(2024, 1).len() + month_hours(2024, 2).len()
    );

    // A second run finds both months on disk
    let report = run(&config, Mode::Download, WriteMode::Rebuild, Some(archive.clone() as Arc<dyn ArchiveClient>))
        .await
        .unwrap();
    assert_eq!(report.download.as_ref().unwrap().skipped(), 2);
    let calls = archive.calls.lock().unwrap();
    assert_eq!(calls[&Period::new(2024, 1)], 1);
    assert_eq!(calls[&Period::new(2024, 2)], 1);
    assert_eq!(calls[&Period::new(2024, 3)], 4);
}

#[tokio::test]
async fn test_download_mode_aborts_on_client_init() {
    struct Unauthorized;

    #[async_trait]
    impl ArchiveClient for Unauthorized {
        async fn retrieve(&self, _: &RequestDescriptor, _: &Path) -> Result<(), ArchiveError> {
            Err(ArchiveError::ClientInit("401".to_string()))
        }
    }

    let root = tempfile::tempdir().unwrap();
    let config = config(root.path());
    let result = run(&config, Mode::Download, WriteMode::Rebuild, Some(Arc::new(Unauthorized) as Arc<dyn ArchiveClient>)).await;

    assert!(matches!(result, Err(IngestError::ClientInit(_))));
    assert!(!config.output.path.exists());
}

#[tokio::test]
async fn test_spatial_field_interpolates_within_neighbours() {
    let root = tempfile::tempdir().unwrap();
    let config = config(root.path());
    let data_dir = config.download.data_dir.clone();
    std::fs::create_dir_all(&data_dir).unwrap();

    let start = month_hours(2024, 1)[0];
    write_file(
        &data_dir,
        "ERA5_2024_01.grib",
        &era5_month(2024, 1, &[params::SWH], |_, time, lat, lon| {
            let hour_of_month = (time - start).num_hours() as u32;
            wave_height(hour_of_month, lat, lon)
        }),
    );

    run(&config, Mode::Extract, WriteMode::Rebuild, None).await.unwrap();
    let table = read_csv(&config.output.path).unwrap();

    for (hour, row) in table.rows().iter().enumerate() {
        let lowest = wave_height(hour as u32, 41.0, -9.5);
        let highest = wave_height(hour as u32, 41.5, -10.0);
        let value = row.values[0].unwrap();
        assert!(
            value >= lowest - 1e-3 && value <= highest + 1e-3,
            "{} outside [{}, {}] at hour {}",
            value,
            lowest,
            highest,
            hour
        );
    }
}
