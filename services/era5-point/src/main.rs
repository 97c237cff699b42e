//! ERA5 point time series extractor.
//!
//! Downloads monthly ERA5 single-level GRIB files from the Climate Data
//! Store for a small box around a target point, interpolates each variable
//! to the point at every hour and writes one CSV table.
//!
//! Credentials come from `CDSAPI_URL`/`CDSAPI_KEY` or `~/.cdsapirc`.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use era5_ingest::{run, ArchiveClient, CdsClient, Mode, RunConfig, RunReport, WriteMode};
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum ModeArg {
    /// Download missing months, then extract
    Download,
    /// Extract every GRIB file already in the data directory
    Extract,
}

impl From<ModeArg> for Mode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Download => Mode::Download,
            ModeArg::Extract => Mode::Extract,
        }
    }
}

#[derive(Parser, Debug)]
#[command(name = "era5-point")]
#[command(about = "Extract an ERA5 point time series to CSV")]
struct Args {
    /// YAML configuration file
    #[arg(short, long, env = "ERA5_CONFIG")]
    config: Option<PathBuf>,

    /// What to run
    #[arg(long, value_enum, default_value = "download")]
    mode: ModeArg,

    /// Merge into the existing CSV instead of rebuilding it
    #[arg(long)]
    append: bool,

    /// First year to process
    #[arg(long)]
    start_year: Option<i32>,

    /// Last year to process (inclusive)
    #[arg(long)]
    end_year: Option<i32>,

    /// Target latitude in degrees
    #[arg(long, value_parser = parse_latitude, allow_negative_numbers = true)]
    latitude: Option<f64>,

    /// Target longitude in degrees
    #[arg(long, value_parser = parse_longitude, allow_negative_numbers = true)]
    longitude: Option<f64>,

    /// Directory holding the monthly GRIB files
    #[arg(long, env = "ERA5_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Output CSV path
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Concurrent extraction workers
    #[arg(long)]
    workers: Option<usize>,

    /// Log level
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Emit logs as JSON
    #[arg(long)]
    log_json: bool,
}

fn parse_latitude(s: &str) -> Result<f64, String> {
    parse_bounded(s, 90.0)
}

fn parse_longitude(s: &str) -> Result<f64, String> {
    parse_bounded(s, 180.0)
}

fn parse_bounded(s: &str, limit: f64) -> Result<f64, String> {
    let value: f64 = s.parse().map_err(|e| format!("'{}' is not a number: {}", s, e))?;
    if !(-limit..=limit).contains(&value) {
        return Err(format!("{} is outside [-{}, {}]", value, limit, limit));
    }
    Ok(value)
}

impl Args {
    fn load_config(&self) -> Result<RunConfig> {
        let mut config = match &self.config {
            Some(path) => RunConfig::from_yaml_file(path)
                .with_context(|| format!("Failed to load config from {}", path.display()))?,
            None => RunConfig::default(),
        };

        if let Some(year) = self.start_year {
            config.years.start = year;
        }
        if let Some(year) = self.end_year {
            config.years.end = year;
        }
        if let Some(lat) = self.latitude {
            config.target.latitude = lat;
        }
        if let Some(lon) = self.longitude {
            config.target.longitude = lon;
        }
        if let Some(dir) = &self.data_dir {
            config.download.data_dir = dir.clone();
        }
        if let Some(path) = &self.output {
            config.output.path = path.clone();
        }
        if self.workers.is_some() {
            config.extraction.workers = self.workers;
        }

        config.validate().context("Invalid configuration")?;
        Ok(config)
    }

    fn write_mode(&self) -> WriteMode {
        if self.append {
            WriteMode::Append
        } else {
            WriteMode::Rebuild
        }
    }
}

fn init_tracing(args: &Args) -> Result<()> {
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let builder = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(true);

    if args.log_json {
        tracing::subscriber::set_global_default(builder.json().finish())?;
    } else {
        tracing::subscriber::set_global_default(builder.finish())?;
    }
    Ok(())
}

fn log_report(report: &RunReport) {
    if let Some(download) = &report.download {
        info!(
            downloaded = download.downloaded(),
            skipped = download.skipped(),
            failed = download.failed().len(),
            "Download summary"
        );
    }
    for (path, failure) in &report.extraction_failures {
        warn!(path = %path.display(), error = %failure, "File produced no output");
    }
    if !report.periods_without_output.is_empty() {
        let periods: Vec<String> = report
            .periods_without_output
            .iter()
            .map(|p| p.to_string())
            .collect();
        warn!(count = periods.len(), periods = %periods.join(", "), "Periods without output");
    }
    match &report.written {
        Some(written) => info!(
            rows = written.rows,
            conflicts = report.assembly.conflicts + written.conflicts,
            "Output written"
        ),
        None => warn!("No output written"),
    }
    info!(
        elapsed_secs = report.elapsed.as_secs(),
        elapsed_min = format!("{:.2}", report.elapsed.as_secs_f64() / 60.0),
        "Total runtime"
    );
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let args = Args::parse();
    init_tracing(&args)?;

    let config = args.load_config()?;
    let mode = Mode::from(args.mode);
    info!(
        mode = %mode,
        start_year = config.years.start,
        end_year = config.years.end,
        output = %config.output.path.display(),
        "Starting era5-point"
    );

    let client: Option<Arc<dyn ArchiveClient>> = match mode {
        Mode::Download => Some(Arc::new(
            CdsClient::from_environment().context("Failed to initialize CDS API client")?,
        )),
        Mode::Extract => None,
    };

    let report = run(&config, mode, args.write_mode(), client)
        .await
        .context("Run aborted")?;
    log_report(&report);

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Args {
        let mut argv = vec!["era5-point"];
        argv.extend_from_slice(args);
        Args::try_parse_from(argv).unwrap()
    }

    #[test]
    fn test_defaults() {
        let args = parse(&[]);
        assert_eq!(args.mode, ModeArg::Download);
        assert!(!args.append);
        assert_eq!(args.write_mode(), WriteMode::Rebuild);
    }

    #[test]
    fn test_overrides_applied() {
        let args = parse(&[
            "--mode",
            "extract",
            "--append",
            "--start-year",
            "2020",
            "--end-year",
            "2021",
            "--latitude",
            "-33.9",
            "--longitude",
            "18.4",
            "--workers",
            "3",
        ]);
        let config = args.load_config().unwrap();
        assert_eq!(Mode::from(args.mode), Mode::Extract);
        assert_eq!(args.write_mode(), WriteMode::Append);
        assert_eq!((config.years.start, config.years.end), (2020, 2021));
        assert_eq!(config.target.latitude, -33.9);
        assert_eq!(config.target.longitude, 18.4);
        assert_eq!(config.workers(), 3);
    }

    #[test]
    fn test_coordinates_validated() {
        let argv = ["era5-point", "--latitude", "95"];
        assert!(Args::try_parse_from(argv).is_err());
        let argv = ["era5-point", "--longitude", "-181"];
        assert!(Args::try_parse_from(argv).is_err());
        assert_eq!(parse_longitude("-180"), Ok(-180.0));
    }

    #[test]
    fn test_inverted_years_rejected() {
        let args = parse(&["--start-year", "2025", "--end-year", "2020"]);
        assert!(args.load_config().is_err());
    }

    #[test]
    fn test_config_file_with_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("era5.yaml");
        std::fs::write(&path, "years:\n  start: 1990\n  end: 1995\n").unwrap();

        let args = parse(&["--config", path.to_str().unwrap(), "--end-year", "1991"]);
        let config = args.load_config().unwrap();
        assert_eq!(config.years.start, 1990);
        assert_eq!(config.years.end, 1991);
    }
}
