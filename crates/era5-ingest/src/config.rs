//! Run configuration.
//!
//! Loaded from a YAML file; every field has a default so an empty file (or
//! no file at all) reproduces the Leixões buoy extraction:
//!
//! ```yaml
//! target:
//!   latitude: 41.14833299
//!   longitude: -9.58166667
//! years:
//!   start: 1940
//!   end: 2025
//! download:
//!   data_dir: grib
//!   max_retries: 5
//!   request_delay_secs: 120
//!   backoff:
//!     type: linear
//!     base_secs: 120
//! extraction:
//!   timeout_secs: 120
//!   idw:
//!     power: 2.0
//! ```

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::ConfigError;
use crate::interpolation::IdwParams;
use crate::retry::{Backoff, RetryPolicy};
use crate::variables::{default_variables, VariableSpec, VariableTable};

/// Top-level configuration for a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    #[serde(default)]
    pub target: Target,
    #[serde(default)]
    pub years: YearRange,
    #[serde(default)]
    pub request: RequestConfig,
    #[serde(default)]
    pub download: DownloadConfig,
    #[serde(default)]
    pub extraction: ExtractionConfig,
    #[serde(default)]
    pub output: OutputConfig,
    #[serde(default = "default_variables")]
    pub variables: Vec<VariableSpec>,
}

/// Point to extract.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Target {
    pub latitude: f64,
    pub longitude: f64,
}

impl Default for Target {
    fn default() -> Self {
        // Leixões oceanic buoy, Porto
        Self {
            latitude: 41.14833299,
            longitude: -9.58166667,
        }
    }
}

/// Inclusive range of years.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct YearRange {
    pub start: i32,
    pub end: i32,
}

impl Default for YearRange {
    fn default() -> Self {
        Self {
            start: 1940,
            end: 2025,
        }
    }
}

/// Archive request settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestConfig {
    #[serde(default = "default_dataset")]
    pub dataset: String,
    #[serde(default = "default_product_type")]
    pub product_type: String,
    #[serde(default = "default_format")]
    pub format: String,
    /// Margin around the target, degrees
    #[serde(default = "default_buffer")]
    pub buffer_deg: f64,
    /// Output grid resolution [lat, lon], degrees
    #[serde(default = "default_grid")]
    pub grid: [f64; 2],
}

fn default_dataset() -> String {
    "reanalysis-era5-single-levels".to_string()
}

fn default_product_type() -> String {
    "reanalysis".to_string()
}

fn default_format() -> String {
    "grib".to_string()
}

fn default_buffer() -> f64 {
    0.25
}

fn default_grid() -> [f64; 2] {
    [0.25, 0.25]
}

impl Default for RequestConfig {
    fn default() -> Self {
        Self {
            dataset: default_dataset(),
            product_type: default_product_type(),
            format: default_format(),
            buffer_deg: default_buffer(),
            grid: default_grid(),
        }
    }
}

/// Retry backoff between attempts.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BackoffConfig {
    /// Wait `base_secs * attempt`
    Linear { base_secs: u64 },
    /// Wait `initial_secs`, doubling up to `max_secs`
    Exponential { initial_secs: u64, max_secs: u64 },
}

impl Default for BackoffConfig {
    fn default() -> Self {
        BackoffConfig::Linear { base_secs: 120 }
    }
}

/// Download phase settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    /// Total attempts per period
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Pause after every completed download
    #[serde(default = "default_request_delay")]
    pub request_delay_secs: u64,
    #[serde(default)]
    pub backoff: BackoffConfig,
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("grib")
}

fn default_max_retries() -> u32 {
    5
}

fn default_request_delay() -> u64 {
    120
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            max_retries: default_max_retries(),
            request_delay_secs: default_request_delay(),
            backoff: BackoffConfig::default(),
        }
    }
}

/// Extraction phase settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionConfig {
    /// Concurrent files; defaults to available parallelism
    #[serde(default)]
    pub workers: Option<usize>,
    /// Per-file budget
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub idw: IdwParams,
}

fn default_timeout() -> u64 {
    120
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            workers: None,
            timeout_secs: default_timeout(),
            idw: IdwParams::default(),
        }
    }
}

/// Output table settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    #[serde(default = "default_output_path")]
    pub path: PathBuf,
}

fn default_output_path() -> PathBuf {
    PathBuf::from("results/download_era5_data.csv")
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            path: default_output_path(),
        }
    }
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            target: Target::default(),
            years: YearRange::default(),
            request: RequestConfig::default(),
            download: DownloadConfig::default(),
            extraction: ExtractionConfig::default(),
            output: OutputConfig::default(),
            variables: default_variables(),
        }
    }
}

impl RunConfig {
    /// Load and validate a YAML configuration file.
    pub fn from_yaml_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        debug!(path = %path.display(), "Loaded config file");
        Self::from_yaml_str(&content)
    }

    /// Parse and validate YAML configuration text.
    pub fn from_yaml_str(content: &str) -> Result<Self, ConfigError> {
        // An empty document means "all defaults"
        let config: RunConfig = if content.trim().is_empty() {
            RunConfig::default()
        } else {
            serde_yaml::from_str(content)?
        };
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations that cannot produce a meaningful run.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: String| Err(ConfigError::Invalid(msg));

        if self.years.start > self.years.end {
            return invalid(format!(
                "start year {} is after end year {}",
                self.years.start, self.years.end
            ));
        }
        if !(-90.0..=90.0).contains(&self.target.latitude) {
            return invalid(format!("latitude {} outside [-90, 90]", self.target.latitude));
        }
        if !(-180.0..=180.0).contains(&self.target.longitude) {
            return invalid(format!(
                "longitude {} outside [-180, 180]",
                self.target.longitude
            ));
        }
        if self.request.buffer_deg < 0.0 {
            return invalid(format!("negative buffer {}", self.request.buffer_deg));
        }
        if self.variables.is_empty() {
            return invalid("no variables configured".to_string());
        }
        let mut keys = HashSet::new();
        for spec in &self.variables {
            if !keys.insert(spec.key.as_str()) {
                return invalid(format!("duplicate variable key '{}'", spec.key));
            }
        }
        if self.extraction.idw.power <= 0.0 {
            return invalid(format!("IDW power must be positive, got {}", self.extraction.idw.power));
        }
        if self.extraction.idw.epsilon.is_nan() || self.extraction.idw.epsilon <= 0.0 {
            return invalid(format!("IDW epsilon must be positive, got {}", self.extraction.idw.epsilon));
        }
        if self.extraction.timeout_secs == 0 {
            return invalid("extraction timeout must be positive".to_string());
        }
        if self.extraction.workers == Some(0) {
            return invalid("extraction workers must be positive".to_string());
        }
        if self.download.max_retries == 0 {
            return invalid("max_retries must be at least 1".to_string());
        }
        Ok(())
    }

    pub fn variable_table(&self) -> VariableTable {
        VariableTable::new(self.variables.clone())
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        let backoff = match self.download.backoff {
            BackoffConfig::Linear { base_secs } => Backoff::Linear {
                base: Duration::from_secs(base_secs),
            },
            BackoffConfig::Exponential {
                initial_secs,
                max_secs,
            } => Backoff::Exponential {
                initial: Duration::from_secs(initial_secs),
                max: Duration::from_secs(max_secs),
            },
        };
        RetryPolicy::new(self.download.max_retries, backoff)
    }

    pub fn request_delay(&self) -> Duration {
        Duration::from_secs(self.download.request_delay_secs)
    }

    pub fn extraction_timeout(&self) -> Duration {
        Duration::from_secs(self.extraction.timeout_secs)
    }

    /// Worker count, falling back to available parallelism.
    pub fn workers(&self) -> usize {
        self.extraction.workers.unwrap_or_else(|| {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = RunConfig::default();
        assert_eq!(config.years.start, 1940);
        assert_eq!(config.years.end, 2025);
        assert_eq!(config.download.max_retries, 5);
        assert_eq!(config.request_delay(), Duration::from_secs(120));
        assert_eq!(config.extraction_timeout(), Duration::from_secs(120));
        assert_eq!(config.extraction.idw, IdwParams::default());
        assert_eq!(config.variables.len(), 5);
        assert!(config.workers() >= 1);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_empty_yaml_is_default() {
        let config = RunConfig::from_yaml_str("").unwrap();
        assert_eq!(config.output.path, PathBuf::from("results/download_era5_data.csv"));
        assert_eq!(config.download.data_dir, PathBuf::from("grib"));
    }

    #[test]
    fn test_partial_yaml() {
        let yaml = r#"
target:
  latitude: 38.7
  longitude: -9.4
years:
  start: 2000
  end: 2001
download:
  backoff:
    type: exponential
    initial_secs: 2
    max_secs: 60
extraction:
  workers: 3
  idw:
    power: 3.0
variables:
  - key: hs
    short_name: swh
    param_id: 140229
"#;
        let config = RunConfig::from_yaml_str(yaml).unwrap();
        assert_eq!(config.target.latitude, 38.7);
        assert_eq!(config.years.start, 2000);
        assert_eq!(config.workers(), 3);
        assert_eq!(config.extraction.idw.power, 3.0);
        assert_eq!(config.extraction.idw.epsilon, 1e-6);
        assert_eq!(config.download.max_retries, 5);
        assert_eq!(config.variables[0].key, "hs");
        assert!(matches!(
            config.retry_policy().backoff,
            Backoff::Exponential { .. }
        ));
    }

    #[test]
    fn test_validation_failures() {
        let cases: Vec<Box<dyn Fn(&mut RunConfig)>> = vec![
            Box::new(|c| c.years = YearRange { start: 2025, end: 1940 }),
            Box::new(|c| c.target.latitude = 91.0),
            Box::new(|c| c.target.longitude = -181.0),
            Box::new(|c| c.variables.clear()),
            Box::new(|c| c.variables.push(VariableSpec::new("swh", "x", 1))),
            Box::new(|c| c.extraction.idw.power = 0.0),
            Box::new(|c| c.extraction.idw.epsilon = 0.0),
            Box::new(|c| c.extraction.idw.epsilon = f64::NAN),
            Box::new(|c| c.extraction.timeout_secs = 0),
            Box::new(|c| c.extraction.workers = Some(0)),
            Box::new(|c| c.download.max_retries = 0),
        ];

        for (i, mutate) in cases.iter().enumerate() {
            let mut config = RunConfig::default();
            mutate(&mut config);
            assert!(
                matches!(config.validate(), Err(ConfigError::Invalid(_))),
                "case {} should fail",
                i
            );
        }
    }

    #[test]
    fn test_invalid_yaml() {
        assert!(matches!(
            RunConfig::from_yaml_str("years: [1, 2"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_missing_file() {
        assert!(matches!(
            RunConfig::from_yaml_file("/nonexistent/era5.yaml"),
            Err(ConfigError::Read { .. })
        ));
    }
}
