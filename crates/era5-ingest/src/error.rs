//! Error types for the ingestion pipeline.

use std::path::PathBuf;
use std::time::Duration;

use grib_parser::GribError;
use thiserror::Error;

use crate::planner::Period;

/// Errors loading or validating a [`RunConfig`](crate::config::RunConfig).
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Errors reported by an [`ArchiveClient`](crate::archive::ArchiveClient).
#[derive(Error, Debug)]
pub enum ArchiveError {
    /// Transient or request-level failure; the request may be retried.
    #[error("Archive service error: {0}")]
    Service(String),

    /// The client cannot work at all (credentials, endpoint).
    #[error("Archive client initialisation failed: {0}")]
    ClientInit(String),
}

/// Fatal client failure. Aborts the run.
#[derive(Error, Debug, Clone)]
#[error("Archive client initialisation failed: {0}")]
pub struct ClientInitError(pub String);

/// Failure to produce the artifact for one period.
#[derive(Error, Debug)]
pub enum DownloadError {
    #[error("Download of {period} failed after {attempts} attempts: {last_error}")]
    Exhausted {
        period: Period,
        attempts: u32,
        last_error: String,
    },

    #[error(transparent)]
    ClientInit(#[from] ClientInitError),

    #[error("Filesystem error for {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// A grid file could not be opened or read at all.
#[derive(Error, Debug)]
pub enum ParseError {
    #[error("Failed to read grid file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// A single message inside a grid file could not be decoded.
#[derive(Error, Debug)]
#[error("Failed to decode message: {0}")]
pub struct MessageDecodeError(#[from] pub GribError);

/// Errors reducing a field to a point value.
#[derive(Error, Debug, PartialEq)]
pub enum InterpolationError {
    #[error("Shape mismatch: {values} values, {lats} latitudes, {lons} longitudes")]
    ShapeMismatch {
        values: usize,
        lats: usize,
        lons: usize,
    },

    #[error("Field has no grid points")]
    Empty,

    #[error("All grid points are masked")]
    AllMasked,
}

/// Errors raised by an [`Extractor`](crate::extract::Extractor) for one file.
#[derive(Error, Debug)]
pub enum ExtractError {
    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error("Extraction cancelled")]
    Cancelled,
}

/// Why a file produced no records, as recorded by the extraction pool.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ExtractionFailure {
    #[error("Extraction timed out after {0:?}")]
    TimedOut(Duration),

    #[error("Extraction failed: {0}")]
    Failed(String),

    #[error("Extraction task panicked: {0}")]
    Panicked(String),
}

/// Errors reading or writing the output table.
#[derive(Error, Debug)]
pub enum AssembleError {
    #[error("Output file error for {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Invalid row in existing output: {0}")]
    InvalidRow(String),
}

/// Top-level errors that abort a run.
#[derive(Error, Debug)]
pub enum IngestError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    ClientInit(#[from] ClientInitError),

    #[error(transparent)]
    Assemble(#[from] AssembleError),

    #[error("Failed to access {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Result type for pipeline operations.
pub type Result<T> = std::result::Result<T, IngestError>;
