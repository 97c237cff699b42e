//! ERA5 reanalysis point extraction.
//!
//! Retrieves monthly ERA5 single-level GRIB files around a target point,
//! interpolates each configured variable to that point at every hour and
//! assembles one time-ordered table.
//!
//! # Pipeline
//!
//! 1. [`planner`] turns the year range into one [`RequestDescriptor`] per month
//! 2. [`download`] fetches missing months sequentially through an [`ArchiveClient`]
//! 3. [`pool`] runs a [`PointExtractor`] per file on the blocking pool
//! 4. [`assemble`] merges records by timestamp and writes the CSV
//!
//! [`pipeline::run`] strings these together.

pub mod archive;
pub mod assemble;
pub mod config;
pub mod download;
pub mod error;
pub mod extract;
pub mod interpolation;
pub mod parser;
pub mod pipeline;
pub mod planner;
pub mod pool;
pub mod retry;
pub mod variables;

pub use archive::{ArchiveClient, CdsClient, CdsCredentials};
pub use assemble::{assemble, persist, AssemblyReport, OutputRow, OutputTable, WriteMode};
pub use config::RunConfig;
pub use download::{DownloadOrchestrator, DownloadOutcome, DownloadSummary, EnsuredFile};
pub use error::{
    ArchiveError, AssembleError, ClientInitError, ConfigError, DownloadError, ExtractError,
    ExtractionFailure, IngestError, InterpolationError, MessageDecodeError, ParseError, Result,
};
pub use extract::{ExtractionRecord, Extractor, PointExtractor};
pub use interpolation::{interpolate, IdwParams};
pub use parser::{GridFileParser, GridMessage};
pub use pipeline::{run, Mode, RunReport};
pub use planner::{periods, plan, Area, Period, RequestDescriptor};
pub use pool::{ExtractionPool, ExtractionResults};
pub use retry::{Backoff, RetryPolicy};
pub use variables::{default_variables, MatchTier, VariableSpec, VariableTable};

pub use tokio_util::sync::CancellationToken;
