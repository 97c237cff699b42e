//! Per-file extraction of point time series.

use std::collections::BTreeMap;
use std::path::Path;

use chrono::NaiveDateTime;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::RunConfig;
use crate::error::ExtractError;
use crate::interpolation::{interpolate, IdwParams};
use crate::parser::GridFileParser;
use crate::variables::VariableTable;

/// Values of every matched variable at one timestamp.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractionRecord {
    pub timestamp: NaiveDateTime,
    /// Variable key to value; a missing key means "absent"
    pub values: BTreeMap<String, f64>,
}

impl ExtractionRecord {
    pub fn new(timestamp: NaiveDateTime) -> Self {
        Self {
            timestamp,
            values: BTreeMap::new(),
        }
    }

    pub fn with(mut self, key: &str, value: f64) -> Self {
        self.values.insert(key.to_string(), value);
        self
    }

    pub fn get(&self, key: &str) -> Option<f64> {
        self.values.get(key).copied()
    }
}

/// Turns one grid file into records. Runs on a blocking thread.
///
/// Implementations should check `cancel` between units of work and return
/// [`ExtractError::Cancelled`] once it fires.
pub trait Extractor: Send + Sync + 'static {
    fn extract(
        &self,
        path: &Path,
        cancel: &CancellationToken,
    ) -> Result<Vec<ExtractionRecord>, ExtractError>;
}

/// Decodes a grid file and interpolates each matched field to the target.
#[derive(Debug, Clone)]
pub struct PointExtractor {
    parser: GridFileParser,
    variables: VariableTable,
    target_lat: f64,
    target_lon: f64,
    idw: IdwParams,
}

impl PointExtractor {
    pub fn new(
        parser: GridFileParser,
        variables: VariableTable,
        target_lat: f64,
        target_lon: f64,
        idw: IdwParams,
    ) -> Self {
        Self {
            parser,
            variables,
            target_lat,
            target_lon,
            idw,
        }
    }

    pub fn from_config(config: &RunConfig) -> Self {
        Self::new(
            GridFileParser::default(),
            config.variable_table(),
            config.target.latitude,
            config.target.longitude,
            config.extraction.idw,
        )
    }
}

impl Extractor for PointExtractor {
    fn extract(
        &self,
        path: &Path,
        cancel: &CancellationToken,
    ) -> Result<Vec<ExtractionRecord>, ExtractError> {
        let messages = self.parser.open(path)?;
        let mut by_time: BTreeMap<NaiveDateTime, ExtractionRecord> = BTreeMap::new();
        let mut skipped = 0usize;

        for message in messages {
            if cancel.is_cancelled() {
                return Err(ExtractError::Cancelled);
            }

            let message = match message {
                Ok(message) => message,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Skipping undecodable GRIB message");
                    continue;
                }
            };

            let Some((spec, tier)) = self.variables.resolve(
                message.short_name.as_deref(),
                Some(message.parameter_number),
                message.table_version,
            ) else {
                skipped += 1;
                continue;
            };

            let value = match interpolate(
                &message.values,
                &message.lats,
                &message.lons,
                self.target_lat,
                self.target_lon,
                &self.idw,
            ) {
                Ok(value) => value,
                Err(e) => {
                    warn!(
                        path = %path.display(),
                        variable = %spec.key,
                        valid_time = %message.valid_time,
                        error = %e,
                        "Skipping field"
                    );
                    continue;
                }
            };

            debug!(variable = %spec.key, ?tier, valid_time = %message.valid_time, value, "Extracted");
            by_time
                .entry(message.valid_time)
                .or_insert_with(|| ExtractionRecord::new(message.valid_time))
                .values
                .insert(spec.key.clone(), value);
        }

        if by_time.is_empty() {
            warn!(path = %path.display(), "No data extracted");
        } else {
            debug!(
                path = %path.display(),
                records = by_time.len(),
                unmatched = skipped,
                "File extracted"
            );
        }

        Ok(by_time.into_values().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::variables::default_variables;
    use chrono::NaiveDate;
    use test_utils::{assert_approx_eq, Grib1Builder};

    fn extractor() -> PointExtractor {
        PointExtractor::new(
            GridFileParser::new(grib_parser::GribTables::new()),
            VariableTable::new(default_variables()),
            41.25,
            -9.75,
            IdwParams::default(),
        )
    }

    fn at(hour: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 1, 1)
            .unwrap()
            .and_hms_opt(hour, 0, 0)
            .unwrap()
    }

    #[test]
    fn test_tier2_match_without_tables() {
        // Empty tables: no short names, identity comes from the numeric code
        let dir = tempfile::tempdir().unwrap();
        let mut data = Grib1Builder::new(140, 229)
            .with_grid(41.5, -10.0, 3, 3, 0.25)
            .with_constant_value(2.0)
            .build();
        data.extend(
            Grib1Builder::new(140, 245)
                .with_grid(41.5, -10.0, 3, 3, 0.25)
                .with_constant_value(7.5)
                .build(),
        );
        data.extend(Grib1Builder::new(128, 167).build());
        let path = dir.path().join("ERA5_2024_01.grib");
        std::fs::write(&path, data).unwrap();

        let records = extractor().extract(&path, &CancellationToken::new()).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].timestamp, at(0));
        assert_approx_eq!(records[0].get("swh").unwrap(), 2.0, 1e-6);
        assert_approx_eq!(records[0].get("wind").unwrap(), 7.5, 1e-6);
        assert_eq!(records[0].get("mwd"), None);
        assert_eq!(records[0].values.len(), 2);
    }

    #[test]
    fn test_records_sorted_by_time() {
        let dir = tempfile::tempdir().unwrap();
        let mut data = Vec::new();
        for hour in [5u8, 1, 3] {
            data.extend(
                Grib1Builder::new(140, 229)
                    .with_reference_time(2024, 1, 1, hour)
                    .with_constant_value(hour as f64)
                    .build(),
            );
        }
        let path = dir.path().join("ERA5_2024_01.grib");
        std::fs::write(&path, data).unwrap();

        let records = extractor().extract(&path, &CancellationToken::new()).unwrap();
        let times: Vec<_> = records.iter().map(|r| r.timestamp).collect();
        assert_eq!(times, vec![at(1), at(3), at(5)]);
    }

    #[test]
    fn test_cancelled_before_first_message() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ERA5_2024_01.grib");
        std::fs::write(&path, Grib1Builder::new(140, 229).build()).unwrap();

        let cancel = CancellationToken::new();
        cancel.cancel();
        assert!(matches!(
            extractor().extract(&path, &cancel),
            Err(ExtractError::Cancelled)
        ));
    }

    #[test]
    fn test_missing_file_is_parse_error() {
        let result = extractor().extract(Path::new("/nonexistent.grib"), &CancellationToken::new());
        assert!(matches!(result, Err(ExtractError::Parse(_))));
    }

    #[test]
    fn test_empty_file_yields_no_records() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.grib");
        std::fs::write(&path, b"").unwrap();
        let records = extractor().extract(&path, &CancellationToken::new()).unwrap();
        assert!(records.is_empty());
    }
}
