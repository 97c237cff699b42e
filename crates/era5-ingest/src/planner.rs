//! Request planning: one immutable archive request per calendar month.

use std::fmt;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::config::RunConfig;

/// A calendar month, the unit of retrieval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Period {
    pub year: i32,
    pub month: u32,
}

impl Period {
    pub fn new(year: i32, month: u32) -> Self {
        Self { year, month }
    }

    /// Number of days in the month, leap years included.
    pub fn days_in_month(&self) -> u32 {
        let (next_year, next_month) = if self.month == 12 {
            (self.year + 1, 1)
        } else {
            (self.year, self.month + 1)
        };
        match (
            NaiveDate::from_ymd_opt(self.year, self.month, 1),
            NaiveDate::from_ymd_opt(next_year, next_month, 1),
        ) {
            (Some(start), Some(end)) => (end - start).num_days() as u32,
            _ => 0,
        }
    }

    /// Artifact file name, e.g. `ERA5_2024_01.grib`.
    pub fn file_name(&self) -> String {
        format!("ERA5_{}_{:02}.grib", self.year, self.month)
    }

    /// Parse an artifact file name back into its period.
    pub fn from_file_name(name: &str) -> Option<Self> {
        let stem = name.strip_prefix("ERA5_")?.strip_suffix(".grib")?;
        let (year, month) = stem.split_once('_')?;
        let period = Self::new(year.parse().ok()?, month.parse().ok()?);
        (1..=12).contains(&period.month).then_some(period)
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{:02}", self.year, self.month)
    }
}

/// Every month of the inclusive year range, in order.
pub fn periods(start_year: i32, end_year: i32) -> Vec<Period> {
    (start_year..=end_year)
        .flat_map(|year| (1..=12).map(move |month| Period::new(year, month)))
        .collect()
}

/// Bounding box in degrees, serialised as `[N, W, S, E]`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Area {
    pub north: f64,
    pub west: f64,
    pub south: f64,
    pub east: f64,
}

impl Area {
    /// Box of `buffer` degrees around a point.
    pub fn around(lat: f64, lon: f64, buffer: f64) -> Self {
        Self {
            north: lat + buffer,
            west: lon - buffer,
            south: lat - buffer,
            east: lon + buffer,
        }
    }

    pub fn to_array(&self) -> [f64; 4] {
        [self.north, self.west, self.south, self.east]
    }
}

/// Everything needed to retrieve one month from the archive.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestDescriptor {
    pub period: Period,
    pub dataset: String,
    pub product_type: String,
    pub format: String,
    /// Parameter ids, e.g. `"140229"`
    pub variables: Vec<String>,
    /// `"01"`..`"31"`
    pub days: Vec<String>,
    /// `"00:00"`..`"23:00"`
    pub hours: Vec<String>,
    pub area: Area,
    pub grid: [f64; 2],
}

impl RequestDescriptor {
    /// File name of the artifact this request produces.
    pub fn file_name(&self) -> String {
        self.period.file_name()
    }

    /// Request body in the Climate Data Store API shape.
    pub fn to_cds_body(&self) -> Value {
        json!({
            "product_type": self.product_type,
            "format": self.format,
            "param": self.variables,
            "year": [self.period.year.to_string()],
            "month": [format!("{:02}", self.period.month)],
            "day": self.days,
            "time": self.hours,
            "area": self.area.to_array(),
            "grid": self.grid,
        })
    }
}

/// Build the request for `period`. Pure function of its inputs.
pub fn plan(period: Period, config: &RunConfig) -> RequestDescriptor {
    let request = &config.request;
    RequestDescriptor {
        period,
        dataset: request.dataset.clone(),
        product_type: request.product_type.clone(),
        format: request.format.clone(),
        variables: config.variable_table().param_ids(),
        days: (1..=period.days_in_month())
            .map(|d| format!("{:02}", d))
            .collect(),
        hours: (0..24).map(|h| format!("{:02}:00", h)).collect(),
        area: Area::around(
            config.target.latitude,
            config.target.longitude,
            request.buffer_deg,
        ),
        grid: request.grid,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_days_in_month() {
        assert_eq!(Period::new(2024, 2).days_in_month(), 29);
        assert_eq!(Period::new(2023, 2).days_in_month(), 28);
        assert_eq!(Period::new(1900, 2).days_in_month(), 28);
        assert_eq!(Period::new(2000, 2).days_in_month(), 29);
        assert_eq!(Period::new(2024, 4).days_in_month(), 30);
        assert_eq!(Period::new(2024, 12).days_in_month(), 31);
    }

    #[test]
    fn test_file_name_round_trip() {
        let period = Period::new(1940, 3);
        assert_eq!(period.file_name(), "ERA5_1940_03.grib");
        assert_eq!(Period::from_file_name("ERA5_1940_03.grib"), Some(period));
        assert_eq!(Period::from_file_name("ERA5_1940_13.grib"), None);
        assert_eq!(Period::from_file_name("notes.grib"), None);
    }

    #[test]
    fn test_periods_cover_range_in_order() {
        let all = periods(1940, 1941);
        assert_eq!(all.len(), 24);
        assert_eq!(all[0], Period::new(1940, 1));
        assert_eq!(all[23], Period::new(1941, 12));
        assert!(all.windows(2).all(|w| w[0] < w[1]));
        assert!(periods(2025, 2024).is_empty());
    }

    #[test]
    fn test_plan_february_leap_year() {
        let config = RunConfig::default();
        let request = plan(Period::new(2024, 2), &config);

        assert_eq!(request.days.len(), 29);
        assert_eq!(request.days.first().map(String::as_str), Some("01"));
        assert_eq!(request.days.last().map(String::as_str), Some("29"));
        assert_eq!(request.hours.len(), 24);
        assert_eq!(request.hours[0], "00:00");
        assert_eq!(request.hours[23], "23:00");
        assert_eq!(request.variables, vec!["140229", "140230", "140231", "140245", "140249"]);
        assert_eq!(request.dataset, "reanalysis-era5-single-levels");
    }

    #[test]
    fn test_plan_area_from_buffer() {
        let config = RunConfig::default();
        let area = plan(Period::new(2024, 1), &config).area.to_array();

        assert!((area[0] - 41.39833299).abs() < 1e-9);
        assert!((area[1] - -9.83166667).abs() < 1e-9);
        assert!((area[2] - 40.89833299).abs() < 1e-9);
        assert!((area[3] - -9.33166667).abs() < 1e-9);
    }

    #[test]
    fn test_plan_is_deterministic() {
        let config = RunConfig::default();
        assert_eq!(plan(Period::new(1999, 7), &config), plan(Period::new(1999, 7), &config));
    }

    #[test]
    fn test_cds_body() {
        let config = RunConfig::default();
        let body = plan(Period::new(2024, 1), &config).to_cds_body();

        assert_eq!(body["product_type"], "reanalysis");
        assert_eq!(body["format"], "grib");
        assert_eq!(body["year"][0], "2024");
        assert_eq!(body["month"][0], "01");
        assert_eq!(body["day"].as_array().map(Vec::len), Some(31));
        assert_eq!(body["grid"][0], 0.25);
        assert_eq!(body["param"][0], "140229");
    }
}
