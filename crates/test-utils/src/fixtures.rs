//! Common test fixtures: synthetic ERA5 monthly files.

use std::path::{Path, PathBuf};

use chrono::{Datelike, Duration, NaiveDate, NaiveDateTime, Timelike};

use crate::grib::Grib1Builder;

/// ECMWF table 140 parameters for the default wave variables.
pub mod params {
    pub const SWH: u8 = 229;
    pub const MWD: u8 = 230;
    pub const PP1D: u8 = 231;
    pub const WIND: u8 = 245;
    pub const DWI: u8 = 249;

    pub const ALL: [u8; 5] = [SWH, MWD, PP1D, WIND, DWI];
}

/// Target point used throughout the test suite (Leixões buoy).
pub const TARGET_LAT: f64 = 41.14833299;
pub const TARGET_LON: f64 = -9.58166667;

/// Grid specification for the synthetic 0.25 degree box around the target.
pub mod grid {
    pub const FIRST_LAT: f64 = 41.5;
    pub const FIRST_LON: f64 = -10.0;
    pub const NI: usize = 3;
    pub const NJ: usize = 3;
    pub const STEP: f64 = 0.25;
}

/// Hourly timestamps of a calendar month.
pub fn month_hours(year: i32, month: u32) -> Vec<NaiveDateTime> {
    let Some(start) = NaiveDate::from_ymd_opt(year, month, 1) else {
        return Vec::new();
    };
    let (next_year, next_month) = if month == 12 {
        (year + 1, 1)
    } else {
        (year, month + 1)
    };
    let Some(end) = NaiveDate::from_ymd_opt(next_year, next_month, 1) else {
        return Vec::new();
    };

    let hours = (end - start).num_hours();
    let Some(midnight) = start.and_hms_opt(0, 0, 0) else {
        return Vec::new();
    };
    (0..hours).map(|h| midnight + Duration::hours(h)).collect()
}

/// Encode one analysis message per hour and parameter for a month.
///
/// `field(parameter, time, lat, lon)` gives the value at each grid point.
pub fn era5_month(
    year: i32,
    month: u32,
    parameters: &[u8],
    field: impl Fn(u8, NaiveDateTime, f64, f64) -> f64,
) -> Vec<u8> {
    let mut data = Vec::new();
    for time in month_hours(year, month) {
        for &parameter in parameters {
            let message = Grib1Builder::new(140, parameter)
                .with_reference_time(
                    time.year(),
                    time.month() as u8,
                    time.day() as u8,
                    time.hour() as u8,
                )
                .with_grid(grid::FIRST_LAT, grid::FIRST_LON, grid::NI, grid::NJ, grid::STEP)
                .with_field(|lat, lon| field(parameter, time, lat, lon))
                .build();
            data.extend_from_slice(&message);
        }
    }
    data
}

/// Write `data` to `dir/name` and return the path.
pub fn write_file(dir: &Path, name: &str, data: &[u8]) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, data).expect("Failed to write fixture file");
    path
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_month_hours() {
        assert_eq!(month_hours(2024, 1).len(), 744);
        assert_eq!(month_hours(2024, 2).len(), 696);
        assert_eq!(month_hours(2023, 2).len(), 672);
        assert_eq!(month_hours(2024, 12).len(), 744);
        assert!(month_hours(2024, 13).is_empty());
    }

    #[test]
    fn test_era5_month_contains_all_messages() {
        let data = era5_month(2024, 2, &[params::SWH], |_, _, _, _| 1.0);
        let count = data.windows(4).filter(|w| *w == b"GRIB").count();
        assert_eq!(count, 696);
    }
}
