//! Regular latitude/longitude grid geometry.

use crate::GribError;

/// Scanning mode flags (edition 1 table 8, edition 2 table 3.4).
pub mod scan {
    /// Points scan in the -i direction (longitude decreasing).
    pub const I_NEGATIVE: u8 = 0x80;
    /// Points scan in the +j direction (latitude increasing).
    pub const J_POSITIVE: u8 = 0x40;
    /// Adjacent points in the j direction are consecutive.
    pub const J_CONSECUTIVE: u8 = 0x20;
    /// Adjacent rows scan in opposite directions.
    pub const ALTERNATING_ROWS: u8 = 0x10;
}

/// A regular latitude/longitude grid in degrees.
///
/// Increments of `0.0` mean "not given"; they are derived from the first and
/// last grid points.
#[derive(Debug, Clone, PartialEq)]
pub struct LatLonGrid {
    pub ni: usize,
    pub nj: usize,
    pub first_lat: f64,
    pub first_lon: f64,
    pub last_lat: f64,
    pub last_lon: f64,
    pub di: f64,
    pub dj: f64,
    pub scanning_mode: u8,
}

impl LatLonGrid {
    pub fn num_points(&self) -> usize {
        self.ni.saturating_mul(self.nj)
    }

    /// Longitude increment, derived from the corner points when not given.
    pub fn lon_increment(&self) -> f64 {
        if self.di > 0.0 || self.ni < 2 {
            return self.di;
        }
        let mut span = if self.scanning_mode & scan::I_NEGATIVE != 0 {
            self.first_lon - self.last_lon
        } else {
            self.last_lon - self.first_lon
        };
        if span < 0.0 {
            span += 360.0;
        }
        span / (self.ni - 1) as f64
    }

    /// Latitude increment, derived from the corner points when not given.
    pub fn lat_increment(&self) -> f64 {
        if self.dj > 0.0 || self.nj < 2 {
            return self.dj;
        }
        (self.last_lat - self.first_lat).abs() / (self.nj - 1) as f64
    }

    /// Coordinates `(lat, lon)` of every point, in the order values are stored.
    pub fn coordinates(&self) -> Result<Vec<(f64, f64)>, GribError> {
        if self.scanning_mode & scan::ALTERNATING_ROWS != 0 {
            return Err(GribError::Unsupported {
                what: "alternating row scanning",
                value: self.scanning_mode as u32,
            });
        }

        let di = self.lon_increment();
        let dj = self.lat_increment();
        let lon_sign = if self.scanning_mode & scan::I_NEGATIVE != 0 {
            -1.0
        } else {
            1.0
        };
        let lat_sign = if self.scanning_mode & scan::J_POSITIVE != 0 {
            1.0
        } else {
            -1.0
        };

        let point = |i: usize, j: usize| {
            (
                self.first_lat + lat_sign * j as f64 * dj,
                self.first_lon + lon_sign * i as f64 * di,
            )
        };

        let mut coords = Vec::with_capacity(self.num_points());
        if self.scanning_mode & scan::J_CONSECUTIVE != 0 {
            for i in 0..self.ni {
                for j in 0..self.nj {
                    coords.push(point(i, j));
                }
            }
        } else {
            for j in 0..self.nj {
                for i in 0..self.ni {
                    coords.push(point(i, j));
                }
            }
        }

        Ok(coords)
    }
}
