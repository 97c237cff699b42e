//! GRIB parser (WMO FM 92 GRIB editions 1 and 2).
//!
//! A pure Rust decoder for the regular latitude/longitude, simple packed
//! fields found in reanalysis archives. [`GribReader`] walks a buffer message
//! by message and yields fully decoded [`GribMessage`]s. A message that fails
//! to decode is reported as an `Err` item and reading continues with the next
//! one.
//!
//! Edition 2 messages carrying several fields (repeated sections 2-7) only
//! yield the first field.

pub mod grid;
pub mod sections;
pub mod tables;
pub mod unpacking;

use std::fmt;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::debug;

pub use grid::LatLonGrid;
pub use tables::GribTables;

use sections::{edition1, edition2, read_u24};
use unpacking::{unpack_simple, SimplePacking};

/// Largest grid a message may declare. Bounds allocation for constant
/// fields, which carry no packed data to check the grid size against.
pub const MAX_GRID_POINTS: usize = 1 << 26;

/// Errors raised while decoding GRIB data.
#[derive(Error, Debug)]
pub enum GribError {
    #[error("Invalid GRIB format: {0}")]
    InvalidFormat(String),

    #[error("Invalid section {section}: {reason}")]
    InvalidSection { section: u8, reason: String },

    #[error("Unsupported {what}: {value}")]
    Unsupported { what: &'static str, value: u32 },

    #[error("Failed to unpack data: {0}")]
    UnpackingError(String),

    #[error("Truncated message at offset {offset}: needs {needed} bytes, {available} available")]
    Truncated {
        offset: usize,
        needed: usize,
        available: usize,
    },
}

/// Result type for GRIB decoding.
pub type Result<T> = std::result::Result<T, GribError>;

/// Numeric identity of a field's parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParameterCode {
    Edition1 { table_version: u8, indicator: u8 },
    Edition2 { discipline: u8, category: u8, number: u8 },
}

impl ParameterCode {
    pub fn parameter_number(&self) -> u8 {
        match *self {
            ParameterCode::Edition1 { indicator, .. } => indicator,
            ParameterCode::Edition2 { number, .. } => number,
        }
    }

    /// Parameter table version. Edition 2 has no per-parameter table.
    pub fn table_version(&self) -> Option<u8> {
        match *self {
            ParameterCode::Edition1 { table_version, .. } => Some(table_version),
            ParameterCode::Edition2 { .. } => None,
        }
    }
}

impl fmt::Display for ParameterCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParameterCode::Edition1 {
                table_version,
                indicator,
            } => write!(f, "{}.{}", indicator, table_version),
            ParameterCode::Edition2 {
                discipline,
                category,
                number,
            } => write!(f, "{}.{}.{}", discipline, category, number),
        }
    }
}

/// A decoded field.
#[derive(Debug, Clone)]
pub struct GribMessage {
    /// Byte offset of the message within the buffer
    pub offset: usize,
    pub edition: u8,
    pub code: ParameterCode,
    /// Short name from the lookup tables, when known
    pub short_name: Option<String>,
    pub reference_time: DateTime<Utc>,
    pub valid_time: DateTime<Utc>,
    pub grid: LatLonGrid,
    /// One value per grid point in scanning order; missing points are `NaN`
    pub values: Vec<f64>,
}

/// Iterates over the messages of a GRIB buffer.
pub struct GribReader {
    data: Bytes,
    tables: GribTables,
    position: usize,
}

impl GribReader {
    pub fn new(data: Bytes, tables: GribTables) -> Self {
        Self {
            data,
            tables,
            position: 0,
        }
    }

    /// Locate the next "GRIB" marker at or after `from`.
    fn find_marker(&self, from: usize) -> Option<usize> {
        self.data
            .get(from..)?
            .windows(4)
            .position(|w| w == b"GRIB")
            .map(|p| from + p)
    }

    /// Declared length of the message starting at `start`.
    fn declared_length(&self, start: usize) -> Result<usize> {
        let available = self.data.len() - start;
        let needed = |n: usize| GribError::Truncated {
            offset: start,
            needed: n,
            available,
        };

        if available < 8 {
            return Err(needed(8));
        }
        match self.data[start + 7] {
            1 => Ok(read_u24(&self.data[start + 4..start + 7]) as usize),
            2 => {
                if available < 16 {
                    return Err(needed(16));
                }
                let mut raw = [0u8; 8];
                raw.copy_from_slice(&self.data[start + 8..start + 16]);
                usize::try_from(u64::from_be_bytes(raw))
                    .map_err(|_| GribError::InvalidFormat("Message length overflow".to_string()))
            }
            edition => Err(GribError::Unsupported {
                what: "GRIB edition",
                value: edition as u32,
            }),
        }
    }

    fn decode(&self, start: usize, message: &[u8]) -> Result<GribMessage> {
        let mut decoded = match message[7] {
            1 => decode_edition1(message)?,
            _ => decode_edition2(message)?,
        };
        decoded.offset = start;
        decoded.short_name = self.tables.short_name(&decoded.code).map(str::to_string);
        Ok(decoded)
    }
}

impl Iterator for GribReader {
    type Item = Result<GribMessage>;

    fn next(&mut self) -> Option<Self::Item> {
        let start = self.find_marker(self.position)?;

        let length = match self.declared_length(start) {
            Ok(length) => length,
            Err(e) => {
                self.position = start + 4;
                return Some(Err(e));
            }
        };

        let available = self.data.len() - start;
        if length < 12 || length > available {
            debug!(offset = start, length, available, "Skipping truncated GRIB message");
            self.position = start + 4;
            return Some(Err(GribError::Truncated {
                offset: start,
                needed: length,
                available,
            }));
        }

        let message = &self.data[start..start + length];
        if &message[length - 4..] != b"7777" {
            debug!(offset = start, "GRIB message missing end section, resyncing");
            self.position = start + 4;
            return Some(Err(GribError::InvalidFormat(format!(
                "Missing end section for message at offset {}",
                start
            ))));
        }

        // A well-framed message is consumed even if its contents fail to decode
        self.position = start + length;
        Some(self.decode(start, message))
    }
}

fn decode_edition1(message: &[u8]) -> Result<GribMessage> {
    let pds = edition1::parse_product_definition(message)?;
    if !pds.has_grid_definition {
        return Err(GribError::Unsupported {
            what: "predefined grid",
            value: pds.grid_id as u32,
        });
    }

    let mut offset = 8 + pds.length;
    let gds = edition1::parse_grid_description(message, offset)?;
    offset += gds.length;

    let bitmap = if pds.has_bitmap {
        let bitmap = edition1::parse_bitmap(message, offset)?;
        offset += bitmap.length;
        Some(bitmap)
    } else {
        None
    };

    let bds = edition1::parse_binary_data(message, offset, pds.decimal_scale_factor)?;
    let bitmap = bitmap.as_ref().map(|b| &b.data[..]);
    let num_points = check_payload((2, 4), &gds.grid, &bds.packing, &bds.data, bitmap)?;
    let values = unpack_simple(&bds.data, &bds.packing, num_points, bitmap)?;

    Ok(GribMessage {
        offset: 0,
        edition: 1,
        code: ParameterCode::Edition1 {
            table_version: pds.table_version,
            indicator: pds.indicator_of_parameter,
        },
        short_name: None,
        reference_time: pds.reference_time,
        valid_time: pds.valid_time()?,
        grid: gds.grid,
        values,
    })
}

fn decode_edition2(message: &[u8]) -> Result<GribMessage> {
    let indicator = edition2::parse_indicator(message)?;
    let identification = edition2::parse_identification(message)?;
    let grid = edition2::parse_grid_definition(message)?;
    let product = edition2::parse_product_definition(message)?;
    let representation = edition2::parse_data_representation(message)?;
    let bitmap = edition2::parse_bitmap(message)?;
    let data = edition2::parse_data_section(message)?;

    let bitmap_bits = bitmap.as_ref().map(|b| &b.data[..]);
    let num_points = check_payload((3, 7), &grid, &representation.packing, &data.data, bitmap_bits)?;
    if representation.num_data_points as usize > num_points {
        return Err(GribError::InvalidSection {
            section: 5,
            reason: format!(
                "{} data points for a grid of {}",
                representation.num_data_points, num_points
            ),
        });
    }

    let values = unpack_simple(&data.data, &representation.packing, num_points, bitmap_bits)?;

    Ok(GribMessage {
        offset: 0,
        edition: 2,
        code: ParameterCode::Edition2 {
            discipline: indicator.discipline,
            category: product.parameter_category,
            number: product.parameter_number,
        },
        short_name: None,
        reference_time: identification.reference_time,
        valid_time: identification.reference_time + product.forecast_offset()?,
        grid,
        values,
    })
}

/// Check the declared grid against the bitmap and packed data it comes with,
/// before anything is allocated per point. Returns the number of grid points.
///
/// `sections` names the grid and data sections of the edition for errors.
fn check_payload(
    sections: (u8, u8),
    grid: &LatLonGrid,
    packing: &SimplePacking,
    data: &[u8],
    bitmap: Option<&[u8]>,
) -> Result<usize> {
    let (grid_section, data_section) = sections;
    let num_points = grid
        .ni
        .checked_mul(grid.nj)
        .filter(|&n| n <= MAX_GRID_POINTS)
        .ok_or_else(|| GribError::InvalidSection {
            section: grid_section,
            reason: format!("Grid of {} x {} points is too large", grid.ni, grid.nj),
        })?;

    let present = match bitmap {
        Some(bm) => {
            if bm.len() * 8 < num_points {
                return Err(GribError::InvalidSection {
                    section: grid_section,
                    reason: format!("Grid of {} points, bitmap covers {}", num_points, bm.len() * 8),
                });
            }
            count_present(bm, num_points)
        }
        None => num_points,
    };

    let needed_bits = present.saturating_mul(packing.bits_per_value as usize);
    let available_bits = data.len().saturating_mul(8);
    if needed_bits > available_bits {
        return Err(GribError::InvalidSection {
            section: data_section,
            reason: format!(
                "{} values of {} bits need {} bits, section holds {}",
                present, packing.bits_per_value, needed_bits, available_bits
            ),
        });
    }

    Ok(num_points)
}

/// Set bits among the first `num_points` bits of a bitmap.
fn count_present(bitmap: &[u8], num_points: usize) -> usize {
    let full = num_points / 8;
    let mut count: usize = bitmap[..full].iter().map(|b| b.count_ones() as usize).sum();
    let rest = num_points % 8;
    if rest > 0 {
        let mask = 0xFFu8 << (8 - rest);
        count += (bitmap[full] & mask).count_ones() as usize;
    }
    count
}
