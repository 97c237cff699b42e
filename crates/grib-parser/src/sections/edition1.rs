//! GRIB edition 1 sections (WMO FM 92 GRIB Edition 1).
//!
//! Layout of a message:
//! - Indicator section (8 octets): "GRIB", total length (3 octets), edition
//! - Product definition section (PDS)
//! - Grid description section (GDS), optional, flagged in the PDS
//! - Bit map section (BMS), optional, flagged in the PDS
//! - Binary data section (BDS)
//! - End section "7777"

use bytes::Bytes;
use chrono::{DateTime, Duration, NaiveDate, Utc};

use super::{decode_signed, read_u24};
use crate::grid::LatLonGrid;
use crate::unpacking::{ibm_to_f64, SimplePacking};
use crate::GribError;

const PDS_OFFSET: usize = 8;

/// Product definition section.
#[derive(Debug, Clone)]
pub struct ProductDefinition {
    pub length: usize,
    pub table_version: u8,
    pub centre: u8,
    pub generating_process: u8,
    pub grid_id: u8,
    pub has_grid_definition: bool,
    pub has_bitmap: bool,
    pub indicator_of_parameter: u8,
    pub level_type: u8,
    pub level: u16,
    pub reference_time: DateTime<Utc>,
    pub time_unit: u8,
    pub p1: u8,
    pub p2: u8,
    pub time_range_indicator: u8,
    pub decimal_scale_factor: i16,
}

impl ProductDefinition {
    /// Valid time derived from the reference time, P1/P2 and the time range
    /// indicator (code table 5).
    pub fn valid_time(&self) -> Result<DateTime<Utc>, GribError> {
        let offset_units = match self.time_range_indicator {
            0 => self.p1 as i64,
            1 => 0,
            2..=5 => self.p2 as i64,
            // P1 and P2 form a single 16-bit period
            10 => ((self.p1 as i64) << 8) | self.p2 as i64,
            other => {
                return Err(GribError::Unsupported {
                    what: "time range indicator",
                    value: other as u32,
                })
            }
        };

        let offset = match self.time_unit {
            0 => Duration::minutes(offset_units),
            1 => Duration::hours(offset_units),
            2 => Duration::days(offset_units),
            10 => Duration::hours(3 * offset_units),
            11 => Duration::hours(6 * offset_units),
            12 => Duration::hours(12 * offset_units),
            254 => Duration::seconds(offset_units),
            other => {
                return Err(GribError::Unsupported {
                    what: "time unit",
                    value: other as u32,
                })
            }
        };

        Ok(self.reference_time + offset)
    }
}

/// Grid description section, restricted to regular latitude/longitude grids.
#[derive(Debug, Clone)]
pub struct GridDescription {
    pub length: usize,
    pub data_representation_type: u8,
    pub grid: LatLonGrid,
}

/// Bit map section.
#[derive(Debug, Clone)]
pub struct Bitmap {
    pub length: usize,
    pub data: Bytes,
}

/// Binary data section header plus packed payload.
#[derive(Debug, Clone)]
pub struct BinaryData {
    pub length: usize,
    pub packing: SimplePacking,
    pub data: Bytes,
}

/// Parse the product definition section at offset 8.
pub fn parse_product_definition(data: &[u8]) -> Result<ProductDefinition, GribError> {
    let section = section_slice(data, PDS_OFFSET, 28, 1)?;

    let flags = section[7];
    let year_of_century = section[12] as i32;
    let century = section[24] as i32;
    let year = (century - 1) * 100 + year_of_century;
    let (month, day, hour, minute) = (section[13], section[14], section[15], section[16]);

    let reference_time = NaiveDate::from_ymd_opt(year, month as u32, day as u32)
        .and_then(|date| date.and_hms_opt(hour as u32, minute as u32, 0))
        .ok_or_else(|| GribError::InvalidSection {
            section: 1,
            reason: format!(
                "Invalid date: {}-{:02}-{:02} {:02}:{:02}",
                year, month, day, hour, minute
            ),
        })?;

    Ok(ProductDefinition {
        length: section.len(),
        table_version: section[3],
        centre: section[4],
        generating_process: section[5],
        grid_id: section[6],
        has_grid_definition: flags & 0x80 != 0,
        has_bitmap: flags & 0x40 != 0,
        indicator_of_parameter: section[8],
        level_type: section[9],
        level: u16::from_be_bytes([section[10], section[11]]),
        reference_time: DateTime::<Utc>::from_naive_utc_and_offset(reference_time, Utc),
        time_unit: section[17],
        p1: section[18],
        p2: section[19],
        time_range_indicator: section[20],
        decimal_scale_factor: decode_signed(&section[26..28]) as i16,
    })
}

/// Parse a grid description section starting at `offset`.
pub fn parse_grid_description(data: &[u8], offset: usize) -> Result<GridDescription, GribError> {
    let section = section_slice(data, offset, 32, 2)?;

    let data_representation_type = section[5];
    if data_representation_type != 0 {
        return Err(GribError::Unsupported {
            what: "grid data representation type",
            value: data_representation_type as u32,
        });
    }

    let ni = u16::from_be_bytes([section[6], section[7]]) as usize;
    let nj = u16::from_be_bytes([section[8], section[9]]) as usize;
    let la1 = decode_signed(&section[10..13]);
    let lo1 = decode_signed(&section[13..16]);
    let resolution_flags = section[16];
    let la2 = decode_signed(&section[17..20]);
    let lo2 = decode_signed(&section[20..23]);
    let di = u16::from_be_bytes([section[23], section[24]]);
    let dj = u16::from_be_bytes([section[25], section[26]]);
    let scanning_mode = section[27];

    // Increments are only meaningful when flagged and not set to "missing"
    let increments_given = resolution_flags & 0x80 != 0;
    let increment = |value: u16| {
        if increments_given && value != u16::MAX {
            value as f64 / 1000.0
        } else {
            0.0
        }
    };

    let grid = LatLonGrid {
        ni,
        nj,
        first_lat: la1 as f64 / 1000.0,
        first_lon: lo1 as f64 / 1000.0,
        last_lat: la2 as f64 / 1000.0,
        last_lon: lo2 as f64 / 1000.0,
        di: increment(di),
        dj: increment(dj),
        scanning_mode,
    };

    Ok(GridDescription {
        length: section.len(),
        data_representation_type,
        grid,
    })
}

/// Parse a bit map section starting at `offset`.
pub fn parse_bitmap(data: &[u8], offset: usize) -> Result<Bitmap, GribError> {
    let section = section_slice(data, offset, 6, 3)?;

    let table_reference = u16::from_be_bytes([section[4], section[5]]);
    if table_reference != 0 {
        return Err(GribError::Unsupported {
            what: "predefined bitmap",
            value: table_reference as u32,
        });
    }

    Ok(Bitmap {
        length: section.len(),
        data: Bytes::copy_from_slice(&section[6..]),
    })
}

/// Parse a binary data section starting at `offset`.
pub fn parse_binary_data(
    data: &[u8],
    offset: usize,
    decimal_scale_factor: i16,
) -> Result<BinaryData, GribError> {
    let section = section_slice(data, offset, 11, 4)?;

    let flags = section[3] & 0xF0;
    if flags & 0x80 != 0 {
        return Err(GribError::Unsupported {
            what: "spherical harmonic coefficients",
            value: flags as u32,
        });
    }
    if flags & 0x40 != 0 {
        return Err(GribError::Unsupported {
            what: "complex or second-order packing",
            value: flags as u32,
        });
    }

    let packing = SimplePacking {
        reference_value: ibm_to_f64([section[6], section[7], section[8], section[9]]),
        binary_scale_factor: decode_signed(&section[4..6]) as i16,
        decimal_scale_factor,
        bits_per_value: section[10],
    };

    Ok(BinaryData {
        length: section.len(),
        packing,
        data: Bytes::copy_from_slice(&section[11..]),
    })
}

/// Slice a section with a 3-octet length prefix, validating its bounds.
fn section_slice(
    data: &[u8],
    offset: usize,
    min_length: usize,
    section: u8,
) -> Result<&[u8], GribError> {
    if offset + 3 > data.len() {
        return Err(GribError::InvalidSection {
            section,
            reason: "Section starts past end of message".to_string(),
        });
    }

    let length = read_u24(&data[offset..offset + 3]) as usize;
    if length < min_length {
        return Err(GribError::InvalidSection {
            section,
            reason: format!("Section length {} below minimum {}", length, min_length),
        });
    }
    if offset + length > data.len() {
        return Err(GribError::InvalidSection {
            section,
            reason: format!(
                "Section length {} exceeds available data {}",
                length,
                data.len() - offset
            ),
        });
    }

    Ok(&data[offset..offset + length])
}
