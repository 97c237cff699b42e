//! GRIB edition 2 sections (WMO FM 92 GRIB Edition 2).
//!
//! Only the templates needed for regular latitude/longitude analysis fields
//! are decoded: grid template 3.0, product template 4.0 and data
//! representation template 5.0 (simple packing).

use bytes::Bytes;
use chrono::{DateTime, Duration, NaiveDate, Utc};

use super::decode_signed;
use crate::grid::LatLonGrid;
use crate::unpacking::SimplePacking;
use crate::GribError;

/// Section 0: Indicator Section (16 bytes)
#[derive(Debug, Clone)]
pub struct Indicator {
    pub discipline: u8,
    pub edition: u8,
    pub message_length: u64,
}

/// Section 1: Identification Section
#[derive(Debug, Clone)]
pub struct Identification {
    pub center: u16,
    pub sub_center: u16,
    pub table_version: u8,
    pub local_table_version: u8,
    pub significance_of_reference_time: u8,
    pub reference_time: DateTime<Utc>,
}

/// Section 4: Product Definition Section (template 4.0)
#[derive(Debug, Clone)]
pub struct ProductDefinition {
    pub template: u16,
    pub parameter_category: u8,
    pub parameter_number: u8,
    pub time_unit: u8,
    pub forecast_time: u32,
    pub level_type: u8,
    pub level_value: u32,
}

impl ProductDefinition {
    /// Offset of the valid time from the reference time (code table 4.4).
    pub fn forecast_offset(&self) -> Result<Duration, GribError> {
        let value = self.forecast_time as i64;
        match self.time_unit {
            0 => Ok(Duration::minutes(value)),
            1 => Ok(Duration::hours(value)),
            2 => Ok(Duration::days(value)),
            10 => Ok(Duration::hours(3 * value)),
            11 => Ok(Duration::hours(6 * value)),
            12 => Ok(Duration::hours(12 * value)),
            13 => Ok(Duration::seconds(value)),
            other => Err(GribError::Unsupported {
                what: "time unit",
                value: other as u32,
            }),
        }
    }
}

/// Section 5: Data Representation Section (template 5.0)
#[derive(Debug, Clone)]
pub struct DataRepresentation {
    pub num_data_points: u32,
    pub template: u16,
    pub packing: SimplePacking,
}

/// Section 6: Bitmap Section
#[derive(Debug, Clone)]
pub struct Bitmap {
    pub indicator: u8,
    pub data: Bytes,
}

/// Section 7: Data Section
#[derive(Debug, Clone)]
pub struct DataSection {
    pub data: Bytes,
}

// ===== Parsing Functions =====

/// Parse Section 0 (Indicator) from start of message
pub fn parse_indicator(data: &[u8]) -> Result<Indicator, GribError> {
    if data.len() < 16 {
        return Err(GribError::InvalidFormat(
            "Not enough data for indicator section".to_string(),
        ));
    }

    if &data[0..4] != b"GRIB" {
        return Err(GribError::InvalidFormat(
            "Invalid GRIB magic bytes".to_string(),
        ));
    }

    // Octets 5-6 reserved, 7 discipline, 8 edition, 9-16 total length
    let discipline = data[6];
    let edition = data[7];

    if edition != 2 {
        return Err(GribError::InvalidFormat(format!(
            "Expected GRIB edition 2, got {}",
            edition
        )));
    }

    let message_length = u64::from_be_bytes([
        data[8], data[9], data[10], data[11], data[12], data[13], data[14], data[15],
    ]);

    Ok(Indicator {
        discipline,
        edition,
        message_length,
    })
}

/// Parse Section 1 (Identification), located at offset 16.
pub fn parse_identification(data: &[u8]) -> Result<Identification, GribError> {
    const OFFSET: usize = 16;

    if data.len() < OFFSET + 21 || data[OFFSET + 4] != 1 {
        return Err(GribError::InvalidSection {
            section: 1,
            reason: "Identification section missing or truncated".to_string(),
        });
    }

    // Skip section length (4 bytes) and section number (1 byte)
    let sec_data = &data[OFFSET + 5..];

    let center = u16::from_be_bytes([sec_data[0], sec_data[1]]);
    let sub_center = u16::from_be_bytes([sec_data[2], sec_data[3]]);
    let table_version = sec_data[4];
    let local_table_version = sec_data[5];
    let significance_of_reference_time = sec_data[6];

    let year = u16::from_be_bytes([sec_data[7], sec_data[8]]);
    let (month, day, hour, minute, second) =
        (sec_data[9], sec_data[10], sec_data[11], sec_data[12], sec_data[13]);

    let reference_time = NaiveDate::from_ymd_opt(year as i32, month as u32, day as u32)
        .and_then(|date| date.and_hms_opt(hour as u32, minute as u32, second as u32))
        .ok_or_else(|| GribError::InvalidSection {
            section: 1,
            reason: format!(
                "Invalid date: {}-{:02}-{:02} {:02}:{:02}:{:02}",
                year, month, day, hour, minute, second
            ),
        })?;

    Ok(Identification {
        center,
        sub_center,
        table_version,
        local_table_version,
        significance_of_reference_time,
        reference_time: DateTime::<Utc>::from_naive_utc_and_offset(reference_time, Utc),
    })
}

/// Parse Section 3 (Grid Definition), template 3.0 only.
pub fn parse_grid_definition(data: &[u8]) -> Result<LatLonGrid, GribError> {
    let section_data = section(data, 3)?;

    // Bytes 6-9: number of data points, 12-13: grid definition template
    if section_data.len() < 14 {
        return Err(GribError::InvalidSection {
            section: 3,
            reason: "Not enough data".to_string(),
        });
    }
    let grid_template = u16::from_be_bytes([section_data[12], section_data[13]]);
    if grid_template != 0 {
        return Err(GribError::Unsupported {
            what: "grid definition template",
            value: grid_template as u32,
        });
    }

    // Template 3.0 data starts at byte 14:
    // 16-19 Ni, 20-23 Nj, 32-35 La1, 36-39 Lo1, 40 resolution flags,
    // 41-44 La2, 45-48 Lo2, 49-52 Di, 53-56 Dj, 57 scanning mode.
    // Angles are in microdegrees, sign-magnitude.
    let gd = &section_data[14..];
    if gd.len() < 58 {
        return Err(GribError::InvalidSection {
            section: 3,
            reason: format!("Template 0 needs at least 58 bytes, got {}", gd.len()),
        });
    }

    let ni = u32::from_be_bytes([gd[16], gd[17], gd[18], gd[19]]) as usize;
    let nj = u32::from_be_bytes([gd[20], gd[21], gd[22], gd[23]]) as usize;
    let la1 = decode_signed(&gd[32..36]);
    let lo1 = decode_signed(&gd[36..40]);
    let resolution_flags = gd[40];
    let la2 = decode_signed(&gd[41..45]);
    let lo2 = decode_signed(&gd[45..49]);
    let di = u32::from_be_bytes([gd[49], gd[50], gd[51], gd[52]]);
    let dj = u32::from_be_bytes([gd[53], gd[54], gd[55], gd[56]]);
    let scanning_mode = gd[57];

    // Flag bits 3 and 4 (0x20, 0x10) mark the i/j increments as given
    let increment = |value: u32, flag: u8| {
        if resolution_flags & flag != 0 && value != u32::MAX {
            value as f64 / 1e6
        } else {
            0.0
        }
    };

    Ok(LatLonGrid {
        ni,
        nj,
        first_lat: la1 as f64 / 1e6,
        first_lon: lo1 as f64 / 1e6,
        last_lat: la2 as f64 / 1e6,
        last_lon: lo2 as f64 / 1e6,
        di: increment(di, 0x20),
        dj: increment(dj, 0x10),
        scanning_mode,
    })
}

/// Parse Section 4 (Product Definition), template 4.0.
pub fn parse_product_definition(data: &[u8]) -> Result<ProductDefinition, GribError> {
    let section_data = section(data, 4)?;

    if section_data.len() < 34 {
        return Err(GribError::InvalidSection {
            section: 4,
            reason: "Not enough data".to_string(),
        });
    }

    // Bytes 7-8: template number, 9: category, 10: number,
    // 17: unit of time range, 18-21: forecast time,
    // 22: type of first fixed surface, 23: scale factor, 24-27: scaled value
    let template = u16::from_be_bytes([section_data[7], section_data[8]]);
    if template != 0 {
        return Err(GribError::Unsupported {
            what: "product definition template",
            value: template as u32,
        });
    }

    Ok(ProductDefinition {
        template,
        parameter_category: section_data[9],
        parameter_number: section_data[10],
        time_unit: section_data[17],
        forecast_time: u32::from_be_bytes([
            section_data[18],
            section_data[19],
            section_data[20],
            section_data[21],
        ]),
        level_type: section_data[22],
        level_value: u32::from_be_bytes([
            section_data[24],
            section_data[25],
            section_data[26],
            section_data[27],
        ]),
    })
}

/// Parse Section 5 (Data Representation), template 5.0.
pub fn parse_data_representation(data: &[u8]) -> Result<DataRepresentation, GribError> {
    let section_data = section(data, 5)?;

    if section_data.len() < 21 {
        return Err(GribError::InvalidSection {
            section: 5,
            reason: "Not enough data".to_string(),
        });
    }

    // Octets 6-9 [5-8]: number of data points, 10-11 [9-10]: template,
    // 12-15 [11-14]: reference value (IEEE float), 16-17 [15-16]: E,
    // 18-19 [17-18]: D, 20 [19]: bits per value
    let num_data_points = u32::from_be_bytes([
        section_data[5],
        section_data[6],
        section_data[7],
        section_data[8],
    ]);
    let template = u16::from_be_bytes([section_data[9], section_data[10]]);
    if template != 0 {
        return Err(GribError::Unsupported {
            what: "data representation template",
            value: template as u32,
        });
    }

    let reference_value = f32::from_be_bytes([
        section_data[11],
        section_data[12],
        section_data[13],
        section_data[14],
    ]);

    Ok(DataRepresentation {
        num_data_points,
        template,
        packing: SimplePacking {
            reference_value: reference_value as f64,
            binary_scale_factor: decode_signed(&section_data[15..17]) as i16,
            decimal_scale_factor: decode_signed(&section_data[17..19]) as i16,
            bits_per_value: section_data[19],
        },
    })
}

/// Parse Section 6 (Bitmap). Returns `None` when no bitmap applies.
pub fn parse_bitmap(data: &[u8]) -> Result<Option<Bitmap>, GribError> {
    let section_data = match section(data, 6) {
        Ok(section_data) => section_data,
        // Section 6 is mandatory in the standard but absent in some producers
        Err(_) => return Ok(None),
    };

    if section_data.len() < 6 {
        return Err(GribError::InvalidSection {
            section: 6,
            reason: "Not enough data".to_string(),
        });
    }

    let indicator = section_data[5];
    match indicator {
        255 => Ok(None),
        0 => Ok(Some(Bitmap {
            indicator,
            data: Bytes::copy_from_slice(&section_data[6..]),
        })),
        other => Err(GribError::Unsupported {
            what: "bitmap indicator",
            value: other as u32,
        }),
    }
}

/// Parse Section 7 (Data)
pub fn parse_data_section(data: &[u8]) -> Result<DataSection, GribError> {
    let section_data = section(data, 7)?;

    let data_bytes = if section_data.len() > 5 {
        Bytes::copy_from_slice(&section_data[5..])
    } else {
        Bytes::new()
    };

    Ok(DataSection { data: data_bytes })
}

// ===== Helper Functions =====

/// Slice of a section by number within a message.
fn section(data: &[u8], section_num: u8) -> Result<&[u8], GribError> {
    let offset = find_section(data, section_num)?;
    let length = u32::from_be_bytes([
        data[offset],
        data[offset + 1],
        data[offset + 2],
        data[offset + 3],
    ]) as usize;
    Ok(&data[offset..offset + length])
}

/// Find a section by number within a message
fn find_section(data: &[u8], section_num: u8) -> Result<usize, GribError> {
    let mut offset = 16; // After Section 0

    loop {
        if offset + 5 > data.len() {
            return Err(GribError::InvalidSection {
                section: section_num,
                reason: "Section not found".to_string(),
            });
        }

        // End section "7777"
        if &data[offset..offset + 4] == b"7777" {
            return Err(GribError::InvalidSection {
                section: section_num,
                reason: "Reached end of message without finding section".to_string(),
            });
        }

        let section_length = u32::from_be_bytes([
            data[offset],
            data[offset + 1],
            data[offset + 2],
            data[offset + 3],
        ]) as usize;

        if section_length < 5 || offset + section_length > data.len() {
            return Err(GribError::InvalidSection {
                section: section_num,
                reason: "Invalid section length".to_string(),
            });
        }

        if data[offset + 4] == section_num {
            return Ok(offset);
        }

        offset += section_length;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_indicator_rejects_bad_magic() {
        let data = [0u8; 16];
        assert!(matches!(
            parse_indicator(&data),
            Err(GribError::InvalidFormat(_))
        ));
    }

    #[test]
    fn test_parse_indicator_reads_length() {
        let mut data = b"GRIB".to_vec();
        data.extend_from_slice(&[0, 0, 10, 2]);
        data.extend_from_slice(&1234u64.to_be_bytes());

        let indicator = parse_indicator(&data).unwrap();
        assert_eq!(indicator.discipline, 10);
        assert_eq!(indicator.message_length, 1234);
    }

    #[test]
    fn test_forecast_offset_units() {
        let mut pds = ProductDefinition {
            template: 0,
            parameter_category: 0,
            parameter_number: 3,
            time_unit: 1,
            forecast_time: 6,
            level_type: 1,
            level_value: 0,
        };
        assert_eq!(pds.forecast_offset().unwrap(), Duration::hours(6));

        pds.time_unit = 11;
        assert_eq!(pds.forecast_offset().unwrap(), Duration::hours(36));

        pds.time_unit = 200;
        assert!(pds.forecast_offset().is_err());
    }

    #[test]
    fn test_find_section_stops_at_end_marker() {
        let mut data = vec![0u8; 16];
        data.extend_from_slice(b"7777");
        data.push(0);
        assert!(find_section(&data, 3).is_err());
    }
}
