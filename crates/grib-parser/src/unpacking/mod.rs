//! GRIB data unpacking.
//!
//! Simple (grid point) packing is shared by both editions:
//!
//! `Y = (R + X * 2^E) / 10^D`
//!
//! Edition 1 stores R as an IBM System/360 single precision float, edition 2
//! as an IEEE 754 float. Missing points are returned as `NaN`.

use crate::GribError;

/// Parameters of simple packing.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SimplePacking {
    pub reference_value: f64,
    pub binary_scale_factor: i16,
    pub decimal_scale_factor: i16,
    pub bits_per_value: u8,
}

impl SimplePacking {
    /// Decode a single packed integer.
    pub fn decode(&self, packed: u32) -> f64 {
        let binary_scale = 2.0_f64.powi(self.binary_scale_factor as i32);
        let decimal_scale = 10.0_f64.powi(-(self.decimal_scale_factor as i32));
        (self.reference_value + packed as f64 * binary_scale) * decimal_scale
    }
}

/// Unpack simple packed data.
///
/// The bitmap, when present, has one bit per grid point (MSB first, 1 =
/// value present). Only present points consume packed values.
pub fn unpack_simple(
    packed_data: &[u8],
    packing: &SimplePacking,
    num_points: usize,
    bitmap: Option<&[u8]>,
) -> Result<Vec<f64>, GribError> {
    if let Some(bm) = bitmap {
        if bm.len() * 8 < num_points {
            return Err(GribError::UnpackingError(format!(
                "Bitmap covers {} points, grid has {}",
                bm.len() * 8,
                num_points
            )));
        }
    }

    let bits_per_value = packing.bits_per_value as usize;
    if bits_per_value > 32 {
        return Err(GribError::UnpackingError(format!(
            "Invalid number of bits: {}",
            bits_per_value
        )));
    }

    let mut values = Vec::with_capacity(num_points);
    let mut bit_position = 0;

    for i in 0..num_points {
        let present = match bitmap {
            Some(bm) => (bm[i / 8] >> (7 - (i % 8))) & 1 == 1,
            None => true,
        };

        if !present {
            values.push(f64::NAN);
            continue;
        }

        // Zero-width values are all equal to the reference value
        let packed_value = if bits_per_value == 0 {
            0
        } else {
            let packed = extract_bits(packed_data, bit_position, bits_per_value)?;
            bit_position += bits_per_value;
            packed
        };

        values.push(packing.decode(packed_value));
    }

    Ok(values)
}

/// Extract `num_bits` bits (MSB first) starting at `start_bit`.
pub fn extract_bits(data: &[u8], start_bit: usize, num_bits: usize) -> Result<u32, GribError> {
    if num_bits > 32 || num_bits == 0 {
        return Err(GribError::UnpackingError(format!(
            "Invalid number of bits: {}",
            num_bits
        )));
    }
    if start_bit + num_bits > data.len() * 8 {
        return Err(GribError::UnpackingError(
            "Not enough data to extract bits".to_string(),
        ));
    }

    let mut result = 0u32;
    for i in 0..num_bits {
        let absolute_bit = start_bit + i;
        let bit = (data[absolute_bit / 8] >> (7 - (absolute_bit % 8))) & 1;
        result = (result << 1) | bit as u32;
    }

    Ok(result)
}

/// Decode an IBM System/360 single precision float.
///
/// Layout: sign bit, 7-bit base-16 exponent biased by 64, 24-bit mantissa.
pub fn ibm_to_f64(bytes: [u8; 4]) -> f64 {
    let sign = if bytes[0] & 0x80 != 0 { -1.0 } else { 1.0 };
    let exponent = (bytes[0] & 0x7F) as i32 - 64;
    let mantissa = u32::from_be_bytes([0, bytes[1], bytes[2], bytes[3]]);

    if mantissa == 0 {
        return 0.0;
    }

    sign * (mantissa as f64 / 16_777_216.0) * 16.0_f64.powi(exponent)
}
