//! GRIB section parsing.
//!
//! Each GRIB message is a sequence of sections. Edition 1 sections carry a
//! 3-octet length, edition 2 sections a 4-octet length plus a section number.
//! Both editions encode signed integers as sign-magnitude (MSB = sign), not
//! two's complement, which the helpers below take care of.

pub mod edition1;
pub mod edition2;

/// Read a 3-octet unsigned big-endian integer.
pub fn read_u24(bytes: &[u8]) -> u32 {
    u32::from_be_bytes([0, bytes[0], bytes[1], bytes[2]])
}

/// Decode a sign-magnitude integer of 2, 3 or 4 octets.
///
/// Returns 0 for any other length.
pub fn decode_signed(bytes: &[u8]) -> i32 {
    let (negative, magnitude) = match bytes.len() {
        2 => (
            bytes[0] & 0x80 != 0,
            u32::from_be_bytes([0, 0, bytes[0] & 0x7F, bytes[1]]),
        ),
        3 => (
            bytes[0] & 0x80 != 0,
            u32::from_be_bytes([0, bytes[0] & 0x7F, bytes[1], bytes[2]]),
        ),
        4 => (
            bytes[0] & 0x80 != 0,
            u32::from_be_bytes([bytes[0] & 0x7F, bytes[1], bytes[2], bytes[3]]),
        ),
        _ => return 0,
    };

    let magnitude = magnitude as i32;
    if negative {
        -magnitude
    } else {
        magnitude
    }
}
