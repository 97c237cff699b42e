//! Test data generators for synthetic marine fields.
//!
//! Values are predictable so tests can verify where a number came from.

/// Significant wave height field in metres, increasing towards the open
/// ocean (west) and with the hour of the month.
pub fn wave_height(hour_of_month: u32, lat: f64, lon: f64) -> f64 {
    1.0 + 0.01 * hour_of_month as f64 + (-lon - 9.0) * 0.5 + (lat - 41.0) * 0.1
}

/// A linear field `a + b*lat + c*lon`. IDW of a linear field over a
/// symmetric neighbourhood is exact at the centre.
pub fn linear_field(a: f64, b: f64, c: f64) -> impl Fn(f64, f64) -> f64 {
    move |lat, lon| a + b * lat + c * lon
}

/// Creates a grid with NaN (masked) values at specified (col, row) positions.
pub fn create_grid_with_nans(
    width: usize,
    height: usize,
    value: f64,
    nan_positions: &[(usize, usize)],
) -> Vec<f64> {
    let mut data = vec![value; width * height];
    for &(col, row) in nan_positions {
        if col < width && row < height {
            data[row * width + col] = f64::NAN;
        }
    }
    data
}
