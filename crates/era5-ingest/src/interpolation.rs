//! Inverse distance weighting of a field to a single point.

use serde::{Deserialize, Serialize};

use crate::error::InterpolationError;

/// Inverse distance weighting parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct IdwParams {
    /// Distance exponent
    #[serde(default = "default_power")]
    pub power: f64,
    /// Distance (degrees) within which a grid point counts as the target itself
    #[serde(default = "default_epsilon")]
    pub epsilon: f64,
}

fn default_power() -> f64 {
    2.0
}

fn default_epsilon() -> f64 {
    1e-6
}

impl Default for IdwParams {
    fn default() -> Self {
        Self {
            power: default_power(),
            epsilon: default_epsilon(),
        }
    }
}

/// Shift `lon` by whole turns into `[center - 180, center + 180)`.
pub fn wrap_longitude(lon: f64, center: f64) -> f64 {
    (lon - center + 180.0).rem_euclid(360.0) - 180.0 + center
}

/// Interpolate a field to (`target_lat`, `target_lon`).
///
/// Distances are planar, in degrees, over every unmasked grid point. A point
/// within `params.epsilon` is returned as is; otherwise the result is
/// `Σ w_i v_i / Σ w_i` with `w_i = 1 / d_i^power`. Non-finite values are
/// treated as masked.
pub fn interpolate(
    values: &[f64],
    lats: &[f64],
    lons: &[f64],
    target_lat: f64,
    target_lon: f64,
    params: &IdwParams,
) -> Result<f64, InterpolationError> {
    if values.len() != lats.len() || values.len() != lons.len() {
        return Err(InterpolationError::ShapeMismatch {
            values: values.len(),
            lats: lats.len(),
            lons: lons.len(),
        });
    }
    if values.is_empty() {
        return Err(InterpolationError::Empty);
    }

    // (distance, value) of every unmasked point
    let points: Vec<(f64, f64)> = values
        .iter()
        .zip(lats.iter().zip(lons))
        .filter(|(v, _)| v.is_finite())
        .map(|(&v, (&lat, &lon))| {
            let dlat = lat - target_lat;
            let dlon = wrap_longitude(lon, target_lon) - target_lon;
            ((dlat * dlat + dlon * dlon).sqrt(), v)
        })
        .collect();

    if points.is_empty() {
        return Err(InterpolationError::AllMasked);
    }
    if points.len() == 1 {
        return Ok(points[0].1);
    }

    let (nearest_distance, nearest_value) = points
        .iter()
        .copied()
        .fold((f64::INFINITY, f64::NAN), |best, p| if p.0 < best.0 { p } else { best });
    if nearest_distance <= params.epsilon {
        return Ok(nearest_value);
    }

    let mut weighted_sum = 0.0;
    let mut weight_total = 0.0;
    let mut min = f64::INFINITY;
    let mut max = f64::NEG_INFINITY;
    for &(distance, value) in &points {
        let weight = 1.0 / distance.powf(params.power);
        weighted_sum += weight * value;
        weight_total += weight;
        min = min.min(value);
        max = max.max(value);
    }

    // Rounding can push a convex combination an ulp outside its inputs
    Ok((weighted_sum / weight_total).clamp(min, max))
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_utils::assert_approx_eq;

    const LATS: [f64; 4] = [41.0, 41.0, 41.25, 41.25];
    const LONS: [f64; 4] = [-9.75, -9.5, -9.75, -9.5];

    #[test]
    fn test_exact_node_returns_node_value() {
        let values = [1.0, 2.0, 3.0, 4.0];
        let result = interpolate(&values, &LATS, &LONS, 41.25, -9.5, &IdwParams::default()).unwrap();
        assert_eq!(result, 4.0);
    }

    #[test]
    fn test_within_epsilon_counts_as_node() {
        let values = [1.0, 2.0, 3.0, 4.0];
        let result =
            interpolate(&values, &LATS, &LONS, 41.0 + 5e-7, -9.75, &IdwParams::default()).unwrap();
        assert_eq!(result, 1.0);
    }

    #[test]
    fn test_exact_node_with_zero_epsilon() {
        let values = [1.0, 2.0, 3.0, 4.0];
        let params = IdwParams {
            power: 2.0,
            epsilon: 0.0,
        };
        let result = interpolate(&values, &LATS, &LONS, 41.0, -9.5, &params).unwrap();
        assert_eq!(result, 2.0);
    }

    #[test]
    fn test_centre_of_square_is_mean() {
        let values = [1.0, 2.0, 3.0, 6.0];
        let result = interpolate(&values, &LATS, &LONS, 41.125, -9.625, &IdwParams::default()).unwrap();
        assert_approx_eq!(result, 3.0, 1e-12);
    }

    #[test]
    fn test_closer_points_dominate() {
        let values = [0.0, 0.0, 0.0, 10.0];
        let near = interpolate(&values, &LATS, &LONS, 41.24, -9.51, &IdwParams::default()).unwrap();
        let far = interpolate(&values, &LATS, &LONS, 41.01, -9.74, &IdwParams::default()).unwrap();
        assert!(near > 9.0);
        assert!(far < 1.0);
    }

    #[test]
    fn test_result_within_bounds() {
        let values = [2.5, -1.0, 7.25, 0.5];
        for (lat, lon) in [(41.1, -9.6), (40.0, -12.0), (41.2, -9.51), (45.0, 0.0)] {
            let result = interpolate(&values, &LATS, &LONS, lat, lon, &IdwParams::default()).unwrap();
            assert!((-1.0..=7.25).contains(&result), "{} out of bounds", result);
        }
    }

    #[test]
    fn test_constant_field_is_preserved() {
        let values = [0.1; 4];
        let result = interpolate(&values, &LATS, &LONS, 41.14833299, -9.58166667, &IdwParams::default()).unwrap();
        assert_eq!(result, 0.1);
    }

    #[test]
    fn test_single_point() {
        let result = interpolate(&[5.0], &[0.0], &[0.0], 10.0, 10.0, &IdwParams::default()).unwrap();
        assert_eq!(result, 5.0);
    }

    #[test]
    fn test_masked_points_ignored() {
        let values = [f64::NAN, 2.0, f64::NAN, 2.0];
        let result = interpolate(&values, &LATS, &LONS, 41.0, -9.75, &IdwParams::default()).unwrap();
        assert_eq!(result, 2.0);
    }

    #[test]
    fn test_errors() {
        let p = IdwParams::default();
        assert_eq!(
            interpolate(&[1.0, 2.0], &[0.0], &[0.0, 1.0], 0.0, 0.0, &p),
            Err(InterpolationError::ShapeMismatch {
                values: 2,
                lats: 1,
                lons: 2
            })
        );
        assert_eq!(interpolate(&[], &[], &[], 0.0, 0.0, &p), Err(InterpolationError::Empty));
        assert_eq!(
            interpolate(&[f64::NAN], &[0.0], &[0.0], 0.0, 0.0, &p),
            Err(InterpolationError::AllMasked)
        );
    }

    #[test]
    fn test_longitude_wrapping() {
        assert_approx_eq!(wrap_longitude(350.25, -9.58), -9.75, 1e-9);
        assert_approx_eq!(wrap_longitude(-9.75, -9.58), -9.75, 1e-9);
        assert_approx_eq!(wrap_longitude(170.0, -170.0), -190.0, 1e-9);

        // Grid stored as 0..360 around a -180..180 target
        let lons = [350.25, 350.5, 350.25, 350.5];
        let values = [1.0, 2.0, 3.0, 4.0];
        let result = interpolate(&values, &LATS, &lons, 41.25, -9.5, &IdwParams::default()).unwrap();
        assert_eq!(result, 4.0);
    }

    #[test]
    fn test_power_changes_weighting() {
        let values = [0.0, 0.0, 0.0, 10.0];
        let p1 = IdwParams { power: 1.0, ..Default::default() };
        let p4 = IdwParams { power: 4.0, ..Default::default() };
        let weak = interpolate(&values, &LATS, &LONS, 41.2, -9.55, &p1).unwrap();
        let strong = interpolate(&values, &LATS, &LONS, 41.2, -9.55, &p4).unwrap();
        assert!(strong > weak);
    }
}
