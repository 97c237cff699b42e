//! Test support for the ERA5 workspace: GRIB encoders, monthly fixtures,
//! field generators and lookup of optional real downloads.

pub mod fixtures;
pub mod generators;
pub mod grib;
pub mod paths;

pub use fixtures::*;
pub use generators::*;
pub use grib::{Grib1Builder, Grib2Builder};
pub use paths::*;

/// Report a missing real-data file. Used by the `require_*` macros.
pub fn report_skip(name: &str) {
    eprintln!("SKIPPED: {} not found (set TEST_DATA_DIR to run)", name);
}

/// Path of a real-data file, or return from the test when it is absent.
#[macro_export]
macro_rules! require_test_file {
    ($name:expr) => {{
        match $crate::find_test_file($name) {
            Some(path) => path,
            None => {
                $crate::report_skip($name);
                return;
            }
        }
    }};
}

/// Like [`require_test_file!`] for several files; yields a `Vec<PathBuf>`.
#[macro_export]
macro_rules! require_test_files {
    ($($name:expr),+ $(,)?) => {{
        vec![$($crate::require_test_file!($name)),+]
    }};
}

/// `|left - right| <= tolerance`, compared as `f64`.
#[macro_export]
macro_rules! assert_approx_eq {
    ($left:expr, $right:expr, $tolerance:expr) => {{
        let (left, right, tolerance) = ($left as f64, $right as f64, $tolerance as f64);
        let diff = (left - right).abs();
        assert!(
            diff <= tolerance,
            "assertion failed: {} != {} within {} (diff {})",
            left,
            right,
            tolerance,
            diff
        );
    }};
}

/// [`assert_approx_eq!`] on both members of a (lat, lon) pair.
#[macro_export]
macro_rules! assert_coords_approx_eq {
    (($lat1:expr, $lon1:expr), ($lat2:expr, $lon2:expr), $tolerance:expr) => {{
        $crate::assert_approx_eq!($lat1, $lat2, $tolerance);
        $crate::assert_approx_eq!($lon1, $lon2, $tolerance);
    }};
}

#[cfg(test)]
mod tests {
    #[test]
    fn test_wave_heights_within_tolerance() {
        assert_approx_eq!(1.2345, 1.2346, 1e-3);
        assert_approx_eq!(-9.75_f32, -9.75, 0.0);
    }

    #[test]
    #[should_panic(expected = "within")]
    fn test_distant_values_fail() {
        assert_approx_eq!(212.0, 213.0, 0.5);
    }

    #[test]
    fn test_grid_corner_matches() {
        assert_coords_approx_eq!((41.0000001, -9.4999999), (41.0, -9.5), 1e-6);
    }

    #[test]
    fn test_missing_real_file_skips() {
        fn body(ran: &mut bool) {
            let _paths = require_test_files!("ERA5_1901_01.grib", "ERA5_1901_02.grib");
            *ran = true;
        }
        let mut ran = false;
        body(&mut ran);
        assert!(!ran);
    }
}
