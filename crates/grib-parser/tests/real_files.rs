//! Decoding of real ERA5 downloads, skipped when the files are absent.
//!
//! Place `ERA5_2024_01.grib` (the default request around the Leixões buoy)
//! in `crates/grib-parser/testdata/` or point `TEST_DATA_DIR` at it.

use bytes::Bytes;
use chrono::Datelike;
use grib_parser::{GribReader, GribTables};
use test_utils::require_test_file;

#[test]
fn test_decode_era5_month() {
    let path = require_test_file!("ERA5_2024_01.grib");
    let data = Bytes::from(std::fs::read(&path).unwrap());

    let messages: Vec<_> = GribReader::new(data, GribTables::ecmwf())
        .collect::<Result<_, _>>()
        .unwrap();

    assert!(!messages.is_empty());
    for message in &messages {
        assert_eq!(message.valid_time.month(), 1);
        assert_eq!(message.values.len(), message.grid.num_points());
        assert!(message.short_name.is_some(), "unnamed {}", message.code);
    }
}
