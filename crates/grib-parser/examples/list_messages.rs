use std::env;
use std::fs;

use bytes::Bytes;
use grib_parser::{GribReader, GribTables};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let grib_path = env::args()
        .nth(1)
        .unwrap_or_else(|| "testdata/ERA5_2024_01.grib".to_string());

    println!("Listing GRIB messages in {}:", grib_path);
    let grib_data = fs::read(&grib_path)?;

    let reader = GribReader::new(Bytes::from(grib_data), GribTables::ecmwf());
    let mut msg_count = 0;
    let mut errors = 0;

    for (index, message) in reader.enumerate() {
        match message {
            Ok(msg) => {
                msg_count += 1;
                println!(
                    "Message {}: {} ({}) valid {} grid {}x{}",
                    index + 1,
                    msg.short_name.as_deref().unwrap_or("?"),
                    msg.code,
                    msg.valid_time,
                    msg.grid.ni,
                    msg.grid.nj
                );
            }
            Err(e) => {
                errors += 1;
                println!("Message {}: ERROR - {}", index + 1, e);
            }
        }
    }

    println!("\nTotal messages read: {} ({} errors)", msg_count, errors);
    Ok(())
}
