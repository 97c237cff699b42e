//! Grid file decoding into identified field records.

use std::path::{Path, PathBuf};

use bytes::Bytes;
use chrono::NaiveDateTime;
use grib_parser::{GribMessage, GribReader, GribTables};
use tracing::debug;

use crate::error::{MessageDecodeError, ParseError};

/// One decoded field with its coordinates.
///
/// `values`, `lats` and `lons` are co-shaped `nj x ni` arrays stored flat in
/// the file's scanning order. Masked points are `NaN`.
#[derive(Debug, Clone)]
pub struct GridMessage {
    pub short_name: Option<String>,
    pub parameter_number: u32,
    pub table_version: Option<u32>,
    pub valid_time: NaiveDateTime,
    pub ni: usize,
    pub nj: usize,
    pub values: Vec<f64>,
    pub lats: Vec<f64>,
    pub lons: Vec<f64>,
}

impl TryFrom<GribMessage> for GridMessage {
    type Error = MessageDecodeError;

    fn try_from(message: GribMessage) -> Result<Self, Self::Error> {
        let (lats, lons) = message.grid.coordinates()?.into_iter().unzip();
        Ok(Self {
            parameter_number: message.code.parameter_number() as u32,
            table_version: message.code.table_version().map(u32::from),
            short_name: message.short_name,
            valid_time: message.valid_time.naive_utc(),
            ni: message.grid.ni,
            nj: message.grid.nj,
            values: message.values,
            lats,
            lons,
        })
    }
}

/// Opens grid files with a fixed set of parameter tables.
#[derive(Debug, Clone)]
pub struct GridFileParser {
    tables: GribTables,
}

impl Default for GridFileParser {
    fn default() -> Self {
        Self::new(GribTables::ecmwf())
    }
}

impl GridFileParser {
    pub fn new(tables: GribTables) -> Self {
        Self { tables }
    }

    /// Read `path` and return a lazy sequence of its messages.
    pub fn open<P: AsRef<Path>>(&self, path: P) -> Result<GridMessages, ParseError> {
        let path = path.as_ref();
        let data = std::fs::read(path).map_err(|source| ParseError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        debug!(path = %path.display(), bytes = data.len(), "Opened grid file");

        Ok(GridMessages {
            path: path.to_path_buf(),
            reader: GribReader::new(Bytes::from(data), self.tables.clone()),
        })
    }
}

/// Messages of one grid file, decoded on demand.
pub struct GridMessages {
    path: PathBuf,
    reader: GribReader,
}

impl GridMessages {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Iterator for GridMessages {
    type Item = Result<GridMessage, MessageDecodeError>;

    fn next(&mut self) -> Option<Self::Item> {
        let message = self.reader.next()?;
        Some(message.map_err(MessageDecodeError::from).and_then(GridMessage::try_from))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_utils::{Grib1Builder, Grib2Builder};

    #[test]
    fn test_open_missing_file() {
        let result = GridFileParser::default().open("/nonexistent/ERA5_2024_01.grib");
        assert!(matches!(result, Err(ParseError::Read { .. })));
    }

    #[test]
    fn test_messages_carry_identity_and_coordinates() {
        let dir = tempfile::tempdir().unwrap();
        let mut data = Grib1Builder::new(140, 229)
            .with_grid(41.5, -10.0, 3, 2, 0.25)
            .with_constant_value(1.0)
            .build();
        data.extend(Grib2Builder::new(10, 0, 14).build());
        let path = dir.path().join("mixed.grib");
        std::fs::write(&path, data).unwrap();

        let messages: Vec<_> = GridFileParser::default()
            .open(&path)
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap();

        assert_eq!(messages.len(), 2);
        let first = &messages[0];
        assert_eq!(first.short_name.as_deref(), Some("swh"));
        assert_eq!(first.parameter_number, 229);
        assert_eq!(first.table_version, Some(140));
        assert_eq!((first.ni, first.nj), (3, 2));
        assert_eq!(first.lats.len(), 6);
        assert_eq!(first.lons.len(), 6);

        assert_eq!(messages[1].short_name.as_deref(), Some("mwd"));
        assert_eq!(messages[1].table_version, None);
    }

    #[test]
    fn test_corrupt_message_is_isolated() {
        let dir = tempfile::tempdir().unwrap();
        let mut broken = Grib1Builder::new(140, 229).build();
        let n = broken.len();
        broken[n - 4..].copy_from_slice(b"XXXX");
        broken.extend(Grib1Builder::new(140, 230).build());
        let path = dir.path().join("broken.grib");
        std::fs::write(&path, broken).unwrap();

        let results: Vec<_> = GridFileParser::default().open(&path).unwrap().collect();
        assert!(results[0].is_err());
        assert_eq!(
            results.last().unwrap().as_ref().unwrap().short_name.as_deref(),
            Some("mwd")
        );
    }
}
