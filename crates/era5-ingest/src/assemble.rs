//! Merging per-file records into one time-ordered table and persisting it.
//!
//! Sources are visited in priority order. For each (timestamp, variable) the
//! first present value wins and any later, different value is counted as a
//! conflict. With sources keyed by path the result does not depend on the
//! order in which files finished extracting.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use chrono::NaiveDateTime;
use tracing::{debug, info, instrument};

use crate::error::AssembleError;
use crate::extract::ExtractionRecord;

/// Timestamp column format.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Name of the first CSV column.
pub const TIMESTAMP_COLUMN: &str = "timestamp";

/// How [`persist`] treats an existing output file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WriteMode {
    /// Replace the file with the new table.
    #[default]
    Rebuild,
    /// Merge with the file's rows; existing values take precedence.
    Append,
}

/// One output row. `values` follows the table's key order.
#[derive(Debug, Clone, PartialEq)]
pub struct OutputRow {
    pub timestamp: NaiveDateTime,
    pub values: Vec<Option<f64>>,
}

/// Time series at the target point, strictly ascending by timestamp.
#[derive(Debug, Clone, PartialEq)]
pub struct OutputTable {
    keys: Vec<String>,
    rows: Vec<OutputRow>,
}

impl OutputTable {
    pub fn empty(keys: Vec<String>) -> Self {
        Self {
            keys,
            rows: Vec::new(),
        }
    }

    pub fn keys(&self) -> &[String] {
        &self.keys
    }

    pub fn rows(&self) -> &[OutputRow] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn timestamps(&self) -> Vec<NaiveDateTime> {
        self.rows.iter().map(|r| r.timestamp).collect()
    }

    /// Value of `key` at `timestamp`, if present.
    pub fn value(&self, timestamp: NaiveDateTime, key: &str) -> Option<f64> {
        let column = self.keys.iter().position(|k| k == key)?;
        let row = self
            .rows
            .binary_search_by(|r| r.timestamp.cmp(&timestamp))
            .ok()?;
        self.rows[row].values[column]
    }

    /// Rows as records, dropping absent values.
    pub fn to_records(&self) -> Vec<ExtractionRecord> {
        self.rows
            .iter()
            .map(|row| ExtractionRecord {
                timestamp: row.timestamp,
                values: self
                    .keys
                    .iter()
                    .zip(&row.values)
                    .filter_map(|(k, v)| v.map(|v| (k.clone(), v)))
                    .collect(),
            })
            .collect()
    }
}

/// Bookkeeping from a merge.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AssemblyReport {
    /// Sources merged, in priority order
    pub sources: usize,
    /// Records read across all sources
    pub records: usize,
    /// Rows in the resulting table
    pub rows: usize,
    /// Present values overridden by a higher-priority source
    pub conflicts: usize,
    /// Values whose variable is not a table column
    pub unknown_values: usize,
}

struct Merger {
    keys: Vec<String>,
    columns: HashMap<String, usize>,
    cells: BTreeMap<NaiveDateTime, Vec<Option<f64>>>,
    report: AssemblyReport,
}

impl Merger {
    fn new(keys: Vec<String>) -> Self {
        let columns = keys
            .iter()
            .enumerate()
            .map(|(i, k)| (k.clone(), i))
            .collect();
        Self {
            keys,
            columns,
            cells: BTreeMap::new(),
            report: AssemblyReport::default(),
        }
    }

    fn add(&mut self, source: &str, records: &[ExtractionRecord]) {
        self.report.sources += 1;
        self.report.records += records.len();
        let width = self.keys.len();

        for record in records {
            let row = self
                .cells
                .entry(record.timestamp)
                .or_insert_with(|| vec![None; width]);

            for (key, &value) in &record.values {
                let Some(&column) = self.columns.get(key) else {
                    self.report.unknown_values += 1;
                    continue;
                };
                match row[column] {
                    None => row[column] = Some(value),
                    Some(kept) if kept != value => {
                        self.report.conflicts += 1;
                        debug!(
                            source,
                            timestamp = %record.timestamp,
                            variable = %key,
                            kept,
                            discarded = value,
                            "Conflicting value, keeping first"
                        );
                    }
                    Some(_) => {}
                }
            }
        }
    }

    fn finish(mut self) -> (OutputTable, AssemblyReport) {
        let rows: Vec<OutputRow> = self
            .cells
            .into_iter()
            .map(|(timestamp, values)| OutputRow { timestamp, values })
            .collect();
        self.report.rows = rows.len();
        (
            OutputTable {
                keys: self.keys,
                rows,
            },
            self.report,
        )
    }
}

/// Merge per-file records into a table with columns `keys`.
///
/// Files are visited in ascending path order.
#[instrument(skip_all, fields(files = records_by_file.len()))]
pub fn assemble(
    records_by_file: &BTreeMap<PathBuf, Vec<ExtractionRecord>>,
    keys: &[String],
) -> (OutputTable, AssemblyReport) {
    let mut merger = Merger::new(keys.to_vec());
    for (path, records) in records_by_file {
        merger.add(&path.display().to_string(), records);
    }
    let (table, report) = merger.finish();
    info!(
        rows = report.rows,
        records = report.records,
        conflicts = report.conflicts,
        "Assembled output table"
    );
    (table, report)
}

/// Write `table` to `path`, creating parent directories.
///
/// In [`WriteMode::Append`] an existing file is merged first and its values
/// win. The returned report describes that merge.
#[instrument(skip(table, path), fields(path = %path.display(), rows = table.len()))]
pub fn persist(
    table: &OutputTable,
    path: &Path,
    mode: WriteMode,
) -> Result<AssemblyReport, AssembleError> {
    let (table, report) = match mode {
        WriteMode::Append if path.exists() => {
            let existing = read_csv(path)?;
            info!(existing_rows = existing.len(), "Appending to existing output");

            let mut keys = table.keys.clone();
            for key in existing.keys() {
                if !keys.contains(key) {
                    keys.push(key.clone());
                }
            }

            let mut merger = Merger::new(keys);
            merger.add(&path.display().to_string(), &existing.to_records());
            merger.add("new", &table.to_records());
            let (merged, report) = merger.finish();
            (std::borrow::Cow::Owned(merged), report)
        }
        _ => {
            let report = AssemblyReport {
                sources: 1,
                records: table.len(),
                rows: table.len(),
                ..Default::default()
            };
            (std::borrow::Cow::Borrowed(table), report)
        }
    };

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|source| AssembleError::Io {
            path: parent.to_path_buf(),
            source,
        })?;
    }

    let mut temp_name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    temp_name.push(".tmp");
    let temp_path = path.with_file_name(temp_name);

    write_csv(&table, &temp_path)?;
    std::fs::rename(&temp_path, path).map_err(|source| AssembleError::Io {
        path: path.to_path_buf(),
        source,
    })?;

    info!(rows = table.len(), mode = ?mode, "Wrote output table");
    Ok(report)
}

/// Write `table` as CSV to `path`.
pub fn write_csv(table: &OutputTable, path: &Path) -> Result<(), AssembleError> {
    let mut writer = csv::Writer::from_path(path)?;

    let mut header = Vec::with_capacity(table.keys.len() + 1);
    header.push(TIMESTAMP_COLUMN);
    header.extend(table.keys.iter().map(String::as_str));
    writer.write_record(&header)?;

    for row in &table.rows {
        let mut record = Vec::with_capacity(row.values.len() + 1);
        record.push(row.timestamp.format(TIMESTAMP_FORMAT).to_string());
        record.extend(
            row.values
                .iter()
                .map(|v| v.map(|v| v.to_string()).unwrap_or_default()),
        );
        writer.write_record(&record)?;
    }

    writer.flush().map_err(|source| AssembleError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(())
}

/// Read a table previously written by [`write_csv`].
pub fn read_csv(path: &Path) -> Result<OutputTable, AssembleError> {
    let mut reader = csv::Reader::from_path(path)?;

    let headers = reader.headers()?.clone();
    match headers.get(0) {
        Some(TIMESTAMP_COLUMN) => {}
        other => {
            return Err(AssembleError::InvalidRow(format!(
                "expected '{}' as first column, found {:?}",
                TIMESTAMP_COLUMN, other
            )))
        }
    }
    let keys: Vec<String> = headers.iter().skip(1).map(str::to_string).collect();

    let mut rows: BTreeMap<NaiveDateTime, Vec<Option<f64>>> = BTreeMap::new();
    for (line, record) in reader.records().enumerate() {
        let record = record?;
        let raw_ts = record.get(0).unwrap_or_default();
        let timestamp = NaiveDateTime::parse_from_str(raw_ts, TIMESTAMP_FORMAT).map_err(|e| {
            AssembleError::InvalidRow(format!("row {}: bad timestamp '{}': {}", line + 1, raw_ts, e))
        })?;

        let mut values = Vec::with_capacity(keys.len());
        for (i, key) in keys.iter().enumerate() {
            let field = record.get(i + 1).unwrap_or_default().trim();
            if field.is_empty() {
                values.push(None);
                continue;
            }
            let value = field.parse::<f64>().map_err(|e| {
                AssembleError::InvalidRow(format!(
                    "row {}: bad value '{}' for {}: {}",
                    line + 1,
                    field,
                    key,
                    e
                ))
            })?;
            values.push(Some(value));
        }
        rows.entry(timestamp).or_insert(values);
    }

    Ok(OutputTable {
        keys,
        rows: rows
            .into_iter()
            .map(|(timestamp, values)| OutputRow { timestamp, values })
            .collect(),
    })
}
