//! Loading bearing records from comma-delimited logs.
//!
//! Each record has six cells: a `dd/mm/yyyy HH:MM:SS` UTC timestamp first and
//! the bearing in degrees fourth. The first line is a header.

use std::fs::File;
use std::io::Read;
use std::path::Path;

use chrono::{DateTime, NaiveDateTime};

use crate::{Series, SliceError};

const RECORD_CELLS: usize = 6;
const TIME_CELL: usize = 0;
const BEARING_CELL: usize = 3;
const TIMESTAMP_FORMAT: &str = "%d/%m/%Y %H:%M:%S";

/// Epoch milliseconds of a `dd/mm/yyyy HH:MM:SS` UTC timestamp.
pub fn parse_timestamp(text: &str) -> Result<i64, SliceError> {
    NaiveDateTime::parse_from_str(text.trim(), TIMESTAMP_FORMAT)
        .map(|dt| dt.and_utc().timestamp_millis())
        .map_err(|e| SliceError::Ingest(format!("bad timestamp {text:?}: {e}")))
}

/// RFC 3339 rendering of epoch milliseconds, if representable.
pub fn format_timestamp(ms: i64) -> Option<String> {
    DateTime::from_timestamp_millis(ms).map(|dt| dt.to_rfc3339())
}

pub fn load_records<R: Read>(reader: R) -> Result<Series, SliceError> {
    let mut csv_reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(reader);

    let mut times = Vec::new();
    let mut bearings = Vec::new();
    for (row, record) in csv_reader.records().enumerate() {
        let record = record.map_err(|e| SliceError::Ingest(e.to_string()))?;
        // Line numbers count the header.
        let line = row + 2;
        if record.iter().all(|cell| cell.is_empty()) {
            continue;
        }
        if record.len() != RECORD_CELLS {
            return Err(SliceError::Ingest(format!(
                "line {line}: expected {RECORD_CELLS} cells, found {}",
                record.len()
            )));
        }
        let time = parse_timestamp(&record[TIME_CELL])
            .map_err(|e| SliceError::Ingest(format!("line {line}: {e}")))?;
        let bearing: f64 = record[BEARING_CELL].parse().map_err(|_| {
            SliceError::Ingest(format!(
                "line {line}: bad bearing {:?}",
                &record[BEARING_CELL]
            ))
        })?;
        times.push(time);
        bearings.push(bearing);
    }

    Series::new(times, bearings)
}

pub fn load_path(path: &Path) -> Result<Series, SliceError> {
    let file = File::open(path)
        .map_err(|e| SliceError::Ingest(format!("{}: {e}", path.display())))?;
    load_records(file)
}
