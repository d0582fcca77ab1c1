//! CSV bar file adapter.
//!
//! Expects a header row naming `timestamp,open,high,low,close,volume` (any
//! column order). Timestamps may be RFC 3339, `YYYY-MM-DD HH:MM:SS` or
//! `YYYY-MM-DD`; naive values are taken as UTC.

use crate::domain::error::BarsimError;
use crate::domain::ohlcv::Bar;
use crate::ports::data_port::DataPort;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use std::fs;
use std::path::PathBuf;

const COLUMNS: [&str; 6] = ["timestamp", "open", "high", "low", "close", "volume"];

pub struct CsvAdapter {
    path: PathBuf,
}

impl CsvAdapter {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }
}

pub fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(value) {
        return Some(ts.with_timezone(&Utc));
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S") {
        return Some(naive.and_utc());
    }
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

fn data_error(reason: String) -> BarsimError {
    BarsimError::Data { reason }
}

impl DataPort for CsvAdapter {
    fn fetch_bars(
        &self,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> Result<Vec<Bar>, BarsimError> {
        let content = fs::read_to_string(&self.path).map_err(|e| {
            data_error(format!("failed to read {}: {}", self.path.display(), e))
        })?;

        let mut rdr = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .from_reader(content.as_bytes());

        let headers = rdr
            .headers()
            .map_err(|e| data_error(format!("CSV header error: {}", e)))?
            .clone();
        let mut index = [0usize; 6];
        for (slot, column) in index.iter_mut().zip(COLUMNS) {
            *slot = headers
                .iter()
                .position(|h| h.eq_ignore_ascii_case(column))
                .ok_or_else(|| data_error(format!("missing {} column", column)))?;
        }

        let mut bars = Vec::new();
        for (row, result) in rdr.records().enumerate() {
            let record = result.map_err(|e| data_error(format!("CSV parse error: {}", e)))?;
            let field = |i: usize| record.get(index[i]).unwrap_or("");

            let timestamp = parse_timestamp(field(0)).ok_or_else(|| {
                data_error(format!("row {}: invalid timestamp '{}'", row + 1, field(0)))
            })?;
            if start.is_some_and(|s| timestamp < s) || end.is_some_and(|e| timestamp >= e) {
                continue;
            }

            let mut values = [0.0f64; 5];
            for (i, value) in values.iter_mut().enumerate() {
                let raw = field(i + 1);
                *value = raw.parse().map_err(|e| {
                    data_error(format!(
                        "row {}: invalid {} value '{}': {}",
                        row + 1,
                        COLUMNS[i + 1],
                        raw,
                        e
                    ))
                })?;
            }
            let [open, high, low, close, volume] = values;

            bars.push(Bar {
                timestamp,
                open,
                high,
                low,
                close,
                volume,
            });
        }

        Ok(bars)
    }
}
