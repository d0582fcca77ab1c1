//! OHLCV bar representation and input checks.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::error::BarsimError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub timestamp: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

/// Reject a series the engine cannot simulate.
///
/// Checks length against `minimum`, strictly increasing timestamps, finite
/// prices and `low <= high`. Gap detection and cleaning belong upstream.
pub fn validate_bars(bars: &[Bar], minimum: usize) -> Result<(), BarsimError> {
    let minimum = minimum.max(1);
    if bars.len() < minimum {
        return Err(BarsimError::InsufficientData {
            bars: bars.len(),
            minimum,
        });
    }

    for (index, bar) in bars.iter().enumerate() {
        let prices = [bar.open, bar.high, bar.low, bar.close];
        if prices.iter().any(|p| !p.is_finite() || *p <= 0.0) {
            return Err(BarsimError::MalformedData {
                index,
                reason: "prices must be finite and positive".into(),
            });
        }
        if !bar.volume.is_finite() {
            return Err(BarsimError::MalformedData {
                index,
                reason: "volume must be finite".into(),
            });
        }
        if bar.low > bar.high {
            return Err(BarsimError::MalformedData {
                index,
                reason: format!("low {} above high {}", bar.low, bar.high),
            });
        }
        if index > 0 && bar.timestamp <= bars[index - 1].timestamp {
            return Err(BarsimError::MalformedData {
                index,
                reason: "timestamps must be strictly increasing".into(),
            });
        }
    }

    Ok(())
}

/// Bars with `start <= timestamp < end`.
pub fn slice_range(bars: &[Bar], start: DateTime<Utc>, end: DateTime<Utc>) -> &[Bar] {
    let lo = bars.partition_point(|b| b.timestamp < start);
    let hi = bars.partition_point(|b| b.timestamp < end);
    &bars[lo..hi.max(lo)]
}
