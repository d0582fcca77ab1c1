#![allow(dead_code)]

use barsim::domain::backtest::BacktestConfig;
use barsim::domain::error::BarsimError;
pub use barsim::domain::ohlcv::Bar;
use barsim::domain::strategy::{Signal, Strategy};
use barsim::ports::data_port::DataPort;
use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};
use std::collections::HashMap;

pub fn day(n: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + Duration::days(n)
}

pub fn date(y: i32, m: u32, d: u32) -> DateTime<Utc> {
    NaiveDate::from_ymd_opt(y, m, d)
        .unwrap()
        .and_hms_opt(0, 0, 0)
        .unwrap()
        .and_utc()
}

pub fn make_bar(timestamp: DateTime<Utc>, open: f64, high: f64, low: f64, close: f64) -> Bar {
    Bar {
        timestamp,
        open,
        high,
        low,
        close,
        volume: 1_000.0,
    }
}

/// Flat bars (open = high = low = close), one per day from 2024-01-01.
pub fn bars_from_closes(closes: &[f64]) -> Vec<Bar> {
    closes
        .iter()
        .enumerate()
        .map(|(i, &c)| make_bar(day(i as i64), c, c, c, c))
        .collect()
}

/// Deterministic wavy daily series starting at `start`.
pub fn generate_bars(start: DateTime<Utc>, days: usize) -> Vec<Bar> {
    (0..days)
        .map(|i| {
            let x = i as f64;
            let close = 100.0 + 12.0 * (x / 9.0).sin() + 4.0 * (x / 3.0).cos() + x * 0.02;
            let open = close - 0.5 * (x / 5.0).sin();
            make_bar(
                start + Duration::days(i as i64),
                open,
                open.max(close) + 1.0,
                open.min(close) - 1.0,
                close,
            )
        })
        .collect()
}

pub fn zero_fee_config(initial_cash: f64) -> BacktestConfig {
    BacktestConfig {
        initial_cash,
        ..BacktestConfig::default()
    }
}

/// Emits pre-set signals by bar index, `Hold` otherwise.
pub struct ScriptedStrategy {
    pub signals: HashMap<usize, Signal>,
    pub lookback: usize,
}

impl ScriptedStrategy {
    pub fn new(signals: &[(usize, Signal)]) -> Self {
        Self {
            signals: signals.iter().copied().collect(),
            lookback: 1,
        }
    }
}

impl Strategy for ScriptedStrategy {
    fn name(&self) -> &str {
        "scripted"
    }

    fn lookback(&self) -> usize {
        self.lookback
    }

    fn signal(&self, history: &[Bar]) -> Signal {
        self.signals
            .get(&(history.len() - 1))
            .copied()
            .unwrap_or(Signal::Hold)
    }
}

/// In-memory bar source honouring the half-open range.
pub struct MockDataPort {
    pub bars: Vec<Bar>,
}

impl DataPort for MockDataPort {
    fn fetch_bars(
        &self,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> Result<Vec<Bar>, BarsimError> {
        Ok(self
            .bars
            .iter()
            .filter(|b| start.is_none_or(|s| b.timestamp >= s))
            .filter(|b| end.is_none_or(|e| b.timestamp < e))
            .cloned()
            .collect())
    }
}

/// Write `bars` as a CSV file the `CsvAdapter` can read.
pub fn bars_to_csv(bars: &[Bar]) -> String {
    let mut out = String::from("timestamp,open,high,low,close,volume\n");
    for b in bars {
        out.push_str(&format!(
            "{},{},{},{},{},{}\n",
            b.timestamp.format("%Y-%m-%d"),
            b.open,
            b.high,
            b.low,
            b.close,
            b.volume
        ));
    }
    out
}
