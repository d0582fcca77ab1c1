//! CSV/JSON report adapter.
//!
//! A backtest writes `trades.csv`, `equity.csv` and `metrics.csv`; a
//! walk-forward run writes `walk_forward.json` plus a per-window
//! `windows.csv` summary. NaN and infinite metrics are written as `NaN` /
//! `inf` in CSV and `null` in JSON.

use std::fs::{self, File};
use std::io::{self, BufWriter};
use std::path::Path;

use crate::domain::backtest::BacktestResult;
use crate::domain::error::BarsimError;
use crate::domain::metrics::TOTAL_RETURN;
use crate::domain::walk_forward::WfResult;
use crate::ports::report_port::ReportPort;

pub const TRADES_FILE: &str = "trades.csv";
pub const EQUITY_FILE: &str = "equity.csv";
pub const METRICS_FILE: &str = "metrics.csv";
pub const WALK_FORWARD_FILE: &str = "walk_forward.json";
pub const WINDOWS_FILE: &str = "windows.csv";

#[derive(Debug, Default)]
pub struct CsvReportAdapter;

fn csv_writer(path: &Path) -> Result<csv::Writer<File>, BarsimError> {
    csv::Writer::from_path(path).map_err(|e| BarsimError::Io(io::Error::from(e)))
}

fn write_record<I, T>(writer: &mut csv::Writer<File>, record: I) -> Result<(), BarsimError>
where
    I: IntoIterator<Item = T>,
    T: AsRef<[u8]>,
{
    writer
        .write_record(record)
        .map_err(|e| BarsimError::Io(io::Error::from(e)))
}

impl ReportPort for CsvReportAdapter {
    fn write_backtest(&self, result: &BacktestResult, output_dir: &Path) -> Result<(), BarsimError> {
        fs::create_dir_all(output_dir)?;

        let log = result.trade_log();
        let mut trades = csv_writer(&output_dir.join(TRADES_FILE))?;
        write_record(&mut trades, &log.headers)?;
        for row in &log.rows {
            write_record(&mut trades, row)?;
        }
        trades.flush()?;

        let mut equity = csv_writer(&output_dir.join(EQUITY_FILE))?;
        write_record(&mut equity, ["timestamp", "equity"])?;
        for point in &result.equity_curve {
            write_record(
                &mut equity,
                [point.timestamp.to_rfc3339(), point.equity.to_string()],
            )?;
        }
        equity.flush()?;

        let mut metrics = csv_writer(&output_dir.join(METRICS_FILE))?;
        write_record(&mut metrics, ["metric", "value"])?;
        for (name, value) in result.metrics.iter() {
            write_record(&mut metrics, [name.to_string(), value.to_string()])?;
        }
        metrics.flush()?;

        Ok(())
    }

    fn write_walk_forward(&self, result: &WfResult, output_dir: &Path) -> Result<(), BarsimError> {
        fs::create_dir_all(output_dir)?;

        let file = File::create(output_dir.join(WALK_FORWARD_FILE))?;
        serde_json::to_writer_pretty(BufWriter::new(file), result).map_err(io::Error::from)?;

        let metric = &result.optimize_metric;
        let mut windows = csv_writer(&output_dir.join(WINDOWS_FILE))?;
        write_record(
            &mut windows,
            [
                "window_id".to_string(),
                "train_start".to_string(),
                "train_end".to_string(),
                "test_start".to_string(),
                "test_end".to_string(),
                format!("train_{metric}"),
                format!("test_{metric}"),
                "test_total_return".to_string(),
                "best_params".to_string(),
                "infeasible".to_string(),
            ],
        )?;
        for w in &result.windows {
            let train = w.train_metrics.as_ref().map(|m| m.get(metric));
            let test = w.test_metrics.as_ref().map(|m| m.get(metric));
            let test_return = w.test_metrics.as_ref().map(|m| m.get(TOTAL_RETURN));
            let params = w
                .best_params
                .as_ref()
                .map(|p| {
                    p.iter()
                        .map(|(k, v)| format!("{k}={v}"))
                        .collect::<Vec<_>>()
                        .join(";")
                })
                .unwrap_or_default();
            let cell = |v: Option<f64>| v.map(|x| x.to_string()).unwrap_or_default();
            write_record(
                &mut windows,
                [
                    w.window_id.to_string(),
                    w.train_start.to_rfc3339(),
                    w.train_end.to_rfc3339(),
                    w.test_start.to_rfc3339(),
                    w.test_end.to_rfc3339(),
                    cell(train),
                    cell(test),
                    cell(test_return),
                    params,
                    w.infeasible.clone().unwrap_or_default(),
                ],
            )?;
        }
        windows.flush()?;

        Ok(())
    }
}
