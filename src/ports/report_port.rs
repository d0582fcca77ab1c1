//! Report generation port trait.

use std::path::Path;

use crate::domain::backtest::BacktestResult;
use crate::domain::error::BarsimError;
use crate::domain::walk_forward::WfResult;

/// Port for writing run artifacts into an output directory.
pub trait ReportPort {
    fn write_backtest(&self, result: &BacktestResult, output_dir: &Path) -> Result<(), BarsimError>;

    fn write_walk_forward(&self, result: &WfResult, output_dir: &Path) -> Result<(), BarsimError>;
}
