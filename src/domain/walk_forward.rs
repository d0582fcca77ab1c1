//! Walk-forward validation over rolling calendar windows.
//!
//! Each window optimises parameters on its train range and re-runs the
//! winner on the following test range. Windows share nothing but the input
//! bars, so they can run in parallel; results are always ordered by
//! `window_id`.

use chrono::{DateTime, Months, Utc};
use log::{info, warn};
use rayon::prelude::*;
use serde::Serialize;
use std::collections::BTreeMap;

use super::backtest::{run_registered, BacktestConfig};
use super::error::BarsimError;
use super::metrics::{Metrics, OBJECTIVE_NAMES, TOTAL_RETURN};
use super::ohlcv::{slice_range, Bar};
use super::optimizer::{select_best, Optimizer};
use super::strategy::{ParamSet, ParamValue, StrategyRegistry};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WfConfig {
    pub train_months: u32,
    pub test_months: u32,
    pub step_months: u32,
    pub optimize_metric: String,
    pub min_trades: usize,
    pub parallel: bool,
}

impl Default for WfConfig {
    fn default() -> Self {
        WfConfig {
            train_months: 6,
            test_months: 2,
            step_months: 2,
            optimize_metric: "sharpe_ratio".into(),
            min_trades: 1,
            parallel: false,
        }
    }
}

impl WfConfig {
    pub fn validate(&self) -> Result<(), BarsimError> {
        let invalid = |key: &str, reason: String| BarsimError::ConfigInvalid {
            section: "walk_forward".into(),
            key: key.into(),
            reason,
        };
        for (key, value) in [
            ("train_months", self.train_months),
            ("test_months", self.test_months),
            ("step_months", self.step_months),
        ] {
            if value == 0 {
                return Err(invalid(key, "must be at least 1".into()));
            }
        }
        if self.step_months < self.test_months {
            return Err(invalid(
                "step_months",
                format!(
                    "step {} is shorter than test {}, test windows would overlap",
                    self.step_months, self.test_months
                ),
            ));
        }
        if !OBJECTIVE_NAMES.contains(&self.optimize_metric.as_str()) {
            return Err(invalid(
                "optimize_metric",
                format!(
                    "'{}' is not one of {}",
                    self.optimize_metric,
                    OBJECTIVE_NAMES.join(", ")
                ),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct WfWindow {
    pub window_id: usize,
    pub train_start: DateTime<Utc>,
    pub train_end: DateTime<Utc>,
    pub test_start: DateTime<Utc>,
    pub test_end: DateTime<Utc>,
    pub best_params: Option<ParamSet>,
    pub train_metrics: Option<Metrics>,
    pub test_metrics: Option<Metrics>,
    /// Why the window was left out of aggregation.
    pub infeasible: Option<String>,
}

impl WfWindow {
    pub fn is_feasible(&self) -> bool {
        self.best_params.is_some() && self.test_metrics.is_some()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct WfResult {
    pub strategy: String,
    pub optimize_metric: String,
    pub windows: Vec<WfWindow>,
    pub robust_params: ParamSet,
    pub robustness_score: f64,
    pub param_stability: BTreeMap<String, f64>,
}

impl WfResult {
    pub fn feasible_windows(&self) -> usize {
        self.windows.iter().filter(|w| w.is_feasible()).count()
    }
}

fn add_months(at: DateTime<Utc>, months: u32) -> Result<DateTime<Utc>, BarsimError> {
    at.checked_add_months(Months::new(months))
        .ok_or_else(|| BarsimError::ConfigInvalid {
            section: "walk_forward".into(),
            key: "end".into(),
            reason: format!("{at} + {months} months is out of range"),
        })
}

/// Rolling windows over `[start, end)`.
///
/// Window `k` trains on `[start + k*step, +train)` and tests on the next
/// `test_months`. Generation stops at the first window whose test range
/// would end after `end`.
pub fn generate_windows(
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    config: &WfConfig,
) -> Result<Vec<WfWindow>, BarsimError> {
    config.validate()?;

    let mut windows = Vec::new();
    for k in 0.. {
        let train_start = add_months(start, k * config.step_months)?;
        let train_end = add_months(train_start, config.train_months)?;
        let test_end = add_months(train_end, config.test_months)?;
        if test_end > end {
            break;
        }
        windows.push(WfWindow {
            window_id: k as usize,
            train_start,
            train_end,
            test_start: train_end,
            test_end,
            best_params: None,
            train_metrics: None,
            test_metrics: None,
            infeasible: None,
        });
    }
    Ok(windows)
}

pub struct WalkForwardValidator<'a> {
    pub config: WfConfig,
    pub backtest: BacktestConfig,
    pub strategy: String,
    pub registry: &'a StrategyRegistry,
    pub optimizer: &'a dyn Optimizer,
}

impl WalkForwardValidator<'_> {
    /// Pick `best_params` on the window's train range.
    ///
    /// A window with no feasible candidate is marked infeasible; that is
    /// not an error.
    pub fn optimize_window(&self, window: &mut WfWindow, bars: &[Bar]) -> Result<(), BarsimError> {
        let train = slice_range(bars, window.train_start, window.train_end);
        let candidates = self
            .optimizer
            .evaluate(train, self.registry, &self.strategy, &self.backtest)?;

        match select_best(&candidates, &self.config.optimize_metric, self.config.min_trades) {
            Some(best) => {
                window.best_params = Some(best.params.clone());
                window.train_metrics = Some(best.metrics.clone());
            }
            None => {
                window.infeasible = Some(format!(
                    "no candidate on {} train bars reached {} trades with a defined {}",
                    train.len(),
                    self.config.min_trades,
                    self.config.optimize_metric
                ));
            }
        }
        Ok(())
    }

    /// Re-run `best_params` on the window's test range.
    pub fn validate_window(&self, window: &mut WfWindow, bars: &[Bar]) -> Result<(), BarsimError> {
        let Some(params) = window.best_params.as_ref() else {
            return Ok(());
        };
        let test = slice_range(bars, window.test_start, window.test_end);
        match run_registered(test, self.registry, &self.strategy, params, &self.backtest) {
            Ok(result) => window.test_metrics = Some(result.metrics),
            Err(err) if err.is_insufficient_data() => {
                window.infeasible = Some(format!("test range too short: {err}"));
            }
            Err(err) => return Err(err),
        }
        Ok(())
    }

    fn process_window(&self, mut window: WfWindow, bars: &[Bar]) -> Result<WfWindow, BarsimError> {
        self.optimize_window(&mut window, bars)?;
        self.validate_window(&mut window, bars)?;
        match (&window.infeasible, &window.test_metrics) {
            (Some(reason), _) => warn!("window {} infeasible: {reason}", window.window_id),
            (None, Some(test)) => info!(
                "window {} [{} .. {}): test {} = {:.4}, {} trades",
                window.window_id,
                window.test_start.date_naive(),
                window.test_end.date_naive(),
                self.config.optimize_metric,
                test.get(&self.config.optimize_metric),
                test.num_trades()
            ),
            (None, None) => {}
        }
        Ok(window)
    }

    /// Generate, optimise and validate every window, then aggregate.
    pub fn run(
        &self,
        bars: &[Bar],
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<WfResult, BarsimError> {
        let windows = generate_windows(start, end, &self.config)?;
        info!(
            "walk-forward {}: {} windows ({}m train / {}m test / {}m step)",
            self.strategy,
            windows.len(),
            self.config.train_months,
            self.config.test_months,
            self.config.step_months
        );

        let windows: Vec<WfWindow> = if self.config.parallel {
            windows
                .into_par_iter()
                .map(|w| self.process_window(w, bars))
                .collect::<Result<_, _>>()?
        } else {
            windows
                .into_iter()
                .map(|w| self.process_window(w, bars))
                .collect::<Result<_, _>>()?
        };

        let robust_params = get_robust_params(&windows);
        let robustness_score = get_robustness_score(&windows, &self.config.optimize_metric);
        let param_stability = param_stability(&windows);

        info!(
            "walk-forward {}: robustness {:.1}, robust params {:?}",
            self.strategy, robustness_score, robust_params
        );

        Ok(WfResult {
            strategy: self.strategy.clone(),
            optimize_metric: self.config.optimize_metric.clone(),
            windows,
            robust_params,
            robustness_score,
            param_stability,
        })
    }
}

/// Per-parameter values across feasible windows, in window order.
fn collect_params(windows: &[WfWindow]) -> BTreeMap<String, Vec<ParamValue>> {
    let mut values: BTreeMap<String, Vec<ParamValue>> = BTreeMap::new();
    for params in windows
        .iter()
        .filter(|w| w.is_feasible())
        .filter_map(|w| w.best_params.as_ref())
    {
        for (name, value) in params {
            values.entry(name.clone()).or_default().push(value.clone());
        }
    }
    values
}

fn numeric(values: &[ParamValue]) -> Option<Vec<f64>> {
    values.iter().map(ParamValue::as_f64).collect()
}

/// Most frequent value; ties go to the value seen first.
fn mode(values: &[ParamValue]) -> Option<(ParamValue, usize)> {
    let mut best: Option<(&ParamValue, usize)> = None;
    for value in values {
        let count = values.iter().filter(|v| *v == value).count();
        if best.is_none_or(|(_, top)| count > top) {
            best = Some((value, count));
        }
    }
    best.map(|(v, c)| (v.clone(), c))
}

/// Central value of each parameter across feasible windows.
///
/// Integers take the lower median so the result stays on the grid, floats
/// the median, choices and booleans the mode.
pub fn get_robust_params(windows: &[WfWindow]) -> ParamSet {
    collect_params(windows)
        .into_iter()
        .filter_map(|(name, values)| {
            let robust = if values.iter().all(|v| matches!(v, ParamValue::Int(_))) {
                let mut ints: Vec<i64> = values
                    .iter()
                    .filter_map(|v| match v {
                        ParamValue::Int(i) => Some(*i),
                        _ => None,
                    })
                    .collect();
                ints.sort_unstable();
                ParamValue::Int(ints[(ints.len() - 1) / 2])
            } else if let Some(mut floats) = numeric(&values) {
                floats.sort_by(f64::total_cmp);
                let n = floats.len();
                let median = if n % 2 == 1 {
                    floats[n / 2]
                } else {
                    (floats[n / 2 - 1] + floats[n / 2]) / 2.0
                };
                ParamValue::Float(median)
            } else {
                mode(&values)?.0
            };
            Some((name, robust))
        })
        .collect()
}

fn mean(values: &[f64]) -> f64 {
    values.iter().sum::<f64>() / values.len() as f64
}

fn std_dev(values: &[f64]) -> f64 {
    let m = mean(values);
    (values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / values.len() as f64).sqrt()
}

/// 0-100 score of out-of-sample consistency across feasible windows.
///
/// - 40 points: share of windows with a positive test `total_return`
/// - 30 points: mean/std of test returns, clamped to [0, 2]
/// - 30 points: mean test objective over mean train objective, clamped to [0, 1]
///
/// A test window without trades counts as a zero return.
pub fn get_robustness_score(windows: &[WfWindow], metric: &str) -> f64 {
    let feasible: Vec<&WfWindow> = windows.iter().filter(|w| w.is_feasible()).collect();
    if feasible.is_empty() {
        return 0.0;
    }

    let returns: Vec<f64> = feasible
        .iter()
        .filter_map(|w| w.test_metrics.as_ref())
        .map(|m| m.get(TOTAL_RETURN))
        .map(|r| if r.is_finite() { r } else { 0.0 })
        .collect();

    let positive = returns.iter().filter(|&&r| r > 0.0).count() as f64;
    let consistency = 40.0 * positive / returns.len() as f64;

    let mean_return = mean(&returns);
    let dispersion = std_dev(&returns);
    let stability = if dispersion > 0.0 {
        30.0 * (mean_return / dispersion).clamp(0.0, 2.0) / 2.0
    } else if mean_return > 0.0 {
        30.0
    } else {
        0.0
    };

    let objective = |metrics: Option<&Metrics>| {
        metrics.map(|m| m.get(metric)).filter(|v| v.is_finite())
    };
    let train: Vec<f64> = feasible
        .iter()
        .filter_map(|w| objective(w.train_metrics.as_ref()))
        .collect();
    let test: Vec<f64> = feasible
        .iter()
        .filter_map(|w| objective(w.test_metrics.as_ref()))
        .collect();
    let efficiency = if train.is_empty() || test.is_empty() {
        0.0
    } else {
        let train_mean = mean(&train);
        if train_mean > 0.0 {
            30.0 * (mean(&test) / train_mean).clamp(0.0, 1.0)
        } else {
            0.0
        }
    };

    consistency + stability + efficiency
}

/// Per-parameter stability in [0, 1] across feasible windows.
///
/// Numeric parameters score `1 / (1 + cv)`; categorical ones the share of
/// windows agreeing with the mode.
pub fn param_stability(windows: &[WfWindow]) -> BTreeMap<String, f64> {
    collect_params(windows)
        .into_iter()
        .filter_map(|(name, values)| {
            let score = match numeric(&values) {
                Some(nums) => {
                    let m = mean(&nums);
                    let sd = std_dev(&nums);
                    if sd == 0.0 {
                        1.0
                    } else if m == 0.0 {
                        0.0
                    } else {
                        1.0 / (1.0 + sd / m.abs())
                    }
                }
                None => {
                    let (_, count) = mode(&values)?;
                    count as f64 / values.len() as f64
                }
            };
            Some((name, score))
        })
        .collect()
}
