//! Performance metrics over an equity curve and trade ledger.
//!
//! Metrics are an ordered name -> value map. A run with no trades reports
//! every metric as NaN, and a run with no losing trades reports
//! `profit_factor` as +inf. Neither is an error.

use serde::Serialize;
use std::collections::BTreeMap;

use super::broker::EquityPoint;
use super::position::Trade;

pub const TOTAL_RETURN: &str = "total_return";
pub const ANNUALIZED_RETURN: &str = "annualized_return";
pub const SHARPE_RATIO: &str = "sharpe_ratio";
pub const SORTINO_RATIO: &str = "sortino_ratio";
pub const MAX_DRAWDOWN: &str = "max_drawdown";
pub const MAX_DRAWDOWN_DURATION: &str = "max_drawdown_duration";
pub const NUM_TRADES: &str = "num_trades";
pub const WIN_RATE: &str = "win_rate";
pub const AVG_TRADE_RETURN: &str = "avg_trade_return";
pub const PROFIT_FACTOR: &str = "profit_factor";
pub const EXPECTANCY: &str = "expectancy";
pub const AVG_WIN: &str = "avg_win";
pub const AVG_LOSS: &str = "avg_loss";
pub const LARGEST_WIN: &str = "largest_win";
pub const LARGEST_LOSS: &str = "largest_loss";
pub const AVG_HOLDING_BARS: &str = "avg_holding_bars";
pub const TOTAL_FEES: &str = "total_fees";

/// Every key a computed [`Metrics`] map contains.
pub const METRIC_NAMES: [&str; 17] = [
    TOTAL_RETURN,
    ANNUALIZED_RETURN,
    SHARPE_RATIO,
    SORTINO_RATIO,
    MAX_DRAWDOWN,
    MAX_DRAWDOWN_DURATION,
    NUM_TRADES,
    WIN_RATE,
    AVG_TRADE_RETURN,
    PROFIT_FACTOR,
    EXPECTANCY,
    AVG_WIN,
    AVG_LOSS,
    LARGEST_WIN,
    LARGEST_LOSS,
    AVG_HOLDING_BARS,
    TOTAL_FEES,
];

/// Metrics that make sense as a maximisation objective.
pub const OBJECTIVE_NAMES: [&str; 9] = [
    TOTAL_RETURN,
    ANNUALIZED_RETURN,
    SHARPE_RATIO,
    SORTINO_RATIO,
    MAX_DRAWDOWN,
    WIN_RATE,
    AVG_TRADE_RETURN,
    PROFIT_FACTOR,
    EXPECTANCY,
];

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MetricsConfig {
    /// Annual risk-free rate used by Sharpe and Sortino.
    pub risk_free_rate: f64,
    /// Bars per year, for annualisation.
    pub periods_per_year: f64,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        MetricsConfig {
            risk_free_rate: 0.0,
            periods_per_year: 252.0,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Metrics(BTreeMap<String, f64>);

impl Metrics {
    pub fn compute(equity_curve: &[EquityPoint], trades: &[Trade], config: &MetricsConfig) -> Self {
        if trades.is_empty() {
            return Metrics::undefined();
        }

        let mut values = BTreeMap::new();
        let mut put = |key: &str, value: f64| {
            values.insert(key.to_string(), value);
        };

        let equity: Vec<f64> = equity_curve.iter().map(|p| p.equity).collect();
        let total_return = match (equity.first(), equity.last()) {
            (Some(&first), Some(&last)) if first != 0.0 => last / first - 1.0,
            _ => f64::NAN,
        };
        put(TOTAL_RETURN, total_return);
        put(
            ANNUALIZED_RETURN,
            annualize(total_return, equity.len(), config.periods_per_year),
        );

        let (max_drawdown, max_drawdown_duration) = compute_drawdown(&equity);
        put(MAX_DRAWDOWN, max_drawdown);
        put(MAX_DRAWDOWN_DURATION, max_drawdown_duration as f64);

        let period_rf = config.risk_free_rate / config.periods_per_year;
        let (sharpe, sortino) = compute_risk_adjusted(&equity, period_rf, config.periods_per_year);
        put(SHARPE_RATIO, sharpe);
        put(SORTINO_RATIO, sortino);

        let n = trades.len() as f64;
        let mut wins = 0usize;
        let mut losses = 0usize;
        let mut gross_win = 0.0_f64;
        let mut gross_loss = 0.0_f64;
        let mut largest_win = 0.0_f64;
        let mut largest_loss = 0.0_f64;

        for trade in trades {
            if trade.pnl > 0.0 {
                wins += 1;
                gross_win += trade.pnl;
                largest_win = largest_win.max(trade.pnl);
            } else if trade.pnl < 0.0 {
                losses += 1;
                gross_loss += trade.pnl.abs();
                largest_loss = largest_loss.max(trade.pnl.abs());
            }
        }

        put(NUM_TRADES, n);
        put(WIN_RATE, wins as f64 / n);
        put(
            AVG_TRADE_RETURN,
            trades.iter().map(|t| t.pnl_pct).sum::<f64>() / n,
        );
        put(
            PROFIT_FACTOR,
            if gross_loss > 0.0 {
                gross_win / gross_loss
            } else {
                f64::INFINITY
            },
        );
        put(EXPECTANCY, trades.iter().map(|t| t.pnl).sum::<f64>() / n);
        put(
            AVG_WIN,
            if wins > 0 { gross_win / wins as f64 } else { 0.0 },
        );
        put(
            AVG_LOSS,
            if losses > 0 {
                gross_loss / losses as f64
            } else {
                0.0
            },
        );
        put(LARGEST_WIN, largest_win);
        put(LARGEST_LOSS, largest_loss);
        put(
            AVG_HOLDING_BARS,
            trades.iter().map(|t| t.holding_bars as f64).sum::<f64>() / n,
        );
        put(TOTAL_FEES, trades.iter().map(|t| t.fee).sum());

        Metrics(values)
    }

    /// Every metric present, every value NaN.
    pub fn undefined() -> Self {
        Metrics(
            METRIC_NAMES
                .iter()
                .map(|k| (k.to_string(), f64::NAN))
                .collect(),
        )
    }

    /// Value for `key`, NaN when absent.
    pub fn get(&self, key: &str) -> f64 {
        self.0.get(key).copied().unwrap_or(f64::NAN)
    }

    /// Number of trades, zero for an undefined map.
    pub fn num_trades(&self) -> usize {
        let n = self.get(NUM_TRADES);
        if n.is_finite() { n as usize } else { 0 }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.0.iter().map(|(k, v)| (k.as_str(), *v))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Bitwise comparison, treating NaN as equal to NaN.
    pub fn bit_eq(&self, other: &Metrics) -> bool {
        self.0.len() == other.0.len()
            && self
                .0
                .iter()
                .zip(other.0.iter())
                .all(|((ka, va), (kb, vb))| ka == kb && va.to_bits() == vb.to_bits())
    }
}

fn annualize(total_return: f64, periods: usize, periods_per_year: f64) -> f64 {
    if !total_return.is_finite() || periods == 0 || periods_per_year <= 0.0 {
        return f64::NAN;
    }
    let years = periods as f64 / periods_per_year;
    let growth = 1.0 + total_return;
    if growth <= 0.0 {
        return -1.0;
    }
    growth.powf(1.0 / years) - 1.0
}

/// Returns (max drawdown as a fraction <= 0, longest run of bars below peak).
fn compute_drawdown(equity: &[f64]) -> (f64, usize) {
    let Some(&first) = equity.first() else {
        return (f64::NAN, 0);
    };

    let mut peak = first;
    let mut max_dd = 0.0_f64;
    let mut duration = 0usize;
    let mut max_duration = 0usize;

    for &value in equity {
        if value >= peak {
            peak = value;
            duration = 0;
            continue;
        }
        duration += 1;
        max_duration = max_duration.max(duration);
        if peak > 0.0 {
            max_dd = max_dd.min((value - peak) / peak);
        }
    }

    (max_dd, max_duration)
}

fn compute_risk_adjusted(equity: &[f64], period_rf: f64, periods_per_year: f64) -> (f64, f64) {
    if equity.len() < 2 {
        return (0.0, 0.0);
    }

    let returns: Vec<f64> = equity
        .windows(2)
        .map(|w| if w[0] > 0.0 { (w[1] - w[0]) / w[0] } else { 0.0 })
        .collect();

    let n = returns.len() as f64;
    let mean = returns.iter().sum::<f64>() / n;
    let variance = returns.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / n;
    let stddev = variance.sqrt();
    let excess = mean - period_rf;
    let scale = periods_per_year.max(0.0).sqrt();

    let sharpe = if stddev > 0.0 {
        excess / stddev * scale
    } else {
        0.0
    };

    let downside_sq: f64 = returns
        .iter()
        .filter(|&&r| r < period_rf)
        .map(|&r| (r - period_rf).powi(2))
        .sum();
    let downside_dev = (downside_sq / n).sqrt();

    let sortino = if downside_dev > 0.0 {
        excess / downside_dev * scale
    } else {
        0.0
    };

    (sharpe, sortino)
}
