//! Backtest engine and bar loop.
//!
//! For each bar, in order: stop/target check on the open position, then
//! (only if nothing triggered) the strategy signal, then the equity mark.
//! A position entered on a bar's close is first stop-checked on the next
//! bar, so every trade holds for at least one bar.

use log::{debug, info};
use serde::Serialize;

use super::broker::{BrokerConfig, EquityPoint, SimulatedBroker};
use super::error::BarsimError;
use super::metrics::{Metrics, MetricsConfig};
use super::ohlcv::{validate_bars, Bar};
use super::position::{ExitReason, PositionState, Side, Trade};
use super::sizer::PositionSizer;
use super::strategy::{Direction, ParamSet, Signal, Strategy, StrategyRegistry};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BacktestConfig {
    pub initial_cash: f64,
    pub fee_rate: f64,
    pub stop_loss_pct: Option<f64>,
    pub take_profit_pct: Option<f64>,
    pub sizer: PositionSizer,
    /// Multiplier on the sized quantity. 1.0 means no leverage.
    pub leverage: f64,
    pub allow_short: bool,
    pub risk_free_rate: f64,
    pub periods_per_year: f64,
}

impl Default for BacktestConfig {
    fn default() -> Self {
        BacktestConfig {
            initial_cash: 10_000.0,
            fee_rate: 0.0,
            stop_loss_pct: None,
            take_profit_pct: None,
            sizer: PositionSizer::AllIn,
            leverage: 1.0,
            allow_short: false,
            risk_free_rate: 0.0,
            periods_per_year: 252.0,
        }
    }
}

impl BacktestConfig {
    pub fn broker_config(&self) -> BrokerConfig {
        BrokerConfig {
            initial_cash: self.initial_cash,
            fee_rate: self.fee_rate,
            stop_loss_pct: self.stop_loss_pct,
            take_profit_pct: self.take_profit_pct,
            allow_short: self.allow_short,
        }
    }

    pub fn metrics_config(&self) -> MetricsConfig {
        MetricsConfig {
            risk_free_rate: self.risk_free_rate,
            periods_per_year: self.periods_per_year,
        }
    }

    /// Quantity to enter at `price` with `equity` available.
    ///
    /// The sizer's answer is scaled by leverage and capped so that notional
    /// plus entry fee never exceeds `equity * leverage`.
    pub fn entry_quantity(&self, equity: f64, price: f64) -> f64 {
        let sized = self.sizer.size(equity, price) * self.leverage;
        let cap = equity * self.leverage / (price * (1.0 + self.fee_rate));
        let quantity = sized.min(cap);
        if quantity.is_finite() { quantity } else { 0.0 }
    }
}

/// Tabular view of a trade ledger.
#[derive(Debug, Clone, PartialEq)]
pub struct TradeLog {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

pub const TRADE_LOG_HEADERS: [&str; 15] = [
    "entry_time",
    "exit_time",
    "side",
    "entry_price",
    "exit_price",
    "size",
    "fee",
    "pnl",
    "pnl_pct",
    "entry_reason",
    "exit_reason",
    "holding_bars",
    "mae",
    "mfe",
    "equity_after",
];

impl TradeLog {
    pub fn from_trades(trades: &[Trade]) -> Self {
        let rows = trades
            .iter()
            .map(|t| {
                vec![
                    t.entry_time.to_rfc3339(),
                    t.exit_time.to_rfc3339(),
                    t.side.to_string(),
                    t.entry_price.to_string(),
                    t.exit_price.to_string(),
                    t.size.to_string(),
                    t.fee.to_string(),
                    t.pnl.to_string(),
                    t.pnl_pct.to_string(),
                    t.entry_reason.clone(),
                    t.exit_reason.to_string(),
                    t.holding_bars.to_string(),
                    t.mae.to_string(),
                    t.mfe.to_string(),
                    t.equity_after.to_string(),
                ]
            })
            .collect();
        TradeLog {
            headers: TRADE_LOG_HEADERS.iter().map(|h| h.to_string()).collect(),
            rows,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct BacktestResult {
    pub equity_curve: Vec<EquityPoint>,
    pub trades: Vec<Trade>,
    pub metrics: Metrics,
    /// Position still open after the last bar. It is marked to market in
    /// the equity curve but never closed.
    pub open_position: Option<PositionState>,
}

impl BacktestResult {
    pub fn trade_log(&self) -> TradeLog {
        TradeLog::from_trades(&self.trades)
    }

    pub fn final_equity(&self) -> Option<f64> {
        self.equity_curve.last().map(|p| p.equity)
    }
}

/// Simulate `strategy` over `bars`.
///
/// Fails before simulating if the series is shorter than the strategy's
/// lookback or malformed. A broker contract violation aborts the run.
pub fn run_backtest(
    bars: &[Bar],
    strategy: &dyn Strategy,
    config: &BacktestConfig,
) -> Result<BacktestResult, BarsimError> {
    let lookback = strategy.lookback().max(1);
    validate_bars(bars, lookback)?;

    let mut broker = SimulatedBroker::new(config.broker_config());

    for (i, bar) in bars.iter().enumerate() {
        let mut stopped = false;
        if !broker.is_flat() {
            let trigger = broker.check_stops(bar);
            broker.track_excursion(bar, trigger);
            if let Some(trigger) = trigger {
                let trade = broker.exit(trigger.price, bar.timestamp, trigger.reason)?;
                debug!(
                    "bar {i}: {} {} exit at {:.4}, pnl {:.4}",
                    trade.side, trade.exit_reason, trade.exit_price, trade.pnl
                );
                stopped = true;
            }
        }

        if !stopped && i + 1 >= lookback {
            let signal = strategy.signal(&bars[..=i]);
            apply_signal(&mut broker, strategy, config, signal, bar, i)?;
        }

        broker.update_equity(bar.close, bar.timestamp);
    }

    let (equity_curve, trades, open_position) = broker.into_parts();
    let metrics = Metrics::compute(&equity_curve, &trades, &config.metrics_config());

    info!(
        "{}: {} bars, {} trades, final equity {:.2}",
        strategy.name(),
        bars.len(),
        trades.len(),
        equity_curve.last().map(|p| p.equity).unwrap_or(config.initial_cash)
    );

    Ok(BacktestResult {
        equity_curve,
        trades,
        metrics,
        open_position,
    })
}

/// Build `name` from the registry with `params` and run it.
pub fn run_registered(
    bars: &[Bar],
    registry: &StrategyRegistry,
    name: &str,
    params: &ParamSet,
    config: &BacktestConfig,
) -> Result<BacktestResult, BarsimError> {
    let strategy = registry.create(name, params)?;
    run_backtest(bars, strategy.as_ref(), config)
}

/// What the signal asks the book to look like after this bar.
enum Intent {
    Keep,
    Close(Side),
    Flatten,
    Hold(Side),
}

fn intent_for(signal: Signal) -> Intent {
    match signal {
        Signal::Hold => Intent::Keep,
        Signal::EnterLong | Signal::Target(Direction::Long) => Intent::Hold(Side::Long),
        Signal::EnterShort | Signal::Target(Direction::Short) => Intent::Hold(Side::Short),
        Signal::ExitLong => Intent::Close(Side::Long),
        Signal::ExitShort => Intent::Close(Side::Short),
        Signal::Target(Direction::Flat) => Intent::Flatten,
    }
}

fn apply_signal(
    broker: &mut SimulatedBroker,
    strategy: &dyn Strategy,
    config: &BacktestConfig,
    signal: Signal,
    bar: &Bar,
    index: usize,
) -> Result<(), BarsimError> {
    let held = broker.side();
    match intent_for(signal) {
        Intent::Keep => {}
        Intent::Close(side) => {
            if held == Some(side) {
                strategy_exit(broker, bar, index)?;
            }
        }
        Intent::Flatten => {
            if held.is_some() {
                strategy_exit(broker, bar, index)?;
            }
        }
        Intent::Hold(side) => {
            if held == Some(side) {
                return Ok(());
            }
            if held.is_some() {
                strategy_exit(broker, bar, index)?;
            }
            if side == Side::Short && !config.allow_short {
                return Ok(());
            }

            let equity = broker.equity_at(bar.close);
            let quantity = config.entry_quantity(equity, bar.close);
            if quantity <= 0.0 {
                debug!("bar {index}: sizing returned {quantity}, entry skipped");
                return Ok(());
            }
            broker.enter(
                side,
                quantity,
                bar.close,
                bar.timestamp,
                &strategy.entry_tag(signal),
            )?;
            debug!("bar {index}: enter {side} {quantity:.6} at {:.4}", bar.close);
        }
    }
    Ok(())
}

fn strategy_exit(broker: &mut SimulatedBroker, bar: &Bar, index: usize) -> Result<(), BarsimError> {
    let trade = broker.exit(bar.close, bar.timestamp, ExitReason::StrategyExit)?;
    debug!(
        "bar {index}: {} strategy exit at {:.4}, pnl {:.4}",
        trade.side, trade.exit_price, trade.pnl
    );
    Ok(())
}
