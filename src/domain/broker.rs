//! Simulated broker: cash, a single position, fees and stop triggers.
//!
//! Implements fills at caller-supplied prices, proportional fees,
//! stop-loss/take-profit/liquidation checks against intrabar extremes and
//! the equity history. Invalid calls are contract errors, never ignored.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::error::StateContractError;
use super::ohlcv::Bar;
use super::position::{ExitReason, PositionState, Side, Trade};

/// Broker parameters. Percentages are fractions (0.02 = 2%).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BrokerConfig {
    pub initial_cash: f64,
    pub fee_rate: f64,
    pub stop_loss_pct: Option<f64>,
    pub take_profit_pct: Option<f64>,
    pub allow_short: bool,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        BrokerConfig {
            initial_cash: 10_000.0,
            fee_rate: 0.0,
            stop_loss_pct: None,
            take_profit_pct: None,
            allow_short: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EquityPoint {
    pub timestamp: DateTime<Utc>,
    pub equity: f64,
}

/// An intrabar exit decided by [`SimulatedBroker::check_stops`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StopTrigger {
    pub reason: ExitReason,
    pub price: f64,
}

/// Fee charged on a fill: `price * quantity * fee_rate`.
pub fn calculate_fee(price: f64, quantity: f64, fee_rate: f64) -> f64 {
    price * quantity * fee_rate
}

#[derive(Debug, Clone)]
pub struct SimulatedBroker {
    config: BrokerConfig,
    cash: f64,
    position: Option<PositionState>,
    equity_curve: Vec<EquityPoint>,
    trades: Vec<Trade>,
}

impl SimulatedBroker {
    pub fn new(config: BrokerConfig) -> Self {
        SimulatedBroker {
            cash: config.initial_cash,
            config,
            position: None,
            equity_curve: Vec::new(),
            trades: Vec::new(),
        }
    }

    pub fn cash(&self) -> f64 {
        self.cash
    }

    pub fn position(&self) -> Option<&PositionState> {
        self.position.as_ref()
    }

    pub fn side(&self) -> Option<Side> {
        self.position.as_ref().map(|p| p.side)
    }

    pub fn is_flat(&self) -> bool {
        self.position.is_none()
    }

    pub fn trades(&self) -> &[Trade] {
        &self.trades
    }

    pub fn equity_curve(&self) -> &[EquityPoint] {
        &self.equity_curve
    }

    pub fn config(&self) -> &BrokerConfig {
        &self.config
    }

    /// Cash plus mark-to-market of the open position at `price`.
    pub fn equity_at(&self, price: f64) -> f64 {
        match &self.position {
            Some(pos) => self.cash + pos.market_value(price),
            None => self.cash,
        }
    }

    /// Index of the bar currently being processed.
    fn current_bar(&self) -> usize {
        self.equity_curve.len()
    }

    /// Open a position. Long pays notional plus fee; short receives notional
    /// minus fee.
    pub fn enter(
        &mut self,
        side: Side,
        quantity: f64,
        price: f64,
        time: DateTime<Utc>,
        reason: &str,
    ) -> Result<(), StateContractError> {
        if let Some(pos) = &self.position {
            return Err(StateContractError::EnterWhileInPosition {
                side: pos.side.to_string(),
            });
        }
        if side == Side::Short && !self.config.allow_short {
            return Err(StateContractError::ShortingDisabled);
        }
        if !(quantity.is_finite() && quantity > 0.0) {
            return Err(StateContractError::InvalidQuantity { quantity });
        }

        let fee = calculate_fee(price, quantity, self.config.fee_rate);
        let notional = price * quantity;
        match side {
            Side::Long => self.cash -= notional + fee,
            Side::Short => self.cash += notional - fee,
        }

        self.position = Some(PositionState {
            side,
            quantity,
            entry_price: price,
            entry_time: time,
            entry_bar: self.current_bar(),
            entry_reason: reason.to_string(),
            entry_fee: fee,
            high_water: price,
            low_water: price,
        });
        Ok(())
    }

    /// Close the open position and record the trade.
    ///
    /// `pnl = (price - entry_price) * signed_qty - exit_fee`; the entry fee
    /// was already taken from cash at entry and is reported in `fee`.
    pub fn exit(
        &mut self,
        price: f64,
        time: DateTime<Utc>,
        reason: ExitReason,
    ) -> Result<&Trade, StateContractError> {
        let mut pos = self
            .position
            .take()
            .ok_or(StateContractError::ExitWhileFlat)?;
        pos.observe(price, price);

        let exit_fee = calculate_fee(price, pos.quantity, self.config.fee_rate);
        let notional = price * pos.quantity;
        match pos.side {
            Side::Long => self.cash += notional - exit_fee,
            Side::Short => self.cash -= notional + exit_fee,
        }

        let pnl = pos.unrealized_pnl(price) - exit_fee;
        let entry_notional = pos.entry_price * pos.quantity;
        let pnl_pct = if entry_notional > 0.0 {
            pnl / entry_notional
        } else {
            0.0
        };

        let index = self.trades.len();
        self.trades.push(Trade {
            entry_time: pos.entry_time,
            exit_time: time,
            side: pos.side,
            entry_price: pos.entry_price,
            exit_price: price,
            size: pos.quantity,
            fee: pos.entry_fee + exit_fee,
            pnl,
            pnl_pct,
            entry_reason: pos.entry_reason.clone(),
            exit_reason: reason,
            holding_bars: self.current_bar() - pos.entry_bar,
            mae: pos.mae(),
            mfe: pos.mfe(),
            equity_after: self.cash,
        });

        Ok(&self.trades[index])
    }

    /// Widen the open position's excursion range with this bar.
    ///
    /// When `trigger` closes the position on this bar, the extreme on the
    /// triggered side stops at the fill price.
    pub fn track_excursion(&mut self, bar: &Bar, trigger: Option<StopTrigger>) {
        let Some(pos) = self.position.as_mut() else {
            return;
        };
        let (low, high) = match trigger {
            None => (bar.low, bar.high),
            Some(trigger) => {
                let adverse = trigger.reason != ExitReason::TakeProfit;
                match (pos.side, adverse) {
                    (Side::Long, true) | (Side::Short, false) => (trigger.price, bar.high),
                    (Side::Long, false) | (Side::Short, true) => (bar.low, trigger.price),
                }
            }
        };
        pos.observe(low, high);
    }

    /// Price at which equity reaches zero, if that price is positive.
    pub fn liquidation_price(&self) -> Option<f64> {
        let pos = self.position.as_ref()?;
        let price = -self.cash / pos.signed_quantity();
        (price.is_finite() && price > 0.0).then_some(price)
    }

    /// Decide whether an intrabar trigger closes the position on `bar`.
    ///
    /// Adverse triggers (stop-loss, liquidation) are checked against the
    /// adverse extreme and always win over take-profit, so a bar that spans
    /// both stop and target exits at the stop. Between stop and liquidation
    /// the level the price reaches first wins.
    pub fn check_stops(&self, bar: &Bar) -> Option<StopTrigger> {
        let pos = self.position.as_ref()?;

        let adverse_hit = |level: f64| match pos.side {
            Side::Long => bar.low <= level,
            Side::Short => bar.high >= level,
        };
        let favourable_hit = |level: f64| match pos.side {
            Side::Long => bar.high >= level,
            Side::Short => bar.low <= level,
        };

        let stop = active_pct(self.config.stop_loss_pct)
            .map(|pct| pos.stop_loss_price(pct))
            .filter(|&level| adverse_hit(level));
        let liquidation = self.liquidation_price().filter(|&level| adverse_hit(level));

        let adverse = match (stop, liquidation) {
            (Some(s), Some(l)) => {
                let stop_first = match pos.side {
                    Side::Long => s >= l,
                    Side::Short => s <= l,
                };
                if stop_first {
                    Some((ExitReason::StopLoss, s))
                } else {
                    Some((ExitReason::Liquidation, l))
                }
            }
            (Some(s), None) => Some((ExitReason::StopLoss, s)),
            (None, Some(l)) => Some((ExitReason::Liquidation, l)),
            (None, None) => None,
        };

        if let Some((reason, price)) = adverse {
            return Some(StopTrigger { reason, price });
        }

        active_pct(self.config.take_profit_pct)
            .map(|pct| pos.take_profit_price(pct))
            .filter(|&level| favourable_hit(level))
            .map(|price| StopTrigger {
                reason: ExitReason::TakeProfit,
                price,
            })
    }

    /// Record end-of-bar equity. Call exactly once per bar, after all fills.
    pub fn update_equity(&mut self, price: f64, time: DateTime<Utc>) {
        let equity = self.equity_at(price);
        self.equity_curve.push(EquityPoint {
            timestamp: time,
            equity,
        });
    }

    /// Consume the broker, returning equity history, trade ledger and any
    /// position still open.
    pub fn into_parts(self) -> (Vec<EquityPoint>, Vec<Trade>, Option<PositionState>) {
        (self.equity_curve, self.trades, self.position)
    }
}

fn active_pct(pct: Option<f64>) -> Option<f64> {
    pct.filter(|p| p.is_finite() && *p > 0.0)
}
