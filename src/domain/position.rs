//! Position state and completed trades.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Side {
    Long,
    Short,
}

impl Side {
    /// +1 for long, -1 for short.
    pub fn sign(self) -> f64 {
        match self {
            Side::Long => 1.0,
            Side::Short => -1.0,
        }
    }

    /// Split a signed quantity into side and magnitude. Zero and NaN have no side.
    pub fn from_signed(quantity: f64) -> Option<(Side, f64)> {
        if quantity > 0.0 {
            Some((Side::Long, quantity))
        } else if quantity < 0.0 {
            Some((Side::Short, -quantity))
        } else {
            None
        }
    }

    pub fn opposite(self) -> Side {
        match self {
            Side::Long => Side::Short,
            Side::Short => Side::Long,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Long => write!(f, "long"),
            Side::Short => write!(f, "short"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitReason {
    StrategyExit,
    StopLoss,
    TakeProfit,
    Liquidation,
}

impl fmt::Display for ExitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ExitReason::StrategyExit => "strategy_exit",
            ExitReason::StopLoss => "stop_loss",
            ExitReason::TakeProfit => "take_profit",
            ExitReason::Liquidation => "liquidation",
        };
        write!(f, "{s}")
    }
}

/// An open position. Only the broker creates or mutates one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionState {
    pub side: Side,
    pub quantity: f64,
    pub entry_price: f64,
    pub entry_time: DateTime<Utc>,
    pub entry_bar: usize,
    pub entry_reason: String,
    pub entry_fee: f64,
    /// Highest price seen since entry.
    pub high_water: f64,
    /// Lowest price seen since entry.
    pub low_water: f64,
}

impl PositionState {
    pub fn signed_quantity(&self) -> f64 {
        self.side.sign() * self.quantity
    }

    pub fn market_value(&self, price: f64) -> f64 {
        self.signed_quantity() * price
    }

    pub fn unrealized_pnl(&self, price: f64) -> f64 {
        self.signed_quantity() * (price - self.entry_price)
    }

    pub fn stop_loss_price(&self, pct: f64) -> f64 {
        self.entry_price * (1.0 - self.side.sign() * pct)
    }

    pub fn take_profit_price(&self, pct: f64) -> f64 {
        self.entry_price * (1.0 + self.side.sign() * pct)
    }

    pub fn observe(&mut self, low: f64, high: f64) {
        self.low_water = self.low_water.min(low);
        self.high_water = self.high_water.max(high);
    }

    /// Maximum adverse excursion as a fraction of entry price (<= 0).
    pub fn mae(&self) -> f64 {
        let worst = match self.side {
            Side::Long => self.low_water - self.entry_price,
            Side::Short => self.entry_price - self.high_water,
        };
        (worst / self.entry_price).min(0.0)
    }

    /// Maximum favourable excursion as a fraction of entry price (>= 0).
    pub fn mfe(&self) -> f64 {
        let best = match self.side {
            Side::Long => self.high_water - self.entry_price,
            Side::Short => self.entry_price - self.low_water,
        };
        (best / self.entry_price).max(0.0)
    }
}

/// A completed round trip. Never mutated after the broker records it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    pub entry_time: DateTime<Utc>,
    pub exit_time: DateTime<Utc>,
    pub side: Side,
    pub entry_price: f64,
    pub exit_price: f64,
    pub size: f64,
    pub fee: f64,
    pub pnl: f64,
    pub pnl_pct: f64,
    pub entry_reason: String,
    pub exit_reason: ExitReason,
    pub holding_bars: usize,
    pub mae: f64,
    pub mfe: f64,
    pub equity_after: f64,
}

impl Trade {
    pub fn signed_size(&self) -> f64 {
        self.side.sign() * self.size
    }

    pub fn is_win(&self) -> bool {
        self.pnl > 0.0
    }
}
