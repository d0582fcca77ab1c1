//! Reference strategies shipped with barsim.
//!
//! Both are pure functions of the bar history; helpers below compute the
//! window statistics they need over the tail of that history.

pub mod breakout;
pub mod sma_cross;

use super::ohlcv::Bar;
use super::strategy::StrategyRegistry;

pub use breakout::BreakoutFactory;
pub use sma_cross::SmaCrossFactory;

/// Register every built-in strategy factory.
pub fn register_builtin(registry: &mut StrategyRegistry) {
    registry.register(Box::new(SmaCrossFactory));
    registry.register(Box::new(BreakoutFactory));
}

/// Mean close of the `period` bars ending at `end` (exclusive).
pub(crate) fn sma(bars: &[Bar], end: usize, period: usize) -> Option<f64> {
    if period == 0 || end < period || end > bars.len() {
        return None;
    }
    let sum: f64 = bars[end - period..end].iter().map(|b| b.close).sum();
    Some(sum / period as f64)
}

/// Highest high of the `period` bars ending at `end` (exclusive).
pub(crate) fn highest_high(bars: &[Bar], end: usize, period: usize) -> Option<f64> {
    if period == 0 || end < period || end > bars.len() {
        return None;
    }
    bars[end - period..end]
        .iter()
        .map(|b| b.high)
        .reduce(f64::max)
}

/// Lowest low of the `period` bars ending at `end` (exclusive).
pub(crate) fn lowest_low(bars: &[Bar], end: usize, period: usize) -> Option<f64> {
    if period == 0 || end < period || end > bars.len() {
        return None;
    }
    bars[end - period..end]
        .iter()
        .map(|b| b.low)
        .reduce(f64::min)
}
