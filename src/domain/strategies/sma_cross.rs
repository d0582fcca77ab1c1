//! Fast/slow simple moving average crossover.

use super::sma;
use crate::domain::error::BarsimError;
use crate::domain::ohlcv::Bar;
use crate::domain::strategy::{
    choice_param, int_param, Direction, ParamSchema, ParamSet, ParamSpec, Signal, Strategy,
    StrategyFactory,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrossMode {
    LongOnly,
    LongShort,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SmaCross {
    pub fast: usize,
    pub slow: usize,
    pub mode: CrossMode,
}

impl Strategy for SmaCross {
    fn name(&self) -> &str {
        "sma_cross"
    }

    /// The crossing needs both averages on the previous bar too.
    fn lookback(&self) -> usize {
        self.slow + 1
    }

    fn signal(&self, history: &[Bar]) -> Signal {
        let n = history.len();
        let (Some(fast_now), Some(slow_now), Some(fast_prev), Some(slow_prev)) = (
            sma(history, n, self.fast),
            sma(history, n, self.slow),
            sma(history, n.saturating_sub(1), self.fast),
            sma(history, n.saturating_sub(1), self.slow),
        ) else {
            return Signal::Hold;
        };

        let crossed_up = fast_prev <= slow_prev && fast_now > slow_now;
        let crossed_down = fast_prev >= slow_prev && fast_now < slow_now;

        match (self.mode, crossed_up, crossed_down) {
            (CrossMode::LongOnly, true, _) => Signal::EnterLong,
            (CrossMode::LongOnly, _, true) => Signal::ExitLong,
            (CrossMode::LongShort, true, _) => Signal::Target(Direction::Long),
            (CrossMode::LongShort, _, true) => Signal::Target(Direction::Short),
            _ => Signal::Hold,
        }
    }
}

pub struct SmaCrossFactory;

impl StrategyFactory for SmaCrossFactory {
    fn name(&self) -> &str {
        "sma_cross"
    }

    fn description(&self) -> &str {
        "long when the fast SMA crosses above the slow SMA"
    }

    fn schema(&self) -> ParamSchema {
        ParamSchema::new(vec![
            ParamSpec::int("fast", 10, 5, 15, 5, "fast SMA period"),
            ParamSpec::int("slow", 30, 20, 60, 10, "slow SMA period"),
            ParamSpec::choice(
                "mode",
                "long_only",
                &["long_only", "long_short"],
                "trade direction",
            ),
        ])
    }

    fn build(&self, params: &ParamSet) -> Result<Box<dyn Strategy>, BarsimError> {
        let fast = int_param(params, "fast")? as usize;
        let slow = int_param(params, "slow")? as usize;
        if fast >= slow {
            return Err(BarsimError::InvalidParameter {
                name: "fast".into(),
                reason: format!("fast period {fast} must be below slow period {slow}"),
            });
        }
        let mode = match choice_param(params, "mode")? {
            "long_short" => CrossMode::LongShort,
            _ => CrossMode::LongOnly,
        };
        Ok(Box::new(SmaCross { fast, slow, mode }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::strategies::tests::bars_from_closes;
    use crate::domain::strategy::ParamValue;

    fn strategy(mode: CrossMode) -> SmaCross {
        SmaCross {
            fast: 2,
            slow: 4,
            mode,
        }
    }

    #[test]
    fn cross_up_enters_long() {
        // Falling then a sharp rise: fast SMA crosses above slow on the last bar.
        let bars = bars_from_closes(&[10.0, 9.0, 8.0, 7.0, 6.0, 12.0]);
        assert_eq!(strategy(CrossMode::LongOnly).signal(&bars), Signal::EnterLong);
        assert_eq!(
            strategy(CrossMode::LongShort).signal(&bars),
            Signal::Target(Direction::Long)
        );
    }

    #[test]
    fn cross_down_exits_or_reverses() {
        let bars = bars_from_closes(&[6.0, 7.0, 8.0, 9.0, 10.0, 4.0]);
        assert_eq!(strategy(CrossMode::LongOnly).signal(&bars), Signal::ExitLong);
        assert_eq!(
            strategy(CrossMode::LongShort).signal(&bars),
            Signal::Target(Direction::Short)
        );
    }

    #[test]
    fn no_cross_holds() {
        let bars = bars_from_closes(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
        assert_eq!(strategy(CrossMode::LongOnly).signal(&bars), Signal::Hold);
    }

    #[test]
    fn short_history_holds() {
        let bars = bars_from_closes(&[1.0, 2.0, 3.0]);
        assert_eq!(strategy(CrossMode::LongOnly).signal(&bars), Signal::Hold);
    }

    #[test]
    fn lookback_covers_previous_bar() {
        assert_eq!(strategy(CrossMode::LongOnly).lookback(), 5);
    }

    #[test]
    fn factory_builds_from_defaults() {
        let factory = SmaCrossFactory;
        let params = factory.schema().defaults();
        let built = factory.build(&params).unwrap();
        assert_eq!(built.name(), "sma_cross");
        assert_eq!(built.lookback(), 31);
    }

    #[test]
    fn factory_rejects_fast_not_below_slow() {
        let mut params = SmaCrossFactory.schema().defaults();
        params.insert("fast".into(), ParamValue::Int(30));
        assert!(SmaCrossFactory.build(&params).is_err());
    }
}
