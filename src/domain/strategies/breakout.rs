//! Donchian channel breakout.
//!
//! Enters when the close breaks the `entry_period` channel of the preceding
//! bars and exits when it breaks the tighter `exit_period` channel the
//! other way.

use super::{highest_high, lowest_low};
use crate::domain::error::BarsimError;
use crate::domain::ohlcv::Bar;
use crate::domain::strategy::{
    choice_param, int_param, Direction, ParamSchema, ParamSet, ParamSpec, Signal, Strategy,
    StrategyFactory,
};

#[derive(Debug, Clone, PartialEq)]
pub struct Breakout {
    pub entry_period: usize,
    pub exit_period: usize,
    pub allow_short: bool,
}

impl Strategy for Breakout {
    fn name(&self) -> &str {
        "breakout"
    }

    fn lookback(&self) -> usize {
        self.entry_period.max(self.exit_period) + 1
    }

    fn signal(&self, history: &[Bar]) -> Signal {
        let Some(bar) = history.last() else {
            return Signal::Hold;
        };
        let end = history.len() - 1;
        let (Some(entry_high), Some(entry_low), Some(exit_high), Some(exit_low)) = (
            highest_high(history, end, self.entry_period),
            lowest_low(history, end, self.entry_period),
            highest_high(history, end, self.exit_period),
            lowest_low(history, end, self.exit_period),
        ) else {
            return Signal::Hold;
        };

        if bar.close > entry_high {
            if self.allow_short {
                Signal::Target(Direction::Long)
            } else {
                Signal::EnterLong
            }
        } else if bar.close < entry_low && self.allow_short {
            Signal::Target(Direction::Short)
        } else if bar.close < exit_low {
            Signal::ExitLong
        } else if bar.close > exit_high {
            Signal::ExitShort
        } else {
            Signal::Hold
        }
    }
}

pub struct BreakoutFactory;

impl StrategyFactory for BreakoutFactory {
    fn name(&self) -> &str {
        "breakout"
    }

    fn description(&self) -> &str {
        "Donchian channel breakout with a shorter exit channel"
    }

    fn schema(&self) -> ParamSchema {
        ParamSchema::new(vec![
            ParamSpec::int("entry_period", 20, 10, 50, 10, "entry channel length"),
            ParamSpec::int("exit_period", 10, 5, 25, 5, "exit channel length"),
            ParamSpec::choice(
                "mode",
                "long_only",
                &["long_only", "long_short"],
                "trade direction",
            ),
        ])
    }

    fn build(&self, params: &ParamSet) -> Result<Box<dyn Strategy>, BarsimError> {
        let entry_period = int_param(params, "entry_period")? as usize;
        let exit_period = int_param(params, "exit_period")? as usize;
        if entry_period == 0 || exit_period == 0 {
            return Err(BarsimError::InvalidParameter {
                name: "entry_period".into(),
                reason: "channel periods must be positive".into(),
            });
        }
        let allow_short = choice_param(params, "mode")? == "long_short";
        Ok(Box::new(Breakout {
            entry_period,
            exit_period,
            allow_short,
        }))
    }
}
