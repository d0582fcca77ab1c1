//! Position sizing.
//!
//! A sizer maps (equity, price) to an unsigned order quantity. A result of
//! zero or less is a no-op: the engine skips the entry without error. There
//! is no lot-size or minimum-notional rounding.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::error::BarsimError;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub enum PositionSizer {
    /// Spend the whole equity.
    #[default]
    AllIn,
    /// Spend a fixed cash amount per entry.
    FixedCash { amount: f64 },
    /// Spend a fraction of equity, `pct` in (0, 1].
    PercentOfEquity { pct: f64 },
}

impl PositionSizer {
    pub fn size(&self, equity: f64, price: f64) -> f64 {
        if !price.is_finite() || price <= 0.0 {
            return 0.0;
        }
        let notional = match self {
            PositionSizer::AllIn => equity,
            PositionSizer::FixedCash { amount } => *amount,
            PositionSizer::PercentOfEquity { pct } => equity * pct,
        };
        notional / price
    }

    /// Build a sizer from its configuration name and parameters.
    pub fn from_name(name: &str, amount: f64, pct: f64) -> Result<Self, BarsimError> {
        match name.trim().to_lowercase().as_str() {
            "all_in" => Ok(PositionSizer::AllIn),
            "fixed_cash" => {
                if !(amount.is_finite() && amount > 0.0) {
                    return Err(BarsimError::ConfigInvalid {
                        section: "sizer".into(),
                        key: "amount".into(),
                        reason: "fixed_cash amount must be positive".into(),
                    });
                }
                Ok(PositionSizer::FixedCash { amount })
            }
            "percent_of_equity" => {
                if !(pct > 0.0 && pct <= 1.0) {
                    return Err(BarsimError::ConfigInvalid {
                        section: "sizer".into(),
                        key: "pct".into(),
                        reason: "pct must be in (0, 1]".into(),
                    });
                }
                Ok(PositionSizer::PercentOfEquity { pct })
            }
            other => Err(BarsimError::ConfigInvalid {
                section: "sizer".into(),
                key: "kind".into(),
                reason: format!(
                    "unknown sizer '{other}' (expected all_in, fixed_cash or percent_of_equity)"
                ),
            }),
        }
    }
}

impl fmt::Display for PositionSizer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PositionSizer::AllIn => write!(f, "all_in"),
            PositionSizer::FixedCash { amount } => write!(f, "fixed_cash({amount})"),
            PositionSizer::PercentOfEquity { pct } => write!(f, "percent_of_equity({pct})"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_in_spends_equity() {
        let qty = PositionSizer::AllIn.size(1000.0, 101.0);
        assert!((qty - 1000.0 / 101.0).abs() < 1e-12);
    }

    #[test]
    fn fixed_cash_ignores_equity() {
        let sizer = PositionSizer::FixedCash { amount: 250.0 };
        assert!((sizer.size(1_000_000.0, 50.0) - 5.0).abs() < f64::EPSILON);
        assert!((sizer.size(10.0, 50.0) - 5.0).abs() < f64::EPSILON);
    }

    #[test]
    fn percent_of_equity() {
        let sizer = PositionSizer::PercentOfEquity { pct: 0.25 };
        assert!((sizer.size(10_000.0, 100.0) - 25.0).abs() < f64::EPSILON);
    }

    #[test]
    fn zero_or_negative_equity_gives_no_op_size() {
        assert!(PositionSizer::AllIn.size(0.0, 100.0) <= 0.0);
        assert!(PositionSizer::AllIn.size(-50.0, 100.0) <= 0.0);
    }

    #[test]
    fn bad_price_gives_zero() {
        assert_eq!(PositionSizer::AllIn.size(1000.0, 0.0), 0.0);
        assert_eq!(PositionSizer::AllIn.size(1000.0, f64::NAN), 0.0);
    }

    #[test]
    fn from_name_parses_known_sizers() {
        assert_eq!(
            PositionSizer::from_name("all_in", 0.0, 0.0).unwrap(),
            PositionSizer::AllIn
        );
        assert_eq!(
            PositionSizer::from_name("Fixed_Cash", 500.0, 0.0).unwrap(),
            PositionSizer::FixedCash { amount: 500.0 }
        );
        assert_eq!(
            PositionSizer::from_name("percent_of_equity", 0.0, 0.5).unwrap(),
            PositionSizer::PercentOfEquity { pct: 0.5 }
        );
    }

    #[test]
    fn from_name_rejects_unknown() {
        let err = PositionSizer::from_name("kelly", 0.0, 0.0).unwrap_err();
        assert!(matches!(err, BarsimError::ConfigInvalid { key, .. } if key == "kind"));
    }

    #[test]
    fn from_name_rejects_bad_pct() {
        assert!(PositionSizer::from_name("percent_of_equity", 0.0, 1.5).is_err());
        assert!(PositionSizer::from_name("percent_of_equity", 0.0, 0.0).is_err());
    }

    #[test]
    fn display_names() {
        assert_eq!(PositionSizer::AllIn.to_string(), "all_in");
        assert_eq!(
            PositionSizer::PercentOfEquity { pct: 0.5 }.to_string(),
            "percent_of_equity(0.5)"
        );
    }
}
