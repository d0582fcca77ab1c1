//! Configuration validation.
//!
//! Validates every config field before a run starts. Values that are
//! present but unparseable are errors rather than silently replaced with
//! defaults.

use crate::domain::backtest::BacktestConfig;
use crate::domain::error::BarsimError;
use crate::domain::optimizer::GridSearch;
use crate::domain::sizer::PositionSizer;
use crate::domain::strategy::{ParamSet, StrategyRegistry};
use crate::domain::walk_forward::WfConfig;
use crate::ports::config_port::ConfigPort;
use chrono::{DateTime, NaiveDate, Utc};

fn invalid(section: &str, key: &str, reason: impl Into<String>) -> BarsimError {
    BarsimError::ConfigInvalid {
        section: section.to_string(),
        key: key.to_string(),
        reason: reason.into(),
    }
}

fn missing(section: &str, key: &str) -> BarsimError {
    BarsimError::ConfigMissing {
        section: section.to_string(),
        key: key.to_string(),
    }
}

fn present(config: &dyn ConfigPort, section: &str, key: &str) -> Option<String> {
    config
        .get_string(section, key)
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

pub fn read_f64(
    config: &dyn ConfigPort,
    section: &str,
    key: &str,
    default: f64,
) -> Result<f64, BarsimError> {
    match present(config, section, key) {
        None => Ok(default),
        Some(raw) => raw
            .parse::<f64>()
            .ok()
            .filter(|v| v.is_finite())
            .ok_or_else(|| invalid(section, key, format!("'{raw}' is not a number"))),
    }
}

pub fn read_u32(
    config: &dyn ConfigPort,
    section: &str,
    key: &str,
    default: u32,
) -> Result<u32, BarsimError> {
    match present(config, section, key) {
        None => Ok(default),
        Some(raw) => raw
            .parse::<u32>()
            .map_err(|_| invalid(section, key, format!("'{raw}' is not a whole number"))),
    }
}

pub fn read_bool(
    config: &dyn ConfigPort,
    section: &str,
    key: &str,
    default: bool,
) -> Result<bool, BarsimError> {
    match present(config, section, key) {
        None => Ok(default),
        Some(raw) => match raw.to_lowercase().as_str() {
            "true" | "yes" | "1" => Ok(true),
            "false" | "no" | "0" => Ok(false),
            _ => Err(invalid(section, key, format!("'{raw}' is not a boolean"))),
        },
    }
}

pub fn read_required(config: &dyn ConfigPort, section: &str, key: &str) -> Result<String, BarsimError> {
    present(config, section, key).ok_or_else(|| missing(section, key))
}

/// A required `YYYY-MM-DD` date, as midnight UTC.
pub fn read_date(
    config: &dyn ConfigPort,
    section: &str,
    key: &str,
) -> Result<DateTime<Utc>, BarsimError> {
    let raw = read_required(config, section, key)?;
    NaiveDate::parse_from_str(&raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
        .ok_or_else(|| invalid(section, key, format!("invalid {key} format, expected YYYY-MM-DD")))
}

/// An optional `YYYY-MM-DD` date; absent means unbounded.
pub fn read_optional_date(
    config: &dyn ConfigPort,
    section: &str,
    key: &str,
) -> Result<Option<DateTime<Utc>>, BarsimError> {
    match present(config, section, key) {
        None => Ok(None),
        Some(_) => read_date(config, section, key).map(Some),
    }
}

/// Half-open `[data]` date range; either end may be unbounded.
pub type DataRange = (Option<DateTime<Utc>>, Option<DateTime<Utc>>);

/// Check `[data]` and return its date range.
pub fn validate_data_config(config: &dyn ConfigPort) -> Result<DataRange, BarsimError> {
    read_required(config, "data", "file")?;
    let start = read_optional_date(config, "data", "start")?;
    let end = read_optional_date(config, "data", "end")?;
    if let (Some(start), Some(end)) = (start, end) {
        if start >= end {
            return Err(invalid("data", "start", "start must be before end"));
        }
    }
    Ok((start, end))
}

/// Check `[backtest]` and `[sizer]`, returning the parsed engine config.
pub fn validate_backtest_config(config: &dyn ConfigPort) -> Result<BacktestConfig, BarsimError> {
    let defaults = BacktestConfig::default();
    let (stop_loss_pct, take_profit_pct) = validate_stops(config)?;
    Ok(BacktestConfig {
        initial_cash: validate_initial_cash(config, defaults.initial_cash)?,
        fee_rate: validate_fee_rate(config, defaults.fee_rate)?,
        stop_loss_pct,
        take_profit_pct,
        sizer: read_sizer(config)?,
        leverage: validate_leverage(config, defaults.leverage)?,
        allow_short: read_bool(config, "backtest", "allow_short", defaults.allow_short)?,
        risk_free_rate: validate_risk_free_rate(config, defaults.risk_free_rate)?,
        periods_per_year: validate_periods_per_year(config, defaults.periods_per_year)?,
    })
}

fn validate_initial_cash(config: &dyn ConfigPort, default: f64) -> Result<f64, BarsimError> {
    let value = read_f64(config, "backtest", "initial_cash", default)?;
    if value <= 0.0 {
        return Err(invalid("backtest", "initial_cash", "initial_cash must be positive"));
    }
    Ok(value)
}

fn validate_fee_rate(config: &dyn ConfigPort, default: f64) -> Result<f64, BarsimError> {
    let value = read_f64(config, "backtest", "fee_rate", default)?;
    if !(0.0..1.0).contains(&value) {
        return Err(invalid("backtest", "fee_rate", "fee_rate must be in [0, 1)"));
    }
    Ok(value)
}

/// Stop-loss and take-profit thresholds. Zero disables a stop.
fn validate_stops(config: &dyn ConfigPort) -> Result<(Option<f64>, Option<f64>), BarsimError> {
    let stop = read_f64(config, "backtest", "stop_loss_pct", 0.0)?;
    if !(0.0..1.0).contains(&stop) {
        return Err(invalid("backtest", "stop_loss_pct", "stop_loss_pct must be in [0, 1)"));
    }
    let take = read_f64(config, "backtest", "take_profit_pct", 0.0)?;
    if take < 0.0 {
        return Err(invalid(
            "backtest",
            "take_profit_pct",
            "take_profit_pct must be non-negative",
        ));
    }
    Ok(((stop > 0.0).then_some(stop), (take > 0.0).then_some(take)))
}

fn validate_leverage(config: &dyn ConfigPort, default: f64) -> Result<f64, BarsimError> {
    let value = read_f64(config, "backtest", "leverage", default)?;
    if value <= 0.0 {
        return Err(invalid("backtest", "leverage", "leverage must be positive"));
    }
    Ok(value)
}

fn validate_risk_free_rate(config: &dyn ConfigPort, default: f64) -> Result<f64, BarsimError> {
    let value = read_f64(config, "backtest", "risk_free_rate", default)?;
    if !(0.0..1.0).contains(&value) {
        return Err(invalid(
            "backtest",
            "risk_free_rate",
            "risk_free_rate must be between 0 and 1",
        ));
    }
    Ok(value)
}

fn validate_periods_per_year(config: &dyn ConfigPort, default: f64) -> Result<f64, BarsimError> {
    let value = read_f64(config, "backtest", "periods_per_year", default)?;
    if value <= 0.0 {
        return Err(invalid(
            "backtest",
            "periods_per_year",
            "periods_per_year must be positive",
        ));
    }
    Ok(value)
}

/// Parse the `[sizer]` section.
pub fn read_sizer(config: &dyn ConfigPort) -> Result<PositionSizer, BarsimError> {
    let kind = present(config, "sizer", "kind").unwrap_or_else(|| "all_in".to_string());
    let amount = read_f64(config, "sizer", "amount", 0.0)?;
    let pct = read_f64(config, "sizer", "pct", 0.0)?;
    PositionSizer::from_name(&kind, amount, pct)
}

/// Check the strategy name is registered and every parameter parses
/// against its schema. Returns the name and the full parameter set, with
/// schema defaults for keys the section leaves out.
pub fn validate_strategy_config(
    config: &dyn ConfigPort,
    registry: &StrategyRegistry,
) -> Result<(String, ParamSet), BarsimError> {
    let name = read_required(config, "strategy", "name")?;
    let schema = registry.schema(&name)?;
    let raw: Vec<(String, String)> = config
        .keys("strategy")
        .into_iter()
        .filter(|k| k != "name")
        .filter_map(|k| config.get_string("strategy", &k).map(|v| (k, v)))
        .collect();
    let params = schema.parse_raw(raw.iter().map(|(k, v)| (k.as_str(), v.as_str())))?;
    Ok((name, params))
}

/// Parsed `[walk_forward]` section.
#[derive(Debug, Clone, PartialEq)]
pub struct WalkForwardSettings {
    pub config: WfConfig,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub max_combinations: usize,
}

pub fn validate_walk_forward_config(
    config: &dyn ConfigPort,
) -> Result<WalkForwardSettings, BarsimError> {
    let start = read_date(config, "walk_forward", "start")?;
    let end = read_date(config, "walk_forward", "end")?;
    if start >= end {
        return Err(invalid("walk_forward", "start", "start must be before end"));
    }

    let defaults = WfConfig::default();
    let wf = WfConfig {
        train_months: read_u32(config, "walk_forward", "train_months", defaults.train_months)?,
        test_months: read_u32(config, "walk_forward", "test_months", defaults.test_months)?,
        step_months: read_u32(config, "walk_forward", "step_months", defaults.step_months)?,
        optimize_metric: present(config, "walk_forward", "optimize_metric")
            .unwrap_or(defaults.optimize_metric),
        min_trades: read_u32(config, "walk_forward", "min_trades", defaults.min_trades as u32)?
            as usize,
        parallel: read_bool(config, "walk_forward", "parallel", defaults.parallel)?,
    };
    wf.validate()?;

    let max_combinations = read_u32(
        config,
        "walk_forward",
        "max_combinations",
        GridSearch::default().max_combinations as u32,
    )?;
    if max_combinations == 0 {
        return Err(invalid(
            "walk_forward",
            "max_combinations",
            "max_combinations must be at least 1",
        ));
    }
    Ok(WalkForwardSettings {
        config: wf,
        start,
        end,
        max_combinations: max_combinations as usize,
    })
}
