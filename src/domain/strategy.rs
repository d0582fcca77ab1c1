//! Strategy interface, parameter schemas and the strategy registry.
//!
//! - `Signal` / `Direction`: what a strategy says about one bar
//! - `Strategy`: pure signal function over the bar history
//! - `ParamSpec` / `ParamSchema`: static parameter descriptors, validated
//!   before a strategy is built and enumerated by the optimizer
//! - `StrategyRegistry`: explicit name -> factory map owned by the caller

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use super::error::BarsimError;
use super::ohlcv::Bar;

/// Numeric target direction, the `{-1, 0, 1}` form of a signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    Short,
    Flat,
    Long,
}

impl Direction {
    pub fn from_i8(value: i8) -> Direction {
        match value.signum() {
            1 => Direction::Long,
            -1 => Direction::Short,
            _ => Direction::Flat,
        }
    }

    pub fn as_i8(self) -> i8 {
        match self {
            Direction::Short => -1,
            Direction::Flat => 0,
            Direction::Long => 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Signal {
    Hold,
    EnterLong,
    ExitLong,
    EnterShort,
    ExitShort,
    /// Be long, flat or short after this bar.
    Target(Direction),
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Signal::Hold => write!(f, "hold"),
            Signal::EnterLong => write!(f, "enter_long"),
            Signal::ExitLong => write!(f, "exit_long"),
            Signal::EnterShort => write!(f, "enter_short"),
            Signal::ExitShort => write!(f, "exit_short"),
            Signal::Target(d) => write!(f, "target({})", d.as_i8()),
        }
    }
}

/// A signal-producing strategy.
///
/// `history` always ends at the bar being decided, so a strategy can never
/// see the future. Implementations must be deterministic.
pub trait Strategy {
    fn name(&self) -> &str;

    /// Bars needed before the first signal; shorter series are rejected.
    fn lookback(&self) -> usize;

    fn signal(&self, history: &[Bar]) -> Signal;

    /// Free-text tag recorded as a trade's entry reason.
    fn entry_tag(&self, signal: Signal) -> String {
        format!("{}:{}", self.name(), signal)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Choice(String),
}

impl ParamValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            ParamValue::Int(v) => Some(*v as f64),
            ParamValue::Float(v) => Some(*v),
            _ => None,
        }
    }
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamValue::Int(v) => write!(f, "{v}"),
            ParamValue::Float(v) => write!(f, "{v}"),
            ParamValue::Choice(v) => write!(f, "{v}"),
            ParamValue::Bool(v) => write!(f, "{v}"),
        }
    }
}

/// Parameter assignment. Ordered so that runs and reports are deterministic.
pub type ParamSet = BTreeMap<String, ParamValue>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ParamKind {
    Int { min: i64, max: i64, step: i64 },
    Float { min: f64, max: f64, step: f64 },
    Choice { choices: Vec<String> },
    Bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParamSpec {
    pub name: String,
    pub kind: ParamKind,
    pub default: ParamValue,
    pub description: String,
}

impl ParamSpec {
    pub fn int(name: &str, default: i64, min: i64, max: i64, step: i64, description: &str) -> Self {
        ParamSpec {
            name: name.into(),
            kind: ParamKind::Int { min, max, step },
            default: ParamValue::Int(default),
            description: description.into(),
        }
    }

    pub fn float(
        name: &str,
        default: f64,
        min: f64,
        max: f64,
        step: f64,
        description: &str,
    ) -> Self {
        ParamSpec {
            name: name.into(),
            kind: ParamKind::Float { min, max, step },
            default: ParamValue::Float(default),
            description: description.into(),
        }
    }

    pub fn choice(name: &str, default: &str, choices: &[&str], description: &str) -> Self {
        ParamSpec {
            name: name.into(),
            kind: ParamKind::Choice {
                choices: choices.iter().map(|c| c.to_string()).collect(),
            },
            default: ParamValue::Choice(default.into()),
            description: description.into(),
        }
    }

    pub fn boolean(name: &str, default: bool, description: &str) -> Self {
        ParamSpec {
            name: name.into(),
            kind: ParamKind::Bool,
            default: ParamValue::Bool(default),
            description: description.into(),
        }
    }

    fn invalid(&self, reason: String) -> BarsimError {
        BarsimError::InvalidParameter {
            name: self.name.clone(),
            reason,
        }
    }

    /// Check a value against this spec. Integers are accepted for float
    /// parameters and widened.
    pub fn check(&self, value: &ParamValue) -> Result<ParamValue, BarsimError> {
        match (&self.kind, value) {
            (ParamKind::Int { min, max, .. }, ParamValue::Int(v)) => {
                if v < min || v > max {
                    return Err(self.invalid(format!("{v} outside [{min}, {max}]")));
                }
                Ok(value.clone())
            }
            (ParamKind::Float { min, max, .. }, ParamValue::Float(_) | ParamValue::Int(_)) => {
                let v = value.as_f64().unwrap_or(f64::NAN);
                if !v.is_finite() || v < *min || v > *max {
                    return Err(self.invalid(format!("{v} outside [{min}, {max}]")));
                }
                Ok(ParamValue::Float(v))
            }
            (ParamKind::Choice { choices }, ParamValue::Choice(c)) => {
                if !choices.contains(c) {
                    return Err(self.invalid(format!(
                        "'{c}' is not one of {}",
                        choices.join(", ")
                    )));
                }
                Ok(value.clone())
            }
            (ParamKind::Bool, ParamValue::Bool(_)) => Ok(value.clone()),
            (kind, other) => Err(self.invalid(format!("expected {}, got {other:?}", kind_name(kind)))),
        }
    }

    /// Parse a raw config string according to this parameter's kind.
    pub fn parse(&self, raw: &str) -> Result<ParamValue, BarsimError> {
        let raw = raw.trim();
        let value = match &self.kind {
            ParamKind::Int { .. } => raw
                .parse::<i64>()
                .map(ParamValue::Int)
                .map_err(|e| self.invalid(format!("'{raw}' is not an integer: {e}")))?,
            ParamKind::Float { .. } => raw
                .parse::<f64>()
                .map(ParamValue::Float)
                .map_err(|e| self.invalid(format!("'{raw}' is not a number: {e}")))?,
            ParamKind::Choice { .. } => ParamValue::Choice(raw.to_string()),
            ParamKind::Bool => match raw.to_lowercase().as_str() {
                "true" | "yes" | "1" => ParamValue::Bool(true),
                "false" | "no" | "0" => ParamValue::Bool(false),
                _ => return Err(self.invalid(format!("'{raw}' is not a boolean"))),
            },
        };
        self.check(&value)
    }

    /// Every value the optimizer should try, in ascending order.
    pub fn grid_values(&self) -> Vec<ParamValue> {
        match &self.kind {
            ParamKind::Int { min, max, step } => {
                if *step <= 0 || max < min {
                    return vec![self.default.clone()];
                }
                (*min..=*max)
                    .step_by(*step as usize)
                    .map(ParamValue::Int)
                    .collect()
            }
            ParamKind::Float { min, max, step } => {
                if !(*step > 0.0) || max < min {
                    return vec![self.default.clone()];
                }
                let count = ((max - min) / step + 1e-9).floor() as usize + 1;
                (0..count)
                    .map(|i| ParamValue::Float(min + step * i as f64))
                    .collect()
            }
            ParamKind::Choice { choices } => {
                choices.iter().cloned().map(ParamValue::Choice).collect()
            }
            ParamKind::Bool => vec![ParamValue::Bool(false), ParamValue::Bool(true)],
        }
    }
}

fn kind_name(kind: &ParamKind) -> &'static str {
    match kind {
        ParamKind::Int { .. } => "int",
        ParamKind::Float { .. } => "float",
        ParamKind::Choice { .. } => "choice",
        ParamKind::Bool => "bool",
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParamSchema {
    pub params: Vec<ParamSpec>,
}

impl ParamSchema {
    pub fn new(params: Vec<ParamSpec>) -> Self {
        ParamSchema { params }
    }

    pub fn get(&self, name: &str) -> Option<&ParamSpec> {
        self.params.iter().find(|p| p.name == name)
    }

    pub fn defaults(&self) -> ParamSet {
        self.params
            .iter()
            .map(|p| (p.name.clone(), p.default.clone()))
            .collect()
    }

    /// Fill defaults and check every supplied value. Unknown names fail.
    pub fn validate(&self, supplied: &ParamSet) -> Result<ParamSet, BarsimError> {
        if let Some(unknown) = supplied.keys().find(|k| self.get(k).is_none()) {
            return Err(BarsimError::InvalidParameter {
                name: unknown.clone(),
                reason: "not declared by the strategy".into(),
            });
        }
        self.params
            .iter()
            .map(|spec| {
                let value = supplied.get(&spec.name).unwrap_or(&spec.default);
                spec.check(value).map(|v| (spec.name.clone(), v))
            })
            .collect()
    }

    /// Parse raw `name -> string` pairs (e.g. from an INI section).
    pub fn parse_raw<'a, I>(&self, raw: I) -> Result<ParamSet, BarsimError>
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut set = ParamSet::new();
        for (name, value) in raw {
            let spec = self.get(name).ok_or_else(|| BarsimError::InvalidParameter {
                name: name.to_string(),
                reason: "not declared by the strategy".into(),
            })?;
            set.insert(name.to_string(), spec.parse(value)?);
        }
        self.validate(&set)
    }

    /// Cartesian product of every parameter's grid, in declaration order.
    pub fn grid(&self) -> Vec<ParamSet> {
        let mut combos = vec![ParamSet::new()];
        for spec in &self.params {
            let values = spec.grid_values();
            combos = combos
                .into_iter()
                .flat_map(|base| {
                    values.iter().map(move |v| {
                        let mut next = base.clone();
                        next.insert(spec.name.clone(), v.clone());
                        next
                    })
                })
                .collect();
        }
        combos
    }

    /// Size of [`ParamSchema::grid`] without building it.
    pub fn grid_size(&self) -> usize {
        self.params
            .iter()
            .map(|p| p.grid_values().len())
            .fold(1usize, |acc, n| acc.saturating_mul(n))
    }
}

/// Builds one kind of strategy from validated parameters.
pub trait StrategyFactory: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    fn schema(&self) -> ParamSchema;
    fn build(&self, params: &ParamSet) -> Result<Box<dyn Strategy>, BarsimError>;
}

/// Explicit strategy registry, constructed by the caller and passed to
/// whatever needs to build strategies.
#[derive(Default)]
pub struct StrategyRegistry {
    factories: BTreeMap<String, Box<dyn StrategyFactory>>,
}

impl StrategyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a factory. A later registration under the same name replaces
    /// the earlier one.
    pub fn register(&mut self, factory: Box<dyn StrategyFactory>) {
        self.factories.insert(factory.name().to_string(), factory);
    }

    pub fn names(&self) -> Vec<&str> {
        self.factories.keys().map(String::as_str).collect()
    }

    pub fn factory(&self, name: &str) -> Result<&dyn StrategyFactory, BarsimError> {
        self.factories
            .get(name)
            .map(|f| f.as_ref())
            .ok_or_else(|| BarsimError::UnknownStrategy {
                name: name.to_string(),
            })
    }

    pub fn schema(&self, name: &str) -> Result<ParamSchema, BarsimError> {
        Ok(self.factory(name)?.schema())
    }

    /// Validate `params` against the schema and build the strategy.
    pub fn create(&self, name: &str, params: &ParamSet) -> Result<Box<dyn Strategy>, BarsimError> {
        let factory = self.factory(name)?;
        let params = factory.schema().validate(params)?;
        factory.build(&params)
    }
}

impl fmt::Debug for StrategyRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StrategyRegistry")
            .field("strategies", &self.names())
            .finish()
    }
}

/// Read an integer parameter that [`ParamSchema::validate`] has already checked.
pub fn int_param(params: &ParamSet, name: &str) -> Result<i64, BarsimError> {
    match params.get(name) {
        Some(ParamValue::Int(v)) => Ok(*v),
        _ => Err(BarsimError::InvalidParameter {
            name: name.to_string(),
            reason: "missing integer value".into(),
        }),
    }
}

/// Read a choice parameter that [`ParamSchema::validate`] has already checked.
pub fn choice_param<'a>(params: &'a ParamSet, name: &str) -> Result<&'a str, BarsimError> {
    match params.get(name) {
        Some(ParamValue::Choice(v)) => Ok(v),
        _ => Err(BarsimError::InvalidParameter {
            name: name.to_string(),
            reason: "missing choice value".into(),
        }),
    }
}
