//! Domain error types.
//!
//! Input problems and broker contract violations are errors. Empty runs,
//! skipped entries and infeasible walk-forward windows are not: they show up
//! as data (NaN metrics, missing params) instead.

/// A broker call made in a state where it is not allowed.
///
/// These indicate a bug in the caller (normally the engine), not bad user
/// input, and always abort the run.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum StateContractError {
    #[error("enter called while a {side} position is open")]
    EnterWhileInPosition { side: String },

    #[error("exit called while flat")]
    ExitWhileFlat,

    #[error("short entry requested but short selling is disabled")]
    ShortingDisabled,

    #[error("entry quantity must be positive and finite, got {quantity}")]
    InvalidQuantity { quantity: f64 },
}

/// Top-level error type for barsim.
#[derive(Debug, thiserror::Error)]
pub enum BarsimError {
    #[error("config parse error in {file}: {reason}")]
    ConfigParse { file: String, reason: String },

    #[error("missing config key [{section}] {key}")]
    ConfigMissing { section: String, key: String },

    #[error("invalid config value [{section}] {key}: {reason}")]
    ConfigInvalid {
        section: String,
        key: String,
        reason: String,
    },

    #[error("insufficient data: have {bars} bars, need {minimum}")]
    InsufficientData { bars: usize, minimum: usize },

    #[error("malformed bar at index {index}: {reason}")]
    MalformedData { index: usize, reason: String },

    #[error("data error: {reason}")]
    Data { reason: String },

    #[error("unknown strategy '{name}'")]
    UnknownStrategy { name: String },

    #[error("invalid parameter '{name}': {reason}")]
    InvalidParameter { name: String, reason: String },

    #[error("broker contract violated: {0}")]
    StateContract(#[from] StateContractError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl BarsimError {
    /// True when the input series was simply too short for the strategy.
    ///
    /// Walk-forward treats this as an infeasible candidate rather than a
    /// failure of the whole validation.
    pub fn is_insufficient_data(&self) -> bool {
        matches!(self, BarsimError::InsufficientData { .. })
    }

    /// True when one parameter combination cannot run but the search over
    /// the rest of the grid is still sound: too little data for its lookback,
    /// or a combination its factory rejects.
    pub fn is_infeasible_candidate(&self) -> bool {
        self.is_insufficient_data() || matches!(self, BarsimError::InvalidParameter { .. })
    }
}

impl From<&BarsimError> for std::process::ExitCode {
    fn from(err: &BarsimError) -> Self {
        let code: u8 = match err {
            BarsimError::Io(_) => 1,
            BarsimError::ConfigParse { .. }
            | BarsimError::ConfigMissing { .. }
            | BarsimError::ConfigInvalid { .. } => 2,
            BarsimError::Data { .. } => 3,
            BarsimError::UnknownStrategy { .. } | BarsimError::InvalidParameter { .. } => 4,
            BarsimError::InsufficientData { .. } | BarsimError::MalformedData { .. } => 5,
            BarsimError::StateContract(_) => 70,
        };
        std::process::ExitCode::from(code)
    }
}
