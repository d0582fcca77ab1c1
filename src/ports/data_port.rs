//! Bar data access port trait.

use crate::domain::error::BarsimError;
use crate::domain::ohlcv::Bar;
use chrono::{DateTime, Utc};

pub trait DataPort {
    /// Bars with `start <= timestamp < end`, ascending. `None` leaves that
    /// side of the range open.
    fn fetch_bars(
        &self,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> Result<Vec<Bar>, BarsimError>;
}
