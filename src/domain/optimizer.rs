//! Parameter search over a strategy's schema.
//!
//! An [`Optimizer`] evaluates candidate parameter sets on a bar slice and
//! hands back their metrics; picking the winner is [`select_best`]'s job so
//! every optimizer shares the same feasibility rules.

use log::{debug, info};
use rayon::prelude::*;

use super::backtest::{run_registered, BacktestConfig};
use super::error::BarsimError;
use super::metrics::Metrics;
use super::ohlcv::Bar;
use super::strategy::{ParamSet, StrategyRegistry};

#[derive(Debug, Clone)]
pub struct Candidate {
    pub params: ParamSet,
    pub metrics: Metrics,
}

pub trait Optimizer: Send + Sync {
    /// Evaluate candidates for `strategy` on `bars`, in a deterministic order.
    ///
    /// Candidates whose lookback the slice cannot satisfy, or whose
    /// combination the factory rejects, are dropped. Any other error aborts
    /// the search.
    fn evaluate(
        &self,
        bars: &[Bar],
        registry: &StrategyRegistry,
        strategy: &str,
        config: &BacktestConfig,
    ) -> Result<Vec<Candidate>, BarsimError>;
}

/// Exhaustive search over the cartesian product of every parameter's grid.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GridSearch {
    pub max_combinations: usize,
    pub parallel: bool,
}

impl Default for GridSearch {
    fn default() -> Self {
        GridSearch {
            max_combinations: 10_000,
            parallel: false,
        }
    }
}

impl Optimizer for GridSearch {
    fn evaluate(
        &self,
        bars: &[Bar],
        registry: &StrategyRegistry,
        strategy: &str,
        config: &BacktestConfig,
    ) -> Result<Vec<Candidate>, BarsimError> {
        let schema = registry.schema(strategy)?;
        let size = schema.grid_size();
        if size > self.max_combinations {
            return Err(BarsimError::ConfigInvalid {
                section: "walk_forward".into(),
                key: "max_combinations".into(),
                reason: format!(
                    "{strategy} grid has {size} combinations, limit is {}",
                    self.max_combinations
                ),
            });
        }

        let grid = schema.grid();
        debug!("grid search {strategy}: {} candidates on {} bars", grid.len(), bars.len());

        let run = |params: ParamSet| {
            let outcome = run_registered(bars, registry, strategy, &params, config);
            (params, outcome)
        };
        let outcomes: Vec<_> = if self.parallel {
            grid.into_par_iter().map(run).collect()
        } else {
            grid.into_iter().map(run).collect()
        };

        let mut candidates = Vec::with_capacity(outcomes.len());
        for (params, outcome) in outcomes {
            match outcome {
                Ok(result) => candidates.push(Candidate {
                    params,
                    metrics: result.metrics,
                }),
                Err(err) if err.is_infeasible_candidate() => {
                    debug!("skipping {params:?}: {err}");
                }
                Err(err) => return Err(err),
            }
        }

        info!(
            "grid search {strategy}: {} of {size} candidates evaluated",
            candidates.len()
        );
        Ok(candidates)
    }
}

/// Best candidate by `metric`.
///
/// Only candidates with at least `min_trades` trades and a non-NaN objective
/// are eligible. Ties go to the earliest candidate.
pub fn select_best<'a>(
    candidates: &'a [Candidate],
    metric: &str,
    min_trades: usize,
) -> Option<&'a Candidate> {
    let mut best: Option<(&Candidate, f64)> = None;
    for candidate in candidates {
        if candidate.metrics.num_trades() < min_trades.max(1) {
            continue;
        }
        let score = candidate.metrics.get(metric);
        if score.is_nan() {
            continue;
        }
        match best {
            Some((_, top)) if score <= top => {}
            _ => best = Some((candidate, score)),
        }
    }
    best.map(|(c, _)| c)
}
