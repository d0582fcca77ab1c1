//! Integration tests for the engine, metrics and walk-forward pipeline.
//!
//! Tests cover:
//! - Reference long trade, stop-loss and simultaneous stop/target scenarios
//! - Metric sentinels for empty and loss-free runs
//! - Determinism of repeated runs
//! - Walk-forward window layout and the full pipeline with mock ports

mod common;

use approx::assert_relative_eq;
use barsim::cli::{backtest_pipeline, builtin_registry, walk_forward_pipeline, WalkForwardPlan};
use barsim::domain::backtest::{run_backtest, BacktestConfig, BacktestResult};
use barsim::domain::error::BarsimError;
use barsim::domain::metrics::{self, METRIC_NAMES};
use barsim::domain::optimizer::GridSearch;
use barsim::domain::position::{ExitReason, Side};
use barsim::domain::strategy::{ParamSet, Signal};
use barsim::domain::walk_forward::{generate_windows, WfConfig, WfResult};
use barsim::ports::report_port::ReportPort;
use common::*;
use std::cell::RefCell;
use std::path::{Path, PathBuf};

mod reference_scenarios {
    use super::*;

    #[test]
    fn five_bar_long_trade() {
        let bars = bars_from_closes(&[100.0, 101.0, 99.0, 105.0, 95.0]);
        let strategy = ScriptedStrategy::new(&[(1, Signal::EnterLong), (3, Signal::ExitLong)]);

        let result = run_backtest(&bars, &strategy, &zero_fee_config(1_000.0)).unwrap();

        assert_eq!(result.trades.len(), 1);
        let trade = &result.trades[0];
        assert_eq!(trade.side, Side::Long);
        assert_relative_eq!(trade.entry_price, 101.0);
        assert_relative_eq!(trade.exit_price, 105.0);
        assert_relative_eq!(trade.pnl_pct, 105.0 / 101.0 - 1.0, epsilon = 1e-12);
        assert_relative_eq!(trade.pnl_pct, 0.0396, epsilon = 1e-4);
        assert_eq!(trade.holding_bars, 2);
        assert_eq!(result.metrics.num_trades(), 1);
        assert_relative_eq!(result.metrics.get(metrics::WIN_RATE), 1.0);
        assert_relative_eq!(
            result.final_equity().unwrap(),
            1_000.0 * 105.0 / 101.0,
            epsilon = 1e-9
        );
    }

    #[test]
    fn stop_loss_exits_at_stop_level() {
        let bars = vec![
            make_bar(day(0), 100.0, 100.0, 100.0, 100.0),
            make_bar(day(1), 100.0, 103.0, 97.0, 101.0),
        ];
        let strategy = ScriptedStrategy::new(&[(0, Signal::EnterLong)]);
        let config = BacktestConfig {
            stop_loss_pct: Some(0.02),
            ..zero_fee_config(1_000.0)
        };

        let result = run_backtest(&bars, &strategy, &config).unwrap();

        assert_eq!(result.trades.len(), 1);
        let trade = &result.trades[0];
        assert_eq!(trade.exit_reason, ExitReason::StopLoss);
        assert_eq!(trade.exit_reason.to_string(), "stop_loss");
        assert_relative_eq!(trade.exit_price, 98.0, epsilon = 1e-12);
        assert_eq!(trade.exit_time, day(1));
    }

    #[test]
    fn gap_through_stop_caps_adverse_excursion_at_fill() {
        let bars = vec![
            make_bar(day(0), 100.0, 100.0, 100.0, 100.0),
            make_bar(day(1), 100.0, 101.0, 90.0, 92.0),
        ];
        let strategy = ScriptedStrategy::new(&[(0, Signal::EnterLong)]);
        let config = BacktestConfig {
            stop_loss_pct: Some(0.02),
            ..zero_fee_config(1_000.0)
        };

        let result = run_backtest(&bars, &strategy, &config).unwrap();

        let trade = &result.trades[0];
        assert_eq!(trade.exit_reason, ExitReason::StopLoss);
        assert_relative_eq!(trade.pnl_pct, -0.02, epsilon = 1e-12);
        assert_relative_eq!(trade.mae, -0.02, epsilon = 1e-12);
        assert_relative_eq!(trade.mfe, 0.01, epsilon = 1e-12);
        assert!(trade.mae >= trade.pnl_pct - 1e-12);
    }

    #[test]
    fn take_profit_caps_favourable_excursion_at_target() {
        let bars = vec![
            make_bar(day(0), 100.0, 100.0, 100.0, 100.0),
            make_bar(day(1), 100.0, 120.0, 99.0, 115.0),
        ];
        let strategy = ScriptedStrategy::new(&[(0, Signal::EnterLong)]);
        let config = BacktestConfig {
            take_profit_pct: Some(0.05),
            ..zero_fee_config(1_000.0)
        };

        let result = run_backtest(&bars, &strategy, &config).unwrap();

        let trade = &result.trades[0];
        assert_eq!(trade.exit_reason, ExitReason::TakeProfit);
        assert_relative_eq!(trade.mfe, 0.05, epsilon = 1e-12);
        assert_relative_eq!(trade.mfe, trade.pnl_pct, epsilon = 1e-12);
        assert_relative_eq!(trade.mae, -0.01, epsilon = 1e-12);
    }

    #[test]
    fn stop_wins_when_stop_and_target_hit_same_bar() {
        let bars = vec![
            make_bar(day(0), 100.0, 100.0, 100.0, 100.0),
            make_bar(day(1), 100.0, 110.0, 90.0, 100.0),
        ];
        let strategy = ScriptedStrategy::new(&[(0, Signal::EnterLong)]);
        let config = BacktestConfig {
            stop_loss_pct: Some(0.02),
            take_profit_pct: Some(0.02),
            ..zero_fee_config(1_000.0)
        };

        for _ in 0..3 {
            let result = run_backtest(&bars, &strategy, &config).unwrap();
            assert_eq!(result.trades[0].exit_reason, ExitReason::StopLoss);
        }
    }

    #[test]
    fn short_stop_wins_over_target() {
        let bars = vec![
            make_bar(day(0), 100.0, 100.0, 100.0, 100.0),
            make_bar(day(1), 100.0, 110.0, 90.0, 100.0),
        ];
        let strategy = ScriptedStrategy::new(&[(0, Signal::EnterShort)]);
        let config = BacktestConfig {
            stop_loss_pct: Some(0.05),
            take_profit_pct: Some(0.05),
            allow_short: true,
            ..zero_fee_config(1_000.0)
        };

        let result = run_backtest(&bars, &strategy, &config).unwrap();
        let trade = &result.trades[0];
        assert_eq!(trade.side, Side::Short);
        assert_eq!(trade.exit_reason, ExitReason::StopLoss);
        assert_relative_eq!(trade.exit_price, 105.0, epsilon = 1e-12);
        assert!(trade.pnl < 0.0);
    }

    #[test]
    fn round_trip_at_same_price_is_flat() {
        let bars = bars_from_closes(&[50.0, 50.0, 50.0]);
        let strategy = ScriptedStrategy::new(&[(0, Signal::EnterLong), (2, Signal::ExitLong)]);

        let result = run_backtest(&bars, &strategy, &zero_fee_config(500.0)).unwrap();

        let trade = &result.trades[0];
        assert_eq!(trade.pnl, 0.0);
        assert_eq!(trade.pnl_pct, 0.0);
        assert_relative_eq!(result.final_equity().unwrap(), 500.0);
    }

    #[test]
    fn stopped_bar_does_not_reenter() {
        let bars = vec![
            make_bar(day(0), 100.0, 100.0, 100.0, 100.0),
            make_bar(day(1), 100.0, 100.0, 90.0, 95.0),
            make_bar(day(2), 95.0, 96.0, 94.0, 95.0),
        ];
        let strategy = ScriptedStrategy::new(&[
            (0, Signal::EnterLong),
            (1, Signal::EnterLong),
            (2, Signal::EnterLong),
        ]);
        let config = BacktestConfig {
            stop_loss_pct: Some(0.05),
            ..zero_fee_config(1_000.0)
        };

        let result = run_backtest(&bars, &strategy, &config).unwrap();

        assert_eq!(result.trades.len(), 1);
        assert_eq!(result.trades[0].exit_time, day(1));
        let open = result.open_position.as_ref().unwrap();
        assert_eq!(open.entry_time, day(2));
    }
}

mod metric_sentinels {
    use super::*;

    #[test]
    fn zero_trades_gives_all_nan_metrics() {
        let bars = bars_from_closes(&[10.0, 11.0, 12.0, 11.0]);
        let strategy = ScriptedStrategy::new(&[]);

        let result = run_backtest(&bars, &strategy, &zero_fee_config(1_000.0)).unwrap();

        assert!(result.trades.is_empty());
        assert_eq!(result.metrics.len(), METRIC_NAMES.len());
        for (name, value) in result.metrics.iter() {
            assert!(value.is_nan(), "{name} should be NaN, got {value}");
        }
        assert_eq!(result.equity_curve.len(), bars.len());
    }

    #[test]
    fn all_winners_give_infinite_profit_factor() {
        let bars = bars_from_closes(&[10.0, 11.0, 12.0, 13.0, 14.0, 15.0]);
        let strategy = ScriptedStrategy::new(&[
            (0, Signal::EnterLong),
            (1, Signal::ExitLong),
            (3, Signal::EnterLong),
            (5, Signal::ExitLong),
        ]);

        let result = run_backtest(&bars, &strategy, &zero_fee_config(1_000.0)).unwrap();

        assert_eq!(result.metrics.num_trades(), 2);
        let pf = result.metrics.get(metrics::PROFIT_FACTOR);
        assert!(pf.is_infinite() && pf > 0.0);
    }

    #[test]
    fn losing_trade_gives_finite_profit_factor() {
        let bars = bars_from_closes(&[10.0, 12.0, 12.0, 11.0]);
        let strategy = ScriptedStrategy::new(&[
            (0, Signal::EnterLong),
            (1, Signal::ExitLong),
            (2, Signal::EnterLong),
            (3, Signal::ExitLong),
        ]);

        let result = run_backtest(&bars, &strategy, &zero_fee_config(1_000.0)).unwrap();

        let pf = result.metrics.get(metrics::PROFIT_FACTOR);
        assert!(pf.is_finite() && pf > 1.0);
        assert_relative_eq!(result.metrics.get(metrics::WIN_RATE), 0.5);
    }
}

mod determinism {
    use super::*;

    fn run_twice(config: &BacktestConfig) -> (BacktestResult, BacktestResult) {
        let registry = builtin_registry();
        let bars = generate_bars(date(2023, 1, 1), 300);
        let params = registry.schema("sma_cross").unwrap().defaults();
        let a = barsim::domain::backtest::run_registered(&bars, &registry, "sma_cross", &params, config)
            .unwrap();
        let b = barsim::domain::backtest::run_registered(&bars, &registry, "sma_cross", &params, config)
            .unwrap();
        (a, b)
    }

    #[test]
    fn repeated_runs_are_bit_identical() {
        let config = BacktestConfig {
            fee_rate: 0.001,
            stop_loss_pct: Some(0.03),
            ..BacktestConfig::default()
        };
        let (a, b) = run_twice(&config);

        assert_eq!(a.trades, b.trades);
        assert_eq!(a.equity_curve, b.equity_curve);
        assert!(a.metrics.bit_eq(&b.metrics));
        assert_eq!(a.trade_log(), b.trade_log());
    }

    #[test]
    fn equity_curve_has_one_point_per_bar() {
        let (a, _) = run_twice(&BacktestConfig::default());
        assert_eq!(a.equity_curve.len(), 300);
        for trade in &a.trades {
            assert!(trade.holding_bars >= 1);
            assert!(trade.exit_time > trade.entry_time);
        }
    }
}

mod walk_forward_windows {
    use super::*;

    #[test]
    fn twelve_months_six_two_two_gives_three_windows() {
        let config = WfConfig {
            train_months: 6,
            test_months: 2,
            step_months: 2,
            ..WfConfig::default()
        };
        let windows = generate_windows(date(2023, 1, 1), date(2024, 1, 1), &config).unwrap();

        assert_eq!(windows.len(), 3);
        let test_starts: Vec<_> = windows.iter().map(|w| w.test_start).collect();
        assert_eq!(
            test_starts,
            vec![date(2023, 7, 1), date(2023, 9, 1), date(2023, 11, 1)]
        );
        for pair in windows.windows(2) {
            assert!(pair[0].test_end <= pair[1].test_start);
        }
        for w in &windows {
            assert_eq!(w.train_end, w.test_start);
            assert!(w.test_end <= date(2024, 1, 1));
        }
    }
}

struct RecordingReportPort {
    backtests: RefCell<Vec<(usize, PathBuf)>>,
    walk_forwards: RefCell<Vec<(WfResult, PathBuf)>>,
}

impl RecordingReportPort {
    fn new() -> Self {
        Self {
            backtests: RefCell::new(Vec::new()),
            walk_forwards: RefCell::new(Vec::new()),
        }
    }
}

impl ReportPort for RecordingReportPort {
    fn write_backtest(&self, result: &BacktestResult, output_dir: &Path) -> Result<(), BarsimError> {
        self.backtests
            .borrow_mut()
            .push((result.trades.len(), output_dir.to_path_buf()));
        Ok(())
    }

    fn write_walk_forward(&self, result: &WfResult, output_dir: &Path) -> Result<(), BarsimError> {
        self.walk_forwards
            .borrow_mut()
            .push((result.clone(), output_dir.to_path_buf()));
        Ok(())
    }
}

mod pipelines {
    use super::*;

    #[test]
    fn backtest_pipeline_respects_range_and_reports() {
        let port = MockDataPort {
            bars: generate_bars(date(2023, 1, 1), 200),
        };
        let report = RecordingReportPort::new();
        let registry = builtin_registry();
        let params: ParamSet = registry.schema("breakout").unwrap().defaults();

        let result = backtest_pipeline(
            &port,
            &report,
            &registry,
            "breakout",
            &params,
            &BacktestConfig::default(),
            (Some(date(2023, 2, 1)), Some(date(2023, 6, 1))),
            Path::new("out"),
        )
        .unwrap();

        assert_eq!(result.equity_curve.len(), 120);
        assert_eq!(result.equity_curve[0].timestamp, date(2023, 2, 1));
        let calls = report.backtests.borrow();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0], (result.trades.len(), PathBuf::from("out")));
    }

    #[test]
    fn backtest_pipeline_unknown_strategy_fails_before_report() {
        let port = MockDataPort {
            bars: generate_bars(date(2023, 1, 1), 50),
        };
        let report = RecordingReportPort::new();
        let err = backtest_pipeline(
            &port,
            &report,
            &builtin_registry(),
            "momentum",
            &ParamSet::new(),
            &BacktestConfig::default(),
            (None, None),
            Path::new("out"),
        )
        .unwrap_err();

        assert!(matches!(err, BarsimError::UnknownStrategy { .. }));
        assert!(report.backtests.borrow().is_empty());
    }

    #[test]
    fn backtest_pipeline_short_series_is_input_error() {
        let port = MockDataPort {
            bars: generate_bars(date(2023, 1, 1), 10),
        };
        let registry = builtin_registry();
        let params = registry.schema("sma_cross").unwrap().defaults();
        let err = backtest_pipeline(
            &port,
            &RecordingReportPort::new(),
            &registry,
            "sma_cross",
            &params,
            &BacktestConfig::default(),
            (None, None),
            Path::new("out"),
        )
        .unwrap_err();

        assert!(err.is_insufficient_data());
    }

    fn plan(parallel: bool) -> WalkForwardPlan {
        WalkForwardPlan {
            config: WfConfig {
                train_months: 6,
                test_months: 2,
                step_months: 2,
                optimize_metric: metrics::TOTAL_RETURN.to_string(),
                min_trades: 1,
                parallel,
            },
            start: date(2023, 1, 1),
            end: date(2024, 1, 1),
            search: GridSearch {
                max_combinations: 10_000,
                parallel,
            },
        }
    }

    #[test]
    fn walk_forward_pipeline_produces_ordered_windows() {
        let port = MockDataPort {
            bars: generate_bars(date(2022, 12, 1), 450),
        };
        let report = RecordingReportPort::new();

        let result = walk_forward_pipeline(
            &port,
            &report,
            &builtin_registry(),
            "breakout",
            &BacktestConfig::default(),
            &plan(false),
            Path::new("wf"),
        )
        .unwrap();

        assert_eq!(result.windows.len(), 3);
        for (i, w) in result.windows.iter().enumerate() {
            assert_eq!(w.window_id, i);
            assert_eq!(w.best_params.is_some(), w.train_metrics.is_some());
            assert!(w.is_feasible() || w.infeasible.is_some());
        }
        assert!((0.0..=100.0).contains(&result.robustness_score));
        for score in result.param_stability.values() {
            assert!((0.0..=1.0).contains(score));
        }
        let calls = report.walk_forwards.borrow();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].1, PathBuf::from("wf"));
        assert_eq!(calls[0].0.windows.len(), 3);
    }

    #[test]
    fn parallel_walk_forward_matches_sequential() {
        let port = MockDataPort {
            bars: generate_bars(date(2023, 1, 1), 400),
        };
        let registry = builtin_registry();
        let run = |parallel: bool| {
            walk_forward_pipeline(
                &port,
                &RecordingReportPort::new(),
                &registry,
                "sma_cross",
                &BacktestConfig::default(),
                &plan(parallel),
                Path::new("wf"),
            )
            .unwrap()
        };

        let seq = run(false);
        let par = run(true);

        assert_eq!(seq.windows.len(), par.windows.len());
        for (a, b) in seq.windows.iter().zip(par.windows.iter()) {
            assert_eq!(a.window_id, b.window_id);
            assert_eq!(a.best_params, b.best_params);
            match (&a.test_metrics, &b.test_metrics) {
                (Some(x), Some(y)) => assert!(x.bit_eq(y)),
                (None, None) => {}
                _ => panic!("window {} differs in feasibility", a.window_id),
            }
        }
        assert_eq!(seq.robust_params, par.robust_params);
        assert_eq!(
            seq.robustness_score.to_bits(),
            par.robustness_score.to_bits()
        );
    }
}
