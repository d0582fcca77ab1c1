//! CLI definition and dispatch.

use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use crate::adapters::csv_adapter::CsvAdapter;
use crate::adapters::csv_report_adapter::CsvReportAdapter;
use crate::adapters::file_config_adapter::FileConfigAdapter;
use crate::domain::backtest::{self as backtest_engine, BacktestConfig, BacktestResult};
use crate::domain::config_validation::{
    read_required, validate_backtest_config, validate_data_config, validate_strategy_config,
    validate_walk_forward_config, WalkForwardSettings,
};
use crate::domain::error::BarsimError;
use crate::domain::metrics::{
    Metrics, ANNUALIZED_RETURN, MAX_DRAWDOWN, PROFIT_FACTOR, SHARPE_RATIO, SORTINO_RATIO,
    TOTAL_FEES, TOTAL_RETURN, WIN_RATE,
};
use crate::domain::optimizer::GridSearch;
use crate::domain::strategies::register_builtin;
use crate::domain::strategy::{ParamKind, ParamSet, StrategyRegistry};
use crate::domain::walk_forward::{WalkForwardValidator, WfConfig, WfResult};
use crate::ports::config_port::ConfigPort;
use crate::ports::data_port::DataPort;
use crate::ports::report_port::ReportPort;

const DEFAULT_OUTPUT_DIR: &str = "output";

#[derive(Parser, Debug)]
#[command(name = "barsim", about = "Bar-by-bar strategy backtester with walk-forward validation")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run a single backtest
    Backtest {
        #[arg(short, long)]
        config: PathBuf,
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Run walk-forward validation
    WalkForward {
        #[arg(short, long)]
        config: PathBuf,
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Validate a configuration file without running anything
    Validate {
        #[arg(short, long)]
        config: PathBuf,
    },
    /// List registered strategies and their parameters
    Strategies,
}

pub fn run(cli: Cli) -> ExitCode {
    match cli.command {
        Command::Backtest { config, output } => run_backtest(&config, output.as_deref()),
        Command::WalkForward { config, output } => run_walk_forward(&config, output.as_deref()),
        Command::Validate { config } => run_validate(&config),
        Command::Strategies => run_strategies(),
    }
}

/// Registry holding every built-in strategy.
pub fn builtin_registry() -> StrategyRegistry {
    let mut registry = StrategyRegistry::new();
    register_builtin(&mut registry);
    registry
}

pub fn load_config(path: &Path) -> Result<FileConfigAdapter, ExitCode> {
    FileConfigAdapter::from_file(path).map_err(|e| {
        let err = BarsimError::ConfigParse {
            file: path.display().to_string(),
            reason: e.to_string(),
        };
        eprintln!("error: {err}");
        ExitCode::from(&err)
    })
}

fn report_error(err: BarsimError) -> ExitCode {
    eprintln!("error: {err}");
    (&err).into()
}

pub fn build_backtest_config(adapter: &dyn ConfigPort) -> Result<BacktestConfig, BarsimError> {
    validate_backtest_config(adapter)
}

/// Strategy name and its validated parameters from `[strategy]`.
///
/// Every key other than `name` is a parameter; missing ones take the
/// schema default.
pub fn build_strategy_params(
    adapter: &dyn ConfigPort,
    registry: &StrategyRegistry,
) -> Result<(String, ParamSet), BarsimError> {
    validate_strategy_config(adapter, registry)
}

/// Everything `[walk_forward]` configures.
#[derive(Debug, Clone, PartialEq)]
pub struct WalkForwardPlan {
    pub config: WfConfig,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub search: GridSearch,
}

impl From<WalkForwardSettings> for WalkForwardPlan {
    fn from(settings: WalkForwardSettings) -> Self {
        let search = GridSearch {
            max_combinations: settings.max_combinations,
            parallel: settings.config.parallel,
        };
        WalkForwardPlan {
            config: settings.config,
            start: settings.start,
            end: settings.end,
            search,
        }
    }
}

pub fn build_walk_forward_plan(adapter: &dyn ConfigPort) -> Result<WalkForwardPlan, BarsimError> {
    validate_walk_forward_config(adapter).map(WalkForwardPlan::from)
}

/// `[data] file`, resolved against the config file's directory when relative.
pub fn data_path(adapter: &dyn ConfigPort, config_path: &Path) -> Result<PathBuf, BarsimError> {
    let file = PathBuf::from(read_required(adapter, "data", "file")?);
    if file.is_relative() {
        if let Some(dir) = config_path.parent() {
            return Ok(dir.join(file));
        }
    }
    Ok(file)
}

/// CLI flag, then `[output] dir`, then `./output`.
pub fn output_dir(adapter: &dyn ConfigPort, cli_output: Option<&Path>) -> PathBuf {
    cli_output
        .map(Path::to_path_buf)
        .or_else(|| adapter.get_string("output", "dir").map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from(DEFAULT_OUTPUT_DIR))
}

/// Console summary of a backtest's headline metrics, one per line.
pub fn metrics_summary(metrics: &Metrics) -> String {
    [
        format!("Total Return:     {:.2}%", metrics.get(TOTAL_RETURN) * 100.0),
        format!("Annualized:       {:.2}%", metrics.get(ANNUALIZED_RETURN) * 100.0),
        format!("Sharpe Ratio:     {:.2}", metrics.get(SHARPE_RATIO)),
        format!("Sortino Ratio:    {:.2}", metrics.get(SORTINO_RATIO)),
        format!("Max Drawdown:     {:.1}%", metrics.get(MAX_DRAWDOWN) * 100.0),
        format!("Total Trades:     {}", metrics.num_trades()),
        format!("Win Rate:         {:.1}%", metrics.get(WIN_RATE) * 100.0),
        format!("Profit Factor:    {:.2}", metrics.get(PROFIT_FACTOR)),
        format!("Total Fees:       {:.2}", metrics.get(TOTAL_FEES)),
    ]
    .join("\n")
}

/// Fetch bars, simulate, and write the backtest artifacts.
#[allow(clippy::too_many_arguments)]
pub fn backtest_pipeline(
    data_port: &dyn DataPort,
    report_port: &dyn ReportPort,
    registry: &StrategyRegistry,
    strategy: &str,
    params: &ParamSet,
    config: &BacktestConfig,
    range: (Option<DateTime<Utc>>, Option<DateTime<Utc>>),
    output: &Path,
) -> Result<BacktestResult, BarsimError> {
    let bars = data_port.fetch_bars(range.0, range.1)?;
    eprintln!("Running backtest: {strategy} on {} bars", bars.len());

    let result = backtest_engine::run_registered(&bars, registry, strategy, params, config)?;

    eprintln!("\n=== Backtest Results ===");
    eprintln!("{}", metrics_summary(&result.metrics));
    if let Some(position) = &result.open_position {
        eprintln!(
            "Open Position:    {:?} {:.4} @ {:.2}",
            position.side, position.quantity, position.entry_price
        );
    }

    report_port.write_backtest(&result, output)?;
    eprintln!("\nResults written to: {}", output.display());
    Ok(result)
}

/// Fetch bars for the walk-forward range, validate, and write the report.
pub fn walk_forward_pipeline(
    data_port: &dyn DataPort,
    report_port: &dyn ReportPort,
    registry: &StrategyRegistry,
    strategy: &str,
    backtest: &BacktestConfig,
    plan: &WalkForwardPlan,
    output: &Path,
) -> Result<WfResult, BarsimError> {
    registry.factory(strategy)?;
    let bars = data_port.fetch_bars(Some(plan.start), Some(plan.end))?;
    eprintln!(
        "Running walk-forward: {strategy} on {} bars, {} to {}",
        bars.len(),
        plan.start.date_naive(),
        plan.end.date_naive()
    );

    let validator = WalkForwardValidator {
        config: plan.config.clone(),
        backtest: backtest.clone(),
        strategy: strategy.to_string(),
        registry,
        optimizer: &plan.search,
    };
    let result = validator.run(&bars, plan.start, plan.end)?;

    eprintln!("\n=== Walk-Forward Results ===");
    eprintln!(
        "Windows:          {} ({} feasible)",
        result.windows.len(),
        result.feasible_windows()
    );
    for window in &result.windows {
        match (&window.best_params, &window.test_metrics) {
            (Some(params), Some(test)) => eprintln!(
                "  #{} {} .. {}:  {} = {:.4}, {} trades, {:?}",
                window.window_id,
                window.test_start.date_naive(),
                window.test_end.date_naive(),
                result.optimize_metric,
                test.get(&result.optimize_metric),
                test.num_trades(),
                params
            ),
            _ => eprintln!(
                "  #{} {} .. {}:  infeasible ({})",
                window.window_id,
                window.test_start.date_naive(),
                window.test_end.date_naive(),
                window.infeasible.as_deref().unwrap_or("no result")
            ),
        }
    }
    eprintln!("Robustness Score: {:.1}", result.robustness_score);
    eprintln!("Robust Params:    {:?}", result.robust_params);

    report_port.write_walk_forward(&result, output)?;
    eprintln!("\nResults written to: {}", output.display());
    Ok(result)
}

fn run_backtest(config_path: &Path, output: Option<&Path>) -> ExitCode {
    eprintln!("Loading config from {}", config_path.display());
    let adapter = match load_config(config_path) {
        Ok(a) => a,
        Err(code) => return code,
    };
    let registry = builtin_registry();

    let prepared = validate_data_config(&adapter).and_then(|range| {
        let config = build_backtest_config(&adapter)?;
        let (name, params) = build_strategy_params(&adapter, &registry)?;
        let path = data_path(&adapter, config_path)?;
        Ok((config, name, params, range, path))
    });
    let (config, name, params, range, path) = match prepared {
        Ok(p) => p,
        Err(e) => return report_error(e),
    };

    let data_port = CsvAdapter::new(path);
    match backtest_pipeline(
        &data_port,
        &CsvReportAdapter,
        &registry,
        &name,
        &params,
        &config,
        range,
        &output_dir(&adapter, output),
    ) {
        Ok(_) => ExitCode::SUCCESS,
        Err(e) => report_error(e),
    }
}

fn run_walk_forward(config_path: &Path, output: Option<&Path>) -> ExitCode {
    eprintln!("Loading config from {}", config_path.display());
    let adapter = match load_config(config_path) {
        Ok(a) => a,
        Err(code) => return code,
    };
    let registry = builtin_registry();

    let prepared = validate_data_config(&adapter)
        .and_then(|_| build_backtest_config(&adapter))
        .and_then(|config| {
            let (name, _) = build_strategy_params(&adapter, &registry)?;
            let plan = build_walk_forward_plan(&adapter)?;
            let path = data_path(&adapter, config_path)?;
            Ok((config, name, plan, path))
        });
    let (config, name, plan, path) = match prepared {
        Ok(p) => p,
        Err(e) => return report_error(e),
    };

    let data_port = CsvAdapter::new(path);
    match walk_forward_pipeline(
        &data_port,
        &CsvReportAdapter,
        &registry,
        &name,
        &config,
        &plan,
        &output_dir(&adapter, output),
    ) {
        Ok(_) => ExitCode::SUCCESS,
        Err(e) => report_error(e),
    }
}

pub fn run_validate(config_path: &Path) -> ExitCode {
    eprintln!("Loading config from {}", config_path.display());
    let adapter = match load_config(config_path) {
        Ok(a) => a,
        Err(code) => return code,
    };
    let registry = builtin_registry();

    let checked = validate_data_config(&adapter)
        .and_then(|_| validate_backtest_config(&adapter))
        .and_then(|_| validate_strategy_config(&adapter, &registry))
        .and_then(|(name, params)| {
            if !adapter.keys("walk_forward").is_empty() {
                validate_walk_forward_config(&adapter)?;
            }
            Ok((name, params))
        });
    match checked {
        Ok((name, params)) => {
            eprintln!("Config validated successfully");
            eprintln!("  strategy: {name}");
            for (key, value) in &params {
                eprintln!("    {key} = {value}");
            }
            ExitCode::SUCCESS
        }
        Err(e) => report_error(e),
    }
}

fn run_strategies() -> ExitCode {
    let registry = builtin_registry();
    for name in registry.names() {
        let Ok(factory) = registry.factory(name) else {
            continue;
        };
        let schema = factory.schema();
        println!("{name}: {}", factory.description());
        for spec in &schema.params {
            let range = match &spec.kind {
                ParamKind::Int { min, max, step } => format!("{min}..={max} step {step}"),
                ParamKind::Float { min, max, step } => format!("{min}..={max} step {step}"),
                ParamKind::Choice { choices } => choices.join("|"),
                ParamKind::Bool => "true|false".to_string(),
            };
            println!(
                "  {:<14} default {:<10} grid {:<22} {}",
                spec.name,
                spec.default.to_string(),
                range,
                spec.description
            );
        }
        println!("  grid size: {}", schema.grid_size());
    }
    ExitCode::SUCCESS
}
