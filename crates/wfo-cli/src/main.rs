//! Walk-Forward CLI
//!
//! Optimizes a built-in strategy's parameters on historical bars with a
//! train/validation/test discipline and prints the held-out performance.

mod config;
mod performance_store;
mod report;

use anyhow::{bail, Context, Result};
use backtester::{BacktestConfig, HistoricalDataStore, MetricKind, StrategyRegistry, TimeResolution};
use clap::Parser;
use optimizer::{predefined_grid, OptimizerConfig, WalkForwardOptimizer};
use rust_decimal::Decimal;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::Settings;
use crate::performance_store::{PerformanceRecord, PerformanceStore};

#[derive(Parser, Debug)]
#[command(name = "walk-forward", version, about = "Walk-forward parameter optimization")]
struct Cli {
    /// Strategy name (e.g. sma_crossover)
    strategy: String,

    /// CSV file with timestamp,open,high,low,close,volume columns
    #[arg(long)]
    data: PathBuf,

    /// Symbol label used in reports and recorded rows
    #[arg(long, default_value = "UNKNOWN")]
    symbol: String,

    /// Bar timeframe (1m, 5m, 15m, 1h, 4h, 1d, 1w); inferred from the data when omitted
    #[arg(long)]
    timeframe: Option<String>,

    /// Metric to optimize
    #[arg(long)]
    metric: Option<String>,

    /// Initial capital
    #[arg(long)]
    capital: Option<Decimal>,

    /// Commission rate
    #[arg(long)]
    commission: Option<Decimal>,

    /// Slippage rate
    #[arg(long)]
    slippage: Option<Decimal>,

    /// Run a rolling walk-forward evaluation with this many windows instead
    #[arg(long)]
    splits: Option<usize>,

    /// Test window size for --splits, as a fraction of the series
    #[arg(long, default_value_t = 0.2)]
    test_size_pct: f64,

    /// Number of top validation results to list
    #[arg(long)]
    top: Option<usize>,

    /// Sweep worker threads
    #[arg(long)]
    workers: Option<usize>,

    /// Print the full result as JSON
    #[arg(long)]
    json: bool,

    /// Append the result to the performance store
    #[arg(long)]
    record: bool,

    /// Settings file (defaults to ./walk-forward.toml if present)
    #[arg(long)]
    config: Option<PathBuf>,
}

fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "walk_forward=info,optimizer=info,backtester=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let settings = Settings::load(cli.config.as_deref())?;
    run(cli, settings)
}

fn run(cli: Cli, settings: Settings) -> Result<()> {
    let registry = StrategyRegistry::with_builtin();
    let factory = registry
        .get(&cli.strategy)
        .with_context(|| format!("available strategies: {}", registry.names().join(", ")))?;
    let Some(grid) = predefined_grid(&cli.strategy) else {
        bail!("No parameter grid defined for {}", cli.strategy);
    };

    let bars = HistoricalDataStore::new(&cli.data)
        .load_bars()
        .with_context(|| format!("failed to load bars from {}", cli.data.display()))?;
    if bars.is_empty() {
        bail!("{} contains no bars", cli.data.display());
    }

    let resolution = match &cli.timeframe {
        Some(timeframe) => Some(timeframe.parse::<TimeResolution>()?),
        None => TimeResolution::infer(&bars),
    };
    let timeframe = resolution.map_or_else(|| "unknown".to_string(), |r| r.to_string());

    info!(
        strategy = %cli.strategy,
        symbol = %cli.symbol,
        timeframe = %timeframe,
        bars = bars.len(),
        start = %bars[0].timestamp,
        end = %bars[bars.len() - 1].timestamp,
        combinations = grid.len(),
        "Loaded data"
    );

    let metric: MetricKind = cli
        .metric
        .as_deref()
        .unwrap_or(&settings.metric)
        .parse()?;
    let backtest_config = BacktestConfig {
        initial_capital: cli.capital.unwrap_or(settings.capital),
        commission: cli.commission.unwrap_or(settings.commission),
        slippage: cli.slippage.unwrap_or(settings.slippage),
        resolution,
    };
    backtest_config.validate()?;

    let mut optimizer_config = OptimizerConfig::default().with_metric(metric);
    if let Some(workers) = cli.workers.or(settings.workers) {
        optimizer_config = optimizer_config.with_workers(workers);
    }
    let optimizer = WalkForwardOptimizer::new(optimizer_config)?;

    if let Some(splits) = cli.splits {
        let walk_forward = optimizer.walk_forward(
            &factory,
            &bars,
            &grid,
            &backtest_config,
            splits,
            cli.test_size_pct,
        )?;
        if cli.json {
            println!("{}", serde_json::to_string_pretty(&walk_forward)?);
        } else {
            print!("{}", report::render_walk_forward(&walk_forward));
        }
        return Ok(());
    }

    let result = optimizer.optimize(&factory, &bars, &grid, &backtest_config)?;
    if cli.json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        print!("{}", report::render_optimization(&result, cli.top.unwrap_or(settings.top)));
    }

    if cli.record {
        let now = chrono::Utc::now();
        let store = PerformanceStore::new(&settings.performance_store);
        store.record(PerformanceRecord::from_optimization(
            &result,
            &cli.symbol,
            &timeframe,
            now,
        ))?;
        let history = store.recent(Some(&[result.strategy_name.as_str()][..]), 90, now)?;
        info!(
            path = %store.path().display(),
            runs_last_90_days = history.len(),
            "Recorded performance"
        );
    }

    info!("Optimization complete");
    Ok(())
}
