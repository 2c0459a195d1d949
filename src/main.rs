mod backtest;
mod chart;
mod config;
mod data;
mod dataset;
mod estimators;
mod evaluation;
mod optimizer;
mod qp;
mod report;
mod storage;

use anyhow::Result;
use backtest::{BacktestConfig, InfeasiblePolicy};
use clap::Parser;
use config::{
    BENCHMARK_CALIBRATION_FILE, BENCHMARK_DATA_FILE, BENCHMARK_SYMBOL, BENCHMARK_TEST_FILE,
    CALIBRATION_DATA_FILE, CALIBRATION_RATIO, DEFAULT_OUTPUT_DIR, HISTORY_RANGE, PRICE_DATA_FILE,
    ROLLING_CHART_PREFIX, SINGLE_SPLIT_CHART_PREFIX, TEST_DATA_FILE, WINDOW_LEN, output_file_path,
};
use data::YahooSource;
use dataset::{PricePanel, PriceSeries, Screening};
use optimizer::Strategy;
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Active portfolio construction: momentum-tilted mean-variance optimization with a walk-forward backtest",
    after_help = "EXAMPLES:
    # Prompt for the ticker file
    cargo run --release

    # Full run with a ticker list
    cargo run --release -- --tickers tickers.csv

    # Shorter rebalancing windows, skipping windows without a solution
    cargo run --release -- --tickers tickers.csv --window-len 60 --on-infeasible skip-window"
)]
struct Args {
    /// Ticker list, one identifier per line (first comma-separated field). Prompted for when absent.
    #[arg(long)]
    tickers: Option<PathBuf>,

    /// Market proxy for betas and performance comparison
    #[arg(long, default_value = BENCHMARK_SYMBOL)]
    benchmark: String,

    /// In-sample and out-of-sample block length in trading days for the rolling backtest
    #[arg(long, default_value_t = WINDOW_LEN)]
    window_len: usize,

    /// What to do when an optimizer variant produces no weights in a rolling window
    #[arg(long, value_enum, default_value_t = InfeasiblePolicy::ReuseLastGood)]
    on_infeasible: InfeasiblePolicy,

    /// Directory for CSV data and HTML charts
    #[arg(long, default_value = DEFAULT_OUTPUT_DIR)]
    output_dir: PathBuf,

    /// Only run the single calibration/test split
    #[arg(long)]
    skip_rolling: bool,
}

#[tokio::main]
async fn main() {
    config::init_cpu_parallelism();

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("active_portfolio=info"));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();
    let args = Args::parse();

    match run(args).await {
        Ok(_) => info!("Run completed."),
        Err(e) => {
            error!("Run failed: {}", e);
            std::process::exit(1);
        }
    }
}

fn prompt_ticker_path() -> Result<PathBuf> {
    print!("Enter the path of the ticker file: ");
    io::stdout().flush()?;
    let mut line = String::new();
    io::stdin().lock().read_line(&mut line)?;
    let path = line.trim();
    if path.is_empty() {
        return Err(anyhow::anyhow!("No ticker file given"));
    }
    Ok(PathBuf::from(path))
}

async fn run(args: Args) -> Result<()> {
    let ticker_path = match &args.tickers {
        Some(p) => p.clone(),
        None => prompt_ticker_path()?,
    };
    let candidates = data::load_tickers(&ticker_path)?;
    if candidates.is_empty() {
        return Err(anyhow::anyhow!("Ticker file {} lists no identifiers", ticker_path.display()));
    }
    info!("Loaded {} candidate identifiers from {}", candidates.len(), ticker_path.display());

    // ── Data ────────────────────────────────────────────────────────────────
    let source = YahooSource::new(HISTORY_RANGE)?;
    info!("* Screening universe...");
    let universe = dataset::build_universe(&source, &candidates).await?;
    if universe.panel.n_assets() == 0 {
        return Err(anyhow::anyhow!("No identifier passed screening with a complete history"));
    }
    let rejected = universe
        .screenings
        .iter()
        .filter(|(_, s)| *s == Screening::Rejected)
        .count();
    let failed = universe
        .screenings
        .iter()
        .filter(|(_, s)| matches!(s, Screening::Failed(_)))
        .count();
    info!(
        "Universe: {} accepted, {} rejected, {} failed, {} with complete history",
        universe.selected.len(),
        rejected,
        failed,
        universe.panel.n_assets()
    );

    info!("* Fetching benchmark {}...", args.benchmark);
    let benchmark = dataset::fetch_benchmark(&source, &args.benchmark).await?;
    let (prices, benchmark) = dataset::align(&universe.panel, &benchmark)?;
    if prices.is_empty() {
        return Err(anyhow::anyhow!("No common dates between the universe and {}", benchmark.symbol));
    }
    info!("Aligned history: {} rows x {} assets", prices.len(), prices.n_assets());

    let out = args.output_dir.as_path();
    storage::write_panel_csv(&output_file_path(out, PRICE_DATA_FILE)?, &prices)?;
    storage::write_series_csv(&output_file_path(out, BENCHMARK_DATA_FILE)?, &benchmark)?;

    // ── Single split ────────────────────────────────────────────────────────
    run_single_split(out, &prices, &benchmark)?;

    // ── Walk-forward ────────────────────────────────────────────────────────
    if args.skip_rolling {
        info!("Skipping rolling backtest.");
        return Ok(());
    }
    let config = BacktestConfig {
        window_len: args.window_len,
        on_infeasible: args.on_infeasible,
    };
    run_rolling(out, &prices, &benchmark, &config)
}

fn chart_path(out: &Path, prefix: &str, strategy: Strategy) -> Result<PathBuf> {
    Ok(output_file_path(out, &format!("{}_{}_Chart.html", prefix, strategy.file_stem()))?)
}

fn run_single_split(out: &Path, prices: &PricePanel, benchmark: &PriceSeries) -> Result<()> {
    let split = dataset::split_point(prices.len(), CALIBRATION_RATIO);
    let calibration = prices.slice(0..split);
    let test = prices.slice(split..prices.len());
    let bench_calibration = benchmark.slice(0..split);
    let bench_test = benchmark.slice(split..benchmark.len());
    info!("Calibration rows: {}, test rows: {}", calibration.len(), test.len());

    storage::write_panel_csv(&output_file_path(out, CALIBRATION_DATA_FILE)?, &calibration)?;
    storage::write_panel_csv(&output_file_path(out, TEST_DATA_FILE)?, &test)?;
    storage::write_series_csv(&output_file_path(out, BENCHMARK_CALIBRATION_FILE)?, &bench_calibration)?;
    storage::write_series_csv(&output_file_path(out, BENCHMARK_TEST_FILE)?, &bench_test)?;

    info!("* Estimating covariance, betas and momentum scores...");
    let estimates = estimators::estimate(&calibration, &bench_calibration)?;
    report::print_estimates(&estimates);

    let mut rows = Vec::new();
    let mut bench_growth = None;
    for strategy in Strategy::ALL {
        let weights = optimizer::optimize_required(&estimates, strategy)?;
        report::print_weights(strategy.label(), &weights);

        let perf = evaluation::evaluate(&test, &bench_test, &weights)?;
        chart::save_growth_chart(
            &chart_path(out, SINGLE_SPLIT_CHART_PREFIX, strategy)?,
            &perf.portfolio,
            &perf.benchmark,
            &benchmark.symbol,
        )?;
        rows.push((strategy.label().to_string(), report::summarize(&perf.portfolio)));
        bench_growth.get_or_insert(perf.benchmark);
    }
    if let Some(growth) = &bench_growth {
        rows.push((benchmark.symbol.clone(), report::summarize(growth)));
    }
    report::print_performance("Out-of-Sample Performance (single split)", &rows);
    Ok(())
}

fn run_rolling(out: &Path, prices: &PricePanel, benchmark: &PriceSeries, config: &BacktestConfig) -> Result<()> {
    let result = backtest::run_backtest(prices, benchmark, config)?;
    let bench_series = result.benchmark_concatenated();

    let mut rows = Vec::new();
    for strategy in Strategy::ALL {
        let track = result.track(strategy);
        let series = track.concatenated();
        if series.is_empty() {
            info!("{}: no evaluated windows, chart not written", track.strategy.label());
        } else {
            chart::save_growth_chart(
                &chart_path(out, ROLLING_CHART_PREFIX, track.strategy)?,
                &series,
                &bench_series,
                &benchmark.symbol,
            )?;
        }
        rows.push((
            format!("{} ({}/{})", track.strategy.label(), track.segments.len(), result.windows),
            report::summarize(&track.compounded()),
        ));
    }
    rows.push((benchmark.symbol.clone(), report::summarize(&result.benchmark_compounded())));
    report::print_performance("Walk-Forward Performance (chained windows)", &rows);

    for strategy in Strategy::ALL {
        let track = result.track(strategy);
        info!(
            "{}: {} windows skipped, {} reused last good weights",
            track.strategy.label(),
            track.skipped,
            track.reused
        );
    }
    Ok(())
}
