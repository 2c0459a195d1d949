use rayon::ThreadPoolBuilder;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use tracing::{info, warn};

static RAYON_INIT: OnceLock<()> = OnceLock::new();

pub fn init_cpu_parallelism() {
    RAYON_INIT.get_or_init(|| {
        let num_threads = num_cpus::get().max(1);
        match ThreadPoolBuilder::new().num_threads(num_threads).build_global() {
            Ok(_) => info!(
                "Initialized Rayon thread pool with {} threads (all logical CPU cores)",
                num_threads
            ),
            Err(e) => warn!(
                "Rayon thread pool already initialized or unavailable ({}). Using existing configuration.",
                e
            ),
        }
    });
}

// ── Universe Filter ─────────────────────────────────────────────────────────
/// Minimum market capitalization for an identifier to enter the universe.
pub const MIN_MARKET_CAP: f64 = 2e6;
/// Minimum average daily dollar volume (average volume × last price).
pub const MIN_DOLLAR_VOLUME: f64 = 2e7;
/// Lookback requested from the market data source for every close series.
pub const HISTORY_RANGE: &str = "5y";
/// Market proxy used for beta estimation and as the performance benchmark.
pub const BENCHMARK_SYMBOL: &str = "^GSPC";

// ── Estimation ──────────────────────────────────────────────────────────────
/// Trailing return observations used for the momentum score.
pub const MOMENTUM_LOOKBACK: usize = 90;
/// Share of the history used as calibration data in the single-split phase.
pub const CALIBRATION_RATIO: f64 = 0.6;
/// Benchmark return variance below which the intercept regression is degenerate.
pub const DEGENERATE_VARIANCE: f64 = 1e-18;

// ── Optimization ────────────────────────────────────────────────────────────
pub const LONG_ONLY_MAX_ITER: usize = 800;
pub const LONG_SHORT_MAX_ITER: usize = 500;
pub const MIX_MAX_ITER: usize = 500;
/// Per-asset cap for the long-short variant.
pub const LONG_SHORT_UPPER: f64 = 1.0;
/// Per-asset bounds for the 130/30 variant.
pub const MIX_UPPER: f64 = 1.3;
pub const MIX_LOWER: f64 = -0.3;
/// Portfolio beta target enforced as an equality constraint.
pub const BETA_TARGET: f64 = 1.0;

// ── Walk-Forward ────────────────────────────────────────────────────────────
/// Length in trading days of each in-sample and out-of-sample block.
pub const WINDOW_LEN: usize = 90;
/// Annual trading days for annualization.
pub const TRADING_DAYS: f64 = 252.0;

// ── Output Artifacts ────────────────────────────────────────────────────────
pub const DEFAULT_OUTPUT_DIR: &str = "output";
pub const PRICE_DATA_FILE: &str = "Price_Data.csv";
pub const CALIBRATION_DATA_FILE: &str = "Calibration_Data.csv";
pub const TEST_DATA_FILE: &str = "Test_Data.csv";
pub const BENCHMARK_DATA_FILE: &str = "Benchmark_Data.csv";
pub const BENCHMARK_CALIBRATION_FILE: &str = "Benchmark_Calibration_Data.csv";
pub const BENCHMARK_TEST_FILE: &str = "Benchmark_Test_Data.csv";
/// Chart file name prefixes for the two evaluation phases.
pub const SINGLE_SPLIT_CHART_PREFIX: &str = "NR";
pub const ROLLING_CHART_PREFIX: &str = "Rolling";

/// Directory holding cached Yahoo chart responses.
pub fn cache_dir() -> PathBuf {
    PathBuf::from(".cache")
}

/// Creates `dir` if needed and returns the path of `file_name` inside it.
pub fn output_file_path(dir: &Path, file_name: &str) -> std::io::Result<PathBuf> {
    if !dir.exists() {
        std::fs::create_dir_all(dir)?;
    }
    Ok(dir.join(file_name))
}
