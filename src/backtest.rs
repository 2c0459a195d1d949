#[cfg(test)]
use crate::config::WINDOW_LEN;
use crate::dataset::{PricePanel, PriceSeries};
use crate::estimators::{AssetVector, estimate};
use crate::evaluation::{TimeSeries, chain_segments, evaluate};
use crate::optimizer::{Strategy, StrategyWeights, optimize_all};
use anyhow::Result;
use clap::ValueEnum;
use rayon::prelude::*;
use std::ops::Range;
use tracing::{info, warn};

// ──────────────────────────────────────────────────────────────────────────────
// Configuration
// ──────────────────────────────────────────────────────────────────────────────

/// What to do with a window for which a variant produced no weights.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum InfeasiblePolicy {
    /// Leave the window out of that variant's series.
    SkipWindow,
    /// Hold the variant's most recent successful weights through the window.
    #[default]
    ReuseLastGood,
}

#[derive(Clone, Debug)]
pub struct BacktestConfig {
    pub window_len: usize,
    pub on_infeasible: InfeasiblePolicy,
}

#[cfg(test)]
impl Default for BacktestConfig {
    fn default() -> Self {
        Self {
            window_len: WINDOW_LEN,
            on_infeasible: InfeasiblePolicy::default(),
        }
    }
}

// ──────────────────────────────────────────────────────────────────────────────
// Windows
// ──────────────────────────────────────────────────────────────────────────────

/// Adjacent in-sample / out-of-sample row ranges of equal length.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WindowPair {
    pub index: usize,
    pub in_sample: Range<usize>,
    pub out_of_sample: Range<usize>,
}

/// Number of whole blocks of `window_len` rows both series can supply.
pub fn window_count(prices_len: usize, benchmark_len: usize, window_len: usize) -> usize {
    if window_len == 0 {
        return 0;
    }
    prices_len.min(benchmark_len) / window_len
}

/// Window pairs `i = 0..N-1`, each estimating on block `i` and evaluating on
/// block `i + 1`.
pub fn window_pairs(prices_len: usize, benchmark_len: usize, window_len: usize) -> Vec<WindowPair> {
    let blocks = window_count(prices_len, benchmark_len, window_len);
    (0..blocks.saturating_sub(1))
        .map(|i| WindowPair {
            index: i,
            in_sample: i * window_len..(i + 1) * window_len,
            out_of_sample: (i + 1) * window_len..(i + 2) * window_len,
        })
        .collect()
}

// ──────────────────────────────────────────────────────────────────────────────
// Results
// ──────────────────────────────────────────────────────────────────────────────

/// Weights solved for one window; immutable once produced.
#[derive(Clone, Debug)]
struct WindowSolution {
    pair: WindowPair,
    weights: StrategyWeights,
}

/// Out-of-sample segments of one variant, in chronological order.
#[derive(Clone, Debug)]
pub struct StrategyTrack {
    pub strategy: Strategy,
    pub segments: Vec<TimeSeries>,
    /// Windows left out because no weights were available.
    pub skipped: usize,
    /// Windows evaluated with weights carried over from an earlier window.
    pub reused: usize,
    last_good: Option<AssetVector>,
}

impl StrategyTrack {
    fn new(strategy: Strategy) -> Self {
        Self {
            strategy,
            segments: Vec::new(),
            skipped: 0,
            reused: 0,
            last_good: None,
        }
    }

    /// All segments joined end to end.
    pub fn concatenated(&self) -> TimeSeries {
        let mut out = TimeSeries::default();
        for segment in &self.segments {
            out.extend(segment);
        }
        out
    }

    /// Segments compounded into a single growth path.
    pub fn compounded(&self) -> TimeSeries {
        chain_segments(&self.segments)
    }
}

#[derive(Clone, Debug)]
pub struct BacktestReport {
    pub windows: usize,
    pub tracks: Vec<StrategyTrack>,
    pub benchmark_segments: Vec<TimeSeries>,
}

impl BacktestReport {
    pub fn track(&self, strategy: Strategy) -> &StrategyTrack {
        &self.tracks[strategy.index()]
    }

    pub fn benchmark_concatenated(&self) -> TimeSeries {
        let mut out = TimeSeries::default();
        for segment in &self.benchmark_segments {
            out.extend(segment);
        }
        out
    }

    pub fn benchmark_compounded(&self) -> TimeSeries {
        chain_segments(&self.benchmark_segments)
    }
}

// ──────────────────────────────────────────────────────────────────────────────
// Walk-Forward Loop
// ──────────────────────────────────────────────────────────────────────────────

/// Estimates and optimizes all variants on one in-sample slice. An estimation
/// failure leaves every variant without weights for the window.
fn solve_window(prices: &PricePanel, benchmark: &PriceSeries) -> StrategyWeights {
    let estimates = match estimate(prices, benchmark) {
        Ok(e) => e,
        Err(e) => {
            warn!("Estimation failed: {}", e);
            return StrategyWeights::default();
        }
    };
    match optimize_all(&estimates) {
        Ok(weights) => weights,
        Err(e) => {
            warn!("Optimization failed: {}", e);
            StrategyWeights::default()
        }
    }
}

/// Walk-forward backtest of all three variants.
pub fn run_backtest(prices: &PricePanel, benchmark: &PriceSeries, config: &BacktestConfig) -> Result<BacktestReport> {
    run_backtest_with(prices, benchmark, config, solve_window)
}

/// Walk-forward loop with a pluggable per-window solver.
///
/// Windows are solved in parallel; evaluation, the infeasibility policy and
/// concatenation then run in window order.
pub fn run_backtest_with<F>(
    prices: &PricePanel,
    benchmark: &PriceSeries,
    config: &BacktestConfig,
    solver: F,
) -> Result<BacktestReport>
where
    F: Fn(&PricePanel, &PriceSeries) -> StrategyWeights + Sync,
{
    if config.window_len < 3 {
        return Err(anyhow::anyhow!(
            "Window length must be >= 3, got {}",
            config.window_len
        ));
    }
    let pairs = window_pairs(prices.len(), benchmark.len(), config.window_len);
    if pairs.is_empty() {
        return Err(anyhow::anyhow!(
            "Not enough data for rolling backtest: need at least {} rows, got {}",
            2 * config.window_len,
            prices.len().min(benchmark.len())
        ));
    }

    info!(
        "Running rolling backtest... windows={}, window_len={}, policy={:?}",
        pairs.len(),
        config.window_len,
        config.on_infeasible
    );

    let solutions: Vec<WindowSolution> = pairs
        .into_par_iter()
        .map(|pair| {
            let weights = solver(
                &prices.slice(pair.in_sample.clone()),
                &benchmark.slice(pair.in_sample.clone()),
            );
            WindowSolution { pair, weights }
        })
        .collect();

    let mut tracks: Vec<StrategyTrack> = Strategy::ALL.iter().map(|&s| StrategyTrack::new(s)).collect();
    let mut benchmark_segments = Vec::with_capacity(solutions.len());

    for solution in &solutions {
        let out_prices = prices.slice(solution.pair.out_of_sample.clone());
        let out_bench = benchmark.slice(solution.pair.out_of_sample.clone());

        let mut bench_segment = None;
        for track in tracks.iter_mut() {
            let weights = match solution.weights.get(track.strategy) {
                Some(w) => {
                    track.last_good = Some(w.clone());
                    w.clone()
                }
                None => match (track.last_good.clone(), config.on_infeasible) {
                    (Some(w), InfeasiblePolicy::ReuseLastGood) => {
                        track.reused += 1;
                        warn!(
                            "Window {}: {} reusing last good weights",
                            solution.pair.index + 1,
                            track.strategy.label()
                        );
                        w
                    }
                    _ => {
                        track.skipped += 1;
                        warn!(
                            "Window {}: {} skipped (no weights)",
                            solution.pair.index + 1,
                            track.strategy.label()
                        );
                        continue;
                    }
                },
            };

            let perf = evaluate(&out_prices, &out_bench, &weights)?;
            track.segments.push(perf.portfolio);
            bench_segment.get_or_insert(perf.benchmark);
        }

        let bench_segment = match bench_segment {
            Some(s) => s,
            None => benchmark_growth(&out_prices, &out_bench)?,
        };
        benchmark_segments.push(bench_segment);

        info!(
            "Window {:>2}/{:>2}: in-sample {:?}, out-of-sample {:?}",
            solution.pair.index + 1,
            solutions.len(),
            solution.pair.in_sample,
            solution.pair.out_of_sample
        );
    }

    for track in &tracks {
        info!(
            "{}: {} segments, {} skipped, {} reused",
            track.strategy.label(),
            track.segments.len(),
            track.skipped,
            track.reused
        );
    }

    Ok(BacktestReport {
        windows: solutions.len(),
        tracks,
        benchmark_segments,
    })
}

/// Benchmark growth for a window in which no variant was evaluated.
fn benchmark_growth(prices: &PricePanel, benchmark: &PriceSeries) -> Result<TimeSeries> {
    let equal = vec![1.0 / prices.n_assets().max(1) as f64; prices.n_assets()];
    let weights = AssetVector::new(prices.assets.clone(), equal)?;
    Ok(evaluate(prices, benchmark, &weights)?.benchmark)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::StockData;
    use approx::assert_relative_eq;

    fn mock_inputs(days: usize) -> (PricePanel, PriceSeries) {
        let histories: Vec<StockData> = (0..3)
            .map(|i| StockData::new_mock(&format!("S{}", i), days, 0.0003, 0.01 + 0.004 * i as f64, 100 + i as u64))
            .collect();
        let panel = PricePanel::from_histories(&histories).unwrap();
        let bench = PriceSeries::from_stock_data(&StockData::new_mock("^GSPC", days, 0.0002, 0.008, 42));
        (panel, bench)
    }

    fn equal_weights(prices: &PricePanel) -> AssetVector {
        let n = prices.n_assets();
        AssetVector::new(prices.assets.clone(), vec![1.0 / n as f64; n]).unwrap()
    }

    fn all_variants(prices: &PricePanel, _: &PriceSeries) -> StrategyWeights {
        let w = equal_weights(prices);
        StrategyWeights {
            weights: [Some(w.clone()), Some(w.clone()), Some(w)],
        }
    }

    #[test]
    fn test_window_count_uses_shorter_series() {
        assert_eq!(window_count(270, 300, 90), 3);
        let pairs = window_pairs(270, 300, 90);
        assert_eq!(pairs.len(), 2);
        assert_eq!(pairs[0].in_sample, 0..90);
        assert_eq!(pairs[0].out_of_sample, 90..180);
        assert_eq!(pairs[1].in_sample, 90..180);
        assert_eq!(pairs[1].out_of_sample, 180..270);
    }

    #[test]
    fn test_window_pairs_handle_short_history() {
        assert!(window_pairs(100, 100, 90).is_empty());
        assert!(window_pairs(0, 0, 90).is_empty());
        assert_eq!(window_count(500, 500, 0), 0);
    }

    #[test]
    fn test_three_iterations_concatenate_in_order() {
        // Asset i compounds at a constant daily rate, so an equal-weighted
        // portfolio earns the mean rate every period.
        let rates = [0.001, 0.002, -0.0005];
        let bench_rate = 0.0004;
        let days = 4 * WINDOW_LEN;
        let start = chrono::NaiveDate::from_ymd_opt(2021, 1, 4).unwrap();
        let dates: Vec<_> = (0..days).map(|i| start + chrono::Duration::days(i as i64)).collect();
        let grow = |g: f64| -> Vec<f64> { (0..days).map(|t| 100.0 * (1.0 + g).powi(t as i32)).collect() };
        let panel = PricePanel::new(
            dates.clone(),
            vec!["G0".into(), "G1".into(), "G2".into()],
            rates.iter().map(|&g| grow(g)).collect(),
        )
        .unwrap();
        let bench = PriceSeries {
            symbol: "^GSPC".into(),
            dates,
            values: grow(bench_rate),
        };

        let report = run_backtest_with(&panel, &bench, &BacktestConfig::default(), all_variants).unwrap();
        assert_eq!(report.windows, 3);

        let mean_rate = rates.iter().sum::<f64>() / rates.len() as f64;
        let expected: Vec<f64> = (0..3)
            .flat_map(|_| (1..WINDOW_LEN).map(|k| (1.0 + mean_rate).powi(k as i32)))
            .collect();
        for strategy in Strategy::ALL {
            let series = report.track(strategy).concatenated();
            assert_eq!(series.len(), 3 * (WINDOW_LEN - 1));
            assert!(series.dates.windows(2).all(|d| d[0] < d[1]));
            assert_eq!(series.dates[0], panel.dates[WINDOW_LEN + 1]);
            assert_eq!(series.dates[WINDOW_LEN - 1], panel.dates[2 * WINDOW_LEN + 1]);
            for (got, want) in series.values.iter().zip(&expected) {
                assert_relative_eq!(*got, *want, max_relative = 1e-10);
            }

            let compounded = report.track(strategy).compounded();
            let end = (1.0 + mean_rate).powi(3 * (WINDOW_LEN as i32 - 1));
            assert_relative_eq!(compounded.last().unwrap(), end, max_relative = 1e-10);
        }

        let bench_series = report.benchmark_concatenated();
        assert_eq!(bench_series.len(), 3 * (WINDOW_LEN - 1));
        assert_relative_eq!(bench_series.values[0], 1.0 + bench_rate, max_relative = 1e-12);
        assert_relative_eq!(
            bench_series.values[WINDOW_LEN - 2],
            (1.0 + bench_rate).powi(WINDOW_LEN as i32 - 1),
            max_relative = 1e-10
        );
    }

    #[test]
    fn test_reuse_last_good_fills_failed_window() {
        let (panel, bench) = mock_inputs(360);
        let second_block_start = panel.dates[WINDOW_LEN];
        // Only the long-only variant fails, and only in the second window.
        let solver = |prices: &PricePanel, b: &PriceSeries| {
            let mut w = all_variants(prices, b);
            if prices.dates[0] == second_block_start {
                w.weights[Strategy::LongOnly.index()] = None;
            }
            w
        };

        let reuse = run_backtest_with(&panel, &bench, &BacktestConfig::default(), solver).unwrap();
        let track = reuse.track(Strategy::LongOnly);
        assert_eq!(track.segments.len(), 3);
        assert_eq!((track.skipped, track.reused), (0, 1));

        let config = BacktestConfig {
            on_infeasible: InfeasiblePolicy::SkipWindow,
            ..BacktestConfig::default()
        };
        let skip = run_backtest_with(&panel, &bench, &config, solver).unwrap();
        let track = skip.track(Strategy::LongOnly);
        assert_eq!(track.segments.len(), 2);
        assert_eq!((track.skipped, track.reused), (1, 0));
        assert_eq!(skip.track(Strategy::Mix130_30).segments.len(), 3);
    }

    #[test]
    fn test_first_window_failure_is_skipped_even_when_reusing() {
        let (panel, bench) = mock_inputs(270);
        let none = |_: &PricePanel, _: &PriceSeries| StrategyWeights::default();
        let report = run_backtest_with(&panel, &bench, &BacktestConfig::default(), none).unwrap();

        for track in &report.tracks {
            assert!(track.segments.is_empty());
            assert_eq!(track.skipped, 2);
        }
        assert_eq!(report.benchmark_segments.len(), 2);
        assert!(report.benchmark_segments.iter().all(|s| s.len() == WINDOW_LEN - 1));
    }

    #[test]
    fn test_full_pipeline_accounts_for_every_window() {
        let (panel, bench) = mock_inputs(270);
        let report = run_backtest(&panel, &bench, &BacktestConfig::default()).unwrap();
        for track in &report.tracks {
            assert_eq!(track.segments.len() + track.skipped, report.windows);
            assert!(track.segments.iter().all(|s| s.len() == WINDOW_LEN - 1));
            assert!(track.concatenated().values.iter().all(|v| v.is_finite()));
        }
    }

    #[test]
    fn test_factor_universe_produces_a_segment_per_window() {
        let (assets, market) = StockData::factor_universe(8, 4 * WINDOW_LEN, 21);
        let panel = PricePanel::from_histories(&assets).unwrap();
        let bench = PriceSeries::from_stock_data(&market);

        let report = run_backtest(&panel, &bench, &BacktestConfig::default()).unwrap();
        assert_eq!(report.windows, 3);
        for strategy in Strategy::ALL {
            let track = report.track(strategy);
            assert_eq!(track.segments.len(), 3, "{} lost windows", strategy.label());
            assert_eq!((track.skipped, track.reused), (0, 0));
            assert!(track.compounded().values.iter().all(|v| v.is_finite() && *v > 0.0));
        }
    }

    #[test]
    fn test_too_short_history_is_an_error() {
        let (panel, bench) = mock_inputs(120);
        assert!(run_backtest_with(&panel, &bench, &BacktestConfig::default(), all_variants).is_err());
    }
}
