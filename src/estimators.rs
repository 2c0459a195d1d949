use crate::config::{DEGENERATE_VARIANCE, MOMENTUM_LOOKBACK};
use crate::dataset::{PricePanel, PriceSeries};
use anyhow::Result;
use tracing::debug;

// ──────────────────────────────────────────────────────────────────────────────
// Data Structures
// ──────────────────────────────────────────────────────────────────────────────

/// One value per asset, in the order of `assets`.
#[derive(Clone, Debug, PartialEq)]
pub struct AssetVector {
    pub assets: Vec<String>,
    pub values: Vec<f64>,
}

impl AssetVector {
    pub fn new(assets: Vec<String>, values: Vec<f64>) -> Result<Self> {
        if assets.len() != values.len() {
            return Err(anyhow::anyhow!(
                "{} assets but {} values",
                assets.len(),
                values.len()
            ));
        }
        Ok(Self { assets, values })
    }

    #[cfg(test)]
    pub fn get(&self, asset: &str) -> Option<f64> {
        self.assets.iter().position(|a| a == asset).map(|i| self.values[i])
    }

    pub fn sum(&self) -> f64 {
        self.values.iter().sum()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.assets.iter().map(String::as_str).zip(self.values.iter().copied())
    }
}

/// Sample covariance of simple returns over one estimation window.
#[derive(Clone, Debug, PartialEq)]
pub struct Covariance {
    pub assets: Vec<String>,
    pub matrix: Vec<Vec<f64>>,
}

/// Everything the optimizer needs from one estimation window.
#[derive(Clone, Debug)]
pub struct Estimates {
    pub covariance: Covariance,
    pub betas: AssetVector,
    pub scores: AssetVector,
}

fn mean(values: &[f64]) -> f64 {
    values.iter().sum::<f64>() / values.len() as f64
}

// ──────────────────────────────────────────────────────────────────────────────
// Covariance
// ──────────────────────────────────────────────────────────────────────────────

/// Sample covariance (denominator `n - 1`) of the panel's simple returns.
pub fn covariance_matrix(prices: &PricePanel) -> Result<Covariance> {
    let returns = prices.returns();
    let n_obs = prices.len().saturating_sub(1);
    if n_obs < 2 {
        return Err(anyhow::anyhow!(
            "Covariance needs at least 2 return observations, got {}",
            n_obs
        ));
    }

    let n = returns.len();
    let means: Vec<f64> = returns.iter().map(|r| mean(r)).collect();
    let mut cov = vec![vec![0.0; n]; n];
    for i in 0..n {
        for j in i..n {
            let sum: f64 = returns[i]
                .iter()
                .zip(&returns[j])
                .map(|(ri, rj)| (ri - means[i]) * (rj - means[j]))
                .sum();
            let covariance = sum / (n_obs as f64 - 1.0);
            cov[i][j] = covariance;
            cov[j][i] = covariance;
        }
    }

    Ok(Covariance {
        assets: prices.assets.clone(),
        matrix: cov,
    })
}

// ──────────────────────────────────────────────────────────────────────────────
// Beta
// ──────────────────────────────────────────────────────────────────────────────

/// Slope of `y` regressed on `x` with an intercept.
///
/// When `x` has (numerically) no variance the intercept model is undefined and
/// the regression through the origin `Σxy / Σxx` is used instead.
pub fn regression_slope(x: &[f64], y: &[f64]) -> Result<f64> {
    if x.len() != y.len() {
        return Err(anyhow::anyhow!(
            "Regression series differ in length ({} vs {})",
            x.len(),
            y.len()
        ));
    }
    if x.len() < 2 {
        return Err(anyhow::anyhow!("Regression needs at least 2 observations"));
    }

    let x_mean = mean(x);
    let x_var = x.iter().map(|v| (v - x_mean).powi(2)).sum::<f64>() / x.len() as f64;
    if x_var > DEGENERATE_VARIANCE {
        let (slope, _intercept): (f64, f64) = linreg::linear_regression(x, y)
            .map_err(|e| anyhow::anyhow!("Linear regression failed: {:?}", e))?;
        return Ok(slope);
    }

    let sxx: f64 = x.iter().map(|v| v * v).sum();
    if sxx == 0.0 {
        return Err(anyhow::anyhow!("Benchmark returns are identically zero"));
    }
    debug!("Degenerate benchmark variance, regressing through the origin");
    let sxy: f64 = x.iter().zip(y).map(|(a, b)| a * b).sum();
    Ok(sxy / sxx)
}

/// Per-asset market beta: each asset's returns regressed independently on the
/// benchmark's returns over the same window.
pub fn beta_estimator(benchmark: &PriceSeries, prices: &PricePanel) -> Result<AssetVector> {
    if benchmark.len() != prices.len() {
        return Err(anyhow::anyhow!(
            "Benchmark window has {} rows, price window has {}",
            benchmark.len(),
            prices.len()
        ));
    }
    let bench_returns = benchmark.returns();
    let betas = prices
        .returns()
        .iter()
        .zip(&prices.assets)
        .map(|(r, asset)| {
            regression_slope(&bench_returns, r)
                .map_err(|e| anyhow::anyhow!("Beta estimation failed for {}: {}", asset, e))
        })
        .collect::<Result<Vec<f64>>>()?;
    AssetVector::new(prices.assets.clone(), betas)
}

// ──────────────────────────────────────────────────────────────────────────────
// Momentum
// ──────────────────────────────────────────────────────────────────────────────

/// Momentum score per asset: rank of the trailing mean return (rank 1 =
/// highest mean) divided by the number of assets. Ties rank by identifier.
///
/// Windows shorter than the lookback use every available return.
pub fn momentum_scores(prices: &PricePanel, lookback: usize) -> Result<AssetVector> {
    let returns = prices.returns();
    let n_obs = prices.len().saturating_sub(1);
    if n_obs == 0 {
        return Err(anyhow::anyhow!("Momentum needs at least 1 return observation"));
    }
    if n_obs < lookback {
        debug!("Momentum window has {} returns (< {}), using all", n_obs, lookback);
    }
    let start = n_obs.saturating_sub(lookback);
    let trailing: Vec<f64> = returns.iter().map(|r| mean(&r[start..])).collect();

    let mut order: Vec<usize> = (0..trailing.len()).collect();
    order.sort_by(|&a, &b| {
        trailing[b]
            .total_cmp(&trailing[a])
            .then_with(|| prices.assets[a].cmp(&prices.assets[b]))
    });

    let n = trailing.len() as f64;
    let mut scores = vec![0.0; trailing.len()];
    for (rank, &idx) in order.iter().enumerate() {
        scores[idx] = (rank + 1) as f64 / n;
    }
    AssetVector::new(prices.assets.clone(), scores)
}

/// Runs covariance, beta and momentum estimation on one window.
pub fn estimate(prices: &PricePanel, benchmark: &PriceSeries) -> Result<Estimates> {
    Ok(Estimates {
        covariance: covariance_matrix(prices)?,
        betas: beta_estimator(benchmark, prices)?,
        scores: momentum_scores(prices, MOMENTUM_LOOKBACK)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::StockData;
    use approx::assert_relative_eq;
    use chrono::NaiveDate;

    fn start() -> NaiveDate {
        NaiveDate::from_ymd_opt(2022, 1, 3).unwrap()
    }

    fn mock_panel(n_assets: usize, days: usize) -> PricePanel {
        let histories: Vec<StockData> = (0..n_assets)
            .map(|i| StockData::new_mock(&format!("A{}", i), days, 0.0004 * i as f64, 0.01 + 0.005 * i as f64, 11 + i as u64))
            .collect();
        PricePanel::from_histories(&histories).unwrap()
    }

    fn series_from(panel: &PricePanel, column: usize) -> PriceSeries {
        PriceSeries {
            symbol: "BENCH".to_string(),
            dates: panel.dates.clone(),
            values: panel.columns[column].clone(),
        }
    }

    #[test]
    fn test_covariance_matrix_symmetry() {
        let panel = mock_panel(4, 120);
        let cov = covariance_matrix(&panel).unwrap();

        assert_eq!(cov.assets, panel.assets);
        for i in 0..4 {
            assert!(cov.matrix[i][i] >= 0.0, "Variance should be non-negative");
            for j in 0..4 {
                assert!(
                    (cov.matrix[i][j] - cov.matrix[j][i]).abs() < 1e-15,
                    "Covariance matrix should be symmetric"
                );
            }
        }
    }

    #[test]
    fn test_covariance_matches_hand_computation() {
        // Returns: A = [0.1, -0.1, 0.2], B = [0.0, 0.1, 0.1]
        let panel = PricePanel::new(
            (0..4).map(|i| start() + chrono::Duration::days(i)).collect(),
            vec!["A".into(), "B".into()],
            vec![vec![100.0, 110.0, 99.0, 118.8], vec![10.0, 10.0, 11.0, 12.1]],
        )
        .unwrap();
        let cov = covariance_matrix(&panel).unwrap();

        // mean A = 0.0667, var A = ((0.0333)^2 + (0.1667)^2 + (0.1333)^2) / 2
        assert_relative_eq!(cov.matrix[0][0], 0.023333333333, epsilon = 1e-9);
        assert_relative_eq!(cov.matrix[1][1], 0.003333333333, epsilon = 1e-9);
        assert_relative_eq!(cov.matrix[0][1], -0.001666666667, epsilon = 1e-9);
    }

    #[test]
    fn test_covariance_needs_two_returns() {
        let panel = mock_panel(2, 2);
        assert!(covariance_matrix(&panel).is_err());
    }

    #[test]
    fn test_benchmark_against_itself_has_unit_beta() {
        let panel = mock_panel(3, 90);
        let bench = series_from(&panel, 2);
        let betas = beta_estimator(&bench, &panel).unwrap();
        assert_relative_eq!(betas.get("A2").unwrap(), 1.0, epsilon = 1e-10);
    }

    #[test]
    fn test_beta_recovers_linear_exposure() {
        let x = vec![0.01, -0.02, 0.015, 0.003, -0.007];
        let y: Vec<f64> = x.iter().map(|v| 0.001 + 1.5 * v).collect();
        assert_relative_eq!(regression_slope(&x, &y).unwrap(), 1.5, epsilon = 1e-10);
    }

    #[test]
    fn test_constant_benchmark_returns_fall_back_to_origin_regression() {
        let x = vec![0.01; 10];
        let y = vec![0.02; 10];
        assert_relative_eq!(regression_slope(&x, &y).unwrap(), 2.0, epsilon = 1e-12);
        assert!(regression_slope(&[0.0; 5], &[0.01; 5]).is_err());
    }

    #[test]
    fn test_beta_rejects_misaligned_windows() {
        let panel = mock_panel(2, 30);
        let mut bench = series_from(&panel, 0);
        bench.values.pop();
        bench.dates.pop();
        assert!(beta_estimator(&bench, &panel).is_err());
    }

    #[test]
    fn test_momentum_scores_form_a_permutation() {
        let panel = mock_panel(5, 120);
        let scores = momentum_scores(&panel, MOMENTUM_LOOKBACK).unwrap();

        let mut sorted = scores.values.clone();
        sorted.sort_by(|a, b| a.total_cmp(b));
        for (k, s) in sorted.iter().enumerate() {
            assert_relative_eq!(*s, (k + 1) as f64 / 5.0);
        }
    }

    #[test]
    fn test_momentum_ranks_highest_mean_first() {
        // Daily growth 3%, 1%, 2%, flat.
        let growth: [f64; 4] = [1.03, 1.01, 1.02, 1.0];
        let columns: Vec<Vec<f64>> = growth
            .iter()
            .map(|g| (0..10).map(|t| 100.0 * g.powi(t)).collect())
            .collect();
        let panel = PricePanel::new(
            (0..10).map(|i| start() + chrono::Duration::days(i)).collect(),
            vec!["W".into(), "X".into(), "Y".into(), "Z".into()],
            columns,
        )
        .unwrap();

        // Shorter than the lookback: all 9 returns are used.
        let scores = momentum_scores(&panel, MOMENTUM_LOOKBACK).unwrap();
        assert_eq!(scores.values, vec![0.25, 0.75, 0.5, 1.0]);
    }

    #[test]
    fn test_momentum_uses_trailing_window_only() {
        // A leads early, B leads over the last 3 returns.
        let panel = PricePanel::new(
            (0..7).map(|i| start() + chrono::Duration::days(i)).collect(),
            vec!["A".into(), "B".into()],
            vec![
                vec![100.0, 200.0, 400.0, 800.0, 800.0, 800.0, 800.0],
                vec![100.0, 100.0, 100.0, 100.0, 110.0, 121.0, 133.1],
            ],
        )
        .unwrap();
        let scores = momentum_scores(&panel, 3).unwrap();
        assert_eq!(scores.values, vec![1.0, 0.5]);
    }

    #[test]
    fn test_momentum_ties_break_by_identifier() {
        let panel = PricePanel::new(
            (0..3).map(|i| start() + chrono::Duration::days(i)).collect(),
            vec!["ZZZ".into(), "AAA".into()],
            vec![vec![1.0, 1.1, 1.21], vec![1.0, 1.1, 1.21]],
        )
        .unwrap();
        let scores = momentum_scores(&panel, 90).unwrap();
        assert_eq!(scores.get("AAA"), Some(0.5));
        assert_eq!(scores.get("ZZZ"), Some(1.0));
    }
}
