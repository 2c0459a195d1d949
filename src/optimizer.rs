use crate::config::{
    BETA_TARGET, LONG_ONLY_MAX_ITER, LONG_SHORT_MAX_ITER, LONG_SHORT_UPPER, MIX_LOWER,
    MIX_MAX_ITER, MIX_UPPER,
};
use crate::estimators::{AssetVector, Estimates};
use crate::qp::{self, QpProblem};
use anyhow::Result;
use tracing::{info, warn};

/// Portfolio construction variants.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Strategy {
    LongOnly,
    LongShort,
    Mix130_30,
}

impl Strategy {
    pub const ALL: [Strategy; 3] = [Strategy::LongOnly, Strategy::LongShort, Strategy::Mix130_30];

    pub fn label(self) -> &'static str {
        match self {
            Self::LongOnly => "Long Only",
            Self::LongShort => "Long-Short",
            Self::Mix130_30 => "130/30",
        }
    }

    /// Stem used in chart file names.
    pub fn file_stem(self) -> &'static str {
        match self {
            Self::LongOnly => "Long_Only",
            Self::LongShort => "Long_Short",
            Self::Mix130_30 => "Mix",
        }
    }

    pub fn max_iter(self) -> usize {
        match self {
            Self::LongOnly => LONG_ONLY_MAX_ITER,
            Self::LongShort => LONG_SHORT_MAX_ITER,
            Self::Mix130_30 => MIX_MAX_ITER,
        }
    }

    pub fn index(self) -> usize {
        match self {
            Self::LongOnly => 0,
            Self::LongShort => 1,
            Self::Mix130_30 => 2,
        }
    }
}

/// One optional weight vector per [`Strategy`], in [`Strategy::ALL`] order.
#[derive(Clone, Debug, Default)]
pub struct StrategyWeights {
    pub weights: [Option<AssetVector>; 3],
}

impl StrategyWeights {
    pub fn get(&self, strategy: Strategy) -> Option<&AssetVector> {
        self.weights[strategy.index()].as_ref()
    }
}

/// Checks that covariance, betas and scores describe the same ordered assets.
fn validate_alignment(estimates: &Estimates) -> Result<()> {
    let assets = &estimates.covariance.assets;
    if assets.is_empty() {
        return Err(anyhow::anyhow!("No assets to optimize"));
    }
    let n = assets.len();
    if estimates.covariance.matrix.len() != n || estimates.covariance.matrix.iter().any(|r| r.len() != n) {
        return Err(anyhow::anyhow!("Covariance matrix is not {}x{}", n, n));
    }
    if &estimates.betas.assets != assets {
        return Err(anyhow::anyhow!(
            "Beta assets {:?} do not match covariance assets {:?}",
            estimates.betas.assets,
            assets
        ));
    }
    if &estimates.scores.assets != assets {
        return Err(anyhow::anyhow!(
            "Score assets {:?} do not match covariance assets {:?}",
            estimates.scores.assets,
            assets
        ));
    }
    Ok(())
}

/// Builds the QP for `strategy`:
///
/// minimize `½ wᵀΣw + scoreᵀw` subject to `Σw = 1`, `βᵀw = 1` and the
/// variant's per-asset bounds. Lower scores mark stronger momentum, so the
/// linear term tilts weight towards it.
pub fn build_problem(estimates: &Estimates, strategy: Strategy) -> Result<QpProblem> {
    validate_alignment(estimates)?;
    let n = estimates.covariance.assets.len();

    let identity = |sign: f64| -> Vec<Vec<f64>> {
        (0..n)
            .map(|i| (0..n).map(|j| if i == j { sign } else { 0.0 }).collect())
            .collect()
    };

    let (g, h, lb) = match strategy {
        // −w ≤ 0 duplicates the lower bound; the bound is kept.
        Strategy::LongOnly => (Vec::new(), Vec::new(), Some(vec![0.0; n])),
        Strategy::LongShort => (identity(1.0), vec![LONG_SHORT_UPPER; n], None),
        Strategy::Mix130_30 => {
            let mut g = identity(1.0);
            g.extend(identity(-1.0));
            let mut h = vec![MIX_UPPER; n];
            h.extend(vec![-MIX_LOWER; n]);
            (g, h, None)
        }
    };

    Ok(QpProblem {
        p: estimates.covariance.matrix.clone(),
        q: estimates.scores.values.clone(),
        a: vec![vec![1.0; n], estimates.betas.values.clone()],
        b: vec![1.0, BETA_TARGET],
        g,
        h,
        lb,
    })
}

/// Solves one variant. `Ok(None)` means no usable weights (no convergence
/// within the iteration cap, or an infeasible problem).
pub fn optimize(estimates: &Estimates, strategy: Strategy) -> Result<Option<AssetVector>> {
    let problem = build_problem(estimates, strategy)?;
    match qp::solve_qp(&problem, strategy.max_iter())? {
        Some(w) => Ok(Some(AssetVector::new(estimates.covariance.assets.clone(), w)?)),
        None => {
            warn!("{} optimization returned no result", strategy.label());
            Ok(None)
        }
    }
}

/// Solves all three variants on the same estimates.
pub fn optimize_all(estimates: &Estimates) -> Result<StrategyWeights> {
    let mut out = StrategyWeights::default();
    for strategy in Strategy::ALL {
        out.weights[strategy.index()] = optimize(estimates, strategy)?;
    }
    Ok(out)
}

/// Like [`optimize`], but a missing result is an error.
pub fn optimize_required(estimates: &Estimates, strategy: Strategy) -> Result<AssetVector> {
    info!("* Building {} Optimization...", strategy.label());
    optimize(estimates, strategy)?.ok_or(anyhow::anyhow!(
        "{} optimization did not produce weights",
        strategy.label()
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::StockData;
    use crate::dataset::{PricePanel, PriceSeries};
    use crate::estimators::{Covariance, estimate};

    const TOL: f64 = 1e-6;

    fn names(n: usize) -> Vec<String> {
        ["AAA", "BBB", "CCC", "DDD"][..n].iter().map(|s| s.to_string()).collect()
    }

    fn estimates(matrix: Vec<Vec<f64>>, betas: Vec<f64>, scores: Vec<f64>) -> Estimates {
        let assets = names(betas.len());
        Estimates {
            covariance: Covariance {
                assets: assets.clone(),
                matrix,
            },
            betas: AssetVector::new(assets.clone(), betas).unwrap(),
            scores: AssetVector::new(assets, scores).unwrap(),
        }
    }

    fn three_asset() -> Estimates {
        estimates(
            vec![
                vec![0.04, 0.0, 0.0],
                vec![0.0, 0.09, 0.0],
                vec![0.0, 0.0, 0.0625],
            ],
            vec![0.8, 1.0, 1.2],
            vec![1.0 / 3.0, 2.0 / 3.0, 1.0],
        )
    }

    fn portfolio_beta(w: &AssetVector, est: &Estimates) -> f64 {
        w.values.iter().zip(&est.betas.values).map(|(a, b)| a * b).sum()
    }

    #[test]
    fn test_long_only_weights_are_nonnegative_and_fully_invested() {
        let est = three_asset();
        let w = optimize(&est, Strategy::LongOnly).unwrap().expect("long-only should solve");

        assert_eq!(w.assets, est.covariance.assets);
        assert!(w.values.iter().all(|&v| v >= -TOL), "weights {:?}", w.values);
        assert!((w.sum() - 1.0).abs() < TOL);
        assert!((portfolio_beta(&w, &est) - 1.0).abs() < TOL);

        // βᵀw = 1 forces w_A = w_C; the quadratic then gives w_A = 0.18 / 0.4625.
        let t = 0.18 / 0.4625;
        assert!((w.values[0] - t).abs() < 1e-5);
        assert!((w.values[2] - t).abs() < 1e-5);
    }

    #[test]
    fn test_mix_weights_respect_130_30_bounds() {
        let est = estimates(
            vec![
                vec![0.04, 0.01, 0.0, 0.0],
                vec![0.01, 0.09, 0.0, 0.0],
                vec![0.0, 0.0, 0.16, 0.02],
                vec![0.0, 0.0, 0.02, 0.25],
            ],
            vec![0.6, 0.9, 1.1, 1.5],
            vec![0.25, 1.0, 0.5, 0.75],
        );
        let w = optimize(&est, Strategy::Mix130_30).unwrap().expect("130/30 should solve");

        for &v in &w.values {
            assert!(v >= MIX_LOWER - TOL && v <= MIX_UPPER + TOL, "weight {} out of bounds", v);
        }
        assert!((w.sum() - 1.0).abs() < TOL);
        assert!((portfolio_beta(&w, &est) - 1.0).abs() < TOL);
    }

    #[test]
    fn test_long_short_respects_cap() {
        let est = three_asset();
        let w = optimize(&est, Strategy::LongShort).unwrap().expect("long-short should solve");
        assert!(w.values.iter().all(|&v| v <= LONG_SHORT_UPPER + TOL));
        assert!((w.sum() - 1.0).abs() < TOL);
    }

    #[test]
    fn test_zero_covariance_does_not_panic() {
        let est = estimates(vec![vec![0.0, 0.0], vec![0.0, 0.0]], vec![1.0, 1.0], vec![0.5, 1.0]);
        match optimize(&est, Strategy::LongOnly).unwrap() {
            Some(w) => {
                assert!(w.values.iter().all(|&v| v >= -TOL));
                assert!((w.sum() - 1.0).abs() < 1e-4);
            }
            None => {}
        }
    }

    #[test]
    fn test_factor_model_windows_solve_for_every_variant() {
        let (assets, market) = StockData::factor_universe(8, 271, 5);
        let panel = PricePanel::from_histories(&assets).unwrap();
        let bench = PriceSeries::from_stock_data(&market);

        for rows in [0..91, 90..181, 180..271] {
            let est = estimate(&panel.slice(rows.clone()), &bench.slice(rows.clone())).unwrap();
            for strategy in Strategy::ALL {
                let w = optimize(&est, strategy)
                    .unwrap()
                    .unwrap_or_else(|| panic!("{} found no weights on rows {:?}", strategy.label(), rows));
                assert!((w.sum() - 1.0).abs() < TOL);
                assert!((portfolio_beta(&w, &est) - 1.0).abs() < TOL);
                let (lo, hi) = match strategy {
                    Strategy::LongOnly => (0.0, f64::INFINITY),
                    Strategy::LongShort => (f64::NEG_INFINITY, LONG_SHORT_UPPER),
                    Strategy::Mix130_30 => (MIX_LOWER, MIX_UPPER),
                };
                assert!(
                    w.values.iter().all(|&v| v >= lo - TOL && v <= hi + TOL),
                    "{} weights {:?}",
                    strategy.label(),
                    w.values
                );
            }
        }
    }

    #[test]
    fn test_misaligned_inputs_are_rejected() {
        let mut est = three_asset();
        est.scores.assets.swap(0, 1);
        assert!(optimize(&est, Strategy::LongOnly).is_err());
    }

    #[test]
    fn test_mix_problem_stacks_both_bounds() {
        let problem = build_problem(&three_asset(), Strategy::Mix130_30).unwrap();
        assert_eq!(problem.g.len(), 6);
        assert_eq!(problem.h[..3], [1.3, 1.3, 1.3]);
        assert_eq!(problem.h[3..], [0.3, 0.3, 0.3]);
        assert_eq!(problem.g[4][1], -1.0);
        assert!(problem.lb.is_none());

        let long_only = build_problem(&three_asset(), Strategy::LongOnly).unwrap();
        assert!(long_only.g.is_empty());
        assert_eq!(long_only.lb, Some(vec![0.0; 3]));
    }
}
