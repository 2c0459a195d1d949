use crate::dataset::{PricePanel, PriceSeries, pct_change};
use crate::estimators::AssetVector;
use anyhow::Result;
use chrono::NaiveDate;

/// Dated values, used for cumulative growth paths.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TimeSeries {
    pub dates: Vec<NaiveDate>,
    pub values: Vec<f64>,
}

impl TimeSeries {
    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn extend(&mut self, other: &TimeSeries) {
        self.dates.extend_from_slice(&other.dates);
        self.values.extend_from_slice(&other.values);
    }

    pub fn last(&self) -> Option<f64> {
        self.values.last().copied()
    }
}

/// Cumulative growth of one weighted portfolio and of the benchmark over the
/// same out-of-sample slice.
#[derive(Clone, Debug, PartialEq)]
pub struct Performance {
    pub portfolio: TimeSeries,
    pub benchmark: TimeSeries,
}

fn cumulative_growth(returns: &[f64]) -> Vec<f64> {
    returns
        .iter()
        .scan(1.0, |acc, r| {
            *acc *= 1.0 + r;
            Some(*acc)
        })
        .collect()
}

/// Applies fixed `weights` to the out-of-sample `prices` and tracks the
/// growth of one unit invested at the first close.
///
/// Both series drop the first period, which has no return, so each has
/// `prices.len() - 1` points dated from the second row on.
pub fn evaluate(prices: &PricePanel, benchmark: &PriceSeries, weights: &AssetVector) -> Result<Performance> {
    if weights.assets != prices.assets {
        return Err(anyhow::anyhow!(
            "Weight assets {:?} do not match panel assets {:?}",
            weights.assets,
            prices.assets
        ));
    }
    if prices.len() != benchmark.len() {
        return Err(anyhow::anyhow!(
            "Out-of-sample panel has {} rows but benchmark has {}",
            prices.len(),
            benchmark.len()
        ));
    }
    if prices.len() < 2 {
        return Err(anyhow::anyhow!("Evaluation needs at least 2 price rows"));
    }

    let asset_returns = prices.returns();
    let periods = prices.len() - 1;
    let portfolio_returns: Vec<f64> = (0..periods)
        .map(|t| {
            asset_returns
                .iter()
                .zip(&weights.values)
                .map(|(col, w)| col[t] * w)
                .sum()
        })
        .collect();
    let benchmark_returns = pct_change(&benchmark.values);

    let dates = prices.dates[1..].to_vec();
    Ok(Performance {
        portfolio: TimeSeries {
            dates: dates.clone(),
            values: cumulative_growth(&portfolio_returns),
        },
        benchmark: TimeSeries {
            dates,
            values: cumulative_growth(&benchmark_returns),
        },
    })
}

/// Joins consecutive growth segments into one compounded path: each segment
/// starts from the level where the previous one ended.
pub fn chain_segments(segments: &[TimeSeries]) -> TimeSeries {
    let mut out = TimeSeries::default();
    let mut level = 1.0;
    for segment in segments {
        out.dates.extend_from_slice(&segment.dates);
        out.values.extend(segment.values.iter().map(|v| v * level));
        if let Some(last) = segment.last() {
            level *= last;
        }
    }
    out
}
