use crate::config::{MIN_DOLLAR_VOLUME, MIN_MARKET_CAP};
use crate::data::{MarketDataSource, StockData};
use anyhow::Result;
use chrono::NaiveDate;
use std::collections::{BTreeMap, BTreeSet};
use std::ops::Range;
use tracing::{info, warn};

// ──────────────────────────────────────────────────────────────────────────────
// Data Structures
// ──────────────────────────────────────────────────────────────────────────────

/// Close prices for a set of assets on one shared, gap-free date index.
#[derive(Clone, Debug, PartialEq)]
pub struct PricePanel {
    pub dates: Vec<NaiveDate>,
    pub assets: Vec<String>,
    /// One column per asset, each `dates.len()` long.
    pub columns: Vec<Vec<f64>>,
}

/// A single chronological price sequence (the benchmark).
#[derive(Clone, Debug, PartialEq)]
pub struct PriceSeries {
    pub symbol: String,
    pub dates: Vec<NaiveDate>,
    pub values: Vec<f64>,
}

/// Outcome of screening one candidate identifier.
#[derive(Clone, Debug, PartialEq)]
pub enum Screening {
    Accepted,
    Rejected,
    Failed(String),
}

/// Accepted identifiers and the validated panel built from their histories.
#[derive(Clone, Debug)]
pub struct Universe {
    pub selected: Vec<String>,
    pub screenings: Vec<(String, Screening)>,
    pub panel: PricePanel,
}

/// Simple percentage change; the first observation contributes no return.
pub fn pct_change(prices: &[f64]) -> Vec<f64> {
    prices.windows(2).map(|w| w[1] / w[0] - 1.0).collect()
}

impl PricePanel {
    pub fn new(dates: Vec<NaiveDate>, assets: Vec<String>, columns: Vec<Vec<f64>>) -> Result<Self> {
        if assets.len() != columns.len() {
            return Err(anyhow::anyhow!(
                "Panel has {} assets but {} columns",
                assets.len(),
                columns.len()
            ));
        }
        if let Some((asset, col)) = assets.iter().zip(&columns).find(|(_, c)| c.len() != dates.len()) {
            return Err(anyhow::anyhow!(
                "Column {} has {} rows, date index has {}",
                asset,
                col.len(),
                dates.len()
            ));
        }
        if dates.windows(2).any(|w| w[0] >= w[1]) {
            return Err(anyhow::anyhow!("Panel date index is not strictly increasing"));
        }
        Ok(Self { dates, assets, columns })
    }

    /// Outer-joins close histories on date and drops every asset with a
    /// missing observation anywhere on the joined index.
    pub fn from_histories(histories: &[StockData]) -> Result<Self> {
        let index: BTreeSet<NaiveDate> = histories
            .iter()
            .flat_map(|h| h.history.iter().map(|c| c.date))
            .collect();
        let dates: Vec<NaiveDate> = index.into_iter().collect();

        let mut assets = Vec::new();
        let mut columns = Vec::new();
        for data in histories {
            let by_date: BTreeMap<NaiveDate, f64> =
                data.history.iter().map(|c| (c.date, c.close)).collect();
            let column: Option<Vec<f64>> = dates
                .iter()
                .map(|d| by_date.get(d).copied().filter(|p| p.is_finite()))
                .collect();
            match column {
                Some(col) => {
                    assets.push(data.symbol.clone());
                    columns.push(col);
                }
                None => warn!("{}: incomplete price history, dropping column", data.symbol),
            }
        }

        Self::new(dates, assets, columns)
    }

    pub fn len(&self) -> usize {
        self.dates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dates.is_empty()
    }

    pub fn n_assets(&self) -> usize {
        self.assets.len()
    }

    /// Rows `range` of every column, on the matching dates.
    pub fn slice(&self, range: Range<usize>) -> PricePanel {
        PricePanel {
            dates: self.dates[range.clone()].to_vec(),
            assets: self.assets.clone(),
            columns: self.columns.iter().map(|c| c[range.clone()].to_vec()).collect(),
        }
    }

    /// Per-asset simple returns, each `len() - 1` long.
    pub fn returns(&self) -> Vec<Vec<f64>> {
        self.columns.iter().map(|c| pct_change(c)).collect()
    }

    /// Keeps only the rows whose date is in `keep`.
    fn restrict(&self, keep: &BTreeSet<NaiveDate>) -> Result<PricePanel> {
        let rows: Vec<usize> = (0..self.len()).filter(|&i| keep.contains(&self.dates[i])).collect();
        PricePanel::new(
            rows.iter().map(|&i| self.dates[i]).collect(),
            self.assets.clone(),
            self.columns
                .iter()
                .map(|c| rows.iter().map(|&i| c[i]).collect())
                .collect(),
        )
    }
}

impl PriceSeries {
    pub fn from_stock_data(data: &StockData) -> Self {
        Self {
            symbol: data.symbol.clone(),
            dates: data.history.iter().map(|c| c.date).collect(),
            values: data.history.iter().map(|c| c.close).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn slice(&self, range: Range<usize>) -> PriceSeries {
        PriceSeries {
            symbol: self.symbol.clone(),
            dates: self.dates[range.clone()].to_vec(),
            values: self.values[range].to_vec(),
        }
    }

    pub fn returns(&self) -> Vec<f64> {
        pct_change(&self.values)
    }
}

/// Restricts panel and benchmark to their common dates so that every later
/// positional slice of one lines up with the same slice of the other.
pub fn align(panel: &PricePanel, benchmark: &PriceSeries) -> Result<(PricePanel, PriceSeries)> {
    let panel_dates: BTreeSet<NaiveDate> = panel.dates.iter().copied().collect();
    let common: BTreeSet<NaiveDate> = benchmark
        .dates
        .iter()
        .zip(&benchmark.values)
        .filter(|(d, v)| v.is_finite() && panel_dates.contains(d))
        .map(|(d, _)| *d)
        .collect();
    if common.is_empty() {
        return Err(anyhow::anyhow!(
            "Benchmark {} shares no dates with the price panel",
            benchmark.symbol
        ));
    }

    let aligned_panel = panel.restrict(&common)?;
    let mut aligned_bench = PriceSeries {
        symbol: benchmark.symbol.clone(),
        dates: Vec::with_capacity(common.len()),
        values: Vec::with_capacity(common.len()),
    };
    for (d, v) in benchmark.dates.iter().zip(&benchmark.values) {
        if common.contains(d) && aligned_bench.dates.last() != Some(d) {
            aligned_bench.dates.push(*d);
            aligned_bench.values.push(*v);
        }
    }

    let dropped = panel.len() - aligned_panel.len();
    if dropped > 0 {
        info!("Dropped {} panel rows without a benchmark observation", dropped);
    }
    Ok((aligned_panel, aligned_bench))
}

/// Splits row indices `0..len` at `ratio` (calibration, test).
pub fn split_point(len: usize, ratio: f64) -> usize {
    ((len as f64) * ratio) as usize
}

// ──────────────────────────────────────────────────────────────────────────────
// Builder
// ──────────────────────────────────────────────────────────────────────────────

pub fn passes_screen(market_cap: f64, dollar_volume: f64) -> bool {
    market_cap >= MIN_MARKET_CAP && dollar_volume >= MIN_DOLLAR_VOLUME
}

/// Screens every candidate and assembles the validated price panel.
///
/// A failure for one identifier only excludes that identifier; the only
/// error returned is a panel that fails validation.
pub async fn build_universe<S: MarketDataSource>(source: &S, candidates: &[String]) -> Result<Universe> {
    let mut screenings = Vec::with_capacity(candidates.len());
    let mut histories = Vec::new();

    for symbol in candidates {
        let outcome = screen_candidate(source, symbol).await;
        match outcome {
            Ok(Some(data)) => {
                info!("\t{} --> Accepted ({} days)", symbol, data.history.len());
                histories.push(data);
                screenings.push((symbol.clone(), Screening::Accepted));
            }
            Ok(None) => {
                info!("\t{} --> Rejected", symbol);
                screenings.push((symbol.clone(), Screening::Rejected));
            }
            Err(e) => {
                warn!("Error fetching data for {}: {}", symbol, e);
                screenings.push((symbol.clone(), Screening::Failed(e.to_string())));
            }
        }
    }

    let panel = PricePanel::from_histories(&histories)?;
    Ok(Universe {
        selected: histories.iter().map(|h| h.symbol.clone()).collect(),
        screenings,
        panel,
    })
}

async fn screen_candidate<S: MarketDataSource>(source: &S, symbol: &str) -> Result<Option<StockData>> {
    let fundamentals = source.fundamentals(symbol).await?;
    if !passes_screen(fundamentals.market_cap, fundamentals.dollar_volume()) {
        return Ok(None);
    }
    let data = source.history(symbol).await?;
    if data.history.is_empty() {
        return Ok(None);
    }
    Ok(Some(data))
}

/// Fetches the benchmark; any failure is returned to the caller, which must
/// not proceed to estimation.
pub async fn fetch_benchmark<S: MarketDataSource>(source: &S, symbol: &str) -> Result<PriceSeries> {
    let data = source
        .history(symbol)
        .await
        .map_err(|e| anyhow::anyhow!("Error fetching benchmark {}: {}", symbol, e))?;
    let series = PriceSeries::from_stock_data(&data);
    if series.is_empty() {
        return Err(anyhow::anyhow!("Benchmark {} returned no history", symbol));
    }
    Ok(series)
}
