use crate::config::cache_dir;
use anyhow::Result;
use chrono::{DateTime, NaiveDate};
#[cfg(test)]
use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tokio::sync::OnceCell;
use tracing::{info, warn};

const USER_AGENT: &str = "Mozilla/5.0";
const COOKIE_URL: &str = "https://fc.yahoo.com";
const CRUMB_URL: &str = "https://query2.finance.yahoo.com/v1/test/getcrumb";

/// A single daily close observation.
#[derive(Clone, Debug, PartialEq)]
pub struct Candle {
    pub date: NaiveDate,
    pub close: f64,
}

/// Holds the daily close history for a specific symbol.
#[derive(Clone, Debug)]
pub struct StockData {
    pub symbol: String,
    pub history: Vec<Candle>,
}

/// Size and liquidity figures used to screen the candidate universe.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Fundamentals {
    pub market_cap: f64,
    pub average_volume: f64,
    pub last_price: f64,
}

impl Fundamentals {
    pub fn dollar_volume(&self) -> f64 {
        self.average_volume * self.last_price
    }
}

/// Source of fundamentals and daily close histories.
///
/// Every call reports its own failure; callers decide whether a failure is
/// fatal (benchmark) or only excludes one identifier (universe members).
pub trait MarketDataSource {
    async fn fundamentals(&self, symbol: &str) -> Result<Fundamentals>;
    async fn history(&self, symbol: &str) -> Result<StockData>;
}

// ──────────────────────────────────────────────────────────────────────────────
// Yahoo Finance
// ──────────────────────────────────────────────────────────────────────────────

#[derive(Deserialize, Serialize, Debug)]
struct YahooChartResponse {
    chart: YahooChart,
}

#[derive(Deserialize, Serialize, Debug)]
struct YahooChart {
    result: Option<Vec<YahooResult>>,
}

#[derive(Deserialize, Serialize, Debug)]
struct YahooResult {
    #[serde(default)]
    timestamp: Vec<i64>,
    indicators: YahooIndicators,
}

#[derive(Deserialize, Serialize, Debug)]
struct YahooIndicators {
    quote: Vec<YahooQuote>,
}

#[derive(Deserialize, Serialize, Debug)]
struct YahooQuote {
    #[serde(default)]
    close: Vec<Option<f64>>,
}

#[derive(Deserialize, Debug)]
struct YahooQuoteResponse {
    #[serde(rename = "quoteResponse")]
    quote_response: YahooQuoteBody,
}

#[derive(Deserialize, Debug)]
struct YahooQuoteBody {
    result: Vec<YahooQuoteEntry>,
}

#[derive(Deserialize, Debug)]
struct YahooQuoteEntry {
    #[serde(rename = "marketCap")]
    market_cap: Option<f64>,
    #[serde(rename = "averageDailyVolume3Month")]
    average_volume: Option<f64>,
    #[serde(rename = "regularMarketPrice")]
    last_price: Option<f64>,
}

/// Yahoo Finance backed [`MarketDataSource`] with a 24h on-disk cache for
/// chart responses.
///
/// The quote endpoint only answers requests that carry a session cookie and
/// the matching crumb, so the client keeps a cookie store and the crumb is
/// fetched once per source.
pub struct YahooSource {
    client: reqwest::Client,
    range: String,
    crumb: OnceCell<String>,
}

impl YahooSource {
    pub fn new(range: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .cookie_store(true)
            .user_agent(USER_AGENT)
            .build()?;
        Ok(Self {
            client,
            range: range.to_string(),
            crumb: OnceCell::new(),
        })
    }

    async fn crumb(&self) -> Result<&str> {
        let crumb = self
            .crumb
            .get_or_try_init(|| async {
                // Only sets the session cookie; the status is usually 404.
                if let Err(e) = self.client.get(COOKIE_URL).send().await {
                    warn!("Cookie request failed: {}", e);
                }
                let body = self
                    .client
                    .get(CRUMB_URL)
                    .timeout(std::time::Duration::from_secs(10))
                    .send()
                    .await?
                    .error_for_status()?
                    .text()
                    .await?;
                valid_crumb(&body).ok_or(anyhow::anyhow!("Yahoo returned no usable crumb"))
            })
            .await?;
        Ok(crumb.as_str())
    }

    async fn fetch_chart(&self, symbol: &str, cache_path: &Path) -> Result<YahooChartResponse> {
        let url = format!(
            "https://query1.finance.yahoo.com/v8/finance/chart/{}?range={}&interval=1d",
            symbol, self.range
        );

        let mut attempts = 0;
        let max_attempts = 3;

        loop {
            attempts += 1;
            match self.client.get(&url).send().await {
                Ok(resp) => match resp.json::<YahooChartResponse>().await {
                    Ok(resp_json) => {
                        let file = std::fs::File::create(cache_path)?;
                        let writer = std::io::BufWriter::new(file);
                        serde_json::to_writer(writer, &resp_json)?;
                        return Ok(resp_json);
                    }
                    Err(e) => {
                        if attempts >= max_attempts {
                            return Err(e.into());
                        }
                        warn!("Failed to parse JSON for {} (attempt {}/{}): {}", symbol, attempts, max_attempts, e);
                    }
                },
                Err(e) => {
                    if attempts >= max_attempts {
                        return Err(e.into());
                    }
                    warn!("Failed to fetch data for {} (attempt {}/{}): {}", symbol, attempts, max_attempts, e);
                }
            }

            tokio::time::sleep(std::time::Duration::from_secs(2)).await;
        }
    }

    async fn cached_chart(&self, symbol: &str) -> Result<YahooChartResponse> {
        let cache_dir = cache_dir();
        if !cache_dir.exists() {
            std::fs::create_dir_all(&cache_dir)?;
        }
        let cache_file = cache_dir.join(format!("{}_{}.json", symbol, self.range));

        if cache_file.exists() {
            let modified = std::fs::metadata(&cache_file)?.modified()?;
            let age = std::time::SystemTime::now().duration_since(modified)?;
            if age.as_secs() < 86400 {
                info!("Loading {} from cache...", symbol);
                let reader = std::io::BufReader::new(std::fs::File::open(&cache_file)?);
                return Ok(serde_json::from_reader(reader)?);
            }
            info!("Cache expired for {}, fetching...", symbol);
        } else {
            info!("Cache miss for {}, fetching...", symbol);
        }
        self.fetch_chart(symbol, &cache_file).await
    }
}

impl MarketDataSource for YahooSource {
    async fn fundamentals(&self, symbol: &str) -> Result<Fundamentals> {
        let crumb = self.crumb().await?;
        let url = format!(
            "https://query2.finance.yahoo.com/v7/finance/quote?symbols={}&crumb={}",
            symbol, crumb
        );
        let parsed = self
            .client
            .get(&url)
            .timeout(std::time::Duration::from_secs(10))
            .send()
            .await?
            .error_for_status()?
            .json::<YahooQuoteResponse>()
            .await?;
        quote_to_fundamentals(symbol, parsed)
    }

    async fn history(&self, symbol: &str) -> Result<StockData> {
        let response = self.cached_chart(symbol).await?;
        chart_to_stock_data(symbol, &response)
    }
}

/// The crumb endpoint answers with the bare token, or with an HTML or plain
/// text error page when rate limited.
fn valid_crumb(body: &str) -> Option<String> {
    let crumb = body.trim();
    if crumb.is_empty() || crumb.contains('<') || crumb.contains(char::is_whitespace) {
        return None;
    }
    Some(crumb.to_string())
}

fn quote_to_fundamentals(symbol: &str, response: YahooQuoteResponse) -> Result<Fundamentals> {
    let entry = response
        .quote_response
        .result
        .into_iter()
        .next()
        .ok_or(anyhow::anyhow!("No quote result for {}", symbol))?;

    // Missing fields screen out like zeros.
    Ok(Fundamentals {
        market_cap: entry.market_cap.unwrap_or(0.0),
        average_volume: entry.average_volume.unwrap_or(0.0),
        last_price: entry.last_price.unwrap_or(0.0),
    })
}

fn chart_to_stock_data(symbol: &str, response: &YahooChartResponse) -> Result<StockData> {
    let result = response
        .chart
        .result
        .as_ref()
        .and_then(|r| r.first())
        .ok_or(anyhow::anyhow!("No chart data found for {}", symbol))?;
    let quote = result
        .indicators
        .quote
        .first()
        .ok_or(anyhow::anyhow!("No quote series for {}", symbol))?;

    let mut history = Vec::with_capacity(result.timestamp.len());
    for (i, &timestamp) in result.timestamp.iter().enumerate() {
        let Some(Some(close)) = quote.close.get(i) else {
            continue;
        };
        let date = DateTime::from_timestamp(timestamp, 0)
            .ok_or(anyhow::anyhow!("Invalid timestamp {} for {}", timestamp, symbol))?
            .date_naive();
        // Intraday updates can repeat the last session's date.
        if history.last().is_some_and(|c: &Candle| c.date == date) {
            history.pop();
        }
        history.push(Candle { date, close: *close });
    }

    Ok(StockData {
        symbol: symbol.to_uppercase(),
        history,
    })
}

/// Reads a ticker list: one identifier per line, first comma-separated field,
/// UTF-8 with an optional byte-order mark.
pub fn load_tickers(path: &Path) -> Result<Vec<String>> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("Cannot read ticker file {}: {}", path.display(), e))?;
    Ok(parse_tickers(&raw))
}

fn parse_tickers(raw: &str) -> Vec<String> {
    raw.trim_start_matches('\u{feff}')
        .lines()
        .filter_map(|line| line.split(',').next())
        .map(|field| field.trim().trim_matches('"').to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

#[cfg(test)]
impl StockData {
    /// Builds a history from consecutive daily closes starting at `start`.
    pub fn from_closes(symbol: &str, start: NaiveDate, closes: &[f64]) -> Self {
        let history = closes
            .iter()
            .enumerate()
            .map(|(i, &close)| Candle {
                date: start + Duration::days(i as i64),
                close,
            })
            .collect();
        Self {
            symbol: symbol.to_string(),
            history,
        }
    }

    /// Seeded geometric random walk, used for synthetic universes.
    pub fn new_mock(symbol: &str, days: usize, drift: f64, volatility: f64, seed: u64) -> Self {
        use rand::SeedableRng;
        use rand::rngs::StdRng;
        use rand_distr::{Distribution, Normal};

        let mut rng = StdRng::seed_from_u64(seed);
        let shock = Normal::new(drift, volatility).unwrap();
        let mut closes = Vec::with_capacity(days);
        let mut current_price: f64 = 100.0;
        for _ in 0..days {
            closes.push(current_price);
            current_price *= 1.0 + shock.sample(&mut rng);
        }
        let start = NaiveDate::from_ymd_opt(2020, 1, 1).unwrap();
        Self::from_closes(symbol, start, &closes)
    }

    /// One-factor market: the benchmark follows a random walk with daily
    /// returns `N(0.0004, 0.01)` and asset `i` earns `beta_i * r_m` plus
    /// `N(0, 0.005)` idiosyncratic noise, with betas spread over `[0.5, 1.5]`.
    ///
    /// Returns the assets and the benchmark, all on the same dates.
    pub fn factor_universe(n_assets: usize, days: usize, seed: u64) -> (Vec<Self>, Self) {
        use rand::SeedableRng;
        use rand::rngs::StdRng;
        use rand_distr::{Distribution, Normal};

        let mut rng = StdRng::seed_from_u64(seed);
        let market = Normal::new(0.0004, 0.01).unwrap();
        let noise = Normal::new(0.0, 0.005).unwrap();
        let betas: Vec<f64> = (0..n_assets)
            .map(|i| {
                if n_assets > 1 {
                    0.5 + i as f64 / (n_assets - 1) as f64
                } else {
                    1.0
                }
            })
            .collect();

        let mut bench_closes = Vec::with_capacity(days);
        let mut asset_closes = vec![Vec::with_capacity(days); n_assets];
        let mut bench_price: f64 = 100.0;
        let mut prices = vec![50.0f64; n_assets];
        for _ in 0..days {
            bench_closes.push(bench_price);
            for (closes, &p) in asset_closes.iter_mut().zip(&prices) {
                closes.push(p);
            }
            let r_m = market.sample(&mut rng);
            bench_price *= 1.0 + r_m;
            for (p, &beta) in prices.iter_mut().zip(&betas) {
                *p *= 1.0 + beta * r_m + noise.sample(&mut rng);
            }
        }

        let start = NaiveDate::from_ymd_opt(2020, 1, 1).unwrap();
        let assets = asset_closes
            .iter()
            .enumerate()
            .map(|(i, closes)| Self::from_closes(&format!("F{:02}", i), start, closes))
            .collect();
        (assets, Self::from_closes("^MKT", start, &bench_closes))
    }
}
