//! Market data loading: wide price CSVs, volatility index series, a TTL cache
//! and a seeded synthetic generator.

use crate::error::{PipelineError, Result};
use crate::types::{fill_forward_backward, AssetFrame, DateSeries, PriceMatrix};
use crate::universe::MarketUniverse;
use chrono::{Datelike, Duration as ChronoDuration, NaiveDate, Weekday};
use csv::ReaderBuilder;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Volatility index level used when no series is available.
pub const DEFAULT_VOLATILITY_INDEX: f64 = 20.0;

/// Everything the pipeline consumes from the data layer, aligned to the
/// price dates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketData {
    pub prices: PriceMatrix,
    pub volatility_index: DateSeries,
    pub macro_factors: Option<AssetFrame>,
    /// True when the prices were generated rather than loaded.
    pub synthetic: bool,
}

impl MarketData {
    /// Bundle loaded prices with a volatility index, aligning the index onto
    /// the price dates.
    pub fn new(prices: PriceMatrix, volatility_index: Option<DateSeries>) -> Self {
        let dates = prices.dates().to_vec();
        let vix = match volatility_index {
            Some(series) => DateSeries {
                values: series.reindex(&dates, DEFAULT_VOLATILITY_INDEX),
                dates,
            },
            None => DateSeries::constant(&dates, DEFAULT_VOLATILITY_INDEX),
        };
        Self {
            prices,
            volatility_index: vix,
            macro_factors: None,
            synthetic: false,
        }
    }

    pub fn with_macro_factors(mut self, macro_factors: AssetFrame) -> Self {
        let dates = self.prices.dates().to_vec();
        self.macro_factors = macro_factors.reindex_rows(&dates);
        self
    }
}

/// A provider of market data for a date range.
pub trait MarketDataSource {
    fn load(&self, market: &str, start: NaiveDate, end: NaiveDate) -> Result<MarketData>;
}

/// CSV parsing options.
#[derive(Debug, Clone)]
pub struct CsvConfig {
    /// Date format string; common formats are tried when `None`.
    pub date_format: Option<String>,
    /// CSV delimiter character. Auto-detected when `None`.
    pub delimiter: Option<u8>,
    /// Skip rows with unparseable dates instead of failing.
    pub skip_invalid: bool,
}

impl Default for CsvConfig {
    fn default() -> Self {
        Self {
            date_format: None,
            delimiter: None,
            skip_invalid: true,
        }
    }
}

/// Detect the CSV delimiter from the first few lines.
///
/// Picks the delimiter that gives a consistent column count of at least two.
fn detect_delimiter(path: &Path) -> Result<u8> {
    let file = File::open(path)?;
    let reader = BufReader::new(file);
    let lines: Vec<String> = reader.lines().take(5).filter_map(|l| l.ok()).collect();

    if lines.is_empty() {
        return Ok(b',');
    }

    let delimiters = [b',', b'\t', b';', b'|'];
    let mut best = b',';
    let mut best_score = 0;

    for &delim in &delimiters {
        let counts: Vec<usize> = lines
            .iter()
            .map(|line| line.as_bytes().iter().filter(|&&b| b == delim).count() + 1)
            .collect();
        let first = counts[0];
        if first >= 2 && counts.iter().all(|&c| c == first) && first > best_score {
            best_score = first;
            best = delim;
        }
    }

    debug!("Detected delimiter {:?} with {} fields", best as char, best_score);
    Ok(best)
}

/// Parse a date string, trying an explicit format first and then common ones.
pub fn parse_date(s: &str, format: Option<&str>) -> Result<NaiveDate> {
    let s = s.trim();
    if let Some(fmt) = format {
        if let Ok(d) = NaiveDate::parse_from_str(s, fmt) {
            return Ok(d);
        }
    }

    let formats = [
        "%Y-%m-%d",
        "%Y/%m/%d",
        "%d-%m-%Y",
        "%d/%m/%Y",
        "%m/%d/%Y",
        "%d-%b-%Y",
        "%d %b %Y",
        "%b %d, %Y",
    ];
    for fmt in &formats {
        if let Ok(d) = NaiveDate::parse_from_str(s, fmt) {
            return Ok(d);
        }
    }

    // Timestamps such as "2024-01-02 00:00:00" or "2024-01-02T00:00:00Z"
    if let Some(prefix) = s.get(..10).filter(|_| s.len() > 10) {
        if let Ok(d) = NaiveDate::parse_from_str(prefix, "%Y-%m-%d") {
            return Ok(d);
        }
    }

    Err(PipelineError::DataError(format!("Could not parse date: '{}'", s)))
}

fn parse_value(s: &str) -> f64 {
    s.trim().parse::<f64>().unwrap_or(f64::NAN)
}

/// Load a wide CSV (a date column followed by one column per series).
///
/// Rows are sorted by date, duplicate dates keep the first row, duplicate
/// column names keep the first column, and columns with no numeric value
/// are dropped.
pub fn load_wide_csv(path: impl AsRef<Path>, config: &CsvConfig) -> Result<AssetFrame> {
    let path = path.as_ref();
    info!("Loading data from: {}", path.display());

    let delimiter = match config.delimiter {
        Some(d) => d,
        None => detect_delimiter(path)?,
    };

    let mut reader = ReaderBuilder::new()
        .has_headers(true)
        .delimiter(delimiter)
        .flexible(true)
        .from_path(path)?;

    let headers = reader.headers()?.clone();
    if headers.len() < 2 {
        return Err(PipelineError::DataError(format!(
            "{} needs a date column and at least one value column",
            path.display()
        )));
    }

    // First occurrence of every column name wins.
    let mut keep: Vec<(usize, String)> = Vec::new();
    for (i, name) in headers.iter().enumerate().skip(1) {
        let name = name.trim().to_string();
        if keep.iter().any(|(_, n)| *n == name) {
            warn!("Dropping duplicate column {}", name);
            continue;
        }
        keep.push((i, name));
    }

    let mut rows: Vec<(NaiveDate, Vec<f64>)> = Vec::new();
    let mut skipped = 0;
    for (row_num, record) in reader.records().enumerate() {
        let record = record?;
        let date = match record.get(0).map(|s| parse_date(s, config.date_format.as_deref())) {
            Some(Ok(d)) => d,
            Some(Err(e)) if !config.skip_invalid => return Err(e),
            _ => {
                debug!("Skipping row {}", row_num + 1);
                skipped += 1;
                continue;
            }
        };
        let values = keep
            .iter()
            .map(|(i, _)| record.get(*i).map(parse_value).unwrap_or(f64::NAN))
            .collect();
        rows.push((date, values));
    }
    if skipped > 0 {
        warn!("Skipped {} invalid rows", skipped);
    }

    rows.sort_by_key(|(d, _)| *d);
    let original_len = rows.len();
    rows.dedup_by_key(|(d, _)| *d);
    if rows.len() < original_len {
        warn!("Removed {} duplicate dates", original_len - rows.len());
    }

    let mut tickers: Vec<String> = keep.into_iter().map(|(_, n)| n).collect();
    let mut values: Vec<Vec<f64>> = rows.iter().map(|(_, v)| v.clone()).collect();
    let dates: Vec<NaiveDate> = rows.into_iter().map(|(d, _)| d).collect();

    // Drop columns without a single usable value.
    let empty: Vec<usize> = (0..tickers.len())
        .filter(|&j| !values.iter().any(|row| row[j].is_finite()))
        .collect();
    for &j in empty.iter().rev() {
        warn!("Dropping empty column {}", tickers[j]);
        tickers.remove(j);
        for row in values.iter_mut() {
            row.remove(j);
        }
    }

    AssetFrame::new(dates, tickers, values)
}

/// Load a two-column (date, value) series.
pub fn load_series_csv(path: impl AsRef<Path>, config: &CsvConfig) -> Result<DateSeries> {
    let frame = load_wide_csv(path, config)?;
    if frame.n_cols() == 0 {
        return Err(PipelineError::DataError("Series file has no values".to_string()));
    }
    let mut values = frame.column(0);
    fill_forward_backward(&mut values);
    DateSeries::new(frame.dates, values)
}

fn slice_range(frame: &AssetFrame, start: NaiveDate, end: NaiveDate) -> AssetFrame {
    let (dates, values): (Vec<NaiveDate>, Vec<Vec<f64>>) = frame
        .dates
        .iter()
        .zip(&frame.values)
        .filter(|(d, _)| **d >= start && **d <= end)
        .map(|(d, v)| (*d, v.clone()))
        .unzip();
    AssetFrame {
        dates,
        tickers: frame.tickers.clone(),
        values,
    }
}

/// Restrict to the market's default tickers when the file carries any of them.
fn select_market_columns(frame: AssetFrame, market: &str) -> AssetFrame {
    let Ok(universe) = MarketUniverse::by_id(market) else {
        return frame;
    };
    let idx: Vec<usize> = universe
        .default_tickers
        .iter()
        .filter_map(|t| frame.ticker_index(t))
        .collect();
    if idx.is_empty() {
        return frame;
    }
    AssetFrame {
        dates: frame.dates.clone(),
        tickers: idx.iter().map(|&j| frame.tickers[j].clone()).collect(),
        values: frame
            .values
            .iter()
            .map(|row| idx.iter().map(|&j| row[j]).collect())
            .collect(),
    }
}

/// Market data read from local CSV files.
#[derive(Debug, Clone)]
pub struct CsvMarketDataSource {
    prices_path: PathBuf,
    volatility_path: Option<PathBuf>,
    macro_path: Option<PathBuf>,
    config: CsvConfig,
}

impl CsvMarketDataSource {
    pub fn new(prices_path: impl Into<PathBuf>) -> Self {
        Self {
            prices_path: prices_path.into(),
            volatility_path: None,
            macro_path: None,
            config: CsvConfig::default(),
        }
    }

    pub fn with_volatility(mut self, path: impl Into<PathBuf>) -> Self {
        self.volatility_path = Some(path.into());
        self
    }

    pub fn with_macro(mut self, path: impl Into<PathBuf>) -> Self {
        self.macro_path = Some(path.into());
        self
    }

    pub fn with_config(mut self, config: CsvConfig) -> Self {
        self.config = config;
        self
    }
}

impl MarketDataSource for CsvMarketDataSource {
    fn load(&self, market: &str, start: NaiveDate, end: NaiveDate) -> Result<MarketData> {
        let frame = load_wide_csv(&self.prices_path, &self.config)?;
        let frame = select_market_columns(slice_range(&frame, start, end), market);
        if frame.n_cols() == 0 {
            return Err(PipelineError::DataError(format!(
                "{} has no price columns",
                self.prices_path.display()
            )));
        }
        let prices = PriceMatrix::from_frame(frame)?;
        info!(
            "Loaded {} rows x {} assets for {}",
            prices.len(),
            prices.n_assets(),
            market
        );

        let vix = match &self.volatility_path {
            Some(path) => Some(load_series_csv(path, &self.config)?),
            None => None,
        };
        let mut data = MarketData::new(prices, vix);

        if let Some(path) = &self.macro_path {
            let macro_frame = load_wide_csv(path, &self.config)?;
            data = data.with_macro_factors(macro_frame);
        }
        Ok(data)
    }
}

struct CacheEntry {
    data: MarketData,
    loaded_at: Instant,
}

/// In-memory cache in front of another source, keyed by (market, start, end).
pub struct CachedMarketDataSource<S> {
    inner: S,
    ttl: Duration,
    entries: Mutex<HashMap<(String, NaiveDate, NaiveDate), CacheEntry>>,
}

impl<S: MarketDataSource> CachedMarketDataSource<S> {
    pub fn new(inner: S, ttl: Duration) -> Self {
        Self {
            inner,
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Number of live (unexpired) entries.
    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .map(|e| e.values().filter(|c| c.loaded_at.elapsed() < self.ttl).count())
            .unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.clear();
        }
    }
}

impl<S: MarketDataSource> MarketDataSource for CachedMarketDataSource<S> {
    fn load(&self, market: &str, start: NaiveDate, end: NaiveDate) -> Result<MarketData> {
        let key = (market.to_string(), start, end);
        {
            let entries = self
                .entries
                .lock()
                .map_err(|_| PipelineError::DataError("Data cache lock poisoned".to_string()))?;
            if let Some(entry) = entries.get(&key) {
                if entry.loaded_at.elapsed() < self.ttl {
                    debug!("Data cache hit for {} {}..{}", market, start, end);
                    return Ok(entry.data.clone());
                }
            }
        }

        let data = self.inner.load(market, start, end)?;
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| PipelineError::DataError("Data cache lock poisoned".to_string()))?;
        entries.insert(
            key,
            CacheEntry {
                data: data.clone(),
                loaded_at: Instant::now(),
            },
        );
        Ok(data)
    }
}

/// Seeded synthetic data; ignores the market's own tickers.
#[derive(Debug, Clone)]
pub struct SyntheticMarketDataSource {
    pub tickers: Vec<String>,
    pub seed: u64,
}

impl MarketDataSource for SyntheticMarketDataSource {
    fn load(&self, _market: &str, start: NaiveDate, end: NaiveDate) -> Result<MarketData> {
        synthetic_market_data(&self.tickers, start, end, self.seed)
    }
}

/// Monday-to-Friday dates between `start` and `end` inclusive.
pub fn business_days(start: NaiveDate, end: NaiveDate) -> Vec<NaiveDate> {
    let mut dates = Vec::new();
    let mut day = start;
    while day <= end {
        if !matches!(day.weekday(), Weekday::Sat | Weekday::Sun) {
            dates.push(day);
        }
        day += ChronoDuration::days(1);
    }
    dates
}

/// Seeded random-walk prices on business days with a constant volatility
/// index. Each price is `1 + 0.0005 * cumsum(N(0,1))`, floored to stay
/// strictly positive.
pub fn synthetic_market_data(
    tickers: &[String],
    start: NaiveDate,
    end: NaiveDate,
    seed: u64,
) -> Result<MarketData> {
    if tickers.is_empty() {
        return Err(PipelineError::InvalidInput(
            "Synthetic data needs at least one ticker".to_string(),
        ));
    }
    let dates = business_days(start, end);
    let mut rng = StdRng::seed_from_u64(seed);

    let mut level = vec![0.0; tickers.len()];
    let values: Vec<Vec<f64>> = dates
        .iter()
        .map(|_| {
            level
                .iter_mut()
                .map(|l| {
                    let z: f64 = rng.sample(StandardNormal);
                    *l += z;
                    (*l * 0.0005 + 1.0).max(0.01)
                })
                .collect()
        })
        .collect();

    let prices = PriceMatrix::new(dates, tickers.to_vec(), values)?;
    let mut data = MarketData::new(prices, None);
    data.synthetic = true;
    Ok(data)
}
