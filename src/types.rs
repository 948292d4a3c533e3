//! Core data types for the allocation pipeline.

use crate::error::{PipelineError, Result};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Trading days per year used for annualization.
pub const TRADING_DAYS: f64 = 252.0;

/// Number of semantic market regimes.
pub const N_REGIMES: usize = 4;

/// A date-indexed scalar series (volatility index, equity curve, ...).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DateSeries {
    pub dates: Vec<NaiveDate>,
    pub values: Vec<f64>,
}

impl DateSeries {
    /// Create a series, checking that dates and values line up.
    pub fn new(dates: Vec<NaiveDate>, values: Vec<f64>) -> Result<Self> {
        if dates.len() != values.len() {
            return Err(PipelineError::InvalidInput(format!(
                "Series has {} dates but {} values",
                dates.len(),
                values.len()
            )));
        }
        Ok(Self { dates, values })
    }

    /// A series holding the same value on every date.
    pub fn constant(dates: &[NaiveDate], value: f64) -> Self {
        Self {
            dates: dates.to_vec(),
            values: vec![value; dates.len()],
        }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Last value, if any.
    pub fn last(&self) -> Option<f64> {
        self.values.last().copied()
    }

    /// Align onto `target` dates. Missing dates are forward-filled, then
    /// back-filled; if nothing is available `default` is used.
    pub fn reindex(&self, target: &[NaiveDate], default: f64) -> Vec<f64> {
        let lookup: HashMap<NaiveDate, f64> = self
            .dates
            .iter()
            .zip(&self.values)
            .filter(|(_, v)| v.is_finite())
            .map(|(d, v)| (*d, *v))
            .collect();

        let mut out: Vec<f64> = target
            .iter()
            .map(|d| lookup.get(d).copied().unwrap_or(f64::NAN))
            .collect();
        fill_forward_backward(&mut out);
        for v in out.iter_mut() {
            if !v.is_finite() {
                *v = default;
            }
        }
        out
    }
}

/// Forward-fill then back-fill NaN values in place.
pub fn fill_forward_backward(values: &mut [f64]) {
    let mut last = f64::NAN;
    for v in values.iter_mut() {
        if v.is_finite() {
            last = *v;
        } else if last.is_finite() {
            *v = last;
        }
    }
    let mut next = f64::NAN;
    for v in values.iter_mut().rev() {
        if v.is_finite() {
            next = *v;
        } else if next.is_finite() {
            *v = next;
        }
    }
}

/// A date x asset matrix. Rows are dates, columns are assets.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssetFrame {
    pub dates: Vec<NaiveDate>,
    pub tickers: Vec<String>,
    pub values: Vec<Vec<f64>>,
}

/// Percentage-change returns; the first price row has no return.
pub type ReturnMatrix = AssetFrame;
/// A single named factor.
pub type FactorMatrix = AssetFrame;
/// Portfolio weights per date; every row sums to one.
pub type WeightMatrix = AssetFrame;

impl AssetFrame {
    /// Create a frame, checking the shape.
    pub fn new(dates: Vec<NaiveDate>, tickers: Vec<String>, values: Vec<Vec<f64>>) -> Result<Self> {
        if dates.len() != values.len() {
            return Err(PipelineError::InvalidInput(format!(
                "Frame has {} dates but {} rows",
                dates.len(),
                values.len()
            )));
        }
        if let Some(row) = values.iter().find(|row| row.len() != tickers.len()) {
            return Err(PipelineError::InvalidInput(format!(
                "Frame row has {} values for {} tickers",
                row.len(),
                tickers.len()
            )));
        }
        Ok(Self {
            dates,
            tickers,
            values,
        })
    }

    /// Frame filled with a single value.
    pub fn filled(dates: &[NaiveDate], tickers: &[String], value: f64) -> Self {
        Self {
            dates: dates.to_vec(),
            tickers: tickers.to_vec(),
            values: vec![vec![value; tickers.len()]; dates.len()],
        }
    }

    /// Build a frame from per-asset columns.
    pub fn from_columns(dates: &[NaiveDate], tickers: &[String], columns: &[Vec<f64>]) -> Self {
        let values = (0..dates.len())
            .map(|t| columns.iter().map(|col| col[t]).collect())
            .collect();
        Self {
            dates: dates.to_vec(),
            tickers: tickers.to_vec(),
            values,
        }
    }

    pub fn n_rows(&self) -> usize {
        self.values.len()
    }

    pub fn n_cols(&self) -> usize {
        self.tickers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn row(&self, t: usize) -> &[f64] {
        &self.values[t]
    }

    pub fn last_row(&self) -> Option<&[f64]> {
        self.values.last().map(|r| r.as_slice())
    }

    /// Copy out a single column.
    pub fn column(&self, j: usize) -> Vec<f64> {
        self.values.iter().map(|row| row[j]).collect()
    }

    /// All columns, asset-major.
    pub fn columns(&self) -> Vec<Vec<f64>> {
        (0..self.n_cols()).map(|j| self.column(j)).collect()
    }

    /// Column position of a ticker.
    pub fn ticker_index(&self, ticker: &str) -> Option<usize> {
        self.tickers.iter().position(|t| t == ticker)
    }

    /// Mean of each column, ignoring non-finite values (0 when a column has none).
    pub fn column_means(&self) -> Vec<f64> {
        (0..self.n_cols())
            .map(|j| {
                let finite: Vec<f64> = self
                    .values
                    .iter()
                    .map(|row| row[j])
                    .filter(|v| v.is_finite())
                    .collect();
                if finite.is_empty() {
                    0.0
                } else {
                    finite.iter().sum::<f64>() / finite.len() as f64
                }
            })
            .collect()
    }

    /// Align rows onto `target` dates, forward-filling then back-filling.
    /// Returns `None` when the frame has no rows to fill from.
    pub fn reindex_rows(&self, target: &[NaiveDate]) -> Option<AssetFrame> {
        if self.values.is_empty() {
            return None;
        }
        let lookup: HashMap<NaiveDate, usize> =
            self.dates.iter().enumerate().map(|(i, d)| (*d, i)).collect();

        let mut rows: Vec<Option<Vec<f64>>> = target
            .iter()
            .map(|d| lookup.get(d).map(|&i| self.values[i].clone()))
            .collect();

        let mut last: Option<Vec<f64>> = None;
        for row in rows.iter_mut() {
            match row {
                Some(r) => last = Some(r.clone()),
                None => *row = last.clone(),
            }
        }
        let mut next: Option<Vec<f64>> = None;
        for row in rows.iter_mut().rev() {
            match row {
                Some(r) => next = Some(r.clone()),
                None => *row = next.clone(),
            }
        }

        let values = rows
            .into_iter()
            .map(|r| r.unwrap_or_else(|| vec![0.0; self.n_cols()]))
            .collect();
        Some(AssetFrame {
            dates: target.to_vec(),
            tickers: self.tickers.clone(),
            values,
        })
    }

    /// Rescale every row to sum to one. Rows with a non-positive or
    /// non-finite sum become equal-weight rows.
    pub fn normalize_rows(&mut self) {
        let n = self.n_cols();
        for row in self.values.iter_mut() {
            for v in row.iter_mut() {
                if !v.is_finite() || *v < 0.0 {
                    *v = 0.0;
                }
            }
            let sum: f64 = row.iter().sum();
            if sum > 0.0 && sum.is_finite() {
                row.iter_mut().for_each(|v| *v /= sum);
            } else if n > 0 {
                row.iter_mut().for_each(|v| *v = 1.0 / n as f64);
            }
        }
    }
}

/// Date-indexed, strictly positive, gap-free price matrix.
///
/// Missing values are forward-filled then back-filled at construction; the
/// matrix is immutable afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceMatrix {
    frame: AssetFrame,
}

impl PriceMatrix {
    /// Build a price matrix. Non-finite or non-positive entries are treated as
    /// gaps and filled from neighbouring dates.
    pub fn new(dates: Vec<NaiveDate>, tickers: Vec<String>, values: Vec<Vec<f64>>) -> Result<Self> {
        let frame = AssetFrame::new(dates, tickers, values)?;
        Self::from_frame(frame)
    }

    pub fn from_frame(mut frame: AssetFrame) -> Result<Self> {
        if frame.tickers.is_empty() {
            return Err(PipelineError::DataError("Price matrix has no assets".to_string()));
        }
        if frame.dates.windows(2).any(|w| w[1] <= w[0]) {
            return Err(PipelineError::DataError(
                "Price dates must be strictly increasing".to_string(),
            ));
        }

        for j in 0..frame.n_cols() {
            let mut col: Vec<f64> = frame
                .values
                .iter()
                .map(|row| {
                    let v = row[j];
                    if v.is_finite() && v > 0.0 {
                        v
                    } else {
                        f64::NAN
                    }
                })
                .collect();
            fill_forward_backward(&mut col);
            if !col.is_empty() && col.iter().any(|v| !v.is_finite()) {
                return Err(PipelineError::DataError(format!(
                    "Price column {} has no valid observations",
                    frame.tickers[j]
                )));
            }
            for (row, v) in frame.values.iter_mut().zip(col) {
                row[j] = v;
            }
        }

        Ok(Self { frame })
    }

    pub fn frame(&self) -> &AssetFrame {
        &self.frame
    }

    pub fn dates(&self) -> &[NaiveDate] {
        &self.frame.dates
    }

    pub fn tickers(&self) -> &[String] {
        &self.frame.tickers
    }

    pub fn values(&self) -> &[Vec<f64>] {
        &self.frame.values
    }

    pub fn len(&self) -> usize {
        self.frame.n_rows()
    }

    pub fn is_empty(&self) -> bool {
        self.frame.is_empty()
    }

    pub fn n_assets(&self) -> usize {
        self.frame.n_cols()
    }

    pub fn column(&self, j: usize) -> Vec<f64> {
        self.frame.column(j)
    }

    /// Daily percentage-change returns, indexed by `dates()[1..]`.
    pub fn returns(&self) -> ReturnMatrix {
        let values = self
            .frame
            .values
            .windows(2)
            .map(|w| w[1].iter().zip(&w[0]).map(|(p1, p0)| p1 / p0 - 1.0).collect())
            .collect();
        AssetFrame {
            dates: self.frame.dates.iter().skip(1).copied().collect(),
            tickers: self.frame.tickers.clone(),
            values,
        }
    }
}

/// Discrete market regime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Regime {
    Bull,
    Bear,
    HighVol,
    Crisis,
}

impl Regime {
    /// All regimes in index order.
    pub const ALL: [Regime; N_REGIMES] = [Regime::Bull, Regime::Bear, Regime::HighVol, Regime::Crisis];

    /// Integer id (0..4).
    pub fn index(&self) -> usize {
        match self {
            Regime::Bull => 0,
            Regime::Bear => 1,
            Regime::HighVol => 2,
            Regime::Crisis => 3,
        }
    }

    /// Regime from its integer id; out-of-range ids clamp to `Crisis`.
    pub fn from_index(index: usize) -> Self {
        Self::ALL[index.min(N_REGIMES - 1)]
    }

    /// Human-readable label.
    pub fn label(&self) -> &'static str {
        match self {
            Regime::Bull => "Bull",
            Regime::Bear => "Bear",
            Regime::HighVol => "High Vol",
            Regime::Crisis => "Crisis",
        }
    }
}

impl fmt::Display for Regime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Regime label per date with the blended probability vector behind it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegimeSeries {
    pub dates: Vec<NaiveDate>,
    pub labels: Vec<Regime>,
    /// Probability per regime, in `Regime::ALL` order. Rows sum to one.
    pub probabilities: Vec<[f64; N_REGIMES]>,
}

impl RegimeSeries {
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// Most recent label.
    pub fn last(&self) -> Option<Regime> {
        self.labels.last().copied()
    }

    /// Days spent in each regime, in `Regime::ALL` order.
    pub fn counts(&self) -> [usize; N_REGIMES] {
        let mut counts = [0; N_REGIMES];
        for r in &self.labels {
            counts[r.index()] += 1;
        }
        counts
    }

    /// Label lookup for a date.
    pub fn label_on(&self, date: NaiveDate) -> Option<Regime> {
        self.dates
            .binary_search(&date)
            .ok()
            .map(|i| self.labels[i])
    }

    /// Align onto `target` dates, forward-filling then back-filling. Dates
    /// that cannot be filled default to `Bull` with certainty.
    pub fn align_to(&self, target: &[NaiveDate]) -> RegimeSeries {
        let lookup: HashMap<NaiveDate, usize> =
            self.dates.iter().enumerate().map(|(i, d)| (*d, i)).collect();

        let mut idx: Vec<Option<usize>> = target.iter().map(|d| lookup.get(d).copied()).collect();
        let mut last = None;
        for slot in idx.iter_mut() {
            match slot {
                Some(i) => last = Some(*i),
                None => *slot = last,
            }
        }
        let mut next = None;
        for slot in idx.iter_mut().rev() {
            match slot {
                Some(i) => next = Some(*i),
                None => *slot = next,
            }
        }

        let mut bull = [0.0; N_REGIMES];
        bull[Regime::Bull.index()] = 1.0;

        RegimeSeries {
            dates: target.to_vec(),
            labels: idx
                .iter()
                .map(|i| i.map(|i| self.labels[i]).unwrap_or(Regime::Bull))
                .collect(),
            probabilities: idx
                .iter()
                .map(|i| i.map(|i| self.probabilities[i]).unwrap_or(bull))
                .collect(),
        }
    }
}

/// Advisory action for a single asset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SignalAction {
    Buy,
    Hold,
    Sell,
}

impl fmt::Display for SignalAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SignalAction::Buy => write!(f, "Buy"),
            SignalAction::Hold => write!(f, "Hold"),
            SignalAction::Sell => write!(f, "Sell"),
        }
    }
}

/// Per-asset advisory signal for the most recent date.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    pub ticker: String,
    pub action: SignalAction,
    pub rationale: String,
    pub weight: f64,
    /// Trailing 12-month momentum (0 when undefined).
    pub momentum: f64,
    pub regime: Regime,
    /// Predicted probability of a positive forward return, when the model was used.
    pub buy_probability: Option<f64>,
    pub explanation: Option<String>,
}
