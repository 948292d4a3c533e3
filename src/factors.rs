//! Price-derived factors.
//!
//! Every factor is a pure function of the price matrix and fixed windows,
//! aligned to the price dates. Positions without enough history are NaN;
//! nothing is zero-filled here.
//!
//! - **Momentum**: long-window return minus short-window return (12-1)
//! - **Volatility**: annualized rolling standard deviation of daily returns
//! - **Drawdown**: loss from the running peak, always <= 0
//! - **Value**: negative 12-month return
//! - **Quality**: blend of inverse-volatility rank and momentum rank

use crate::stats::{pct_rank, rolling_std};
use crate::types::{AssetFrame, FactorMatrix, PriceMatrix, TRADING_DAYS};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Names of the factors in a [`FactorSet`], in feature-vector order.
pub const FACTOR_NAMES: [&str; 6] = [
    "momentum_12_1",
    "momentum_12m",
    "volatility",
    "drawdown",
    "value",
    "quality",
];

/// Window parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FactorEngine {
    /// Short window in trading days (1 month).
    pub short_window: usize,
    /// Long window in trading days (12 months).
    pub long_window: usize,
    /// Volatility window used by the quality proxy.
    pub quality_window: usize,
}

impl Default for FactorEngine {
    fn default() -> Self {
        Self {
            short_window: 21,
            long_window: 252,
            quality_window: 63,
        }
    }
}

/// Apply a per-asset column transform in parallel.
fn map_columns<F>(prices: &PriceMatrix, f: F) -> FactorMatrix
where
    F: Fn(&[f64]) -> Vec<f64> + Sync,
{
    let columns: Vec<Vec<f64>> = (0..prices.n_assets())
        .into_par_iter()
        .map(|j| f(&prices.column(j)))
        .collect();
    AssetFrame::from_columns(prices.dates(), prices.tickers(), &columns)
}

/// `p[t] / p[t - k] - 1`, NaN for `t < k`.
fn pct_change(col: &[f64], k: usize) -> Vec<f64> {
    (0..col.len())
        .map(|t| if t >= k && k > 0 { col[t] / col[t - k] - 1.0 } else { f64::NAN })
        .collect()
}

fn annualized_vol(col: &[f64], window: usize) -> Vec<f64> {
    // Daily returns aligned to prices; the first is undefined.
    let returns = pct_change(col, 1);
    let ann = TRADING_DAYS.sqrt();
    rolling_std(&returns, window)
        .into_iter()
        .map(|v| v * ann)
        .collect()
}

fn binary_op(a: &FactorMatrix, b: &FactorMatrix, op: impl Fn(f64, f64) -> f64) -> FactorMatrix {
    let values = a
        .values
        .iter()
        .zip(&b.values)
        .map(|(ra, rb)| ra.iter().zip(rb).map(|(x, y)| op(*x, *y)).collect())
        .collect();
    AssetFrame {
        dates: a.dates.clone(),
        tickers: a.tickers.clone(),
        values,
    }
}

impl FactorEngine {
    pub fn new(short_window: usize, long_window: usize) -> Self {
        Self {
            short_window,
            long_window,
            ..Self::default()
        }
    }

    /// Long-window return minus short-window return.
    pub fn momentum(&self, prices: &PriceMatrix, short_window: usize, long_window: usize) -> FactorMatrix {
        let long = self.period_return(prices, long_window);
        let short = self.period_return(prices, short_window);
        binary_op(&long, &short, |l, s| l - s)
    }

    /// 12-1 momentum with the engine's windows.
    pub fn momentum_12_1(&self, prices: &PriceMatrix) -> FactorMatrix {
        self.momentum(prices, self.short_window, self.long_window)
    }

    /// Return over the short window.
    pub fn momentum_1m(&self, prices: &PriceMatrix) -> FactorMatrix {
        self.period_return(prices, self.short_window)
    }

    /// Return over the long window.
    pub fn momentum_12m(&self, prices: &PriceMatrix) -> FactorMatrix {
        self.period_return(prices, self.long_window)
    }

    /// Percentage change over `k` days.
    pub fn period_return(&self, prices: &PriceMatrix, k: usize) -> FactorMatrix {
        map_columns(prices, |col| pct_change(col, k))
    }

    /// Annualized rolling volatility of daily returns.
    pub fn rolling_volatility(&self, prices: &PriceMatrix, window: usize) -> FactorMatrix {
        map_columns(prices, |col| annualized_vol(col, window))
    }

    /// Running peak-to-trough loss per asset.
    pub fn drawdown(&self, prices: &PriceMatrix) -> FactorMatrix {
        map_columns(prices, |col| {
            let mut peak = f64::NEG_INFINITY;
            col.iter()
                .map(|&p| {
                    peak = peak.max(p);
                    ((p - peak) / peak).min(0.0)
                })
                .collect()
        })
    }

    /// Negative 12-month return.
    pub fn value_proxy(&self, prices: &PriceMatrix) -> FactorMatrix {
        let mut m = self.momentum_12m(prices);
        for row in m.values.iter_mut() {
            row.iter_mut().for_each(|v| *v = -*v);
        }
        m
    }

    /// `0.5 * (1 - vol_rank) + 0.5 * mom_rank`, ranks taken across assets per date.
    pub fn quality_proxy(&self, prices: &PriceMatrix) -> FactorMatrix {
        let vol = self.rolling_volatility(prices, self.quality_window);
        let mom = self.momentum_12m(prices);
        let values = vol
            .values
            .iter()
            .zip(&mom.values)
            .map(|(v_row, m_row)| {
                let vr = pct_rank(v_row);
                let mr = pct_rank(m_row);
                vr.iter()
                    .zip(&mr)
                    .map(|(v, m)| (1.0 - v) * 0.5 + m * 0.5)
                    .collect()
            })
            .collect();
        AssetFrame {
            dates: vol.dates,
            tickers: vol.tickers,
            values,
        }
    }

    /// All six named factors.
    pub fn compute_all(&self, prices: &PriceMatrix) -> FactorSet {
        debug!(
            "Computing factors for {} dates x {} assets",
            prices.len(),
            prices.n_assets()
        );
        FactorSet {
            momentum_12_1: self.momentum_12_1(prices),
            momentum_12m: self.momentum_12m(prices),
            volatility: self.rolling_volatility(prices, self.short_window),
            drawdown: self.drawdown(prices),
            value: self.value_proxy(prices),
            quality: self.quality_proxy(prices),
        }
    }
}

/// The six named factor matrices.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FactorSet {
    pub momentum_12_1: FactorMatrix,
    pub momentum_12m: FactorMatrix,
    pub volatility: FactorMatrix,
    pub drawdown: FactorMatrix,
    pub value: FactorMatrix,
    pub quality: FactorMatrix,
}

impl FactorSet {
    /// Factor by name.
    pub fn get(&self, name: &str) -> Option<&FactorMatrix> {
        match name {
            "momentum_12_1" => Some(&self.momentum_12_1),
            "momentum_12m" => Some(&self.momentum_12m),
            "volatility" => Some(&self.volatility),
            "drawdown" => Some(&self.drawdown),
            "value" => Some(&self.value),
            "quality" => Some(&self.quality),
            _ => None,
        }
    }

    /// `(name, matrix)` pairs in [`FACTOR_NAMES`] order.
    pub fn iter(&self) -> impl Iterator<Item = (&'static str, &FactorMatrix)> {
        [
            &self.momentum_12_1,
            &self.momentum_12m,
            &self.volatility,
            &self.drawdown,
            &self.value,
            &self.quality,
        ]
        .into_iter()
        .enumerate()
        .map(|(i, m)| (FACTOR_NAMES[i], m))
    }

    pub fn n_rows(&self) -> usize {
        self.momentum_12_1.n_rows()
    }

    /// Factor vector of asset `j` at row `t`, in [`FACTOR_NAMES`] order.
    pub fn features_at(&self, t: usize, j: usize) -> [f64; 6] {
        let mut out = [0.0; 6];
        for (k, (_, m)) in self.iter().enumerate() {
            out[k] = m.values[t][j];
        }
        out
    }
}
