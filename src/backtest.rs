//! Cost-aware portfolio backtesting.
//!
//! Daily portfolio returns use the previous day's weights, so a weight set on
//! date `t` first earns on `t + 1`. Each rebalance pays its turnover times the
//! cost-plus-slippage rate, and the net return compounds into the equity
//! curve.

use crate::error::{PipelineError, Result};
use crate::execution::{turnover, CostModel, TurnoverLimiter};
use crate::linalg::dot;
use crate::stats::{drawdown_series, finite_or, max_drawdown, mean, rolling, sharpe_ratio, std_dev};
use crate::types::{PriceMatrix, Regime, RegimeSeries, WeightMatrix, TRADING_DAYS};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::info;

/// Backtest settings.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BacktestConfig {
    pub initial_capital: f64,
    /// Annual risk-free rate.
    pub risk_free_rate: f64,
    pub cost_model: CostModel,
    /// Cap on daily turnover; `None` trades straight to the targets.
    pub turnover_limit: Option<TurnoverLimiter>,
    pub rolling_window: usize,
}

impl Default for BacktestConfig {
    fn default() -> Self {
        Self {
            initial_capital: 1_000_000.0,
            risk_free_rate: 0.05,
            cost_model: CostModel::default(),
            turnover_limit: None,
            rolling_window: 63,
        }
    }
}

/// Summary statistics of a backtest.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BacktestMetrics {
    pub sharpe: f64,
    pub sortino: f64,
    /// Largest equity decline, <= 0.
    pub max_drawdown: f64,
    pub cagr: f64,
    pub total_return: f64,
    /// Annualized volatility of daily returns.
    pub volatility: f64,
    /// Mean daily turnover.
    pub turnover: f64,
    /// Total costs paid, as a fraction of capital.
    pub costs_pct: f64,
}

/// Performance while one regime was active.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegimePerformance {
    pub regime: Regime,
    pub label: String,
    pub sharpe: f64,
    pub days: usize,
    pub mean_return: f64,
}

/// Full backtest output, indexed by return dates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BacktestResult {
    pub dates: Vec<NaiveDate>,
    pub equity_curve: Vec<f64>,
    /// Net daily portfolio returns.
    pub returns: Vec<f64>,
    pub drawdown: Vec<f64>,
    pub turnover: Vec<f64>,
    pub costs: Vec<f64>,
    /// Trailing Sharpe ratio, NaN until the window fills.
    pub rolling_sharpe: Vec<f64>,
    /// Weights actually held after any turnover limit.
    pub weights: WeightMatrix,
    pub metrics: BacktestMetrics,
    pub regime_performance: Vec<RegimePerformance>,
}

impl BacktestResult {
    pub fn final_equity(&self) -> f64 {
        self.equity_curve.last().copied().unwrap_or(0.0)
    }
}

/// Runs weight schedules against prices.
#[derive(Debug, Clone, Default)]
pub struct Backtester {
    config: BacktestConfig,
}

impl Backtester {
    pub fn new(config: BacktestConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &BacktestConfig {
        &self.config
    }

    /// Backtest `weights` over `prices`, optionally splitting performance by
    /// regime. Weights are aligned to the return dates by forward and
    /// backward filling and renormalized.
    pub fn run(
        &self,
        prices: &PriceMatrix,
        weights: &WeightMatrix,
        regimes: Option<&RegimeSeries>,
    ) -> Result<BacktestResult> {
        if self.config.initial_capital <= 0.0 {
            return Err(PipelineError::ConfigError(
                "Initial capital must be positive".to_string(),
            ));
        }
        self.config.cost_model.validate()?;
        if weights.tickers != prices.tickers() {
            return Err(PipelineError::InvalidInput(format!(
                "Weight columns {:?} do not match price columns {:?}",
                weights.tickers,
                prices.tickers()
            )));
        }
        let returns = prices.returns();
        if returns.is_empty() {
            return Err(PipelineError::InsufficientData {
                required: 2,
                available: prices.len(),
            });
        }

        let mut held = weights
            .reindex_rows(&returns.dates)
            .ok_or_else(|| PipelineError::InvalidInput("Weight matrix is empty".to_string()))?;
        held.normalize_rows();
        if let Some(limiter) = &self.config.turnover_limit {
            held = limiter.apply(&held)?;
        }

        let n = returns.n_rows();
        let rate = self.config.cost_model.rate();
        let mut daily = Vec::with_capacity(n);
        let mut turnovers = Vec::with_capacity(n);
        let mut costs = Vec::with_capacity(n);
        for t in 0..n {
            let (gross, traded) = if t == 0 {
                (0.0, 0.0)
            } else {
                (
                    dot(&returns.values[t], &held.values[t - 1]),
                    turnover(&held.values[t - 1], &held.values[t]),
                )
            };
            let cost = traded * rate;
            daily.push(finite_or(gross - cost, 0.0));
            turnovers.push(traded);
            costs.push(cost);
        }

        let capital = self.config.initial_capital;
        let mut equity = Vec::with_capacity(n);
        let mut value = capital;
        for r in &daily {
            value *= 1.0 + r;
            equity.push(value);
        }

        let metrics = self.metrics(&daily, &equity, &turnovers, &costs);
        let rf_daily = self.config.risk_free_rate / TRADING_DAYS;
        let window = self.config.rolling_window.max(2);
        let rolling_sharpe = rolling(&daily, window, window, |w| {
            sharpe_ratio(w, rf_daily, TRADING_DAYS)
        });
        let regime_performance = regimes
            .map(|r| regime_performance(&daily, &r.align_to(&returns.dates)))
            .unwrap_or_default();

        info!(
            "Backtest: total return {:.2}%, Sharpe {:.2}, max drawdown {:.2}%",
            metrics.total_return * 100.0,
            metrics.sharpe,
            metrics.max_drawdown * 100.0
        );

        Ok(BacktestResult {
            dates: returns.dates.clone(),
            drawdown: drawdown_series(&equity),
            equity_curve: equity,
            returns: daily,
            turnover: turnovers,
            costs,
            rolling_sharpe,
            weights: held,
            metrics,
            regime_performance,
        })
    }

    fn metrics(&self, daily: &[f64], equity: &[f64], turnovers: &[f64], costs: &[f64]) -> BacktestMetrics {
        let capital = self.config.initial_capital;
        let rf = self.config.risk_free_rate;
        let total_return = equity.last().map(|e| e / capital - 1.0).unwrap_or(0.0);

        let years = daily.len() as f64 / TRADING_DAYS;
        let cagr = if 1.0 + total_return > 0.0 {
            (1.0 + total_return).powf(1.0 / years.max(0.01)) - 1.0
        } else {
            -1.0
        };

        let downside: Vec<f64> = daily.iter().copied().filter(|r| *r < 0.0).collect();
        let downside_dev = std_dev(&downside);
        let sortino = if downside_dev > 0.0 {
            (mean(daily) * TRADING_DAYS - rf) / (downside_dev * TRADING_DAYS.sqrt())
        } else {
            0.0
        };

        BacktestMetrics {
            sharpe: finite_or(sharpe_ratio(daily, rf / TRADING_DAYS, TRADING_DAYS), 0.0),
            sortino: finite_or(sortino, 0.0),
            max_drawdown: max_drawdown(equity),
            cagr: finite_or(cagr, 0.0),
            total_return,
            volatility: std_dev(daily) * TRADING_DAYS.sqrt(),
            turnover: mean(turnovers.get(1..).unwrap_or(&[])),
            costs_pct: costs.iter().sum(),
        }
    }
}

/// Sharpe ratio, day count and mean return per regime, in `Regime::ALL`
/// order, skipping regimes that never occur.
pub fn regime_performance(returns: &[f64], regimes: &RegimeSeries) -> Vec<RegimePerformance> {
    Regime::ALL
        .iter()
        .filter_map(|&regime| {
            let subset: Vec<f64> = returns
                .iter()
                .zip(&regimes.labels)
                .filter(|(_, r)| **r == regime)
                .map(|(ret, _)| *ret)
                .collect();
            if subset.is_empty() {
                return None;
            }
            Some(RegimePerformance {
                regime,
                label: regime.label().to_string(),
                sharpe: sharpe_ratio(&subset, 0.0, TRADING_DAYS),
                days: subset.len(),
                mean_return: mean(&subset),
            })
        })
        .collect()
}
