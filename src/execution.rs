//! Execution costs and turnover control.

use crate::error::{PipelineError, Result};
use crate::types::{AssetFrame, WeightMatrix};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Proportional trading costs, in basis points of traded notional.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CostModel {
    pub transaction_cost_bps: f64,
    pub slippage_bps: f64,
}

impl Default for CostModel {
    fn default() -> Self {
        Self {
            transaction_cost_bps: 10.0,
            slippage_bps: 5.0,
        }
    }
}

impl CostModel {
    /// No costs at all.
    pub fn zero() -> Self {
        Self {
            transaction_cost_bps: 0.0,
            slippage_bps: 0.0,
        }
    }

    /// Cost per unit of turnover, as a fraction.
    pub fn rate(&self) -> f64 {
        (self.transaction_cost_bps + self.slippage_bps) / 1e4
    }

    /// Cost of a rebalance with the given turnover, as a fraction of capital.
    pub fn execution_cost(&self, turnover: f64) -> f64 {
        turnover * self.rate()
    }

    pub fn validate(&self) -> Result<()> {
        if self.transaction_cost_bps < 0.0 || self.slippage_bps < 0.0 {
            return Err(PipelineError::ConfigError(
                "Costs must be non-negative".to_string(),
            ));
        }
        Ok(())
    }
}

/// Sum of absolute weight changes.
pub fn turnover(previous: &[f64], target: &[f64]) -> f64 {
    previous
        .iter()
        .zip(target)
        .map(|(p, t)| (t - p).abs())
        .sum()
}

/// Caps the turnover of each rebalance.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TurnoverLimiter {
    pub max_turnover: f64,
}

impl Default for TurnoverLimiter {
    fn default() -> Self {
        Self { max_turnover: 0.30 }
    }
}

impl TurnoverLimiter {
    pub fn new(max_turnover: f64) -> Result<Self> {
        if !(max_turnover > 0.0 && max_turnover.is_finite()) {
            return Err(PipelineError::ConfigError(format!(
                "Max turnover must be positive, got {}",
                max_turnover
            )));
        }
        Ok(Self { max_turnover })
    }

    /// Move from `previous` toward `target`, scaling the trade so turnover is
    /// at most `max_turnover`, then renormalize.
    pub fn limit(&self, previous: &[f64], target: &[f64]) -> Vec<f64> {
        let total = turnover(previous, target);
        let scale = (self.max_turnover / (total + 1e-10)).min(1.0);
        let moved: Vec<f64> = previous
            .iter()
            .zip(target)
            .map(|(p, t)| p + (t - p) * scale)
            .collect();
        let sum: f64 = moved.iter().sum();
        if sum > 0.0 {
            moved.iter().map(|w| w / sum).collect()
        } else {
            target.to_vec()
        }
    }

    /// Apply the limit day by day. The first row is taken as given.
    pub fn apply(&self, targets: &WeightMatrix) -> Result<WeightMatrix> {
        let mut rows: Vec<Vec<f64>> = Vec::with_capacity(targets.n_rows());
        let mut clipped = 0usize;
        for target in &targets.values {
            let next = match rows.last() {
                Some(prev) => {
                    let limited = self.limit(prev, target);
                    if turnover(prev, target) > self.max_turnover {
                        clipped += 1;
                    }
                    limited
                }
                None => target.clone(),
            };
            rows.push(next);
        }
        debug!("Turnover limit clipped {} rebalances", clipped);
        AssetFrame::new(targets.dates.clone(), targets.tickers.clone(), rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn test_execution_cost() {
        let cost = CostModel::default();
        assert!((cost.rate() - 0.0015).abs() < 1e-15);
        assert!((cost.execution_cost(0.5) - 0.00075).abs() < 1e-15);
        assert_eq!(CostModel::zero().execution_cost(2.0), 0.0);
    }

    #[test]
    fn test_limit_scales_large_trades() {
        let limiter = TurnoverLimiter::new(0.3).unwrap();
        let w = limiter.limit(&[1.0, 0.0], &[0.0, 1.0]);
        assert!((turnover(&[1.0, 0.0], &w) - 0.3).abs() < 1e-9);
        assert!((w.iter().sum::<f64>() - 1.0).abs() < 1e-12);

        let small = limiter.limit(&[0.5, 0.5], &[0.6, 0.4]);
        assert!((small[0] - 0.6).abs() < 1e-9);
    }

    #[test]
    fn test_apply_converges_gradually() {
        let dates: Vec<NaiveDate> = (1..=5)
            .map(|d| NaiveDate::from_ymd_opt(2024, 1, d).unwrap())
            .collect();
        let mut rows = vec![vec![1.0, 0.0]];
        rows.extend(vec![vec![0.0, 1.0]; 4]);
        let targets = AssetFrame::new(dates, vec!["A".into(), "B".into()], rows).unwrap();
        let out = TurnoverLimiter::new(0.5).unwrap().apply(&targets).unwrap();
        assert_eq!(out.row(0), &[1.0, 0.0]);
        assert!((out.row(1)[1] - 0.25).abs() < 1e-9);
        assert!((out.row(2)[1] - 0.5).abs() < 1e-9);
        assert!((out.row(4)[1] - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_rejects_bad_limits() {
        assert!(TurnoverLimiter::new(0.0).is_err());
        assert!(TurnoverLimiter::new(f64::NAN).is_err());
    }
}
