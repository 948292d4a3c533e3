//! Regime-conditioned bucket allocation.

use crate::error::{PipelineError, Result};
use crate::optimizer::equal_weight;
use crate::types::{AssetFrame, Regime, RegimeSeries, WeightMatrix, N_REGIMES};
use crate::universe::{AssetBucket, BucketAssignment};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Target fraction of capital per asset bucket.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BucketTargets {
    pub equity: f64,
    pub bonds: f64,
    pub gold: f64,
    pub cash: f64,
}

impl BucketTargets {
    pub const fn new(equity: f64, bonds: f64, gold: f64, cash: f64) -> Self {
        Self {
            equity,
            bonds,
            gold,
            cash,
        }
    }

    pub fn get(&self, bucket: AssetBucket) -> f64 {
        match bucket {
            AssetBucket::Equity => self.equity,
            AssetBucket::Bonds => self.bonds,
            AssetBucket::Gold => self.gold,
            AssetBucket::Cash => self.cash,
        }
    }
}

/// Bucket targets for each regime, in `Regime::ALL` order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegimeAllocationTable {
    targets: [BucketTargets; N_REGIMES],
}

impl Default for RegimeAllocationTable {
    fn default() -> Self {
        Self {
            targets: [
                BucketTargets::new(0.70, 0.20, 0.05, 0.05),
                BucketTargets::new(0.30, 0.50, 0.10, 0.10),
                BucketTargets::new(0.40, 0.35, 0.15, 0.10),
                BucketTargets::new(0.20, 0.20, 0.30, 0.30),
            ],
        }
    }
}

impl RegimeAllocationTable {
    pub fn targets(&self, regime: Regime) -> &BucketTargets {
        &self.targets[regime.index()]
    }

    /// Replace the targets of one regime. Targets must be non-negative and
    /// sum to one.
    pub fn with_targets(mut self, regime: Regime, targets: BucketTargets) -> Result<Self> {
        let values = AssetBucket::ALL.map(|b| targets.get(b));
        let sum: f64 = values.iter().sum();
        if values.iter().any(|v| !(v.is_finite() && *v >= 0.0)) || (sum - 1.0).abs() > 1e-6 {
            return Err(PipelineError::InvalidInput(format!(
                "Bucket targets for {} must be non-negative and sum to 1, got {}",
                regime, sum
            )));
        }
        self.targets[regime.index()] = targets;
        Ok(self)
    }

    /// Weights for one regime over `n_assets` columns. Each bucket's target
    /// is split equally across its columns; when less than 99% of the target
    /// lands on assets (an empty bucket) the row is uniform instead.
    pub fn allocate(&self, regime: Regime, assignment: &BucketAssignment, n_assets: usize) -> Vec<f64> {
        let targets = self.targets(regime);
        let mut w = vec![0.0; n_assets];
        for bucket in AssetBucket::ALL {
            let members: Vec<usize> = assignment
                .get(bucket)
                .iter()
                .copied()
                .filter(|&i| i < n_assets)
                .collect();
            if members.is_empty() {
                continue;
            }
            let share = targets.get(bucket) / members.len() as f64;
            for i in members {
                w[i] += share;
            }
        }

        let total: f64 = w.iter().sum();
        if total < 0.99 {
            return equal_weight(n_assets);
        }
        w.iter().map(|v| v / total).collect()
    }

    /// Weight matrix on `dates` following the aligned regime labels.
    pub fn allocate_series(
        &self,
        regimes: &RegimeSeries,
        dates: &[NaiveDate],
        tickers: &[String],
        assignment: &BucketAssignment,
    ) -> Result<WeightMatrix> {
        let aligned = regimes.align_to(dates);
        let per_regime: Vec<Vec<f64>> = Regime::ALL
            .iter()
            .map(|r| self.allocate(*r, assignment, tickers.len()))
            .collect();
        let rows = aligned
            .labels
            .iter()
            .map(|r| per_regime[r.index()].clone())
            .collect();
        debug!("Regime allocation over {} dates", dates.len());
        AssetFrame::new(dates.to_vec(), tickers.to_vec(), rows)
    }
}
