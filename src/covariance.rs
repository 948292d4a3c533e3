//! Covariance estimators over a window of asset returns.

use crate::error::{PipelineError, Result};
use crate::linalg::{symmetrize, Matrix};
use serde::{Deserialize, Serialize};

/// Estimator used to build the covariance matrix fed to the optimizers.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CovarianceEstimator {
    /// Unbiased sample covariance.
    Sample,
    /// Ledoit-Wolf shrinkage toward a scaled identity.
    LedoitWolf,
    /// Exponentially weighted covariance with the given half-life in periods.
    Exponential { halflife: f64 },
}

impl Default for CovarianceEstimator {
    fn default() -> Self {
        CovarianceEstimator::LedoitWolf
    }
}

/// Rows with any non-finite value are dropped.
fn complete_rows(returns: &[Vec<f64>]) -> Vec<&Vec<f64>> {
    returns
        .iter()
        .filter(|row| row.iter().all(|v| v.is_finite()))
        .collect()
}

/// Column means over complete rows.
pub fn expected_returns(returns: &[Vec<f64>]) -> Vec<f64> {
    let rows = complete_rows(returns);
    let n = returns.first().map(|r| r.len()).unwrap_or(0);
    if rows.is_empty() {
        return vec![0.0; n];
    }
    let t = rows.len() as f64;
    (0..n)
        .map(|j| rows.iter().map(|r| r[j]).sum::<f64>() / t)
        .collect()
}

impl CovarianceEstimator {
    /// Estimate the covariance matrix of `returns` (rows are periods).
    pub fn estimate(&self, returns: &[Vec<f64>]) -> Result<Matrix> {
        let rows = complete_rows(returns);
        if rows.len() < 2 {
            return Err(PipelineError::InsufficientData {
                required: 2,
                available: rows.len(),
            });
        }
        let mut cov = match self {
            CovarianceEstimator::Sample => sample(&rows),
            CovarianceEstimator::LedoitWolf => ledoit_wolf(&rows),
            CovarianceEstimator::Exponential { halflife } => {
                if *halflife <= 0.0 {
                    return Err(PipelineError::InvalidInput(
                        "EWMA half-life must be positive".to_string(),
                    ));
                }
                exponential(&rows, *halflife)
            }
        };
        symmetrize(&mut cov);
        Ok(cov)
    }
}

fn centered(rows: &[&Vec<f64>], means: &[f64]) -> Matrix {
    rows.iter()
        .map(|r| r.iter().zip(means).map(|(v, m)| v - m).collect())
        .collect()
}

fn column_means(rows: &[&Vec<f64>]) -> Vec<f64> {
    let n = rows[0].len();
    let t = rows.len() as f64;
    (0..n)
        .map(|j| rows.iter().map(|r| r[j]).sum::<f64>() / t)
        .collect()
}

/// `X'X / denom`.
#[allow(clippy::needless_range_loop)]
fn gram(x: &[Vec<f64>], denom: f64) -> Matrix {
    let n = x[0].len();
    let mut out = vec![vec![0.0; n]; n];
    for row in x {
        for i in 0..n {
            for j in i..n {
                out[i][j] += row[i] * row[j];
            }
        }
    }
    for i in 0..n {
        for j in i..n {
            out[i][j] /= denom;
            out[j][i] = out[i][j];
        }
    }
    out
}

fn sample(rows: &[&Vec<f64>]) -> Matrix {
    let means = column_means(rows);
    let x = centered(rows, &means);
    gram(&x, (rows.len() - 1) as f64)
}

/// Ledoit-Wolf (2004) optimal shrinkage toward `mu * I`.
#[allow(clippy::needless_range_loop)]
fn ledoit_wolf(rows: &[&Vec<f64>]) -> Matrix {
    let means = column_means(rows);
    let x = centered(rows, &means);
    let t = x.len() as f64;
    let n = x[0].len();

    let emp = gram(&x, t);
    let mu = (0..n).map(|i| emp[i][i]).sum::<f64>() / n as f64;

    // delta: distance of the sample covariance from the target.
    let mut delta = 0.0;
    for i in 0..n {
        for j in 0..n {
            let target = if i == j { mu } else { 0.0 };
            delta += (emp[i][j] - target).powi(2);
        }
    }
    delta /= n as f64;

    // beta: estimation error of the sample covariance.
    let mut beta = 0.0;
    for row in &x {
        for i in 0..n {
            for j in 0..n {
                beta += (row[i] * row[j] - emp[i][j]).powi(2);
            }
        }
    }
    beta /= n as f64 * t * t;
    let beta = beta.min(delta);

    let shrinkage = if delta > 0.0 { beta / delta } else { 0.0 };

    let mut out = emp;
    for i in 0..n {
        for j in 0..n {
            out[i][j] *= 1.0 - shrinkage;
            if i == j {
                out[i][j] += shrinkage * mu;
            }
        }
    }
    out
}

#[allow(clippy::needless_range_loop)]
fn exponential(rows: &[&Vec<f64>], halflife: f64) -> Matrix {
    let t = rows.len();
    let n = rows[0].len();
    let decay = 0.5f64.powf(1.0 / halflife);

    // Most recent row gets the largest weight.
    let raw: Vec<f64> = (0..t).map(|k| decay.powi((t - 1 - k) as i32)).collect();
    let total: f64 = raw.iter().sum();
    let w: Vec<f64> = raw.iter().map(|v| v / total).collect();

    let means: Vec<f64> = (0..n)
        .map(|j| rows.iter().zip(&w).map(|(r, wk)| wk * r[j]).sum())
        .collect();

    let mut out = vec![vec![0.0; n]; n];
    for (row, wk) in rows.iter().zip(&w) {
        for i in 0..n {
            let di = row[i] - means[i];
            for j in i..n {
                out[i][j] += wk * di * (row[j] - means[j]);
            }
        }
    }
    for i in 0..n {
        for j in 0..i {
            out[i][j] = out[j][i];
        }
    }
    out
}
