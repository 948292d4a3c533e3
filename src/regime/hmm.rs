//! Gaussian hidden Markov model with full-covariance emissions.
//!
//! Trained with Baum-Welch on a scaled forward-backward pass. Initialization
//! is deterministic: rows are sorted on the first feature and split into
//! contiguous chunks, one per state, so refits on identical data give
//! identical models.

use crate::error::{PipelineError, Result};
use crate::linalg::{cholesky, forward_substitute, Matrix};
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;
use tracing::debug;

/// Baum-Welch settings.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HmmConfig {
    pub n_states: usize,
    pub n_iter: usize,
    /// Stop when the log-likelihood gain falls below this.
    pub tol: f64,
    /// Ridge added to every covariance diagonal.
    pub min_covar: f64,
    /// Initial self-transition probability.
    pub stickiness: f64,
}

impl Default for HmmConfig {
    fn default() -> Self {
        Self {
            n_states: 4,
            n_iter: 100,
            tol: 1e-4,
            min_covar: 1e-3,
            stickiness: 0.9,
        }
    }
}

/// A fitted model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GaussianHmm {
    pub start_prob: Vec<f64>,
    pub transitions: Matrix,
    pub means: Matrix,
    pub covars: Vec<Matrix>,
    /// Log-likelihood of the training data under the final parameters.
    pub log_likelihood: f64,
    /// Baum-Welch iterations actually run.
    pub iterations: usize,
}

/// Log-density of a multivariate normal given its Cholesky factor.
fn log_normal_pdf(x: &[f64], mean: &[f64], chol: &[Vec<f64>]) -> f64 {
    let d = x.len() as f64;
    let diff: Vec<f64> = x.iter().zip(mean).map(|(a, b)| a - b).collect();
    let y = forward_substitute(chol, &diff);
    let maha: f64 = y.iter().map(|v| v * v).sum();
    let log_det: f64 = (0..chol.len()).map(|i| chol[i][i].ln()).sum::<f64>() * 2.0;
    -0.5 * (d * (2.0 * PI).ln() + log_det + maha)
}

/// Cholesky with escalating ridge for near-singular covariances.
fn robust_cholesky(cov: &[Vec<f64>], min_covar: f64) -> Result<Matrix> {
    let mut ridge = 0.0;
    for _ in 0..6 {
        let mut c = cov.to_vec();
        for (i, row) in c.iter_mut().enumerate() {
            row[i] += ridge;
        }
        if let Ok(l) = cholesky(&c) {
            return Ok(l);
        }
        ridge = if ridge == 0.0 { min_covar.max(1e-9) } else { ridge * 10.0 };
    }
    Err(PipelineError::OptimizationError(
        "Emission covariance is not positive definite".to_string(),
    ))
}

fn validate(x: &[Vec<f64>]) -> Result<usize> {
    let d = x.first().map(|r| r.len()).unwrap_or(0);
    if d == 0 {
        return Err(PipelineError::InvalidInput("HMM needs at least one feature".to_string()));
    }
    if x.iter().any(|r| r.len() != d || r.iter().any(|v| !v.is_finite())) {
        return Err(PipelineError::InvalidInput(
            "HMM features must be finite and equally sized".to_string(),
        ));
    }
    Ok(d)
}

/// Scaled forward-backward output.
struct Posterior {
    gamma: Matrix,
    xi_sum: Matrix,
    log_likelihood: f64,
}

impl GaussianHmm {
    pub fn n_states(&self) -> usize {
        self.start_prob.len()
    }

    pub fn n_features(&self) -> usize {
        self.means.first().map(|m| m.len()).unwrap_or(0)
    }

    /// Fit by Baum-Welch.
    pub fn fit(x: &[Vec<f64>], config: &HmmConfig) -> Result<Self> {
        let d = validate(x)?;
        let k = config.n_states;
        if k == 0 {
            return Err(PipelineError::InvalidInput("HMM needs at least one state".to_string()));
        }
        if x.len() < k + 1 {
            return Err(PipelineError::InsufficientData {
                required: k + 1,
                available: x.len(),
            });
        }

        let mut model = Self::initialize(x, d, config);
        let mut prev = f64::NEG_INFINITY;

        for iter in 0..config.n_iter {
            let post = model.expectation(x, config.min_covar)?;
            model.maximize(x, &post, config.min_covar);
            model.log_likelihood = post.log_likelihood;
            model.iterations = iter + 1;

            let gain = post.log_likelihood - prev;
            prev = post.log_likelihood;
            if gain.abs() < config.tol {
                break;
            }
        }
        // Likelihood under the final parameters.
        model.log_likelihood = model.score(x)?;
        debug!(
            "HMM converged after {} iterations, log-likelihood {:.3}",
            model.iterations, model.log_likelihood
        );
        Ok(model)
    }

    fn initialize(x: &[Vec<f64>], d: usize, config: &HmmConfig) -> Self {
        let k = config.n_states;
        let t = x.len();

        let mut order: Vec<usize> = (0..t).collect();
        order.sort_by(|&a, &b| x[a][0].total_cmp(&x[b][0]));

        let means: Matrix = (0..k)
            .map(|s| {
                let lo = s * t / k;
                let hi = ((s + 1) * t / k).max(lo + 1).min(t);
                let chunk = &order[lo..hi];
                (0..d)
                    .map(|j| chunk.iter().map(|&i| x[i][j]).sum::<f64>() / chunk.len() as f64)
                    .collect()
            })
            .collect();

        // Every state starts from the pooled covariance.
        let global_mean: Vec<f64> = (0..d)
            .map(|j| x.iter().map(|r| r[j]).sum::<f64>() / t as f64)
            .collect();
        let mut cov = vec![vec![0.0; d]; d];
        for row in x {
            for i in 0..d {
                for j in 0..d {
                    cov[i][j] += (row[i] - global_mean[i]) * (row[j] - global_mean[j]) / t as f64;
                }
            }
        }
        for (i, row) in cov.iter_mut().enumerate() {
            row[i] += config.min_covar;
        }

        let off = if k > 1 {
            (1.0 - config.stickiness) / (k - 1) as f64
        } else {
            0.0
        };
        let transitions = (0..k)
            .map(|i| {
                (0..k)
                    .map(|j| if i == j { if k > 1 { config.stickiness } else { 1.0 } } else { off })
                    .collect()
            })
            .collect();

        Self {
            start_prob: vec![1.0 / k as f64; k],
            transitions,
            means,
            covars: vec![cov; k],
            log_likelihood: f64::NEG_INFINITY,
            iterations: 0,
        }
    }

    /// Per-row log emission densities, `T x K`.
    fn log_emissions(&self, x: &[Vec<f64>], min_covar: f64) -> Result<Matrix> {
        let chols: Vec<Matrix> = self
            .covars
            .iter()
            .map(|c| robust_cholesky(c, min_covar))
            .collect::<Result<_>>()?;
        Ok(x.iter()
            .map(|row| {
                self.means
                    .iter()
                    .zip(&chols)
                    .map(|(m, l)| log_normal_pdf(row, m, l))
                    .collect()
            })
            .collect())
    }

    fn expectation(&self, x: &[Vec<f64>], min_covar: f64) -> Result<Posterior> {
        let log_b = self.log_emissions(x, min_covar)?;
        let t_len = x.len();
        let k = self.n_states();

        // Emission likelihoods shifted by the row max for stability.
        let mut shifts = vec![0.0; t_len];
        let b: Matrix = log_b
            .iter()
            .enumerate()
            .map(|(t, row)| {
                let m = row.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
                shifts[t] = m;
                row.iter().map(|v| (v - m).exp()).collect()
            })
            .collect();

        let mut alpha = vec![vec![0.0; k]; t_len];
        let mut scale = vec![0.0; t_len];
        for s in 0..k {
            alpha[0][s] = self.start_prob[s] * b[0][s];
        }
        scale[0] = normalize_in_place(&mut alpha[0]);
        for t in 1..t_len {
            for j in 0..k {
                let inflow: f64 = (0..k).map(|i| alpha[t - 1][i] * self.transitions[i][j]).sum();
                alpha[t][j] = inflow * b[t][j];
            }
            scale[t] = normalize_in_place(&mut alpha[t]);
        }

        let mut beta = vec![vec![1.0; k]; t_len];
        for t in (0..t_len - 1).rev() {
            for i in 0..k {
                beta[t][i] = (0..k)
                    .map(|j| self.transitions[i][j] * b[t + 1][j] * beta[t + 1][j])
                    .sum::<f64>()
                    / scale[t + 1];
            }
        }

        let gamma: Matrix = alpha
            .iter()
            .zip(&beta)
            .map(|(a, be)| {
                let mut g: Vec<f64> = a.iter().zip(be).map(|(x, y)| x * y).collect();
                normalize_in_place(&mut g);
                g
            })
            .collect();

        let mut xi_sum = vec![vec![0.0; k]; k];
        for t in 0..t_len.saturating_sub(1) {
            for i in 0..k {
                for j in 0..k {
                    xi_sum[i][j] += alpha[t][i] * self.transitions[i][j] * b[t + 1][j] * beta[t + 1][j]
                        / scale[t + 1];
                }
            }
        }

        let log_likelihood = scale
            .iter()
            .zip(&shifts)
            .map(|(c, s)| c.ln() + s)
            .sum();

        Ok(Posterior {
            gamma,
            xi_sum,
            log_likelihood,
        })
    }

    fn maximize(&mut self, x: &[Vec<f64>], post: &Posterior, min_covar: f64) {
        let k = self.n_states();
        let d = self.n_features();

        let mut start = post.gamma[0].iter().map(|g| g + 1e-10).collect::<Vec<f64>>();
        normalize_in_place(&mut start);
        self.start_prob = start;

        for i in 0..k {
            let row_sum: f64 = post.xi_sum[i].iter().sum();
            if row_sum > 1e-12 {
                self.transitions[i] = post.xi_sum[i].iter().map(|v| v / row_sum).collect();
            }
        }

        for s in 0..k {
            let weight: f64 = post.gamma.iter().map(|g| g[s]).sum();
            if weight < 1e-10 {
                continue;
            }
            let mean: Vec<f64> = (0..d)
                .map(|j| {
                    post.gamma
                        .iter()
                        .zip(x)
                        .map(|(g, row)| g[s] * row[j])
                        .sum::<f64>()
                        / weight
                })
                .collect();
            let mut cov = vec![vec![0.0; d]; d];
            for (g, row) in post.gamma.iter().zip(x) {
                for i in 0..d {
                    let di = row[i] - mean[i];
                    for j in i..d {
                        cov[i][j] += g[s] * di * (row[j] - mean[j]);
                    }
                }
            }
            for i in 0..d {
                for j in i..d {
                    cov[i][j] /= weight;
                    cov[j][i] = cov[i][j];
                }
                cov[i][i] += min_covar;
            }
            self.means[s] = mean;
            self.covars[s] = cov;
        }
    }

    fn check_dims(&self, x: &[Vec<f64>]) -> Result<()> {
        let d = validate(x)?;
        if d != self.n_features() {
            return Err(PipelineError::InvalidInput(format!(
                "HMM was fit on {} features, got {}",
                self.n_features(),
                d
            )));
        }
        Ok(())
    }

    /// Smoothed state posteriors, `T x K`; rows sum to one.
    pub fn posteriors(&self, x: &[Vec<f64>]) -> Result<Matrix> {
        if x.is_empty() {
            return Ok(Vec::new());
        }
        self.check_dims(x)?;
        Ok(self.expectation(x, 1e-6)?.gamma)
    }

    /// Log-likelihood of a sequence.
    pub fn score(&self, x: &[Vec<f64>]) -> Result<f64> {
        if x.is_empty() {
            return Ok(0.0);
        }
        self.check_dims(x)?;
        Ok(self.expectation(x, 1e-6)?.log_likelihood)
    }

    /// Most likely state sequence.
    pub fn viterbi(&self, x: &[Vec<f64>]) -> Result<Vec<usize>> {
        if x.is_empty() {
            return Ok(Vec::new());
        }
        self.check_dims(x)?;
        let log_b = self.log_emissions(x, 1e-6)?;
        let k = self.n_states();
        let t_len = x.len();
        let ln = |p: f64| if p > 0.0 { p.ln() } else { f64::NEG_INFINITY };

        let mut delta: Vec<f64> = (0..k).map(|s| ln(self.start_prob[s]) + log_b[0][s]).collect();
        let mut back = vec![vec![0usize; k]; t_len];
        for t in 1..t_len {
            let mut next = vec![f64::NEG_INFINITY; k];
            for j in 0..k {
                for i in 0..k {
                    let v = delta[i] + ln(self.transitions[i][j]);
                    if v > next[j] {
                        next[j] = v;
                        back[t][j] = i;
                    }
                }
                next[j] += log_b[t][j];
            }
            delta = next;
        }

        let mut state = 0;
        for s in 1..k {
            if delta[s] > delta[state] {
                state = s;
            }
        }
        let mut path = vec![0; t_len];
        path[t_len - 1] = state;
        for t in (1..t_len).rev() {
            state = back[t][state];
            path[t - 1] = state;
        }
        Ok(path)
    }
}

/// Normalize to sum one; returns the original sum. Zero rows become uniform.
fn normalize_in_place(v: &mut [f64]) -> f64 {
    let sum: f64 = v.iter().sum();
    if sum > 0.0 && sum.is_finite() {
        v.iter_mut().for_each(|x| *x /= sum);
        sum
    } else {
        let n = v.len() as f64;
        v.iter_mut().for_each(|x| *x = 1.0 / n);
        f64::MIN_POSITIVE
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Two well separated regimes, 50 rows each.
    fn two_regime_data() -> Vec<Vec<f64>> {
        let mut x = Vec::new();
        for i in 0..100 {
            let wobble = ((i * 7) % 11) as f64 / 11.0 - 0.5;
            if (i / 25) % 2 == 0 {
                x.push(vec![-2.0 + 0.1 * wobble, 0.1 * wobble]);
            } else {
                x.push(vec![2.0 + 0.1 * wobble, -0.1 * wobble]);
            }
        }
        x
    }

    #[test]
    fn test_fit_separates_states() {
        let x = two_regime_data();
        let config = HmmConfig {
            n_states: 2,
            ..Default::default()
        };
        let hmm = GaussianHmm::fit(&x, &config).unwrap();
        let path = hmm.viterbi(&x).unwrap();
        // Low state was initialized from the lower chunk.
        assert_eq!(path[0], 0);
        assert_eq!(path[30], 1);
        assert_eq!(path[60], 0);
        assert!(hmm.means[0][0] < -1.5 && hmm.means[1][0] > 1.5);
    }

    #[test]
    fn test_posteriors_rows_sum_to_one() {
        let x = two_regime_data();
        let hmm = GaussianHmm::fit(&x, &HmmConfig::default()).unwrap();
        let post = hmm.posteriors(&x).unwrap();
        assert_eq!(post.len(), x.len());
        for row in &post {
            assert!((row.iter().sum::<f64>() - 1.0).abs() < 1e-9);
        }
        for row in &hmm.transitions {
            assert!((row.iter().sum::<f64>() - 1.0).abs() < 1e-9);
        }
    }

    #[test]
    fn test_fit_is_deterministic() {
        let x = two_regime_data();
        let a = GaussianHmm::fit(&x, &HmmConfig::default()).unwrap();
        let b = GaussianHmm::fit(&x, &HmmConfig::default()).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_constant_features_do_not_fail() {
        let x = vec![vec![0.0, 0.0, 0.0]; 50];
        let hmm = GaussianHmm::fit(&x, &HmmConfig::default()).unwrap();
        let post = hmm.posteriors(&x).unwrap();
        assert!(post.iter().all(|r| r.iter().all(|p| p.is_finite())));
        assert_eq!(hmm.viterbi(&x).unwrap().len(), 50);
    }

    #[test]
    fn test_rejects_short_and_mismatched_input() {
        let config = HmmConfig::default();
        assert!(GaussianHmm::fit(&vec![vec![1.0]; 3], &config).is_err());
        let hmm = GaussianHmm::fit(&two_regime_data(), &config).unwrap();
        assert!(hmm.posteriors(&[vec![1.0, 2.0, 3.0]]).is_err());
    }
}
