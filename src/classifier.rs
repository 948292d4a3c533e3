//! Multinomial logistic regression.
//!
//! Used twice: as the discriminative half of the regime ensemble (four
//! classes) and as the buy/sell signal model (two classes). Inputs are
//! standardized with the training means and deviations, and the model is
//! fit by full-batch gradient descent with an L2 penalty from a zero start,
//! so training is deterministic.

use crate::error::{PipelineError, Result};
use serde::{Deserialize, Serialize};

/// Training hyperparameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ClassifierConfig {
    pub learning_rate: f64,
    pub n_iter: usize,
    pub l2: f64,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            learning_rate: 0.5,
            n_iter: 300,
            l2: 1e-3,
        }
    }
}

/// A fitted softmax classifier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SoftmaxRegression {
    n_classes: usize,
    /// `n_classes x n_features`, on standardized inputs.
    weights: Vec<Vec<f64>>,
    bias: Vec<f64>,
    means: Vec<f64>,
    scales: Vec<f64>,
}

fn softmax(logits: &[f64]) -> Vec<f64> {
    let max = logits.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    let exps: Vec<f64> = logits.iter().map(|z| (z - max).exp()).collect();
    let sum: f64 = exps.iter().sum();
    exps.iter().map(|e| e / sum).collect()
}

impl SoftmaxRegression {
    /// Fit on rows `x` with labels `y` in `0..n_classes`.
    pub fn fit(x: &[Vec<f64>], y: &[usize], n_classes: usize, config: &ClassifierConfig) -> Result<Self> {
        if x.is_empty() || x.len() != y.len() {
            return Err(PipelineError::InvalidInput(format!(
                "Classifier needs matching rows and labels, got {} and {}",
                x.len(),
                y.len()
            )));
        }
        if n_classes < 2 {
            return Err(PipelineError::InvalidInput(
                "Classifier needs at least two classes".to_string(),
            ));
        }
        if let Some(bad) = y.iter().find(|&&c| c >= n_classes) {
            return Err(PipelineError::InvalidInput(format!(
                "Label {} out of range for {} classes",
                bad, n_classes
            )));
        }
        let d = x[0].len();
        if x.iter().any(|row| row.len() != d || row.iter().any(|v| !v.is_finite())) {
            return Err(PipelineError::InvalidInput(
                "Classifier rows must be finite and equally sized".to_string(),
            ));
        }

        let n = x.len() as f64;
        let means: Vec<f64> = (0..d).map(|j| x.iter().map(|r| r[j]).sum::<f64>() / n).collect();
        let scales: Vec<f64> = (0..d)
            .map(|j| {
                let var = x.iter().map(|r| (r[j] - means[j]).powi(2)).sum::<f64>() / n;
                let sd = var.sqrt();
                if sd > 1e-12 {
                    sd
                } else {
                    1.0
                }
            })
            .collect();

        let mut model = Self {
            n_classes,
            weights: vec![vec![0.0; d]; n_classes],
            bias: vec![0.0; n_classes],
            means,
            scales,
        };
        let z: Vec<Vec<f64>> = x.iter().map(|r| model.standardize(r)).collect();

        for _ in 0..config.n_iter {
            let mut grad_w = vec![vec![0.0; d]; n_classes];
            let mut grad_b = vec![0.0; n_classes];
            for (row, &label) in z.iter().zip(y) {
                let p = softmax(&model.logits(row));
                for k in 0..n_classes {
                    let err = p[k] - if k == label { 1.0 } else { 0.0 };
                    grad_b[k] += err;
                    for (g, v) in grad_w[k].iter_mut().zip(row) {
                        *g += err * v;
                    }
                }
            }
            for k in 0..n_classes {
                model.bias[k] -= config.learning_rate * grad_b[k] / n;
                for j in 0..d {
                    let g = grad_w[k][j] / n + config.l2 * model.weights[k][j];
                    model.weights[k][j] -= config.learning_rate * g;
                }
            }
        }

        Ok(model)
    }

    pub fn n_classes(&self) -> usize {
        self.n_classes
    }

    pub fn n_features(&self) -> usize {
        self.means.len()
    }

    fn standardize(&self, row: &[f64]) -> Vec<f64> {
        row.iter()
            .zip(self.means.iter().zip(&self.scales))
            .map(|(v, (m, s))| (v - m) / s)
            .collect()
    }

    fn logits(&self, z: &[f64]) -> Vec<f64> {
        self.weights
            .iter()
            .zip(&self.bias)
            .map(|(w, b)| b + w.iter().zip(z).map(|(a, c)| a * c).sum::<f64>())
            .collect()
    }

    /// Class probabilities for one row (sums to one).
    pub fn predict_proba(&self, row: &[f64]) -> Vec<f64> {
        softmax(&self.logits(&self.standardize(row)))
    }

    /// Most likely class.
    pub fn predict(&self, row: &[f64]) -> usize {
        let p = self.predict_proba(row);
        argmax(&p)
    }

    /// Per-feature contribution to the logit of `class` for `row`.
    pub fn contributions(&self, row: &[f64], class: usize) -> Vec<f64> {
        let z = self.standardize(row);
        self.weights[class.min(self.n_classes - 1)]
            .iter()
            .zip(&z)
            .map(|(w, v)| w * v)
            .collect()
    }
}

/// Index of the largest value (first on ties).
pub fn argmax(values: &[f64]) -> usize {
    let mut best = 0;
    for (i, v) in values.iter().enumerate() {
        if *v > values[best] {
            best = i;
        }
    }
    best
}
