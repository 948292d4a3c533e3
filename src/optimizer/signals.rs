//! Buy/Hold/Sell signals for the latest allocation.
//!
//! The preferred path trains a binary classifier on seven features per asset
//! and day (the six factors plus the regime id), labeled by whether the
//! asset's forward return over the horizon was positive. When the classifier
//! is unavailable or cannot be trained, fixed weight and momentum thresholds
//! are used instead. In a Crisis regime, rule-based Buy signals and Sell
//! signals caused only by a small weight are downgraded to Hold.

use crate::capability::{Capabilities, Capability};
use crate::classifier::{ClassifierConfig, SoftmaxRegression};
use crate::error::{PipelineError, Result};
use crate::factors::{FactorSet, FACTOR_NAMES};
use crate::stats::finite_or;
use crate::types::{PriceMatrix, Regime, RegimeSeries, Signal, SignalAction, WeightMatrix};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Number of classifier inputs: six factors plus the regime id.
pub const SIGNAL_FEATURES: usize = 7;

/// Signal thresholds and training settings.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SignalConfig {
    /// Buy probability above which the model says Buy.
    pub buy_threshold: f64,
    /// Buy probability below which the model says Sell.
    pub sell_threshold: f64,
    /// Forward return horizon used for training labels, in days.
    pub horizon: usize,
    pub min_training_rows: usize,
}

impl Default for SignalConfig {
    fn default() -> Self {
        Self {
            buy_threshold: 0.60,
            sell_threshold: 0.40,
            horizon: 21,
            min_training_rows: 50,
        }
    }
}

/// Rule-based action and rationale from weight and 12-month momentum.
pub fn rule_signal(weight: f64, momentum: f64) -> (SignalAction, &'static str) {
    if weight > 0.15 && momentum > 0.05 {
        (SignalAction::Buy, "Strong allocation + momentum")
    } else if weight > 0.1 && momentum > 0.0 {
        (SignalAction::Hold, "Adequate allocation")
    } else if weight < 0.05 || momentum < -0.1 {
        (SignalAction::Sell, "Underweight or weak momentum")
    } else {
        (SignalAction::Hold, "Neutral")
    }
}

fn feature_row(factors: &FactorSet, t: usize, j: usize, regime: Regime) -> [f64; SIGNAL_FEATURES] {
    let base = factors.features_at(t, j);
    let mut row = [0.0; SIGNAL_FEATURES];
    row[..6].copy_from_slice(&base);
    row[6] = regime.index() as f64;
    row
}

fn feature_name(k: usize) -> &'static str {
    FACTOR_NAMES.get(k).copied().unwrap_or("regime")
}

/// Generates the signal table for the most recent date.
#[derive(Debug, Clone)]
pub struct SignalGenerator {
    config: SignalConfig,
    capabilities: Capabilities,
}

impl SignalGenerator {
    pub fn new(config: SignalConfig, capabilities: Capabilities) -> Self {
        Self {
            config,
            capabilities,
        }
    }

    /// Fit the buy classifier. Returns `None` when there are too few
    /// complete rows or only one outcome class.
    pub fn train(
        &self,
        prices: &PriceMatrix,
        factors: &FactorSet,
        regimes: &[Regime],
    ) -> Result<Option<SoftmaxRegression>> {
        self.capabilities.require(Capability::Classifier)?;
        let n = prices.len();
        let h = self.config.horizon.max(1);
        let values = prices.values();

        let mut x = Vec::new();
        let mut y = Vec::new();
        for t in 0..n.saturating_sub(h) {
            for j in 0..prices.n_assets() {
                let row = feature_row(factors, t, j, regimes[t]);
                if row.iter().any(|v| !v.is_finite()) {
                    continue;
                }
                let forward = values[t + h][j] / values[t][j] - 1.0;
                x.push(row.to_vec());
                y.push(usize::from(forward > 0.0));
            }
        }

        let positives = y.iter().filter(|&&c| c == 1).count();
        if x.len() < self.config.min_training_rows || positives == 0 || positives == y.len() {
            debug!(
                "Signal classifier skipped ({} rows, {} positive)",
                x.len(),
                positives
            );
            return Ok(None);
        }
        let model = SoftmaxRegression::fit(&x, &y, 2, &ClassifierConfig::default())?;
        info!("Trained signal classifier on {} rows", x.len());
        Ok(Some(model))
    }

    /// Signals for each asset at the last price date. `regimes` may be on any
    /// date index and is aligned to the prices.
    pub fn generate(
        &self,
        prices: &PriceMatrix,
        factors: &FactorSet,
        weights: &WeightMatrix,
        regimes: &RegimeSeries,
    ) -> Result<Vec<Signal>> {
        let n = prices.len();
        if n == 0 || factors.n_rows() != n {
            return Err(PipelineError::InvalidInput(format!(
                "Factors cover {} rows, prices {}",
                factors.n_rows(),
                n
            )));
        }
        if weights.n_cols() != prices.n_assets() {
            return Err(PipelineError::InvalidInput(format!(
                "Weights have {} columns, prices {}",
                weights.n_cols(),
                prices.n_assets()
            )));
        }
        let labels = regimes.align_to(prices.dates()).labels;

        let model = match self.train(prices, factors, &labels) {
            Ok(m) => m,
            Err(e) if e.is_capability_unavailable() => {
                debug!("Classifier unavailable, using rule-based signals");
                None
            }
            Err(e) => return Err(e),
        };

        let t = n - 1;
        let regime = labels[t];
        let latest_weights = weights
            .last_row()
            .map(|r| r.to_vec())
            .unwrap_or_else(|| vec![1.0 / prices.n_assets() as f64; prices.n_assets()]);

        let signals = prices
            .tickers()
            .iter()
            .enumerate()
            .map(|(j, ticker)| {
                let weight = latest_weights[j];
                let momentum = finite_or(factors.momentum_12m.values[t][j], 0.0);
                let row = feature_row(factors, t, j, regime);
                let usable = model
                    .as_ref()
                    .filter(|_| row.iter().all(|v| v.is_finite()));

                match usable {
                    Some(model) => self.model_signal(model, &row, ticker, weight, momentum, regime),
                    None => {
                        let (action, rationale) = rule_signal(weight, momentum);
                        apply_crisis_override(Signal {
                            ticker: ticker.clone(),
                            action,
                            rationale: rationale.to_string(),
                            weight,
                            momentum,
                            regime,
                            buy_probability: None,
                            explanation: None,
                        })
                    }
                }
            })
            .collect();
        Ok(signals)
    }

    fn model_signal(
        &self,
        model: &SoftmaxRegression,
        row: &[f64; SIGNAL_FEATURES],
        ticker: &str,
        weight: f64,
        momentum: f64,
        regime: Regime,
    ) -> Signal {
        let p = model.predict_proba(row)[1];
        let (action, rationale) = if p > self.config.buy_threshold {
            (SignalAction::Buy, "Model expects positive forward return")
        } else if p < self.config.sell_threshold {
            (SignalAction::Sell, "Model expects negative forward return")
        } else {
            (SignalAction::Hold, "Model undecided")
        };

        let contributions = model.contributions(row, 1);
        let top = contributions
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.abs().total_cmp(&b.1.abs()))
            .map(|(k, c)| {
                let direction = if *c >= 0.0 { "toward Buy" } else { "toward Sell" };
                format!("{} pushes {} ({:+.2})", feature_name(k), direction, c)
            });

        Signal {
            ticker: ticker.to_string(),
            action,
            rationale: format!("{} (p={:.2})", rationale, p),
            weight,
            momentum,
            regime,
            buy_probability: Some(p),
            explanation: top,
        }
    }
}

/// Crisis regimes hold rather than add risk or dump a position for being small.
/// Only rule-based signals are overridden; model signals keep their thresholds.
fn apply_crisis_override(mut signal: Signal) -> Signal {
    if signal.regime != Regime::Crisis || signal.buy_probability.is_some() {
        return signal;
    }
    let underweight_only = signal.action == SignalAction::Sell && signal.momentum >= -0.1;
    if signal.action == SignalAction::Buy || underweight_only {
        signal.action = SignalAction::Hold;
        signal.rationale = format!("Crisis regime: {}", signal.rationale);
    }
    signal
}
