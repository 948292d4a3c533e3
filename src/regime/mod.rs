//! Market regime detection.
//!
//! Each date gets one of four labels (Bull, Bear, High Vol, Crisis) from a
//! Gaussian HMM over rolling-standardized market features, optionally blended
//! with a softmax classifier trained on rule-based pseudo-labels.
//!
//! # Features
//!
//! - **return**: cross-sectional mean of daily asset returns
//! - **volatility**: cross-sectional dispersion (rolling 21-day std for a
//!   single asset)
//! - **vix**: external volatility index aligned to the return dates
//! - **drawdown**: mean asset drawdown, when supplied
//!
//! Each feature is z-scored against a trailing 252-day window (21 minimum).
//!
//! # State labels
//!
//! HMM state indices carry no meaning. At fit time each state is labeled by a
//! majority vote of the pseudo-labels of the days it claims; states that claim
//! no day are ranked on their fitted means. The mapping is stored with the
//! model and reused for every prediction.

pub mod cache;
pub mod hmm;

use crate::capability::{Capabilities, Capability};
use crate::classifier::{argmax, ClassifierConfig, SoftmaxRegression};
use crate::error::{PipelineError, Result};
use crate::metadata::feature_fingerprint;
use crate::stats::{median, rolling, rolling_mean, rolling_std, std_dev};
use crate::types::{
    fill_forward_backward, DateSeries, FactorMatrix, Regime, RegimeSeries, ReturnMatrix, N_REGIMES,
    TRADING_DAYS,
};
use cache::{cache_key, CachedRegimeModel, RegimeCacheStore};
use chrono::NaiveDate;
use hmm::{GaussianHmm, HmmConfig};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Regime detector settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegimeConfig {
    /// Number of hidden states.
    pub n_regimes: usize,
    pub n_iter: usize,
    pub tol: f64,
    /// Seed for the stochastic label blend.
    pub seed: u64,
    /// Blend classifier probabilities into the HMM output.
    pub ensemble: bool,
    /// Ignore a matching cache entry.
    pub force_refit: bool,
    pub zscore_window: usize,
    pub zscore_min_periods: usize,
    /// Probability that a classifier training label is the HMM label rather
    /// than the rule label.
    pub label_mix: f64,
    /// Weight of the HMM in the blended probabilities.
    pub generative_weight: f64,
    /// Feature rows hashed into the fingerprint.
    pub fingerprint_rows: usize,
}

impl Default for RegimeConfig {
    fn default() -> Self {
        Self {
            n_regimes: N_REGIMES,
            n_iter: 100,
            tol: 1e-4,
            seed: 42,
            ensemble: true,
            force_refit: false,
            zscore_window: 252,
            zscore_min_periods: 21,
            label_mix: 0.3,
            generative_weight: 0.7,
            fingerprint_rows: 64,
        }
    }
}

/// Standardized features plus the raw series the pseudo-label rules use.
#[derive(Debug, Clone, PartialEq)]
pub struct RegimeFeatures {
    pub dates: Vec<NaiveDate>,
    pub names: Vec<String>,
    /// `dates x names`, z-scored.
    pub values: Vec<Vec<f64>>,
    pub mean_return: Vec<f64>,
    pub vix: Vec<f64>,
}

/// Rolling z-score of one column. Zero deviations are replaced by the
/// nearest non-zero one (or 1), and undefined positions become 0.
fn rolling_zscore(col: &[f64], window: usize, min_periods: usize) -> Vec<f64> {
    let mean = rolling_mean(col, window, min_periods);
    let mut std = rolling(col, window, min_periods, std_dev);
    for s in std.iter_mut() {
        if *s == 0.0 {
            *s = f64::NAN;
        }
    }
    fill_forward_backward(&mut std);
    col.iter()
        .zip(mean.iter().zip(&std))
        .map(|(x, (m, s))| {
            let s = if s.is_finite() && *s != 0.0 { *s } else { 1.0 };
            let z = (x - m) / s;
            if z.is_finite() {
                z
            } else {
                0.0
            }
        })
        .collect()
}

/// Build the regime feature matrix on the return dates.
pub fn build_features(
    returns: &ReturnMatrix,
    vix: &DateSeries,
    drawdown: Option<&FactorMatrix>,
    config: &RegimeConfig,
) -> RegimeFeatures {
    let n_assets = returns.n_cols();

    let mean_return: Vec<f64> = returns
        .values
        .iter()
        .map(|row| {
            let finite: Vec<f64> = row.iter().copied().filter(|v| v.is_finite()).collect();
            if finite.is_empty() {
                0.0
            } else {
                finite.iter().sum::<f64>() / finite.len() as f64
            }
        })
        .collect();

    let mut volatility: Vec<f64> = if n_assets > 1 {
        returns
            .values
            .iter()
            .map(|row| {
                let finite: Vec<f64> = row.iter().copied().filter(|v| v.is_finite()).collect();
                if finite.len() > 1 {
                    std_dev(&finite)
                } else {
                    f64::NAN
                }
            })
            .collect()
    } else {
        rolling_std(&mean_return, 21)
    };
    if let Some(med) = median(&volatility) {
        for v in volatility.iter_mut() {
            if !v.is_finite() {
                *v = med;
            }
        }
    }
    for v in volatility.iter_mut() {
        if *v == 0.0 {
            *v = f64::NAN;
        }
    }
    fill_forward_backward(&mut volatility);
    for v in volatility.iter_mut() {
        if !v.is_finite() {
            *v = 0.01;
        }
    }

    let vix_aligned = vix.reindex(&returns.dates, crate::data::DEFAULT_VOLATILITY_INDEX);

    let mut names = vec![
        "return".to_string(),
        "volatility".to_string(),
        "vix".to_string(),
    ];
    let mut raw_columns = vec![mean_return.clone(), volatility, vix_aligned.clone()];

    if let Some(dd) = drawdown.filter(|d| !d.is_empty()) {
        let mean_dd: Vec<f64> = dd
            .values
            .iter()
            .map(|row| {
                let finite: Vec<f64> = row.iter().copied().filter(|v| v.is_finite()).collect();
                if finite.is_empty() {
                    f64::NAN
                } else {
                    finite.iter().sum::<f64>() / finite.len() as f64
                }
            })
            .collect();
        let series = DateSeries {
            dates: dd.dates.clone(),
            values: mean_dd,
        };
        names.push("drawdown".to_string());
        raw_columns.push(series.reindex(&returns.dates, 0.0));
    }

    let z_columns: Vec<Vec<f64>> = raw_columns
        .iter()
        .map(|c| rolling_zscore(c, config.zscore_window, config.zscore_min_periods))
        .collect();
    let values = (0..returns.n_rows())
        .map(|t| z_columns.iter().map(|c| c[t]).collect())
        .collect();

    RegimeFeatures {
        dates: returns.dates.clone(),
        names,
        values,
        mean_return,
        vix: vix_aligned,
    }
}

/// Deterministic rule labels, checked in order Crisis, High Vol, Bear, Bull:
///
/// - Crisis: 21-day realized vol above 40% or volatility index above 40
/// - High Vol: realized vol above 25% and volatility index above 25
/// - Bear: trailing 63-day mean return below zero
/// - Bull: otherwise
pub fn pseudo_labels(mean_return: &[f64], vix: &[f64]) -> Vec<Regime> {
    let ann = TRADING_DAYS.sqrt();
    let realized: Vec<f64> = rolling_std(mean_return, 21).iter().map(|v| v * ann).collect();
    let trend = rolling_mean(mean_return, 63, 1);

    (0..mean_return.len())
        .map(|t| {
            let rv = realized[t];
            let level = vix.get(t).copied().unwrap_or(crate::data::DEFAULT_VOLATILITY_INDEX);
            if (rv.is_finite() && rv > 0.40) || level > 40.0 {
                Regime::Crisis
            } else if rv.is_finite() && rv > 0.25 && level > 25.0 {
                Regime::HighVol
            } else if trend[t].is_finite() && trend[t] < 0.0 {
                Regime::Bear
            } else {
                Regime::Bull
            }
        })
        .collect()
}

/// Weighted blend of two probability vectors over the regime labels,
/// renormalized; the label is the arg-max.
pub fn blend_probabilities(
    generative: &[f64; N_REGIMES],
    discriminative: Option<&[f64; N_REGIMES]>,
    generative_weight: f64,
) -> ([f64; N_REGIMES], Regime) {
    let mut out = *generative;
    if let Some(d) = discriminative {
        let w = generative_weight.clamp(0.0, 1.0);
        for k in 0..N_REGIMES {
            out[k] = w * generative[k] + (1.0 - w) * d[k];
        }
    }
    let sum: f64 = out.iter().sum();
    if sum > 0.0 && sum.is_finite() {
        out.iter_mut().for_each(|p| *p /= sum);
    } else {
        out = [1.0 / N_REGIMES as f64; N_REGIMES];
    }
    let label = Regime::from_index(argmax(&out));
    (out, label)
}

/// Assign a label to each HMM state.
fn map_states(hmm: &GaussianHmm, assigned: &[usize], pseudo: &[Regime]) -> Vec<Regime> {
    let k = hmm.n_states();
    let mut votes = vec![[0usize; N_REGIMES]; k];
    for (&s, r) in assigned.iter().zip(pseudo) {
        votes[s][r.index()] += 1;
    }

    let ranked = rank_states(hmm);
    (0..k)
        .map(|s| {
            let v = votes[s];
            if v.iter().sum::<usize>() == 0 {
                ranked[s]
            } else {
                // Ties go to the earlier label.
                let mut best = 0;
                for i in 1..N_REGIMES {
                    if v[i] > v[best] {
                        best = i;
                    }
                }
                Regime::from_index(best)
            }
        })
        .collect()
}

/// Label states from their means: highest stress minus return is Crisis,
/// then highest return is Bull, then highest stress is High Vol, the rest
/// are Bear. Stress is the sum of the volatility and vix means.
fn rank_states(hmm: &GaussianHmm) -> Vec<Regime> {
    let k = hmm.n_states();
    let ret = |s: usize| hmm.means[s].first().copied().unwrap_or(0.0);
    let stress = |s: usize| hmm.means[s].iter().skip(1).take(2).sum::<f64>();

    let mut labels: Vec<Option<Regime>> = vec![None; k];
    let pick = |labels: &mut Vec<Option<Regime>>, score: &dyn Fn(usize) -> f64, regime: Regime| {
        let best = (0..k)
            .filter(|&s| labels[s].is_none())
            .max_by(|&a, &b| score(a).total_cmp(&score(b)));
        if let Some(s) = best {
            labels[s] = Some(regime);
        }
    };
    pick(&mut labels, &|s| stress(s) - ret(s), Regime::Crisis);
    pick(&mut labels, &ret, Regime::Bull);
    pick(&mut labels, &stress, Regime::HighVol);
    labels.into_iter().map(|l| l.unwrap_or(Regime::Bear)).collect()
}

/// A fitted regime model: HMM, state labels and optional classifier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegimeModel {
    pub hmm: GaussianHmm,
    /// Label of each HMM state.
    pub state_labels: Vec<Regime>,
    pub classifier: Option<SoftmaxRegression>,
    pub feature_names: Vec<String>,
}

impl RegimeModel {
    /// HMM posteriors collapsed onto the regime labels.
    fn generative_probabilities(&self, x: &[Vec<f64>]) -> Result<Vec<[f64; N_REGIMES]>> {
        let post = self.hmm.posteriors(x)?;
        Ok(post
            .iter()
            .map(|row| {
                let mut p = [0.0; N_REGIMES];
                for (s, prob) in row.iter().enumerate() {
                    p[self.state_labels[s].index()] += prob;
                }
                p
            })
            .collect())
    }

    fn discriminative_probabilities(&self, x: &[Vec<f64>]) -> Option<Vec<[f64; N_REGIMES]>> {
        let clf = self.classifier.as_ref()?;
        Some(
            x.iter()
                .map(|row| {
                    let probs = clf.predict_proba(row);
                    let mut p = [0.0; N_REGIMES];
                    for (k, v) in probs.iter().enumerate().take(N_REGIMES) {
                        p[k] = *v;
                    }
                    p
                })
                .collect(),
        )
    }
}

/// Whether `fit` trained a new model or reused a cached one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FitOutcome {
    Fitted,
    LoadedFromCache,
}

/// HMM regime detector with an optional model cache.
pub struct RegimeDetector {
    config: RegimeConfig,
    capabilities: Capabilities,
    store: Option<Arc<dyn RegimeCacheStore>>,
    model: Option<RegimeModel>,
}

impl RegimeDetector {
    pub fn new(config: RegimeConfig, capabilities: Capabilities) -> Self {
        Self {
            config,
            capabilities,
            store: None,
            model: None,
        }
    }

    /// Attach a cache store.
    pub fn with_store(mut self, store: Arc<dyn RegimeCacheStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn config(&self) -> &RegimeConfig {
        &self.config
    }

    pub fn model(&self) -> Option<&RegimeModel> {
        self.model.as_ref()
    }

    /// Cache key for this detector.
    pub fn cache_key(&self) -> String {
        cache_key(self.config.n_regimes)
    }

    fn ensemble_active(&self) -> bool {
        self.config.ensemble && self.capabilities.has(Capability::Classifier)
    }

    fn active_store(&self) -> Option<&Arc<dyn RegimeCacheStore>> {
        if self.capabilities.has(Capability::Persistence) {
            self.store.as_ref()
        } else {
            None
        }
    }

    /// Fit on returns, the volatility index and optional drawdowns, reusing a
    /// cached model when the feature fingerprint matches.
    pub fn fit(
        &mut self,
        returns: &ReturnMatrix,
        vix: &DateSeries,
        drawdown: Option<&FactorMatrix>,
    ) -> Result<FitOutcome> {
        self.capabilities.require(Capability::StateModel)?;
        let features = build_features(returns, vix, drawdown, &self.config);
        self.fit_features(&features)
    }

    /// Fit on prebuilt features.
    pub fn fit_features(&mut self, features: &RegimeFeatures) -> Result<FitOutcome> {
        self.capabilities.require(Capability::StateModel)?;
        let fingerprint = feature_fingerprint(&features.values, self.config.fingerprint_rows);
        let key = self.cache_key();

        if !self.config.force_refit {
            if let Some(store) = self.active_store() {
                match store.read(&key) {
                    Ok(Some(entry))
                        if entry.fingerprint == fingerprint
                            && entry.model.feature_names == features.names =>
                    {
                        info!("Regime model loaded from cache ({})", key);
                        self.model = Some(entry.model);
                        return Ok(FitOutcome::LoadedFromCache);
                    }
                    Ok(_) => debug!("No matching cached regime model for {}", key),
                    Err(e) => warn!("Ignoring unreadable regime cache: {}", e),
                }
            }
        }

        let model = self.train(features)?;
        info!(
            "Fitted regime model on {} rows, state labels {:?}",
            features.values.len(),
            model.state_labels
        );

        if let Some(store) = self.active_store() {
            let entry = CachedRegimeModel {
                fingerprint,
                model: model.clone(),
            };
            if let Err(e) = store.write(&key, &entry) {
                warn!("Could not persist regime model: {}", e);
            }
        }
        self.model = Some(model);
        Ok(FitOutcome::Fitted)
    }

    fn train(&self, features: &RegimeFeatures) -> Result<RegimeModel> {
        let x = &features.values;
        let hmm_config = HmmConfig {
            n_states: self.config.n_regimes,
            n_iter: self.config.n_iter,
            tol: self.config.tol,
            ..HmmConfig::default()
        };
        let hmm = GaussianHmm::fit(x, &hmm_config)?;
        let assigned = hmm.viterbi(x)?;
        let pseudo = pseudo_labels(&features.mean_return, &features.vix);
        let state_labels = map_states(&hmm, &assigned, &pseudo);

        let classifier = if self.ensemble_active() {
            let mut rng = StdRng::seed_from_u64(self.config.seed);
            let labels: Vec<usize> = assigned
                .iter()
                .zip(&pseudo)
                .map(|(&s, rule)| {
                    if rng.gen::<f64>() < self.config.label_mix {
                        state_labels[s].index()
                    } else {
                        rule.index()
                    }
                })
                .collect();
            let distinct = labels.iter().collect::<std::collections::HashSet<_>>().len();
            if distinct > 1 {
                Some(SoftmaxRegression::fit(
                    x,
                    &labels,
                    N_REGIMES,
                    &ClassifierConfig::default(),
                )?)
            } else {
                debug!("Single pseudo-label class, skipping regime classifier");
                None
            }
        } else {
            None
        };

        Ok(RegimeModel {
            hmm,
            state_labels,
            classifier,
            feature_names: features.names.clone(),
        })
    }

    /// Label every return date.
    pub fn predict(
        &self,
        returns: &ReturnMatrix,
        vix: &DateSeries,
        drawdown: Option<&FactorMatrix>,
    ) -> Result<RegimeSeries> {
        self.capabilities.require(Capability::StateModel)?;
        let features = build_features(returns, vix, drawdown, &self.config);
        self.predict_features(&features)
    }

    /// Label prebuilt features.
    pub fn predict_features(&self, features: &RegimeFeatures) -> Result<RegimeSeries> {
        self.capabilities.require(Capability::StateModel)?;
        let model = self.model.as_ref().ok_or(PipelineError::ModelNotFitted)?;

        let generative = model.generative_probabilities(&features.values)?;
        let discriminative = if self.ensemble_active() {
            model.discriminative_probabilities(&features.values)
        } else {
            None
        };

        let mut labels = Vec::with_capacity(generative.len());
        let mut probabilities = Vec::with_capacity(generative.len());
        for (t, g) in generative.iter().enumerate() {
            let d = discriminative.as_ref().map(|d| &d[t]);
            let (p, label) = blend_probabilities(g, d, self.config.generative_weight);
            labels.push(label);
            probabilities.push(p);
        }

        let counts: HashMap<Regime, usize> = labels.iter().fold(HashMap::new(), |mut acc, r| {
            *acc.entry(*r).or_insert(0) += 1;
            acc
        });
        debug!("Regime counts: {:?}", counts);

        Ok(RegimeSeries {
            dates: features.dates.clone(),
            labels,
            probabilities,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::AssetFrame;
    use cache::InMemoryCacheStore;
    use chrono::Duration;

    fn dates(n: usize) -> Vec<NaiveDate> {
        let start = NaiveDate::from_ymd_opt(2021, 1, 1).unwrap();
        (0..n).map(|i| start + Duration::days(i as i64)).collect()
    }

    /// Calm uptrend, then a violent selloff.
    fn returns_with_crash(n: usize) -> ReturnMatrix {
        let d = dates(n);
        let values = (0..n)
            .map(|t| {
                let wobble = ((t * 13) % 7) as f64 / 7.0 - 0.5;
                if t < n * 3 / 4 {
                    vec![0.001 + 0.002 * wobble, 0.0008 - 0.002 * wobble]
                } else {
                    vec![-0.01 + 0.06 * wobble, -0.012 - 0.05 * wobble]
                }
            })
            .collect();
        AssetFrame::new(d, vec!["A".to_string(), "B".to_string()], values).unwrap()
    }

    fn vix_for(returns: &ReturnMatrix) -> DateSeries {
        let n = returns.n_rows();
        let values = (0..n).map(|t| if t < n * 3 / 4 { 15.0 } else { 45.0 }).collect();
        DateSeries::new(returns.dates.clone(), values).unwrap()
    }

    #[test]
    fn test_pseudo_labels_precedence() {
        let calm = vec![0.001; 100];
        assert!(pseudo_labels(&calm, &[20.0; 100]).iter().all(|r| *r == Regime::Bull));
        assert!(pseudo_labels(&calm, &[50.0; 100]).iter().all(|r| *r == Regime::Crisis));

        let falling = vec![-0.001; 100];
        assert_eq!(pseudo_labels(&falling, &[20.0; 100])[99], Regime::Bear);

        // ~32% annualized realized vol with an elevated index.
        let choppy: Vec<f64> = (0..100).map(|i| if i % 2 == 0 { 0.02 } else { -0.02 }).collect();
        assert_eq!(pseudo_labels(&choppy, &[30.0; 100])[99], Regime::HighVol);
    }

    #[test]
    fn test_blend_weights_and_argmax() {
        let g = [0.6, 0.4, 0.0, 0.0];
        let d = [0.0, 1.0, 0.0, 0.0];
        let (p, label) = blend_probabilities(&g, Some(&d), 0.7);
        assert!((p[0] - 0.42).abs() < 1e-12);
        assert!((p[1] - 0.58).abs() < 1e-12);
        assert_eq!(label, Regime::Bear);

        let (p, label) = blend_probabilities(&g, None, 0.7);
        assert_eq!(p, g);
        assert_eq!(label, Regime::Bull);
    }

    #[test]
    fn test_zscore_of_constant_is_zero() {
        let z = rolling_zscore(&[5.0; 60], 252, 21);
        assert!(z.iter().all(|v| *v == 0.0));
    }

    #[test]
    fn test_fit_predict_labels_crash_as_stress() {
        let returns = returns_with_crash(400);
        let vix = vix_for(&returns);
        let mut detector = RegimeDetector::new(RegimeConfig::default(), Capabilities::all());
        assert_eq!(detector.fit(&returns, &vix, None).unwrap(), FitOutcome::Fitted);

        let series = detector.predict(&returns, &vix, None).unwrap();
        assert_eq!(series.len(), 400);
        for p in &series.probabilities {
            assert!((p.iter().sum::<f64>() - 1.0).abs() < 1e-9);
        }
        assert_eq!(series.labels[100], Regime::Bull);
        assert!(matches!(series.labels[399], Regime::Crisis | Regime::HighVol));
    }

    #[test]
    fn test_predict_before_fit_errors() {
        let returns = returns_with_crash(100);
        let vix = vix_for(&returns);
        let detector = RegimeDetector::new(RegimeConfig::default(), Capabilities::all());
        assert!(matches!(
            detector.predict(&returns, &vix, None),
            Err(PipelineError::ModelNotFitted)
        ));
    }

    #[test]
    fn test_missing_state_model_is_capability_error() {
        let returns = returns_with_crash(100);
        let vix = vix_for(&returns);
        let caps = Capabilities::all().without(Capability::StateModel);
        let mut detector = RegimeDetector::new(RegimeConfig::default(), caps);
        let err = detector.fit(&returns, &vix, None).unwrap_err();
        assert!(err.is_capability_unavailable());
    }

    #[test]
    fn test_missing_classifier_disables_ensemble() {
        let returns = returns_with_crash(300);
        let vix = vix_for(&returns);
        let caps = Capabilities::all().without(Capability::Classifier);
        let mut detector = RegimeDetector::new(RegimeConfig::default(), caps);
        detector.fit(&returns, &vix, None).unwrap();
        assert!(detector.model().unwrap().classifier.is_none());
        assert_eq!(detector.predict(&returns, &vix, None).unwrap().len(), 300);
    }

    #[test]
    fn test_cache_hit_refit_and_invalidation() {
        let store = Arc::new(InMemoryCacheStore::new());
        let returns = returns_with_crash(300);
        let vix = vix_for(&returns);

        let mut first = RegimeDetector::new(RegimeConfig::default(), Capabilities::all())
            .with_store(store.clone());
        assert_eq!(first.fit(&returns, &vix, None).unwrap(), FitOutcome::Fitted);
        assert_eq!(store.write_count(), 1);

        let mut second = RegimeDetector::new(RegimeConfig::default(), Capabilities::all())
            .with_store(store.clone());
        assert_eq!(second.fit(&returns, &vix, None).unwrap(), FitOutcome::LoadedFromCache);
        assert_eq!(second.model(), first.model());
        assert_eq!(store.write_count(), 1);

        let forced = RegimeConfig {
            force_refit: true,
            ..Default::default()
        };
        let mut third = RegimeDetector::new(forced, Capabilities::all()).with_store(store.clone());
        assert_eq!(third.fit(&returns, &vix, None).unwrap(), FitOutcome::Fitted);
        assert_eq!(store.write_count(), 2);

        let changed = returns_with_crash(320);
        let changed_vix = vix_for(&changed);
        let mut fourth = RegimeDetector::new(RegimeConfig::default(), Capabilities::all())
            .with_store(store.clone());
        assert_eq!(fourth.fit(&changed, &changed_vix, None).unwrap(), FitOutcome::Fitted);
        assert_eq!(store.write_count(), 3);
    }

    #[test]
    fn test_no_persistence_bypasses_store() {
        let store = Arc::new(InMemoryCacheStore::new());
        let returns = returns_with_crash(200);
        let vix = vix_for(&returns);
        let caps = Capabilities::all().without(Capability::Persistence);
        let mut detector = RegimeDetector::new(RegimeConfig::default(), caps).with_store(store.clone());
        detector.fit(&returns, &vix, None).unwrap();
        assert_eq!(store.write_count(), 0);
    }
}
