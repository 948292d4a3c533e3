//! Forward-looking Monte Carlo risk.
//!
//! Portfolio returns are summarized by annualized drift and volatility plus
//! the skewness and excess kurtosis of the daily history. Paths follow a
//! geometric Brownian motion whose normal shocks can be reshaped with a
//! Cornish-Fisher expansion to carry those higher moments.
//!
//! Each path draws from its own generator seeded with `seed + path_index`,
//! so paths are generated in parallel yet the output only depends on the
//! seed.
//!
//! # Example
//!
//! ```ignore
//! use regime_allocator::risk::{RiskConfig, RiskEngine, ReturnMoments, SimulationTier};
//!
//! let moments = ReturnMoments::from_daily(&daily_returns)?;
//! let engine = RiskEngine::new(RiskConfig::default());
//! let (metrics, _paths) = engine.analyze(&moments, SimulationTier::Interactive);
//! println!("VaR 95: {:.2}%", metrics.var_95 * 100.0);
//! ```

use crate::error::{PipelineError, Result};
use crate::linalg::dot;
use crate::stats::{excess_kurtosis, finite_or, mean, percentile, skewness, std_dev};
use crate::types::{ReturnMatrix, TRADING_DAYS};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Monte Carlo settings.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RiskConfig {
    /// Paths for exploratory runs.
    pub interactive_paths: usize,
    /// Paths for reported figures.
    pub report_paths: usize,
    /// Paths per stress scenario.
    pub stress_paths: usize,
    pub horizon_days: usize,
    /// Terminal return counted as ruin.
    pub ruin_level: f64,
    /// VaR confidence level, e.g. 0.95.
    pub confidence: f64,
    /// Annual risk-free rate.
    pub risk_free_rate: f64,
    /// Reshape normal shocks with the historical skew and kurtosis.
    pub cornish_fisher: bool,
    pub seed: u64,
    /// Paths kept in the reduced output.
    pub max_reported_paths: usize,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            interactive_paths: 1000,
            report_paths: 5000,
            stress_paths: 1000,
            horizon_days: 252,
            ruin_level: -0.5,
            confidence: 0.95,
            risk_free_rate: 0.05,
            cornish_fisher: true,
            seed: 42,
            max_reported_paths: 200,
        }
    }
}

impl RiskConfig {
    /// Small path counts for quick looks.
    pub fn quick() -> Self {
        Self {
            interactive_paths: 200,
            report_paths: 1000,
            stress_paths: 200,
            ..Default::default()
        }
    }

    /// Large path counts for final figures.
    pub fn thorough() -> Self {
        Self {
            interactive_paths: 5000,
            report_paths: 20000,
            stress_paths: 5000,
            ..Default::default()
        }
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.confidence > 0.0 && self.confidence < 1.0) {
            return Err(PipelineError::ConfigError(format!(
                "VaR confidence must be in (0, 1), got {}",
                self.confidence
            )));
        }
        if self.horizon_days == 0 || self.report_paths == 0 || self.interactive_paths == 0 {
            return Err(PipelineError::ConfigError(
                "Path counts and horizon must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// Which path count to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SimulationTier {
    Interactive,
    Report,
}

/// Distribution parameters of a daily return history.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ReturnMoments {
    /// Annualized mean.
    pub mu: f64,
    /// Annualized volatility.
    pub sigma: f64,
    pub skew: f64,
    pub excess_kurtosis: f64,
}

impl ReturnMoments {
    /// Moments of daily returns; non-finite values are ignored.
    pub fn from_daily(returns: &[f64]) -> Result<Self> {
        let clean: Vec<f64> = returns.iter().copied().filter(|r| r.is_finite()).collect();
        if clean.len() < 2 {
            return Err(PipelineError::InsufficientData {
                required: 2,
                available: clean.len(),
            });
        }
        Ok(Self {
            mu: mean(&clean) * TRADING_DAYS,
            sigma: std_dev(&clean) * TRADING_DAYS.sqrt(),
            skew: skewness(&clean),
            excess_kurtosis: excess_kurtosis(&clean),
        })
    }

    /// Moments of a fixed-weight portfolio over the return history.
    pub fn portfolio(returns: &ReturnMatrix, weights: &[f64]) -> Result<Self> {
        if weights.len() != returns.n_cols() {
            return Err(PipelineError::InvalidInput(format!(
                "{} weights for {} assets",
                weights.len(),
                returns.n_cols()
            )));
        }
        let daily: Vec<f64> = returns.values.iter().map(|r| dot(r, weights)).collect();
        Self::from_daily(&daily)
    }

    /// Apply a stress: shift the annual mean and scale the volatility.
    pub fn shocked(&self, mean_shock: f64, vol_multiplier: f64) -> Self {
        Self {
            mu: self.mu + mean_shock,
            sigma: self.sigma * vol_multiplier,
            ..*self
        }
    }
}

/// Cornish-Fisher quantile adjustment of a standard normal draw.
/// Skew is clipped to [-1, 1] and excess kurtosis to [0, 4].
pub fn cornish_fisher(z: f64, skew: f64, excess_kurtosis: f64) -> f64 {
    let s = skew.clamp(-1.0, 1.0);
    let k = excess_kurtosis.clamp(0.0, 4.0);
    let z2 = z * z;
    let z3 = z2 * z;
    z + (z2 - 1.0) * s / 6.0 + (z3 - 3.0 * z) * k / 24.0 - (2.0 * z3 - 5.0 * z) * s * s / 36.0
}

/// Empirical VaR at `confidence` and the mean of returns at or below it.
/// CVaR equals VaR when no return falls in the tail.
pub fn var_cvar(returns: &[f64], confidence: f64) -> (f64, f64) {
    if returns.is_empty() {
        return (0.0, 0.0);
    }
    let var = percentile(returns, (1.0 - confidence) * 100.0);
    let tail: Vec<f64> = returns.iter().copied().filter(|r| *r <= var).collect();
    let cvar = if tail.is_empty() { var } else { mean(&tail) };
    (var, cvar)
}

/// Simulated cumulative return paths, `n_paths x n_days`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulatedPaths {
    pub cumulative: Vec<Vec<f64>>,
}

impl SimulatedPaths {
    pub fn n_paths(&self) -> usize {
        self.cumulative.len()
    }

    pub fn n_days(&self) -> usize {
        self.cumulative.first().map(|p| p.len()).unwrap_or(0)
    }

    pub fn terminal_returns(&self) -> Vec<f64> {
        self.cumulative
            .iter()
            .map(|p| p.last().copied().unwrap_or(0.0))
            .collect()
    }

    /// Daily simple returns of every path, pooled.
    pub fn pooled_daily_returns(&self) -> Vec<f64> {
        let mut out = Vec::with_capacity(self.n_paths() * self.n_days());
        for path in &self.cumulative {
            let mut prev = 1.0;
            for c in path {
                let value = 1.0 + c;
                out.push(value / prev - 1.0);
                prev = value;
            }
        }
        out
    }

    /// Worst peak-to-trough loss of each path, starting from a value of 1.
    pub fn max_drawdowns(&self) -> Vec<f64> {
        self.cumulative
            .par_iter()
            .map(|path| {
                let mut peak = 1.0f64;
                let mut worst = 0.0f64;
                for c in path {
                    let value = 1.0 + c;
                    peak = peak.max(value);
                    worst = worst.min((value - peak) / peak);
                }
                worst
            })
            .collect()
    }

    /// Fraction of paths ending below `level`.
    pub fn ruin_probability(&self, level: f64) -> f64 {
        let terminal = self.terminal_returns();
        if terminal.is_empty() {
            return 0.0;
        }
        terminal.iter().filter(|r| **r < level).count() as f64 / terminal.len() as f64
    }

    /// At most `max_paths` paths, sampled every `step`-th day (always keeping
    /// the last day).
    pub fn reduced(&self, max_paths: usize, max_points: usize) -> ReducedPaths {
        let days = self.n_days();
        let step = if max_points == 0 {
            1
        } else {
            days.div_ceil(max_points).max(1)
        };
        let mut index: Vec<usize> = (0..days).step_by(step).collect();
        if days > 0 && index.last() != Some(&(days - 1)) {
            index.push(days - 1);
        }
        let paths = self
            .cumulative
            .iter()
            .take(max_paths)
            .map(|p| index.iter().map(|&i| p[i]).collect())
            .collect();
        ReducedPaths {
            day_index: index,
            paths,
        }
    }
}

/// Down-sampled paths for reporting.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReducedPaths {
    /// Day offsets of the retained points.
    pub day_index: Vec<usize>,
    pub paths: Vec<Vec<f64>>,
}

/// Scalar risk summary of a simulation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RiskMetrics {
    pub var_95: f64,
    pub cvar_95: f64,
    /// Fraction of paths whose terminal return is below the ruin level.
    pub prob_ruin: f64,
    /// Fraction of paths whose max drawdown is below the ruin level.
    pub max_dd_prob: f64,
    /// Annualized mean of simulated daily returns.
    pub mean_return: f64,
    /// Annualized volatility of simulated daily returns.
    pub volatility: f64,
    pub sharpe: f64,
    pub sortino: f64,
    pub calmar: f64,
    pub skewness: f64,
    pub kurtosis: f64,
    pub avg_max_drawdown: f64,
    pub n_paths: usize,
}

/// A named stress: annual mean shift and volatility multiplier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StressScenario {
    pub name: String,
    pub mean_shock: f64,
    pub vol_multiplier: f64,
}

impl StressScenario {
    pub fn new(name: impl Into<String>, mean_shock: f64, vol_multiplier: f64) -> Self {
        Self {
            name: name.into(),
            mean_shock,
            vol_multiplier,
        }
    }
}

/// The standard scenario table.
pub fn default_scenarios() -> Vec<StressScenario> {
    vec![
        StressScenario::new("Market Crash", -0.30, 2.5),
        StressScenario::new("Volatility Spike", -0.05, 2.0),
        StressScenario::new("Rate Shock", -0.10, 1.5),
        StressScenario::new("Stagflation", -0.15, 1.3),
        StressScenario::new("Liquidity Crisis", -0.20, 3.0),
    ]
}

/// Outcome of one stress scenario.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StressResult {
    pub scenario: StressScenario,
    pub expected_return: f64,
    pub volatility: f64,
    pub var_95: f64,
    pub cvar_95: f64,
    pub avg_max_drawdown: f64,
    pub prob_ruin: f64,
}

/// Everything the risk stage reports.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskReport {
    pub moments: ReturnMoments,
    pub metrics: RiskMetrics,
    pub paths: ReducedPaths,
    pub max_drawdowns: Vec<f64>,
    pub stress: Vec<StressResult>,
}

/// Monte Carlo risk simulator.
#[derive(Debug, Clone, Default)]
pub struct RiskEngine {
    config: RiskConfig,
}

impl RiskEngine {
    pub fn new(config: RiskConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RiskConfig {
        &self.config
    }

    pub fn paths_for(&self, tier: SimulationTier) -> usize {
        match tier {
            SimulationTier::Interactive => self.config.interactive_paths,
            SimulationTier::Report => self.config.report_paths,
        }
    }

    /// Simulate `n_paths` cumulative return paths over `days`.
    pub fn simulate(&self, moments: &ReturnMoments, n_paths: usize, days: usize, seed: u64) -> SimulatedPaths {
        let dt = 1.0 / TRADING_DAYS;
        let drift = (moments.mu - 0.5 * moments.sigma * moments.sigma) * dt;
        let vol = moments.sigma * dt.sqrt();
        let adjust = self.config.cornish_fisher;

        let cumulative = (0..n_paths)
            .into_par_iter()
            .map(|i| {
                let mut rng = StdRng::seed_from_u64(seed.wrapping_add(i as u64));
                let mut log_sum = 0.0;
                (0..days)
                    .map(|_| {
                        let z: f64 = rng.sample(StandardNormal);
                        let z = if adjust {
                            cornish_fisher(z, moments.skew, moments.excess_kurtosis)
                        } else {
                            z
                        };
                        log_sum += drift + vol * z;
                        log_sum.exp() - 1.0
                    })
                    .collect()
            })
            .collect();
        SimulatedPaths { cumulative }
    }

    /// Risk metrics of a set of simulated paths.
    pub fn metrics(&self, paths: &SimulatedPaths) -> RiskMetrics {
        let daily = paths.pooled_daily_returns();
        let (var_95, cvar_95) = var_cvar(&daily, self.config.confidence);
        let max_dds = paths.max_drawdowns();
        let n = paths.n_paths().max(1) as f64;
        let ruin = self.config.ruin_level;

        let mean_return = mean(&daily) * TRADING_DAYS;
        let volatility = std_dev(&daily) * TRADING_DAYS.sqrt();
        let rf = self.config.risk_free_rate;
        let sharpe = if volatility > 0.0 {
            (mean_return - rf) / volatility
        } else {
            0.0
        };
        let downside: Vec<f64> = daily.iter().copied().filter(|r| *r < 0.0).collect();
        let downside_dev = std_dev(&downside) * TRADING_DAYS.sqrt();
        let sortino = if downside_dev > 0.0 {
            (mean_return - rf) / downside_dev
        } else {
            0.0
        };
        let avg_max_drawdown = mean(&max_dds);
        let calmar = if avg_max_drawdown < 0.0 {
            mean_return / avg_max_drawdown.abs()
        } else {
            0.0
        };

        RiskMetrics {
            var_95: finite_or(var_95, 0.0),
            cvar_95: finite_or(cvar_95, finite_or(var_95, 0.0)),
            prob_ruin: paths.ruin_probability(ruin),
            max_dd_prob: max_dds.iter().filter(|d| **d < ruin).count() as f64 / n,
            mean_return: finite_or(mean_return, 0.0),
            volatility: finite_or(volatility, 0.0),
            sharpe: finite_or(sharpe, 0.0),
            sortino: finite_or(sortino, 0.0),
            calmar: finite_or(calmar, 0.0),
            skewness: skewness(&daily),
            kurtosis: excess_kurtosis(&daily),
            avg_max_drawdown: finite_or(avg_max_drawdown, 0.0),
            n_paths: paths.n_paths(),
        }
    }

    /// Simulate at the tier's path count and summarize.
    pub fn analyze(&self, moments: &ReturnMoments, tier: SimulationTier) -> (RiskMetrics, SimulatedPaths) {
        let n_paths = self.paths_for(tier);
        debug!(
            "Simulating {} paths over {} days (mu {:.4}, sigma {:.4})",
            n_paths, self.config.horizon_days, moments.mu, moments.sigma
        );
        let paths = self.simulate(moments, n_paths, self.config.horizon_days, self.config.seed);
        (self.metrics(&paths), paths)
    }

    /// Run every scenario at the stress path count. Scenario `k` uses seed
    /// `seed + (k + 1) * stress_paths` so scenario paths never reuse draws.
    pub fn stress_test(&self, moments: &ReturnMoments, scenarios: &[StressScenario]) -> Vec<StressResult> {
        let n_paths = self.config.stress_paths.max(1);
        scenarios
            .par_iter()
            .enumerate()
            .map(|(k, scenario)| {
                let shocked = moments.shocked(scenario.mean_shock, scenario.vol_multiplier);
                let seed = self
                    .config
                    .seed
                    .wrapping_add(((k + 1) * n_paths) as u64);
                let paths = self.simulate(&shocked, n_paths, self.config.horizon_days, seed);
                let m = self.metrics(&paths);
                StressResult {
                    scenario: scenario.clone(),
                    expected_return: m.mean_return,
                    volatility: m.volatility,
                    var_95: m.var_95,
                    cvar_95: m.cvar_95,
                    avg_max_drawdown: m.avg_max_drawdown,
                    prob_ruin: m.prob_ruin,
                }
            })
            .collect()
    }

    /// Full risk stage for a fixed-weight portfolio.
    pub fn run(
        &self,
        returns: &ReturnMatrix,
        weights: &[f64],
        tier: SimulationTier,
        scenarios: &[StressScenario],
    ) -> Result<RiskReport> {
        self.config.validate()?;
        let moments = ReturnMoments::portfolio(returns, weights)?;
        let (metrics, paths) = self.analyze(&moments, tier);
        let max_drawdowns = paths.max_drawdowns();
        let stress = self.stress_test(&moments, scenarios);
        info!(
            "Risk: VaR {:.2}%, CVaR {:.2}%, ruin probability {:.2}% over {} paths",
            metrics.var_95 * 100.0,
            metrics.cvar_95 * 100.0,
            metrics.prob_ruin * 100.0,
            metrics.n_paths
        );
        Ok(RiskReport {
            moments,
            metrics,
            paths: paths.reduced(self.config.max_reported_paths, 126),
            max_drawdowns,
            stress,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn moments() -> ReturnMoments {
        ReturnMoments {
            mu: 0.08,
            sigma: 0.2,
            skew: -0.5,
            excess_kurtosis: 2.0,
        }
    }

    #[test]
    fn test_same_seed_is_bit_identical() {
        let engine = RiskEngine::new(RiskConfig::quick());
        let a = engine.simulate(&moments(), 300, 100, 7);
        let b = engine.simulate(&moments(), 300, 100, 7);
        assert_eq!(a.terminal_returns(), b.terminal_returns());
        let c = engine.simulate(&moments(), 300, 100, 8);
        assert_ne!(a.terminal_returns(), c.terminal_returns());
    }

    #[test]
    fn test_cvar_not_above_var() {
        let returns: Vec<f64> = (0..1000).map(|i| ((i * 37) % 101) as f64 / 100.0 - 0.5).collect();
        let (var, cvar) = var_cvar(&returns, 0.95);
        assert!(cvar <= var);
        assert_eq!(var_cvar(&[0.01], 0.95), (0.01, 0.01));
    }

    #[test]
    fn test_cornish_fisher_identity_without_moments() {
        for z in [-2.0, -0.5, 0.0, 1.3] {
            assert!((cornish_fisher(z, 0.0, 0.0) - z).abs() < 1e-15);
        }
        // Negative skew fattens the left tail.
        assert!(cornish_fisher(-2.0, -0.8, 0.0) < -2.0);
        // Clipping keeps extreme inputs bounded.
        assert_eq!(cornish_fisher(1.0, 50.0, 100.0), cornish_fisher(1.0, 1.0, 4.0));
    }

    #[test]
    fn test_zero_vol_is_degenerate_not_nan() {
        let engine = RiskEngine::default();
        let flat = ReturnMoments {
            mu: 0.0,
            sigma: 0.0,
            skew: 0.0,
            excess_kurtosis: 0.0,
        };
        let paths = engine.simulate(&flat, 10, 20, 1);
        let m = engine.metrics(&paths);
        assert_eq!(m.sharpe, 0.0);
        assert_eq!(m.calmar, 0.0);
        assert_eq!(m.var_95, 0.0);
        assert_eq!(m.cvar_95, 0.0);
        assert_eq!(m.prob_ruin, 0.0);
    }

    #[test]
    fn test_max_drawdown_nonpositive_and_includes_start() {
        let paths = SimulatedPaths {
            cumulative: vec![vec![-0.1, 0.2, 0.05], vec![0.1, 0.2, 0.3]],
        };
        let dds = paths.max_drawdowns();
        assert!((dds[0] + 0.125).abs() < 1e-12);
        assert_eq!(dds[1], 0.0);
    }

    #[test]
    fn test_tiers_agree_statistically() {
        let engine = RiskEngine::new(RiskConfig::default());
        let (small, _) = engine.analyze(&moments(), SimulationTier::Interactive);
        let (large, _) = engine.analyze(&moments(), SimulationTier::Report);
        assert_eq!(small.n_paths, 1000);
        assert_eq!(large.n_paths, 5000);
        assert!((small.var_95 - large.var_95).abs() < 0.002);
        assert!((small.volatility - large.volatility).abs() < 0.02);
    }

    #[test]
    fn test_stress_scenarios_worsen_risk() {
        let engine = RiskEngine::new(RiskConfig::quick());
        let (base, _) = engine.analyze(&moments(), SimulationTier::Interactive);
        let results = engine.stress_test(&moments(), &default_scenarios());
        assert_eq!(results.len(), 5);
        assert_eq!(results[0].scenario.name, "Market Crash");
        for r in &results {
            assert!(r.cvar_95 <= r.var_95);
            assert!(r.avg_max_drawdown <= 0.0);
        }
        assert!(results[0].var_95 < base.var_95);
        assert!(results[0].prob_ruin >= base.prob_ruin);
    }

    #[test]
    fn test_reduced_paths() {
        let engine = RiskEngine::default();
        let paths = engine.simulate(&moments(), 300, 252, 3);
        let reduced = paths.reduced(200, 126);
        assert_eq!(reduced.paths.len(), 200);
        assert_eq!(reduced.day_index[1], 2);
        assert_eq!(*reduced.day_index.last().unwrap(), 251);
        assert_eq!(reduced.paths[0].len(), reduced.day_index.len());
    }

    #[test]
    fn test_portfolio_moments_check_weights() {
        use crate::types::AssetFrame;
        use chrono::NaiveDate;
        let dates: Vec<NaiveDate> = (1..=3)
            .map(|d| NaiveDate::from_ymd_opt(2024, 2, d).unwrap())
            .collect();
        let r = AssetFrame::new(
            dates,
            vec!["A".into(), "B".into()],
            vec![vec![0.01, 0.03], vec![-0.01, 0.01], vec![0.02, 0.0]],
        )
        .unwrap();
        assert!(ReturnMoments::portfolio(&r, &[1.0]).is_err());
        let m = ReturnMoments::portfolio(&r, &[0.5, 0.5]).unwrap();
        assert!((m.mu - 0.01 * TRADING_DAYS).abs() < 1e-12);
    }
}
