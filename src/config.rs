//! Configuration file support for pipeline runs.
//!
//! Allows loading pipeline configurations from TOML files for reproducibility.

use crate::backtest::BacktestConfig;
use crate::capability::Capabilities;
use crate::covariance::CovarianceEstimator;
use crate::error::{PipelineError, Result};
use crate::execution::{CostModel, TurnoverLimiter};
use crate::optimizer::{OptimizationStrategy, RollingSchedule, ViewSet};
use crate::pipeline::{AllocationMode, PipelineOptions, MIN_OBSERVATIONS};
use crate::regime::RegimeConfig;
use crate::risk::RiskConfig;
use crate::types::N_REGIMES;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

/// Complete pipeline configuration loaded from a file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PipelineFileConfig {
    /// Market and date range.
    #[serde(default)]
    pub pipeline: PipelineSettings,
    /// Backtest and trading cost settings.
    #[serde(default)]
    pub backtest: BacktestSettings,
    /// Monte Carlo settings.
    #[serde(default)]
    pub risk: RiskSettings,
    /// Regime model settings.
    #[serde(default)]
    pub regime: RegimeSettings,
    /// Weight construction settings.
    #[serde(default)]
    pub optimizer: OptimizerSettings,
}

/// Market and date range.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineSettings {
    #[serde(default = "default_market")]
    pub market: String,
    /// Start date (YYYY-MM-DD format).
    #[serde(default = "default_start")]
    pub start: String,
    /// End date (YYYY-MM-DD format).
    #[serde(default = "default_end")]
    pub end: String,
    /// Seed for synthetic substitution data.
    #[serde(default = "default_seed")]
    pub seed: u64,
    #[serde(default = "default_min_observations")]
    pub min_observations: usize,
    /// Directory holding the regime model cache.
    #[serde(default = "default_model_dir")]
    pub model_dir: PathBuf,
}

fn default_market() -> String { "usa".to_string() }
fn default_start() -> String { "2018-01-01".to_string() }
fn default_end() -> String { "2024-12-31".to_string() }
fn default_seed() -> u64 { 42 }
fn default_min_observations() -> usize { MIN_OBSERVATIONS }
fn default_model_dir() -> PathBuf { PathBuf::from("models") }

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            market: default_market(),
            start: default_start(),
            end: default_end(),
            seed: default_seed(),
            min_observations: MIN_OBSERVATIONS,
            model_dir: default_model_dir(),
        }
    }
}

/// Backtest and trading cost settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BacktestSettings {
    #[serde(default = "default_capital")]
    pub initial_capital: f64,
    /// Annual risk-free rate.
    #[serde(default = "default_risk_free")]
    pub risk_free_rate: f64,
    #[serde(default = "default_cost_bps")]
    pub transaction_cost_bps: f64,
    #[serde(default = "default_slippage_bps")]
    pub slippage_bps: f64,
    /// Largest daily turnover when `limit_turnover` is set.
    #[serde(default = "default_max_turnover")]
    pub max_turnover: f64,
    #[serde(default)]
    pub limit_turnover: bool,
    #[serde(default = "default_rolling_window")]
    pub rolling_window: usize,
}

fn default_capital() -> f64 { 1_000_000.0 }
fn default_risk_free() -> f64 { 0.05 }
fn default_cost_bps() -> f64 { 10.0 }
fn default_slippage_bps() -> f64 { 5.0 }
fn default_max_turnover() -> f64 { 0.30 }
fn default_rolling_window() -> usize { 63 }

impl Default for BacktestSettings {
    fn default() -> Self {
        Self {
            initial_capital: default_capital(),
            risk_free_rate: default_risk_free(),
            transaction_cost_bps: default_cost_bps(),
            slippage_bps: default_slippage_bps(),
            max_turnover: default_max_turnover(),
            limit_turnover: false,
            rolling_window: default_rolling_window(),
        }
    }
}

/// Monte Carlo settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskSettings {
    #[serde(default = "default_interactive_paths")]
    pub interactive_paths: usize,
    #[serde(default = "default_report_paths")]
    pub report_paths: usize,
    #[serde(default = "default_stress_paths")]
    pub stress_paths: usize,
    #[serde(default = "default_horizon")]
    pub horizon_days: usize,
    #[serde(default = "default_ruin_level")]
    pub ruin_level: f64,
    #[serde(default = "default_confidence")]
    pub var_confidence: f64,
    #[serde(default = "default_true")]
    pub cornish_fisher: bool,
    #[serde(default = "default_seed")]
    pub seed: u64,
}

fn default_interactive_paths() -> usize { 1000 }
fn default_report_paths() -> usize { 5000 }
fn default_stress_paths() -> usize { 1000 }
fn default_horizon() -> usize { 252 }
fn default_ruin_level() -> f64 { -0.5 }
fn default_confidence() -> f64 { 0.95 }
fn default_true() -> bool { true }

impl Default for RiskSettings {
    fn default() -> Self {
        Self {
            interactive_paths: default_interactive_paths(),
            report_paths: default_report_paths(),
            stress_paths: default_stress_paths(),
            horizon_days: default_horizon(),
            ruin_level: default_ruin_level(),
            var_confidence: default_confidence(),
            cornish_fisher: true,
            seed: default_seed(),
        }
    }
}

/// Regime model settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegimeSettings {
    #[serde(default = "default_n_regimes")]
    pub n_regimes: usize,
    #[serde(default = "default_n_iter")]
    pub n_iter: usize,
    #[serde(default = "default_seed")]
    pub seed: u64,
    #[serde(default = "default_true")]
    pub ensemble: bool,
    #[serde(default)]
    pub force_refit: bool,
}

fn default_n_regimes() -> usize { N_REGIMES }
fn default_n_iter() -> usize { 100 }

impl Default for RegimeSettings {
    fn default() -> Self {
        Self {
            n_regimes: N_REGIMES,
            n_iter: default_n_iter(),
            seed: default_seed(),
            ensemble: true,
            force_refit: false,
        }
    }
}

/// Weight construction settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizerSettings {
    /// "regime", "mean_variance", "min_variance", "risk_parity",
    /// "max_sharpe", "black_litterman" or "cvar".
    #[serde(default = "default_strategy")]
    pub strategy: String,
    /// Annual rate used by max Sharpe.
    #[serde(default = "default_risk_free")]
    pub risk_free_rate: f64,
    /// Daily return floor for mean-variance.
    #[serde(default)]
    pub target_return: Option<f64>,
    #[serde(default = "default_tau")]
    pub tau: f64,
    /// Equilibrium prior for Black-Litterman; sample means when absent.
    #[serde(default)]
    pub risk_aversion: Option<f64>,
    #[serde(default)]
    pub views: Option<ViewSet>,
    #[serde(default = "default_cvar_alpha")]
    pub cvar_alpha: f64,
    /// "sample", "ledoit_wolf" or "exponential".
    #[serde(default = "default_covariance")]
    pub covariance: String,
    #[serde(default = "default_halflife")]
    pub halflife: f64,
    #[serde(default = "default_lookback")]
    pub lookback: usize,
    #[serde(default = "default_rebalance_every")]
    pub rebalance_every: usize,
}

fn default_strategy() -> String { "regime".to_string() }
fn default_tau() -> f64 { 0.05 }
fn default_cvar_alpha() -> f64 { 0.05 }
fn default_covariance() -> String { "ledoit_wolf".to_string() }
fn default_halflife() -> f64 { 63.0 }
fn default_lookback() -> usize { 252 }
fn default_rebalance_every() -> usize { 21 }

impl Default for OptimizerSettings {
    fn default() -> Self {
        Self {
            strategy: default_strategy(),
            risk_free_rate: default_risk_free(),
            target_return: None,
            tau: default_tau(),
            risk_aversion: None,
            views: None,
            cvar_alpha: default_cvar_alpha(),
            covariance: default_covariance(),
            halflife: default_halflife(),
            lookback: default_lookback(),
            rebalance_every: default_rebalance_every(),
        }
    }
}

/// Parse a strategy name. `None` means regime allocation.
pub fn parse_strategy(name: &str, settings: &OptimizerSettings) -> Result<Option<OptimizationStrategy>> {
    let strategy = match name.to_lowercase().replace('-', "_").as_str() {
        "regime" => return Ok(None),
        "mean_variance" | "mv" => OptimizationStrategy::MeanVariance {
            target_return: settings.target_return,
            long_only: true,
        },
        "min_variance" => OptimizationStrategy::MinVariance,
        "risk_parity" => OptimizationStrategy::RiskParity,
        "max_sharpe" => OptimizationStrategy::MaxSharpe {
            risk_free_rate: settings.risk_free_rate,
        },
        "black_litterman" | "bl" => OptimizationStrategy::BlackLitterman {
            views: settings.views.clone().unwrap_or(ViewSet {
                pick: Vec::new(),
                returns: Vec::new(),
                omega: None,
            }),
            tau: settings.tau,
            risk_aversion: settings.risk_aversion,
        },
        "cvar" | "cvar_min" => OptimizationStrategy::CvarMin {
            alpha: settings.cvar_alpha,
        },
        other => {
            return Err(PipelineError::ConfigError(format!(
                "Unknown strategy: {}",
                other
            )))
        }
    };
    Ok(Some(strategy))
}

fn parse_config_date(s: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .map_err(|e| PipelineError::ConfigError(format!("Invalid date '{}': {}", s, e)))
}

impl PipelineFileConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        info!("Loading configuration from: {}", path.display());

        let content = fs::read_to_string(path)?;
        let config: PipelineFileConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to a TOML file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| PipelineError::ConfigError(e.to_string()))?;
        fs::write(path, content)?;
        Ok(())
    }

    pub fn to_backtest_config(&self) -> Result<BacktestConfig> {
        let b = &self.backtest;
        let cost_model = CostModel {
            transaction_cost_bps: b.transaction_cost_bps,
            slippage_bps: b.slippage_bps,
        };
        cost_model.validate()?;
        let turnover_limit = if b.limit_turnover {
            Some(TurnoverLimiter::new(b.max_turnover)?)
        } else {
            None
        };
        Ok(BacktestConfig {
            initial_capital: b.initial_capital,
            risk_free_rate: b.risk_free_rate,
            cost_model,
            turnover_limit,
            rolling_window: b.rolling_window,
        })
    }

    pub fn to_risk_config(&self) -> Result<RiskConfig> {
        let r = &self.risk;
        let config = RiskConfig {
            interactive_paths: r.interactive_paths,
            report_paths: r.report_paths,
            stress_paths: r.stress_paths,
            horizon_days: r.horizon_days,
            ruin_level: r.ruin_level,
            confidence: r.var_confidence,
            risk_free_rate: self.backtest.risk_free_rate,
            cornish_fisher: r.cornish_fisher,
            seed: r.seed,
            ..Default::default()
        };
        config.validate()?;
        Ok(config)
    }

    pub fn to_regime_config(&self) -> Result<RegimeConfig> {
        if self.regime.n_regimes != N_REGIMES {
            return Err(PipelineError::ConfigError(format!(
                "Only {} regimes are supported, got {}",
                N_REGIMES, self.regime.n_regimes
            )));
        }
        Ok(RegimeConfig {
            n_regimes: self.regime.n_regimes,
            n_iter: self.regime.n_iter,
            seed: self.regime.seed,
            ensemble: self.regime.ensemble,
            force_refit: self.regime.force_refit,
            ..Default::default()
        })
    }

    pub fn to_covariance(&self) -> Result<CovarianceEstimator> {
        match self.optimizer.covariance.to_lowercase().replace('-', "_").as_str() {
            "sample" => Ok(CovarianceEstimator::Sample),
            "ledoit_wolf" => Ok(CovarianceEstimator::LedoitWolf),
            "exponential" | "ewma" => Ok(CovarianceEstimator::Exponential {
                halflife: self.optimizer.halflife,
            }),
            other => Err(PipelineError::ConfigError(format!(
                "Unknown covariance estimator: {}",
                other
            ))),
        }
    }

    /// Convert to run options for the pipeline.
    pub fn to_pipeline_options(&self, capabilities: Capabilities) -> Result<PipelineOptions> {
        let p = &self.pipeline;
        let mut options = PipelineOptions::new(
            p.market.clone(),
            parse_config_date(&p.start)?,
            parse_config_date(&p.end)?,
        );
        options.allocation = match parse_strategy(&self.optimizer.strategy, &self.optimizer)? {
            Some(strategy) => AllocationMode::Solver { strategy },
            None => AllocationMode::Regime,
        };
        options.seed = p.seed;
        options.min_observations = p.min_observations;
        options.capabilities = capabilities;
        options.regime = self.to_regime_config()?;
        options.covariance = self.to_covariance()?;
        options.schedule = RollingSchedule {
            lookback: self.optimizer.lookback,
            rebalance_every: self.optimizer.rebalance_every,
            ..Default::default()
        };
        options.backtest = self.to_backtest_config()?;
        options.risk = self.to_risk_config()?;
        options.validate()?;
        Ok(options)
    }

    /// Generate an example configuration file content.
    pub fn example() -> String {
        r#"# Regime allocator configuration file

[pipeline]
market = "usa"           # usa, india or uk
start = "2018-01-01"
end = "2024-12-31"
seed = 42
min_observations = 100
model_dir = "models"

[backtest]
initial_capital = 1000000.0
risk_free_rate = 0.05
transaction_cost_bps = 10.0
slippage_bps = 5.0
max_turnover = 0.30
limit_turnover = false
rolling_window = 63

[risk]
interactive_paths = 1000
report_paths = 5000
stress_paths = 1000
horizon_days = 252
ruin_level = -0.5
var_confidence = 0.95
cornish_fisher = true
seed = 42

[regime]
n_regimes = 4
n_iter = 100
seed = 42
ensemble = true
force_refit = false

[optimizer]
strategy = "regime"
covariance = "ledoit_wolf"
lookback = 252
rebalance_every = 21

# Alternative strategies:
# strategy = "max_sharpe"
# risk_free_rate = 0.05

# strategy = "cvar"
# cvar_alpha = 0.05

# strategy = "black_litterman"
# tau = 0.05
# risk_aversion = 2.5
# [optimizer.views]
# pick = [[1.0, -1.0, 0.0, 0.0, 0.0, 0.0]]
# returns = [0.0002]
"#
        .to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_config() {
        let config = PipelineFileConfig::default();
        assert_eq!(config.backtest.initial_capital, 1_000_000.0);
        assert_eq!(config.risk.report_paths, 5000);
        assert_eq!(config.optimizer.strategy, "regime");
    }

    #[test]
    fn test_load_config() {
        let toml_content = r#"
[pipeline]
market = "uk"
start = "2020-01-01"

[backtest]
transaction_cost_bps = 20.0
limit_turnover = true

[optimizer]
strategy = "cvar"
cvar_alpha = 0.1
covariance = "exponential"
halflife = 30.0
"#;
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "{}", toml_content).unwrap();

        let config = PipelineFileConfig::load(file.path()).unwrap();
        assert_eq!(config.pipeline.market, "uk");
        assert_eq!(config.pipeline.end, "2024-12-31");
        assert_eq!(config.backtest.slippage_bps, 5.0);

        let options = config.to_pipeline_options(Capabilities::all()).unwrap();
        assert_eq!(options.start, NaiveDate::from_ymd_opt(2020, 1, 1).unwrap());
        assert_eq!(
            options.allocation,
            AllocationMode::Solver {
                strategy: OptimizationStrategy::CvarMin { alpha: 0.1 }
            }
        );
        assert_eq!(options.covariance, CovarianceEstimator::Exponential { halflife: 30.0 });
        assert!((options.backtest.cost_model.rate() - 0.0025).abs() < 1e-12);
        assert_eq!(options.backtest.turnover_limit.map(|l| l.max_turnover), Some(0.30));
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        let mut config = PipelineFileConfig::default();
        config.optimizer.strategy = "momentum".to_string();
        assert!(config.to_pipeline_options(Capabilities::all()).is_err());

        let mut config = PipelineFileConfig::default();
        config.pipeline.start = "01/02/2020".to_string();
        assert!(config.to_pipeline_options(Capabilities::all()).is_err());

        let mut config = PipelineFileConfig::default();
        config.risk.var_confidence = 1.5;
        assert!(config.to_risk_config().is_err());

        let mut config = PipelineFileConfig::default();
        config.regime.n_regimes = 3;
        assert!(config.to_regime_config().is_err());
    }

    #[test]
    fn test_save_config() {
        let config = PipelineFileConfig::default();
        let file = NamedTempFile::new().unwrap();
        config.save(file.path()).unwrap();

        let loaded = PipelineFileConfig::load(file.path()).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_example_config_parses() {
        let example = PipelineFileConfig::example();
        let config: PipelineFileConfig = toml::from_str(&example).unwrap();
        assert_eq!(config, PipelineFileConfig::default());
        assert!(config.to_pipeline_options(Capabilities::all()).is_ok());
    }
}
