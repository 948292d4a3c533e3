//! Regime allocator - regime-aware multi-asset allocation and risk.
//!
//! # Overview
//!
//! The crate runs a five-stage pipeline over a daily multi-asset price history:
//!
//! - **Factors**: momentum, volatility, drawdown, value and quality matrices
//! - **Regimes**: a Gaussian HMM, optionally blended with a softmax classifier,
//!   labels every day Bull, Bear, High Vol or Crisis; fitted models are cached
//!   behind a [`regime::cache::RegimeCacheStore`]
//! - **Allocation**: regime-conditioned bucket targets or convex strategies
//!   (mean-variance, min variance, max Sharpe, Black-Litterman, CVaR) solved
//!   with Clarabel, plus advisory Buy/Hold/Sell signals
//! - **Backtest**: daily rebalancing with proportional costs and an optional
//!   turnover cap
//! - **Risk**: GBM Monte Carlo with Cornish-Fisher shocks, VaR/CVaR, ruin
//!   probabilities and stress scenarios
//!
//! # Quick Start
//!
//! ```no_run
//! use chrono::NaiveDate;
//! use regime_allocator::data::SyntheticMarketDataSource;
//! use regime_allocator::pipeline::{Pipeline, PipelineOptions};
//!
//! let source = SyntheticMarketDataSource {
//!     tickers: vec!["SPY".into(), "QQQ".into(), "TLT".into(), "GLD".into()],
//!     seed: 42,
//! };
//! let options = PipelineOptions::new(
//!     "usa",
//!     NaiveDate::from_ymd_opt(2020, 1, 1).unwrap(),
//!     NaiveDate::from_ymd_opt(2023, 12, 31).unwrap(),
//! );
//! let result = Pipeline::new(source).run(&options).unwrap();
//!
//! println!("Regime: {}", result.current_regime);
//! println!("Sharpe: {:.2}", result.backtest.metrics.sharpe);
//! println!("VaR 95: {:.2}%", result.risk.metrics.var_95 * 100.0);
//! ```
//!
//! # Optional capabilities
//!
//! The state model, classifier, persistence and convex solver are injected as
//! [`Capabilities`]. Code paths that need a missing capability either fall
//! back (rule-based signals, equal weights, no caching) or report
//! [`PipelineError::CapabilityUnavailable`].
//!
//! # Modules
//!
//! - [`types`]: Price, return, weight and regime containers
//! - [`data`]: Data sources, CSV loading and synthetic prices
//! - [`factors`]: Price-derived factor matrices
//! - [`regime`]: HMM regime detection and model cache
//! - [`optimizer`]: Convex strategies, regime allocation and signals
//! - [`backtest`]: Cost-aware backtesting
//! - [`risk`]: Monte Carlo risk and stress tests
//! - [`pipeline`]: End-to-end orchestration
//! - [`config`]: TOML configuration file support

pub mod backtest;
pub mod capability;
pub mod classifier;
pub mod config;
pub mod covariance;
pub mod data;
pub mod error;
pub mod execution;
pub mod factors;
pub mod linalg;
pub mod metadata;
pub mod optimizer;
pub mod pipeline;
pub mod regime;
pub mod report;
pub mod risk;
pub mod stats;
pub mod types;
pub mod universe;

// Re-exports for convenience
pub use backtest::{BacktestConfig, BacktestMetrics, BacktestResult, Backtester};
pub use capability::{Capabilities, Capability};
pub use config::PipelineFileConfig;
pub use covariance::CovarianceEstimator;
pub use data::{MarketData, MarketDataSource};
pub use error::{PipelineError, Result};
pub use factors::{FactorEngine, FactorSet};
pub use optimizer::{MarketEstimates, OptimizationStrategy, PortfolioOptimizer};
pub use pipeline::{AllocationMode, Pipeline, PipelineOptions, PipelineResult};
pub use regime::{RegimeConfig, RegimeDetector};
pub use risk::{RiskConfig, RiskEngine, RiskMetrics, SimulationTier};
pub use types::{
    AssetFrame, PriceMatrix, Regime, RegimeSeries, ReturnMatrix, Signal, SignalAction,
    WeightMatrix,
};
