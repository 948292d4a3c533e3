//! End-to-end pipeline: data, factors, regimes, weights, backtest, risk and
//! signals.
//!
//! The stages run strictly in sequence; parallelism lives inside the stages.
//! A run either returns a complete [`PipelineResult`] or a single error.

use crate::backtest::{BacktestConfig, BacktestResult, Backtester};
use crate::capability::{Capabilities, Capability};
use crate::covariance::CovarianceEstimator;
use crate::data::{synthetic_market_data, MarketData, MarketDataSource};
use crate::error::{PipelineError, Result};
use crate::factors::{FactorEngine, FactorSet};
use crate::metadata::RunMetadata;
use crate::optimizer::allocation::RegimeAllocationTable;
use crate::optimizer::signals::{SignalConfig, SignalGenerator};
use crate::optimizer::{OptimizationStrategy, PortfolioOptimizer, RollingSchedule};
use crate::regime::cache::RegimeCacheStore;
use crate::regime::{build_features, pseudo_labels, FitOutcome, RegimeConfig, RegimeDetector};
use crate::risk::{default_scenarios, RiskConfig, RiskEngine, RiskReport, SimulationTier};
use crate::types::{
    DateSeries, PriceMatrix, Regime, RegimeSeries, ReturnMatrix, Signal, WeightMatrix, N_REGIMES,
};
use crate::universe::{MarketUniverse, FALLBACK_TICKERS};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Observations below which loaded data is replaced by synthetic prices.
pub const MIN_OBSERVATIONS: usize = 100;

/// How the weight schedule is produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum AllocationMode {
    /// Bucket targets chosen by the regime label of each day.
    Regime,
    /// Rolling re-optimization with a convex strategy.
    Solver { strategy: OptimizationStrategy },
}

impl Default for AllocationMode {
    fn default() -> Self {
        AllocationMode::Regime
    }
}

/// Everything a pipeline run depends on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineOptions {
    pub market: String,
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub allocation: AllocationMode,
    /// Seed for synthetic substitution data.
    pub seed: u64,
    pub min_observations: usize,
    pub capabilities: Capabilities,
    pub factors: FactorEngine,
    pub regime: RegimeConfig,
    pub covariance: CovarianceEstimator,
    pub schedule: RollingSchedule,
    pub backtest: BacktestConfig,
    pub risk: RiskConfig,
    pub risk_tier: SimulationTier,
    pub signals: SignalConfig,
}

impl PipelineOptions {
    pub fn new(market: impl Into<String>, start: NaiveDate, end: NaiveDate) -> Self {
        Self {
            market: market.into(),
            start,
            end,
            allocation: AllocationMode::Regime,
            seed: 42,
            min_observations: MIN_OBSERVATIONS,
            capabilities: Capabilities::all(),
            factors: FactorEngine::default(),
            regime: RegimeConfig::default(),
            covariance: CovarianceEstimator::default(),
            schedule: RollingSchedule::default(),
            backtest: BacktestConfig::default(),
            risk: RiskConfig::default(),
            risk_tier: SimulationTier::Report,
            signals: SignalConfig::default(),
        }
    }

    pub fn with_strategy(mut self, strategy: OptimizationStrategy) -> Self {
        self.allocation = AllocationMode::Solver { strategy };
        self
    }

    pub fn with_capabilities(mut self, capabilities: Capabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    /// Request a refit even when a cached model matches.
    pub fn with_refit(mut self, refit: bool) -> Self {
        self.regime.force_refit = refit;
        self
    }

    pub fn with_ensemble(mut self, ensemble: bool) -> Self {
        self.regime.ensemble = ensemble;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.start >= self.end {
            return Err(PipelineError::InvalidInput(format!(
                "Start date {} must be before end date {}",
                self.start, self.end
            )));
        }
        self.risk.validate()?;
        self.backtest.cost_model.validate()
    }
}

/// Result bundle of one run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineResult {
    pub metadata: RunMetadata,
    pub market: String,
    /// True when synthetic prices replaced missing or short data.
    pub synthetic_data: bool,
    /// True when the regime model came from the cache.
    pub regime_from_cache: bool,
    /// True when regimes came from rules because no state model was available.
    pub rule_based_regimes: bool,
    pub prices: PriceMatrix,
    pub factors: FactorSet,
    /// Regime labels on the price dates.
    pub regimes: RegimeSeries,
    pub current_regime: Regime,
    /// Target weights on the price dates.
    pub weights: WeightMatrix,
    pub backtest: BacktestResult,
    pub risk: RiskReport,
    pub signals: Vec<Signal>,
}

impl PipelineResult {
    pub fn equity_curve(&self) -> &[f64] {
        &self.backtest.equity_curve
    }
}

/// Runs the pipeline against a data source and an optional regime cache.
pub struct Pipeline<S> {
    source: S,
    store: Option<Arc<dyn RegimeCacheStore>>,
    tracked_files: Vec<PathBuf>,
}

impl<S: MarketDataSource> Pipeline<S> {
    pub fn new(source: S) -> Self {
        Self {
            source,
            store: None,
            tracked_files: Vec::new(),
        }
    }

    pub fn with_cache_store(mut self, store: Arc<dyn RegimeCacheStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Checksum this file into the run metadata.
    pub fn with_tracked_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.tracked_files.push(path.into());
        self
    }

    pub fn run(&self, options: &PipelineOptions) -> Result<PipelineResult> {
        options.validate()?;
        let mut metadata = RunMetadata::new(options);
        for path in &self.tracked_files {
            metadata.track_file(path);
        }
        info!(
            "Pipeline run {} for {} ({} to {})",
            metadata.run_id, options.market, options.start, options.end
        );

        let data = self.load_data(options)?;
        let prices = data.prices;
        let returns = prices.returns();
        info!(
            "Loaded {} days x {} assets{}",
            prices.len(),
            prices.n_assets(),
            if data.synthetic { " (synthetic)" } else { "" }
        );

        let factors = options.factors.compute_all(&prices);
        debug!("Computed {} factor matrices", factors.iter().count());

        let (regimes, regime_from_cache, rule_based_regimes) =
            self.detect_regimes(options, &returns, &data.volatility_index, &factors)?;
        let regimes = regimes.align_to(prices.dates());
        let current_regime = regimes.last().unwrap_or(Regime::Bull);
        info!("Current regime: {}", current_regime);

        let weights = match &options.allocation {
            AllocationMode::Regime => {
                let universe = bucket_universe(&options.market);
                let assignment = universe.bucket_assignment(prices.tickers());
                RegimeAllocationTable::default().allocate_series(
                    &regimes,
                    prices.dates(),
                    prices.tickers(),
                    &assignment,
                )?
            }
            AllocationMode::Solver { strategy } => {
                info!("Rolling {} optimization", strategy.name());
                let optimizer = PortfolioOptimizer::new(options.capabilities);
                let rolled =
                    optimizer.optimize_rolling(&returns, strategy, &options.covariance, &options.schedule)?;
                let mut aligned = rolled
                    .reindex_rows(prices.dates())
                    .ok_or_else(|| PipelineError::DataError("No return dates to align weights".to_string()))?;
                aligned.normalize_rows();
                aligned
            }
        };

        let backtest = Backtester::new(options.backtest).run(&prices, &weights, Some(&regimes))?;
        info!(
            "Backtest: Sharpe {:.2}, CAGR {:.2}%, max drawdown {:.2}%",
            backtest.metrics.sharpe,
            backtest.metrics.cagr * 100.0,
            backtest.metrics.max_drawdown * 100.0
        );

        let held = backtest.weights.column_means();
        let risk = RiskEngine::new(options.risk).run(
            &returns,
            &held,
            options.risk_tier,
            &default_scenarios(),
        )?;

        let signals = SignalGenerator::new(options.signals, options.capabilities)
            .generate(&prices, &factors, &weights, &regimes)?;

        Ok(PipelineResult {
            metadata,
            market: options.market.clone(),
            synthetic_data: data.synthetic,
            regime_from_cache,
            rule_based_regimes,
            prices,
            factors,
            regimes,
            current_regime,
            weights,
            backtest,
            risk,
            signals,
        })
    }

    /// Load from the source, substituting seeded synthetic prices when the
    /// source has no data or too few rows.
    fn load_data(&self, options: &PipelineOptions) -> Result<MarketData> {
        let loaded = match self.source.load(&options.market, options.start, options.end) {
            Ok(data) => Some(data),
            Err(e @ (PipelineError::InsufficientData { .. } | PipelineError::DataError(_))) => {
                warn!("Market data unavailable: {}", e);
                None
            }
            Err(e) => return Err(e),
        };

        let tickers: Vec<String> = match loaded {
            Some(data) if data.prices.len() >= options.min_observations => return Ok(data),
            Some(data) if data.prices.n_assets() > 0 => data.prices.tickers().to_vec(),
            _ => match MarketUniverse::by_id(&options.market) {
                Ok(universe) => universe.default_tickers.into_iter().take(5).collect(),
                Err(_) => FALLBACK_TICKERS.iter().map(|s| s.to_string()).collect(),
            },
        };

        warn!(
            "Fewer than {} observations for {}, substituting synthetic prices",
            options.min_observations, options.market
        );
        let data = synthetic_market_data(&tickers, options.start, options.end, options.seed)?;
        if data.prices.len() < 2 {
            return Err(PipelineError::InsufficientData {
                required: 2,
                available: data.prices.len(),
            });
        }
        Ok(data)
    }

    /// Fit and label regimes. Without a state model the rule labels are used
    /// directly with one-hot probabilities.
    fn detect_regimes(
        &self,
        options: &PipelineOptions,
        returns: &ReturnMatrix,
        vix: &DateSeries,
        factors: &FactorSet,
    ) -> Result<(RegimeSeries, bool, bool)> {
        let drawdown = Some(&factors.drawdown);
        if !options.capabilities.has(Capability::StateModel) {
            warn!("{} unavailable, using rule-based regimes", Capability::StateModel);
            let features = build_features(returns, vix, drawdown, &options.regime);
            let labels = pseudo_labels(&features.mean_return, &features.vix);
            let probabilities = labels
                .iter()
                .map(|r| {
                    let mut p = [0.0; N_REGIMES];
                    p[r.index()] = 1.0;
                    p
                })
                .collect();
            let series = RegimeSeries {
                dates: features.dates,
                labels,
                probabilities,
            };
            return Ok((series, false, true));
        }

        let mut detector = RegimeDetector::new(options.regime.clone(), options.capabilities);
        if let Some(store) = &self.store {
            detector = detector.with_store(Arc::clone(store));
        }
        let outcome = detector.fit(returns, vix, drawdown)?;
        let series = detector.predict(returns, vix, drawdown)?;
        Ok((series, outcome == FitOutcome::LoadedFromCache, false))
    }
}

/// Universe whose bucket table classifies the tickers. Unknown markets use
/// the USA table.
fn bucket_universe(market: &str) -> MarketUniverse {
    match MarketUniverse::by_id(market) {
        Ok(universe) => universe,
        Err(e) => {
            warn!("{}, using the usa bucket table", e);
            MarketUniverse::usa()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::SyntheticMarketDataSource;
    use crate::regime::cache::InMemoryCacheStore;

    struct EmptySource;

    impl MarketDataSource for EmptySource {
        fn load(&self, _market: &str, _start: NaiveDate, _end: NaiveDate) -> Result<MarketData> {
            Err(PipelineError::DataError("no rows".to_string()))
        }
    }

    struct BrokenSource;

    impl MarketDataSource for BrokenSource {
        fn load(&self, _market: &str, _start: NaiveDate, _end: NaiveDate) -> Result<MarketData> {
            Err(PipelineError::ConfigError("bad source".to_string()))
        }
    }

    fn options() -> PipelineOptions {
        let mut opts = PipelineOptions::new(
            "usa",
            NaiveDate::from_ymd_opt(2022, 1, 3).unwrap(),
            NaiveDate::from_ymd_opt(2023, 6, 30).unwrap(),
        );
        opts.risk = RiskConfig::quick();
        opts.risk_tier = SimulationTier::Interactive;
        opts.regime.n_iter = 20;
        opts
    }

    fn source() -> SyntheticMarketDataSource {
        SyntheticMarketDataSource {
            tickers: MarketUniverse::usa().default_tickers,
            seed: 7,
        }
    }

    #[test]
    fn test_full_run_produces_consistent_bundle() {
        let result = Pipeline::new(source()).run(&options()).unwrap();
        assert!(result.synthetic_data);
        assert_eq!(result.regimes.dates, result.prices.dates());
        assert_eq!(result.weights.n_rows(), result.prices.len());
        for row in &result.weights.values {
            assert!((row.iter().sum::<f64>() - 1.0).abs() < 1e-9);
        }
        assert_eq!(result.signals.len(), result.prices.n_assets());
        assert_eq!(result.risk.stress.len(), 5);
        assert!(result.risk.metrics.cvar_95 <= result.risk.metrics.var_95);
        assert_eq!(result.current_regime, *result.regimes.labels.last().unwrap());
    }

    #[test]
    fn test_empty_source_uses_synthetic_prices() {
        let result = Pipeline::new(EmptySource).run(&options()).unwrap();
        assert!(result.synthetic_data);
        assert_eq!(result.prices.n_assets(), 5);
    }

    #[test]
    fn test_source_errors_other_than_missing_data_propagate() {
        let err = Pipeline::new(BrokenSource).run(&options()).unwrap_err();
        assert!(matches!(err, PipelineError::ConfigError(_)));
    }

    #[test]
    fn test_unknown_market_uses_usa_buckets() {
        assert_eq!(bucket_universe("atlantis").id, "usa");
        assert_eq!(bucket_universe("uk").id, "uk");

        let mut opts = options();
        opts.market = "atlantis".to_string();
        let result = Pipeline::new(source()).run(&opts).unwrap();
        for row in &result.weights.values {
            assert!((row.iter().sum::<f64>() - 1.0).abs() < 1e-9);
        }
    }

    #[test]
    fn test_rejects_reversed_dates() {
        let mut opts = options();
        std::mem::swap(&mut opts.start, &mut opts.end);
        assert!(Pipeline::new(source()).run(&opts).is_err());
    }

    #[test]
    fn test_without_state_model_regimes_come_from_rules() {
        let opts = options().with_capabilities(Capabilities::all().without(Capability::StateModel));
        let result = Pipeline::new(source()).run(&opts).unwrap();
        assert!(result.rule_based_regimes);
        for p in &result.regimes.probabilities {
            assert!((p.iter().sum::<f64>() - 1.0).abs() < 1e-12);
        }
    }

    #[test]
    fn test_second_run_reuses_cached_model() {
        let store = Arc::new(InMemoryCacheStore::new());
        let pipeline = Pipeline::new(source()).with_cache_store(store.clone());
        let first = pipeline.run(&options()).unwrap();
        let second = pipeline.run(&options()).unwrap();
        assert!(!first.regime_from_cache);
        assert!(second.regime_from_cache);
        assert_eq!(first.regimes.labels, second.regimes.labels);
        assert_eq!(store.write_count(), 1);

        let refit = pipeline.run(&options().with_refit(true)).unwrap();
        assert!(!refit.regime_from_cache);
        assert_eq!(store.write_count(), 2);
    }

    #[test]
    fn test_solver_mode_weights_are_valid() {
        let opts = options().with_strategy(OptimizationStrategy::MinVariance);
        let result = Pipeline::new(source()).run(&opts).unwrap();
        for row in &result.weights.values {
            assert!((row.iter().sum::<f64>() - 1.0).abs() < 1e-6);
            assert!(row.iter().all(|w| *w >= -1e-9 && *w <= 1.0 + 1e-9));
        }
    }
}
