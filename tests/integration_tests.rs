//! Integration tests for the allocation pipeline.

use chrono::NaiveDate;
use regime_allocator::backtest::{BacktestConfig, Backtester};
use regime_allocator::capability::{Capabilities, Capability};
use regime_allocator::covariance::CovarianceEstimator;
use regime_allocator::data::{business_days, CsvMarketDataSource};
use regime_allocator::execution::CostModel;
use regime_allocator::factors::FactorEngine;
use regime_allocator::optimizer::allocation::RegimeAllocationTable;
use regime_allocator::optimizer::{risk_parity, MarketEstimates, OptimizationStrategy, PortfolioOptimizer};
use regime_allocator::pipeline::{Pipeline, PipelineOptions};
use regime_allocator::regime::cache::{FileCacheStore, RegimeCacheStore};
use regime_allocator::regime::{FitOutcome, RegimeConfig, RegimeDetector};
use regime_allocator::risk::{var_cvar, ReturnMoments, RiskConfig, RiskEngine, SimulationTier};
use regime_allocator::types::{AssetFrame, DateSeries, PriceMatrix, Regime};
use regime_allocator::universe::MarketUniverse;
use std::io::Write;
use std::sync::Arc;
use tempfile::{tempdir, NamedTempFile};

fn trading_dates(n: usize) -> Vec<NaiveDate> {
    let start = NaiveDate::from_ymd_opt(2021, 1, 4).unwrap();
    let end = NaiveDate::from_ymd_opt(2026, 12, 31).unwrap();
    business_days(start, end).into_iter().take(n).collect()
}

fn tickers(n: usize) -> Vec<String> {
    (0..n).map(|j| format!("A{}", j)).collect()
}

/// Linear uptrends with small bounded noise; asset `j` has slope `(j + 1) * 0.0002`.
fn uptrend_prices(days: usize, assets: usize) -> PriceMatrix {
    let values = (0..days)
        .map(|t| {
            (0..assets)
                .map(|j| {
                    let trend = 100.0 * (1.0 + (j + 1) as f64 * 0.0002 * t as f64);
                    let noise = 0.2 * ((t as f64) * 0.9 * (1.0 + 0.37 * j as f64) + j as f64).sin();
                    trend + noise
                })
                .collect()
        })
        .collect();
    PriceMatrix::new(trading_dates(days), tickers(assets), values).unwrap()
}

/// Gentle drift, then a 40% fall over 20 days, then a partial recovery.
fn drawdown_prices() -> PriceMatrix {
    let days = 300;
    let mut level = 100.0;
    let values = (0..days)
        .map(|t| {
            if (150..170).contains(&t) {
                level *= 0.6f64.powf(1.0 / 20.0);
            } else {
                level *= 1.0 + 0.0004 + 0.004 * ((t as f64) * 1.3).sin();
            }
            vec![level, level * (1.0 + 0.01 * ((t as f64) * 0.4).cos())]
        })
        .collect();
    PriceMatrix::new(trading_dates(days), tickers(2), values).unwrap()
}

fn constant_vix(prices: &PriceMatrix) -> DateSeries {
    DateSeries::constant(prices.dates(), 20.0)
}

#[test]
fn test_uptrend_is_mostly_bull() {
    let prices = uptrend_prices(500, 6);
    let returns = prices.returns();
    let factors = FactorEngine::default().compute_all(&prices);
    let vix = constant_vix(&prices);

    let mut detector = RegimeDetector::new(RegimeConfig::default(), Capabilities::all());
    detector.fit(&returns, &vix, Some(&factors.drawdown)).unwrap();
    let regimes = detector.predict(&returns, &vix, Some(&factors.drawdown)).unwrap();

    assert_eq!(regimes.len(), returns.n_rows());
    let counts = regimes.counts();
    let bull = counts[Regime::Bull.index()];
    assert!(
        counts.iter().all(|&c| c <= bull),
        "Bull should be the plurality, counts {:?}",
        counts
    );
    for p in &regimes.probabilities {
        assert!((p.iter().sum::<f64>() - 1.0).abs() < 1e-9);
    }
}

#[test]
fn test_mean_variance_holds_best_asset_on_uptrend() {
    let prices = uptrend_prices(500, 6);
    let returns = prices.returns();
    let estimates = MarketEstimates::from_returns(&returns.values, &CovarianceEstimator::Sample).unwrap();

    let (best, best_mean) = estimates
        .expected_returns
        .iter()
        .copied()
        .enumerate()
        .max_by(|a, b| a.1.total_cmp(&b.1))
        .unwrap();
    assert_eq!(best, 5);

    let strategy = OptimizationStrategy::MeanVariance {
        target_return: Some(0.9 * best_mean),
        long_only: true,
    };
    let w = PortfolioOptimizer::default().optimize(&strategy, &estimates).unwrap();
    assert!((w.iter().sum::<f64>() - 1.0).abs() < 1e-6);
    assert!(w[best] > 0.01, "weights {:?}", w);
    assert!(estimates.portfolio_return(&w) >= 0.9 * best_mean - 1e-7);
}

#[test]
fn test_ruin_probability_monotone_in_threshold() {
    let prices = drawdown_prices();
    let returns = prices.returns();
    let moments = ReturnMoments::portfolio(&returns, &[0.5, 0.5]).unwrap();
    assert!(moments.excess_kurtosis > 0.0);

    let engine = RiskEngine::new(RiskConfig::quick());
    let (metrics, paths) = engine.analyze(&moments, SimulationTier::Report);

    let thresholds = [-0.5, -0.4, -0.3, -0.2];
    let probs: Vec<f64> = thresholds.iter().map(|&l| paths.ruin_probability(l)).collect();
    for pair in probs.windows(2) {
        assert!(pair[0] <= pair[1], "ruin probabilities {:?}", probs);
    }
    assert_eq!(metrics.prob_ruin, probs[0]);
    assert!(metrics.cvar_95 <= metrics.var_95);
    assert!(paths.max_drawdowns().iter().all(|d| *d <= 0.0));
}

#[test]
fn test_constant_prices_are_degenerate_but_valid() {
    let dates = trading_dates(300);
    let prices = PriceMatrix::new(dates, tickers(3), vec![vec![100.0; 3]; 300]).unwrap();
    let factors = FactorEngine::default().compute_all(&prices);
    for row in &factors.volatility.values[21..] {
        assert!(row.iter().all(|v| *v == 0.0), "row {:?}", row);
    }
    assert!(factors.drawdown.values.iter().flatten().all(|d| *d == 0.0));

    let returns = prices.returns();
    let vix = constant_vix(&prices);
    let mut detector = RegimeDetector::new(RegimeConfig::default(), Capabilities::all());
    detector.fit(&returns, &vix, Some(&factors.drawdown)).unwrap();
    let regimes = detector.predict(&returns, &vix, Some(&factors.drawdown)).unwrap();
    assert_eq!(regimes.len(), returns.n_rows());
    for p in &regimes.probabilities {
        assert!((p.iter().sum::<f64>() - 1.0).abs() < 1e-9);
    }
}

/// Mean of the `k` worst portfolio returns.
fn tail_mean(scenarios: &[Vec<f64>], w: &[f64], k: usize) -> f64 {
    let mut r: Vec<f64> = scenarios
        .iter()
        .map(|row| row.iter().zip(w).map(|(a, b)| a * b).sum())
        .collect();
    r.sort_by(|a, b| a.total_cmp(b));
    r[..k].iter().sum::<f64>() / k as f64
}

#[test]
fn test_cvar_min_beats_min_variance_in_the_tail() {
    // Asset 0 is quiet except for periodic crashes.
    let t_len = 400;
    let values: Vec<Vec<f64>> = (0..t_len)
        .map(|t| {
            let t_f = t as f64;
            let a = if t % 20 == 7 {
                -0.06
            } else {
                0.0005 + 0.002 * (t_f * 1.1).sin()
            };
            vec![
                a,
                0.0003 + 0.012 * (t_f * 0.77 + 1.0).sin(),
                0.0002 + 0.008 * (t_f * 0.53).cos(),
            ]
        })
        .collect();
    let returns = AssetFrame::new(trading_dates(t_len), tickers(3), values).unwrap();
    let estimates = MarketEstimates::from_returns(&returns.values, &CovarianceEstimator::Sample).unwrap();

    let optimizer = PortfolioOptimizer::default();
    let w_mv = optimizer.optimize(&OptimizationStrategy::MinVariance, &estimates).unwrap();
    let w_cvar = optimizer
        .optimize(&OptimizationStrategy::CvarMin { alpha: 0.05 }, &estimates)
        .unwrap();
    assert!((w_cvar.iter().sum::<f64>() - 1.0).abs() < 1e-6);

    let k = 20;
    let cvar_mv = tail_mean(&estimates.scenarios, &w_mv, k);
    let cvar_opt = tail_mean(&estimates.scenarios, &w_cvar, k);
    assert!(
        cvar_opt >= cvar_mv - 1e-5,
        "CVaR-min tail {} vs min-variance tail {}",
        cvar_opt,
        cvar_mv
    );

    let port = |w: &[f64]| -> Vec<f64> {
        returns
            .values
            .iter()
            .map(|row| row.iter().zip(w).map(|(a, b)| a * b).sum())
            .collect()
    };
    for w in [&w_mv, &w_cvar] {
        let (var, cvar) = var_cvar(&port(w), 0.95);
        assert!(cvar <= var);
    }
}

#[test]
fn test_file_cache_reuse_and_invalidation() {
    let dir = tempdir().unwrap();
    let store: Arc<dyn RegimeCacheStore> = Arc::new(FileCacheStore::new(dir.path()).unwrap());
    let prices = uptrend_prices(300, 3);
    let returns = prices.returns();
    let vix = constant_vix(&prices);
    let config = RegimeConfig {
        n_iter: 30,
        ..Default::default()
    };

    let mut first = RegimeDetector::new(config.clone(), Capabilities::all()).with_store(Arc::clone(&store));
    assert_eq!(first.fit(&returns, &vix, None).unwrap(), FitOutcome::Fitted);
    assert!(dir.path().join(format!("{}.json", first.cache_key())).exists());

    let mut second = RegimeDetector::new(config.clone(), Capabilities::all()).with_store(Arc::clone(&store));
    assert_eq!(second.fit(&returns, &vix, None).unwrap(), FitOutcome::LoadedFromCache);
    assert_eq!(
        first.predict(&returns, &vix, None).unwrap().labels,
        second.predict(&returns, &vix, None).unwrap().labels
    );

    // New observations change the fingerprint.
    let longer = uptrend_prices(320, 3);
    let mut third = RegimeDetector::new(config, Capabilities::all()).with_store(Arc::clone(&store));
    assert_eq!(
        third.fit(&longer.returns(), &constant_vix(&longer), None).unwrap(),
        FitOutcome::Fitted
    );

    // No temp files are left behind.
    let leftovers = std::fs::read_dir(dir.path())
        .unwrap()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
        .count();
    assert_eq!(leftovers, 0);
}

#[test]
fn test_costs_never_improve_total_return() {
    let base = drawdown_prices();
    let prices = PriceMatrix::new(
        base.dates().to_vec(),
        vec!["SPY".to_string(), "TLT".to_string()],
        base.values().to_vec(),
    )
    .unwrap();
    let universe = MarketUniverse::usa();
    let assignment = universe.bucket_assignment(prices.tickers());
    let table = RegimeAllocationTable::default();
    let regimes = regime_allocator::types::RegimeSeries {
        dates: prices.dates().to_vec(),
        labels: (0..prices.len())
            .map(|t| if t % 30 < 15 { Regime::Bull } else { Regime::Crisis })
            .collect(),
        probabilities: vec![[0.25; 4]; prices.len()],
    };
    let weights = table
        .allocate_series(&regimes, prices.dates(), prices.tickers(), &assignment)
        .unwrap();

    let free = Backtester::new(BacktestConfig {
        cost_model: CostModel::zero(),
        ..Default::default()
    })
    .run(&prices, &weights, None)
    .unwrap();
    let costly = Backtester::new(BacktestConfig::default())
        .run(&prices, &weights, None)
        .unwrap();
    assert!(free.metrics.turnover > 0.0);
    assert!(costly.metrics.total_return < free.metrics.total_return);
    assert!(free.drawdown.iter().all(|d| *d <= 0.0));
}

#[test]
fn test_missing_capabilities_are_detectable_and_fall_back() {
    let prices = uptrend_prices(200, 4);
    let returns = prices.returns();
    let vix = constant_vix(&prices);

    let caps = Capabilities::all().without(Capability::StateModel);
    let mut detector = RegimeDetector::new(RegimeConfig::default(), caps);
    let err = detector.fit(&returns, &vix, None).unwrap_err();
    assert!(err.is_capability_unavailable());

    let estimates = MarketEstimates::from_returns(&returns.values, &CovarianceEstimator::LedoitWolf).unwrap();
    let optimizer = PortfolioOptimizer::new(Capabilities::all().without(Capability::ConvexSolver));
    let w = optimizer
        .optimize(&OptimizationStrategy::MaxSharpe { risk_free_rate: 0.05 }, &estimates)
        .unwrap();
    assert_eq!(w, vec![0.25; 4]);
    let rp = optimizer.optimize(&OptimizationStrategy::RiskParity, &estimates).unwrap();
    for (a, b) in rp.iter().zip(risk_parity(&estimates.covariance)) {
        assert!((a - b).abs() < 1e-12);
    }
}

#[test]
fn test_pipeline_from_csv_files() {
    let prices = uptrend_prices(260, 4);
    let names = ["SPY", "QQQ", "TLT", "GLD"];
    let mut csv = format!("date,{}\n", names.join(","));
    for (d, row) in prices.dates().iter().zip(prices.values()) {
        let cells: Vec<String> = row.iter().map(|v| format!("{:.6}", v)).collect();
        csv.push_str(&format!("{},{}\n", d.format("%Y-%m-%d"), cells.join(",")));
    }
    let mut file = NamedTempFile::new().unwrap();
    write!(file, "{}", csv).unwrap();
    file.flush().unwrap();

    let mut options = PipelineOptions::new(
        "usa",
        prices.dates()[0],
        *prices.dates().last().unwrap(),
    );
    options.risk = RiskConfig::quick();
    options.risk_tier = SimulationTier::Interactive;

    let result = Pipeline::new(CsvMarketDataSource::new(file.path()))
        .with_tracked_file(file.path())
        .run(&options)
        .unwrap();

    assert!(!result.synthetic_data);
    assert_eq!(result.prices.tickers(), names.map(String::from).as_slice());
    assert_eq!(result.metadata.data_files.len(), 1);
    assert_eq!(result.equity_curve().len(), prices.len() - 1);
    for row in &result.weights.values {
        assert!((row.iter().sum::<f64>() - 1.0).abs() < 1e-9);
        assert!(row.iter().all(|w| (0.0..=1.0).contains(w)));
    }
    assert_eq!(result.signals.len(), 4);
    assert!(result.risk.paths.paths.len() <= 200);
}
