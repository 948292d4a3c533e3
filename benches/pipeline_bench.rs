//! Performance benchmarks for the pipeline stages.
//!
//! Run with: cargo bench

use chrono::NaiveDate;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use regime_allocator::backtest::{BacktestConfig, Backtester};
use regime_allocator::covariance::CovarianceEstimator;
use regime_allocator::data::{synthetic_market_data, MarketData};
use regime_allocator::factors::FactorEngine;
use regime_allocator::optimizer::{MarketEstimates, OptimizationStrategy, PortfolioOptimizer};
use regime_allocator::regime::hmm::{GaussianHmm, HmmConfig};
use regime_allocator::regime::{build_features, RegimeConfig};
use regime_allocator::risk::{ReturnMoments, RiskConfig, RiskEngine};
use regime_allocator::types::AssetFrame;

const TICKERS: [&str; 6] = ["SPY", "QQQ", "IWM", "TLT", "GLD", "VNQ"];

/// Synthetic market data covering roughly `years` of business days.
fn generate_market(years: i32) -> MarketData {
    let tickers: Vec<String> = TICKERS.iter().map(|t| t.to_string()).collect();
    let start = NaiveDate::from_ymd_opt(2015, 1, 1).unwrap();
    let end = NaiveDate::from_ymd_opt(2015 + years, 1, 1).unwrap();
    synthetic_market_data(&tickers, start, end, 42).unwrap()
}

/// Benchmark factor computation.
fn bench_factors(c: &mut Criterion) {
    let mut group = c.benchmark_group("factors");

    for years in [1, 3, 5].iter() {
        let data = generate_market(*years);
        group.bench_with_input(BenchmarkId::new("compute_all", years), &data, |b, data| {
            let engine = FactorEngine::default();
            b.iter(|| engine.compute_all(black_box(&data.prices)))
        });
    }

    group.finish();
}

/// Benchmark Baum-Welch fitting on regime features.
fn bench_hmm(c: &mut Criterion) {
    let mut group = c.benchmark_group("hmm");
    group.sample_size(10);

    for years in [2, 5].iter() {
        let data = generate_market(*years);
        let returns = data.prices.returns();
        let features = build_features(
            &returns,
            &data.volatility_index,
            None,
            &RegimeConfig::default(),
        );
        group.bench_with_input(
            BenchmarkId::new("fit_4_states", years),
            &features.values,
            |b, x| b.iter(|| GaussianHmm::fit(black_box(x), &HmmConfig::default())),
        );
    }

    group.finish();
}

/// Benchmark the convex strategies on one estimate set.
fn bench_optimizer(c: &mut Criterion) {
    let data = generate_market(2);
    let returns = data.prices.returns();
    let estimates =
        MarketEstimates::from_returns(&returns.values, &CovarianceEstimator::LedoitWolf).unwrap();
    let optimizer = PortfolioOptimizer::default();

    let mut group = c.benchmark_group("optimizer");
    group.bench_function("min_variance", |b| {
        b.iter(|| optimizer.optimize(black_box(&OptimizationStrategy::MinVariance), &estimates))
    });
    group.bench_function("max_sharpe", |b| {
        let strategy = OptimizationStrategy::MaxSharpe {
            risk_free_rate: 0.05,
        };
        b.iter(|| optimizer.optimize(black_box(&strategy), &estimates))
    });
    group.bench_function("cvar_min", |b| {
        let strategy = OptimizationStrategy::CvarMin { alpha: 0.05 };
        b.iter(|| optimizer.optimize(black_box(&strategy), &estimates))
    });
    group.finish();
}

/// Benchmark a daily-rebalanced backtest with equal weights.
fn bench_backtest(c: &mut Criterion) {
    let data = generate_market(5);
    let n = data.prices.n_assets();
    let weights = AssetFrame::new(
        data.prices.dates().to_vec(),
        data.prices.tickers().to_vec(),
        vec![vec![1.0 / n as f64; n]; data.prices.len()],
    )
    .unwrap();
    let backtester = Backtester::new(BacktestConfig::default());

    c.bench_function("backtest_5y_equal_weight", |b| {
        b.iter(|| backtester.run(black_box(&data.prices), black_box(&weights), None))
    });
}

/// Benchmark Monte Carlo simulation at several path counts.
fn bench_monte_carlo(c: &mut Criterion) {
    let engine = RiskEngine::new(RiskConfig::default());
    let moments = ReturnMoments {
        mu: 0.0004,
        sigma: 0.011,
        skew: -0.4,
        excess_kurtosis: 2.5,
    };

    let mut group = c.benchmark_group("monte_carlo");
    group.sample_size(10);

    for paths in [200, 1000, 5000].iter() {
        group.bench_with_input(BenchmarkId::new("simulate_252d", paths), paths, |b, &paths| {
            b.iter(|| engine.simulate(black_box(&moments), paths, 252, 42))
        });
    }

    group.bench_function("analyze_metrics_1000", |b| {
        let sims = engine.simulate(&moments, 1000, 252, 42);
        b.iter(|| engine.metrics(black_box(&sims)))
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_factors,
    bench_hmm,
    bench_optimizer,
    bench_backtest,
    bench_monte_carlo,
);
criterion_main!(benches);
