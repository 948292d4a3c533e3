//! Portfolio construction.
//!
//! Three ways to get weights out of prices:
//!
//! - [`PortfolioOptimizer`]: convex solvers (Clarabel) and closed-form risk
//!   parity over a mean vector and covariance matrix, selected through
//!   [`OptimizationStrategy`]
//! - [`allocation`]: the fixed regime-to-bucket allocation table
//! - [`signals`]: Buy/Hold/Sell classification of the latest allocation
//!
//! Every solver result is clipped onto the long-only simplex. A solve that
//! fails to converge is logged and replaced by equal weights; only malformed
//! inputs (mismatched dimensions, bad parameters) are returned as errors.

pub mod allocation;
pub mod signals;

use crate::capability::{Capabilities, Capability};
use crate::covariance::{expected_returns, CovarianceEstimator};
use crate::error::{PipelineError, Result};
use crate::linalg::{
    add, check_shape, dot, invert_matrix, mat_mul, mat_vec, quad_form, scale, solve, transpose,
    Matrix,
};
use crate::types::{AssetFrame, ReturnMatrix, WeightMatrix};
use clarabel::algebra::CscMatrix;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Black-Litterman views: `pick` is `k x n`, one row per view.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ViewSet {
    pub pick: Matrix,
    pub returns: Vec<f64>,
    /// View uncertainty `k x k`. Defaults to `diag(tau * P Sigma P')`.
    #[serde(default)]
    pub omega: Option<Matrix>,
}

/// Allocation method, selected explicitly by the caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OptimizationStrategy {
    /// Minimum variance with an optional expected-return floor.
    MeanVariance {
        #[serde(default)]
        target_return: Option<f64>,
        #[serde(default = "default_true")]
        long_only: bool,
    },
    MinVariance,
    /// Inverse-volatility weights.
    RiskParity,
    /// Tangency portfolio; the rate is annual.
    MaxSharpe { risk_free_rate: f64 },
    /// Posterior returns from the views, then mean-variance.
    BlackLitterman {
        views: ViewSet,
        tau: f64,
        /// When set, the prior is the equilibrium `delta * Sigma * w_eq` with
        /// equal market weights instead of the sample means.
        #[serde(default)]
        risk_aversion: Option<f64>,
    },
    /// Rockafellar-Uryasev CVaR minimization at tail probability `alpha`.
    CvarMin { alpha: f64 },
}

fn default_true() -> bool {
    true
}

impl Default for OptimizationStrategy {
    fn default() -> Self {
        OptimizationStrategy::MinVariance
    }
}

impl OptimizationStrategy {
    pub fn name(&self) -> &'static str {
        match self {
            OptimizationStrategy::MeanVariance { .. } => "mean-variance",
            OptimizationStrategy::MinVariance => "min-variance",
            OptimizationStrategy::RiskParity => "risk-parity",
            OptimizationStrategy::MaxSharpe { .. } => "max-sharpe",
            OptimizationStrategy::BlackLitterman { .. } => "black-litterman",
            OptimizationStrategy::CvarMin { .. } => "cvar-min",
        }
    }

    /// Whether the strategy needs the convex solver.
    pub fn is_convex(&self) -> bool {
        !matches!(self, OptimizationStrategy::RiskParity)
    }
}

/// Daily expected returns, covariance and the return scenarios behind them.
#[derive(Debug, Clone, PartialEq)]
pub struct MarketEstimates {
    pub expected_returns: Vec<f64>,
    pub covariance: Matrix,
    /// Historical returns, one row per period (used by CVaR).
    pub scenarios: Matrix,
}

impl MarketEstimates {
    pub fn new(expected_returns: Vec<f64>, covariance: Matrix) -> Result<Self> {
        let n = expected_returns.len();
        if n == 0 {
            return Err(PipelineError::InvalidInput(
                "Need at least one asset".to_string(),
            ));
        }
        check_shape(&covariance, n, n, "Covariance matrix")?;
        Ok(Self {
            expected_returns,
            covariance,
            scenarios: Vec::new(),
        })
    }

    pub fn with_scenarios(mut self, scenarios: Matrix) -> Result<Self> {
        if scenarios.iter().any(|r| r.len() != self.n_assets()) {
            return Err(PipelineError::InvalidInput(
                "Scenario rows must have one return per asset".to_string(),
            ));
        }
        self.scenarios = scenarios;
        Ok(self)
    }

    /// Estimate from a window of returns (rows are periods).
    pub fn from_returns(returns: &[Vec<f64>], estimator: &CovarianceEstimator) -> Result<Self> {
        let covariance = estimator.estimate(returns)?;
        let scenarios: Matrix = returns
            .iter()
            .filter(|r| r.iter().all(|v| v.is_finite()))
            .cloned()
            .collect();
        Self::new(expected_returns(returns), covariance)?.with_scenarios(scenarios)
    }

    pub fn n_assets(&self) -> usize {
        self.expected_returns.len()
    }

    pub fn portfolio_return(&self, weights: &[f64]) -> f64 {
        dot(&self.expected_returns, weights)
    }

    pub fn portfolio_volatility(&self, weights: &[f64]) -> f64 {
        quad_form(&self.covariance, weights).max(0.0).sqrt()
    }
}

/// Equal weights over `n` assets.
pub fn equal_weight(n: usize) -> Vec<f64> {
    if n == 0 {
        Vec::new()
    } else {
        vec![1.0 / n as f64; n]
    }
}

/// Project raw solver output onto the long-only simplex: negative and
/// non-finite entries become zero, and a vanishing sum gives equal weights.
pub fn clip_to_simplex(weights: &[f64]) -> Vec<f64> {
    let clipped: Vec<f64> = weights
        .iter()
        .map(|&w| if w.is_finite() && w > 0.0 { w } else { 0.0 })
        .collect();
    let sum: f64 = clipped.iter().sum();
    if sum <= 1e-12 {
        return equal_weight(weights.len());
    }
    clipped.iter().map(|w| w / sum).collect()
}

/// Dense rows to a CSC matrix, optionally keeping the upper triangle only.
fn to_csc(rows: &[Vec<f64>], n_cols: usize, upper_only: bool) -> CscMatrix<f64> {
    let n_rows = rows.len();
    let mut colptr = vec![0];
    let mut rowval = Vec::new();
    let mut nzval = Vec::new();
    for j in 0..n_cols {
        let last = if upper_only { (j + 1).min(n_rows) } else { n_rows };
        for (i, row) in rows.iter().enumerate().take(last) {
            let val = row[j];
            if val.abs() > 1e-14 {
                nzval.push(val);
                rowval.push(i);
            }
        }
        colptr.push(nzval.len());
    }
    CscMatrix::new(n_rows, n_cols, colptr, rowval, nzval)
}

/// A conic problem in Clarabel form:
/// minimize `x'Px/2 + q'x` subject to `Ax + s = b`, with the first
/// `n_equalities` rows of `A` in the zero cone and the rest nonnegative.
struct ConicProblem {
    p: Matrix,
    q: Vec<f64>,
    a: Matrix,
    b: Vec<f64>,
    n_equalities: usize,
}

/// Convex allocation solvers.
#[derive(Debug, Clone)]
pub struct PortfolioOptimizer {
    capabilities: Capabilities,
    max_iter: u32,
}

impl Default for PortfolioOptimizer {
    fn default() -> Self {
        Self::new(Capabilities::all())
    }
}

impl PortfolioOptimizer {
    pub fn new(capabilities: Capabilities) -> Self {
        Self {
            capabilities,
            max_iter: 100,
        }
    }

    pub fn with_max_iter(mut self, max_iter: u32) -> Self {
        self.max_iter = max_iter;
        self
    }

    /// Weights for `strategy`, always on the simplex.
    pub fn optimize(
        &self,
        strategy: &OptimizationStrategy,
        estimates: &MarketEstimates,
    ) -> Result<Vec<f64>> {
        let n = estimates.n_assets();
        if strategy.is_convex() && !self.capabilities.has(Capability::ConvexSolver) {
            warn!(
                "Convex solver unavailable, {} falls back to equal weight",
                strategy.name()
            );
            return Ok(equal_weight(n));
        }

        let raw = match strategy {
            OptimizationStrategy::MeanVariance {
                target_return,
                long_only,
            } => self.mean_variance(estimates, *target_return, *long_only),
            OptimizationStrategy::MinVariance => self.mean_variance(estimates, None, true),
            OptimizationStrategy::RiskParity => Ok(risk_parity(&estimates.covariance)),
            OptimizationStrategy::MaxSharpe { risk_free_rate } => {
                self.max_sharpe(estimates, *risk_free_rate)
            }
            OptimizationStrategy::BlackLitterman {
                views,
                tau,
                risk_aversion,
            } => {
                let posterior = black_litterman_posterior(estimates, views, *tau, *risk_aversion)?;
                // Mean-variance with a return floor at the average posterior
                // return, not plain minimum variance.
                let floor = posterior.iter().sum::<f64>() / n as f64;
                let posterior_estimates = MarketEstimates {
                    expected_returns: posterior,
                    covariance: estimates.covariance.clone(),
                    scenarios: Vec::new(),
                };
                self.mean_variance(&posterior_estimates, Some(floor), true)
            }
            OptimizationStrategy::CvarMin { alpha } => self.cvar_min(estimates, *alpha),
        };

        match raw {
            Ok(w) => Ok(clip_to_simplex(&w)),
            Err(PipelineError::OptimizationError(msg)) => {
                warn!("{} failed ({}), using equal weight", strategy.name(), msg);
                Ok(equal_weight(n))
            }
            Err(e) => Err(e),
        }
    }

    fn solve(&self, problem: &ConicProblem) -> Result<Vec<f64>> {
        use clarabel::solver::*;

        let n_vars = problem.q.len();
        let n_rows = problem.a.len();
        let p = to_csc(&problem.p, n_vars, true);
        let a = to_csc(&problem.a, n_vars, false);

        let mut cones: Vec<SupportedConeT<f64>> = Vec::new();
        if problem.n_equalities > 0 {
            cones.push(ZeroConeT(problem.n_equalities));
        }
        if n_rows > problem.n_equalities {
            cones.push(NonnegativeConeT(n_rows - problem.n_equalities));
        }

        let settings = DefaultSettingsBuilder::default()
            .max_iter(self.max_iter)
            .verbose(false)
            .build()
            .map_err(|e| {
                PipelineError::OptimizationError(format!("Failed to build settings: {}", e))
            })?;

        let mut solver = DefaultSolver::new(&p, &problem.q, &a, &problem.b, &cones, settings)
            .map_err(|e| {
                PipelineError::OptimizationError(format!("Failed to create solver: {:?}", e))
            })?;
        solver.solve();

        match solver.solution.status {
            SolverStatus::Solved | SolverStatus::AlmostSolved => {
                debug!(
                    "Solver finished in {} iterations",
                    solver.solution.iterations
                );
                Ok(solver.solution.x.clone())
            }
            status => Err(PipelineError::OptimizationError(format!(
                "Solver status {:?}",
                status
            ))),
        }
    }

    /// Minimize `w'Σw` with `sum(w) = 1`, optionally `μ'w >= target` and `w >= 0`.
    fn mean_variance(
        &self,
        estimates: &MarketEstimates,
        target_return: Option<f64>,
        long_only: bool,
    ) -> Result<Vec<f64>> {
        let n = estimates.n_assets();
        let mut a = vec![vec![1.0; n]];
        let mut b = vec![1.0];
        if let Some(target) = target_return {
            if !target.is_finite() {
                return Err(PipelineError::InvalidInput(
                    "Target return must be finite".to_string(),
                ));
            }
            a.push(estimates.expected_returns.iter().map(|m| -m).collect());
            b.push(-target);
        }
        if long_only {
            push_nonnegativity(&mut a, &mut b, n, 0, n);
        }
        self.solve(&ConicProblem {
            p: scale(&estimates.covariance, 2.0),
            q: vec![0.0; n],
            a,
            b,
            n_equalities: 1,
        })
    }

    /// Minimize `w'Σw` with `(μ - rf)'w = 1` and `w >= 0`, then normalize.
    fn max_sharpe(&self, estimates: &MarketEstimates, risk_free_rate: f64) -> Result<Vec<f64>> {
        let n = estimates.n_assets();
        let daily_rf = risk_free_rate / crate::types::TRADING_DAYS;
        let excess: Vec<f64> = estimates
            .expected_returns
            .iter()
            .map(|m| m - daily_rf)
            .collect();
        if excess.iter().all(|&e| e <= 0.0) {
            debug!("No asset beats the risk-free rate, using minimum variance");
            return self.mean_variance(estimates, None, true);
        }

        let mut a = vec![excess];
        let mut b = vec![1.0];
        push_nonnegativity(&mut a, &mut b, n, 0, n);
        let raw = self.solve(&ConicProblem {
            p: scale(&estimates.covariance, 2.0),
            q: vec![0.0; n],
            a,
            b,
            n_equalities: 1,
        })?;
        let sum: f64 = raw.iter().sum();
        if sum.abs() < 1e-12 {
            return Err(PipelineError::OptimizationError(
                "Tangency weights sum to zero".to_string(),
            ));
        }
        Ok(raw.iter().map(|w| w / sum).collect())
    }

    /// Variables `[w (n), u (T), v]`; minimize `v + sum(u) / (alpha T)` with
    /// `u_t >= -r_t'w - v`, `u >= 0`, `w >= 0` and `sum(w) = 1`.
    fn cvar_min(&self, estimates: &MarketEstimates, alpha: f64) -> Result<Vec<f64>> {
        if !(alpha > 0.0 && alpha < 1.0) {
            return Err(PipelineError::InvalidInput(format!(
                "CVaR tail probability must be in (0, 1), got {}",
                alpha
            )));
        }
        let n = estimates.n_assets();
        let scenarios = &estimates.scenarios;
        let t = scenarios.len();
        if t == 0 {
            return Err(PipelineError::InvalidInput(
                "CVaR minimization needs return scenarios".to_string(),
            ));
        }
        let n_vars = n + t + 1;
        let alpha = alpha.max(1e-6);

        let mut q = vec![0.0; n_vars];
        for qu in q.iter_mut().skip(n).take(t) {
            *qu = 1.0 / (alpha * t as f64);
        }
        q[n + t] = 1.0;

        let mut sum_row = vec![0.0; n_vars];
        sum_row[..n].iter_mut().for_each(|v| *v = 1.0);
        let mut a = vec![sum_row];
        let mut b = vec![1.0];

        for (k, r) in scenarios.iter().enumerate() {
            let mut row = vec![0.0; n_vars];
            for j in 0..n {
                row[j] = -r[j];
            }
            row[n + k] = -1.0;
            row[n + t] = -1.0;
            a.push(row);
            b.push(0.0);
        }
        push_nonnegativity(&mut a, &mut b, n_vars, n, t);
        push_nonnegativity(&mut a, &mut b, n_vars, 0, n);

        let x = self.solve(&ConicProblem {
            p: vec![vec![0.0; n_vars]; n_vars],
            q,
            a,
            b,
            n_equalities: 1,
        })?;
        Ok(x[..n].to_vec())
    }

    /// Re-optimize on a trailing window every `rebalance_every` periods and
    /// hold in between. Dates with fewer than `min_history` observations get
    /// equal weights.
    pub fn optimize_rolling(
        &self,
        returns: &ReturnMatrix,
        strategy: &OptimizationStrategy,
        estimator: &CovarianceEstimator,
        schedule: &RollingSchedule,
    ) -> Result<WeightMatrix> {
        let n = returns.n_cols();
        let mut rows = Vec::with_capacity(returns.n_rows());
        let mut current = equal_weight(n);
        for t in 0..returns.n_rows() {
            if t % schedule.rebalance_every.max(1) == 0 {
                let observed = t + 1;
                current = if observed < schedule.min_history {
                    equal_weight(n)
                } else {
                    let start = observed.saturating_sub(schedule.lookback);
                    match MarketEstimates::from_returns(&returns.values[start..observed], estimator)
                    {
                        Ok(estimates) => self.optimize(strategy, &estimates)?,
                        Err(PipelineError::InsufficientData { .. }) => equal_weight(n),
                        Err(e) => return Err(e),
                    }
                };
            }
            rows.push(current.clone());
        }
        AssetFrame::new(returns.dates.clone(), returns.tickers.clone(), rows)
    }
}

/// Windowing for [`PortfolioOptimizer::optimize_rolling`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RollingSchedule {
    pub lookback: usize,
    pub rebalance_every: usize,
    pub min_history: usize,
}

impl Default for RollingSchedule {
    fn default() -> Self {
        Self {
            lookback: 252,
            rebalance_every: 21,
            min_history: 63,
        }
    }
}

/// Append `-x_j <= 0` rows for variables `offset..offset + count`.
fn push_nonnegativity(a: &mut Matrix, b: &mut Vec<f64>, n_vars: usize, offset: usize, count: usize) {
    for j in offset..offset + count {
        let mut row = vec![0.0; n_vars];
        row[j] = -1.0;
        a.push(row);
        b.push(0.0);
    }
}

/// Inverse-volatility weights. Assets with no variance make the
/// approximation meaningless, so equal weights are returned instead.
pub fn risk_parity(covariance: &[Vec<f64>]) -> Vec<f64> {
    let n = covariance.len();
    let vols: Vec<f64> = (0..n).map(|i| covariance[i][i]).collect();
    if vols.iter().any(|v| !(v.is_finite() && *v > 1e-18)) {
        return equal_weight(n);
    }
    let inv: Vec<f64> = vols.iter().map(|v| 1.0 / v.sqrt()).collect();
    let total: f64 = inv.iter().sum();
    inv.iter().map(|v| v / total).collect()
}

/// Posterior mean `[(τΣ)⁻¹ + P'Ω⁻¹P]⁻¹ [(τΣ)⁻¹Π + P'Ω⁻¹Q]`.
pub fn black_litterman_posterior(
    estimates: &MarketEstimates,
    views: &ViewSet,
    tau: f64,
    risk_aversion: Option<f64>,
) -> Result<Vec<f64>> {
    let n = estimates.n_assets();
    let k = views.returns.len();
    if !(tau > 0.0 && tau <= 1.0) {
        return Err(PipelineError::InvalidInput(format!(
            "Tau must be in (0, 1], got {}",
            tau
        )));
    }
    check_shape(&views.pick, k, n, "View pick matrix")?;
    let sigma = &estimates.covariance;

    let prior = match risk_aversion {
        Some(delta) if delta > 0.0 => mat_vec(&scale(sigma, delta), &equal_weight(n)),
        Some(delta) => {
            return Err(PipelineError::InvalidInput(format!(
                "Risk aversion must be positive, got {}",
                delta
            )))
        }
        None => estimates.expected_returns.clone(),
    };
    if k == 0 {
        return Ok(prior);
    }

    let p = &views.pick;
    let pt = transpose(p);
    let omega = match &views.omega {
        Some(o) => {
            check_shape(o, k, k, "View uncertainty")?;
            o.clone()
        }
        None => {
            let psp = mat_mul(&mat_mul(p, sigma), &pt);
            let mut o = vec![vec![0.0; k]; k];
            for i in 0..k {
                o[i][i] = (tau * psp[i][i]).max(1e-12);
            }
            o
        }
    };

    let tau_sigma_inv = invert_matrix(&scale(sigma, tau))?;
    let omega_inv = invert_matrix(&omega)?;
    let pt_omega_inv = mat_mul(&pt, &omega_inv);
    let precision = add(&tau_sigma_inv, &mat_mul(&pt_omega_inv, p));
    let rhs: Vec<f64> = mat_vec(&tau_sigma_inv, &prior)
        .iter()
        .zip(mat_vec(&pt_omega_inv, &views.returns))
        .map(|(a, b)| a + b)
        .collect();
    solve(&precision, &rhs)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn three_assets() -> MarketEstimates {
        MarketEstimates::new(
            vec![0.0004, 0.0008, 0.0002],
            vec![
                vec![0.0001, 0.00002, 0.0],
                vec![0.00002, 0.0004, 0.0],
                vec![0.0, 0.0, 0.00005],
            ],
        )
        .unwrap()
    }

    fn assert_simplex(w: &[f64]) {
        assert!((w.iter().sum::<f64>() - 1.0).abs() < 1e-6, "{:?}", w);
        assert!(w.iter().all(|v| (0.0..=1.0 + 1e-9).contains(v)), "{:?}", w);
    }

    #[test]
    fn test_min_variance_prefers_low_vol() {
        let opt = PortfolioOptimizer::default();
        let w = opt
            .optimize(&OptimizationStrategy::MinVariance, &three_assets())
            .unwrap();
        assert_simplex(&w);
        assert!(w[2] > w[1]);
        assert!(w[0] > w[1]);
    }

    #[test]
    fn test_target_return_floor_shifts_weight() {
        let opt = PortfolioOptimizer::default();
        let est = three_assets();
        let base = opt.optimize(&OptimizationStrategy::MinVariance, &est).unwrap();
        let strategy = OptimizationStrategy::MeanVariance {
            target_return: Some(0.0006),
            long_only: true,
        };
        let w = opt.optimize(&strategy, &est).unwrap();
        assert_simplex(&w);
        assert!(est.portfolio_return(&w) >= 0.0006 - 1e-6);
        assert!(w[1] > base[1]);
    }

    #[test]
    fn test_infeasible_target_falls_back_to_equal() {
        let opt = PortfolioOptimizer::default();
        let strategy = OptimizationStrategy::MeanVariance {
            target_return: Some(0.01),
            long_only: true,
        };
        let w = opt.optimize(&strategy, &three_assets()).unwrap();
        for v in w {
            assert!((v - 1.0 / 3.0).abs() < 1e-9);
        }
    }

    #[test]
    fn test_max_sharpe_normalized() {
        let opt = PortfolioOptimizer::default();
        let w = opt
            .optimize(
                &OptimizationStrategy::MaxSharpe {
                    risk_free_rate: 0.0,
                },
                &three_assets(),
            )
            .unwrap();
        assert_simplex(&w);
        assert!(w[0] > 0.1);
    }

    #[test]
    fn test_max_sharpe_without_excess_uses_min_variance() {
        let opt = PortfolioOptimizer::default();
        let est = three_assets();
        let high_rf = OptimizationStrategy::MaxSharpe {
            risk_free_rate: 1.0,
        };
        let w = opt.optimize(&high_rf, &est).unwrap();
        let mv = opt.optimize(&OptimizationStrategy::MinVariance, &est).unwrap();
        for (a, b) in w.iter().zip(&mv) {
            assert!((a - b).abs() < 1e-6);
        }
    }

    #[test]
    fn test_risk_parity_inverse_vol() {
        let w = risk_parity(&[vec![0.04, 0.0], vec![0.0, 0.01]]);
        assert!((w[0] - 1.0 / 3.0).abs() < 1e-12);
        assert!((w[1] - 2.0 / 3.0).abs() < 1e-12);
        assert_eq!(risk_parity(&[vec![0.0, 0.0], vec![0.0, 0.01]]), vec![0.5, 0.5]);
    }

    #[test]
    fn test_black_litterman_view_tilts_posterior() {
        let est = three_assets();
        let views = ViewSet {
            pick: vec![vec![0.0, 0.0, 1.0]],
            returns: vec![0.002],
            omega: None,
        };
        let post = black_litterman_posterior(&est, &views, 0.05, None).unwrap();
        assert!(post[2] > est.expected_returns[2]);

        let no_views = ViewSet {
            pick: Vec::new(),
            returns: Vec::new(),
            omega: None,
        };
        let eq = black_litterman_posterior(&est, &no_views, 0.05, Some(2.5)).unwrap();
        assert!((eq[2] - 2.5 * 0.00005 / 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_black_litterman_weights_meet_average_posterior() {
        let est = three_assets();
        let views = ViewSet {
            pick: vec![vec![0.0, 1.0, 0.0]],
            returns: vec![0.003],
            omega: None,
        };
        let post = black_litterman_posterior(&est, &views, 0.05, None).unwrap();
        let floor = post.iter().sum::<f64>() / post.len() as f64;
        let strategy = OptimizationStrategy::BlackLitterman {
            views,
            tau: 0.05,
            risk_aversion: None,
        };
        let opt = PortfolioOptimizer::default();
        let w = opt.optimize(&strategy, &est).unwrap();
        assert_simplex(&w);
        let achieved: f64 = w.iter().zip(&post).map(|(a, b)| a * b).sum();
        assert!(achieved >= floor - 1e-7, "{} < {}", achieved, floor);
    }

    #[test]
    fn test_black_litterman_bad_shapes_error() {
        let views = ViewSet {
            pick: vec![vec![1.0, 0.0]],
            returns: vec![0.001],
            omega: None,
        };
        let strategy = OptimizationStrategy::BlackLitterman {
            views,
            tau: 0.05,
            risk_aversion: None,
        };
        let opt = PortfolioOptimizer::default();
        assert!(opt.optimize(&strategy, &three_assets()).is_err());
    }

    #[test]
    fn test_cvar_avoids_crashing_asset() {
        // Asset 0 has a rare large loss, asset 1 is steady.
        let scenarios: Matrix = (0..100)
            .map(|t| {
                if t % 20 == 0 {
                    vec![-0.10, 0.001]
                } else {
                    vec![0.006, 0.0005]
                }
            })
            .collect();
        let est = MarketEstimates::from_returns(&scenarios, &CovarianceEstimator::Sample).unwrap();
        let opt = PortfolioOptimizer::default();
        let w = opt
            .optimize(&OptimizationStrategy::CvarMin { alpha: 0.05 }, &est)
            .unwrap();
        assert_simplex(&w);
        assert!(w[1] > 0.8, "{:?}", w);
    }

    #[test]
    fn test_missing_solver_gives_equal_weight() {
        let opt = PortfolioOptimizer::new(Capabilities::all().without(Capability::ConvexSolver));
        let w = opt
            .optimize(&OptimizationStrategy::MinVariance, &three_assets())
            .unwrap();
        assert_eq!(w, equal_weight(3));
        let rp = opt
            .optimize(&OptimizationStrategy::RiskParity, &three_assets())
            .unwrap();
        assert!(rp[2] > rp[1]);
    }

    #[test]
    fn test_clip_to_simplex() {
        assert_eq!(clip_to_simplex(&[-1.0, 3.0, 1.0]), vec![0.0, 0.75, 0.25]);
        assert_eq!(clip_to_simplex(&[f64::NAN, -1.0]), vec![0.5, 0.5]);
    }

    #[test]
    fn test_rolling_warmup_and_holding() {
        use chrono::NaiveDate;
        let start = NaiveDate::from_ymd_opt(2022, 1, 3).unwrap();
        let dates: Vec<NaiveDate> = (0..150).map(|i| start + chrono::Duration::days(i)).collect();
        let values: Matrix = (0..150)
            .map(|t| {
                let s = ((t * 7) % 11) as f64 / 11.0 - 0.5;
                vec![0.01 * s, 0.002 * s, -0.004 * s]
            })
            .collect();
        let returns =
            AssetFrame::new(dates, vec!["A".into(), "B".into(), "C".into()], values).unwrap();
        let w = PortfolioOptimizer::default()
            .optimize_rolling(
                &returns,
                &OptimizationStrategy::MinVariance,
                &CovarianceEstimator::Sample,
                &RollingSchedule::default(),
            )
            .unwrap();
        assert_eq!(w.n_rows(), 150);
        assert_eq!(w.row(10), equal_weight(3).as_slice());
        assert_eq!(w.row(63), w.row(64));
        assert!(w.row(63)[1] > w.row(63)[0]);
        for t in 0..150 {
            assert_simplex(w.row(t));
        }
    }
}
