//! Descriptive statistics shared by the factor, backtest and risk code.
//!
//! Functions ignore nothing implicitly: callers filter NaN values before
//! calling unless a function says otherwise.

/// Arithmetic mean (0 for an empty slice).
pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Sample variance with `ddof` degrees of freedom removed.
pub fn variance(values: &[f64], ddof: usize) -> f64 {
    if values.len() <= ddof {
        return 0.0;
    }
    let m = mean(values);
    values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / (values.len() - ddof) as f64
}

/// Sample standard deviation (ddof = 1).
pub fn std_dev(values: &[f64]) -> f64 {
    variance(values, 1).sqrt()
}

/// Population standard deviation (ddof = 0).
pub fn population_std(values: &[f64]) -> f64 {
    variance(values, 0).sqrt()
}

/// Median of the finite values, if any.
pub fn median(values: &[f64]) -> Option<f64> {
    let mut finite: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();
    if finite.is_empty() {
        return None;
    }
    finite.sort_by(|a, b| a.total_cmp(b));
    let n = finite.len();
    Some(if n % 2 == 1 {
        finite[n / 2]
    } else {
        (finite[n / 2 - 1] + finite[n / 2]) / 2.0
    })
}

/// Percentile with linear interpolation between order statistics, `q` in [0, 100].
pub fn percentile(values: &[f64], q: f64) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    percentile_sorted(&sorted, q)
}

/// Percentile of an already sorted slice.
pub fn percentile_sorted(sorted: &[f64], q: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let rank = (q.clamp(0.0, 100.0) / 100.0) * (sorted.len() - 1) as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    let frac = rank - lo as f64;
    sorted[lo] + (sorted[hi] - sorted[lo]) * frac
}

/// Bias-corrected sample skewness (0 when undefined).
pub fn skewness(values: &[f64]) -> f64 {
    let n = values.len() as f64;
    if values.len() < 3 {
        return 0.0;
    }
    let m = mean(values);
    let m2 = values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / n;
    if m2 <= 0.0 {
        return 0.0;
    }
    let m3 = values.iter().map(|v| (v - m).powi(3)).sum::<f64>() / n;
    let g1 = m3 / m2.powf(1.5);
    let adj = (n * (n - 1.0)).sqrt() / (n - 2.0);
    let s = adj * g1;
    if s.is_finite() {
        s
    } else {
        0.0
    }
}

/// Bias-corrected excess kurtosis (0 when undefined).
pub fn excess_kurtosis(values: &[f64]) -> f64 {
    let n = values.len() as f64;
    if values.len() < 4 {
        return 0.0;
    }
    let m = mean(values);
    let m2 = values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / n;
    if m2 <= 0.0 {
        return 0.0;
    }
    let m4 = values.iter().map(|v| (v - m).powi(4)).sum::<f64>() / n;
    let g2 = m4 / (m2 * m2) - 3.0;
    let k = ((n + 1.0) * g2 + 6.0) * (n - 1.0) / ((n - 2.0) * (n - 3.0));
    if k.is_finite() {
        k
    } else {
        0.0
    }
}

/// Rolling sample standard deviation. Positions with fewer than `window`
/// finite observations in the window are NaN.
pub fn rolling_std(values: &[f64], window: usize) -> Vec<f64> {
    rolling(values, window, window, std_dev)
}

/// Rolling mean with a minimum observation count.
pub fn rolling_mean(values: &[f64], window: usize, min_periods: usize) -> Vec<f64> {
    rolling(values, window, min_periods, mean)
}

/// Apply `f` over a trailing window of finite values.
pub fn rolling(
    values: &[f64],
    window: usize,
    min_periods: usize,
    f: impl Fn(&[f64]) -> f64,
) -> Vec<f64> {
    let window = window.max(1);
    let mut buf = Vec::with_capacity(window);
    (0..values.len())
        .map(|i| {
            let start = (i + 1).saturating_sub(window);
            buf.clear();
            buf.extend(values[start..=i].iter().copied().filter(|v| v.is_finite()));
            if buf.len() < min_periods.max(1) {
                f64::NAN
            } else {
                f(&buf)
            }
        })
        .collect()
}

/// Cross-sectional percentile rank in (0, 1], averaging ties. NaN inputs
/// stay NaN and are excluded from the ranking.
pub fn pct_rank(values: &[f64]) -> Vec<f64> {
    let mut idx: Vec<usize> = (0..values.len()).filter(|&i| values[i].is_finite()).collect();
    let n = idx.len();
    let mut out = vec![f64::NAN; values.len()];
    if n == 0 {
        return out;
    }
    idx.sort_by(|&a, &b| values[a].total_cmp(&values[b]));

    let mut i = 0;
    while i < n {
        let mut j = i;
        while j + 1 < n && values[idx[j + 1]] == values[idx[i]] {
            j += 1;
        }
        // Average 1-based rank of the tie group.
        let rank = (i + j + 2) as f64 / 2.0;
        for &k in &idx[i..=j] {
            out[k] = rank / n as f64;
        }
        i = j + 1;
    }
    out
}

/// Running peak-to-trough drawdown of a value series (always <= 0).
pub fn drawdown_series(values: &[f64]) -> Vec<f64> {
    let mut peak = f64::NEG_INFINITY;
    values
        .iter()
        .map(|&v| {
            if v > peak {
                peak = v;
            }
            if peak > 0.0 && peak.is_finite() {
                (v - peak) / peak
            } else {
                0.0
            }
        })
        .collect()
}

/// Largest peak-to-trough decline (<= 0).
pub fn max_drawdown(values: &[f64]) -> f64 {
    drawdown_series(values)
        .into_iter()
        .fold(0.0, f64::min)
}

/// Annualized Sharpe ratio of periodic returns against a per-period risk-free
/// rate. Zero when volatility vanishes.
pub fn sharpe_ratio(returns: &[f64], rf_per_period: f64, periods_per_year: f64) -> f64 {
    if returns.len() < 2 {
        return 0.0;
    }
    let excess: Vec<f64> = returns.iter().map(|r| r - rf_per_period).collect();
    let sd = std_dev(&excess);
    if sd > 1e-12 {
        mean(&excess) / sd * periods_per_year.sqrt()
    } else {
        0.0
    }
}

/// Replace NaN/inf by a fallback.
pub fn finite_or(value: f64, fallback: f64) -> f64 {
    if value.is_finite() {
        value
    } else {
        fallback
    }
}
