//! Statistical utility functions shared across modules

use statrs::function::gamma;

/// Natural log of the gamma function.
/// BASiCS equivalent: lgamma_cpp() in utils.h
pub fn ln_gamma(x: f64) -> f64 {
    gamma::ln_gamma(x)
}

/// Empirical quantile of unsorted data, linear interpolation between order
/// statistics (R's default type 7).
///
/// `prob` is clamped to [0, 1]. Returns NaN for empty input.
pub fn quantile(values: &[f64], prob: f64) -> f64 {
    if values.is_empty() {
        return f64::NAN;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    quantile_sorted(&sorted, prob)
}

/// Type-7 quantile of already-sorted data.
pub(crate) fn quantile_sorted(sorted: &[f64], prob: f64) -> f64 {
    let n = sorted.len();
    if n == 1 {
        return sorted[0];
    }
    let prob = prob.clamp(0.0, 1.0);
    let position = prob * (n - 1) as f64;
    let low = position.floor() as usize;
    let frac = position - low as f64;
    if low + 1 >= n {
        return sorted[n - 1];
    }
    (1.0 - frac) * sorted[low] + frac * sorted[low + 1]
}
