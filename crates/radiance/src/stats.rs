//! Small descriptive statistics used by the scorer and the ranker.

/// Arithmetic mean. Returns `None` for an empty slice.
pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<f64>() / values.len() as f64)
}

/// Population standard deviation (divides by `n`, not `n - 1`).
pub fn population_std_dev(values: &[f64]) -> Option<f64> {
    let mu = mean(values)?;
    let variance = values.iter().map(|v| (v - mu).powi(2)).sum::<f64>() / values.len() as f64;
    Some(variance.sqrt())
}

/// True when a deviation is zero up to floating-point noise.
///
/// A constant series like `[0.1; 10]` can produce a σ of ~1e-17 after
/// summation; that must still count as a flat series.
pub fn is_degenerate(std_dev: f64, mean: f64) -> bool {
    std_dev <= f64::EPSILON * mean.abs().max(1.0) * 16.0
}

/// z-score of `value` against `mean` and `std_dev`; 0 for a degenerate series.
pub fn z_score(value: f64, mean: f64, std_dev: f64) -> f64 {
    if is_degenerate(std_dev, mean) {
        return 0.0;
    }
    (value - mean) / std_dev
}
