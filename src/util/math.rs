/// Arithmetic mean of a slice. Returns 0.0 for an empty slice.
pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/**
Calculates the population standard deviation of a slice of f64 values.

## Arguments
- `values`: A slice of f64 values.

## Returns
The standard deviation, or `None` if calculation is not possible (fewer than
2 values, or non-finite values present).
 */
pub fn std_deviation(values: &[f64]) -> Option<f64> {
    let n = values.len();
    if n < 2 {
        return None;
    }

    if values.iter().any(|v| !v.is_finite()) {
        return None;
    }

    let mean = values.iter().sum::<f64>() / (n as f64);

    let variance = values
        .iter()
        .map(|value| {
            let diff = mean - value;
            diff * diff
        })
        .sum::<f64>()
        / (n as f64);

    Some(variance.sqrt())
}

/// Order-statistic percentile of an ascending-sorted slice.
///
/// Index is `floor(n * percentile)` clamped to the valid range, so for an
/// even-length slice `percentile(sorted, 0.5)` picks the upper-middle element.
pub fn percentile(sorted: &[f64], pct: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let idx = ((sorted.len() as f64 * pct).floor() as usize).min(sorted.len() - 1);
    sorted[idx]
}
