//! Coefficient of determination and its degrees-of-freedom corrected variant.

use crate::regression::Sample;

/// Computes `R² = 1 - SS_res / SS_tot` of `predict` against the observed samples.
///
/// Returns `None` for the degenerate cases where R² is undefined: an empty
/// sample set, or a zero total sum of squares (every `y` identical).
pub fn r_squared(samples: &[Sample], predict: impl Fn(f64) -> f64) -> Option<f64> {
    if samples.is_empty() {
        return None;
    }

    let n = samples.len() as f64;
    let y_mean = samples.iter().map(|s| s.y).sum::<f64>() / n;

    let mut ss_total = 0.0;
    let mut ss_res = 0.0;
    for sample in samples {
        let y_pred = predict(sample.x);
        ss_total += (sample.y - y_mean).powi(2);
        ss_res += (sample.y - y_pred).powi(2);
    }

    if ss_total == 0.0 {
        return None;
    }
    Some(1.0 - ss_res / ss_total)
}

/// `1 - (1 - r2)(n - 1)/(n - p)` for `n` samples and `p` fitted parameters.
///
/// `None` when `n <= p`: there are no residual degrees of freedom left.
pub fn adjusted_r_squared(r2: f64, n: usize, p: usize) -> Option<f64> {
    if n <= p {
        return None;
    }
    let n = n as f64;
    let p = p as f64;
    Some(1.0 - (1.0 - r2) * (n - 1.0) / (n - p))
}
