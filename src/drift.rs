//! Drift proxy against training-time feature means
//!
//! Average relative shift of the live column means from the baseline means.
//! Unitless, zero when the means coincide, unbounded above.

/// Guards the ratio when a baseline mean is exactly zero
pub const DRIFT_EPSILON: f64 = 1e-6;

/// Mean over features of `|current - baseline| / (|baseline| + eps)`
pub fn drift_proxy(baseline_means: &[f64], current_means: &[f64]) -> f64 {
    debug_assert_eq!(
        baseline_means.len(),
        current_means.len(),
        "baseline and current means must have the same arity"
    );

    let n = baseline_means.len().min(current_means.len());
    if n == 0 {
        return 0.0;
    }

    // Saturates at f64::MAX so the value always serializes as a number
    let mean: f64 = baseline_means
        .iter()
        .zip(current_means)
        .map(|(b, c)| ((c - b).abs() / (b.abs() + DRIFT_EPSILON)).min(f64::MAX) / n as f64)
        .sum();

    mean.min(f64::MAX)
}

/// Coarse reading of a drift proxy value for log output
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriftLevel {
    /// At or below the warning threshold
    Nominal,
    /// Above the warning threshold
    Elevated,
}

impl DriftLevel {
    /// Classify `value`; without a threshold everything is nominal
    pub fn classify(value: f64, warn_threshold: Option<f64>) -> Self {
        match warn_threshold {
            Some(t) if value > t => DriftLevel::Elevated,
            _ => DriftLevel::Nominal,
        }
    }
}
