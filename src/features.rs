//! Feature Vectors

use crate::{ServeError, ServeResult};

/// One observation, ordered as in [`FEATURE_NAMES`]
pub type FeatureVector = Vec<f64>;

/// Input features the served model was trained on, in column order
pub const FEATURE_NAMES: [&str; 4] = ["sepal_length", "sepal_width", "petal_length", "petal_width"];

/// Model input arity
pub const N_FEATURES: usize = FEATURE_NAMES.len();

/// Check a request batch before it touches the model or the monitor.
///
/// Rejects an empty batch and any row whose length differs from `n`.
/// Reports the first offending row so the caller can fix the request.
pub fn validate_batch(instances: &[FeatureVector], n: usize) -> ServeResult<()> {
    if instances.is_empty() {
        return Err(ServeError::EmptyBatch);
    }

    for (index, row) in instances.iter().enumerate() {
        if row.len() != n {
            return Err(ServeError::Arity {
                index,
                expected: n,
                got: row.len(),
            });
        }
        if row.iter().any(|v| !v.is_finite()) {
            return Err(ServeError::NonFinite { index });
        }
    }

    Ok(())
}
