//! Training-time baseline statistics

use crate::{ServeError, ServeResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// Reference point for drift, recorded by the training job.
///
/// Loaded once at startup and shared read-only by every request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BaselineStats {
    /// Training timestamp, doubles as the model version identifier
    pub trained_at: String,
    /// Per-feature mean over the training split
    pub feature_means: Vec<f64>,
    /// Per-feature standard deviation over the training split
    pub feature_stds: Vec<f64>,
    /// Held-out evaluation metrics (accuracy, f1_macro, ...)
    pub metrics: BTreeMap<String, f64>,
}

/// On-disk shape; every field may be missing
#[derive(Deserialize)]
struct RawStats {
    trained_at: Option<String>,
    feature_means: Option<Vec<f64>>,
    #[serde(default)]
    feature_stds: Vec<f64>,
    #[serde(default)]
    metrics: BTreeMap<String, f64>,
}

impl BaselineStats {
    /// Version used when the record carries no timestamp
    pub const UNKNOWN_VERSION: &'static str = "unknown";

    /// Parse a stats record. Missing means default to zeros of arity `n`.
    pub fn from_json(json: &str, n: usize) -> ServeResult<Self> {
        let raw: RawStats = serde_json::from_str(json)
            .map_err(|e| ServeError::Artifact(format!("training stats: {e}")))?;

        Ok(Self {
            trained_at: raw
                .trained_at
                .unwrap_or_else(|| Self::UNKNOWN_VERSION.to_string()),
            feature_means: raw.feature_means.unwrap_or_else(|| vec![0.0; n]),
            feature_stds: raw.feature_stds,
            metrics: raw.metrics,
        })
    }

    /// Load from a JSON file
    pub fn load(path: impl AsRef<Path>, n: usize) -> ServeResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| ServeError::Artifact(format!("{}: {e}", path.display())))?;
        Self::from_json(&content, n)
    }

    /// Check that the recorded statistics match the model arity
    pub fn validate(&self, n: usize) -> ServeResult<()> {
        if self.feature_means.len() != n {
            return Err(ServeError::Artifact(format!(
                "feature_means has {} entries, expected {n}",
                self.feature_means.len()
            )));
        }
        if !self.feature_stds.is_empty() && self.feature_stds.len() != n {
            return Err(ServeError::Artifact(format!(
                "feature_stds has {} entries, expected {n}",
                self.feature_stds.len()
            )));
        }
        Ok(())
    }
}
