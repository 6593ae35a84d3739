//! Server Configuration

use crate::{ServeError, ServeResult};
use serde::{Deserialize, Serialize};

/// What to do when the event log cannot be written
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFailurePolicy {
    /// Fail the request with a server error
    #[default]
    Abort,
    /// Return the prediction anyway and report the failure through tracing
    Degrade,
}

/// Serving configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServeConfig {
    /// Listen address
    pub bind_addr: String,
    /// Directory holding the model and training stats
    pub artifacts_dir: String,
    /// Model artifact file name inside `artifacts_dir`
    pub model_file: String,
    /// Training stats file name inside `artifacts_dir`
    pub stats_file: String,
    /// JSON-lines inference log
    pub log_path: String,
    /// Rolling window capacity
    pub window_size: usize,
    /// Model input arity
    pub n_features: usize,
    /// Drift proxy above which a warning is logged
    pub drift_warn_threshold: Option<f64>,
    /// Behaviour on event log write failure
    pub log_failure_policy: LogFailurePolicy,
}

impl Default for ServeConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:8000".into(),
            artifacts_dir: "artifacts".into(),
            model_file: "model.json".into(),
            stats_file: "training_stats.json".into(),
            log_path: "logs/inference.jsonl".into(),
            window_size: crate::window::DEFAULT_WINDOW,
            n_features: crate::features::N_FEATURES,
            drift_warn_threshold: Some(0.25),
            log_failure_policy: LogFailurePolicy::Abort,
        }
    }
}

impl ServeConfig {
    /// Load from file
    pub fn load(path: &str) -> Result<Self, std::io::Error> {
        let content = std::fs::read_to_string(path)?;
        serde_json::from_str(&content)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
    }

    /// Load from file, or fall back to defaults when the file does not exist.
    ///
    /// Unreadable or malformed files are errors.
    pub fn load_or_default(path: &str) -> Result<Self, std::io::Error> {
        match Self::load(path) {
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!("Config not found at {}, using defaults", path);
                Ok(Self::default())
            }
            other => other,
        }
    }

    /// Apply `IRIS_*` environment overrides
    pub fn with_env_overrides(self) -> ServeResult<Self> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    fn apply_overrides(mut self, var: impl Fn(&str) -> Option<String>) -> ServeResult<Self> {
        if let Some(v) = var("IRIS_BIND_ADDR") {
            self.bind_addr = v;
        }
        if let Some(v) = var("IRIS_ARTIFACTS_DIR") {
            self.artifacts_dir = v;
        }
        if let Some(v) = var("IRIS_LOG_PATH") {
            self.log_path = v;
        }
        if let Some(v) = var("IRIS_WINDOW_SIZE") {
            self.window_size = v
                .parse()
                .map_err(|_| ServeError::Config(format!("IRIS_WINDOW_SIZE: not a number: {v}")))?;
        }
        Ok(self)
    }

    /// Reject settings the engine cannot run with
    pub fn validate(&self) -> ServeResult<()> {
        if self.window_size == 0 {
            return Err(ServeError::Config("window_size must be at least 1".into()));
        }
        if self.n_features == 0 {
            return Err(ServeError::Config("n_features must be at least 1".into()));
        }
        if let Some(t) = self.drift_warn_threshold {
            if !t.is_finite() || t < 0.0 {
                return Err(ServeError::Config(format!("drift_warn_threshold invalid: {t}")));
            }
        }
        Ok(())
    }
}
