//! Iris Serving Engine
//!
//! Serves predictions from a previously trained classifier and keeps a cheap
//! drift signal over the most recent inputs.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         IRIS SERVING ENGINE                             │
//! │                                                                         │
//! │  ┌──────────────┐  ┌──────────────┐  ┌──────────────┐                   │
//! │  │   Request    │  │  Prediction  │  │   Baseline   │                   │
//! │  │  Validation  │─▶│    Engine    │  │  Statistics  │                   │
//! │  │  (arity)     │  │  (softmax)   │  │ (read-only)  │                   │
//! │  └──────────────┘  └──────┬───────┘  └──────┬───────┘                   │
//! │                           │                 │                           │
//! │  ┌────────────────────────▼─────────────────▼────────────────────────┐  │
//! │  │                    MONITOR (critical section)                     │  │
//! │  │         Rolling Window append | column means | drift proxy        │  │
//! │  └────────────────────────────────┬──────────────────────────────────┘  │
//! │                                   │                                     │
//! │  ┌────────────────────────────────▼──────────────────────────────────┐  │
//! │  │                         EVENT LOG SINK                            │  │
//! │  │                 one JSON line per request (append)                │  │
//! │  └───────────────────────────────────────────────────────────────────┘  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

#![warn(missing_docs)]

pub mod api;
pub mod baseline;
pub mod config;
pub mod drift;
pub mod eventlog;
pub mod features;
pub mod inference;
pub mod models;
pub mod window;

use std::path::Path;
use std::sync::Arc;
use thiserror::Error;

pub use baseline::BaselineStats;
pub use config::{LogFailurePolicy, ServeConfig};
pub use drift::{drift_proxy, DriftLevel, DRIFT_EPSILON};
pub use eventlog::{EventSink, InferenceLogRecord, JsonlSink, MemorySink};
pub use features::{FeatureVector, FEATURE_NAMES, N_FEATURES};
pub use inference::{HealthResponse, InferenceEngine, InferenceStats, MonitorState, PredictResponse};
pub use models::{Classifier, LogisticModel, PredictionBatch, PredictionEngine};
pub use window::RollingWindow;

/// Whether a failure is the caller's fault or the service's.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Bad request, fixable by the caller
    Client,
    /// Fault inside the service
    Server,
}

/// Serving error types
#[derive(Debug, Error)]
pub enum ServeError {
    /// Request carried no instances
    #[error("Empty instances")]
    EmptyBatch,
    /// Instance with the wrong number of features
    #[error("instance {index} has {got} features, expected {expected}")]
    Arity {
        /// Position in the batch
        index: usize,
        /// Features the model takes
        expected: usize,
        /// Features supplied
        got: usize,
    },
    /// Instance containing NaN or an infinity
    #[error("instance {index} contains a non-finite value")]
    NonFinite {
        /// Position in the batch
        index: usize,
    },
    /// Classifier failed or produced unusable output
    #[error("model error: {0}")]
    Model(String),
    /// Event could not be persisted
    #[error("log write error: {0}")]
    LogWrite(String),
    /// Model or baseline artifact missing or inconsistent
    #[error("artifact error: {0}")]
    Artifact(String),
    /// Invalid service configuration
    #[error("config error: {0}")]
    Config(String),
}

impl ServeError {
    /// Classify the error for the transport boundary
    pub fn kind(&self) -> ErrorKind {
        match self {
            ServeError::EmptyBatch | ServeError::Arity { .. } | ServeError::NonFinite { .. } => {
                ErrorKind::Client
            }
            ServeError::Model(_)
            | ServeError::LogWrite(_)
            | ServeError::Artifact(_)
            | ServeError::Config(_) => ErrorKind::Server,
        }
    }

    /// True for errors the caller can fix
    pub fn is_client(&self) -> bool {
        self.kind() == ErrorKind::Client
    }
}

/// Result alias used throughout the crate
pub type ServeResult<T> = Result<T, ServeError>;

/// Load artifacts named by `config` and assemble a ready engine.
///
/// The model and baseline are read once; the rolling window starts empty and
/// the log destination is created lazily on the first request.
pub fn load_engine(config: &ServeConfig) -> ServeResult<InferenceEngine> {
    config.validate()?;

    let artifacts = Path::new(&config.artifacts_dir);
    tracing::info!("Loading artifacts from {}", artifacts.display());

    let baseline = BaselineStats::load(artifacts.join(&config.stats_file), config.n_features)?;
    baseline.validate(config.n_features)?;

    let model = LogisticModel::load(artifacts.join(&config.model_file))?;
    if model.n_features() != config.n_features {
        return Err(ServeError::Artifact(format!(
            "model expects {} features, config declares {}",
            model.n_features(),
            config.n_features
        )));
    }

    tracing::info!(
        trained_at = %baseline.trained_at,
        classes = model.n_classes(),
        "Model loaded"
    );

    let engine = PredictionEngine::new(Arc::new(model), baseline.trained_at.clone());
    let monitor = MonitorState::new(config.n_features, config.window_size);
    let sink: Arc<dyn EventSink> = Arc::new(JsonlSink::new(&config.log_path));

    Ok(InferenceEngine::new(engine, Arc::new(baseline), monitor, sink)
        .with_log_failure_policy(config.log_failure_policy)
        .with_drift_warn_threshold(config.drift_warn_threshold))
}
