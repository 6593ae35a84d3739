//! Inference Engine

use crate::baseline::BaselineStats;
use crate::config::LogFailurePolicy;
use crate::drift::{drift_proxy, DriftLevel};
use crate::eventlog::{EventSink, InferenceLogRecord, PREDICT_PATH};
use crate::features::{validate_batch, FeatureVector};
use crate::models::PredictionEngine;
use crate::window::RollingWindow;
use crate::ServeResult;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;
use uuid::Uuid;

/// Shared monitoring state: the rolling window behind one lock.
///
/// Appending a batch, reading the resulting means and computing the drift
/// against them happen under the same guard, so a logged mean and drift
/// always reflect exactly this request's append.
pub struct MonitorState {
    inner: Mutex<Monitor>,
}

struct Monitor {
    window: RollingWindow,
    last_drift: Option<f64>,
}

impl MonitorState {
    /// Fresh, empty window
    pub fn new(n_features: usize, capacity: usize) -> Self {
        Self {
            inner: Mutex::new(Monitor {
                window: RollingWindow::new(n_features, capacity),
                last_drift: None,
            }),
        }
    }

    /// Append `batch`, then return the window means that include it and
    /// their drift from `baseline_means`
    pub fn observe(&self, batch: &[FeatureVector], baseline_means: &[f64]) -> (FeatureVector, f64) {
        let mut monitor = self.inner.lock();
        monitor.window.update(batch);
        let means = monitor.window.mean();
        let drift = drift_proxy(baseline_means, &means);
        monitor.last_drift = Some(drift);
        (means, drift)
    }

    /// Current column means
    pub fn mean(&self) -> FeatureVector {
        self.inner.lock().window.mean()
    }

    /// Drift computed by the most recent observation
    pub fn last_drift(&self) -> Option<f64> {
        self.inner.lock().last_drift
    }

    /// Rows currently buffered
    pub fn len(&self) -> usize {
        self.inner.lock().window.len()
    }

    /// True before the first successful prediction
    pub fn is_empty(&self) -> bool {
        self.inner.lock().window.is_empty()
    }

    /// Copy of the window for inspection
    pub fn snapshot(&self) -> RollingWindow {
        self.inner.lock().window.clone()
    }
}

/// Payload returned for a successful prediction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictResponse {
    /// Class label per input row
    pub predictions: Vec<i64>,
    /// Class distribution per input row
    pub probabilities: Vec<Vec<f64>>,
    /// `trained_at` of the serving model
    pub model_version: String,
}

/// Health payload; reads only immutable state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthResponse {
    /// Always `"ok"` once the engine is loaded
    pub status: String,
    /// Model version identifier
    pub trained_at: String,
    /// Held-out metrics recorded at training time
    pub metrics: BTreeMap<String, f64>,
}

/// Request orchestrator: validate, predict, observe, estimate drift, record.
pub struct InferenceEngine {
    engine: PredictionEngine,
    baseline: Arc<BaselineStats>,
    monitor: MonitorState,
    sink: Arc<dyn EventSink>,
    log_failure_policy: LogFailurePolicy,
    drift_warn_threshold: Option<f64>,
    stats: RwLock<InferenceStats>,
}

impl InferenceEngine {
    /// Assemble an engine from its collaborators
    pub fn new(
        engine: PredictionEngine,
        baseline: Arc<BaselineStats>,
        monitor: MonitorState,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            engine,
            baseline,
            monitor,
            sink,
            log_failure_policy: LogFailurePolicy::default(),
            drift_warn_threshold: None,
            stats: RwLock::new(InferenceStats::default()),
        }
    }

    /// Choose how event log failures affect the response
    pub fn with_log_failure_policy(mut self, policy: LogFailurePolicy) -> Self {
        self.log_failure_policy = policy;
        self
    }

    /// Warn in the service log when a request's drift exceeds `threshold`
    pub fn with_drift_warn_threshold(mut self, threshold: Option<f64>) -> Self {
        self.drift_warn_threshold = threshold;
        self
    }

    /// Serve one prediction request.
    ///
    /// Client errors leave the window and the log untouched. Once prediction
    /// succeeds the window is updated even if the log write later fails.
    pub fn predict(&self, instances: &[FeatureVector]) -> ServeResult<PredictResponse> {
        let start = Instant::now();

        if let Err(e) = validate_batch(instances, self.engine.n_features()) {
            tracing::debug!("Rejected request: {}", e);
            self.stats.write().rejected_requests += 1;
            return Err(e);
        }

        let request_id = Uuid::new_v4();
        match self.run(request_id, start, instances) {
            Ok(response) => {
                let mut stats = self.stats.write();
                stats.total_requests += 1;
                stats.total_instances += instances.len() as u64;
                stats.total_latency_us += start.elapsed().as_micros() as u64;
                Ok(response)
            }
            Err(e) => {
                tracing::error!(%request_id, "Prediction failed: {}", e);
                self.stats.write().failed_requests += 1;
                Err(e)
            }
        }
    }

    fn run(
        &self,
        request_id: Uuid,
        start: Instant,
        instances: &[FeatureVector],
    ) -> ServeResult<PredictResponse> {
        let batch = self.engine.predict(instances)?;

        let (rolling_means, drift) = self
            .monitor
            .observe(instances, &self.baseline.feature_means);

        if DriftLevel::classify(drift, self.drift_warn_threshold) == DriftLevel::Elevated {
            tracing::warn!(%request_id, drift, "Feature drift above threshold");
        }

        let record = InferenceLogRecord {
            ts: chrono::Utc::now().timestamp_micros() as f64 / 1e6,
            request_id,
            path: PREDICT_PATH.into(),
            latency_ms: start.elapsed().as_millis() as u64,
            n: instances.len(),
            rolling_means,
            drift_proxy: drift,
            pred_counts: batch.pred_counts(),
        };

        if let Err(e) = self.sink.append(&record) {
            self.stats.write().log_failures += 1;
            match self.log_failure_policy {
                LogFailurePolicy::Abort => return Err(e),
                LogFailurePolicy::Degrade => {
                    tracing::error!(%request_id, "Inference log write failed, serving anyway: {}", e);
                }
            }
        }

        tracing::debug!(%request_id, n = record.n, drift, "Prediction served");

        Ok(PredictResponse {
            predictions: batch.predictions,
            probabilities: batch.probabilities,
            model_version: self.engine.model_version().to_string(),
        })
    }

    /// Model identity and training metrics
    pub fn health(&self) -> HealthResponse {
        HealthResponse {
            status: "ok".into(),
            trained_at: self.baseline.trained_at.clone(),
            metrics: self.baseline.metrics.clone(),
        }
    }

    /// Counters plus the current window size
    pub fn stats(&self) -> InferenceStats {
        let mut stats = self.stats.read().clone();
        stats.window_len = self.monitor.len();
        stats.last_drift = self.monitor.last_drift();
        stats
    }

    /// Shared monitoring state
    pub fn monitor(&self) -> &MonitorState {
        &self.monitor
    }

    /// Training-time statistics
    pub fn baseline(&self) -> &BaselineStats {
        &self.baseline
    }
}

/// Inference statistics
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InferenceStats {
    /// Requests answered successfully
    pub total_requests: u64,
    /// Rows across successful requests
    pub total_instances: u64,
    /// Requests refused as client errors
    pub rejected_requests: u64,
    /// Requests that failed inside the service
    pub failed_requests: u64,
    /// Event log writes that failed, under either policy
    pub log_failures: u64,
    /// Summed latency of successful requests
    pub total_latency_us: u64,
    /// Rows currently in the rolling window
    pub window_len: usize,
    /// Drift from the most recent observation
    pub last_drift: Option<f64>,
}

impl InferenceStats {
    /// Average latency in microseconds
    pub fn avg_latency_us(&self) -> f64 {
        if self.total_requests == 0 {
            0.0
        } else {
            self.total_latency_us as f64 / self.total_requests as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::eventlog::MemorySink;
    use crate::models::{tests::iris_engine, Classifier};
    use crate::{ServeError, ServeResult};
    use ndarray::Array2;

    const SETOSA: [f64; 4] = [5.1, 3.5, 1.4, 0.2];

    fn baseline() -> Arc<BaselineStats> {
        Arc::new(BaselineStats {
            trained_at: "2025-01-01T00:00:00Z".into(),
            feature_means: SETOSA.to_vec(),
            feature_stds: vec![0.8, 0.4, 1.7, 0.7],
            metrics: BTreeMap::from([("accuracy".to_string(), 0.97)]),
        })
    }

    fn engine_with(sink: Arc<dyn EventSink>, window: usize) -> InferenceEngine {
        InferenceEngine::new(iris_engine(), baseline(), MonitorState::new(4, window), sink)
    }

    struct FailingSink;

    impl EventSink for FailingSink {
        fn append(&self, _record: &InferenceLogRecord) -> ServeResult<()> {
            Err(ServeError::LogWrite("disk full".into()))
        }
    }

    struct BrokenModel;

    impl Classifier for BrokenModel {
        fn n_features(&self) -> usize {
            4
        }

        fn n_classes(&self) -> usize {
            3
        }

        fn predict_classes(&self, _x: &Array2<f64>) -> ServeResult<Vec<i64>> {
            Err(ServeError::Model("unexpected shape".into()))
        }

        fn predict_probabilities(&self, _x: &Array2<f64>) -> ServeResult<Vec<Vec<f64>>> {
            Err(ServeError::Model("unexpected shape".into()))
        }
    }

    #[test]
    fn test_baseline_request_has_zero_drift() {
        let sink = Arc::new(MemorySink::new());
        let engine = engine_with(sink.clone(), 500);

        let response = engine.predict(&[SETOSA.to_vec()]).unwrap();
        assert_eq!(response.predictions, vec![0]);
        assert_eq!(response.model_version, "2025-01-01T00:00:00Z");
        assert_eq!(engine.monitor().len(), 1);

        let records = sink.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].n, 1);
        assert_eq!(records[0].path, "/predict");
        assert!(records[0].drift_proxy.abs() < 1e-9);
        assert_eq!(records[0].rolling_means, SETOSA.to_vec());
        assert_eq!(records[0].pred_counts, BTreeMap::from([(0, 1)]));
    }

    #[test]
    fn test_response_aligned_with_input() {
        let engine = engine_with(Arc::new(MemorySink::new()), 500);
        let batch = vec![
            vec![6.7, 3.0, 5.2, 2.3],
            SETOSA.to_vec(),
            vec![5.9, 3.0, 4.2, 1.5],
        ];
        let response = engine.predict(&batch).unwrap();
        assert_eq!(response.predictions, vec![2, 0, 1]);
        assert_eq!(response.probabilities.len(), 3);
        for row in &response.probabilities {
            assert!((row.iter().sum::<f64>() - 1.0).abs() < 1e-6);
        }
    }

    #[test]
    fn test_pred_counts_cover_batch_classes_only() {
        let sink = Arc::new(MemorySink::new());
        let engine = engine_with(sink.clone(), 500);
        engine
            .predict(&[SETOSA.to_vec(), SETOSA.to_vec(), vec![6.7, 3.0, 5.2, 2.3]])
            .unwrap();
        assert_eq!(sink.records()[0].pred_counts, BTreeMap::from([(0, 2), (2, 1)]));
    }

    #[test]
    fn test_empty_batch_mutates_nothing() {
        let sink = Arc::new(MemorySink::new());
        let engine = engine_with(sink.clone(), 500);

        let err = engine.predict(&[]).unwrap_err();
        assert!(err.is_client());
        assert!(engine.monitor().is_empty());
        assert!(sink.is_empty());
        assert_eq!(engine.stats().rejected_requests, 1);
    }

    #[test]
    fn test_wrong_arity_is_client_error() {
        let sink = Arc::new(MemorySink::new());
        let engine = engine_with(sink.clone(), 500);

        let err = engine.predict(&[vec![5.1, 3.5, 1.4]]).unwrap_err();
        assert!(matches!(err, ServeError::Arity { expected: 4, got: 3, .. }));
        assert!(engine.monitor().is_empty());
        assert!(sink.is_empty());
    }

    #[test]
    fn test_model_failure_skips_window() {
        let sink = Arc::new(MemorySink::new());
        let engine = InferenceEngine::new(
            PredictionEngine::new(Arc::new(BrokenModel), "v0"),
            baseline(),
            MonitorState::new(4, 500),
            sink.clone(),
        );

        let err = engine.predict(&[SETOSA.to_vec()]).unwrap_err();
        assert!(!err.is_client());
        assert_eq!(err.to_string(), "model error: unexpected shape");
        assert!(engine.monitor().is_empty());
        assert!(sink.is_empty());
        assert_eq!(engine.stats().failed_requests, 1);
    }

    #[test]
    fn test_log_failure_aborts_by_default() {
        let engine = engine_with(Arc::new(FailingSink), 500);

        let err = engine.predict(&[SETOSA.to_vec()]).unwrap_err();
        assert!(matches!(err, ServeError::LogWrite(_)));
        // observation is not rolled back
        assert_eq!(engine.monitor().len(), 1);
        let stats = engine.stats();
        assert_eq!(stats.log_failures, 1);
        assert_eq!(stats.failed_requests, 1);
        assert_eq!(stats.total_requests, 0);
    }

    #[test]
    fn test_log_failure_degrade_still_serves() {
        let engine = engine_with(Arc::new(FailingSink), 500)
            .with_log_failure_policy(LogFailurePolicy::Degrade);

        let response = engine.predict(&[SETOSA.to_vec()]).unwrap();
        assert_eq!(response.predictions, vec![0]);
        let stats = engine.stats();
        assert_eq!(stats.log_failures, 1);
        assert_eq!(stats.total_requests, 1);
    }

    #[test]
    fn test_window_keeps_latest_after_overflow() {
        let w = 20;
        let engine = engine_with(Arc::new(MemorySink::new()), w);

        for i in 0..(w + 10) {
            engine.predict(&[vec![i as f64, 3.0, 1.5, 0.2]]).unwrap();
        }

        let window = engine.monitor().snapshot();
        assert_eq!(window.len(), w);
        let first: Vec<f64> = window.iter().map(|r| r[0]).collect();
        let expected: Vec<f64> = (10..(w + 10)).map(|i| i as f64).collect();
        assert_eq!(first, expected);

        let expected_mean = expected.iter().sum::<f64>() / w as f64;
        assert!((engine.monitor().mean()[0] - expected_mean).abs() < 1e-9);
    }

    #[test]
    fn test_concurrent_requests_lose_nothing() {
        let sink = Arc::new(MemorySink::new());
        let engine = Arc::new(engine_with(sink.clone(), 500));
        let k = 64;

        let handles: Vec<_> = (0..k)
            .map(|i| {
                let engine = Arc::clone(&engine);
                std::thread::spawn(move || {
                    engine.predict(&[vec![4.0 + i as f64 * 0.01, 3.0, 1.5, 0.2]]).unwrap();
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(engine.monitor().len(), k);
        assert_eq!(sink.len(), k);
        assert_eq!(engine.stats().total_instances, k as u64);

        // each logged drift was computed from the logged means
        for record in sink.records() {
            let drift = drift_proxy(&SETOSA, &record.rolling_means);
            assert!((drift - record.drift_proxy).abs() < 1e-12);
        }

        // the newest drift belongs to the final window
        let final_drift = drift_proxy(&SETOSA, &engine.monitor().mean());
        assert_eq!(engine.stats().last_drift, Some(final_drift));
    }

    #[test]
    fn test_concurrent_requests_respect_capacity() {
        let engine = Arc::new(engine_with(Arc::new(MemorySink::new()), 16));

        let handles: Vec<_> = (0..40)
            .map(|i| {
                let engine = Arc::clone(&engine);
                std::thread::spawn(move || {
                    engine.predict(&[vec![5.0, 3.0 + i as f64 * 0.01, 1.5, 0.2]]).unwrap();
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(engine.monitor().len(), 16);
    }

    #[test]
    fn test_observe_returns_means_and_drift_together() {
        let monitor = MonitorState::new(4, 2);
        assert_eq!(monitor.last_drift(), None);

        let (means, drift) = monitor.observe(&[SETOSA.to_vec()], &SETOSA);
        assert_eq!(means, SETOSA.to_vec());
        assert_eq!(drift, 0.0);

        let doubled: Vec<f64> = SETOSA.iter().map(|v| v * 2.0).collect();
        let (means, drift) = monitor.observe(&[doubled.clone(), doubled], &SETOSA);
        assert_eq!(means, SETOSA.iter().map(|v| v * 2.0).collect::<Vec<_>>());
        assert!((drift - 1.0).abs() < 1e-4);
        assert_eq!(monitor.last_drift(), Some(drift));
    }

    #[test]
    fn test_health_is_read_only() {
        let sink = Arc::new(MemorySink::new());
        let engine = engine_with(sink.clone(), 500);

        let health = engine.health();
        assert_eq!(health.status, "ok");
        assert_eq!(health.trained_at, "2025-01-01T00:00:00Z");
        assert_eq!(health.metrics["accuracy"], 0.97);
        assert!(engine.monitor().is_empty());
        assert!(sink.is_empty());
    }

    #[test]
    fn test_stats_track_drift() {
        let engine = engine_with(Arc::new(MemorySink::new()), 500);
        assert_eq!(engine.stats().last_drift, None);

        engine.predict(&[vec![10.2, 7.0, 2.8, 0.4]]).unwrap();
        let stats = engine.stats();
        assert_eq!(stats.window_len, 1);
        // every feature doubled
        assert!((stats.last_drift.unwrap() - 1.0).abs() < 1e-4);
    }
}
