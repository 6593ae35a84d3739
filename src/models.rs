//! Classifier models and the prediction engine

use crate::features::FeatureVector;
use crate::{ServeError, ServeResult};
use ndarray::{Array1, Array2, Axis};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

/// A loaded, immutable classifier.
///
/// Both operations take the same batch and must return one entry per row,
/// in row order.
pub trait Classifier: Send + Sync {
    /// Expected columns per row
    fn n_features(&self) -> usize;

    /// Number of output classes
    fn n_classes(&self) -> usize;

    /// Predicted class label per row
    fn predict_classes(&self, x: &Array2<f64>) -> ServeResult<Vec<i64>>;

    /// Class probability distribution per row
    fn predict_probabilities(&self, x: &Array2<f64>) -> ServeResult<Vec<Vec<f64>>>;
}

/// On-disk layout of a logistic regression artifact
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogisticArtifact {
    /// Class labels, in coefficient row order
    pub classes: Vec<i64>,
    /// One row per class (or a single row for a binary model)
    pub coefficients: Vec<Vec<f64>>,
    /// One intercept per coefficient row
    pub intercepts: Vec<f64>,
}

/// Multinomial logistic regression (softmax over linear scores)
#[derive(Debug, Clone)]
pub struct LogisticModel {
    classes: Vec<i64>,
    coefficients: Array2<f64>,
    intercepts: Array1<f64>,
}

impl LogisticModel {
    /// Build from raw weights, checking shapes
    pub fn new(
        classes: Vec<i64>,
        coefficients: Array2<f64>,
        intercepts: Array1<f64>,
    ) -> ServeResult<Self> {
        if classes.len() < 2 {
            return Err(ServeError::Artifact("model needs at least two classes".into()));
        }
        let rows = coefficients.nrows();
        let binary = classes.len() == 2 && rows == 1;
        if !binary && rows != classes.len() {
            return Err(ServeError::Artifact(format!(
                "{} coefficient rows for {} classes",
                rows,
                classes.len()
            )));
        }
        if intercepts.len() != rows {
            return Err(ServeError::Artifact(format!(
                "{} intercepts for {} coefficient rows",
                intercepts.len(),
                rows
            )));
        }
        if coefficients.ncols() == 0 {
            return Err(ServeError::Artifact("model has no input features".into()));
        }

        Ok(Self {
            classes,
            coefficients,
            intercepts,
        })
    }

    /// Build from the serialized artifact layout
    pub fn from_artifact(artifact: LogisticArtifact) -> ServeResult<Self> {
        let rows = artifact.coefficients.len();
        let cols = artifact.coefficients.first().map_or(0, Vec::len);
        if artifact.coefficients.iter().any(|row| row.len() != cols) {
            return Err(ServeError::Artifact("ragged coefficients".into()));
        }
        let flat: Vec<f64> = artifact.coefficients.into_iter().flatten().collect();
        let coefficients = Array2::from_shape_vec((rows, cols), flat)
            .map_err(|e| ServeError::Artifact(format!("ragged coefficients: {e}")))?;

        Self::new(artifact.classes, coefficients, Array1::from(artifact.intercepts))
    }

    /// Parse a JSON artifact
    pub fn from_json(json: &str) -> ServeResult<Self> {
        let artifact: LogisticArtifact = serde_json::from_str(json)
            .map_err(|e| ServeError::Artifact(format!("model: {e}")))?;
        Self::from_artifact(artifact)
    }

    /// Load a JSON artifact from disk
    pub fn load(path: impl AsRef<Path>) -> ServeResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| ServeError::Artifact(format!("{}: {e}", path.display())))?;
        Self::from_json(&content)
    }

    /// Class labels in output column order
    pub fn classes(&self) -> &[i64] {
        &self.classes
    }

    fn is_binary(&self) -> bool {
        self.coefficients.nrows() == 1
    }

    /// Linear scores `X·Wᵀ + b`, one column per coefficient row
    fn decision_function(&self, x: &Array2<f64>) -> ServeResult<Array2<f64>> {
        if x.ncols() != self.coefficients.ncols() {
            return Err(ServeError::Model(format!(
                "X has {} features, but the model is expecting {} features as input",
                x.ncols(),
                self.coefficients.ncols()
            )));
        }
        let scores = x.dot(&self.coefficients.t()) + &self.intercepts;
        if scores.iter().any(|s| !s.is_finite()) {
            return Err(ServeError::Model("decision scores overflowed".into()));
        }
        Ok(scores)
    }
}

impl Classifier for LogisticModel {
    fn n_features(&self) -> usize {
        self.coefficients.ncols()
    }

    fn n_classes(&self) -> usize {
        self.classes.len()
    }

    fn predict_classes(&self, x: &Array2<f64>) -> ServeResult<Vec<i64>> {
        let scores = self.decision_function(x)?;
        if self.is_binary() {
            return Ok(scores
                .column(0)
                .iter()
                .map(|&s| if s > 0.0 { self.classes[1] } else { self.classes[0] })
                .collect());
        }

        Ok(scores
            .axis_iter(Axis(0))
            .map(|row| self.classes[argmax(row.iter().copied())])
            .collect())
    }

    fn predict_probabilities(&self, x: &Array2<f64>) -> ServeResult<Vec<Vec<f64>>> {
        let scores = self.decision_function(x)?;
        if self.is_binary() {
            return Ok(scores
                .column(0)
                .iter()
                .map(|&s| {
                    let p = sigmoid(s);
                    vec![1.0 - p, p]
                })
                .collect());
        }

        Ok(scores
            .axis_iter(Axis(0))
            .map(|row| softmax(&row.to_vec()))
            .collect())
    }
}

fn sigmoid(z: f64) -> f64 {
    1.0 / (1.0 + (-z).exp())
}

/// Softmax shifted by the row max so large scores cannot overflow
fn softmax(scores: &[f64]) -> Vec<f64> {
    let max = scores.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let exps: Vec<f64> = scores.iter().map(|s| (s - max).exp()).collect();
    let total: f64 = exps.iter().sum();
    exps.into_iter().map(|e| e / total).collect()
}

/// First index of the largest value
fn argmax(values: impl Iterator<Item = f64>) -> usize {
    let mut best = (0, f64::NEG_INFINITY);
    for (i, v) in values.enumerate() {
        if v > best.1 {
            best = (i, v);
        }
    }
    best.0
}

/// Output of one prediction call, row-aligned with the input batch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionBatch {
    /// Class label per input row
    pub predictions: Vec<i64>,
    /// Class distribution per input row
    pub probabilities: Vec<Vec<f64>>,
}

impl PredictionBatch {
    /// Number of predictions per class present in this batch
    pub fn pred_counts(&self) -> BTreeMap<i64, usize> {
        let mut counts = BTreeMap::new();
        for &class in &self.predictions {
            *counts.entry(class).or_insert(0) += 1;
        }
        counts
    }

    /// Rows in the batch
    pub fn len(&self) -> usize {
        self.predictions.len()
    }

    /// True when the batch is empty
    pub fn is_empty(&self) -> bool {
        self.predictions.is_empty()
    }
}

/// Read-only wrapper over the loaded classifier and its version
#[derive(Clone)]
pub struct PredictionEngine {
    model: Arc<dyn Classifier>,
    model_version: String,
}

impl PredictionEngine {
    /// Wrap a loaded model
    pub fn new(model: Arc<dyn Classifier>, model_version: impl Into<String>) -> Self {
        Self {
            model,
            model_version: model_version.into(),
        }
    }

    /// Version identifier of the loaded model
    pub fn model_version(&self) -> &str {
        &self.model_version
    }

    /// Expected input arity
    pub fn n_features(&self) -> usize {
        self.model.n_features()
    }

    /// Predict classes and probabilities for one batch.
    ///
    /// Shape problems are reported by the model itself; results that do not
    /// line up with the input are rejected here.
    pub fn predict(&self, instances: &[FeatureVector]) -> ServeResult<PredictionBatch> {
        let rows = instances.len();
        let cols = instances.first().map_or(0, Vec::len);
        if let Some(index) = instances.iter().position(|row| row.len() != cols) {
            return Err(ServeError::Model(format!(
                "instance {index} has {} columns, first instance has {cols}",
                instances[index].len()
            )));
        }
        let flat: Vec<f64> = instances.iter().flatten().copied().collect();
        let x = Array2::from_shape_vec((rows, cols), flat)
            .map_err(|e| ServeError::Model(format!("inconsistent input shape: {e}")))?;

        let predictions = self.model.predict_classes(&x)?;
        let probabilities = self.model.predict_probabilities(&x)?;

        if predictions.len() != rows || probabilities.len() != rows {
            return Err(ServeError::Model(format!(
                "model returned {} predictions and {} probability rows for {} instances",
                predictions.len(),
                probabilities.len(),
                rows
            )));
        }
        if let Some(index) = probabilities
            .iter()
            .position(|row| row.iter().any(|p| !p.is_finite() || *p < 0.0))
        {
            return Err(ServeError::Model(format!(
                "instance {index} produced an invalid probability distribution"
            )));
        }

        Ok(PredictionBatch {
            predictions,
            probabilities,
        })
    }
}
