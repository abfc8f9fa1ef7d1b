//! Black-box classifier abstraction
//!
//! The decision pipeline treats the underlying classifier as opaque: it only
//! needs `fit`, `predict` and `predict_with_probability`, where the
//! probability is the model's confidence in its own predicted label. Built-in
//! models work directly on categorical features; hosts can plug in any other
//! implementation of [`BlackBoxModel`].

mod knn;
mod naive_bayes;

pub use knn::CategoricalKnn;
pub use naive_bayes::CategoricalNaiveBayes;

use crate::dataset::Frame;
use crate::error::{Result, VetoError};
use ndarray::Array1;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Contract the decision pipeline requires from the underlying classifier
pub trait BlackBoxModel: Send + Sync {
    /// Train on the frame's features and decision labels
    fn fit(&mut self, frame: &Frame) -> Result<()>;

    /// Predicted decision labels, one per row
    fn predict(&self, frame: &Frame) -> Result<Vec<String>>;

    /// Predicted labels plus the model's confidence in each prediction
    fn predict_with_probability(&self, frame: &Frame) -> Result<(Vec<String>, Array1<f64>)>;
}

/// Built-in model identifiers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ModelKind {
    NaiveBayes,
    Knn,
    MajorityClass,
}

impl ModelKind {
    /// Resolve a configuration identifier; unknown names are a configuration
    /// error reported before any fitting work starts.
    pub fn from_identifier(identifier: &str) -> Result<Self> {
        match identifier {
            "naive-bayes" => Ok(Self::NaiveBayes),
            "knn" => Ok(Self::Knn),
            "majority-class" => Ok(Self::MajorityClass),
            other => Err(VetoError::ConfigError(format!(
                "unsupported classifier '{other}'; supported: naive-bayes, knn, majority-class"
            ))),
        }
    }

    pub fn build(&self) -> Box<dyn BlackBoxModel> {
        match self {
            Self::NaiveBayes => Box::new(CategoricalNaiveBayes::new()),
            Self::Knn => Box::new(CategoricalKnn::with_k(5)),
            Self::MajorityClass => Box::new(MajorityClass::new()),
        }
    }
}

impl std::fmt::Display for ModelKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::NaiveBayes => "naive-bayes",
            Self::Knn => "knn",
            Self::MajorityClass => "majority-class",
        };
        write!(f, "{name}")
    }
}

/// Baseline model predicting the most frequent training label
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MajorityClass {
    label: Option<String>,
    frequency: f64,
}

impl MajorityClass {
    pub fn new() -> Self {
        Self::default()
    }
}

impl BlackBoxModel for MajorityClass {
    fn fit(&mut self, frame: &Frame) -> Result<()> {
        if frame.is_empty() {
            return Err(VetoError::DataError("cannot fit on an empty frame".to_string()));
        }
        let mut counts: HashMap<&String, usize> = HashMap::new();
        for label in frame.labels() {
            *counts.entry(label).or_insert(0) += 1;
        }
        // deterministic winner: highest count, lexicographically first on ties
        let (label, count) = counts
            .into_iter()
            .max_by(|a, b| a.1.cmp(&b.1).then_with(|| b.0.cmp(a.0)))
            .expect("non-empty frame has labels");
        self.frequency = count as f64 / frame.len() as f64;
        self.label = Some(label.clone());
        Ok(())
    }

    fn predict(&self, frame: &Frame) -> Result<Vec<String>> {
        let label = self.label.as_ref().ok_or(VetoError::ModelNotFitted)?;
        Ok(vec![label.clone(); frame.len()])
    }

    fn predict_with_probability(&self, frame: &Frame) -> Result<(Vec<String>, Array1<f64>)> {
        let labels = self.predict(frame)?;
        let probs = Array1::from_elem(frame.len(), self.frequency);
        Ok((labels, probs))
    }
}
