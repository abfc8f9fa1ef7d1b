//! Categorical naive Bayes
//!
//! Naive Bayes over categorical features with Laplace smoothing; the natural
//! fit for the string-valued frames the pipeline works on.

use super::BlackBoxModel;
use crate::dataset::Frame;
use crate::error::{Result, VetoError};
use ndarray::Array1;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};

/// Naive Bayes classifier for categorical features
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CategoricalNaiveBayes {
    /// Laplace smoothing strength
    alpha: f64,
    /// Class label → number of training rows
    class_counts: BTreeMap<String, usize>,
    /// Class label → per-feature value counts
    value_counts: BTreeMap<String, Vec<HashMap<String, usize>>>,
    /// Distinct values observed per feature, for smoothing denominators
    cardinalities: Vec<usize>,
    n_train: usize,
}

impl Default for CategoricalNaiveBayes {
    fn default() -> Self {
        Self::new()
    }
}

impl CategoricalNaiveBayes {
    pub fn new() -> Self {
        Self {
            alpha: 1.0,
            class_counts: BTreeMap::new(),
            value_counts: BTreeMap::new(),
            cardinalities: Vec::new(),
            n_train: 0,
        }
    }

    /// Set the Laplace smoothing strength
    pub fn with_alpha(mut self, alpha: f64) -> Self {
        self.alpha = alpha;
        self
    }

    /// Log-posterior (up to a shared constant) of each class for one row
    fn log_posteriors(&self, row: &[String]) -> Vec<(String, f64)> {
        self.class_counts
            .iter()
            .map(|(class, &count)| {
                let mut log_p = (count as f64 / self.n_train as f64).ln();
                let per_feature = &self.value_counts[class];
                for (j, value) in row.iter().enumerate() {
                    let seen = per_feature[j].get(value).copied().unwrap_or(0);
                    let numerator = seen as f64 + self.alpha;
                    let denominator =
                        count as f64 + self.alpha * self.cardinalities[j] as f64;
                    log_p += (numerator / denominator).ln();
                }
                (class.clone(), log_p)
            })
            .collect()
    }
}

impl BlackBoxModel for CategoricalNaiveBayes {
    fn fit(&mut self, frame: &Frame) -> Result<()> {
        if frame.is_empty() {
            return Err(VetoError::DataError("cannot fit on an empty frame".to_string()));
        }
        let n_features = frame.columns().len();

        let mut class_counts: BTreeMap<String, usize> = BTreeMap::new();
        let mut value_counts: BTreeMap<String, Vec<HashMap<String, usize>>> = BTreeMap::new();
        let mut observed: Vec<HashSet<&String>> = vec![HashSet::new(); n_features];

        for i in 0..frame.len() {
            let label = frame.label(i).to_string();
            *class_counts.entry(label.clone()).or_insert(0) += 1;
            let per_feature = value_counts
                .entry(label)
                .or_insert_with(|| vec![HashMap::new(); n_features]);
            for (j, value) in frame.row(i).iter().enumerate() {
                *per_feature[j].entry(value.clone()).or_insert(0) += 1;
                observed[j].insert(value);
            }
        }

        self.cardinalities = observed.iter().map(|values| values.len().max(1)).collect();
        self.class_counts = class_counts;
        self.value_counts = value_counts;
        self.n_train = frame.len();
        Ok(())
    }

    fn predict(&self, frame: &Frame) -> Result<Vec<String>> {
        let (labels, _) = self.predict_with_probability(frame)?;
        Ok(labels)
    }

    fn predict_with_probability(&self, frame: &Frame) -> Result<(Vec<String>, Array1<f64>)> {
        if self.class_counts.is_empty() {
            return Err(VetoError::ModelNotFitted);
        }

        let mut labels = Vec::with_capacity(frame.len());
        let mut probs = Vec::with_capacity(frame.len());

        for i in 0..frame.len() {
            let posteriors = self.log_posteriors(frame.row(i));
            let max_log = posteriors
                .iter()
                .map(|(_, p)| *p)
                .fold(f64::NEG_INFINITY, f64::max);
            let total: f64 = posteriors.iter().map(|(_, p)| (p - max_log).exp()).sum();

            let (best_label, best_log) = posteriors
                .iter()
                .max_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal))
                .expect("fitted model has classes")
                .clone();

            labels.push(best_label);
            probs.push((best_log - max_log).exp() / total);
        }

        Ok((labels, Array1::from_vec(probs)))
    }
}
