//! Categorical k-nearest-neighbors classifier
//!
//! Votes among the k training rows closest under the overlap metric
//! (fraction of differing feature values).

use super::BlackBoxModel;
use crate::dataset::Frame;
use crate::error::{Result, VetoError};
use ndarray::Array1;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};

/// k-NN voter over categorical features
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CategoricalKnn {
    k: usize,
    train: Option<Frame>,
}

impl CategoricalKnn {
    pub fn with_k(k: usize) -> Self {
        Self { k, train: None }
    }

    /// Majority label among the k nearest training rows, with the vote
    /// fraction as the confidence
    fn vote(&self, row: &[String], train: &Frame) -> (String, f64) {
        let k = self.k.min(train.len());
        let mut heap: BinaryHeap<(OrderedDist, usize)> = BinaryHeap::with_capacity(k + 1);
        for (idx, candidate) in train.rows().iter().enumerate() {
            let differing = row
                .iter()
                .zip(candidate.iter())
                .filter(|(a, b)| a != b)
                .count();
            let dist = differing as f64 / row.len().max(1) as f64;
            let entry = (OrderedDist(dist), idx);
            if heap.len() < k {
                heap.push(entry);
            } else if let Some(top) = heap.peek() {
                if entry < *top {
                    heap.pop();
                    heap.push(entry);
                }
            }
        }

        let mut votes: HashMap<&str, usize> = HashMap::new();
        let mut total = 0usize;
        for (_, idx) in heap.into_iter() {
            *votes.entry(train.label(idx)).or_insert(0) += 1;
            total += 1;
        }
        let (label, count) = votes
            .into_iter()
            .max_by(|a, b| a.1.cmp(&b.1).then_with(|| b.0.cmp(a.0)))
            .expect("at least one neighbor");
        (label.to_string(), count as f64 / total.max(1) as f64)
    }
}

impl BlackBoxModel for CategoricalKnn {
    fn fit(&mut self, frame: &Frame) -> Result<()> {
        if frame.is_empty() {
            return Err(VetoError::DataError("cannot fit on an empty frame".to_string()));
        }
        self.train = Some(frame.clone());
        Ok(())
    }

    fn predict(&self, frame: &Frame) -> Result<Vec<String>> {
        let (labels, _) = self.predict_with_probability(frame)?;
        Ok(labels)
    }

    fn predict_with_probability(&self, frame: &Frame) -> Result<(Vec<String>, Array1<f64>)> {
        let train = self.train.as_ref().ok_or(VetoError::ModelNotFitted)?;

        let results: Vec<(String, f64)> = (0..frame.len())
            .into_par_iter()
            .map(|i| self.vote(frame.row(i), train))
            .collect();

        let (labels, probs): (Vec<String>, Vec<f64>) = results.into_iter().unzip();
        Ok((labels, Array1::from_vec(probs)))
    }
}

/// Total order over distances, treating NaN as equal
#[derive(PartialEq, PartialOrd)]
struct OrderedDist(f64);

impl Eq for OrderedDist {}

impl Ord for OrderedDist {
    fn cmp(&self, other: &Self) -> Ordering {
        self.partial_cmp(other).unwrap_or(Ordering::Equal)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(rows: &[(&str, &str, &str)]) -> Frame {
        Frame::new(
            vec!["sex".to_string(), "job".to_string()],
            rows.iter()
                .map(|(sex, job, _)| vec![sex.to_string(), job.to_string()])
                .collect(),
            rows.iter().map(|(_, _, label)| label.to_string()).collect(),
        )
        .unwrap()
    }

    #[test]
    fn test_knn_votes_by_nearest() {
        let train = frame(&[
            ("M", "eng", "high"),
            ("M", "eng", "high"),
            ("M", "eng", "high"),
            ("F", "clerk", "low"),
            ("F", "clerk", "low"),
            ("F", "clerk", "low"),
        ]);
        let mut model = CategoricalKnn::with_k(3);
        model.fit(&train).unwrap();

        let test = frame(&[("M", "eng", "high"), ("F", "clerk", "low")]);
        let (labels, probs) = model.predict_with_probability(&test).unwrap();
        assert_eq!(labels, vec!["high".to_string(), "low".to_string()]);
        assert!((probs[0] - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_k_larger_than_training_set() {
        let train = frame(&[("M", "eng", "high"), ("F", "clerk", "low")]);
        let mut model = CategoricalKnn::with_k(10);
        model.fit(&train).unwrap();

        let (labels, _) = model.predict_with_probability(&frame(&[("M", "eng", "high")])).unwrap();
        assert_eq!(labels.len(), 1);
    }

    #[test]
    fn test_unfitted_model_errors() {
        let model = CategoricalKnn::with_k(3);
        assert!(matches!(
            model.predict(&frame(&[("M", "eng", "high")])),
            Err(VetoError::ModelNotFitted)
        ));
    }
}
