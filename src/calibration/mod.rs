//! Reject-threshold calibration
//!
//! Learns the two probability cut-offs that partition a global rejection
//! budget between unfairness-driven and uncertainty-driven rejection, from
//! predictions and probabilities on a held-out validation split.

use crate::error::{Result, VetoError};
use ndarray::Array1;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::HashSet;

/// Calibrated probability cut-offs.
///
/// A `None` cut-off disables its branch entirely: no budget was allotted to
/// it, so it must produce neither rejections nor flips. With a coverage of
/// 1.0 both branches are disabled and every prediction is accepted.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RejectThresholds {
    /// Discriminated instances with probability at or above this value are
    /// deferred; below it their prediction is flipped.
    pub unfair_certain: Option<f64>,
    /// Non-discriminated instances with probability at or below this value
    /// are deferred.
    pub fair_uncertain: Option<f64>,
}

/// Splits the rejection budget and derives both cut-offs
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ThresholdCalibrator {
    coverage: f64,
    fairness_weight: f64,
}

impl ThresholdCalibrator {
    pub fn new(coverage: f64, fairness_weight: f64) -> Self {
        Self { coverage, fairness_weight }
    }

    /// Number of unfairness- and uncertainty-driven rejections for a
    /// validation split of `n_rows` rows with `n_discriminated` rows flagged
    /// by the situation test. The two always sum to the total budget
    /// `round((1 − coverage) · n_rows)`.
    pub fn rejection_budget(&self, n_rows: usize, n_discriminated: usize) -> (usize, usize) {
        let n_total = ((1.0 - self.coverage) * n_rows as f64).round() as usize;
        let n_unfair =
            (((n_total as f64) * self.fairness_weight).round() as usize).min(n_discriminated);
        (n_unfair, n_total - n_unfair)
    }

    /// Derive both cut-offs from the validation probabilities and the set of
    /// row indices the situation test marked as discriminated.
    pub fn calibrate(
        &self,
        probabilities: &Array1<f64>,
        discriminated: &[usize],
    ) -> Result<RejectThresholds> {
        let n = probabilities.len();
        if n == 0 {
            return Err(VetoError::DataError(
                "cannot calibrate thresholds on an empty validation split".to_string(),
            ));
        }

        let flagged: HashSet<usize> = discriminated.iter().copied().collect();
        let unfair_probs: Vec<f64> = discriminated
            .iter()
            .map(|&i| probabilities[i])
            .collect();
        let fair_probs: Vec<f64> = (0..n)
            .filter(|i| !flagged.contains(i))
            .map(|i| probabilities[i])
            .collect();

        let (n_unfair, n_uncertain) = self.rejection_budget(n, unfair_probs.len());

        Ok(RejectThresholds {
            unfair_certain: unfair_certain_cutoff(unfair_probs, n_unfair),
            fair_uncertain: fair_uncertain_cutoff(fair_probs, n_uncertain),
        })
    }
}

/// Cut-off so that exactly `n_reject` of the given probabilities lie at or
/// above it (modulo ties): the probability at descending rank `n_reject`.
/// Falls back to 0.5 when the budget asks for the whole candidate set.
fn unfair_certain_cutoff(mut probs: Vec<f64>, n_reject: usize) -> Option<f64> {
    if n_reject == 0 {
        return None;
    }
    if n_reject >= probs.len() {
        return Some(0.5);
    }
    probs.sort_by(|a, b| b.partial_cmp(a).unwrap_or(Ordering::Equal));
    Some(probs[n_reject - 1])
}

/// Cut-off so that exactly `n_reject` of the given probabilities lie at or
/// below it (modulo ties): the probability at ascending rank `n_reject`.
/// Falls back to 0.5 when the budget exceeds the candidate set.
fn fair_uncertain_cutoff(mut probs: Vec<f64>, n_reject: usize) -> Option<f64> {
    if n_reject == 0 {
        return None;
    }
    if n_reject > probs.len() {
        return Some(0.5);
    }
    probs.sort_by(|a, b| a.partial_cmp(b).unwrap_or(Ordering::Equal));
    Some(probs[n_reject - 1])
}
