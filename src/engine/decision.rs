//! Per-instance decisions

use crate::rules::Rule;
use crate::situation::SituationTestResult;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Outcome of the decision pipeline for a single instance.
///
/// Exactly one variant applies per instance; the non-Accept variants retain
/// everything needed to explain the intervention.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Decision {
    /// The classifier's prediction stands
    Accept { label: String },
    /// High-confidence discriminatory match below the certainty cut-off:
    /// the prediction is inverted
    UnfairnessFlip {
        instance: BTreeMap<String, String>,
        original_label: String,
        flipped_label: String,
        probability: f64,
        rule: Rule,
        situation: SituationTestResult,
    },
    /// High-confidence discriminatory match at or above the certainty
    /// cut-off: deferred to a human
    UnfairnessReject {
        instance: BTreeMap<String, String>,
        original_label: String,
        probability: f64,
        rule: Rule,
        situation: SituationTestResult,
    },
    /// Low prediction probability with no discriminatory match: deferred
    UncertaintyReject {
        instance: BTreeMap<String, String>,
        original_label: String,
        probability: f64,
    },
}

impl Decision {
    pub fn is_accept(&self) -> bool {
        matches!(self, Decision::Accept { .. })
    }

    pub fn is_deferred(&self) -> bool {
        matches!(
            self,
            Decision::UnfairnessReject { .. } | Decision::UncertaintyReject { .. }
        )
    }

    /// The label the system answers with, `None` when deferred
    pub fn final_label(&self) -> Option<&str> {
        match self {
            Decision::Accept { label } => Some(label),
            Decision::UnfairnessFlip { flipped_label, .. } => Some(flipped_label),
            Decision::UnfairnessReject { .. } | Decision::UncertaintyReject { .. } => None,
        }
    }
}

impl std::fmt::Display for Decision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Decision::Accept { label } => write!(f, "Accept: {label}"),
            Decision::UnfairnessFlip {
                original_label,
                flipped_label,
                probability,
                rule,
                ..
            } => {
                writeln!(f, "Unfairness flip: {original_label} -> {flipped_label}")?;
                writeln!(f, "Prediction probability: {probability}")?;
                write!(f, "Flip based on this rule\n{rule}")
            }
            Decision::UnfairnessReject {
                original_label,
                probability,
                rule,
                ..
            } => {
                writeln!(f, "Unfairness reject")?;
                writeln!(f, "Prediction that would have been made: {original_label}")?;
                writeln!(f, "Prediction probability: {probability}")?;
                write!(f, "Rejection based on this rule\n{rule}")
            }
            Decision::UncertaintyReject {
                original_label,
                probability,
                ..
            } => {
                writeln!(f, "Uncertainty reject")?;
                writeln!(f, "Prediction that would have been made: {original_label}")?;
                writeln!(f, "Prediction probability: {probability}")?;
                write!(f, "Decision will be deferred to human")
            }
        }
    }
}
