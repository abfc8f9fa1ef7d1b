//! Disparity statistics for mined rules
//!
//! Computes a rule's support and confidence over the full validation data,
//! the slift (confidence drop when the protected itemset is negated) and a
//! pooled two-proportion z-test for that disparity.

use crate::dataset::Frame;
use crate::error::Result;
use crate::itemset::ProtectedItemset;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Statistics of one rule over the unrestricted validation data.
///
/// `slift` and `p_value` are `None` when the negated rule base covers no
/// rows and the disparity is undefined; such rules never pass the
/// significance filter.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RuleStatistics {
    pub support: f64,
    pub confidence: f64,
    pub slift: Option<f64>,
    pub p_value: Option<f64>,
}

/// Evaluate a rule's disparity against the protected itemset it was mined
/// for. `antecedent` is the full rule base, i.e. it contains the itemset's
/// own constraints.
pub fn evaluate_rule_disparity(
    frame: &Frame,
    antecedent: &BTreeMap<String, String>,
    consequent_value: &str,
    itemset: &ProtectedItemset,
) -> Result<RuleStatistics> {
    let n = frame.len();
    let base = frame.matching_indices(antecedent)?;
    let n_base = base.len();
    let n_complete = base
        .iter()
        .filter(|&&i| frame.label(i) == consequent_value)
        .count();

    if n_base == 0 || n == 0 {
        return Ok(RuleStatistics {
            support: 0.0,
            confidence: 0.0,
            slift: None,
            p_value: None,
        });
    }

    let confidence = n_complete as f64 / n_base as f64;
    let support = n_complete as f64 / n as f64;

    // De-identified base: the antecedent without the itemset's attributes
    let deidentified: BTreeMap<String, String> = antecedent
        .iter()
        .filter(|(attr, _)| !itemset.values().contains_key(*attr))
        .map(|(attr, value)| (attr.clone(), value.clone()))
        .collect();

    // Rows outside the protected subgroup that still satisfy the
    // de-identified base
    let neg_base: Vec<usize> = frame
        .matching_indices(&deidentified)?
        .into_iter()
        .filter(|&i| !frame.row_matches(i, itemset.values()))
        .collect();
    let n_neg_base = neg_base.len();
    let n_neg_complete = neg_base
        .iter()
        .filter(|&&i| frame.label(i) == consequent_value)
        .count();

    if n_neg_base == 0 {
        return Ok(RuleStatistics {
            support,
            confidence,
            slift: None,
            p_value: None,
        });
    }

    let confidence_neg = n_neg_complete as f64 / n_neg_base as f64;
    let slift = confidence - confidence_neg;
    let p_value = slift_significance(n_base, n_neg_base, n_complete, n_neg_complete);

    Ok(RuleStatistics {
        support,
        confidence,
        slift: Some(slift),
        p_value,
    })
}

/// Two-sided p-value of the confidence disparity between the affirmed and
/// negated rule bases.
///
/// Conventions: a zero disparity has p = 1; any positive disparity against a
/// zero negated baseline has p = 0. When either complete-rule count is zero
/// the pooled z statistic is undefined and `None` is returned.
pub fn slift_significance(
    n_base: usize,
    n_neg_base: usize,
    n_complete: usize,
    n_neg_complete: usize,
) -> Option<f64> {
    let confidence = n_complete as f64 / n_base as f64;
    let confidence_neg = n_neg_complete as f64 / n_neg_base as f64;

    if confidence == confidence_neg {
        return Some(1.0);
    }
    if n_neg_complete == 0 {
        return Some(0.0);
    }
    if n_complete == 0 {
        return None;
    }

    let pooled =
        (n_complete + n_neg_complete) as f64 / (n_base + n_neg_base) as f64;
    let variance = pooled
        * (1.0 - pooled)
        * (1.0 / n_complete as f64 + 1.0 / n_neg_complete as f64);
    if variance <= 0.0 {
        return None;
    }
    let z = (confidence - confidence_neg) / variance.sqrt();
    Some(2.0 * (1.0 - normal_cdf(z.abs())))
}

/// Standard normal CDF approximation
fn normal_cdf(x: f64) -> f64 {
    0.5 * (1.0 + erf(x / std::f64::consts::SQRT_2))
}

/// Error function approximation (Abramowitz and Stegun)
fn erf(x: f64) -> f64 {
    let a1 = 0.254829592;
    let a2 = -0.284496736;
    let a3 = 1.421413741;
    let a4 = -1.453152027;
    let a5 = 1.061405429;
    let p = 0.3275911;

    let sign = if x < 0.0 { -1.0 } else { 1.0 };
    let x = x.abs();

    let t = 1.0 / (1.0 + p * x);
    let y = 1.0 - (((((a5 * t + a4) * t) + a3) * t + a2) * t + a1) * t * (-x * x).exp();

    sign * y
}
