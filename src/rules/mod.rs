//! Discriminatory class-association rules
//!
//! A rule links an antecedent (a conjunction of `attribute = value`
//! constraints, always containing a protected itemset) to a single
//! decision-attribute consequent, together with the statistics computed
//! during mining: support, confidence, lift, slift and the slift p-value.
//! Rules are produced once during fitting and never mutated afterwards.

pub mod apriori;
pub mod stats;

pub use apriori::{mine_class_rules, AprioriParams, MinedRule};
pub use stats::{evaluate_rule_disparity, RuleStatistics};

use crate::dataset::Frame;
use crate::error::{Result, VetoError};
use crate::itemset::ProtectedItemset;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A class-association rule with its disparity statistics.
///
/// `slift` is the rule's confidence minus the confidence of the same rule
/// with the protected itemset negated; `slift_p_value` is the two-sided
/// p-value of that disparity. Both are `None` when the negated base is empty
/// and the statistic is undefined.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rule {
    antecedent: BTreeMap<String, String>,
    consequent_attribute: String,
    consequent_value: String,
    support: f64,
    confidence: f64,
    lift: f64,
    slift: Option<f64>,
    slift_p_value: Option<f64>,
}

impl Rule {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        antecedent: BTreeMap<String, String>,
        consequent_attribute: String,
        consequent_value: String,
        support: f64,
        confidence: f64,
        lift: f64,
        slift: Option<f64>,
        slift_p_value: Option<f64>,
    ) -> Self {
        Self {
            antecedent,
            consequent_attribute,
            consequent_value,
            support,
            confidence,
            lift,
            slift,
            slift_p_value,
        }
    }

    pub fn antecedent(&self) -> &BTreeMap<String, String> {
        &self.antecedent
    }

    pub fn consequent_attribute(&self) -> &str {
        &self.consequent_attribute
    }

    pub fn consequent_value(&self) -> &str {
        &self.consequent_value
    }

    pub fn support(&self) -> f64 {
        self.support
    }

    pub fn confidence(&self) -> f64 {
        self.confidence
    }

    pub fn lift(&self) -> f64 {
        self.lift
    }

    pub fn slift(&self) -> Option<f64> {
        self.slift
    }

    pub fn slift_p_value(&self) -> Option<f64> {
        self.slift_p_value
    }

    /// Whether `other` dominates this rule: same consequent and a strictly
    /// smaller antecedent contained in this rule's antecedent.
    pub fn is_dominated_by(&self, other: &Rule) -> bool {
        if self.consequent_attribute != other.consequent_attribute
            || self.consequent_value != other.consequent_value
        {
            return false;
        }
        other.antecedent.len() < self.antecedent.len()
            && other
                .antecedent
                .iter()
                .all(|(attr, value)| self.antecedent.get(attr) == Some(value))
    }
}

impl std::fmt::Display for Rule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let base: Vec<String> = self
            .antecedent
            .iter()
            .map(|(attr, value)| format!("{attr} = {value}"))
            .collect();
        write!(
            f,
            "({}) -> ({} = {})",
            base.join(" AND "),
            self.consequent_attribute,
            self.consequent_value
        )?;
        write!(
            f,
            ", Support: {:.3}, Confidence: {:.3}, Lift: {:.3}",
            self.support, self.confidence, self.lift
        )?;
        match self.slift {
            Some(slift) => write!(f, ", SLift: {slift:.3}"),
            None => write!(f, ", SLift: undefined"),
        }
    }
}

/// Ordered rule list attached to the protected itemset it was mined for
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleSet {
    pub itemset: ProtectedItemset,
    pub rules: Vec<Rule>,
}

/// Drop every rule dominated by a more general rule with the same consequent.
///
/// Pairwise comparison over the list; rules whose antecedents merely overlap
/// (neither contains the other) are all kept.
pub fn reduce_rules(rules: Vec<Rule>) -> Vec<Rule> {
    rules
        .iter()
        .filter(|rule| !rules.iter().any(|other| rule.is_dominated_by(other)))
        .cloned()
        .collect()
}

/// Attribute each row to at most one rule, first match wins.
///
/// Rules are applied in rule-set order; a row matched by an earlier rule is
/// removed from consideration for later ones. A row matches a rule when its
/// features satisfy the antecedent and its decision label equals the
/// consequent. Fails on an empty frame.
pub fn attribute_rows_to_rules<'a>(
    frame: &Frame,
    rule_sets: &'a [RuleSet],
) -> Result<Vec<Option<&'a Rule>>> {
    if frame.is_empty() {
        return Err(VetoError::DataError(
            "no rows left to attribute to reject rules".to_string(),
        ));
    }

    let mut assigned: Vec<Option<&Rule>> = vec![None; frame.len()];
    for rule in rule_sets.iter().flat_map(|set| &set.rules) {
        for i in 0..frame.len() {
            if assigned[i].is_none()
                && frame.label(i) == rule.consequent_value
                && frame.row_matches(i, &rule.antecedent)
            {
                assigned[i] = Some(rule);
            }
        }
    }
    Ok(assigned)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rule(antecedent: &[(&str, &str)], consequent: &str) -> Rule {
        Rule::new(
            antecedent
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            "income".to_string(),
            consequent.to_string(),
            0.1,
            0.9,
            1.2,
            Some(0.6),
            Some(0.001),
        )
    }

    #[test]
    fn test_reduce_removes_strict_supersets() {
        let general = rule(&[("sex", "F")], "low");
        let specific = rule(&[("sex", "F"), ("job", "clerk")], "low");
        let unrelated = rule(&[("age", "young")], "low");

        let reduced = reduce_rules(vec![general.clone(), specific, unrelated.clone()]);
        assert_eq!(reduced.len(), 2);
        assert!(reduced.contains(&general));
        assert!(reduced.contains(&unrelated));
    }

    #[test]
    fn test_reduce_keeps_different_consequents() {
        let general = rule(&[("sex", "F")], "low");
        let specific_other = rule(&[("sex", "F"), ("job", "clerk")], "high");

        let reduced = reduce_rules(vec![general, specific_other]);
        assert_eq!(reduced.len(), 2);
    }

    #[test]
    fn test_reduced_set_has_no_dominated_rule() {
        let rules = vec![
            rule(&[("sex", "F")], "low"),
            rule(&[("sex", "F"), ("job", "clerk")], "low"),
            rule(&[("sex", "F"), ("job", "clerk"), ("age", "young")], "low"),
            rule(&[("job", "eng")], "low"),
        ];
        let reduced = reduce_rules(rules);
        for r in &reduced {
            assert!(!reduced.iter().any(|other| r.is_dominated_by(other)));
        }
    }

    #[test]
    fn test_attribution_first_match_wins() {
        let frame = Frame::new(
            vec!["sex".to_string(), "job".to_string()],
            vec![
                vec!["F".to_string(), "clerk".to_string()],
                vec!["F".to_string(), "eng".to_string()],
                vec!["M".to_string(), "clerk".to_string()],
            ],
            vec!["low".to_string(), "low".to_string(), "high".to_string()],
        )
        .unwrap();

        let first = rule(&[("sex", "F")], "low");
        let second = rule(&[("job", "clerk")], "low");
        let sets = vec![RuleSet {
            itemset: ProtectedItemset::from_pairs([("sex", "F")]),
            rules: vec![first.clone(), second],
        }];

        let assigned = attribute_rows_to_rules(&frame, &sets).unwrap();
        // rows 0 and 1 go to the first rule; row 2 has label "high" and
        // matches neither rule's consequent
        assert_eq!(assigned[0], Some(&first));
        assert_eq!(assigned[1], Some(&first));
        assert_eq!(assigned[2], None);
    }

    #[test]
    fn test_attribution_requires_consequent_match() {
        let frame = Frame::new(
            vec!["sex".to_string()],
            vec![vec!["F".to_string()]],
            vec!["high".to_string()],
        )
        .unwrap();
        let sets = vec![RuleSet {
            itemset: ProtectedItemset::from_pairs([("sex", "F")]),
            rules: vec![rule(&[("sex", "F")], "low")],
        }];
        let assigned = attribute_rows_to_rules(&frame, &sets).unwrap();
        assert_eq!(assigned[0], None);
    }

    #[test]
    fn test_attribution_empty_frame_is_fatal() {
        let frame = Frame::default();
        assert!(matches!(
            attribute_rows_to_rules(&frame, &[]),
            Err(VetoError::DataError(_))
        ));
    }

    #[test]
    fn test_display() {
        let r = rule(&[("sex", "F"), ("job", "clerk")], "low");
        let rendered = r.to_string();
        assert!(rendered.contains("(job = clerk AND sex = F) -> (income = low)"));
        assert!(rendered.contains("SLift: 0.600"));
    }
}
