//! Selective classification engine
//!
//! Wires the pipeline together: split the data, train the black-box model,
//! mine reject rules per protected subgroup, fit the situation tester and
//! calibrate the reject thresholds; then compose per-instance decisions.

mod decision;

pub use decision::Decision;

use crate::calibration::{RejectThresholds, ThresholdCalibrator};
use crate::classifier::{BlackBoxModel, ModelKind};
use crate::dataset::{Dataset, DatasetSchema, Frame};
use crate::error::{Result, VetoError};
use crate::itemset::{generate_protected_itemsets, ProtectedItemset};
use crate::rules::{
    attribute_rows_to_rules, evaluate_rule_disparity, mine_class_rules, reduce_rules,
    AprioriParams, Rule, RuleSet,
};
use crate::situation::{SituationTestResult, SituationTester};
use ndarray::Array1;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, info};

/// Configuration of the selective classifier
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RejectConfig {
    /// Fraction of instances the system must answer automatically
    pub coverage: f64,
    /// Fraction of the rejection budget allotted to unfairness rejection
    pub fairness_weight: f64,
    /// Fraction of the data held out for rule mining and situation testing
    pub val1_ratio: f64,
    /// Fraction of the data held out for threshold calibration
    pub val2_ratio: f64,
    /// Identifier of the underlying black-box classifier
    pub base_classifier: String,
    /// Significance ceiling for the slift p-value
    pub max_slift_pvalue: f64,
    /// Neighbors per partition in the situation test
    pub situation_k: usize,
    /// Discrimination-score threshold of the situation test
    pub situation_t: f64,
    /// Seed for every data split, making fits reproducible
    pub seed: u64,
}

impl Default for RejectConfig {
    fn default() -> Self {
        Self {
            coverage: 0.9,
            fairness_weight: 0.5,
            val1_ratio: 0.1,
            val2_ratio: 0.1,
            base_classifier: "naive-bayes".to_string(),
            max_slift_pvalue: 0.01,
            situation_k: 10,
            situation_t: 0.2,
            seed: 42,
        }
    }
}

impl RejectConfig {
    pub fn new(coverage: f64, fairness_weight: f64) -> Self {
        Self {
            coverage,
            fairness_weight,
            ..Default::default()
        }
    }

    pub fn with_base_classifier(mut self, identifier: &str) -> Self {
        self.base_classifier = identifier.to_string();
        self
    }

    pub fn with_validation_ratios(mut self, val1_ratio: f64, val2_ratio: f64) -> Self {
        self.val1_ratio = val1_ratio;
        self.val2_ratio = val2_ratio;
        self
    }

    pub fn with_situation_test(mut self, k: usize, t: f64) -> Self {
        self.situation_k = k;
        self.situation_t = t;
        self
    }

    pub fn with_max_slift_pvalue(mut self, ceiling: f64) -> Self {
        self.max_slift_pvalue = ceiling;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Fail-fast domain checks, run before any fitting work
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.coverage) {
            return Err(VetoError::ConfigError(format!(
                "coverage must lie in [0, 1], got {}",
                self.coverage
            )));
        }
        if !(0.0..=1.0).contains(&self.fairness_weight) {
            return Err(VetoError::ConfigError(format!(
                "fairness_weight must lie in [0, 1], got {}",
                self.fairness_weight
            )));
        }
        for (name, ratio) in [("val1_ratio", self.val1_ratio), ("val2_ratio", self.val2_ratio)] {
            if !(ratio > 0.0 && ratio < 1.0) {
                return Err(VetoError::ConfigError(format!(
                    "{name} must lie in (0, 1), got {ratio}"
                )));
            }
        }
        if self.val1_ratio + self.val2_ratio >= 1.0 {
            return Err(VetoError::ConfigError(
                "val1_ratio + val2_ratio must leave room for training data".to_string(),
            ));
        }
        if !(self.max_slift_pvalue > 0.0 && self.max_slift_pvalue <= 1.0) {
            return Err(VetoError::ConfigError(format!(
                "max_slift_pvalue must lie in (0, 1], got {}",
                self.max_slift_pvalue
            )));
        }
        if self.situation_k == 0 {
            return Err(VetoError::ConfigError(
                "situation_k must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Decisions for one prediction call, plus the flip indices for audit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    /// One decision per input row, in input order
    pub decisions: Vec<Decision>,
    /// Indices of the `UnfairnessFlip` decisions
    pub flips: Vec<usize>,
}

/// Everything a successful fit produces, swapped in atomically
struct FittedState {
    model: Box<dyn BlackBoxModel>,
    rule_sets: Vec<RuleSet>,
    tester: SituationTester,
    thresholds: RejectThresholds,
    desirable_label: String,
    undesirable_label: String,
}

/// Reject-option wrapper around a black-box classifier.
///
/// `fit` mines the reject rules, fits the situation tester and calibrates
/// the reject thresholds; `predict` replays the pipeline on unseen rows.
/// A failed fit leaves any previously fitted state untouched.
pub struct RejectOptionClassifier {
    config: RejectConfig,
    override_model: Option<Box<dyn BlackBoxModel>>,
    fitted: Option<FittedState>,
}

impl RejectOptionClassifier {
    pub fn new(config: RejectConfig) -> Self {
        Self {
            config,
            override_model: None,
            fitted: None,
        }
    }

    /// Use the given model instead of resolving `base_classifier`
    pub fn with_model(mut self, model: Box<dyn BlackBoxModel>) -> Self {
        self.override_model = Some(model);
        self
    }

    /// The mined reject rules per protected itemset, once fitted
    pub fn reject_rules(&self) -> Option<&[RuleSet]> {
        self.fitted.as_ref().map(|state| state.rule_sets.as_slice())
    }

    /// The calibrated reject thresholds, once fitted
    pub fn thresholds(&self) -> Option<RejectThresholds> {
        self.fitted.as_ref().map(|state| state.thresholds)
    }

    /// Run the full fitting pipeline on `data`
    pub fn fit(&mut self, data: &Dataset) -> Result<&mut Self> {
        self.config.validate()?;

        // Resolve the model up front so an unknown identifier fails before
        // any mining work
        let mut model = match self.override_model.take() {
            Some(model) => model,
            None => ModelKind::from_identifier(&self.config.base_classifier)?.build(),
        };

        let schema = data.schema().clone();
        let n = data.len();
        let val1_n = (self.config.val1_ratio * n as f64) as usize;
        let val2_n = (self.config.val2_ratio * n as f64) as usize;
        if val1_n == 0 || val2_n == 0 {
            return Err(VetoError::DataError(format!(
                "dataset with {n} rows is too small for the configured validation ratios"
            )));
        }

        let itemsets = generate_protected_itemsets(data.frame(), &schema.sensitive_attributes)?;
        info!(subgroups = itemsets.len(), rows = n, "generated protected itemsets");

        let (train, val1) = data.split(val1_n, self.config.seed)?;
        let (train, val2) = train.split(val2_n, self.config.seed.wrapping_add(1))?;

        model.fit(train.frame())?;

        // Reject rules and the situation tester both work on the first
        // validation split with the model's own predictions as labels
        let (val1_preds, _) = model.predict_with_probability(val1.frame())?;
        let val1_frame = val1.frame().with_labels(val1_preds)?;

        let rule_sets: Vec<RuleSet> = itemsets
            .par_iter()
            .map(|itemset| self.mine_reject_rules(itemset, &val1_frame, &schema))
            .collect::<Result<_>>()?;
        let total_rules: usize = rule_sets.iter().map(|set| set.rules.len()).sum();
        info!(rules = total_rules, "learned reject rules");

        let mut tester = SituationTester::new(
            self.config.situation_k,
            self.config.situation_t,
            schema.reference_groups.clone(),
            schema.desirable_label.clone(),
            data.distance(),
        );
        tester.fit(&val1_frame)?;

        // Replay the pipeline on the second validation split to calibrate
        // the two reject thresholds
        let (val2_preds, val2_probs) = model.predict_with_probability(val2.frame())?;
        let val2_frame = val2.frame().with_labels(val2_preds)?;
        let discriminated =
            discriminated_indices(&val2_frame, &rule_sets, &tester)?;
        let thresholds = ThresholdCalibrator::new(self.config.coverage, self.config.fairness_weight)
            .calibrate(&val2_probs, &discriminated)?;
        info!(?thresholds, "calibrated reject thresholds");

        self.fitted = Some(FittedState {
            model,
            rule_sets,
            tester,
            thresholds,
            desirable_label: schema.desirable_label,
            undesirable_label: schema.undesirable_label,
        });
        Ok(self)
    }

    /// Mine, score and filter the reject rules of one protected itemset
    fn mine_reject_rules(
        &self,
        itemset: &ProtectedItemset,
        frame: &Frame,
        schema: &DatasetSchema,
    ) -> Result<RuleSet> {
        let covered = frame.matching_indices(itemset.values())?;
        if covered.is_empty() {
            // subgroup not populated in this split; nothing to mine
            return Ok(RuleSet { itemset: itemset.clone(), rules: Vec::new() });
        }

        // Drop the sensitive attributes so mining cannot trivially re-derive
        // subgroup membership
        let restricted = frame
            .select(&covered)
            .without_columns(&schema.sensitive_attributes);
        let mined = mine_class_rules(
            &restricted,
            &schema.decision_attribute,
            &AprioriParams::default(),
        );

        let is_reference = schema
            .reference_groups
            .iter()
            .any(|group| group == itemset.values());

        let mut rules = Vec::new();
        for candidate in mined {
            // Favoring rules only apply to the reference group
            if !is_reference && candidate.consequent_value == schema.desirable_label {
                continue;
            }

            let mut antecedent: BTreeMap<String, String> = candidate.antecedent;
            antecedent.extend(
                itemset
                    .values()
                    .iter()
                    .map(|(attr, value)| (attr.clone(), value.clone())),
            );

            let stats =
                evaluate_rule_disparity(frame, &antecedent, &candidate.consequent_value, itemset)?;
            let significant = match (stats.slift, stats.p_value) {
                (Some(slift), Some(p)) => {
                    (stats.confidence - slift) < 0.5 && p < self.config.max_slift_pvalue
                }
                _ => false,
            };
            if !significant {
                continue;
            }

            rules.push(Rule::new(
                antecedent,
                schema.decision_attribute.clone(),
                candidate.consequent_value,
                stats.support,
                stats.confidence,
                candidate.lift,
                stats.slift,
                stats.p_value,
            ));
        }

        let rules = reduce_rules(rules);
        debug!(subgroup = %itemset, rules = rules.len(), "mined subgroup rules");
        Ok(RuleSet { itemset: itemset.clone(), rules })
    }

    /// Compose a decision for every row of `data`
    pub fn predict(&self, data: &Dataset) -> Result<Prediction> {
        let state = self.fitted.as_ref().ok_or(VetoError::ModelNotFitted)?;
        if data.is_empty() {
            return Err(VetoError::DataError("no rows to predict".to_string()));
        }

        let (labels, probabilities) = state.model.predict_with_probability(data.frame())?;
        let frame = data.frame().with_labels(labels)?;
        let decisions = compose_decisions(&frame, &probabilities, state)?;

        let flips: Vec<usize> = decisions
            .iter()
            .enumerate()
            .filter(|(_, d)| matches!(d, Decision::UnfairnessFlip { .. }))
            .map(|(i, _)| i)
            .collect();
        let deferred = decisions.iter().filter(|d| d.is_deferred()).count();
        info!(rejected = deferred, flipped = flips.len(), rows = frame.len(), "composed decisions");

        Ok(Prediction { decisions, flips })
    }
}

/// Indices of rows that are covered by a reject rule and flagged by the
/// situation test
fn discriminated_indices(
    frame: &Frame,
    rule_sets: &[RuleSet],
    tester: &SituationTester,
) -> Result<Vec<usize>> {
    let assigned = attribute_rows_to_rules(frame, rule_sets)?;
    let covered: Vec<usize> = (0..frame.len()).filter(|&i| assigned[i].is_some()).collect();
    if covered.is_empty() {
        return Ok(Vec::new());
    }
    let verdicts = tester.predict(&frame.select(&covered))?;
    Ok(covered
        .into_iter()
        .zip(verdicts)
        .filter(|(_, verdict)| verdict.discriminated)
        .map(|(i, _)| i)
        .collect())
}

/// Build one decision per row from the four disjoint partitions
fn compose_decisions(
    frame: &Frame,
    probabilities: &Array1<f64>,
    state: &FittedState,
) -> Result<Vec<Decision>> {
    let assigned = attribute_rows_to_rules(frame, &state.rule_sets)?;
    let covered: Vec<usize> = (0..frame.len()).filter(|&i| assigned[i].is_some()).collect();

    let mut verdicts: Vec<Option<SituationTestResult>> = vec![None; frame.len()];
    if !covered.is_empty() {
        for (i, verdict) in covered.iter().zip(state.tester.predict(&frame.select(&covered))?) {
            verdicts[*i] = Some(verdict);
        }
    }

    let decisions = (0..frame.len())
        .map(|i| {
            let label = frame.label(i).to_string();
            let probability = probabilities[i];

            if let (Some(rule), Some(verdict)) = (assigned[i], verdicts[i].take()) {
                if verdict.discriminated {
                    return match state.thresholds.unfair_certain {
                        Some(cutoff) if probability >= cutoff => Decision::UnfairnessReject {
                            instance: frame.instance(i),
                            original_label: label,
                            probability,
                            rule: rule.clone(),
                            situation: verdict,
                        },
                        Some(_) => {
                            let flipped_label = if label == state.desirable_label {
                                state.undesirable_label.clone()
                            } else {
                                state.desirable_label.clone()
                            };
                            Decision::UnfairnessFlip {
                                instance: frame.instance(i),
                                original_label: label,
                                flipped_label,
                                probability,
                                rule: rule.clone(),
                                situation: verdict,
                            }
                        }
                        // no unfairness budget: the prediction stands
                        None => Decision::Accept { label },
                    };
                }
            }

            match state.thresholds.fair_uncertain {
                Some(cutoff) if probability <= cutoff => Decision::UncertaintyReject {
                    instance: frame.instance(i),
                    original_label: label,
                    probability,
                },
                _ => Decision::Accept { label },
            }
        })
        .collect();

    Ok(decisions)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::overlap_distance;

    /// Deterministic stand-in for a trained model: the label follows the
    /// `sex` column, the probability follows the `job` column.
    struct StubModel;

    impl BlackBoxModel for StubModel {
        fn fit(&mut self, _frame: &Frame) -> Result<()> {
            Ok(())
        }

        fn predict(&self, frame: &Frame) -> Result<Vec<String>> {
            let (labels, _) = self.predict_with_probability(frame)?;
            Ok(labels)
        }

        fn predict_with_probability(&self, frame: &Frame) -> Result<(Vec<String>, Array1<f64>)> {
            let sex = frame.column_index("sex").expect("sex column");
            let job = frame.column_index("job").expect("job column");
            let labels: Vec<String> = frame
                .rows()
                .iter()
                .map(|row| if row[sex] == "M" { "high".to_string() } else { "low".to_string() })
                .collect();
            let probs: Vec<f64> = frame
                .rows()
                .iter()
                .map(|row| if row[job] == "clerk" { 0.95 } else { 0.8 })
                .collect();
            Ok((labels, Array1::from_vec(probs)))
        }
    }

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

    fn female_low_rule() -> Rule {
        Rule::new(
            BTreeMap::from([("sex".to_string(), "F".to_string())]),
            "income".to_string(),
            "low".to_string(),
            0.2,
            1.0,
            1.5,
            Some(1.0),
            Some(0.0),
        )
    }

    fn fitted_state(thresholds: RejectThresholds) -> FittedState {
        let mut tester = SituationTester::new(
            2,
            0.2,
            vec![BTreeMap::from([("sex".to_string(), "M".to_string())])],
            "high".to_string(),
            overlap_distance(),
        );
        tester
            .fit(&frame(&[
                ("M", "eng", "high"),
                ("M", "clerk", "high"),
                ("F", "eng", "low"),
                ("F", "clerk", "low"),
            ]))
            .unwrap();

        FittedState {
            model: Box::new(StubModel),
            rule_sets: vec![RuleSet {
                itemset: ProtectedItemset::from_pairs([("sex", "F")]),
                rules: vec![female_low_rule()],
            }],
            tester,
            thresholds,
            desirable_label: "high".to_string(),
            undesirable_label: "low".to_string(),
        }
    }

    fn test_dataset(rows: &[(&str, &str, &str)]) -> Dataset {
        let schema = DatasetSchema {
            decision_attribute: "income".to_string(),
            desirable_label: "high".to_string(),
            undesirable_label: "low".to_string(),
            sensitive_attributes: vec!["sex".to_string()],
            reference_groups: vec![BTreeMap::from([("sex".to_string(), "M".to_string())])],
        };
        Dataset::from_frame(frame(rows), schema, overlap_distance()).unwrap()
    }

    fn classifier_with_state(state: FittedState) -> RejectOptionClassifier {
        let mut classifier = RejectOptionClassifier::new(RejectConfig::default());
        classifier.fitted = Some(state);
        classifier
    }

    #[test]
    fn test_config_validation() {
        assert!(RejectConfig::default().validate().is_ok());
        assert!(RejectConfig::new(1.2, 0.5).validate().is_err());
        assert!(RejectConfig::new(0.9, -0.1).validate().is_err());
        assert!(RejectConfig::new(0.9, 0.5)
            .with_validation_ratios(0.6, 0.6)
            .validate()
            .is_err());
        assert!(RejectConfig::new(0.9, 0.5)
            .with_situation_test(0, 0.2)
            .validate()
            .is_err());
        assert!(RejectConfig::new(0.9, 0.5)
            .with_max_slift_pvalue(0.0)
            .validate()
            .is_err());
    }

    #[test]
    fn test_unknown_classifier_fails_before_mining() {
        let config = RejectConfig::new(0.9, 0.5).with_base_classifier("random-forest");
        let mut classifier = RejectOptionClassifier::new(config);
        let data = test_dataset(&[("M", "eng", "high"), ("F", "clerk", "low")]);
        assert!(matches!(
            classifier.fit(&data),
            Err(VetoError::ConfigError(_))
        ));
    }

    #[test]
    fn test_predict_before_fit() {
        let classifier = RejectOptionClassifier::new(RejectConfig::default());
        let data = test_dataset(&[("M", "eng", "high")]);
        assert!(matches!(
            classifier.predict(&data),
            Err(VetoError::ModelNotFitted)
        ));
    }

    #[test]
    fn test_composition_splits_at_the_certainty_cutoff() {
        let classifier = classifier_with_state(fitted_state(RejectThresholds {
            unfair_certain: Some(0.9),
            fair_uncertain: Some(0.5),
        }));
        let data = test_dataset(&[
            ("F", "clerk", "low"), // covered, discriminated, 0.95 ≥ 0.9
            ("F", "eng", "low"),   // covered, discriminated, 0.8 < 0.9
            ("M", "eng", "high"),  // uncovered, 0.8 > 0.5
        ]);

        let prediction = classifier.predict(&data).unwrap();
        assert!(matches!(
            prediction.decisions[0],
            Decision::UnfairnessReject { .. }
        ));
        match &prediction.decisions[1] {
            Decision::UnfairnessFlip { original_label, flipped_label, rule, situation, .. } => {
                assert_eq!(original_label, "low");
                assert_eq!(flipped_label, "high");
                assert_eq!(rule, &female_low_rule());
                assert!(situation.discriminated);
            }
            other => panic!("expected a flip, got {other:?}"),
        }
        assert!(prediction.decisions[2].is_accept());
        assert_eq!(prediction.flips, vec![1]);
    }

    #[test]
    fn test_disabled_branches_accept_everything() {
        let classifier = classifier_with_state(fitted_state(RejectThresholds {
            unfair_certain: None,
            fair_uncertain: None,
        }));
        let data = test_dataset(&[
            ("F", "clerk", "low"),
            ("F", "eng", "low"),
            ("M", "eng", "high"),
        ]);

        let prediction = classifier.predict(&data).unwrap();
        assert!(prediction.decisions.iter().all(Decision::is_accept));
        assert!(prediction.flips.is_empty());
    }

    #[test]
    fn test_uncertainty_rejection_at_the_cutoff() {
        let classifier = classifier_with_state(fitted_state(RejectThresholds {
            unfair_certain: None,
            fair_uncertain: Some(0.8),
        }));
        // both rows are uncovered (label "high" never matches the rule)
        let data = test_dataset(&[("M", "eng", "high"), ("M", "clerk", "high")]);

        let prediction = classifier.predict(&data).unwrap();
        // 0.8 ≤ 0.8 → deferred; 0.95 > 0.8 → accepted
        assert!(matches!(
            prediction.decisions[0],
            Decision::UncertaintyReject { .. }
        ));
        assert!(prediction.decisions[1].is_accept());
    }

    #[test]
    fn test_reject_everything_budget() {
        // certainty cut-off at the fallback 0.5: every covered discriminated
        // row is deferred, the remainder is uncertainty-deferred
        let classifier = classifier_with_state(fitted_state(RejectThresholds {
            unfair_certain: Some(0.5),
            fair_uncertain: Some(1.0),
        }));
        let data = test_dataset(&[
            ("F", "clerk", "low"),
            ("F", "eng", "low"),
            ("M", "eng", "high"),
        ]);

        let prediction = classifier.predict(&data).unwrap();
        assert!(prediction.decisions.iter().all(|d| !d.is_accept()));
        assert!(matches!(prediction.decisions[0], Decision::UnfairnessReject { .. }));
        assert!(matches!(prediction.decisions[1], Decision::UnfairnessReject { .. }));
        assert!(matches!(prediction.decisions[2], Decision::UncertaintyReject { .. }));
    }

    #[test]
    fn test_predict_is_deterministic() {
        let classifier = classifier_with_state(fitted_state(RejectThresholds {
            unfair_certain: Some(0.9),
            fair_uncertain: Some(0.5),
        }));
        let data = test_dataset(&[
            ("F", "clerk", "low"),
            ("F", "eng", "low"),
            ("M", "eng", "high"),
            ("M", "clerk", "high"),
        ]);

        let first = classifier.predict(&data).unwrap();
        let second = classifier.predict(&data).unwrap();
        assert_eq!(first, second);
    }
}
