//! Frequent-itemset mining and class-rule extraction
//!
//! Level-wise Apriori over categorical rows. Each row becomes a transaction
//! of `attribute = value` items, including one item for the decision label,
//! and rules are extracted only where the consequent is exactly that decision
//! item.

use crate::dataset::Frame;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// Mining thresholds. Lengths bound the size of the whole itemset
/// (antecedent plus consequent).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct AprioriParams {
    pub min_support: f64,
    pub min_confidence: f64,
    pub min_lift: f64,
    pub min_len: usize,
    pub max_len: usize,
}

impl Default for AprioriParams {
    fn default() -> Self {
        Self {
            min_support: 0.01,
            min_confidence: 0.85,
            min_lift: 1.0,
            min_len: 2,
            max_len: 4,
        }
    }
}

/// A rule extracted from the frequent itemsets, before disparity scoring
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MinedRule {
    /// Feature constraints (never contains the decision attribute)
    pub antecedent: BTreeMap<String, String>,
    /// Decision label the rule predicts
    pub consequent_value: String,
    /// Fraction of rows covered by antecedent and consequent together
    pub support: f64,
    /// support(antecedent ∧ consequent) / support(antecedent)
    pub confidence: f64,
    /// confidence / support(consequent)
    pub lift: f64,
}

/// Mine class-association rules from a categorical frame.
///
/// Every feature column of the frame participates; callers drop columns they
/// want excluded (e.g. sensitive attributes) beforehand. Returns rules whose
/// single-item consequent is `decision = label`, ordered deterministically.
pub fn mine_class_rules(
    frame: &Frame,
    decision_attribute: &str,
    params: &AprioriParams,
) -> Vec<MinedRule> {
    let n = frame.len();
    if n == 0 || params.max_len < params.min_len || params.min_len < 2 {
        return Vec::new();
    }

    // Intern items as dense ids; ids are assigned in scan order so the whole
    // mining pass is deterministic for a given row order.
    let mut item_ids: HashMap<(String, String), u32> = HashMap::new();
    let mut items: Vec<(String, String)> = Vec::new();

    let mut transactions: Vec<Vec<u32>> = Vec::with_capacity(n);
    for i in 0..n {
        let mut tx: Vec<u32> = frame
            .columns()
            .iter()
            .zip(frame.row(i))
            .map(|(attr, value)| intern(&mut item_ids, &mut items, attr, value))
            .collect();
        tx.push(intern(&mut item_ids, &mut items, decision_attribute, frame.label(i)));
        tx.sort_unstable();
        transactions.push(tx);
    }

    let min_count = (params.min_support * n as f64).ceil().max(1.0) as usize;

    // Level 1
    let mut level: BTreeMap<Vec<u32>, usize> = BTreeMap::new();
    for tx in &transactions {
        for &id in tx {
            *level.entry(vec![id]).or_insert(0) += 1;
        }
    }
    level.retain(|_, &mut count| count >= min_count);

    let mut frequent: Vec<BTreeMap<Vec<u32>, usize>> = vec![level];

    for _ in 2..=params.max_len {
        let previous = frequent.last().expect("at least one level");
        let candidates = join_candidates(previous);
        if candidates.is_empty() {
            break;
        }

        let mut counts: BTreeMap<Vec<u32>, usize> = BTreeMap::new();
        for tx in &transactions {
            for candidate in &candidates {
                if is_contained(candidate, tx) {
                    *counts.entry(candidate.clone()).or_insert(0) += 1;
                }
            }
        }
        counts.retain(|_, &mut count| count >= min_count);
        if counts.is_empty() {
            break;
        }
        frequent.push(counts);
    }

    let is_decision = |id: u32| items[id as usize].0 == decision_attribute;

    let mut rules = Vec::new();
    for size in params.min_len..=params.max_len {
        let Some(level) = frequent.get(size - 1) else { break };
        for (itemset, &count) in level {
            let decision_items: Vec<u32> =
                itemset.iter().copied().filter(|&id| is_decision(id)).collect();
            if decision_items.len() != 1 {
                continue;
            }
            let consequent = decision_items[0];
            let antecedent: Vec<u32> =
                itemset.iter().copied().filter(|&id| id != consequent).collect();

            let antecedent_count = frequent[antecedent.len() - 1]
                .get(&antecedent)
                .copied()
                .unwrap_or(0);
            if antecedent_count == 0 {
                continue;
            }
            let consequent_count = frequent[0].get(&vec![consequent]).copied().unwrap_or(0);
            if consequent_count == 0 {
                continue;
            }

            let support = count as f64 / n as f64;
            let confidence = count as f64 / antecedent_count as f64;
            let lift = confidence / (consequent_count as f64 / n as f64);
            if confidence < params.min_confidence || lift < params.min_lift {
                continue;
            }

            rules.push(MinedRule {
                antecedent: antecedent
                    .iter()
                    .map(|&id| items[id as usize].clone())
                    .collect(),
                consequent_value: items[consequent as usize].1.clone(),
                support,
                confidence,
                lift,
            });
        }
    }
    rules
}

/// Dense id for an `(attribute, value)` item, assigned on first sight
fn intern(
    item_ids: &mut HashMap<(String, String), u32>,
    items: &mut Vec<(String, String)>,
    attr: &str,
    value: &str,
) -> u32 {
    let key = (attr.to_string(), value.to_string());
    if let Some(&id) = item_ids.get(&key) {
        return id;
    }
    let id = items.len() as u32;
    items.push(key.clone());
    item_ids.insert(key, id);
    id
}

/// Join (k−1)-itemsets sharing a common prefix into k-candidates, pruning
/// candidates with an infrequent subset
fn join_candidates(previous: &BTreeMap<Vec<u32>, usize>) -> Vec<Vec<u32>> {
    let keys: Vec<&Vec<u32>> = previous.keys().collect();
    let mut candidates = Vec::new();

    for i in 0..keys.len() {
        for j in (i + 1)..keys.len() {
            let (a, b) = (keys[i], keys[j]);
            let prefix = a.len() - 1;
            if a[..prefix] != b[..prefix] {
                // keys are sorted, so no later b shares this prefix either
                break;
            }
            let mut candidate = a.clone();
            candidate.push(b[prefix]);

            let all_subsets_frequent = (0..candidate.len()).all(|skip| {
                let subset: Vec<u32> = candidate
                    .iter()
                    .enumerate()
                    .filter(|&(idx, _)| idx != skip)
                    .map(|(_, &id)| id)
                    .collect();
                previous.contains_key(&subset)
            });
            if all_subsets_frequent {
                candidates.push(candidate);
            }
        }
    }
    candidates
}

/// Sorted-subset containment via two pointers
fn is_contained(subset: &[u32], transaction: &[u32]) -> bool {
    let mut ti = 0;
    for &item in subset {
        while ti < transaction.len() && transaction[ti] < item {
            ti += 1;
        }
        if ti >= transaction.len() || transaction[ti] != item {
            return false;
        }
        ti += 1;
    }
    true
}
