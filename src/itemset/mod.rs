//! Protected itemsets
//!
//! A protected itemset is a conjunction of sensitive-attribute constraints
//! identifying a demographic subgroup, e.g. `sex=Female AND race=White`.
//! The generator enumerates one itemset per combination of observed values
//! over every non-empty subset of the sensitive attributes.

use crate::dataset::Frame;
use crate::error::{Result, VetoError};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Immutable conjunction of sensitive-attribute constraints.
///
/// Equality and hashing are defined over the attribute→value mapping, so two
/// itemsets built from the same constraints compare equal regardless of
/// construction order. The `items` form renders each constraint as an
/// `attribute=value` string for set algebra; both forms are derived from the
/// same mapping and cannot drift apart.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ProtectedItemset {
    values: BTreeMap<String, String>,
}

impl ProtectedItemset {
    pub fn new(values: BTreeMap<String, String>) -> Self {
        Self { values }
    }

    /// Build from `(attribute, value)` pairs
    pub fn from_pairs<I, S>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (S, S)>,
        S: Into<String>,
    {
        Self {
            values: pairs.into_iter().map(|(k, v)| (k.into(), v.into())).collect(),
        }
    }

    /// The attribute→value mapping
    pub fn values(&self) -> &BTreeMap<String, String> {
        &self.values
    }

    /// Constraint set in `attribute=value` string form
    pub fn items(&self) -> BTreeSet<String> {
        self.values.iter().map(|(k, v)| format!("{k}={v}")).collect()
    }

    /// Names of the constrained attributes
    pub fn attributes(&self) -> Vec<String> {
        self.values.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl std::fmt::Display for ProtectedItemset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let rendered: Vec<String> = self.values.iter().map(|(k, v)| format!("{k}={v}")).collect();
        write!(f, "{}", rendered.join(", "))
    }
}

/// Enumerate every protected itemset observable in the data.
///
/// For each non-empty subset of the sensitive attributes, emits the Cartesian
/// product of the distinct values observed per attribute. The output size is
/// exponential in the number of sensitive attributes, which is acceptable for
/// the small attribute sets (2–4) this is meant for. Some itemsets may cover
/// zero rows of a later dataset; consumers must tolerate empty coverage.
pub fn generate_protected_itemsets(
    frame: &Frame,
    sensitive_attributes: &[String],
) -> Result<Vec<ProtectedItemset>> {
    let mut observed: Vec<(&String, Vec<String>)> = Vec::with_capacity(sensitive_attributes.len());
    for attr in sensitive_attributes {
        let col = frame.column_index(attr).ok_or_else(|| {
            VetoError::SchemaError(format!("sensitive attribute '{attr}' is not a column"))
        })?;
        let values: BTreeSet<String> = frame.rows().iter().map(|row| row[col].clone()).collect();
        observed.push((attr, values.into_iter().collect()));
    }

    let n = observed.len();
    let mut itemsets = Vec::new();

    for size in 1..=n {
        for mask in 1u32..(1 << n) {
            if mask.count_ones() as usize != size {
                continue;
            }
            let subset: Vec<(&String, &[String])> = (0..n)
                .filter(|i| mask & (1 << i) != 0)
                .map(|i| (observed[i].0, observed[i].1.as_slice()))
                .collect();
            append_value_combinations(&subset, &mut itemsets);
        }
    }

    Ok(itemsets)
}

/// Cartesian product over the subset's observed values, via an index odometer
fn append_value_combinations(
    subset: &[(&String, &[String])],
    itemsets: &mut Vec<ProtectedItemset>,
) {
    if subset.iter().any(|(_, values)| values.is_empty()) {
        return;
    }
    let mut cursor = vec![0usize; subset.len()];
    loop {
        let combination: BTreeMap<String, String> = subset
            .iter()
            .zip(cursor.iter())
            .map(|(&(attr, values), &vi)| (attr.clone(), values[vi].clone()))
            .collect();
        itemsets.push(ProtectedItemset::new(combination));

        let mut pos = subset.len();
        loop {
            if pos == 0 {
                return;
            }
            pos -= 1;
            cursor[pos] += 1;
            if cursor[pos] < subset[pos].1.len() {
                break;
            }
            cursor[pos] = 0;
        }
    }
}
