//! Situation testing
//!
//! Individual-level discrimination check: compare the positive-decision
//! ratio among an instance's k nearest neighbors drawn from the reference
//! group against the ratio among its k nearest neighbors drawn from the
//! rest of the population. A large gap marks the instance as discriminated.

use crate::dataset::{DistanceFn, Frame};
use crate::error::{Result, VetoError};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::collections::BTreeMap;

/// Outcome of the situation test for one instance.
///
/// Neighbor indices point into the tester's fitted reference and
/// non-reference partitions; they exist for explanation only and play no
/// part in the decision logic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SituationTestResult {
    /// ratio(reference neighbors) − ratio(non-reference neighbors)
    pub score: f64,
    /// score > t
    pub discriminated: bool,
    pub reference_neighbors: Vec<usize>,
    pub non_reference_neighbors: Vec<usize>,
}

impl std::fmt::Display for SituationTestResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Disc Score: {:.2}", self.score)?;
        write!(f, "\nClosest neighbours from reference group: {:?}", self.reference_neighbors)?;
        write!(
            f,
            "\nClosest neighbours from non reference groups: {:?}",
            self.non_reference_neighbors
        )
    }
}

/// Nearest-neighbor discrimination tester.
///
/// `fit` partitions the given rows into reference and non-reference groups
/// and retains both for the lifetime of the tester; `predict` runs the
/// neighbor comparison for each input row against those partitions.
pub struct SituationTester {
    k: usize,
    t: f64,
    desirable_label: String,
    reference_groups: Vec<BTreeMap<String, String>>,
    distance: DistanceFn,
    reference: Option<Frame>,
    non_reference: Option<Frame>,
}

impl SituationTester {
    pub fn new(
        k: usize,
        t: f64,
        reference_groups: Vec<BTreeMap<String, String>>,
        desirable_label: String,
        distance: DistanceFn,
    ) -> Self {
        Self {
            k,
            t,
            desirable_label,
            reference_groups,
            distance,
            reference: None,
            non_reference: None,
        }
    }

    /// Partition `frame` into reference and non-reference rows.
    ///
    /// A row belongs to the reference partition when it matches any itemset
    /// in the reference-group list. Both partitions must end up non-empty,
    /// otherwise neighbor ratios cannot be formed.
    pub fn fit(&mut self, frame: &Frame) -> Result<()> {
        let mut is_reference = vec![false; frame.len()];
        for group in &self.reference_groups {
            for i in 0..frame.len() {
                if !is_reference[i] && frame.row_matches(i, group) {
                    is_reference[i] = true;
                }
            }
        }

        let reference_idx: Vec<usize> =
            (0..frame.len()).filter(|&i| is_reference[i]).collect();
        let non_reference_idx: Vec<usize> =
            (0..frame.len()).filter(|&i| !is_reference[i]).collect();

        if reference_idx.is_empty() {
            return Err(VetoError::DataError(
                "no rows match any reference group".to_string(),
            ));
        }
        if non_reference_idx.is_empty() {
            return Err(VetoError::DataError(
                "every row matches a reference group; no comparison group left".to_string(),
            ));
        }

        self.reference = Some(frame.select(&reference_idx));
        self.non_reference = Some(frame.select(&non_reference_idx));
        Ok(())
    }

    /// Run the situation test for every row of `frame`.
    ///
    /// Rows are processed in parallel; the fitted partitions are only read.
    pub fn predict(&self, frame: &Frame) -> Result<Vec<SituationTestResult>> {
        let reference = self.reference.as_ref().ok_or(VetoError::ModelNotFitted)?;
        let non_reference = self.non_reference.as_ref().ok_or(VetoError::ModelNotFitted)?;

        let results = (0..frame.len())
            .into_par_iter()
            .map(|i| {
                let row = frame.row(i);
                let reference_neighbors = self.k_nearest(row, reference);
                let non_reference_neighbors = self.k_nearest(row, non_reference);

                let score = self.positive_decision_ratio(reference, &reference_neighbors)
                    - self.positive_decision_ratio(non_reference, &non_reference_neighbors);

                SituationTestResult {
                    score,
                    discriminated: score > self.t,
                    reference_neighbors,
                    non_reference_neighbors,
                }
            })
            .collect();

        Ok(results)
    }

    /// Indices of the k nearest partition rows, ordered by (distance, index).
    ///
    /// Returns fewer than k indices only when the partition is smaller than
    /// k. Ties on distance resolve to the lower row index, so the result is
    /// deterministic.
    fn k_nearest(&self, row: &[String], partition: &Frame) -> Vec<usize> {
        let mut heap: BinaryHeap<DistIdx> = BinaryHeap::with_capacity(self.k + 1);
        for (idx, candidate) in partition.rows().iter().enumerate() {
            let entry = DistIdx {
                distance: (self.distance)(row, candidate),
                index: idx,
            };
            if heap.len() < self.k {
                heap.push(entry);
            } else if let Some(top) = heap.peek() {
                if entry.cmp(top) == Ordering::Less {
                    heap.pop();
                    heap.push(entry);
                }
            }
        }
        let mut nearest: Vec<DistIdx> = heap.into_vec();
        nearest.sort();
        nearest.into_iter().map(|e| e.index).collect()
    }

    fn positive_decision_ratio(&self, partition: &Frame, neighbors: &[usize]) -> f64 {
        if neighbors.is_empty() {
            return 0.0;
        }
        let positive = neighbors
            .iter()
            .filter(|&&i| partition.label(i) == self.desirable_label)
            .count();
        positive as f64 / neighbors.len() as f64
    }
}

/// Max-heap entry ordered by (distance, partition index)
#[derive(PartialEq)]
struct DistIdx {
    distance: f64,
    index: usize,
}

impl Eq for DistIdx {}

impl PartialOrd for DistIdx {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for DistIdx {
    fn cmp(&self, other: &Self) -> Ordering {
        self.distance
            .partial_cmp(&other.distance)
            .unwrap_or(Ordering::Equal)
            .then(self.index.cmp(&other.index))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::overlap_distance;

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

    fn reference_male() -> Vec<BTreeMap<String, String>> {
        vec![BTreeMap::from([("sex".to_string(), "M".to_string())])]
    }

    fn tester(k: usize, t: f64) -> SituationTester {
        SituationTester::new(
            k,
            t,
            reference_male(),
            "high".to_string(),
            overlap_distance(),
        )
    }

    #[test]
    fn test_perfect_discrimination_scores_one() {
        // reference group always receives the desirable label, the
        // non-reference group never does
        let data = frame(&[
            ("M", "clerk", "high"),
            ("M", "eng", "high"),
            ("M", "clerk", "high"),
            ("F", "clerk", "low"),
            ("F", "eng", "low"),
            ("F", "clerk", "low"),
        ]);
        let mut st = tester(2, 0.2);
        st.fit(&data).unwrap();

        let targets = frame(&[("F", "clerk", "low"), ("F", "eng", "low")]);
        let results = st.predict(&targets).unwrap();
        for result in &results {
            assert!((result.score - 1.0).abs() < 1e-12);
            assert!(result.discriminated);
            assert_eq!(result.reference_neighbors.len(), 2);
            assert_eq!(result.non_reference_neighbors.len(), 2);
        }
    }

    #[test]
    fn test_no_disparity_scores_zero() {
        let data = frame(&[
            ("M", "clerk", "high"),
            ("M", "eng", "low"),
            ("F", "clerk", "high"),
            ("F", "eng", "low"),
        ]);
        let mut st = tester(2, 0.2);
        st.fit(&data).unwrap();

        let targets = frame(&[("F", "clerk", "high")]);
        let results = st.predict(&targets).unwrap();
        assert!((results[0].score).abs() < 1e-12);
        assert!(!results[0].discriminated);
    }

    #[test]
    fn test_small_partition_yields_fewer_neighbors() {
        let data = frame(&[
            ("M", "clerk", "high"),
            ("F", "clerk", "low"),
            ("F", "eng", "low"),
        ]);
        let mut st = tester(5, 0.2);
        st.fit(&data).unwrap();

        let targets = frame(&[("F", "clerk", "low")]);
        let results = st.predict(&targets).unwrap();
        assert_eq!(results[0].reference_neighbors.len(), 1);
        assert_eq!(results[0].non_reference_neighbors.len(), 2);
    }

    #[test]
    fn test_missing_reference_group_is_fatal() {
        let data = frame(&[("F", "clerk", "low"), ("F", "eng", "low")]);
        let mut st = tester(2, 0.2);
        assert!(matches!(st.fit(&data), Err(VetoError::DataError(_))));
    }

    #[test]
    fn test_all_reference_is_fatal() {
        let data = frame(&[("M", "clerk", "high"), ("M", "eng", "high")]);
        let mut st = tester(2, 0.2);
        assert!(matches!(st.fit(&data), Err(VetoError::DataError(_))));
    }

    #[test]
    fn test_predict_before_fit() {
        let st = tester(2, 0.2);
        let data = frame(&[("F", "clerk", "low")]);
        assert!(matches!(st.predict(&data), Err(VetoError::ModelNotFitted)));
    }

    #[test]
    fn test_tie_break_is_deterministic() {
        // all candidates are equidistant; lower indices win
        let data = frame(&[
            ("M", "clerk", "high"),
            ("M", "clerk", "high"),
            ("M", "clerk", "high"),
            ("F", "eng", "low"),
        ]);
        let mut st = tester(2, 0.2);
        st.fit(&data).unwrap();

        let targets = frame(&[("F", "clerk", "low")]);
        let results = st.predict(&targets).unwrap();
        assert_eq!(results[0].reference_neighbors, vec![0, 1]);
    }
}
