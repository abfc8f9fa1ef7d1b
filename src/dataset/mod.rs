//! Dataset handling
//!
//! Categorical row store with the metadata the decision pipeline needs:
//! the decision attribute with its desirable/undesirable labels, the
//! sensitive attributes, the reference-group list and a caller-supplied
//! distance function over raw feature vectors. Frames are ingested from
//! polars `DataFrame`s or CSV files and split deterministically.

use crate::error::{Result, VetoError};
use polars::prelude::*;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::File;
use std::sync::Arc;

/// Distance between two raw feature vectors (dataset column order,
/// decision attribute excluded). Must be symmetric and non-negative.
pub type DistanceFn = Arc<dyn Fn(&[String], &[String]) -> f64 + Send + Sync>;

/// Fraction of positions on which two rows disagree.
///
/// Convenience metric for purely categorical data; callers with ordinal
/// attributes will usually supply their own function instead.
pub fn overlap_distance() -> DistanceFn {
    Arc::new(|a: &[String], b: &[String]| {
        if a.is_empty() {
            return 0.0;
        }
        let differing = a.iter().zip(b.iter()).filter(|(x, y)| x != y).count();
        differing as f64 / a.len() as f64
    })
}

/// Decision/sensitive-attribute metadata attached to a dataset
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatasetSchema {
    /// Name of the decision attribute (the classification target)
    pub decision_attribute: String,
    /// Label value considered the favorable outcome
    pub desirable_label: String,
    /// Label value considered the unfavorable outcome
    pub undesirable_label: String,
    /// Names of the protected/sensitive attributes
    pub sensitive_attributes: Vec<String>,
    /// Demographic groups treated as the reference during situation testing,
    /// each an exact-match conjunction over sensitive attributes
    pub reference_groups: Vec<BTreeMap<String, String>>,
}

/// Row-major categorical feature store with the decision labels held apart
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Frame {
    columns: Vec<String>,
    rows: Vec<Vec<String>>,
    labels: Vec<String>,
}

impl Frame {
    /// Build a frame from feature columns, rows and decision labels
    pub fn new(columns: Vec<String>, rows: Vec<Vec<String>>, labels: Vec<String>) -> Result<Self> {
        if rows.len() != labels.len() {
            return Err(VetoError::DataError(format!(
                "{} rows but {} labels",
                rows.len(),
                labels.len()
            )));
        }
        if let Some(row) = rows.iter().find(|r| r.len() != columns.len()) {
            return Err(VetoError::DataError(format!(
                "row has {} values, expected {}",
                row.len(),
                columns.len()
            )));
        }
        Ok(Self { columns, rows, labels })
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Feature column names (decision attribute excluded)
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    pub fn row(&self, index: usize) -> &[String] {
        &self.rows[index]
    }

    pub fn rows(&self) -> &[Vec<String>] {
        &self.rows
    }

    pub fn label(&self, index: usize) -> &str {
        &self.labels[index]
    }

    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    /// The row's attribute→value mapping (features only)
    pub fn instance(&self, index: usize) -> BTreeMap<String, String> {
        self.columns
            .iter()
            .cloned()
            .zip(self.rows[index].iter().cloned())
            .collect()
    }

    /// Indices of rows satisfying every `attribute = value` constraint
    pub fn matching_indices(&self, constraints: &BTreeMap<String, String>) -> Result<Vec<usize>> {
        let resolved: Vec<(usize, &String)> = constraints
            .iter()
            .map(|(attr, value)| {
                self.column_index(attr)
                    .map(|idx| (idx, value))
                    .ok_or_else(|| VetoError::SchemaError(format!("unknown column '{attr}'")))
            })
            .collect::<Result<_>>()?;

        Ok((0..self.rows.len())
            .filter(|&i| resolved.iter().all(|&(col, value)| &self.rows[i][col] == value))
            .collect())
    }

    /// Whether a single row satisfies every constraint; unknown columns never match
    pub fn row_matches(&self, index: usize, constraints: &BTreeMap<String, String>) -> bool {
        constraints.iter().all(|(attr, value)| {
            self.column_index(attr)
                .map(|col| &self.rows[index][col] == value)
                .unwrap_or(false)
        })
    }

    /// New frame holding only the given rows, in the given order
    pub fn select(&self, indices: &[usize]) -> Frame {
        Frame {
            columns: self.columns.clone(),
            rows: indices.iter().map(|&i| self.rows[i].clone()).collect(),
            labels: indices.iter().map(|&i| self.labels[i].clone()).collect(),
        }
    }

    /// New frame with the decision labels replaced (e.g. by model predictions)
    pub fn with_labels(&self, labels: Vec<String>) -> Result<Frame> {
        if labels.len() != self.rows.len() {
            return Err(VetoError::DataError(format!(
                "{} replacement labels for {} rows",
                labels.len(),
                self.rows.len()
            )));
        }
        Ok(Frame {
            columns: self.columns.clone(),
            rows: self.rows.clone(),
            labels,
        })
    }

    /// New frame without the named feature columns
    pub fn without_columns(&self, names: &[String]) -> Frame {
        let keep: Vec<usize> = (0..self.columns.len())
            .filter(|&i| !names.contains(&self.columns[i]))
            .collect();
        Frame {
            columns: keep.iter().map(|&i| self.columns[i].clone()).collect(),
            rows: self
                .rows
                .iter()
                .map(|row| keep.iter().map(|&i| row[i].clone()).collect())
                .collect(),
            labels: self.labels.clone(),
        }
    }
}

/// A categorical dataset: frame + schema + distance function
#[derive(Clone)]
pub struct Dataset {
    frame: Frame,
    schema: DatasetSchema,
    distance: DistanceFn,
}

impl std::fmt::Debug for Dataset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dataset")
            .field("rows", &self.frame.len())
            .field("columns", &self.frame.columns())
            .field("schema", &self.schema)
            .finish()
    }
}

impl Dataset {
    /// Build a dataset from an already-assembled frame
    pub fn from_frame(frame: Frame, schema: DatasetSchema, distance: DistanceFn) -> Result<Self> {
        for attr in &schema.sensitive_attributes {
            if frame.column_index(attr).is_none() {
                return Err(VetoError::SchemaError(format!(
                    "sensitive attribute '{attr}' is not a column"
                )));
            }
        }
        for group in &schema.reference_groups {
            for attr in group.keys() {
                if frame.column_index(attr).is_none() {
                    return Err(VetoError::SchemaError(format!(
                        "reference-group attribute '{attr}' is not a column"
                    )));
                }
            }
        }
        if let Some(label) = frame
            .labels()
            .iter()
            .find(|l| **l != schema.desirable_label && **l != schema.undesirable_label)
        {
            return Err(VetoError::DataError(format!(
                "decision label '{label}' is neither '{}' nor '{}'",
                schema.desirable_label, schema.undesirable_label
            )));
        }
        Ok(Self { frame, schema, distance })
    }

    /// Build a dataset from a polars frame; every column must be a string
    /// column and the decision attribute must be present.
    pub fn from_dataframe(df: &DataFrame, schema: DatasetSchema, distance: DistanceFn) -> Result<Self> {
        let mut columns = Vec::new();
        let mut column_values: Vec<Vec<String>> = Vec::new();
        let mut labels: Option<Vec<String>> = None;

        for series in df.get_columns() {
            let name = series.name().to_string();
            let ca = series.str().map_err(|_| {
                VetoError::SchemaError(format!("column '{name}' must be a string column"))
            })?;
            let values: Vec<String> = ca
                .into_iter()
                .enumerate()
                .map(|(i, v)| {
                    v.map(str::to_string).ok_or_else(|| {
                        VetoError::DataError(format!("null value in column '{name}' at row {i}"))
                    })
                })
                .collect::<Result<_>>()?;

            if name == schema.decision_attribute {
                labels = Some(values);
            } else {
                columns.push(name);
                column_values.push(values);
            }
        }

        let labels = labels.ok_or_else(|| {
            VetoError::SchemaError(format!(
                "decision attribute '{}' is not a column",
                schema.decision_attribute
            ))
        })?;

        let n = labels.len();
        let rows: Vec<Vec<String>> = (0..n)
            .map(|i| column_values.iter().map(|col| col[i].clone()).collect())
            .collect();

        Self::from_frame(Frame::new(columns, rows, labels)?, schema, distance)
    }

    /// Load a CSV file with all columns read as strings
    pub fn from_csv(path: &str, schema: DatasetSchema, distance: DistanceFn) -> Result<Self> {
        let file = File::open(path).map_err(|e| VetoError::DataError(e.to_string()))?;

        let df = CsvReadOptions::default()
            .with_has_header(true)
            .with_infer_schema_length(Some(0))
            .into_reader_with_file_handle(file)
            .finish()?;

        Self::from_dataframe(&df, schema, distance)
    }

    pub fn len(&self) -> usize {
        self.frame.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frame.is_empty()
    }

    pub fn frame(&self) -> &Frame {
        &self.frame
    }

    pub fn schema(&self) -> &DatasetSchema {
        &self.schema
    }

    pub fn distance(&self) -> DistanceFn {
        Arc::clone(&self.distance)
    }

    /// Deterministic split into (rest, held-out) partitions. The held-out
    /// partition gets exactly `held_out` rows; the union of both partitions
    /// is the input row set.
    pub fn split(&self, held_out: usize, seed: u64) -> Result<(Dataset, Dataset)> {
        let n = self.frame.len();
        if held_out == 0 || held_out >= n {
            return Err(VetoError::DataError(format!(
                "cannot hold out {held_out} of {n} rows"
            )));
        }

        let mut indices: Vec<usize> = (0..n).collect();
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        indices.shuffle(&mut rng);

        let (test_idx, train_idx) = indices.split_at(held_out);
        let train = Dataset {
            frame: self.frame.select(train_idx),
            schema: self.schema.clone(),
            distance: Arc::clone(&self.distance),
        };
        let test = Dataset {
            frame: self.frame.select(test_idx),
            schema: self.schema.clone(),
            distance: Arc::clone(&self.distance),
        };
        Ok((train, test))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use polars::df;

    fn sample_schema() -> DatasetSchema {
        DatasetSchema {
            decision_attribute: "income".to_string(),
            desirable_label: "high".to_string(),
            undesirable_label: "low".to_string(),
            sensitive_attributes: vec!["sex".to_string()],
            reference_groups: vec![BTreeMap::from([("sex".to_string(), "M".to_string())])],
        }
    }

    fn sample_frame() -> Frame {
        Frame::new(
            vec!["sex".to_string(), "job".to_string()],
            vec![
                vec!["M".to_string(), "eng".to_string()],
                vec!["F".to_string(), "eng".to_string()],
                vec!["M".to_string(), "clerk".to_string()],
                vec!["F".to_string(), "clerk".to_string()],
            ],
            vec![
                "high".to_string(),
                "low".to_string(),
                "high".to_string(),
                "low".to_string(),
            ],
        )
        .unwrap()
    }

    #[test]
    fn test_matching_indices() {
        let frame = sample_frame();
        let constraints = BTreeMap::from([("sex".to_string(), "F".to_string())]);
        assert_eq!(frame.matching_indices(&constraints).unwrap(), vec![1, 3]);

        let both = BTreeMap::from([
            ("sex".to_string(), "F".to_string()),
            ("job".to_string(), "clerk".to_string()),
        ]);
        assert_eq!(frame.matching_indices(&both).unwrap(), vec![3]);
    }

    #[test]
    fn test_matching_unknown_column_is_schema_error() {
        let frame = sample_frame();
        let constraints = BTreeMap::from([("planet".to_string(), "earth".to_string())]);
        assert!(matches!(
            frame.matching_indices(&constraints),
            Err(VetoError::SchemaError(_))
        ));
    }

    #[test]
    fn test_without_columns() {
        let frame = sample_frame().without_columns(&["sex".to_string()]);
        assert_eq!(frame.columns(), &["job".to_string()]);
        assert_eq!(frame.row(0), &["eng".to_string()]);
        assert_eq!(frame.label(0), "high");
    }

    #[test]
    fn test_from_dataframe() {
        let df = df!(
            "sex" => &["M", "F", "M"],
            "job" => &["eng", "clerk", "clerk"],
            "income" => &["high", "low", "high"]
        )
        .unwrap();

        let data = Dataset::from_dataframe(&df, sample_schema(), overlap_distance()).unwrap();
        assert_eq!(data.len(), 3);
        assert_eq!(data.frame().columns(), &["sex".to_string(), "job".to_string()]);
        assert_eq!(data.frame().label(1), "low");
    }

    #[test]
    fn test_from_dataframe_rejects_unknown_label() {
        let df = df!(
            "sex" => &["M"],
            "income" => &["medium"]
        )
        .unwrap();

        let result = Dataset::from_dataframe(&df, sample_schema(), overlap_distance());
        assert!(matches!(result, Err(VetoError::DataError(_))));
    }

    #[test]
    fn test_split_is_deterministic_and_partitions() {
        let frame = sample_frame();
        let data = Dataset::from_frame(frame, sample_schema(), overlap_distance()).unwrap();

        let (train_a, test_a) = data.split(2, 42).unwrap();
        let (train_b, test_b) = data.split(2, 42).unwrap();
        assert_eq!(train_a.frame().rows(), train_b.frame().rows());
        assert_eq!(test_a.frame().rows(), test_b.frame().rows());

        assert_eq!(train_a.len() + test_a.len(), data.len());
        let mut all: Vec<Vec<String>> = train_a
            .frame()
            .rows()
            .iter()
            .chain(test_a.frame().rows())
            .cloned()
            .collect();
        all.sort();
        let mut expected: Vec<Vec<String>> = data.frame().rows().to_vec();
        expected.sort();
        assert_eq!(all, expected);
    }

    #[test]
    fn test_split_rejects_degenerate_sizes() {
        let data = Dataset::from_frame(sample_frame(), sample_schema(), overlap_distance()).unwrap();
        assert!(data.split(0, 1).is_err());
        assert!(data.split(4, 1).is_err());
    }

    #[test]
    fn test_overlap_distance() {
        let d = overlap_distance();
        let a = vec!["x".to_string(), "y".to_string()];
        let b = vec!["x".to_string(), "z".to_string()];
        assert_eq!(d(&a, &a), 0.0);
        assert_eq!(d(&a, &b), 0.5);
    }
}
