//! Veto - fairness-aware selective classification
//!
//! Wraps an opaque binary classifier with a reject option: subgroups likely
//! subject to algorithmic discrimination are detected through statistical
//! rule mining, discrimination is verified per instance through situation
//! testing, and each prediction is then accepted, flipped or deferred to a
//! human within a global coverage budget.
//!
//! # Modules
//!
//! - [`dataset`] - Categorical row store, schema metadata, seeded splits
//! - [`classifier`] - Black-box model contract and built-in categorical models
//! - [`itemset`] - Protected itemsets and their generator
//! - [`rules`] - Rule mining, disparity statistics and rule reduction
//! - [`situation`] - Nearest-neighbor situation testing
//! - [`calibration`] - Reject-threshold calibration
//! - [`engine`] - The end-to-end selective classifier

// Core error handling
pub mod error;

// Data boundary
pub mod classifier;
pub mod dataset;

// Decision pipeline
pub mod calibration;
pub mod engine;
pub mod itemset;
pub mod rules;
pub mod situation;

pub use error::{Result, VetoError};

/// Re-export commonly used types
pub mod prelude {
    // Error handling
    pub use crate::error::{Result, VetoError};

    // Data handling
    pub use crate::dataset::{overlap_distance, Dataset, DatasetSchema, DistanceFn, Frame};

    // Black-box models
    pub use crate::classifier::{
        BlackBoxModel, CategoricalKnn, CategoricalNaiveBayes, MajorityClass, ModelKind,
    };

    // Subgroups and rules
    pub use crate::itemset::{generate_protected_itemsets, ProtectedItemset};
    pub use crate::rules::{AprioriParams, Rule, RuleSet};

    // Situation testing
    pub use crate::situation::{SituationTestResult, SituationTester};

    // Threshold calibration
    pub use crate::calibration::{RejectThresholds, ThresholdCalibrator};

    // Engine
    pub use crate::engine::{Decision, Prediction, RejectConfig, RejectOptionClassifier};
}
