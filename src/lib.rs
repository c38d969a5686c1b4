//! # choiceleaf
//!
//! A multinomial logit (MNL) discrete-choice estimator packaged as a leaf
//! model for recursive-partitioning tree builders. The builder repeatedly
//! asks "fit on this subset, then score it"; this crate supplies the fit
//! (choice-set indexing, design construction, Newton maximum-likelihood
//! search) and the scoring, prediction and split-comparison operations of
//! the leaf-model contract.
//!
//! Estimation is pure computation per call: no shared mutable state, no
//! background work, and every failure mode — malformed choice sets, unknown
//! covariates, non-convergence, singular information — comes back as an
//! explicit error value so the caller can treat a failed candidate split as
//! routine.

pub mod choice_set;
pub mod data;
pub mod design;
pub mod estimate;
pub mod leaf;
pub mod likelihood;
pub mod model;

pub use choice_set::{ChoiceSet, ChoiceSetIndex};
pub use data::{AltId, ChoiceSetViolation, CovariateSpec, DataError, GroupId, ObservationRow};
pub use design::{GroupDesign, ModelLayout, build_designs};
pub use estimate::{FitError, FitOptions, fit};
pub use leaf::{
    GroupPrediction, LeafModel, MnlLeafModel, SplitComparison, chosen_alternatives_diverse,
    error_vector, merge, predict, score,
};
pub use model::{FitDiagnostics, FitStatus, FittedModel};
