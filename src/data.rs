//! # Observation Rows and Covariate Specification
//!
//! This module is the exclusive entry point for caller-provided data. The
//! estimator consumes long-format choice records: one row per
//! (decision-maker, alternative) pair, with exactly one row per decision
//! marked as chosen. Rows are validated against a strict contract at the
//! indexer boundary; malformed rows are rejected with explicit errors,
//! never silently coerced.

use ahash::AHashMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Opaque group (decision occasion) identifier. Hashable; its ordering is
/// never interpreted.
pub type GroupId = String;

/// Opaque alternative identifier. Hashable; its ordering is never
/// interpreted — positional structure comes from first-appearance order.
pub type AltId = String;

/// One long-format observation: a single alternative as seen by a single
/// decision-maker, with its covariate values.
///
/// `weight` is a per-decision case weight. It must be identical on every
/// row of a group, strictly positive and finite; the default is 1.0.
#[derive(Debug, Clone)]
pub struct ObservationRow {
    pub group: GroupId,
    pub alternative: AltId,
    pub chosen: bool,
    pub covariates: AHashMap<String, f64>,
    pub weight: f64,
}

impl ObservationRow {
    pub fn new(
        group: impl Into<GroupId>,
        alternative: impl Into<AltId>,
        chosen: bool,
    ) -> Self {
        Self {
            group: group.into(),
            alternative: alternative.into(),
            chosen,
            covariates: AHashMap::new(),
            weight: 1.0,
        }
    }

    /// Attaches a named covariate value. Builder-style, used heavily in tests
    /// and by callers assembling rows from their own storage.
    pub fn covariate(mut self, name: impl Into<String>, value: f64) -> Self {
        self.covariates.insert(name.into(), value);
        self
    }

    pub fn with_weight(mut self, weight: f64) -> Self {
        self.weight = weight;
        self
    }

    /// Looks up a covariate value by name.
    pub fn covariate_value(&self, name: &str) -> Option<f64> {
        self.covariates.get(name).copied()
    }
}

/// Enumerates the covariate terms of the model, in the order that fixes the
/// coefficient layout. Term ordering follows this specification, never the
/// arrival order of rows, so identical specs always produce identical
/// layouts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CovariateSpec {
    /// Covariates that vary by alternative (e.g. price). One shared
    /// coefficient each.
    pub alternative_specific: Vec<String>,
    /// Covariates constant across alternatives within a group (e.g. age).
    /// Expanded into one interaction coefficient per non-reference
    /// alternative.
    pub individual_specific: Vec<String>,
    /// The alternative whose individual-specific coefficients are pinned to
    /// zero. `None` selects the first alternative in dataset-global
    /// first-appearance order. Callers fitting many overlapping subsets
    /// should pin this explicitly so coefficients stay comparable across
    /// fits.
    pub reference: Option<AltId>,
}

impl CovariateSpec {
    pub fn new(
        alternative_specific: impl IntoIterator<Item = impl Into<String>>,
        individual_specific: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        Self {
            alternative_specific: alternative_specific.into_iter().map(Into::into).collect(),
            individual_specific: individual_specific.into_iter().map(Into::into).collect(),
            reference: None,
        }
    }

    pub fn with_reference(mut self, reference: impl Into<AltId>) -> Self {
        self.reference = Some(reference.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.alternative_specific.is_empty() && self.individual_specific.is_empty()
    }
}

/// The structural ways a single choice set can violate the data contract.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChoiceSetViolation {
    #[error("no alternative is marked chosen")]
    NoChosenAlternative,
    #[error("more than one alternative is marked chosen")]
    MultipleChosenAlternatives,
    #[error("fewer than two alternatives are present")]
    FewerThanTwoAlternatives,
    #[error("alternative '{0}' appears more than once")]
    DuplicateAlternative(AltId),
    #[error("case weight differs between rows of the group")]
    InconsistentWeight,
    #[error("case weight is not strictly positive and finite")]
    InvalidWeight,
    #[error("individual-specific covariate '{0}' differs between rows of the group")]
    InconsistentIndividualCovariate(String),
}

/// Structural data errors, raised at the indexer and design-matrix
/// boundaries. All of them are fatal to the fit call that observed them;
/// none are retried.
#[derive(Debug, Error)]
pub enum DataError {
    #[error("no observation rows were supplied")]
    EmptyInput,

    #[error("the covariate specification names no covariates")]
    EmptyCovariateSpec,

    #[error("malformed choice set for group '{group}': {violation}")]
    MalformedChoiceSet {
        group: GroupId,
        violation: ChoiceSetViolation,
    },

    #[error("covariate '{name}' is missing from a row of group '{group}'")]
    UnknownCovariate { name: String, group: GroupId },

    #[error("covariate '{name}' has a non-finite value in group '{group}'")]
    NonFiniteCovariate { name: String, group: GroupId },

    #[error("reference alternative '{0}' does not appear in the data")]
    UnknownReferenceAlternative(AltId),

    #[error(
        "alternative '{alternative}' in group '{group}' was not present in the training data"
    )]
    UnknownAlternative {
        alternative: AltId,
        group: GroupId,
    },
}
