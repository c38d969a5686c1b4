//! # Model Layout and Design-Matrix Builder
//!
//! Fixes the coefficient layout once per fit and expands each choice set
//! into the per-alternative utility-covariate matrix consumed by the
//! likelihood engine.
//!
//! Layout rules (deterministic; identical input always yields an identical
//! layout):
//! - Alternative-specific covariates come first, one column each, in
//!   specification order. Their coefficients are shared across alternatives.
//! - Each individual-specific covariate is expanded into one interaction
//!   column per non-reference alternative, alternatives in dataset-global
//!   first-appearance order. The reference alternative's block is implicitly
//!   zero — the standard identification constraint.
//!
//! Total coefficient count: `A + I * (J - 1)` for `A` alternative-specific
//! terms, `I` individual-specific terms and `J` universal alternatives.

use crate::choice_set::{ChoiceSet, ChoiceSetIndex};
use crate::data::{AltId, ChoiceSetViolation, CovariateSpec, DataError};
use ndarray::Array2;
use serde::{Deserialize, Serialize};

/// The frozen coefficient layout of one fitted model. Stored inside the
/// fitted model so that prediction and scoring on fresh rows rebuild
/// bit-identical design matrices.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelLayout {
    /// Universal alternatives in dataset-global first-appearance order.
    pub alternatives: Vec<AltId>,
    /// Index into `alternatives` of the reference alternative.
    pub reference_index: usize,
    pub alternative_specific: Vec<String>,
    pub individual_specific: Vec<String>,
    /// Human-readable name per coefficient, aligned with the coefficient
    /// vector. Interaction terms are named `"<covariate>:<alternative>"`.
    pub term_names: Vec<String>,
}

impl ModelLayout {
    /// Builds the layout from an indexed dataset and a covariate
    /// specification. When the specification does not pin a reference
    /// alternative, the first alternative in global first-appearance order
    /// is held out.
    pub fn build(index: &ChoiceSetIndex, spec: &CovariateSpec) -> Result<Self, DataError> {
        if spec.is_empty() {
            return Err(DataError::EmptyCovariateSpec);
        }
        let alternatives = index.universal_alternatives();
        let reference_index = match &spec.reference {
            Some(reference) => alternatives
                .iter()
                .position(|a| a == reference)
                .ok_or_else(|| DataError::UnknownReferenceAlternative(reference.clone()))?,
            None => 0,
        };

        let mut term_names = spec.alternative_specific.clone();
        for name in &spec.individual_specific {
            for (j, alt) in alternatives.iter().enumerate() {
                if j != reference_index {
                    term_names.push(format!("{name}:{alt}"));
                }
            }
        }

        Ok(Self {
            alternatives,
            reference_index,
            alternative_specific: spec.alternative_specific.clone(),
            individual_specific: spec.individual_specific.clone(),
            term_names,
        })
    }

    pub fn num_coefficients(&self) -> usize {
        self.term_names.len()
    }

    pub fn num_alternatives(&self) -> usize {
        self.alternatives.len()
    }

    pub fn reference(&self) -> &AltId {
        &self.alternatives[self.reference_index]
    }

    pub fn alternative_index(&self, alternative: &AltId) -> Option<usize> {
        self.alternatives.iter().position(|a| a == alternative)
    }

    /// Column of the interaction term for individual-specific covariate
    /// `cov_idx` with global alternative `alt_idx`. `None` for the reference
    /// alternative (its block is the implicit zero).
    fn interaction_column(&self, cov_idx: usize, alt_idx: usize) -> Option<usize> {
        if alt_idx == self.reference_index {
            return None;
        }
        let non_ref_pos = if alt_idx < self.reference_index {
            alt_idx
        } else {
            alt_idx - 1
        };
        let block = self.num_alternatives() - 1;
        Some(self.alternative_specific.len() + cov_idx * block + non_ref_pos)
    }
}

/// One group's slice of the design: a `J_g x p` matrix with one row per
/// alternative present in the group, aligned with the group's alternative
/// order.
#[derive(Debug, Clone)]
pub struct GroupDesign {
    pub x: Array2<f64>,
    pub chosen_index: usize,
    pub weight: f64,
}

/// Expands every choice set into its design matrix. Fails when a
/// specification-named covariate is missing or non-finite, when an
/// individual-specific covariate varies within a group, or when a group
/// contains an alternative the layout has never seen (held-out data only;
/// during fitting the layout is built from the same index).
pub fn build_designs(
    index: &ChoiceSetIndex,
    layout: &ModelLayout,
) -> Result<Vec<GroupDesign>, DataError> {
    index
        .sets()
        .iter()
        .map(|set| build_group_design(set, layout))
        .collect()
}

fn build_group_design(set: &ChoiceSet, layout: &ModelLayout) -> Result<GroupDesign, DataError> {
    let p = layout.num_coefficients();
    let mut x = Array2::zeros((set.rows.len(), p));

    // Individual-specific values are read once and checked for consistency
    // across the group's rows.
    let mut individual_values = Vec::with_capacity(layout.individual_specific.len());
    for name in &layout.individual_specific {
        let first = covariate(set, 0, name)?;
        for i in 1..set.rows.len() {
            if covariate(set, i, name)? != first {
                return Err(DataError::MalformedChoiceSet {
                    group: set.group.clone(),
                    violation: ChoiceSetViolation::InconsistentIndividualCovariate(name.clone()),
                });
            }
        }
        individual_values.push(first);
    }

    for (i, row) in set.rows.iter().enumerate() {
        let alt_idx = layout.alternative_index(&row.alternative).ok_or_else(|| {
            DataError::UnknownAlternative {
                alternative: row.alternative.clone(),
                group: set.group.clone(),
            }
        })?;
        for (k, name) in layout.alternative_specific.iter().enumerate() {
            x[[i, k]] = covariate(set, i, name)?;
        }
        for (ci, value) in individual_values.iter().enumerate() {
            if let Some(col) = layout.interaction_column(ci, alt_idx) {
                x[[i, col]] = *value;
            }
        }
    }

    Ok(GroupDesign {
        x,
        chosen_index: set.chosen_index,
        weight: set.weight,
    })
}

fn covariate(set: &ChoiceSet, row_idx: usize, name: &str) -> Result<f64, DataError> {
    let row = &set.rows[row_idx];
    let value = row
        .covariate_value(name)
        .ok_or_else(|| DataError::UnknownCovariate {
            name: name.to_string(),
            group: set.group.clone(),
        })?;
    if !value.is_finite() {
        return Err(DataError::NonFiniteCovariate {
            name: name.to_string(),
            group: set.group.clone(),
        });
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::ObservationRow as Row;

    fn three_alt_rows() -> Vec<Row> {
        vec![
            Row::new("g1", "car", true)
                .covariate("price", 1.0)
                .covariate("age", 40.0),
            Row::new("g1", "bus", false)
                .covariate("price", 0.5)
                .covariate("age", 40.0),
            Row::new("g1", "train", false)
                .covariate("price", 0.8)
                .covariate("age", 40.0),
            Row::new("g2", "bus", false)
                .covariate("price", 0.6)
                .covariate("age", 25.0),
            Row::new("g2", "car", true)
                .covariate("price", 1.2)
                .covariate("age", 25.0),
        ]
    }

    #[test]
    fn layout_dimensions_and_term_order() {
        let rows = three_alt_rows();
        let index = ChoiceSetIndex::from_rows(&rows).unwrap();
        let spec = CovariateSpec::new(["price"], ["age"]);
        let layout = ModelLayout::build(&index, &spec).unwrap();

        // J = 3, A = 1, I = 1 -> p = 1 + 1 * 2 = 3.
        assert_eq!(layout.num_coefficients(), 3);
        assert_eq!(layout.reference().as_str(), "car");
        assert_eq!(layout.term_names, vec!["price", "age:bus", "age:train"]);
    }

    #[test]
    fn explicit_reference_is_honoured() {
        let rows = three_alt_rows();
        let index = ChoiceSetIndex::from_rows(&rows).unwrap();
        let spec = CovariateSpec::new(["price"], ["age"]).with_reference("train");
        let layout = ModelLayout::build(&index, &spec).unwrap();
        assert_eq!(layout.reference().as_str(), "train");
        assert_eq!(layout.term_names, vec!["price", "age:car", "age:bus"]);
    }

    #[test]
    fn unknown_reference_is_an_error() {
        let rows = three_alt_rows();
        let index = ChoiceSetIndex::from_rows(&rows).unwrap();
        let spec = CovariateSpec::new(["price"], Vec::<String>::new()).with_reference("plane");
        assert!(matches!(
            ModelLayout::build(&index, &spec),
            Err(DataError::UnknownReferenceAlternative(_))
        ));
    }

    #[test]
    fn design_places_interactions_and_zeroes_reference_block() {
        let rows = three_alt_rows();
        let index = ChoiceSetIndex::from_rows(&rows).unwrap();
        let spec = CovariateSpec::new(["price"], ["age"]);
        let layout = ModelLayout::build(&index, &spec).unwrap();
        let designs = build_designs(&index, &layout).unwrap();

        // Group g1: rows car, bus, train. Reference is car.
        let x = &designs[0].x;
        assert_eq!(x.shape(), &[3, 3]);
        // car row: price only, zero interaction block.
        assert_eq!(x.row(0).to_vec(), vec![1.0, 0.0, 0.0]);
        // bus row: price 0.5, age in the bus column.
        assert_eq!(x.row(1).to_vec(), vec![0.5, 40.0, 0.0]);
        // train row: price 0.8, age in the train column.
        assert_eq!(x.row(2).to_vec(), vec![0.8, 0.0, 40.0]);

        // Group g2 only has bus and car; absent train contributes no row.
        let x2 = &designs[1].x;
        assert_eq!(x2.shape(), &[2, 3]);
        assert_eq!(x2.row(0).to_vec(), vec![0.6, 25.0, 0.0]);
        assert_eq!(x2.row(1).to_vec(), vec![1.2, 0.0, 0.0]);
        assert_eq!(designs[1].chosen_index, 1);
    }

    #[test]
    fn missing_covariate_is_reported_with_group() {
        let rows = vec![
            Row::new("g", "a", true).covariate("price", 1.0),
            Row::new("g", "b", false),
        ];
        let index = ChoiceSetIndex::from_rows(&rows).unwrap();
        let spec = CovariateSpec::new(["price"], Vec::<String>::new());
        let layout = ModelLayout::build(&index, &spec).unwrap();
        match build_designs(&index, &layout) {
            Err(DataError::UnknownCovariate { name, group }) => {
                assert_eq!(name, "price");
                assert_eq!(group, "g");
            }
            other => panic!("expected UnknownCovariate, got {other:?}"),
        }
    }

    #[test]
    fn non_finite_covariate_is_rejected() {
        let rows = vec![
            Row::new("g", "a", true).covariate("price", f64::NAN),
            Row::new("g", "b", false).covariate("price", 1.0),
        ];
        let index = ChoiceSetIndex::from_rows(&rows).unwrap();
        let spec = CovariateSpec::new(["price"], Vec::<String>::new());
        let layout = ModelLayout::build(&index, &spec).unwrap();
        assert!(matches!(
            build_designs(&index, &layout),
            Err(DataError::NonFiniteCovariate { .. })
        ));
    }

    #[test]
    fn inconsistent_individual_covariate_is_rejected() {
        let rows = vec![
            Row::new("g", "a", true).covariate("age", 30.0),
            Row::new("g", "b", false).covariate("age", 31.0),
        ];
        let index = ChoiceSetIndex::from_rows(&rows).unwrap();
        let spec = CovariateSpec::new(Vec::<String>::new(), ["age"]);
        let layout = ModelLayout::build(&index, &spec).unwrap();
        assert!(matches!(
            build_designs(&index, &layout),
            Err(DataError::MalformedChoiceSet {
                violation: ChoiceSetViolation::InconsistentIndividualCovariate(_),
                ..
            })
        ));
    }

    #[test]
    fn layout_is_independent_of_row_arrival_order() {
        let mut rows = three_alt_rows();
        let spec = CovariateSpec::new(["price"], ["age"]).with_reference("car");
        let index_a = ChoiceSetIndex::from_rows(&rows).unwrap();
        let layout_a = ModelLayout::build(&index_a, &spec).unwrap();

        rows.reverse();
        let index_b = ChoiceSetIndex::from_rows(&rows).unwrap();
        let layout_b = ModelLayout::build(&index_b, &spec).unwrap();

        // Alternative first-appearance order changes, but term naming stays
        // consistent per (covariate, alternative) pair.
        let mut names_a = layout_a.term_names.clone();
        let mut names_b = layout_b.term_names.clone();
        names_a.sort();
        names_b.sort();
        assert_eq!(names_a, names_b);
    }
}
