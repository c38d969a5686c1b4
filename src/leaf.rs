//! # Leaf-Model Adapter
//!
//! The plug-in surface a recursive-partitioning tree builder consumes. The
//! builder depends only on the [`LeafModel`] capability trait — fit a model
//! on a subset, score it on fresh (or the same) rows, query its complexity,
//! print it — and treats every fit failure as routine: reject the candidate
//! split and keep searching.
//!
//! This crate ships exactly one implementation, [`MnlLeafModel`]. Other
//! model families plug in by implementing the same trait; nothing here is a
//! class hierarchy.

use crate::choice_set::ChoiceSetIndex;
use crate::data::{AltId, CovariateSpec, GroupId, ObservationRow};
use crate::design::build_designs;
use crate::estimate::{self, FitError, FitOptions};
use crate::likelihood;
use crate::model::FittedModel;
use ahash::AHashSet;

/// The capability interface between the tree builder and a leaf-model
/// family. All operations are pure with respect to the fitted model; a
/// fitted model is never mutated after creation.
pub trait LeafModel {
    type Fitted;

    /// Fits on the supplied subset. Failures come back as values — the
    /// caller must be able to continue trying other candidate splits.
    fn fit(&self, rows: &[ObservationRow]) -> Result<Self::Fitted, FitError>;

    /// Like [`LeafModel::fit`], warm-started from a previously fitted model
    /// (typically the parent node's). Implementations fall back to a cold
    /// start when the initializer is not compatible.
    fn fit_with_init(
        &self,
        rows: &[ObservationRow],
        init: Option<&Self::Fitted>,
    ) -> Result<Self::Fitted, FitError>;

    /// Log-likelihood of `rows` under the frozen model. Higher is better;
    /// always `<= 0` for valid data.
    fn score(&self, fitted: &Self::Fitted, rows: &[ObservationRow]) -> Result<f64, FitError>;

    /// Per-group, per-alternative choice probabilities for `rows`.
    fn predict(
        &self,
        fitted: &Self::Fitted,
        rows: &[ObservationRow],
    ) -> Result<Vec<GroupPrediction>, FitError>;

    /// Number of free parameters, for the builder's complexity penalties.
    fn num_parameters(&self, fitted: &Self::Fitted) -> usize;

    /// Human-readable fit description for diagnostics and tree traces.
    fn summary(&self, fitted: &Self::Fitted) -> String;
}

/// Choice probabilities for one group, aligned with `alternatives`.
#[derive(Debug, Clone, PartialEq)]
pub struct GroupPrediction {
    pub group: GroupId,
    pub alternatives: Vec<AltId>,
    pub probabilities: Vec<f64>,
}

/// The MNL leaf-model family: a covariate specification plus estimation
/// settings, applied to whatever subset the tree builder supplies. Stateless
/// across calls; safe to share between worker threads fitting disjoint
/// nodes.
#[derive(Debug, Clone)]
pub struct MnlLeafModel {
    spec: CovariateSpec,
    options: FitOptions,
}

impl MnlLeafModel {
    pub fn new(spec: CovariateSpec) -> Self {
        Self {
            spec,
            options: FitOptions::default(),
        }
    }

    pub fn with_options(mut self, options: FitOptions) -> Self {
        self.options = options;
        self
    }

    pub fn spec(&self) -> &CovariateSpec {
        &self.spec
    }
}

impl LeafModel for MnlLeafModel {
    type Fitted = FittedModel;

    fn fit(&self, rows: &[ObservationRow]) -> Result<FittedModel, FitError> {
        estimate::fit(rows, &self.spec, &self.options)
    }

    fn fit_with_init(
        &self,
        rows: &[ObservationRow],
        init: Option<&FittedModel>,
    ) -> Result<FittedModel, FitError> {
        if let Some(previous) = init {
            let warm = FitOptions {
                warm_start: Some(previous.coefficients.clone()),
                ..self.options.clone()
            };
            match estimate::fit(rows, &self.spec, &warm) {
                // Layout changed between fits (an alternative dropped out of
                // the subset); retry cold.
                Err(FitError::WarmStartLength { .. }) => {}
                other => return other,
            }
        }
        estimate::fit(rows, &self.spec, &self.options)
    }

    fn score(&self, fitted: &FittedModel, rows: &[ObservationRow]) -> Result<f64, FitError> {
        score(fitted, rows)
    }

    fn predict(
        &self,
        fitted: &FittedModel,
        rows: &[ObservationRow],
    ) -> Result<Vec<GroupPrediction>, FitError> {
        predict(fitted, rows)
    }

    fn num_parameters(&self, fitted: &FittedModel) -> usize {
        fitted.num_parameters()
    }

    fn summary(&self, fitted: &FittedModel) -> String {
        fitted.summary()
    }
}

/// Log-likelihood of `rows` under a frozen model. Works on held-out data as
/// long as every alternative was present at fit time.
pub fn score(fitted: &FittedModel, rows: &[ObservationRow]) -> Result<f64, FitError> {
    let index = ChoiceSetIndex::from_rows(rows)?;
    let designs = build_designs(&index, &fitted.layout)?;
    Ok(likelihood::log_likelihood(
        &designs,
        fitted.coefficients.view(),
    ))
}

/// Per-group choice probabilities under a frozen model.
pub fn predict(
    fitted: &FittedModel,
    rows: &[ObservationRow],
) -> Result<Vec<GroupPrediction>, FitError> {
    let index = ChoiceSetIndex::from_rows(rows)?;
    let designs = build_designs(&index, &fitted.layout)?;
    Ok(index
        .sets()
        .iter()
        .zip(&designs)
        .map(|(set, design)| GroupPrediction {
            group: set.group.clone(),
            alternatives: set.rows.iter().map(|r| r.alternative.clone()).collect(),
            probabilities: likelihood::group_probabilities(design, fitted.coefficients.view())
                .to_vec(),
        })
        .collect())
}

/// Per-group, nonnegative, additive error: the negative weighted
/// log-likelihood contribution of each group. Lower is better, zero means a
/// perfectly predicted choice, and a subset's error is the sum of its
/// groups' errors — the contract pruning procedures rely on.
pub fn error_vector(fitted: &FittedModel, rows: &[ObservationRow]) -> Result<Vec<f64>, FitError> {
    let index = ChoiceSetIndex::from_rows(rows)?;
    let designs = build_designs(&index, &fitted.layout)?;
    Ok(designs
        .iter()
        .map(|design| {
            let probs = likelihood::group_probabilities(design, fitted.coefficients.view());
            -design.weight
                * probs[design.chosen_index]
                    .max(likelihood::PROB_FLOOR)
                    .ln()
        })
        .collect())
}

/// Likelihood-ratio-style comparison of a parent-node model against the
/// models fitted on its children. Pure function of the log-likelihoods and
/// parameter counts.
#[derive(Debug, Clone, PartialEq)]
pub struct SplitComparison {
    pub parent_log_likelihood: f64,
    pub children_log_likelihood: f64,
    /// `2 * (children - parent)`; nonnegative when the children were fitted
    /// on a partition of the parent's data.
    pub lr_statistic: f64,
    /// Extra free parameters spent by the split.
    pub df_delta: i64,
    pub improved: bool,
}

/// Compares a parent model with the child models fitted on a partition of
/// the same data, supporting the builder's split/keep decision.
pub fn merge(parent: &FittedModel, children: &[&FittedModel]) -> SplitComparison {
    let children_log_likelihood: f64 = children.iter().map(|m| m.log_likelihood).sum();
    let children_parameters: usize = children.iter().map(|m| m.num_parameters()).sum();
    let lr_statistic = 2.0 * (children_log_likelihood - parent.log_likelihood);
    SplitComparison {
        parent_log_likelihood: parent.log_likelihood,
        children_log_likelihood,
        lr_statistic,
        df_delta: children_parameters as i64 - parent.num_parameters() as i64,
        improved: lr_statistic > 0.0,
    }
}

/// True when at least two distinct alternatives appear as chosen. A node
/// whose responses are not diverse cannot support a further split; tree
/// builders use this as a termination probe.
pub fn chosen_alternatives_diverse(rows: &[ObservationRow]) -> bool {
    let mut chosen: AHashSet<&AltId> = AHashSet::new();
    for row in rows {
        if row.chosen {
            chosen.insert(&row.alternative);
            if chosen.len() > 1 {
                return true;
            }
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::ObservationRow as Row;
    use crate::design::ModelLayout;
    use crate::model::{FitDiagnostics, FitStatus};
    use approx::assert_abs_diff_eq;

    // Three groups choose the cheaper alternative, one chooses the dearer,
    // so the price coefficient has a finite MLE (-ln 3).
    fn simple_rows() -> Vec<Row> {
        vec![
            Row::new("g1", "a", true).covariate("price", 1.0),
            Row::new("g1", "b", false).covariate("price", 2.0),
            Row::new("g2", "a", false).covariate("price", 2.0),
            Row::new("g2", "b", true).covariate("price", 1.0),
            Row::new("g3", "a", true).covariate("price", 1.0),
            Row::new("g3", "b", false).covariate("price", 2.0),
            Row::new("g4", "a", true).covariate("price", 2.0),
            Row::new("g4", "b", false).covariate("price", 1.0),
        ]
    }

    fn hand_built_model(log_likelihood: f64, n_params: usize) -> FittedModel {
        FittedModel {
            coefficients: ndarray::Array1::zeros(n_params),
            standard_errors: None,
            log_likelihood,
            status: FitStatus::Converged,
            layout: ModelLayout {
                alternatives: vec!["a".into(), "b".into()],
                reference_index: 0,
                alternative_specific: vec!["price".into()],
                individual_specific: vec![],
                term_names: (0..n_params).map(|i| format!("t{i}")).collect(),
            },
            n_groups: 1,
            n_rows: 2,
            diagnostics: FitDiagnostics {
                iterations: 1,
                final_gradient_norm: 0.0,
                step_halvings: 0,
                ridge_used: 1e-10,
                separation_suspected: false,
                null_log_likelihood: log_likelihood,
            },
        }
    }

    #[test]
    fn score_equals_training_log_likelihood_on_same_rows() {
        let rows = simple_rows();
        let leaf = MnlLeafModel::new(CovariateSpec::new(["price"], Vec::<String>::new()));
        let fitted = leaf.fit(&rows).unwrap();
        let scored = leaf.score(&fitted, &rows).unwrap();
        assert_abs_diff_eq!(scored, fitted.log_likelihood, epsilon = 1e-10);
        assert!(scored <= 0.0);
    }

    #[test]
    fn predictions_are_probability_vectors_keyed_by_group() {
        let rows = simple_rows();
        let leaf = MnlLeafModel::new(CovariateSpec::new(["price"], Vec::<String>::new()));
        let fitted = leaf.fit(&rows).unwrap();
        let predictions = leaf.predict(&fitted, &rows).unwrap();
        assert_eq!(predictions.len(), 4);
        for prediction in &predictions {
            assert_eq!(prediction.alternatives.len(), prediction.probabilities.len());
            let total: f64 = prediction.probabilities.iter().sum();
            assert_abs_diff_eq!(total, 1.0, epsilon = 1e-12);
        }
        assert_eq!(predictions[0].group, "g1");
        // Cheaper alternative gets the larger probability.
        assert!(predictions[0].probabilities[0] > predictions[0].probabilities[1]);
    }

    #[test]
    fn error_vector_is_nonnegative_and_sums_to_negative_score() {
        let rows = simple_rows();
        let leaf = MnlLeafModel::new(CovariateSpec::new(["price"], Vec::<String>::new()));
        let fitted = leaf.fit(&rows).unwrap();
        let errors = error_vector(&fitted, &rows).unwrap();
        assert_eq!(errors.len(), 4);
        assert!(errors.iter().all(|&e| e >= 0.0));
        let scored = score(&fitted, &rows).unwrap();
        assert_abs_diff_eq!(errors.iter().sum::<f64>(), -scored, epsilon = 1e-10);
    }

    #[test]
    fn predicting_an_unseen_alternative_fails() {
        let rows = simple_rows();
        let leaf = MnlLeafModel::new(CovariateSpec::new(["price"], Vec::<String>::new()));
        let fitted = leaf.fit(&rows).unwrap();
        let fresh = vec![
            Row::new("h", "a", true).covariate("price", 1.0),
            Row::new("h", "plane", false).covariate("price", 9.0),
        ];
        assert!(matches!(
            leaf.score(&fitted, &fresh),
            Err(FitError::Data(
                crate::data::DataError::UnknownAlternative { .. }
            ))
        ));
    }

    #[test]
    fn merge_reports_lr_statistic_and_df() {
        let parent = hand_built_model(-100.0, 2);
        let left = hand_built_model(-45.0, 2);
        let right = hand_built_model(-40.0, 2);
        let comparison = merge(&parent, &[&left, &right]);
        assert_abs_diff_eq!(comparison.children_log_likelihood, -85.0, epsilon = 1e-12);
        assert_abs_diff_eq!(comparison.lr_statistic, 30.0, epsilon = 1e-12);
        assert_eq!(comparison.df_delta, 2);
        assert!(comparison.improved);
    }

    #[test]
    fn diversity_probe() {
        assert!(chosen_alternatives_diverse(&simple_rows()));
        let uniform = vec![
            Row::new("g1", "a", true),
            Row::new("g1", "b", false),
            Row::new("g2", "a", true),
            Row::new("g2", "b", false),
        ];
        assert!(!chosen_alternatives_diverse(&uniform));
    }

    #[test]
    fn warm_started_fit_matches_cold_fit() {
        let rows = simple_rows();
        let leaf = MnlLeafModel::new(CovariateSpec::new(["price"], Vec::<String>::new()));
        let cold = leaf.fit(&rows).unwrap();
        let warm = leaf.fit_with_init(&rows, Some(&cold)).unwrap();
        assert_abs_diff_eq!(
            warm.coefficients[0],
            cold.coefficients[0],
            epsilon = 1e-8
        );
    }
}
