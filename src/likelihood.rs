//! # Likelihood & Gradient Engine
//!
//! Pure, stateless evaluation of the multinomial-logit objective for a
//! coefficient vector: weighted log-likelihood, score vector, and the
//! observed information matrix (the negative Hessian of the
//! log-likelihood).
//!
//! Numerical policy:
//! - Utilities are shifted by their per-group maximum before exponentiation,
//!   so no evaluation overflows no matter how far the optimizer wanders.
//! - Chosen-alternative probabilities are clamped at [`PROB_FLOOR`] before
//!   taking the logarithm; a zero probability yields a very negative but
//!   finite contribution, never `-inf`. These edge cases are expected at the
//!   boundary of the coefficient search and are handled here, not reported
//!   as errors.
//!
//! Identical coefficients and data always yield identical outputs, which the
//! optimizer relies on for reproducible convergence.

use crate::design::GroupDesign;
use ndarray::{Array1, Array2, ArrayView1, Axis};

/// Probabilities below this floor are clamped before `ln`.
pub const PROB_FLOOR: f64 = 1e-12;

/// Full evaluation at one coefficient vector.
#[derive(Debug, Clone)]
pub struct LikelihoodEval {
    pub log_likelihood: f64,
    /// Score: `sum_g w_g (x_chosen - sum_j p_j x_j)`.
    pub gradient: Array1<f64>,
    /// Observed information: `sum_g w_g (sum_j p_j x_j x_j' - xbar xbar')`.
    /// Positive semidefinite.
    pub information: Array2<f64>,
    /// Largest `|utility|` seen; the optimizer's stability monitor.
    pub max_abs_utility: f64,
    /// Smallest chosen-alternative probability across groups; values pinned
    /// at 1 across every group signal separation.
    pub min_chosen_probability: f64,
}

/// Evaluates log-likelihood, gradient and observed information.
pub fn evaluate(designs: &[GroupDesign], beta: ArrayView1<f64>) -> LikelihoodEval {
    let p = beta.len();
    let mut log_likelihood = 0.0;
    let mut gradient = Array1::<f64>::zeros(p);
    let mut information = Array2::<f64>::zeros((p, p));
    let mut max_abs_utility: f64 = 0.0;
    let mut min_chosen_probability: f64 = 1.0;

    for design in designs {
        debug_assert_eq!(design.x.ncols(), p);
        let probs = softmax_probabilities(design, beta, &mut max_abs_utility);

        let p_chosen = probs[design.chosen_index];
        log_likelihood += design.weight * p_chosen.max(PROB_FLOOR).ln();
        min_chosen_probability = min_chosen_probability.min(p_chosen);

        // Expected covariate vector under the current probabilities.
        let xbar = probs.dot(&design.x);
        let score = design.x.row(design.chosen_index).to_owned() - &xbar;
        gradient.scaled_add(design.weight, &score);

        // sum_j p_j x_j x_j' via a probability-scaled copy of the design.
        let scaled = &design.x * &probs.view().insert_axis(Axis(1));
        let mut info_g = design.x.t().dot(&scaled);
        let xbar_col = xbar.insert_axis(Axis(1));
        info_g -= &xbar_col.dot(&xbar_col.t());
        information.scaled_add(design.weight, &info_g);
    }

    LikelihoodEval {
        log_likelihood,
        gradient,
        information,
        max_abs_utility,
        min_chosen_probability,
    }
}

/// Log-likelihood alone; the cheap evaluation used for step-size control and
/// held-out scoring.
pub fn log_likelihood(designs: &[GroupDesign], beta: ArrayView1<f64>) -> f64 {
    let mut total = 0.0;
    let mut max_abs_utility = 0.0;
    for design in designs {
        let probs = softmax_probabilities(design, beta, &mut max_abs_utility);
        total += design.weight * probs[design.chosen_index].max(PROB_FLOOR).ln();
    }
    total
}

/// Choice probabilities for one group, softmax over the alternatives present
/// in that group only.
pub fn group_probabilities(design: &GroupDesign, beta: ArrayView1<f64>) -> Array1<f64> {
    let mut max_abs_utility = 0.0;
    softmax_probabilities(design, beta, &mut max_abs_utility)
}

fn softmax_probabilities(
    design: &GroupDesign,
    beta: ArrayView1<f64>,
    max_abs_utility: &mut f64,
) -> Array1<f64> {
    let utilities = design.x.dot(&beta);
    let shift = utilities.fold(f64::NEG_INFINITY, |acc, &u| acc.max(u));
    *max_abs_utility = utilities
        .fold(*max_abs_utility, |acc, &u| acc.max(u.abs()));
    let exps = utilities.mapv(|u| (u - shift).exp());
    let denom = exps.sum();
    exps / denom
}
