//! # Maximum-Likelihood Estimation and Convergence Control
//!
//! Drives a damped Newton search over the multinomial-logit log-likelihood:
//! evaluate the objective, gradient and observed information at the current
//! coefficients, solve the ridge-regularized normal equations for an update,
//! halve the step while the objective would decrease, and stop on a gradient
//! or improvement tolerance or at the iteration cap.
//!
//! Terminal failure states are values, not panics: `NonConverged` (iteration
//! budget exhausted, or the fit drifted into a separated configuration) and
//! `Singular` (rank-deficient information, e.g. a covariate constant within
//! the node, or a node too small for the layout). A tree builder treats
//! these as routine — reject the candidate split and move on.

use crate::choice_set::ChoiceSetIndex;
use crate::data::{CovariateSpec, DataError, ObservationRow};
use crate::design::{ModelLayout, build_designs};
use crate::likelihood::{self, LikelihoodEval};
use crate::model::{FitDiagnostics, FitStatus, FittedModel};
use ndarray::{Array1, Array2};
use ndarray_linalg::{Eigh, FactorizeC, InverseC, SolveC, UPLO};
use thiserror::Error;

/// Maximum step halvings per Newton iteration before the iteration is
/// declared failed.
const MAX_STEP_HALVINGS: usize = 30;

/// Utilities beyond this magnitude mean the coefficients are running away
/// (typically perfect separation); the fit is reported non-converged.
const UTILITY_STABILITY_THRESHOLD: f64 = 100.0;

/// When every chosen alternative's probability exceeds `1 - this`, the data
/// are separated and the unbounded likelihood has no maximizer.
const SEPARATION_PROB_TOL: f64 = 1e-6;

/// Relative eigenvalue cutoff below which the information matrix is treated
/// as rank deficient.
const RANK_TOLERANCE: f64 = 1e-8;

/// Factor by which the ridge is escalated when a factorization fails.
const RIDGE_ESCALATION: f64 = 100.0;

/// Largest ridge tried before giving up as singular.
const MAX_RIDGE: f64 = 1e-2;

/// Per-call estimation settings. Passed explicitly on every fit; there is no
/// process-wide configuration.
#[derive(Debug, Clone)]
pub struct FitOptions {
    /// Hard upper bound on Newton iterations; the timeout surrogate.
    pub max_iterations: usize,
    /// Convergence when the max-abs gradient component falls below this.
    pub gradient_tolerance: f64,
    /// Convergence when one iteration improves the log-likelihood by less
    /// than this.
    pub loglik_tolerance: f64,
    /// Base ridge added to the information matrix before factorization.
    pub ridge: f64,
    /// Starting coefficients; `None` starts from the zero vector (the null
    /// model).
    pub warm_start: Option<Array1<f64>>,
}

impl Default for FitOptions {
    fn default() -> Self {
        Self {
            max_iterations: 50,
            gradient_tolerance: 1e-6,
            loglik_tolerance: 1e-9,
            ridge: 1e-10,
            warm_start: None,
        }
    }
}

/// Terminal failure of a fit call. Every variant is routine from the tree
/// builder's perspective; nothing here should be treated as exceptional.
#[derive(Debug, Error)]
pub enum FitError {
    #[error(transparent)]
    Data(#[from] DataError),

    #[error(
        "optimizer stopped after {iterations} iteration(s) without reaching tolerance \
         (gradient norm {final_gradient_norm:.3e}, separation suspected: {separation_suspected})"
    )]
    NonConverged {
        iterations: usize,
        final_gradient_norm: f64,
        separation_suspected: bool,
    },

    #[error(
        "information matrix is singular to working precision \
         (eigenvalue range {min_eigenvalue:.3e} .. {max_eigenvalue:.3e})"
    )]
    Singular {
        min_eigenvalue: f64,
        max_eigenvalue: f64,
    },

    #[error("warm start supplies {found} coefficient(s) but the layout requires {expected}")]
    WarmStartLength { expected: usize, found: usize },

    #[error("eigendecomposition of the information matrix failed: {0}")]
    EigendecompositionFailed(ndarray_linalg::error::LinalgError),
}

impl FitError {
    /// The terminal optimizer state this failure corresponds to, for callers
    /// that track the state machine rather than the error detail.
    pub fn status(&self) -> Option<FitStatus> {
        match self {
            FitError::NonConverged { .. } => Some(FitStatus::NonConverged),
            FitError::Singular { .. } => Some(FitStatus::Singular),
            _ => None,
        }
    }
}

/// Fits an MNL model on the supplied rows. Runs the full pipeline: choice-set
/// indexing, layout and design construction, Newton iteration. Returns a
/// frozen [`FittedModel`] on convergence and an explicit [`FitError`]
/// otherwise. Pure per call; concurrent calls on disjoint subsets share
/// nothing.
pub fn fit(
    rows: &[ObservationRow],
    spec: &CovariateSpec,
    options: &FitOptions,
) -> Result<FittedModel, FitError> {
    let index = ChoiceSetIndex::from_rows(rows)?;
    let layout = ModelLayout::build(&index, spec)?;
    let designs = build_designs(&index, &layout)?;
    let p = layout.num_coefficients();

    let mut beta = match &options.warm_start {
        Some(start) => {
            if start.len() != p {
                return Err(FitError::WarmStartLength {
                    expected: p,
                    found: start.len(),
                });
            }
            start.clone()
        }
        None => Array1::zeros(p),
    };

    let null_log_likelihood = likelihood::log_likelihood(&designs, Array1::zeros(p).view());
    let mut eval = likelihood::evaluate(&designs, beta.view());
    check_rank(&eval.information)?;

    log::debug!(
        "MNL fit: {} groups, {} rows, {} coefficients, initial log-likelihood {:.6}",
        index.len(),
        index.total_rows(),
        p,
        eval.log_likelihood
    );

    let mut ridge_used = options.ridge;
    let mut total_halvings = 0usize;
    let mut converged = false;
    let mut iterations = 0usize;

    for iter in 1..=options.max_iterations {
        iterations = iter;
        let step = solve_newton_step(&eval.information, &eval.gradient, &mut ridge_used)?;

        // Step-halving when the full Newton step would reduce the objective.
        let mut beta_trial = &beta + &step;
        let mut ll_trial = likelihood::log_likelihood(&designs, beta_trial.view());
        let mut halvings = 0usize;
        while (!ll_trial.is_finite() || ll_trial < eval.log_likelihood)
            && halvings < MAX_STEP_HALVINGS
        {
            beta_trial = &beta + &((&beta_trial - &beta) * 0.5);
            ll_trial = likelihood::log_likelihood(&designs, beta_trial.view());
            halvings += 1;
        }
        total_halvings += halvings;

        if !ll_trial.is_finite() || ll_trial < eval.log_likelihood {
            log::warn!("no ascent direction found after {halvings} step halvings");
            return Err(FitError::NonConverged {
                iterations: iter,
                final_gradient_norm: gradient_inf_norm(&eval.gradient),
                separation_suspected: separation_suspected(&eval),
            });
        }

        let improvement = ll_trial - eval.log_likelihood;
        beta = beta_trial;
        eval = likelihood::evaluate(&designs, beta.view());
        let gradient_norm = gradient_inf_norm(&eval.gradient);

        log::debug!(
            "iter {iter}: log-likelihood {:.6}, improvement {:.3e}, gradient norm {:.3e}, \
             {halvings} halving(s)",
            eval.log_likelihood,
            improvement,
            gradient_norm
        );

        if eval.max_abs_utility > UTILITY_STABILITY_THRESHOLD {
            log::warn!(
                "utilities reached {:.1}; coefficients are diverging, likely separation",
                eval.max_abs_utility
            );
            return Err(FitError::NonConverged {
                iterations: iter,
                final_gradient_norm: gradient_norm,
                separation_suspected: true,
            });
        }

        if gradient_norm < options.gradient_tolerance || improvement < options.loglik_tolerance {
            // A tolerance hit with every chosen probability pinned at one is
            // not a maximum; the likelihood is unbounded along some ray.
            if separation_suspected(&eval) {
                log::warn!("tolerance met but all chosen probabilities are pinned at 1");
                return Err(FitError::NonConverged {
                    iterations: iter,
                    final_gradient_norm: gradient_norm,
                    separation_suspected: true,
                });
            }
            converged = true;
            break;
        }
    }

    if !converged {
        return Err(FitError::NonConverged {
            iterations,
            final_gradient_norm: gradient_inf_norm(&eval.gradient),
            separation_suspected: separation_suspected(&eval),
        });
    }

    let standard_errors = eval
        .information
        .invc()
        .ok()
        .map(|cov| cov.diag().mapv(|v| v.max(0.0).sqrt()));

    let diagnostics = FitDiagnostics {
        iterations,
        final_gradient_norm: gradient_inf_norm(&eval.gradient),
        step_halvings: total_halvings,
        ridge_used,
        separation_suspected: false,
        null_log_likelihood,
    };

    log::info!(
        "MNL fit converged in {iterations} iteration(s): log-likelihood {:.6} (null {:.6}), \
         {} coefficient(s)",
        eval.log_likelihood,
        null_log_likelihood,
        p
    );

    Ok(FittedModel {
        coefficients: beta,
        standard_errors,
        log_likelihood: eval.log_likelihood,
        status: FitStatus::Converged,
        layout,
        n_groups: index.len(),
        n_rows: index.total_rows(),
        diagnostics,
    })
}

fn gradient_inf_norm(gradient: &Array1<f64>) -> f64 {
    gradient.fold(0.0f64, |acc, &g| acc.max(g.abs()))
}

fn separation_suspected(eval: &LikelihoodEval) -> bool {
    eval.min_chosen_probability > 1.0 - SEPARATION_PROB_TOL
}

/// Rejects rank-deficient information matrices up front. A covariate that is
/// constant within every group, or a node with fewer groups than
/// coefficients, shows up here as a (near-)zero eigenvalue.
fn check_rank(information: &Array2<f64>) -> Result<(), FitError> {
    let (eigenvalues, _) = information
        .eigh(UPLO::Lower)
        .map_err(FitError::EigendecompositionFailed)?;
    let max_eigenvalue = eigenvalues.fold(f64::NEG_INFINITY, |acc, &v| acc.max(v));
    let min_eigenvalue = eigenvalues.fold(f64::INFINITY, |acc, &v| acc.min(v));
    if !(max_eigenvalue > 0.0) || min_eigenvalue <= RANK_TOLERANCE * max_eigenvalue {
        return Err(FitError::Singular {
            min_eigenvalue,
            max_eigenvalue,
        });
    }
    Ok(())
}

/// Solves `(information + ridge * I) step = gradient`, escalating the ridge
/// on factorization failure up to [`MAX_RIDGE`].
fn solve_newton_step(
    information: &Array2<f64>,
    gradient: &Array1<f64>,
    ridge: &mut f64,
) -> Result<Array1<f64>, FitError> {
    let p = information.nrows();
    let mut current = *ridge;
    while current <= MAX_RIDGE {
        let mut damped = information.clone();
        for i in 0..p {
            damped[[i, i]] += current;
        }
        if let Ok(factor) = damped.factorizec(UPLO::Lower) {
            if let Ok(step) = factor.solvec(gradient) {
                if step.iter().all(|v| v.is_finite()) {
                    *ridge = current;
                    return Ok(step);
                }
            }
        }
        log::warn!("Cholesky factorization failed at ridge {current:.1e}; escalating");
        current *= RIDGE_ESCALATION;
    }

    let (min_eigenvalue, max_eigenvalue) = match information.eigh(UPLO::Lower) {
        Ok((eigenvalues, _)) => (
            eigenvalues.fold(f64::INFINITY, |acc, &v| acc.min(v)),
            eigenvalues.fold(f64::NEG_INFINITY, |acc, &v| acc.max(v)),
        ),
        Err(_) => (f64::NAN, f64::NAN),
    };
    Err(FitError::Singular {
        min_eigenvalue,
        max_eigenvalue,
    })
}
