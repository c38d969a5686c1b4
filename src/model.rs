//! # Fitted-Model Containers
//!
//! Frozen output of one estimation run. A fitted model is never mutated; a
//! re-fit produces a new instance. All fields are plain numeric, boolean or
//! string data so callers can persist models however they like — this crate
//! only guarantees serde compatibility, not a storage format.

use crate::data::AltId;
use crate::design::ModelLayout;
use itertools::Itertools;
use ndarray::Array1;
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;

/// Terminal state of the convergence driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FitStatus {
    /// A stopping tolerance was met at a genuine maximum.
    Converged,
    /// The iteration budget ran out, or the search drifted into a separated
    /// configuration with no finite maximizer.
    NonConverged,
    /// The (regularized) information matrix was not safely invertible.
    Singular,
}

/// Observability attached to a fit; not used in scoring.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FitDiagnostics {
    pub iterations: usize,
    pub final_gradient_norm: f64,
    pub step_halvings: usize,
    /// The ridge actually used by the last Newton solve.
    pub ridge_used: f64,
    pub separation_suspected: bool,
    /// Log-likelihood at the all-zero coefficient vector (the null model).
    pub null_log_likelihood: f64,
}

/// The immutable result of a converged estimation run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FittedModel {
    pub coefficients: Array1<f64>,
    /// Square roots of the diagonal of the inverse observed information;
    /// `None` when that matrix was not invertible at the optimum.
    pub standard_errors: Option<Array1<f64>>,
    pub log_likelihood: f64,
    pub status: FitStatus,
    /// The frozen coefficient layout; prediction and scoring on fresh rows
    /// rebuild their designs from this.
    pub layout: ModelLayout,
    pub n_groups: usize,
    pub n_rows: usize,
    pub diagnostics: FitDiagnostics,
}

impl FittedModel {
    /// Number of free parameters; tree builders need this for complexity
    /// penalties.
    pub fn num_parameters(&self) -> usize {
        self.coefficients.len()
    }

    pub fn reference_alternative(&self) -> &AltId {
        self.layout.reference()
    }

    pub fn term_names(&self) -> &[String] {
        &self.layout.term_names
    }

    /// Human-readable fit summary: status, sample size, log-likelihood and a
    /// coefficient table. Intended for diagnostics and tree-trace logging.
    pub fn summary(&self) -> String {
        let status = match self.status {
            FitStatus::Converged => "converged",
            FitStatus::NonConverged => "non-converged",
            FitStatus::Singular => "singular",
        };
        let mut out = String::new();
        let _ = writeln!(
            out,
            "MNL leaf model ({status}): {} groups / {} rows, log-likelihood {:.4} \
             (null {:.4}), {} parameter(s), reference '{}'",
            self.n_groups,
            self.n_rows,
            self.log_likelihood,
            self.diagnostics.null_log_likelihood,
            self.num_parameters(),
            self.reference_alternative(),
        );
        let width = self
            .layout
            .term_names
            .iter()
            .map(|n| n.len())
            .max()
            .unwrap_or(0);
        for (i, name) in self.layout.term_names.iter().enumerate() {
            match &self.standard_errors {
                Some(se) => {
                    let _ = writeln!(
                        out,
                        "  {name:<width$}  {:>12.6}  (se {:.6})",
                        self.coefficients[i], se[i]
                    );
                }
                None => {
                    let _ = writeln!(out, "  {name:<width$}  {:>12.6}", self.coefficients[i]);
                }
            }
        }
        out
    }

    /// One-line rendering of the coefficients, `name=value` pairs.
    pub fn coefficients_line(&self) -> String {
        self.layout
            .term_names
            .iter()
            .zip(self.coefficients.iter())
            .map(|(name, value)| format!("{name}={value:.6}"))
            .join(", ")
    }
}
