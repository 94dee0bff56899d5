//! Optimiser interface
//!
//! The controller only defines the problem. Solving it is delegated to an [`Optimizer`], the
//! provided implementation being [`PanocSolver`].

// ---------------------------------------------------------------------------
// MODULES
// ---------------------------------------------------------------------------

mod panoc;
pub mod derivatives;

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use serde::Serialize;

use super::OptimizationProblem;

pub use panoc::PanocSolver;

// ---------------------------------------------------------------------------
// TRAITS
// ---------------------------------------------------------------------------

/// A nonlinear programming solver.
///
/// Implementations shall be deterministic given identical problems.
pub trait Optimizer {
    /// Find a locally optimal decision vector for the problem.
    fn solve(&mut self, problem: &OptimizationProblem) -> SolverResult;
}

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// Outcome of a solve.
#[derive(Debug, Clone, Serialize)]
pub struct SolverResult {
    pub status: SolverStatus,

    /// The last decision vector reached, only meaningful on success.
    pub solution: Vec<f64>,

    /// Cost of `solution`.
    pub cost: f64,

    pub stats: SolveStats,
}

/// Diagnostic statistics of a solve.
#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq)]
pub struct SolveStats {
    pub iterations: usize,

    /// Units: seconds
    pub solve_time_s: f64,

    /// Largest distance of the constraints from their bounds at `solution`.
    pub max_violation: f64,
}

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum SolverStatus {
    Success,
    Failure(SolveFailure),
}

/// Reasons a solve did not produce a usable solution.
#[derive(Debug, Clone, PartialEq, Serialize, thiserror::Error)]
pub enum SolveFailure {
    #[error("Converged to an infeasible point (constraint violation {violation:e})")]
    Infeasible { violation: f64 },

    #[error("Iteration or time budget exhausted")]
    IterationLimit,

    #[error("Numerical error: {0}")]
    NumericalError(String),
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl SolverResult {
    /// Build a failed result without a solution.
    pub fn failed(failure: SolveFailure, num_vars: usize) -> Self {
        Self {
            status: SolverStatus::Failure(failure),
            solution: vec![std::f64::NAN; num_vars],
            cost: std::f64::NAN,
            stats: SolveStats::default(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == SolverStatus::Success
    }

    /// Return the failure, if any.
    pub fn failure(&self) -> Option<&SolveFailure> {
        match self.status {
            SolverStatus::Success => None,
            SolverStatus::Failure(ref f) => Some(f),
        }
    }
}
