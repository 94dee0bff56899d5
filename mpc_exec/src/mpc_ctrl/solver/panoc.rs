//! PANOC binding of the optimiser
//!
//! The problem is condensed onto the actuations before it is handed to PANOC. The states are
//! never free variables: each candidate set of actuations is rolled out through the model from
//! the pinned initial state, so the dynamics hold by construction and the only constraints left
//! are the actuation bounds, which PANOC handles by projection.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use std::time::Duration;

use log::debug;
use optimization_engine::{
    constraints::Rectangle,
    core::{ExitStatus, Optimizer as _},
    panoc::{PANOCCache, PANOCOptimizer},
    FunctionCallResult,
    Problem,
    SolverError,
};

use super::{derivatives, Optimizer, SolveFailure, SolveStats, SolverResult, SolverStatus};
use crate::mpc_ctrl::{OptimizationProblem, SolverParams};

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// Single shooting solver using PANOC over the actuation sequence.
#[derive(Debug, Clone)]
pub struct PanocSolver {
    params: SolverParams,
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl PanocSolver {
    pub fn new(params: SolverParams) -> Self {
        Self { params }
    }
}

impl Optimizer for PanocSolver {
    fn solve(&mut self, problem: &OptimizationProblem) -> SolverResult {
        let l = problem.layout;
        let n_vars = l.num_vars();
        let n_u = l.num_actuation_vars();
        let u_start = l.delta_start();
        let p = &self.params;
        let eval = &problem.eval;
        let initial = problem.pinned_state();

        // No actuation to choose, the roll-out is the only trajectory
        if n_u == 0 {
            let vars: Vec<f64> = eval.rollout(&initial, &[]);
            return SolverResult {
                status: SolverStatus::Success,
                cost: eval.cost(&vars),
                stats: SolveStats {
                    max_violation: problem.max_violation(&vars),
                    ..Default::default()
                },
                solution: vars,
            }
        }

        // ---- PROBLEM FUNCTIONS ----

        let f = |u: &[f64], cost: &mut f64| -> FunctionCallResult {
            *cost = derivatives::rollout_cost(eval, &initial, u);
            if cost.is_finite() {
                Ok(())
            }
            else {
                Err(SolverError::NotFiniteComputation)
            }
        };
        let df = |u: &[f64], grad: &mut [f64]| -> FunctionCallResult {
            derivatives::rollout_cost_gradient(eval, &initial, u, grad);
            if grad.iter().all(|g| g.is_finite()) {
                Ok(())
            }
            else {
                Err(SolverError::NotFiniteComputation)
            }
        };

        let bounds = Rectangle::new(
            Some(&problem.var_lower[u_start..]),
            Some(&problem.var_upper[u_start..])
        );

        // ---- OPTIMISER ----

        let panoc_problem = Problem::new(&bounds, df, f);
        let mut cache = PANOCCache::new(n_u, p.tolerance, p.lbfgs_memory);

        let optimizer = PANOCOptimizer::new(panoc_problem, &mut cache)
            .with_max_iter(p.max_iterations);
        let mut optimizer = match p.max_solve_time_s {
            Some(t) => optimizer.with_max_duration(Duration::from_secs_f64(t)),
            None => optimizer
        };

        // ---- SOLVE ----

        // Start from the guess, projected into the bounds
        let mut u: Vec<f64> = problem.initial_guess[u_start..].iter()
            .zip(problem.var_lower[u_start..].iter().zip(problem.var_upper[u_start..].iter()))
            .map(|(&v, (&lo, &hi))| util::maths::clamp(v, lo, hi))
            .collect();

        let status = match optimizer.solve(&mut u) {
            Ok(s) => s,
            Err(e) => return SolverResult::failed(
                SolveFailure::NumericalError(format!("{:?}", e)), 
                n_vars
            )
        };

        let vars = eval.rollout(&initial, &u);
        let cost = eval.cost(&vars);
        let max_violation = problem.max_violation(&vars)
            .max(problem.max_bound_violation(&vars));
        let stats = SolveStats {
            iterations: status.iterations(),
            solve_time_s: status.solve_time().as_secs_f64(),
            max_violation,
        };

        debug!(
            "MpcCtrl solve finished: {:?} after {} iterations, cost {:.4}, violation {:.2e}, \
            {:.1} ms",
            status.exit_status(),
            stats.iterations,
            cost,
            max_violation,
            stats.solve_time_s * 1e3
        );

        let status = if !cost.is_finite() || vars.iter().any(|v| !v.is_finite()) {
            SolverStatus::Failure(SolveFailure::NumericalError(
                String::from("non-finite solution")
            ))
        }
        else {
            match status.exit_status() {
                ExitStatus::Converged => {
                    if max_violation <= p.feasibility_tolerance {
                        SolverStatus::Success
                    }
                    else {
                        SolverStatus::Failure(SolveFailure::Infeasible {
                            violation: max_violation
                        })
                    }
                },
                ExitStatus::NotConvergedIterations | ExitStatus::NotConvergedOutOfTime => {
                    SolverStatus::Failure(SolveFailure::IterationLimit)
                }
            }
        };

        SolverResult {
            status,
            solution: vars,
            cost,
            stats,
        }
    }
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;
    use approx::assert_abs_diff_eq;
    use crate::mpc_ctrl::{build_problem, Params, Polynomial, VehicleState};

    fn short_horizon_params() -> Params {
        Params {
            horizon_steps: 6,
            ..Default::default()
        }
    }

    #[test]
    fn test_solution_respects_dynamics() {
        let params = short_horizon_params();
        let curve = Polynomial::new(vec![0.0; 4]);
        let initial = VehicleState {
            v: 20.0,
            ..Default::default()
        };
        let problem = build_problem(&params, &initial, &curve, 20.0);

        let mut solver = PanocSolver::new(params.solver.clone());
        let result = solver.solve(&problem);

        assert!(result.is_success(), "solve failed: {:?}", result.status);
        assert_abs_diff_eq!(result.stats.max_violation, 0.0, epsilon = 1e-12);

        // Already on the line at the target speed, nothing to do
        let l = problem.layout;
        for t in 0..l.num_actuation_steps() {
            let u = l.actuation_at(&result.solution, t);
            assert!(u.delta.abs() < 1e-6, "delta({}) = {}", t, u.delta);
            assert!(u.a.abs() < 1e-6, "a({}) = {}", t, u.a);
        }

        assert_eq!(l.state_at(&result.solution, 0), initial);
        assert!((l.state_at(&result.solution, 5).x - 5.0 * 20.0 * 0.05).abs() < 1e-9);
    }

    #[test]
    fn test_offset_start_converges_within_bounds() {
        let params = Params::default();

        // Below the target speed and offset to the right of the curve
        let curve = Polynomial::new(vec![3.0, 0.2, 0.0, 0.0]);
        let initial = VehicleState {
            v: 10.0,
            cte: 3.0,
            epsi: -(0.2f64.atan()),
            ..Default::default()
        };
        let problem = build_problem(&params, &initial, &curve, 100.0);

        let mut solver = PanocSolver::new(params.solver.clone());
        let result = solver.solve(&problem);

        assert!(result.is_success(), "solve failed: {:?}", result.status);
        assert!(result.stats.max_violation <= params.solver.feasibility_tolerance);

        let l = problem.layout;
        for t in 0..l.num_actuation_steps() {
            let u = l.actuation_at(&result.solution, t);
            assert!(u.delta.abs() <= params.max_steer_rad);
            assert!(u.a.abs() <= params.max_throttle);
        }

        // Steers left towards the curve and accelerates towards the target
        let first = l.actuation_at(&result.solution, 0);
        assert!(first.delta > 0.0, "delta(0) = {}", first.delta);
        assert!(first.a > 0.0, "a(0) = {}", first.a);

        // Better than doing nothing
        let idle = problem.eval.rollout(&initial, &vec![0.0; l.num_actuation_vars()]);
        assert!(result.cost < problem.eval.cost(&idle));
        assert_eq!(result.cost, problem.eval.cost(&result.solution));
    }

    #[test]
    fn test_iteration_limit() {
        let mut params = short_horizon_params();
        params.solver.max_iterations = 1;

        let curve = Polynomial::new(vec![3.0, 0.2, 0.0, 0.0]);
        let initial = VehicleState {
            v: 10.0,
            cte: 3.0,
            ..Default::default()
        };
        let problem = build_problem(&params, &initial, &curve, 100.0);

        let mut solver = PanocSolver::new(params.solver.clone());
        let result = solver.solve(&problem);

        assert_eq!(result.failure(), Some(&SolveFailure::IterationLimit));
    }
}
