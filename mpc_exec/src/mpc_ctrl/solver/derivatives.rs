//! Forward mode derivatives of the rolled out cost
//!
//! The cost is evaluated on dual numbers through the model roll-out, seeding one actuation at a
//! time, so the gradient accounts for every state the actuation influences.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use num_dual::Dual64;

use crate::mpc_ctrl::{FgEval, VehicleState};

// ---------------------------------------------------------------------------
// FUNCTIONS
// ---------------------------------------------------------------------------

/// Cost of the trajectory rolled out from `initial` under `actuations`.
pub fn rollout_cost(eval: &FgEval, initial: &VehicleState, actuations: &[f64]) -> f64 {
    eval.cost(&eval.rollout(initial, actuations))
}

/// Gradient of [`rollout_cost`] with respect to the actuations, written into `grad`.
pub fn rollout_cost_gradient(
    eval: &FgEval,
    initial: &VehicleState,
    actuations: &[f64],
    grad: &mut [f64]
) {
    let mut duals: Vec<Dual64> = actuations.iter().map(|&v| Dual64::from(v)).collect();

    for i in 0..duals.len() {
        duals[i].eps = 1.0;
        grad[i] = eval.cost(&eval.rollout(initial, &duals)).eps;
        duals[i].eps = 0.0;
    }
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;
    use crate::mpc_ctrl::{build_problem, OptimizationProblem, Params, Polynomial};
    use approx::assert_abs_diff_eq;

    const FD_STEP: f64 = 1e-6;

    fn test_problem() -> (OptimizationProblem, Vec<f64>) {
        let params = Params {
            horizon_steps: 6,
            ..Default::default()
        };
        let curve = Polynomial::new(vec![0.8, -0.05, 0.003, -0.0001]);
        let initial = VehicleState {
            v: 30.0,
            cte: 0.8,
            epsi: (-0.05f64).atan(),
            ..Default::default()
        };
        let problem = build_problem(&params, &initial, &curve, 90.0);

        // Arbitrary non-trivial actuations
        let actuations: Vec<f64> = (0..problem.layout.num_actuation_vars())
            .map(|i| 0.2 * ((i as f64) * 0.7).sin())
            .collect();

        (problem, actuations)
    }

    #[test]
    fn test_rollout_cost_gradient() {
        let (problem, actuations) = test_problem();
        let initial = problem.pinned_state();
        let n = actuations.len();

        let mut grad = vec![0.0; n];
        rollout_cost_gradient(&problem.eval, &initial, &actuations, &mut grad);

        for i in 0..n {
            let mut up = actuations.clone();
            let mut down = actuations.clone();
            up[i] += FD_STEP;
            down[i] -= FD_STEP;

            let fd = (rollout_cost(&problem.eval, &initial, &up)
                - rollout_cost(&problem.eval, &initial, &down)) / (2.0 * FD_STEP);

            assert_abs_diff_eq!(grad[i], fd, epsilon = 1e-4 * (1.0 + fd.abs()));
        }
    }

    #[test]
    fn test_steering_gradient_reaches_later_states() {
        let (problem, _) = test_problem();
        let initial = problem.pinned_state();
        let l = problem.layout;

        // At zero actuation the offset from the curve is only reduced by steering towards it,
        // which the direct steering cost cannot see
        let zero = vec![0.0; l.num_actuation_vars()];
        let mut grad = vec![0.0; zero.len()];
        rollout_cost_gradient(&problem.eval, &initial, &zero, &mut grad);

        assert!(grad[0] < 0.0, "first steering gradient {}", grad[0]);
    }
}
