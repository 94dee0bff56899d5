//! Optimisation problem definition
//!
//! The decision vector holds every state component over the horizon followed by the steering and
//! acceleration sequences:
//!
//! ```text
//! [ x(0..N) | y(0..N) | psi(0..N) | v(0..N) | cte(0..N) | epsi(0..N) | delta(0..N-1) | a(0..N-1) ]
//! ```
//!
//! The constraint vector has one row per state component and step, in the same order as the
//! states. Rows of step 0 evaluate to the state itself and are bounded to the measured state,
//! rows of later steps are dynamics residuals bounded to zero.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use num_dual::DualNum;
use serde::Serialize;

use super::{
    Actuation, CostWeights, ModelState, MotionModel, Params, Polynomial, VehicleState,
    NUM_ACTUATIONS, NUM_STATES
};

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// Index layout of the decision and constraint vectors for a horizon length.
#[derive(Debug, Clone, Copy, Serialize, PartialEq)]
pub struct VarLayout {
    horizon_steps: usize,
}

/// Everything the optimiser needs for one cycle.
#[derive(Debug, Clone, Serialize)]
pub struct OptimizationProblem {
    pub layout: VarLayout,

    pub initial_guess: Vec<f64>,

    pub var_lower: Vec<f64>,
    pub var_upper: Vec<f64>,

    pub constraint_lower: Vec<f64>,
    pub constraint_upper: Vec<f64>,

    pub eval: FgEval,
}

/// Cost and constraint evaluation for one cycle.
///
/// Captures the fitted curve, weights and target speed by value, and is never modified after
/// construction.
#[derive(Debug, Clone, Serialize)]
pub struct FgEval {
    pub layout: VarLayout,
    pub model: MotionModel,
    pub curve: Polynomial,
    pub weights: CostWeights,
    pub target_speed: f64,
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl VarLayout {
    pub fn new(horizon_steps: usize) -> Self {
        Self { horizon_steps }
    }

    pub fn horizon_steps(&self) -> usize {
        self.horizon_steps
    }

    /// Start of the block holding state component `component` (0 = x ... 5 = epsi).
    pub fn state_start(&self, component: usize) -> usize {
        component * self.horizon_steps
    }

    pub fn x_start(&self) -> usize { self.state_start(0) }
    pub fn y_start(&self) -> usize { self.state_start(1) }
    pub fn psi_start(&self) -> usize { self.state_start(2) }
    pub fn v_start(&self) -> usize { self.state_start(3) }
    pub fn cte_start(&self) -> usize { self.state_start(4) }
    pub fn epsi_start(&self) -> usize { self.state_start(5) }

    pub fn delta_start(&self) -> usize {
        NUM_STATES * self.horizon_steps
    }

    pub fn a_start(&self) -> usize {
        self.delta_start() + self.num_actuation_steps()
    }

    /// Number of steps carrying an actuation, one fewer than the states.
    pub fn num_actuation_steps(&self) -> usize {
        self.horizon_steps.saturating_sub(1)
    }

    /// Number of actuation variables, the tail of the decision vector from `delta_start`.
    pub fn num_actuation_vars(&self) -> usize {
        NUM_ACTUATIONS * self.num_actuation_steps()
    }

    pub fn num_vars(&self) -> usize {
        NUM_STATES * self.horizon_steps + self.num_actuation_vars()
    }

    pub fn num_constraints(&self) -> usize {
        NUM_STATES * self.horizon_steps
    }

    /// Index of state component `component` at step `t`, in both the decision and constraint
    /// vectors.
    pub fn state_index(&self, component: usize, t: usize) -> usize {
        self.state_start(component) + t
    }

    pub fn state_indices(&self, t: usize) -> [usize; NUM_STATES] {
        let mut idx = [0; NUM_STATES];
        for (c, i) in idx.iter_mut().enumerate() {
            *i = self.state_index(c, t);
        }
        idx
    }

    pub fn actuation_indices(&self, t: usize) -> [usize; NUM_ACTUATIONS] {
        [self.delta_start() + t, self.a_start() + t]
    }

    pub fn state_at<T: Copy>(&self, vars: &[T], t: usize) -> ModelState<T> {
        let idx = self.state_indices(t);
        ModelState::from_array([
            vars[idx[0]], vars[idx[1]], vars[idx[2]], vars[idx[3]], vars[idx[4]], vars[idx[5]]
        ])
    }

    pub fn actuation_at<T: Copy>(&self, vars: &[T], t: usize) -> Actuation<T> {
        let idx = self.actuation_indices(t);
        Actuation {
            delta: vars[idx[0]],
            a: vars[idx[1]],
        }
    }
}

impl FgEval {
    /// Cost of the decision vector.
    ///
    /// Sums tracking error over every step, effort over every actuation and the change in
    /// actuation between consecutive steps.
    pub fn cost<T: DualNum<f64> + Copy>(&self, vars: &[T]) -> T {
        let n = self.layout.horizon_steps;
        let l = &self.layout;
        let w = &self.weights;

        let mut cost = T::zero();

        for t in 0..n {
            let cte = vars[l.cte_start() + t];
            let epsi = vars[l.epsi_start() + t];
            let dv = vars[l.v_start() + t] - self.target_speed;

            cost = cost + cte * cte * w.cte + epsi * epsi * w.epsi + dv * dv * w.speed;
        }

        for t in 0..n.saturating_sub(1) {
            let delta = vars[l.delta_start() + t];
            let a = vars[l.a_start() + t];

            cost = cost + delta * delta * w.steer + a * a * w.accel;
        }

        for t in 0..n.saturating_sub(2) {
            let d_delta = vars[l.delta_start() + t + 1] - vars[l.delta_start() + t];
            let d_a = vars[l.a_start() + t + 1] - vars[l.a_start() + t];

            cost = cost + d_delta * d_delta * w.steer_rate + d_a * d_a * w.accel_rate;
        }

        cost
    }

    /// Dynamics residuals of step `t`, given the states at `t - 1` and `t` and the actuation
    /// at `t - 1`.
    pub fn step_residuals<T: DualNum<f64> + Copy>(
        &self,
        prev: &ModelState<T>,
        actuation: &Actuation<T>,
        curr: &ModelState<T>,
    ) -> [T; NUM_STATES] {
        let predicted = self.model.step(prev, actuation, &self.curve).to_array();
        let curr = curr.to_array();

        let mut res = curr;
        for c in 0..NUM_STATES {
            res[c] = curr[c] - predicted[c];
        }
        res
    }

    /// Evaluate the constraint vector into `out`.
    pub fn constraints<T: DualNum<f64> + Copy>(&self, vars: &[T], out: &mut [T]) {
        let l = &self.layout;

        for c in 0..NUM_STATES {
            out[l.state_index(c, 0)] = vars[l.state_index(c, 0)];
        }

        for t in 1..l.horizon_steps {
            let res = self.step_residuals(
                &l.state_at(vars, t - 1),
                &l.actuation_at(vars, t - 1),
                &l.state_at(vars, t),
            );

            for c in 0..NUM_STATES {
                out[l.state_index(c, t)] = res[c];
            }
        }
    }

    /// Build the decision vector reached by rolling the model out from `initial` under
    /// `actuations`, laid out as the decision vector from `delta_start` onwards.
    ///
    /// Every dynamics residual of the result is zero.
    pub fn rollout<T: DualNum<f64> + Copy>(
        &self, 
        initial: &VehicleState, 
        actuations: &[T]
    ) -> Vec<T> {
        let l = &self.layout;
        let steps = l.num_actuation_steps();

        let mut vars = vec![T::zero(); l.num_vars()];
        vars[l.delta_start()..].copy_from_slice(actuations);

        let initial = initial.to_array();
        let mut state: ModelState<T> = ModelState::from_array([
            T::zero() + initial[0],
            T::zero() + initial[1],
            T::zero() + initial[2],
            T::zero() + initial[3],
            T::zero() + initial[4],
            T::zero() + initial[5],
        ]);

        for t in 0..l.horizon_steps {
            for (c, &v) in state.to_array().iter().enumerate() {
                vars[l.state_index(c, t)] = v;
            }

            if t < steps {
                let u = Actuation {
                    delta: actuations[t],
                    a: actuations[steps + t],
                };
                state = self.model.step(&state, &u, &self.curve);
            }
        }

        vars
    }

    /// Evaluate the cost and the constraint vector together.
    pub fn fg<T: DualNum<f64> + Copy>(&self, vars: &[T]) -> (T, Vec<T>) {
        let mut g = vec![T::zero(); self.layout.num_constraints()];
        self.constraints(vars, &mut g);

        (self.cost(vars), g)
    }
}

impl OptimizationProblem {
    /// The measured state the first step is pinned to.
    pub fn pinned_state(&self) -> VehicleState {
        let mut state = [0.0; NUM_STATES];
        for (c, v) in state.iter_mut().enumerate() {
            *v = self.constraint_lower[self.layout.state_index(c, 0)];
        }

        VehicleState::from_array(state)
    }

    /// Largest distance of the variables from their bounds.
    pub fn max_bound_violation(&self, vars: &[f64]) -> f64 {
        vars.iter()
            .zip(self.var_lower.iter().zip(self.var_upper.iter()))
            .map(|(&v, (&lo, &hi))| {
                if v.is_nan() {
                    std::f64::INFINITY
                }
                else {
                    (lo - v).max(v - hi).max(0.0)
                }
            })
            .fold(0.0, f64::max)
    }

    /// Largest distance of the constraint vector from its bounds.
    pub fn max_violation(&self, vars: &[f64]) -> f64 {
        let mut g = vec![0.0; self.layout.num_constraints()];
        self.eval.constraints(vars, &mut g);

        g.iter()
            .zip(self.constraint_lower.iter().zip(self.constraint_upper.iter()))
            .map(|(&gi, (&lo, &hi))| {
                if gi.is_nan() {
                    std::f64::INFINITY
                }
                else {
                    (lo - gi).max(gi - hi).max(0.0)
                }
            })
            .fold(0.0, f64::max)
    }
}

// ---------------------------------------------------------------------------
// FUNCTIONS
// ---------------------------------------------------------------------------

/// Build the optimisation problem for one cycle.
pub fn build_problem(
    params: &Params,
    initial: &VehicleState,
    curve: &Polynomial,
    target_speed: f64,
) -> OptimizationProblem {
    let layout = VarLayout::new(params.horizon_steps);
    let n_vars = layout.num_vars();
    let n_cons = layout.num_constraints();
    let initial_arr = initial.to_array();

    // Initial guess is zero apart from the measured state
    let mut initial_guess = vec![0.0; n_vars];
    for (c, &value) in initial_arr.iter().enumerate() {
        initial_guess[layout.state_index(c, 0)] = value;
    }

    // States are unbounded, actuations limited to vehicle capabilities
    let mut var_lower = vec![-params.unbounded_state_limit; n_vars];
    let mut var_upper = vec![params.unbounded_state_limit; n_vars];
    for t in 0..layout.num_actuation_steps() {
        let [i_delta, i_a] = layout.actuation_indices(t);

        var_lower[i_delta] = -params.max_steer_rad;
        var_upper[i_delta] = params.max_steer_rad;
        var_lower[i_a] = -params.max_throttle;
        var_upper[i_a] = params.max_throttle;
    }

    // Dynamics residuals are equalities, the first step is pinned to the measured state
    let mut constraint_lower = vec![0.0; n_cons];
    let mut constraint_upper = vec![0.0; n_cons];
    for (c, &value) in initial_arr.iter().enumerate() {
        constraint_lower[layout.state_index(c, 0)] = value;
        constraint_upper[layout.state_index(c, 0)] = value;
    }

    OptimizationProblem {
        layout,
        initial_guess,
        var_lower,
        var_upper,
        constraint_lower,
        constraint_upper,
        eval: FgEval {
            layout,
            model: MotionModel::new(params.step_duration_s, params.lf_m),
            curve: curve.clone(),
            weights: params.weights,
            target_speed,
        },
    }
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_layout_covers_vector() {
        for n in 3..30 {
            let l = VarLayout::new(n);

            let ranges = [
                (l.x_start(), n),
                (l.y_start(), n),
                (l.psi_start(), n),
                (l.v_start(), n),
                (l.cte_start(), n),
                (l.epsi_start(), n),
                (l.delta_start(), n - 1),
                (l.a_start(), n - 1),
            ];

            // Contiguous and non-overlapping, starting at zero
            let mut next = 0;
            for (start, len) in ranges.iter() {
                assert_eq!(*start, next);
                next += len;
            }

            assert_eq!(next, l.num_vars());
            assert_eq!(l.num_vars(), n * 6 + (n - 1) * 2);
        }

        let l = VarLayout::new(15);
        assert_eq!(l.v_start(), 45);
        assert_eq!(l.delta_start(), 90);
        assert_eq!(l.a_start(), 104);
        assert_eq!(l.num_vars(), 118);
    }

    fn test_state() -> VehicleState {
        VehicleState {
            x: 0.0,
            y: 0.0,
            psi: 0.0,
            v: 20.0,
            cte: 0.5,
            epsi: -0.1,
        }
    }

    #[test]
    fn test_bounds() {
        let params = Params::default();
        let curve = Polynomial::new(vec![0.5, 0.1, 0.0, 0.0]);
        let problem = build_problem(&params, &test_state(), &curve, 80.0);
        let l = problem.layout;

        assert_eq!(problem.initial_guess.len(), l.num_vars());
        assert_eq!(problem.constraint_lower.len(), l.num_constraints());

        // Pinned initial state
        assert_eq!(problem.initial_guess[l.v_start()], 20.0);
        assert_eq!(problem.initial_guess[l.cte_start()], 0.5);
        assert_eq!(problem.constraint_lower[l.epsi_start()], -0.1);
        assert_eq!(problem.constraint_upper[l.epsi_start()], -0.1);
        assert_eq!(problem.initial_guess[l.v_start() + 1], 0.0);
        assert_eq!(problem.pinned_state(), test_state());

        // Equality dynamics
        for t in 1..params.horizon_steps {
            for c in 0..NUM_STATES {
                assert_eq!(problem.constraint_lower[l.state_index(c, t)], 0.0);
                assert_eq!(problem.constraint_upper[l.state_index(c, t)], 0.0);
            }
        }

        // Variable bounds
        assert_eq!(problem.var_upper[l.x_start() + 3], 1.0e19);
        assert_eq!(problem.var_lower[l.epsi_start() + 14], -1.0e19);
        assert_eq!(problem.var_lower[l.delta_start()], -0.436332);
        assert_eq!(problem.var_upper[l.delta_start() + 13], 0.436332);
        assert_eq!(problem.var_lower[l.a_start()], -1.0);
        assert_eq!(problem.var_upper[l.a_start() + 13], 1.0);
    }

    #[test]
    fn test_rolled_out_guess_is_feasible() {
        let params = Params::default();
        let curve = Polynomial::new(vec![0.5, 0.1, 0.002, 0.0]);
        let problem = build_problem(&params, &test_state(), &curve, 80.0);
        let l = problem.layout;

        // Roll the model out under some actuation and write it into a decision vector
        let actuations: Vec<Actuation<f64>> = (0..params.horizon_steps - 1)
            .map(|t| Actuation { delta: 0.01 * t as f64, a: 0.5 })
            .collect();
        let states = problem.eval.model.propagate(&test_state(), &actuations, &curve);

        let mut vars = vec![0.0; l.num_vars()];
        for (t, s) in states.iter().enumerate() {
            for (c, v) in s.to_array().iter().enumerate() {
                vars[l.state_index(c, t)] = *v;
            }
        }
        for (t, u) in actuations.iter().enumerate() {
            let [i_delta, i_a] = l.actuation_indices(t);
            vars[i_delta] = u.delta;
            vars[i_a] = u.a;
        }

        assert_abs_diff_eq!(problem.max_violation(&vars), 0.0, epsilon = 1e-12);

        // Perturbing a single state breaks exactly that residual and the next step's
        vars[l.y_start() + 5] += 0.25;
        let (_, g) = problem.eval.fg(&vars);
        assert_abs_diff_eq!(g[l.y_start() + 5], 0.25, epsilon = 1e-12);
        assert_abs_diff_eq!(problem.max_violation(&vars), 0.25, epsilon = 1e-12);

        // The unmodified guess violates the dynamics
        assert!(problem.max_violation(&problem.initial_guess) > 0.0);
    }

    #[test]
    fn test_rollout() {
        let params = Params::default();
        let curve = Polynomial::new(vec![0.5, 0.1, 0.002, -0.0001]);
        let problem = build_problem(&params, &test_state(), &curve, 80.0);
        let l = problem.layout;

        let mut actuations = vec![0.0; l.num_actuation_vars()];
        for t in 0..l.num_actuation_steps() {
            actuations[t] = 0.02 - 0.003 * t as f64;
            actuations[l.num_actuation_steps() + t] = -0.4 + 0.1 * t as f64;
        }

        let vars = problem.eval.rollout(&test_state(), &actuations);

        assert_eq!(vars.len(), l.num_vars());
        assert_eq!(&vars[l.delta_start()..], &actuations[..]);
        assert_eq!(l.state_at(&vars, 0), test_state());
        assert_eq!(problem.max_violation(&vars), 0.0);
        assert_eq!(problem.max_bound_violation(&vars), 0.0);

        // Same trajectory as propagating the model directly
        let steps: Vec<Actuation<f64>> = (0..l.num_actuation_steps())
            .map(|t| l.actuation_at(&vars, t))
            .collect();
        let states = problem.eval.model.propagate(&test_state(), &steps, &curve);
        for (t, s) in states.iter().enumerate() {
            assert_eq!(l.state_at(&vars, t), *s);
        }

        // Steering beyond its limit shows as a bound violation only
        actuations[0] = 1.0;
        let vars = problem.eval.rollout(&test_state(), &actuations);
        assert_eq!(problem.max_violation(&vars), 0.0);
        assert_abs_diff_eq!(
            problem.max_bound_violation(&vars), 
            1.0 - params.max_steer_rad, 
            epsilon = 1e-12
        );
    }

    #[test]
    fn test_degenerate_horizon_does_not_panic() {
        let l = VarLayout::new(1);

        assert_eq!(l.num_actuation_steps(), 0);
        assert_eq!(l.num_vars(), NUM_STATES);

        let params = Params {
            horizon_steps: 1,
            ..Default::default()
        };
        let curve = Polynomial::new(vec![0.0; 4]);
        let problem = build_problem(&params, &test_state(), &curve, 10.0);

        assert_abs_diff_eq!(problem.eval.cost(&problem.initial_guess), 100.0 + 0.25 + 0.01, 
            epsilon = 1e-12);
    }

    #[test]
    fn test_cost_terms() {
        let params = Params {
            horizon_steps: 3,
            ..Default::default()
        };
        let curve = Polynomial::new(vec![0.0; 4]);
        let problem = build_problem(&params, &VehicleState::default(), &curve, 10.0);
        let l = problem.layout;

        let mut vars = vec![0.0; l.num_vars()];

        // Speed error only, three steps of (0 - 10)^2
        assert_abs_diff_eq!(problem.eval.cost(&vars), 300.0, epsilon = 1e-12);

        for t in 0..3 {
            vars[l.v_start() + t] = 10.0;
        }
        vars[l.cte_start() + 1] = 2.0;
        vars[l.epsi_start() + 2] = 0.5;
        vars[l.delta_start()] = 0.1;
        vars[l.delta_start() + 1] = 0.3;
        vars[l.a_start() + 1] = 1.0;

        let expected = 4.0 
            + 0.25 
            + 150.0 * (0.01 + 0.09) 
            + 1.0 
            + 2000.0 * 0.04 
            + 1.0;
        assert_abs_diff_eq!(problem.eval.cost(&vars), expected, epsilon = 1e-9);
    }
}
