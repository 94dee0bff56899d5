//! Parameters structure for MpcCtrl

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use serde::{Deserialize, Serialize};
use super::{ConfigInvariantViolation, STEP_OFFSET_EPSILON};

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// Parameters for MPC control.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Params {

    // ---- HORIZON ----

    /// Number of steps in the prediction horizon.
    pub horizon_steps: usize,

    /// Duration of a single horizon step.
    ///
    /// Units: seconds
    pub step_duration_s: f64,

    /// Distance between the vehicle's centre of gravity and its front axle, tuned so that the
    /// kinematic model matches the simulated vehicle's turning radius.
    ///
    /// Units: meters
    pub lf_m: f64,

    // ---- CAPABILITIES ----

    /// Maximum steering angle magnitude, also used to normalise the steering command.
    ///
    /// Units: radians
    pub max_steer_rad: f64,

    /// Maximum throttle magnitude.
    pub max_throttle: f64,

    /// Magnitude used in place of "no limit" for the state variable bounds.
    pub unbounded_state_limit: f64,

    // ---- SPEED REGULATION ----

    /// Target speed on a straight track.
    pub max_speed: f64,

    /// Target speed floor on a tightly curving track.
    pub min_speed: f64,

    /// Sensitivity of the target speed to the heading deviation at the end of the horizon.
    pub curvature_factor: f64,

    // ---- LATENCY ----

    /// Delay between issuing a command and it taking effect.
    ///
    /// Units: seconds
    pub actuation_latency_s: f64,

    // ---- CURVE FITTING ----

    /// Order of the polynomial fitted to the waypoints.
    pub poly_order: usize,

    /// Number of reference curve samples produced for display.
    pub num_ref_points: usize,

    // ---- COST AND SOLVER ----

    pub weights: CostWeights,

    pub solver: SolverParams,
}

/// Weights of each term of the cost function.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq)]
pub struct CostWeights {
    pub cte: f64,
    pub epsi: f64,
    pub speed: f64,
    pub steer: f64,
    pub accel: f64,
    pub steer_rate: f64,
    pub accel_rate: f64,
}

/// Tuning of the optimiser.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SolverParams {
    /// Tolerance on the fixed point residual at which a solve counts as converged.
    pub tolerance: f64,

    /// Maximum constraint violation accepted for a converged solution to count as feasible.
    pub feasibility_tolerance: f64,

    /// Number of past iterates kept by the L-BFGS direction.
    pub lbfgs_memory: usize,

    pub max_iterations: usize,

    /// Wall clock budget of a single solve. When omitted solves are limited by iterations only
    /// and are deterministic.
    ///
    /// Units: seconds
    #[serde(default)]
    pub max_solve_time_s: Option<f64>,
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl Params {
    /// Number of horizon steps the actuation latency spans.
    pub fn step_offset(&self) -> usize {
        (self.actuation_latency_s / self.step_duration_s + STEP_OFFSET_EPSILON).floor() as usize
    }

    /// Check the configuration invariants.
    pub fn validate(&self) -> Result<(), ConfigInvariantViolation> {
        let fail = |msg: String| Err(ConfigInvariantViolation(msg));

        if self.horizon_steps < 3 {
            return fail(format!(
                "horizon_steps must be at least 3, got {}", self.horizon_steps
            ))
        }
        if !(self.step_duration_s > 0.0) {
            return fail(format!(
                "step_duration_s must be positive, got {}", self.step_duration_s
            ))
        }
        if !(self.lf_m > 0.0) {
            return fail(format!("lf_m must be positive, got {}", self.lf_m))
        }
        if !(self.max_steer_rad > 0.0) {
            return fail(format!(
                "max_steer_rad must be positive, got {}", self.max_steer_rad
            ))
        }
        if !(self.max_throttle > 0.0) {
            return fail(format!(
                "max_throttle must be positive, got {}", self.max_throttle
            ))
        }
        if !(self.max_speed >= self.min_speed) {
            return fail(format!(
                "max_speed ({}) must not be below min_speed ({})", 
                self.max_speed, self.min_speed
            ))
        }
        if !(self.actuation_latency_s >= 0.0) {
            return fail(format!(
                "actuation_latency_s must not be negative, got {}", self.actuation_latency_s
            ))
        }
        if self.poly_order < 1 {
            return fail(String::from("poly_order must be at least 1"))
        }
        if self.num_ref_points < 2 {
            return fail(format!(
                "num_ref_points must be at least 2, got {}", self.num_ref_points
            ))
        }

        self.check_step_offset()
    }

    /// Check that the state read after the latency offset lies inside the horizon.
    pub fn check_step_offset(&self) -> Result<(), ConfigInvariantViolation> {
        let offset = self.step_offset();

        if offset + 2 > self.horizon_steps {
            return Err(ConfigInvariantViolation(format!(
                "latency of {} s is {} steps, which leaves no predicted state within a \
                {} step horizon",
                self.actuation_latency_s, offset, self.horizon_steps
            )))
        }

        Ok(())
    }
}

impl Default for Params {
    fn default() -> Self {
        Self {
            horizon_steps: 15,
            step_duration_s: 0.05,
            lf_m: 2.67,
            max_steer_rad: 0.436332,
            max_throttle: 1.0,
            unbounded_state_limit: 1.0e19,
            max_speed: 100.0,
            min_speed: 45.0,
            curvature_factor: 2.0,
            actuation_latency_s: 0.1,
            poly_order: 3,
            num_ref_points: 15,
            weights: CostWeights::default(),
            solver: SolverParams::default(),
        }
    }
}

impl Default for CostWeights {
    fn default() -> Self {
        Self {
            cte: 1.0,
            epsi: 1.0,
            speed: 1.0,
            steer: 150.0,
            accel: 1.0,
            steer_rate: 2000.0,
            accel_rate: 1.0,
        }
    }
}

impl Default for SolverParams {
    fn default() -> Self {
        Self {
            tolerance: 1e-5,
            feasibility_tolerance: 1e-6,
            lbfgs_memory: 10,
            max_iterations: 500,
            max_solve_time_s: None,
        }
    }
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_default_step_offset() {
        let params = Params::default();

        assert_eq!(params.step_offset(), 2);
        assert!(params.validate().is_ok());
    }

    #[test]
    fn test_params_file() {
        let params: Params = util::params::parse(
            include_str!("../../../params/mpc_ctrl.toml")
        ).unwrap();
        let defaults = Params::default();

        assert_eq!(params.horizon_steps, defaults.horizon_steps);
        assert_eq!(params.step_duration_s, defaults.step_duration_s);
        assert_eq!(params.lf_m, defaults.lf_m);
        assert_eq!(params.max_steer_rad, defaults.max_steer_rad);
        assert_eq!(params.max_speed, defaults.max_speed);
        assert_eq!(params.min_speed, defaults.min_speed);
        assert_eq!(params.actuation_latency_s, defaults.actuation_latency_s);
        assert_eq!(params.weights, defaults.weights);
        assert_eq!(params.solver.max_iterations, defaults.solver.max_iterations);
        assert_eq!(params.solver.max_solve_time_s, Some(0.5));
        assert!(params.validate().is_ok());
    }

    #[test]
    fn test_latency_outside_horizon() {
        let params = Params {
            horizon_steps: 4,
            actuation_latency_s: 0.15,
            ..Default::default()
        };

        // Offset 3 needs the state at step 4 of a 4 step horizon
        assert_eq!(params.step_offset(), 3);
        assert!(params.validate().is_err());

        let params = Params {
            horizon_steps: 5,
            ..params
        };
        assert!(params.validate().is_ok());
    }

    #[test]
    fn test_invalid_values() {
        assert!(Params { step_duration_s: 0.0, ..Default::default() }.validate().is_err());
        assert!(Params { lf_m: -1.0, ..Default::default() }.validate().is_err());
        assert!(Params { horizon_steps: 2, ..Default::default() }.validate().is_err());
        assert!(Params { min_speed: 120.0, ..Default::default() }.validate().is_err());
        assert!(Params { max_steer_rad: std::f64::NAN, ..Default::default() }
            .validate().is_err());
    }
}
