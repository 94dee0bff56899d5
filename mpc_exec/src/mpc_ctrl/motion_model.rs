//! Discrete kinematic bicycle model

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use num_dual::DualNum;
use serde::Serialize;

use super::Polynomial;

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// State of the vehicle at one horizon step, generic so the same model yields derivatives.
#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq)]
pub struct ModelState<T> {
    /// Units: meters, Frame: vehicle at the start of the cycle
    pub x: T,

    /// Units: meters, Frame: vehicle at the start of the cycle
    pub y: T,

    /// Units: radians
    pub psi: T,

    pub v: T,

    /// Cross track error against the reference curve.
    pub cte: T,

    /// Heading error against the reference curve's tangent.
    ///
    /// Units: radians
    pub epsi: T,
}

/// The measured vehicle state.
pub type VehicleState = ModelState<f64>;

/// Actuation applied over one horizon step.
#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq)]
pub struct Actuation<T> {
    /// Steering angle in the model's convention.
    ///
    /// Units: radians
    pub delta: T,

    /// Acceleration, the throttle command.
    pub a: T,
}

/// Kinematic bicycle model stepped with a fixed duration.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct MotionModel {
    /// Units: seconds
    pub dt: f64,

    /// Units: meters
    pub lf: f64,
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl<T: Copy> ModelState<T> {
    /// Components in decision vector order.
    pub fn to_array(&self) -> [T; 6] {
        [self.x, self.y, self.psi, self.v, self.cte, self.epsi]
    }

    pub fn from_array(a: [T; 6]) -> Self {
        Self {
            x: a[0],
            y: a[1],
            psi: a[2],
            v: a[3],
            cte: a[4],
            epsi: a[5],
        }
    }
}

impl MotionModel {
    pub fn new(dt: f64, lf: f64) -> Self {
        Self { dt, lf }
    }

    /// Predict the state one step ahead.
    ///
    /// The cross track error is taken against the curve at the next x position, compared with
    /// the next y position. The heading error is taken against the curve's tangent at the current
    /// x position, advanced by the yaw rate.
    pub fn step<T>(&self, s: &ModelState<T>, u: &Actuation<T>, curve: &Polynomial) -> ModelState<T> 
    where
        T: DualNum<f64> + Copy
    {
        let x_next = s.x + s.v * s.psi.cos() * self.dt;
        let y_next = s.y + s.v * s.psi.sin() * self.dt;
        let yaw_step = s.v * u.delta * (self.dt / self.lf);

        let desired_psi = curve.eval_derivative(s.x).atan();

        ModelState {
            x: x_next,
            y: y_next,
            psi: s.psi + yaw_step,
            v: s.v + u.a * self.dt,
            cte: curve.eval(x_next) - y_next,
            epsi: (s.psi - desired_psi) + yaw_step,
        }
    }

    /// Roll the model forward from `initial` through every actuation, returning all states
    /// including the initial one.
    pub fn propagate(
        &self, 
        initial: &VehicleState, 
        actuations: &[Actuation<f64>], 
        curve: &Polynomial
    ) -> Vec<VehicleState> {
        let mut states = Vec::with_capacity(actuations.len() + 1);
        states.push(*initial);

        for u in actuations {
            let next = self.step(&states[states.len() - 1], u, curve);
            states.push(next);
        }

        states
    }
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------
