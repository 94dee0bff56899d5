//! One control cycle, from raw telemetry to a command

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use comms_if::sim::Telemetry;
use log::{debug, trace};
use serde::Serialize;

use super::{
    actuation, build_problem, speed_reg,
    solver::{Optimizer, SolveFailure, SolveStats},
    ActuatorCommand, ConfigInvariantViolation, Extracted, FitError, OptimizationProblem, Params, 
    Polynomial, VehiclePose, VehicleState,
};

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// Result of a successful cycle.
#[derive(Debug, Clone, Serialize)]
pub struct CycleOutput {
    pub command: ActuatorCommand,

    /// Reference curve fitted in the vehicle frame.
    pub curve: Polynomial,

    /// State the problem was solved from.
    pub initial_state: VehicleState,

    pub target_speed: f64,

    /// True if the target speed was limited to the configured range.
    pub target_speed_limited: bool,

    pub extracted: Extracted,

    /// Reference curve samples, vehicle frame.
    pub ref_x: Vec<f64>,
    pub ref_y: Vec<f64>,

    pub cost: f64,

    pub stats: SolveStats,
}

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

/// Reasons a cycle produced no command.
#[derive(Debug, thiserror::Error)]
pub enum CycleError {
    #[error("Invalid telemetry: {0}")]
    InvalidInput(String),

    #[error("Could not fit the reference curve: {0}")]
    FitError(FitError),

    #[error("Solve failed: {failure}")]
    SolveFailed {
        failure: SolveFailure,
        problem: Box<OptimizationProblem>,
        stats: SolveStats,
    },

    #[error(transparent)]
    ConfigInvariantViolation(ConfigInvariantViolation),
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl CycleError {
    /// Configuration errors are fatal, every other error only voids the current cycle.
    pub fn is_fatal(&self) -> bool {
        match self {
            CycleError::ConfigInvariantViolation(_) => true,
            _ => false
        }
    }
}

impl From<FitError> for CycleError {
    fn from(e: FitError) -> Self {
        CycleError::FitError(e)
    }
}

impl From<ConfigInvariantViolation> for CycleError {
    fn from(e: ConfigInvariantViolation) -> Self {
        CycleError::ConfigInvariantViolation(e)
    }
}

// ---------------------------------------------------------------------------
// FUNCTIONS
// ---------------------------------------------------------------------------

/// Run one control cycle.
///
/// Depends only on the arguments. Per session data such as the previous command is held by the
/// caller. Invalid parameters are reported as a configuration error before anything is built.
pub fn run(
    params: &Params,
    telem: &Telemetry,
    optimizer: &mut dyn Optimizer,
) -> Result<CycleOutput, CycleError> {

    // ---- INPUT CHECKS ----

    params.validate()?;

    if telem.ptsx.len() != telem.ptsy.len() {
        return Err(CycleError::InvalidInput(format!(
            "{} waypoint x values but {} y values", telem.ptsx.len(), telem.ptsy.len()
        )))
    }
    if ![telem.x, telem.y, telem.psi, telem.speed].iter().all(|v| v.is_finite()) {
        return Err(CycleError::InvalidInput(String::from("non-finite vehicle pose or speed")))
    }

    // ---- REFERENCE CURVE ----

    let pose = VehiclePose::new(telem.x, telem.y, telem.psi);
    let (xs_v, ys_v) = pose.waypoints_to_vehicle_frame(&telem.ptsx, &telem.ptsy);

    let curve = Polynomial::fit(&xs_v, &ys_v, params.poly_order)?;
    let coeffs = curve.coeffs();

    trace!("MpcCtrl reference curve coefficients: {:?}", coeffs);

    // The vehicle sits at the origin of its own frame, so the errors are read from the lowest
    // order terms
    let initial_state = VehicleState {
        x: 0.0,
        y: 0.0,
        psi: 0.0,
        v: telem.speed,
        cte: coeffs[0],
        epsi: coeffs[1].atan(),
    };

    trace!("MpcCtrl initial state: {:?}", initial_state);

    // ---- TARGET SPEED ----

    let (target_speed, target_speed_limited) = 
        speed_reg::target_speed(&curve, telem.speed, params);

    debug!(
        "MpcCtrl target speed {:.2}{}", 
        target_speed, 
        if target_speed_limited { " (limited)" } else { "" }
    );

    // ---- SOLVE ----

    let problem = build_problem(params, &initial_state, &curve, target_speed);
    let result = optimizer.solve(&problem);

    if let Some(failure) = result.failure() {
        return Err(CycleError::SolveFailed {
            failure: failure.clone(),
            stats: result.stats,
            problem: Box::new(problem),
        })
    }

    // ---- EXTRACTION ----

    let extracted = actuation::extract(&result.solution, &problem.layout, params)?;

    trace!("MpcCtrl command: {:?}", extracted.command);

    let (ref_x, ref_y) = reference_samples(&curve, &xs_v, params.num_ref_points);

    Ok(CycleOutput {
        command: extracted.command,
        curve,
        initial_state,
        target_speed,
        target_speed_limited,
        extracted,
        ref_x,
        ref_y,
        cost: result.cost,
        stats: result.stats,
    })
}

/// Sample the curve at evenly spaced x values from the vehicle to the last waypoint, both ends
/// included.
pub fn reference_samples(
    curve: &Polynomial, 
    xs_v: &[f64], 
    num_points: usize
) -> (Vec<f64>, Vec<f64>) {
    let last_x = xs_v.last().cloned().unwrap_or(0.0);
    let step = if num_points > 1 {
        last_x / (num_points - 1) as f64
    }
    else {
        0.0
    };

    (0..num_points)
        .map(|i| {
            let x = step * i as f64;
            (x, curve.eval(x))
        })
        .unzip()
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------
