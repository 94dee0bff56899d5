//! Latency compensated command extraction

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use serde::Serialize;

use super::{ConfigInvariantViolation, Params, VarLayout, VehicleState};

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// Command sent to the vehicle.
#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq)]
pub struct ActuatorCommand {
    /// Steering normalised to [-1, 1], positive in the simulator's convention (opposite to the
    /// model's).
    pub steering: f64,

    /// Throttle in [-1, 1], negative values brake.
    pub throttle: f64,
}

/// Data extracted from a solution.
#[derive(Debug, Clone, Serialize)]
pub struct Extracted {
    pub command: ActuatorCommand,

    /// State predicted once the actuation latency has elapsed.
    pub predicted_state: VehicleState,

    /// Predicted x positions over the whole horizon, vehicle frame.
    pub predicted_x: Vec<f64>,

    /// Predicted y positions over the whole horizon, vehicle frame.
    pub predicted_y: Vec<f64>,
}

// ---------------------------------------------------------------------------
// FUNCTIONS
// ---------------------------------------------------------------------------

/// Extract the command due once the actuation latency has elapsed from a solved decision
/// vector.
///
/// The actuation is read at the latency step offset and the predicted state one step later.
pub fn extract(
    solution: &[f64], 
    layout: &VarLayout, 
    params: &Params
) -> Result<Extracted, ConfigInvariantViolation> {
    let n = layout.horizon_steps();
    let offset = params.step_offset();

    if offset + 2 > n {
        return Err(ConfigInvariantViolation(format!(
            "latency step offset {} does not fit a {} step horizon", offset, n
        )))
    }
    if solution.len() != layout.num_vars() {
        return Err(ConfigInvariantViolation(format!(
            "solution has {} entries but the layout needs {}", 
            solution.len(), layout.num_vars()
        )))
    }

    let actuation = layout.actuation_at(solution, offset);
    let predicted_state = layout.state_at(solution, offset + 1);

    let command = ActuatorCommand {
        steering: -actuation.delta / params.max_steer_rad,
        throttle: actuation.a,
    };

    Ok(Extracted {
        command,
        predicted_state,
        predicted_x: solution[layout.x_start()..layout.x_start() + n].to_vec(),
        predicted_y: solution[layout.y_start()..layout.y_start() + n].to_vec(),
    })
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------
