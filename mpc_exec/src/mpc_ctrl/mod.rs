//! Model predictive control module
//!
//! Each cycle the waypoints ahead of the vehicle are fitted with a cubic in the vehicle frame, a
//! finite horizon optimal control problem over a kinematic bicycle model is built around that
//! curve and solved, and the command due once the actuation latency has elapsed is extracted.

// ---------------------------------------------------------------------------
// MODULES
// ---------------------------------------------------------------------------

mod actuation;
mod cycle;
mod frame;
mod motion_model;
mod params;
mod poly;
mod problem;
mod speed_reg;
mod state;
pub mod solver;

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// Internal
pub use actuation::*;
pub use cycle::*;
pub use frame::*;
pub use motion_model::*;
pub use params::*;
pub use poly::*;
pub use problem::*;
pub use speed_reg::*;
pub use state::*;

// ---------------------------------------------------------------------------
// CONSTANTS
// ---------------------------------------------------------------------------

/// Number of state components per horizon step (x, y, psi, v, cte, epsi).
pub const NUM_STATES: usize = 6;

/// Number of actuation components per horizon step (steering, acceleration).
pub const NUM_ACTUATIONS: usize = 2;

/// Tolerance added before truncating the latency step offset, absorbing representation error in
/// values such as `0.1 / 0.05`.
pub const STEP_OFFSET_EPSILON: f64 = 1e-9;

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

/// A configuration invariant that does not hold. This is a programming or parameter error and is
/// never retried.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("Configuration invariant violated: {0}")]
pub struct ConfigInvariantViolation(pub String);

/// Fatal errors that can occur during MpcCtrl operation.
#[derive(Debug, thiserror::Error)]
pub enum MpcCtrlError {
    #[error("Could not load the parameters: {0}")]
    ParamLoadError(util::params::LoadError),

    #[error(transparent)]
    InvalidConfig(ConfigInvariantViolation),

    #[error("Could not initialise the archives: {0}")]
    ArchiveError(util::archive::ArchiveError),
}
