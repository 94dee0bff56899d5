//! # Simulator message boundary
//!
//! The driving simulator talks in socket.io style frames: a `42` prefix followed by a JSON array
//! of `[event_name, payload]`. This module decodes inbound telemetry frames and encodes the
//! outbound `steer` and `manual` frames.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// External
use serde::{Serialize, Deserialize};
use serde_json::{self, Value};
use thiserror::Error;

// ---------------------------------------------------------------------------
// CONSTANTS
// ---------------------------------------------------------------------------

/// Prefix carried by every socket.io event message.
pub const EVENT_PREFIX: &str = "42";

/// Name of the inbound telemetry event.
pub const TELEMETRY_EVENT: &str = "telemetry";

/// Name of the outbound steering event.
pub const STEER_EVENT: &str = "steer";

/// Frame sent when the inbound message carried no usable telemetry.
pub const MANUAL_FRAME: &str = "42[\"manual\",{}]";

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// Vehicle telemetry received from the simulator.
///
/// Waypoints and pose are in the world frame.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Telemetry {
    /// Waypoint x coordinates
    pub ptsx: Vec<f64>,

    /// Waypoint y coordinates
    pub ptsy: Vec<f64>,

    /// Vehicle x position
    pub x: f64,

    /// Vehicle y position
    pub y: f64,

    /// Vehicle heading
    ///
    /// Units: radians
    pub psi: f64,

    /// Vehicle speed
    pub speed: f64
}

/// Steering command sent back to the simulator.
///
/// The trajectories are in the vehicle frame and are only used for display.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SteerCmd {
    /// Normalised steering, in [-1, 1]
    pub steering_angle: f64,

    /// Throttle in [-1, 1], negative values brake
    pub throttle: f64,

    /// Predicted trajectory x coordinates
    pub mpc_x: Vec<f64>,

    /// Predicted trajectory y coordinates
    pub mpc_y: Vec<f64>,

    /// Reference curve sample x coordinates
    pub next_x: Vec<f64>,

    /// Reference curve sample y coordinates
    pub next_y: Vec<f64>
}

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

/// A decoded inbound frame.
#[derive(Debug, Clone, PartialEq)]
pub enum SimEvent {
    /// A telemetry event carrying a usable payload.
    Telemetry(Telemetry),

    /// An event frame without usable telemetry, answered with [`MANUAL_FRAME`].
    Manual,

    /// An event other than telemetry.
    Other(String),

    /// The frame is not a socket.io event message.
    NotAnEvent
}

/// Reasons an event frame carries no usable telemetry.
#[derive(Debug, Error)]
pub enum FrameError {
    #[error("Frame contains null data")]
    NullData,

    #[error("Frame has no JSON event array")]
    MissingArray,

    #[error("Frame contains invalid JSON: {0}")]
    InvalidJson(serde_json::Error),

    #[error("Event array does not start with an event name")]
    MissingEventName,

    #[error("Telemetry payload could not be parsed: {0}")]
    InvalidTelemetry(serde_json::Error),

    #[error("Could not serialise the steer command: {0}")]
    SerialiseError(serde_json::Error)
}

// ---------------------------------------------------------------------------
// FUNCTIONS
// ---------------------------------------------------------------------------

/// Decode an inbound frame into an event.
///
/// Any failure to extract a telemetry payload from an event frame is mapped to
/// [`SimEvent::Manual`], use [`decode_event`] to get the cause.
pub fn parse_frame(frame: &str) -> SimEvent {
    if !frame.starts_with(EVENT_PREFIX) {
        return SimEvent::NotAnEvent
    }

    match decode_event(frame) {
        Ok(e) => e,
        Err(e) => {
            log::warn!("No usable telemetry in frame: {}", e);
            SimEvent::Manual
        }
    }
}

/// Decode an event frame, returning the reason if it carries no usable data.
pub fn decode_event(frame: &str) -> Result<SimEvent, FrameError> {
    let json_str = extract_json(frame)?;

    let val: Value = serde_json::from_str(json_str)
        .map_err(FrameError::InvalidJson)?;

    let event = val[0].as_str()
        .ok_or(FrameError::MissingEventName)?;

    if event != TELEMETRY_EVENT {
        return Ok(SimEvent::Other(event.to_string()))
    }

    let telem = Telemetry::deserialize(&val[1])
        .map_err(FrameError::InvalidTelemetry)?;

    Ok(SimEvent::Telemetry(telem))
}

/// Encode a steering command as an outbound `steer` frame.
pub fn steer_frame(cmd: &SteerCmd) -> Result<String, FrameError> {
    let payload = serde_json::to_string(&(STEER_EVENT, cmd))
        .map_err(FrameError::SerialiseError)?;

    Ok(format!("{}{}", EVENT_PREFIX, payload))
}

/// Extract the JSON array from an event frame, spanning from the first `[` to the last `}]`.
fn extract_json(frame: &str) -> Result<&str, FrameError> {
    if frame.contains("null") {
        return Err(FrameError::NullData)
    }

    let start = frame.find('[').ok_or(FrameError::MissingArray)?;
    let end = frame.rfind("}]").ok_or(FrameError::MissingArray)?;

    if end < start {
        return Err(FrameError::MissingArray)
    }

    Ok(&frame[start..end + 2])
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------
