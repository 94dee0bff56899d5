//! # MPC library.
//!
//! This library allows other crates in the workspace (and the benchmarks) to access items defined
//! inside the controller crate.

// ------------------------------------------------------------------------------------------------
// MODULES
// ------------------------------------------------------------------------------------------------

/// MPC control module - converts waypoint telemetry into steering and throttle commands
pub mod mpc_ctrl;

/// Telemetry server - recieves telemetry frames from the simulator bridge and replies with commands
pub mod telem_server;
