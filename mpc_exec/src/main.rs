//! # MPC Controller Executable
//!
//! This executable drives a simulated vehicle around a track. Each telemetry frame recieved from
//! the simulator bridge runs one control cycle, and the resulting steering command is sent back 
//! after an artificial delay emulating actuation latency.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

// External
use color_eyre::{Result, eyre::WrapErr};
use comms_if::{net::NetParams, sim::SimEvent};
use log::{info, warn, trace};
use std::time::Duration;

// Internal
use mpc_lib::{
    mpc_ctrl::MpcCtrl,
    telem_server::TelemServer,
};
use util::{
    archive::Archived,
    logger::{logger_init, LevelFilter},
    module::{init_module, State},
    session::Session,
};

// ------------------------------------------------------------------------------------------------
// MAIN
// ------------------------------------------------------------------------------------------------

fn main() -> Result<()> {

    // ---- EARLY INITIALISATION ----

    // Initialise session
    let session = Session::new(
        "mpc_exec", 
        "sessions"
    ).wrap_err("Failed to create the session")?;

    // Initialise logger
    logger_init(LevelFilter::Debug, &session)
        .wrap_err("Failed to initialise logging")?;

    // Log information on this execution.
    info!("MPC Controller Executable\n");
    info!("Session directory: {:?}\n", session.session_root);

    info!("Initialising...");

    // ---- LOAD PARAMETERS ----

    let net_params: NetParams = util::params::load("net.toml")
        .wrap_err("Could not load net params")?;
    let latency = Duration::from_millis(net_params.simulated_latency_ms);

    info!("Parameters loaded");

    // ---- MODULE INITIALISATION ----

    let mut mpc_ctrl: MpcCtrl = init_module("mpc_ctrl.toml", &session)
        .wrap_err("Failed to initialise MpcCtrl")?;

    // ---- SERVER INITIALISATION ----

    let mut server = TelemServer::new(&net_params)
        .wrap_err("Failed to initialise server")?;
    
    info!("Server initialised on {}", net_params.sim_endpoint);

    // ---- MAIN LOOP ----

    info!("Initialisation complete, entering main loop");

    let result = run(&mut mpc_ctrl, &mut server, latency);

    // Only reached on a fatal error, flush any failed solve dumps before exiting
    session.exit();

    result
}

// ------------------------------------------------------------------------------------------------
// FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Serve the simulator bridge until a fatal error occurs.
fn run(mpc_ctrl: &mut MpcCtrl, server: &mut TelemServer, latency: Duration) -> Result<()> {
    loop {
        // Get the next frame from the bridge
        let event = match server.get_event() {
            Some(e) => e,
            None => continue
        };

        let reply = match event {
            SimEvent::Telemetry(telem) => {
                trace!("Recieved telemetry at ({:.2}, {:.2})", telem.x, telem.y);

                let (output, _report) = mpc_ctrl.proc(&telem)
                    .wrap_err("Fatal error in MpcCtrl")?;

                if let Err(e) = mpc_ctrl.write() {
                    warn!("Could not write MpcCtrl archives: {}", e);
                }

                // Emulate actuation latency before replying
                std::thread::sleep(latency);

                server.send_steer(&output.to_steer_cmd())
            },
            SimEvent::Manual => server.send_manual(),
            SimEvent::Other(name) => {
                trace!("Ignoring event {:?}", name);
                server.send_empty()
            },
            SimEvent::NotAnEvent => server.send_empty()
        };

        if let Err(e) = reply {
            warn!("Couldn't send reply to the simulator bridge: {}", e);
        }
    }
}
