//! # Telemetry Server Module
//!
//! This module abstracts over the networking side of the controller. The server accepts a
//! connection from the simulator bridge, which forwards every simulator frame as a request and 
//! relays the reply back to the simulator.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use comms_if::{
    net::{zmq, MonitoredSocket, SocketOptions, MonitoredSocketError, NetParams}, 
    sim::{self, SimEvent, SteerCmd}
};
use log::{info, warn};

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// An abstraction over the networking part of the controller.
///
/// The socket is a REP socket, so every frame obtained from [`TelemServer::get_event`] must be
/// answered with exactly one of the `send_*` functions before the next is read.
pub struct TelemServer {

    /// REP socket which accepts frames from the bridge
    socket: MonitoredSocket,

    /// Connection state at the last check, used to log transitions
    was_connected: bool,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

/// Errors which can occur in the [`TelemServer`]
#[derive(thiserror::Error, Debug)]
pub enum TelemServerError {
    #[error("Socket error: {0}")]
    SocketError(MonitoredSocketError),

    #[error("Could not send data to the client: {0}")]
    SendError(zmq::Error),

    #[error("Could not encode the reply: {0}")]
    EncodeError(sim::FrameError),
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl TelemServer {

    /// Create a new instance of the telemetry server.
    ///
    /// This function will not wait for a connection from the client before returning.
    pub fn new(params: &NetParams) -> Result<Self, TelemServerError> {

        // Create the zmq context
        let ctx = zmq::Context::new();

        // Create the socket options
        let socket_options = SocketOptions {
            bind: true,
            block_on_first_connect: false,
            recv_timeout: params.sim_recv_timeout_ms,
            send_timeout: params.sim_send_timeout_ms,
            ..Default::default()
        };

        // Create the socket
        let socket = MonitoredSocket::new(
            &ctx, 
            zmq::REP,
            socket_options, 
            &params.sim_endpoint
        )?;

        Ok(Self {
            socket,
            was_connected: false
        })
    }

    /// Retrieve the next frame from the client and decode it.
    ///
    /// `None` is returned if no frame arrived before the receive timeout, in which case no reply
    /// is owed.
    pub fn get_event(&mut self) -> Option<SimEvent> {
        self.check_connection();

        // Read from the socket
        let msg = match self.socket.recv_msg(0) {
            Ok(m) => m,
            Err(_) => return None
        };

        match msg.as_str() {
            Some(s) => Some(sim::parse_frame(s)),
            None => {
                warn!("Recieved a frame which is not valid UTF-8");
                Some(SimEvent::Manual)
            }
        }
    }

    /// Reply with a steering command.
    pub fn send_steer(&mut self, cmd: &SteerCmd) -> Result<(), TelemServerError> {
        let frame = sim::steer_frame(cmd)
            .map_err(TelemServerError::EncodeError)?;

        self.send(&frame)
    }

    /// Reply to a frame without usable telemetry.
    pub fn send_manual(&mut self) -> Result<(), TelemServerError> {
        self.send(sim::MANUAL_FRAME)
    }

    /// Reply to a frame that needs no answer, keeping the request/reply sequence.
    pub fn send_empty(&mut self) -> Result<(), TelemServerError> {
        self.send("")
    }

    fn send(&mut self, frame: &str) -> Result<(), TelemServerError> {
        self.socket.send(frame, 0)
            .map_err(TelemServerError::SendError)
    }

    /// Log changes in the connection state.
    fn check_connection(&mut self) {
        let connected = self.socket.connected();

        if connected != self.was_connected {
            match connected {
                true => info!("Simulator bridge connected"),
                false => info!("Simulator bridge disconnected")
            }
            self.was_connected = connected;
        }
    }
}

impl From<MonitoredSocketError> for TelemServerError {
    fn from(e: MonitoredSocketError) -> Self {
        TelemServerError::SocketError(e)
    }
}
