//! # Network Module
//!
//! ZMQ socket wrapper shared by the executables. The simulator bridge talks to the controller
//! over a REQ/REP pair, so every request read by the controller is answered exactly once before
//! the next one is read.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use std::{
    sync::{Arc, atomic::{AtomicBool, AtomicUsize, Ordering}}, 
    thread
};
use log::{debug, warn};
use serde::Deserialize;
use zmq::{Context, Socket, SocketEvent, SocketType};

// Export zmq
pub use zmq;

// ------------------------------------------------------------------------------------------------
// MACROS
// ------------------------------------------------------------------------------------------------

/// Apply a list of `(setter, value)` pairs to a socket, naming the failing setter in the error.
macro_rules! apply_sockopts {
    ($socket:expr, $(($setter:ident, $val:expr)),+) => {
        $(
            $socket.$setter($val)
                .map_err(|e| MonitoredSocketError::SocketOptionError(stringify!($setter).into(), e))?;
        )+
    };
}

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// Receive timeout of the monitor socket. Bounds how long the monitor thread takes to notice
/// that its socket is being dropped.
const MONITOR_POLL_MS: i32 = 100;

// ------------------------------------------------------------------------------------------------
// STATICS
// ------------------------------------------------------------------------------------------------

/// Counter giving each monitor a unique inproc endpoint.
static MONITOR_COUNT: AtomicUsize = AtomicUsize::new(0);

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Network parameters, loaded from `net.toml`.
#[derive(Debug, Clone, Deserialize)]
pub struct NetParams {
    /// Endpoint the telemetry server binds to, e.g. `"tcp://*:4567"`.
    pub sim_endpoint: String,

    /// Receive timeout on the telemetry socket in milliseconds, `-1` blocks forever.
    pub sim_recv_timeout_ms: i32,

    /// Send timeout on the telemetry socket in milliseconds.
    pub sim_send_timeout_ms: i32,

    /// Artificial delay inserted before each steering reply, emulating actuation lag.
    ///
    /// Units: milliseconds
    pub simulated_latency_ms: u64,
}

/// A zmq socket whose connection state is tracked.
///
/// A background thread reads the socket's monitor events and keeps a flag of whether a peer is
/// currently connected. The socket itself is reached through `Deref`.
pub struct MonitoredSocket {
    socket: Socket,

    monitor_thread: Option<thread::JoinHandle<()>>,

    stop: Arc<AtomicBool>,
    
    connected: Arc<AtomicBool>
}

/// Configuration of a [`MonitoredSocket`].
///
/// Timeouts follow the [`zmq_setsockopt`](http://api.zeromq.org/4-2:zmq-setsockopt) conventions,
/// in milliseconds with `-1` meaning infinite.
pub struct SocketOptions {

    /// Bind to the endpoint (servers) rather than connect to it (clients).
    ///
    /// Default: `false`
    pub bind: bool,

    /// Wait in [`MonitoredSocket::new`] until a peer has connected.
    ///
    /// Default: `true`
    pub block_on_first_connect: bool,

    /// `ZMQ_LINGER`: time pending messages are kept after the socket is closed
    pub linger: i32,

    /// `ZMQ_RCVTIMEO`: time before a receive gives up with `EAGAIN`
    pub recv_timeout: i32,

    /// `ZMQ_SNDTIMEO`: time before a send gives up with `EAGAIN`
    pub send_timeout: i32,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

#[derive(thiserror::Error, Debug)]
pub enum MonitoredSocketError {
    #[error("Could not create the socket: {0}")]
    CreateSocketError(zmq::Error),

    #[error("Could not enable monitoring of the socket: {0}")]
    MonitoringEnableError(zmq::Error),

    #[error("Could not connect or bind the socket: {0:?}")]
    CouldNotConnect(Option<zmq::Error>),

    #[error("Could not read an event from the monitor: {0}")]
    EventReadError(zmq::Error),

    #[error("Could not apply socket option {0}: {1}")]
    SocketOptionError(String, zmq::Error)
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl MonitoredSocket {
    /// Create the socket, attach its monitor and connect or bind it to `endpoint`.
    pub fn new(
        ctx: &Context, 
        socket_type: SocketType,
        options: SocketOptions,
        endpoint: &str
    ) -> Result<Self, MonitoredSocketError> {
        let stop = Arc::new(AtomicBool::new(false));
        let connected = Arc::new(AtomicBool::new(false));

        let socket = ctx.socket(socket_type)
            .map_err(MonitoredSocketError::CreateSocketError)?;

        // Every monitor needs its own inproc endpoint
        let monitor_endpoint = format!(
            "inproc://monitor_{}", 
            MONITOR_COUNT.fetch_add(1, Ordering::Relaxed)
        );

        socket.monitor(&monitor_endpoint, SocketEvent::ALL as i32)
            .map_err(MonitoredSocketError::MonitoringEnableError)?;
        let monitor = ctx.socket(zmq::PAIR)
            .map_err(MonitoredSocketError::CreateSocketError)?;
        monitor.connect(&monitor_endpoint)
            .map_err(|e| MonitoredSocketError::CouldNotConnect(Some(e)))?;

        options.apply(&socket)?;

        if options.bind {
            socket.bind(endpoint)
        }
        else {
            socket.connect(endpoint)
        }.map_err(|e| MonitoredSocketError::CouldNotConnect(Some(e)))?;

        if options.block_on_first_connect {
            wait_for_peer(&monitor)?;
            connected.store(true, Ordering::Relaxed);
        }

        // From here on the monitor polls so that it can observe the stop flag
        monitor.set_rcvtimeo(MONITOR_POLL_MS)
            .map_err(|e| MonitoredSocketError::SocketOptionError("set_rcvtimeo".into(), e))?;

        let thread_stop = stop.clone();
        let thread_connected = connected.clone();
        let monitor_thread = thread::spawn(move || monitor_loop(
            monitor, 
            monitor_endpoint,
            thread_stop, 
            thread_connected
        ));

        Ok(Self {
            socket,
            monitor_thread: Some(monitor_thread),
            stop,
            connected
        })
    }

    /// True while a peer is connected.
    pub fn connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }
}

impl Drop for MonitoredSocket {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);

        if let Some(handle) = self.monitor_thread.take() {
            handle.join().ok();
        }
    }
}

impl std::ops::Deref for MonitoredSocket {
    type Target = Socket;

    fn deref(&self) -> &Self::Target {
        &self.socket
    }
}

impl std::ops::DerefMut for MonitoredSocket {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.socket
    }
}

impl SocketOptions {
    /// Apply the options to `socket`.
    pub fn apply(&self, socket: &Socket) -> Result<(), MonitoredSocketError> {
        apply_sockopts!(
            socket,
            (set_linger, self.linger),
            (set_rcvtimeo, self.recv_timeout),
            (set_sndtimeo, self.send_timeout)
        );

        Ok(())
    }
}

impl Default for SocketOptions {
    fn default() -> Self {
        // zmq defaults apart from the linger period
        Self {
            bind: false,
            block_on_first_connect: true,
            linger: 1_000,
            recv_timeout: -1,
            send_timeout: -1
        }
    }
}

// ------------------------------------------------------------------------------------------------
// PRIVATE FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Read one event from a monitor socket, discarding the peer address frame that follows it.
fn read_event(monitor: &Socket) -> Result<SocketEvent, zmq::Error> {
    let msg = monitor.recv_msg(0)?;
    let event = u16::from_ne_bytes([msg[0], msg[1]]);

    if monitor.get_rcvmore()? {
        monitor.recv_msg(0)?;
    }

    Ok(SocketEvent::from_raw(event))
}

/// Block until the monitor reports a connected (client) or accepted (server) peer.
fn wait_for_peer(monitor: &Socket) -> Result<(), MonitoredSocketError> {
    loop {
        match read_event(monitor).map_err(MonitoredSocketError::EventReadError)? {
            SocketEvent::CONNECTED | SocketEvent::ACCEPTED => return Ok(()),
            SocketEvent::CONNECT_DELAYED 
                | SocketEvent::CONNECT_RETRIED 
                | SocketEvent::LISTENING => continue,
            _ => return Err(MonitoredSocketError::CouldNotConnect(None))
        }
    }
}

fn monitor_loop(
    monitor: Socket,
    endpoint: String,
    stop: Arc<AtomicBool>,
    connected: Arc<AtomicBool>
) {
    while !stop.load(Ordering::Relaxed) {
        let event = match read_event(&monitor) {
            Ok(e) => e,
            Err(zmq::Error::EAGAIN) => continue,
            Err(e) => {
                warn!("Stopping monitor {} after read error: {}", endpoint, e);
                return
            }
        };

        match event {
            SocketEvent::CONNECTED | SocketEvent::ACCEPTED => {
                if !connected.swap(true, Ordering::Relaxed) {
                    debug!("Peer connected ({})", endpoint);
                }
            },
            SocketEvent::DISCONNECTED => {
                if connected.swap(false, Ordering::Relaxed) {
                    debug!("Peer disconnected ({})", endpoint);
                }
            },
            SocketEvent::MONITOR_STOPPED => return,
            _ => ()
        }
    }
}
