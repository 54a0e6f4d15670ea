//! # Network Module
//!
//! This module provides networking abstractions over ZMQ, the transport
//! chosen for the software. The central type is [`MonitoredSocket`], a zmq
//! socket with a background monitor thread that translates transport events
//! (peer connected, peer lost) into an `mpsc` channel, so state machines
//! like the link manager and the motor board's fail-safe can react to them
//! without polling.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use std::{
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        mpsc::{channel, Receiver, Sender},
        Arc,
    },
    thread,
    time::{Duration, Instant},
};
use zmq::{Context, Socket, SocketEvent, SocketType};

// Export zmq
pub use zmq;

// ------------------------------------------------------------------------------------------------
// MACROS
// ------------------------------------------------------------------------------------------------

macro_rules! set_sockopts {
    ($socket:expr, $(($opt:ident, $val:expr)),+) => {
        $(
            $socket.$opt($val)
                .map_err(|e| MonitoredSocketError::SocketOptionError(stringify!($opt).into(), e))?;
        )+
    };
}

// ------------------------------------------------------------------------------------------------
// STATICS
// ------------------------------------------------------------------------------------------------

/// Number of monitors that have been registered, used to provide unique IDs
/// for each monitor endpoint.
static NUM_MONITORS: AtomicUsize = AtomicUsize::new(0);

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// Receive timeout on the monitor socket. Bounds how long the monitor thread
/// takes to notice a shutdown request.
const MONITOR_POLL_MS: i32 = 100;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// A zmq socket with a background monitor thread.
///
/// The monitor thread watches transport activity on the socket and forwards
/// the events of interest into an event channel, which the owner can claim
/// once with [`MonitoredSocket::take_events`]. Whether a peer is currently
/// attached is also tracked and available through
/// [`MonitoredSocket::connected`].
pub struct MonitoredSocket {
    socket: Socket,

    join_handle: Option<thread::JoinHandle<()>>,

    shutdown: Arc<AtomicBool>,

    connected: Arc<AtomicBool>,

    events: Option<Receiver<NetEvent>>,
}

/// Represents options which can be set on a monitored socket.
///
/// Most options correspond to those found in the
/// [`zmq_setsockopt`](http://api.zeromq.org/master:zmq-setsockopt)
/// documentation.
pub struct SocketOptions {
    /// Indicates if the socket should bind itself to the endpoint. Servers
    /// should have this value set as `true`, clients should have it set as
    /// `false`.
    ///
    /// The default value is `false`.
    pub bind: bool,

    /// If true the `MonitoredSocket::new()` function will block until the
    /// socket is connected, or until the connect_timeout elapses. If the
    /// timeout elapses this function will return a
    /// `MonitoredSocketError::CouldNotConnect` error.
    ///
    /// The default value is `false`.
    pub block_on_first_connect: bool,

    /// Topic to subscribe to. Only applied to SUB sockets. The default
    /// (empty string) subscribes to everything.
    pub subscribe: String,

    /// `ZMQ_CONNECT_TIMEOUT`: Set `connect()` timeout in milliseconds. Also
    /// bounds `block_on_first_connect`.
    pub connect_timeout: i32,

    /// `ZMQ_LINGER`: Set linger period for socket shutdown
    pub linger: i32,

    /// `ZMQ_RECONNECT_IVL`: Set reconnection interval
    pub reconnect_ivl: i32,

    /// `ZMQ_RCVTIMEO`: Maximum time before a recv operation returns with
    /// `EAGAIN`
    pub recv_timeout: i32,

    /// `ZMQ_SNDTIMEO`: Maximum time before a send operation returns with
    /// `EAGAIN`
    pub send_timeout: i32,

    /// `ZMQ_HEARTBEAT_IVL`: Set interval between sending ZMTP heartbeats.
    /// Needed for prompt dead-peer detection on long-lived data links.
    pub heartbeat_ivl: i32,

    /// `ZMQ_HEARTBEAT_TIMEOUT`: Set timeout for ZMTP heartbeats
    pub heartbeat_timeout: i32,

    /// `ZMQ_HEARTBEAT_TTL`: Set the TTL value for ZMTP heartbeats
    pub heartbeat_ttl: i32,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

/// Transport events forwarded by the monitor thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetEvent {
    /// A connection to a remote peer was established (client side).
    Connected,

    /// A remote peer connected to this bound socket (server side).
    Accepted,

    /// The session with the peer was lost.
    Disconnected,

    /// Any other transport event, carrying the raw zmq event code.
    Other(u16),
}

#[derive(thiserror::Error, Debug)]
pub enum MonitoredSocketError {
    #[error("Error creating the socket: {0}")]
    CreateSocketError(zmq::Error),

    #[error("Error enabling monitoring for the socket: {0}")]
    MonitoringEnableError(zmq::Error),

    #[error("Could not connect the socket: {0:?}")]
    CouldNotConnect(Option<zmq::Error>),

    #[error("Could not read event from monitor socket: {0}")]
    EventReadError(zmq::Error),

    #[error("Could not set the {0} socket option: {1}")]
    SocketOptionError(String, zmq::Error),
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl MonitoredSocket {
    /// Create a new monitored socket.
    ///
    /// ## Arguments
    /// - `ctx`: the zmq context which will be used to create the socket
    /// - `socket_type`: the type of zmq socket to create
    /// - `socket_options`: a [`SocketOptions`] struct specifying how to
    ///   configure the socket
    /// - `endpoint`: a zmq endpoint string, such as `"tcp://localhost:4000"`
    pub fn new(
        ctx: &Context,
        socket_type: SocketType,
        socket_options: SocketOptions,
        endpoint: &str,
    ) -> Result<Self, MonitoredSocketError> {
        // Create atomics
        let shutdown = Arc::new(AtomicBool::new(false));
        let connected = Arc::new(AtomicBool::new(false));

        // Create socket
        let socket = ctx
            .socket(socket_type)
            .map_err(MonitoredSocketError::CreateSocketError)?;

        // Create monitor endpoint
        let monitor_endpoint = format!(
            "inproc://monitor_{}",
            NUM_MONITORS.fetch_add(1, Ordering::Relaxed)
        );

        // Enable, create, and connect monitor. The receive timeout lets the
        // monitor thread poll its shutdown flag.
        socket
            .monitor(&monitor_endpoint, SocketEvent::ALL as i32)
            .map_err(MonitoredSocketError::MonitoringEnableError)?;
        let monitor = ctx
            .socket(zmq::PAIR)
            .map_err(MonitoredSocketError::CreateSocketError)?;
        monitor
            .set_rcvtimeo(MONITOR_POLL_MS)
            .map_err(|e| MonitoredSocketError::SocketOptionError("set_rcvtimeo".into(), e))?;
        monitor
            .connect(&monitor_endpoint)
            .map_err(|e| MonitoredSocketError::CouldNotConnect(Some(e)))?;

        // Set the options on the socket
        socket_options.set(&socket)?;

        // Connect or bind the socket to its endpoint
        match socket_options.bind {
            false => socket.connect(endpoint),
            true => socket.bind(endpoint),
        }
        .map_err(|e| MonitoredSocketError::CouldNotConnect(Some(e)))?;

        // If the block on first connect flag is set wait for the monitor to
        // signal connection
        if socket_options.block_on_first_connect {
            let deadline = Instant::now()
                + Duration::from_millis(socket_options.connect_timeout.max(0) as u64);

            loop {
                match read_event(&monitor) {
                    Ok(Some(SocketEvent::CONNECTED)) => break,
                    // Delayed/retried connects and timed out reads just keep
                    // waiting until the deadline
                    Ok(_) => {
                        if socket_options.connect_timeout > 0 && Instant::now() > deadline {
                            return Err(MonitoredSocketError::CouldNotConnect(None));
                        }
                    }
                    Err(e) => return Err(MonitoredSocketError::EventReadError(e)),
                }
            }

            // The connected flag must be raised here since the monitor thread
            // hasn't started yet
            connected.store(true, Ordering::Relaxed);
        }

        // Create the event channel and clones for the monitor thread
        let (event_tx, event_rx) = channel();
        let shutdown_clone = shutdown.clone();
        let connected_clone = connected.clone();

        // Spawn the monitor thread
        let join_handle =
            thread::spawn(move || monitor_socket(monitor, shutdown_clone, connected_clone, event_tx));

        // Create self
        Ok(Self {
            socket,
            join_handle: Some(join_handle),
            shutdown,
            connected,
            events: Some(event_rx),
        })
    }

    /// Return if the socket currently has a peer attached.
    pub fn connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    /// Claim the transport event channel.
    ///
    /// The channel can only be claimed once, subsequent calls return `None`.
    pub fn take_events(&mut self) -> Option<Receiver<NetEvent>> {
        self.events.take()
    }
}

impl Drop for MonitoredSocket {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::Relaxed);

        // The monitor's receive timeout guarantees the thread notices the
        // shutdown flag promptly
        if let Some(jh) = self.join_handle.take() {
            jh.join().ok();
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
    /// Set these options on the given socket.
    pub fn set(&self, socket: &Socket) -> Result<(), MonitoredSocketError> {
        // Set all the socket options, using a macro to keep the error
        // handling compact
        set_sockopts!(
            socket,
            (set_connect_timeout, self.connect_timeout),
            (set_heartbeat_ivl, self.heartbeat_ivl),
            (set_heartbeat_timeout, self.heartbeat_timeout),
            (set_heartbeat_ttl, self.heartbeat_ttl),
            (set_linger, self.linger),
            (set_reconnect_ivl, self.reconnect_ivl),
            (set_rcvtimeo, self.recv_timeout),
            (set_sndtimeo, self.send_timeout)
        );

        // Subscriptions only apply to SUB sockets
        if let Ok(SocketType::SUB) = socket.get_socket_type() {
            set_sockopts!(socket, (set_subscribe, self.subscribe.as_bytes()));
        }

        Ok(())
    }
}

impl Default for SocketOptions {
    fn default() -> Self {
        // Defaults for sockopts taken from http://api.zeromq.org/master:zmq-setsockopt
        Self {
            bind: false,
            block_on_first_connect: false,
            subscribe: String::new(),
            connect_timeout: 0,
            heartbeat_ivl: 0,
            heartbeat_timeout: 0,
            heartbeat_ttl: 0,
            linger: 30_000,
            reconnect_ivl: 100,
            recv_timeout: -1,
            send_timeout: 0,
        }
    }
}

// ------------------------------------------------------------------------------------------------
// PRIVATE FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Read an event from a monitor socket.
///
/// Returns `Ok(None)` when the receive times out.
fn read_event(socket: &Socket) -> Result<Option<SocketEvent>, zmq::Error> {
    let msg = match socket.recv_msg(0) {
        Ok(m) => m,
        Err(zmq::Error::EAGAIN) => return Ok(None),
        Err(e) => return Err(e),
    };

    let event = u16::from_ne_bytes([msg[0], msg[1]]);

    // Monitor events carry a second frame with the endpoint address, which
    // is not needed here
    if socket.get_rcvmore()? {
        let _ = socket.recv_msg(0)?;
    }

    Ok(Some(SocketEvent::from_raw(event)))
}

fn monitor_socket(
    monitor: Socket,
    shutdown: Arc<AtomicBool>,
    connected: Arc<AtomicBool>,
    event_tx: Sender<NetEvent>,
) {
    // So long as the shutdown isn't requested
    while !shutdown.load(Ordering::Relaxed) {
        // Read the next event from the monitor
        let event = match read_event(&monitor) {
            Ok(Some(e)) => e,
            Ok(None) => continue,
            // The main socket has been closed, nothing more to monitor
            Err(_) => break,
        };

        // Update the connected flag and forward the event. Send errors mean
        // the receiver is gone, which is fine, the flag is still kept
        // current.
        let net_event = match event {
            SocketEvent::CONNECTED => {
                connected.store(true, Ordering::Relaxed);
                NetEvent::Connected
            }
            SocketEvent::ACCEPTED => {
                connected.store(true, Ordering::Relaxed);
                NetEvent::Accepted
            }
            SocketEvent::DISCONNECTED => {
                connected.store(false, Ordering::Relaxed);
                NetEvent::Disconnected
            }
            SocketEvent::MONITOR_STOPPED => break,
            other => NetEvent::Other(other as u16),
        };

        event_tx.send(net_event).ok();
    }
}
