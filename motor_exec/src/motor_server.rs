//! # Motor board server module
//!
//! This module abstracts over the networking side of the motor board
//! executable. While discoverable the board publishes advertisements on its
//! beacon socket; the controller connects to the data socket, over which
//! framed binary messages flow in both directions. Incoming writes may be
//! chunked, so frames are reassembled before being handed to the main loop.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use std::sync::mpsc::Receiver;
use std::time::{Duration, Instant};

use comms_if::{
    eqpt::motor::{Advertisement, FrameAccumulator, MotorMessage},
    net::{zmq, MonitoredSocket, MonitoredSocketError, NetEvent, SocketOptions},
};
use log::warn;

use crate::params::MotorExecParams;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// An abstraction over the networking part of the motor board executable.
pub struct MotorServer {
    /// PUB socket periodically publishing this board's advertisement
    beacon: MonitoredSocket,

    /// PAIR socket carrying framed binary messages to/from the controller
    data: MonitoredSocket,

    /// Transport events on the data socket
    data_events: Receiver<NetEvent>,

    /// Reassembles frames from chunked writes
    accum: FrameAccumulator,

    advert: Advertisement,

    advert_interval: Duration,

    last_advert: Option<Instant>,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

/// Events produced by polling the server.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ServerEvent {
    /// A complete frame arrived from the controller
    Frame(MotorMessage),

    /// A controller attached to the data socket
    PeerConnected,

    /// The controller's session was lost
    PeerLost,
}

/// Errors which can occur in the [`MotorServer`]
#[derive(thiserror::Error, Debug)]
pub enum MotorServerError {
    #[error("Socket error: {0}")]
    SocketError(MonitoredSocketError),

    #[error("The data socket's event channel was already claimed")]
    EventsUnavailable,

    #[error("Could not send data to the controller: {0}")]
    SendError(zmq::Error),
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl MotorServer {
    /// Create a new instance of the motor board server.
    ///
    /// This function will not wait for a connection from the controller
    /// before returning.
    pub fn new(params: &MotorExecParams) -> Result<Self, MotorServerError> {
        // Create the zmq context
        let ctx = zmq::Context::new();

        // Create the socket options
        let beacon_socket_options = SocketOptions {
            bind: true,
            send_timeout: 10,
            ..Default::default()
        };
        let data_socket_options = SocketOptions {
            bind: true,
            recv_timeout: params.data_recv_timeout_ms,
            send_timeout: 10,
            // ZMTP heartbeats so a vanished controller is detected promptly
            heartbeat_ivl: 500,
            heartbeat_timeout: 1000,
            heartbeat_ttl: 1000,
            ..Default::default()
        };

        // Create the sockets
        let beacon = MonitoredSocket::new(
            &ctx,
            zmq::PUB,
            beacon_socket_options,
            &params.beacon_endpoint,
        )
        .map_err(MotorServerError::SocketError)?;
        let mut data = MonitoredSocket::new(
            &ctx,
            zmq::PAIR,
            data_socket_options,
            &params.data_endpoint,
        )
        .map_err(MotorServerError::SocketError)?;

        let data_events = data
            .take_events()
            .ok_or(MotorServerError::EventsUnavailable)?;

        // Build the advertisement published on the beacon
        let advert = Advertisement {
            name: params.name.clone(),
            rssi_dbm: params.reported_rssi_dbm,
            max_write_len: params.max_write_len,
            data_endpoint: params.advertised_data_endpoint.clone(),
        };

        Ok(Self {
            beacon,
            data,
            data_events,
            accum: FrameAccumulator::new(),
            advert,
            advert_interval: Duration::from_secs_f64(params.advertise_interval_s),
            last_advert: None,
        })
    }

    /// Publish an advertisement if the advertising interval has elapsed.
    pub fn advertise_if_due(&mut self) {
        let due = match self.last_advert {
            Some(t) => t.elapsed() >= self.advert_interval,
            None => true,
        };

        if !due {
            return;
        }

        // Serialisation of the advertisement cannot fail, it is plain values
        let json = serde_json::to_string(&self.advert).unwrap_or_default();

        // A full PUB buffer just drops this advertisement, the next one is
        // at most one interval away
        if let Err(e) = self.beacon.send(&json, 0) {
            if e != zmq::Error::EAGAIN {
                warn!("Couldn't publish advertisement: {}", e);
            }
        }

        self.last_advert = Some(Instant::now());
    }

    /// Poll the server for events.
    ///
    /// Blocks for at most the data socket's receive timeout, which sets the
    /// cadence of the caller's loop. Malformed frames are logged and
    /// dropped.
    pub fn poll(&mut self) -> Vec<ServerEvent> {
        let mut events = Vec::new();

        // Transport events first, a lost controller must be acted on even
        // if no data is pending
        while let Ok(event) = self.data_events.try_recv() {
            match event {
                NetEvent::Accepted | NetEvent::Connected => events.push(ServerEvent::PeerConnected),
                NetEvent::Disconnected => events.push(ServerEvent::PeerLost),
                NetEvent::Other(_) => (),
            }
        }

        // Then incoming data
        match self.data.recv_bytes(0) {
            Ok(bytes) => {
                self.accum.extend(&bytes);
                while let Some(result) = self.accum.next_frame() {
                    match result {
                        Ok(msg) => events.push(ServerEvent::Frame(msg)),
                        Err(e) => warn!("Dropping malformed frame: {}", e),
                    }
                }
            }
            Err(zmq::Error::EAGAIN) => (),
            Err(e) => warn!("Couldn't read from data socket: {}", e),
        }

        events
    }

    /// Send a message to the controller.
    pub fn send(&mut self, msg: &MotorMessage) -> Result<(), MotorServerError> {
        self.data
            .send(msg.encode(), 0)
            .map_err(MotorServerError::SendError)
    }
}
