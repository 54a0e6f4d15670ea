//! # Telecommand server
//!
//! Accepts operator telecommands over a REP socket and forwards them to the
//! main loop. The reply only acknowledges that the telecommand parsed;
//! execution happens asynchronously in the control loop.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use std::sync::mpsc::{channel, Receiver};
use std::thread;

use comms_if::{
    net::{zmq, MonitoredSocket, MonitoredSocketError, SocketOptions},
    tc::{Tc, TcResponse},
};
use log::{debug, warn};

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

/// Errors which can occur starting the telecommand server.
#[derive(Debug, thiserror::Error)]
pub enum TcServerError {
    #[error("Socket error: {0}")]
    SocketError(MonitoredSocketError),
}

// ------------------------------------------------------------------------------------------------
// PUBLIC FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Start the telecommand server thread, returning the channel on which
/// accepted telecommands arrive.
pub fn start(endpoint: &str, poll_ms: i32) -> Result<Receiver<Tc>, TcServerError> {
    let ctx = zmq::Context::new();

    let options = SocketOptions {
        bind: true,
        recv_timeout: poll_ms,
        send_timeout: 100,
        ..Default::default()
    };

    let socket = MonitoredSocket::new(&ctx, zmq::REP, options, endpoint)
        .map_err(TcServerError::SocketError)?;

    let (tc_tx, tc_rx) = channel();

    thread::spawn(move || loop {
        let json = match socket.recv_string(0) {
            Ok(Ok(s)) => s,
            Ok(Err(_)) => {
                respond(&socket, &TcResponse::Invalid("non-UTF8 telecommand".into()));
                continue;
            }
            Err(zmq::Error::EAGAIN) => continue,
            Err(e) => {
                warn!("Couldn't read from telecommand socket: {}", e);
                continue;
            }
        };

        match Tc::from_json(&json) {
            Ok(tc) => {
                debug!("Telecommand accepted: {:?}", tc);
                respond(&socket, &TcResponse::Ok);

                if tc_tx.send(tc).is_err() {
                    // Main loop gone, nothing left to serve
                    break;
                }
            }
            Err(e) => {
                warn!("Rejecting telecommand: {}", e);
                respond(&socket, &TcResponse::Invalid(e.to_string()));
            }
        }
    });

    Ok(tc_rx)
}

// ------------------------------------------------------------------------------------------------
// PRIVATE FUNCTIONS
// ------------------------------------------------------------------------------------------------

fn respond(socket: &MonitoredSocket, response: &TcResponse) {
    let json = serde_json::to_string(response).unwrap_or_else(|_| String::from("null"));

    if let Err(e) = socket.send(&json, 0) {
        warn!("Couldn't send telecommand response: {}", e);
    }
}
