//! # Tracking source client
//!
//! Subscribes to the external 6-DOF tracking source and splits its stream
//! into two channels: pose samples (with derived speeds) for the control
//! loop, and 3D surface sample batches for mapping. This is the only place
//! the tracking stack is visible; everything downstream sees channels.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use std::sync::mpsc::{channel, Receiver};
use std::thread;

use comms_if::{
    eqpt::track::TrackMsg,
    net::{zmq, MonitoredSocket, MonitoredSocketError, SocketOptions},
};
use log::{debug, warn};
use nalgebra::Vector3;

use crate::loc::{Pose, PoseSample, VelocityEstimator};

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

/// Errors which can occur starting the tracking client.
#[derive(Debug, thiserror::Error)]
pub enum TrackClientError {
    #[error("Socket error: {0}")]
    SocketError(MonitoredSocketError),
}

// ------------------------------------------------------------------------------------------------
// PUBLIC FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Start the tracking client thread.
///
/// Returns the pose sample channel and the surface sweep channel. The
/// thread runs for the life of the process and exits only if both
/// receivers are dropped.
pub fn start(
    endpoint: &str,
    poll_ms: i32,
) -> Result<(Receiver<PoseSample>, Receiver<Vec<Vector3<f64>>>), TrackClientError> {
    let ctx = zmq::Context::new();

    let options = SocketOptions {
        recv_timeout: poll_ms,
        ..Default::default()
    };

    let socket = MonitoredSocket::new(&ctx, zmq::SUB, options, endpoint)
        .map_err(TrackClientError::SocketError)?;

    let (pose_tx, pose_rx) = channel();
    let (sweep_tx, sweep_rx) = channel();

    thread::spawn(move || {
        let mut estimator = VelocityEstimator::new();

        loop {
            let json = match socket.recv_string(0) {
                Ok(Ok(s)) => s,
                Ok(Err(_)) => {
                    debug!("Dropping non-UTF8 tracking message");
                    continue;
                }
                Err(zmq::Error::EAGAIN) => continue,
                Err(e) => {
                    warn!("Couldn't read from tracking socket: {}", e);
                    continue;
                }
            };

            // Malformed messages are logged and dropped, the stream
            // continues
            let msg: TrackMsg = match serde_json::from_str(&json) {
                Ok(m) => m,
                Err(e) => {
                    warn!("Dropping malformed tracking message: {}", e);
                    continue;
                }
            };

            match msg {
                TrackMsg::Frame {
                    transform,
                    timestamp_s,
                } => {
                    let sample =
                        estimator.sample(Pose::from_transform(&transform), timestamp_s);

                    if pose_tx.send(sample).is_err() {
                        break;
                    }
                }
                TrackMsg::SurfaceSweep { points_m } => {
                    let points: Vec<Vector3<f64>> = points_m
                        .iter()
                        .map(|p| Vector3::new(p[0], p[1], p[2]))
                        .collect();

                    if sweep_tx.send(points).is_err() {
                        break;
                    }
                }
            }
        }

        debug!("Tracking client thread exiting");
    });

    Ok((pose_rx, sweep_rx))
}
