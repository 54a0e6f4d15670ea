//! Vehicle-side control executable entry point.
//!
//! # Architecture
//!
//! The general execution methodology consists of:
//!
//!     - Initialise all modules
//!     - Main loop, driven by pose sample arrival:
//!         - Trajectory control processing and throttle transmission
//!         - Surface sweep integration into the occupancy map
//!         - Telecommand processing
//!         - Link discovery/auto-connection and notice handling
//!
//! The link manager, tracking client and telecommand server each run their
//! own thread; everything meets here through channels, so the only
//! shared-mutable state in the process is inside those modules.

// ---------------------------------------------------------------------------
// USE MODULES FROM LIBRARY
// ---------------------------------------------------------------------------

use ctrl_lib::{
    link::{Connection, LinkMgr, LinkNotice},
    loc::PoseSample,
    nav::NavMgr,
    tc_server, track_client,
    traj_ctrl::TrajCtrl,
};

mod tc_processor;

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// External
use color_eyre::{
    eyre::{eyre, WrapErr},
    Result,
};
use comms_if::eqpt::motor::MotorMessage;
use log::{debug, info, warn};
use nalgebra::Vector3;
use serde::Deserialize;
use std::collections::VecDeque;
use std::sync::mpsc::RecvTimeoutError;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

// Internal
use util::{
    host,
    logger::{logger_init, LevelFilter},
    session::Session,
};

// ---------------------------------------------------------------------------
// CONSTANTS
// ---------------------------------------------------------------------------

/// Heartbeat of the main loop when no pose samples are arriving.
const IDLE_TICK_MS: u64 = 100;

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// Parameters for the control executable.
#[derive(Debug, Clone, Deserialize)]
struct CtrlExecParams {
    /// Endpoint of the tracking source's publisher
    pub track_endpoint: String,

    /// Receive timeout on the tracking subscription in milliseconds
    pub track_poll_ms: i32,

    /// Endpoint the telecommand server binds to
    pub tc_endpoint: String,

    /// Receive timeout on the telecommand socket in milliseconds
    pub tc_poll_ms: i32,

    /// If set, only auto-connect to boards advertising this name;
    /// otherwise the strongest candidate wins
    pub board_name: Option<String>,
}

// ---------------------------------------------------------------------------
// FUNCTIONS
// ---------------------------------------------------------------------------

/// Executable main function, entry point.
fn main() -> Result<()> {
    // ---- EARLY INITIALISATION ----

    // Initialise session
    let session = Session::new("ctrl_exec", "sessions").wrap_err("Failed to create the session")?;

    // Initialise logger
    logger_init(LevelFilter::Trace, &session).wrap_err("Failed to initialise logging")?;

    // Log information on this execution.
    info!("Drover Control Executable\n");
    info!("Running on: {}", host::get_host_description());
    info!("Session directory: {:?}\n", session.session_root);

    // ---- LOAD PARAMETERS ----

    let exec_params: CtrlExecParams =
        util::params::load("ctrl_exec.toml").wrap_err("Could not load ctrl_exec params")?;

    info!("Exec parameters loaded");

    // ---- MODULE INITIALISATION ----

    let mut traj_ctrl =
        TrajCtrl::init("traj_ctrl.toml").wrap_err("Failed to initialise trajectory control")?;

    let mut nav = NavMgr::init("nav.toml").wrap_err("Failed to initialise navigation")?;

    let mut link = LinkMgr::init("link.toml").wrap_err("Failed to initialise the link manager")?;
    let discovery = link
        .take_discovery()
        .ok_or_else(|| eyre!("Link discovery channel unavailable"))?;

    let (pose_rx, sweep_rx) =
        track_client::start(&exec_params.track_endpoint, exec_params.track_poll_ms)
            .wrap_err("Failed to start the tracking client")?;

    let tc_rx = tc_server::start(&exec_params.tc_endpoint, exec_params.tc_poll_ms)
        .wrap_err("Failed to start the telecommand server")?;

    info!("Initialisation complete, entering main loop");

    // ---- MAIN LOOP ----

    let mut connection: Option<Connection> = None;
    let mut notices = None;
    let mut latest_sample: Option<PoseSample> = None;
    let mut route: VecDeque<Vector3<f64>> = VecDeque::new();

    loop {
        // ---- POSE-DRIVEN CONTROL ----
        //
        // Blocking on the pose channel is the loop's only wait; everything
        // else below drains non-blockingly.
        match pose_rx.recv_timeout(Duration::from_millis(IDLE_TICK_MS)) {
            Ok(sample) => {
                latest_sample = Some(sample);

                // Feed the next route waypoint once the controller goes
                // idle
                if !traj_ctrl.has_target() {
                    if let Some(next) = route.pop_front() {
                        info!(
                            "Heading for next waypoint ({:.2}, {:.2}), {} remaining",
                            next.x,
                            next.z,
                            route.len()
                        );
                        traj_ctrl.drive_to(&next);
                    }
                }

                if let Some(cmd) = traj_ctrl.proc(&sample) {
                    tc_processor::send_throttle(&connection, cmd);
                }
            }
            Err(RecvTimeoutError::Timeout) => (),
            Err(RecvTimeoutError::Disconnected) => {
                return Err(eyre!("The tracking stream has ended"))
            }
        }

        // ---- MAPPING ----

        while let Ok(points) = sweep_rx.try_recv() {
            if !nav.attempt_active() {
                continue;
            }

            if let Some(sample) = &latest_sample {
                if let Err(e) = nav.integrate_sweep(&points, &sample.pose.position_m) {
                    warn!("Couldn't integrate surface sweep: {}", e);
                }
            }
        }

        // ---- TELECOMMANDS ----

        while let Ok(tc) = tc_rx.try_recv() {
            tc_processor::process(
                tc,
                &mut traj_ctrl,
                &mut nav,
                &mut route,
                &connection,
                &latest_sample,
                &session,
            );
        }

        // ---- LINK DISCOVERY ----

        while let Ok(candidates) = discovery.try_recv() {
            if connection.is_some() || candidates.is_empty() {
                continue;
            }

            // Candidates arrive strongest-first; an explicitly named board
            // takes priority over raw signal strength
            let target = match &exec_params.board_name {
                Some(name) => candidates.iter().find(|c| &c.name == name),
                None => candidates.first(),
            };

            if let Some(candidate) = target {
                info!(
                    "Connecting to \"{}\" ({} dBm)",
                    candidate.name, candidate.rssi_dbm
                );

                match link.connect(candidate) {
                    Ok(mut conn) => {
                        notices = conn.take_notices();
                        connection = Some(conn);
                    }
                    Err(e) => warn!("Connect failed: {}", e),
                }
            }
        }

        // ---- LINK NOTICES ----

        let mut link_closed = false;

        if let Some(rx) = &notices {
            while let Ok(notice) = rx.try_recv() {
                match notice {
                    LinkNotice::Message(MotorMessage::Pong { timestamp_s }) => {
                        let now = SystemTime::now()
                            .duration_since(UNIX_EPOCH)
                            .map(|d| d.as_secs_f64())
                            .unwrap_or(0.0);
                        info!("Motor board RTT: {:.1} ms", (now - timestamp_s) * 1000.0);
                    }
                    LinkNotice::Message(msg) => debug!("Board message: {:?}", msg),
                    LinkNotice::Closed(reason) => {
                        warn!("Link closed: {}", reason);
                        link_closed = true;
                    }
                }
            }
        }

        if link_closed {
            // Scanning resumes inside the link manager; just forget the
            // dead handle
            connection = None;
            notices = None;
        }
    }
}
