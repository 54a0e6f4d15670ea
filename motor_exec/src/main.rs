//! # Motor Board Executable
//!
//! This executable stands in for the motor control firmware: it drives the
//! two motor channels, runs the safety watchdog, and serves the wireless
//! data link the controller connects to.
//!
//! Safety behaviour lives entirely in this executable so it keeps working
//! even if the higher level controller hangs:
//! - the watchdog coasts both motors if no motor or watchdog-config message
//!   arrives within its deadline, and
//! - a link loss cuts power immediately, without waiting for the watchdog.

// ------------------------------------------------------------------------------------------------
// MODULES
// ------------------------------------------------------------------------------------------------

/// Drive channel control.
mod drive_ctrl;

/// Motor board server abstraction.
mod motor_server;

/// Parameters for the motor board executable.
mod params;

/// Fail-safe watchdog timer.
mod watchdog;

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

// External
use color_eyre::{eyre::WrapErr, Result};
use comms_if::eqpt::motor::MotorMessage;
use log::{info, trace, warn};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::{Duration, Instant};

// Internal
use drive_ctrl::{DriveCtrl, MotorDemand, SimPins};
use motor_server::{MotorServer, ServerEvent};
use params::MotorExecParams;
use util::{
    host,
    logger::{logger_init, LevelFilter},
    module::State,
    session::Session,
};
use watchdog::Watchdog;

// ------------------------------------------------------------------------------------------------
// FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Lock a mutex, recovering the data if the holder panicked.
///
/// The fail-safe paths must still be able to coast the motors after another
/// thread has poisoned the lock.
fn lock_or_recover<T>(mutex: &Mutex<T>) -> MutexGuard<T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

// ------------------------------------------------------------------------------------------------
// MAIN
// ------------------------------------------------------------------------------------------------

fn main() -> Result<()> {
    // ---- EARLY INITIALISATION ----

    // Initialise session
    let session = Session::new("motor_exec", "sessions").wrap_err("Failed to create the session")?;

    // Initialise logger
    logger_init(LevelFilter::Trace, &session).wrap_err("Failed to initialise logging")?;

    // Log information on this execution.
    info!("Motor Board Executable\n");
    info!("Running on: {}", host::get_host_description());
    info!("Session directory: {:?}\n", session.session_root);

    info!("Initialising...");

    // ---- LOAD PARAMETERS ----

    let exec_params: MotorExecParams =
        util::params::load("motor_exec.toml").wrap_err("Could not load motor_exec params")?;

    info!("Parameters loaded");

    // ---- MODULE INITIALISATION ----

    let mut drive = DriveCtrl::new(SimPins::new("left"), SimPins::new("right"));
    drive
        .init("drive_ctrl.toml", &session)
        .wrap_err("Failed to initialise drive control")?;
    let drive = Arc::new(Mutex::new(drive));

    let watchdog = Arc::new(Mutex::new(Watchdog::new(
        exec_params.watchdog_enabled,
        exec_params.watchdog_timeout_s,
        Instant::now(),
    )));

    let mut server = MotorServer::new(&exec_params).wrap_err("Failed to initialise server")?;

    info!("Server initialised");

    // ---- WATCHDOG TICK THREAD ----

    // The watchdog runs on its own fixed tick so it cannot be starved by
    // link activity
    {
        let drive = drive.clone();
        let watchdog = watchdog.clone();
        let tick = Duration::from_millis(exec_params.watchdog_tick_ms);

        thread::spawn(move || loop {
            thread::sleep(tick);

            let expired = lock_or_recover(&watchdog).check(Instant::now());

            if expired {
                warn!("Watchdog expired, coasting both motors");
                lock_or_recover(&drive).make_safe();
            }
        });
    }

    // ---- MAIN LOOP ----

    info!("Initialisation complete, motors coasting until first command");

    loop {
        server.advertise_if_due();

        for event in server.poll() {
            match event {
                ServerEvent::Frame(MotorMessage::Motor {
                    left_throttle,
                    right_throttle,
                }) => {
                    let demand = MotorDemand {
                        left_throttle,
                        right_throttle,
                    };

                    match lock_or_recover(&drive).proc(&demand) {
                        Ok((_, report)) => trace!(
                            "Demand applied: duty left {} right {}",
                            report.left_duty,
                            report.right_duty
                        ),
                        Err(e) => warn!("Couldn't apply demand: {}", e),
                    }

                    lock_or_recover(&watchdog).feed(Instant::now());
                }
                ServerEvent::Frame(MotorMessage::WatchdogConfig { enabled, timeout_s }) => {
                    info!(
                        "Watchdog reconfigured: enabled {}, timeout {} s",
                        enabled, timeout_s
                    );
                    lock_or_recover(&watchdog).configure(enabled, timeout_s, Instant::now());
                }
                ServerEvent::Frame(MotorMessage::PwmFrequency { frequency_hz }) => {
                    info!("PWM frequency set to {} Hz", frequency_hz);
                    lock_or_recover(&drive).set_pwm_frequency(frequency_hz);
                }
                ServerEvent::Frame(MotorMessage::Ping { timestamp_s }) => {
                    // Echo only, pings never touch motor state or the
                    // watchdog
                    if let Err(e) = server.send(&MotorMessage::Pong { timestamp_s }) {
                        warn!("Couldn't send pong: {}", e);
                    }
                }
                ServerEvent::Frame(MotorMessage::Pong { .. }) => {
                    warn!("Unexpected pong from controller, ignoring");
                }
                ServerEvent::PeerConnected => {
                    info!("Controller connected");
                }
                ServerEvent::PeerLost => {
                    // A dropped link is a stronger signal than mere silence,
                    // cut power without waiting for the watchdog
                    warn!("Controller link lost, coasting both motors");
                    lock_or_recover(&drive).make_safe();
                }
            }
        }
    }
}
