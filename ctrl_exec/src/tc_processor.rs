//! Telecommand processing for the control executable.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use std::collections::VecDeque;
use std::time::{SystemTime, UNIX_EPOCH};

use comms_if::{
    eqpt::motor::MotorMessage,
    tc::{PidLoopId, Tc},
};
use ctrl_lib::{
    link::Connection,
    loc::PoseSample,
    nav::NavMgr,
    traj_ctrl::{ThrottleCmd, TrajCtrl},
};
use log::{info, warn};
use nalgebra::Vector3;
use util::session::Session;

// ---------------------------------------------------------------------------
// PUBLIC FUNCTIONS
// ---------------------------------------------------------------------------

/// Process one operator telecommand.
pub fn process(
    tc: Tc,
    traj_ctrl: &mut TrajCtrl,
    nav: &mut NavMgr,
    route: &mut VecDeque<Vector3<f64>>,
    connection: &Option<Connection>,
    latest_sample: &Option<PoseSample>,
    session: &Session,
) {
    match tc {
        // ---- MANOEUVRES ----
        Tc::Drive { left, right } => {
            route.clear();
            let cmd = traj_ctrl.drive(left, right);
            send_throttle(connection, cmd);
        }
        Tc::Rotate { degrees } => {
            route.clear();
            match latest_sample {
                Some(sample) => {
                    if let Err(e) = traj_ctrl.rotate_in_place_by(degrees, &sample.pose) {
                        warn!("Cannot rotate: {}", e);
                    }
                }
                None => warn!("Cannot rotate: no pose received yet"),
            }
        }
        Tc::DriveForward { meters } => {
            route.clear();
            match latest_sample {
                Some(sample) => {
                    if let Err(e) = traj_ctrl.drive_forward(meters, &sample.pose) {
                        warn!("Cannot drive forward: {}", e);
                    }
                }
                None => warn!("Cannot drive forward: no pose received yet"),
            }
        }
        Tc::DriveTo { x, z } => {
            let sample = match latest_sample {
                Some(s) => s,
                None => {
                    warn!("Cannot navigate: no pose received yet");
                    return;
                }
            };

            let position = sample.pose.position_m;
            let goal = Vector3::new(x, 0.0, z);

            // A navigation attempt (and its grid) starts on demand, centred
            // where the vehicle is now
            if !nav.attempt_active() {
                if let Err(e) = nav.begin_attempt(&position) {
                    warn!("Couldn't start navigation attempt: {}", e);
                    return;
                }
            }

            match nav.plan_route(&position, &goal) {
                Ok(waypoints) if waypoints.is_empty() => {
                    // No path is a policy decision for the operator: leave
                    // the map up so they can rescan or abort
                    warn!("No route to ({:.2}, {:.2}) through the current map", x, z);
                }
                Ok(waypoints) => {
                    info!("Route planned with {} waypoints", waypoints.len());

                    route.clear();
                    // The first waypoint is the vehicle's own cell
                    route.extend(waypoints.into_iter().skip(1));

                    if let Some(first) = route.pop_front() {
                        traj_ctrl.drive_to(&first);
                    }
                }
                Err(e) => warn!("Route planning failed: {}", e),
            }
        }
        Tc::Stop => {
            route.clear();
            nav.end_attempt();
            let cmd = traj_ctrl.stop();
            send_throttle(connection, cmd);
        }

        // ---- RUNTIME TUNING ----
        Tc::SetPidGains { which, kp, ki, kd } => {
            info!("Setting {:?} gains to ({}, {}, {})", which, kp, ki, kd);
            match which {
                PidLoopId::Orientation => traj_ctrl.set_orient_gains(kp, ki, kd),
                PidLoopId::Position => traj_ctrl.set_position_gains(kp, ki, kd),
            }
        }
        Tc::SetMaxThrottle { max_throttle } => {
            info!("Setting max throttle to {}", max_throttle);
            traj_ctrl.set_max_throttle(max_throttle);
        }
        Tc::SetPositionGoalTolerance { meters } => {
            info!("Setting position goal tolerance to {} m", meters);
            traj_ctrl.set_position_goal_tolerance(meters);
        }

        // ---- MOTOR BOARD PASSTHROUGH ----
        Tc::Watchdog { enabled, timeout_s } => {
            // Config changes use the acknowledged send so a silent drop is
            // surfaced
            send_acked_frame(
                connection,
                &MotorMessage::WatchdogConfig { enabled, timeout_s },
            );
        }
        Tc::PwmFrequency { frequency_hz } => {
            send_acked_frame(connection, &MotorMessage::PwmFrequency { frequency_hz });
        }
        Tc::Ping => {
            let timestamp_s = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_secs_f64())
                .unwrap_or(0.0);

            send_frame(connection, &MotorMessage::Ping { timestamp_s });
        }

        // ---- DEBUG ----
        Tc::SaveMap => match latest_sample {
            Some(sample) => match nav.snapshot(&sample.pose.position_m) {
                Ok(snapshot) => {
                    session.save("nav/occ_grid.json", snapshot);
                    info!("Occupancy grid snapshot queued for saving");
                }
                Err(e) => warn!("Cannot save map: {}", e),
            },
            None => warn!("Cannot save map: no pose received yet"),
        },
    }
}

/// Transmit a throttle command over the active connection, if any.
pub fn send_throttle(connection: &Option<Connection>, cmd: ThrottleCmd) {
    send_frame(
        connection,
        &MotorMessage::Motor {
            left_throttle: cmd.left as f32,
            right_throttle: cmd.right as f32,
        },
    );
}

/// Fire-and-forget transmit over the active connection, if any.
pub fn send_frame(connection: &Option<Connection>, msg: &MotorMessage) {
    match connection {
        Some(conn) => {
            if let Err(e) = conn.send(msg) {
                warn!("Couldn't send {:?}: {}", msg, e);
            }
        }
        None => warn!("No link to the motor board, dropping {:?}", msg),
    }
}

/// Acknowledged transmit over the active connection, if any.
fn send_acked_frame(connection: &Option<Connection>, msg: &MotorMessage) {
    match connection {
        Some(conn) => match conn.send_acked(msg) {
            Ok(()) => info!("Sent {:?}", msg),
            Err(e) => warn!("Couldn't send {:?}: {}", msg, e),
        },
        None => warn!("No link to the motor board, dropping {:?}", msg),
    }
}
