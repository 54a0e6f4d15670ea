//! Trajectory control module state

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// External
use log::{debug, trace};
use nalgebra::{UnitQuaternion, Vector3};
use serde::Serialize;

// Internal
use super::{Params, PidController, TrajCtrlError};
use crate::loc::{horizontal_unit, signed_angle_about_up, Pose, PoseSample};
use util::maths::{clamp, interp_table, lin_map};

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// The trajectory controller.
pub struct TrajCtrl {
    params: Params,

    /// Orientation error controller
    orient_ctrl: PidController,

    /// Position error controller
    pos_ctrl: PidController,

    /// Horizontal unit vector the vehicle should face, if any
    target_forward: Option<Vector3<f64>>,

    /// Horizontal position the vehicle should reach, if any
    target_position: Option<Vector3<f64>>,

    /// Timestamp of the last executed control cycle
    last_proc_s: Option<f64>,

    /// True once the held stop state has been transmitted, so quiescence is
    /// not re-sent every cycle
    stop_latched: bool,

    /// Only the active motor controller may drive; when false the loop
    /// produces nothing
    enabled: bool,

    report: StatusReport,
}

/// A throttle command for both motor channels.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct ThrottleCmd {
    /// Left channel throttle in [-1, 1]
    pub left: f64,

    /// Right channel throttle in [-1, 1]
    pub right: f64,
}

/// The status report containing monitoring quantities for the most recent
/// control cycle.
#[derive(Debug, Default, Copy, Clone, Serialize)]
pub struct StatusReport {
    /// Signed orientation error in radians
    pub orient_error_rad: f64,

    /// Remaining distance to the position target in meters
    pub position_error_m: f64,

    /// An orientation target (explicit or implicit) was active this cycle
    pub orient_active: bool,

    /// A position target was active this cycle
    pub position_active: bool,
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl TrajCtrl {
    /// Initialise the trajectory controller.
    ///
    /// Expected init data is the path to the parameter file.
    pub fn init(params_path: &str) -> Result<Self, TrajCtrlError> {
        let params = util::params::load(params_path).map_err(TrajCtrlError::ParamLoadError)?;

        Ok(Self::new(params))
    }

    /// Create a controller directly from parameters.
    pub fn new(params: Params) -> Self {
        let orient_ctrl =
            PidController::new(params.orient_k_p, params.orient_k_i, params.orient_k_d);
        let pos_ctrl = PidController::new(params.pos_k_p, params.pos_k_i, params.pos_k_d);

        Self {
            params,
            orient_ctrl,
            pos_ctrl,
            target_forward: None,
            target_position: None,
            last_proc_s: None,
            stop_latched: false,
            enabled: true,
            report: StatusReport::default(),
        }
    }

    /// Enable or disable the control loop. Disabling does not clear
    /// targets.
    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    pub fn report(&self) -> StatusReport {
        self.report
    }

    pub fn has_target(&self) -> bool {
        self.target_forward.is_some() || self.target_position.is_some()
    }

    // ---- RUNTIME TUNING -------------------------------------------------

    pub fn set_orient_gains(&mut self, k_p: f64, k_i: f64, k_d: f64) {
        self.orient_ctrl.set_gains(k_p, k_i, k_d);
    }

    pub fn set_position_gains(&mut self, k_p: f64, k_i: f64, k_d: f64) {
        self.pos_ctrl.set_gains(k_p, k_i, k_d);
    }

    pub fn set_max_throttle(&mut self, max_throttle: f64) {
        self.params.max_throttle = max_throttle.abs().min(1.0);
    }

    pub fn set_position_goal_tolerance(&mut self, tolerance_m: f64) {
        self.params.position_goal_tolerance_m = tolerance_m.abs();
    }

    // ---- COMMANDS -------------------------------------------------------
    //
    // Open-loop commands return the throttle command to transmit
    // immediately and clear any closed-loop target. Target-setting commands
    // take effect on the next control cycle.

    /// Open-loop throttle on both channels.
    pub fn drive(&mut self, left: f64, right: f64) -> ThrottleCmd {
        self.clear_targets();

        // The motors now hold an explicitly commanded state, no quiescence
        // needed
        self.stop_latched = true;

        self.clamped_cmd(left, right)
    }

    /// Open-loop rotation in place: `left = -steering, right = +steering`.
    pub fn rotate_in_place(&mut self, steering: f64) -> ThrottleCmd {
        self.drive(-steering, steering)
    }

    /// Stop the vehicle and clear all targets.
    pub fn stop(&mut self) -> ThrottleCmd {
        self.drive(0.0, 0.0)
    }

    /// Rotate in place by the given signed angle about the vertical axis.
    pub fn rotate_in_place_by(
        &mut self,
        degrees: f64,
        pose: &Pose,
    ) -> Result<(), TrajCtrlError> {
        let forward = pose
            .forward_xz()
            .ok_or(TrajCtrlError::DegenerateDirection)?;

        let rotation =
            UnitQuaternion::from_axis_angle(&Vector3::y_axis(), degrees.to_radians());

        self.set_targets(Some(rotation * forward), None);
        Ok(())
    }

    /// Face the given direction (horizontally projected).
    pub fn face(&mut self, direction: &Vector3<f64>) -> Result<(), TrajCtrlError> {
        let forward = horizontal_unit(direction).ok_or(TrajCtrlError::DegenerateDirection)?;

        self.set_targets(Some(forward), None);
        Ok(())
    }

    /// Drive the given distance along the current forward direction.
    /// Negative distances reverse without turning.
    pub fn drive_forward(&mut self, distance_m: f64, pose: &Pose) -> Result<(), TrajCtrlError> {
        let forward = pose
            .forward_xz()
            .ok_or(TrajCtrlError::DegenerateDirection)?;

        let position = Vector3::new(pose.position_m.x, 0.0, pose.position_m.z)
            + distance_m * forward;

        self.set_targets(Some(forward), Some(position));
        Ok(())
    }

    /// Drive to the given horizontal position.
    pub fn drive_to(&mut self, position_m: &Vector3<f64>) {
        self.set_targets(None, Some(Vector3::new(position_m.x, 0.0, position_m.z)));
    }

    /// Drive to the given horizontal position, facing the given direction
    /// on the way.
    pub fn drive_to_facing(
        &mut self,
        position_m: &Vector3<f64>,
        forward: &Vector3<f64>,
    ) -> Result<(), TrajCtrlError> {
        let forward = horizontal_unit(forward).ok_or(TrajCtrlError::DegenerateDirection)?;

        self.set_targets(
            Some(forward),
            Some(Vector3::new(position_m.x, 0.0, position_m.z)),
        );
        Ok(())
    }

    // ---- CONTROL CYCLE --------------------------------------------------

    /// Process one pose sample.
    ///
    /// Returns the throttle command to transmit, or `None` when nothing
    /// needs sending this cycle. Samples arriving faster than the control
    /// rate are dropped.
    pub fn proc(&mut self, sample: &PoseSample) -> Option<ThrottleCmd> {
        if !self.enabled {
            return None;
        }

        // Enforce the control loop period
        let period_s = 1.0 / self.params.control_rate_hz;
        let dt_s = match self.last_proc_s {
            Some(last) => {
                let elapsed = sample.timestamp_s - last;
                if elapsed < period_s {
                    return None;
                }
                elapsed
            }
            // First cycle, assume the nominal period
            None => period_s,
        };
        self.last_proc_s = Some(sample.timestamp_s);

        // Without a usable horizontal forward there is nothing to control
        // against
        let forward = sample.pose.forward_xz()?;

        let position = Vector3::new(sample.pose.position_m.x, 0.0, sample.pose.position_m.z);

        self.report = StatusReport::default();

        let mut left = 0.0;
        let mut right = 0.0;
        let mut ran_pid = false;

        // ---- ORIENTATION ----

        // The orientation target is the explicit one, or implicitly "face
        // the target position" when only a position target is set
        let effective_forward = self.target_forward.or_else(|| {
            self.target_position
                .and_then(|tp| horizontal_unit(&(tp - position)))
        });

        if let Some(target_forward) = effective_forward {
            let error_rad = signed_angle_about_up(&forward, &target_forward);
            self.report.orient_error_rad = error_rad;
            self.report.orient_active = true;

            let only_rotating = self.target_position.is_none();

            if only_rotating
                && error_rad.abs() <= self.params.orient_goal_tolerance_rad
                && sample.angular_rate_rads.abs() <= self.params.angular_rate_threshold_rads
            {
                // Sole termination condition for pure rotation: aligned and
                // rotationally at rest
                debug!(
                    "Orientation target reached ({:.3} rad error), clearing",
                    error_rad
                );
                self.clear_targets();
                ran_pid = true;
            } else {
                // Angle error -> target angular rate -> throttle
                // differential via the measured steering response
                let target_rate_rads = self.orient_ctrl.update(error_rad, dt_s);
                let steering = clamp(
                    &interp_table(&self.params.steering_response, target_rate_rads),
                    &-self.params.max_throttle,
                    &self.params.max_throttle,
                );

                left -= steering;
                right += steering;
                ran_pid = true;
            }
        }

        // ---- POSITION ----

        if let Some(target_position) = self.target_position {
            let to_target = target_position - position;
            let distance_m = to_target.norm();
            self.report.position_error_m = distance_m;
            self.report.position_active = true;

            if distance_m <= self.params.position_goal_tolerance_m
                && sample.speed_ms <= self.params.linear_speed_threshold_ms
            {
                // Sole termination condition for translation: close enough
                // and slow enough
                debug!(
                    "Position target reached ({:.3} m remaining), clearing",
                    distance_m
                );
                self.clear_targets();
                left = 0.0;
                right = 0.0;
                ran_pid = true;
            } else {
                // Signed scalar position error projected onto the forward
                // axis, so a target behind the vehicle reverses
                let error_m = to_target.dot(&forward);

                let target_speed_ms = self.pos_ctrl.update(error_m, dt_s);
                let throttle = lin_map(
                    (0.0, self.params.max_target_speed_ms),
                    (0.0, self.params.max_throttle),
                    target_speed_ms.abs().min(self.params.max_target_speed_ms),
                );

                left += target_speed_ms.signum() * throttle;
                right += target_speed_ms.signum() * throttle;
                ran_pid = true;
            }
        }

        if ran_pid {
            // If the cycle terminated the targets the command below is the
            // held stop; latch so it isn't repeated every cycle
            self.stop_latched = !self.has_target();

            let cmd = self.clamped_cmd(left, right);
            trace!(
                "cycle out: left {:.3} right {:.3} (orient err {:.3} rad, pos err {:.3} m)",
                cmd.left,
                cmd.right,
                self.report.orient_error_rad,
                self.report.position_error_m
            );
            Some(cmd)
        } else if !self.stop_latched {
            // No motion target, but the held stop state must still go out
            // once rather than leaving quiescence to the watchdog
            self.stop_latched = true;
            Some(ThrottleCmd::default())
        } else {
            None
        }
    }

    // ---- PRIVATE --------------------------------------------------------

    fn set_targets(
        &mut self,
        forward: Option<Vector3<f64>>,
        position: Option<Vector3<f64>>,
    ) {
        self.target_forward = forward;
        self.target_position = position;

        // Fresh targets mean fresh loop state
        self.orient_ctrl.reset();
        self.pos_ctrl.reset();
        self.stop_latched = false;
    }

    fn clear_targets(&mut self) {
        self.target_forward = None;
        self.target_position = None;
        self.orient_ctrl.reset();
        self.pos_ctrl.reset();
    }

    fn clamped_cmd(&self, left: f64, right: f64) -> ThrottleCmd {
        ThrottleCmd {
            left: clamp(&left, &-self.params.max_throttle, &self.params.max_throttle),
            right: clamp(&right, &-self.params.max_throttle, &self.params.max_throttle),
        }
    }
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;
    use nalgebra::UnitQuaternion;

    fn test_params() -> Params {
        Params {
            orient_k_p: 1.0,
            orient_k_i: 0.0,
            orient_k_d: 0.0,
            pos_k_p: 1.0,
            pos_k_i: 0.0,
            pos_k_d: 0.0,
            control_rate_hz: 30.0,
            max_throttle: 0.7,
            orient_goal_tolerance_rad: 0.05,
            angular_rate_threshold_rads: 0.1,
            position_goal_tolerance_m: 0.1,
            linear_speed_threshold_ms: 0.05,
            max_target_speed_ms: 1.0,
            steering_response: vec![
                [-2.0, -0.5],
                [-0.5, -0.2],
                [0.0, 0.0],
                [0.5, 0.2],
                [2.0, 0.5],
            ],
        }
    }

    fn sample_at(t: f64, pose: Pose, speed: f64, rate: f64) -> PoseSample {
        PoseSample {
            pose,
            timestamp_s: t,
            speed_ms: speed,
            angular_rate_rads: rate,
        }
    }

    fn origin_pose() -> Pose {
        Pose {
            position_m: Vector3::zeros(),
            attitude_q: UnitQuaternion::identity(),
        }
    }

    #[test]
    fn test_open_loop_drive() {
        let mut ctrl = TrajCtrl::new(test_params());

        // Throttles are clamped to the configured maximum
        let cmd = ctrl.drive(1.0, -1.0);
        assert_eq!(cmd, ThrottleCmd { left: 0.7, right: -0.7 });
        assert!(!ctrl.has_target());

        let cmd = ctrl.rotate_in_place(0.3);
        assert_eq!(
            cmd,
            ThrottleCmd {
                left: -0.3,
                right: 0.3
            }
        );
    }

    #[test]
    fn test_open_loop_clears_targets() {
        let mut ctrl = TrajCtrl::new(test_params());

        ctrl.drive_to(&Vector3::new(2.0, 0.0, 0.0));
        assert!(ctrl.has_target());

        ctrl.drive(0.2, 0.2);
        assert!(!ctrl.has_target());
    }

    #[test]
    fn test_rate_cap_drops_excess_samples() {
        let mut ctrl = TrajCtrl::new(test_params());
        ctrl.drive_to(&Vector3::new(2.0, 0.0, -2.0));

        let pose = origin_pose();
        assert!(ctrl.proc(&sample_at(0.0, pose, 0.0, 0.0)).is_some());

        // 1 ms later is far inside the 30 Hz period: dropped
        assert!(ctrl.proc(&sample_at(0.001, pose, 0.0, 0.0)).is_none());

        // After a full period the cycle runs again
        assert!(ctrl.proc(&sample_at(0.05, pose, 0.0, 0.0)).is_some());
    }

    #[test]
    fn test_pure_rotation_terminates_at_zero_error() {
        let mut ctrl = TrajCtrl::new(test_params());
        let pose = origin_pose();

        // Face the direction the vehicle already faces
        ctrl.face(&pose.forward()).unwrap();
        assert!(ctrl.has_target());

        // Zero error and zero angular rate: target clears with zero output
        let cmd = ctrl.proc(&sample_at(0.0, pose, 0.0, 0.0));
        assert_eq!(cmd, Some(ThrottleCmd::default()));
        assert!(!ctrl.has_target());

        // Quiescence is not re-sent every cycle
        assert!(ctrl.proc(&sample_at(1.0, pose, 0.0, 0.0)).is_none());
    }

    #[test]
    fn test_rotation_produces_differential() {
        let mut ctrl = TrajCtrl::new(test_params());
        let pose = origin_pose();

        // Target 90 degrees anticlockwise of the current forward
        ctrl.rotate_in_place_by(90.0, &pose).unwrap();

        let cmd = ctrl
            .proc(&sample_at(0.0, pose, 0.0, 0.0))
            .expect("expected a command");

        // Positive differential: right forward, left back, equal magnitude
        assert!(cmd.right > 0.0);
        assert!((cmd.left + cmd.right).abs() < 1e-9);
        assert!(ctrl.has_target());
    }

    #[test]
    fn test_drive_to_produces_forward_throttle() {
        let mut ctrl = TrajCtrl::new(test_params());

        // Target straight ahead (forward is -Z)
        ctrl.drive_to(&Vector3::new(0.0, 0.0, -2.0));

        let cmd = ctrl
            .proc(&sample_at(0.0, origin_pose(), 0.0, 0.0))
            .expect("expected a command");

        // Common-mode positive throttle, no differential
        assert!(cmd.left > 0.0);
        assert!((cmd.left - cmd.right).abs() < 1e-9);
    }

    #[test]
    fn test_position_termination_clears_everything() {
        let mut ctrl = TrajCtrl::new(test_params());

        ctrl.drive_to(&Vector3::new(0.0, 0.0, -2.0));

        // Arrive: within tolerance, nearly stopped
        let arrived = Pose {
            position_m: Vector3::new(0.0, 0.0, -1.95),
            attitude_q: UnitQuaternion::identity(),
        };
        let cmd = ctrl.proc(&sample_at(0.0, arrived, 0.01, 0.0));

        assert_eq!(cmd, Some(ThrottleCmd::default()));
        assert!(!ctrl.has_target());
    }

    #[test]
    fn test_within_tolerance_but_fast_keeps_driving() {
        let mut ctrl = TrajCtrl::new(test_params());

        ctrl.drive_to(&Vector3::new(0.0, 0.0, -2.0));

        let near = Pose {
            position_m: Vector3::new(0.0, 0.0, -1.95),
            attitude_q: UnitQuaternion::identity(),
        };

        // Close but still moving fast: not terminated
        let cmd = ctrl.proc(&sample_at(0.0, near, 1.0, 0.0));
        assert!(cmd.is_some());
        assert!(ctrl.has_target());
    }

    #[test]
    fn test_held_stop_sent_once_at_startup() {
        let mut ctrl = TrajCtrl::new(test_params());
        let pose = origin_pose();

        // No targets: the held stop goes out once
        assert_eq!(
            ctrl.proc(&sample_at(0.0, pose, 0.0, 0.0)),
            Some(ThrottleCmd::default())
        );
        assert!(ctrl.proc(&sample_at(1.0, pose, 0.0, 0.0)).is_none());
    }

    #[test]
    fn test_disabled_controller_is_silent() {
        let mut ctrl = TrajCtrl::new(test_params());
        ctrl.set_enabled(false);

        ctrl.drive_to(&Vector3::new(1.0, 0.0, 0.0));
        assert!(ctrl.proc(&sample_at(0.0, origin_pose(), 0.0, 0.0)).is_none());
    }
}
