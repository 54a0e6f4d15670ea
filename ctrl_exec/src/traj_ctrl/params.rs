//! Trajectory control parameters

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// External
use serde::Deserialize;

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// Parameters for trajectory control.
///
/// Gains, limits and tolerances here are the boot values; the operator can
/// change them at runtime over the telecommand channel.
#[derive(Deserialize, Debug, Clone)]
pub struct Params {
    /// Orientation controller proportional gain
    pub orient_k_p: f64,

    /// Orientation controller integral gain
    pub orient_k_i: f64,

    /// Orientation controller derivative gain
    pub orient_k_d: f64,

    /// Position controller proportional gain
    pub pos_k_p: f64,

    /// Position controller integral gain
    pub pos_k_i: f64,

    /// Position controller derivative gain
    pub pos_k_d: f64,

    /// Maximum rate at which control cycles run, in Hz. Pose samples
    /// arriving faster than this are dropped, not queued.
    pub control_rate_hz: f64,

    /// Maximum throttle magnitude the controller may command
    pub max_throttle: f64,

    /// Angle error below which an orientation target counts as achieved,
    /// in radians
    pub orient_goal_tolerance_rad: f64,

    /// Angular rate below which the vehicle counts as rotationally at rest,
    /// in rad/s
    pub angular_rate_threshold_rads: f64,

    /// Distance below which a position target counts as achieved, in meters
    pub position_goal_tolerance_m: f64,

    /// Horizontal speed below which the vehicle counts as at rest, in m/s
    pub linear_speed_threshold_ms: f64,

    /// Upper bound on the linear speed the position loop may demand, in
    /// m/s. Demands map linearly from [0, this] into [0, max_throttle].
    pub max_target_speed_ms: f64,

    /// Measured steering response of the drive train: sorted (angular rate
    /// in rad/s, throttle differential) pairs, interpolated linearly.
    ///
    /// Positive differentials (right channel forward, left back) rotate the
    /// vehicle anticlockwise about the up axis. The table comes from
    /// spinning the vehicle at fixed differentials and recording the
    /// resulting rates, so it reflects the real drive train rather than a
    /// theoretical model.
    pub steering_response: Vec<[f64; 2]>,
}
