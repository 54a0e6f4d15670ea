//! # Localisation module
//!
//! Provides the vehicle pose types. Poses are not produced here; they come
//! from the external 6-DOF tracking source as 4x4 transforms, once per
//! tracking frame. This module only derives the quantities navigation and
//! control need: forward direction, horizontal speed, and angular speed.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use nalgebra::{Matrix3, Matrix4, UnitQuaternion, Vector3};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// The current pose (position and attitude in the world frame) of the
/// vehicle.
///
/// The world frame is right handed with Y up; navigation happens entirely
/// in the horizontal XZ plane.
#[derive(Debug, Copy, Clone, Serialize, Deserialize)]
pub struct Pose {
    /// The position in the world frame
    pub position_m: Vector3<f64>,

    /// The attitude of the vehicle in the world frame
    pub attitude_q: UnitQuaternion<f64>,
}

/// A pose sample as consumed by the control loop: the pose itself plus the
/// derived rates.
#[derive(Debug, Copy, Clone)]
pub struct PoseSample {
    pub pose: Pose,

    /// Time of the sample in seconds, monotonic within the tracking session
    pub timestamp_s: f64,

    /// Horizontal speed in m/s
    pub speed_ms: f64,

    /// Signed angular rate about the vertical axis in rad/s
    pub angular_rate_rads: f64,
}

/// Derives speeds from consecutive tracking frames.
#[derive(Debug, Default)]
pub struct VelocityEstimator {
    prev: Option<(f64, Vector3<f64>, Vector3<f64>)>,
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl Pose {
    /// Build a pose from a body-to-world homogeneous transform.
    pub fn from_transform(transform: &Matrix4<f64>) -> Self {
        let rotation = Matrix3::new(
            transform[(0, 0)],
            transform[(0, 1)],
            transform[(0, 2)],
            transform[(1, 0)],
            transform[(1, 1)],
            transform[(1, 2)],
            transform[(2, 0)],
            transform[(2, 1)],
            transform[(2, 2)],
        );

        Self {
            position_m: Vector3::new(transform[(0, 3)], transform[(1, 3)], transform[(2, 3)]),
            attitude_q: UnitQuaternion::from_matrix(&rotation),
        }
    }

    /// The forward direction of the vehicle (unit vector).
    ///
    /// The tracking source uses the camera convention of -Z forward in the
    /// body frame.
    pub fn forward(&self) -> Vector3<f64> {
        self.attitude_q * -Vector3::z()
    }

    /// The forward direction projected into the horizontal plane and
    /// normalised.
    ///
    /// Returns `None` when the vehicle is pitched so far that the forward
    /// direction has no usable horizontal component.
    pub fn forward_xz(&self) -> Option<Vector3<f64>> {
        horizontal_unit(&self.forward())
    }
}

impl VelocityEstimator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold a new tracking frame into the estimator, producing a pose
    /// sample with derived rates.
    ///
    /// The first frame, and frames with non-increasing timestamps, produce
    /// zero rates.
    pub fn sample(&mut self, pose: Pose, timestamp_s: f64) -> PoseSample {
        // Fall back to the previous forward if the current one is
        // degenerate, or +X if there has never been one
        let forward = pose
            .forward_xz()
            .or_else(|| self.prev.map(|(_, _, f)| f))
            .unwrap_or_else(Vector3::x);

        let (speed_ms, angular_rate_rads) = match self.prev {
            Some((prev_t, prev_pos, prev_fwd)) if timestamp_s > prev_t => {
                let dt = timestamp_s - prev_t;

                let delta = pose.position_m - prev_pos;
                let horizontal = Vector3::new(delta.x, 0.0, delta.z);

                (
                    horizontal.norm() / dt,
                    signed_angle_about_up(&prev_fwd, &forward) / dt,
                )
            }
            _ => (0.0, 0.0),
        };

        self.prev = Some((timestamp_s, pose.position_m, forward));

        PoseSample {
            pose,
            timestamp_s,
            speed_ms,
            angular_rate_rads,
        }
    }
}

// ---------------------------------------------------------------------------
// PUBLIC FUNCTIONS
// ---------------------------------------------------------------------------

/// Project a vector into the horizontal plane and normalise it.
///
/// Returns `None` if the horizontal component is negligible.
pub fn horizontal_unit(v: &Vector3<f64>) -> Option<Vector3<f64>> {
    let horizontal = Vector3::new(v.x, 0.0, v.z);
    let norm = horizontal.norm();

    if norm < 1e-9 {
        None
    } else {
        Some(horizontal / norm)
    }
}

/// Signed angle from `a` to `b` about the world up axis, in radians.
///
/// Both vectors are expected to lie in the horizontal plane. The result is
/// in (-pi, pi], positive when `b` is an anticlockwise rotation of `a` as
/// seen from above.
pub fn signed_angle_about_up(a: &Vector3<f64>, b: &Vector3<f64>) -> f64 {
    let cross = a.cross(b);
    let dot = a.dot(b);

    cross.dot(&Vector3::y()).atan2(dot)
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;
    use nalgebra::Unit;
    use std::f64::consts::FRAC_PI_2;

    #[test]
    fn test_pose_from_transform() {
        let mut transform = Matrix4::identity();
        transform[(0, 3)] = 1.0;
        transform[(1, 3)] = 2.0;
        transform[(2, 3)] = 3.0;

        let pose = Pose::from_transform(&transform);

        assert!((pose.position_m - Vector3::new(1.0, 2.0, 3.0)).norm() < 1e-9);
        assert!((pose.forward() - Vector3::new(0.0, 0.0, -1.0)).norm() < 1e-9);
    }

    #[test]
    fn test_signed_angle() {
        let a = Vector3::new(0.0, 0.0, -1.0);

        // Rotating -Z by +90 degrees about Y gives -X
        let b = Vector3::new(-1.0, 0.0, 0.0);
        assert!((signed_angle_about_up(&a, &b) - FRAC_PI_2).abs() < 1e-9);
        assert!((signed_angle_about_up(&b, &a) + FRAC_PI_2).abs() < 1e-9);

        // Identical directions have zero error
        assert!(signed_angle_about_up(&a, &a).abs() < 1e-12);
    }

    #[test]
    fn test_velocity_estimator() {
        let mut estimator = VelocityEstimator::new();

        let pose_a = Pose {
            position_m: Vector3::zeros(),
            attitude_q: UnitQuaternion::identity(),
        };
        let first = estimator.sample(pose_a, 0.0);
        assert_eq!(first.speed_ms, 0.0);
        assert_eq!(first.angular_rate_rads, 0.0);

        // 1 m of horizontal travel and 90 degrees of yaw over 2 seconds
        let pose_b = Pose {
            position_m: Vector3::new(1.0, 5.0, 0.0),
            attitude_q: UnitQuaternion::from_axis_angle(
                &Unit::new_normalize(Vector3::y()),
                FRAC_PI_2,
            ),
        };
        let second = estimator.sample(pose_b, 2.0);

        assert!((second.speed_ms - 0.5).abs() < 1e-9);
        assert!((second.angular_rate_rads - FRAC_PI_2 / 2.0).abs() < 1e-9);
    }
}
