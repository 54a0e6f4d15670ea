//! End-to-end navigation scenario: plan a route over an empty grid, then
//! drive it with a simulated vehicle and check the controller stops at the
//! goal.

use ctrl_lib::{
    loc::{Pose, PoseSample},
    nav::find_path,
    nav::OccGrid,
    traj_ctrl::{Params, ThrottleCmd, TrajCtrl},
};
use nalgebra::{UnitQuaternion, Vector3};
use std::f64::consts::FRAC_PI_2;

fn controller_params() -> Params {
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

#[test]
fn test_plan_and_drive_to_goal() {
    // A 5m x 5m obstacle-free grid of 0.5 m cells centred on the vehicle
    let grid = OccGrid::new(5.0, 5.0, 0.5, Vector3::zeros()).unwrap();

    let start = Vector3::zeros();
    let goal = Vector3::new(2.0, 0.0, 0.0);

    // ---- PLAN ----

    let cells = find_path(&grid, &start, &goal, 0.25);

    // A straight clear run compresses to exactly the two endpoints
    assert_eq!(cells.len(), 2, "expected a 2-waypoint path, got {:?}", cells);

    let w0 = grid.cell_to_position(cells[0]);
    let w1 = grid.cell_to_position(cells[1]);
    assert!((w0 - start).norm() < 1e-9);
    assert!((w1 - goal).norm() < 1e-9);

    // ---- DRIVE ----

    // The vehicle faces +X (toward the goal); forward is -Z in the body
    // frame, so yaw by -90 degrees
    let attitude = UnitQuaternion::from_axis_angle(&Vector3::y_axis(), -FRAC_PI_2);

    let mut ctrl = TrajCtrl::new(controller_params());
    ctrl.drive_to(&w1);

    // First-order vehicle model: commanded common-mode throttle maps
    // straight to speed at 1 (m/s)/throttle
    let dt = 0.04;
    let mut position = start;
    let mut speed_ms = 0.0;
    let mut last_cmd = ThrottleCmd::default();
    let mut peak_throttle: f64 = 0.0;
    let mut arrived = false;

    for i in 0..500 {
        let pose = Pose {
            position_m: position,
            attitude_q: attitude,
        };
        let sample = PoseSample {
            pose,
            timestamp_s: i as f64 * dt,
            speed_ms,
            angular_rate_rads: 0.0,
        };

        if let Some(cmd) = ctrl.proc(&sample) {
            last_cmd = cmd;
        }

        let throttle = 0.5 * (last_cmd.left + last_cmd.right);
        peak_throttle = peak_throttle.max(throttle.abs());

        speed_ms = throttle.abs();
        position += pose.forward() * throttle * dt;

        if !ctrl.has_target() {
            arrived = true;
            break;
        }
    }

    assert!(arrived, "controller never terminated, at {:?}", position);

    // Stopped within tolerance of the goal with an explicit stop command
    assert!(
        (position - goal).norm() <= 0.15,
        "stopped too far from goal: {:?}",
        position
    );
    assert_eq!(last_cmd, ThrottleCmd::default());

    // The drive ramped up before decelerating to a stop
    assert!(peak_throttle > 0.5);
}
