//! # PID controller
//!
//! The controller used by both trajectory control loops. Time deltas are
//! passed in explicitly by the caller (which knows the pose sample
//! timestamps), so the controller is deterministic under test.

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// A PID controller.
#[derive(Debug, Clone)]
pub struct PidController {
    /// Proportional gain
    k_p: f64,

    /// Integral gain
    k_i: f64,

    /// Derivative gain
    k_d: f64,

    /// Previous error, unset until the first update
    prev_error: Option<f64>,

    /// The integral accumulation.
    ///
    /// Deliberately unbounded (no anti-windup): goal-tolerance termination
    /// clears the loop long before windup matters in practice.
    integral: f64,

    /// Output of the most recent update
    last_output: f64,
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl PidController {
    /// Create a new controller with the given gains.
    pub fn new(k_p: f64, k_i: f64, k_d: f64) -> Self {
        Self {
            k_p,
            k_i,
            k_d,
            prev_error: None,
            integral: 0.0,
            last_output: 0.0,
        }
    }

    /// Replace the gains, clearing the accumulated state.
    pub fn set_gains(&mut self, k_p: f64, k_i: f64, k_d: f64) {
        self.k_p = k_p;
        self.k_i = k_i;
        self.k_d = k_d;
        self.reset();
    }

    /// Get the value of the controller for the given error and time step.
    ///
    /// The derivative uses `(error - prev_error) / dt` with `prev_error`
    /// initialised to the first error sample, so the first tick contributes
    /// zero derivative rather than a spike. Non-positive time steps leave
    /// the integral untouched and contribute no derivative.
    pub fn update(&mut self, error: f64, dt_s: f64) -> f64 {
        let deriv = if dt_s > 0.0 {
            self.integral += error * dt_s;
            (error - self.prev_error.unwrap_or(error)) / dt_s
        } else {
            0.0
        };

        let out = self.k_p * error + self.k_i * self.integral + self.k_d * deriv;

        self.prev_error = Some(error);
        self.last_output = out;

        out
    }

    /// Clear the previous error and the integral accumulator.
    pub fn reset(&mut self) {
        self.prev_error = None;
        self.integral = 0.0;
        self.last_output = 0.0;
    }

    pub fn last_output(&self) -> f64 {
        self.last_output
    }
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_zero_error_is_stable() {
        // With zero error on every tick and a previously-zero integral the
        // output is zero regardless of gains
        let mut pid = PidController::new(10.0, 5.0, 2.0);

        for _ in 0..20 {
            assert_eq!(pid.update(0.0, 0.1), 0.0);
        }
    }

    #[test]
    fn test_proportional_only() {
        let mut pid = PidController::new(2.0, 0.0, 0.0);

        assert_eq!(pid.update(1.5, 0.1), 3.0);
        assert_eq!(pid.update(-0.5, 0.1), -1.0);
    }

    #[test]
    fn test_derivative_zero_on_first_tick() {
        let mut pid = PidController::new(0.0, 0.0, 1.0);

        // First tick: prev_error is initialised to the sample, so no spike
        assert_eq!(pid.update(5.0, 0.1), 0.0);

        // Second tick: (6 - 5) / 0.1 = 10
        assert!((pid.update(6.0, 0.1) - 10.0).abs() < 1e-9);
    }

    #[test]
    fn test_integral_accumulates_dt_weighted() {
        let mut pid = PidController::new(0.0, 1.0, 0.0);

        assert!((pid.update(1.0, 0.5) - 0.5).abs() < 1e-9);
        assert!((pid.update(1.0, 0.5) - 1.0).abs() < 1e-9);
        assert!((pid.update(1.0, 0.25) - 1.25).abs() < 1e-9);
    }

    #[test]
    fn test_zero_dt_skips_integral_and_derivative() {
        let mut pid = PidController::new(1.0, 1.0, 1.0);
        pid.update(1.0, 0.1);

        let out = pid.update(2.0, 0.0);
        // Only P and the existing integral contribute
        assert!((out - (2.0 + 0.1)).abs() < 1e-9);
    }

    #[test]
    fn test_reset() {
        let mut pid = PidController::new(1.0, 1.0, 1.0);
        pid.update(3.0, 1.0);
        assert!(pid.last_output() != 0.0);

        pid.reset();
        assert_eq!(pid.last_output(), 0.0);
        assert_eq!(pid.update(0.0, 1.0), 0.0);
    }
}
