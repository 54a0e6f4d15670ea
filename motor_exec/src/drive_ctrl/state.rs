//! # Drive control module state

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// External
use log::trace;
use serde::Deserialize;

// Internal
use super::{DriveCtrlError, MotorPins};
use comms_if::eqpt::motor::THROTTLE_EPSILON;
use util::{module::State, params, session::Session};

// ---------------------------------------------------------------------------
// CONSTANTS
// ---------------------------------------------------------------------------

/// Full-scale PWM duty value.
const DUTY_FULL_SCALE: f32 = 65535.0;

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// One motor drive channel.
pub struct DriveChannel<P: MotorPins> {
    pins: P,

    /// If true the physical wiring of this channel is reversed, and the
    /// direction pin is driven inverted to compensate.
    forward_inverted: bool,

    coasting: bool,

    duty: u16,
}

/// The drive controller, owning both motor channels.
pub struct DriveCtrl<P: MotorPins> {
    params: Params,

    left: DriveChannel<P>,
    right: DriveChannel<P>,

    report: DriveReport,
}

/// A throttle demand for both channels.
#[derive(Debug, Clone, Copy, Default)]
pub struct MotorDemand {
    pub left_throttle: f32,
    pub right_throttle: f32,
}

/// Report on the state of both drive channels.
#[derive(Debug, Clone, Copy, Default)]
pub struct DriveReport {
    pub left_duty: u16,
    pub right_duty: u16,
    pub left_coasting: bool,
    pub right_coasting: bool,
}

/// Parameters for drive control.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Params {
    /// The left channel's wiring is reversed
    pub left_forward_inverted: bool,

    /// The right channel's wiring is reversed
    pub right_forward_inverted: bool,

    /// PWM carrier frequency applied at boot, in Hz
    pub pwm_frequency_hz: u16,
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl<P: MotorPins> DriveChannel<P> {
    fn new(pins: P) -> Self {
        Self {
            pins,
            forward_inverted: false,
            coasting: true,
            duty: 0,
        }
    }

    /// Apply a signed throttle in [-1, 1] to this channel.
    ///
    /// Magnitudes below the epsilon are an explicit coast, not a tiny duty
    /// cycle. The direction pin is always set before the duty so a sign
    /// change never drives the old direction at the new speed.
    pub fn set_throttle(&mut self, throttle: f32) {
        if throttle.abs() < THROTTLE_EPSILON {
            self.coast();
            return;
        }

        let duty = (throttle.abs().min(1.0) * DUTY_FULL_SCALE).round() as u16;

        self.pins.set_brake(false);
        self.pins
            .set_forward((throttle > 0.0) ^ self.forward_inverted);
        self.pins.set_duty(duty);
        self.pins.set_stop(false);

        self.coasting = false;
        self.duty = duty;
    }

    /// Cut drive and let the motor free-wheel.
    ///
    /// Idempotent: asserting coast on an already coasting channel changes
    /// nothing.
    pub fn coast(&mut self) {
        self.pins.set_duty(0);
        self.pins.set_brake(false);
        self.pins.set_stop(true);

        self.coasting = true;
        self.duty = 0;
    }

    pub fn is_coasting(&self) -> bool {
        self.coasting
    }

    pub fn duty(&self) -> u16 {
        self.duty
    }

    pub fn pins(&self) -> &P {
        &self.pins
    }
}

impl<P: MotorPins> DriveCtrl<P> {
    /// Create a new drive controller over the given pin sets.
    ///
    /// The controller must be initialised with [`State::init`] before use.
    pub fn new(left_pins: P, right_pins: P) -> Self {
        Self {
            params: Params::default(),
            left: DriveChannel::new(left_pins),
            right: DriveChannel::new(right_pins),
            report: DriveReport::default(),
        }
    }

    /// Coast both motors immediately.
    ///
    /// This is the fail-safe state used by the watchdog and on link loss.
    /// Idempotent, so repeated triggers never re-assert destructively.
    pub fn make_safe(&mut self) {
        self.left.coast();
        self.right.coast();
    }

    /// Set the PWM carrier frequency on both channels.
    pub fn set_pwm_frequency(&mut self, frequency_hz: u16) {
        self.left.pins.set_pwm_frequency(frequency_hz);
        self.right.pins.set_pwm_frequency(frequency_hz);
    }

    pub fn left(&self) -> &DriveChannel<P> {
        &self.left
    }

    pub fn right(&self) -> &DriveChannel<P> {
        &self.right
    }
}

impl<P: MotorPins> State for DriveCtrl<P> {
    type InitData = &'static str;
    type InitError = DriveCtrlError;

    type InputData = MotorDemand;
    type OutputData = ();
    type StatusReport = DriveReport;
    type ProcError = DriveCtrlError;

    /// Initialise the drive controller.
    ///
    /// Expected init data is the path to the module parameters file.
    fn init(&mut self, init_data: Self::InitData, _session: &Session) -> Result<(), DriveCtrlError> {
        self.params = params::load(init_data).map_err(DriveCtrlError::ParamLoadError)?;

        self.left.forward_inverted = self.params.left_forward_inverted;
        self.right.forward_inverted = self.params.right_forward_inverted;

        self.set_pwm_frequency(self.params.pwm_frequency_hz);

        // Boot with both motors coasting
        self.make_safe();

        Ok(())
    }

    /// Apply a throttle demand to both channels.
    fn proc(
        &mut self,
        input_data: &Self::InputData,
    ) -> Result<(Self::OutputData, Self::StatusReport), DriveCtrlError> {
        self.left.set_throttle(input_data.left_throttle);
        self.right.set_throttle(input_data.right_throttle);

        self.report = DriveReport {
            left_duty: self.left.duty(),
            right_duty: self.right.duty(),
            left_coasting: self.left.is_coasting(),
            right_coasting: self.right.is_coasting(),
        };

        trace!(
            "demands out: left {} (coast {}), right {} (coast {})",
            self.report.left_duty,
            self.report.left_coasting,
            self.report.right_duty,
            self.report.right_coasting
        );

        Ok(((), self.report))
    }
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;
    use crate::drive_ctrl::SimPins;

    fn test_channel(inverted: bool) -> DriveChannel<SimPins> {
        let mut channel = DriveChannel::new(SimPins::new("test"));
        channel.forward_inverted = inverted;
        channel
    }

    #[test]
    fn test_epsilon_throttle_coasts() {
        let mut channel = test_channel(false);

        channel.set_throttle(0.5);
        assert!(!channel.is_coasting());

        // Near-zero throttle must coast, not output a tiny duty
        channel.set_throttle(0.0005);
        assert!(channel.is_coasting());
        assert_eq!(channel.pins().duty, 0);
        assert!(channel.pins().stop);
        assert!(!channel.pins().brake);
    }

    #[test]
    fn test_duty_mapping() {
        let mut channel = test_channel(false);

        channel.set_throttle(1.0);
        assert_eq!(channel.pins().duty, 65535);
        assert!(channel.pins().forward);
        assert!(!channel.pins().stop);

        channel.set_throttle(-0.5);
        assert_eq!(channel.pins().duty, 32768);
        assert!(!channel.pins().forward);
    }

    #[test]
    fn test_direction_inversion() {
        let mut channel = test_channel(true);

        channel.set_throttle(1.0);
        assert!(!channel.pins().forward);

        channel.set_throttle(-1.0);
        assert!(channel.pins().forward);
    }

    #[test]
    fn test_make_safe_idempotent() {
        let mut ctrl = DriveCtrl::new(SimPins::new("left"), SimPins::new("right"));

        ctrl.proc(&MotorDemand {
            left_throttle: 0.7,
            right_throttle: -0.7,
        })
        .unwrap();
        assert!(!ctrl.left().is_coasting());

        ctrl.make_safe();
        assert!(ctrl.left().is_coasting());
        assert!(ctrl.right().is_coasting());

        // Repeated triggers leave the state unchanged
        ctrl.make_safe();
        assert!(ctrl.left().is_coasting());
        assert_eq!(ctrl.left().pins().duty, 0);
    }
}
