//! Motor drive pin abstraction.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use log::trace;

// ---------------------------------------------------------------------------
// TRAITS
// ---------------------------------------------------------------------------

/// The output pins of one motor drive channel.
///
/// Implementations drive the physical H-bridge. The simulated implementation
/// below is used off-target and in tests.
pub trait MotorPins: Send {
    /// Set the PWM duty cycle, 0-65535.
    fn set_duty(&mut self, duty: u16);

    /// Set the direction pin. `true` is channel-forward; wiring asymmetry
    /// between the two sides is corrected above this layer.
    fn set_forward(&mut self, forward: bool);

    /// Assert or release the brake pin (abrupt, high-torque stop).
    fn set_brake(&mut self, on: bool);

    /// Assert or release the stop pin (cut drive, motor free-wheels).
    fn set_stop(&mut self, on: bool);

    /// Set the PWM carrier frequency in Hz.
    fn set_pwm_frequency(&mut self, frequency_hz: u16);
}

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// Simulated drive pins.
///
/// Holds the commanded pin state and logs transitions, so the executable can
/// run on a development host with no drive hardware attached.
#[derive(Debug, Clone)]
pub struct SimPins {
    channel: &'static str,
    pub duty: u16,
    pub forward: bool,
    pub brake: bool,
    pub stop: bool,
    pub pwm_frequency_hz: u16,
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl SimPins {
    pub fn new(channel: &'static str) -> Self {
        Self {
            channel,
            duty: 0,
            forward: true,
            brake: false,
            // Boot in coast, matching the hardware's power-on state
            stop: true,
            pwm_frequency_hz: 0,
        }
    }
}

impl MotorPins for SimPins {
    fn set_duty(&mut self, duty: u16) {
        if duty != self.duty {
            trace!("[{}] duty <- {}", self.channel, duty);
            self.duty = duty;
        }
    }

    fn set_forward(&mut self, forward: bool) {
        if forward != self.forward {
            trace!("[{}] forward <- {}", self.channel, forward);
            self.forward = forward;
        }
    }

    fn set_brake(&mut self, on: bool) {
        if on != self.brake {
            trace!("[{}] brake <- {}", self.channel, on);
            self.brake = on;
        }
    }

    fn set_stop(&mut self, on: bool) {
        if on != self.stop {
            trace!("[{}] stop <- {}", self.channel, on);
            self.stop = on;
        }
    }

    fn set_pwm_frequency(&mut self, frequency_hz: u16) {
        if frequency_hz != self.pwm_frequency_hz {
            trace!("[{}] pwm frequency <- {} Hz", self.channel, frequency_hz);
            self.pwm_frequency_hz = frequency_hz;
        }
    }
}
