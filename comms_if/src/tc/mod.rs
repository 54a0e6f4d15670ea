//! # Telecommand module
//!
//! Telecommands are instructions sent to the control executable by an
//! operator over the debug channel. They carry manoeuvre requests and
//! runtime tuning updates; none of them are persisted. The enum derives
//! `StructOpt` so the operator console can parse a command line directly
//! into a telecommand.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// External
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use structopt::clap::AppSettings;
use structopt::StructOpt;
use thiserror::Error;

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

/// A telecommand, i.e. an instruction sent to the vehicle by the operator.
#[derive(Debug, Clone, Serialize, Deserialize, StructOpt)]
pub enum Tc {
    /// Open-loop drive with separate left and right throttles in [-1, 1].
    #[structopt(setting = AppSettings::AllowNegativeNumbers)]
    Drive {
        #[structopt(allow_hyphen_values = true)]
        left: f64,
        #[structopt(allow_hyphen_values = true)]
        right: f64,
    },

    /// Rotate in place by a signed number of degrees about the vertical
    /// axis.
    #[structopt(setting = AppSettings::AllowNegativeNumbers)]
    Rotate {
        #[structopt(allow_hyphen_values = true)]
        degrees: f64,
    },

    /// Drive the given distance along the current forward direction.
    /// Negative distances reverse.
    #[structopt(setting = AppSettings::AllowNegativeNumbers)]
    DriveForward {
        #[structopt(allow_hyphen_values = true)]
        meters: f64,
    },

    /// Navigate to the given horizontal position, path-planning around
    /// mapped obstacles.
    #[structopt(setting = AppSettings::AllowNegativeNumbers)]
    DriveTo {
        #[structopt(allow_hyphen_values = true)]
        x: f64,
        #[structopt(allow_hyphen_values = true)]
        z: f64,
    },

    /// Stop the vehicle and clear any active motion target.
    Stop,

    /// Update the gains of one of the control loops. Takes effect on the
    /// next control cycle and resets that loop's accumulated state.
    #[structopt(setting = AppSettings::AllowNegativeNumbers)]
    SetPidGains {
        which: PidLoopId,
        #[structopt(allow_hyphen_values = true)]
        kp: f64,
        #[structopt(allow_hyphen_values = true)]
        ki: f64,
        #[structopt(allow_hyphen_values = true)]
        kd: f64,
    },

    /// Set the maximum throttle magnitude the controller may command.
    SetMaxThrottle { max_throttle: f64 },

    /// Set the distance below which a position target counts as reached.
    SetPositionGoalTolerance { meters: f64 },

    /// Configure the motor board watchdog.
    Watchdog {
        /// "true" or "false"
        #[structopt(parse(try_from_str))]
        enabled: bool,
        timeout_s: f64,
    },

    /// Set the motor board PWM carrier frequency in Hz.
    PwmFrequency { frequency_hz: u16 },

    /// Save a snapshot of the current occupancy grid and planned route into
    /// the session directory.
    SaveMap,

    /// Measure the round trip time to the motor board.
    Ping,
}

/// Identifies one of the two trajectory control loops.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PidLoopId {
    Orientation,
    Position,
}

/// Response to a telecommand.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum TcResponse {
    /// The telecommand was accepted
    Ok,

    /// The telecommand could not be parsed or carried invalid values
    Invalid(String),

    /// The telecommand was valid but could not be executed in the current
    /// state, for example a drive command while no link is connected.
    CannotProcess(String),
}

/// Possible parsing errors.
#[derive(Debug, Error)]
pub enum TcParseError {
    #[error("TC contains invalid JSON: {0}")]
    InvalidJson(serde_json::Error),

    #[error("Unknown PID loop \"{0}\", expected \"orientation\" or \"position\"")]
    UnknownPidLoop(String),
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl Tc {
    /// Parse a TC from the JSON sent over the debug channel.
    pub fn from_json(json_str: &str) -> Result<Self, TcParseError> {
        serde_json::from_str(json_str).map_err(TcParseError::InvalidJson)
    }

    /// Serialise this TC to the JSON sent over the debug channel.
    pub fn to_json(&self) -> String {
        // An enum of plain values cannot fail to serialise
        serde_json::to_string(self).unwrap_or_else(|_| String::from("null"))
    }
}

impl FromStr for PidLoopId {
    type Err = TcParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "orientation" | "orient" => Ok(PidLoopId::Orientation),
            "position" | "pos" => Ok(PidLoopId::Position),
            other => Err(TcParseError::UnknownPidLoop(other.into())),
        }
    }
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_json_roundtrip() {
        let tc = Tc::SetPidGains {
            which: PidLoopId::Position,
            kp: 1.0,
            ki: 0.1,
            kd: 0.05,
        };

        let parsed = Tc::from_json(&tc.to_json()).unwrap();
        match parsed {
            Tc::SetPidGains { which, kp, ki, kd } => {
                assert_eq!(which, PidLoopId::Position);
                assert_eq!((kp, ki, kd), (1.0, 0.1, 0.05));
            }
            _ => panic!("Wrong variant"),
        }
    }

    #[test]
    fn test_command_line_parse() {
        // The operator console splits a line and hands it straight to
        // structopt, with the program name prepended
        let tc = Tc::from_iter_safe(&["tc", "drive-to", "1.5", "-2.0"]).unwrap();
        match tc {
            Tc::DriveTo { x, z } => assert_eq!((x, z), (1.5, -2.0)),
            _ => panic!("Wrong variant"),
        }

        let tc = Tc::from_iter_safe(&["tc", "set-pid-gains", "orientation", "2", "0", "0.1"])
            .unwrap();
        assert!(matches!(
            tc,
            Tc::SetPidGains {
                which: PidLoopId::Orientation,
                ..
            }
        ));

        let tc = Tc::from_iter_safe(&["tc", "watchdog", "true", "1.5"]).unwrap();
        assert!(matches!(tc, Tc::Watchdog { enabled: true, .. }));

        assert!(Tc::from_iter_safe(&["tc", "not-a-command"]).is_err());
    }
}
