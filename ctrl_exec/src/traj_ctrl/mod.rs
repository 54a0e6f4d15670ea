//! # Trajectory control module
//!
//! Trajectory control turns the pose stream and the current motion target
//! into throttle commands for the motor board. Two PID loops run per
//! control cycle: an orientation loop on the signed angle error between the
//! current and target forward directions, and a position loop on the
//! remaining distance projected onto the forward axis. Their outputs
//! superimpose (a steering differential from the orientation loop plus a
//! common-mode throttle from the position loop) and the result is clamped
//! to the configured maximum throttle.
//!
//! Targets are cleared by goal-tolerance termination (close enough and slow
//! enough) or by any open-loop command. Everything happens in the
//! horizontal plane; the vertical axis is ignored throughout.

// ---------------------------------------------------------------------------
// MODULES
// ---------------------------------------------------------------------------

pub mod params;
pub mod pid;
pub mod state;

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// Internal
pub use params::Params;
pub use pid::*;
pub use state::*;

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

/// Potential errors that can occur during processing of the module.
#[derive(Debug, thiserror::Error)]
pub enum TrajCtrlError {
    #[error("Could not load parameters: {0}")]
    ParamLoadError(util::params::LoadError),

    /// A direction command was given with no usable horizontal component.
    #[error("Target direction has no horizontal component")]
    DegenerateDirection,
}
