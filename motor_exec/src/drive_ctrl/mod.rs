//! # Drive control module
//!
//! This module owns the two motor drive channels. Each channel has a PWM
//! duty output, a direction pin, a brake pin and a stop (coast) pin. Signed
//! throttle demands in [-1, 1] are converted into pin states, with an
//! epsilon band around zero mapping to an explicit coast rather than a tiny
//! duty cycle.

// ---------------------------------------------------------------------------
// MODULES
// ---------------------------------------------------------------------------

pub mod pins;
pub mod state;

// ---------------------------------------------------------------------------
// EXPORTS
// ---------------------------------------------------------------------------

pub use pins::*;
pub use state::*;

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

/// Possible errors that can occur during drive control operation.
#[derive(Debug, thiserror::Error)]
pub enum DriveCtrlError {
    #[error("Failed to load parameters: {0}")]
    ParamLoadError(util::params::LoadError),
}
