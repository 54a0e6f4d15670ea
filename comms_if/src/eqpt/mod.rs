//! # Equipment Communications Interfaces

// ------------------------------------------------------------------------------------------------
// MODULES
// ------------------------------------------------------------------------------------------------

/// Motor board wire protocol and link-layer messages
pub mod motor;

/// Tracking source messages
pub mod track;
