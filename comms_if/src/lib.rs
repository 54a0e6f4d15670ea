//! # Communications interface crate.
//!
//! Provides all common communications interfaces for the software: the
//! binary wire protocol spoken to the motor board, the link-layer
//! advertisement types, tracking source messages, operator telecommands, and
//! the monitored networking layer.

// ------------------------------------------------------------------------------------------------
// MODULES
// ------------------------------------------------------------------------------------------------

/// Operator telecommand definitions
pub mod tc;

/// Message definitions for equipment (motor board, tracking source)
pub mod eqpt;

/// Network module
pub mod net;
