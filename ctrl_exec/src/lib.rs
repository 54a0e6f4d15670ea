//! # Control Executable Library
//!
//! Library parts of the vehicle-side control executable: localisation
//! types, the occupancy grid and pathfinder, the trajectory controller, the
//! wireless link manager, and the clients/servers the composition root
//! wires together.

// ---------------------------------------------------------------------------
// MODULES
// ---------------------------------------------------------------------------

pub mod link;
pub mod loc;
pub mod nav;
pub mod tc_server;
pub mod track_client;
pub mod traj_ctrl;
