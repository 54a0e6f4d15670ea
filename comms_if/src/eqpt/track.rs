//! # Tracking Source Communications Module
//!
//! The external 6-DOF tracking source publishes one [`TrackMsg::Frame`] per
//! tracking frame, and batches of 3D surface samples whenever new surface
//! geometry has been observed. This core consumes both through a single
//! subscription; nothing else of the tracking stack is visible here.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use nalgebra::Matrix4;
use serde::{Deserialize, Serialize};

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

/// A message from the tracking source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum TrackMsg {
    /// A 6-DOF pose sample.
    Frame {
        /// Body-to-world homogeneous transform of the vehicle.
        transform: Matrix4<f64>,

        /// Time of the frame in seconds, monotonic within the tracking
        /// session.
        timestamp_s: f64,
    },

    /// A batch of 3D points sampled from observed surface geometry, in world
    /// coordinates.
    SurfaceSweep { points_m: Vec<[f64; 3]> },
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_frame_json_roundtrip() {
        let msg = TrackMsg::Frame {
            transform: Matrix4::identity(),
            timestamp_s: 3.25,
        };

        let json = serde_json::to_string(&msg).unwrap();
        let parsed: TrackMsg = serde_json::from_str(&json).unwrap();

        match parsed {
            TrackMsg::Frame {
                transform,
                timestamp_s,
            } => {
                assert_eq!(transform, Matrix4::identity());
                assert_eq!(timestamp_s, 3.25);
            }
            _ => panic!("Wrong variant"),
        }
    }
}
