//! # Navigation module
//!
//! Owns the occupancy grids for a navigation attempt and turns goal
//! positions into world-space waypoint routes. The grids live only as long
//! as an attempt: they are created centred on the vehicle when an attempt
//! begins, fed by mapping cycles from the surface sample stream, and
//! recreated from scratch if the vehicle drifts too far from their centre.

// ---------------------------------------------------------------------------
// MODULES
// ---------------------------------------------------------------------------

pub mod occ_grid;
pub mod path_finder;

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// External
use log::{debug, info, warn};
use nalgebra::Vector3;
use serde::Deserialize;

// Internal
pub use occ_grid::{CellIndex, FractionalCellIndex, GridError, GridSnapshot, OccGrid};
pub use path_finder::find_path;

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// Navigation manager.
pub struct NavMgr {
    params: NavParams,

    /// Decayed observation counts, rebuilt every mapping cycle
    accumulator: Option<OccGrid>,

    /// Binary occupancy thresholded from the accumulator
    occupancy: Option<OccGrid>,
}

/// Parameters for the navigation manager.
#[derive(Debug, Clone, Deserialize)]
pub struct NavParams {
    /// Width (X extent) of the grids in meters
    pub grid_width_m: f64,

    /// Depth (Z extent) of the grids in meters
    pub grid_depth_m: f64,

    /// Cell side length in meters
    pub cell_side_m: f64,

    /// Surface samples outside this height band are ignored (floor and
    /// ceiling rejection), in meters relative to the tracking origin
    pub sample_min_height_m: f64,
    pub sample_max_height_m: f64,

    /// Weight added to a cell per in-band sample
    pub incoming_sample_weight: f64,

    /// Multiplier applied to every accumulator cell before a new batch is
    /// folded in, in [0, 1]
    pub decay_weight: f64,

    /// Accumulator value at which a cell becomes occupied
    pub occupancy_threshold: f64,

    /// Physical radius of the vehicle used for the footprint safety margin
    pub robot_radius_m: f64,

    /// Fraction of the half-extent the vehicle may drift from the grid
    /// centre before the grids are discarded and recreated
    pub recentre_fraction: f64,
}

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

/// Errors that can occur during navigation management.
#[derive(Debug, thiserror::Error)]
pub enum NavError {
    #[error("Could not load parameters: {0}")]
    ParamLoadError(util::params::LoadError),

    #[error("No navigation attempt is active, so there is no grid")]
    NoActiveGrid,

    #[error("Grid error: {0}")]
    GridError(GridError),
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl NavMgr {
    /// Initialise the navigation manager.
    ///
    /// Expected init data is the path to the parameter file.
    pub fn init(params_path: &str) -> Result<Self, NavError> {
        let params = util::params::load(params_path).map_err(NavError::ParamLoadError)?;

        Ok(Self {
            params,
            accumulator: None,
            occupancy: None,
        })
    }

    /// Create a manager directly from parameters.
    pub fn new(params: NavParams) -> Self {
        Self {
            params,
            accumulator: None,
            occupancy: None,
        }
    }

    /// Whether a navigation attempt (and therefore a grid) is active.
    pub fn attempt_active(&self) -> bool {
        self.occupancy.is_some()
    }

    /// Begin a navigation attempt, creating fresh grids centred on the
    /// vehicle.
    pub fn begin_attempt(&mut self, vehicle_position_m: &Vector3<f64>) -> Result<(), NavError> {
        let accumulator = OccGrid::new(
            self.params.grid_width_m,
            self.params.grid_depth_m,
            self.params.cell_side_m,
            *vehicle_position_m,
        )
        .map_err(NavError::GridError)?;

        let occupancy = accumulator.clone();

        info!(
            "Navigation attempt started: {}x{} cells of {} m centred on ({:.2}, {:.2})",
            accumulator.cells_wide(),
            accumulator.cells_deep(),
            accumulator.cell_side_m(),
            vehicle_position_m.x,
            vehicle_position_m.z
        );

        self.accumulator = Some(accumulator);
        self.occupancy = Some(occupancy);

        Ok(())
    }

    /// End the navigation attempt, discarding the grids.
    pub fn end_attempt(&mut self) {
        if self.attempt_active() {
            info!("Navigation attempt ended, grids discarded");
        }

        self.accumulator = None;
        self.occupancy = None;
    }

    /// Fold a batch of 3D surface samples into the map.
    ///
    /// Runs one mapping cycle: decay-and-accumulate into the counts grid,
    /// then threshold into the binary occupancy grid. If the vehicle has
    /// drifted too far from the grid centre the grids are recreated around
    /// it first, dropping what was mapped so far.
    pub fn integrate_sweep(
        &mut self,
        samples: &[Vector3<f64>],
        vehicle_position_m: &Vector3<f64>,
    ) -> Result<(), NavError> {
        if !self.attempt_active() {
            return Err(NavError::NoActiveGrid);
        }

        if self.drifted_from_centre(vehicle_position_m) {
            warn!("Vehicle drifted too far from the grid centre, remapping from scratch");
            self.begin_attempt(vehicle_position_m)?;
        }

        // Borrow both grids; attempt_active above guarantees they exist
        let (accumulator, occupancy) = match (&mut self.accumulator, &mut self.occupancy) {
            (Some(a), Some(o)) => (a, o),
            _ => return Err(NavError::NoActiveGrid),
        };

        accumulator.accumulate(
            samples,
            (
                self.params.sample_min_height_m,
                self.params.sample_max_height_m,
            ),
            self.params.incoming_sample_weight as f32,
            self.params.decay_weight as f32,
        );

        occupancy
            .threshold_from(accumulator, self.params.occupancy_threshold as f32)
            .map_err(NavError::GridError)?;

        debug!("Mapping cycle complete, {} samples considered", samples.len());

        Ok(())
    }

    /// Replace the binary occupancy grid wholesale from an external source.
    pub fn set_occupancy_from_array(&mut self, values: &[f32]) -> Result<(), NavError> {
        match &mut self.occupancy {
            Some(grid) => grid.set_from_array(values).map_err(NavError::GridError),
            None => Err(NavError::NoActiveGrid),
        }
    }

    /// Plan a waypoint route from the vehicle to the goal.
    ///
    /// If the straight line to the goal is unobstructed the route is the
    /// trivial two-point one; otherwise the grid pathfinder runs and its
    /// compressed cell path is converted to world positions. An empty route
    /// means no path exists; that is a result for the caller to act on, not
    /// an error.
    pub fn plan_route(
        &self,
        from_m: &Vector3<f64>,
        to_m: &Vector3<f64>,
    ) -> Result<Vec<Vector3<f64>>, NavError> {
        let occupancy = self.occupancy.as_ref().ok_or(NavError::NoActiveGrid)?;

        // Straight shot available?
        if occupancy.line_unobstructed(from_m, to_m) {
            debug!("Straight line to goal is clear, skipping grid search");
            return Ok(vec![*from_m, *to_m]);
        }

        let cells = find_path(occupancy, from_m, to_m, self.params.robot_radius_m);

        if cells.is_empty() {
            warn!("No path to goal through the current map");
            return Ok(Vec::new());
        }

        Ok(cells
            .iter()
            .map(|&c| occupancy.cell_to_position(c))
            .collect())
    }

    /// Snapshot the binary occupancy grid for saving into the session.
    pub fn snapshot(&self, vehicle_position_m: &Vector3<f64>) -> Result<GridSnapshot, NavError> {
        self.occupancy
            .as_ref()
            .map(|g| g.snapshot(vehicle_position_m))
            .ok_or(NavError::NoActiveGrid)
    }

    fn drifted_from_centre(&self, vehicle_position_m: &Vector3<f64>) -> bool {
        let grid = match &self.occupancy {
            Some(g) => g,
            None => return false,
        };

        let centre = grid.centre_point_m();
        let offset = Vector3::new(
            vehicle_position_m.x - centre.x,
            0.0,
            vehicle_position_m.z - centre.z,
        );

        let half_extent = 0.5 * grid.width_m().min(grid.depth_m());

        offset.norm() > self.params.recentre_fraction * half_extent
    }
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;

    fn test_params() -> NavParams {
        NavParams {
            grid_width_m: 4.0,
            grid_depth_m: 4.0,
            cell_side_m: 0.5,
            sample_min_height_m: 0.1,
            sample_max_height_m: 1.5,
            incoming_sample_weight: 1.0,
            decay_weight: 1.0,
            occupancy_threshold: 3.0,
            robot_radius_m: 0.0,
            recentre_fraction: 0.75,
        }
    }

    #[test]
    fn test_lifecycle() {
        let mut nav = NavMgr::new(test_params());

        assert!(!nav.attempt_active());
        assert!(matches!(
            nav.integrate_sweep(&[], &Vector3::zeros()),
            Err(NavError::NoActiveGrid)
        ));

        nav.begin_attempt(&Vector3::zeros()).unwrap();
        assert!(nav.attempt_active());

        nav.end_attempt();
        assert!(!nav.attempt_active());
    }

    #[test]
    fn test_mapping_marks_persistent_obstacles() {
        let mut nav = NavMgr::new(test_params());
        nav.begin_attempt(&Vector3::zeros()).unwrap();

        // The same obstacle seen three times crosses the threshold
        let obstacle = Vector3::new(1.0, 0.5, 0.0);
        for _ in 0..3 {
            nav.integrate_sweep(&[obstacle], &Vector3::zeros()).unwrap();
        }

        let snapshot = nav.snapshot(&Vector3::zeros()).unwrap();
        let idx = 4 * snapshot.cells_wide + 6; // cell (6, 4)
        assert_eq!(snapshot.occupancy[idx], 1.0);
    }

    #[test]
    fn test_drift_recreates_grid() {
        let mut nav = NavMgr::new(test_params());
        nav.begin_attempt(&Vector3::zeros()).unwrap();

        // Mark an obstacle
        let obstacle = Vector3::new(1.0, 0.5, 0.0);
        for _ in 0..3 {
            nav.integrate_sweep(&[obstacle], &Vector3::zeros()).unwrap();
        }

        // Integrate from far outside the recentre threshold: the grids are
        // recreated around the new position and the old obstacle is gone
        let far = Vector3::new(10.0, 0.0, 0.0);
        nav.integrate_sweep(&[], &far).unwrap();

        let snapshot = nav.snapshot(&far).unwrap();
        assert!(snapshot.occupancy.iter().all(|&v| v == 0.0));
        assert_eq!(snapshot.centre_point_m[0], 10.0);
    }

    #[test]
    fn test_plan_route_direct_when_clear() {
        let mut nav = NavMgr::new(test_params());
        nav.begin_attempt(&Vector3::zeros()).unwrap();

        let goal = Vector3::new(1.5, 0.0, 0.0);
        let route = nav.plan_route(&Vector3::zeros(), &goal).unwrap();

        assert_eq!(route, vec![Vector3::zeros(), goal]);
    }

    #[test]
    fn test_plan_route_empty_when_goal_occupied() {
        let mut nav = NavMgr::new(test_params());
        nav.begin_attempt(&Vector3::zeros()).unwrap();

        // Build a solid obstacle at the goal
        let goal = Vector3::new(1.5, 0.0, 0.0);
        let sample = Vector3::new(1.5, 0.5, 0.0);
        for _ in 0..3 {
            nav.integrate_sweep(&[sample], &Vector3::zeros()).unwrap();
        }

        let route = nav.plan_route(&Vector3::zeros(), &goal).unwrap();
        assert!(route.is_empty());
    }
}
