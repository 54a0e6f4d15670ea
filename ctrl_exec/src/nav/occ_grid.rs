//! # Occupancy Grid
//!
//! A fixed-extent 2D grid over the horizontal (XZ) plane, each cell holding
//! an occupancy scalar. Two grids cooperate during mapping: an accumulator
//! holding decayed observation counts built from 3D surface samples, and a
//! binary occupancy grid thresholded from it. The grid is anchored so that
//! its centre cell sits exactly on the centre point it was created with.
//!
//! All cell lookups clamp into range; positions arbitrarily far outside the
//! grid resolve to the nearest edge cell.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use nalgebra::Vector3;
use ndarray::Array2;
use serde::{Deserialize, Serialize};

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Integral cell indices, always within the owning grid's bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CellIndex {
    pub x: usize,
    pub z: usize,
}

/// Unclamped-to-integer cell indices, used where sub-cell precision
/// matters (e.g. rendering a heading ray). Clamped to
/// `[-0.5, cells - 1 + 0.5]` on each axis.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FractionalCellIndex {
    pub x: f64,
    pub z: f64,
}

/// A fixed-extent occupancy grid.
#[derive(Debug, Clone)]
pub struct OccGrid {
    width_m: f64,
    depth_m: f64,
    cell_side_m: f64,

    cells_wide: usize,
    cells_deep: usize,

    centre_point_m: Vector3<f64>,

    /// Per-cell scalar values, indexed `[[x, z]]`
    values: Array2<f32>,

    /// Precomputed world position of every cell centre, in linear
    /// (`z * cells_wide + x`) order
    cell_positions_m: Vec<Vector3<f64>>,
}

/// A serialisable snapshot of a grid, saved into the session directory for
/// offline viewing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GridSnapshot {
    pub cells_wide: usize,
    pub cells_deep: usize,
    pub cell_side_m: f64,
    pub centre_point_m: [f64; 3],

    /// Cell values in linear (`z * cells_wide + x`) order
    pub occupancy: Vec<f32>,

    /// The cell the vehicle occupied when the snapshot was taken
    pub vehicle_cell: [usize; 2],
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum GridError {
    #[error("Cell side {0} m is not usable for a {1} x {2} m grid")]
    InvalidCellSide(f64, f64, f64),

    #[error("Grid shapes don't match: expected {expected} cells, got {actual}")]
    ShapeMismatch { expected: usize, actual: usize },
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl CellIndex {
    pub fn new(x: usize, z: usize) -> Self {
        Self { x, z }
    }
}

impl OccGrid {
    /// Create a new zeroed grid of the given extent, anchored so that the
    /// centre cell's world position is exactly `centre_point_m` (with the
    /// vertical component dropped).
    pub fn new(
        width_m: f64,
        depth_m: f64,
        cell_side_m: f64,
        centre_point_m: Vector3<f64>,
    ) -> Result<Self, GridError> {
        if !(cell_side_m > 0.0) || cell_side_m > width_m || cell_side_m > depth_m {
            return Err(GridError::InvalidCellSide(cell_side_m, width_m, depth_m));
        }

        let cells_wide = (width_m / cell_side_m).floor() as usize;
        let cells_deep = (depth_m / cell_side_m).floor() as usize;

        let mut grid = Self {
            width_m,
            depth_m,
            cell_side_m,
            cells_wide,
            cells_deep,
            centre_point_m,
            values: Array2::zeros((cells_wide, cells_deep)),
            cell_positions_m: Vec::with_capacity(cells_wide * cells_deep),
        };

        // Precompute the world position of every cell centre, anchored on
        // the centre cell
        let centre = grid.centre_cell();
        let mut z = centre_point_m.z - cell_side_m * centre.z as f64;
        for _ in 0..cells_deep {
            let mut x = centre_point_m.x - cell_side_m * centre.x as f64;
            for _ in 0..cells_wide {
                grid.cell_positions_m.push(Vector3::new(x, 0.0, z));
                x += cell_side_m;
            }
            z += cell_side_m;
        }

        Ok(grid)
    }

    pub fn cells_wide(&self) -> usize {
        self.cells_wide
    }

    pub fn cells_deep(&self) -> usize {
        self.cells_deep
    }

    pub fn num_cells(&self) -> usize {
        self.cells_wide * self.cells_deep
    }

    pub fn cell_side_m(&self) -> f64 {
        self.cell_side_m
    }

    pub fn width_m(&self) -> f64 {
        self.width_m
    }

    pub fn depth_m(&self) -> f64 {
        self.depth_m
    }

    pub fn centre_point_m(&self) -> Vector3<f64> {
        self.centre_point_m
    }

    /// The cell the grid is anchored on.
    pub fn centre_cell(&self) -> CellIndex {
        CellIndex {
            x: ((self.cells_wide as f64 * 0.5).round() as usize).min(self.cells_wide - 1),
            z: ((self.cells_deep as f64 * 0.5).round() as usize).min(self.cells_deep - 1),
        }
    }

    /// Map a world position to the containing cell, rounding to the nearest
    /// cell centre and clamping into the grid.
    ///
    /// Rounding (rather than flooring) minimises bias either side of a cell
    /// centre.
    pub fn position_to_cell(&self, position: &Vector3<f64>) -> CellIndex {
        let centre = self.centre_cell();

        let xi = ((position.x - self.centre_point_m.x) / self.cell_side_m + 0.5).floor() as i64
            + centre.x as i64;
        let zi = ((position.z - self.centre_point_m.z) / self.cell_side_m + 0.5).floor() as i64
            + centre.z as i64;

        CellIndex {
            x: xi.max(0).min(self.cells_wide as i64 - 1) as usize,
            z: zi.max(0).min(self.cells_deep as i64 - 1) as usize,
        }
    }

    /// Map a world position to fractional cell indices.
    ///
    /// The same mapping as [`OccGrid::position_to_cell`] without the
    /// rounding, clamped to `[-0.5, cells - 1 + 0.5]`.
    pub fn position_to_fractional_indices(&self, position: &Vector3<f64>) -> FractionalCellIndex {
        let centre = self.centre_cell();

        let xf = (position.x - self.centre_point_m.x) / self.cell_side_m + centre.x as f64;
        let zf = (position.z - self.centre_point_m.z) / self.cell_side_m + centre.z as f64;

        FractionalCellIndex {
            x: xf.max(-0.5).min(self.cells_wide as f64 - 0.5),
            z: zf.max(-0.5).min(self.cells_deep as f64 - 0.5),
        }
    }

    /// World position of the given cell's centre. The vertical component is
    /// always zero.
    pub fn cell_to_position(&self, cell: CellIndex) -> Vector3<f64> {
        self.cell_positions_m[self.linear_index(cell)]
    }

    /// Read a cell's value. Out-of-range indices clamp to the nearest edge
    /// cell.
    pub fn at(&self, cell: CellIndex) -> f32 {
        let x = cell.x.min(self.cells_wide - 1);
        let z = cell.z.min(self.cells_deep - 1);
        self.values[[x, z]]
    }

    /// Write a cell's value. Out-of-range indices clamp to the nearest edge
    /// cell.
    pub fn set(&mut self, cell: CellIndex, value: f32) {
        let x = cell.x.min(self.cells_wide - 1);
        let z = cell.z.min(self.cells_deep - 1);
        self.values[[x, z]] = value;
    }

    /// Fold a batch of 3D surface samples into the accumulator.
    ///
    /// Every existing cell is first multiplied by `decay_weight` (in [0, 1])
    /// so stale observations are exponentially forgotten, then each sample
    /// whose height lies within `height_range_m` is projected onto the XZ
    /// plane and its cell incremented by `incoming_weight`.
    pub fn accumulate(
        &mut self,
        samples: &[Vector3<f64>],
        height_range_m: (f64, f64),
        incoming_weight: f32,
        decay_weight: f32,
    ) {
        // Decay existing observations
        self.values.mapv_inplace(|v| v * decay_weight);

        // Accumulate the incoming batch. This is deliberately serial:
        // samples landing in the same cell are read-modify-write and must
        // not race.
        for sample in samples {
            if sample.y < height_range_m.0 || sample.y > height_range_m.1 {
                continue;
            }

            let cell = self.position_to_cell(sample);
            let current = self.at(cell);
            self.set(cell, current + incoming_weight);
        }
    }

    /// Raise cells to occupied where the accumulator meets the threshold.
    ///
    /// Cells already occupied are left alone. This step only ever raises,
    /// so occupancy learned from earlier cycles is not erased by a sparse
    /// new batch.
    pub fn threshold_from(&mut self, counts: &OccGrid, threshold: f32) -> Result<(), GridError> {
        if counts.num_cells() != self.num_cells() {
            return Err(GridError::ShapeMismatch {
                expected: self.num_cells(),
                actual: counts.num_cells(),
            });
        }

        for z in 0..self.cells_deep {
            for x in 0..self.cells_wide {
                if counts.values[[x, z]] >= threshold {
                    self.values[[x, z]] = 1.0;
                }
            }
        }

        Ok(())
    }

    /// Replace every cell value from a linear (`z * cells_wide + x`) array.
    pub fn set_from_array(&mut self, values: &[f32]) -> Result<(), GridError> {
        if values.len() != self.num_cells() {
            return Err(GridError::ShapeMismatch {
                expected: self.num_cells(),
                actual: values.len(),
            });
        }

        for z in 0..self.cells_deep {
            for x in 0..self.cells_wide {
                self.values[[x, z]] = values[z * self.cells_wide + x];
            }
        }

        Ok(())
    }

    /// Cell values as a linear (`z * cells_wide + x`) vector.
    pub fn to_linear_vec(&self) -> Vec<f32> {
        let mut out = Vec::with_capacity(self.num_cells());
        for z in 0..self.cells_deep {
            for x in 0..self.cells_wide {
                out.push(self.values[[x, z]]);
            }
        }
        out
    }

    /// Take a serialisable snapshot of this grid.
    pub fn snapshot(&self, vehicle_position_m: &Vector3<f64>) -> GridSnapshot {
        let vehicle_cell = self.position_to_cell(vehicle_position_m);

        GridSnapshot {
            cells_wide: self.cells_wide,
            cells_deep: self.cells_deep,
            cell_side_m: self.cell_side_m,
            centre_point_m: [
                self.centre_point_m.x,
                self.centre_point_m.y,
                self.centre_point_m.z,
            ],
            occupancy: self.to_linear_vec(),
            vehicle_cell: [vehicle_cell.x, vehicle_cell.z],
        }
    }

    /// Test whether the straight line between two world positions crosses
    /// any occupied cell, by Amanatides-Woo traversal of the cells under
    /// the line.
    pub fn line_unobstructed(&self, from: &Vector3<f64>, to: &Vector3<f64>) -> bool {
        let from_f = self.position_to_fractional_indices(from);
        let to_f = self.position_to_fractional_indices(to);

        // Ray u + v*t in fractional index space
        let (ux, uz) = (from_f.x, from_f.z);
        let vx = to_f.x - ux;
        let vz = to_f.z - uz;

        // Integral start and end cells
        let mut x = (ux + 0.5).floor() as i64;
        let mut z = (uz + 0.5).floor() as i64;
        let x_end = (to_f.x + 0.5).floor() as i64;
        let z_end = (to_f.z + 0.5).floor() as i64;

        let step_x: i64 = if vx > 0.0 {
            1
        } else if vx < 0.0 {
            -1
        } else {
            0
        };
        let step_z: i64 = if vz > 0.0 {
            1
        } else if vz < 0.0 {
            -1
        } else {
            0
        };

        // t at which the ray crosses the first cell boundary on each axis,
        // and the t increment per whole cell. Axis-aligned rays never cross
        // on the other axis.
        let mut t_max_x = if step_x != 0 {
            ((x as f64 + 0.5 * step_x as f64) - ux) / vx
        } else {
            f64::INFINITY
        };
        let mut t_max_z = if step_z != 0 {
            ((z as f64 + 0.5 * step_z as f64) - uz) / vz
        } else {
            f64::INFINITY
        };
        let t_delta_x = if step_x != 0 {
            step_x as f64 / vx
        } else {
            f64::INFINITY
        };
        let t_delta_z = if step_z != 0 {
            step_z as f64 / vz
        } else {
            f64::INFINITY
        };

        // Bounded traversal; the bound only matters if floating point error
        // ever walks the ray past its end cell
        let max_steps = 2 * (self.cells_wide + self.cells_deep) + 2;

        for _ in 0..max_steps {
            if self.at_raw(x, z) != 0.0 {
                return false;
            }

            if x == x_end && z == z_end {
                break;
            }

            if t_max_x < t_max_z {
                if x == x_end {
                    // Exhausted this axis, step the other to reach the end
                    z += step_z;
                    t_max_z += t_delta_z;
                } else {
                    x += step_x;
                    t_max_x += t_delta_x;
                }
            } else {
                if z == z_end {
                    x += step_x;
                    t_max_x += t_delta_x;
                } else {
                    z += step_z;
                    t_max_z += t_delta_z;
                }
            }
        }

        true
    }

    fn linear_index(&self, cell: CellIndex) -> usize {
        let x = cell.x.min(self.cells_wide - 1);
        let z = cell.z.min(self.cells_deep - 1);
        z * self.cells_wide + x
    }

    fn at_raw(&self, x: i64, z: i64) -> f32 {
        let x = x.max(0).min(self.cells_wide as i64 - 1) as usize;
        let z = z.max(0).min(self.cells_deep as i64 - 1) as usize;
        self.values[[x, z]]
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;

    fn test_grid() -> OccGrid {
        OccGrid::new(4.0, 4.0, 0.5, Vector3::zeros()).unwrap()
    }

    #[test]
    fn test_new_dimensions() {
        let grid = test_grid();
        assert_eq!(grid.cells_wide(), 8);
        assert_eq!(grid.cells_deep(), 8);
        assert_eq!(grid.num_cells(), 64);

        // The centre cell sits exactly on the centre point
        let centre = grid.centre_cell();
        assert_eq!(centre, CellIndex::new(4, 4));
        let pos = grid.cell_to_position(centre);
        assert!(pos.norm() < 1e-9);
    }

    #[test]
    fn test_invalid_cell_side() {
        assert!(OccGrid::new(4.0, 4.0, 0.0, Vector3::zeros()).is_err());
        assert!(OccGrid::new(4.0, 4.0, 5.0, Vector3::zeros()).is_err());
    }

    #[test]
    fn test_single_cell_grid() {
        let grid = OccGrid::new(1.0, 1.0, 1.0, Vector3::zeros()).unwrap();
        assert_eq!(grid.num_cells(), 1);
        assert_eq!(grid.centre_cell(), CellIndex::new(0, 0));
        assert_eq!(
            grid.position_to_cell(&Vector3::new(10.0, 0.0, -10.0)),
            CellIndex::new(0, 0)
        );
    }

    #[test]
    fn test_indexing_round_trip() {
        let grid = test_grid();

        // For positions within the grid, cell_to_position(position_to_cell)
        // lands within one cell side
        for &(x, z) in &[(0.0, 0.0), (1.2, -0.7), (-1.9, 1.9), (0.26, 0.24)] {
            let pos = Vector3::new(x, 0.0, z);
            let cell = grid.position_to_cell(&pos);
            let back = grid.cell_to_position(cell);
            assert!(
                (back - pos).norm() <= grid.cell_side_m(),
                "round trip failed for ({}, {})",
                x,
                z
            );
        }
    }

    #[test]
    fn test_clamping_invariant() {
        let grid = test_grid();

        for &(x, z) in &[
            (1e6, 1e6),
            (-1e6, -1e6),
            (1e6, -1e6),
            (0.0, 1e6),
            (-1e6, 0.0),
        ] {
            let cell = grid.position_to_cell(&Vector3::new(x, 0.0, z));
            assert!(cell.x < grid.cells_wide());
            assert!(cell.z < grid.cells_deep());
        }
    }

    #[test]
    fn test_fractional_clamp() {
        let grid = test_grid();

        let f = grid.position_to_fractional_indices(&Vector3::new(1e6, 0.0, -1e6));
        assert_eq!(f.x, grid.cells_wide() as f64 - 0.5);
        assert_eq!(f.z, -0.5);

        // In range positions are not clamped
        let f = grid.position_to_fractional_indices(&Vector3::new(0.25, 0.0, 0.0));
        assert!((f.x - 4.5).abs() < 1e-9);
        assert!((f.z - 4.0).abs() < 1e-9);
    }

    #[test]
    fn test_accumulate_decay_and_height_band() {
        let mut grid = test_grid();

        let in_band = Vector3::new(0.0, 0.5, 0.0);
        let too_low = Vector3::new(0.0, -0.5, 0.0);
        let too_high = Vector3::new(0.0, 3.0, 0.0);

        grid.accumulate(&[in_band, too_low, too_high], (0.0, 1.0), 1.0, 1.0);

        let cell = grid.position_to_cell(&in_band);
        assert_eq!(grid.at(cell), 1.0);

        // A second cycle with no samples decays the count
        grid.accumulate(&[], (0.0, 1.0), 1.0, 0.5);
        assert_eq!(grid.at(cell), 0.5);

        // Repeated samples in one batch accumulate
        grid.accumulate(&[in_band, in_band], (0.0, 1.0), 1.0, 1.0);
        assert_eq!(grid.at(cell), 2.5);
    }

    #[test]
    fn test_threshold_raises_only() {
        let mut counts = test_grid();
        let mut occupancy = test_grid();

        let cell_a = CellIndex::new(1, 1);
        let cell_b = CellIndex::new(2, 2);

        counts.set(cell_a, 5.0);
        occupancy.set(cell_b, 1.0);

        occupancy.threshold_from(&counts, 3.0).unwrap();

        // Cell above threshold is raised
        assert_eq!(occupancy.at(cell_a), 1.0);
        // Already occupied cell is untouched even though its count is zero
        assert_eq!(occupancy.at(cell_b), 1.0);
    }

    #[test]
    fn test_set_from_array() {
        let mut grid = test_grid();

        let mut values = vec![0.0f32; grid.num_cells()];
        // Linear order is z * cells_wide + x
        values[3 * 8 + 5] = 1.0;
        grid.set_from_array(&values).unwrap();

        assert_eq!(grid.at(CellIndex::new(5, 3)), 1.0);

        assert!(grid.set_from_array(&[0.0; 3]).is_err());
    }

    #[test]
    fn test_line_unobstructed() {
        let mut grid = test_grid();

        let a = Vector3::new(-1.5, 0.0, 0.0);
        let b = Vector3::new(1.5, 0.0, 0.0);
        let c = Vector3::new(1.5, 0.0, 1.5);

        // Clear grid: everything unobstructed
        assert!(grid.line_unobstructed(&a, &b));
        assert!(grid.line_unobstructed(&a, &c));

        // Occupy the cell at the origin: the axis-aligned line a-b crosses
        // it, the diagonal a-c doesn't
        let origin = grid.position_to_cell(&Vector3::zeros());
        grid.set(origin, 1.0);
        assert!(!grid.line_unobstructed(&a, &b));
        assert!(grid.line_unobstructed(&a, &c));

        // Degenerate zero-length line on a clear cell
        assert!(grid.line_unobstructed(&c, &c));
    }
}
