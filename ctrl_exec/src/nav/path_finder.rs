//! # Grid pathfinder
//!
//! Breadth-first search over the binary occupancy grid, run from the
//! destination back to the source so the recorded predecessor chain, once
//! walked from the source, already points toward the destination. A cell is
//! only traversable if the whole robot footprint centred on it is clear,
//! which inflates obstacles by the vehicle's physical size.
//!
//! BFS gives shortest paths in grid-step count. Among equal-length paths the
//! first-discovered one wins; that tie-break is deterministic for a fixed
//! grid but not geometrically meaningful, so routes through symmetric
//! obstacle fields can look arbitrary.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use std::collections::{HashMap, VecDeque};

use log::error;
use nalgebra::Vector3;

use super::occ_grid::{CellIndex, OccGrid};

// ------------------------------------------------------------------------------------------------
// PUBLIC FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Find a path between two world positions over the grid.
///
/// The result runs from the cell containing `from` to the cell containing
/// `to` inclusive, compressed so only direction-change waypoints remain. An
/// empty vector means no path exists: the destination is occupied, or no
/// chain of footprint-safe cells connects the two. Pathfinding failures are
/// results, not errors, and the caller decides whether to rescan or abort.
pub fn find_path(
    grid: &OccGrid,
    from: &Vector3<f64>,
    to: &Vector3<f64>,
    robot_radius_m: f64,
) -> Vec<CellIndex> {
    let src = grid.position_to_cell(from);
    let dest = grid.position_to_cell(to);

    // Destination occupied: no path
    if grid.at(dest) != 0.0 {
        return Vec::new();
    }

    // Already there
    if dest == src {
        return vec![src];
    }

    let half = footprint_half_cells(grid, robot_radius_m);

    // BFS from the destination, recording each cell's predecessor the first
    // time it is discovered
    let mut transitions: HashMap<CellIndex, CellIndex> = HashMap::new();
    let mut frontier: VecDeque<CellIndex> = VecDeque::new();

    frontier.push_back(dest);
    transitions.insert(dest, dest);

    let mut found = false;

    'search: while let Some(cell) = frontier.pop_front() {
        for neighbour in safe_neighbours(grid, cell, half) {
            if transitions.contains_key(&neighbour) {
                continue;
            }

            transitions.insert(neighbour, cell);

            if neighbour == src {
                found = true;
                break 'search;
            }

            frontier.push_back(neighbour);
        }
    }

    if !found {
        return Vec::new();
    }

    // Walk the predecessor chain from the source; it leads to the
    // destination because the search ran the other way
    let mut chain = Vec::new();
    let mut step = src;
    loop {
        chain.push(step);

        if step == dest {
            break;
        }

        step = match transitions.get(&step) {
            Some(next) => *next,
            None => {
                // A broken chain means the bookkeeping above is wrong
                error!("Path reconstruction hit a cell with no predecessor");
                return Vec::new();
            }
        };
    }

    compress(chain)
}

/// Number of cells the robot's radius spans beyond its own cell.
///
/// Measured on the grid itself, from the centre cell, so the answer is
/// consistent with the grid's own position-to-cell rounding. The full
/// footprint side is `2 * half + 1`, always odd.
pub fn footprint_half_cells(grid: &OccGrid, robot_radius_m: f64) -> usize {
    let centre = grid.centre_cell();
    let centre_pos = grid.cell_to_position(centre);

    let edge = centre_pos + Vector3::new(robot_radius_m.abs(), 0.0, 0.0);
    let edge_cell = grid.position_to_cell(&edge);

    edge_cell.x.saturating_sub(centre.x)
}

// ------------------------------------------------------------------------------------------------
// PRIVATE FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// A cell is safe if every cell of the footprint block centred on it
/// (clamped to the grid edges) is unoccupied.
fn is_safe(grid: &OccGrid, cell: CellIndex, half: usize) -> bool {
    let x_min = cell.x.saturating_sub(half);
    let z_min = cell.z.saturating_sub(half);
    let x_max = (cell.x + half).min(grid.cells_wide() - 1);
    let z_max = (cell.z + half).min(grid.cells_deep() - 1);

    for z in z_min..=z_max {
        for x in x_min..=x_max {
            if grid.at(CellIndex::new(x, z)) != 0.0 {
                return false;
            }
        }
    }

    true
}

/// The 4-connected in-bounds neighbours of a cell which are safe to stand
/// on.
fn safe_neighbours(grid: &OccGrid, cell: CellIndex, half: usize) -> Vec<CellIndex> {
    let mut neighbours = Vec::with_capacity(4);

    if cell.x > 0 {
        neighbours.push(CellIndex::new(cell.x - 1, cell.z));
    }
    if cell.x < grid.cells_wide() - 1 {
        neighbours.push(CellIndex::new(cell.x + 1, cell.z));
    }
    if cell.z > 0 {
        neighbours.push(CellIndex::new(cell.x, cell.z - 1));
    }
    if cell.z < grid.cells_deep() - 1 {
        neighbours.push(CellIndex::new(cell.x, cell.z + 1));
    }

    neighbours.retain(|&n| is_safe(grid, n, half));
    neighbours
}

/// Collapse straight runs, keeping endpoints and the cells where the travel
/// direction changes.
fn compress(chain: Vec<CellIndex>) -> Vec<CellIndex> {
    if chain.len() <= 2 {
        return chain;
    }

    let mut out = vec![chain[0]];

    for i in 1..chain.len() - 1 {
        let before = step_delta(chain[i - 1], chain[i]);
        let after = step_delta(chain[i], chain[i + 1]);

        if before != after {
            out.push(chain[i]);
        }
    }

    out.push(chain[chain.len() - 1]);
    out
}

fn step_delta(a: CellIndex, b: CellIndex) -> (i64, i64) {
    (b.x as i64 - a.x as i64, b.z as i64 - a.z as i64)
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;

    /// 8x8 cell grid with 0.5 m cells centred on the origin.
    fn empty_grid() -> OccGrid {
        OccGrid::new(4.0, 4.0, 0.5, Vector3::zeros()).unwrap()
    }

    /// Grid fully occupied except the given cells.
    fn corridor_grid(clear: &[(usize, usize)]) -> OccGrid {
        let mut grid = empty_grid();
        for z in 0..grid.cells_deep() {
            for x in 0..grid.cells_wide() {
                grid.set(CellIndex::new(x, z), 1.0);
            }
        }
        for &(x, z) in clear {
            grid.set(CellIndex::new(x, z), 0.0);
        }
        grid
    }

    #[test]
    fn test_occupied_destination_has_no_path() {
        let mut grid = empty_grid();

        let to = Vector3::new(1.5, 0.0, 1.5);
        grid.set(grid.position_to_cell(&to), 1.0);

        assert!(find_path(&grid, &Vector3::zeros(), &to, 0.0).is_empty());
    }

    #[test]
    fn test_same_cell_is_trivial_path() {
        let grid = empty_grid();

        let pos = Vector3::new(0.1, 0.0, 0.1);
        let path = find_path(&grid, &pos, &pos, 0.0);

        assert_eq!(path, vec![grid.position_to_cell(&pos)]);
    }

    #[test]
    fn test_enclosed_destination_has_no_path() {
        let mut grid = empty_grid();

        // Destination cell left clear but ringed by obstacles
        let dest = CellIndex::new(5, 5);
        for &(dx, dz) in &[
            (-1, -1),
            (-1, 0),
            (-1, 1),
            (0, -1),
            (0, 1),
            (1, -1),
            (1, 0),
            (1, 1),
        ] {
            grid.set(
                CellIndex::new(
                    (dest.x as i64 + dx) as usize,
                    (dest.z as i64 + dz) as usize,
                ),
                1.0,
            );
        }

        let to = grid.cell_to_position(dest);
        assert!(find_path(&grid, &Vector3::new(-1.5, 0.0, -1.5), &to, 0.0).is_empty());
    }

    #[test]
    fn test_l_corridor_compresses_to_corner() {
        // Corridor along row z=2 then up column x=6
        let mut clear = Vec::new();
        for x in 2..=6 {
            clear.push((x, 2));
        }
        for z in 2..=6 {
            clear.push((6, z));
        }
        let grid = corridor_grid(&clear);

        let from = grid.cell_to_position(CellIndex::new(2, 2));
        let to = grid.cell_to_position(CellIndex::new(6, 6));

        let path = find_path(&grid, &from, &to, 0.0);

        // Exactly the two endpoints and the corner survive compression
        assert_eq!(
            path,
            vec![
                CellIndex::new(2, 2),
                CellIndex::new(6, 2),
                CellIndex::new(6, 6)
            ]
        );
    }

    #[test]
    fn test_straight_run_keeps_endpoints_only() {
        let grid = empty_grid();

        let from = grid.cell_to_position(CellIndex::new(1, 4));
        let to = grid.cell_to_position(CellIndex::new(6, 4));

        let path = find_path(&grid, &from, &to, 0.0);
        assert_eq!(path, vec![CellIndex::new(1, 4), CellIndex::new(6, 4)]);
    }

    #[test]
    fn test_footprint_blocks_narrow_corridor() {
        // A one-cell-wide corridor across the middle of the grid
        let mut clear = Vec::new();
        for x in 0..8 {
            clear.push((x, 4));
        }
        let grid = corridor_grid(&clear);

        let from = grid.cell_to_position(CellIndex::new(1, 4));
        let to = grid.cell_to_position(CellIndex::new(6, 4));

        // A point robot fits
        assert!(!find_path(&grid, &from, &to, 0.0).is_empty());

        // A robot needing a 3-cell footprint does not
        assert_eq!(footprint_half_cells(&grid, 0.5), 1);
        assert!(find_path(&grid, &from, &to, 0.5).is_empty());
    }

    #[test]
    fn test_footprint_fits_wide_corridor() {
        // A three-cell-wide corridor
        let mut clear = Vec::new();
        for x in 0..8 {
            for z in 3..=5 {
                clear.push((x, z));
            }
        }
        let grid = corridor_grid(&clear);

        let from = grid.cell_to_position(CellIndex::new(1, 4));
        let to = grid.cell_to_position(CellIndex::new(6, 4));

        let path = find_path(&grid, &from, &to, 0.5);
        assert_eq!(path, vec![CellIndex::new(1, 4), CellIndex::new(6, 4)]);
    }

    #[test]
    fn test_single_cell_grid() {
        let grid = OccGrid::new(1.0, 1.0, 1.0, Vector3::zeros()).unwrap();

        let path = find_path(&grid, &Vector3::zeros(), &Vector3::new(5.0, 0.0, 5.0), 0.0);
        assert_eq!(path, vec![CellIndex::new(0, 0)]);
    }
}
