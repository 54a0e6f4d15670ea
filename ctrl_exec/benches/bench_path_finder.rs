//! Pathfinder benchmark over a large cluttered grid.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use ctrl_lib::nav::{find_path, CellIndex, OccGrid};
use nalgebra::Vector3;

/// Build a 200x200 cell grid with deterministically scattered obstacles,
/// keeping the start and goal corners clear.
fn cluttered_grid() -> OccGrid {
    let mut grid = OccGrid::new(20.0, 20.0, 0.1, Vector3::zeros()).unwrap();

    for z in 0..grid.cells_deep() {
        for x in 0..grid.cells_wide() {
            if (x * 7 + z * 13) % 29 == 0 {
                grid.set(CellIndex::new(x, z), 1.0);
            }
        }
    }

    // Clear generous margins around the endpoints
    for z in 0..20 {
        for x in 0..20 {
            grid.set(CellIndex::new(x, z), 0.0);
            grid.set(
                CellIndex::new(grid.cells_wide() - 1 - x, grid.cells_deep() - 1 - z),
                0.0,
            );
        }
    }

    grid
}

fn bench_find_path(c: &mut Criterion) {
    let grid = cluttered_grid();

    let from = Vector3::new(-9.5, 0.0, -9.5);
    let to = Vector3::new(9.5, 0.0, 9.5);

    c.bench_function("find_path 200x200 cluttered", |b| {
        b.iter(|| find_path(black_box(&grid), &from, &to, 0.05))
    });
}

criterion_group!(benches, bench_find_path);
criterion_main!(benches);
