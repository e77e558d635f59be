//! Strategies for generating meshes and partitions in property tests.
use crate::mesh::{CellPartition, StructuredQuadMesh};
use crate::point::Coordinates;
use ::proptest::collection::vec;
use ::proptest::prelude::*;

/// Structured meshes of moderate size over rectangles with arbitrary placement and extents.
pub fn structured_mesh(max_cells_per_dim: usize) -> impl Strategy<Value = StructuredQuadMesh<f64>> {
    let cells = 1..=max_cells_per_dim;
    // Keep coordinates small so that integrated quantities stay well conditioned
    let corner = [-10.0..10.0, -10.0..10.0];
    let extents = [0.1..5.0, 0.1..5.0];
    (cells.clone(), cells, corner, extents).prop_map(|(nx, ny, [x0, y0], [w, h])| {
        let lower = Coordinates::new_2d(x0, y0);
        let upper = Coordinates::new_2d(x0 + w, y0 + h);
        StructuredQuadMesh::rectangle(&lower, &upper, nx, ny).expect("Rectangle is valid by construction")
    })
}

/// Arbitrary assignments of `n_cells` cells to at most `max_ranks` ranks.
///
/// Ranks may end up without cells.
pub fn cell_partition(n_cells: usize, max_ranks: usize) -> impl Strategy<Value = CellPartition> {
    (1..=max_ranks).prop_flat_map(move |n_ranks| {
        vec(0..n_ranks, n_cells).prop_map(move |owners| {
            CellPartition::from_owners(owners, n_ranks).expect("Owners are in range by construction")
        })
    })
}

/// A structured mesh together with a partition of its cells.
pub fn partitioned_mesh(
    max_cells_per_dim: usize,
    max_ranks: usize,
) -> impl Strategy<Value = (StructuredQuadMesh<f64>, CellPartition)> {
    structured_mesh(max_cells_per_dim).prop_flat_map(move |mesh| {
        let n_cells = mesh.num_cells();
        (Just(mesh), cell_partition(n_cells, max_ranks))
    })
}
