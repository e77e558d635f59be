use crate::error::ConfigError;
use crate::mesh::{CellId, FaceKind, MeshView, Ownership, StructuredQuadMesh};
use crate::Real;
use log::warn;
use nalgebra::Point2;

/// Assignment of every cell of a mesh to an owning rank.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CellPartition {
    owners: Vec<usize>,
    n_ranks: usize,
}

impl CellPartition {
    /// Splits `n_cells` cells into `n_ranks` contiguous chunks of nearly equal size.
    pub fn contiguous(n_cells: usize, n_ranks: usize) -> Result<Self, ConfigError> {
        if n_ranks == 0 {
            return Err(ConfigError::InvalidRank { rank: 0, size: 0 });
        }
        let owners = (0..n_cells).map(|cell| cell * n_ranks / n_cells).collect();
        Ok(Self { owners, n_ranks })
    }

    /// Creates a partition from an explicit owner per cell.
    pub fn from_owners(owners: Vec<usize>, n_ranks: usize) -> Result<Self, ConfigError> {
        if let Some(&rank) = owners.iter().find(|&&rank| rank >= n_ranks) {
            return Err(ConfigError::InvalidRank { rank, size: n_ranks });
        }
        Ok(Self { owners, n_ranks })
    }

    pub fn n_ranks(&self) -> usize {
        self.n_ranks
    }

    pub fn n_cells(&self) -> usize {
        self.owners.len()
    }

    /// # Panics
    ///
    /// Panics if the cell is not part of the partition.
    pub fn owner(&self, cell: CellId) -> usize {
        self.owners[cell.0]
    }

    pub fn owners(&self) -> &[usize] {
        &self.owners
    }

    /// The cells owned by `rank`, in ascending order.
    pub fn owned_cells(&self, rank: usize) -> Vec<CellId> {
        self.owners
            .iter()
            .enumerate()
            .filter(|(_, &owner)| owner == rank)
            .map(|(cell, _)| CellId(cell))
            .collect()
    }
}

/// The part of a structured mesh seen by a single rank.
///
/// The rank knows its own cells and the ghost layer around them, which consists of all
/// face neighbors of owned cells that are owned by other ranks. Every other cell is
/// artificial.
#[derive(Debug, Clone)]
pub struct DistributedQuadMesh<'a, T: Real> {
    mesh: &'a StructuredQuadMesh<T>,
    rank: usize,
    owned_cells: Vec<CellId>,
    ownership: Vec<Ownership>,
}

impl<'a, T: Real> DistributedQuadMesh<'a, T> {
    pub fn new(
        mesh: &'a StructuredQuadMesh<T>,
        partition: &CellPartition,
        rank: usize,
    ) -> Result<Self, ConfigError> {
        if partition.n_cells() != mesh.num_cells() {
            return Err(ConfigError::PartitionSize {
                owners: partition.n_cells(),
                cells: mesh.num_cells(),
            });
        }
        if rank >= partition.n_ranks() {
            return Err(ConfigError::InvalidRank {
                rank,
                size: partition.n_ranks(),
            });
        }

        let owned_cells = partition.owned_cells(rank);
        let mut ownership = vec![Ownership::Artificial; mesh.num_cells()];
        for &cell in &owned_cells {
            ownership[cell.0] = Ownership::LocallyOwned;
        }
        for &cell in &owned_cells {
            for neighbor in mesh.face_neighbors(cell) {
                let owner = partition.owner(neighbor);
                if owner != rank {
                    ownership[neighbor.0] = Ownership::Ghost { owner };
                }
            }
        }

        if owned_cells.is_empty() {
            warn!("Rank {} owns no cells of the mesh", rank);
        }

        Ok(Self {
            mesh,
            rank,
            owned_cells,
            ownership,
        })
    }

    /// The global mesh this view is part of.
    pub fn global_mesh(&self) -> &StructuredQuadMesh<T> {
        self.mesh
    }

    pub fn ghost_cells(&self) -> impl Iterator<Item = CellId> + '_ {
        self.ownership
            .iter()
            .enumerate()
            .filter(|(_, ownership)| matches!(ownership, Ownership::Ghost { .. }))
            .map(|(cell, _)| CellId(cell))
    }
}

impl<'a, T: Real> MeshView<T> for DistributedQuadMesh<'a, T> {
    fn rank(&self) -> usize {
        self.rank
    }

    fn locally_owned_cells(&self) -> &[CellId] {
        &self.owned_cells
    }

    fn ownership(&self, cell: CellId) -> Ownership {
        self.ownership
            .get(cell.0)
            .copied()
            .unwrap_or(Ownership::Artificial)
    }

    fn num_faces(&self, _cell: CellId) -> usize {
        4
    }

    fn face(&self, cell: CellId, local_face: usize) -> FaceKind {
        assert_ne!(
            self.ownership(cell),
            Ownership::Artificial,
            "Cell {} is artificial on rank {}",
            cell,
            self.rank
        );
        self.mesh.face_kind(cell, local_face)
    }

    fn cell_vertices(&self, cell: CellId) -> [Point2<T>; 4] {
        self.mesh.vertices_of(cell)
    }
}
