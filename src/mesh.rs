//! Mesh topology as seen by the assembly loop.
//!
//! The loop only needs a narrow view of a mesh, described by [`MeshView`]: the cells owned by
//! the current rank, and for each face of such a cell either its boundary marker or the
//! neighbor on the other side together with the ownership of that neighbor.
use crate::Real;
use nalgebra::Point2;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fmt::{Display, Formatter};

mod distributed;
mod structured;

pub use distributed::*;
pub use structured::*;

/// A global, stable handle to a cell.
///
/// Cell handles are totally ordered. The order is used to decide from which side an interior
/// face is assembled.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CellId(pub usize);

impl CellId {
    pub fn index(&self) -> usize {
        self.0
    }
}

impl Display for CellId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// The relation between a cell and the current rank.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Ownership {
    LocallyOwned,
    /// The cell is owned by another rank, but is adjacent to a locally owned cell.
    Ghost { owner: usize },
    /// The rank has no information about the cell.
    Artificial,
}

/// How a neighbor traverses a shared face relative to the cell we are looking from.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FaceOrientation {
    /// Both cells parametrize the face in the same direction.
    Standard,
    /// The neighbor parametrizes the face in the opposite direction.
    Reversed,
}

/// A face of a cell.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum FaceKind {
    /// The face lies on the domain boundary.
    Boundary { marker: u32 },
    /// The face is shared with `neighbor`, where it has the local index `neighbor_face`.
    Interior {
        neighbor: CellId,
        neighbor_face: usize,
        orientation: FaceOrientation,
    },
}

/// The view of a (possibly distributed) planar mesh of quadrilaterals from a single rank.
pub trait MeshView<T: Real> {
    /// The rank this view belongs to.
    fn rank(&self) -> usize;

    /// The cells owned by this rank, in ascending order.
    fn locally_owned_cells(&self) -> &[CellId];

    fn ownership(&self, cell: CellId) -> Ownership;

    fn is_locally_owned(&self, cell: CellId) -> bool {
        self.ownership(cell) == Ownership::LocallyOwned
    }

    fn num_faces(&self, cell: CellId) -> usize;

    /// Returns the face with local index `local_face` of the given cell.
    ///
    /// # Panics
    ///
    /// May panic if the cell is artificial or the face index is out of bounds.
    fn face(&self, cell: CellId, local_face: usize) -> FaceKind;

    /// The vertices of the cell in counter-clockwise order, starting at the vertex
    /// that corresponds to the reference corner `(-1, -1)`.
    fn cell_vertices(&self, cell: CellId) -> [Point2<T>; 4];
}

impl<T: Real, M: MeshView<T> + ?Sized> MeshView<T> for &M {
    fn rank(&self) -> usize {
        M::rank(self)
    }

    fn locally_owned_cells(&self) -> &[CellId] {
        M::locally_owned_cells(self)
    }

    fn ownership(&self, cell: CellId) -> Ownership {
        M::ownership(self, cell)
    }

    fn is_locally_owned(&self, cell: CellId) -> bool {
        M::is_locally_owned(self, cell)
    }

    fn num_faces(&self, cell: CellId) -> usize {
        M::num_faces(self, cell)
    }

    fn face(&self, cell: CellId, local_face: usize) -> FaceKind {
        M::face(self, cell, local_face)
    }

    fn cell_vertices(&self, cell: CellId) -> [Point2<T>; 4] {
        M::cell_vertices(self, cell)
    }
}
