use crate::dofs::{BlockRange, DofMap};
use crate::error::AssemblyError;
use crate::integration::FeValues;
use crate::mesh::{CellId, FaceOrientation};
use crate::Real;
use nalgebra::{DMatrix, DVector};

/// Identifies a quadrant of the local matrix of a face.
///
/// The first side names the cell whose degrees of freedom index the rows, the second side the
/// cell whose degrees of freedom index the columns.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum SidePair {
    OwnOwn,
    OwnNeighbor,
    NeighborOwn,
    NeighborNeighbor,
}

/// A dense local matrix coupling two blocks.
#[derive(Debug, Clone, PartialEq)]
pub struct LocalMatrix<T: Real> {
    pub row_block: usize,
    pub col_block: usize,
    /// Either [`SidePair::OwnOwn`] or [`SidePair::OwnNeighbor`]. The rows always belong to
    /// the cell of the [`LocalInfo`] that stores the matrix.
    pub sides: SidePair,
    pub matrix: DMatrix<T>,
}

/// A dense local vector for one block.
#[derive(Debug, Clone, PartialEq)]
pub struct LocalVector<T: Real> {
    pub block: usize,
    pub vector: DVector<T>,
}

/// What a [`LocalInfo`] currently describes.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum InfoKind {
    Cell,
    /// The face `face` of the cell lies on the boundary.
    Boundary { face: usize, marker: u32 },
    /// One side of an interior face.
    Face {
        face: usize,
        neighbor: CellId,
        neighbor_face: usize,
        orientation: FaceOrientation,
    },
}

/// Local data of one cell, or one side of a face, during a traversal step.
///
/// The record holds the global indices of the degrees of freedom of its cell, their
/// decomposition into blocks, the dense slots that local operators fill, and the
/// integration values for the current cell or face. Slots are zeroed whenever the record is
/// reinitialized, so nothing carries over from one step to the next.
#[derive(Debug, Clone)]
pub struct LocalInfo<T: Real> {
    cell: CellId,
    kind: InfoKind,
    indices: Vec<usize>,
    blocks: Vec<BlockRange>,
    neighbor_blocks: Vec<BlockRange>,
    with_matrices: bool,
    with_vectors: bool,
    with_neighbor_matrices: bool,
    matrices: Vec<LocalMatrix<T>>,
    vectors: Vec<LocalVector<T>>,
    values: FeValues<T>,
}

impl<T: Real> Default for LocalInfo<T> {
    fn default() -> Self {
        Self {
            cell: CellId(usize::MAX),
            kind: InfoKind::Cell,
            indices: Vec::new(),
            blocks: Vec::new(),
            neighbor_blocks: Vec::new(),
            with_matrices: false,
            with_vectors: false,
            with_neighbor_matrices: false,
            matrices: Vec::new(),
            vectors: Vec::new(),
            values: FeValues::default(),
        }
    }
}

impl<T: Real> LocalInfo<T> {
    /// Requests a matrix slot for every pair of blocks. With `face`, the record also receives
    /// slots coupling its own rows to the columns of the neighbor.
    pub fn initialize_matrices(&mut self, face: bool) {
        self.with_matrices = true;
        self.with_neighbor_matrices = face;
    }

    /// Requests a vector slot for every block.
    pub fn initialize_vectors(&mut self) {
        self.with_vectors = true;
    }

    pub fn cell(&self) -> CellId {
        self.cell
    }

    pub fn kind(&self) -> InfoKind {
        self.kind
    }

    /// The global indices of the degrees of freedom of the cell.
    pub fn indices(&self) -> &[usize] {
        &self.indices
    }

    pub fn blocks(&self) -> &[BlockRange] {
        &self.blocks
    }

    /// The block decomposition of the cell on the other side of the face, if any.
    pub fn neighbor_blocks(&self) -> &[BlockRange] {
        &self.neighbor_blocks
    }

    pub fn values(&self) -> &FeValues<T> {
        &self.values
    }

    pub(crate) fn values_mut(&mut self) -> &mut FeValues<T> {
        &mut self.values
    }

    pub fn n_matrices(&self) -> usize {
        self.matrices.len()
    }

    pub fn matrices(&self) -> &[LocalMatrix<T>] {
        &self.matrices
    }

    pub fn matrices_mut(&mut self) -> impl Iterator<Item = &mut LocalMatrix<T>> {
        self.matrices.iter_mut()
    }

    pub fn vectors(&self) -> &[LocalVector<T>] {
        &self.vectors
    }

    pub fn vectors_mut(&mut self) -> impl Iterator<Item = &mut LocalVector<T>> {
        self.vectors.iter_mut()
    }

    /// The matrix slot for the given blocks and sides.
    ///
    /// Only slots whose rows belong to this record exist here. Quadrants with neighbor rows
    /// are stored in the record of the neighbor, see [`face_matrix_mut`].
    pub fn matrix(&self, row_block: usize, col_block: usize, sides: SidePair) -> Option<&DMatrix<T>> {
        self.matrices
            .iter()
            .find(|m| m.row_block == row_block && m.col_block == col_block && m.sides == sides)
            .map(|m| &m.matrix)
    }

    pub fn matrix_mut(
        &mut self,
        row_block: usize,
        col_block: usize,
        sides: SidePair,
    ) -> Option<&mut DMatrix<T>> {
        self.matrices
            .iter_mut()
            .find(|m| m.row_block == row_block && m.col_block == col_block && m.sides == sides)
            .map(|m| &mut m.matrix)
    }

    pub fn vector(&self, block: usize) -> Option<&DVector<T>> {
        self.vectors.iter().find(|v| v.block == block).map(|v| &v.vector)
    }

    pub fn vector_mut(&mut self, block: usize) -> Option<&mut DVector<T>> {
        self.vectors
            .iter_mut()
            .find(|v| v.block == block)
            .map(|v| &mut v.vector)
    }

    /// The global indices of one block of the cell.
    pub fn block_indices(&self, block: usize) -> Result<&[usize], AssemblyError> {
        let range = self
            .blocks
            .iter()
            .find(|range| range.block == block)
            .ok_or(AssemblyError::LocalIndexOutOfRange {
                index: block,
                size: self.blocks.len(),
            })?;
        if range.end() > self.indices.len() {
            return Err(AssemblyError::LocalIndexOutOfRange {
                index: range.end() - 1,
                size: self.indices.len(),
            });
        }
        Ok(&self.indices[range.range()])
    }

    /// Prepares the record for the interior of a cell or a boundary face.
    pub(crate) fn reinit<D: DofMap>(&mut self, cell: CellId, kind: InfoKind, dofs: &D) {
        self.cell = cell;
        self.kind = kind;
        self.indices.resize(dofs.cell_dof_count(cell), usize::MAX);
        dofs.populate_global_indices(cell, &mut self.indices);
        dofs.populate_block_ranges(cell, &mut self.blocks);
        self.neighbor_blocks.clear();
        self.rebuild_slots();
    }

    /// Prepares the record for one side of an interior face.
    pub(crate) fn reinit_face<D: DofMap>(
        &mut self,
        cell: CellId,
        kind: InfoKind,
        dofs: &D,
        neighbor: CellId,
    ) {
        self.cell = cell;
        self.kind = kind;
        self.indices.resize(dofs.cell_dof_count(cell), usize::MAX);
        dofs.populate_global_indices(cell, &mut self.indices);
        dofs.populate_block_ranges(cell, &mut self.blocks);
        dofs.populate_block_ranges(neighbor, &mut self.neighbor_blocks);
        self.rebuild_slots();
    }

    fn rebuild_slots(&mut self) {
        let mut n_matrices = 0;
        if self.with_matrices {
            let with_neighbor = self.with_neighbor_matrices && matches!(self.kind, InfoKind::Face { .. });
            for row in 0..self.blocks.len() {
                for col in 0..self.blocks.len() {
                    let (row_block, row_len) = (self.blocks[row].block, self.blocks[row].len);
                    let col_block = self.blocks[col].block;
                    let own_cols = self.blocks[col].len;
                    let shape = (row_len, own_cols);
                    self.set_matrix_slot(n_matrices, row_block, col_block, SidePair::OwnOwn, shape);
                    n_matrices += 1;
                    if with_neighbor {
                        let neighbor_cols = self
                            .neighbor_blocks
                            .iter()
                            .find(|range| range.block == col_block)
                            .map(|range| range.len)
                            .unwrap_or(0);
                        self.set_matrix_slot(
                            n_matrices,
                            row_block,
                            col_block,
                            SidePair::OwnNeighbor,
                            (row_len, neighbor_cols),
                        );
                        n_matrices += 1;
                    }
                }
            }
        }
        self.matrices.truncate(n_matrices);

        let mut n_vectors = 0;
        if self.with_vectors {
            for range in &self.blocks {
                if let Some(slot) = self.vectors.get_mut(n_vectors) {
                    slot.block = range.block;
                    slot.vector.resize_vertically_mut(range.len, T::zero());
                    slot.vector.fill(T::zero());
                } else {
                    self.vectors.push(LocalVector {
                        block: range.block,
                        vector: DVector::zeros(range.len),
                    });
                }
                n_vectors += 1;
            }
        }
        self.vectors.truncate(n_vectors);
    }

    fn set_matrix_slot(
        &mut self,
        k: usize,
        row_block: usize,
        col_block: usize,
        sides: SidePair,
        shape: (usize, usize),
    ) {
        if let Some(slot) = self.matrices.get_mut(k) {
            slot.row_block = row_block;
            slot.col_block = col_block;
            slot.sides = sides;
            if slot.matrix.shape() != shape {
                slot.matrix = DMatrix::zeros(shape.0, shape.1);
            } else {
                slot.matrix.fill(T::zero());
            }
        } else {
            self.matrices.push(LocalMatrix {
                row_block,
                col_block,
                sides,
                matrix: DMatrix::zeros(shape.0, shape.1),
            });
        }
    }
}

/// Accesses any of the four quadrants of the local matrix of a face.
///
/// The sides are seen from `first`. The quadrants with rows of the second cell live in
/// `second`, so [`SidePair::NeighborOwn`] is the slot of `second` coupling to `first`, and
/// [`SidePair::NeighborNeighbor`] is the own slot of `second`.
pub fn face_matrix_mut<'a, T: Real>(
    first: &'a mut LocalInfo<T>,
    second: &'a mut LocalInfo<T>,
    row_block: usize,
    col_block: usize,
    sides: SidePair,
) -> Option<&'a mut DMatrix<T>> {
    match sides {
        SidePair::OwnOwn => first.matrix_mut(row_block, col_block, SidePair::OwnOwn),
        SidePair::OwnNeighbor => first.matrix_mut(row_block, col_block, SidePair::OwnNeighbor),
        SidePair::NeighborOwn => second.matrix_mut(row_block, col_block, SidePair::OwnNeighbor),
        SidePair::NeighborNeighbor => second.matrix_mut(row_block, col_block, SidePair::OwnOwn),
    }
}
