//! Numbering of degrees of freedom and the structure of global matrices.
use crate::element::{BaseElement, FeSystem};
use crate::error::ConfigError;
use crate::mesh::{CellId, CellPartition, FaceKind, MeshView, StructuredQuadMesh};
use crate::Real;
use nalgebra_sparse::pattern::SparsityPattern;
use std::collections::BTreeSet;
use std::ops::Range;
use std::sync::Arc;

/// A contiguous range of the local degrees of freedom of a cell belonging to one block.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct BlockRange {
    pub block: usize,
    pub start: usize,
    pub len: usize,
}

impl BlockRange {
    pub fn end(&self) -> usize {
        self.start + self.len
    }

    pub fn range(&self) -> Range<usize> {
        self.start..self.end()
    }
}

/// Maps the degrees of freedom of cells to global indices.
pub trait DofMap {
    /// The total number of degrees of freedom across all ranks.
    fn n_dofs(&self) -> usize;

    fn n_blocks(&self) -> usize;

    fn block_name(&self, block: usize) -> &str;

    fn cell_dof_count(&self, cell: CellId) -> usize;

    /// Writes the global indices of the degrees of freedom of the cell into `indices`.
    ///
    /// # Panics
    ///
    /// May panic if the length of `indices` is not equal to the number of degrees of freedom
    /// of the cell.
    fn populate_global_indices(&self, cell: CellId, indices: &mut [usize]);

    /// Replaces the contents of `ranges` with the block decomposition of the local degrees of
    /// freedom of the cell.
    fn populate_block_ranges(&self, cell: CellId, ranges: &mut Vec<BlockRange>);

    /// The rank that owns the given global row.
    fn row_owner(&self, row: usize) -> usize;
}

impl<D: DofMap + ?Sized> DofMap for &D {
    fn n_dofs(&self) -> usize {
        D::n_dofs(self)
    }

    fn n_blocks(&self) -> usize {
        D::n_blocks(self)
    }

    fn block_name(&self, block: usize) -> &str {
        D::block_name(self, block)
    }

    fn cell_dof_count(&self, cell: CellId) -> usize {
        D::cell_dof_count(self, cell)
    }

    fn populate_global_indices(&self, cell: CellId, indices: &mut [usize]) {
        D::populate_global_indices(self, cell, indices)
    }

    fn populate_block_ranges(&self, cell: CellId, ranges: &mut Vec<BlockRange>) {
        D::populate_block_ranges(self, cell, ranges)
    }

    fn row_owner(&self, row: usize) -> usize {
        D::row_owner(self, row)
    }
}

/// Ownership of global rows by ranks, seen from one rank.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowPartition {
    owners: Arc<Vec<usize>>,
    rank: usize,
    n_ranks: usize,
}

impl RowPartition {
    pub fn new(owners: Arc<Vec<usize>>, rank: usize, n_ranks: usize) -> Result<Self, ConfigError> {
        if rank >= n_ranks {
            return Err(ConfigError::InvalidRank { rank, size: n_ranks });
        }
        if let Some(&owner) = owners.iter().find(|&&owner| owner >= n_ranks) {
            return Err(ConfigError::InvalidRank {
                rank: owner,
                size: n_ranks,
            });
        }
        Ok(Self { owners, rank, n_ranks })
    }

    /// A partition in which a single rank owns every row.
    pub fn serial(n_rows: usize) -> Self {
        Self {
            owners: Arc::new(vec![0; n_rows]),
            rank: 0,
            n_ranks: 1,
        }
    }

    pub fn rank(&self) -> usize {
        self.rank
    }

    pub fn n_ranks(&self) -> usize {
        self.n_ranks
    }

    pub fn n_rows(&self) -> usize {
        self.owners.len()
    }

    pub fn owner(&self, row: usize) -> usize {
        self.owners[row]
    }

    pub fn is_owned(&self, row: usize) -> bool {
        self.owners[row] == self.rank
    }

    /// The rows owned by this rank, in ascending order.
    pub fn owned_rows(&self) -> Vec<usize> {
        (0..self.n_rows()).filter(|&row| self.is_owned(row)).collect()
    }
}

/// Block-major numbering of the degrees of freedom of an [`FeSystem`] on a structured mesh.
///
/// All degrees of freedom of the first block come first, followed by those of the second
/// block and so on. Within a block, discontinuous elements are numbered by cell and
/// continuous elements by vertex. The numbering does not depend on the partition, so that
/// serial and distributed computations produce directly comparable results.
///
/// Cell degrees of freedom are owned by the owner of the cell. Vertex degrees of freedom are
/// owned by the owner of the adjacent cell with the lowest index.
#[derive(Debug, Clone)]
pub struct StructuredDofMap {
    system: FeSystem,
    nx: usize,
    block_offsets: Vec<usize>,
    row_owners: Arc<Vec<usize>>,
    n_ranks: usize,
}

impl StructuredDofMap {
    pub fn new<T: Real>(
        mesh: &StructuredQuadMesh<T>,
        system: &FeSystem,
        partition: &CellPartition,
    ) -> Result<Self, ConfigError> {
        if system.n_blocks() == 0 {
            return Err(ConfigError::BlockLayout("the element system has no blocks".to_string()));
        }
        if partition.n_cells() != mesh.num_cells() {
            return Err(ConfigError::PartitionSize {
                owners: partition.n_cells(),
                cells: mesh.num_cells(),
            });
        }

        let mut block_offsets = vec![0];
        let mut row_owners = Vec::new();
        for block in system.blocks() {
            match block.element {
                BaseElement::Dgp0 => {
                    row_owners.extend(mesh.cells().iter().map(|&cell| partition.owner(cell)));
                }
                BaseElement::Q1 => {
                    row_owners.extend(
                        (0..mesh.num_vertices()).map(|v| partition.owner(mesh.lowest_cell_at_vertex(v))),
                    );
                }
            }
            block_offsets.push(row_owners.len());
        }

        Ok(Self {
            system: system.clone(),
            nx: mesh.nx(),
            block_offsets,
            row_owners: Arc::new(row_owners),
            n_ranks: partition.n_ranks(),
        })
    }

    pub fn system(&self) -> &FeSystem {
        &self.system
    }

    /// The global indices of the given block.
    pub fn block_dofs(&self, block: usize) -> Range<usize> {
        self.block_offsets[block]..self.block_offsets[block + 1]
    }

    pub fn row_partition(&self, rank: usize) -> Result<RowPartition, ConfigError> {
        RowPartition::new(Arc::clone(&self.row_owners), rank, self.n_ranks)
    }
}

impl DofMap for StructuredDofMap {
    fn n_dofs(&self) -> usize {
        self.row_owners.len()
    }

    fn n_blocks(&self) -> usize {
        self.system.n_blocks()
    }

    fn block_name(&self, block: usize) -> &str {
        self.system.block_name(block)
    }

    fn cell_dof_count(&self, _cell: CellId) -> usize {
        self.system.n_dofs_per_cell()
    }

    fn populate_global_indices(&self, cell: CellId, indices: &mut [usize]) {
        assert_eq!(indices.len(), self.system.n_dofs_per_cell(), "Index buffer has wrong length");
        let (i, j) = (cell.0 % self.nx, cell.0 / self.nx);
        let v = |i: usize, j: usize| j * (self.nx + 1) + i;
        let vertices = [v(i, j), v(i + 1, j), v(i + 1, j + 1), v(i, j + 1)];

        let mut local = 0;
        for (block, offset) in self.system.blocks().iter().zip(&self.block_offsets) {
            match block.element {
                BaseElement::Dgp0 => {
                    indices[local] = offset + cell.0;
                    local += 1;
                }
                BaseElement::Q1 => {
                    for vertex in vertices {
                        indices[local] = offset + vertex;
                        local += 1;
                    }
                }
            }
        }
    }

    fn populate_block_ranges(&self, _cell: CellId, ranges: &mut Vec<BlockRange>) {
        ranges.clear();
        let mut start = 0;
        for (block, fe_block) in self.system.blocks().iter().enumerate() {
            let len = fe_block.element.n_dofs();
            ranges.push(BlockRange { block, start, len });
            start += len;
        }
    }

    fn row_owner(&self, row: usize) -> usize {
        self.row_owners[row]
    }
}

fn pattern_from_entries(n: usize, entries: BTreeSet<(usize, usize)>) -> SparsityPattern {
    let mut offsets = Vec::with_capacity(n + 1);
    let mut column_indices = Vec::with_capacity(entries.len());

    offsets.push(0);
    for (i, j) in entries {
        // Consecutive empty rows need more than one new offset
        while i + 1 > offsets.len() {
            offsets.push(column_indices.len());
        }
        column_indices.push(j);
    }
    while offsets.len() < n + 1 {
        offsets.push(column_indices.len());
    }

    SparsityPattern::try_from_offsets_and_indices(n, n, offsets, column_indices)
        .expect("Entries are sorted and unique by construction")
}

fn insert_coupling(entries: &mut BTreeSet<(usize, usize)>, rows: &[usize], cols: &[usize]) {
    for &i in rows {
        for &j in cols {
            entries.insert((i, j));
        }
    }
}

/// The sparsity pattern coupling all degrees of freedom that share a cell.
///
/// Only the cells owned by the view contribute, so the view should see every cell of the
/// mesh if the pattern is meant to describe the global matrix.
pub fn cell_sparsity_pattern<T, M, D>(mesh: &M, dofs: &D) -> SparsityPattern
where
    T: Real,
    M: MeshView<T>,
    D: DofMap,
{
    // Store each entry exactly once, duplicates are very common
    let mut entries = BTreeSet::new();
    let mut indices = Vec::new();
    for &cell in mesh.locally_owned_cells() {
        indices.resize(dofs.cell_dof_count(cell), usize::MAX);
        dofs.populate_global_indices(cell, &mut indices);
        insert_coupling(&mut entries, &indices, &indices);
    }
    pattern_from_entries(dofs.n_dofs(), entries)
}

/// The sparsity pattern of [`cell_sparsity_pattern`] extended by the couplings between the
/// degrees of freedom of cells that share a face.
pub fn flux_sparsity_pattern<T, M, D>(mesh: &M, dofs: &D) -> SparsityPattern
where
    T: Real,
    M: MeshView<T>,
    D: DofMap,
{
    let mut entries = BTreeSet::new();
    let mut indices = Vec::new();
    let mut neighbor_indices = Vec::new();
    for &cell in mesh.locally_owned_cells() {
        indices.resize(dofs.cell_dof_count(cell), usize::MAX);
        dofs.populate_global_indices(cell, &mut indices);
        insert_coupling(&mut entries, &indices, &indices);

        for face in 0..mesh.num_faces(cell) {
            if let FaceKind::Interior { neighbor, .. } = mesh.face(cell, face) {
                neighbor_indices.resize(dofs.cell_dof_count(neighbor), usize::MAX);
                dofs.populate_global_indices(neighbor, &mut neighbor_indices);
                insert_coupling(&mut entries, &indices, &neighbor_indices);
                insert_coupling(&mut entries, &neighbor_indices, &indices);
            }
        }
    }
    pattern_from_entries(dofs.n_dofs(), entries)
}
