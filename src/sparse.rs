//! Global matrices and vectors that local contributions are accumulated into.
//!
//! Storage is accessed only through [`GlobalMatrix::add`] and [`GlobalVector::add`], which
//! always add to existing entries, and the collective `compress` which completes the
//! accumulation across ranks.
use crate::comm::Communicator;
use crate::dofs::RowPartition;
use crate::error::{AssemblyError, ConfigError};
use crate::Real;
use itertools::izip;
use log::debug;
use nalgebra::{DMatrix, DVector};
use nalgebra_sparse::pattern::SparsityPattern;
use nalgebra_sparse::CsrMatrix;
use rustc_hash::FxHashMap;
use std::sync::Arc;

/// A global matrix that accumulates contributions.
pub trait GlobalMatrix<T: Real> {
    fn nrows(&self) -> usize;

    fn ncols(&self) -> usize;

    /// Adds `value` to the entry `(row, col)`.
    fn add(&mut self, row: usize, col: usize, value: T) -> Result<(), AssemblyError>;

    /// Completes the accumulation across all ranks of `comm`.
    ///
    /// This is a collective operation.
    fn compress<C: Communicator>(&mut self, comm: &C) -> Result<(), AssemblyError>;
}

/// A global vector that accumulates contributions.
pub trait GlobalVector<T: Real> {
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Adds `value` to the entry `row`.
    fn add(&mut self, row: usize, value: T) -> Result<(), AssemblyError>;

    /// Completes the accumulation across all ranks of `comm`.
    ///
    /// This is a collective operation.
    fn compress<C: Communicator>(&mut self, comm: &C) -> Result<(), AssemblyError>;
}

fn check_bounds(row: usize, col: usize, nrows: usize, ncols: usize) -> Result<(), AssemblyError> {
    if row < nrows && col < ncols {
        Ok(())
    } else {
        Err(AssemblyError::GlobalIndexOutOfRange { row, col, nrows, ncols })
    }
}

/// Sums replicated dense data over all ranks, in rank order, so that every rank ends up with
/// bit-identical results.
fn sum_replicated<T: Real, C: Communicator>(data: &mut [T], comm: &C) -> Result<(), AssemblyError> {
    if comm.size() == 1 {
        return Ok(());
    }
    let outgoing = (0..comm.size()).map(|_| data.to_vec()).collect();
    let incoming = comm.exchange(outgoing)?;
    data.fill(T::zero());
    for contribution in incoming {
        for (total, value) in data.iter_mut().zip(contribution) {
            *total += value;
        }
    }
    Ok(())
}

/// A dense matrix is a replicated accumulator: every rank stores the whole matrix, and
/// `compress` sums the copies of all ranks.
impl<T: Real> GlobalMatrix<T> for DMatrix<T> {
    fn nrows(&self) -> usize {
        self.nrows()
    }

    fn ncols(&self) -> usize {
        self.ncols()
    }

    fn add(&mut self, row: usize, col: usize, value: T) -> Result<(), AssemblyError> {
        check_bounds(row, col, self.nrows(), self.ncols())?;
        self[(row, col)] += value;
        Ok(())
    }

    fn compress<C: Communicator>(&mut self, comm: &C) -> Result<(), AssemblyError> {
        sum_replicated(self.as_mut_slice(), comm)
    }
}

/// The vector analogue of the dense matrix accumulator.
impl<T: Real> GlobalVector<T> for DVector<T> {
    fn len(&self) -> usize {
        self.len()
    }

    fn add(&mut self, row: usize, value: T) -> Result<(), AssemblyError> {
        check_bounds(row, 0, self.len(), 1)?;
        self[row] += value;
        Ok(())
    }

    fn compress<C: Communicator>(&mut self, comm: &C) -> Result<(), AssemblyError> {
        sum_replicated(self.as_mut_slice(), comm)
    }
}

fn check_communicator<C: Communicator>(comm: &C, rows: &RowPartition) -> Result<(), AssemblyError> {
    if comm.rank() != rows.rank() || comm.size() != rows.n_ranks() {
        return Err(AssemblyError::CommunicatorMismatch {
            rank: comm.rank(),
            size: comm.size(),
            expected_rank: rows.rank(),
            expected_size: rows.n_ranks(),
        });
    }
    Ok(())
}

/// A square sparse matrix whose rows are distributed over ranks.
///
/// Each rank stores the rows it owns in a [`CsrMatrix`] with the structure of the global
/// sparsity pattern. Entries added to rows owned by other ranks are validated against the
/// pattern and kept in a stash until [`compress`](GlobalMatrix::compress) sends them to
/// their owners.
#[derive(Debug, Clone)]
pub struct DistributedCsrMatrix<T: Real> {
    pattern: Arc<SparsityPattern>,
    rows: RowPartition,
    owned_rows: Vec<usize>,
    local: CsrMatrix<T>,
    stash: FxHashMap<(usize, usize), T>,
}

impl<T: Real> DistributedCsrMatrix<T> {
    /// Creates a zero matrix with the given global pattern.
    pub fn new(pattern: Arc<SparsityPattern>, rows: RowPartition) -> Result<Self, ConfigError> {
        let n = rows.n_rows();
        if pattern.major_dim() != n || pattern.minor_dim() != n {
            return Err(ConfigError::PatternDimensions {
                rows: pattern.major_dim(),
                cols: pattern.minor_dim(),
                expected: n,
            });
        }

        let owned_rows = rows.owned_rows();
        let mut offsets = Vec::with_capacity(owned_rows.len() + 1);
        let mut column_indices = Vec::new();
        offsets.push(0);
        for &row in &owned_rows {
            column_indices.extend_from_slice(pattern.lane(row));
            offsets.push(column_indices.len());
        }
        let nnz = column_indices.len();
        let local_pattern =
            SparsityPattern::try_from_offsets_and_indices(owned_rows.len(), n, offsets, column_indices)
                .expect("Lanes of a valid pattern form a valid pattern");
        let local = CsrMatrix::try_from_pattern_and_values(local_pattern, vec![T::zero(); nnz])
            .expect("Number of values matches the pattern");

        Ok(Self {
            pattern,
            rows,
            owned_rows,
            local,
            stash: FxHashMap::default(),
        })
    }

    pub fn pattern(&self) -> &Arc<SparsityPattern> {
        &self.pattern
    }

    pub fn row_partition(&self) -> &RowPartition {
        &self.rows
    }

    /// The global indices of the rows stored on this rank, in ascending order.
    pub fn owned_rows(&self) -> &[usize] {
        &self.owned_rows
    }

    /// The owned rows. Row `i` of the local matrix is the global row `owned_rows()[i]`.
    pub fn local_matrix(&self) -> &CsrMatrix<T> {
        &self.local
    }

    /// The number of off-process entries waiting for `compress`.
    pub fn num_stashed(&self) -> usize {
        self.stash.len()
    }

    /// Returns the value of an entry in an owned row, or `None` if the row is owned by another
    /// rank. Entries outside the pattern are zero.
    pub fn get(&self, row: usize, col: usize) -> Option<T> {
        let local_row = self.owned_rows.binary_search(&row).ok()?;
        let row = self.local.row(local_row);
        let value = row
            .col_indices()
            .binary_search(&col)
            .map(|k| row.values()[k])
            .unwrap_or_else(|_| T::zero());
        Some(value)
    }

    /// A dense global matrix containing the owned rows. All other rows are zero.
    pub fn to_dense(&self) -> DMatrix<T> {
        let n = self.rows.n_rows();
        let mut dense = DMatrix::zeros(n, n);
        for (local_row, &row) in self.owned_rows.iter().enumerate() {
            let csr_row = self.local.row(local_row);
            for (&col, &value) in izip!(csr_row.col_indices(), csr_row.values()) {
                dense[(row, col)] = value;
            }
        }
        dense
    }

    fn add_local(&mut self, row: usize, col: usize, value: T) -> Result<(), AssemblyError> {
        let local_row = self
            .owned_rows
            .binary_search(&row)
            .map_err(|_| AssemblyError::RowNotOwned {
                row,
                rank: self.rows.rank(),
            })?;
        let mut csr_row = self.local.row_mut(local_row);
        let (cols, values) = csr_row.cols_and_values_mut();
        let k = cols
            .binary_search(&col)
            .map_err(|_| AssemblyError::NotInSparsityPattern { row, col })?;
        values[k] += value;
        Ok(())
    }
}

impl<T: Real> GlobalMatrix<T> for DistributedCsrMatrix<T> {
    fn nrows(&self) -> usize {
        self.rows.n_rows()
    }

    fn ncols(&self) -> usize {
        self.rows.n_rows()
    }

    fn add(&mut self, row: usize, col: usize, value: T) -> Result<(), AssemblyError> {
        check_bounds(row, col, self.nrows(), self.ncols())?;
        if self.pattern.lane(row).binary_search(&col).is_err() {
            // Exact zeros outside the pattern are structural zeros and are dropped
            return if value == T::zero() {
                Ok(())
            } else {
                Err(AssemblyError::NotInSparsityPattern { row, col })
            };
        }
        if self.rows.is_owned(row) {
            self.add_local(row, col, value)
        } else {
            *self.stash.entry((row, col)).or_insert_with(T::zero) += value;
            Ok(())
        }
    }

    fn compress<C: Communicator>(&mut self, comm: &C) -> Result<(), AssemblyError> {
        check_communicator(comm, &self.rows)?;

        let mut entries: Vec<_> = self.stash.drain().collect();
        entries.sort_unstable_by_key(|&((row, col), _)| (row, col));
        let mut outgoing: Vec<Vec<(usize, usize, T)>> = vec![Vec::new(); comm.size()];
        for ((row, col), value) in entries {
            outgoing[self.rows.owner(row)].push((row, col, value));
        }
        debug!(
            "Rank {} sends {} off-process matrix entries",
            comm.rank(),
            outgoing.iter().map(Vec::len).sum::<usize>()
        );

        let incoming = comm.exchange(outgoing)?;
        for (source, entries) in incoming.into_iter().enumerate() {
            if !entries.is_empty() {
                debug!("Rank {} receives {} matrix entries from rank {}", comm.rank(), entries.len(), source);
            }
            for (row, col, value) in entries {
                self.add_local(row, col, value)?;
            }
        }
        Ok(())
    }
}

/// A vector whose entries are distributed over ranks in the same way as the rows of a
/// [`DistributedCsrMatrix`].
#[derive(Debug, Clone)]
pub struct DistributedVector<T: Real> {
    rows: RowPartition,
    owned_rows: Vec<usize>,
    local: DVector<T>,
    stash: FxHashMap<usize, T>,
}

impl<T: Real> DistributedVector<T> {
    pub fn new(rows: RowPartition) -> Self {
        let owned_rows = rows.owned_rows();
        let local = DVector::zeros(owned_rows.len());
        Self {
            rows,
            owned_rows,
            local,
            stash: FxHashMap::default(),
        }
    }

    pub fn row_partition(&self) -> &RowPartition {
        &self.rows
    }

    pub fn owned_rows(&self) -> &[usize] {
        &self.owned_rows
    }

    /// The owned entries. Entry `i` is the global entry `owned_rows()[i]`.
    pub fn local_vector(&self) -> &DVector<T> {
        &self.local
    }

    pub fn get(&self, row: usize) -> Option<T> {
        let local_row = self.owned_rows.binary_search(&row).ok()?;
        Some(self.local[local_row])
    }

    /// A dense global vector containing the owned entries. All other entries are zero.
    pub fn to_dense(&self) -> DVector<T> {
        let mut dense = DVector::zeros(self.rows.n_rows());
        for (&row, &value) in izip!(&self.owned_rows, &self.local) {
            dense[row] = value;
        }
        dense
    }

    fn add_local(&mut self, row: usize, value: T) -> Result<(), AssemblyError> {
        let local_row = self
            .owned_rows
            .binary_search(&row)
            .map_err(|_| AssemblyError::RowNotOwned {
                row,
                rank: self.rows.rank(),
            })?;
        self.local[local_row] += value;
        Ok(())
    }
}

impl<T: Real> GlobalVector<T> for DistributedVector<T> {
    fn len(&self) -> usize {
        self.rows.n_rows()
    }

    fn add(&mut self, row: usize, value: T) -> Result<(), AssemblyError> {
        check_bounds(row, 0, self.len(), 1)?;
        if self.rows.is_owned(row) {
            self.add_local(row, value)
        } else {
            *self.stash.entry(row).or_insert_with(T::zero) += value;
            Ok(())
        }
    }

    fn compress<C: Communicator>(&mut self, comm: &C) -> Result<(), AssemblyError> {
        check_communicator(comm, &self.rows)?;

        let mut entries: Vec<_> = self.stash.drain().collect();
        entries.sort_unstable_by_key(|&(row, _)| row);
        let mut outgoing: Vec<Vec<(usize, T)>> = vec![Vec::new(); comm.size()];
        for (row, value) in entries {
            outgoing[self.rows.owner(row)].push((row, value));
        }
        debug!(
            "Rank {} sends {} off-process vector entries",
            comm.rank(),
            outgoing.iter().map(Vec::len).sum::<usize>()
        );

        for entries in comm.exchange(outgoing)? {
            for (row, value) in entries {
                self.add_local(row, value)?;
            }
        }
        Ok(())
    }
}

/// An append-only list of `(row, col, value)` contributions.
///
/// Used as the storage of thread-local partial assemblers. A buffer with a single column
/// doubles as a vector accumulator.
#[derive(Debug, Clone, PartialEq)]
pub struct TripletBuffer<T: Real> {
    nrows: usize,
    ncols: usize,
    triplets: Vec<(usize, usize, T)>,
}

impl<T: Real> TripletBuffer<T> {
    pub fn new(nrows: usize, ncols: usize) -> Self {
        Self {
            nrows,
            ncols,
            triplets: Vec::new(),
        }
    }

    pub fn for_vector(len: usize) -> Self {
        Self::new(len, 1)
    }

    pub fn triplets(&self) -> &[(usize, usize, T)] {
        &self.triplets
    }

    pub fn num_triplets(&self) -> usize {
        self.triplets.len()
    }

    /// Adds all contributions to `matrix` in insertion order and empties the buffer.
    pub fn drain_into_matrix<M: GlobalMatrix<T>>(&mut self, matrix: &mut M) -> Result<(), AssemblyError> {
        for (row, col, value) in self.triplets.drain(..) {
            matrix.add(row, col, value)?;
        }
        Ok(())
    }

    /// Adds all contributions to `vector` in insertion order and empties the buffer.
    pub fn drain_into_vector<V: GlobalVector<T>>(&mut self, vector: &mut V) -> Result<(), AssemblyError> {
        for (row, _, value) in self.triplets.drain(..) {
            vector.add(row, value)?;
        }
        Ok(())
    }
}

impl<T: Real> GlobalMatrix<T> for TripletBuffer<T> {
    fn nrows(&self) -> usize {
        self.nrows
    }

    fn ncols(&self) -> usize {
        self.ncols
    }

    fn add(&mut self, row: usize, col: usize, value: T) -> Result<(), AssemblyError> {
        check_bounds(row, col, self.nrows, self.ncols)?;
        self.triplets.push((row, col, value));
        Ok(())
    }

    /// Partial buffers are merged by draining them, never compressed.
    fn compress<C: Communicator>(&mut self, _comm: &C) -> Result<(), AssemblyError> {
        Ok(())
    }
}

impl<T: Real> GlobalVector<T> for TripletBuffer<T> {
    fn len(&self) -> usize {
        self.nrows
    }

    fn add(&mut self, row: usize, value: T) -> Result<(), AssemblyError> {
        check_bounds(row, 0, self.nrows, 1)?;
        self.triplets.push((row, 0, value));
        Ok(())
    }

    fn compress<C: Communicator>(&mut self, _comm: &C) -> Result<(), AssemblyError> {
        Ok(())
    }
}
