use crate::assembly::info::{LocalInfo, SidePair};
use crate::comm::Communicator;
use crate::error::AssemblyError;
use crate::sparse::{GlobalMatrix, GlobalVector, TripletBuffer};
use crate::Real;
use log::debug;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Which rows of a face pair an assembler should scatter.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum FaceRows {
    /// All four quadrants.
    Both,
    /// Only the rows of the first cell.
    First,
    /// Only the rows of the second cell.
    Second,
}

/// Scatters the slots of local records into global storage.
pub trait Assembler<T: Real> {
    /// Sets up the slots of a record before the traversal starts. `face` is `true` for
    /// records that describe one side of an interior face.
    fn initialize_info(&self, info: &mut LocalInfo<T>, face: bool);

    /// Scatters the own-own slots of a cell or boundary record.
    fn assemble_cell(&mut self, info: &LocalInfo<T>) -> Result<(), AssemblyError>;

    /// Scatters the slots of a face pair.
    fn assemble_face(
        &mut self,
        first: &LocalInfo<T>,
        second: &LocalInfo<T>,
        rows: FaceRows,
    ) -> Result<(), AssemblyError>;

    /// Marks the accumulation as failed. The default does nothing.
    fn abort(&mut self) {}
}

/// An assembler that can hand out partial assemblers for use on other threads.
pub trait ParallelAssembler<T: Real>: Assembler<T> {
    type Partial: Assembler<T> + Send;

    fn fork(&self) -> Self::Partial;

    /// Adds the contributions collected by `partial`.
    fn join(&mut self, partial: Self::Partial) -> Result<(), AssemblyError>;
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum State {
    Accumulating,
    Aborted,
    Finalized,
}

impl State {
    /// A finalized accumulation stays finalized.
    fn abort(&mut self) {
        if *self == Self::Accumulating {
            *self = Self::Aborted;
        }
    }

    fn check_accumulating(&self) -> Result<(), AssemblyError> {
        match self {
            Self::Accumulating => Ok(()),
            Self::Aborted => Err(AssemblyError::Aborted),
            Self::Finalized => Err(AssemblyError::AlreadyFinalized),
        }
    }
}

/// Number of partial assemblers that were forked but not yet joined.
#[derive(Debug, Default)]
struct PartialCount(AtomicUsize);

impl Clone for PartialCount {
    fn clone(&self) -> Self {
        Self(AtomicUsize::new(self.outstanding()))
    }
}

impl PartialCount {
    fn outstanding(&self) -> usize {
        self.0.load(Ordering::Acquire)
    }

    fn fork(&self) {
        self.0.fetch_add(1, Ordering::AcqRel);
    }

    fn join(&self) {
        let _ = self
            .0
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |count| count.checked_sub(1));
    }

    fn check_joined(&self) -> Result<(), AssemblyError> {
        match self.outstanding() {
            0 => Ok(()),
            count => Err(AssemblyError::UnjoinedPartials { count }),
        }
    }
}

/// Whether a local entry is left out of the scatter. NaN and infinite entries always pass.
fn below_threshold<T: Real>(value: T, threshold: T) -> bool {
    value.abs() < threshold
}

fn scatter_matrices<T, M>(
    matrix: &mut M,
    info: &LocalInfo<T>,
    neighbor: Option<&LocalInfo<T>>,
    threshold: T,
) -> Result<(), AssemblyError>
where
    T: Real,
    M: GlobalMatrix<T>,
{
    for slot in info.matrices() {
        let col_info = match (slot.sides, neighbor) {
            (SidePair::OwnOwn, _) => info,
            (_, Some(neighbor)) => neighbor,
            (_, None) => continue,
        };
        let rows = info.block_indices(slot.row_block)?;
        let cols = col_info.block_indices(slot.col_block)?;
        if slot.matrix.shape() != (rows.len(), cols.len()) {
            return Err(AssemblyError::SlotDimensionMismatch {
                row_block: slot.row_block,
                col_block: slot.col_block,
                expected: (rows.len(), cols.len()),
                actual: slot.matrix.shape(),
            });
        }

        for (i, &row) in rows.iter().enumerate() {
            for (j, &col) in cols.iter().enumerate() {
                let value = slot.matrix[(i, j)];
                if !below_threshold(value, threshold) {
                    matrix.add(row, col, value)?;
                }
            }
        }
    }
    Ok(())
}

fn scatter_vectors<T, V>(vector: &mut V, info: &LocalInfo<T>, threshold: T) -> Result<(), AssemblyError>
where
    T: Real,
    V: GlobalVector<T>,
{
    for slot in info.vectors() {
        let rows = info.block_indices(slot.block)?;
        if slot.vector.len() != rows.len() {
            return Err(AssemblyError::SlotDimensionMismatch {
                row_block: slot.block,
                col_block: 0,
                expected: (rows.len(), 1),
                actual: slot.vector.shape(),
            });
        }
        for (&row, &value) in rows.iter().zip(slot.vector.iter()) {
            if !below_threshold(value, threshold) {
                vector.add(row, value)?;
            }
        }
    }
    Ok(())
}

fn face_sides<'a, T: Real>(
    first: &'a LocalInfo<T>,
    second: &'a LocalInfo<T>,
    rows: FaceRows,
) -> impl Iterator<Item = (&'a LocalInfo<T>, &'a LocalInfo<T>)> {
    let first_rows = matches!(rows, FaceRows::Both | FaceRows::First).then_some((first, second));
    let second_rows = matches!(rows, FaceRows::Both | FaceRows::Second).then_some((second, first));
    first_rows.into_iter().chain(second_rows)
}

fn check_threshold<T: Real>(threshold: T) -> T {
    assert!(threshold >= T::zero(), "Threshold must be non-negative");
    threshold
}

/// Assembles local matrices into a global matrix.
#[derive(Debug, Clone)]
pub struct MatrixAssembler<T: Real, M> {
    matrix: M,
    threshold: T,
    state: State,
    partials: PartialCount,
}

impl<T: Real, M: GlobalMatrix<T>> MatrixAssembler<T, M> {
    pub fn new(matrix: M) -> Self {
        Self {
            matrix,
            threshold: T::zero(),
            state: State::Accumulating,
            partials: PartialCount::default(),
        }
    }

    /// Entries with a magnitude below `threshold` are not scattered.
    ///
    /// # Panics
    ///
    /// Panics if the threshold is negative.
    pub fn with_threshold(self, threshold: T) -> Self {
        Self {
            threshold: check_threshold(threshold),
            ..self
        }
    }

    pub fn matrix(&self) -> &M {
        &self.matrix
    }

    pub fn into_matrix(self) -> M {
        self.matrix
    }

    pub fn is_aborted(&self) -> bool {
        self.state == State::Aborted
    }

    pub fn is_finalized(&self) -> bool {
        self.state == State::Finalized
    }

    /// Completes the accumulation with a collective `compress` of the matrix.
    ///
    /// Must be called exactly once, on every rank, after all local contributions have been
    /// assembled.
    pub fn finalize<C: Communicator>(&mut self, comm: &C) -> Result<(), AssemblyError> {
        self.state.check_accumulating()?;
        self.partials.check_joined()?;
        debug!("Finalizing matrix assembly on rank {}", comm.rank());
        if let Err(err) = self.matrix.compress(comm) {
            self.state = State::Aborted;
            return Err(err);
        }
        self.state = State::Finalized;
        Ok(())
    }
}

impl<T: Real, M: GlobalMatrix<T>> Assembler<T> for MatrixAssembler<T, M> {
    fn initialize_info(&self, info: &mut LocalInfo<T>, face: bool) {
        info.initialize_matrices(face);
    }

    fn assemble_cell(&mut self, info: &LocalInfo<T>) -> Result<(), AssemblyError> {
        self.state.check_accumulating()?;
        scatter_matrices(&mut self.matrix, info, None, self.threshold)
    }

    fn assemble_face(
        &mut self,
        first: &LocalInfo<T>,
        second: &LocalInfo<T>,
        rows: FaceRows,
    ) -> Result<(), AssemblyError> {
        self.state.check_accumulating()?;
        for (own, neighbor) in face_sides(first, second, rows) {
            scatter_matrices(&mut self.matrix, own, Some(neighbor), self.threshold)?;
        }
        Ok(())
    }

    fn abort(&mut self) {
        self.state.abort();
    }
}

impl<T: Real, M: GlobalMatrix<T>> ParallelAssembler<T> for MatrixAssembler<T, M> {
    type Partial = MatrixAssembler<T, TripletBuffer<T>>;

    fn fork(&self) -> Self::Partial {
        self.partials.fork();
        let buffer = TripletBuffer::new(self.matrix.nrows(), self.matrix.ncols());
        MatrixAssembler::new(buffer).with_threshold(self.threshold)
    }

    fn join(&mut self, mut partial: Self::Partial) -> Result<(), AssemblyError> {
        self.state.check_accumulating()?;
        self.partials.join();
        partial.state.check_accumulating()?;
        partial.matrix.drain_into_matrix(&mut self.matrix)
    }
}

/// Assembles local vectors into a global vector.
#[derive(Debug, Clone)]
pub struct ResidualAssembler<T: Real, V> {
    vector: V,
    threshold: T,
    state: State,
    partials: PartialCount,
}

impl<T: Real, V: GlobalVector<T>> ResidualAssembler<T, V> {
    pub fn new(vector: V) -> Self {
        Self {
            vector,
            threshold: T::zero(),
            state: State::Accumulating,
            partials: PartialCount::default(),
        }
    }

    /// # Panics
    ///
    /// Panics if the threshold is negative.
    pub fn with_threshold(self, threshold: T) -> Self {
        Self {
            threshold: check_threshold(threshold),
            ..self
        }
    }

    pub fn vector(&self) -> &V {
        &self.vector
    }

    pub fn into_vector(self) -> V {
        self.vector
    }

    pub fn is_aborted(&self) -> bool {
        self.state == State::Aborted
    }

    pub fn finalize<C: Communicator>(&mut self, comm: &C) -> Result<(), AssemblyError> {
        self.state.check_accumulating()?;
        self.partials.check_joined()?;
        debug!("Finalizing vector assembly on rank {}", comm.rank());
        if let Err(err) = self.vector.compress(comm) {
            self.state = State::Aborted;
            return Err(err);
        }
        self.state = State::Finalized;
        Ok(())
    }
}

impl<T: Real, V: GlobalVector<T>> Assembler<T> for ResidualAssembler<T, V> {
    fn initialize_info(&self, info: &mut LocalInfo<T>, _face: bool) {
        info.initialize_vectors();
    }

    fn assemble_cell(&mut self, info: &LocalInfo<T>) -> Result<(), AssemblyError> {
        self.state.check_accumulating()?;
        scatter_vectors(&mut self.vector, info, self.threshold)
    }

    fn assemble_face(
        &mut self,
        first: &LocalInfo<T>,
        second: &LocalInfo<T>,
        rows: FaceRows,
    ) -> Result<(), AssemblyError> {
        self.state.check_accumulating()?;
        for (own, _) in face_sides(first, second, rows) {
            scatter_vectors(&mut self.vector, own, self.threshold)?;
        }
        Ok(())
    }

    fn abort(&mut self) {
        self.state.abort();
    }
}

impl<T: Real, V: GlobalVector<T>> ParallelAssembler<T> for ResidualAssembler<T, V> {
    type Partial = ResidualAssembler<T, TripletBuffer<T>>;

    fn fork(&self) -> Self::Partial {
        self.partials.fork();
        ResidualAssembler::new(TripletBuffer::for_vector(self.vector.len())).with_threshold(self.threshold)
    }

    fn join(&mut self, mut partial: Self::Partial) -> Result<(), AssemblyError> {
        self.state.check_accumulating()?;
        self.partials.join();
        partial.state.check_accumulating()?;
        partial.vector.drain_into_vector(&mut self.vector)
    }
}

/// Assembles local matrices and vectors at the same time.
#[derive(Debug, Clone)]
pub struct SystemAssembler<T: Real, M, V> {
    matrix: M,
    vector: V,
    threshold: T,
    state: State,
    partials: PartialCount,
}

impl<T, M, V> SystemAssembler<T, M, V>
where
    T: Real,
    M: GlobalMatrix<T>,
    V: GlobalVector<T>,
{
    pub fn new(matrix: M, vector: V) -> Self {
        Self {
            matrix,
            vector,
            threshold: T::zero(),
            state: State::Accumulating,
            partials: PartialCount::default(),
        }
    }

    /// # Panics
    ///
    /// Panics if the threshold is negative.
    pub fn with_threshold(self, threshold: T) -> Self {
        Self {
            threshold: check_threshold(threshold),
            ..self
        }
    }

    pub fn matrix(&self) -> &M {
        &self.matrix
    }

    pub fn vector(&self) -> &V {
        &self.vector
    }

    pub fn into_parts(self) -> (M, V) {
        (self.matrix, self.vector)
    }

    pub fn is_aborted(&self) -> bool {
        self.state == State::Aborted
    }

    pub fn finalize<C: Communicator>(&mut self, comm: &C) -> Result<(), AssemblyError> {
        self.state.check_accumulating()?;
        self.partials.check_joined()?;
        debug!("Finalizing system assembly on rank {}", comm.rank());
        let result = self
            .matrix
            .compress(comm)
            .and_then(|_| self.vector.compress(comm));
        if let Err(err) = result {
            self.state = State::Aborted;
            return Err(err);
        }
        self.state = State::Finalized;
        Ok(())
    }
}

impl<T, M, V> Assembler<T> for SystemAssembler<T, M, V>
where
    T: Real,
    M: GlobalMatrix<T>,
    V: GlobalVector<T>,
{
    fn initialize_info(&self, info: &mut LocalInfo<T>, face: bool) {
        info.initialize_matrices(face);
        info.initialize_vectors();
    }

    fn assemble_cell(&mut self, info: &LocalInfo<T>) -> Result<(), AssemblyError> {
        self.state.check_accumulating()?;
        scatter_matrices(&mut self.matrix, info, None, self.threshold)?;
        scatter_vectors(&mut self.vector, info, self.threshold)
    }

    fn assemble_face(
        &mut self,
        first: &LocalInfo<T>,
        second: &LocalInfo<T>,
        rows: FaceRows,
    ) -> Result<(), AssemblyError> {
        self.state.check_accumulating()?;
        for (own, neighbor) in face_sides(first, second, rows) {
            scatter_matrices(&mut self.matrix, own, Some(neighbor), self.threshold)?;
            scatter_vectors(&mut self.vector, own, self.threshold)?;
        }
        Ok(())
    }

    fn abort(&mut self) {
        self.state.abort();
    }
}

impl<T, M, V> ParallelAssembler<T> for SystemAssembler<T, M, V>
where
    T: Real,
    M: GlobalMatrix<T>,
    V: GlobalVector<T>,
{
    type Partial = SystemAssembler<T, TripletBuffer<T>, TripletBuffer<T>>;

    fn fork(&self) -> Self::Partial {
        self.partials.fork();
        SystemAssembler::new(
            TripletBuffer::new(self.matrix.nrows(), self.matrix.ncols()),
            TripletBuffer::for_vector(self.vector.len()),
        )
        .with_threshold(self.threshold)
    }

    fn join(&mut self, mut partial: Self::Partial) -> Result<(), AssemblyError> {
        self.state.check_accumulating()?;
        self.partials.join();
        partial.state.check_accumulating()?;
        partial.matrix.drain_into_matrix(&mut self.matrix)?;
        partial.vector.drain_into_vector(&mut self.vector)
    }
}

/// Checks that the local work of every rank succeeded before a collective operation.
///
/// Every rank must call this with the outcome of its own work. If any rank failed, all ranks
/// receive [`AssemblyError::PeerFailed`] (the failing rank included), so that no rank enters
/// `finalize` while a peer has given up.
pub fn check_collective<C, R, E>(comm: &C, local: &Result<R, E>) -> Result<(), AssemblyError>
where
    C: Communicator,
{
    if comm.all_agree(local.is_ok())? {
        Ok(())
    } else {
        Err(AssemblyError::PeerFailed)
    }
}
