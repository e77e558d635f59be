//! Error types used throughout the library.
use crate::integration::UpdateFlags;
use crate::mesh::CellId;
use std::fmt;
use std::fmt::{Display, Formatter};
use std::time::Duration;
use thiserror::Error as ThisError;

/// Errors raised while setting up meshes, elements, integration tables or loops.
#[derive(Debug, Clone, PartialEq, ThisError)]
#[non_exhaustive]
pub enum ConfigError {
    /// A coordinate list had the wrong number of entries.
    #[error("the list of coordinates must contain two or three elements (got {0})")]
    CoordinateCount(usize),
    /// The z coordinate of a two-dimensional point was accessed.
    #[error("a two-dimensional point has no z coordinate")]
    MissingZCoordinate,
    /// A planar mesh was requested with three-dimensional corners.
    #[error("mesh corners must be two-dimensional")]
    CornerDimension,
    /// The requested mesh has no cells in one of the directions.
    #[error("a structured mesh needs at least one cell per direction (got {nx}x{ny})")]
    EmptyMesh { nx: usize, ny: usize },
    /// The corners of a rectangle do not span a positive area.
    #[error("the lower corner must be strictly below the upper corner in every direction")]
    DegenerateDomain,
    /// The number of owners does not match the number of cells.
    #[error("partition assigns owners to {owners} cells, but the mesh has {cells} cells")]
    PartitionSize { owners: usize, cells: usize },
    /// A rank outside of `0 .. size` was used.
    #[error("rank {rank} is out of range for {size} ranks")]
    InvalidRank { rank: usize, size: usize },
    /// The requested update flags cannot be provided for the given kind of integration.
    #[error("update flags {flags:?} are not supported on {target}")]
    UnsupportedFlags { flags: UpdateFlags, target: &'static str },
    /// A quadrature with zero points was requested.
    #[error("the quadrature on {target} must have at least one point")]
    EmptyQuadrature { target: &'static str },
    /// Blocks of the element system and the DoF map disagree, or a system has no blocks.
    #[error("inconsistent block layout: {0}")]
    BlockLayout(String),
    /// A sparsity pattern does not match the dimensions of the problem.
    #[error("sparsity pattern is {rows}x{cols}, expected {expected}x{expected}")]
    PatternDimensions { rows: usize, cols: usize, expected: usize },
}

/// Errors raised by collective operations of a [`Communicator`](crate::comm::Communicator).
#[derive(Debug, Clone, PartialEq, Eq, ThisError)]
#[non_exhaustive]
pub enum CommunicationError {
    /// The channel to a peer was closed before the round completed.
    #[error("rank {peer} disconnected during round {round}")]
    Disconnected { peer: usize, round: u64 },
    /// A peer did not deliver its message in time.
    #[error("timed out after {timeout:?} waiting for rank {peer} in round {round}")]
    Timeout { peer: usize, round: u64, timeout: Duration },
    /// A peer sent a payload of a different type than expected.
    #[error("message from rank {peer} in round {round} has an unexpected payload type")]
    PayloadType { peer: usize, round: u64 },
    /// The number of outgoing buffers does not match the number of ranks.
    #[error("expected one outgoing buffer per rank ({expected}), got {actual}")]
    BufferCount { expected: usize, actual: usize },
}

/// The kind of local operator that was running when an error occurred.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum OperatorStage {
    Cell,
    Boundary,
    Face,
}

impl Display for OperatorStage {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cell => write!(f, "cell"),
            Self::Boundary => write!(f, "boundary"),
            Self::Face => write!(f, "face"),
        }
    }
}

/// Errors that abort an assembly pass.
#[derive(Debug, ThisError)]
#[non_exhaustive]
pub enum AssemblyError {
    /// A user supplied local operator failed.
    #[error("{stage} operator failed on cell {cell}: {report}")]
    LocalOperator {
        stage: OperatorStage,
        cell: CellId,
        report: eyre::Report,
    },
    /// A local index does not fit into the block it refers to.
    #[error("local index {index} is out of range for a block of size {size}")]
    LocalIndexOutOfRange { index: usize, size: usize },
    /// A local matrix or vector slot does not have the dimensions of its blocks.
    #[error("slot for blocks ({row_block}, {col_block}) is {actual:?}, expected {expected:?}")]
    SlotDimensionMismatch {
        row_block: usize,
        col_block: usize,
        expected: (usize, usize),
        actual: (usize, usize),
    },
    /// An entry is not part of the fixed sparsity pattern of the global matrix.
    #[error("entry ({row}, {col}) is not in the sparsity pattern")]
    NotInSparsityPattern { row: usize, col: usize },
    /// A global index exceeds the dimensions of the global storage.
    #[error("entry ({row}, {col}) is out of bounds for storage of size {nrows}x{ncols}")]
    GlobalIndexOutOfRange {
        row: usize,
        col: usize,
        nrows: usize,
        ncols: usize,
    },
    /// Entries for a row arrived at a rank which does not own it.
    #[error("rank {rank} received entries for row {row}, which it does not own")]
    RowNotOwned { row: usize, rank: usize },
    /// The geometry of a cell has a non-positive Jacobian determinant.
    #[error("cell {cell} has degenerate geometry")]
    DegenerateCell { cell: CellId },
    /// The traversal reached a cell this rank knows nothing about.
    #[error("cell {cell} is artificial on rank {rank}")]
    ArtificialCell { cell: CellId, rank: usize },
    /// The DoF map does not describe the cell the way the integration tables expect.
    #[error("cell {cell} has {actual} degrees of freedom, expected {expected}")]
    InvalidBlockLayout {
        cell: CellId,
        expected: usize,
        actual: usize,
    },
    /// `finalize` was called twice.
    #[error("the accumulator has already been finalized")]
    AlreadyFinalized,
    /// The pass failed earlier, so the accumulator is undefined.
    #[error("the pass was aborted and the accumulator is undefined")]
    Aborted,
    /// Partial assemblers handed out by `fork` were not joined before `finalize`.
    #[error("{count} partial assemblers were forked but never joined")]
    UnjoinedPartials { count: usize },
    /// At least one rank failed before a collective operation.
    #[error("at least one rank failed locally before the collective operation")]
    PeerFailed,
    /// The communicator does not match the distribution of the storage.
    #[error(
        "communicator has rank {rank} of {size}, but storage expects rank {expected_rank} of {expected_size}"
    )]
    CommunicatorMismatch {
        rank: usize,
        size: usize,
        expected_rank: usize,
        expected_size: usize,
    },
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Communication(#[from] CommunicationError),
}
