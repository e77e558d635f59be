use crate::assembly::{Assembler, LocalInfo, LoopStatistics};
use crate::Real;

/// The local records used by one traversal step.
///
/// A workspace is created once per pass (or once per worker thread in a parallel pass) and
/// reused for every cell, so that the slots of the records are only allocated once.
#[derive(Debug, Clone)]
pub(crate) struct LoopWorkspace<T: Real> {
    pub cell: LocalInfo<T>,
    pub first: LocalInfo<T>,
    pub second: LocalInfo<T>,
}

impl<T: Real> LoopWorkspace<T> {
    pub fn new<A: Assembler<T> + ?Sized>(assembler: &A) -> Self {
        let mut workspace = Self {
            cell: LocalInfo::default(),
            first: LocalInfo::default(),
            second: LocalInfo::default(),
        };
        assembler.initialize_info(&mut workspace.cell, false);
        assembler.initialize_info(&mut workspace.first, true);
        assembler.initialize_info(&mut workspace.second, true);
        workspace
    }
}

/// The per-thread state of a parallel pass.
pub(crate) struct ThreadState<T: Real, P> {
    pub workspace: LoopWorkspace<T>,
    pub partial: P,
    pub statistics: LoopStatistics,
}
