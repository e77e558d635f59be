use crate::assembly::assembler::{Assembler, FaceRows, ParallelAssembler};
use crate::assembly::info::{InfoKind, LocalInfo};
use crate::dofs::DofMap;
use crate::error::{AssemblyError, ConfigError, OperatorStage};
use crate::integration::IntegrationCache;
use crate::mesh::{CellId, FaceKind, FaceOrientation, MeshView, Ownership};
use crate::workspace::{LoopWorkspace, ThreadState};
use crate::Real;
use log::{debug, trace, warn};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::ops::AddAssign;
use thread_local::ThreadLocal;

/// How faces between a locally owned cell and a ghost cell are assembled.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum GhostFaces {
    /// Both ranks assemble the face. Each rank only scatters the rows of its own cell.
    #[default]
    Split,
    /// Only the rank with the lower rank number assembles the face, and scatters all four
    /// quadrants of the face matrix.
    LowerRank,
}

/// Controls which terms a [`MeshLoop`] assembles.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoopControl {
    /// Assemble cell terms.
    pub cells: bool,
    /// Assemble boundary and interior face terms.
    pub faces: bool,
    /// Assemble the cell term of a cell before its face terms.
    pub cells_first: bool,
    pub ghost_faces: GhostFaces,
}

impl Default for LoopControl {
    fn default() -> Self {
        Self {
            cells: true,
            faces: true,
            cells_first: true,
            ghost_faces: GhostFaces::default(),
        }
    }
}

impl LoopControl {
    pub fn with_cells(self, cells: bool) -> Self {
        Self { cells, ..self }
    }

    pub fn with_faces(self, faces: bool) -> Self {
        Self { faces, ..self }
    }

    pub fn with_cells_first(self, cells_first: bool) -> Self {
        Self { cells_first, ..self }
    }

    pub fn with_ghost_faces(self, ghost_faces: GhostFaces) -> Self {
        Self { ghost_faces, ..self }
    }
}

/// User supplied local operators.
///
/// Operators fill the slots of the records they are given. They must not rely on the order
/// in which cells and faces are visited.
pub trait LocalIntegrator<T: Real> {
    fn cell(&self, info: &mut LocalInfo<T>) -> eyre::Result<()>;

    #[allow(unused_variables)]
    fn boundary(&self, info: &mut LocalInfo<T>) -> eyre::Result<()> {
        Ok(())
    }

    /// Integrates over an interior face. `first` describes the cell with the smaller
    /// [`CellId`].
    #[allow(unused_variables)]
    fn face(&self, first: &mut LocalInfo<T>, second: &mut LocalInfo<T>) -> eyre::Result<()> {
        Ok(())
    }

    fn uses_cells(&self) -> bool {
        true
    }

    fn uses_boundary(&self) -> bool {
        true
    }

    fn uses_faces(&self) -> bool {
        true
    }
}

impl<T: Real, I: LocalIntegrator<T> + ?Sized> LocalIntegrator<T> for &I {
    fn cell(&self, info: &mut LocalInfo<T>) -> eyre::Result<()> {
        I::cell(self, info)
    }

    fn boundary(&self, info: &mut LocalInfo<T>) -> eyre::Result<()> {
        I::boundary(self, info)
    }

    fn face(&self, first: &mut LocalInfo<T>, second: &mut LocalInfo<T>) -> eyre::Result<()> {
        I::face(self, first, second)
    }

    fn uses_cells(&self) -> bool {
        I::uses_cells(self)
    }

    fn uses_boundary(&self) -> bool {
        I::uses_boundary(self)
    }

    fn uses_faces(&self) -> bool {
        I::uses_faces(self)
    }
}

/// Number of operator invocations of a pass.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct LoopStatistics {
    pub cells: usize,
    pub boundary_faces: usize,
    /// Faces between two locally owned cells.
    pub interior_faces: usize,
    /// Faces between a locally owned cell and a ghost cell.
    pub ghost_faces: usize,
}

impl AddAssign for LoopStatistics {
    fn add_assign(&mut self, rhs: Self) {
        self.cells += rhs.cells;
        self.boundary_faces += rhs.boundary_faces;
        self.interior_faces += rhs.interior_faces;
        self.ghost_faces += rhs.ghost_faces;
    }
}

/// One side of an interior face.
#[derive(Debug, Copy, Clone)]
struct FaceSide {
    cell: CellId,
    face: usize,
    orientation: FaceOrientation,
}

/// Traverses the locally owned cells of a mesh and assembles cell, boundary and face terms.
#[derive(Debug)]
pub struct MeshLoop<'a, T: Real, M, D> {
    mesh: &'a M,
    dofs: &'a D,
    cache: &'a IntegrationCache<T>,
    control: LoopControl,
}

impl<'a, T, M, D> MeshLoop<'a, T, M, D>
where
    T: Real,
    M: MeshView<T>,
    D: DofMap,
{
    /// Creates a loop after checking that the DoF map and the integration tables describe the
    /// same blocks.
    pub fn try_new(
        mesh: &'a M,
        dofs: &'a D,
        cache: &'a IntegrationCache<T>,
        control: LoopControl,
    ) -> Result<Self, ConfigError> {
        let system = cache.system();
        if dofs.n_blocks() != system.n_blocks() {
            return Err(ConfigError::BlockLayout(format!(
                "the DoF map has {} blocks, but the element system has {}",
                dofs.n_blocks(),
                system.n_blocks()
            )));
        }
        for block in 0..system.n_blocks() {
            if dofs.block_name(block) != system.block_name(block) {
                return Err(ConfigError::BlockLayout(format!(
                    "block {} is named '{}' in the DoF map, but '{}' in the element system",
                    block,
                    dofs.block_name(block),
                    system.block_name(block)
                )));
            }
        }

        Ok(Self {
            mesh,
            dofs,
            cache,
            control,
        })
    }

    pub fn control(&self) -> &LoopControl {
        &self.control
    }

    /// Runs a pass over all locally owned cells.
    ///
    /// On error, the remaining iteration is skipped, the assembler is aborted and the error is
    /// returned. The global storage of the assembler is then undefined.
    pub fn run<I, A>(&self, integrator: &I, assembler: &mut A) -> Result<LoopStatistics, AssemblyError>
    where
        I: LocalIntegrator<T> + ?Sized,
        A: Assembler<T>,
    {
        let cells = self.mesh.locally_owned_cells();
        self.log_start(cells.len());

        let mut workspace = LoopWorkspace::new(assembler);
        let mut statistics = LoopStatistics::default();
        let result = cells.iter().try_for_each(|&cell| {
            self.process_cell(cell, integrator, assembler, &mut workspace, &mut statistics)
        });

        if let Err(err) = result {
            assembler.abort();
            return Err(err);
        }
        debug!("Rank {} finished pass: {:?}", self.mesh.rank(), statistics);
        Ok(statistics)
    }

    /// Runs a pass with the locally owned cells distributed over the threads of the rayon
    /// thread pool.
    ///
    /// Every worker thread assembles into its own partial assembler, and the partials are
    /// joined afterwards. The result matches [`run`](Self::run) up to the order of floating
    /// point summation.
    pub fn run_parallel<I, A>(
        &self,
        integrator: &I,
        assembler: &mut A,
    ) -> Result<LoopStatistics, AssemblyError>
    where
        T: Send + Sync,
        M: Sync,
        D: Sync,
        I: LocalIntegrator<T> + Sync + ?Sized,
        A: ParallelAssembler<T> + Sync,
    {
        let cells = self.mesh.locally_owned_cells();
        self.log_start(cells.len());

        let thread_states: ThreadLocal<RefCell<ThreadState<T, A::Partial>>> = ThreadLocal::new();
        let shared: &A = assembler;
        let result = cells.par_iter().try_for_each(|&cell| {
            let state = thread_states.get_or(|| {
                let partial = shared.fork();
                RefCell::new(ThreadState {
                    workspace: LoopWorkspace::new(&partial),
                    partial,
                    statistics: LoopStatistics::default(),
                })
            });
            let ThreadState {
                workspace,
                partial,
                statistics,
            } = &mut *state.borrow_mut();
            self.process_cell(cell, integrator, partial, workspace, statistics)
        });

        if let Err(err) = result {
            assembler.abort();
            return Err(err);
        }

        let mut statistics = LoopStatistics::default();
        for state in thread_states {
            let state = state.into_inner();
            statistics += state.statistics;
            if let Err(err) = assembler.join(state.partial) {
                assembler.abort();
                return Err(err);
            }
        }
        debug!("Rank {} finished parallel pass: {:?}", self.mesh.rank(), statistics);
        Ok(statistics)
    }

    fn log_start(&self, num_cells: usize) {
        if num_cells == 0 {
            warn!("Rank {} has no locally owned cells to assemble", self.mesh.rank());
        }
        debug!(
            "Rank {} assembling {} cells (cells: {}, faces: {})",
            self.mesh.rank(),
            num_cells,
            self.control.cells,
            self.control.faces
        );
    }

    fn process_cell<I, A>(
        &self,
        cell: CellId,
        integrator: &I,
        assembler: &mut A,
        workspace: &mut LoopWorkspace<T>,
        statistics: &mut LoopStatistics,
    ) -> Result<(), AssemblyError>
    where
        I: LocalIntegrator<T> + ?Sized,
        A: Assembler<T>,
    {
        let cell_terms = self.control.cells && integrator.uses_cells();
        if cell_terms && self.control.cells_first {
            self.cell_term(cell, integrator, assembler, &mut workspace.cell)?;
            statistics.cells += 1;
        }

        if self.control.faces {
            for face in 0..self.mesh.num_faces(cell) {
                match self.mesh.face(cell, face) {
                    FaceKind::Boundary { marker } => {
                        if integrator.uses_boundary() {
                            let info = &mut workspace.cell;
                            self.boundary_term(cell, face, marker, integrator, assembler, info)?;
                            statistics.boundary_faces += 1;
                        }
                    }
                    FaceKind::Interior {
                        neighbor,
                        neighbor_face,
                        orientation,
                    } => {
                        if !integrator.uses_faces() {
                            continue;
                        }
                        let own = FaceSide {
                            cell,
                            face,
                            orientation: FaceOrientation::Standard,
                        };
                        let other = FaceSide {
                            cell: neighbor,
                            face: neighbor_face,
                            orientation,
                        };
                        if let Some(rows) = self.face_rows(cell, neighbor)? {
                            let (first, second) = if cell < neighbor {
                                (own, other)
                            } else {
                                (
                                    FaceSide {
                                        orientation: FaceOrientation::Standard,
                                        ..other
                                    },
                                    FaceSide { orientation, ..own },
                                )
                            };
                            self.face_term(first, second, rows, integrator, assembler, workspace)?;
                            if self.mesh.is_locally_owned(neighbor) {
                                statistics.interior_faces += 1;
                            } else {
                                statistics.ghost_faces += 1;
                            }
                        }
                    }
                }
            }
        }

        if cell_terms && !self.control.cells_first {
            self.cell_term(cell, integrator, assembler, &mut workspace.cell)?;
            statistics.cells += 1;
        }
        Ok(())
    }

    /// Decides whether this rank assembles the face between `cell` and `neighbor` when
    /// visiting `cell`, and which rows it scatters.
    fn face_rows(&self, cell: CellId, neighbor: CellId) -> Result<Option<FaceRows>, AssemblyError> {
        let rank = self.mesh.rank();
        let decision = match self.mesh.ownership(neighbor) {
            Ownership::LocallyOwned => (cell < neighbor).then_some(FaceRows::Both),
            Ownership::Ghost { owner } => match self.control.ghost_faces {
                GhostFaces::LowerRank => (rank < owner).then_some(FaceRows::Both),
                GhostFaces::Split if cell < neighbor => Some(FaceRows::First),
                GhostFaces::Split => Some(FaceRows::Second),
            },
            Ownership::Artificial => {
                return Err(AssemblyError::ArtificialCell { cell: neighbor, rank });
            }
        };
        trace!("Rank {}: face {} | {} -> {:?}", rank, cell, neighbor, decision);
        Ok(decision)
    }

    fn check_layout(&self, info: &LocalInfo<T>) -> Result<(), AssemblyError> {
        let system = self.cache.system();
        let expected = system.n_dofs_per_cell();
        let consistent = info.indices().len() == expected
            && info.blocks().len() == system.n_blocks()
            && info
                .blocks()
                .iter()
                .enumerate()
                .all(|(b, range)| range.block == b && range.len == system.block_element(b).n_dofs());
        if consistent {
            Ok(())
        } else {
            Err(AssemblyError::InvalidBlockLayout {
                cell: info.cell(),
                expected,
                actual: info.indices().len(),
            })
        }
    }

    fn cell_term<I, A>(
        &self,
        cell: CellId,
        integrator: &I,
        assembler: &mut A,
        info: &mut LocalInfo<T>,
    ) -> Result<(), AssemblyError>
    where
        I: LocalIntegrator<T> + ?Sized,
        A: Assembler<T>,
    {
        info.reinit(cell, InfoKind::Cell, self.dofs);
        self.check_layout(info)?;
        let vertices = self.mesh.cell_vertices(cell);
        self.cache.reinit_cell(info.values_mut(), cell, &vertices)?;
        integrator
            .cell(info)
            .map_err(|report| AssemblyError::LocalOperator {
                stage: OperatorStage::Cell,
                cell,
                report,
            })?;
        assembler.assemble_cell(info)
    }

    fn boundary_term<I, A>(
        &self,
        cell: CellId,
        face: usize,
        marker: u32,
        integrator: &I,
        assembler: &mut A,
        info: &mut LocalInfo<T>,
    ) -> Result<(), AssemblyError>
    where
        I: LocalIntegrator<T> + ?Sized,
        A: Assembler<T>,
    {
        info.reinit(cell, InfoKind::Boundary { face, marker }, self.dofs);
        self.check_layout(info)?;
        let vertices = self.mesh.cell_vertices(cell);
        self.cache
            .reinit_boundary(info.values_mut(), cell, &vertices, face)?;
        integrator
            .boundary(info)
            .map_err(|report| AssemblyError::LocalOperator {
                stage: OperatorStage::Boundary,
                cell,
                report,
            })?;
        assembler.assemble_cell(info)
    }

    fn face_term<I, A>(
        &self,
        first: FaceSide,
        second: FaceSide,
        rows: FaceRows,
        integrator: &I,
        assembler: &mut A,
        workspace: &mut LoopWorkspace<T>,
    ) -> Result<(), AssemblyError>
    where
        I: LocalIntegrator<T> + ?Sized,
        A: Assembler<T>,
    {
        for (side, other, info) in [
            (first, second, &mut workspace.first),
            (second, first, &mut workspace.second),
        ] {
            let kind = InfoKind::Face {
                face: side.face,
                neighbor: other.cell,
                neighbor_face: other.face,
                orientation: side.orientation,
            };
            info.reinit_face(side.cell, kind, self.dofs, other.cell);
            self.check_layout(info)?;
            let vertices = self.mesh.cell_vertices(side.cell);
            self.cache
                .reinit_face(info.values_mut(), side.cell, &vertices, side.face, side.orientation)?;
        }

        integrator
            .face(&mut workspace.first, &mut workspace.second)
            .map_err(|report| AssemblyError::LocalOperator {
                stage: OperatorStage::Face,
                cell: first.cell,
                report,
            })?;
        assembler.assemble_face(&workspace.first, &workspace.second, rows)
    }
}
