use meshworker::assembly::{
    GhostFaces, InfoKind, LocalInfo, LocalIntegrator, LoopControl, LoopStatistics, MatrixAssembler, MeshLoop,
    ResidualAssembler,
};
use meshworker::dofs::{DofMap, StructuredDofMap};
use meshworker::element::{BaseElement, FeSystem};
use meshworker::error::{AssemblyError, ConfigError};
use meshworker::integration::{IntegrationCache, IntegrationConfig, UpdateFlags};
use meshworker::mesh::{
    CellId, CellPartition, DistributedQuadMesh, FaceKind, FaceOrientation, MeshView, Ownership,
    StructuredQuadMesh,
};
use nalgebra::{DMatrix, DVector, Point2};
use std::cell::RefCell;
use std::collections::BTreeSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Event {
    Cell(CellId),
    Boundary(CellId, usize),
    Face(CellId, CellId),
}

/// Records every operator invocation.
#[derive(Default)]
struct Recorder {
    events: RefCell<Vec<Event>>,
}

impl Recorder {
    fn events(&self) -> Vec<Event> {
        self.events.borrow().clone()
    }
}

impl LocalIntegrator<f64> for Recorder {
    fn cell(&self, info: &mut LocalInfo<f64>) -> eyre::Result<()> {
        assert_eq!(info.kind(), InfoKind::Cell);
        self.events.borrow_mut().push(Event::Cell(info.cell()));
        Ok(())
    }

    fn boundary(&self, info: &mut LocalInfo<f64>) -> eyre::Result<()> {
        match info.kind() {
            InfoKind::Boundary { face, .. } => {
                self.events.borrow_mut().push(Event::Boundary(info.cell(), face))
            }
            kind => panic!("Boundary operator called with {:?}", kind),
        }
        Ok(())
    }

    fn face(&self, first: &mut LocalInfo<f64>, second: &mut LocalInfo<f64>) -> eyre::Result<()> {
        match (first.kind(), second.kind()) {
            (
                InfoKind::Face {
                    neighbor, orientation, ..
                },
                InfoKind::Face {
                    neighbor: second_neighbor,
                    orientation: second_orientation,
                    ..
                },
            ) => {
                assert_eq!(neighbor, second.cell());
                assert_eq!(second_neighbor, first.cell());
                assert_eq!(orientation, FaceOrientation::Standard);
                assert_eq!(second_orientation, FaceOrientation::Reversed);
            }
            kinds => panic!("Face operator called with {:?}", kinds),
        }
        self.events
            .borrow_mut()
            .push(Event::Face(first.cell(), second.cell()));
        Ok(())
    }
}

fn dg_setup(cells_per_dim: usize) -> (StructuredQuadMesh<f64>, StructuredDofMap, IntegrationCache<f64>) {
    let mesh = StructuredQuadMesh::unit_square(cells_per_dim).unwrap();
    let system = FeSystem::single("p", BaseElement::Dgp0);
    let partition = CellPartition::contiguous(mesh.num_cells(), 1).unwrap();
    let dofs = StructuredDofMap::new(&mesh, &system, &partition).unwrap();
    let cache = IntegrationCache::new(&system, &IntegrationConfig::default()).unwrap();
    (mesh, dofs, cache)
}

fn zero_matrix(dofs: &StructuredDofMap) -> MatrixAssembler<f64, DMatrix<f64>> {
    MatrixAssembler::new(DMatrix::zeros(dofs.n_dofs(), dofs.n_dofs()))
}

#[test]
fn every_face_is_visited_once() {
    let (mesh, dofs, cache) = dg_setup(4);
    let recorder = Recorder::default();
    let statistics = MeshLoop::try_new(&mesh, &dofs, &cache, LoopControl::default())
        .unwrap()
        .run(&recorder, &mut zero_matrix(&dofs))
        .unwrap();

    assert_eq!(
        statistics,
        LoopStatistics {
            cells: 16,
            boundary_faces: 16,
            interior_faces: 24,
            ghost_faces: 0
        }
    );

    let events = recorder.events();
    let faces: BTreeSet<_> = events
        .iter()
        .filter_map(|event| match *event {
            Event::Face(first, second) => Some((first, second)),
            _ => None,
        })
        .collect();
    assert_eq!(faces.len(), 24);
    assert!(faces.iter().all(|(first, second)| first < second));

    let cells: Vec<_> = events
        .iter()
        .filter_map(|event| match *event {
            Event::Cell(cell) => Some(cell),
            _ => None,
        })
        .collect();
    assert_eq!(cells, mesh.cells());
}

#[test]
fn single_cell_mesh() {
    let (mesh, dofs, cache) = dg_setup(1);
    let recorder = Recorder::default();
    let statistics = MeshLoop::try_new(&mesh, &dofs, &cache, LoopControl::default())
        .unwrap()
        .run(&recorder, &mut zero_matrix(&dofs))
        .unwrap();
    assert_eq!(statistics.cells, 1);
    assert_eq!(statistics.boundary_faces, 4);
    assert_eq!(statistics.interior_faces + statistics.ghost_faces, 0);
    assert_eq!(
        recorder.events(),
        vec![
            Event::Cell(CellId(0)),
            Event::Boundary(CellId(0), 0),
            Event::Boundary(CellId(0), 1),
            Event::Boundary(CellId(0), 2),
            Event::Boundary(CellId(0), 3)
        ]
    );
}

#[test]
fn cell_terms_can_follow_face_terms() {
    let (mesh, dofs, cache) = dg_setup(2);
    let recorder = Recorder::default();
    let control = LoopControl::default().with_cells_first(false);
    MeshLoop::try_new(&mesh, &dofs, &cache, control)
        .unwrap()
        .run(&recorder, &mut zero_matrix(&dofs))
        .unwrap();

    let events = recorder.events();
    // Cell 0 has two boundary faces and two faces to the cells 1 and 2
    assert_eq!(
        &events[..5],
        &[
            Event::Boundary(CellId(0), 0),
            Event::Face(CellId(0), CellId(1)),
            Event::Face(CellId(0), CellId(2)),
            Event::Boundary(CellId(0), 3),
            Event::Cell(CellId(0))
        ]
    );
}

#[test]
fn terms_can_be_disabled() {
    let (mesh, dofs, cache) = dg_setup(3);

    let recorder = Recorder::default();
    let control = LoopControl::default().with_faces(false);
    let statistics = MeshLoop::try_new(&mesh, &dofs, &cache, control)
        .unwrap()
        .run(&recorder, &mut zero_matrix(&dofs))
        .unwrap();
    assert_eq!(statistics.cells, 9);
    assert!(recorder
        .events()
        .iter()
        .all(|event| matches!(event, Event::Cell(_))));

    let recorder = Recorder::default();
    let control = LoopControl::default().with_cells(false);
    let statistics = MeshLoop::try_new(&mesh, &dofs, &cache, control)
        .unwrap()
        .run(&recorder, &mut zero_matrix(&dofs))
        .unwrap();
    assert_eq!(statistics.cells, 0);
    assert_eq!(statistics.boundary_faces, 12);
    assert_eq!(statistics.interior_faces, 12);
}

#[test]
fn integrators_can_opt_out_of_terms() {
    struct CellsOnly;

    impl LocalIntegrator<f64> for CellsOnly {
        fn cell(&self, _info: &mut LocalInfo<f64>) -> eyre::Result<()> {
            Ok(())
        }

        fn face(&self, _first: &mut LocalInfo<f64>, _second: &mut LocalInfo<f64>) -> eyre::Result<()> {
            panic!("Face operator must not be called");
        }

        fn uses_boundary(&self) -> bool {
            false
        }

        fn uses_faces(&self) -> bool {
            false
        }
    }

    let (mesh, dofs, cache) = dg_setup(3);
    let statistics = MeshLoop::try_new(&mesh, &dofs, &cache, LoopControl::default())
        .unwrap()
        .run(&CellsOnly, &mut zero_matrix(&dofs))
        .unwrap();
    assert_eq!(
        statistics,
        LoopStatistics {
            cells: 9,
            ..LoopStatistics::default()
        }
    );
}

#[test]
fn loop_requires_consistent_blocks() {
    let (mesh, dofs, _) = dg_setup(2);
    let other = FeSystem::single("u", BaseElement::Q1);
    let cache = IntegrationCache::<f64>::new(&other, &IntegrationConfig::default()).unwrap();
    assert!(matches!(
        MeshLoop::try_new(&mesh, &dofs, &cache, LoopControl::default()),
        Err(ConfigError::BlockLayout(_))
    ));

    let two_blocks = FeSystem::single("p", BaseElement::Dgp0).with_block("u", BaseElement::Q1);
    let cache = IntegrationCache::<f64>::new(&two_blocks, &IntegrationConfig::default()).unwrap();
    assert!(matches!(
        MeshLoop::try_new(&mesh, &dofs, &cache, LoopControl::default()),
        Err(ConfigError::BlockLayout(_))
    ));
}

#[test]
fn both_sides_see_the_same_face_points() {
    struct SamePoints;

    impl LocalIntegrator<f64> for SamePoints {
        fn cell(&self, _info: &mut LocalInfo<f64>) -> eyre::Result<()> {
            Ok(())
        }

        fn face(&self, first: &mut LocalInfo<f64>, second: &mut LocalInfo<f64>) -> eyre::Result<()> {
            let (a, b) = (first.values(), second.values());
            for (x, y) in a.quadrature_points().iter().zip(b.quadrature_points()) {
                eyre::ensure!((x - y).norm() < 1e-13, "Face points differ: {} vs {}", x, y);
            }
            for (n, m) in a.normals().iter().zip(b.normals()) {
                eyre::ensure!((n + m).norm() < 1e-13, "Normals are not opposite");
            }
            Ok(())
        }
    }

    let mut mesh = StructuredQuadMesh::unit_square(3).unwrap();
    mesh.transform_vertices(|v| {
        v.y += 0.1 * v.x * v.x;
        v.x += 0.05 * v.y;
    });
    let system = FeSystem::single("p", BaseElement::Dgp0);
    let dofs = StructuredDofMap::new(&mesh, &system, &CellPartition::contiguous(9, 1).unwrap()).unwrap();
    let flags = UpdateFlags::QUADRATURE_POINTS | UpdateFlags::NORMALS | UpdateFlags::JXW;
    let config = IntegrationConfig::default().with_face_points(3).with_face_flags(flags);
    let cache = IntegrationCache::new(&system, &config).unwrap();
    let statistics = MeshLoop::try_new(&mesh, &dofs, &cache, LoopControl::default())
        .unwrap()
        .run(&SamePoints, &mut zero_matrix(&dofs))
        .unwrap();
    assert_eq!(statistics.interior_faces, 12);
}

#[test]
fn folded_cells_are_reported() {
    let (mut mesh, dofs, cache) = dg_setup(2);
    // Move the center vertex beyond the lower left corner
    mesh.transform_vertices(|v| {
        if (*v - Point2::new(0.5, 0.5)).norm() < 1e-12 {
            *v = Point2::new(-0.5, -0.5);
        }
    });
    let mut assembler = zero_matrix(&dofs);
    let result = MeshLoop::try_new(&mesh, &dofs, &cache, LoopControl::default())
        .unwrap()
        .run(&Recorder::default(), &mut assembler);
    assert!(matches!(result, Err(AssemblyError::DegenerateCell { cell: CellId(0) })));
    assert!(assembler.is_aborted());
}

/// A view that has lost its ghost layer.
struct WithoutGhosts<'a>(DistributedQuadMesh<'a, f64>);

impl<'a> MeshView<f64> for WithoutGhosts<'a> {
    fn rank(&self) -> usize {
        self.0.rank()
    }

    fn locally_owned_cells(&self) -> &[CellId] {
        self.0.locally_owned_cells()
    }

    fn ownership(&self, cell: CellId) -> Ownership {
        match self.0.ownership(cell) {
            Ownership::Ghost { .. } => Ownership::Artificial,
            ownership => ownership,
        }
    }

    fn num_faces(&self, cell: CellId) -> usize {
        self.0.num_faces(cell)
    }

    fn face(&self, cell: CellId, local_face: usize) -> FaceKind {
        self.0.face(cell, local_face)
    }

    fn cell_vertices(&self, cell: CellId) -> [Point2<f64>; 4] {
        self.0.cell_vertices(cell)
    }
}

#[test]
fn artificial_neighbors_are_an_error() {
    let (mesh, dofs, cache) = dg_setup(4);
    let partition = CellPartition::contiguous(16, 2).unwrap();
    let view = WithoutGhosts(DistributedQuadMesh::new(&mesh, &partition, 0).unwrap());
    let result = MeshLoop::try_new(&view, &dofs, &cache, LoopControl::default())
        .unwrap()
        .run(&Recorder::default(), &mut zero_matrix(&dofs));
    assert!(matches!(
        result,
        Err(AssemblyError::ArtificialCell { cell: CellId(8), rank: 0 })
    ));
}

#[test]
fn ghost_face_policies() {
    let (mesh, dofs, cache) = dg_setup(4);
    let partition = CellPartition::contiguous(16, 2).unwrap();

    let statistics = |policy: GhostFaces, rank: usize| {
        let view = DistributedQuadMesh::new(&mesh, &partition, rank).unwrap();
        let control = LoopControl::default().with_ghost_faces(policy);
        MeshLoop::try_new(&view, &dofs, &cache, control)
            .unwrap()
            .run(&Recorder::default(), &mut zero_matrix(&dofs))
            .unwrap()
    };

    for rank in 0..2 {
        let split = statistics(GhostFaces::Split, rank);
        assert_eq!(split.cells, 8);
        assert_eq!(split.boundary_faces, 8);
        assert_eq!(split.interior_faces, 10);
        assert_eq!(split.ghost_faces, 4);
    }
    assert_eq!(statistics(GhostFaces::LowerRank, 0).ghost_faces, 4);
    assert_eq!(statistics(GhostFaces::LowerRank, 1).ghost_faces, 0);
}

#[test]
fn parallel_pass_matches_serial_pass() {
    let mesh = StructuredQuadMesh::<f64>::unit_square(6).unwrap();
    let system = FeSystem::single("p", BaseElement::Dgp0).with_block("u", BaseElement::Q1);
    let dofs = StructuredDofMap::new(&mesh, &system, &CellPartition::contiguous(36, 1).unwrap()).unwrap();
    let cache = IntegrationCache::new(&system, &IntegrationConfig::default()).unwrap();
    let mesh_loop = MeshLoop::try_new(&mesh, &dofs, &cache, LoopControl::default()).unwrap();

    struct Ones;

    impl LocalIntegrator<f64> for Ones {
        fn cell(&self, info: &mut LocalInfo<f64>) -> eyre::Result<()> {
            info.vectors_mut().for_each(|v| v.vector.fill(1.0));
            Ok(())
        }

        fn boundary(&self, info: &mut LocalInfo<f64>) -> eyre::Result<()> {
            info.vectors_mut().for_each(|v| v.vector.fill(2.0));
            Ok(())
        }

        fn face(&self, first: &mut LocalInfo<f64>, second: &mut LocalInfo<f64>) -> eyre::Result<()> {
            first.vectors_mut().for_each(|v| v.vector.fill(3.0));
            second.vectors_mut().for_each(|v| v.vector.fill(-1.0));
            Ok(())
        }
    }

    let mut serial = ResidualAssembler::new(DVector::zeros(dofs.n_dofs()));
    let serial_statistics = mesh_loop.run(&Ones, &mut serial).unwrap();
    let mut parallel = ResidualAssembler::new(DVector::zeros(dofs.n_dofs()));
    let parallel_statistics = mesh_loop.run_parallel(&Ones, &mut parallel).unwrap();

    assert_eq!(serial_statistics, parallel_statistics);
    assert_eq!(serial.vector(), parallel.vector());
}

#[test]
fn loop_control_from_json() {
    let control: LoopControl = serde_json::from_str("{}").unwrap();
    assert_eq!(control, LoopControl::default());
    assert!(control.cells && control.faces && control.cells_first);
    assert_eq!(control.ghost_faces, GhostFaces::Split);

    let json = r#"{ "faces": false, "ghost_faces": "LowerRank" }"#;
    let control: LoopControl = serde_json::from_str(json).unwrap();
    assert_eq!(
        control,
        LoopControl::default()
            .with_faces(false)
            .with_ghost_faces(GhostFaces::LowerRank)
    );
}
