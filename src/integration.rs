//! Precomputed reference data and per-cell integration values.
//!
//! An [`IntegrationCache`] evaluates the basis functions of every block of an [`FeSystem`] at
//! the reference quadrature points once. During traversal, only quantities that depend on the
//! geometry of the current cell (mapped points, Jacobians, integration weights, normals and
//! mapped gradients) are computed into an [`FeValues`] buffer.
use crate::element::{FeSystem, QuadGeometry};
use crate::error::{AssemblyError, ConfigError};
use crate::mesh::{CellId, FaceOrientation};
use crate::quadrature::{line_gauss, quad_gauss};
use crate::Real;
use bitflags::bitflags;
use itertools::izip;
use nalgebra::{DMatrix, Matrix2, Point2, Vector2};
use serde::{Deserialize, Serialize};

bitflags! {
    /// The quantities an [`FeValues`] buffer should provide.
    #[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct UpdateFlags: u32 {
        /// Basis function values.
        const VALUES = 1;
        /// Basis function gradients in physical coordinates.
        const GRADIENTS = 1 << 1;
        /// Jacobians of the reference map.
        const JACOBIANS = 1 << 2;
        /// Quadrature weights multiplied by the Jacobian determinant (or the face length element).
        const JXW = 1 << 3;
        /// Quadrature points in physical coordinates.
        const QUADRATURE_POINTS = 1 << 4;
        /// Outward unit normals. Only available on faces.
        const NORMALS = 1 << 5;
    }
}

/// Quadrature orders and update flags for cells, boundary faces and interior faces.
///
/// The number of points is given per direction, so a cell is integrated with
/// `cell_points^2` points and a face with `face_points` points.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IntegrationConfig {
    pub cell_points: usize,
    pub boundary_points: usize,
    pub face_points: usize,
    pub cell_flags: UpdateFlags,
    pub boundary_flags: UpdateFlags,
    pub face_flags: UpdateFlags,
}

impl Default for IntegrationConfig {
    fn default() -> Self {
        Self {
            cell_points: 2,
            boundary_points: 2,
            face_points: 2,
            cell_flags: UpdateFlags::VALUES | UpdateFlags::GRADIENTS | UpdateFlags::JXW,
            boundary_flags: UpdateFlags::VALUES | UpdateFlags::JXW | UpdateFlags::NORMALS,
            face_flags: UpdateFlags::VALUES | UpdateFlags::JXW | UpdateFlags::NORMALS,
        }
    }
}

impl IntegrationConfig {
    /// Uses the same number of points per direction everywhere.
    pub fn with_points(self, num_points: usize) -> Self {
        self.with_cell_points(num_points)
            .with_boundary_points(num_points)
            .with_face_points(num_points)
    }

    pub fn with_cell_points(self, cell_points: usize) -> Self {
        Self { cell_points, ..self }
    }

    pub fn with_boundary_points(self, boundary_points: usize) -> Self {
        Self {
            boundary_points,
            ..self
        }
    }

    pub fn with_face_points(self, face_points: usize) -> Self {
        Self { face_points, ..self }
    }

    pub fn with_cell_flags(self, cell_flags: UpdateFlags) -> Self {
        Self { cell_flags, ..self }
    }

    pub fn with_boundary_flags(self, boundary_flags: UpdateFlags) -> Self {
        Self { boundary_flags, ..self }
    }

    pub fn with_face_flags(self, face_flags: UpdateFlags) -> Self {
        Self { face_flags, ..self }
    }
}

/// Reference data for one kind of integration domain.
#[derive(Debug, Clone)]
struct ReferenceTable<T: Real> {
    flags: UpdateFlags,
    weights: Vec<T>,
    points: Vec<Point2<T>>,
    /// Reference direction of a face in the standard orientation, if the table is for a face.
    tangent: Option<Vector2<T>>,
    /// Per block, `n_q x n_dofs`.
    values: Vec<DMatrix<T>>,
    /// Per block, reference gradients stored point by point.
    gradients: Vec<Vec<Vector2<T>>>,
}

impl<T: Real> ReferenceTable<T> {
    fn new(
        system: &FeSystem,
        flags: UpdateFlags,
        weights: Vec<T>,
        points: Vec<Point2<T>>,
        tangent: Option<Vector2<T>>,
    ) -> Self {
        let mut values = Vec::with_capacity(system.n_blocks());
        let mut gradients = Vec::with_capacity(system.n_blocks());
        for block in system.blocks() {
            let n = block.element.n_dofs();
            let mut block_values = DMatrix::zeros(points.len(), n);
            let mut block_gradients = vec![Vector2::zeros(); points.len() * n];
            let mut phi = vec![T::zero(); n];
            for (q, xi) in points.iter().enumerate() {
                block.element.populate_basis(&mut phi, xi);
                block_values.row_mut(q).copy_from_slice(&phi);
                block
                    .element
                    .populate_reference_gradients(&mut block_gradients[q * n..(q + 1) * n], xi);
            }
            values.push(block_values);
            gradients.push(block_gradients);
        }

        Self {
            flags,
            weights,
            points,
            tangent,
            values,
            gradients,
        }
    }
}

/// The midpoint and the standard direction of the local face `face` of the reference square.
fn reference_face<T: Real>(face: usize) -> (Point2<T>, Vector2<T>) {
    let (one, zero) = (T::one(), T::zero());
    match face {
        0 => (Point2::new(zero, -one), Vector2::new(one, zero)),
        1 => (Point2::new(one, zero), Vector2::new(zero, one)),
        2 => (Point2::new(zero, one), Vector2::new(-one, zero)),
        3 => (Point2::new(-one, zero), Vector2::new(zero, -one)),
        _ => panic!("Quadrilateral has no face with local index {}", face),
    }
}

/// Reference tables for all cells and faces of an [`FeSystem`].
#[derive(Debug, Clone)]
pub struct IntegrationCache<T: Real> {
    system: FeSystem,
    config: IntegrationConfig,
    cell: ReferenceTable<T>,
    /// Indexed by local face.
    boundary: Vec<ReferenceTable<T>>,
    /// Indexed by local face, then by orientation (standard, reversed).
    faces: Vec<[ReferenceTable<T>; 2]>,
}

impl<T: Real> IntegrationCache<T> {
    pub fn new(system: &FeSystem, config: &IntegrationConfig) -> Result<Self, ConfigError> {
        if system.n_blocks() == 0 {
            return Err(ConfigError::BlockLayout("the element system has no blocks".to_string()));
        }
        if config.cell_flags.contains(UpdateFlags::NORMALS) {
            return Err(ConfigError::UnsupportedFlags {
                flags: UpdateFlags::NORMALS,
                target: "cells",
            });
        }

        let cell_rule = quad_gauss::<T>(config.cell_points, "cells")?;
        let cell = ReferenceTable::new(
            system,
            config.cell_flags,
            cell_rule.weights().to_vec(),
            cell_rule.points().to_vec(),
            None,
        );

        let face_table = |flags: UpdateFlags,
                          num_points: usize,
                          target: &'static str,
                          face: usize,
                          reversed: bool| {
            let rule = line_gauss::<T>(num_points, target)?;
            let (midpoint, tangent) = reference_face::<T>(face);
            let points = rule
                .points()
                .iter()
                .map(|s| {
                    let s = if reversed { -s.x } else { s.x };
                    midpoint + tangent * s
                })
                .collect();
            Ok::<_, ConfigError>(ReferenceTable::new(
                system,
                flags,
                rule.weights().to_vec(),
                points,
                Some(tangent),
            ))
        };

        let mut boundary = Vec::with_capacity(4);
        let mut faces = Vec::with_capacity(4);
        for face in 0..4 {
            boundary.push(face_table(
                config.boundary_flags,
                config.boundary_points,
                "boundary faces",
                face,
                false,
            )?);
            faces.push([
                face_table(config.face_flags, config.face_points, "interior faces", face, false)?,
                face_table(config.face_flags, config.face_points, "interior faces", face, true)?,
            ]);
        }

        Ok(Self {
            system: system.clone(),
            config: config.clone(),
            cell,
            boundary,
            faces,
        })
    }

    pub fn system(&self) -> &FeSystem {
        &self.system
    }

    pub fn config(&self) -> &IntegrationConfig {
        &self.config
    }

    /// Fills `values` for the interior of a cell.
    pub fn reinit_cell(
        &self,
        values: &mut FeValues<T>,
        cell: CellId,
        vertices: &[Point2<T>; 4],
    ) -> Result<(), AssemblyError> {
        values.fill(&self.cell, cell, vertices)
    }

    /// Fills `values` for a face of a cell on the domain boundary.
    pub fn reinit_boundary(
        &self,
        values: &mut FeValues<T>,
        cell: CellId,
        vertices: &[Point2<T>; 4],
        face: usize,
    ) -> Result<(), AssemblyError> {
        values.fill(&self.boundary[face], cell, vertices)
    }

    /// Fills `values` for an interior face seen from one of its cells.
    ///
    /// With [`FaceOrientation::Reversed`] the quadrature points are traversed in the opposite
    /// direction, so that the points of the two sides of a face coincide.
    pub fn reinit_face(
        &self,
        values: &mut FeValues<T>,
        cell: CellId,
        vertices: &[Point2<T>; 4],
        face: usize,
        orientation: FaceOrientation,
    ) -> Result<(), AssemblyError> {
        let table = match orientation {
            FaceOrientation::Standard => &self.faces[face][0],
            FaceOrientation::Reversed => &self.faces[face][1],
        };
        values.fill(table, cell, vertices)
    }
}

/// Integration values for one cell or one side of a face.
///
/// Only the quantities requested through [`UpdateFlags`] are available. Accessing anything
/// else panics.
#[derive(Debug, Clone)]
pub struct FeValues<T: Real> {
    flags: UpdateFlags,
    quadrature_points: Vec<Point2<T>>,
    jxw: Vec<T>,
    jacobians: Vec<Matrix2<T>>,
    normals: Vec<Vector2<T>>,
    values: Vec<DMatrix<T>>,
    gradients: Vec<Vec<Vector2<T>>>,
    n_points: usize,
}

impl<T: Real> Default for FeValues<T> {
    fn default() -> Self {
        Self {
            flags: UpdateFlags::empty(),
            quadrature_points: Vec::new(),
            jxw: Vec::new(),
            jacobians: Vec::new(),
            normals: Vec::new(),
            values: Vec::new(),
            gradients: Vec::new(),
            n_points: 0,
        }
    }
}

impl<T: Real> FeValues<T> {
    pub fn flags(&self) -> UpdateFlags {
        self.flags
    }

    pub fn n_quadrature_points(&self) -> usize {
        self.n_points
    }

    pub fn quadrature_points(&self) -> &[Point2<T>] {
        assert!(self.flags.contains(UpdateFlags::QUADRATURE_POINTS), "Quadrature points were not requested");
        &self.quadrature_points
    }

    pub fn jxw(&self) -> &[T] {
        assert!(self.flags.contains(UpdateFlags::JXW), "JxW values were not requested");
        &self.jxw
    }

    pub fn jacobians(&self) -> &[Matrix2<T>] {
        assert!(self.flags.contains(UpdateFlags::JACOBIANS), "Jacobians were not requested");
        &self.jacobians
    }

    pub fn normals(&self) -> &[Vector2<T>] {
        assert!(self.flags.contains(UpdateFlags::NORMALS), "Normals were not requested");
        &self.normals
    }

    /// Basis function values of a block, with one row per quadrature point.
    pub fn values(&self, block: usize) -> &DMatrix<T> {
        assert!(self.flags.contains(UpdateFlags::VALUES), "Values were not requested");
        &self.values[block]
    }

    /// Value of basis function `i` of a block at quadrature point `q`.
    pub fn value(&self, block: usize, q: usize, i: usize) -> T {
        self.values(block)[(q, i)]
    }

    /// Physical gradient of basis function `i` of a block at quadrature point `q`.
    pub fn gradient(&self, block: usize, q: usize, i: usize) -> &Vector2<T> {
        assert!(self.flags.contains(UpdateFlags::GRADIENTS), "Gradients were not requested");
        let n = self.values[block].ncols();
        &self.gradients[block][q * n + i]
    }

    fn fill(
        &mut self,
        table: &ReferenceTable<T>,
        cell: CellId,
        vertices: &[Point2<T>; 4],
    ) -> Result<(), AssemblyError> {
        let flags = table.flags;
        let geometry = QuadGeometry::from_vertices(*vertices);
        let n_q = table.points.len();

        self.flags = flags;
        self.n_points = n_q;
        self.quadrature_points.clear();
        self.jxw.clear();
        self.jacobians.clear();
        self.normals.clear();
        self.values.clone_from(&table.values);
        self.gradients.resize_with(table.gradients.len(), Vec::new);
        for (mapped, reference) in self.gradients.iter_mut().zip(&table.gradients) {
            mapped.clear();
            mapped.reserve(reference.len());
        }

        for (q, (w, xi)) in izip!(&table.weights, &table.points).enumerate() {
            let j = geometry.reference_jacobian(xi);
            let det = j.determinant();
            if det <= T::zero() {
                return Err(AssemblyError::DegenerateCell { cell });
            }

            if flags.contains(UpdateFlags::QUADRATURE_POINTS) {
                self.quadrature_points.push(geometry.map_reference_coords(xi));
            }
            if flags.contains(UpdateFlags::JACOBIANS) {
                self.jacobians.push(j);
            }

            match table.tangent {
                None => {
                    if flags.contains(UpdateFlags::JXW) {
                        self.jxw.push(*w * det);
                    }
                }
                Some(reference_tangent) => {
                    let t = j * reference_tangent;
                    let length = t.norm();
                    if flags.contains(UpdateFlags::JXW) {
                        self.jxw.push(*w * length);
                    }
                    if flags.contains(UpdateFlags::NORMALS) {
                        self.normals.push(Vector2::new(t.y, -t.x) / length);
                    }
                }
            }

            if flags.contains(UpdateFlags::GRADIENTS) {
                let j_inv_t = j
                    .try_inverse()
                    .ok_or(AssemblyError::DegenerateCell { cell })?
                    .transpose();
                for (mapped, reference) in self.gradients.iter_mut().zip(&table.gradients) {
                    let n = reference.len() / n_q;
                    mapped.extend(reference[q * n..(q + 1) * n].iter().map(|g| j_inv_t * g));
                }
            }
        }

        Ok(())
    }
}
