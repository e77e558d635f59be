use crate::error::ConfigError;
use crate::mesh::{CellId, FaceKind, FaceOrientation, MeshView, Ownership};
use crate::point::Coordinates;
use crate::Real;
use nalgebra::{convert, Point2, Vector2};

/// Boundary marker of the face `x = x_min`.
pub const LEFT_BOUNDARY: u32 = 0;
/// Boundary marker of the face `x = x_max`.
pub const RIGHT_BOUNDARY: u32 = 1;
/// Boundary marker of the face `y = y_min`.
pub const BOTTOM_BOUNDARY: u32 = 2;
/// Boundary marker of the face `y = y_max`.
pub const TOP_BOUNDARY: u32 = 3;

/// A uniform grid of `nx * ny` quadrilaterals over an axis-aligned rectangle.
///
/// Cells are numbered row by row, starting in the lower left corner. The vertex `(i, j)` of
/// the grid has index `j * (nx + 1) + i`. The local faces of every cell are numbered
/// bottom (0), right (1), top (2) and left (3), so that the faces are traversed
/// counter-clockwise.
///
/// A structured mesh is also a serial [`MeshView`] in which rank 0 owns every cell.
#[derive(Debug, Clone, PartialEq)]
pub struct StructuredQuadMesh<T: Real> {
    nx: usize,
    ny: usize,
    vertices: Vec<Point2<T>>,
    cells: Vec<CellId>,
}

impl<T: Real> StructuredQuadMesh<T> {
    /// Creates a mesh of the rectangle spanned by `lower` and `upper`.
    pub fn rectangle(
        lower: &Coordinates,
        upper: &Coordinates,
        nx: usize,
        ny: usize,
    ) -> Result<Self, ConfigError> {
        let lower = lower.to_point2::<T>()?;
        let upper = upper.to_point2::<T>()?;
        if nx == 0 || ny == 0 {
            return Err(ConfigError::EmptyMesh { nx, ny });
        }
        if lower.x >= upper.x || lower.y >= upper.y {
            return Err(ConfigError::DegenerateDomain);
        }

        let extents = upper - lower;
        let hx = extents.x / convert::<_, T>(nx as f64);
        let hy = extents.y / convert::<_, T>(ny as f64);
        let mut vertices = Vec::with_capacity((nx + 1) * (ny + 1));
        for j in 0..=ny {
            for i in 0..=nx {
                let offset = Vector2::new(hx * convert::<_, T>(i as f64), hy * convert::<_, T>(j as f64));
                vertices.push(lower + offset);
            }
        }

        Ok(Self {
            nx,
            ny,
            vertices,
            cells: (0..nx * ny).map(CellId).collect(),
        })
    }

    /// A mesh of `[0, 1]^2` with `cells_per_dim` cells in each direction.
    pub fn unit_square(cells_per_dim: usize) -> Result<Self, ConfigError> {
        Self::rectangle(
            &Coordinates::new_2d(0.0, 0.0),
            &Coordinates::new_2d(1.0, 1.0),
            cells_per_dim,
            cells_per_dim,
        )
    }

    /// Moves every vertex with the given function.
    ///
    /// The topology is unchanged. Transformations that fold cells lead to degenerate cells,
    /// which are reported during integration.
    pub fn transform_vertices(&mut self, mut transform: impl FnMut(&mut Point2<T>)) {
        for v in &mut self.vertices {
            transform(v);
        }
    }

    pub fn nx(&self) -> usize {
        self.nx
    }

    pub fn ny(&self) -> usize {
        self.ny
    }

    pub fn num_cells(&self) -> usize {
        self.nx * self.ny
    }

    pub fn num_vertices(&self) -> usize {
        self.vertices.len()
    }

    pub fn vertices(&self) -> &[Point2<T>] {
        &self.vertices
    }

    pub fn cells(&self) -> &[CellId] {
        &self.cells
    }

    /// The grid coordinates `(i, j)` of a cell.
    ///
    /// # Panics
    ///
    /// Panics if the cell does not belong to the mesh.
    pub fn cell_grid_index(&self, cell: CellId) -> (usize, usize) {
        assert!(cell.0 < self.num_cells(), "Cell {} is not part of the mesh", cell);
        (cell.0 % self.nx, cell.0 / self.nx)
    }

    /// The vertex indices of a cell, in counter-clockwise order starting at the lower left.
    pub fn cell_vertex_indices(&self, cell: CellId) -> [usize; 4] {
        let (i, j) = self.cell_grid_index(cell);
        let v = |i: usize, j: usize| j * (self.nx + 1) + i;
        [v(i, j), v(i + 1, j), v(i + 1, j + 1), v(i, j + 1)]
    }

    /// The adjacent cell with the lowest index of a vertex.
    pub fn lowest_cell_at_vertex(&self, vertex: usize) -> CellId {
        let (i, j) = (vertex % (self.nx + 1), vertex / (self.nx + 1));
        CellId(j.saturating_sub(1).min(self.ny - 1) * self.nx + i.saturating_sub(1).min(self.nx - 1))
    }

    /// The cells sharing a face with the given cell.
    pub fn face_neighbors(&self, cell: CellId) -> impl Iterator<Item = CellId> + '_ {
        (0..4).filter_map(move |f| match self.face_kind(cell, f) {
            FaceKind::Interior { neighbor, .. } => Some(neighbor),
            FaceKind::Boundary { .. } => None,
        })
    }

    pub(crate) fn face_kind(&self, cell: CellId, local_face: usize) -> FaceKind {
        let (i, j) = self.cell_grid_index(cell);
        let interior = |neighbor: usize, neighbor_face: usize| FaceKind::Interior {
            neighbor: CellId(neighbor),
            neighbor_face,
            orientation: FaceOrientation::Reversed,
        };
        match local_face {
            0 if j == 0 => FaceKind::Boundary { marker: BOTTOM_BOUNDARY },
            0 => interior(cell.0 - self.nx, 2),
            1 if i + 1 == self.nx => FaceKind::Boundary { marker: RIGHT_BOUNDARY },
            1 => interior(cell.0 + 1, 3),
            2 if j + 1 == self.ny => FaceKind::Boundary { marker: TOP_BOUNDARY },
            2 => interior(cell.0 + self.nx, 0),
            3 if i == 0 => FaceKind::Boundary { marker: LEFT_BOUNDARY },
            3 => interior(cell.0 - 1, 1),
            _ => panic!("Quadrilateral has no face with local index {}", local_face),
        }
    }

    pub(crate) fn vertices_of(&self, cell: CellId) -> [Point2<T>; 4] {
        self.cell_vertex_indices(cell).map(|v| self.vertices[v])
    }
}

impl<T: Real> MeshView<T> for StructuredQuadMesh<T> {
    fn rank(&self) -> usize {
        0
    }

    fn locally_owned_cells(&self) -> &[CellId] {
        &self.cells
    }

    fn ownership(&self, cell: CellId) -> Ownership {
        if cell.0 < self.num_cells() {
            Ownership::LocallyOwned
        } else {
            Ownership::Artificial
        }
    }

    fn num_faces(&self, _cell: CellId) -> usize {
        4
    }

    fn face(&self, cell: CellId, local_face: usize) -> FaceKind {
        self.face_kind(cell, local_face)
    }

    fn cell_vertices(&self, cell: CellId) -> [Point2<T>; 4] {
        self.vertices_of(cell)
    }
}
