//! Finite elements on the reference square `[-1, 1]^2`.
use crate::Real;
use nalgebra::{Matrix2, Matrix2x4, Point2, Vector2, Vector4};
use numeric_literals::replace_float_literals;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fmt::{Display, Formatter};

/// A scalar finite element on quadrilaterals.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BaseElement {
    /// Discontinuous, piecewise constant.
    Dgp0,
    /// Continuous, bilinear. The basis functions are associated with the cell vertices in
    /// counter-clockwise order starting at the reference corner `(-1, -1)`.
    Q1,
}

impl BaseElement {
    pub fn n_dofs(&self) -> usize {
        match self {
            Self::Dgp0 => 1,
            Self::Q1 => 4,
        }
    }

    /// Whether the element has its degrees of freedom on the cell alone.
    pub fn is_discontinuous(&self) -> bool {
        matches!(self, Self::Dgp0)
    }

    /// Evaluates all basis functions at the reference point `xi`.
    ///
    /// # Panics
    ///
    /// Panics if the length of `basis` is not equal to the number of degrees of freedom.
    #[rustfmt::skip]
    #[replace_float_literals(T::from_f64(literal).expect("Literal must fit in T"))]
    pub fn populate_basis<T: Real>(&self, basis: &mut [T], xi: &Point2<T>) {
        assert_eq!(basis.len(), self.n_dofs(), "Basis buffer has wrong length");
        match self {
            Self::Dgp0 => basis[0] = 1.0,
            Self::Q1 => {
                let phi = |alpha: T, beta: T| (1.0 + alpha * xi[0]) * (1.0 + beta * xi[1]) / 4.0;
                basis[0] = phi(-1.0, -1.0);
                basis[1] = phi( 1.0, -1.0);
                basis[2] = phi( 1.0,  1.0);
                basis[3] = phi(-1.0,  1.0);
            }
        }
    }

    /// Evaluates the gradients of all basis functions with respect to reference coordinates.
    ///
    /// # Panics
    ///
    /// Panics if the length of `gradients` is not equal to the number of degrees of freedom.
    #[rustfmt::skip]
    #[replace_float_literals(T::from_f64(literal).expect("Literal must fit in T"))]
    pub fn populate_reference_gradients<T: Real>(&self, gradients: &mut [Vector2<T>], xi: &Point2<T>) {
        assert_eq!(gradients.len(), self.n_dofs(), "Gradient buffer has wrong length");
        match self {
            Self::Dgp0 => gradients[0] = Vector2::zeros(),
            Self::Q1 => {
                let phi_grad = |alpha: T, beta: T| Vector2::new(
                    alpha * (1.0 + beta * xi[1]) / 4.0,
                    beta * (1.0 + alpha * xi[0]) / 4.0,
                );
                gradients[0] = phi_grad(-1.0, -1.0);
                gradients[1] = phi_grad( 1.0, -1.0);
                gradients[2] = phi_grad( 1.0,  1.0);
                gradients[3] = phi_grad(-1.0,  1.0);
            }
        }
    }
}

impl Display for BaseElement {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::Dgp0 => write!(f, "FE_DGP(0)"),
            Self::Q1 => write!(f, "FE_Q(1)"),
        }
    }
}

/// The bilinear map from the reference square onto a quadrilateral cell.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct QuadGeometry<T: Real> {
    vertices: [Point2<T>; 4],
}

impl<T: Real> QuadGeometry<T> {
    pub fn from_vertices(vertices: [Point2<T>; 4]) -> Self {
        Self { vertices }
    }

    pub fn vertices(&self) -> &[Point2<T>; 4] {
        &self.vertices
    }

    fn vertex_matrix(&self) -> Matrix2x4<T> {
        Matrix2x4::from_fn(|i, j| self.vertices[j][i])
    }

    #[allow(non_snake_case)]
    pub fn map_reference_coords(&self, xi: &Point2<T>) -> Point2<T> {
        let mut N = [T::zero(); 4];
        BaseElement::Q1.populate_basis(&mut N, xi);
        let X = self.vertex_matrix();
        Point2::from(X * Vector4::from(N))
    }

    /// The Jacobian of the reference map, `J_ij = d x_i / d xi_j`.
    #[allow(non_snake_case)]
    pub fn reference_jacobian(&self, xi: &Point2<T>) -> Matrix2<T> {
        let mut G = [Vector2::zeros(); 4];
        BaseElement::Q1.populate_reference_gradients(&mut G, xi);
        let X = self.vertex_matrix();
        let G = Matrix2x4::from_columns(&G);
        X * G.transpose()
    }
}

/// A named component of an [`FeSystem`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeBlock {
    pub name: String,
    pub element: BaseElement,
}

/// A composite element made up of named blocks.
///
/// The degrees of freedom of a cell are ordered block by block, in the order the blocks were
/// added to the system.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeSystem {
    blocks: Vec<FeBlock>,
}

impl FeSystem {
    pub fn new() -> Self {
        Self::default()
    }

    /// A system with a single block.
    pub fn single(name: impl Into<String>, element: BaseElement) -> Self {
        Self::new().with_block(name, element)
    }

    pub fn with_block(mut self, name: impl Into<String>, element: BaseElement) -> Self {
        self.blocks.push(FeBlock {
            name: name.into(),
            element,
        });
        self
    }

    pub fn n_blocks(&self) -> usize {
        self.blocks.len()
    }

    pub fn blocks(&self) -> &[FeBlock] {
        &self.blocks
    }

    /// # Panics
    ///
    /// Panics if the block index is out of bounds.
    pub fn block_element(&self, block: usize) -> BaseElement {
        self.blocks[block].element
    }

    pub fn block_name(&self, block: usize) -> &str {
        &self.blocks[block].name
    }

    pub fn find_block(&self, name: &str) -> Option<usize> {
        self.blocks.iter().position(|block| block.name == name)
    }

    pub fn n_dofs_per_cell(&self) -> usize {
        self.blocks.iter().map(|block| block.element.n_dofs()).sum()
    }
}
