//! Quadrature rules in the scalar type of the computation.
use crate::error::ConfigError;
use crate::Real;
use meshworker_quadrature as mq;
use nalgebra::{convert, Point1, Point2};

/// A quadrature rule with weights and points in the scalar type `T`.
#[derive(Debug, Clone, PartialEq)]
pub struct Quadrature<T: Real, P> {
    weights: Vec<T>,
    points: Vec<P>,
}

pub type LineQuadrature<T> = Quadrature<T, Point1<T>>;
pub type QuadQuadrature<T> = Quadrature<T, Point2<T>>;

impl<T: Real, P> Quadrature<T, P> {
    pub fn weights(&self) -> &[T] {
        &self.weights
    }

    pub fn points(&self) -> &[P] {
        &self.points
    }

    pub fn len(&self) -> usize {
        self.weights.len()
    }

    pub fn is_empty(&self) -> bool {
        self.weights.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&T, &P)> {
        self.weights.iter().zip(&self.points)
    }
}

fn empty_rule(target: &'static str) -> impl FnOnce(mq::Error) -> ConfigError {
    move |_| ConfigError::EmptyQuadrature { target }
}

/// Gauss-Legendre quadrature on `[-1, 1]`, used on faces.
pub fn line_gauss<T: Real>(
    num_points: usize,
    target: &'static str,
) -> Result<LineQuadrature<T>, ConfigError> {
    let (weights, points) = mq::univariate::gauss(num_points).map_err(empty_rule(target))?;
    Ok(Quadrature {
        weights: weights.into_iter().map(convert).collect(),
        points: points.into_iter().map(|[x]| Point1::new(convert(x))).collect(),
    })
}

/// Tensor-product Gauss quadrature on `[-1, 1]^2`, used on cells.
pub fn quad_gauss<T: Real>(
    num_points_per_dim: usize,
    target: &'static str,
) -> Result<QuadQuadrature<T>, ConfigError> {
    let (weights, points) = mq::tensor::quadrilateral_gauss(num_points_per_dim).map_err(empty_rule(target))?;
    Ok(Quadrature {
        weights: weights.into_iter().map(convert).collect(),
        points: points
            .into_iter()
            .map(|[x, y]| Point2::new(convert(x), convert(y)))
            .collect(),
    })
}
