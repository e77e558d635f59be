//! Quadrature rules for the reference square formed as tensor products of 1D rules.

use crate::univariate::gauss;
use crate::{Error, Rule};

/// A Gauss quadrature rule for the reference square `[-1, 1]^2`.
///
/// The rule has `num_points_per_dim^2` points. The first coordinate varies fastest.
pub fn quadrilateral_gauss(num_points_per_dim: usize) -> Result<Rule<2>, Error> {
    let (weights1d, points1d) = gauss(num_points_per_dim)?;
    let n = weights1d.len();

    let mut weights = Vec::with_capacity(n * n);
    let mut points = Vec::with_capacity(n * n);
    for (wy, [y]) in weights1d.iter().zip(&points1d) {
        for (wx, [x]) in weights1d.iter().zip(&points1d) {
            weights.push(wx * wy);
            points.push([*x, *y]);
        }
    }

    Ok((weights, points))
}
