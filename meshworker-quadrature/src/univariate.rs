//! Quadrature rules for the one-dimensional domain `[-1, 1]`.

use crate::{Error, Rule};
use nalgebra::{DMatrix, SymmetricEigen};

/// The off-diagonal entry `k` of the Jacobi matrix associated with Legendre polynomials.
fn legendre_recurrence_coefficient(k: usize) -> f64 {
    let k = k as f64;
    k / (4.0 * k * k - 1.0).sqrt()
}

/// Gauss-Legendre quadrature for the reference interval `[-1, 1]`.
///
/// Given `n` points, the rule integrates polynomials of degree up to `2 n - 1` exactly.
/// The nodes are the eigenvalues of the symmetric tridiagonal Jacobi matrix of the Legendre
/// recurrence, and the weights are given by the first components of the normalized
/// eigenvectors (Golub-Welsch). Points are returned in ascending order and the rule is exactly
/// symmetric around the origin.
///
/// Returns an error if zero points are requested.
pub fn gauss(num_points: usize) -> Result<Rule<1>, Error> {
    let n = num_points;
    if n == 0 {
        return Err(Error::EmptyRule);
    }

    let mut jacobi = DMatrix::zeros(n, n);
    for k in 1..n {
        let beta = legendre_recurrence_coefficient(k);
        jacobi[(k - 1, k)] = beta;
        jacobi[(k, k - 1)] = beta;
    }

    let eigen = SymmetricEigen::new(jacobi);
    let mut nodes: Vec<(f64, f64)> = (0..n)
        .map(|i| {
            let v0 = eigen.eigenvectors[(0, i)];
            (eigen.eigenvalues[i], 2.0 * v0 * v0)
        })
        .collect();
    nodes.sort_unstable_by(|a, b| a.0.total_cmp(&b.0));

    // Remove the round-off asymmetry of the eigensolver
    for i in 0..n / 2 {
        let mirror = n - i - 1;
        let x = 0.5 * (nodes[i].0 - nodes[mirror].0);
        let w = 0.5 * (nodes[i].1 + nodes[mirror].1);
        nodes[i] = (x, w);
        nodes[mirror] = (-x, w);
    }
    if n % 2 == 1 {
        nodes[n / 2].0 = 0.0;
    }

    let weights = nodes.iter().map(|&(_, w)| w).collect();
    let points = nodes.iter().map(|&(x, _)| [x]).collect();
    Ok((weights, points))
}
