use meshworker_quadrature::univariate::gauss;
use meshworker_quadrature::{integrate, Error};

use matrixcompare::assert_scalar_eq;

#[test]
fn gauss_rules_satisfy_expected_accuracy() {
    for n in 1..=20 {
        let expected_polynomial_degree = 2 * n - 1;
        let rule = gauss(n).unwrap();

        assert_eq!(rule.0.len(), n);
        assert!(rule.0.iter().all(|&w| w > 0.0));
        assert!(rule.1.windows(2).all(|pair| pair[0][0] < pair[1][0]));

        for alpha in 0..=expected_polynomial_degree as i32 {
            let monomial_integral = (1.0 - (-1.0f64).powi(alpha + 1)) / (alpha as f64 + 1.0);
            let estimated_integral = integrate(&rule, |x| x[0].powi(alpha));
            assert_scalar_eq!(estimated_integral, monomial_integral, comp = abs, tol = 1e-13);
        }
    }
}

#[test]
fn gauss_rules_are_symmetric() {
    for n in 1..=12 {
        let (weights, points) = gauss(n).unwrap();
        for i in 0..n {
            assert_eq!(points[i][0], -points[n - i - 1][0]);
            assert_eq!(weights[i], weights[n - i - 1]);
        }
    }
}

#[test]
fn gauss_rule_with_zero_points_is_an_error() {
    assert_eq!(gauss(0), Err(Error::EmptyRule));
}
