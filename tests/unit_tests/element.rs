use matrixcompare::assert_scalar_eq;
use meshworker::element::{BaseElement, FeSystem, QuadGeometry};
use nalgebra::{Matrix2, Point2, Vector2};
use proptest::prelude::*;

fn reference_corners() -> [Point2<f64>; 4] {
    [
        Point2::new(-1.0, -1.0),
        Point2::new(1.0, -1.0),
        Point2::new(1.0, 1.0),
        Point2::new(-1.0, 1.0),
    ]
}

#[test]
fn q1_basis_is_nodal() {
    let mut basis = [0.0; 4];
    for (j, corner) in reference_corners().iter().enumerate() {
        BaseElement::Q1.populate_basis(&mut basis, corner);
        for (i, &phi) in basis.iter().enumerate() {
            let expected = if i == j { 1.0 } else { 0.0 };
            assert_scalar_eq!(phi, expected, comp = abs, tol = 1e-14);
        }
    }
}

#[test]
fn dgp0_is_constant() {
    let mut basis = [0.0];
    let mut gradients = [Vector2::new(1.0, 1.0)];
    BaseElement::Dgp0.populate_basis(&mut basis, &Point2::new(0.3, -0.7));
    BaseElement::Dgp0.populate_reference_gradients(&mut gradients, &Point2::new(0.3, -0.7));
    assert_eq!(basis, [1.0]);
    assert_eq!(gradients, [Vector2::zeros()]);
    assert!(BaseElement::Dgp0.is_discontinuous());
    assert!(!BaseElement::Q1.is_discontinuous());
}

#[test]
fn element_names() {
    assert_eq!(BaseElement::Dgp0.to_string(), "FE_DGP(0)");
    assert_eq!(BaseElement::Q1.to_string(), "FE_Q(1)");
}

#[test]
#[should_panic]
fn basis_buffer_must_match_element() {
    let mut basis = [0.0; 3];
    BaseElement::Q1.populate_basis(&mut basis, &Point2::origin());
}

#[test]
fn geometry_maps_reference_corners_to_vertices() {
    let vertices = [
        Point2::new(0.0, 0.0),
        Point2::new(2.0, 0.0),
        Point2::new(2.5, 1.5),
        Point2::new(0.5, 1.0),
    ];
    let geometry = QuadGeometry::from_vertices(vertices);
    for (corner, vertex) in reference_corners().iter().zip(&vertices) {
        let x = geometry.map_reference_coords(corner);
        assert_scalar_eq!(x.x, vertex.x, comp = abs, tol = 1e-14);
        assert_scalar_eq!(x.y, vertex.y, comp = abs, tol = 1e-14);
    }
    assert_eq!(geometry.vertices(), &vertices);
}

#[test]
fn jacobian_of_axis_aligned_rectangle() {
    let geometry = QuadGeometry::from_vertices([
        Point2::new(1.0, 1.0),
        Point2::new(4.0, 1.0),
        Point2::new(4.0, 2.0),
        Point2::new(1.0, 2.0),
    ]);
    let expected = Matrix2::new(1.5, 0.0, 0.0, 0.5);
    for xi in [Point2::origin(), Point2::new(0.5, -0.25)] {
        let jacobian = geometry.reference_jacobian(&xi);
        assert!((jacobian - expected).abs().max() < 1e-14);
    }
}

#[test]
fn system_blocks() {
    let system = FeSystem::new()
        .with_block("p", BaseElement::Dgp0)
        .with_block("u", BaseElement::Q1);
    assert_eq!(system.n_blocks(), 2);
    assert_eq!(system.n_dofs_per_cell(), 5);
    assert_eq!(system.block_element(1), BaseElement::Q1);
    assert_eq!(system.block_name(0), "p");
    assert_eq!(system.find_block("u"), Some(1));
    assert_eq!(system.find_block("v"), None);

    let single = FeSystem::single("u", BaseElement::Q1);
    assert_eq!(single.blocks().len(), 1);
    assert_eq!(single.n_dofs_per_cell(), 4);
    assert_eq!(FeSystem::new().n_dofs_per_cell(), 0);
}

#[test]
fn system_can_be_read_from_json() {
    let json = r#"{ "blocks": [ { "name": "p", "element": "Dgp0" }, { "name": "u", "element": "Q1" } ] }"#;
    let system: FeSystem = serde_json::from_str(json).unwrap();
    assert_eq!(
        system,
        FeSystem::new()
            .with_block("p", BaseElement::Dgp0)
            .with_block("u", BaseElement::Q1)
    );
}

proptest! {
    #[test]
    fn q1_partition_of_unity(x in -1.0..=1.0, y in -1.0..=1.0) {
        let xi = Point2::new(x, y);
        let mut basis = [0.0; 4];
        let mut gradients = [Vector2::zeros(); 4];
        BaseElement::Q1.populate_basis(&mut basis, &xi);
        BaseElement::Q1.populate_reference_gradients(&mut gradients, &xi);
        assert_scalar_eq!(basis.iter().sum::<f64>(), 1.0, comp = abs, tol = 1e-14);
        let gradient_sum: Vector2<f64> = gradients.iter().sum();
        prop_assert!(gradient_sum.norm() < 1e-14);
    }

    #[test]
    fn q1_gradients_match_finite_differences(x in -0.9..=0.9, y in -0.9..=0.9) {
        let h = 1e-6;
        let mut gradients = [Vector2::zeros(); 4];
        BaseElement::Q1.populate_reference_gradients(&mut gradients, &Point2::new(x, y));
        let eval = |x: f64, y: f64| {
            let mut basis = [0.0; 4];
            BaseElement::Q1.populate_basis(&mut basis, &Point2::new(x, y));
            basis
        };
        let (xp, xm) = (eval(x + h, y), eval(x - h, y));
        let (yp, ym) = (eval(x, y + h), eval(x, y - h));
        for i in 0..4 {
            let fd = Vector2::new((xp[i] - xm[i]) / (2.0 * h), (yp[i] - ym[i]) / (2.0 * h));
            prop_assert!((fd - gradients[i]).norm() < 1e-8);
        }
    }
}
