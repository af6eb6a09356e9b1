//! Box-Cox transform properties

use idealista_eda::error::AnalysisError;
use idealista_eda::pipeline::{boxcox_transform, inv_boxcox_transform, BoxCox, TargetTransform};

#[test]
fn test_reference_values() {
    let bc = BoxCox::new(0.25).unwrap();
    assert!((bc.forward(16.0).unwrap() - 4.0).abs() < 1e-12);
    assert!((bc.inverse(4.0).unwrap() - 16.0).abs() < 1e-9);
}

#[test]
fn test_inverse_recovers_positive_inputs() {
    for &lambda in &[-1.0, -0.5, 0.1, 0.25, 0.5, 1.0, 2.0] {
        let bc = BoxCox::new(lambda).unwrap();
        for &x in &[0.01, 0.5, 1.0, 3.7, 250.0, 4321.0] {
            let back = bc.inverse(bc.forward(x).unwrap()).unwrap();
            assert!(
                (back - x).abs() <= 1e-8 * x.max(1.0),
                "lambda={} x={} back={}",
                lambda,
                x,
                back
            );
        }
    }
}

#[test]
fn test_vector_forms_match_scalar() {
    let bc = BoxCox::default();
    let ys = [1.0, 16.0, 81.0];
    let forward = bc.forward_all(&ys).unwrap();
    for (z, expected) in forward.iter().zip([0.0, 4.0, 8.0]) {
        assert!((z - expected).abs() < 1e-9);
    }
    let back = bc.inverse_all(&[0.0, 4.0, 8.0]).unwrap();
    for (b, y) in back.iter().zip(&ys) {
        assert!((b - y).abs() < 1e-9);
    }
}

#[test]
fn test_negative_input_is_domain_error() {
    let err = BoxCox::default().forward(-3.0).unwrap_err();
    assert!(matches!(
        err.downcast_ref::<AnalysisError>(),
        Some(AnalysisError::Domain { .. })
    ));
}

#[test]
fn test_closure_forms() {
    let f = boxcox_transform(0.25);
    let g = inv_boxcox_transform(0.25);
    assert!((f(16.0) - 4.0).abs() < 1e-12);
    assert!((g(4.0) - 16.0).abs() < 1e-9);
}
