//! Regressor fitted on a transformed target, predicting on the original scale

use anyhow::Result;
use faer::Mat;

use crate::models::Regressor;
use crate::pipeline::boxcox::TargetTransform;

const INVERSE_RTOL: f64 = 1e-7;
const INVERSE_ATOL: f64 = 1e-5;

/// Fits `regressor` on `transform.forward(y)`; predictions pass back through `transform.inverse`.
#[derive(Debug, Clone)]
pub struct TransformedTargetRegressor<R, T> {
    regressor: R,
    transform: T,
}

impl<R: Regressor, T: TargetTransform> TransformedTargetRegressor<R, T> {
    pub fn new(regressor: R, transform: T) -> Self {
        Self {
            regressor,
            transform,
        }
    }

    pub fn regressor(&self) -> &R {
        &self.regressor
    }

    /// Round-trip every tenth target and warn if any does not come back.
    fn verify_inverse(&self, y: &[f64]) -> Result<()> {
        let step = (y.len() / 10).max(1);
        let mismatches = y
            .iter()
            .step_by(step)
            .map(|&v| {
                let back = self.transform.inverse(self.transform.forward(v)?)?;
                Ok((v - back).abs() > INVERSE_ATOL + INVERSE_RTOL * v.abs())
            })
            .collect::<Result<Vec<bool>>>()?
            .into_iter()
            .filter(|&bad| bad)
            .count();

        if mismatches > 0 {
            tracing::warn!(
                mismatches,
                "target transform inverse does not recover the sampled targets"
            );
        }
        Ok(())
    }
}

impl<R: Regressor, T: TargetTransform> Regressor for TransformedTargetRegressor<R, T> {
    fn fit(&mut self, x: &Mat<f64>, y: &[f64]) -> Result<()> {
        self.verify_inverse(y)?;
        let z = self.transform.forward_all(y)?;
        self.regressor.fit(x, &z)
    }

    fn predict(&self, x: &Mat<f64>) -> Result<Vec<f64>> {
        let z = self.regressor.predict(x)?;
        self.transform.inverse_all(&z)
    }

    fn name(&self) -> &str {
        self.regressor.name()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::tree::{DecisionTreeConfig, DecisionTreeRegressor};
    use crate::pipeline::boxcox::BoxCox;

    #[test]
    fn test_predictions_on_original_scale() {
        let x = Mat::from_fn(6, 1, |i, _| i as f64);
        let y = vec![16.0, 16.0, 16.0, 81.0, 81.0, 81.0];
        let mut model = TransformedTargetRegressor::new(
            DecisionTreeRegressor::new(DecisionTreeConfig::default()),
            BoxCox::default(),
        );
        model.fit(&x, &y).unwrap();

        let pred = model.predict(&x).unwrap();
        for (p, t) in pred.iter().zip(&y) {
            assert!((p - t).abs() < 1e-9, "{} vs {}", p, t);
        }
    }

    #[test]
    fn test_rejects_target_outside_domain() {
        let x = Mat::from_fn(3, 1, |i, _| i as f64);
        let mut model = TransformedTargetRegressor::new(
            DecisionTreeRegressor::new(DecisionTreeConfig::default()),
            BoxCox::default(),
        );
        assert!(model.fit(&x, &[1.0, -2.0, 3.0]).is_err());
    }
}
