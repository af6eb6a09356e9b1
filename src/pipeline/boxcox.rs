//! Box-Cox power transform used to symmetrize the target

use anyhow::Result;
use serde::Serialize;

use crate::error::AnalysisError;

/// Exponent applied to `price_m2` before model fitting
pub const DEFAULT_LAMBDA: f64 = 0.25;

/// Invertible mapping applied to the regression target.
pub trait TargetTransform {
    fn forward(&self, y: f64) -> Result<f64>;
    fn inverse(&self, z: f64) -> Result<f64>;

    fn forward_all(&self, values: &[f64]) -> Result<Vec<f64>> {
        values.iter().map(|&v| self.forward(v)).collect()
    }

    fn inverse_all(&self, values: &[f64]) -> Result<Vec<f64>> {
        values.iter().map(|&v| self.inverse(v)).collect()
    }
}

/// `x -> (x^lambda - 1) / lambda` and its inverse `y -> (lambda * y + 1)^(1 / lambda)`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct BoxCox {
    lambda: f64,
}

impl BoxCox {
    /// Fails for a zero or non-finite exponent.
    pub fn new(lambda: f64) -> Result<Self> {
        if lambda == 0.0 || !lambda.is_finite() {
            return Err(AnalysisError::invalid(
                "lambda",
                format!("must be finite and nonzero, got {}", lambda),
            )
            .into());
        }
        Ok(Self { lambda })
    }

}

impl Default for BoxCox {
    fn default() -> Self {
        Self {
            lambda: DEFAULT_LAMBDA,
        }
    }
}

impl TargetTransform for BoxCox {
    fn forward(&self, x: f64) -> Result<f64> {
        let z = (x.powf(self.lambda) - 1.0) / self.lambda;
        if z.is_nan() {
            return Err(AnalysisError::Domain {
                transform: "Box-Cox",
                value: x,
                lambda: self.lambda,
            }
            .into());
        }
        Ok(z)
    }

    fn inverse(&self, z: f64) -> Result<f64> {
        let x = (self.lambda * z + 1.0).powf(1.0 / self.lambda);
        if x.is_nan() {
            return Err(AnalysisError::Domain {
                transform: "inverse Box-Cox",
                value: z,
                lambda: self.lambda,
            }
            .into());
        }
        Ok(x)
    }
}

/// Forward Box-Cox as a plain closure, without domain checks
pub fn boxcox_transform(lambda: f64) -> impl Fn(f64) -> f64 {
    move |x| (x.powf(lambda) - 1.0) / lambda
}

/// Inverse Box-Cox as a closure
pub fn inv_boxcox_transform(lambda: f64) -> impl Fn(f64) -> f64 {
    move |y| (lambda * y + 1.0).powf(1.0 / lambda)
}
