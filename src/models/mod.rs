//! Regression models, target transformation and evaluation

pub mod binning;
pub mod boosting;
pub mod metrics;
pub mod pipeline;
pub mod transformed;
pub mod tree;

pub use binning::BinMapper;
pub use boosting::{EarlyStopping, HistGradientBoostingConfig, HistGradientBoostingRegressor};
pub use metrics::*;
pub use pipeline::*;
pub use transformed::TransformedTargetRegressor;
pub use tree::{DecisionTreeConfig, DecisionTreeRegressor, TreeNode};

use anyhow::Result;
use faer::Mat;

use crate::error::AnalysisError;

/// A regressor over a dense, preprocessed feature matrix.
pub trait Regressor {
    /// Learn from `x` (`n_samples x n_features`) and `y` (`n_samples`).
    fn fit(&mut self, x: &Mat<f64>, y: &[f64]) -> Result<()>;

    /// Predict one value per row of `x`.
    fn predict(&self, x: &Mat<f64>) -> Result<Vec<f64>>;

    fn name(&self) -> &str;
}

/// Shared input validation for `fit`.
pub(crate) fn check_fit_input(x: &Mat<f64>, y: &[f64]) -> Result<()> {
    if x.nrows() != y.len() {
        return Err(AnalysisError::shape(
            format!("{} target values", x.nrows()),
            format!("{} target values", y.len()),
        )
        .into());
    }
    if y.is_empty() {
        return Err(AnalysisError::InsufficientData {
            context: "model fit",
            needed: 1,
            got: 0,
        }
        .into());
    }
    if let Some(bad) = y.iter().find(|v| !v.is_finite()) {
        return Err(AnalysisError::invalid("y", format!("target contains non-finite value {}", bad)).into());
    }
    Ok(())
}

/// Shared input validation for `predict`.
pub(crate) fn check_predict_input(x: &Mat<f64>, n_features: usize) -> Result<()> {
    if x.ncols() != n_features {
        return Err(AnalysisError::shape(
            format!("{} features", n_features),
            format!("{} features", x.ncols()),
        )
        .into());
    }
    Ok(())
}
