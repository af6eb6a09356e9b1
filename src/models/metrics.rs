//! Regression metrics

use anyhow::Result;
use serde::Serialize;

use crate::error::AnalysisError;

fn check_lengths(y_true: &[f64], y_pred: &[f64]) -> Result<()> {
    if y_true.len() != y_pred.len() {
        return Err(AnalysisError::shape(
            format!("{} predictions", y_true.len()),
            format!("{} predictions", y_pred.len()),
        )
        .into());
    }
    if y_true.is_empty() {
        return Err(AnalysisError::InsufficientData {
            context: "regression metric",
            needed: 1,
            got: 0,
        }
        .into());
    }
    Ok(())
}

pub fn mean_squared_error(y_true: &[f64], y_pred: &[f64]) -> Result<f64> {
    check_lengths(y_true, y_pred)?;
    let sse: f64 = y_true.iter().zip(y_pred).map(|(t, p)| (t - p).powi(2)).sum();
    Ok(sse / y_true.len() as f64)
}

/// Root mean squared error
pub fn rmse(y_true: &[f64], y_pred: &[f64]) -> Result<f64> {
    Ok(mean_squared_error(y_true, y_pred)?.sqrt())
}

pub fn mae(y_true: &[f64], y_pred: &[f64]) -> Result<f64> {
    check_lengths(y_true, y_pred)?;
    let sae: f64 = y_true.iter().zip(y_pred).map(|(t, p)| (t - p).abs()).sum();
    Ok(sae / y_true.len() as f64)
}

/// Coefficient of determination.
///
/// A constant `y_true` scores 1.0 when predicted exactly and 0.0 otherwise.
pub fn r2_score(y_true: &[f64], y_pred: &[f64]) -> Result<f64> {
    check_lengths(y_true, y_pred)?;
    let mean = y_true.iter().sum::<f64>() / y_true.len() as f64;
    let ss_res: f64 = y_true.iter().zip(y_pred).map(|(t, p)| (t - p).powi(2)).sum();
    let ss_tot: f64 = y_true.iter().map(|t| (t - mean).powi(2)).sum();

    if ss_tot == 0.0 {
        return Ok(if ss_res == 0.0 { 1.0 } else { 0.0 });
    }
    Ok(1.0 - ss_res / ss_tot)
}

/// Test-set scores of a fitted model
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RegressionScores {
    pub rmse: f64,
    pub mae: f64,
    pub r2: f64,
}

impl RegressionScores {
    pub fn compute(y_true: &[f64], y_pred: &[f64]) -> Result<Self> {
        Ok(Self {
            rmse: rmse(y_true, y_pred)?,
            mae: mae(y_true, y_pred)?,
            r2: r2_score(y_true, y_pred)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_perfect_prediction() {
        let y = [1.0, 2.0, 3.0];
        let s = RegressionScores::compute(&y, &y).unwrap();
        assert_eq!(s.rmse, 0.0);
        assert_eq!(s.mae, 0.0);
        assert_eq!(s.r2, 1.0);
    }

    #[test]
    fn test_known_values() {
        let y = [1.0, 2.0, 3.0, 4.0];
        let p = [2.0, 2.0, 3.0, 2.0];
        // squared errors 1, 0, 0, 4
        assert!((rmse(&y, &p).unwrap() - (5.0f64 / 4.0).sqrt()).abs() < 1e-12);
        assert!((mae(&y, &p).unwrap() - 0.75).abs() < 1e-12);
        assert!((r2_score(&y, &p).unwrap() - (1.0 - 5.0 / 5.0)).abs() < 1e-12);
    }

    #[test]
    fn test_mean_prediction_scores_zero_r2() {
        let y = [2.0, 4.0, 6.0];
        assert!(r2_score(&y, &[4.0, 4.0, 4.0]).unwrap().abs() < 1e-12);
    }

    #[test]
    fn test_constant_truth() {
        assert_eq!(r2_score(&[3.0, 3.0], &[3.0, 3.0]).unwrap(), 1.0);
        assert_eq!(r2_score(&[3.0, 3.0], &[3.0, 4.0]).unwrap(), 0.0);
    }

    #[test]
    fn test_length_mismatch() {
        assert!(rmse(&[1.0], &[1.0, 2.0]).is_err());
        assert!(rmse(&[], &[]).is_err());
    }
}
