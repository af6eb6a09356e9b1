//! Hypothesis tests over price samples

pub mod distribution;
pub mod location;
pub mod normality;
pub mod suite;
pub mod variance;

pub use location::*;
pub use normality::*;
pub use suite::*;
pub use variance::*;

use serde::Serialize;

/// Outcome of a single hypothesis test
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TestResult {
    pub name: String,
    pub statistic: f64,
    pub p_value: f64,
    /// Degrees of freedom (numerator for F tests)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub df: Option<f64>,
    /// Denominator degrees of freedom for F tests
    #[serde(skip_serializing_if = "Option::is_none")]
    pub df_denom: Option<f64>,
}

impl TestResult {
    pub fn new(name: impl Into<String>, statistic: f64, p_value: f64) -> Self {
        Self {
            name: name.into(),
            statistic,
            p_value,
            df: None,
            df_denom: None,
        }
    }

    pub fn with_df(mut self, df: f64) -> Self {
        self.df = Some(df);
        self
    }

    pub fn with_df_denom(mut self, df_denom: f64) -> Self {
        self.df_denom = Some(df_denom);
        self
    }

    /// Whether the null hypothesis is rejected at level `alpha`
    pub fn is_significant(&self, alpha: f64) -> bool {
        self.p_value < alpha
    }
}

pub(crate) fn mean(values: &[f64]) -> f64 {
    values.iter().sum::<f64>() / values.len() as f64
}

/// Sample variance with `ddof = 1`
pub(crate) fn sample_variance(values: &[f64]) -> f64 {
    let m = mean(values);
    values.iter().map(|&x| (x - m).powi(2)).sum::<f64>() / (values.len() as f64 - 1.0)
}

/// Ranks starting at 1, ties receive the average of their positions.
pub(crate) fn average_ranks(values: &[f64]) -> Vec<f64> {
    let mut order: Vec<usize> = (0..values.len()).collect();
    order.sort_by(|&a, &b| values[a].total_cmp(&values[b]));

    let mut ranks = vec![0.0; values.len()];
    let mut start = 0;
    while start < order.len() {
        let mut end = start + 1;
        while end < order.len() && values[order[end]] == values[order[start]] {
            end += 1;
        }
        // positions start..end share the mean of ranks start+1..=end
        let rank = (start + end + 1) as f64 / 2.0;
        for &idx in &order[start..end] {
            ranks[idx] = rank;
        }
        start = end;
    }
    ranks
}
