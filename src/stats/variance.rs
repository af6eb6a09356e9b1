//! Levene's test for homogeneity of variances

use anyhow::Result;
use serde::Serialize;

use crate::error::AnalysisError;
use crate::stats::distribution::f_survival;
use crate::stats::{mean, TestResult};

/// Location each group's absolute deviations are measured from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum LeveneCenter {
    Mean,
    Median,
}

impl std::fmt::Display for LeveneCenter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LeveneCenter::Mean => write!(f, "mean"),
            LeveneCenter::Median => write!(f, "median"),
        }
    }
}

fn median(values: &[f64]) -> f64 {
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    }
}

/// One-way ANOVA on absolute deviations from each group's center.
///
/// Returns W with `(k - 1, N - k)` degrees of freedom.
pub fn levene(groups: &[&[f64]], center: LeveneCenter) -> Result<TestResult> {
    let k = groups.len();
    if k < 2 {
        return Err(AnalysisError::invalid("groups", "Levene's test needs at least two groups").into());
    }
    if let Some(small) = groups.iter().find(|g| g.len() < 2) {
        return Err(AnalysisError::InsufficientData {
            context: "Levene's test group",
            needed: 2,
            got: small.len(),
        }
        .into());
    }

    let deviations: Vec<Vec<f64>> = groups
        .iter()
        .map(|g| {
            let c = match center {
                LeveneCenter::Mean => mean(g),
                LeveneCenter::Median => median(g),
            };
            g.iter().map(|&x| (x - c).abs()).collect()
        })
        .collect();

    let n_total: usize = groups.iter().map(|g| g.len()).sum();
    let group_means: Vec<f64> = deviations.iter().map(|d| mean(d)).collect();
    let grand_mean =
        deviations.iter().flatten().sum::<f64>() / n_total as f64;

    let between: f64 = deviations
        .iter()
        .zip(&group_means)
        .map(|(d, &m)| d.len() as f64 * (m - grand_mean).powi(2))
        .sum();
    let within: f64 = deviations
        .iter()
        .zip(&group_means)
        .map(|(d, &m)| d.iter().map(|&z| (z - m).powi(2)).sum::<f64>())
        .sum();

    let df_num = (k - 1) as f64;
    let df_den = (n_total - k) as f64;

    if !(within > 0.0) {
        return Err(AnalysisError::DegenerateSample(
            "Levene's test with identical deviations in every group".to_string(),
        )
        .into());
    }

    let w = (df_den / df_num) * between / within;

    Ok(
        TestResult::new(format!("Levene ({} center)", center), w, f_survival(w, df_num, df_den))
            .with_df(df_num)
            .with_df_denom(df_den),
    )
}
