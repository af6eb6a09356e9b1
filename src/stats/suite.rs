//! The price-per-m² hypothesis suite: normality plus elevator vs no-elevator comparisons

use anyhow::Result;
use polars::prelude::*;
use serde::Serialize;

use crate::error::AnalysisError;
use crate::pipeline::loader::numeric_values;
use crate::pipeline::schema::TARGET_COLUMN;
use crate::stats::{
    levene, lilliefors, rank_compare_2indep, welch_ttest, LeveneCenter, RankCompareResult,
    TestResult,
};

/// Which column splits the listings and which values mark each group
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SuiteConfig {
    pub target: String,
    pub group_column: String,
    /// Value marking listings with an elevator
    pub with_value: f64,
    /// Value marking listings without an elevator
    pub without_value: f64,
    /// Exponent applied before the variance and mean comparisons
    pub power: f64,
}

impl Default for SuiteConfig {
    fn default() -> Self {
        Self {
            target: TARGET_COLUMN.to_string(),
            group_column: "ascensor".to_string(),
            with_value: 2.0,
            without_value: 1.0,
            power: 0.25,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SuiteReport {
    pub normality: TestResult,
    pub rank_compare: RankCompareResult,
    pub levene: TestResult,
    pub welch: TestResult,
    pub n_total: usize,
    pub n_with: usize,
    pub n_without: usize,
}

impl SuiteReport {
    /// All four results in reporting order
    pub fn results(&self) -> Vec<TestResult> {
        vec![
            self.normality.clone(),
            self.rank_compare.clone().into(),
            self.levene.clone(),
            self.welch.clone(),
        ]
    }
}

/// Split target values into (with, without) groups; rows matching neither are skipped.
pub fn split_groups(df: &DataFrame, config: &SuiteConfig) -> Result<(Vec<f64>, Vec<f64>)> {
    let target = numeric_values(df, &config.target)?;
    let flags = numeric_values(df, &config.group_column)?;

    let mut with = Vec::new();
    let mut without = Vec::new();
    for (&y, &flag) in target.iter().zip(flags.iter()) {
        if y.is_nan() {
            continue;
        }
        if flag == config.with_value {
            with.push(y);
        } else if flag == config.without_value {
            without.push(y);
        }
    }
    Ok((with, without))
}

fn power_transform(values: &[f64], power: f64) -> Result<Vec<f64>> {
    values
        .iter()
        .map(|&x| {
            let v = x.powf(power);
            if v.is_nan() {
                Err(AnalysisError::Domain {
                    transform: "power transform",
                    value: x,
                    lambda: power,
                }
                .into())
            } else {
                Ok(v)
            }
        })
        .collect()
}

/// Run the four tests. Each is independent; the first failure aborts the suite.
pub fn run_hypothesis_suite(df: &DataFrame, config: &SuiteConfig) -> Result<SuiteReport> {
    let prices: Vec<f64> = numeric_values(df, &config.target)?
        .into_iter()
        .filter(|v| !v.is_nan())
        .collect();

    let normality = lilliefors(&prices)?;

    let (with, without) = split_groups(df, config)?;
    tracing::debug!(
        with = with.len(),
        without = without.len(),
        column = %config.group_column,
        "group sizes"
    );

    let rank_compare = rank_compare_2indep(&with, &without)?;

    let with_t = power_transform(&with, config.power)?;
    let without_t = power_transform(&without, config.power)?;

    let levene = levene(&[&with_t, &without_t], LeveneCenter::Mean)?;
    let welch = welch_ttest(&with_t, &without_t)?;

    Ok(SuiteReport {
        normality,
        rank_compare,
        levene,
        welch,
        n_total: prices.len(),
        n_with: with.len(),
        n_without: without.len(),
    })
}
