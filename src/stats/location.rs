//! Two-sample location tests: rank comparison and Welch's t-test

use anyhow::Result;
use serde::Serialize;

use crate::error::AnalysisError;
use crate::stats::distribution::student_t_two_sided;
use crate::stats::{average_ranks, mean, sample_variance, TestResult};

/// Brunner–Munzel rank comparison of two independent samples
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RankCompareResult {
    pub statistic: f64,
    pub p_value: f64,
    /// Welch–Satterthwaite degrees of freedom of the t reference
    pub df: f64,
    /// `P(X1 > X2) + 0.5 * P(X1 = X2)` estimated from the ranks
    pub prob_superiority: f64,
}

impl From<RankCompareResult> for TestResult {
    fn from(r: RankCompareResult) -> Self {
        TestResult::new("Brunner-Munzel rank comparison", r.statistic, r.p_value).with_df(r.df)
    }
}

fn require_two(sample: &[f64], context: &'static str) -> Result<()> {
    if sample.len() < 2 {
        return Err(AnalysisError::InsufficientData {
            context,
            needed: 2,
            got: sample.len(),
        }
        .into());
    }
    Ok(())
}

/// Statistic and p-value when the standard error is zero: an infinite
/// statistic with p = 0 if the locations differ, NaN for both otherwise.
fn zero_spread_outcome(difference: f64) -> (f64, f64) {
    if difference == 0.0 || difference.is_nan() {
        (f64::NAN, f64::NAN)
    } else {
        (difference.signum() * f64::INFINITY, 0.0)
    }
}

/// Rank-based comparison of two independent samples.
///
/// Generalises the Mann–Whitney U test to unequal variances: ranks are taken
/// over the pooled sample and within each sample, the placement variances
/// feed a studentized statistic, and the p-value (two-sided) comes from a
/// t distribution with Welch–Satterthwaite degrees of freedom.
pub fn rank_compare_2indep(x1: &[f64], x2: &[f64]) -> Result<RankCompareResult> {
    require_two(x1, "rank comparison")?;
    require_two(x2, "rank comparison")?;

    let n1 = x1.len() as f64;
    let n2 = x2.len() as f64;

    let pooled: Vec<f64> = x1.iter().chain(x2.iter()).copied().collect();
    let pooled_ranks = average_ranks(&pooled);
    let (rank1, rank2) = pooled_ranks.split_at(x1.len());
    let inner1 = average_ranks(x1);
    let inner2 = average_ranks(x2);

    let mean_r1 = mean(rank1);
    let mean_r2 = mean(rank2);
    let mean_i1 = mean(&inner1);
    let mean_i2 = mean(&inner2);

    let placement_var = |pooled: &[f64], inner: &[f64], mr: f64, mi: f64, n: f64| {
        pooled
            .iter()
            .zip(inner)
            .map(|(&r, &ri)| (r - ri - mr + mi).powi(2))
            .sum::<f64>()
            / (n - 1.0)
    };
    let s1 = placement_var(rank1, &inner1, mean_r1, mean_i1, n1);
    let s2 = placement_var(rank2, &inner2, mean_r2, mean_i2, n2);

    let spread = n1 * s1 + n2 * s2;
    let prob_superiority = (mean_r1 - (n1 + 1.0) / 2.0) / n2;

    if !(spread > 0.0) {
        // Fully separated or constant samples
        let (statistic, p_value) = zero_spread_outcome(mean_r1 - mean_r2);
        tracing::warn!(statistic, "rank comparison has no placement variance");
        return Ok(RankCompareResult {
            statistic,
            p_value,
            df: f64::NAN,
            prob_superiority,
        });
    }

    let statistic = n1 * n2 * (mean_r1 - mean_r2) / (n1 + n2) / spread.sqrt();

    let df = spread.powi(2) / ((n1 * s1).powi(2) / (n1 - 1.0) + (n2 * s2).powi(2) / (n2 - 1.0));
    let p_value = student_t_two_sided(statistic, df);

    Ok(RankCompareResult {
        statistic,
        p_value,
        df,
        prob_superiority,
    })
}

/// Two-sample t-test without assuming equal variances.
pub fn welch_ttest(x1: &[f64], x2: &[f64]) -> Result<TestResult> {
    require_two(x1, "Welch's t-test")?;
    require_two(x2, "Welch's t-test")?;

    let n1 = x1.len() as f64;
    let n2 = x2.len() as f64;
    let se1 = sample_variance(x1) / n1;
    let se2 = sample_variance(x2) / n2;
    let se2_total = se1 + se2;

    if !(se2_total > 0.0) {
        let (t, p_value) = zero_spread_outcome(mean(x1) - mean(x2));
        tracing::warn!(statistic = t, "Welch's t-test on two constant samples");
        return Ok(TestResult::new("Welch's t-test", t, p_value).with_df(f64::NAN));
    }

    let t = (mean(x1) - mean(x2)) / se2_total.sqrt();
    let df = se2_total.powi(2) / (se1.powi(2) / (n1 - 1.0) + se2.powi(2) / (n2 - 1.0));

    Ok(TestResult::new("Welch's t-test", t, student_t_two_sided(t, df)).with_df(df))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_welch_identical_samples() {
        let a = [1.0, 2.0, 3.0, 4.0, 5.0];
        let res = welch_ttest(&a, &a).unwrap();
        assert_eq!(res.statistic, 0.0);
        assert!((res.p_value - 1.0).abs() < 1e-12);
        assert!((res.df.unwrap() - 8.0).abs() < 1e-12);
    }

    #[test]
    fn test_welch_known_statistic() {
        // means 2 and 5, variances 1 and 1, n = 3 each: t = -3 / sqrt(2/3)
        let res = welch_ttest(&[1.0, 2.0, 3.0], &[4.0, 5.0, 6.0]).unwrap();
        assert!((res.statistic + 3.0 / (2.0f64 / 3.0).sqrt()).abs() < 1e-12);
        assert!(res.p_value < 0.05);
    }

    #[test]
    fn test_rank_compare_identical_samples() {
        let a = [3.0, 1.0, 4.0, 1.5, 5.0, 9.0];
        let res = rank_compare_2indep(&a, &a).unwrap();
        assert!(res.statistic.abs() < 1e-12);
        assert!((res.p_value - 1.0).abs() < 1e-9);
        assert!((res.prob_superiority - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_rank_compare_shifted_samples() {
        let a = [1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0];
        let b = [5.5, 6.5, 7.5, 8.5, 9.5, 10.5, 11.5, 12.5];
        let res = rank_compare_2indep(&a, &b).unwrap();
        assert!(res.statistic < 0.0);
        assert!(res.prob_superiority < 0.5);
        assert!(res.p_value < 0.05, "p = {}", res.p_value);
    }

    #[test]
    fn test_separated_samples_report_infinite_statistic() {
        let low = [1.0, 2.0, 3.0, 4.0];
        let high = [10.0, 11.0, 12.0];
        let res = rank_compare_2indep(&low, &high).unwrap();
        assert_eq!(res.statistic, f64::NEG_INFINITY);
        assert_eq!(res.p_value, 0.0);
        assert!(res.df.is_nan());
        assert_eq!(res.prob_superiority, 0.0);
    }

    #[test]
    fn test_welch_constant_samples() {
        let res = welch_ttest(&[2.0, 2.0, 2.0], &[5.0, 5.0]).unwrap();
        assert_eq!(res.statistic, f64::NEG_INFINITY);
        assert_eq!(res.p_value, 0.0);

        let same = welch_ttest(&[3.0, 3.0], &[3.0, 3.0, 3.0]).unwrap();
        assert!(same.statistic.is_nan());
        assert!(same.p_value.is_nan());
    }
}
