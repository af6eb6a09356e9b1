//! Kolmogorov–Smirnov normality test with Lilliefors correction

use anyhow::Result;

use crate::error::AnalysisError;
use crate::stats::distribution::normal_cdf;
use crate::stats::{mean, sample_variance, TestResult};

/// Smallest sample the p-value approximation is defined for
const MIN_SAMPLES: usize = 5;

/// Test the sample against a normal distribution with estimated mean and std.
///
/// The statistic is the KS distance between the empirical CDF and
/// `N(mean, s²)` (sample std, `ddof = 1`). Because both parameters are
/// estimated, the plain KS distribution is too lenient. The p-value is
/// analytic rather than read off a critical-value table: the Dallal–Wilkinson
/// approximation below 0.1, Stephens' polynomial fit in `kk = (√n - 0.01 +
/// 0.85/√n)·D` above it. Samples over 100 rows rescale `D` by `(n/100)^0.49`
/// first. Nothing clips the result to a table's [0.001, 0.2] range, so a
/// good fit can report p = 1.
pub fn lilliefors(sample: &[f64]) -> Result<TestResult> {
    let n = sample.len();
    if n < MIN_SAMPLES {
        return Err(AnalysisError::InsufficientData {
            context: "Lilliefors normality test",
            needed: MIN_SAMPLES,
            got: n,
        }
        .into());
    }

    let m = mean(sample);
    let sd = sample_variance(sample).sqrt();
    if !(sd > 0.0) {
        return Err(AnalysisError::DegenerateSample(
            "normality test on a constant sample".to_string(),
        )
        .into());
    }

    let mut sorted = sample.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));

    let nf = n as f64;
    let d = sorted
        .iter()
        .enumerate()
        .map(|(i, &x)| {
            let cdf = normal_cdf((x - m) / sd);
            let d_plus = (i + 1) as f64 / nf - cdf;
            let d_minus = cdf - i as f64 / nf;
            d_plus.max(d_minus)
        })
        .fold(0.0f64, f64::max);

    Ok(TestResult::new("Lilliefors normality", d, lilliefors_p_value(d, n)))
}

fn lilliefors_p_value(d: f64, n: usize) -> f64 {
    let nf = n as f64;
    let (kd, nd) = if n > 100 {
        (d * (nf / 100.0).powf(0.49), 100.0)
    } else {
        (d, nf)
    };

    let p = (-7.01256 * kd * kd * (nd + 2.78019) + 2.99587 * kd * (nd + 2.78019).sqrt()
        - 0.122119
        + 0.974598 / nd.sqrt()
        + 1.67997 / nd)
        .exp();

    if p <= 0.1 {
        return p;
    }

    let kk = (nf.sqrt() - 0.01 + 0.85 / nf.sqrt()) * d;
    let p = if kk <= 0.302 {
        1.0
    } else if kk <= 0.5 {
        2.76773 - 19.828315 * kk + 80.709644 * kk.powi(2) - 138.55152 * kk.powi(3)
            + 81.218052 * kk.powi(4)
    } else if kk <= 0.9 {
        -4.901232 + 40.662806 * kk - 97.490286 * kk.powi(2) + 94.029866 * kk.powi(3)
            - 32.355711 * kk.powi(4)
    } else if kk <= 1.31 {
        6.198765 - 19.558097 * kk + 23.186922 * kk.powi(2) - 12.234627 * kk.powi(3)
            + 2.423045 * kk.powi(4)
    } else {
        0.0
    };
    p.clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_symmetric_sample_is_not_rejected() {
        // Evenly spaced normal quantiles
        let sample = [-1.5, -1.0, -0.6, -0.3, 0.0, 0.3, 0.6, 1.0, 1.5];
        let res = lilliefors(&sample).unwrap();
        assert!(res.statistic < 0.2);
        // kk falls under 0.302, where Stephens' fit saturates
        assert_eq!(res.p_value, 1.0);
    }

    #[test]
    fn test_heavily_skewed_sample_is_rejected() {
        let mut sample: Vec<f64> = vec![1.0; 60];
        sample.extend((0..20).map(|i| 100.0 + i as f64 * 50.0));
        let res = lilliefors(&sample).unwrap();
        assert!(res.p_value < 0.01, "p = {}", res.p_value);
    }

    #[test]
    fn test_requires_five_observations() {
        assert!(lilliefors(&[1.0, 2.0, 3.0, 4.0]).is_err());
        assert!(lilliefors(&[2.0; 10]).is_err());
    }
}
