//! Quantile binning of continuous features into u8 codes for histogram boosting

use anyhow::Result;
use faer::Mat;
use rand::rngs::StdRng;
use rayon::prelude::*;

use crate::error::AnalysisError;

/// Code reserved for NaN inputs
pub const MISSING_BIN: u8 = 255;

/// Largest number of bins for observed values
pub const MAX_NON_MISSING_BINS: usize = 255;

/// Rows used to locate thresholds when the training set is larger
pub const DEFAULT_SUBSAMPLE: usize = 200_000;

/// Per-feature bin thresholds learned from training data.
///
/// A value `x` lands in bin `i` when `thresholds[i - 1] < x <= thresholds[i]`.
#[derive(Debug, Clone)]
pub struct BinMapper {
    max_bins: usize,
    thresholds: Vec<Vec<f64>>,
}

/// Binned training matrix, one code vector per feature
#[derive(Debug, Clone)]
pub struct BinnedColumns {
    pub codes: Vec<Vec<u8>>,
    pub n_rows: usize,
}

impl BinMapper {
    pub fn new(max_bins: usize) -> Result<Self> {
        if !(2..=MAX_NON_MISSING_BINS).contains(&max_bins) {
            return Err(AnalysisError::invalid(
                "max_bins",
                format!("must be in [2, {}], got {}", MAX_NON_MISSING_BINS, max_bins),
            )
            .into());
        }
        Ok(Self {
            max_bins,
            thresholds: Vec::new(),
        })
    }

    /// Number of bins holding observed (non-NaN) values
    pub fn n_bins_non_missing(&self, feature: usize) -> usize {
        self.thresholds[feature].len() + 1
    }

    /// Learn thresholds from the given rows of `x`.
    pub fn fit(&mut self, x: &Mat<f64>, rows: &[usize], rng: &mut StdRng) -> Result<&mut Self> {
        if rows.is_empty() {
            return Err(AnalysisError::InsufficientData {
                context: "bin mapper",
                needed: 1,
                got: 0,
            }
            .into());
        }

        let sample: Vec<usize> = if rows.len() > DEFAULT_SUBSAMPLE {
            rand::seq::index::sample(rng, rows.len(), DEFAULT_SUBSAMPLE)
                .into_iter()
                .map(|k| rows[k])
                .collect()
        } else {
            rows.to_vec()
        };

        let max_bins = self.max_bins;
        self.thresholds = (0..x.ncols())
            .into_par_iter()
            .map(|j| {
                let mut values: Vec<f64> = sample
                    .iter()
                    .map(|&i| x[(i, j)])
                    .filter(|v| !v.is_nan())
                    .collect();
                values.sort_by(|a, b| a.total_cmp(b));
                find_thresholds(&values, max_bins)
            })
            .collect();

        Ok(self)
    }

    pub fn bin_value(&self, feature: usize, value: f64) -> u8 {
        if value.is_nan() {
            return MISSING_BIN;
        }
        self.thresholds[feature].partition_point(|&t| t < value) as u8
    }

    /// Encode the given rows of `x`, in order.
    pub fn transform(&self, x: &Mat<f64>, rows: &[usize]) -> Result<BinnedColumns> {
        if self.thresholds.is_empty() && x.ncols() > 0 {
            return Err(AnalysisError::NotFitted("BinMapper").into());
        }
        if x.ncols() != self.thresholds.len() {
            return Err(AnalysisError::shape(
                format!("{} features", self.thresholds.len()),
                format!("{} features", x.ncols()),
            )
            .into());
        }

        let codes = (0..x.ncols())
            .into_par_iter()
            .map(|j| rows.iter().map(|&i| self.bin_value(j, x[(i, j)])).collect())
            .collect();

        Ok(BinnedColumns {
            codes,
            n_rows: rows.len(),
        })
    }

    /// Raw-space threshold equivalent to "bin <= `bin`".
    ///
    /// The last observed bin maps to +inf so every finite value goes left.
    pub fn bin_upper_bound(&self, feature: usize, bin: u8) -> f64 {
        self.thresholds[feature]
            .get(bin as usize)
            .copied()
            .unwrap_or(f64::INFINITY)
    }
}

/// Midpoints between distinct values when few, otherwise midpoint-method percentiles.
fn find_thresholds(sorted: &[f64], max_bins: usize) -> Vec<f64> {
    if sorted.is_empty() {
        return Vec::new();
    }

    let mut distinct: Vec<f64> = Vec::new();
    for &v in sorted {
        if distinct.last() != Some(&v) {
            distinct.push(v);
        }
        if distinct.len() > max_bins {
            break;
        }
    }

    if distinct.len() <= max_bins {
        return distinct.windows(2).map(|w| (w[0] + w[1]) * 0.5).collect();
    }

    let n = sorted.len();
    let mut thresholds: Vec<f64> = (1..max_bins)
        .map(|k| {
            let pos = k as f64 / max_bins as f64 * (n - 1) as f64;
            let lo = pos.floor() as usize;
            let hi = pos.ceil() as usize;
            (sorted[lo] + sorted[hi]) * 0.5
        })
        .collect();
    thresholds.dedup();
    thresholds
}
