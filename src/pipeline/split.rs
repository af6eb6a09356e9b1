//! Seeded train/test partitioning

use anyhow::{Context, Result};
use polars::prelude::*;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

use crate::error::AnalysisError;
use crate::pipeline::loader::numeric_values;
use crate::pipeline::schema::FeatureSchema;

/// Row indices of a train/test partition
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SplitIndices {
    pub train: Vec<usize>,
    pub test: Vec<usize>,
}

/// Features and target of both partitions
#[derive(Debug, Clone)]
pub struct DatasetSplit {
    pub x_train: DataFrame,
    pub x_test: DataFrame,
    pub y_train: Vec<f64>,
    pub y_test: Vec<f64>,
}

/// Shuffle `0..n_rows` with a seeded RNG and hold out `ceil(test_size * n_rows)` rows.
///
/// The first `n_test` positions of the permutation form the test set.
pub fn split_indices(n_rows: usize, test_size: f64, seed: u64) -> Result<SplitIndices> {
    if !(test_size > 0.0 && test_size < 1.0) {
        return Err(AnalysisError::invalid(
            "test_size",
            format!("must be in (0, 1), got {}", test_size),
        )
        .into());
    }

    let n_test = (test_size * n_rows as f64).ceil() as usize;
    if n_test == 0 || n_test >= n_rows {
        return Err(AnalysisError::InsufficientData {
            context: "train/test split",
            needed: 2,
            got: n_rows,
        }
        .into());
    }

    let mut indices: Vec<usize> = (0..n_rows).collect();
    let mut rng = StdRng::seed_from_u64(seed);
    indices.shuffle(&mut rng);

    let train = indices.split_off(n_test);
    Ok(SplitIndices {
        train,
        test: indices,
    })
}

/// Take the given rows of a DataFrame, preserving their order
pub fn take_rows(df: &DataFrame, rows: &[usize]) -> Result<DataFrame> {
    let idx = IdxCa::from_vec(
        "idx".into(),
        rows.iter().map(|&i| i as IdxSize).collect(),
    );
    df.take(&idx).context("Failed to select rows")
}

/// Partition loaded listings into feature frames and target vectors.
pub fn train_test_split(
    df: &DataFrame,
    schema: &FeatureSchema,
    test_size: f64,
    seed: u64,
) -> Result<DatasetSplit> {
    let indices = split_indices(df.height(), test_size, seed)?;

    let feature_names = schema.feature_columns();
    let features = df
        .select(feature_names.iter().map(|s| s.as_str()))
        .context("Failed to select feature columns")?;
    let target = numeric_values(df, &schema.target)?;

    Ok(DatasetSplit {
        x_train: take_rows(&features, &indices.train)?,
        x_test: take_rows(&features, &indices.test)?,
        y_train: indices.train.iter().map(|&i| target[i]).collect(),
        y_test: indices.test.iter().map(|&i| target[i]).collect(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_sizes_round_test_up() {
        let split = split_indices(9, 0.2, 1234).unwrap();
        assert_eq!(split.test.len(), 2);
        assert_eq!(split.train.len(), 7);
    }

    #[test]
    fn test_split_is_a_partition() {
        let split = split_indices(50, 0.2, 1234).unwrap();
        let mut all: Vec<usize> = split.train.iter().chain(split.test.iter()).copied().collect();
        all.sort_unstable();
        assert_eq!(all, (0..50).collect::<Vec<_>>());
    }

    #[test]
    fn test_split_rejects_bad_fraction() {
        assert!(split_indices(10, 0.0, 1).is_err());
        assert!(split_indices(10, 1.0, 1).is_err());
        assert!(split_indices(1, 0.2, 1).is_err());
    }
}
