//! Low-dimensional embedding of the preprocessed training listings

pub mod tsne;

pub use tsne::{Tsne, TsneConfig, TsneInit, TsneResult};

use anyhow::Result;
use faer::Mat;
use polars::prelude::*;
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::Serialize;

use crate::error::AnalysisError;
use crate::pipeline::preprocess::Preprocessor;
use crate::pipeline::schema::FeatureSchema;
use crate::pipeline::split::take_rows;

/// Embedding of the training rows together with their target values
#[derive(Debug, Clone)]
pub struct EmbeddingOutcome {
    pub embedding: Mat<f64>,
    /// Target of each embedded row, same order
    pub target: Vec<f64>,
    pub kl_divergence: f64,
    pub n_iter: usize,
    pub n_features: usize,
}

/// Serializable summary of an [`EmbeddingOutcome`]
#[derive(Debug, Clone, Serialize)]
pub struct EmbeddingSummary {
    pub n_samples: usize,
    pub n_features: usize,
    pub n_components: usize,
    pub kl_divergence: f64,
    pub n_iter: usize,
}

impl EmbeddingOutcome {
    pub fn summary(&self) -> EmbeddingSummary {
        EmbeddingSummary {
            n_samples: self.embedding.nrows(),
            n_features: self.n_features,
            n_components: self.embedding.ncols(),
            kl_divergence: self.kl_divergence,
            n_iter: self.n_iter,
        }
    }
}

/// Fit the preprocessor on `features`, then embed every row with t-SNE.
///
/// With `max_samples`, a seeded subset of that many rows is embedded instead.
pub fn embed_training_set(
    features: &DataFrame,
    target: &[f64],
    schema: FeatureSchema,
    config: &TsneConfig,
    max_samples: Option<usize>,
) -> Result<EmbeddingOutcome> {
    if features.height() != target.len() {
        return Err(AnalysisError::shape(
            format!("{} target values", features.height()),
            format!("{} target values", target.len()),
        )
        .into());
    }

    let (features, target) = match max_samples {
        Some(m) if m < features.height() => {
            let mut rng = StdRng::seed_from_u64(config.random_state);
            let mut rows = rand::seq::index::sample(&mut rng, features.height(), m).into_vec();
            rows.sort_unstable();
            let subset_target = rows.iter().map(|&i| target[i]).collect();
            (take_rows(features, &rows)?, subset_target)
        }
        _ => (features.clone(), target.to_vec()),
    };

    let mut preprocessor = Preprocessor::new(schema);
    let x = preprocessor.fit_transform(&features)?;
    tracing::debug!(rows = x.nrows(), columns = x.ncols(), "embedding input prepared");

    let result = Tsne::new(config.clone()).fit_transform(&x)?;

    Ok(EmbeddingOutcome {
        embedding: result.embedding,
        target,
        kl_divergence: result.kl_divergence,
        n_iter: result.n_iter,
        n_features: x.ncols(),
    })
}
