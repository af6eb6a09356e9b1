//! Preprocessor + target transform + regressor, fitted and scored on DataFrames

use std::time::Instant;

use anyhow::Result;
use polars::prelude::*;
use serde::Serialize;

use crate::error::AnalysisError;
use crate::models::boosting::{HistGradientBoostingConfig, HistGradientBoostingRegressor};
use crate::models::metrics::RegressionScores;
use crate::models::transformed::TransformedTargetRegressor;
use crate::models::tree::{DecisionTreeConfig, DecisionTreeRegressor};
use crate::models::Regressor;
use crate::pipeline::boxcox::{BoxCox, DEFAULT_LAMBDA};
use crate::pipeline::preprocess::Preprocessor;
use crate::pipeline::schema::FeatureSchema;
use crate::pipeline::split::DatasetSplit;

/// Which regressor a pipeline wraps
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ModelKind {
    DecisionTree,
    GradientBoosting,
}

impl ModelKind {
    /// File-name friendly identifier
    pub fn slug(&self) -> &'static str {
        match self {
            ModelKind::DecisionTree => "decision_tree",
            ModelKind::GradientBoosting => "hist_gradient_boosting",
        }
    }
}

impl std::fmt::Display for ModelKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ModelKind::DecisionTree => write!(f, "Decision tree"),
            ModelKind::GradientBoosting => write!(f, "Histogram gradient boosting"),
        }
    }
}

/// Hyper-parameters shared by both pipelines
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrainingConfig {
    pub lambda: f64,
    pub seed: u64,
    pub max_depth: usize,
    pub max_iter: usize,
    pub learning_rate: f64,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            lambda: DEFAULT_LAMBDA,
            seed: 123,
            max_depth: 10,
            max_iter: 1000,
            learning_rate: 0.1,
        }
    }
}

/// Fitted preprocessing followed by a regressor
#[derive(Debug, Clone)]
pub struct ModelPipeline<R> {
    kind: ModelKind,
    preprocessor: Preprocessor,
    model: R,
}

pub type TreePipeline = ModelPipeline<TransformedTargetRegressor<DecisionTreeRegressor, BoxCox>>;
pub type BoostingPipeline =
    ModelPipeline<TransformedTargetRegressor<HistGradientBoostingRegressor, BoxCox>>;

impl<R: Regressor> ModelPipeline<R> {
    pub fn new(kind: ModelKind, schema: FeatureSchema, model: R) -> Self {
        Self {
            kind,
            preprocessor: Preprocessor::new(schema),
            model,
        }
    }

    pub fn kind(&self) -> ModelKind {
        self.kind
    }

    pub fn preprocessor(&self) -> &Preprocessor {
        &self.preprocessor
    }

    pub fn fit(&mut self, features: &DataFrame, target: &[f64]) -> Result<()> {
        if features.height() != target.len() {
            return Err(AnalysisError::shape(
                format!("{} target values", features.height()),
                format!("{} target values", target.len()),
            )
            .into());
        }
        let x = self.preprocessor.fit_transform(features)?;
        self.model.fit(&x, target)
    }

    /// Predictions in the target's original units
    pub fn predict(&self, features: &DataFrame) -> Result<Vec<f64>> {
        let x = self.preprocessor.transform(features)?;
        self.model.predict(&x)
    }
}

/// Decision tree (depth-capped) on the Box-Cox target
pub fn tree_pipeline(schema: FeatureSchema, config: &TrainingConfig) -> Result<TreePipeline> {
    let tree = DecisionTreeRegressor::new(DecisionTreeConfig {
        max_depth: Some(config.max_depth),
        random_state: config.seed,
        ..Default::default()
    });
    let model = TransformedTargetRegressor::new(tree, BoxCox::new(config.lambda)?);
    Ok(ModelPipeline::new(ModelKind::DecisionTree, schema, model))
}

/// Histogram gradient boosting on the Box-Cox target
pub fn boosting_pipeline(schema: FeatureSchema, config: &TrainingConfig) -> Result<BoostingPipeline> {
    let gbm = HistGradientBoostingRegressor::new(HistGradientBoostingConfig {
        learning_rate: config.learning_rate,
        max_iter: config.max_iter,
        max_depth: Some(config.max_depth),
        random_state: config.seed,
        ..Default::default()
    });
    let model = TransformedTargetRegressor::new(gbm, BoxCox::new(config.lambda)?);
    Ok(ModelPipeline::new(ModelKind::GradientBoosting, schema, model))
}

#[derive(Debug, Clone, Serialize)]
pub struct FeatureImportance {
    pub feature: String,
    pub importance: f64,
}

impl TreePipeline {
    /// Impurity importances keyed by encoded feature name, largest first
    pub fn feature_importances(&self) -> Result<Vec<FeatureImportance>> {
        let names = self.preprocessor.feature_names()?;
        let values = self.model.regressor().feature_importances();
        if values.len() != names.len() {
            return Err(AnalysisError::NotFitted("DecisionTreeRegressor").into());
        }

        let mut ranked: Vec<FeatureImportance> = names
            .into_iter()
            .zip(values.iter())
            .map(|(feature, &importance)| FeatureImportance {
                feature,
                importance,
            })
            .collect();
        ranked.sort_by(|a, b| b.importance.total_cmp(&a.importance));
        Ok(ranked)
    }
}

/// Test-set outcome of one fitted pipeline
#[derive(Debug, Clone, Serialize)]
pub struct ModelEvaluation {
    pub model: ModelKind,
    pub scores: RegressionScores,
    pub fit_seconds: f64,
    pub n_train: usize,
    pub n_test: usize,
    /// Extra diagnostics, e.g. boosting iterations actually run
    #[serde(skip_serializing_if = "Option::is_none")]
    pub n_iter: Option<usize>,
    #[serde(skip)]
    pub actual: Vec<f64>,
    #[serde(skip)]
    pub predicted: Vec<f64>,
}

/// Fit on the training partition, then score predictions on the test partition.
pub fn evaluate<R: Regressor>(pipeline: &mut ModelPipeline<R>, split: &DatasetSplit) -> Result<ModelEvaluation> {
    let start = Instant::now();
    pipeline.fit(&split.x_train, &split.y_train)?;
    let fit_seconds = start.elapsed().as_secs_f64();

    let predicted = pipeline.predict(&split.x_test)?;
    let scores = RegressionScores::compute(&split.y_test, &predicted)?;

    tracing::info!(
        model = %pipeline.kind(),
        rmse = scores.rmse,
        r2 = scores.r2,
        fit_seconds,
        "model evaluated"
    );

    Ok(ModelEvaluation {
        model: pipeline.kind(),
        scores,
        fit_seconds,
        n_train: split.y_train.len(),
        n_test: split.y_test.len(),
        n_iter: None,
        actual: split.y_test.clone(),
        predicted,
    })
}

impl BoostingPipeline {
    /// Boosting iterations actually run, after any early stop
    pub fn n_iter(&self) -> usize {
        self.model.regressor().n_iter()
    }
}
