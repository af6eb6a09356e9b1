//! JSON run report and CSV exports of plot data

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Utc;
use polars::prelude::*;
use serde::Serialize;

use crate::embedding::EmbeddingOutcome;
use crate::error::AnalysisError;
use crate::models::ModelEvaluation;
use crate::report::RunSummary;

pub const REPORT_FILE: &str = "report.json";
pub const EMBEDDING_FILE: &str = "tsne_embedding.csv";

/// Run settings recorded in the report
#[derive(Debug, Clone, Serialize)]
pub struct ReportMetadata {
    pub timestamp: String,
    pub version: String,
    pub input_file: String,
    pub target: String,
    pub test_size: f64,
    pub split_seed: u64,
}

impl ReportMetadata {
    pub fn new(input: &Path, target: &str, test_size: f64, split_seed: u64) -> Self {
        Self {
            timestamp: Utc::now().to_rfc3339(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            input_file: input.display().to_string(),
            target: target.to_string(),
            test_size,
            split_seed,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AnalysisReport<'a> {
    pub metadata: ReportMetadata,
    #[serde(flatten)]
    pub summary: &'a RunSummary,
}

/// Create the export directory if needed
pub fn prepare_export_dir(dir: &Path) -> Result<()> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create export directory: {}", dir.display()))
}

/// Write `report.json` into `dir`; returns its path.
pub fn export_report(metadata: ReportMetadata, summary: &RunSummary, dir: &Path) -> Result<PathBuf> {
    let report = AnalysisReport { metadata, summary };
    let json = serde_json::to_string_pretty(&report).context("Failed to serialize analysis report to JSON")?;

    let path = dir.join(REPORT_FILE);
    std::fs::write(&path, json)
        .with_context(|| format!("Failed to write analysis report to {}", path.display()))?;
    Ok(path)
}

fn write_csv(df: &mut DataFrame, path: &Path) -> Result<()> {
    let mut file = std::fs::File::create(path)
        .with_context(|| format!("Failed to create output file: {}", path.display()))?;
    CsvWriter::new(&mut file)
        .finish(df)
        .with_context(|| format!("Failed to write CSV file: {}", path.display()))?;
    Ok(())
}

/// Write `<model>_predictions.csv` with actual, predicted and residual columns.
pub fn export_predictions(evaluation: &ModelEvaluation, dir: &Path) -> Result<PathBuf> {
    if evaluation.actual.len() != evaluation.predicted.len() {
        return Err(AnalysisError::shape(
            format!("{} predictions", evaluation.actual.len()),
            format!("{} predictions", evaluation.predicted.len()),
        )
        .into());
    }
    let residual: Vec<f64> = evaluation
        .actual
        .iter()
        .zip(&evaluation.predicted)
        .map(|(a, p)| a - p)
        .collect();

    let mut df = df!(
        "actual" => &evaluation.actual,
        "predicted" => &evaluation.predicted,
        "residual" => residual,
    )?;

    let path = dir.join(format!("{}_predictions.csv", evaluation.model.slug()));
    write_csv(&mut df, &path)?;
    Ok(path)
}

/// Write `tsne_embedding.csv` with one `tsne_<k>` column per component plus the target.
pub fn export_embedding(outcome: &EmbeddingOutcome, target_name: &str, dir: &Path) -> Result<PathBuf> {
    let embedding = &outcome.embedding;
    let mut columns: Vec<Column> = (0..embedding.ncols())
        .map(|d| {
            let values: Vec<f64> = (0..embedding.nrows()).map(|i| embedding[(i, d)]).collect();
            Column::new(format!("tsne_{}", d + 1).into(), values)
        })
        .collect();
    columns.push(Column::new(target_name.into(), outcome.target.clone()));

    let mut df = DataFrame::new(columns).context("Failed to assemble embedding frame")?;

    let path = dir.join(EMBEDDING_FILE);
    write_csv(&mut df, &path)?;
    Ok(path)
}
