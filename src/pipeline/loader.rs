//! Dataset loader for the listings file (CSV or Parquet)

use std::path::Path;

use anyhow::{Context, Result};
use polars::prelude::*;

use crate::error::AnalysisError;
use crate::pipeline::schema::FeatureSchema;

/// Row and size bookkeeping reported after loading
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LoadStats {
    /// Rows present in the source file
    pub rows_read: usize,
    /// Rows with a defined target
    pub rows_kept: usize,
    /// Columns selected for downstream stages (features + target)
    pub columns: usize,
    pub memory_mb: f64,
}

impl LoadStats {
    pub fn rows_dropped(&self) -> usize {
        self.rows_read.saturating_sub(self.rows_kept)
    }
}

/// Open a dataset lazily (CSV or Parquet based on extension)
pub fn load_dataset(path: &Path, infer_schema_length: usize) -> Result<LazyFrame> {
    std::fs::metadata(path)
        .with_context(|| format!("Failed to open input file: {}", path.display()))?;

    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_lowercase();

    // 0 means full table scan
    let schema_length = if infer_schema_length == 0 {
        None
    } else {
        Some(infer_schema_length)
    };

    let lf = match extension.as_str() {
        "csv" => LazyCsvReader::new(path)
            .with_infer_schema_length(schema_length)
            .finish()
            .with_context(|| format!("Failed to load CSV file: {}", path.display()))?,
        "parquet" => LazyFrame::scan_parquet(path, Default::default())
            .with_context(|| format!("Failed to load Parquet file: {}", path.display()))?,
        _ => anyhow::bail!(
            "Unsupported file format: '{}'. Supported formats: csv, parquet",
            extension
        ),
    };

    Ok(lf)
}

/// Get column names from a dataset file without loading the data
pub fn get_column_names(path: &Path, infer_schema_length: usize) -> Result<Vec<String>> {
    let schema = load_dataset(path, infer_schema_length)?.collect_schema()?;
    Ok(schema.iter_names().map(|s| s.to_string()).collect())
}

/// Fail with [`AnalysisError::MissingColumns`] unless every schema column is present.
pub fn ensure_columns(available: &[String], schema: &FeatureSchema) -> Result<()> {
    let missing: Vec<String> = schema
        .required_columns()
        .into_iter()
        .filter(|c| !available.contains(c))
        .collect();

    if !missing.is_empty() {
        return Err(AnalysisError::MissingColumns { columns: missing }.into());
    }
    Ok(())
}

/// Load the listings, keep rows with a defined target and select the schema columns.
///
/// The target is cast to Float64; null and NaN targets are both treated as missing.
pub fn load_listings(
    path: &Path,
    schema: &FeatureSchema,
    infer_schema_length: usize,
) -> Result<(DataFrame, LoadStats)> {
    let lf = load_dataset(path, infer_schema_length)?;

    let available: Vec<String> = lf
        .clone()
        .collect_schema()
        .with_context(|| format!("Failed to read schema of {}", path.display()))?
        .iter_names()
        .map(|s| s.to_string())
        .collect();
    ensure_columns(&available, schema)?;

    let rows_read = count_rows(lf.clone())?;

    let target = schema.target.as_str();
    let columns: Vec<Expr> = schema.required_columns().iter().map(|c| col(c.as_str())).collect();

    let df = lf
        .select(columns)
        .with_column(col(target).cast(DataType::Float64))
        .filter(col(target).is_not_null().and(col(target).is_not_nan()))
        .collect()
        .with_context(|| format!("Failed to collect listings from {}", path.display()))?;

    let stats = LoadStats {
        rows_read,
        rows_kept: df.height(),
        columns: df.width(),
        memory_mb: df.estimated_size() as f64 / (1024.0 * 1024.0),
    };

    tracing::debug!(
        rows_read = stats.rows_read,
        rows_kept = stats.rows_kept,
        "listings loaded"
    );

    Ok((df, stats))
}

fn count_rows(lf: LazyFrame) -> Result<usize> {
    let df = lf.select([len()]).collect()?;
    let count = df.column("len")?.get(0)?;
    row_count(count)
}

fn row_count(value: AnyValue) -> Result<usize> {
    let count = match value {
        AnyValue::UInt32(n) => Some(n as usize),
        AnyValue::UInt64(n) => usize::try_from(n).ok(),
        AnyValue::Int32(n) => usize::try_from(n).ok(),
        AnyValue::Int64(n) => usize::try_from(n).ok(),
        _ => None,
    };
    count.ok_or_else(|| AnalysisError::RowCount(format!("{:?}", value)).into())
}

/// Read a numeric column as `f64`, with missing values as NaN.
pub fn numeric_values(df: &DataFrame, name: &str) -> Result<Vec<f64>> {
    let column = df
        .column(name)
        .with_context(|| format!("Column '{}' not found", name))?
        .cast(&DataType::Float64)
        .with_context(|| format!("Column '{}' must be numeric", name))?;

    Ok(column
        .f64()?
        .into_iter()
        .map(|v| v.unwrap_or(f64::NAN))
        .collect())
}

/// Read a column as category labels; `None` marks a missing value.
pub fn categorical_values(df: &DataFrame, name: &str) -> Result<Vec<Option<String>>> {
    let column = df
        .column(name)
        .with_context(|| format!("Column '{}' not found", name))?
        .cast(&DataType::String)
        .with_context(|| format!("Column '{}' cannot be read as categories", name))?;

    Ok(column
        .str()?
        .into_iter()
        .map(|v| v.map(|s| s.to_string()))
        .collect())
}
