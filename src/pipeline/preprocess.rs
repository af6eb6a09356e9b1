//! Column-wise feature preprocessing: standardization and one-hot encoding
//!
//! Statistics and category sets are learned from the training frame only and
//! then applied unchanged to any frame sharing the schema.

use std::collections::{BTreeSet, HashMap};

use anyhow::Result;
use faer::Mat;
use polars::prelude::*;
use serde::Serialize;

use crate::error::AnalysisError;
use crate::pipeline::loader::{categorical_values, numeric_values};
use crate::pipeline::schema::FeatureSchema;

/// Per-column standardization, `(x - mean) / scale`.
///
/// Missing values (NaN) are ignored when fitting and passed through unchanged.
#[derive(Debug, Clone, Default, Serialize)]
pub struct StandardScaler {
    pub means: Vec<f64>,
    pub scales: Vec<f64>,
}

impl StandardScaler {
    pub fn fit(columns: &[Vec<f64>]) -> Self {
        let mut means = Vec::with_capacity(columns.len());
        let mut scales = Vec::with_capacity(columns.len());

        for values in columns {
            let (mut n, mut mean, mut m2) = (0.0f64, 0.0f64, 0.0f64);
            // Welford
            for &x in values.iter().filter(|x| !x.is_nan()) {
                n += 1.0;
                let delta = x - mean;
                mean += delta / n;
                m2 += delta * (x - mean);
            }

            if n == 0.0 {
                means.push(0.0);
                scales.push(1.0);
                continue;
            }

            let std = (m2 / n).sqrt();
            means.push(mean);
            scales.push(if std > f64::EPSILON { std } else { 1.0 });
        }

        Self { means, scales }
    }

    pub fn transform_value(&self, column: usize, x: f64) -> f64 {
        (x - self.means[column]) / self.scales[column]
    }
}

/// One-hot encoding that ignores categories unseen at fit time.
///
/// A missing value is a category of its own, ordered after all labels.
#[derive(Debug, Clone, Default)]
pub struct OneHotEncoder {
    categories: Vec<Vec<Option<String>>>,
    lookup: Vec<HashMap<Option<String>, usize>>,
}

impl OneHotEncoder {
    pub fn fit(columns: &[Vec<Option<String>>]) -> Self {
        let mut categories = Vec::with_capacity(columns.len());
        let mut lookup = Vec::with_capacity(columns.len());

        for values in columns {
            let labels: BTreeSet<&str> = values.iter().flatten().map(|s| s.as_str()).collect();
            let mut cats: Vec<Option<String>> = sorted_labels(labels)
                .into_iter()
                .map(|s| Some(s.to_string()))
                .collect();
            if values.iter().any(|v| v.is_none()) {
                cats.push(None);
            }

            let index = cats
                .iter()
                .enumerate()
                .map(|(i, c)| (c.clone(), i))
                .collect();
            categories.push(cats);
            lookup.push(index);
        }

        Self { categories, lookup }
    }

    /// Categories learned for each column, in output order
    pub fn categories(&self) -> &[Vec<Option<String>>] {
        &self.categories
    }

    /// Total number of indicator columns produced
    pub fn n_outputs(&self) -> usize {
        self.categories.iter().map(|c| c.len()).sum()
    }

    /// Position of `value` inside its column block, if seen during fit.
    pub fn position(&self, column: usize, value: &Option<String>) -> Option<usize> {
        self.lookup[column].get(value).copied()
    }
}

/// Numeric order when every label parses as a number, lexical otherwise.
fn sorted_labels(labels: BTreeSet<&str>) -> Vec<&str> {
    let parsed: Option<Vec<f64>> = labels.iter().map(|s| s.trim().parse::<f64>().ok()).collect();
    let mut ordered: Vec<&str> = labels.into_iter().collect();
    if let Some(numbers) = parsed {
        let mut keyed: Vec<(f64, &str)> = numbers.into_iter().zip(ordered).collect();
        keyed.sort_by(|a, b| a.0.total_cmp(&b.0));
        ordered = keyed.into_iter().map(|(_, s)| s).collect();
    }
    ordered
}

#[derive(Debug, Clone)]
struct FittedColumns {
    scaler: StandardScaler,
    encoder: OneHotEncoder,
}

/// Column transformer over a [`FeatureSchema`]: numeric columns are
/// standardized, categorical columns one-hot encoded, everything else dropped.
#[derive(Debug, Clone)]
pub struct Preprocessor {
    schema: FeatureSchema,
    fitted: Option<FittedColumns>,
}

impl Preprocessor {
    pub fn new(schema: FeatureSchema) -> Self {
        Self {
            schema,
            fitted: None,
        }
    }

    /// Learn means, scales and category sets from `df`.
    pub fn fit(&mut self, df: &DataFrame) -> Result<&mut Self> {
        self.check_columns(df)?;

        let numeric = self.read_numeric(df)?;
        let categorical = self.read_categorical(df)?;

        self.fitted = Some(FittedColumns {
            scaler: StandardScaler::fit(&numeric),
            encoder: OneHotEncoder::fit(&categorical),
        });
        Ok(self)
    }

    /// Apply the learned transform; returns an `n_rows x n_output_features` matrix.
    pub fn transform(&self, df: &DataFrame) -> Result<Mat<f64>> {
        let fitted = self
            .fitted
            .as_ref()
            .ok_or(AnalysisError::NotFitted("Preprocessor"))?;
        self.check_columns(df)?;

        let numeric = self.read_numeric(df)?;
        let categorical = self.read_categorical(df)?;

        let n_rows = df.height();
        let n_numeric = numeric.len();
        let mut out = Mat::<f64>::zeros(n_rows, n_numeric + fitted.encoder.n_outputs());

        for (j, values) in numeric.iter().enumerate() {
            for (i, &x) in values.iter().enumerate() {
                out[(i, j)] = fitted.scaler.transform_value(j, x);
            }
        }

        let mut offset = n_numeric;
        for (j, values) in categorical.iter().enumerate() {
            for (i, value) in values.iter().enumerate() {
                // Unknown categories leave the block at zero
                if let Some(pos) = fitted.encoder.position(j, value) {
                    out[(i, offset + pos)] = 1.0;
                }
            }
            offset += fitted.encoder.categories()[j].len();
        }

        Ok(out)
    }

    pub fn fit_transform(&mut self, df: &DataFrame) -> Result<Mat<f64>> {
        self.fit(df)?;
        self.transform(df)
    }

    /// Width of the transformed matrix
    pub fn n_output_features(&self) -> Result<usize> {
        let fitted = self
            .fitted
            .as_ref()
            .ok_or(AnalysisError::NotFitted("Preprocessor"))?;
        Ok(self.schema.numeric.len() + fitted.encoder.n_outputs())
    }

    /// Output column names: numeric names, then `<column>_<category>`.
    pub fn feature_names(&self) -> Result<Vec<String>> {
        let fitted = self
            .fitted
            .as_ref()
            .ok_or(AnalysisError::NotFitted("Preprocessor"))?;

        let mut names = self.schema.numeric.clone();
        for (column, cats) in self
            .schema
            .categorical
            .iter()
            .zip(fitted.encoder.categories())
        {
            for cat in cats {
                match cat {
                    Some(label) => names.push(format!("{}_{}", column, label)),
                    None => names.push(format!("{}_nan", column)),
                }
            }
        }
        Ok(names)
    }

    fn check_columns(&self, df: &DataFrame) -> Result<()> {
        let names: Vec<String> = df
            .get_column_names()
            .iter()
            .map(|s| s.to_string())
            .collect();
        let missing: Vec<String> = self
            .schema
            .numeric
            .iter()
            .chain(self.schema.categorical.iter())
            .filter(|c| !names.contains(c))
            .cloned()
            .collect();

        if !missing.is_empty() {
            return Err(AnalysisError::MissingColumns { columns: missing }.into());
        }
        Ok(())
    }

    fn read_numeric(&self, df: &DataFrame) -> Result<Vec<Vec<f64>>> {
        self.schema
            .numeric
            .iter()
            .map(|name| numeric_values(df, name))
            .collect()
    }

    fn read_categorical(&self, df: &DataFrame) -> Result<Vec<Vec<Option<String>>>> {
        self.schema
            .categorical
            .iter()
            .map(|name| categorical_values(df, name))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scaler_ignores_nan() {
        let scaler = StandardScaler::fit(&[vec![1.0, f64::NAN, 3.0]]);
        assert!((scaler.means[0] - 2.0).abs() < 1e-12);
        assert!((scaler.scales[0] - 1.0).abs() < 1e-12);
        assert!(scaler.transform_value(0, f64::NAN).is_nan());
    }

    #[test]
    fn test_scaler_constant_column_has_unit_scale() {
        let scaler = StandardScaler::fit(&[vec![5.0; 4]]);
        assert_eq!(scaler.scales[0], 1.0);
        assert_eq!(scaler.transform_value(0, 5.0), 0.0);
    }

    #[test]
    fn test_encoder_orders_missing_last() {
        let encoder = OneHotEncoder::fit(&[vec![
            Some("b".to_string()),
            None,
            Some("a".to_string()),
        ]]);
        assert_eq!(
            encoder.categories()[0],
            vec![Some("a".to_string()), Some("b".to_string()), None]
        );
        assert_eq!(encoder.position(0, &Some("z".to_string())), None);
    }

    #[test]
    fn test_encoder_orders_numeric_labels_by_value() {
        let labels = |xs: &[&str]| vec![xs.iter().map(|s| Some(s.to_string())).collect::<Vec<_>>()];

        let numeric = OneHotEncoder::fit(&labels(&["10", "2", "1", "2.5"]));
        assert_eq!(
            numeric.categories()[0],
            vec![
                Some("1".to_string()),
                Some("2".to_string()),
                Some("2.5".to_string()),
                Some("10".to_string())
            ]
        );
        assert_eq!(numeric.position(0, &Some("10".to_string())), Some(3));

        // One non-numeric floor keeps the whole column lexical
        let mixed = OneHotEncoder::fit(&labels(&["10", "2", "bajo"]));
        assert_eq!(
            mixed.categories()[0],
            vec![
                Some("10".to_string()),
                Some("2".to_string()),
                Some("bajo".to_string())
            ]
        );
    }
}
