//! Column layout of the processed Idealista listings file

use serde::Serialize;

/// Target column: price per square meter
pub const TARGET_COLUMN: &str = "price_m2";

/// Numeric features fed to the preprocessor
pub const NUMERIC_FEATURES: [&str; 2] = ["superficie", "habitaciones"];

/// Categorical features fed to the preprocessor
pub const CATEGORICAL_FEATURES: [&str; 10] = [
    "piso",
    "ascensor",
    "exterior",
    "garaje",
    "terraza",
    "calle",
    "barrio",
    "distrito",
    "ciudad",
    "provincia",
];

/// Loaded alongside the model features for exploration; the preprocessor drops them.
pub const AUXILIARY_FEATURES: [&str; 2] = ["energy_consumption", "energy_emissions"];

/// Which columns the loader selects and how the preprocessor treats each one.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FeatureSchema {
    pub target: String,
    pub numeric: Vec<String>,
    pub categorical: Vec<String>,
    pub auxiliary: Vec<String>,
}

impl Default for FeatureSchema {
    fn default() -> Self {
        Self {
            target: TARGET_COLUMN.to_string(),
            numeric: NUMERIC_FEATURES.iter().map(|s| s.to_string()).collect(),
            categorical: CATEGORICAL_FEATURES.iter().map(|s| s.to_string()).collect(),
            auxiliary: AUXILIARY_FEATURES.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl FeatureSchema {
    /// Schema for the listings file with a custom target column name.
    pub fn with_target(target: &str) -> Self {
        Self {
            target: target.to_string(),
            ..Default::default()
        }
    }

    /// Feature columns in load order (numeric, categorical, auxiliary).
    pub fn feature_columns(&self) -> Vec<String> {
        self.numeric
            .iter()
            .chain(self.categorical.iter())
            .chain(self.auxiliary.iter())
            .cloned()
            .collect()
    }

    /// Every column the input file must provide.
    pub fn required_columns(&self) -> Vec<String> {
        let mut columns = self.feature_columns();
        columns.push(self.target.clone());
        columns
    }
}
