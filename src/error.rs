//! Typed failures raised by the analysis pipeline.
//!
//! Functions in this crate return `anyhow::Result`; the variants below are
//! wrapped into it so callers (and tests) can `downcast_ref::<AnalysisError>()`
//! when they need to tell failure modes apart.

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum AnalysisError {
    /// Required columns are absent from the input dataset.
    #[error("Missing required column(s): {}", .columns.join(", "))]
    MissingColumns { columns: Vec<String> },

    /// A hyper-parameter or argument is outside its valid range.
    #[error("Invalid parameter '{name}': {reason}")]
    InvalidParameter { name: &'static str, reason: String },

    /// A power transform produced a non-real value.
    #[error("{transform} is undefined for input {value} (lambda = {lambda})")]
    Domain {
        transform: &'static str,
        value: f64,
        lambda: f64,
    },

    /// `transform`/`predict` called before `fit`.
    #[error("{0} must be fitted before use")]
    NotFitted(&'static str),

    /// Input dimensions disagree.
    #[error("Shape mismatch: expected {expected}, got {actual}")]
    ShapeMismatch { expected: String, actual: String },

    /// Too few observations to run a procedure.
    #[error("{context} needs at least {needed} observations, got {got}")]
    InsufficientData {
        context: &'static str,
        needed: usize,
        got: usize,
    },

    /// The row count query returned something other than a count.
    #[error("Could not count input rows, got {0}")]
    RowCount(String),

    /// A sample with zero spread where a test needs variance.
    #[error("Degenerate sample: {0}")]
    DegenerateSample(String),
}

impl AnalysisError {
    pub fn invalid(name: &'static str, reason: impl Into<String>) -> Self {
        AnalysisError::InvalidParameter {
            name,
            reason: reason.into(),
        }
    }

    pub fn shape(expected: impl ToString, actual: impl ToString) -> Self {
        AnalysisError::ShapeMismatch {
            expected: expected.to_string(),
            actual: actual.to_string(),
        }
    }
}
