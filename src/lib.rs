//! Idealista EDA: exploratory analysis of Spanish sale listings
//!
//! Loads the processed listings file, runs hypothesis tests on price per m²,
//! trains tree-based regressors on a Box-Cox transformed target and embeds
//! the preprocessed features with t-SNE.

pub mod cli;
pub mod embedding;
pub mod error;
pub mod models;
pub mod pipeline;
pub mod report;
pub mod stats;
pub mod utils;
