//! Command-line argument definitions using clap

use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

use crate::pipeline::schema::TARGET_COLUMN;

pub const DEFAULT_INPUT: &str = "output/idealista-sale-properties-spain_processed.csv";

/// t-SNE rows embedded by default; the exact gradient is quadratic in this
pub const DEFAULT_MAX_SAMPLES: usize = 5000;

/// Idealista EDA - hypothesis tests, regression models and t-SNE on sale listings
#[derive(Parser, Debug)]
#[command(name = "idealista-eda")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Processed listings file (CSV or Parquet)
    #[arg(short, long, default_value = DEFAULT_INPUT, global = true)]
    pub input: PathBuf,

    /// Target column name
    #[arg(short, long, default_value = TARGET_COLUMN, global = true)]
    pub target: String,

    /// Fraction of rows held out for evaluation, in (0, 1)
    #[arg(long, default_value = "0.2", value_parser = validate_fraction, global = true)]
    pub test_size: f64,

    /// Seed of the train/test permutation
    #[arg(long, default_value = "1234", global = true)]
    pub split_seed: u64,

    /// Number of rows to use for schema inference (CSV only).
    /// Use 0 for full table scan (very slow for large files).
    #[arg(long, default_value = "10000", global = true)]
    pub infer_schema_length: usize,

    /// Directory for report.json and plot-data CSVs.
    /// Nothing is written when omitted.
    #[arg(long, global = true)]
    pub export_dir: Option<PathBuf>,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Normality, rank, variance and mean tests on price per m²
    Stats(StatsArgs),
    /// Fit and score the regression pipelines
    Train(TrainArgs),
    /// Embed the preprocessed training rows with t-SNE
    Embed(EmbedArgs),
    /// Run stats, train and embed in order
    All {
        #[command(flatten)]
        stats: StatsArgs,
        #[command(flatten)]
        train: TrainArgs,
        #[command(flatten)]
        embed: EmbedArgs,
    },
}

#[derive(Args, Debug, Clone, PartialEq)]
pub struct StatsArgs {
    /// Column whose values define the two compared groups
    #[arg(long, default_value = "ascensor")]
    pub group_column: String,

    /// Group value for listings with an elevator
    #[arg(long, default_value = "2")]
    pub with_value: f64,

    /// Group value for listings without an elevator
    #[arg(long, default_value = "1")]
    pub without_value: f64,

    /// Exponent applied before Levene and Welch
    #[arg(long, default_value = "0.25", value_parser = validate_positive)]
    pub power: f64,
}

impl Default for StatsArgs {
    fn default() -> Self {
        Self {
            group_column: "ascensor".to_string(),
            with_value: 2.0,
            without_value: 1.0,
            power: 0.25,
        }
    }
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelChoice {
    Tree,
    Gbm,
    Both,
}

impl ModelChoice {
    pub fn includes_tree(&self) -> bool {
        matches!(self, ModelChoice::Tree | ModelChoice::Both)
    }

    pub fn includes_gbm(&self) -> bool {
        matches!(self, ModelChoice::Gbm | ModelChoice::Both)
    }
}

#[derive(Args, Debug, Clone, PartialEq)]
pub struct TrainArgs {
    /// Which regressor(s) to train
    #[arg(long, value_enum, default_value = "both")]
    pub model: ModelChoice,

    /// Box-Cox exponent for the target (nonzero)
    #[arg(long, default_value = "0.25", value_parser = validate_nonzero)]
    pub lambda: f64,

    /// Seed of the models' internal randomness
    #[arg(long, default_value = "123")]
    pub seed: u64,

    /// Maximum tree depth
    #[arg(long, default_value = "10", value_parser = validate_count)]
    pub max_depth: usize,

    /// Boosting iterations
    #[arg(long = "max-iter", default_value = "1000", value_parser = validate_count)]
    pub max_iter: usize,

    /// Boosting learning rate
    #[arg(long, default_value = "0.1", value_parser = validate_positive)]
    pub learning_rate: f64,
}

impl Default for TrainArgs {
    fn default() -> Self {
        Self {
            model: ModelChoice::Both,
            lambda: 0.25,
            seed: 123,
            max_depth: 10,
            max_iter: 1000,
            learning_rate: 0.1,
        }
    }
}

#[derive(Args, Debug, Clone, PartialEq)]
pub struct EmbedArgs {
    /// t-SNE perplexity (must be below the number of embedded rows)
    #[arg(long, default_value = "30", value_parser = validate_positive)]
    pub perplexity: f64,

    /// t-SNE iterations (at least 250)
    #[arg(long = "tsne-iter", default_value = "1000", value_parser = validate_tsne_iter)]
    pub tsne_iter: usize,

    /// Seed of the t-SNE initialisation and subsampling
    #[arg(long = "tsne-seed", default_value = "123")]
    pub tsne_seed: u64,

    /// Embed a seeded subset of at most this many training rows
    #[arg(long, default_value_t = DEFAULT_MAX_SAMPLES, value_parser = validate_count)]
    pub max_samples: usize,
}

impl Default for EmbedArgs {
    fn default() -> Self {
        Self {
            perplexity: 30.0,
            tsne_iter: 1000,
            tsne_seed: 123,
            max_samples: DEFAULT_MAX_SAMPLES,
        }
    }
}

impl Cli {
    /// The subcommand to run; `all` with defaults when none was given.
    pub fn command(&self) -> Commands {
        self.command.clone().unwrap_or(Commands::All {
            stats: StatsArgs::default(),
            train: TrainArgs::default(),
            embed: EmbedArgs::default(),
        })
    }
}

fn parse_number<T: std::str::FromStr>(s: &str) -> Result<T, String> {
    s.parse()
        .map_err(|_| format!("'{}' is not a valid number", s))
}

/// Validator for fractions strictly between 0 and 1
fn validate_fraction(s: &str) -> Result<f64, String> {
    let value: f64 = parse_number(s)?;
    if value > 0.0 && value < 1.0 {
        Ok(value)
    } else {
        Err(format!("must be between 0.0 and 1.0 (exclusive), got {}", value))
    }
}

fn validate_positive(s: &str) -> Result<f64, String> {
    let value: f64 = parse_number(s)?;
    if value > 0.0 && value.is_finite() {
        Ok(value)
    } else {
        Err(format!("must be a positive number, got {}", value))
    }
}

fn validate_nonzero(s: &str) -> Result<f64, String> {
    let value: f64 = parse_number(s)?;
    if value != 0.0 && value.is_finite() {
        Ok(value)
    } else {
        Err(format!("must be a finite nonzero number, got {}", value))
    }
}

fn validate_count(s: &str) -> Result<usize, String> {
    let value: usize = parse_number(s)?;
    if value >= 1 {
        Ok(value)
    } else {
        Err("must be at least 1".to_string())
    }
}

fn validate_tsne_iter(s: &str) -> Result<usize, String> {
    let value: usize = parse_number(s)?;
    if value >= 250 {
        Ok(value)
    } else {
        Err(format!("must be at least 250, got {}", value))
    }
}
