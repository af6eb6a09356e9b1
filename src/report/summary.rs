//! Console summary tables for a run

use comfy_table::{presets::UTF8_FULL_CONDENSED, Attribute, Cell, Color, Table};
use console::style;
use serde::Serialize;

use crate::embedding::EmbeddingSummary;
use crate::models::{FeatureImportance, ModelEvaluation};
use crate::stats::{SuiteReport, TestResult};

/// Importances listed in the summary and the JSON report
pub const TOP_IMPORTANCES: usize = 10;

const ALPHA: f64 = 0.05;

/// Everything a run produced, collected for display and export
#[derive(Debug, Default, Clone, Serialize)]
pub struct RunSummary {
    pub rows_loaded: usize,
    pub rows_dropped: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hypothesis_tests: Option<SuiteReport>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub models: Vec<ModelEvaluation>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub feature_importances: Vec<FeatureImportance>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embedding: Option<EmbeddingSummary>,
}

/// `name: stat=…, p-value=…` with three decimals
pub fn format_test_line(result: &TestResult) -> String {
    format!(
        "{}: stat={:.3}, p-value={:.3}",
        result.name, result.statistic, result.p_value
    )
}

fn print_section(icon: &str, title: &str) {
    println!();
    println!("    {} {}", style(icon).cyan(), style(title).white().bold());
    println!("    {}", style("─".repeat(50)).dim());
    println!();
}

fn print_indented(table: &Table) {
    for line in table.to_string().lines() {
        println!("    {}", line);
    }
}

fn header(names: &[&str]) -> Vec<Cell> {
    names
        .iter()
        .map(|n| Cell::new(n).add_attribute(Attribute::Bold))
        .collect()
}

impl RunSummary {
    pub fn new(rows_loaded: usize, rows_dropped: usize) -> Self {
        Self {
            rows_loaded,
            rows_dropped,
            ..Default::default()
        }
    }

    pub fn set_hypothesis_tests(&mut self, report: SuiteReport) {
        self.hypothesis_tests = Some(report);
    }

    pub fn add_model(&mut self, evaluation: ModelEvaluation) {
        self.models.push(evaluation);
    }

    /// Keep the leading importances only
    pub fn set_feature_importances(&mut self, mut importances: Vec<FeatureImportance>) {
        importances.truncate(TOP_IMPORTANCES);
        self.feature_importances = importances;
    }

    pub fn set_embedding(&mut self, summary: EmbeddingSummary) {
        self.embedding = Some(summary);
    }

    pub fn display(&self) {
        print_section("📋", "ANALYSIS SUMMARY");

        let mut table = Table::new();
        table.load_preset(UTF8_FULL_CONDENSED);
        table.set_header(header(&["Metric", "Value"]));
        table.add_row(vec![Cell::new("📁 Rows loaded"), Cell::new(self.rows_loaded)]);
        table.add_row(vec![
            Cell::new("🗑️  Rows without target"),
            Cell::new(self.rows_dropped).fg(if self.rows_dropped == 0 {
                Color::White
            } else {
                Color::Yellow
            }),
        ]);
        print_indented(&table);

        if let Some(suite) = &self.hypothesis_tests {
            self.display_tests(suite);
        }
        if !self.models.is_empty() {
            self.display_models();
        }
        if !self.feature_importances.is_empty() {
            self.display_importances();
        }
        if let Some(embedding) = &self.embedding {
            self.display_embedding(embedding);
        }
    }

    fn display_tests(&self, suite: &SuiteReport) {
        print_section("🧪", "HYPOTHESIS TESTS");

        let mut table = Table::new();
        table.load_preset(UTF8_FULL_CONDENSED);
        table.set_header(header(&["Test", "Statistic", "p-value", "df"]));

        for result in suite.results() {
            let df = match (result.df, result.df_denom) {
                (Some(a), Some(b)) => format!("{:.0}, {:.0}", a, b),
                (Some(a), None) => format!("{:.1}", a),
                _ => "-".to_string(),
            };
            let p_cell = Cell::new(format!("{:.3}", result.p_value)).fg(if result.is_significant(ALPHA) {
                Color::Green
            } else {
                Color::White
            });
            table.add_row(vec![
                Cell::new(&result.name),
                Cell::new(format!("{:.3}", result.statistic)),
                p_cell,
                Cell::new(df),
            ]);
        }
        print_indented(&table);
        println!(
            "      {}",
            style(format!(
                "n = {} (with: {}, without: {}); green p-values are below {}",
                suite.n_total, suite.n_with, suite.n_without, ALPHA
            ))
            .dim()
        );
    }

    fn display_models(&self) {
        print_section("🌲", "MODEL EVALUATION");

        let mut table = Table::new();
        table.load_preset(UTF8_FULL_CONDENSED);
        table.set_header(header(&["Model", "RMSE", "MAE", "R²", "Fit time", "Iterations"]));

        let best_r2 = self
            .models
            .iter()
            .map(|m| m.scores.r2)
            .fold(f64::NEG_INFINITY, f64::max);

        for m in &self.models {
            let r2_cell = Cell::new(format!("{:.3}", m.scores.r2));
            let r2_cell = if self.models.len() > 1 && m.scores.r2 == best_r2 {
                r2_cell.fg(Color::Green).add_attribute(Attribute::Bold)
            } else {
                r2_cell
            };
            table.add_row(vec![
                Cell::new(m.model.to_string()),
                Cell::new(format!("{:.3}", m.scores.rmse)),
                Cell::new(format!("{:.3}", m.scores.mae)),
                r2_cell,
                Cell::new(format!("{:.2}s", m.fit_seconds)),
                Cell::new(m.n_iter.map_or_else(|| "-".to_string(), |n| n.to_string())),
            ]);
        }
        print_indented(&table);
    }

    fn display_importances(&self) {
        print_section("🔎", "DECISION TREE FEATURE IMPORTANCES");

        let mut table = Table::new();
        table.load_preset(UTF8_FULL_CONDENSED);
        table.set_header(header(&["#", "Feature", "Importance"]));
        for (rank, fi) in self.feature_importances.iter().enumerate() {
            table.add_row(vec![
                Cell::new(rank + 1),
                Cell::new(&fi.feature),
                Cell::new(format!("{:.4}", fi.importance)),
            ]);
        }
        print_indented(&table);
    }

    fn display_embedding(&self, embedding: &EmbeddingSummary) {
        print_section("🗺️ ", "t-SNE EMBEDDING");

        let mut table = Table::new();
        table.load_preset(UTF8_FULL_CONDENSED);
        table.set_header(header(&["Metric", "Value"]));
        table.add_row(vec![Cell::new("Samples"), Cell::new(embedding.n_samples)]);
        table.add_row(vec![Cell::new("Input features"), Cell::new(embedding.n_features)]);
        table.add_row(vec![Cell::new("Components"), Cell::new(embedding.n_components)]);
        table.add_row(vec![Cell::new("Iterations"), Cell::new(embedding.n_iter)]);
        table.add_row(vec![
            Cell::new("KL divergence"),
            Cell::new(format!("{:.3}", embedding.kl_divergence)).fg(Color::Cyan),
        ]);
        print_indented(&table);
    }
}
