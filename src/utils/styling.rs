//! Terminal styling for step headers, status lines and the run banner

use std::path::Path;
use std::time::Duration;

use console::{style, Emoji};

pub static INFO: Emoji<'_, '_> = Emoji("ℹ️  ", "[*] ");
pub static ROCKET: Emoji<'_, '_> = Emoji("🚀 ", ">> ");
pub static CHART: Emoji<'_, '_> = Emoji("📊 ", "");
pub static FOLDER: Emoji<'_, '_> = Emoji("📂 ", "");
pub static TARGET: Emoji<'_, '_> = Emoji("🎯 ", "");
pub static SAVE: Emoji<'_, '_> = Emoji("💾 ", "");
pub static DICE: Emoji<'_, '_> = Emoji("🎲 ", "");

/// Print the application banner
pub fn print_banner(version: &str) {
    println!();
    println!(
        "    {} {}",
        style("idealista-eda").cyan().bold(),
        style(format!("v{}", version)).dim()
    );
    println!(
        "    {}",
        style("Price per m² exploration for Spanish sale listings").dim()
    );
    println!("    {}", style("━".repeat(50)).dim());
    println!();
}

/// Settings shown in the configuration card
pub struct RunCard<'a> {
    pub input: &'a Path,
    pub target: &'a str,
    pub test_size: f64,
    pub split_seed: u64,
    pub export_dir: Option<&'a Path>,
}

/// Print configuration card
pub fn print_config(card: &RunCard<'_>) {
    let box_width = 56;
    let line = "─".repeat(box_width - 2);

    println!("    ┌{}┐", line);
    println!(
        "    │ {}{}│",
        style("⚙️  Configuration").cyan().bold(),
        " ".repeat(box_width - 20)
    );
    println!("    ├{}┤", line);
    println!(
        "    │  {} Input:  {:<39}│",
        FOLDER,
        truncate_path(card.input, 38)
    );
    println!(
        "    │  {} Target: {:<39}│",
        TARGET,
        truncate_string(card.target, 38)
    );
    let export = card
        .export_dir
        .map(|p| truncate_path(p, 38))
        .unwrap_or_else(|| "(none)".to_string());
    println!("    │  {} Export: {:<39}│", SAVE, export);
    println!("    ├{}┤", line);
    println!(
        "    │  {} Test size:  {:<35}│",
        CHART,
        style(format!("{:.0}%", card.test_size * 100.0)).yellow()
    );
    println!(
        "    │  {} Split seed: {:<35}│",
        DICE,
        style(card.split_seed).yellow()
    );
    println!("    └{}┘", line);
    println!();
}

/// Print a step header with styling
pub fn print_step_header(step_num: u8, title: &str) {
    println!();
    println!(
        "    {} {} {}",
        style(format!("STEP {}", step_num)).cyan().bold(),
        style("│").dim(),
        style(title).white().bold()
    );
    println!("    {}", style("─".repeat(50)).dim());
}

/// Print a success message
pub fn print_success(message: &str) {
    println!("    {} {}", style("✓").green().bold(), style(message).green());
}

/// Print an info message
pub fn print_info(message: &str) {
    println!("    {} {}", INFO, message);
}

/// Print elapsed time for a step
pub fn print_step_time(elapsed: Duration) {
    println!(
        "    {}",
        style(format!("⏱  {:.2}s", elapsed.as_secs_f64())).dim()
    );
}

/// Print one `label: value` line with the value formatted to three decimals
pub fn print_metric(label: &str, value: f64) {
    println!("      {}: {}", label, style(format!("{:.3}", value)).yellow().bold());
}

/// Print the final completion message
pub fn print_completion() {
    println!();
    println!(
        "    {} {}",
        ROCKET,
        style("Analysis complete!").green().bold()
    );
    println!();
}

fn truncate_path(path: &Path, max_len: usize) -> String {
    let path_str = path.display().to_string();
    truncate_string(&path_str, max_len)
}

fn truncate_string(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let tail: String = s
            .chars()
            .rev()
            .take(max_len - 3)
            .collect::<Vec<_>>()
            .into_iter()
            .rev()
            .collect();
        format!("...{}", tail)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_keeps_short_strings() {
        assert_eq!(truncate_string("price_m2", 38), "price_m2");
    }

    #[test]
    fn test_truncate_keeps_tail() {
        let s = "output/idealista-sale-properties-spain_processed.csv";
        let t = truncate_string(s, 20);
        assert_eq!(t.chars().count(), 20);
        assert!(t.starts_with("..."));
        assert!(t.ends_with("_processed.csv"));
    }
}
