//! Tests for CLI argument parsing and the binary end to end

use assert_cmd::Command;
use clap::Parser;
use idealista_eda::cli::{Cli, Commands, ModelChoice, DEFAULT_INPUT, DEFAULT_MAX_SAMPLES};
use predicates::prelude::*;
use std::path::PathBuf;
use tempfile::TempDir;

#[path = "common/mod.rs"]
mod common;

use common::create_listings_csv;

#[test]
fn test_cli_default_values() {
    let cli = Cli::parse_from(["idealista-eda"]);

    assert!(cli.command.is_none());
    assert_eq!(cli.input, PathBuf::from(DEFAULT_INPUT));
    assert_eq!(cli.target, "price_m2");
    assert_eq!(cli.test_size, 0.2);
    assert_eq!(cli.split_seed, 1234);
    assert_eq!(cli.infer_schema_length, 10000);
    assert!(cli.export_dir.is_none());

    match cli.command() {
        Commands::All { stats, train, embed } => {
            assert_eq!(stats.group_column, "ascensor");
            assert_eq!(stats.power, 0.25);
            assert_eq!(train.model, ModelChoice::Both);
            assert_eq!(train.lambda, 0.25);
            assert_eq!(train.max_depth, 10);
            assert_eq!(embed.perplexity, 30.0);
            assert_eq!(embed.tsne_iter, 1000);
            assert_eq!(embed.max_samples, DEFAULT_MAX_SAMPLES);
        }
        other => panic!("expected the all command, got {:?}", other),
    }
}

#[test]
fn test_train_subcommand_options() {
    let cli = Cli::parse_from([
        "idealista-eda",
        "train",
        "--model",
        "tree",
        "--max-depth",
        "5",
        "-i",
        "listings.parquet",
    ]);

    assert_eq!(cli.input, PathBuf::from("listings.parquet"));
    match cli.command() {
        Commands::Train(args) => {
            assert_eq!(args.model, ModelChoice::Tree);
            assert!(args.model.includes_tree());
            assert!(!args.model.includes_gbm());
            assert_eq!(args.max_depth, 5);
            assert_eq!(args.seed, 123);
        }
        other => panic!("expected train, got {:?}", other),
    }
}

#[test]
fn test_all_accepts_train_and_embed_flags_together() {
    let cli = Cli::parse_from([
        "idealista-eda",
        "all",
        "--seed",
        "7",
        "--tsne-seed",
        "8",
        "--max-samples",
        "500",
    ]);

    match cli.command() {
        Commands::All { train, embed, .. } => {
            assert_eq!(train.seed, 7);
            assert_eq!(embed.tsne_seed, 8);
            assert_eq!(embed.max_samples, 500);
        }
        other => panic!("expected all, got {:?}", other),
    }
}

#[test]
fn test_invalid_values_rejected() {
    assert!(Cli::try_parse_from(["idealista-eda", "--test-size", "1.5"]).is_err());
    assert!(Cli::try_parse_from(["idealista-eda", "train", "--lambda", "0"]).is_err());
    assert!(Cli::try_parse_from(["idealista-eda", "train", "--max-depth", "0"]).is_err());
    assert!(Cli::try_parse_from(["idealista-eda", "embed", "--tsne-iter", "100"]).is_err());
    assert!(Cli::try_parse_from(["idealista-eda", "train", "--model", "forest"]).is_err());
    assert!(Cli::try_parse_from(["idealista-eda", "embed", "--max-samples", "0"]).is_err());
}

#[test]
fn test_binary_reports_missing_input() {
    Command::cargo_bin("idealista-eda")
        .unwrap()
        .args(["stats", "-i", "/nonexistent/listings.csv"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Failed to open input file"));
}

#[test]
fn test_binary_runs_hypothesis_suite() {
    let (_dir, path) = create_listings_csv(80, &[4]);

    Command::cargo_bin("idealista-eda")
        .unwrap()
        .arg("stats")
        .arg("-i")
        .arg(&path)
        .assert()
        .success()
        .stdout(predicate::str::contains("Welch's t-test: stat="));
}

#[test]
fn test_binary_exports_tree_predictions() {
    let (_dir, path) = create_listings_csv(80, &[]);
    let out = TempDir::new().unwrap();

    Command::cargo_bin("idealista-eda")
        .unwrap()
        .args(["train", "--model", "tree"])
        .arg("-i")
        .arg(&path)
        .arg("--export-dir")
        .arg(out.path())
        .assert()
        .success();

    let predictions = out.path().join("decision_tree_predictions.csv");
    let content = std::fs::read_to_string(&predictions).unwrap();
    assert!(content.starts_with("actual,predicted,residual"));
    // 16 test rows plus the header
    assert_eq!(content.lines().count(), 17);

    let report: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(out.path().join("report.json")).unwrap())
            .unwrap();
    assert_eq!(report["rows_loaded"], 80);
    assert_eq!(report["models"][0]["model"], "DecisionTree");
}

#[test]
fn test_binary_exports_embedding() {
    let (_dir, path) = create_listings_csv(80, &[]);
    let out = TempDir::new().unwrap();

    Command::cargo_bin("idealista-eda")
        .unwrap()
        .args(["embed", "--perplexity", "5", "--tsne-iter", "250"])
        .arg("-i")
        .arg(&path)
        .arg("--export-dir")
        .arg(out.path())
        .assert()
        .success();

    let content = std::fs::read_to_string(out.path().join("tsne_embedding.csv")).unwrap();
    assert!(content.starts_with("tsne_1,tsne_2,price_m2"));
    // 64 training rows plus the header
    assert_eq!(content.lines().count(), 65);
}

#[test]
fn test_binary_all_exports_every_artifact() {
    let (_dir, path) = create_listings_csv(80, &[]);
    let out = TempDir::new().unwrap();

    Command::cargo_bin("idealista-eda")
        .unwrap()
        .args([
            "all",
            "--model",
            "gbm",
            "--max-iter",
            "20",
            "--perplexity",
            "5",
            "--tsne-iter",
            "250",
            "--max-samples",
            "40",
        ])
        .arg("-i")
        .arg(&path)
        .arg("--export-dir")
        .arg(out.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("Welch's t-test: stat="));

    let predictions =
        std::fs::read_to_string(out.path().join("hist_gradient_boosting_predictions.csv")).unwrap();
    assert!(predictions.starts_with("actual,predicted,residual"));
    assert_eq!(predictions.lines().count(), 17);
    assert!(!out.path().join("decision_tree_predictions.csv").exists());

    let embedding = std::fs::read_to_string(out.path().join("tsne_embedding.csv")).unwrap();
    assert_eq!(embedding.lines().count(), 41);

    let report: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(out.path().join("report.json")).unwrap())
            .unwrap();
    assert_eq!(report["models"][0]["model"], "GradientBoosting");
}
