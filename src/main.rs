//! idealista-eda: exploratory analysis CLI for Idealista sale listings
//!
//! Runs the hypothesis suite, the two regression pipelines and the t-SNE
//! embedding over the processed listings file.

use std::path::Path;
use std::time::Instant;

use anyhow::Result;
use clap::Parser;
use console::style;

use idealista_eda::cli::{Cli, Commands, EmbedArgs, StatsArgs, TrainArgs};
use idealista_eda::embedding::{embed_training_set, TsneConfig};
use idealista_eda::models::{boosting_pipeline, evaluate, tree_pipeline, TrainingConfig};
use idealista_eda::pipeline::{load_listings, train_test_split, DatasetSplit, FeatureSchema};
use idealista_eda::report::{
    export_embedding, export_predictions, export_report, format_test_line, prepare_export_dir,
    ReportMetadata, RunSummary,
};
use idealista_eda::stats::{run_hypothesis_suite, SuiteConfig};
use idealista_eda::utils::{
    create_spinner, finish_with_success, print_banner, print_completion, print_config, print_info,
    print_metric, print_step_header, print_step_time, print_success, RunCard,
};

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let command = cli.command();

    print_banner(env!("CARGO_PKG_VERSION"));
    print_config(&RunCard {
        input: &cli.input,
        target: &cli.target,
        test_size: cli.test_size,
        split_seed: cli.split_seed,
        export_dir: cli.export_dir.as_deref(),
    });

    if let Some(dir) = &cli.export_dir {
        prepare_export_dir(dir)?;
    }

    // Step 1: Load dataset
    let schema = FeatureSchema::with_target(&cli.target);
    print_step_header(1, "Load Listings");
    let step_start = Instant::now();
    let spinner = create_spinner("Reading listings...");
    let (df, load_stats) = load_listings(&cli.input, &schema, cli.infer_schema_length)?;
    finish_with_success(&spinner, "Listings loaded");

    println!("\n    {} Dataset Statistics:", style("✧").cyan());
    println!("      Rows read: {}", load_stats.rows_read);
    println!("      Rows with target: {}", load_stats.rows_kept);
    println!("      Columns: {}", load_stats.columns);
    println!("      Estimated memory: {:.2} MB", load_stats.memory_mb);
    print_step_time(step_start.elapsed());

    let mut summary = RunSummary::new(load_stats.rows_kept, load_stats.rows_dropped());
    let mut step = 2;

    match &command {
        Commands::Stats(args) => {
            run_stats(&df, &cli, args, step, &mut summary)?;
        }
        Commands::Train(args) => {
            let split = split_listings(&df, &schema, &cli)?;
            run_train(&split, &schema, args, step, cli.export_dir.as_deref(), &mut summary)?;
        }
        Commands::Embed(args) => {
            let split = split_listings(&df, &schema, &cli)?;
            run_embed(&split, &schema, &cli.target, args, step, cli.export_dir.as_deref(), &mut summary)?;
        }
        Commands::All { stats, train, embed } => {
            run_stats(&df, &cli, stats, step, &mut summary)?;
            step += 1;
            let split = split_listings(&df, &schema, &cli)?;
            run_train(&split, &schema, train, step, cli.export_dir.as_deref(), &mut summary)?;
            step += 1;
            run_embed(&split, &schema, &cli.target, embed, step, cli.export_dir.as_deref(), &mut summary)?;
        }
    }

    summary.display();

    if let Some(dir) = &cli.export_dir {
        let metadata = ReportMetadata::new(&cli.input, &cli.target, cli.test_size, cli.split_seed);
        let path = export_report(metadata, &summary, dir)?;
        println!();
        print_success(&format!("Report saved to {}", path.display()));
    }

    print_completion();

    Ok(())
}

fn split_listings(
    df: &polars::prelude::DataFrame,
    schema: &FeatureSchema,
    cli: &Cli,
) -> Result<DatasetSplit> {
    let split = train_test_split(df, schema, cli.test_size, cli.split_seed)?;
    print_info(&format!(
        "Split: {} train / {} test rows (seed {})",
        split.y_train.len(),
        split.y_test.len(),
        cli.split_seed
    ));
    Ok(split)
}

fn run_stats(
    df: &polars::prelude::DataFrame,
    cli: &Cli,
    args: &StatsArgs,
    step: u8,
    summary: &mut RunSummary,
) -> Result<()> {
    print_step_header(step, "Hypothesis Tests");
    let step_start = Instant::now();

    let config = SuiteConfig {
        target: cli.target.clone(),
        group_column: args.group_column.clone(),
        with_value: args.with_value,
        without_value: args.without_value,
        power: args.power,
    };

    let spinner = create_spinner("Running hypothesis tests...");
    let report = run_hypothesis_suite(df, &config)?;
    finish_with_success(&spinner, "Hypothesis tests complete");

    println!();
    for result in report.results() {
        println!("      {}", format_test_line(&result));
    }

    summary.set_hypothesis_tests(report);
    print_step_time(step_start.elapsed());
    Ok(())
}

fn run_train(
    split: &DatasetSplit,
    schema: &FeatureSchema,
    args: &TrainArgs,
    step: u8,
    export_dir: Option<&Path>,
    summary: &mut RunSummary,
) -> Result<()> {
    print_step_header(step, "Regression Models");
    let step_start = Instant::now();

    let config = TrainingConfig {
        lambda: args.lambda,
        seed: args.seed,
        max_depth: args.max_depth,
        max_iter: args.max_iter,
        learning_rate: args.learning_rate,
    };

    if args.model.includes_tree() {
        let mut pipeline = tree_pipeline(schema.clone(), &config)?;
        let spinner = create_spinner("Fitting decision tree...");
        let evaluation = evaluate(&mut pipeline, split)?;
        finish_with_success(&spinner, "Decision tree fitted");

        print_metric("Decision tree RMSE", evaluation.scores.rmse);
        print_metric("Decision tree R²", evaluation.scores.r2);

        if let Some(dir) = export_dir {
            let path = export_predictions(&evaluation, dir)?;
            print_info(&format!("Predictions saved to {}", path.display()));
        }
        summary.set_feature_importances(pipeline.feature_importances()?);
        summary.add_model(evaluation);
    }

    if args.model.includes_gbm() {
        let mut pipeline = boosting_pipeline(schema.clone(), &config)?;
        let spinner = create_spinner("Fitting histogram gradient boosting...");
        let mut evaluation = evaluate(&mut pipeline, split)?;
        evaluation.n_iter = Some(pipeline.n_iter());
        finish_with_success(
            &spinner,
            &format!("Gradient boosting fitted ({} iterations)", pipeline.n_iter()),
        );

        print_metric("Gradient boosting RMSE", evaluation.scores.rmse);
        print_metric("Gradient boosting R²", evaluation.scores.r2);

        if let Some(dir) = export_dir {
            let path = export_predictions(&evaluation, dir)?;
            print_info(&format!("Predictions saved to {}", path.display()));
        }
        summary.add_model(evaluation);
    }

    print_step_time(step_start.elapsed());
    Ok(())
}

fn run_embed(
    split: &DatasetSplit,
    schema: &FeatureSchema,
    target: &str,
    args: &EmbedArgs,
    step: u8,
    export_dir: Option<&Path>,
    summary: &mut RunSummary,
) -> Result<()> {
    print_step_header(step, "t-SNE Embedding");
    let step_start = Instant::now();

    let config = TsneConfig {
        perplexity: args.perplexity,
        max_iter: args.tsne_iter,
        random_state: args.tsne_seed,
        ..Default::default()
    };

    if args.max_samples < split.y_train.len() {
        print_info(&format!(
            "Embedding a seeded subset of {} of {} training rows",
            args.max_samples,
            split.y_train.len()
        ));
    }

    let spinner = create_spinner("Optimising embedding...");
    let outcome = embed_training_set(
        &split.x_train,
        &split.y_train,
        schema.clone(),
        &config,
        Some(args.max_samples),
    )?;
    finish_with_success(&spinner, "Embedding complete");

    print_metric("KL divergence", outcome.kl_divergence);

    if let Some(dir) = export_dir {
        let path = export_embedding(&outcome, target, dir)?;
        print_info(&format!("Embedding saved to {}", path.display()));
    }

    summary.set_embedding(outcome.summary());
    print_step_time(step_start.elapsed());
    Ok(())
}
