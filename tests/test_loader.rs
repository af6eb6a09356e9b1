//! Integration tests for the listings loader and train/test split

use idealista_eda::error::AnalysisError;
use idealista_eda::pipeline::{
    get_column_names, load_listings, numeric_values, train_test_split, FeatureSchema,
};
use std::io::Write;
use tempfile::TempDir;

#[path = "common/mod.rs"]
mod common;

use common::{assert_shape, create_listings_csv, create_listings_dataframe, create_temp_parquet};

#[test]
fn test_rows_without_target_are_dropped() {
    let (_dir, path) = create_listings_csv(10, &[3]);
    let schema = FeatureSchema::default();

    let (df, stats) = load_listings(&path, &schema, 100).unwrap();

    assert_eq!(df.height(), 9);
    assert_eq!(stats.rows_read, 10);
    assert_eq!(stats.rows_kept, 9);
    assert_eq!(stats.rows_dropped(), 1);
    assert_shape(&df, 9, schema.required_columns().len());
}

#[test]
fn test_target_is_float_and_defined() {
    let (_dir, path) = create_listings_csv(12, &[0, 5]);
    let (df, _) = load_listings(&path, &FeatureSchema::default(), 100).unwrap();

    let target = numeric_values(&df, "price_m2").unwrap();
    assert_eq!(target.len(), 10);
    assert!(target.iter().all(|v| v.is_finite() && *v > 0.0));
}

#[test]
fn test_missing_columns_reported() {
    let temp_dir = TempDir::new().unwrap();
    let csv_path = temp_dir.path().join("partial.csv");
    let mut file = std::fs::File::create(&csv_path).unwrap();
    writeln!(file, "superficie,price_m2").unwrap();
    writeln!(file, "80,3000").unwrap();
    drop(file);

    let err = load_listings(&csv_path, &FeatureSchema::default(), 100).unwrap_err();
    match err.downcast_ref::<AnalysisError>() {
        Some(AnalysisError::MissingColumns { columns }) => {
            assert!(columns.contains(&"habitaciones".to_string()));
            assert!(!columns.contains(&"superficie".to_string()));
        }
        other => panic!("expected MissingColumns, got {:?}", other),
    }
}

#[test]
fn test_nonexistent_file() {
    let result = load_listings(
        std::path::Path::new("/nonexistent/listings.csv"),
        &FeatureSchema::default(),
        100,
    );
    assert!(result.is_err());
}

#[test]
fn test_unsupported_extension() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("listings.txt");
    std::fs::write(&path, "a,b\n1,2\n").unwrap();

    let err = get_column_names(&path, 100).unwrap_err();
    assert!(err.to_string().contains("Unsupported file format"));
}

#[test]
fn test_load_parquet() {
    let mut df = create_listings_dataframe(15, &[2]);
    let (_dir, path) = create_temp_parquet(&mut df);

    let (loaded, stats) = load_listings(&path, &FeatureSchema::default(), 100).unwrap();
    assert_eq!(loaded.height(), 14);
    assert_eq!(stats.rows_read, 15);
}

#[test]
fn test_split_is_deterministic_for_seed() {
    let (_dir, path) = create_listings_csv(50, &[]);
    let schema = FeatureSchema::default();
    let (df, _) = load_listings(&path, &schema, 100).unwrap();

    let a = train_test_split(&df, &schema, 0.2, 1234).unwrap();
    let b = train_test_split(&df, &schema, 0.2, 1234).unwrap();

    assert_eq!(a.y_train.len(), 40);
    assert_eq!(a.y_test.len(), 10);
    assert_eq!(a.y_train, b.y_train);
    assert_eq!(a.y_test, b.y_test);
    assert!(a.x_train.equals_missing(&b.x_train));
    assert!(a.x_train.get_column_names().iter().all(|c| c.as_str() != "price_m2"));
}

#[test]
fn test_split_differs_across_seeds() {
    let (_dir, path) = create_listings_csv(50, &[]);
    let schema = FeatureSchema::default();
    let (df, _) = load_listings(&path, &schema, 100).unwrap();

    let a = train_test_split(&df, &schema, 0.2, 1234).unwrap();
    let b = train_test_split(&df, &schema, 0.2, 99).unwrap();
    assert_ne!(a.y_test, b.y_test);
}
