//! Shared test utilities and listing fixtures

#![allow(dead_code)]

use polars::prelude::*;
use std::path::PathBuf;
use tempfile::TempDir;

const CITIES: [&str; 3] = ["Madrid", "Barcelona", "Valencia"];
const CITY_BASE_PRICE: [f64; 3] = [4000.0, 3800.0, 1800.0];
const FLOORS: [&str; 5] = ["bajo", "1", "2", "3", "atico"];

/// Price per m² of the synthetic listing `i`: city level, elevator premium, small noise.
pub fn listing_price(i: usize) -> f64 {
    let city = i % 3;
    let elevator_bonus = if i % 3 == 0 { 0.0 } else { 500.0 };
    CITY_BASE_PRICE[city] + elevator_bonus + ((i * 7919) % 200) as f64
}

/// Deterministic listings frame with every column the loader selects.
///
/// Rows listed in `missing_target` get a null `price_m2`.
pub fn create_listings_dataframe(n: usize, missing_target: &[usize]) -> DataFrame {
    let superficie: Vec<f64> = (0..n).map(|i| 40.0 + ((i * 37) % 160) as f64).collect();
    let habitaciones: Vec<i64> = (0..n).map(|i| 1 + (i % 5) as i64).collect();
    let piso: Vec<&str> = (0..n).map(|i| FLOORS[i % 5]).collect();
    // 1 = no elevator, 2 = elevator
    let ascensor: Vec<i64> = (0..n).map(|i| if i % 3 == 0 { 1 } else { 2 }).collect();
    let exterior: Vec<i64> = (0..n).map(|i| 1 + (i % 2) as i64).collect();
    let garaje: Vec<i64> = (0..n).map(|i| 1 + ((i / 2) % 2) as i64).collect();
    let terraza: Vec<i64> = (0..n).map(|i| 1 + ((i / 3) % 2) as i64).collect();
    let calle: Vec<String> = (0..n).map(|i| format!("calle_{}", i % 7)).collect();
    let barrio: Vec<String> = (0..n).map(|i| format!("barrio_{}", i % 6)).collect();
    let distrito: Vec<String> = (0..n).map(|i| format!("distrito_{}", i % 4)).collect();
    let ciudad: Vec<&str> = (0..n).map(|i| CITIES[i % 3]).collect();
    let provincia: Vec<&str> = ciudad.clone();
    let energy_consumption: Vec<Option<f64>> = (0..n)
        .map(|i| if i % 4 == 0 { None } else { Some(50.0 + (i % 9) as f64 * 10.0) })
        .collect();
    let energy_emissions: Vec<&str> = (0..n).map(|i| ["A", "B", "C", "D", "E"][i % 5]).collect();
    let price_m2: Vec<Option<f64>> = (0..n)
        .map(|i| {
            if missing_target.contains(&i) {
                None
            } else {
                Some(listing_price(i))
            }
        })
        .collect();

    df! {
        "superficie" => superficie,
        "habitaciones" => habitaciones,
        "piso" => piso,
        "ascensor" => ascensor,
        "exterior" => exterior,
        "garaje" => garaje,
        "terraza" => terraza,
        "calle" => calle,
        "barrio" => barrio,
        "distrito" => distrito,
        "ciudad" => ciudad,
        "provincia" => provincia,
        "energy_consumption" => energy_consumption,
        "energy_emissions" => energy_emissions,
        "price_m2" => price_m2,
    }
    .unwrap()
}

/// Create a temporary directory with a test CSV file
pub fn create_temp_csv(df: &mut DataFrame) -> (TempDir, PathBuf) {
    let temp_dir = TempDir::new().unwrap();
    let csv_path = temp_dir.path().join("listings.csv");

    let mut file = std::fs::File::create(&csv_path).unwrap();
    CsvWriter::new(&mut file).finish(df).unwrap();

    (temp_dir, csv_path)
}

/// Create a temporary directory with a test Parquet file
pub fn create_temp_parquet(df: &mut DataFrame) -> (TempDir, PathBuf) {
    let temp_dir = TempDir::new().unwrap();
    let parquet_path = temp_dir.path().join("listings.parquet");

    let file = std::fs::File::create(&parquet_path).unwrap();
    ParquetWriter::new(file).finish(df).unwrap();

    (temp_dir, parquet_path)
}

/// Listings CSV of `n` rows in a temp dir
pub fn create_listings_csv(n: usize, missing_target: &[usize]) -> (TempDir, PathBuf) {
    let mut df = create_listings_dataframe(n, missing_target);
    create_temp_csv(&mut df)
}

/// Assert that a DataFrame has expected shape
pub fn assert_shape(df: &DataFrame, expected_rows: usize, expected_cols: usize) {
    let (rows, cols) = df.shape();
    assert_eq!(rows, expected_rows, "Row count mismatch: expected {}, got {}", expected_rows, rows);
    assert_eq!(cols, expected_cols, "Column count mismatch: expected {}, got {}", expected_cols, cols);
}
