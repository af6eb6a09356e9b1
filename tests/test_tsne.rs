//! t-SNE embedding of preprocessed listings

use idealista_eda::embedding::{embed_training_set, TsneConfig};
use idealista_eda::pipeline::{numeric_values, FeatureSchema};

#[path = "common/mod.rs"]
mod common;

use common::create_listings_dataframe;

fn quick_config() -> TsneConfig {
    TsneConfig {
        perplexity: 5.0,
        max_iter: 250,
        ..Default::default()
    }
}

#[test]
fn test_embeds_every_training_row() {
    let df = create_listings_dataframe(60, &[]);
    let target = numeric_values(&df, "price_m2").unwrap();

    let outcome =
        embed_training_set(&df, &target, FeatureSchema::default(), &quick_config(), None).unwrap();

    assert_eq!(outcome.embedding.nrows(), 60);
    assert_eq!(outcome.embedding.ncols(), 2);
    assert_eq!(outcome.target, target);
    assert!(outcome.kl_divergence.is_finite());
    for i in 0..60 {
        assert!(outcome.embedding[(i, 0)].is_finite());
        assert!(outcome.embedding[(i, 1)].is_finite());
    }

    let summary = outcome.summary();
    assert_eq!(summary.n_samples, 60);
    assert_eq!(summary.n_components, 2);
}

#[test]
fn test_max_samples_embeds_seeded_subset() {
    let df = create_listings_dataframe(60, &[]);
    let target = numeric_values(&df, "price_m2").unwrap();
    let config = quick_config();

    let a = embed_training_set(&df, &target, FeatureSchema::default(), &config, Some(20)).unwrap();
    let b = embed_training_set(&df, &target, FeatureSchema::default(), &config, Some(20)).unwrap();

    assert_eq!(a.embedding.nrows(), 20);
    assert_eq!(a.target.len(), 20);
    assert_eq!(a.target, b.target);
    assert!(a.target.iter().all(|y| target.contains(y)));
}

#[test]
fn test_perplexity_must_be_below_sample_count() {
    let df = create_listings_dataframe(10, &[]);
    let target = numeric_values(&df, "price_m2").unwrap();

    let result = embed_training_set(
        &df,
        &target,
        FeatureSchema::default(),
        &TsneConfig::default(),
        None,
    );
    assert!(result.is_err());
}

#[test]
fn test_target_length_mismatch() {
    let df = create_listings_dataframe(10, &[]);
    let result = embed_training_set(
        &df,
        &[1.0, 2.0],
        FeatureSchema::default(),
        &quick_config(),
        None,
    );
    assert!(result.is_err());
}
