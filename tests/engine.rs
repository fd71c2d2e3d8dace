//! End-to-end exercise of the engine: dataset construction, cohort
//! selection, derived statistics, and importance aggregation, the way a
//! dashboard session drives them.

use std::sync::Arc;

use cohort_engine::{
    BinningConfig, CohortCollection, CohortSource, ColumnKey, DatasetSource, FeatureValue, Filter,
    JoinedDataset,
};

/// Ten rows with label mismatches at source indices 1 and 8.
fn loan_dataset() -> Arc<JoinedDataset> {
    let _ = env_logger::builder().is_test(true).try_init();
    let ages = [22.0, 35.0, 41.0, 29.0, 53.0, 38.0, 47.0, 61.0, 26.0, 33.0];
    let incomes = [21.0, 48.0, 67.0, 33.0, 80.0, 52.0, 71.0, 95.0, 25.0, 44.0];
    let source = DatasetSource {
        features: ages
            .iter()
            .zip(&incomes)
            .map(|(&age, &income)| vec![FeatureValue::Float(age), FeatureValue::Float(income)])
            .collect(),
        feature_names: vec!["Age".into(), "Income".into()],
        true_y: Some(vec![1.0, 0.0, 1.0, 1.0, 0.0, 1.0, 0.0, 0.0, 1.0, 0.0]),
        predicted_y: Some(vec![1.0, 1.0, 1.0, 1.0, 0.0, 1.0, 0.0, 0.0, 0.0, 0.0]),
        local_importances: Some(
            (0..10)
                .map(|i| vec![0.1 * f64::from(i), -0.05 * f64::from(i)])
                .collect(),
        ),
        class_names: Some(vec!["Reject".into(), "Approve".into()]),
        categorical_features: vec![],
    };
    Arc::new(JoinedDataset::new(source, BinningConfig::default()).unwrap())
}

#[test]
fn all_data_statistics_match_the_label_comparison() {
    let collection = CohortCollection::new(loan_dataset());
    let stats = collection.baseline().stats();
    assert_eq!(stats.total_all, 10);
    assert_eq!(stats.total_cohort, 10);
    assert_eq!(stats.total_incorrect, 2);
    assert_eq!(stats.total_correct, 8);
    assert_eq!(stats.error_rate, 20.0);
    assert_eq!(stats.error_coverage, 100.0);
}

#[test]
fn heat_map_click_builds_a_temporary_cohort_over_the_outcome_column() {
    let mut collection = CohortCollection::new(loan_dataset());
    // The derived outcome column: false negatives carry code 0.
    let id = collection.open_temporary(
        vec![Filter::includes(ColumnKey::ClassificationOutcome, vec![0.0])],
        vec![],
        1,
        CohortSource::HeatMap,
    );
    let temporary = collection.selected();
    assert_eq!(temporary.id(), id);
    assert_eq!(temporary.source(), CohortSource::HeatMap);
    assert!(temporary.is_temporary());
    // Exactly the row predicted Reject but labeled Approve (index 8).
    let stats = temporary.stats();
    assert_eq!(stats.total_cohort, 1);
    assert_eq!(stats.total_cohort_incorrect, 1);
    assert_eq!(stats.error_rate, 100.0);
    assert_eq!(stats.error_coverage, 50.0);
}

#[test]
fn saved_cohort_renders_its_filters_and_aggregates_importance() {
    let mut collection = CohortCollection::new(loan_dataset());
    let id = collection.save(
        "young applicants",
        vec![Filter::in_range(ColumnKey::Data(0), 20.0, 35.0)],
        vec![],
        CohortSource::ManuallyCreated,
    );
    assert_eq!(collection.selected().id(), id);
    assert_eq!(
        collection.selected().filters_to_string(),
        vec!["Age in (20.00, 35.00]"]
    );

    // Rows 0, 1, 3, 8, 9: mean |importance| = 0.1 * mean(0, 1, 3, 8, 9).
    let average = collection
        .selected_mut()
        .cohort_mut()
        .calculate_average_importance()
        .to_vec();
    assert!((average[0] - 0.42).abs() < 1e-12);
    assert!((average[1] - 0.21).abs() < 1e-12);
}

#[test]
fn binned_projection_uses_dataset_wide_boundaries() {
    let dataset = loan_dataset();
    let collection = CohortCollection::new(dataset.clone());
    let bounds = dataset.add_bin(&ColumnKey::Data(1)).unwrap();
    assert_eq!(bounds.len(), 5);
    assert_eq!(*bounds.last().unwrap(), 95.0);

    let binned = collection
        .baseline()
        .cohort()
        .unwrap(&ColumnKey::Data(1), true);
    assert_eq!(binned.len(), 10);
    // Observed min (21) lands in the first bin, observed max (95) in the last.
    assert_eq!(binned[0], FeatureValue::Integer(0));
    assert_eq!(binned[7], FeatureValue::Integer(4));
}

#[test]
fn dataset_without_labels_yields_zero_statistics() {
    let source = DatasetSource {
        features: vec![
            vec![FeatureValue::Float(1.0)],
            vec![FeatureValue::Float(2.0)],
        ],
        feature_names: vec!["X".into()],
        ..DatasetSource::default()
    };
    let dataset = Arc::new(JoinedDataset::new(source, BinningConfig::default()).unwrap());
    let collection = CohortCollection::new(dataset);
    let stats = collection.baseline().stats();
    assert_eq!(stats.total_all, 2);
    assert_eq!(stats.total_correct, 0);
    assert_eq!(stats.total_incorrect, 0);
    assert_eq!(stats.error_rate, 0.0);
    assert_eq!(stats.error_coverage, 0.0);
}
