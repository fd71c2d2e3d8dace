use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use log::debug;
use serde::{Deserialize, Serialize};

use crate::data::dataset::{binned, JoinedDataset};
use crate::data::filter::{
    evaluate_composite, evaluate_filter_list, CompositeFilter, Filter,
};
use crate::data::model::{cell, ColumnKey, FeatureValue, Row};

// ---------------------------------------------------------------------------
// Cohort identity
// ---------------------------------------------------------------------------

/// Construction-order-unique cohort identifier.  Used only for equality and
/// selection by consumers; carries no ordering meaning across contexts.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct CohortId(u64);

impl fmt::Display for CohortId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Issues strictly increasing cohort IDs.  Owned by whoever manages a family
/// of cohorts (typically [`crate::CohortCollection`]) and passed to every
/// construction, so there is no hidden global counter.
#[derive(Debug, Default)]
pub struct CohortIdSource {
    next: AtomicU64,
}

impl CohortIdSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_id(&self) -> CohortId {
        CohortId(self.next.fetch_add(1, Ordering::Relaxed))
    }
}

// ---------------------------------------------------------------------------
// Cohort – a filtered row subset with cached derived data
// ---------------------------------------------------------------------------

/// A named subset of dataset rows selected by the conjunction of a simple
/// filter list and any number of composite filter trees.
///
/// `filtered_data` is recomputed on every filter mutation, so reads always
/// reflect the current filters.  The importance caches are cleared by every
/// mutator; sorting leaves them intact because the row set is unchanged.
#[derive(Debug)]
pub struct Cohort {
    name: String,
    dataset: Arc<JoinedDataset>,
    filters: Vec<Filter>,
    composite_filters: Vec<CompositeFilter>,
    filtered_data: Vec<Row>,
    id: CohortId,
    last_sort: Option<(ColumnKey, bool)>,
    cached_average_importance: Option<Vec<f64>>,
    cached_transposed_importances: Option<Vec<Vec<f64>>>,
}

impl Cohort {
    pub fn new(
        name: impl Into<String>,
        dataset: Arc<JoinedDataset>,
        filters: Vec<Filter>,
        composite_filters: Vec<CompositeFilter>,
        ids: &CohortIdSource,
    ) -> Self {
        let mut cohort = Cohort {
            name: name.into(),
            dataset,
            filters,
            composite_filters,
            filtered_data: Vec::new(),
            id: ids.next_id(),
            last_sort: None,
            cached_average_importance: None,
            cached_transposed_importances: None,
        };
        cohort.apply_filters();
        cohort
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn id(&self) -> CohortId {
        self.id
    }

    pub fn dataset(&self) -> &Arc<JoinedDataset> {
        &self.dataset
    }

    pub fn filters(&self) -> &[Filter] {
        &self.filters
    }

    pub fn composite_filters(&self) -> &[CompositeFilter] {
        &self.composite_filters
    }

    /// Rows matching the current filters, in the order of the last sort (or
    /// source order after any filter mutation).
    pub fn filtered_data(&self) -> &[Row] {
        &self.filtered_data
    }

    /// Replace the simple filter at `index`, or append when `index` is
    /// `None` or out of range.  Recomputes the filtered rows.
    pub fn update_filter(&mut self, filter: Filter, index: Option<usize>) {
        match index {
            Some(i) if i < self.filters.len() => self.filters[i] = filter,
            _ => self.filters.push(filter),
        }
        self.apply_filters();
    }

    /// Remove the simple filter at `index` and recompute; out-of-range
    /// indices are ignored.
    pub fn delete_filter(&mut self, index: usize) {
        if index < self.filters.len() {
            self.filters.remove(index);
            self.apply_filters();
        }
    }

    /// Stable sort of the filtered rows by a column (row-index column when
    /// `None`).  Memoized against the last key/direction: an identical call
    /// is a no-op, and flipping only the direction reverses in place.
    pub fn sort(&mut self, column: Option<ColumnKey>, reverse: bool) {
        let column = column.unwrap_or(ColumnKey::Index);
        match &self.last_sort {
            Some((key, rev)) if *key == column && *rev == reverse => return,
            Some((key, _)) if *key == column => self.filtered_data.reverse(),
            _ => {
                self.filtered_data
                    .sort_by(|a, b| cell(a, &column).compare(&cell(b, &column)));
                if reverse {
                    self.filtered_data.reverse();
                }
            }
        }
        self.last_sort = Some((column, reverse));
    }

    /// Two-level sort: rows for which `grouping` holds sort entirely before
    /// the rest, each bucket internally ordered by the column comparator.
    pub fn sort_by_group<F>(&mut self, column: ColumnKey, grouping: F)
    where
        F: Fn(&Row) -> bool,
    {
        self.filtered_data.sort_by(|a, b| {
            let bucket = |row: &Row| u8::from(!grouping(row));
            bucket(a)
                .cmp(&bucket(b))
                .then_with(|| cell(a, &column).compare(&cell(b, &column)))
        });
        // Not a plain column order; the sort memo no longer applies.
        self.last_sort = None;
    }

    /// Column projection over the filtered rows (not the full dataset),
    /// optionally mapped to bin indices via the dataset-level boundaries.
    pub fn unwrap(&self, column: &ColumnKey, apply_binning: bool) -> Vec<FeatureValue> {
        let bounds = if apply_binning {
            self.dataset.add_bin(column)
        } else {
            None
        };
        self.filtered_data
            .iter()
            .map(|row| {
                let value = cell(row, column);
                match bounds {
                    Some(bounds) => binned(bounds, &value),
                    None => value,
                }
            })
            .collect()
    }

    /// Per-feature mean of absolute local importances across the filtered
    /// rows.  A feature with zero contributing rows yields `NaN` ("no
    /// data"), never `0` ("zero importance").  Memoized until the filtered
    /// set changes.
    pub fn calculate_average_importance(&mut self) -> &[f64] {
        let dataset = &self.dataset;
        let rows = &self.filtered_data;
        self.cached_average_importance
            .get_or_insert_with(|| average_importance(dataset, rows))
            .as_slice()
    }

    /// Feature-major matrix of the filtered rows' local importance vectors.
    /// Empty when the cohort is empty.  Memoized alongside the average.
    pub fn transposed_local_feature_importances(&mut self) -> &[Vec<f64>] {
        let dataset = &self.dataset;
        let rows = &self.filtered_data;
        self.cached_transposed_importances
            .get_or_insert_with(|| transposed_importances(dataset, rows))
            .as_slice()
    }

    /// Drop the memoized importance aggregates.  Called by every filter
    /// mutator; also available to callers that mutate underlying data.
    pub fn clear_cached_importances(&mut self) {
        self.cached_average_importance = None;
        self.cached_transposed_importances = None;
    }

    fn apply_filters(&mut self) {
        self.filtered_data = self
            .dataset
            .rows()
            .iter()
            .filter(|row| {
                evaluate_filter_list(row, &self.filters)
                    && self
                        .composite_filters
                        .iter()
                        .all(|node| evaluate_composite(row, node))
            })
            .cloned()
            .collect();
        self.last_sort = None;
        self.clear_cached_importances();
        debug!(
            "cohort '{}' recomputed: {} of {} rows match",
            self.name,
            self.filtered_data.len(),
            self.dataset.len()
        );
    }
}

fn average_importance(dataset: &JoinedDataset, rows: &[Row]) -> Vec<f64> {
    let n_features = dataset.feature_count();
    let mut sums = vec![0.0_f64; n_features];
    let mut counts = vec![0_usize; n_features];
    for row in rows {
        for (f, (sum, count)) in sums.iter_mut().zip(&mut counts).enumerate() {
            if let Some(v) = row
                .get(&ColumnKey::LocalImportance(f))
                .and_then(FeatureValue::as_f64)
            {
                *sum += v.abs();
                *count += 1;
            }
        }
    }
    sums.iter()
        .zip(&counts)
        .map(|(sum, &count)| {
            if count == 0 {
                f64::NAN
            } else {
                sum / count as f64
            }
        })
        .collect()
}

fn transposed_importances(dataset: &JoinedDataset, rows: &[Row]) -> Vec<Vec<f64>> {
    if rows.is_empty() {
        return Vec::new();
    }
    (0..dataset.feature_count())
        .map(|f| {
            let key = ColumnKey::LocalImportance(f);
            rows.iter()
                .map(|row| row.get(&key).and_then(FeatureValue::as_f64).unwrap_or(f64::NAN))
                .collect()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::dataset::{BinningConfig, DatasetSource};

    fn dataset() -> Arc<JoinedDataset> {
        let source = DatasetSource {
            features: vec![
                vec![FeatureValue::Float(40.0), FeatureValue::Text("a".into())],
                vec![FeatureValue::Float(20.0), FeatureValue::Text("b".into())],
                vec![FeatureValue::Float(30.0), FeatureValue::Text("a".into())],
                vec![FeatureValue::Float(50.0), FeatureValue::Text("b".into())],
            ],
            feature_names: vec!["Age".into(), "Group".into()],
            true_y: Some(vec![1.0, 0.0, 1.0, 0.0]),
            predicted_y: Some(vec![1.0, 1.0, 1.0, 0.0]),
            local_importances: Some(vec![
                vec![0.4, -0.1],
                vec![-0.2, 0.3],
                vec![0.6, 0.1],
                vec![0.0, -0.5],
            ]),
            class_names: Some(vec!["No".into(), "Yes".into()]),
            categorical_features: vec![],
        };
        Arc::new(JoinedDataset::new(source, BinningConfig::default()).unwrap())
    }

    fn ages(cohort: &Cohort) -> Vec<f64> {
        cohort
            .filtered_data()
            .iter()
            .map(|r| cell(r, &ColumnKey::Data(0)).as_f64().unwrap())
            .collect()
    }

    #[test]
    fn construction_materializes_the_matching_rows() {
        let ids = CohortIdSource::new();
        let cohort = Cohort::new(
            "age > 25",
            dataset(),
            vec![Filter::greater_than(ColumnKey::Data(0), 25.0)],
            vec![],
            &ids,
        );
        assert_eq!(ages(&cohort), vec![40.0, 30.0, 50.0]);
    }

    #[test]
    fn composite_trees_conjoin_with_the_simple_filters() {
        let ids = CohortIdSource::new();
        // (Group == a OR Age >= 50) AND Age > 25
        let tree = CompositeFilter::or(vec![
            CompositeFilter::from(Filter::equal(ColumnKey::Data(1), 0.0)),
            CompositeFilter::from(Filter::greater_than_equal(ColumnKey::Data(0), 50.0)),
        ]);
        let cohort = Cohort::new(
            "combined",
            dataset(),
            vec![Filter::greater_than(ColumnKey::Data(0), 25.0)],
            vec![tree],
            &ids,
        );
        assert_eq!(ages(&cohort), vec![40.0, 30.0, 50.0]);
    }

    #[test]
    fn filter_mutations_recompute_the_filtered_rows() {
        let ids = CohortIdSource::new();
        let mut cohort = Cohort::new("all", dataset(), vec![], vec![], &ids);
        assert_eq!(cohort.filtered_data().len(), 4);

        cohort.update_filter(Filter::less_than(ColumnKey::Data(0), 35.0), None);
        assert_eq!(ages(&cohort), vec![20.0, 30.0]);

        cohort.update_filter(Filter::less_than(ColumnKey::Data(0), 25.0), Some(0));
        assert_eq!(ages(&cohort), vec![20.0]);

        // Out-of-range replacement appends instead.
        cohort.update_filter(Filter::greater_than(ColumnKey::Data(0), 0.0), Some(9));
        assert_eq!(cohort.filters().len(), 2);

        cohort.delete_filter(0);
        assert_eq!(cohort.filtered_data().len(), 4);

        cohort.delete_filter(42); // ignored
        assert_eq!(cohort.filters().len(), 1);
    }

    #[test]
    fn sort_is_memoized_and_direction_flips_reverse_in_place() {
        let ids = CohortIdSource::new();
        let mut cohort = Cohort::new("all", dataset(), vec![], vec![], &ids);
        let age = ColumnKey::Data(0);

        cohort.sort(Some(age.clone()), false);
        assert_eq!(ages(&cohort), vec![20.0, 30.0, 40.0, 50.0]);

        cohort.sort(Some(age.clone()), false); // identical call: no-op
        assert_eq!(ages(&cohort), vec![20.0, 30.0, 40.0, 50.0]);

        cohort.sort(Some(age.clone()), true); // flip: exact reversal
        assert_eq!(ages(&cohort), vec![50.0, 40.0, 30.0, 20.0]);

        cohort.sort(Some(age), false);
        assert_eq!(ages(&cohort), vec![20.0, 30.0, 40.0, 50.0]);

        // Default sort column is the row index.
        cohort.sort(None, false);
        assert_eq!(ages(&cohort), vec![40.0, 20.0, 30.0, 50.0]);
    }

    #[test]
    fn sort_by_group_orders_true_bucket_first() {
        let ids = CohortIdSource::new();
        let mut cohort = Cohort::new("all", dataset(), vec![], vec![], &ids);
        let group_b = Filter::equal(ColumnKey::Data(1), 1.0);
        cohort.sort_by_group(ColumnKey::Data(0), |row| {
            crate::data::filter::evaluate_filter(row, &group_b)
        });
        // Group b rows (ages 20, 50) first, each bucket age-ascending.
        assert_eq!(ages(&cohort), vec![20.0, 50.0, 30.0, 40.0]);
    }

    #[test]
    fn unwrap_projects_only_the_filtered_rows() {
        let ids = CohortIdSource::new();
        let cohort = Cohort::new(
            "age > 25",
            dataset(),
            vec![Filter::greater_than(ColumnKey::Data(0), 25.0)],
            vec![],
            &ids,
        );
        assert_eq!(
            cohort.unwrap(&ColumnKey::Data(0), false),
            vec![
                FeatureValue::Float(40.0),
                FeatureValue::Float(30.0),
                FeatureValue::Float(50.0)
            ]
        );
        // Binned indices come from dataset-wide boundaries (range 20..50).
        let binned = cohort.unwrap(&ColumnKey::Data(0), true);
        assert_eq!(binned.len(), 3);
        assert_eq!(binned[2], FeatureValue::Integer(4)); // 50 = observed max
    }

    #[test]
    fn average_importance_is_mean_absolute_and_memoized() {
        let ids = CohortIdSource::new();
        let mut cohort = Cohort::new("all", dataset(), vec![], vec![], &ids);
        let avg = cohort.calculate_average_importance().to_vec();
        assert_eq!(avg.len(), 2);
        assert!((avg[0] - 0.3).abs() < 1e-12); // (0.4+0.2+0.6+0.0)/4
        assert!((avg[1] - 0.25).abs() < 1e-12); // (0.1+0.3+0.1+0.5)/4

        // Filter mutation invalidates the cache.
        cohort.update_filter(Filter::greater_than(ColumnKey::Data(0), 35.0), None);
        let avg = cohort.calculate_average_importance().to_vec();
        assert!((avg[0] - 0.2).abs() < 1e-12); // (0.4+0.0)/2
    }

    #[test]
    fn empty_cohort_yields_nan_per_feature_and_an_empty_matrix() {
        let ids = CohortIdSource::new();
        let mut cohort = Cohort::new(
            "none",
            dataset(),
            vec![Filter::greater_than(ColumnKey::Data(0), 1000.0)],
            vec![],
            &ids,
        );
        assert!(cohort.filtered_data().is_empty());
        let avg = cohort.calculate_average_importance().to_vec();
        assert_eq!(avg.len(), 2);
        assert!(avg.iter().all(|v| v.is_nan()));
        assert!(cohort.transposed_local_feature_importances().is_empty());
    }

    #[test]
    fn transposed_matrix_is_feature_major() {
        let ids = CohortIdSource::new();
        let mut cohort = Cohort::new(
            "age <= 30",
            dataset(),
            vec![Filter::less_than_equal(ColumnKey::Data(0), 30.0)],
            vec![],
            &ids,
        );
        let matrix = cohort.transposed_local_feature_importances();
        assert_eq!(matrix, &[vec![-0.2, 0.6], vec![0.3, 0.1]]);
    }

    #[test]
    fn ids_are_strictly_increasing_and_distinct() {
        let ids = CohortIdSource::new();
        let ds = dataset();
        let issued: Vec<CohortId> = (0..5)
            .map(|i| Cohort::new(format!("c{i}"), ds.clone(), vec![], vec![], &ids).id())
            .collect();
        for pair in issued.windows(2) {
            assert!(pair[0] < pair[1]);
        }
    }
}
