use serde::{Deserialize, Serialize};

use crate::cohort::{Cohort, CohortId};
use crate::data::dataset::JoinedDataset;
use crate::data::filter::{CompositeFilter, Filter, FilterMethod, Operation};
use crate::data::model::{ColumnKey, FeatureValue, Row};

// ---------------------------------------------------------------------------
// Statistics
// ---------------------------------------------------------------------------

/// Model-performance statistics of a cohort against the full dataset.
///
/// `error_rate` and `error_coverage` are percentages and are defined as `0`
/// when their denominator is zero, so display code never needs null checks
/// on these two fields.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct CohortStats {
    pub total_all: usize,
    pub total_cohort: usize,
    pub total_correct: usize,
    pub total_cohort_correct: usize,
    pub total_incorrect: usize,
    pub total_cohort_incorrect: usize,
    pub error_rate: f64,
    pub error_coverage: f64,
}

/// Which user interaction produced a cohort.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CohortSource {
    #[default]
    None,
    HeatMap,
    TreeMap,
    ManuallyCreated,
}

// ---------------------------------------------------------------------------
// ErrorCohort – a cohort annotated with error statistics
// ---------------------------------------------------------------------------

/// A [`Cohort`] plus statistics derived once at construction.
///
/// Statistics never change after construction: editing filters means
/// building a new `ErrorCohort` that supersedes this one in its collection.
#[derive(Debug)]
pub struct ErrorCohort {
    cohort: Cohort,
    stats: CohortStats,
    source: CohortSource,
    is_temporary: bool,
    /// Cell count of the originating heat-map/tree-map selection, if any.
    cells: usize,
}

impl ErrorCohort {
    /// Wrap a cohort.  With `precomputed` statistics (an external metric
    /// engine already did the work, e.g. for regression error) the fields
    /// are copied verbatim; otherwise the cohort is sorted by its row-index
    /// column and statistics are derived from the true/predicted label
    /// columns.
    pub fn new(
        mut cohort: Cohort,
        cells: usize,
        source: CohortSource,
        is_temporary: bool,
        precomputed: Option<CohortStats>,
    ) -> Self {
        let stats = match precomputed {
            Some(stats) => stats,
            None => {
                cohort.sort(None, false);
                derive_stats(&cohort)
            }
        };
        ErrorCohort {
            cohort,
            stats,
            source,
            is_temporary,
            cells,
        }
    }

    pub fn cohort(&self) -> &Cohort {
        &self.cohort
    }

    /// Mutable access for consumers that sort or fill importance caches.
    /// The statistics themselves stay fixed.
    pub fn cohort_mut(&mut self) -> &mut Cohort {
        &mut self.cohort
    }

    pub fn stats(&self) -> &CohortStats {
        &self.stats
    }

    pub fn source(&self) -> CohortSource {
        self.source
    }

    pub fn is_temporary(&self) -> bool {
        self.is_temporary
    }

    pub fn cells(&self) -> usize {
        self.cells
    }

    pub fn id(&self) -> CohortId {
        self.cohort.id()
    }

    pub fn name(&self) -> &str {
        self.cohort.name()
    }

    /// Render every simple filter and every composite subtree as a
    /// human-readable clause.  This is a display aid, not a serialization
    /// format; it round-trips semantically, not textually.
    pub fn filters_to_string(&self) -> Vec<String> {
        let dataset = self.cohort.dataset();
        self.cohort
            .filters()
            .iter()
            .map(|filter| render_filter(dataset, filter))
            .chain(
                self.cohort
                    .composite_filters()
                    .iter()
                    .map(|node| render_composite(dataset, node)),
            )
            .collect()
    }

    // -- Column relabeling ---------------------------------------------------
    //
    // Filters authored against internal data keys ("Data0") must be shown to
    // users against the original feature name, and UI-authored filters must
    // be translated back before they are applied to the joined dataset.

    /// `Data(i)` column references become `Feature(name)`; everything else
    /// passes through, as do data keys with no matching feature.
    pub fn relabel_filter_to_feature_names(filter: &Filter, dataset: &JoinedDataset) -> Filter {
        let column = match &filter.column {
            ColumnKey::Data(i) => match dataset.feature_name(*i) {
                Some(name) => ColumnKey::Feature(name.to_string()),
                None => filter.column.clone(),
            },
            other => other.clone(),
        };
        Filter {
            column,
            ..filter.clone()
        }
    }

    /// `Feature(name)` column references become `Data(i)`; unknown feature
    /// names pass through unchanged.
    pub fn relabel_filter_to_data_keys(filter: &Filter, dataset: &JoinedDataset) -> Filter {
        let column = match &filter.column {
            ColumnKey::Feature(name) => dataset
                .data_key_for_feature(name)
                .unwrap_or_else(|| filter.column.clone()),
            other => other.clone(),
        };
        Filter {
            column,
            ..filter.clone()
        }
    }

    /// [`Self::relabel_filter_to_feature_names`] applied over a whole tree.
    pub fn relabel_composite_to_feature_names(
        node: &CompositeFilter,
        dataset: &JoinedDataset,
    ) -> CompositeFilter {
        map_composite(node, &|filter| {
            Self::relabel_filter_to_feature_names(filter, dataset)
        })
    }

    /// [`Self::relabel_filter_to_data_keys`] applied over a whole tree.
    pub fn relabel_composite_to_data_keys(
        node: &CompositeFilter,
        dataset: &JoinedDataset,
    ) -> CompositeFilter {
        map_composite(node, &|filter| {
            Self::relabel_filter_to_data_keys(filter, dataset)
        })
    }
}

fn map_composite(
    node: &CompositeFilter,
    relabel: &dyn Fn(&Filter) -> Filter,
) -> CompositeFilter {
    match node {
        CompositeFilter::Leaf(filter) => CompositeFilter::Leaf(relabel(filter)),
        CompositeFilter::Node {
            children,
            operation,
        } => CompositeFilter::Node {
            children: children
                .iter()
                .map(|child| map_composite(child, relabel))
                .collect(),
            operation: *operation,
        },
    }
}

// ---------------------------------------------------------------------------
// Statistics derivation
// ---------------------------------------------------------------------------

fn derive_stats(cohort: &Cohort) -> CohortStats {
    let dataset = cohort.dataset();
    let (total_correct, total_incorrect) = count_outcomes(dataset.rows());
    let (total_cohort_correct, total_cohort_incorrect) = count_outcomes(cohort.filtered_data());
    let total_all = dataset.len();
    let total_cohort = cohort.filtered_data().len();

    let error_rate = if total_cohort == 0 {
        0.0
    } else {
        total_cohort_incorrect as f64 / total_cohort as f64 * 100.0
    };
    let error_coverage = if total_incorrect == 0 {
        0.0
    } else {
        total_cohort_incorrect as f64 / total_incorrect as f64 * 100.0
    };

    CohortStats {
        total_all,
        total_cohort,
        total_correct,
        total_cohort_correct,
        total_incorrect,
        total_cohort_incorrect,
        error_rate,
        error_coverage,
    }
}

/// `(correct, incorrect)` counts over rows that carry both label columns.
fn count_outcomes(rows: &[Row]) -> (usize, usize) {
    rows.iter()
        .filter_map(|row| {
            let truth = row.get(&ColumnKey::TrueY).and_then(FeatureValue::as_f64)?;
            let predicted = row
                .get(&ColumnKey::PredictedY)
                .and_then(FeatureValue::as_f64)?;
            Some(truth == predicted)
        })
        .fold((0, 0), |(correct, incorrect), matched| {
            if matched {
                (correct + 1, incorrect)
            } else {
                (correct, incorrect + 1)
            }
        })
}

// ---------------------------------------------------------------------------
// Filter rendering
// ---------------------------------------------------------------------------

fn render_filter(dataset: &JoinedDataset, filter: &Filter) -> String {
    let label = dataset.column_label(&filter.column);
    let meta = dataset.column_meta(&filter.column);
    let categorical = meta.is_some_and(|m| m.is_effectively_categorical());
    let fmt = |a: &f64| -> String {
        match meta {
            Some(meta) if categorical => meta.category_label(*a),
            _ => format!("{a:.2}"),
        }
    };
    let first = || {
        filter
            .arg
            .first()
            .map(&fmt)
            .unwrap_or_else(|| "?".to_string())
    };
    let joined = || {
        filter
            .arg
            .iter()
            .map(&fmt)
            .collect::<Vec<_>>()
            .join(", ")
    };

    match filter.method {
        FilterMethod::Equal => format!("{label} == {}", first()),
        FilterMethod::GreaterThan => format!("{label} > {}", first()),
        FilterMethod::GreaterThanEqual => format!("{label} >= {}", first()),
        FilterMethod::LessThan => format!("{label} < {}", first()),
        FilterMethod::LessThanEqual => format!("{label} <= {}", first()),
        FilterMethod::InRange => {
            let low = first();
            let high = filter
                .arg
                .get(1)
                .map(&fmt)
                .unwrap_or_else(|| "?".to_string());
            format!("{label} in ({low}, {high}]")
        }
        FilterMethod::Includes => format!("{label} in ({})", joined()),
        FilterMethod::Excludes => format!("{label} not in ({})", joined()),
    }
}

fn render_composite(dataset: &JoinedDataset, node: &CompositeFilter) -> String {
    match node {
        CompositeFilter::Leaf(filter) => render_filter(dataset, filter),
        CompositeFilter::Node {
            children,
            operation,
        } => {
            let glue = match operation {
                Operation::And => " AND ",
                Operation::Or => " OR ",
            };
            let joined = children
                .iter()
                .map(|child| render_composite(dataset, child))
                .collect::<Vec<_>>()
                .join(glue);
            if children.len() > 1 {
                format!("({joined})")
            } else {
                joined
            }
        }
    }
}
