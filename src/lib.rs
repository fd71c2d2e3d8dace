//! Cohort and filtering engine for model-inspection dashboards.
//!
//! The engine joins a tabular dataset (feature columns, true/predicted
//! labels, per-row local explanations) into one row-oriented view, applies
//! user-defined predicate trees to select row subsets ("cohorts"), and
//! derives statistics over those subsets (error rate, error coverage,
//! average feature importance).  Chart and table components consume the
//! results through plain read accessors; nothing here renders, loads files,
//! or talks to a network.

pub mod cohort;
pub mod collection;
pub mod data;
pub mod error_cohort;

pub use cohort::{Cohort, CohortId, CohortIdSource};
pub use collection::CohortCollection;
pub use data::dataset::{BinningConfig, DatasetError, DatasetSource, JoinedDataset};
pub use data::filter::{
    evaluate_composite, evaluate_filter, evaluate_filter_list, CompositeFilter, Filter,
    FilterError, FilterMethod, Operation,
};
pub use data::model::{ColumnKey, ColumnMeta, FeatureValue, Row};
pub use error_cohort::{CohortSource, CohortStats, ErrorCohort};
