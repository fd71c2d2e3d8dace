use std::sync::Arc;

use log::debug;

use crate::cohort::{Cohort, CohortId, CohortIdSource};
use crate::data::dataset::JoinedDataset;
use crate::data::filter::{CompositeFilter, Filter};
use crate::error_cohort::{CohortSource, ErrorCohort};

/// Name of the distinguished zero-filter baseline cohort.
pub const ALL_DATA_NAME: &str = "All data";

// ---------------------------------------------------------------------------
// CohortCollection – named cohorts, baseline, selection, temporary slot
// ---------------------------------------------------------------------------

/// The set of cohorts a dashboard session works with: the "all data"
/// baseline, the named cohorts the user saved, the currently selected
/// cohort, and the single-slot temporary cohort produced by exploratory
/// interactions (a heat-map cell click, a tree-map node click).
///
/// Owns the [`CohortIdSource`] so every cohort it creates gets a
/// construction-order-unique identity.
#[derive(Debug)]
pub struct CohortCollection {
    dataset: Arc<JoinedDataset>,
    ids: CohortIdSource,
    /// Baseline at position 0, then named cohorts in save order.
    cohorts: Vec<ErrorCohort>,
    temporary: Option<ErrorCohort>,
    selected: CohortId,
}

impl CohortCollection {
    pub fn new(dataset: Arc<JoinedDataset>) -> Self {
        let ids = CohortIdSource::new();
        let baseline = ErrorCohort::new(
            Cohort::new(ALL_DATA_NAME, dataset.clone(), vec![], vec![], &ids),
            0,
            CohortSource::None,
            false,
            None,
        );
        let selected = baseline.id();
        CohortCollection {
            dataset,
            ids,
            cohorts: vec![baseline],
            temporary: None,
            selected,
        }
    }

    pub fn dataset(&self) -> &Arc<JoinedDataset> {
        &self.dataset
    }

    /// The zero-filter "all data" cohort, denominator of error coverage.
    pub fn baseline(&self) -> &ErrorCohort {
        &self.cohorts[0]
    }

    /// Baseline plus named cohorts, in save order.
    pub fn cohorts(&self) -> &[ErrorCohort] {
        &self.cohorts
    }

    pub fn temporary(&self) -> Option<&ErrorCohort> {
        self.temporary.as_ref()
    }

    /// The currently selected cohort; falls back to the baseline when the
    /// selection no longer resolves.
    pub fn selected(&self) -> &ErrorCohort {
        self.find(self.selected).unwrap_or_else(|| self.baseline())
    }

    /// Mutable access to the selected cohort, for consumers that sort it or
    /// fill its importance caches.  Falls back to the baseline like
    /// [`Self::selected`].
    pub fn selected_mut(&mut self) -> &mut ErrorCohort {
        if let Some(pos) = self.cohorts.iter().position(|c| c.id() == self.selected) {
            return &mut self.cohorts[pos];
        }
        match self.temporary {
            Some(ref mut temporary) if temporary.id() == self.selected => temporary,
            _ => &mut self.cohorts[0],
        }
    }

    /// Point the selection at an existing cohort.  Returns false when the
    /// id resolves to nothing, leaving the selection unchanged.
    pub fn select(&mut self, id: CohortId) -> bool {
        if self.find(id).is_some() {
            self.selected = id;
            true
        } else {
            false
        }
    }

    /// Save a named cohort built from the given filters and select it.
    pub fn save(
        &mut self,
        name: impl Into<String>,
        filters: Vec<Filter>,
        composite_filters: Vec<CompositeFilter>,
        source: CohortSource,
    ) -> CohortId {
        let cohort = Cohort::new(name, self.dataset.clone(), filters, composite_filters, &self.ids);
        let error_cohort = ErrorCohort::new(cohort, 0, source, false, None);
        let id = error_cohort.id();
        debug!(
            "saved cohort '{}' ({} rows)",
            error_cohort.name(),
            error_cohort.cohort().filtered_data().len()
        );
        self.cohorts.push(error_cohort);
        self.selected = id;
        id
    }

    /// Open a temporary cohort by intersecting the baseline's filters with
    /// newly supplied ones: the baseline filter list and the new list are
    /// concatenated into one conjunction.  The previous temporary cohort,
    /// if any, is evicted; the new one becomes the selection.
    pub fn open_temporary(
        &mut self,
        filters: Vec<Filter>,
        composite_filters: Vec<CompositeFilter>,
        cells: usize,
        source: CohortSource,
    ) -> CohortId {
        let base = self.baseline().cohort();
        let mut combined = base.filters().to_vec();
        combined.extend(filters);
        let mut combined_composites = base.composite_filters().to_vec();
        combined_composites.extend(composite_filters);

        let cohort = Cohort::new(
            "Temporary cohort",
            self.dataset.clone(),
            combined,
            combined_composites,
            &self.ids,
        );
        let error_cohort = ErrorCohort::new(cohort, cells, source, true, None);
        let id = error_cohort.id();
        if let Some(previous) = self.temporary.replace(error_cohort) {
            debug!("temporary cohort {} evicted", previous.id());
        }
        self.selected = id;
        id
    }

    /// Delete a named or temporary cohort.  The baseline is not deletable.
    /// Deleting the selected cohort moves the selection to the baseline.
    pub fn delete(&mut self, id: CohortId) -> bool {
        if id == self.baseline().id() {
            return false;
        }
        let removed = if let Some(pos) = self.cohorts.iter().position(|c| c.id() == id) {
            self.cohorts.remove(pos);
            true
        } else if self.temporary.as_ref().is_some_and(|t| t.id() == id) {
            self.temporary = None;
            true
        } else {
            false
        };
        if removed && self.selected == id {
            self.selected = self.baseline().id();
        }
        removed
    }

    fn find(&self, id: CohortId) -> Option<&ErrorCohort> {
        self.cohorts
            .iter()
            .find(|c| c.id() == id)
            .or_else(|| self.temporary.as_ref().filter(|t| t.id() == id))
    }
}
