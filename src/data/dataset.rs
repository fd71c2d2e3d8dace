use std::collections::BTreeMap;

use log::debug;
use serde::Deserialize;
use thiserror::Error;

use super::model::{ColumnKey, ColumnMeta, FeatureValue, Row};

// ---------------------------------------------------------------------------
// Construction input
// ---------------------------------------------------------------------------

/// Parallel-array input to [`JoinedDataset::new`], as supplied by external
/// data-loading code.  `features` is row-major; all optional arrays must
/// match its row count.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct DatasetSource {
    pub features: Vec<Vec<FeatureValue>>,
    pub feature_names: Vec<String>,
    /// True label per row, as a class code (or raw value for regression).
    pub true_y: Option<Vec<f64>>,
    /// Predicted label per row.
    pub predicted_y: Option<Vec<f64>>,
    /// Per-row local explanation vector, one importance per feature.
    pub local_importances: Option<Vec<Vec<f64>>>,
    /// Class labels indexed by class code.
    pub class_names: Option<Vec<String>>,
    /// Feature names to handle as categorical even when numeric.
    pub categorical_features: Vec<String>,
}

/// Equal-width binning parameters for numeric columns.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct BinningConfig {
    pub bin_count: usize,
}

impl Default for BinningConfig {
    fn default() -> Self {
        BinningConfig { bin_count: 5 }
    }
}

/// Construction-time validation failures.  Everything past construction is
/// silent-safe and never returns a `Result`.
#[derive(Debug, Error)]
pub enum DatasetError {
    #[error("feature row {row} has {actual} values but the schema names {expected} features")]
    RowWidth {
        row: usize,
        expected: usize,
        actual: usize,
    },

    #[error("column '{column}' has {actual} values but the dataset has {expected} rows")]
    ColumnLength {
        column: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("importance vector for row {row} has {actual} values but the schema names {expected} features")]
    ImportanceWidth {
        row: usize,
        expected: usize,
        actual: usize,
    },
}

// ---------------------------------------------------------------------------
// JoinedDataset – the unified row-oriented view
// ---------------------------------------------------------------------------

/// Single source of truth for row data and column semantics: original
/// feature columns, true/predicted labels, per-row local importances, and
/// the derived classification-outcome column, joined into one row dictionary.
///
/// Many cohorts read one dataset concurrently; nothing here mutates after
/// construction except the per-column bin cells, which memoize idempotently.
#[derive(Debug, Clone)]
pub struct JoinedDataset {
    rows: Vec<Row>,
    meta: BTreeMap<ColumnKey, ColumnMeta>,
    feature_names: Vec<String>,
    class_names: Vec<String>,
    bin_count: usize,
}

impl JoinedDataset {
    pub fn new(source: DatasetSource, config: BinningConfig) -> Result<Self, DatasetError> {
        let n_rows = source.features.len();
        let n_features = source.feature_names.len();

        for (row, values) in source.features.iter().enumerate() {
            if values.len() != n_features {
                return Err(DatasetError::RowWidth {
                    row,
                    expected: n_features,
                    actual: values.len(),
                });
            }
        }
        check_length("true_y", source.true_y.as_ref().map(|v| v.len()), n_rows)?;
        check_length(
            "predicted_y",
            source.predicted_y.as_ref().map(|v| v.len()),
            n_rows,
        )?;
        if let Some(importances) = &source.local_importances {
            check_length("local_importances", Some(importances.len()), n_rows)?;
            for (row, vector) in importances.iter().enumerate() {
                if vector.len() != n_features {
                    return Err(DatasetError::ImportanceWidth {
                        row,
                        expected: n_features,
                        actual: vector.len(),
                    });
                }
            }
        }

        let mut rows: Vec<Row> = (0..n_rows)
            .map(|r| {
                let mut row = Row::new();
                row.insert(ColumnKey::Index, FeatureValue::Integer(r as i64));
                row
            })
            .collect();
        let mut meta: BTreeMap<ColumnKey, ColumnMeta> = BTreeMap::new();
        meta.insert(
            ColumnKey::Index,
            ColumnMeta::new(ColumnKey::Index, "Index"),
        );

        // Feature columns: text columns and caller-flagged numeric columns
        // are encoded as codes into a sorted label table.
        for (f, name) in source.feature_names.iter().enumerate() {
            let key = ColumnKey::Data(f);
            let column: Vec<&FeatureValue> = source.features.iter().map(|r| &r[f]).collect();
            let has_text = column
                .iter()
                .any(|v| matches!(v, FeatureValue::Text(_)));
            let flagged = source.categorical_features.iter().any(|c| c == name);

            if has_text || flagged {
                let table = category_table(&column);
                let labels: Vec<String> = table.iter().map(ToString::to_string).collect();
                for (r, value) in column.iter().enumerate() {
                    if let Some(code) = category_code(&table, value) {
                        rows[r].insert(key.clone(), FeatureValue::Integer(code));
                    }
                }
                let mut column_meta = ColumnMeta::categorical(key.clone(), name, labels);
                column_meta.is_categorical = has_text;
                column_meta.treat_as_categorical = flagged;
                meta.insert(key, column_meta);
            } else {
                for (r, value) in column.iter().enumerate() {
                    if !matches!(value, FeatureValue::Null) {
                        rows[r].insert(key.clone(), (*value).clone());
                    }
                }
                meta.insert(key.clone(), ColumnMeta::new(key, name));
            }
        }

        let class_names = source.class_names.clone().unwrap_or_default();
        if let Some(true_y) = &source.true_y {
            insert_label_column(&mut rows, &mut meta, ColumnKey::TrueY, "True label", true_y, &class_names);
        }
        if let Some(predicted_y) = &source.predicted_y {
            insert_label_column(
                &mut rows,
                &mut meta,
                ColumnKey::PredictedY,
                "Predicted label",
                predicted_y,
                &class_names,
            );
        }

        if let (Some(true_y), Some(predicted_y)) = (&source.true_y, &source.predicted_y) {
            insert_outcome_column(&mut rows, &mut meta, true_y, predicted_y, &class_names);
        }

        if let Some(importances) = &source.local_importances {
            for f in 0..n_features {
                let key = ColumnKey::LocalImportance(f);
                for (r, vector) in importances.iter().enumerate() {
                    rows[r].insert(key.clone(), FeatureValue::Float(vector[f]));
                }
                let label = format!("{} importance", source.feature_names[f]);
                meta.insert(key.clone(), ColumnMeta::new(key, label));
            }
        }

        debug!(
            "joined dataset built: {} rows, {} features, labels: {}",
            n_rows,
            n_features,
            source.true_y.is_some() && source.predicted_y.is_some()
        );

        Ok(JoinedDataset {
            rows,
            meta,
            feature_names: source.feature_names,
            class_names,
            bin_count: config.bin_count,
        })
    }

    /// All rows in source order.
    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn feature_count(&self) -> usize {
        self.feature_names.len()
    }

    pub fn feature_names(&self) -> &[String] {
        &self.feature_names
    }

    pub fn class_names(&self) -> &[String] {
        &self.class_names
    }

    pub fn column_meta(&self, key: &ColumnKey) -> Option<&ColumnMeta> {
        self.meta.get(key)
    }

    /// The display label of a column; falls back to the key's string form.
    pub fn column_label(&self, key: &ColumnKey) -> String {
        self.column_meta(key)
            .map(|m| m.label.clone())
            .unwrap_or_else(|| key.to_string())
    }

    /// Resolve an original feature name to its internal data key.
    pub fn data_key_for_feature(&self, name: &str) -> Option<ColumnKey> {
        self.feature_names
            .iter()
            .position(|n| n == name)
            .map(ColumnKey::Data)
    }

    /// The feature name behind a data key, if the index is in range.
    pub fn feature_name(&self, index: usize) -> Option<&str> {
        self.feature_names.get(index).map(String::as_str)
    }

    /// Column values across all rows in row order; `Null` where a row does
    /// not carry the column.  With `apply_binning`, values of a numeric
    /// non-categorical column map to integer bin indices, computing and
    /// memoizing the boundaries on first use.
    pub fn unwrap(&self, key: &ColumnKey, apply_binning: bool) -> Vec<FeatureValue> {
        let bounds = if apply_binning { self.add_bin(key) } else { None };
        self.rows
            .iter()
            .map(|row| {
                let value = super::model::cell(row, key);
                match bounds {
                    Some(bounds) => binned(bounds, &value),
                    None => value,
                }
            })
            .collect()
    }

    /// Compute and memoize equal-width bin boundaries for a numeric column.
    /// Idempotent: concurrent callers converge on the first computed array.
    /// Returns `None` for categorical or unknown columns.
    pub fn add_bin(&self, key: &ColumnKey) -> Option<&[f64]> {
        let meta = self.column_meta(key)?;
        if !meta.is_binnable() {
            return None;
        }
        let bounds = meta.bins.get_or_init(|| {
            let values: Vec<f64> = self
                .rows
                .iter()
                .filter_map(|row| row.get(key).and_then(FeatureValue::as_f64))
                .collect();
            let bounds = bin_boundaries(&values, self.bin_count);
            debug!("computed {} bin boundaries for {key}", bounds.len());
            bounds
        });
        Some(bounds)
    }
}

fn check_length(
    column: &'static str,
    actual: Option<usize>,
    expected: usize,
) -> Result<(), DatasetError> {
    match actual {
        Some(actual) if actual != expected => Err(DatasetError::ColumnLength {
            column,
            expected,
            actual,
        }),
        _ => Ok(()),
    }
}

/// Sorted unique non-null values of a column, the basis for its label table.
fn category_table(column: &[&FeatureValue]) -> Vec<FeatureValue> {
    let mut table: Vec<FeatureValue> = column
        .iter()
        .filter(|v| !matches!(v, FeatureValue::Null))
        .map(|v| (*v).clone())
        .collect();
    table.sort_by(|a, b| a.compare(b));
    table.dedup_by(|a, b| a.compare(b).is_eq());
    table
}

fn category_code(table: &[FeatureValue], value: &FeatureValue) -> Option<i64> {
    if matches!(value, FeatureValue::Null) {
        return None;
    }
    table
        .binary_search_by(|probe| probe.compare(value))
        .ok()
        .map(|i| i as i64)
}

fn insert_label_column(
    rows: &mut [Row],
    meta: &mut BTreeMap<ColumnKey, ColumnMeta>,
    key: ColumnKey,
    label: &str,
    values: &[f64],
    class_names: &[String],
) {
    let categorical = !class_names.is_empty();
    for (r, &v) in values.iter().enumerate() {
        let value = if categorical && v >= 0.0 && v.fract() == 0.0 {
            FeatureValue::Integer(v as i64)
        } else {
            FeatureValue::Float(v)
        };
        rows[r].insert(key.clone(), value);
    }
    let column_meta = if categorical {
        // Class order is defined by the external model's coding and is kept
        // as supplied; reordering would break the code <-> label mapping.
        ColumnMeta::categorical(key.clone(), label, class_names.to_vec())
    } else {
        ColumnMeta::new(key.clone(), label)
    };
    meta.insert(key, column_meta);
}

/// Outcome codes index the sorted label table of the derived column.
const BINARY_OUTCOMES: [&str; 4] = [
    "False negative",
    "False positive",
    "True negative",
    "True positive",
];
const MULTICLASS_OUTCOMES: [&str; 2] = ["Correct", "Incorrect"];

fn insert_outcome_column(
    rows: &mut [Row],
    meta: &mut BTreeMap<ColumnKey, ColumnMeta>,
    true_y: &[f64],
    predicted_y: &[f64],
    class_names: &[String],
) {
    let mut observed: Vec<f64> = true_y.iter().chain(predicted_y).copied().collect();
    observed.sort_by(f64::total_cmp);
    observed.dedup();
    let n_classes = if class_names.is_empty() {
        observed.len()
    } else {
        class_names.len()
    };
    let binary = n_classes == 2;
    // With explicit class names, code 1 is the positive class; otherwise the
    // greater of the two observed values plays that role.
    let positive = if class_names.is_empty() {
        observed.last().copied().unwrap_or(1.0)
    } else {
        1.0
    };

    let key = ColumnKey::ClassificationOutcome;
    for (r, (&t, &p)) in true_y.iter().zip(predicted_y).enumerate() {
        let code = if binary {
            match (t == positive, p == positive) {
                (true, false) => 0,  // false negative
                (false, true) => 1,  // false positive
                (false, false) => 2, // true negative
                (true, true) => 3,   // true positive
            }
        } else {
            i64::from(t != p) // correct = 0, incorrect = 1
        };
        rows[r].insert(key.clone(), FeatureValue::Integer(code));
    }

    let labels: Vec<String> = if binary {
        BINARY_OUTCOMES.iter().map(|s| (*s).to_string()).collect()
    } else {
        MULTICLASS_OUTCOMES
            .iter()
            .map(|s| (*s).to_string())
            .collect()
    };
    meta.insert(
        key.clone(),
        ColumnMeta::categorical(key, "Classification outcome", labels),
    );
}

/// Monotonically increasing equal-width upper bounds covering the observed
/// range; the last boundary is the observed maximum exactly.
fn bin_boundaries(values: &[f64], bin_count: usize) -> Vec<f64> {
    let mut iter = values.iter().copied().filter(|v| v.is_finite());
    let first = match iter.next() {
        Some(v) => v,
        None => return Vec::new(),
    };
    let (min, max) = iter.fold((first, first), |(lo, hi), v| (lo.min(v), hi.max(v)));
    if min == max {
        return vec![max];
    }
    let count = bin_count.max(1);
    let width = (max - min) / count as f64;
    let mut bounds: Vec<f64> = (1..=count).map(|i| min + width * i as f64).collect();
    // Guard the top end against accumulated floating point error.
    bounds[count - 1] = max;
    bounds
}

/// Map a cell through bin boundaries: index of the first boundary `>=` the
/// value (ties to the first qualifying boundary), clamped to the last bin.
pub(crate) fn binned(bounds: &[f64], value: &FeatureValue) -> FeatureValue {
    let Some(v) = value.as_f64() else {
        return FeatureValue::Null;
    };
    if bounds.is_empty() {
        return FeatureValue::Null;
    }
    let index = bounds
        .iter()
        .position(|b| *b >= v)
        .unwrap_or(bounds.len() - 1);
    FeatureValue::Integer(index as i64)
}
