use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

// ---------------------------------------------------------------------------
// ColumnKey – schema-aware reference to a joined-dataset column
// ---------------------------------------------------------------------------

/// A reference to one logical column of the joined dataset.
///
/// The canonical string forms (`"Index"`, `"TrueY"`, `"Data0"`, …) are what
/// UI-authored filters carry over the wire; `Feature` holds anything else,
/// typically an original feature name such as `"Age"`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ColumnKey {
    /// Position of the row in the unfiltered source data.
    Index,
    /// True label column.
    TrueY,
    /// Predicted label column.
    PredictedY,
    /// Derived correctness outcome per row (see `JoinedDataset`).
    ClassificationOutcome,
    /// The n-th feature column under its internal data key (`"Data3"`).
    Data(usize),
    /// Per-row local importance of the n-th feature.
    LocalImportance(usize),
    /// A column referenced by its human-readable feature name.
    Feature(String),
}

impl fmt::Display for ColumnKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ColumnKey::Index => write!(f, "Index"),
            ColumnKey::TrueY => write!(f, "TrueY"),
            ColumnKey::PredictedY => write!(f, "PredictedY"),
            ColumnKey::ClassificationOutcome => write!(f, "ClassificationOutcome"),
            ColumnKey::Data(i) => write!(f, "Data{i}"),
            ColumnKey::LocalImportance(i) => write!(f, "LocalImportance{i}"),
            ColumnKey::Feature(name) => write!(f, "{name}"),
        }
    }
}

impl From<&str> for ColumnKey {
    fn from(s: &str) -> Self {
        match s {
            "Index" => ColumnKey::Index,
            "TrueY" => ColumnKey::TrueY,
            "PredictedY" => ColumnKey::PredictedY,
            "ClassificationOutcome" => ColumnKey::ClassificationOutcome,
            other => {
                if let Some(i) = parse_indexed(other, "Data") {
                    ColumnKey::Data(i)
                } else if let Some(i) = parse_indexed(other, "LocalImportance") {
                    ColumnKey::LocalImportance(i)
                } else {
                    ColumnKey::Feature(other.to_string())
                }
            }
        }
    }
}

impl FromStr for ColumnKey {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(ColumnKey::from(s))
    }
}

/// `"Data7"` with prefix `"Data"` → `Some(7)`; anything else → `None`.
fn parse_indexed(s: &str, prefix: &str) -> Option<usize> {
    let rest = s.strip_prefix(prefix)?;
    if rest.is_empty() {
        return None;
    }
    rest.parse().ok()
}

impl Serialize for ColumnKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for ColumnKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Ok(ColumnKey::from(s.as_str()))
    }
}

// ---------------------------------------------------------------------------
// FeatureValue – a single cell of the joined dataset
// ---------------------------------------------------------------------------

/// A dynamically-typed cell value.
///
/// Categorical feature columns are stored as `Integer` codes into the
/// column's sorted label table; `Text` survives only for columns the engine
/// does not recognise, so filter evaluation can fail closed on them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FeatureValue {
    Float(f64),
    Integer(i64),
    Text(String),
    Null,
}

impl FeatureValue {
    /// Try to interpret the value as an `f64` for filter comparison.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            FeatureValue::Float(v) => Some(*v),
            FeatureValue::Integer(i) => Some(*i as f64),
            _ => None,
        }
    }

    /// Generic comparable ordering: numbers compare numerically (across the
    /// `Float`/`Integer` variants), strings lexically, `Null` before
    /// everything, strings after numbers.
    pub fn compare(&self, other: &FeatureValue) -> Ordering {
        use FeatureValue::*;
        match (self.as_f64(), other.as_f64()) {
            (Some(a), Some(b)) => a.total_cmp(&b),
            _ => {
                fn rank(v: &FeatureValue) -> u8 {
                    match v {
                        Null => 0,
                        Float(_) | Integer(_) => 1,
                        Text(_) => 2,
                    }
                }
                match (self, other) {
                    (Text(a), Text(b)) => a.cmp(b),
                    _ => rank(self).cmp(&rank(other)),
                }
            }
        }
    }
}

impl fmt::Display for FeatureValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FeatureValue::Float(v) => write!(f, "{v}"),
            FeatureValue::Integer(i) => write!(f, "{i}"),
            FeatureValue::Text(s) => write!(f, "{s}"),
            FeatureValue::Null => write!(f, "<null>"),
        }
    }
}

// ---------------------------------------------------------------------------
// Row – one row of the joined dataset
// ---------------------------------------------------------------------------

/// One row: column key → cell value.  A missing key means the dataset does
/// not carry that column (optional labels, explanations), never an error.
pub type Row = BTreeMap<ColumnKey, FeatureValue>;

/// Project a cell out of a row, treating a missing column as `Null`.
pub fn cell(row: &Row, key: &ColumnKey) -> FeatureValue {
    row.get(key).cloned().unwrap_or(FeatureValue::Null)
}

// ---------------------------------------------------------------------------
// ColumnMeta – per-column semantics
// ---------------------------------------------------------------------------

/// Metadata for one logical column.  Immutable after dataset construction,
/// except the bin-boundary cell which is memoized once on first use.
#[derive(Debug, Clone)]
pub struct ColumnMeta {
    pub key: ColumnKey,
    /// Human-readable label shown to users.
    pub label: String,
    /// True when the source column held non-numeric values.
    pub is_categorical: bool,
    /// Numeric column the caller wants handled as categorical anyway.
    pub treat_as_categorical: bool,
    /// Sorted label table for categorical columns; row values are `Integer`
    /// codes into this table.
    pub sorted_categorical_values: Vec<String>,
    /// Memoized bin upper-bounds for numeric columns.
    pub(crate) bins: OnceLock<Vec<f64>>,
}

impl ColumnMeta {
    pub fn new(key: ColumnKey, label: impl Into<String>) -> Self {
        ColumnMeta {
            key,
            label: label.into(),
            is_categorical: false,
            treat_as_categorical: false,
            sorted_categorical_values: Vec::new(),
            bins: OnceLock::new(),
        }
    }

    pub fn categorical(key: ColumnKey, label: impl Into<String>, values: Vec<String>) -> Self {
        ColumnMeta {
            is_categorical: true,
            sorted_categorical_values: values,
            ..ColumnMeta::new(key, label)
        }
    }

    /// Whether this column participates in any categorical handling.
    pub fn is_effectively_categorical(&self) -> bool {
        self.is_categorical || self.treat_as_categorical
    }

    /// Whether binning applies: numeric and not categorical in any sense.
    pub fn is_binnable(&self) -> bool {
        !self.is_effectively_categorical()
    }

    /// The memoized bin boundaries, if they have been computed.
    pub fn bins(&self) -> Option<&[f64]> {
        self.bins.get().map(Vec::as_slice)
    }

    /// Resolve a categorical code to its display label.  Out-of-table codes
    /// render as the raw number so display never fails.
    pub fn category_label(&self, code: f64) -> String {
        let idx = code as usize;
        if code >= 0.0 && (idx as f64 - code).abs() < f64::EPSILON {
            if let Some(label) = self.sorted_categorical_values.get(idx) {
                return label.clone();
            }
        }
        format!("{code}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn column_key_round_trips_through_strings() {
        for key in [
            ColumnKey::Index,
            ColumnKey::TrueY,
            ColumnKey::PredictedY,
            ColumnKey::ClassificationOutcome,
            ColumnKey::Data(0),
            ColumnKey::Data(17),
            ColumnKey::LocalImportance(3),
            ColumnKey::Feature("Age".into()),
        ] {
            assert_eq!(ColumnKey::from(key.to_string().as_str()), key);
        }
    }

    #[test]
    fn data_prefix_without_digits_is_a_feature_name() {
        assert_eq!(
            ColumnKey::from("DataScientist"),
            ColumnKey::Feature("DataScientist".into())
        );
        assert_eq!(ColumnKey::from("Data"), ColumnKey::Feature("Data".into()));
    }

    #[test]
    fn values_compare_numerically_across_variants() {
        assert_eq!(
            FeatureValue::Integer(2).compare(&FeatureValue::Float(10.5)),
            Ordering::Less
        );
        assert_eq!(
            FeatureValue::Float(3.0).compare(&FeatureValue::Integer(3)),
            Ordering::Equal
        );
        assert_eq!(
            FeatureValue::Null.compare(&FeatureValue::Integer(0)),
            Ordering::Less
        );
        assert_eq!(
            FeatureValue::Text("b".into()).compare(&FeatureValue::Text("a".into())),
            Ordering::Greater
        );
        assert_eq!(
            FeatureValue::Text("a".into()).compare(&FeatureValue::Float(9e9)),
            Ordering::Greater
        );
    }

    #[test]
    fn category_label_falls_back_to_the_raw_code() {
        let meta = ColumnMeta::categorical(
            ColumnKey::Data(0),
            "Gender",
            vec!["Female".into(), "Male".into()],
        );
        assert_eq!(meta.category_label(0.0), "Female");
        assert_eq!(meta.category_label(1.0), "Male");
        assert_eq!(meta.category_label(5.0), "5");
        assert_eq!(meta.category_label(-1.0), "-1");
    }
}
