use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::model::{ColumnKey, FeatureValue, Row};

// ---------------------------------------------------------------------------
// Filter – a single-column predicate
// ---------------------------------------------------------------------------

/// Comparison method of a simple filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FilterMethod {
    Equal,
    GreaterThan,
    GreaterThanEqual,
    LessThan,
    LessThanEqual,
    /// `arg[0] <= value <= arg[1]`, inclusive at both ends.
    InRange,
    /// Value is a member of `arg`, treated as a set.
    Includes,
    /// Value is not a member of `arg`.
    Excludes,
}

/// A single-column test.  `arg` holds the comparison operands: one value for
/// the ordering methods, two for `InRange`, a set for `Includes`/`Excludes`.
/// Categorical columns carry codes into their label table here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Filter {
    pub column: ColumnKey,
    pub method: FilterMethod,
    pub arg: Vec<f64>,
}

impl Filter {
    pub fn equal(column: ColumnKey, value: f64) -> Self {
        Filter {
            column,
            method: FilterMethod::Equal,
            arg: vec![value],
        }
    }

    pub fn greater_than(column: ColumnKey, value: f64) -> Self {
        Filter {
            column,
            method: FilterMethod::GreaterThan,
            arg: vec![value],
        }
    }

    pub fn greater_than_equal(column: ColumnKey, value: f64) -> Self {
        Filter {
            column,
            method: FilterMethod::GreaterThanEqual,
            arg: vec![value],
        }
    }

    pub fn less_than(column: ColumnKey, value: f64) -> Self {
        Filter {
            column,
            method: FilterMethod::LessThan,
            arg: vec![value],
        }
    }

    pub fn less_than_equal(column: ColumnKey, value: f64) -> Self {
        Filter {
            column,
            method: FilterMethod::LessThanEqual,
            arg: vec![value],
        }
    }

    pub fn in_range(column: ColumnKey, low: f64, high: f64) -> Self {
        Filter {
            column,
            method: FilterMethod::InRange,
            arg: vec![low, high],
        }
    }

    pub fn includes(column: ColumnKey, values: Vec<f64>) -> Self {
        Filter {
            column,
            method: FilterMethod::Includes,
            arg: values,
        }
    }

    pub fn excludes(column: ColumnKey, values: Vec<f64>) -> Self {
        Filter {
            column,
            method: FilterMethod::Excludes,
            arg: values,
        }
    }

    /// Check the arg-shape invariants.  Evaluation does not depend on this:
    /// a filter that fails validation simply matches no rows.  UI layers call
    /// it to reject bad input before constructing a cohort.
    pub fn validate(&self) -> Result<(), FilterError> {
        if self.arg.is_empty() {
            return Err(FilterError::EmptyArg {
                method: self.method,
            });
        }
        if self.method == FilterMethod::InRange {
            if self.arg.len() != 2 {
                return Err(FilterError::RangeArity { found: self.arg.len() });
            }
            if self.arg[0] > self.arg[1] {
                return Err(FilterError::RangeBounds {
                    low: self.arg[0],
                    high: self.arg[1],
                });
            }
        }
        Ok(())
    }
}

/// Invariant violations reported by [`Filter::validate`].
#[derive(Debug, Error, PartialEq)]
pub enum FilterError {
    #[error("filter method {method:?} requires at least one argument")]
    EmptyArg { method: FilterMethod },

    #[error("range filter requires exactly two arguments, found {found}")]
    RangeArity { found: usize },

    #[error("range filter bounds are inverted: {low} > {high}")]
    RangeBounds { low: f64, high: f64 },
}

// ---------------------------------------------------------------------------
// CompositeFilter – a boolean tree of simple filters
// ---------------------------------------------------------------------------

/// Boolean combination applied by an internal tree node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Operation {
    And,
    Or,
}

/// A filter tree: leaves are simple column predicates, internal nodes
/// combine their children with AND/OR.  Nodes nest to arbitrary depth.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CompositeFilter {
    Leaf(Filter),
    Node {
        children: Vec<CompositeFilter>,
        operation: Operation,
    },
}

impl CompositeFilter {
    pub fn and(children: Vec<CompositeFilter>) -> Self {
        CompositeFilter::Node {
            children,
            operation: Operation::And,
        }
    }

    pub fn or(children: Vec<CompositeFilter>) -> Self {
        CompositeFilter::Node {
            children,
            operation: Operation::Or,
        }
    }
}

impl From<Filter> for CompositeFilter {
    fn from(filter: Filter) -> Self {
        CompositeFilter::Leaf(filter)
    }
}

// ---------------------------------------------------------------------------
// Evaluation – pure functions, fail-closed
// ---------------------------------------------------------------------------

/// Evaluate a simple filter against one row.
///
/// Default-deny: a missing column, a non-numeric cell, or a malformed `arg`
/// (empty, wrong range arity, inverted range bounds) excludes the row.  A
/// broken filter must never widen a cohort.
pub fn evaluate_filter(row: &Row, filter: &Filter) -> bool {
    let Some(value) = row.get(&filter.column).and_then(FeatureValue::as_f64) else {
        return false;
    };
    match filter.method {
        FilterMethod::Equal => filter.arg.first().is_some_and(|a| value == *a),
        FilterMethod::GreaterThan => filter.arg.first().is_some_and(|a| value > *a),
        FilterMethod::GreaterThanEqual => filter.arg.first().is_some_and(|a| value >= *a),
        FilterMethod::LessThan => filter.arg.first().is_some_and(|a| value < *a),
        FilterMethod::LessThanEqual => filter.arg.first().is_some_and(|a| value <= *a),
        FilterMethod::InRange => match filter.arg.as_slice() {
            [low, high] if low <= high => *low <= value && value <= *high,
            _ => false,
        },
        FilterMethod::Includes => {
            !filter.arg.is_empty() && filter.arg.iter().any(|a| *a == value)
        }
        FilterMethod::Excludes => {
            !filter.arg.is_empty() && !filter.arg.iter().any(|a| *a == value)
        }
    }
}

/// True iff every filter in the list matches the row.  An empty list is
/// vacuously true, matching the cohort-level implicit-AND semantics.
pub fn evaluate_filter_list(row: &Row, filters: &[Filter]) -> bool {
    filters.iter().all(|f| evaluate_filter(row, f))
}

/// Evaluate a composite tree against one row by recursive descent.
///
/// An empty internal node is the identity of its operation (And → true,
/// Or → false).  Typical trees are a few levels deep; callers should not
/// hand the engine adversarially deep trees.
pub fn evaluate_composite(row: &Row, node: &CompositeFilter) -> bool {
    match node {
        CompositeFilter::Leaf(filter) => evaluate_filter(row, filter),
        CompositeFilter::Node {
            children,
            operation: Operation::And,
        } => children.iter().all(|c| evaluate_composite(row, c)),
        CompositeFilter::Node {
            children,
            operation: Operation::Or,
        } => children.iter().any(|c| evaluate_composite(row, c)),
    }
}
