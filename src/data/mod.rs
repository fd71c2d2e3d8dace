/// Data layer: core types, the joined dataset, and filter predicates.
///
/// Architecture:
/// ```text
///  parallel source arrays (features, labels, explanations)
///        │
///        ▼
///   ┌───────────────┐
///   │ JoinedDataset  │  Vec<Row>, column metadata, bin caches
///   └───────────────┘
///        │
///        ▼
///   ┌──────────┐
///   │  filter   │  simple predicates + AND/OR trees → row membership
///   └──────────┘
/// ```
pub mod dataset;
pub mod filter;
pub mod model;
