//! Sift query builder
//!
//! Turns search text and requested fields into a [`sift_ir::QueryPlan`]:
//! field aliases, the boolean condition compiler, per-field condition
//! converters and the catalog lookups they depend on.

use serde::{Deserialize, Serialize};

pub mod aliases;
mod builder;
pub mod catalog;
pub mod conditions;
pub mod filters;
pub mod semver;

pub use aliases::FieldAliasResolver;
pub use builder::{QueryBuilder, QueryRequest, SelectedColumn};
pub use catalog::{CatalogService, InMemoryCatalog, ReleaseFilter, ReleaseStage, ThresholdMetric};
pub use conditions::{compile_terms, CompiledConditions, LeafCompiler};

/// Stands in for an empty release list so the condition keeps its shape.
pub const EMPTY_RELEASE_SENTINEL: &str = "____EMPTY_RELEASE____";

/// Threshold used for projects without an override.
pub const DEFAULT_THRESHOLD_METRIC: &str = "duration";
pub const DEFAULT_THRESHOLD: i64 = 300;

pub const MAX_TEAM_KEY_TRANSACTIONS: usize = 500;

/// Caps applied to catalog lookups and top-events queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Limits {
    /// Release versions a single release filter may expand to.
    pub max_release_versions: usize,
    /// Combined project and transaction threshold overrides.
    pub max_threshold_rows: usize,
    pub max_top_events: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_release_versions: 1000,
            max_threshold_rows: 500,
            max_top_events: 10,
        }
    }
}
