//! Sift discover
//!
//! Query flows layered on the compiler: numeric histograms, timeseries
//! zero-fill and top-N grouped timeseries with an "Other" bucket.

use sift_ir::QueryError;
use thiserror::Error;

pub mod executor;
pub mod histogram;
pub mod top_events;
pub mod zerofill;

pub use executor::{ExecutionError, QueryExecutor, QueryResult, RecordingExecutor, Row};
pub use histogram::{
    compute_buckets, histogram_query, nice_int, normalize, Histogram, HistogramBucket, HistogramParams,
    HistogramRequest, MAX_BUCKETS, MAX_PRECISION,
};
pub use top_events::{query_top_events, top_events_timeseries, TopEventSeries, TopEventsRequest, OTHER_KEY};
pub use zerofill::{zerofill, TIME_KEY};

#[derive(Debug, Error)]
pub enum DiscoverError {
    #[error(transparent)]
    Query(#[from] QueryError),

    #[error("Execution failed: {0}")]
    Execution(#[from] ExecutionError),
}
