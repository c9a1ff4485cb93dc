//! Error taxonomy shared by every compilation stage

use thiserror::Error;

/// Terminal error for one compilation. Nothing here is retried internally.
#[derive(Debug, Error)]
pub enum QueryError {
    #[error("Parse error at column {column}: {message}")]
    Parse { message: String, column: usize },

    #[error("Invalid search query: {0}")]
    InvalidSearchQuery(#[from] InvalidQuery),

    #[error("Access denied: function '{function}' is not available")]
    AccessDenied { function: String },

    #[error("Not implemented: {0}")]
    NotImplemented(String),

    #[error("Catalog error: {0}")]
    Catalog(#[from] CatalogError),
}

impl QueryError {
    pub fn is_invalid_search_query(&self) -> bool {
        matches!(self, QueryError::InvalidSearchQuery(_))
    }

    pub fn invalid(message: impl Into<String>) -> Self {
        QueryError::InvalidSearchQuery(InvalidQuery::Malformed(message.into()))
    }
}

/// Reasons a search query is rejected as user error.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum InvalidQuery {
    #[error("{0} is not a valid function")]
    UnknownFunction(String),

    #[error("{0} is not a valid field")]
    UnknownField(String),

    #[error("{function}: expected at least {expected} argument(s), got {given}")]
    TooFewArguments {
        function: String,
        expected: usize,
        given: usize,
    },

    #[error("{function}: expected at most {expected} argument(s), got {given}")]
    TooManyArguments {
        function: String,
        expected: usize,
        given: usize,
    },

    #[error("{function}: invalid argument {argument}: {reason}")]
    InvalidArgument {
        function: String,
        argument: String,
        reason: String,
    },

    #[error("Having an OR between aggregate filters and normal filters is invalid.")]
    MixedAggregateBoolean,

    #[error("Exceeded {limit} configured transaction thresholds limit, try with fewer projects.")]
    TooManyThresholds { limit: usize },

    #[error("{field}: {value} is not a valid identifier")]
    InvalidIdentifier { field: String, value: String },

    #[error("Missing required parameter: {0}")]
    MissingParameter(String),

    #[error("{field}: operator {operator} is not supported")]
    InvalidOperator { field: String, operator: String },

    #[error("{field}: invalid value {value}")]
    InvalidValue { field: String, value: String },

    #[error("{0} is not a valid aggregate for a filter")]
    NotAggregate(String),

    #[error("Cannot order by {0}: it must be one of the selected columns")]
    InvalidOrderBy(String),

    #[error("Invalid boolean expression: {0}")]
    MalformedBoolean(String),

    #[error("{0}")]
    Malformed(String),
}

/// Failure reported by the catalog service. Surfaced as-is.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CatalogError {
    #[error("Object not found: {0}")]
    NotFound(String),

    #[error("Catalog lookup timed out: {0}")]
    Timeout(String),

    #[error("Catalog unavailable: {0}")]
    Unavailable(String),
}
