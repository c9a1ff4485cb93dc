//! Execution layer seam
//!
//! Compiled plans are handed to a [`QueryExecutor`]; this crate never talks
//! to the analytic store itself.

use std::collections::VecDeque;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use sift_ir::QueryPlan;
use thiserror::Error;

/// One result row keyed by output name.
pub type Row = serde_json::Map<String, serde_json::Value>;

#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("Engine error: {0}")]
    Engine(String),

    #[error("Budget exceeded: {0}")]
    BudgetExceeded(String),

    #[error("Query timeout")]
    Timeout,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryResult {
    pub columns: Vec<String>,
    pub rows: Vec<Row>,
}

impl QueryResult {
    pub fn from_rows(rows: Vec<Row>) -> Self {
        let columns = rows
            .first()
            .map(|row| row.keys().cloned().collect())
            .unwrap_or_default();
        Self { columns, rows }
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }
}

/// Runs a plan against the analytic store.
///
/// `referrer` names the caller for the engine's own accounting.
pub trait QueryExecutor: Send + Sync {
    fn execute(&self, plan: &QueryPlan, referrer: &str) -> Result<QueryResult, ExecutionError>;
}

/// Replays canned results in order and records every plan it was given.
#[derive(Debug, Default)]
pub struct RecordingExecutor {
    responses: Mutex<VecDeque<QueryResult>>,
    executed: Mutex<Vec<(String, QueryPlan)>>,
}

impl RecordingExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_response(self, rows: Vec<Row>) -> Self {
        if let Ok(mut responses) = self.responses.lock() {
            responses.push_back(QueryResult::from_rows(rows));
        }
        self
    }

    /// Plans executed so far, with their referrers.
    pub fn executed(&self) -> Vec<(String, QueryPlan)> {
        self.executed.lock().map(|plans| plans.clone()).unwrap_or_default()
    }
}

impl QueryExecutor for RecordingExecutor {
    fn execute(&self, plan: &QueryPlan, referrer: &str) -> Result<QueryResult, ExecutionError> {
        self.executed
            .lock()
            .map_err(|e| ExecutionError::Engine(e.to_string()))?
            .push((referrer.to_string(), plan.clone()));
        let next = self
            .responses
            .lock()
            .map_err(|e| ExecutionError::Engine(e.to_string()))?
            .pop_front();
        Ok(next.unwrap_or_default())
    }
}
