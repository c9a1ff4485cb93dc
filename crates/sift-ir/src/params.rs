//! Per-request parameters

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{InvalidQuery, QueryError};

/// Scope and time window of one compilation request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RequestParams {
    #[serde(default)]
    pub start: Option<DateTime<Utc>>,
    #[serde(default)]
    pub end: Option<DateTime<Utc>>,
    #[serde(default)]
    pub project_ids: Vec<u64>,
    #[serde(default)]
    pub organization_id: Option<u64>,
    #[serde(default)]
    pub team_ids: Vec<u64>,
    #[serde(default)]
    pub environments: Vec<String>,
}

impl RequestParams {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>, project_ids: Vec<u64>) -> Self {
        Self {
            start: Some(start),
            end: Some(end),
            project_ids,
            ..Default::default()
        }
    }

    pub fn with_organization(mut self, organization_id: u64) -> Self {
        self.organization_id = Some(organization_id);
        self
    }

    pub fn with_teams(mut self, team_ids: Vec<u64>) -> Self {
        self.team_ids = team_ids;
        self
    }

    pub fn with_environments(mut self, environments: Vec<String>) -> Self {
        self.environments = environments;
        self
    }

    /// The `[start, end)` window; absence of either bound is a user error.
    pub fn time_window(&self) -> Result<(DateTime<Utc>, DateTime<Utc>), QueryError> {
        let start = self
            .start
            .ok_or_else(|| InvalidQuery::MissingParameter("start".to_string()))?;
        let end = self
            .end
            .ok_or_else(|| InvalidQuery::MissingParameter("end".to_string()))?;
        if start > end {
            return Err(QueryError::invalid("start must not be after end"));
        }
        Ok((start, end))
    }

    /// Length of the time window in whole seconds, when both bounds are set.
    pub fn window_seconds(&self) -> Option<i64> {
        match (self.start, self.end) {
            (Some(start), Some(end)) => Some((end - start).num_seconds()),
            _ => None,
        }
    }
}
