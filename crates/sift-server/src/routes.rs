//! HTTP surface: compile a request into a plan, expose metrics

use std::sync::Arc;
use std::time::Instant;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::json;
use sift_builder::{InMemoryCatalog, Limits, QueryBuilder, QueryRequest};
use sift_ir::{QueryError, QueryPlan, RequestParams};
use sift_registry::FunctionRegistry;
use thiserror::Error;
use tracing::{info, info_span, warn};
use uuid::Uuid;

use crate::metrics::Metrics;

pub struct AppState {
    pub catalog: InMemoryCatalog,
    pub registry: &'static FunctionRegistry,
    pub limits: Limits,
    pub metrics: Metrics,
}

/// Body of `POST /compile`.
#[derive(Debug, Clone, Deserialize)]
pub struct CompileBody {
    pub params: RequestParams,
    #[serde(flatten)]
    pub request: QueryRequest,
    /// Private functions granted to this caller.
    #[serde(default)]
    pub acl: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct CompileResponse {
    pub request_id: String,
    pub fingerprint: String,
    pub columns: Vec<String>,
    pub plan: QueryPlan,
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Query(#[from] QueryError),

    #[error("Metrics unavailable: {0}")]
    Metrics(#[from] prometheus::Error),
}

impl ApiError {
    /// Stable label used in metrics and error bodies.
    pub fn kind(&self) -> &'static str {
        match self {
            ApiError::Query(QueryError::Parse { .. }) => "parse_error",
            ApiError::Query(QueryError::InvalidSearchQuery(_)) => "invalid_search_query",
            ApiError::Query(QueryError::AccessDenied { .. }) => "access_denied",
            ApiError::Query(QueryError::NotImplemented(_)) => "not_implemented",
            ApiError::Query(QueryError::Catalog(_)) => "catalog_error",
            ApiError::Metrics(_) => "internal",
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            ApiError::Query(QueryError::Parse { .. }) | ApiError::Query(QueryError::InvalidSearchQuery(_)) => {
                StatusCode::BAD_REQUEST
            }
            ApiError::Query(QueryError::AccessDenied { .. }) => StatusCode::FORBIDDEN,
            ApiError::Query(QueryError::NotImplemented(_)) => StatusCode::NOT_IMPLEMENTED,
            ApiError::Query(QueryError::Catalog(_)) => StatusCode::BAD_GATEWAY,
            ApiError::Metrics(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = json!({"error": self.to_string(), "kind": self.kind()});
        (self.status(), Json(body)).into_response()
    }
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/compile", post(compile_handler))
        .route("/metrics", get(metrics_handler))
        .route("/health", get(|| async { "ok" }))
        .with_state(state)
}

/// Compile one body against the shared catalog. Records metrics either way.
pub fn compile(state: &AppState, body: &CompileBody) -> Result<CompileResponse, ApiError> {
    let request_id = Uuid::new_v4().to_string();
    let span = info_span!("compile", request_id = %request_id);
    let _guard = span.enter();

    let started = Instant::now();
    let builder = QueryBuilder::new(&body.params, &state.catalog, state.registry, state.limits)
        .with_acl(body.acl.clone());
    let result = builder.build(&body.request).map_err(ApiError::from);
    let elapsed = started.elapsed().as_secs_f64();

    match result {
        Ok(plan) => {
            state.metrics.observe("ok", elapsed);
            info!(
                columns = plan.output_names().len(),
                duration_ms = elapsed * 1000.0,
                "Compiled query"
            );
            Ok(CompileResponse {
                request_id,
                fingerprint: plan.fingerprint(),
                columns: plan.output_names(),
                plan,
            })
        }
        Err(err) => {
            state.metrics.observe(err.kind(), elapsed);
            warn!(kind = err.kind(), error = %err, "Compilation rejected");
            Err(err)
        }
    }
}

async fn compile_handler(
    State(state): State<Arc<AppState>>,
    Json(body): Json<CompileBody>,
) -> Result<Json<CompileResponse>, ApiError> {
    compile(&state, &body).map(Json)
}

async fn metrics_handler(State(state): State<Arc<AppState>>) -> Result<String, ApiError> {
    Ok(state.metrics.render()?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state() -> AppState {
        AppState {
            catalog: InMemoryCatalog::new().with_project(1, "frontend"),
            registry: FunctionRegistry::builtin(),
            limits: Limits::default(),
            metrics: Metrics::new().unwrap(),
        }
    }

    fn body(json: &str) -> CompileBody {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn test_compile_returns_plan() {
        let state = state();
        let response = compile(
            &state,
            &body(
                r#"{
                    "params": {"start": "2024-01-01T00:00:00Z", "end": "2024-01-02T00:00:00Z", "project_ids": [1]},
                    "query": "project:frontend count():>5",
                    "selected": ["transaction", "count()"],
                    "orderby": ["-count"]
                }"#,
            ),
        )
        .unwrap();
        assert_eq!(response.columns, vec!["transaction", "count"]);
        assert_eq!(response.fingerprint, response.plan.fingerprint());
        assert_eq!(response.plan.having_conditions.len(), 1);
        assert!(state.metrics.render().unwrap().contains(r#"outcome="ok"} 1"#));
    }

    #[test]
    fn test_errors_map_to_status() {
        let state = state();
        let err = compile(
            &state,
            &body(r#"{"params": {"project_ids": [1]}, "selected": ["count()"]}"#),
        )
        .unwrap_err();
        assert_eq!(err.kind(), "invalid_search_query");
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);

        let err = compile(
            &state,
            &body(
                r#"{
                    "params": {"start": "2024-01-01T00:00:00Z", "end": "2024-01-02T00:00:00Z"},
                    "selected": ["absolute_correlation()"]
                }"#,
            ),
        )
        .unwrap_err();
        assert_eq!(err.status(), StatusCode::FORBIDDEN);
        assert!(state
            .metrics
            .render()
            .unwrap()
            .contains(r#"outcome="access_denied"} 1"#));
    }
}
