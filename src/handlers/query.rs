//! Query handler
//!
//! The sole business endpoint. Internal failure details never reach the
//! client: rate limiting maps to 429, everything else to a fixed 500 body,
//! and the cause is structured-logged with its failing stage.

use axum::extract::{Json, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use std::sync::Arc;
use uuid::Uuid;
use validator::Validate;

use crate::AppState;
use crate::models::{QueryRequest, QueryResponse};
use crate::services::pipeline::PipelineError;

/// POST /query
#[utoipa::path(
    post,
    path = "/query",
    request_body = QueryRequest,
    responses(
        (status = 200, description = "Answer with sanitized SQL and result sample", body = QueryResponse),
        (status = 422, description = "Malformed request"),
        (status = 429, description = "Rate limit exceeded"),
        (status = 500, description = "Query processing failed"),
    ),
    tag = "Query"
)]
pub async fn run_query(
    State(state): State<Arc<AppState>>,
    Json(request): Json<QueryRequest>,
) -> Response {
    if let Err(e) = request.validate() {
        return (StatusCode::UNPROCESSABLE_ENTITY, Json(json!({ "detail": e.to_string() })))
            .into_response();
    }

    let request_id = Uuid::new_v4();
    tracing::info!(%request_id, user = request.user_key(), "query received");

    let mut conn = match state.db.acquire().await {
        Ok(conn) => conn,
        Err(e) => {
            tracing::error!(%request_id, "failed to acquire database connection: {}", e);
            return query_failed();
        },
    };

    match state.pipeline.handle(&mut conn, &request).await {
        Ok(response) => (StatusCode::OK, Json(response)).into_response(),
        Err(PipelineError::RateLimitExceeded) => (
            StatusCode::TOO_MANY_REQUESTS,
            Json(json!({ "detail": "Rate limit exceeded" })),
        )
            .into_response(),
        Err(err) => {
            tracing::error!(%request_id, stage = err.stage(), error = %err, "query failed");
            query_failed()
        },
    }
}

fn query_failed() -> Response {
    (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({ "detail": "Query processing failed" })))
        .into_response()
}
