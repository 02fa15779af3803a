//! `GET /health` and `GET /metrics`, spec.md §4.12.

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use crate::error::{ApiError, ApiResult};
use crate::AppState;

use super::header_str;

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
}

pub async fn health() -> impl IntoResponse {
    let mut response = (StatusCode::OK, Json(HealthResponse { status: "ok" })).into_response();
    response
        .headers_mut()
        .insert("cache-control", "no-cache".parse().unwrap());
    response
}

/// Exposes metrics, gated behind two checks: the feature flag
/// (`metrics-enabled`) and a same-origin guard that refuses requests
/// arriving through a reverse proxy (a present `X-Forwarded-For` header),
/// since `/metrics` is meant for direct scraping only, not public exposure
/// (spec.md §9 Open Question).
///
/// The actual Prometheus text exposition is an external collaborator
/// (spec.md §1's Non-goals); this handler only owns the access gate.
pub async fn metrics(State(state): State<AppState>, headers: HeaderMap) -> ApiResult<Response> {
    if !state.config.metrics_enabled {
        return Err(ApiError::NotFound);
    }
    if header_str(&headers, "x-forwarded-for").is_some() {
        return Err(ApiError::Unauthorized);
    }

    Ok((StatusCode::OK, "").into_response())
}
