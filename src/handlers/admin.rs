//! `POST /admin/bulkdelete`, spec.md §4.12.

use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::error::{ApiError, ApiResult};
use crate::ratelimit::is_valid_admin_key;
use crate::AppState;

use super::header_str;

#[derive(Deserialize)]
pub struct BulkDeleteQuery {
    #[serde(default)]
    force: bool,
}

#[derive(Serialize)]
struct BulkDeleteResponse {
    deleted: u64,
}

pub async fn bulk_delete(
    State(state): State<AppState>,
    Query(query): Query<BulkDeleteQuery>,
    headers: HeaderMap,
    Json(keys): Json<Vec<String>>,
) -> ApiResult<Response> {
    let api_key = header_str(&headers, "bytebin-api-key").ok_or(ApiError::Unauthorized)?;
    if !is_valid_admin_key(&state.config.auth, api_key) {
        return Err(ApiError::Unauthorized);
    }

    for key in &keys {
        state.cache.invalidate(key).await;
    }

    let deleted = state
        .coordinator
        .bulk_delete(&keys, query.force)
        .await
        .map_err(ApiError::Internal)?;

    Ok((StatusCode::OK, Json(BulkDeleteResponse { deleted })).into_response())
}
