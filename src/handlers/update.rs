//! `PUT /{id}`, spec.md §4.12.

use std::net::SocketAddr;
use std::time::Instant;

use axum::extract::{ConnectInfo, Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};

use crate::codec;
use crate::encoding;
use crate::error::{ApiError, ApiResult};
use crate::expiry;
use crate::logging::LogEvent;
use crate::ratelimit::{classify_caller, AuthError};
use crate::token;
use crate::AppState;

use super::header_str;

pub async fn update(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Path(key): Path<String>,
    headers: HeaderMap,
    body: axum::body::Bytes,
) -> ApiResult<Response> {
    let start = Instant::now();

    if !token::is_valid(&key) {
        return Err(ApiError::InvalidPath);
    }

    let api_key = header_str(&headers, "bytebin-api-key");
    let forwarded_ip = header_str(&headers, "bytebin-forwarded-for");
    let caller = classify_caller(&state.config.auth, &addr.ip().to_string(), api_key, forwarded_ip)
        .map_err(|AuthError::InvalidApiKey| ApiError::Unauthorized)?;

    let mut content = state
        .cache
        .get(&key)
        .await
        .map_err(ApiError::Internal)?
        .filter(|c| !c.is_empty_record())
        .ok_or(ApiError::IncorrectModificationKey)?;

    if !content.modifiable {
        return Err(ApiError::IncorrectModificationKey);
    }

    let presented = bearer_token(&headers).ok_or(ApiError::Unauthorized)?;
    if !content.matches_auth_key(presented) {
        return Err(ApiError::IncorrectModificationKey);
    }

    if state.limiters.update.increment_and_check(&caller.rate_limit_ip) {
        return Err(ApiError::RateLimitExceeded);
    }

    if body.is_empty() {
        return Err(ApiError::MissingContent);
    }

    let content_type = header_str(&headers, "content-type").unwrap_or("text/plain").to_string();
    let mut content_encoding = encoding::parse_content_encoding(header_str(&headers, "content-encoding"));
    let user_agent = header_str(&headers, "user-agent").map(|s| s.to_string());
    let origin = header_str(&headers, "origin").map(|s| s.to_string());
    let host = header_str(&headers, "host").map(|s| s.to_string());

    let new_expiry = expiry::get_expiry(
        &state.config.expiry,
        chrono::Utc::now(),
        user_agent.as_deref(),
        origin.as_deref(),
        host.as_deref(),
    );

    let max_bytes = state.config.max_content_length_mb * 1024 * 1024;
    if !content_encoding.is_empty() && body.len() as u64 > max_bytes {
        return Err(ApiError::ContentTooLarge);
    }

    let mut bytes = body.to_vec();
    if content_encoding.is_empty() {
        bytes = codec::compress(&bytes).map_err(|e| ApiError::Internal(e.into()))?;
        content_encoding = vec![encoding::GZIP.to_string()];
    }

    if bytes.len() as u64 > max_bytes {
        return Err(ApiError::ContentTooLarge);
    }

    content.apply_update(content_type, content_encoding, new_expiry, bytes);

    state
        .coordinator
        .save(&mut content)
        .await
        .map_err(ApiError::Internal)?;
    state.cache.put(content).await;

    crate::metrics::histogram("bytebin_update_duration_seconds", start.elapsed());
    if caller.is_real_user {
        state
            .log_sink
            .submit(LogEvent {
                method: "PUT".into(),
                path: format!("/{key}"),
                status: 200,
                duration_ms: start.elapsed().as_millis() as u64,
                remote_ip: caller.rate_limit_ip.clone(),
            })
            .await;
    }

    Ok((StatusCode::OK, ()).into_response())
}

/// Parses `Authorization: Bearer <key>`, per spec.md §4.12's UPDATE contract.
/// Any other scheme, or a missing header, is unauthorized.
fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    header_str(headers, "authorization")?.strip_prefix("Bearer ")
}
