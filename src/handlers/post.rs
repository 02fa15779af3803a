//! `POST /post` and `PUT /post` (identical semantics; PUT returns an
//! absolute-URL `Location`), spec.md §4.12.

use std::net::SocketAddr;
use std::time::Instant;

use axum::extract::{ConnectInfo, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use crate::codec;
use crate::content::Content;
use crate::encoding;
use crate::error::{ApiError, ApiResult};
use crate::expiry;
use crate::logging::LogEvent;
use crate::ratelimit::{classify_caller, AuthError};
use crate::token;
use crate::AppState;

use super::header_str;

#[derive(Serialize)]
struct PostResponse {
    key: String,
}

pub async fn post(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    body: axum::body::Bytes,
) -> ApiResult<Response> {
    handle(state, addr, headers, body, false).await
}

pub async fn put_as_post(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    body: axum::body::Bytes,
) -> ApiResult<Response> {
    handle(state, addr, headers, body, true).await
}

async fn handle(
    state: AppState,
    addr: SocketAddr,
    headers: HeaderMap,
    body: axum::body::Bytes,
    absolute_location: bool,
) -> ApiResult<Response> {
    let start = Instant::now();
    let _in_flight = crate::metrics::InFlightGuard::start("bytebin_post_in_flight");

    if body.is_empty() {
        return Err(ApiError::MissingContent);
    }

    let api_key = header_str(&headers, "bytebin-api-key");
    let forwarded_ip = header_str(&headers, "bytebin-forwarded-for");
    let caller = classify_caller(&state.config.auth, &addr.ip().to_string(), api_key, forwarded_ip)
        .map_err(|AuthError::InvalidApiKey| ApiError::Unauthorized)?;

    if state.limiters.post.increment_and_check(&caller.rate_limit_ip) {
        return Err(ApiError::RateLimitExceeded);
    }

    let content_type = header_str(&headers, "content-type").unwrap_or("text/plain").to_string();
    let mut content_encoding = encoding::parse_content_encoding(header_str(&headers, "content-encoding"));
    let user_agent = header_str(&headers, "user-agent").map(|s| s.to_string());
    let origin = header_str(&headers, "origin").map(|s| s.to_string());
    let host = header_str(&headers, "host").map(|s| s.to_string());

    let expiry = expiry::get_expiry(
        &state.config.expiry,
        chrono::Utc::now(),
        user_agent.as_deref(),
        origin.as_deref(),
        host.as_deref(),
    );

    let max_bytes = state.config.max_content_length_mb * 1024 * 1024;
    // spec.md §9 Open Question: pre-encoded input is gated on the bytes as
    // received. Input with no client-provided encoding is gated on the
    // *compressed* size instead (server-side gzip runs below, before the
    // second check), so an oversized-but-compressible body can still fit
    // (spec.md §8 scenario 6).
    if !content_encoding.is_empty() && body.len() as u64 > max_bytes {
        return Err(ApiError::ContentTooLarge);
    }

    let allow_modification = header_str(&headers, "allow-modification") == Some("true");
    let auth_key = allow_modification.then(token::generate_auth_key);

    let key = token::generate(state.config.key_length);

    let mut bytes = body.to_vec();
    if content_encoding.is_empty() {
        bytes = codec::compress(&bytes).map_err(|e| ApiError::Internal(e.into()))?;
        content_encoding = vec![encoding::GZIP.to_string()];
    }

    if bytes.len() as u64 > max_bytes {
        return Err(ApiError::ContentTooLarge);
    }

    // Populated with the final (already-compressed) bytes before it ever
    // reaches the cache, so a GET racing the durable save below observes the
    // real content instead of an empty, "missing" placeholder (spec.md
    // §4.10).
    let content = Content::new(
        key.clone(),
        content_type,
        content_encoding,
        expiry,
        allow_modification,
        auth_key.clone(),
        bytes,
    );
    state.cache.put(content.clone()).await;

    let save_key = key.clone();
    let cache = state.cache.clone();
    let coordinator = state.coordinator.clone();

    // The durable write runs on the shared worker pool; the handler only
    // schedules it and returns, matching spec.md §5's "handlers only parse,
    // rate-limit, and schedule". `mark_saved` fires the save-completion
    // signal once this resolves, successfully or not.
    tokio::spawn(async move {
        let mut content = content;
        let result = coordinator.save(&mut content).await;
        content.mark_saved();
        cache.put(content).await;
        cache.prune_in_flight(&save_key).await;
        if let Err(e) = result {
            tracing::error!(key = %save_key, error = ?e, "failed to save content");
            crate::metrics::counter("bytebin_save_errors_total", 1);
        }
    });

    crate::metrics::histogram("bytebin_post_duration_seconds", start.elapsed());
    if caller.is_real_user {
        state
            .log_sink
            .submit(LogEvent {
                method: if absolute_location { "PUT".into() } else { "POST".into() },
                path: "/post".into(),
                status: 201,
                duration_ms: start.elapsed().as_millis() as u64,
                remote_ip: caller.rate_limit_ip.clone(),
            })
            .await;
    }

    let location = if absolute_location {
        let host = state.config.host_aliases.first().cloned().unwrap_or_default();
        format!("{host}/{key}")
    } else {
        key.clone()
    };

    let mut response = (StatusCode::CREATED, Json(PostResponse { key: key.clone() })).into_response();
    response
        .headers_mut()
        .insert("location", location.parse().map_err(|_| ApiError::Internal(anyhow::anyhow!("bad location")))?);
    if let Some(auth_key) = auth_key {
        response
            .headers_mut()
            .insert("modification-key", auth_key.parse().map_err(|_| ApiError::Internal(anyhow::anyhow!("bad key")))?);
    }

    Ok(response)
}
