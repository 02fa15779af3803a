//! `GET /{id}`, spec.md §4.12.

use std::net::SocketAddr;
use std::time::Instant;

use axum::extract::{ConnectInfo, Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};

use crate::codec;
use crate::encoding;
use crate::error::{ApiError, ApiResult};
use crate::logging::LogEvent;
use crate::ratelimit::{classify_caller, AuthError};
use crate::token;
use crate::AppState;

use super::header_str;

pub async fn get(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Path(key): Path<String>,
    headers: HeaderMap,
) -> ApiResult<Response> {
    let start = Instant::now();

    if !token::is_valid(&key) {
        return Err(ApiError::InvalidPath);
    }

    let api_key = header_str(&headers, "bytebin-api-key");
    let forwarded_ip = header_str(&headers, "bytebin-forwarded-for");
    let caller = classify_caller(&state.config.auth, &addr.ip().to_string(), api_key, forwarded_ip)
        .map_err(|AuthError::InvalidApiKey| ApiError::Unauthorized)?;

    if state.limiters.get.increment_and_check(&caller.rate_limit_ip) {
        return Err(ApiError::RateLimitExceeded);
    }

    let content = state
        .cache
        .get(&key)
        .await
        .map_err(ApiError::Internal)?;

    let Some(content) = content else {
        return Err(not_found(&state, &caller.rate_limit_ip, caller.is_real_user).await);
    };

    if content.is_empty_record() || content.is_expired(chrono::Utc::now()) {
        return Err(not_found(&state, &caller.rate_limit_ip, caller.is_real_user).await);
    }

    let accepted = encoding::parse_accept_encoding(header_str(&headers, "accept-encoding"));
    let stored_bytes = content.content.clone().unwrap_or_default();

    let (body, served_encoding) = if encoding::can_serve_as_is(&accepted, &content.encoding) {
        (stored_bytes, content.encoding.clone())
    } else if content.encoding == vec![encoding::GZIP.to_string()] {
        let decompressed = codec::decompress(&stored_bytes).map_err(|_| ApiError::CodecFailure)?;
        (decompressed, Vec::new())
    } else {
        return Err(ApiError::NotAcceptable);
    };

    let mut response = (StatusCode::OK, body).into_response();
    let headers_mut = response.headers_mut();
    headers_mut.insert(
        "content-type",
        content
            .content_type
            .parse()
            .map_err(|_| ApiError::Internal(anyhow::anyhow!("bad content-type")))?,
    );
    if !served_encoding.is_empty() {
        headers_mut.insert(
            "content-encoding",
            encoding::format_content_encoding(&served_encoding)
                .parse()
                .map_err(|_| ApiError::Internal(anyhow::anyhow!("bad content-encoding")))?,
        );
    }
    headers_mut.insert(
        "last-modified",
        content
            .last_modified
            .to_rfc2822()
            .parse()
            .map_err(|_| ApiError::Internal(anyhow::anyhow!("bad last-modified")))?,
    );
    headers_mut.insert(
        "cache-control",
        cache_control(content.modifiable).parse().unwrap(),
    );

    crate::metrics::histogram("bytebin_get_duration_seconds", start.elapsed());
    if caller.is_real_user {
        state
            .log_sink
            .submit(LogEvent {
                method: "GET".into(),
                path: format!("/{key}"),
                status: 200,
                duration_ms: start.elapsed().as_millis() as u64,
                remote_ip: caller.rate_limit_ip.clone(),
            })
            .await;
    }

    Ok(response)
}

/// Records a miss against the secondary not-found backoff limiter (spec.md
/// §4.4) and returns the `404` every miss path surfaces as. Scoped to real
/// users only: a trusted-proxy-only caller isn't subject to the scan-
/// deterrence throttling meant for untrusted callers (spec.md §4.4).
async fn not_found(state: &AppState, rate_limit_ip: &str, is_real_user: bool) -> ApiError {
    if is_real_user {
        let _ = state.limiters.not_found.increment_and_check(rate_limit_ip);
    }
    ApiError::NotFound
}

/// Modifiable content is revalidated on every request; immutable content is
/// cached hard, since its bytes can never change (spec.md §4.12).
fn cache_control(modifiable: bool) -> &'static str {
    if modifiable {
        "public, no-cache, proxy-revalidate, no-transform"
    } else {
        "public, max-age=604800, no-transform, immutable"
    }
}
