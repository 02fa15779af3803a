//! HTTP routes. CORS, method/route metrics, and the OPTIONS preflight are
//! wired here once; each route module implements one handler contract from
//! spec.md §4.12.

pub mod admin;
pub mod get;
pub mod health;
pub mod post;
pub mod update;

use axum::http::{HeaderValue, Method};
use axum::routing::{get as get_method, options, post as post_method, put};
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::AppState;

/// Builds the full axum router: every route from spec.md §6, wrapped in a
/// permissive CORS layer (every response carries
/// `Access-Control-Allow-Origin: *`) and request tracing.
pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::OPTIONS])
        .allow_headers(Any);

    Router::new()
        .route("/post", post_method(post::post).put(post::put_as_post))
        .route("/post", options(preflight))
        .route("/admin/bulkdelete", post_method(admin::bulk_delete))
        .route("/admin/bulkdelete", options(preflight))
        .route("/health", get_method(health::health))
        .route("/health", options(preflight))
        .route("/metrics", get_method(health::metrics))
        .route("/metrics", options(preflight))
        .route("/:id", get_method(get::get).put(update::update))
        .route("/:id", options(preflight))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Shared OPTIONS preflight: 200 with the allow-methods/headers the CORS
/// layer also sets on every other response (spec.md §4.12(b)).
async fn preflight() -> impl axum::response::IntoResponse {
    let mut response = axum::http::Response::new(axum::body::Body::empty());
    response.headers_mut().insert(
        "access-control-allow-methods",
        HeaderValue::from_static("GET, POST, PUT, OPTIONS"),
    );
    response.headers_mut().insert(
        "access-control-allow-headers",
        HeaderValue::from_static(
            "content-type, content-encoding, accept-encoding, authorization, \
             allow-modification, bytebin-api-key, bytebin-forwarded-for",
        ),
    );
    response
}

/// Extracts the effective connection IP: `x-real-ip` if present, else the
/// socket peer address (the latter supplied by the caller from axum's
/// `ConnectInfo`).
pub fn header_str<'a>(headers: &'a axum::http::HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}
