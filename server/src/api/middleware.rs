//! HTTP middleware (security headers, CSRF content-type check, body limits)

use axum::body::Body;
use axum::extract::Request;
use axum::http::{HeaderValue, Method, header};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use http_body_util::Limited;

use super::types::ApiError;
use crate::core::constants::{
    API_PREFIX, CONFIG_BODY_LIMIT, DEFAULT_API_BODY_LIMIT, ICON_BODY_LIMIT,
};

const PERMISSIONS_POLICY: &str = "camera=(), microphone=(), geolocation=()";

/// Set the fixed security headers on every response
pub async fn security_headers(request: Request, next: Next) -> Response {
    let mut response = next.run(request).await;
    let headers = response.headers_mut();
    headers.insert(
        header::X_CONTENT_TYPE_OPTIONS,
        HeaderValue::from_static("nosniff"),
    );
    headers.insert(header::X_FRAME_OPTIONS, HeaderValue::from_static("SAMEORIGIN"));
    headers.insert(
        header::REFERRER_POLICY,
        HeaderValue::from_static("strict-origin-when-cross-origin"),
    );
    headers.insert(
        "permissions-policy",
        HeaderValue::from_static(PERMISSIONS_POLICY),
    );
    response
}

/// Whether a `Content-Type` value is one a cross-site HTML form cannot send
fn is_allowed_content_type(value: &str) -> bool {
    let mime = value.split(';').next().unwrap_or("").trim();
    mime.eq_ignore_ascii_case("application/json")
        || mime.eq_ignore_ascii_case("multipart/form-data")
}

/// Reject state-changing API requests that a plain cross-site form could
/// forge. POST and PUT under `/api/` must be JSON or multipart.
pub async fn csrf_guard(request: Request, next: Next) -> Response {
    let method = request.method();
    if (method == Method::POST || method == Method::PUT)
        && request.uri().path().starts_with(API_PREFIX)
    {
        let allowed = request
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(is_allowed_content_type);
        if !allowed {
            tracing::warn!(
                method = %method,
                path = %request.uri().path(),
                "Rejected state-changing request without JSON or multipart content type"
            );
            return ApiError::forbidden(
                "CSRF_REJECTED",
                "Content-Type must be application/json or multipart/form-data",
            )
            .into_response();
        }
    }
    next.run(request).await
}

/// Body limit for `path`; `None` for non-API paths
pub fn body_limit_for(path: &str) -> Option<usize> {
    if !path.starts_with(API_PREFIX) {
        return None;
    }
    if path.starts_with("/api/icons") {
        Some(ICON_BODY_LIMIT)
    } else if path == "/api/config" || path.starts_with("/api/themes") {
        Some(CONFIG_BODY_LIMIT)
    } else {
        Some(DEFAULT_API_BODY_LIMIT)
    }
}

/// Enforce the tiered body limits.
///
/// A declared `Content-Length` above the limit is rejected before the body is
/// read. Otherwise the body is capped; extractors reading past the cap fail
/// with 413.
pub async fn body_limit(request: Request, next: Next) -> Response {
    let Some(limit) = body_limit_for(request.uri().path()) else {
        return next.run(request).await;
    };

    let declared = request
        .headers()
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok());
    if let Some(length) = declared
        && length > limit as u64
    {
        tracing::debug!(
            path = %request.uri().path(),
            length,
            limit,
            "Request body exceeds limit"
        );
        return ApiError::payload_too_large(limit).into_response();
    }

    let (parts, body) = request.into_parts();
    let request = Request::from_parts(parts, Body::new(Limited::new(body, limit)));
    next.run(request).await
}
