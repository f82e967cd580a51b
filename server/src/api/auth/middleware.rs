//! Authentication and role middleware

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use axum::extract::{ConnectInfo, Request, State};
use axum::http::{Extensions, Method};
use axum::middleware::Next;
use axum::response::{IntoResponse, Redirect, Response};
use axum_extra::extract::CookieJar;

use super::context::AuthContext;
use super::manager::AuthManager;
use crate::api::types::ApiError;
use crate::core::config::Role;
use crate::core::constants::{API_PREFIX, LOGIN_PAGE_PATH};

/// Direct peer address, when the server was started with connect info
pub fn peer_ip(extensions: &Extensions) -> Option<IpAddr> {
    extensions
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip())
}

/// Resolve the caller and insert its [`AuthContext`] into request extensions.
///
/// Unauthenticated requests on protected paths are answered here: 401 JSON
/// for the API, a 303 to the login page for page navigations.
pub async fn authenticate(
    State(manager): State<Arc<AuthManager>>,
    jar: CookieJar,
    mut request: Request,
    next: Next,
) -> Response {
    let peer = peer_ip(request.extensions());
    let resolution = manager.resolve(request.uri().path(), peer, request.headers(), &jar);

    if let Some(identity) = resolution.identity {
        tracing::trace!(
            username = %identity.username,
            role = %identity.role,
            "Request authenticated"
        );
        request.extensions_mut().insert(identity);
        return next.run(request).await;
    }
    if resolution.bypassed {
        return next.run(request).await;
    }

    let path = request.uri().path();
    if path.starts_with(API_PREFIX) {
        return ApiError::auth_required().into_response();
    }
    if request.method() == Method::GET || request.method() == Method::HEAD {
        return Redirect::to(LOGIN_PAGE_PATH).into_response();
    }
    ApiError::auth_required().into_response()
}

/// 401 without an identity, 403 when its role does not satisfy `required`
pub async fn require_role(required: Role, request: Request, next: Next) -> Response {
    let check = request
        .extensions()
        .get::<AuthContext>()
        .map(|identity| (identity.username.clone(), identity.require_role(required)));

    match check {
        None => ApiError::auth_required().into_response(),
        Some((username, Err(e))) => {
            tracing::warn!(
                username = %username,
                required = %required,
                path = %request.uri().path(),
                "Insufficient role"
            );
            e.into_response()
        }
        Some((_, Ok(()))) => next.run(request).await,
    }
}

pub async fn require_admin(request: Request, next: Next) -> Response {
    require_role(Role::Admin, request, next).await
}

pub async fn require_user(request: Request, next: Next) -> Response {
    require_role(Role::User, request, next).await
}

#[cfg(test)]
mod tests {
    use axum::Router;
    use axum::body::Body;
    use axum::http::{StatusCode, header};
    use axum::middleware::{from_fn, from_fn_with_state};
    use axum::routing::get;
    use tower::ServiceExt;

    use super::*;
    use crate::api::auth::manager::testing::{ADMIN_PASSWORD, builtin_manager};
    use crate::core::persist::testing::MemoryConfigStore;

    fn app(manager: Arc<AuthManager>) -> Router {
        let admin = Router::new()
            .route("/api/admin", get(|| async { "admin-only" }))
            .route_layer(from_fn(require_admin));
        let writer = Router::new()
            .route("/api/write", get(|| async { "write" }))
            .route_layer(from_fn(require_user));
        Router::new()
            .route("/api/data", get(|| async { "data" }))
            .route("/dashboard", get(|| async { "page" }))
            .route("/api/health", get(|| async { "ok" }))
            .merge(admin)
            .merge(writer)
            .layer(from_fn_with_state(manager, authenticate))
    }

    fn get_request(uri: &str, cookie: Option<String>) -> axum::http::Request<Body> {
        let mut builder = axum::http::Request::builder().uri(uri);
        if let Some(cookie) = cookie {
            builder = builder.header(header::COOKIE, cookie);
        }
        builder.body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn test_unauthenticated_responses() {
        let app = app(builtin_manager(Arc::new(MemoryConfigStore::default())));

        let response = app.clone().oneshot(get_request("/api/data", None)).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let response = app.clone().oneshot(get_request("/dashboard", None)).await.unwrap();
        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        assert_eq!(response.headers()[header::LOCATION], "/login");

        let response = app.oneshot(get_request("/api/health", None)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_admin_guard() {
        let manager = builtin_manager(Arc::new(MemoryConfigStore::default()));
        let app = app(manager.clone());
        let cookie_for = |token: &str| Some(format!("dashgate_session={}", token));

        let response = app.clone().oneshot(get_request("/api/admin", None)).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let user = manager.login("bob".into(), ADMIN_PASSWORD.into()).await.unwrap();
        let response = app
            .clone()
            .oneshot(get_request("/api/admin", cookie_for(&user.token)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);

        let response = app
            .clone()
            .oneshot(get_request("/api/write", cookie_for(&user.token)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let admin = manager.login("admin".into(), ADMIN_PASSWORD.into()).await.unwrap();
        let response = app
            .oneshot(get_request("/api/admin", cookie_for(&admin.token)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
