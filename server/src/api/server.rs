//! API server initialization

use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::middleware::{from_fn, from_fn_with_state};
use axum::response::IntoResponse;
use axum::routing::get;
use tokio::net::TcpListener;
use tower_http::compression::CompressionLayer;
use tower_http::services::{ServeDir, ServeFile};
use tower_http::trace::TraceLayer;

use super::auth::{AuthManager, authenticate, setup_guard};
use super::middleware::{body_limit, csrf_guard, security_headers};
use super::openapi::openapi_json;
use super::rate_limit::RateLimitState;
use super::routes::{auth, health, users};
use super::types::ApiError;
use crate::core::CoreApp;

/// JSON API routes without the request pipeline
pub fn api_routes(manager: Arc<AuthManager>, rate_limit: RateLimitState) -> Router {
    let auth_routes = auth::routes(manager.clone(), rate_limit).merge(users::routes(manager));

    Router::new()
        .route("/api/health", get(health::health))
        .route("/api/openapi.json", get(openapi_json))
        .nest("/api/auth", auth_routes)
}

/// Wrap a router in the request pipeline.
///
/// Outermost first: security headers, CSRF check, body limit, setup guard,
/// authentication. Every route and the fallback sit behind all of them.
pub fn wrap(router: Router, manager: Arc<AuthManager>) -> Router {
    router
        .layer(from_fn_with_state(manager.clone(), authenticate))
        .layer(from_fn_with_state(manager, setup_guard))
        .layer(from_fn(body_limit))
        .layer(DefaultBodyLimit::disable())
        .layer(from_fn(csrf_guard))
        .layer(from_fn(security_headers))
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http())
}

/// Full application router. Unknown non-API paths are served from
/// `static_dir` with `index.html` as the single-page fallback.
pub fn build_router(
    manager: Arc<AuthManager>,
    rate_limit: RateLimitState,
    static_dir: Option<&Path>,
) -> Router {
    let router = api_routes(manager.clone(), rate_limit);
    let router = match static_dir {
        Some(dir) => {
            let index = ServeFile::new(dir.join("index.html"));
            router.fallback_service(ServeDir::new(dir).fallback(index))
        }
        None => router.fallback(not_found),
    };
    wrap(router, manager)
}

async fn not_found() -> impl IntoResponse {
    ApiError::not_found("NOT_FOUND", "Not found")
}

pub struct ApiServer {
    app: CoreApp,
}

impl ApiServer {
    pub fn new(app: CoreApp) -> Self {
        Self { app }
    }

    /// Serve until shutdown is triggered. Returns CoreApp for graceful shutdown.
    pub async fn start(self) -> Result<CoreApp> {
        let Self { app } = self;

        let shutdown = app.shutdown.clone();
        let addr = SocketAddr::new(app.config.server.host.parse()?, app.config.server.port);

        let rate_limit = RateLimitState {
            limiter: app.rate_limiter.clone(),
            trusted_proxies: Arc::new(app.config.server.trusted_proxies.clone()),
        };

        if let Some(dir) = &app.config.server.static_dir
            && !dir.join("index.html").exists()
        {
            tracing::warn!(path = %dir.display(), "Static directory has no index.html");
        }

        let router = build_router(
            app.auth.clone(),
            rate_limit,
            app.config.server.static_dir.as_deref(),
        );

        let listener = TcpListener::bind(addr).await?;
        tracing::info!(
            %addr,
            method = app.auth.method().map(|m| m.as_str()).unwrap_or("setup pending"),
            "Server listening"
        );

        axum::serve(
            listener,
            router.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(shutdown.wait())
        .await?;

        tracing::debug!("HTTP server stopped");
        Ok(app)
    }
}

#[cfg(test)]
mod tests {
    use std::net::SocketAddr;

    use axum::body::Body;
    use axum::extract::ConnectInfo;
    use axum::http::{Method, Request, StatusCode, header};
    use axum::response::Response;
    use http_body_util::BodyExt;
    use serde_json::{Value, json};
    use tower::ServiceExt;

    use super::*;
    use crate::api::auth::testing::{ADMIN_PASSWORD, auth_config, builtin_manager, manager_with};
    use crate::api::rate_limit::SlidingWindowLimiter;
    use crate::core::config::{AuthMethod, RateLimitConfig};
    use crate::core::persist::testing::MemoryConfigStore;

    fn app(manager: Arc<AuthManager>) -> Router {
        let rate_limit = RateLimitState {
            limiter: Arc::new(SlidingWindowLimiter::new(&RateLimitConfig::default())),
            trusted_proxies: Arc::new(Vec::new()),
        };
        let router = api_routes(manager.clone(), rate_limit)
            .route("/api/config", get(|| async { "config" }))
            .fallback(|| async { "page" });
        wrap(router, manager)
    }

    fn get_request(path: &str, cookie: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder().uri(path);
        if let Some(cookie) = cookie {
            builder = builder.header(header::COOKIE, cookie);
        }
        builder.body(Body::empty()).unwrap()
    }

    fn json_request(
        method: Method,
        path: &str,
        body: Value,
        cookie: Option<&str>,
    ) -> Request<Body> {
        let mut builder = Request::builder()
            .method(method)
            .uri(path)
            .header(header::CONTENT_TYPE, "application/json");
        if let Some(cookie) = cookie {
            builder = builder.header(header::COOKIE, cookie);
        }
        builder.body(Body::from(body.to_string())).unwrap()
    }

    async fn body_json(response: Response) -> Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    /// `name=value` from the response's Set-Cookie header
    fn session_cookie(response: &Response) -> String {
        let raw = response
            .headers()
            .get(header::SET_COOKIE)
            .expect("session cookie")
            .to_str()
            .unwrap();
        raw.split(';').next().unwrap().to_string()
    }

    async fn login(app: &Router, username: &str) -> String {
        let response = app
            .clone()
            .oneshot(json_request(
                Method::POST,
                "/api/auth/login",
                json!({ "username": username, "password": ADMIN_PASSWORD }),
                None,
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        session_cookie(&response)
    }

    #[tokio::test]
    async fn test_pending_setup_blocks_api() {
        let store = Arc::new(MemoryConfigStore::default());
        let app = app(manager_with(auth_config(None), store));

        let response = app.clone().oneshot(get_request("/api/config", None)).await.unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body_json(response).await, json!({ "error": "setup_required" }));

        let response = app
            .clone()
            .oneshot(get_request("/api/auth/status", None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let status = body_json(response).await;
        assert_eq!(status["setup_required"], json!(true));
        assert_eq!(status["authenticated"], json!(false));

        let response = app.clone().oneshot(get_request("/", None)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = app.oneshot(get_request("/api/health", None)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_builtin_setup_flow() {
        let store = Arc::new(MemoryConfigStore::default());
        let app = app(manager_with(auth_config(None), store.clone()));

        let response = app
            .clone()
            .oneshot(json_request(
                Method::POST,
                "/api/auth/setup",
                json!({ "method": "builtin", "username": "admin", "password": "short" }),
                None,
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(store.last().is_none());

        let response = app
            .clone()
            .oneshot(json_request(
                Method::POST,
                "/api/auth/setup",
                json!({ "method": "builtin", "username": "admin", "password": "correct-horse" }),
                None,
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let cookie = session_cookie(&response);
        assert_eq!(
            body_json(response).await,
            json!({ "success": true, "method": "builtin" })
        );

        let saved = store.last().unwrap();
        let auth = saved.auth.unwrap();
        assert_eq!(auth.method, Some(AuthMethod::Builtin));
        assert_eq!(auth.users.unwrap()[0].username, "admin");

        let response = app
            .clone()
            .oneshot(get_request("/api/config", Some(&cookie)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = app.oneshot(get_request("/api/config", None)).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_setup_runs_once() {
        let store = Arc::new(MemoryConfigStore::default());
        let app = app(manager_with(auth_config(None), store));
        let body = json!({ "method": "none" });

        let response = app
            .clone()
            .oneshot(json_request(Method::POST, "/api/auth/setup", body.clone(), None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = app
            .oneshot(json_request(Method::POST, "/api/auth/setup", body, None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn test_setup_persist_failure_stays_pending() {
        let store = Arc::new(MemoryConfigStore::failing());
        let app = app(manager_with(auth_config(None), store));

        let response = app
            .clone()
            .oneshot(json_request(
                Method::POST,
                "/api/auth/setup",
                json!({ "method": "none" }),
                None,
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let response = app.oneshot(get_request("/api/config", None)).await.unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_forward_auth_setup_and_trust() {
        let store = Arc::new(MemoryConfigStore::default());
        let app = app(manager_with(auth_config(None), store));

        let response = app
            .clone()
            .oneshot(json_request(
                Method::POST,
                "/api/auth/setup",
                json!({ "method": "forward_auth", "forward_auth": { "trusted_proxies": [] } }),
                None,
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = app
            .clone()
            .oneshot(json_request(
                Method::POST,
                "/api/auth/setup",
                json!({
                    "method": "forward_auth",
                    "forward_auth": { "trusted_proxies": ["10.0.0.0/8"] }
                }),
                None,
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = app
            .clone()
            .oneshot(get_request("/api/auth/status", None))
            .await
            .unwrap();
        let status = body_json(response).await;
        assert_eq!(status["method"], json!("forward_auth"));
        assert_eq!(status["setup_required"], json!(false));

        let from_peer = |peer: [u8; 4]| {
            let mut request = Request::builder()
                .uri("/api/config")
                .header("remote-user", "alice")
                .body(Body::empty())
                .unwrap();
            request
                .extensions_mut()
                .insert(ConnectInfo(SocketAddr::from((peer, 40000))));
            request
        };

        let response = app.clone().oneshot(from_peer([192, 168, 1, 5])).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let response = app.oneshot(from_peer([10, 0, 0, 2])).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_page_navigation_redirects_to_login() {
        let app = app(builtin_manager(Arc::new(MemoryConfigStore::default())));

        let response = app.clone().oneshot(get_request("/settings", None)).await.unwrap();
        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        assert_eq!(response.headers()[header::LOCATION], "/login");

        let response = app.oneshot(get_request("/login", None)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()["x-content-type-options"], "nosniff");
    }

    #[tokio::test]
    async fn test_csrf_rejects_form_posts() {
        let app = app(builtin_manager(Arc::new(MemoryConfigStore::default())));

        let request = Request::builder()
            .method(Method::POST)
            .uri("/api/auth/login")
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(Body::from("username=admin&password=x"))
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        assert_eq!(body_json(response).await["code"], json!("CSRF_REJECTED"));
    }

    #[tokio::test]
    async fn test_admin_endpoints_require_admin() {
        let app = app(builtin_manager(Arc::new(MemoryConfigStore::default())));

        let bob = login(&app, "bob").await;
        let response = app
            .clone()
            .oneshot(get_request("/api/auth/users", Some(&bob)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);

        let response = app
            .clone()
            .oneshot(json_request(
                Method::PUT,
                "/api/auth/method",
                json!({ "method": "none" }),
                Some(&bob),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);

        let admin = login(&app, "admin").await;
        let response = app
            .oneshot(get_request("/api/auth/users", Some(&admin)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let users = body_json(response).await;
        let names: Vec<_> = users
            .as_array()
            .unwrap()
            .iter()
            .map(|u| u["username"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(names, vec!["admin", "bob"]);
    }

    #[tokio::test]
    async fn test_dotted_username_stays_manageable() {
        let app = app(builtin_manager(Arc::new(MemoryConfigStore::default())));
        let admin = login(&app, "admin").await;

        let response = app
            .clone()
            .oneshot(json_request(
                Method::POST,
                "/api/auth/users",
                json!({ "username": "eve.css", "role": "viewer" }),
                Some(&admin),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);

        let response = app
            .clone()
            .oneshot(json_request(
                Method::PUT,
                "/api/auth/users/eve.css",
                json!({ "role": "user" }),
                Some(&admin),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let request = Request::builder()
            .method(Method::DELETE)
            .uri("/api/auth/users/eve.css")
            .header(header::COOKIE, &admin)
            .body(Body::empty())
            .unwrap();
        let response = app.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let request = Request::builder()
            .method(Method::DELETE)
            .uri("/api/auth/users/eve.css")
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_login_is_rate_limited() {
        let app = app(builtin_manager(Arc::new(MemoryConfigStore::default())));
        let attempt = || {
            json_request(
                Method::POST,
                "/api/auth/login",
                json!({ "username": "admin", "password": "wrong-password" }),
                None,
            )
        };

        for _ in 0..5 {
            let response = app.clone().oneshot(attempt()).await.unwrap();
            assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        }
        let response = app.oneshot(attempt()).await.unwrap();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    }
}
