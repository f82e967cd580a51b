//! OpenAPI document for the gateway endpoints

use axum::response::Json;
use utoipa::OpenApi;

use crate::api::auth::{AccountView, AuthContext, MethodRequest, MethodResponse};
use crate::api::routes::users::types::{CreateUserRequest, UpdateUserRequest};
use crate::api::routes::{auth, health, users};
use crate::api::types::{ErrorBody, SuccessResponse};
use crate::core::config::{
    AuthMethod, ForwardAuthFileConfig, ForwardAuthHeaders, OidcClaims, OidcFileConfig, Role,
};

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Dashgate API",
        version = env!("CARGO_PKG_VERSION"),
        description = "Authentication and access control for the dashboard"
    ),
    tags(
        (name = "health", description = "Liveness"),
        (name = "auth", description = "Login, sessions, setup and trust model"),
        (name = "users", description = "Account management")
    ),
    paths(
        health::health,
        auth::login,
        auth::logout,
        auth::auth_status,
        auth::me,
        auth::change_password,
        auth::setup,
        auth::switch_method,
        auth::oidc_login,
        auth::oidc_callback,
        users::list_users,
        users::create_user,
        users::update_user,
        users::delete_user,
    ),
    components(schemas(
        ErrorBody,
        SuccessResponse,
        AuthContext,
        AccountView,
        AuthMethod,
        Role,
        MethodRequest,
        MethodResponse,
        ForwardAuthFileConfig,
        ForwardAuthHeaders,
        OidcFileConfig,
        OidcClaims,
        CreateUserRequest,
        UpdateUserRequest,
        auth::LoginRequest,
        auth::LoginResponse,
        auth::LogoutResponse,
        auth::AuthStatusResponse,
        auth::ChangePasswordRequest,
        health::HealthResponse,
    ))
)]
pub struct ApiDoc;

/// Serve the OpenAPI JSON document
pub async fn openapi_json() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}
