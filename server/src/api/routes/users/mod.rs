//! Account management endpoints (admin only)

pub mod types;

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::middleware::from_fn;
use axum::routing::{get, put};
use axum::{Json, Router};

use crate::api::auth::{
    Account, AccountUpdate, AccountView, AdminUser, AuthManager, password_error, require_admin,
};
use crate::api::auth::password::hash_new_password;
use crate::api::extractors::{UsernamePath, ValidatedJson};
use crate::api::types::{ApiError, ErrorBody, SuccessResponse};

use types::{CreateUserRequest, UpdateUserRequest};

/// Build user management routes, nested under `/api/auth`
pub fn routes(manager: Arc<AuthManager>) -> Router {
    Router::new()
        .route("/users", get(list_users).post(create_user))
        .route("/users/{username}", put(update_user).delete(delete_user))
        .route_layer(from_fn(require_admin))
        .with_state(manager)
}

/// List accounts
#[utoipa::path(
    get,
    path = "/api/auth/users",
    tag = "users",
    responses(
        (status = 200, description = "Accounts sorted by username", body = Vec<AccountView>),
        (status = 403, description = "Admin role required", body = ErrorBody)
    )
)]
pub async fn list_users(
    State(manager): State<Arc<AuthManager>>,
    _admin: AdminUser,
) -> Json<Vec<AccountView>> {
    Json(manager.directory().list())
}

/// Create an account
#[utoipa::path(
    post,
    path = "/api/auth/users",
    tag = "users",
    request_body = CreateUserRequest,
    responses(
        (status = 201, description = "Account created", body = AccountView),
        (status = 400, description = "Invalid request", body = ErrorBody),
        (status = 409, description = "Username taken", body = ErrorBody)
    )
)]
pub async fn create_user(
    State(manager): State<Arc<AuthManager>>,
    _admin: AdminUser,
    ValidatedJson(request): ValidatedJson<CreateUserRequest>,
) -> Result<(StatusCode, Json<AccountView>), ApiError> {
    let hash = match request.password {
        Some(password) => Some(hash_new_password(password).await.map_err(password_error)?),
        None => None,
    };

    let mut account = Account::new(request.username, request.role, hash);
    account.email = request.email.filter(|e| !e.is_empty());
    account.display_name = request.display_name.filter(|n| !n.is_empty());

    let view = manager.create_user(account).await?;
    Ok((StatusCode::CREATED, Json(view)))
}

/// Update role, contact details or password of an account
#[utoipa::path(
    put,
    path = "/api/auth/users/{username}",
    tag = "users",
    params(("username" = String, Path, description = "Account username")),
    request_body = UpdateUserRequest,
    responses(
        (status = 200, description = "Account updated", body = AccountView),
        (status = 404, description = "Unknown account", body = ErrorBody),
        (status = 409, description = "Would remove the last admin", body = ErrorBody)
    )
)]
pub async fn update_user(
    State(manager): State<Arc<AuthManager>>,
    _admin: AdminUser,
    UsernamePath(username): UsernamePath,
    ValidatedJson(request): ValidatedJson<UpdateUserRequest>,
) -> Result<Json<AccountView>, ApiError> {
    let password_hash = match request.password {
        Some(password) => Some(hash_new_password(password).await.map_err(password_error)?),
        None => None,
    };

    let view = manager
        .update_user(
            &username,
            AccountUpdate {
                role: request.role,
                email: request.email,
                display_name: request.display_name,
                password_hash,
            },
        )
        .await?;
    Ok(Json(view))
}

/// Delete an account and revoke its sessions
#[utoipa::path(
    delete,
    path = "/api/auth/users/{username}",
    tag = "users",
    params(("username" = String, Path, description = "Account username")),
    responses(
        (status = 200, description = "Account deleted", body = SuccessResponse),
        (status = 404, description = "Unknown account", body = ErrorBody),
        (status = 409, description = "Would remove the last admin", body = ErrorBody)
    )
)]
pub async fn delete_user(
    State(manager): State<Arc<AuthManager>>,
    _admin: AdminUser,
    UsernamePath(username): UsernamePath,
) -> Result<Json<SuccessResponse>, ApiError> {
    manager.delete_user(&username).await?;
    Ok(SuccessResponse::ok())
}
