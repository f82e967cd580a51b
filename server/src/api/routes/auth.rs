//! Authentication API endpoints

use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::{Extensions, HeaderMap};
use axum::middleware::{from_fn, from_fn_with_state};
use axum::response::{IntoResponse, Redirect, Response};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use axum_extra::extract::CookieJar;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use validator::Validate;

use crate::api::auth::middleware::peer_ip;
use crate::api::auth::{
    AuthContext, AuthManager, CurrentUser, MethodRequest, MethodResponse, OidcError, TrustModel,
    require_admin,
};
use crate::api::extractors::ValidatedJson;
use crate::api::rate_limit::{RateLimitState, rate_limit_middleware};
use crate::api::types::{ApiError, ErrorBody, SuccessResponse};
use crate::core::config::AuthMethod;
use crate::core::constants::LOGIN_PAGE_PATH;

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct LoginRequest {
    #[validate(length(min = 1, max = 64, message = "Username is required"))]
    pub username: String,
    #[validate(length(min = 1, max = 256, message = "Password is required"))]
    pub password: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct LoginResponse {
    pub success: bool,
    pub user: AuthContext,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct LogoutResponse {
    pub success: bool,
    /// Upstream logout endpoint the browser should visit next
    #[serde(skip_serializing_if = "Option::is_none")]
    pub logout_url: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct AuthStatusResponse {
    pub authenticated: bool,
    pub user: Option<AuthContext>,
    pub setup_required: bool,
    pub method: Option<AuthMethod>,
    pub logout_url: Option<String>,
    pub version: &'static str,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct ChangePasswordRequest {
    #[validate(length(min = 1, message = "Current password is required"))]
    pub current_password: String,
    pub new_password: String,
}

#[derive(Debug, Deserialize)]
pub struct OidcCallbackParams {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
    pub error_description: Option<String>,
}

/// Create auth routes, nested under `/api/auth`
pub fn routes(manager: Arc<AuthManager>, rate_limit: RateLimitState) -> Router {
    let metered = Router::new()
        .route("/login", post(login))
        .route("/setup", post(setup))
        .route_layer(from_fn_with_state(rate_limit, rate_limit_middleware));

    let admin = Router::new()
        .route("/method", put(switch_method))
        .route_layer(from_fn(require_admin));

    Router::new()
        .merge(metered)
        .merge(admin)
        .route("/logout", post(logout))
        .route("/status", get(auth_status))
        .route("/me", get(me))
        .route("/password", post(change_password))
        .route("/oidc/login", get(oidc_login))
        .route("/oidc/callback", get(oidc_callback))
        .with_state(manager)
}

/// Sign in with a builtin account
#[utoipa::path(
    post,
    path = "/api/auth/login",
    tag = "auth",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Logged in, session cookie set", body = LoginResponse),
        (status = 400, description = "Password login not enabled", body = ErrorBody),
        (status = 401, description = "Invalid credentials", body = ErrorBody),
        (status = 429, description = "Too many attempts", body = ErrorBody)
    )
)]
pub async fn login(
    State(manager): State<Arc<AuthManager>>,
    jar: CookieJar,
    ValidatedJson(request): ValidatedJson<LoginRequest>,
) -> Result<(CookieJar, Json<LoginResponse>), ApiError> {
    let session = manager.login(request.username, request.password).await?;
    let cookie = manager.sessions().session_cookie(&session);
    Ok((
        jar.add(cookie),
        Json(LoginResponse {
            success: true,
            user: session.identity(),
        }),
    ))
}

/// Destroy the current session and clear the cookie
#[utoipa::path(
    post,
    path = "/api/auth/logout",
    tag = "auth",
    responses(
        (status = 200, description = "Logged out", body = LogoutResponse)
    )
)]
pub async fn logout(
    State(manager): State<Arc<AuthManager>>,
    jar: CookieJar,
) -> (CookieJar, Json<LogoutResponse>) {
    manager.logout(manager.session_token(&jar));
    let logout_url = manager
        .trust_model()
        .and_then(|m| m.logout_url().map(str::to_string));
    (
        jar.add(manager.sessions().clear_cookie()),
        Json(LogoutResponse {
            success: true,
            logout_url,
        }),
    )
}

/// Current authentication state, including whether setup is pending
#[utoipa::path(
    get,
    path = "/api/auth/status",
    tag = "auth",
    responses(
        (status = 200, description = "Authentication status", body = AuthStatusResponse)
    )
)]
pub async fn auth_status(
    State(manager): State<Arc<AuthManager>>,
    jar: CookieJar,
    headers: HeaderMap,
    extensions: Extensions,
) -> Json<AuthStatusResponse> {
    let model = manager.trust_model();
    let user = manager.identify(peer_ip(&extensions), &headers, &jar);
    Json(AuthStatusResponse {
        authenticated: user.is_some(),
        user,
        setup_required: manager.needs_setup(),
        method: model.as_ref().map(|m| m.method()),
        logout_url: model
            .as_ref()
            .and_then(|m| m.logout_url().map(str::to_string)),
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// Identity of the caller
#[utoipa::path(
    get,
    path = "/api/auth/me",
    tag = "auth",
    responses(
        (status = 200, description = "Current identity", body = AuthContext),
        (status = 401, description = "Not authenticated", body = ErrorBody)
    )
)]
pub async fn me(CurrentUser(user): CurrentUser) -> Json<AuthContext> {
    Json(user)
}

/// Change the caller's own password. Other sessions of the account are
/// revoked; the caller gets a fresh session.
#[utoipa::path(
    post,
    path = "/api/auth/password",
    tag = "auth",
    request_body = ChangePasswordRequest,
    responses(
        (status = 200, description = "Password changed", body = SuccessResponse),
        (status = 400, description = "Wrong current password or weak new password", body = ErrorBody),
        (status = 401, description = "Not authenticated", body = ErrorBody)
    )
)]
pub async fn change_password(
    State(manager): State<Arc<AuthManager>>,
    CurrentUser(user): CurrentUser,
    jar: CookieJar,
    ValidatedJson(request): ValidatedJson<ChangePasswordRequest>,
) -> Result<(CookieJar, Json<SuccessResponse>), ApiError> {
    let session = manager
        .change_password(&user, request.current_password, request.new_password)
        .await?;
    let cookie = manager.sessions().session_cookie(&session);
    Ok((jar.add(cookie), SuccessResponse::ok()))
}

/// Commit first-run setup
#[utoipa::path(
    post,
    path = "/api/auth/setup",
    tag = "auth",
    request_body = MethodRequest,
    responses(
        (status = 200, description = "Setup committed", body = MethodResponse),
        (status = 400, description = "Invalid parameters", body = ErrorBody),
        (status = 409, description = "Setup already completed", body = ErrorBody),
        (status = 500, description = "Configuration could not be saved", body = ErrorBody)
    )
)]
pub async fn setup(
    State(manager): State<Arc<AuthManager>>,
    jar: CookieJar,
    ValidatedJson(request): ValidatedJson<MethodRequest>,
) -> Result<(CookieJar, Json<MethodResponse>), ApiError> {
    let (method, session) = manager.commit_setup(request).await?;
    let jar = match session {
        Some(session) => jar.add(manager.sessions().session_cookie(&session)),
        None => jar,
    };
    Ok((
        jar,
        Json(MethodResponse {
            success: true,
            method,
        }),
    ))
}

/// Switch the active trust model (admin)
#[utoipa::path(
    put,
    path = "/api/auth/method",
    tag = "auth",
    request_body = MethodRequest,
    responses(
        (status = 200, description = "Method changed", body = MethodResponse),
        (status = 400, description = "Invalid parameters", body = ErrorBody),
        (status = 403, description = "Admin role required", body = ErrorBody)
    )
)]
pub async fn switch_method(
    State(manager): State<Arc<AuthManager>>,
    ValidatedJson(request): ValidatedJson<MethodRequest>,
) -> Result<Json<MethodResponse>, ApiError> {
    let method = manager.switch_method(request).await?;
    Ok(Json(MethodResponse {
        success: true,
        method,
    }))
}

fn login_error_redirect(code: &str) -> Response {
    Redirect::to(&format!("{}?error={}", LOGIN_PAGE_PATH, code)).into_response()
}

fn log_oidc_failure(err: &OidcError) {
    match err {
        OidcError::Unavailable(detail) => {
            tracing::warn!(
                error = %detail,
                "Identity provider unreachable, login may succeed on retry"
            )
        }
        OidcError::InvalidState => {
            tracing::warn!("OIDC callback with unknown, expired or replayed state")
        }
        OidcError::Exchange(detail) => {
            tracing::warn!(error = %detail, "OIDC code exchange failed")
        }
        other => tracing::warn!(error = %other, "OIDC login failed"),
    }
}

fn active_oidc(manager: &AuthManager) -> Option<Arc<TrustModel>> {
    manager
        .trust_model()
        .filter(|m| matches!(m.as_ref(), TrustModel::Oidc(_)))
}

/// Start an OIDC login: redirect to the provider
#[utoipa::path(
    get,
    path = "/api/auth/oidc/login",
    tag = "auth",
    responses(
        (status = 303, description = "Redirect to the identity provider"),
        (status = 400, description = "OIDC is not the active method", body = ErrorBody)
    )
)]
pub async fn oidc_login(State(manager): State<Arc<AuthManager>>) -> Result<Response, ApiError> {
    let model = active_oidc(&manager).ok_or_else(oidc_not_configured)?;
    let TrustModel::Oidc(oidc) = model.as_ref() else {
        return Err(oidc_not_configured());
    };

    match manager.oidc().begin_login(oidc).await {
        Ok(url) => Ok(Redirect::to(&url).into_response()),
        Err(e) => {
            log_oidc_failure(&e);
            Ok(login_error_redirect(e.login_error_code()))
        }
    }
}

/// Complete an OIDC login and start a session
#[utoipa::path(
    get,
    path = "/api/auth/oidc/callback",
    tag = "auth",
    params(
        ("code" = Option<String>, Query, description = "Authorization code"),
        ("state" = Option<String>, Query, description = "State issued at login")
    ),
    responses(
        (status = 303, description = "Redirect to the dashboard or back to the login page")
    )
)]
pub async fn oidc_callback(
    State(manager): State<Arc<AuthManager>>,
    jar: CookieJar,
    Query(params): Query<OidcCallbackParams>,
) -> Response {
    if let Some(error) = params.error {
        tracing::warn!(
            error = %error,
            description = params.error_description.as_deref().unwrap_or(""),
            "Identity provider returned an error"
        );
        return login_error_redirect("oidc_failed");
    }

    let (Some(code), Some(state)) = (params.code, params.state) else {
        tracing::warn!("OIDC callback without code or state");
        return login_error_redirect("oidc_failed");
    };

    let Some(model) = active_oidc(&manager) else {
        tracing::warn!("OIDC callback while OIDC is not the active method");
        return login_error_redirect("oidc_failed");
    };
    let TrustModel::Oidc(oidc) = model.as_ref() else {
        return login_error_redirect("oidc_failed");
    };

    let identity = match manager.oidc().handle_callback(oidc, &code, &state).await {
        Ok(identity) => identity,
        Err(e) => {
            log_oidc_failure(&e);
            return login_error_redirect(e.login_error_code());
        }
    };

    match manager.create_oidc_session(&identity) {
        Ok(session) => {
            let cookie = manager.sessions().session_cookie(&session);
            (jar.add(cookie), Redirect::to("/")).into_response()
        }
        Err(e) => e.into_response(),
    }
}

fn oidc_not_configured() -> ApiError {
    ApiError::bad_request("OIDC_NOT_CONFIGURED", "OIDC login is not enabled")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::constants::{MAX_PASSWORD_LENGTH, MAX_USERNAME_LENGTH};

    #[test]
    fn test_login_request_validation() {
        let ok = LoginRequest {
            username: "alice".into(),
            password: "secret".into(),
        };
        assert!(ok.validate().is_ok());

        let empty = LoginRequest {
            username: String::new(),
            password: String::new(),
        };
        let errors = empty.validate().unwrap_err();
        assert_eq!(errors.field_errors().len(), 2);

        let long = LoginRequest {
            username: "a".repeat(MAX_USERNAME_LENGTH + 1),
            password: "p".repeat(MAX_PASSWORD_LENGTH + 1),
        };
        assert!(long.validate().is_err());
    }

    #[test]
    fn test_login_error_redirect() {
        let response = login_error_redirect("oidc_unavailable");
        assert_eq!(
            response.headers()[axum::http::header::LOCATION],
            "/login?error=oidc_unavailable"
        );
    }
}
