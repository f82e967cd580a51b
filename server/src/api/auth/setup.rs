//! First-run setup gate
//!
//! While no trust model has been committed, the whole API except the auth
//! bootstrap endpoints answers 503 `{"error":"setup_required"}`. Committing
//! is one-way: once `needs_setup` flips to false it never flips back.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use axum::Json;
use axum::extract::{Request, State};
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;
use utoipa::ToSchema;
use validator::Validate;

use super::directory::Account;
use super::manager::AuthManager;
use super::password::{self, PasswordError};
use super::trust::{TrustModel, TrustModelError};
use crate::api::extractors::is_valid_username;
use crate::api::types::ApiError;
use crate::core::config::{
    AuthFileConfig, AuthMethod, ForwardAuthFileConfig, OidcFileConfig, Role,
};
use crate::core::constants::API_PREFIX;

/// Endpoints reachable while setup is pending
const PENDING_ALLOWED_PATHS: &[&str] = &[
    "/api/auth/status",
    "/api/auth/setup",
    "/api/auth/login",
    "/api/auth/logout",
    "/api/health",
];

const PENDING_ALLOWED_PREFIX: &str = "/api/auth/oidc/";

/// Process-wide `needs_setup` flag
pub struct SetupGate {
    needs_setup: AtomicBool,
}

impl SetupGate {
    pub fn new(needs_setup: bool) -> Self {
        Self {
            needs_setup: AtomicBool::new(needs_setup),
        }
    }

    pub fn is_pending(&self) -> bool {
        self.needs_setup.load(Ordering::Acquire)
    }

    /// Flip to committed. Callers hold the configuration lock.
    pub(crate) fn mark_committed(&self) {
        self.needs_setup.store(false, Ordering::Release);
    }
}

pub fn is_allowed_while_pending(path: &str) -> bool {
    !path.starts_with(API_PREFIX)
        || PENDING_ALLOWED_PATHS.contains(&path)
        || path.starts_with(PENDING_ALLOWED_PREFIX)
}

/// Block the protected API until setup has been committed
pub async fn setup_guard(
    State(manager): State<Arc<AuthManager>>,
    request: Request,
    next: Next,
) -> Response {
    if manager.needs_setup() && !is_allowed_while_pending(request.uri().path()) {
        tracing::debug!(path = %request.uri().path(), "Request blocked until setup completes");
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "error": "setup_required" })),
        )
            .into_response();
    }
    next.run(request).await
}

/// Body of `POST /api/auth/setup` and `PUT /api/auth/method`
#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
pub struct MethodRequest {
    pub method: AuthMethod,
    /// Admin account (builtin)
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub forward_auth: Option<ForwardAuthFileConfig>,
    #[serde(default)]
    pub oidc: Option<OidcFileConfig>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct MethodResponse {
    pub success: bool,
    pub method: AuthMethod,
}

#[derive(Debug, Error)]
pub enum SetupError {
    #[error("Setup has already been completed")]
    AlreadyCommitted,
    #[error("{0}")]
    Invalid(&'static str),
    #[error(transparent)]
    Password(#[from] PasswordError),
    #[error(transparent)]
    TrustModel(#[from] TrustModelError),
    #[error("Failed to save configuration: {0}")]
    Persist(#[source] anyhow::Error),
}

impl From<SetupError> for ApiError {
    fn from(err: SetupError) -> Self {
        match err {
            SetupError::AlreadyCommitted => ApiError::conflict("SETUP_COMPLETE", err.to_string()),
            SetupError::Invalid(message) => ApiError::bad_request("INVALID_SETUP", message),
            SetupError::Password(PasswordError::Hash(detail)) => ApiError::internal(detail),
            SetupError::Password(e) => ApiError::bad_request("WEAK_PASSWORD", e.to_string()),
            SetupError::TrustModel(e) => ApiError::bad_request("INVALID_SETUP", e.to_string()),
            SetupError::Persist(e) => ApiError::internal(format!("{:#}", e)),
        }
    }
}

/// A validated method change, ready to persist and publish
#[derive(Debug)]
pub struct MethodPlan {
    pub model: TrustModel,
    pub forward_auth: Option<ForwardAuthFileConfig>,
    pub oidc: Option<OidcFileConfig>,
    /// Admin account supplied with a builtin request
    pub admin: Option<Account>,
}

impl MethodPlan {
    pub fn method(&self) -> AuthMethod {
        self.model.method()
    }

    /// Write the method and its section into the auth configuration
    pub fn apply(&self, auth: &mut AuthFileConfig) {
        auth.method = Some(self.method());
        if let Some(forward_auth) = &self.forward_auth {
            auth.forward_auth = Some(forward_auth.clone());
        }
        if let Some(oidc) = &self.oidc {
            auth.oidc = Some(oidc.clone());
        }
    }
}

/// Validate a method request. Hashes the admin password, so run it off the
/// async executor.
///
/// With `require_admin`, a builtin request must carry credentials.
pub fn prepare(request: MethodRequest, require_admin: bool) -> Result<MethodPlan, SetupError> {
    let MethodRequest {
        method,
        username,
        password,
        forward_auth,
        oidc,
    } = request;

    match method {
        AuthMethod::None => Ok(MethodPlan {
            model: TrustModel::None,
            forward_auth: None,
            oidc: None,
            admin: None,
        }),
        AuthMethod::Builtin => {
            let admin = match (username, password) {
                (Some(username), Some(password)) => {
                    let username = username.trim().to_string();
                    if !is_valid_username(&username) {
                        return Err(SetupError::Invalid("A valid admin username is required"));
                    }
                    password::validate_strength(&password)?;
                    let hash = password::hash_password(&password)?;
                    Some(Account::new(username, Role::Admin, Some(hash)))
                }
                (None, None) if !require_admin => None,
                (None, _) => return Err(SetupError::Invalid("A valid admin username is required")),
                (Some(_), None) => return Err(SetupError::Password(PasswordError::TooShort)),
            };
            Ok(MethodPlan {
                model: TrustModel::Builtin,
                forward_auth: None,
                oidc: None,
                admin,
            })
        }
        AuthMethod::ForwardAuth => {
            let section =
                forward_auth.ok_or(TrustModelError::MissingSection("forward_auth"))?;
            let model = TrustModel::from_config(method, Some(&section), None)?;
            Ok(MethodPlan {
                model,
                forward_auth: Some(section),
                oidc: None,
                admin: None,
            })
        }
        AuthMethod::Oidc => {
            let section = oidc.ok_or(TrustModelError::MissingSection("oidc"))?;
            let model = TrustModel::from_config(method, None, Some(&section))?;
            Ok(MethodPlan {
                model,
                forward_auth: None,
                oidc: Some(section),
                admin: None,
            })
        }
    }
}
