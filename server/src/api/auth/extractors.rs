//! Typed access to the request identity
//!
//! ```no_run
//! # use dashgate_server::api::auth::AdminUser;
//! async fn list_users(AdminUser(admin): AdminUser) -> String {
//!     admin.username
//! }
//! ```

use axum::extract::FromRequestParts;
use axum::http::request::Parts;

use super::context::AuthContext;
use crate::api::types::ApiError;
use crate::core::config::Role;

fn identity(parts: &Parts) -> Option<AuthContext> {
    parts.extensions.get::<AuthContext>().cloned()
}

/// Authenticated caller; 401 when the request carries no identity
#[derive(Debug, Clone)]
pub struct CurrentUser(pub AuthContext);

impl<S> FromRequestParts<S> for CurrentUser
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        identity(parts).map(Self).ok_or_else(ApiError::auth_required)
    }
}

/// Caller with the admin role; 401 without identity, 403 otherwise
#[derive(Debug, Clone)]
pub struct AdminUser(pub AuthContext);

impl<S> FromRequestParts<S> for AdminUser
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let identity = identity(parts).ok_or_else(ApiError::auth_required)?;
        identity.require_role(Role::Admin)?;
        Ok(Self(identity))
    }
}

#[cfg(test)]
mod tests {
    use axum::http::Request;

    use super::*;
    use crate::core::config::AuthMethod;

    fn parts_with(identity: Option<AuthContext>) -> Parts {
        let (mut parts, _) = Request::new(()).into_parts();
        if let Some(identity) = identity {
            parts.extensions.insert(identity);
        }
        parts
    }

    fn viewer() -> AuthContext {
        AuthContext {
            username: "val".into(),
            role: Role::Viewer,
            email: None,
            display_name: None,
            groups: vec![],
            method: AuthMethod::ForwardAuth,
        }
    }

    #[tokio::test]
    async fn test_current_user() {
        let mut parts = parts_with(None);
        let err = CurrentUser::from_request_parts(&mut parts, &()).await.unwrap_err();
        assert_eq!(err.status(), axum::http::StatusCode::UNAUTHORIZED);

        let mut parts = parts_with(Some(viewer()));
        let CurrentUser(user) = CurrentUser::from_request_parts(&mut parts, &()).await.unwrap();
        assert_eq!(user.username, "val");
    }

    #[tokio::test]
    async fn test_admin_user() {
        let mut parts = parts_with(Some(viewer()));
        let err = AdminUser::from_request_parts(&mut parts, &()).await.unwrap_err();
        assert_eq!(err.status(), axum::http::StatusCode::FORBIDDEN);

        let mut parts = parts_with(Some(AuthContext::virtual_admin()));
        assert!(AdminUser::from_request_parts(&mut parts, &()).await.is_ok());
    }
}
