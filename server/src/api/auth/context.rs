//! Request identity

use serde::Serialize;
use utoipa::ToSchema;

use crate::api::types::ApiError;
use crate::core::config::{AuthMethod, Role};
use crate::core::constants::VIRTUAL_ADMIN_USERNAME;

/// Resolved identity of the caller, inserted into request extensions by the
/// authentication middleware.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct AuthContext {
    pub username: String,
    pub role: Role,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub groups: Vec<String>,
    /// Trust model that produced this identity
    pub method: AuthMethod,
}

impl AuthContext {
    /// Identity used for every request when authentication is disabled
    pub fn virtual_admin() -> Self {
        Self {
            username: VIRTUAL_ADMIN_USERNAME.to_string(),
            role: Role::Admin,
            email: None,
            display_name: None,
            groups: Vec::new(),
            method: AuthMethod::None,
        }
    }

    /// 403 unless this identity's role satisfies `required`
    pub fn require_role(&self, required: Role) -> Result<(), ApiError> {
        if self.role.satisfies(required) {
            Ok(())
        } else {
            Err(ApiError::forbidden(
                "INSUFFICIENT_ROLE",
                format!("{} role required", required),
            ))
        }
    }
}

/// Role derived from a group list: admin when any group is listed in
/// `admin_groups`, `default_role` otherwise.
pub fn role_from_groups(groups: &[String], admin_groups: &[String], default_role: Role) -> Role {
    if groups.iter().any(|g| admin_groups.contains(g)) {
        Role::Admin
    } else {
        default_role
    }
}
