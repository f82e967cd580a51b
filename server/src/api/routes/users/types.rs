//! User API request types

use serde::Deserialize;
use utoipa::ToSchema;
use validator::{Validate, ValidateEmail, ValidationError};

use crate::api::extractors::validate_username;
use crate::core::config::Role;

/// Request body for creating an account
#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct CreateUserRequest {
    #[validate(custom(function = "validate_username"))]
    pub username: String,
    /// Omit for accounts that never sign in with a password
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub role: Role,
    #[serde(default)]
    #[validate(email(message = "Invalid email address"))]
    pub email: Option<String>,
    #[serde(default)]
    #[validate(length(max = 128, message = "Display name too long"))]
    pub display_name: Option<String>,
}

/// Request body for updating an account. Absent fields are left unchanged;
/// an empty `email` or `display_name` clears it.
#[derive(Debug, Default, Deserialize, Validate, ToSchema)]
pub struct UpdateUserRequest {
    #[serde(default)]
    pub role: Option<Role>,
    #[serde(default)]
    #[validate(custom(function = "email_or_empty"))]
    pub email: Option<String>,
    #[serde(default)]
    #[validate(length(max = 128, message = "Display name too long"))]
    pub display_name: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
}

fn email_or_empty(value: &str) -> Result<(), ValidationError> {
    if value.is_empty() || value.validate_email() {
        Ok(())
    } else {
        Err(ValidationError::new("email").with_message("Invalid email address".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_request_validation() {
        let request: CreateUserRequest =
            serde_json::from_str(r#"{"username":"carol","email":"carol@example.com"}"#).unwrap();
        assert!(request.validate().is_ok());
        assert_eq!(request.role, Role::User);

        let bad: CreateUserRequest =
            serde_json::from_str(r#"{"username":"bad name","email":"nope"}"#).unwrap();
        let errors = bad.validate().unwrap_err();
        assert!(errors.field_errors().contains_key("username"));
        assert!(errors.field_errors().contains_key("email"));
    }

    #[test]
    fn test_update_allows_clearing_email() {
        let clear: UpdateUserRequest = serde_json::from_str(r#"{"email":""}"#).unwrap();
        assert!(clear.validate().is_ok());
        let bad: UpdateUserRequest = serde_json::from_str(r#"{"email":"nope"}"#).unwrap();
        assert!(bad.validate().is_err());
    }
}
