//! User-related domain models
//!
//! This module defines the stored user, the credential view used by the
//! authentication flow, and the request/response payloads of the user API.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use validator::Validate;

use super::status::Status;

/// User account as exposed by the API
///
/// The password digest never leaves the store through this type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    /// Unique user ID, also the token subject
    pub id: i64,

    /// Owning application
    pub app_id: i64,

    /// Name of the owning application
    pub app_name: String,

    pub firstname: String,
    pub lastname: String,

    /// Login identifier, unique across all apps
    pub email: String,

    pub status: Status,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A user as the authentication flow sees it
#[derive(Clone, PartialEq, Eq)]
pub struct CredentialRecord {
    pub id: i64,
    pub app_id: i64,
    pub email: String,

    /// Argon2id PHC string
    pub password_hash: String,

    pub status: Status,
}

impl fmt::Debug for CredentialRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialRecord")
            .field("id", &self.id)
            .field("app_id", &self.app_id)
            .field("email", &self.email)
            .field("password_hash", &"<redacted>")
            .field("status", &self.status)
            .finish()
    }
}

/// User ready for insertion, password already hashed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewUser {
    pub app_id: i64,
    pub firstname: String,
    pub lastname: String,
    pub email: String,
    pub password_hash: String,
    pub status: Status,
}

/// Partial update of a stored user; `None` leaves the column unchanged
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UserChanges {
    pub app_id: Option<i64>,
    pub firstname: Option<String>,
    pub lastname: Option<String>,
    pub email: Option<String>,
    pub password_hash: Option<String>,
    pub status: Option<Status>,
}

impl UserChanges {
    /// True when nothing would change
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// Request to create a user
#[derive(Clone, Deserialize, Validate)]
pub struct CreateUserRequest {
    pub app_id: i64,

    #[validate(length(min = 1, message = "firstname is required"))]
    pub firstname: String,

    #[validate(length(min = 1, message = "lastname is required"))]
    pub lastname: String,

    #[validate(email(message = "email must be a valid address"))]
    pub email: String,

    #[validate(length(min = 8, message = "password must be at least 8 characters"))]
    pub password: String,

    #[serde(default)]
    pub status: Option<Status>,
}

/// Request to update a user
#[derive(Clone, Default, Deserialize, Validate)]
pub struct UpdateUserRequest {
    pub app_id: Option<i64>,

    #[validate(length(min = 1, message = "firstname must not be empty"))]
    pub firstname: Option<String>,

    #[validate(length(min = 1, message = "lastname must not be empty"))]
    pub lastname: Option<String>,

    #[validate(email(message = "email must be a valid address"))]
    pub email: Option<String>,

    #[validate(length(min = 8, message = "password must be at least 8 characters"))]
    pub password: Option<String>,

    pub status: Option<Status>,
}

impl fmt::Debug for CreateUserRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CreateUserRequest")
            .field("app_id", &self.app_id)
            .field("firstname", &self.firstname)
            .field("lastname", &self.lastname)
            .field("email", &self.email)
            .field("password", &"<redacted>")
            .field("status", &self.status)
            .finish()
    }
}

impl fmt::Debug for UpdateUserRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UpdateUserRequest")
            .field("app_id", &self.app_id)
            .field("firstname", &self.firstname)
            .field("lastname", &self.lastname)
            .field("email", &self.email)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("status", &self.status)
            .finish()
    }
}

/// Login request
#[derive(Clone, Deserialize, Validate)]
pub struct LoginRequest {
    #[validate(email(message = "email must be a valid address"))]
    pub email: String,

    #[validate(length(min = 1, message = "password is required"))]
    pub password: String,
}

impl fmt::Debug for LoginRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoginRequest")
            .field("email", &self.email)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Successful login payload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginResponse {
    /// Signed bearer token
    pub token: String,

    /// When the token stops being accepted
    pub expires_at: DateTime<Utc>,

    pub user: User,
}
