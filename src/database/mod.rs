//! Database layer for dvarapala
//!
//! This module defines the storage traits and their SQLite implementation.

pub mod migrations;
pub mod sqlite;

pub use sqlite::SqliteDatabase;

use async_trait::async_trait;

use crate::error::DbError;
use crate::models::{App, AppChanges, CredentialRecord, NewApp, NewUser, User, UserChanges};

/// Database trait for data persistence
///
/// This trait defines the account management operations. It uses
/// `async_trait` for async methods and `mockall::automock` for testing.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Database: Send + Sync {
    // =========================================================================
    // App operations
    // =========================================================================

    /// Insert an app and return the stored record
    async fn insert_app(&self, app: &NewApp) -> Result<App, DbError>;

    /// Get an app by ID
    async fn get_app(&self, id: i64) -> Result<Option<App>, DbError>;

    /// List all apps ordered by ID
    async fn list_apps(&self) -> Result<Vec<App>, DbError>;

    /// Apply a partial update to an app
    ///
    /// Returns `DbError::NotFound` if the app does not exist
    async fn update_app(&self, id: i64, changes: &AppChanges) -> Result<App, DbError>;

    /// Delete an app together with all of its users
    async fn delete_app(&self, id: i64) -> Result<(), DbError>;

    // =========================================================================
    // User operations
    // =========================================================================

    /// Insert a user and return the stored record
    async fn insert_user(&self, user: &NewUser) -> Result<User, DbError>;

    /// Get a user by ID
    async fn get_user(&self, id: i64) -> Result<Option<User>, DbError>;

    /// List users, optionally restricted to one app
    async fn list_users(&self, app_id: Option<i64>) -> Result<Vec<User>, DbError>;

    /// Apply a partial update to a user
    ///
    /// Returns `DbError::NotFound` if the user does not exist
    async fn update_user(&self, id: i64, changes: &UserChanges) -> Result<User, DbError>;

    /// Delete a user
    async fn delete_user(&self, id: i64) -> Result<(), DbError>;

    /// Replace the password digest of the user with the given email
    async fn set_password_by_email(&self, email: &str, password_hash: &str)
        -> Result<(), DbError>;
}

/// Read-only view of stored credentials used by the authentication flow
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Look up a user by login identifier (email, case-insensitive)
    async fn find_by_identifier(&self, identifier: &str)
        -> Result<Option<CredentialRecord>, DbError>;

    /// Look up a user by ID
    async fn find_by_id(&self, id: i64) -> Result<Option<CredentialRecord>, DbError>;
}
