//! Account manager
//!
//! Wraps the database with the account rules: users must reference an
//! existing app, emails and app names are unique, and passwords are only
//! ever stored as Argon2id digests.

use std::sync::Arc;

use crate::auth::PasswordHasher;
use crate::database::Database;
use crate::error::{AccountError, DbError};
use crate::models::{
    App, AppChanges, CreateAppRequest, CreateUserRequest, NewApp, NewUser, UpdateAppRequest,
    UpdateUserRequest, User, UserChanges,
};

/// Minimum password length in characters
pub const MIN_PASSWORD_LENGTH: usize = 8;

/// Application and user management
pub struct AccountManager<D: Database> {
    db: Arc<D>,
    hasher: PasswordHasher,
}

impl<D: Database> AccountManager<D> {
    /// Create a new account manager
    pub fn new(db: Arc<D>, hasher: PasswordHasher) -> Self {
        Self { db, hasher }
    }

    // =========================================================================
    // Apps
    // =========================================================================

    /// Create an app
    pub async fn create_app(&self, req: CreateAppRequest) -> Result<App, AccountError> {
        let app = self
            .db
            .insert_app(&NewApp::from(req))
            .await
            .map_err(|e| map_db_error(e, "App", "app name already exists"))?;

        tracing::info!(app_id = app.id, name = %app.name, "App created");
        Ok(app)
    }

    /// Get an app by ID
    pub async fn get_app(&self, id: i64) -> Result<App, AccountError> {
        self.db
            .get_app(id)
            .await?
            .ok_or(AccountError::NotFound("App"))
    }

    /// List all apps
    pub async fn list_apps(&self) -> Result<Vec<App>, AccountError> {
        Ok(self.db.list_apps().await?)
    }

    /// Apply a partial update to an app
    pub async fn update_app(&self, id: i64, req: UpdateAppRequest) -> Result<App, AccountError> {
        let app = self
            .db
            .update_app(id, &AppChanges::from(req))
            .await
            .map_err(|e| map_db_error(e, "App", "app name already exists"))?;

        tracing::info!(app_id = app.id, "App updated");
        Ok(app)
    }

    /// Delete an app and every user that belongs to it
    pub async fn delete_app(&self, id: i64) -> Result<(), AccountError> {
        self.db
            .delete_app(id)
            .await
            .map_err(|e| map_db_error(e, "App", "app is still referenced"))?;

        tracing::info!(app_id = id, "App deleted");
        Ok(())
    }

    // =========================================================================
    // Users
    // =========================================================================

    /// Create a user, hashing the supplied password
    pub async fn create_user(&self, req: CreateUserRequest) -> Result<User, AccountError> {
        self.ensure_app_exists(req.app_id).await?;

        let password_hash = self.hasher.hash_blocking(req.password).await?;
        let new_user = NewUser {
            app_id: req.app_id,
            firstname: req.firstname,
            lastname: req.lastname,
            email: req.email,
            password_hash,
            status: req.status.unwrap_or_default(),
        };

        let user = self
            .db
            .insert_user(&new_user)
            .await
            .map_err(|e| map_db_error(e, "User", "email already registered"))?;

        tracing::info!(user_id = user.id, app_id = user.app_id, "User created");
        Ok(user)
    }

    /// Get a user by ID
    pub async fn get_user(&self, id: i64) -> Result<User, AccountError> {
        self.db
            .get_user(id)
            .await?
            .ok_or(AccountError::NotFound("User"))
    }

    /// List users, optionally restricted to one app
    pub async fn list_users(&self, app_id: Option<i64>) -> Result<Vec<User>, AccountError> {
        Ok(self.db.list_users(app_id).await?)
    }

    /// Apply a partial update to a user
    ///
    /// A new password is re-hashed; moving the user to another app requires
    /// that app to exist. A request that changes nothing is rejected.
    pub async fn update_user(
        &self,
        id: i64,
        req: UpdateUserRequest,
    ) -> Result<User, AccountError> {
        if let Some(app_id) = req.app_id {
            self.ensure_app_exists(app_id).await?;
        }

        let password_hash = match req.password {
            Some(password) => Some(self.hasher.hash_blocking(password).await?),
            None => None,
        };

        let changes = UserChanges {
            app_id: req.app_id,
            firstname: req.firstname,
            lastname: req.lastname,
            email: req.email,
            password_hash,
            status: req.status,
        };
        if changes.is_empty() {
            return Err(AccountError::Invalid("no fields to update".to_string()));
        }

        let user = self
            .db
            .update_user(id, &changes)
            .await
            .map_err(|e| map_db_error(e, "User", "email already registered"))?;

        tracing::info!(
            user_id = user.id,
            password_changed = changes.password_hash.is_some(),
            "User updated"
        );
        Ok(user)
    }

    /// Delete a user
    pub async fn delete_user(&self, id: i64) -> Result<(), AccountError> {
        self.db
            .delete_user(id)
            .await
            .map_err(|e| map_db_error(e, "User", "user is still referenced"))?;

        tracing::info!(user_id = id, "User deleted");
        Ok(())
    }

    /// Replace the password of the user registered under `email`
    pub async fn set_password(&self, email: &str, password: &str) -> Result<(), AccountError> {
        if password.chars().count() < MIN_PASSWORD_LENGTH {
            return Err(AccountError::Invalid(format!(
                "password must be at least {} characters",
                MIN_PASSWORD_LENGTH
            )));
        }

        let password_hash = self.hasher.hash_blocking(password.to_string()).await?;
        self.db
            .set_password_by_email(email, &password_hash)
            .await
            .map_err(|e| map_db_error(e, "User", "password update rejected"))?;

        tracing::info!(email = %email, "Password replaced");
        Ok(())
    }

    async fn ensure_app_exists(&self, app_id: i64) -> Result<(), AccountError> {
        match self.db.get_app(app_id).await? {
            Some(_) => Ok(()),
            None => Err(AccountError::UnknownApp(app_id)),
        }
    }
}

fn map_db_error(err: DbError, entity: &'static str, conflict: &str) -> AccountError {
    match err {
        DbError::NotFound => AccountError::NotFound(entity),
        DbError::ConstraintViolation(detail) => {
            tracing::debug!(detail = %detail, "Constraint violation");
            AccountError::Conflict(conflict.to_string())
        }
        other => AccountError::Database(other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::MockDatabase;
    use crate::models::Status;
    use chrono::Utc;

    fn create_test_manager(db: MockDatabase) -> AccountManager<MockDatabase> {
        AccountManager::new(Arc::new(db), PasswordHasher::with_cost(1024, 1).unwrap())
    }

    fn app(id: i64) -> App {
        App {
            id,
            name: "web".to_string(),
            status: Status::Active,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn user_from(new_user: &NewUser) -> User {
        User {
            id: 1,
            app_id: new_user.app_id,
            app_name: "web".to_string(),
            firstname: new_user.firstname.clone(),
            lastname: new_user.lastname.clone(),
            email: new_user.email.clone(),
            status: new_user.status,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn create_request() -> CreateUserRequest {
        CreateUserRequest {
            app_id: 1,
            firstname: "Ada".to_string(),
            lastname: "Lovelace".to_string(),
            email: "ada@example.com".to_string(),
            password: "analytical-engine".to_string(),
            status: None,
        }
    }

    // Test 1: create_user hashes the password before storing it
    #[tokio::test]
    async fn test_create_user_hashes_password() {
        let mut db = MockDatabase::new();
        db.expect_get_app().returning(|id| Ok(Some(app(id))));
        db.expect_insert_user()
            .withf(|new_user| {
                new_user.password_hash.starts_with("$argon2id$")
                    && new_user.password_hash != "analytical-engine"
            })
            .returning(|new_user| Ok(user_from(new_user)));

        let manager = create_test_manager(db);
        let user = manager.create_user(create_request()).await.unwrap();

        assert_eq!(user.email, "ada@example.com");
        assert_eq!(user.status, Status::Active);
    }

    // Test 2: unknown app is rejected before hashing or inserting
    #[tokio::test]
    async fn test_create_user_unknown_app() {
        let mut db = MockDatabase::new();
        db.expect_get_app().returning(|_| Ok(None));
        db.expect_insert_user().never();

        let manager = create_test_manager(db);
        let result = manager.create_user(create_request()).await;

        assert!(matches!(result, Err(AccountError::UnknownApp(1))));
    }

    // Test 3: duplicate email is a conflict
    #[tokio::test]
    async fn test_create_user_duplicate_email() {
        let mut db = MockDatabase::new();
        db.expect_get_app().returning(|id| Ok(Some(app(id))));
        db.expect_insert_user().returning(|_| {
            Err(DbError::ConstraintViolation(
                "UNIQUE constraint failed: users.email".to_string(),
            ))
        });

        let manager = create_test_manager(db);
        let result = manager.create_user(create_request()).await;

        match result {
            Err(AccountError::Conflict(msg)) => assert_eq!(msg, "email already registered"),
            other => panic!("Expected conflict, got {:?}", other),
        }
    }

    // Test 4: update re-hashes a new password
    #[tokio::test]
    async fn test_update_user_rehashes_password() {
        let mut db = MockDatabase::new();
        db.expect_update_user()
            .withf(|id, changes| {
                *id == 5
                    && changes
                        .password_hash
                        .as_deref()
                        .map_or(false, |h| h.starts_with("$argon2id$"))
                    && changes.app_id.is_none()
            })
            .returning(|id, _| {
                let mut user = user_from(&NewUser {
                    app_id: 1,
                    firstname: "Ada".to_string(),
                    lastname: "Lovelace".to_string(),
                    email: "ada@example.com".to_string(),
                    password_hash: String::new(),
                    status: Status::Active,
                });
                user.id = id;
                Ok(user)
            });

        let manager = create_test_manager(db);
        let req = UpdateUserRequest {
            password: Some("new-password-123".to_string()),
            ..Default::default()
        };
        let user = manager.update_user(5, req).await.unwrap();
        assert_eq!(user.id, 5);
    }

    // Test 5: update of a missing user
    #[tokio::test]
    async fn test_update_user_not_found() {
        let mut db = MockDatabase::new();
        db.expect_update_user()
            .returning(|_, _| Err(DbError::NotFound));

        let manager = create_test_manager(db);
        let result = manager
            .update_user(
                99,
                UpdateUserRequest {
                    lastname: Some("King".to_string()),
                    ..Default::default()
                },
            )
            .await;

        assert!(matches!(result, Err(AccountError::NotFound("User"))));
    }

    // Test 6: moving a user to a missing app
    #[tokio::test]
    async fn test_update_user_unknown_app() {
        let mut db = MockDatabase::new();
        db.expect_get_app().returning(|_| Ok(None));
        db.expect_update_user().never();

        let manager = create_test_manager(db);
        let result = manager
            .update_user(
                1,
                UpdateUserRequest {
                    app_id: Some(9),
                    ..Default::default()
                },
            )
            .await;

        assert!(matches!(result, Err(AccountError::UnknownApp(9))));
    }

    // Test 7: get and delete map NotFound
    #[tokio::test]
    async fn test_get_and_delete_not_found() {
        let mut db = MockDatabase::new();
        db.expect_get_user().returning(|_| Ok(None));
        db.expect_delete_user().returning(|_| Err(DbError::NotFound));
        db.expect_get_app().returning(|_| Ok(None));
        db.expect_delete_app().returning(|_| Err(DbError::NotFound));

        let manager = create_test_manager(db);
        assert!(matches!(manager.get_user(1).await, Err(AccountError::NotFound("User"))));
        assert!(matches!(manager.delete_user(1).await, Err(AccountError::NotFound("User"))));
        assert!(matches!(manager.get_app(1).await, Err(AccountError::NotFound("App"))));
        assert!(matches!(manager.delete_app(1).await, Err(AccountError::NotFound("App"))));
    }

    // Test 8: duplicate app name
    #[tokio::test]
    async fn test_create_app_conflict() {
        let mut db = MockDatabase::new();
        db.expect_insert_app().returning(|_| {
            Err(DbError::ConstraintViolation(
                "UNIQUE constraint failed: apps.name".to_string(),
            ))
        });

        let manager = create_test_manager(db);
        let result = manager
            .create_app(CreateAppRequest {
                name: "web".to_string(),
                status: None,
            })
            .await;

        assert!(matches!(result, Err(AccountError::Conflict(_))));
    }

    // Test 9: set_password enforces the minimum length
    #[tokio::test]
    async fn test_set_password() {
        let mut db = MockDatabase::new();
        db.expect_set_password_by_email()
            .withf(|email, hash| email == "ada@example.com" && hash.starts_with("$argon2id$"))
            .times(1)
            .returning(|_, _| Ok(()));

        let manager = create_test_manager(db);
        assert!(matches!(
            manager.set_password("ada@example.com", "short").await,
            Err(AccountError::Invalid(_))
        ));
        manager
            .set_password("ada@example.com", "long-enough-password")
            .await
            .unwrap();
    }

    // Test 10: an update that changes nothing never reaches the store
    #[tokio::test]
    async fn test_update_user_without_changes() {
        let mut db = MockDatabase::new();
        db.expect_update_user().never();

        let manager = create_test_manager(db);
        let result = manager.update_user(1, UpdateUserRequest::default()).await;

        match result {
            Err(AccountError::Invalid(msg)) => assert_eq!(msg, "no fields to update"),
            other => panic!("Expected invalid input, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_store_failures_pass_through() {
        let mut db = MockDatabase::new();
        db.expect_list_users()
            .returning(|_| Err(DbError::Migration("disk I/O error".to_string())));

        let manager = create_test_manager(db);
        assert!(matches!(
            manager.list_users(None).await,
            Err(AccountError::Database(_))
        ));
    }
}
