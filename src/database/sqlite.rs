//! SQLite implementation of the storage traits
//!
//! This module provides a SQLite-based implementation of [`Database`] and
//! [`CredentialStore`] using rusqlite and tokio-rusqlite for async operations.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{ErrorCode, OptionalExtension, Row};
use tokio_rusqlite::Connection;

use super::migrations::CREATE_SCHEMA;
use super::{CredentialStore, Database};
use crate::error::DbError;
use crate::models::{
    App, AppChanges, CredentialRecord, NewApp, NewUser, Status, User, UserChanges,
};

const USER_COLUMNS: &str = r#"
    u.id, u.app_id, a.name, u.firstname, u.lastname, u.email, u.status,
    u.created_at, u.updated_at
    FROM users u
    JOIN apps a ON a.id = u.app_id
"#;

const APP_COLUMNS: &str = "id, name, status, created_at, updated_at FROM apps";

/// SQLite database implementation
pub struct SqliteDatabase {
    conn: Connection,
}

impl SqliteDatabase {
    /// Create a new SQLite database connection
    ///
    /// Use `:memory:` for in-memory database or a file path for persistent storage.
    pub async fn new(path: &str) -> Result<Self, DbError> {
        let conn = Connection::open(path).await?;

        // Run migrations
        conn.call(|conn| {
            conn.execute_batch(CREATE_SCHEMA)?;
            Ok::<_, rusqlite::Error>(())
        })
        .await?;

        Ok(Self { conn })
    }

    /// Create a new in-memory database (useful for testing)
    pub async fn in_memory() -> Result<Self, DbError> {
        Self::new(":memory:").await
    }
}

#[async_trait]
impl Database for SqliteDatabase {
    // =========================================================================
    // App operations
    // =========================================================================

    async fn insert_app(&self, app: &NewApp) -> Result<App, DbError> {
        let name = app.name.clone();
        let status = app.status.as_i64();
        let now = Utc::now().to_rfc3339();

        let inserted = self
            .conn
            .call(move |conn| {
                conn.execute(
                    r#"
                    INSERT INTO apps (name, status, created_at, updated_at)
                    VALUES (?1, ?2, ?3, ?3)
                    "#,
                    rusqlite::params![name, status, now],
                )?;
                select_app(conn, conn.last_insert_rowid())
            })
            .await
            .map_err(map_sqlite_error)?;

        inserted.ok_or(DbError::NotFound)
    }

    async fn get_app(&self, id: i64) -> Result<Option<App>, DbError> {
        self.conn
            .call(move |conn| select_app(conn, id))
            .await
            .map_err(Into::into)
    }

    async fn list_apps(&self) -> Result<Vec<App>, DbError> {
        self.conn
            .call(|conn| {
                let mut stmt = conn.prepare(&format!("SELECT {} ORDER BY id", APP_COLUMNS))?;
                let apps = stmt
                    .query_map([], app_from_row)?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok::<_, rusqlite::Error>(apps)
            })
            .await
            .map_err(Into::into)
    }

    async fn update_app(&self, id: i64, changes: &AppChanges) -> Result<App, DbError> {
        let name = changes.name.clone();
        let status = changes.status.map(Status::as_i64);
        let now = Utc::now().to_rfc3339();

        let updated = self
            .conn
            .call(move |conn| {
                let count = conn.execute(
                    r#"
                    UPDATE apps
                    SET name = COALESCE(?1, name),
                        status = COALESCE(?2, status),
                        updated_at = ?3
                    WHERE id = ?4
                    "#,
                    rusqlite::params![name, status, now, id],
                )?;
                if count == 0 {
                    return Ok(None);
                }
                select_app(conn, id)
            })
            .await
            .map_err(map_sqlite_error)?;

        updated.ok_or(DbError::NotFound)
    }

    async fn delete_app(&self, id: i64) -> Result<(), DbError> {
        let rows_affected = self
            .conn
            .call(move |conn| {
                let count = conn.execute("DELETE FROM apps WHERE id = ?1", [id])?;
                Ok::<_, rusqlite::Error>(count)
            })
            .await?;

        if rows_affected == 0 {
            return Err(DbError::NotFound);
        }

        Ok(())
    }

    // =========================================================================
    // User operations
    // =========================================================================

    async fn insert_user(&self, user: &NewUser) -> Result<User, DbError> {
        let user = user.clone();
        let now = Utc::now().to_rfc3339();

        let inserted = self
            .conn
            .call(move |conn| {
                conn.execute(
                    r#"
                    INSERT INTO users
                    (app_id, firstname, lastname, email, password_hash, status, created_at, updated_at)
                    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)
                    "#,
                    rusqlite::params![
                        user.app_id,
                        user.firstname,
                        user.lastname,
                        user.email,
                        user.password_hash,
                        user.status.as_i64(),
                        now
                    ],
                )?;
                select_user(conn, conn.last_insert_rowid())
            })
            .await
            .map_err(map_sqlite_error)?;

        inserted.ok_or(DbError::NotFound)
    }

    async fn get_user(&self, id: i64) -> Result<Option<User>, DbError> {
        self.conn
            .call(move |conn| select_user(conn, id))
            .await
            .map_err(Into::into)
    }

    async fn list_users(&self, app_id: Option<i64>) -> Result<Vec<User>, DbError> {
        self.conn
            .call(move |conn| {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {} WHERE ?1 IS NULL OR u.app_id = ?1 ORDER BY u.id",
                    USER_COLUMNS
                ))?;
                let users = stmt
                    .query_map([app_id], user_from_row)?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok::<_, rusqlite::Error>(users)
            })
            .await
            .map_err(Into::into)
    }

    async fn update_user(&self, id: i64, changes: &UserChanges) -> Result<User, DbError> {
        let changes = changes.clone();
        let now = Utc::now().to_rfc3339();

        let updated = self
            .conn
            .call(move |conn| {
                let count = conn.execute(
                    r#"
                    UPDATE users
                    SET app_id = COALESCE(?1, app_id),
                        firstname = COALESCE(?2, firstname),
                        lastname = COALESCE(?3, lastname),
                        email = COALESCE(?4, email),
                        password_hash = COALESCE(?5, password_hash),
                        status = COALESCE(?6, status),
                        updated_at = ?7
                    WHERE id = ?8
                    "#,
                    rusqlite::params![
                        changes.app_id,
                        changes.firstname,
                        changes.lastname,
                        changes.email,
                        changes.password_hash,
                        changes.status.map(Status::as_i64),
                        now,
                        id
                    ],
                )?;
                if count == 0 {
                    return Ok(None);
                }
                select_user(conn, id)
            })
            .await
            .map_err(map_sqlite_error)?;

        updated.ok_or(DbError::NotFound)
    }

    async fn delete_user(&self, id: i64) -> Result<(), DbError> {
        let rows_affected = self
            .conn
            .call(move |conn| {
                let count = conn.execute("DELETE FROM users WHERE id = ?1", [id])?;
                Ok::<_, rusqlite::Error>(count)
            })
            .await?;

        if rows_affected == 0 {
            return Err(DbError::NotFound);
        }

        Ok(())
    }

    async fn set_password_by_email(
        &self,
        email: &str,
        password_hash: &str,
    ) -> Result<(), DbError> {
        let email = email.to_string();
        let password_hash = password_hash.to_string();
        let now = Utc::now().to_rfc3339();

        let rows_affected = self
            .conn
            .call(move |conn| {
                let count = conn.execute(
                    "UPDATE users SET password_hash = ?1, updated_at = ?2 WHERE email = ?3",
                    rusqlite::params![password_hash, now, email],
                )?;
                Ok::<_, rusqlite::Error>(count)
            })
            .await?;

        if rows_affected == 0 {
            return Err(DbError::NotFound);
        }

        Ok(())
    }
}

#[async_trait]
impl CredentialStore for SqliteDatabase {
    async fn find_by_identifier(
        &self,
        identifier: &str,
    ) -> Result<Option<CredentialRecord>, DbError> {
        let identifier = identifier.to_string();

        self.conn
            .call(move |conn| {
                conn.query_row(
                    r#"
                    SELECT id, app_id, email, password_hash, status
                    FROM users
                    WHERE email = ?1
                    "#,
                    [&identifier],
                    credential_from_row,
                )
                .optional()
            })
            .await
            .map_err(Into::into)
    }

    async fn find_by_id(&self, id: i64) -> Result<Option<CredentialRecord>, DbError> {
        self.conn
            .call(move |conn| {
                conn.query_row(
                    "SELECT id, app_id, email, password_hash, status FROM users WHERE id = ?1",
                    [id],
                    credential_from_row,
                )
                .optional()
            })
            .await
            .map_err(Into::into)
    }
}

fn select_app(conn: &rusqlite::Connection, id: i64) -> rusqlite::Result<Option<App>> {
    conn.query_row(
        &format!("SELECT {} WHERE id = ?1", APP_COLUMNS),
        [id],
        app_from_row,
    )
    .optional()
}

fn select_user(conn: &rusqlite::Connection, id: i64) -> rusqlite::Result<Option<User>> {
    conn.query_row(
        &format!("SELECT {} WHERE u.id = ?1", USER_COLUMNS),
        [id],
        user_from_row,
    )
    .optional()
}

fn app_from_row(row: &Row<'_>) -> rusqlite::Result<App> {
    Ok(App {
        id: row.get(0)?,
        name: row.get(1)?,
        status: Status::from_i64(row.get(2)?),
        created_at: parse_datetime(row.get::<_, Option<String>>(3)?).unwrap_or_else(Utc::now),
        updated_at: parse_datetime(row.get::<_, Option<String>>(4)?).unwrap_or_else(Utc::now),
    })
}

fn user_from_row(row: &Row<'_>) -> rusqlite::Result<User> {
    Ok(User {
        id: row.get(0)?,
        app_id: row.get(1)?,
        app_name: row.get(2)?,
        firstname: row.get(3)?,
        lastname: row.get(4)?,
        email: row.get(5)?,
        status: Status::from_i64(row.get(6)?),
        created_at: parse_datetime(row.get::<_, Option<String>>(7)?).unwrap_or_else(Utc::now),
        updated_at: parse_datetime(row.get::<_, Option<String>>(8)?).unwrap_or_else(Utc::now),
    })
}

fn credential_from_row(row: &Row<'_>) -> rusqlite::Result<CredentialRecord> {
    Ok(CredentialRecord {
        id: row.get(0)?,
        app_id: row.get(1)?,
        email: row.get(2)?,
        password_hash: row.get(3)?,
        status: Status::from_i64(row.get(4)?),
    })
}

/// Separate constraint violations from other SQLite failures
fn map_sqlite_error(err: rusqlite::Error) -> DbError {
    match err {
        rusqlite::Error::SqliteFailure(ref e, ref msg) if e.code == ErrorCode::ConstraintViolation => {
            DbError::ConstraintViolation(msg.clone().unwrap_or_else(|| e.to_string()))
        }
        other => DbError::Sqlite(other),
    }
}

/// Parse a datetime string to DateTime<Utc>
fn parse_datetime(s: Option<String>) -> Option<DateTime<Utc>> {
    s.and_then(|s| {
        DateTime::parse_from_rfc3339(&s)
            .ok()
            .map(|dt| dt.with_timezone(&Utc))
            .or_else(|| {
                // Try parsing SQLite's datetime format
                chrono::NaiveDateTime::parse_from_str(&s, "%Y-%m-%d %H:%M:%S")
                    .ok()
                    .map(|dt| dt.and_utc())
            })
    })
}
