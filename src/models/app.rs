//! Application (tenant) models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use validator::Validate;

use super::status::Status;

/// An owning application; every user belongs to exactly one
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct App {
    pub id: i64,

    /// Unique application name
    pub name: String,

    pub status: Status,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// App ready for insertion
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewApp {
    pub name: String,
    pub status: Status,
}

/// Partial update of a stored app
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AppChanges {
    pub name: Option<String>,
    pub status: Option<Status>,
}

/// Request to create an app
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CreateAppRequest {
    #[validate(length(min = 1, message = "name is required"))]
    pub name: String,

    #[serde(default)]
    pub status: Option<Status>,
}

impl From<CreateAppRequest> for NewApp {
    fn from(req: CreateAppRequest) -> Self {
        Self {
            name: req.name,
            status: req.status.unwrap_or_default(),
        }
    }
}

/// Request to update an app
#[derive(Debug, Clone, Default, Deserialize, Validate)]
pub struct UpdateAppRequest {
    #[validate(length(min = 1, message = "name must not be empty"))]
    pub name: Option<String>,

    pub status: Option<Status>,
}

impl From<UpdateAppRequest> for AppChanges {
    fn from(req: UpdateAppRequest) -> Self {
        Self {
            name: req.name,
            status: req.status,
        }
    }
}
