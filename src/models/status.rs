//! Record status shared by users and apps

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Lifecycle status of a user or app
///
/// Serialized as `"active"` / `"disabled"`, stored as `1` / `0`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    #[default]
    Active,
    Disabled,
}

impl Status {
    /// Storage representation
    pub fn as_i64(self) -> i64 {
        match self {
            Status::Active => 1,
            Status::Disabled => 0,
        }
    }

    /// Parse the storage representation; anything non-zero is active
    pub fn from_i64(value: i64) -> Self {
        if value == 0 {
            Status::Disabled
        } else {
            Status::Active
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Status::Active => write!(f, "active"),
            Status::Disabled => write!(f, "disabled"),
        }
    }
}

impl FromStr for Status {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "active" => Ok(Status::Active),
            "disabled" => Ok(Status::Disabled),
            _ => Err(format!("Unknown status: {}", s)),
        }
    }
}
