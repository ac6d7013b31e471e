//! Domain models for dvarapala
//!
//! This module contains the core domain models used throughout the application.

pub mod app;
pub mod status;
pub mod user;

// Re-export commonly used types
pub use app::{App, AppChanges, CreateAppRequest, NewApp, UpdateAppRequest};
pub use status::Status;
pub use user::{
    CreateUserRequest, CredentialRecord, LoginRequest, LoginResponse, NewUser, UpdateUserRequest,
    User, UserChanges,
};
