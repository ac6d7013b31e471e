//! Account management
//!
//! CRUD for applications (tenants) and their users. Passwords are hashed
//! here before they reach the store.

pub mod manager;

pub use manager::{AccountManager, MIN_PASSWORD_LENGTH};
