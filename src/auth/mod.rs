//! Authentication system for dvarapala
//!
//! This module provides authentication and authorization functionality:
//! - Password hashing and verification (Argon2id)
//! - Identity token issuance and verification (HS256 JWT)
//! - The authorization gate for protected routes
//! - The email/password login flow

pub mod authenticator;
pub mod gate;
pub mod password;
pub mod token;

pub use authenticator::{AuthOutcome, Authenticator};
pub use gate::{authorize, bearer_credentials, VerifiedIdentity};
pub use password::{PasswordHasher, DEFAULT_WORK_FACTOR};
pub use token::{Claims, IssuedToken, TokenManager, DEFAULT_TOKEN_TTL};
