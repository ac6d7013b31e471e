//! Application error types for dvarapala
//!
//! This module defines the error types shared across the crate.
//! All error types use `thiserror` for ergonomic error handling.
//!
//! The authentication errors come in two layers. [`HashError`], [`TokenError`]
//! and [`RejectReason`] carry the internal detail used for logs and metrics.
//! [`AuthError`] is what crosses the HTTP boundary: every unauthenticated
//! request looks the same to the caller, as does every failed login.

use thiserror::Error;

/// Password hashing errors
///
/// These are infrastructure failures. A password that simply does not match
/// its digest is not an error.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum HashError {
    /// The hashing engine failed
    #[error("Hash failed: {0}")]
    HashFailed(String),

    /// The stored digest could not be parsed
    #[error("Invalid password digest: {0}")]
    InvalidDigest(String),

    /// Invalid cost parameters
    #[error("Invalid hash parameters: {0}")]
    InvalidParams(String),

    /// The blocking hashing task did not complete
    #[error("Hashing task failed: {0}")]
    TaskFailed(String),
}

/// Token issuance and verification errors
#[derive(Debug, Error, Clone, PartialEq)]
pub enum TokenError {
    /// The token's expiry instant has passed
    #[error("Token expired")]
    Expired,

    /// The signature does not match the signing secret
    #[error("Invalid token signature")]
    InvalidSignature,

    /// The token could not be parsed or its claims are inconsistent
    #[error("Malformed token: {0}")]
    Malformed(String),

    /// The token claims to be issued in the future
    #[error("Token not yet valid")]
    NotYetValid,

    /// Signing the claims failed
    #[error("Token signing failed: {0}")]
    Signing(String),

    /// Token lifetime must be positive
    #[error("Invalid token lifetime")]
    InvalidTtl,

    /// Signing secret is empty
    #[error("Signing secret must not be empty")]
    EmptySecret,
}

impl TokenError {
    /// Short label used in logs and metrics
    pub fn as_label(&self) -> &'static str {
        match self {
            TokenError::Expired => "expired",
            TokenError::InvalidSignature => "invalid_signature",
            TokenError::Malformed(_) => "malformed",
            TokenError::NotYetValid => "not_yet_valid",
            TokenError::Signing(_) => "signing",
            TokenError::InvalidTtl => "invalid_ttl",
            TokenError::EmptySecret => "empty_secret",
        }
    }
}

/// Why the authorization gate turned a request away
#[derive(Debug, Error, Clone, PartialEq)]
pub enum RejectReason {
    /// No authorization header
    #[error("Missing authorization header")]
    MissingHeader,

    /// Header present but not `Bearer <token>`
    #[error("Malformed authorization header")]
    MalformedHeader,

    /// Token failed verification
    #[error("Invalid token: {0}")]
    InvalidToken(TokenError),
}

impl RejectReason {
    /// Short label used in logs and metrics
    pub fn as_label(&self) -> &'static str {
        match self {
            RejectReason::MissingHeader => "missing_header",
            RejectReason::MalformedHeader => "malformed_header",
            RejectReason::InvalidToken(e) => e.as_label(),
        }
    }
}

/// Authentication errors as seen at the system boundary
#[derive(Debug, Error, Clone, PartialEq)]
pub enum AuthError {
    /// Missing, malformed, forged or expired credentials on a protected route
    #[error("Unauthenticated: {0}")]
    Unauthenticated(RejectReason),

    /// Unknown identifier or wrong password at login
    #[error("Invalid credentials")]
    InvalidCredentials,

    /// Store, hashing or signing failure
    #[error("Infrastructure error: {0}")]
    Infrastructure(String),
}

impl From<RejectReason> for AuthError {
    fn from(reason: RejectReason) -> Self {
        AuthError::Unauthenticated(reason)
    }
}

impl From<HashError> for AuthError {
    fn from(err: HashError) -> Self {
        AuthError::Infrastructure(err.to_string())
    }
}

impl From<DbError> for AuthError {
    fn from(err: DbError) -> Self {
        AuthError::Infrastructure(err.to_string())
    }
}

/// Database-related errors
#[derive(Debug, Error)]
pub enum DbError {
    /// SQLite error
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Record not found
    #[error("Record not found")]
    NotFound,

    /// Constraint violation
    #[error("Constraint violation: {0}")]
    ConstraintViolation(String),

    /// Migration error
    #[error("Migration error: {0}")]
    Migration(String),
}

/// Account management errors
#[derive(Debug, Error)]
pub enum AccountError {
    /// The requested user or app does not exist
    #[error("{0} not found")]
    NotFound(&'static str),

    /// A unique field (email, app name) is already taken
    #[error("Conflict: {0}")]
    Conflict(String),

    /// The referenced owning application does not exist
    #[error("Unknown application: {0}")]
    UnknownApp(i64),

    /// Input rejected before reaching the store
    #[error("Invalid input: {0}")]
    Invalid(String),

    /// Database failure
    #[error("Database error: {0}")]
    Database(#[from] DbError),

    /// Password hashing failure
    #[error("Password hashing error: {0}")]
    Hash(#[from] HashError),
}
