//! Authorization gate for protected routes
//!
//! Every request to a protected route passes through [`authorize`]:
//!
//! 1. No `Authorization` header: rejected with `MissingHeader`
//! 2. Header not exactly `<scheme> <credentials>` with a case-insensitive
//!    `bearer` scheme and non-empty credentials: `MalformedHeader`
//! 3. Credentials that fail token verification: `InvalidToken`
//! 4. Otherwise the request proceeds with a [`VerifiedIdentity`]
//!
//! All three rejections look identical to the caller; the reason is only
//! surfaced to logs and metrics.

use axum::http::HeaderValue;
use chrono::{DateTime, Utc};
use serde::Serialize;

use super::token::{Claims, TokenManager};
use crate::error::{RejectReason, TokenError};

const BEARER_SCHEME: &str = "bearer";

/// Identity established from a verified token
///
/// Handlers behind the gate receive this as a request extension.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VerifiedIdentity {
    /// Token subject (user ID)
    pub subject: String,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl VerifiedIdentity {
    /// Subject as a user ID
    pub fn user_id(&self) -> Option<i64> {
        self.subject.parse().ok()
    }
}

impl TryFrom<Claims> for VerifiedIdentity {
    type Error = TokenError;

    fn try_from(claims: Claims) -> Result<Self, Self::Error> {
        let out_of_range = || TokenError::Malformed("timestamp out of range".to_string());
        let issued_at = claims.issued_at().ok_or_else(out_of_range)?;
        let expires_at = claims.expires_at().ok_or_else(out_of_range)?;

        Ok(Self {
            subject: claims.sub,
            issued_at,
            expires_at,
        })
    }
}

/// Extract the bearer credentials from an `Authorization` header value
pub fn bearer_credentials(header: Option<&HeaderValue>) -> Result<&str, RejectReason> {
    let value = header.ok_or(RejectReason::MissingHeader)?;
    let value = value.to_str().map_err(|_| RejectReason::MalformedHeader)?;

    let mut parts = value.split(' ');
    match (parts.next(), parts.next(), parts.next()) {
        (Some(scheme), Some(credentials), None)
            if scheme.eq_ignore_ascii_case(BEARER_SCHEME) && !credentials.is_empty() =>
        {
            Ok(credentials)
        }
        _ => Err(RejectReason::MalformedHeader),
    }
}

/// Decide whether a request carrying `header` may proceed
pub fn authorize(
    header: Option<&HeaderValue>,
    tokens: &TokenManager,
) -> Result<VerifiedIdentity, RejectReason> {
    authorize_at(header, tokens, Utc::now())
}

/// [`authorize`] at an explicit instant
pub fn authorize_at(
    header: Option<&HeaderValue>,
    tokens: &TokenManager,
    now: DateTime<Utc>,
) -> Result<VerifiedIdentity, RejectReason> {
    let credentials = bearer_credentials(header)?;

    tokens
        .verify_at(credentials, now)
        .and_then(VerifiedIdentity::try_from)
        .map_err(RejectReason::InvalidToken)
}
