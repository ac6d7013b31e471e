//! Response envelope and HTTP error mapping
//!
//! Success bodies look like `{"data": ..., "status": 200}` and errors like
//! `{"error": "...", "status": 404}`.

use axum::{
    http::{header, StatusCode},
    response::{IntoResponse, Json, Response},
};
use serde::{Deserialize, Serialize};

use crate::error::{AccountError, AuthError};

/// Body returned for every unauthenticated request
pub const UNAUTHORIZED_MESSAGE: &str = "unauthorized";

const INVALID_CREDENTIALS_MESSAGE: &str = "invalid credentials";
const INTERNAL_MESSAGE: &str = "internal server error";
const TOO_MANY_REQUESTS_MESSAGE: &str = "too many requests";

/// JSON envelope shared by all endpoints
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    pub status: u16,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn ok(status: StatusCode, data: T) -> Self {
        Self {
            data: Some(data),
            error: None,
            status: status.as_u16(),
        }
    }
}

impl ApiResponse<()> {
    pub fn error(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            data: None,
            error: Some(message.into()),
            status: status.as_u16(),
        }
    }
}

/// Wrap `data` in the envelope with the given status
pub fn json<T: Serialize>(status: StatusCode, data: T) -> Response {
    (status, Json(ApiResponse::ok(status, data))).into_response()
}

/// Errors a handler can return
#[derive(Debug, Clone, PartialEq)]
pub enum ApiError {
    BadRequest(String),
    /// Gate rejection; the reason is never sent to the caller
    Unauthorized,
    InvalidCredentials,
    NotFound(String),
    Conflict(String),
    TooManyRequests,
    Internal,
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized | ApiError::InvalidCredentials => StatusCode::UNAUTHORIZED,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::TooManyRequests => StatusCode::TOO_MANY_REQUESTS,
            ApiError::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn message(&self) -> String {
        match self {
            ApiError::BadRequest(msg) | ApiError::NotFound(msg) | ApiError::Conflict(msg) => {
                msg.clone()
            }
            ApiError::Unauthorized => UNAUTHORIZED_MESSAGE.to_string(),
            ApiError::InvalidCredentials => INVALID_CREDENTIALS_MESSAGE.to_string(),
            ApiError::TooManyRequests => TOO_MANY_REQUESTS_MESSAGE.to_string(),
            ApiError::Internal => INTERNAL_MESSAGE.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = Json(ApiResponse::error(status, self.message()));

        if self == ApiError::Unauthorized {
            (status, [(header::WWW_AUTHENTICATE, "Bearer")], body).into_response()
        } else {
            (status, body).into_response()
        }
    }
}

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::Unauthenticated(_) => ApiError::Unauthorized,
            AuthError::InvalidCredentials => ApiError::InvalidCredentials,
            AuthError::Infrastructure(detail) => {
                tracing::error!(error = %detail, "Authentication infrastructure failure");
                ApiError::Internal
            }
        }
    }
}

impl From<AccountError> for ApiError {
    fn from(err: AccountError) -> Self {
        match err {
            AccountError::NotFound(entity) => ApiError::NotFound(format!("{} not found", entity)),
            AccountError::Conflict(msg) => ApiError::Conflict(msg),
            AccountError::UnknownApp(id) => ApiError::BadRequest(format!("unknown app: {}", id)),
            AccountError::Invalid(msg) => ApiError::BadRequest(msg),
            AccountError::Database(e) => {
                tracing::error!(error = %e, "Account store failure");
                ApiError::Internal
            }
            AccountError::Hash(e) => {
                tracing::error!(error = %e, "Password hashing failure");
                ApiError::Internal
            }
        }
    }
}

impl From<validator::ValidationErrors> for ApiError {
    fn from(errors: validator::ValidationErrors) -> Self {
        let mut messages: Vec<String> = errors
            .field_errors()
            .into_iter()
            .flat_map(|(field, errs)| {
                errs.iter().map(move |e| match &e.message {
                    Some(msg) => msg.to_string(),
                    None => format!("{} is invalid", field),
                })
            })
            .collect();
        messages.sort();
        ApiError::BadRequest(messages.join("; "))
    }
}
