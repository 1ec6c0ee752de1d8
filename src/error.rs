use crate::middleware::error_handling;
use actix_web::{HttpResponse, ResponseError};
use error_types::error_codes;
use std::fmt;
use thiserror::Error;

impl ResponseError for AppError {
    fn error_response(&self) -> HttpResponse {
        error_handling::into_response(self.clone())
    }
}

pub type AppResult<T> = Result<T, AppError>;

/// Record kinds that can be missing on lookup
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resource {
    User,
    Conversation,
    Message,
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Resource::User => write!(f, "user"),
            Resource::Conversation => write!(f, "conversation"),
            Resource::Message => write!(f, "message"),
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum AppError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("server start failure: {0}")]
    StartServer(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("invalid id: {0}")]
    InvalidId(String),

    #[error("invalid membership: {0}")]
    InvalidMembership(String),

    #[error("unauthorized")]
    Unauthorized,

    #[error("forbidden")]
    Forbidden,

    #[error("{0} not found")]
    NotFound(Resource),

    #[error("unsupported media: {0}")]
    UnsupportedMedia(String),

    #[error("storage failure: {0}")]
    StorageFailure(String),

    /// Receiver has blocked the sender. Swallowed by the dispatcher.
    #[error("blocked")]
    Blocked,

    #[error("timed out: {0}")]
    Timeout(String),

    #[error("internal server error")]
    Internal,
}

impl From<sqlx::Error> for AppError {
    fn from(e: sqlx::Error) -> Self {
        AppError::StorageFailure(e.to_string())
    }
}

impl From<sqlx::migrate::MigrateError> for AppError {
    fn from(e: sqlx::migrate::MigrateError) -> Self {
        AppError::StorageFailure(format!("migration: {e}"))
    }
}

impl From<std::io::Error> for AppError {
    fn from(e: std::io::Error) -> Self {
        AppError::StorageFailure(e.to_string())
    }
}

impl AppError {
    /// Returns whether the failed operation may succeed if retried
    pub fn is_retryable(&self) -> bool {
        match self {
            AppError::StorageFailure(msg) => {
                msg.contains("PoolTimedOut") || msg.contains("PoolClosed") || msg.contains("Io")
            }
            AppError::Timeout(_) => true,
            _ => false,
        }
    }

    /// Returns HTTP status code
    pub fn status_code(&self) -> u16 {
        match self {
            AppError::BadRequest(_) | AppError::InvalidId(_) | AppError::InvalidMembership(_) => 400,
            AppError::Unauthorized => 401,
            AppError::Forbidden | AppError::Blocked => 403,
            AppError::NotFound(_) => 404,
            AppError::UnsupportedMedia(_) => 415,
            AppError::StorageFailure(_) => 503,
            AppError::Timeout(_) => 504,
            AppError::Config(_) | AppError::StartServer(_) | AppError::Internal => 500,
        }
    }

    /// Stable machine code, shared by HTTP bodies and live-channel failure events
    pub fn code(&self) -> &'static str {
        match self {
            AppError::BadRequest(_) | AppError::Blocked => error_codes::INVALID_REQUEST,
            AppError::InvalidId(_) => error_codes::INVALID_ID,
            AppError::InvalidMembership(_) => error_codes::INVALID_MEMBERSHIP,
            AppError::Unauthorized => error_codes::UNAUTHORIZED,
            AppError::Forbidden => error_codes::NOT_CONVERSATION_MEMBER,
            AppError::NotFound(Resource::User) => error_codes::USER_NOT_FOUND,
            AppError::NotFound(Resource::Conversation) => error_codes::CONVERSATION_NOT_FOUND,
            AppError::NotFound(Resource::Message) => error_codes::MESSAGE_NOT_FOUND,
            AppError::UnsupportedMedia(_) => error_codes::UNSUPPORTED_MEDIA,
            AppError::StorageFailure(_) => error_codes::STORAGE_FAILURE,
            AppError::Timeout(_) => error_codes::TIMEOUT,
            AppError::Config(_) | AppError::StartServer(_) | AppError::Internal => {
                error_codes::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Short label used as the `reason` metric dimension
    pub fn kind(&self) -> &'static str {
        match self {
            AppError::Config(_) => "config",
            AppError::StartServer(_) => "start_server",
            AppError::BadRequest(_) => "bad_request",
            AppError::InvalidId(_) => "invalid_id",
            AppError::InvalidMembership(_) => "invalid_membership",
            AppError::Unauthorized => "unauthorized",
            AppError::Forbidden => "forbidden",
            AppError::NotFound(_) => "not_found",
            AppError::UnsupportedMedia(_) => "unsupported_media",
            AppError::StorageFailure(_) => "storage_failure",
            AppError::Blocked => "blocked",
            AppError::Timeout(_) => "timeout",
            AppError::Internal => "internal",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(AppError::InvalidId("x".into()).status_code(), 400);
        assert_eq!(AppError::Unauthorized.status_code(), 401);
        assert_eq!(AppError::NotFound(Resource::Message).status_code(), 404);
        assert_eq!(AppError::UnsupportedMedia("too big".into()).status_code(), 415);
        assert_eq!(AppError::StorageFailure("down".into()).status_code(), 503);
        assert_eq!(AppError::Timeout("append".into()).status_code(), 504);
    }

    #[test]
    fn test_not_found_code_names_the_resource() {
        assert_eq!(
            AppError::NotFound(Resource::Conversation).code(),
            error_codes::CONVERSATION_NOT_FOUND
        );
        assert_eq!(
            AppError::NotFound(Resource::Conversation).to_string(),
            "conversation not found"
        );
    }

    #[test]
    fn test_retryable() {
        assert!(AppError::Timeout("file write".into()).is_retryable());
        assert!(AppError::StorageFailure("PoolTimedOut".into()).is_retryable());
        assert!(!AppError::Unauthorized.is_retryable());
    }
}
