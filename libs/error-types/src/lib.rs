//! Shared error body for every HTTP surface of the chat core.
//!
//! Handlers never build JSON errors by hand; they map their domain error to
//! an [`ErrorResponse`] using the constants in [`error_codes`] and
//! [`error_types`], so clients can route on `error_type` and localize on
//! `code`.

use serde::{Deserialize, Serialize};

/// Uniform API error body
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Short reason phrase ("Not Found", "Unsupported Media Type", ...)
    pub error: String,

    /// Human readable description
    pub message: String,

    /// HTTP status code
    pub status: u16,

    /// Coarse category, one of [`error_types`]
    pub error_type: String,

    /// Stable machine code, one of [`error_codes`]
    pub code: String,

    /// Extra context (validation detail, offending field)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,

    /// RFC 3339 timestamp
    pub timestamp: String,
}

impl ErrorResponse {
    pub fn new(error: &str, message: &str, status: u16, error_type: &str, code: &str) -> Self {
        Self {
            error: error.to_string(),
            message: message.to_string(),
            status,
            error_type: error_type.to_string(),
            code: code.to_string(),
            details: None,
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }

    pub fn with_details(mut self, details: String) -> Self {
        self.details = Some(details);
        self
    }
}

/// Stable error codes
pub mod error_codes {
    // Identity
    pub const UNAUTHORIZED: &str = "UNAUTHORIZED";
    pub const TOKEN_INVALID: &str = "TOKEN_INVALID";
    pub const TOKEN_MISSING: &str = "TOKEN_MISSING";
    pub const USER_NOT_FOUND: &str = "USER_NOT_FOUND";

    // Conversations
    pub const CONVERSATION_NOT_FOUND: &str = "CONVERSATION_NOT_FOUND";
    pub const NOT_CONVERSATION_MEMBER: &str = "NOT_CONVERSATION_MEMBER";
    pub const INVALID_MEMBERSHIP: &str = "INVALID_MEMBERSHIP";

    // Messages
    pub const MESSAGE_NOT_FOUND: &str = "MESSAGE_NOT_FOUND";
    pub const INVALID_ID: &str = "INVALID_ID";
    pub const INVALID_REQUEST: &str = "INVALID_REQUEST";

    // Attachments
    pub const UNSUPPORTED_MEDIA: &str = "UNSUPPORTED_MEDIA";

    // Storage/System
    pub const STORAGE_FAILURE: &str = "STORAGE_FAILURE";
    pub const TIMEOUT: &str = "TIMEOUT";
    pub const INTERNAL_SERVER_ERROR: &str = "INTERNAL_SERVER_ERROR";
    pub const SERVICE_UNAVAILABLE: &str = "SERVICE_UNAVAILABLE";
}

/// Error categories
pub mod error_types {
    pub const VALIDATION_ERROR: &str = "validation_error";
    pub const AUTHENTICATION_ERROR: &str = "authentication_error";
    pub const AUTHORIZATION_ERROR: &str = "authorization_error";
    pub const NOT_FOUND_ERROR: &str = "not_found_error";
    pub const MEDIA_ERROR: &str = "media_error";
    pub const SERVER_ERROR: &str = "server_error";
    pub const SERVICE_UNAVAILABLE_ERROR: &str = "service_unavailable_error";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_response_creation() {
        let error = ErrorResponse::new(
            "Not Found",
            "conversation not found",
            404,
            error_types::NOT_FOUND_ERROR,
            error_codes::CONVERSATION_NOT_FOUND,
        );

        assert_eq!(error.status, 404);
        assert_eq!(error.error_type, error_types::NOT_FOUND_ERROR);
        assert_eq!(error.code, error_codes::CONVERSATION_NOT_FOUND);
    }

    #[test]
    fn test_optional_fields_are_omitted() {
        let error = ErrorResponse::new(
            "Unsupported Media Type",
            "file exceeds 2097152 bytes",
            415,
            error_types::MEDIA_ERROR,
            error_codes::UNSUPPORTED_MEDIA,
        );

        let json = serde_json::to_value(&error).unwrap();
        assert!(json.get("details").is_none());

        let detailed = error.with_details("allowed: jpg, png".to_string());
        let json = serde_json::to_value(&detailed).unwrap();
        assert_eq!(json["details"], "allowed: jpg, png");
    }
}
