use crate::error::AppError;
use actix_web::{http::StatusCode, HttpResponse};
use error_types::{error_types as kinds, ErrorResponse};

/// Map a domain error to its HTTP status and JSON body
pub fn map_error(err: &AppError) -> (StatusCode, ErrorResponse) {
    let status =
        StatusCode::from_u16(err.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let error_type = match err {
        AppError::BadRequest(_) | AppError::InvalidId(_) | AppError::InvalidMembership(_) => {
            kinds::VALIDATION_ERROR
        }
        AppError::Unauthorized => kinds::AUTHENTICATION_ERROR,
        AppError::Forbidden | AppError::Blocked => kinds::AUTHORIZATION_ERROR,
        AppError::NotFound(_) => kinds::NOT_FOUND_ERROR,
        AppError::UnsupportedMedia(_) => kinds::MEDIA_ERROR,
        AppError::StorageFailure(_) | AppError::Timeout(_) => kinds::SERVICE_UNAVAILABLE_ERROR,
        AppError::Config(_) | AppError::StartServer(_) | AppError::Internal => kinds::SERVER_ERROR,
    };

    // Storage internals stay in the logs
    let message = match err {
        AppError::StorageFailure(detail) => {
            tracing::error!(error = %detail, "storage failure surfaced to client");
            "storage temporarily unavailable".to_string()
        }
        other => other.to_string(),
    };

    let response = ErrorResponse::new(
        status.canonical_reason().unwrap_or("Error"),
        &message,
        status.as_u16(),
        error_type,
        err.code(),
    );

    let response = match err {
        AppError::UnsupportedMedia(_) => {
            response.with_details("see UPLOAD_ALLOWED_EXTENSIONS / UPLOAD_MAX_BYTES".to_string())
        }
        _ => response,
    };

    (status, response)
}

pub fn into_response(err: AppError) -> HttpResponse {
    let (status, body) = map_error(&err);
    HttpResponse::build(status).json(body)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Resource;
    use error_types::error_codes;

    #[test]
    fn test_map_not_found() {
        let (status, body) = map_error(&AppError::NotFound(Resource::Message));
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body.code, error_codes::MESSAGE_NOT_FOUND);
        assert_eq!(body.error, "Not Found");
    }

    #[test]
    fn test_storage_detail_is_hidden() {
        let (status, body) = map_error(&AppError::StorageFailure("relation missing".into()));
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert!(!body.message.contains("relation"));
    }

    #[test]
    fn test_unsupported_media_carries_details() {
        let (status, body) = map_error(&AppError::UnsupportedMedia("exe".into()));
        assert_eq!(status, StatusCode::UNSUPPORTED_MEDIA_TYPE);
        assert!(body.details.is_some());
    }
}
