use actix_web::{HttpResponse, ResponseError, http::StatusCode};
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Invalid GPIO pin: {0}")]
    InvalidPin(String),
    #[error("Invalid mode: {0}, mode must be \"input\" or \"output\"")]
    InvalidMode(String),
    #[error("Invalid operation: {0}")]
    InvalidOperation(String),
    #[error("Invalid payload: {0}")]
    InvalidPayload(String),
    #[error("Hardware fault: {0}")]
    HardwareFault(String),
    #[error("Timed out: {0}")]
    Timeout(String),
    #[error("Configuration error: {0}")]
    Config(String),
}

impl AppError {
    /// Request-shape errors are detected before any hardware access.
    pub fn is_request_error(&self) -> bool {
        matches!(
            self,
            AppError::InvalidPin(_)
                | AppError::InvalidMode(_)
                | AppError::InvalidOperation(_)
                | AppError::InvalidPayload(_)
        )
    }
}

impl ResponseError for AppError {
    fn status_code(&self) -> StatusCode {
        match self {
            e if e.is_request_error() => StatusCode::BAD_REQUEST,
            AppError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code()).json(json!({ "error": self.to_string() }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_errors_map_to_bad_request() {
        for err in [
            AppError::InvalidPin("99".into()),
            AppError::InvalidMode("pwm".into()),
            AppError::InvalidOperation("write to input".into()),
            AppError::InvalidPayload("missing gpio".into()),
        ] {
            assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
        }
    }

    #[test]
    fn hardware_fault_maps_to_server_error() {
        let err = AppError::HardwareFault("permission denied".into());
        assert!(!err.is_request_error());
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(err.to_string(), "Hardware fault: permission denied");
    }

    #[test]
    fn timeout_is_distinct_from_hardware_fault() {
        let err = AppError::Timeout("outcome unknown".into());
        assert!(!err.is_request_error());
        assert_eq!(err.status_code(), StatusCode::GATEWAY_TIMEOUT);
    }
}
