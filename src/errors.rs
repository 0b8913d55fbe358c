// src/errors.rs
use actix_web::{HttpResponse, ResponseError, http::StatusCode};
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum LumenError {
    /// Transport-level rate limiting. Absorbed by the retrying invoker.
    #[error("Rate limited by generation service")]
    RateLimited { retry_after: Option<Duration> },

    #[error("The generation service is busy right now, please try again in a moment")]
    ServiceBusy,

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Credentials must be re-established before generating")]
    CredentialsRequired,

    #[error("Generation failed: {0}")]
    GenerationFailure(String),

    #[error("Edit failed: {0}")]
    EditFailure(String),

    #[error("Another operation is already running for this session")]
    Busy,

    #[error("No image is focused")]
    NoFocusedImage,

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("LLM service error: {0}")]
    LLM(String),

    #[error("Redis error: {0}")]
    Redis(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Image processing error: {0}")]
    ImageProcessing(String),

    #[error("Refinement error: {0}")]
    Refinement(String),
}

impl LumenError {
    pub fn kind(&self) -> &'static str {
        match self {
            LumenError::RateLimited { .. } => "rate_limited",
            LumenError::ServiceBusy => "service_busy",
            LumenError::PermissionDenied(_) => "permission_denied",
            LumenError::CredentialsRequired => "credentials_required",
            LumenError::GenerationFailure(_) => "generation_failure",
            LumenError::EditFailure(_) => "edit_failure",
            LumenError::Busy => "busy",
            LumenError::NoFocusedImage => "no_focused_image",
            LumenError::InvalidState(_) => "invalid_state",
            LumenError::NotFound(_) => "not_found",
            LumenError::Validation(_) => "validation",
            LumenError::LLM(_) => "llm",
            LumenError::Redis(_) => "redis",
            LumenError::Serialization(_) => "serialization",
            LumenError::ImageProcessing(_) => "image_processing",
            LumenError::Refinement(_) => "refinement",
        }
    }
}

impl From<serde_json::Error> for LumenError {
    fn from(e: serde_json::Error) -> Self {
        LumenError::Serialization(e.to_string())
    }
}

impl From<redis::RedisError> for LumenError {
    fn from(e: redis::RedisError) -> Self {
        LumenError::Redis(e.to_string())
    }
}

impl ResponseError for LumenError {
    fn status_code(&self) -> StatusCode {
        match self {
            LumenError::RateLimited { .. } | LumenError::ServiceBusy => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            LumenError::PermissionDenied(_) => StatusCode::FORBIDDEN,
            LumenError::CredentialsRequired => StatusCode::UNAUTHORIZED,
            LumenError::Busy | LumenError::InvalidState(_) => StatusCode::CONFLICT,
            LumenError::NotFound(_) => StatusCode::NOT_FOUND,
            LumenError::Validation(_)
            | LumenError::NoFocusedImage
            | LumenError::ImageProcessing(_) => StatusCode::BAD_REQUEST,
            LumenError::LLM(_) => StatusCode::BAD_GATEWAY,
            LumenError::GenerationFailure(_)
            | LumenError::EditFailure(_)
            | LumenError::Redis(_)
            | LumenError::Serialization(_)
            | LumenError::Refinement(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code()).json(serde_json::json!({
            "error": self.kind(),
            "message": self.to_string()
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn service_busy_message_does_not_leak_cause() {
        let msg = LumenError::ServiceBusy.to_string();
        assert!(!msg.contains("429"));
        assert!(msg.contains("busy"));
    }

    #[test]
    fn status_codes_follow_error_class() {
        assert_eq!(
            LumenError::PermissionDenied("key".into()).status_code(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(LumenError::Busy.status_code(), StatusCode::CONFLICT);
        assert_eq!(
            LumenError::ServiceBusy.status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }
}
