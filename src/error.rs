//! # Error Handling
//!
//! Two error families live here:
//!
//! - **AppError**: errors raised by the plain HTTP endpoints (health, metrics, config)
//!   and turned into JSON responses through actix's `ResponseError` trait.
//! - **ProviderError**: failures of the three external collaborators (speech-to-text,
//!   reply generation, speech synthesis). These are never turned into a user-visible
//!   message: a failing provider ends the interview connection.
//!
//! ## Key Rust Concepts for Error Handling:
//! - **Enums for error types**: each variant is one failure category carrying a message
//! - **Display trait**: defines how the error is printed in logs
//! - **From trait**: lets `?` convert library errors into ours automatically
//! - **ResponseError trait**: converts an error into an HTTP response

use actix_web::{HttpResponse, ResponseError};  // Web framework error handling
use serde_json::json;                          // For creating JSON error responses
use std::fmt;                                  // For implementing Display trait

/// Errors returned by HTTP handlers.
///
/// ## Error Categories:
/// - **Internal**: Server-side problems (500 errors)
/// - **ConfigError**: Configuration problems (500 errors)
/// - **CapacityExceeded**: Too many interviews running at once (503 errors)
///
/// ## Usage Example:
/// ```rust,ignore
/// return Err(AppError::CapacityExceeded("10 interviews already running".to_string()));
/// ```
#[derive(Debug)]
pub enum AppError {
    /// Internal server errors
    Internal(String),

    /// Configuration file or environment variable problems
    ConfigError(String),

    /// The server refuses new interviews until a running one finishes
    CapacityExceeded(String),
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::Internal(msg) => write!(f, "Internal error: {}", msg),
            AppError::ConfigError(msg) => write!(f, "Configuration error: {}", msg),
            AppError::CapacityExceeded(msg) => write!(f, "Capacity exceeded: {}", msg),
        }
    }
}

/// Converts errors into JSON HTTP responses.
///
/// ## JSON Response Format:
/// ```json
/// {
///   "error": {
///     "type": "capacity_exceeded",
///     "message": "Maximum concurrent interviews (10) reached",
///     "timestamp": "2025-01-01T12:00:00Z"
///   }
/// }
/// ```
impl ResponseError for AppError {
    fn status_code(&self) -> actix_web::http::StatusCode {
        match self {
            AppError::Internal(_) | AppError::ConfigError(_) => {
                actix_web::http::StatusCode::INTERNAL_SERVER_ERROR  // 500
            }
            AppError::CapacityExceeded(_) => actix_web::http::StatusCode::SERVICE_UNAVAILABLE,  // 503
        }
    }

    fn error_response(&self) -> HttpResponse {
        let (error_type, message) = match self {
            AppError::Internal(msg) => ("internal_error", msg),
            AppError::ConfigError(msg) => ("config_error", msg),
            AppError::CapacityExceeded(msg) => ("capacity_exceeded", msg),
        };

        HttpResponse::build(self.status_code()).json(json!({
            "error": {
                "type": error_type,           // Machine-readable error type
                "message": message,           // Human-readable error message
                "timestamp": chrono::Utc::now().to_rfc3339()  // When the error occurred
            }
        }))
    }
}

/// Automatic conversion from anyhow::Error to AppError.
///
/// When you use `?` with an anyhow::Error inside a handler, it becomes an
/// AppError::Internal.
impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Internal(err.to_string())
    }
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::ConfigError(err.to_string())
    }
}

/// Type alias for Results that use the HTTP error type.
pub type AppResult<T> = Result<T, AppError>;

/// Failure of one of the external speech or language services.
///
/// ## Policy:
/// None of these are retried. The turn pipeline stops at the first failing stage
/// and the connection is closed; whatever was already streamed to the client stays
/// delivered.
#[derive(Debug, Clone, PartialEq)]
pub enum ProviderError {
    /// Speech-to-text failed (undecodable audio, model error, worker panic)
    Transcription(String),

    /// The chat model call failed (network, non-2xx, malformed or empty body)
    Generation(String),

    /// Text-to-speech failed before or while streaming audio
    Synthesis(String),

    /// A required API credential is missing at startup
    Credentials(String),
}

impl ProviderError {
    /// Short stage name used in logs and close reasons.
    pub fn stage(&self) -> &'static str {
        match self {
            ProviderError::Transcription(_) => "transcription",
            ProviderError::Generation(_) => "generation",
            ProviderError::Synthesis(_) => "synthesis",
            ProviderError::Credentials(_) => "credentials",
        }
    }
}

impl fmt::Display for ProviderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProviderError::Transcription(msg) => write!(f, "Transcription failed: {}", msg),
            ProviderError::Generation(msg) => write!(f, "Reply generation failed: {}", msg),
            ProviderError::Synthesis(msg) => write!(f, "Speech synthesis failed: {}", msg),
            ProviderError::Credentials(msg) => write!(f, "Missing credentials: {}", msg),
        }
    }
}

impl std::error::Error for ProviderError {}

/// Type alias for adapter results.
pub type ProviderResult<T> = Result<T, ProviderError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[actix_web::test]
    async fn test_capacity_error_maps_to_503() {
        let err = AppError::CapacityExceeded("full".to_string());
        assert_eq!(err.status_code(), actix_web::http::StatusCode::SERVICE_UNAVAILABLE);

        let body = actix_web::body::to_bytes(err.error_response().into_body()).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["error"]["type"], "capacity_exceeded");
        assert_eq!(json["error"]["message"], "full");
    }

    #[test]
    fn test_provider_error_display_names_the_stage() {
        let err = ProviderError::Generation("HTTP 529".to_string());
        assert_eq!(err.stage(), "generation");
        assert_eq!(err.to_string(), "Reply generation failed: HTTP 529");
    }
}
