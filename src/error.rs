// Error handling for the HTTP front end
//
// Handler errors and their mapping to HTTP responses. Queue and provider errors are
// converted here so handlers can use `?` throughout.

use std::io;
use thiserror::Error;

use actix_web::{http::StatusCode, HttpResponse, ResponseError};

use crate::models::ErrorResponse;
use crate::providers::ProviderError;
use crate::queue_manager::QueueError;

/// Errors that can occur in the HTTP handlers
#[derive(Error, Debug)]
pub enum HandlerError {
    /// Error when processing multipart form data
    #[error("Form error: {0}")]
    FormError(String),

    /// Error when saving file data
    #[error("File error: {0}")]
    FileError(#[from] io::Error),

    /// Error when no audio file was provided
    #[error("No audio file provided in the request")]
    NoAudioFile,

    /// Upload larger than the configured limit
    #[error("File too large: exceeds limit of {limit} bytes")]
    FileTooLarge { limit: u64 },

    /// Audio longer than the admission ceiling
    #[error("Audio duration {duration:.0}s exceeds the {max:.0}s limit")]
    AudioTooLong { duration: f64, max: f64 },

    /// Queue at capacity
    #[error("The transcription queue is full ({0} requests waiting). Please try again in a few minutes.")]
    QueueFull(usize),

    /// The uploaded file could not be decoded or probed
    #[error("{0}")]
    InvalidAudio(String),

    /// Error when job is not found
    #[error("Job not found: {0}")]
    JobNotFound(String),

    /// Error when job cannot be canceled
    #[error("Cannot cancel job: {0}")]
    CannotCancelJob(String),

    /// Result requested before the job finished
    #[error("Job not completed yet: {0}")]
    NotCompleted(String),

    /// Job finished with an error; carries the user-facing message
    #[error("{0}")]
    JobFailed(String),

    /// Error when a synchronous job times out
    #[error("Synchronous processing timeout after {0} seconds")]
    SyncTimeout(u64),

    /// The queue no longer accepts requests
    #[error("Service is shutting down")]
    ShuttingDown,

    #[error("Metrics export failed: {0}")]
    Metrics(String),
}

impl HandlerError {
    /// Create a new FormError
    pub fn form_error<S: Into<String>>(msg: S) -> Self {
        Self::FormError(msg.into())
    }
}

impl ResponseError for HandlerError {
    fn status_code(&self) -> StatusCode {
        match self {
            HandlerError::NoAudioFile | HandlerError::FormError(_) | HandlerError::InvalidAudio(_) => {
                StatusCode::BAD_REQUEST
            }
            HandlerError::FileTooLarge { .. } | HandlerError::AudioTooLong { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            HandlerError::QueueFull(_) | HandlerError::ShuttingDown => StatusCode::SERVICE_UNAVAILABLE,
            HandlerError::JobNotFound(_) => StatusCode::NOT_FOUND,
            HandlerError::CannotCancelJob(_) | HandlerError::NotCompleted(_) => StatusCode::CONFLICT,
            HandlerError::JobFailed(_) => StatusCode::UNPROCESSABLE_ENTITY,
            HandlerError::SyncTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
            HandlerError::FileError(_) | HandlerError::Metrics(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let status = match self {
            HandlerError::NotCompleted(_) => Some("processing".to_string()),
            HandlerError::JobFailed(_) => Some("failed".to_string()),
            _ => None,
        };
        HttpResponse::build(self.status_code()).json(ErrorResponse {
            error: self.to_string(),
            status,
        })
    }
}

/// Convert QueueError to HandlerError
impl From<QueueError> for HandlerError {
    fn from(err: QueueError) -> Self {
        match err {
            QueueError::QueueFull { max } => HandlerError::QueueFull(max),
            QueueError::DurationExceeded { duration, max } => HandlerError::AudioTooLong { duration, max },
            QueueError::JobNotFound(id) => HandlerError::JobNotFound(id),
            QueueError::CannotCancelJob(reason) => HandlerError::CannotCancelJob(reason),
            QueueError::NotCompleted(id) => HandlerError::NotCompleted(id),
            QueueError::JobFailed(message) => HandlerError::JobFailed(message),
            QueueError::WaitTimeout(secs) => HandlerError::SyncTimeout(secs),
            QueueError::Closed => HandlerError::ShuttingDown,
        }
    }
}

/// Errors from probing an upload
impl From<ProviderError> for HandlerError {
    fn from(err: ProviderError) -> Self {
        match err {
            ProviderError::UnsupportedFormat(_) => HandlerError::InvalidAudio(err.user_message()),
            other => HandlerError::InvalidAudio(format!("Could not read the audio file: {}", other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_queue_errors_map_to_http_statuses() {
        let full: HandlerError = QueueError::QueueFull { max: 50 }.into();
        assert_eq!(full.status_code(), StatusCode::SERVICE_UNAVAILABLE);
        assert!(full.to_string().contains("50"));

        let long: HandlerError = QueueError::DurationExceeded {
            duration: 20_000.0,
            max: 10_800.0,
        }
        .into();
        assert_eq!(long.status_code(), StatusCode::PAYLOAD_TOO_LARGE);

        let missing: HandlerError = QueueError::JobNotFound("x".into()).into();
        assert_eq!(missing.status_code(), StatusCode::NOT_FOUND);

        let waiting: HandlerError = QueueError::WaitTimeout(30).into();
        assert_eq!(waiting.status_code(), StatusCode::GATEWAY_TIMEOUT);
    }

    #[test]
    fn test_unsupported_audio_is_a_bad_request() {
        let error: HandlerError = ProviderError::UnsupportedFormat("moov atom not found".into()).into();
        assert_eq!(error.status_code(), StatusCode::BAD_REQUEST);
        assert!(!error.to_string().contains("moov"));
    }
}
