// crates/backend-lib/src/error.rs

//! Central error type + Axum integration.
use crate::validation::ValidationError;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use teleconsult_common::ServerEvent;
use thiserror::Error;

/// Application error types with error codes and context
#[derive(Error, Debug)]
pub enum AppError {
    /// Malformed or out-of-sequence message from a client
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// A participant attempted a role-restricted action
    #[error("Unauthorized action: {0}")]
    Unauthorized(String),

    /// Relay target has no live session in the room
    #[error("Target participant '{target}' is not reachable")]
    TargetUnreachable { target: String },

    /// Operation on an unknown or already-closed room id
    #[error("Room '{room_id}' not found")]
    RoomNotFound { room_id: String },

    /// The appointment record collaborator rejected or timed out
    #[error("Record store unavailable: {0}")]
    RecordStore(String),

    #[error("Invalid input: {0}")]
    Validation(#[from] ValidationError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::Protocol(_) | AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::Unauthorized(_) => StatusCode::FORBIDDEN,
            AppError::TargetUnreachable { .. } | AppError::RoomNotFound { .. } => {
                StatusCode::NOT_FOUND
            },
            AppError::RecordStore(_) => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Get the error code for this error. These are wire-stable: clients
    /// match on them, so renaming one is a breaking protocol change.
    pub fn error_code(&self) -> &'static str {
        match self {
            AppError::Protocol(_) | AppError::Validation(_) => "PROTOCOL_ERROR",
            AppError::Unauthorized(_) => "UNAUTHORIZED_ACTION",
            AppError::TargetUnreachable { .. } => "TARGET_UNREACHABLE",
            AppError::RoomNotFound { .. } => "ROOM_NOT_FOUND",
            AppError::RecordStore(_) => "RECORD_STORE_UNAVAILABLE",
            AppError::Config(_)
            | AppError::Io(_)
            | AppError::Json(_)
            | AppError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Get a sanitized message suitable for production use
    pub fn sanitized_message(&self) -> String {
        match self {
            AppError::Protocol(_) => "Malformed or out-of-sequence message".to_string(),
            AppError::Unauthorized(_) => "Action not permitted for your role".to_string(),
            AppError::TargetUnreachable { .. } => "Target participant unreachable".to_string(),
            AppError::RoomNotFound { .. } => "Room not found".to_string(),
            AppError::RecordStore(_) => "Appointment record could not be stored".to_string(),
            AppError::Validation(_) => "Invalid input provided".to_string(),
            AppError::Config(_)
            | AppError::Io(_)
            | AppError::Json(_)
            | AppError::Internal(_) => "An internal server error occurred".to_string(),
        }
    }

    /// The `error` event delivered to an offending sender over its socket.
    pub fn to_event(&self) -> ServerEvent {
        ServerEvent::Error {
            code: self.error_code().to_string(),
            message: self.to_string(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let error_code = self.error_code();

        // Use detailed messages in development, sanitized in production
        let message = if cfg!(debug_assertions) {
            self.to_string()
        } else {
            self.sanitized_message()
        };

        let body = serde_json::json!({
            "error": {
                "code": error_code,
                "message": message,
            }
        });

        (status, axum::Json(body)).into_response()
    }
}
