// ============================
// crates/backend-lib/src/validation.rs
// ============================
//! Inbound message validation.
//!
//! Everything here runs before a message reaches a room actor, so the
//! actors can assume ids and text fields are well formed. WebRTC payloads
//! are deliberately not validated; they are opaque to the server.

use regex::Regex;
use std::sync::LazyLock;
use teleconsult_common::{ClientMessage, UserProfile};
use thiserror::Error;

// Common validation constants
const MIN_ROOM_ID_LENGTH: usize = 3;
const MAX_ROOM_ID_LENGTH: usize = 64;
const MAX_USER_ID_LENGTH: usize = 128;
const MAX_DISPLAY_NAME_LENGTH: usize = 100;
const MAX_AVATAR_LENGTH: usize = 2048;
const MAX_CHAT_LENGTH: usize = 4096;
const MAX_NOTES_LENGTH: usize = 16_384;
const MAX_SUMMARY_LENGTH: usize = 16_384;

// Regex patterns for validation
static ROOM_ID_REGEX: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[a-zA-Z0-9-]+$").unwrap());
static DISPLAY_NAME_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[^<>/\\{}()\[\];]*$").unwrap());

/// Possible validation errors
#[derive(Error, Debug)]
pub enum ValidationError {
    #[error("Invalid room ID: {0}")]
    InvalidRoomId(String),

    #[error("Invalid user ID: {0}")]
    InvalidUserId(String),

    #[error("Invalid display name: {0}")]
    InvalidDisplayName(String),

    #[error("Invalid avatar: {0}")]
    InvalidAvatar(String),

    #[error("Invalid chat message: {0}")]
    InvalidChatMessage(String),

    #[error("Invalid medical record: {0}")]
    InvalidMedicalRecord(String),

    #[error("Invalid metadata: {0}")]
    InvalidMetadata(String),

    #[error("Invalid appointment summary: {0}")]
    InvalidSummary(String),
}

/// Result type for validation operations
pub type ValidationResult<T> = Result<T, ValidationError>;

/// Validate a room ID
pub fn validate_room_id(room_id: &str) -> ValidationResult<&str> {
    if room_id.is_empty() {
        return Err(ValidationError::InvalidRoomId(
            "Room ID must not be empty".to_string(),
        ));
    }

    if room_id.len() < MIN_ROOM_ID_LENGTH || room_id.len() > MAX_ROOM_ID_LENGTH {
        return Err(ValidationError::InvalidRoomId(format!(
            "Room ID must be between {MIN_ROOM_ID_LENGTH} and {MAX_ROOM_ID_LENGTH} characters"
        )));
    }

    // Room IDs double as record-store file names, so the charset is strict
    if !ROOM_ID_REGEX.is_match(room_id) {
        return Err(ValidationError::InvalidRoomId(
            "Room ID must contain only alphanumeric characters and hyphens".to_string(),
        ));
    }

    Ok(room_id)
}

/// Validate a user ID (joiner identity or relay target)
pub fn validate_user_id(user_id: &str) -> ValidationResult<&str> {
    if user_id.is_empty() {
        return Err(ValidationError::InvalidUserId(
            "User ID must not be empty".to_string(),
        ));
    }

    if user_id.len() > MAX_USER_ID_LENGTH {
        return Err(ValidationError::InvalidUserId(format!(
            "User ID cannot exceed {MAX_USER_ID_LENGTH} characters"
        )));
    }

    if user_id.chars().any(char::is_control) {
        return Err(ValidationError::InvalidUserId(
            "User ID must not contain control characters".to_string(),
        ));
    }

    Ok(user_id)
}

/// Validate a display name
pub fn validate_display_name(name: &str) -> ValidationResult<&str> {
    if name.is_empty() {
        return Err(ValidationError::InvalidDisplayName(
            "Display name must not be empty".to_string(),
        ));
    }

    if name.len() > MAX_DISPLAY_NAME_LENGTH {
        return Err(ValidationError::InvalidDisplayName(format!(
            "Display name must be between 1 and {MAX_DISPLAY_NAME_LENGTH} characters"
        )));
    }

    // Check for potentially dangerous characters
    if !DISPLAY_NAME_REGEX.is_match(name) {
        return Err(ValidationError::InvalidDisplayName(
            "Display name contains invalid characters".to_string(),
        ));
    }

    Ok(name)
}

/// Validate a joiner's profile
pub fn validate_profile(profile: &UserProfile) -> ValidationResult<()> {
    validate_user_id(&profile.id)?;
    validate_display_name(&profile.name)?;

    if let Some(avatar) = &profile.avatar {
        if avatar.len() > MAX_AVATAR_LENGTH {
            return Err(ValidationError::InvalidAvatar(format!(
                "Avatar URL cannot exceed {MAX_AVATAR_LENGTH} characters"
            )));
        }
    }

    Ok(())
}

/// Validate a chat message body
pub fn validate_chat_body(body: &str) -> ValidationResult<&str> {
    if body.trim().is_empty() {
        return Err(ValidationError::InvalidChatMessage(
            "Chat message must not be empty".to_string(),
        ));
    }

    if body.len() > MAX_CHAT_LENGTH {
        return Err(ValidationError::InvalidChatMessage(format!(
            "Chat message cannot exceed {MAX_CHAT_LENGTH} characters"
        )));
    }

    Ok(body)
}

/// Validate clinical notes. Empty notes are allowed; overwriting with an
/// empty string is how a clinician clears the record.
pub fn validate_notes(notes: &str) -> ValidationResult<&str> {
    if notes.len() > MAX_NOTES_LENGTH {
        return Err(ValidationError::InvalidMedicalRecord(format!(
            "Notes cannot exceed {MAX_NOTES_LENGTH} characters"
        )));
    }

    Ok(notes)
}

fn validate_summary_field(field: &str, value: &str) -> ValidationResult<()> {
    if value.len() > MAX_SUMMARY_LENGTH {
        return Err(ValidationError::InvalidSummary(format!(
            "{field} cannot exceed {MAX_SUMMARY_LENGTH} characters"
        )));
    }

    Ok(())
}

/// Validates a client message
pub fn validate_client_message(message: &ClientMessage) -> ValidationResult<()> {
    validate_room_id(message.room_id())?;

    match message {
        ClientMessage::JoinRoom { user, metadata, .. } => {
            validate_profile(user)?;

            if let Some(metadata) = metadata {
                if !metadata.is_object() {
                    return Err(ValidationError::InvalidMetadata(
                        "Metadata must be a JSON object".to_string(),
                    ));
                }
            }
        },
        ClientMessage::Offer { target, .. }
        | ClientMessage::Answer { target, .. }
        | ClientMessage::IceCandidate { target, .. } => {
            validate_user_id(target)?;
        },
        ClientMessage::ChatMessage { text, .. } => {
            validate_chat_body(text)?;
        },
        ClientMessage::UpdateMedicalRecord { notes, .. } => {
            validate_notes(notes)?;
        },
        ClientMessage::EndAppointment {
            summary, follow_up, ..
        } => {
            if let Some(summary) = summary {
                validate_summary_field("Summary", summary)?;
            }
            if let Some(follow_up) = follow_up {
                validate_summary_field("Follow-up", follow_up)?;
            }
        },
    }

    Ok(())
}
