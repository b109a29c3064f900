// ============================
// crates/backend-lib/src/side_channel.rs
// ============================
//! Non-media room traffic: chat ordering and the shared clinical record.
//!
//! Owned by a single room actor. Chat messages get a per-room sequence
//! number assigned here, which is what gives every participant the same
//! relative chat order. The medical record is last-writer-wins and only
//! clinicians may write it.

use chrono::Utc;
use teleconsult_common::{MedicalRecord, ParticipantInfo, Role, Seq, ServerEvent};

use crate::error::AppError;

#[derive(Debug, Default)]
pub struct SideChannel {
    last_seq: Seq,
    record: Option<MedicalRecord>,
}

impl SideChannel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stamp a chat line with the next sequence number and build the
    /// broadcast event. Sequence numbers start at 1 and never repeat
    /// within a room.
    pub fn chat(&mut self, author: &ParticipantInfo, body: String) -> (Seq, ServerEvent) {
        self.last_seq += 1;
        let event = ServerEvent::ChatMessage {
            seq: self.last_seq,
            author: author.as_ref_info(),
            body,
            sent_at: Utc::now(),
        };
        (self.last_seq, event)
    }

    /// Overwrite the shared notes. Doctor only; patients get an
    /// unauthorized error and the record is left untouched.
    pub fn update_record(
        &mut self,
        author: &ParticipantInfo,
        notes: String,
    ) -> Result<ServerEvent, AppError> {
        if author.role != Role::Doctor {
            return Err(AppError::Unauthorized(
                "only the clinician may update the medical record".to_string(),
            ));
        }

        let record = MedicalRecord {
            author: author.as_ref_info(),
            notes,
            updated_at: Utc::now(),
        };
        self.record = Some(record.clone());

        Ok(ServerEvent::MedicalRecordUpdated { record })
    }

    /// Latest notes revision, if any clinician has written one.
    pub fn record(&self) -> Option<&MedicalRecord> {
        self.record.as_ref()
    }

    pub fn last_seq(&self) -> Seq {
        self.last_seq
    }
}
