// ============================
// crates/backend-lib/src/records.rs
// ============================
//! Appointment record handoff with flat-file implementation.
//!
//! Record keeping is an external collaborator, not this server's concern:
//! when a room closes, exactly one [`AppointmentRecord`] is handed to the
//! configured [`RecordStore`] and the server keeps nothing. Deployments
//! that feed an EHR system swap in their own implementation.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::{
    fs,
    path::{Path, PathBuf},
};
use teleconsult_common::{EndReason, RoomId, UserId};
use tokio::fs as tokio_fs;

use crate::error::AppError;

/// Final artifact of a consultation, produced exactly once per room
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppointmentRecord {
    pub room_id: RoomId,
    /// Metadata supplied at room creation, passed through untouched
    pub metadata: Value,
    /// Who ended the call; absent for timeout teardowns
    pub ended_by: Option<UserId>,
    pub reason: EndReason,
    pub summary: Option<String>,
    pub follow_up: Option<String>,
    pub ended_at: DateTime<Utc>,
}

/// Trait for appointment record sinks
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Persist the final appointment summary after a room closes
    async fn store_summary(&self, record: &AppointmentRecord) -> Result<(), AppError>;
}

/// Flat-file implementation of the `RecordStore` trait
#[derive(Clone)]
pub struct FlatFileRecordStore {
    root: PathBuf,
}

impl FlatFileRecordStore {
    pub fn new<P: AsRef<Path>>(root: P) -> Result<Self, AppError> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(root.join("finished-appointments"))?;
        Ok(Self { root })
    }

    // Room ids are restricted to [a-zA-Z0-9-] upstream, so they are safe
    // to use as file names directly.
    fn record_path(&self, room_id: &str) -> PathBuf {
        self.root
            .join("finished-appointments")
            .join(format!("{room_id}.json"))
    }
}

#[async_trait]
impl RecordStore for FlatFileRecordStore {
    async fn store_summary(&self, record: &AppointmentRecord) -> Result<(), AppError> {
        let json = serde_json::to_string_pretty(record)?;
        tokio_fs::write(self.record_path(&record.room_id), json).await?;
        Ok(())
    }
}
