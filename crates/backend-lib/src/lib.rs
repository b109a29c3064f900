// ============================
// crates/backend-lib/src/lib.rs
// ============================
//! Core backend-lib functionality for the TeleConsult signaling server.

pub mod config;
pub mod error;
pub mod lifecycle;
pub mod metrics;
pub mod negotiation;
pub mod records;
pub mod registry;
pub mod room_actor;
pub mod roster;
pub mod session;
pub mod side_channel;
pub mod validation;
pub mod ws_router;

use std::sync::Arc;

use crate::config::Settings;
use crate::error::AppError;
use crate::records::{FlatFileRecordStore, RecordStore};
use crate::registry::RoomRegistry;

/// Application state shared across all handlers
#[derive(Clone)]
pub struct AppState {
    /// Settings manager
    pub settings: Arc<Settings>,
    /// All live rooms
    pub registry: RoomRegistry,
}

impl AppState {
    /// Create a new application state
    pub fn new(settings: Settings, records: Arc<dyn RecordStore>) -> Self {
        let registry = RoomRegistry::new(settings.room_config(), records);
        Self {
            settings: Arc::new(settings),
            registry,
        }
    }

    /// Create application state from loaded settings and the flat-file
    /// record store they point at
    pub fn new_default() -> Result<Self, AppError> {
        let settings = Settings::load()?;
        let records = Arc::new(FlatFileRecordStore::new(&settings.records_dir)?);
        Ok(Self::new(settings, records))
    }
}
