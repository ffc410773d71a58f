//! Persistent stores
//!
//! Sled-backed persistence for the collaborator-facing tables: last
//! commanded lamp state, the emergency event log, and weather records.
//! Values are JSON; integer keys are big-endian so iteration is
//! chronological.
//!
//! None of these stores sits in the safety loop. Deactivation in particular
//! never consults the lamp store; it is a shadow of the last commanded
//! state, kept for display and manual-mode persistence only.

mod events;
mod lamps;
mod weather;

pub use events::{EmergencyEvent, EventLog, EventStatus};
pub use lamps::{LampRecord, LampStateStore};
pub use weather::{WeatherRecord, WeatherStore};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("database error: {0}")]
    Database(#[from] sled::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
