//! Emergency event log
//!
//! One row per declared emergency: opened on activation, closed on
//! deactivation with the clear time and duration. At most one event is
//! active at a time, mirroring the single-active-zone invariant.

use super::StorageError;
use crate::zones::{WindDirection, ZoneName};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventStatus {
    Active,
    Cleared,
}

/// Persisted emergency event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmergencyEvent {
    pub id: u64,
    pub zone_name: String,
    pub wind_direction: String,
    pub activation_date: String,
    pub activation_time: String,
    pub clear_time: Option<String>,
    pub duration_minutes: Option<i64>,
    pub status: EventStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub activated_at: Option<DateTime<Utc>>,
}

/// Sled tree of emergency events keyed by a monotonically assigned id.
#[derive(Clone)]
pub struct EventLog {
    tree: Arc<sled::Tree>,
}

impl EventLog {
    pub fn open(db: &sled::Db) -> Result<Self, StorageError> {
        let tree = db.open_tree("emergency_events")?;
        Ok(Self { tree: Arc::new(tree) })
    }

    fn next_id(&self) -> Result<u64, StorageError> {
        let id = self
            .tree
            .last()?
            .and_then(|(key, _)| key.as_ref().try_into().ok().map(u64::from_be_bytes))
            .unwrap_or(0);
        Ok(id + 1)
    }

    fn put(&self, event: &EmergencyEvent) -> Result<(), StorageError> {
        let value = serde_json::to_vec(event)?;
        self.tree.insert(event.id.to_be_bytes(), value)?;
        Ok(())
    }

    /// Open a new active event. Any event still marked active is closed
    /// first (a crash between activation and deactivation can leave one).
    pub fn open_active(
        &self,
        zone: ZoneName,
        wind: WindDirection,
        at: DateTime<Utc>,
    ) -> Result<EmergencyEvent, StorageError> {
        if let Some(stale) = self.close_active(at)? {
            tracing::warn!(event_id = stale.id, "Closed stale active emergency event");
        }

        let event = EmergencyEvent {
            id: self.next_id()?,
            zone_name: zone.to_string(),
            wind_direction: wind.to_string(),
            activation_date: at.format("%Y-%m-%d").to_string(),
            activation_time: at.format("%H:%M:%S").to_string(),
            clear_time: None,
            duration_minutes: None,
            status: EventStatus::Active,
            activated_at: Some(at),
        };
        self.put(&event)?;
        Ok(event)
    }

    /// Close the active event, if one exists, recording the clear time and
    /// duration. Returns the closed event.
    pub fn close_active(&self, at: DateTime<Utc>) -> Result<Option<EmergencyEvent>, StorageError> {
        let Some(mut event) = self.active()? else {
            return Ok(None);
        };

        event.clear_time = Some(at.format("%H:%M:%S").to_string());
        event.duration_minutes = event
            .activated_at
            .map(|start| (at - start).num_minutes().max(0));
        event.status = EventStatus::Cleared;
        self.put(&event)?;
        Ok(Some(event))
    }

    /// The currently active event, if any. Scans newest-first; active rows
    /// are always near the tail.
    pub fn active(&self) -> Result<Option<EmergencyEvent>, StorageError> {
        for item in self.tree.iter().rev() {
            let (_, value) = item?;
            let event: EmergencyEvent = serde_json::from_slice(&value)?;
            if event.status == EventStatus::Active {
                return Ok(Some(event));
            }
        }
        Ok(None)
    }

    /// Most recent events, newest first.
    pub fn recent(&self, limit: usize) -> Vec<EmergencyEvent> {
        self.tree
            .iter()
            .rev()
            .take(limit)
            .filter_map(|item| item.ok())
            .filter_map(|(_, value)| serde_json::from_slice(&value).ok())
            .collect()
    }

    pub fn get(&self, id: u64) -> Result<Option<EmergencyEvent>, StorageError> {
        let Some(value) = self.tree.get(id.to_be_bytes())? else {
            return Ok(None);
        };
        Ok(Some(serde_json::from_slice(&value)?))
    }
}
