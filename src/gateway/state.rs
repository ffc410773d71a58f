//! Shared activation state
//!
//! Process-wide flags that keep concurrent operator clients (tablets, wall
//! screens) showing the same picture, and that suspend the assertion loop
//! while a deactivation is dispatching OFF frames.
//!
//! This is display/coordination state, not the enforcement source of truth;
//! the registry drives what actually gets asserted.

use crate::zones::{WindDirection, ZoneName};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Mutex;

#[derive(Default)]
struct Inner {
    activated: Option<(ZoneName, WindDirection, DateTime<Utc>)>,
    deactivation_in_progress: bool,
}

/// Lock-owning sync state. Share behind an `Arc`.
#[derive(Default)]
pub struct SyncState {
    inner: Mutex<Inner>,
}

/// Value copy served to clients, in the wire shape they expect.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncStateSnapshot {
    pub is_activated: bool,
    pub zone_name: Option<String>,
    pub wind_direction: Option<String>,
    pub activation_time: Option<DateTime<Utc>>,
    pub deactivation_in_progress: bool,
}

impl SyncState {
    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn set_activated(&self, zone: ZoneName, wind: WindDirection) {
        self.lock().activated = Some((zone, wind, Utc::now()));
    }

    pub fn clear_activation(&self) {
        self.lock().activated = None;
    }

    /// Active `(zone, wind)` as displayed to operators, if any.
    pub fn active(&self) -> Option<(ZoneName, WindDirection)> {
        self.lock().activated.map(|(z, w, _)| (z, w))
    }

    pub fn set_deactivation_in_progress(&self, flag: bool) {
        self.lock().deactivation_in_progress = flag;
    }

    pub fn deactivation_in_progress(&self) -> bool {
        self.lock().deactivation_in_progress
    }

    pub fn snapshot(&self) -> SyncStateSnapshot {
        let inner = self.lock();
        SyncStateSnapshot {
            is_activated: inner.activated.is_some(),
            zone_name: inner.activated.map(|(z, _, _)| z.to_string()),
            wind_direction: inner.activated.map(|(_, w, _)| w.to_string()),
            activation_time: inner.activated.map(|(_, _, t)| t),
            deactivation_in_progress: inner.deactivation_in_progress,
        }
    }
}
