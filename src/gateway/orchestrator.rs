//! Zone orchestrator
//!
//! Public coordinator for activation, deactivation and manual control.
//! Owns the interaction between the registry, the sync state, the command
//! pipeline and the persistent stores.
//!
//! Two protocols carry the safety weight:
//!
//! **Changeover** (activation while another zone may be active): the old
//! zone is unregistered and its queue emptied before anything else, the old
//! pattern is driven OFF until every lamp ACKs or a 10 s cap expires, and
//! only then is the new zone registered and lit. No stale ON/OFF for the
//! previous zone can interleave after the new activation returns.
//!
//! **Deactivation**: OFF frames are sent unconditionally. The lamp store is
//! never consulted; it can disagree with the field after packet loss or an
//! operator bypass, and a lamp left burning during an emergency clear is the
//! one failure mode this system exists to prevent.

use super::frame::{Device, Frame, FrameError, LampId};
use super::health::HealthSnapshot;
use super::pipeline::{Outcome, PipelineHandle};
use super::registry::ZoneRegistry;
use super::state::{SyncState, SyncStateSnapshot};
use crate::config::ChangeoverConfig;
use crate::storage::{EventLog, LampStateStore};
use crate::zones::{self, WindDirection, ZoneName};
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

/// Result of an activation request.
#[derive(Debug, Clone, Serialize)]
pub struct ActivationReport {
    pub ok: bool,
    pub zone: ZoneName,
    pub wind: WindDirection,
    pub lamps_acked: usize,
    pub lamps_total: usize,
}

/// Result of a deactivation request.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum DeactivationReport {
    Zone {
        ok: bool,
        zone: ZoneName,
        wind: WindDirection,
    },
    FullSystem {
        ok: bool,
        devices_acked: usize,
    },
}

impl DeactivationReport {
    pub fn ok(&self) -> bool {
        match self {
            DeactivationReport::Zone { ok, .. } => *ok,
            DeactivationReport::FullSystem { ok, .. } => *ok,
        }
    }
}

/// The lamp in an ON set that carries the flash marker: the highest id.
fn flash_target(lamps: &[LampId]) -> Option<LampId> {
    lamps.iter().copied().max()
}

/// Mapping-table lookup with the 1..=126 validity check applied.
fn command_set(zone: ZoneName, wind: WindDirection) -> Vec<LampId> {
    zones::zone_lamps(zone, wind)
        .iter()
        .filter_map(|&id| match LampId::new(id as u16) {
            Ok(lamp) => Some(lamp),
            Err(e) => {
                warn!(zone = %zone, wind = %wind, error = %e, "Skipping out-of-range lamp in mapping");
                None
            }
        })
        .collect()
}

pub struct ZoneOrchestrator {
    pipeline: PipelineHandle,
    registry: Arc<ZoneRegistry>,
    sync_state: Arc<SyncState>,
    lamp_store: Option<LampStateStore>,
    event_log: Option<EventLog>,
    config: ChangeoverConfig,
    /// Serializes activation/deactivation; concurrent operator requests run
    /// one protocol at a time, in arrival order.
    protocol_lock: tokio::sync::Mutex<()>,
}

impl ZoneOrchestrator {
    pub fn new(
        pipeline: PipelineHandle,
        registry: Arc<ZoneRegistry>,
        sync_state: Arc<SyncState>,
        lamp_store: Option<LampStateStore>,
        event_log: Option<EventLog>,
        config: ChangeoverConfig,
    ) -> Self {
        Self {
            pipeline,
            registry,
            sync_state,
            lamp_store,
            event_log,
            config,
            protocol_lock: tokio::sync::Mutex::new(()),
        }
    }

    // ------------------------------------------------------------------
    // Activation (changeover protocol)
    // ------------------------------------------------------------------

    pub async fn activate(&self, zone: ZoneName, wind: WindDirection) -> ActivationReport {
        let _guard = self.protocol_lock.lock().await;
        info!(zone = %zone, wind = %wind, "Zone activation requested");

        // Old zone out of the slot first; from here no new assertion cycle
        // starts for it, and the epoch bump aborts an in-flight one.
        let old = self.registry.take_active();
        self.pipeline.clear_queue();

        if let Some((old_zone, old_wind)) = old {
            info!(zone = %old_zone, wind = %old_wind, "Waiting for previous zone to turn off");
            let all_off = self.wait_for_zone_off(old_zone, old_wind).await;
            if !all_off {
                warn!(zone = %old_zone, wind = %old_wind, "Previous zone not fully confirmed off, proceeding");
            }
            tokio::time::sleep(Duration::from_millis(self.config.settle_ms)).await;
            // Anything queued while we waited belongs to the old world.
            self.pipeline.clear_queue();
        }

        let lamps = command_set(zone, wind);
        if lamps.is_empty() {
            error!(zone = %zone, wind = %wind, "No valid lamps mapped, refusing activation");
            return ActivationReport {
                ok: false,
                zone,
                wind,
                lamps_acked: 0,
                lamps_total: 0,
            };
        }

        // Register before sending so the assertion loop takes over from the
        // next tick even if some ON frames are lost now.
        self.registry.register(zone, wind, lamps.clone());

        let acked = self.send_batch(&lamps, true).await;
        let ok = acked > 0;

        if ok {
            self.sync_state.set_activated(zone, wind);
            if let Some(log) = &self.event_log {
                if let Err(e) = log.open_active(zone, wind, chrono::Utc::now()) {
                    error!(error = %e, "Failed to record emergency event");
                }
            }
            info!(zone = %zone, wind = %wind, acked, total = lamps.len(), "Zone activated");
        } else {
            self.registry.unregister(Some(zone), Some(wind));
            error!(zone = %zone, wind = %wind, "Activation failed, zone unregistered");
        }

        ActivationReport {
            ok,
            zone,
            wind,
            lamps_acked: acked,
            lamps_total: lamps.len(),
        }
    }

    /// Drive every lamp of the old pattern OFF until each ACKs or the cap
    /// expires. An ACK is the only proof the field accepted the OFF.
    async fn wait_for_zone_off(&self, zone: ZoneName, wind: WindDirection) -> bool {
        let mut remaining = command_set(zone, wind);
        if remaining.is_empty() {
            return true;
        }

        let started = Instant::now();
        let timeout = Duration::from_secs(self.config.off_wait_timeout_secs);
        let total = remaining.len();

        let mut round = 0u32;
        loop {
            let mut still_on = Vec::new();
            for lamp in remaining {
                if started.elapsed() >= timeout {
                    still_on.push(lamp);
                    continue;
                }
                let outcome = self.pipeline.send_frame(Frame::lamp(lamp, false, false)).await;
                if outcome.ok {
                    info!(lamp = %lamp, "Lamp confirmed off");
                } else {
                    still_on.push(lamp);
                }
            }
            remaining = still_on;

            if remaining.is_empty() {
                info!(zone = %zone, wind = %wind, lamps = total, "Previous zone confirmed off");
                return true;
            }
            round += 1;
            if round >= self.config.off_wait_rounds || started.elapsed() >= timeout {
                warn!(
                    zone = %zone, wind = %wind,
                    unconfirmed = remaining.len(),
                    "Timed out waiting for zone off"
                );
                return false;
            }
            tokio::time::sleep(Duration::from_millis(self.config.off_wait_round_gap_ms)).await;
        }
    }

    /// Lamp batch with one delayed retry pass over the lamps that failed.
    /// On an ON batch the highest id carries the flash marker. Returns the
    /// number of ACKed lamps.
    async fn send_batch(&self, lamps: &[LampId], on: bool) -> usize {
        let flash = if on { flash_target(lamps) } else { None };
        let mut acked = 0usize;
        let mut failed = Vec::new();

        for &lamp in lamps {
            let frame = Frame::lamp(lamp, on, Some(lamp) == flash);
            if self.pipeline.send_frame(frame).await.ok {
                acked += 1;
            } else {
                failed.push(lamp);
            }
        }

        if !failed.is_empty() {
            warn!(failed = failed.len(), on, "Retrying failed lamp commands");
            tokio::time::sleep(Duration::from_millis(500)).await;
            for lamp in failed {
                let frame = Frame::lamp(lamp, on, Some(lamp) == flash);
                if self.pipeline.send_frame(frame).await.ok {
                    acked += 1;
                }
            }
        }
        acked
    }

    // ------------------------------------------------------------------
    // Deactivation
    // ------------------------------------------------------------------

    /// Deactivate a named zone, the active zone, or the whole field.
    ///
    /// OFF frames are sent unconditionally; the lamp store is not consulted.
    /// Cleanup (sync state, the in-progress flag, assertion resume) runs on
    /// every path out.
    pub async fn deactivate(
        &self,
        request: Option<(ZoneName, WindDirection)>,
    ) -> DeactivationReport {
        let _guard = self.protocol_lock.lock().await;

        // Stops new assertion cycles and aborts an in-flight one at its
        // next lamp boundary.
        self.registry.pause_assertion("deactivation");

        // Capture before anything is cleared.
        let active = self
            .sync_state
            .active()
            .or_else(|| self.registry.snapshot().map(|a| (a.zone, a.wind)));
        info!(request = ?request, active = ?active, "Deactivation started");

        self.sync_state.set_deactivation_in_progress(true);
        self.pipeline.clear_queue();

        let report = match request.or(active) {
            Some((zone, wind)) => {
                let ok = self.deactivate_zone(zone, wind).await;
                DeactivationReport::Zone { ok, zone, wind }
            }
            None => {
                info!("No zone specified and none active, full system shutdown");
                let devices_acked = self.full_system_off().await;
                DeactivationReport::FullSystem {
                    ok: devices_acked > 0,
                    devices_acked,
                }
            }
        };

        if let Some(log) = &self.event_log {
            match log.close_active(chrono::Utc::now()) {
                Ok(Some(event)) => {
                    info!(event_id = event.id, duration_minutes = ?event.duration_minutes, "Emergency event cleared")
                }
                Ok(None) => {}
                Err(e) => error!(error = %e, "Failed to close emergency event"),
            }
        }

        // Sync state is cleared only after the OFFs were dispatched, so
        // concurrent clients never see "inactive" while lamps may be lit.
        self.sync_state.clear_activation();
        self.sync_state.set_deactivation_in_progress(false);
        self.registry.resume_assertion();

        info!(ok = report.ok(), "Deactivation completed");
        report
    }

    async fn deactivate_zone(&self, zone: ZoneName, wind: WindDirection) -> bool {
        self.registry.unregister(Some(zone), Some(wind));
        self.pipeline.clear_queue();
        // Give a mid-flight assertion cycle one beat to observe the clear.
        tokio::time::sleep(Duration::from_millis(50)).await;

        let lamps = command_set(zone, wind);
        if lamps.is_empty() {
            return true;
        }
        info!(zone = %zone, wind = %wind, lamps = lamps.len(), "Sending unconditional OFF commands");

        self.pipeline.clear_queue();

        for round in 1..=self.config.deactivation_rounds {
            // Same batch shape as activation: the lamps that fail alongside
            // others that succeed still get the delayed retry pass.
            let acked = self.send_batch(&lamps, false).await;
            if acked > 0 {
                info!(zone = %zone, wind = %wind, round, acked, "Zone OFF round succeeded");
                return true;
            }
            warn!(zone = %zone, wind = %wind, round, "Zone OFF round got no ACKs");
            if round < self.config.deactivation_rounds {
                tokio::time::sleep(Duration::from_secs(
                    self.config.deactivation_round_delay_secs,
                ))
                .await;
            }
        }
        error!(zone = %zone, wind = %wind, "Zone deactivation failed after all rounds");
        false
    }

    /// Device-wide all-off to every field device.
    async fn full_system_off(&self) -> usize {
        self.registry.take_active();
        tokio::time::sleep(Duration::from_millis(100)).await;

        let mut acked = 0usize;
        for device in Device::all() {
            let outcome = self
                .pipeline
                .send_frame(Frame::device_all(device, false))
                .await;
            if outcome.ok {
                acked += 1;
            } else {
                warn!(device = %device, "Device all-off not acknowledged");
            }
        }
        info!(devices_acked = acked, "Full system shutdown commands sent");
        acked
    }

    // ------------------------------------------------------------------
    // Manual control (bypasses the registry by design)
    // ------------------------------------------------------------------

    /// Manual single-lamp command. Persists the commanded state on ACK.
    pub async fn set_lamp(&self, lamp: LampId, on: bool, flash: bool) -> Outcome {
        let outcome = self.pipeline.send_frame(Frame::lamp(lamp, on, flash)).await;
        if outcome.ok {
            if let Some(store) = &self.lamp_store {
                if let Err(e) = store.set(lamp, on) {
                    error!(lamp = %lamp, error = %e, "Failed to persist lamp state");
                }
            }
        }
        outcome
    }

    pub async fn set_device_all(&self, device: Device, on: bool) -> Outcome {
        self.pipeline.send_frame(Frame::device_all(device, on)).await
    }

    pub async fn set_device_route(&self, device: Device, route: u8) -> Result<Outcome, FrameError> {
        let frame = Frame::route(device, route)?;
        Ok(self.pipeline.send_frame(frame).await)
    }

    pub async fn set_device_mask(&self, device: Device, mask: &str) -> Result<Outcome, FrameError> {
        let frame = Frame::mask(device, mask)?;
        Ok(self.pipeline.send_frame(frame).await)
    }

    // ------------------------------------------------------------------
    // Snapshots
    // ------------------------------------------------------------------

    pub fn health(&self) -> HealthSnapshot {
        self.pipeline.health_snapshot()
    }

    pub fn sync_snapshot(&self) -> SyncStateSnapshot {
        self.sync_state.snapshot()
    }

    pub fn lamp_states(&self) -> Vec<crate::storage::LampRecord> {
        self.lamp_store
            .as_ref()
            .map(|s| s.get_all())
            .unwrap_or_default()
    }

    pub fn recent_events(&self, limit: usize) -> Vec<crate::storage::EmergencyEvent> {
        self.event_log
            .as_ref()
            .map(|log| log.recent(limit))
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flash_goes_to_the_highest_id() {
        let lamps: Vec<LampId> = [4u16, 22, 13, 31, 42, 52, 72]
            .iter()
            .map(|&id| LampId::new(id).unwrap())
            .collect();
        assert_eq!(flash_target(&lamps), Some(LampId::new(72).unwrap()));
        assert_eq!(flash_target(&[]), None);
    }

    #[test]
    fn command_set_preserves_table_order() {
        let lamps = command_set(ZoneName::G, WindDirection::SouthNorth);
        let ids: Vec<u8> = lamps.iter().map(|l| l.get()).collect();
        assert_eq!(ids, vec![4, 22, 13, 31, 42, 52, 72]);
    }
}
