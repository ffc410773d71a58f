//! Active-zone registry
//!
//! Single-slot cell holding the one zone currently being enforced, plus the
//! cancel epoch that lets an in-flight assertion cycle detect that the world
//! changed under it. At most one zone is ever active; registering a new one
//! replaces the old atomically.
//!
//! The epoch is a generation counter: it is bumped whenever the slot is
//! cleared, replaced, or assertion is paused. An assertion cycle latches the
//! epoch at entry and treats any divergence as an abort order.
//!
//! All operations take a plain mutex and never await while holding it;
//! callers outside the lock see stale but individually consistent snapshots.

use super::frame::LampId;
use crate::zones::{WindDirection, ZoneName};
use std::sync::Mutex;
use std::time::Instant;
use tracing::info;

/// Value copy of the active slot, safe to use outside the lock.
#[derive(Debug, Clone)]
pub struct ActiveZone {
    pub zone: ZoneName,
    pub wind: WindDirection,
    /// Cached ON set in transmission order; the highest id carries flash.
    pub lamps: Vec<LampId>,
    pub last_assert_at: Instant,
}

#[derive(Default)]
struct Inner {
    active: Option<ActiveZone>,
    cancel_epoch: u64,
    paused: bool,
}

/// Lock-owning registry. Cheap to share behind an `Arc`.
#[derive(Default)]
pub struct ZoneRegistry {
    inner: Mutex<Inner>,
}

impl ZoneRegistry {
    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Register a zone as the active one, replacing any previous zone.
    /// Replacement bumps the cancel epoch so a cycle asserting the old zone
    /// aborts at its next lamp boundary.
    pub fn register(&self, zone: ZoneName, wind: WindDirection, lamps: Vec<LampId>) {
        let mut inner = self.lock();
        if let Some(old) = inner.active.take() {
            inner.cancel_epoch += 1;
            info!(
                old_zone = %old.zone, old_wind = %old.wind,
                new_zone = %zone, new_wind = %wind,
                "Replacing active zone"
            );
        }
        inner.active = Some(ActiveZone {
            zone,
            wind,
            lamps,
            last_assert_at: Instant::now(),
        });
        info!(zone = %zone, wind = %wind, "Registered active zone");
    }

    /// Clear the active slot. With a filter, clears only on a match.
    /// Returns the zone that was cleared, if any. Bumps the cancel epoch.
    pub fn unregister(
        &self,
        zone: Option<ZoneName>,
        wind: Option<WindDirection>,
    ) -> Option<(ZoneName, WindDirection)> {
        let mut inner = self.lock();
        let active = inner.active.as_ref()?;

        let zone_matches = zone.is_none_or(|z| z == active.zone);
        let wind_matches = wind.is_none_or(|w| w == active.wind);
        if !(zone_matches && wind_matches) {
            return None;
        }

        let cleared = inner.active.take().map(|a| (a.zone, a.wind));
        inner.cancel_epoch += 1;
        if let Some((z, w)) = cleared {
            info!(zone = %z, wind = %w, "Unregistered active zone, assertion cycle cancelled");
        }
        cleared
    }

    /// Atomically take whatever zone is active, bumping the epoch.
    /// First step of the changeover protocol: from this point no new
    /// assertion cycle starts for the old zone.
    pub fn take_active(&self) -> Option<(ZoneName, WindDirection)> {
        self.unregister(None, None)
    }

    /// Value copy for the assertion loop.
    pub fn snapshot(&self) -> Option<ActiveZone> {
        self.lock().active.clone()
    }

    /// Snapshot and epoch captured under one lock acquisition, so the
    /// assertion loop's token can never be newer than its zone copy.
    pub fn snapshot_with_epoch(&self) -> (Option<ActiveZone>, u64) {
        let inner = self.lock();
        (inner.active.clone(), inner.cancel_epoch)
    }

    /// One-lock check an assertion cycle runs before every lamp enqueue:
    /// still unpaused, same epoch, and the slot still holds the same zone.
    pub fn cycle_valid(&self, token: u64, zone: ZoneName, wind: WindDirection) -> bool {
        let inner = self.lock();
        !inner.paused
            && inner.cancel_epoch == token
            && inner
                .active
                .as_ref()
                .is_some_and(|a| a.zone == zone && a.wind == wind)
    }

    /// Whether the slot currently holds exactly this zone and wind.
    pub fn holds(&self, zone: ZoneName, wind: WindDirection) -> bool {
        self.lock()
            .active
            .as_ref()
            .is_some_and(|a| a.zone == zone && a.wind == wind)
    }

    pub fn current_epoch(&self) -> u64 {
        self.lock().cancel_epoch
    }

    pub fn is_paused(&self) -> bool {
        self.lock().paused
    }

    /// Stop new assertion cycles and abort an in-flight one at its next
    /// lamp boundary (the epoch bump is what the cycle observes).
    pub fn pause_assertion(&self, reason: &str) {
        let mut inner = self.lock();
        inner.paused = true;
        inner.cancel_epoch += 1;
        info!(reason, cancel_epoch = inner.cancel_epoch, "Assertion paused");
    }

    pub fn resume_assertion(&self) {
        let mut inner = self.lock();
        inner.paused = false;
        info!("Assertion resumed");
    }

    /// Refresh `last_assert_at`, but only if the slot still holds the same
    /// zone (the cycle may have raced a changeover).
    pub fn mark_asserted(&self, zone: ZoneName, wind: WindDirection) {
        let mut inner = self.lock();
        if let Some(active) = inner.active.as_mut() {
            if active.zone == zone && active.wind == wind {
                active.last_assert_at = Instant::now();
            }
        }
    }
}
