//! Gateway and per-device health tracking
//!
//! Counters are written only by the pipeline worker; every reader gets a
//! value-copy snapshot, so handlers never observe a half-updated table.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;

/// Link state as last observed by the pipeline worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    Connected,
    Disconnected,
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionStatus::Connected => f.write_str("connected"),
            ConnectionStatus::Disconnected => f.write_str("disconnected"),
        }
    }
}

/// Rolling outcome counters for one field device.
#[derive(Debug, Clone, Serialize)]
pub struct DeviceHealth {
    pub total_commands: u64,
    pub successful_commands: u64,
    pub last_success_at: Option<DateTime<Utc>>,
    /// Last frame acknowledged by this device.
    pub last_frame: Option<String>,
    pub success_rate: f64,
}

impl Default for DeviceHealth {
    fn default() -> Self {
        Self {
            total_commands: 0,
            successful_commands: 0,
            last_success_at: None,
            last_frame: None,
            // No commands yet means no observed failures.
            success_rate: 1.0,
        }
    }
}

/// Health table for all 14 devices plus link-level status.
#[derive(Debug)]
pub struct HealthTable {
    devices: BTreeMap<char, DeviceHealth>,
    connection_status: ConnectionStatus,
    last_heartbeat: Option<DateTime<Utc>>,
}

impl Default for HealthTable {
    fn default() -> Self {
        let devices = ('A'..='N').map(|d| (d, DeviceHealth::default())).collect();
        Self {
            devices,
            connection_status: ConnectionStatus::Disconnected,
            last_heartbeat: None,
        }
    }
}

impl HealthTable {
    /// Record one completed attempt sequence for the device a frame
    /// addressed. Called by the worker only.
    pub fn record(&mut self, device_letter: char, frame: &str, ok: bool) {
        let Some(entry) = self.devices.get_mut(&device_letter) else {
            return;
        };
        entry.total_commands += 1;
        if ok {
            entry.successful_commands += 1;
            entry.last_success_at = Some(Utc::now());
            entry.last_frame = Some(frame.to_string());
        }
        entry.success_rate = entry.successful_commands as f64 / entry.total_commands as f64;
    }

    pub fn set_connection_status(&mut self, status: ConnectionStatus) {
        self.connection_status = status;
    }

    pub fn touch_heartbeat(&mut self) {
        self.last_heartbeat = Some(Utc::now());
    }

    pub fn connection_status(&self) -> ConnectionStatus {
        self.connection_status
    }

    pub fn snapshot(&self, gateway_connected: bool, queue_depth: usize) -> HealthSnapshot {
        HealthSnapshot {
            gateway_connected,
            queue_depth,
            device_status: self.devices.clone(),
            connection_status: self.connection_status,
            last_heartbeat: self.last_heartbeat,
        }
    }
}

/// Value copy served by the health endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct HealthSnapshot {
    pub gateway_connected: bool,
    pub queue_depth: usize,
    pub device_status: BTreeMap<char, DeviceHealth>,
    pub connection_status: ConnectionStatus,
    pub last_heartbeat: Option<DateTime<Utc>>,
}
