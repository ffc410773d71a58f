//! EGS Control Plane
//!
//! Control plane for an Emergency Guidance System: drives 126 lamp
//! actuators across 14 field devices into evacuation patterns and keeps
//! them there until the operator stands down.
//!
//! ## Architecture
//!
//! - **Gateway core**: frame codec, single-socket transport, one-in-flight
//!   ACK-gated command pipeline over TCP to the edge bridge
//! - **Zone state machine**: single-slot registry with cancel epochs, the
//!   assertion loop that heals radio-lost lamps, and the orchestrator
//!   running the changeover/deactivation protocols
//! - **Collaborator surfaces**: axum HTTP API, sled persistence for lamp
//!   states and emergency events, advisory weather ingest

pub mod api;
pub mod config;
pub mod gateway;
pub mod storage;
pub mod weather;
pub mod zones;

// Re-export the control surface
pub use gateway::{
    ActivationReport, DeactivationReport, Device, Frame, FrameError, HealthSnapshot, LampId,
    Outcome, PipelineHandle, SyncState, SyncStateSnapshot, ZoneOrchestrator, ZoneRegistry,
};

// Re-export the mapping table types
pub use zones::{WindDirection, ZoneName};

// Re-export persistence
pub use storage::{EmergencyEvent, EventLog, LampStateStore, StorageError, WeatherStore};
