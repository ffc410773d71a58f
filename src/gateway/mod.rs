//! Gateway command core
//!
//! Everything between an operator request and the bytes on the wire to the
//! edge bridge: the frame codec, the single-socket transport, the
//! one-in-flight ACK-gated command pipeline, the zone registry with its
//! cancel epoch, the assertion loop that heals radio-lost lamps, and the
//! orchestrator that runs the changeover and deactivation protocols.
//!
//! Invariants the module upholds:
//!
//! - at most one zone is active at any time
//! - at most one frame is outstanding on the transport
//! - a received `K` belongs to the most recently sent frame
//! - a frame is never split across socket writes
//! - an assertion cycle observes a pause or epoch change within one
//!   lamp-enqueue boundary

pub mod assertion;
pub mod frame;
pub mod health;
pub mod orchestrator;
pub mod pipeline;
pub mod registry;
pub mod state;
pub mod transport;

pub use frame::{Device, Frame, FrameError, LampId};
pub use health::{ConnectionStatus, DeviceHealth, HealthSnapshot};
pub use orchestrator::{ActivationReport, DeactivationReport, ZoneOrchestrator};
pub use pipeline::{Outcome, PipelineHandle, PipelineWorker};
pub use registry::ZoneRegistry;
pub use state::{SyncState, SyncStateSnapshot};
pub use transport::{Transport, TransportError};
