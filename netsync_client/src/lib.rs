//! `netsync_client`
//!
//! Client-side remote entity synchronization:
//! - Network id ↔ local handle registry, blips and markers
//! - Authority resolution (network stream vs. local driver)
//! - Per-vehicle reconciliation with latency-scaled velocity blending
//! - Vehicle weapon replication
//! - Rolling per-peer latency
//! - Engine effects abstraction with a headless implementation

pub mod authority;
pub mod engine;
pub mod error;
pub mod feed;
pub mod latency;
pub mod registry;
pub mod session;
pub mod vehicle;
pub mod weapons;

pub use engine::{EngineEffects, HeadlessEngine};
pub use error::SyncError;
pub use registry::EntityRegistry;
pub use session::SyncSession;
pub use vehicle::{SyncState, VehicleSync};
