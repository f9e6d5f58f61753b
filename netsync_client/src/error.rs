//! Errors surfaced by the sync layer.
//!
//! Most failure modes are not errors at all: lookups return `Option`, desyncs
//! are repaired by warping, stale entities freeze. Only object creation can
//! fail in a way the caller has to know about.

use std::fmt;

use netsync_shared::ids::{LocalHandle, ModelId, NetworkId};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncError {
    /// The model never became resident within the retry budget.
    ResourceLoad { model: ModelId, attempts: u32 },
    /// The engine refused to create the object.
    SpawnFailed { model: ModelId },
    /// The spawned object was already registered under another id.
    HandleTaken { handle: LocalHandle, owner: NetworkId },
}

impl fmt::Display for SyncError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncError::ResourceLoad { model, attempts } => write!(
                f,
                "model {:#010x} not loaded after {} attempts",
                model.0, attempts
            ),
            SyncError::SpawnFailed { model } => {
                write!(f, "engine failed to spawn model {:#010x}", model.0)
            }
            SyncError::HandleTaken { handle, owner } => {
                write!(f, "spawned handle {handle} already belongs to {owner}")
            }
        }
    }
}

impl std::error::Error for SyncError {}
