//! Identities used by the sync layer.
//!
//! Network-side identities are stable across clients; local handles are only
//! meaningful inside this process and may be recycled by the engine.

use std::fmt;
use std::num::NonZeroU32;

use serde::{Deserialize, Serialize};

/// Network-assigned identity of a replicated object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NetworkId(pub i32);

impl fmt::Display for NetworkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "net#{}", self.0)
    }
}

/// Engine handle of a materialized object.
///
/// Raw handle 0 means "no entity" to the engine, so it is not representable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LocalHandle(NonZeroU32);

impl LocalHandle {
    /// Wraps a raw engine handle. Returns `None` for the reserved value 0.
    pub fn new(raw: u32) -> Option<Self> {
        NonZeroU32::new(raw).map(Self)
    }

    pub fn raw(self) -> u32 {
        self.0.get()
    }
}

impl fmt::Display for LocalHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "local#{}", self.0)
    }
}

/// Remote peer (player connection) that authors snapshots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PeerId(pub u32);

/// Engine model identifier (hash of the model name).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ModelId(pub u32);

/// Engine weapon identifier. Zero means unarmed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub struct WeaponId(pub u32);

impl WeaponId {
    pub const UNARMED: Self = Self(0);

    pub fn is_unarmed(self) -> bool {
        self == Self::UNARMED
    }
}

/// Vehicle seat.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Seat {
    Driver,
    Passenger(u8),
}

impl Seat {
    /// Engine seat index: -1 for the driver, 0.. for passengers.
    pub fn raw(self) -> i32 {
        match self {
            Seat::Driver => -1,
            Seat::Passenger(n) => n as i32,
        }
    }

    pub fn from_raw(raw: i32) -> Option<Self> {
        match raw {
            -1 => Some(Seat::Driver),
            n if (0..=u8::MAX as i32).contains(&n) => Some(Seat::Passenger(n as u8)),
            _ => None,
        }
    }

    /// Door index used when leaving through this seat's side.
    pub fn door_index(self) -> u8 {
        (self.raw() + 1) as u8
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_handle_is_reserved() {
        assert!(LocalHandle::new(0).is_none());
        assert_eq!(LocalHandle::new(7).map(LocalHandle::raw), Some(7));
    }

    #[test]
    fn seat_raw_mapping() {
        assert_eq!(Seat::Driver.raw(), -1);
        assert_eq!(Seat::from_raw(-1), Some(Seat::Driver));
        assert_eq!(Seat::from_raw(2), Some(Seat::Passenger(2)));
        assert_eq!(Seat::from_raw(-2), None);
        assert_eq!(Seat::Driver.door_index(), 0);
        assert_eq!(Seat::Passenger(0).door_index(), 1);
    }
}
