//! `netsync_shared`
//!
//! Types shared by the sync client and anything that feeds it.
//!
//! Design goals:
//! - Deterministic and modular where practical.
//! - Clear separation of concerns (ids, math, net, markers, config).
//! - No `unsafe`.

pub mod config;
pub mod ids;
pub mod marker;
pub mod math;
pub mod net;

pub mod prelude {
    //! Commonly used exports.

    pub use crate::config::*;
    pub use crate::ids::*;
    pub use crate::marker::*;
    pub use crate::math::*;
    pub use crate::net::*;
}
