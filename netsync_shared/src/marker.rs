//! Render-only world markers.
//!
//! Markers have no simulation object behind them; the client draws every
//! known marker each frame.

use serde::{Deserialize, Serialize};

use crate::math::Vec3;

/// RGBA color, 8 bits per channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rgba {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

impl Rgba {
    pub const fn new(r: u8, g: u8, b: u8, a: u8) -> Self {
        Self { r, g, b, a }
    }
}

impl Default for Rgba {
    fn default() -> Self {
        Self::new(255, 255, 255, 255)
    }
}

/// Marker description.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MarkerProperties {
    pub marker_type: u32,
    pub position: Vec3,
    pub direction: Vec3,
    pub rotation: Vec3,
    pub scale: Vec3,
    pub color: Rgba,
}

impl Default for MarkerProperties {
    fn default() -> Self {
        Self {
            marker_type: 0,
            position: Vec3::ZERO,
            direction: Vec3::ZERO,
            rotation: Vec3::ZERO,
            scale: Vec3::new(1.0, 1.0, 1.0),
            color: Rgba::default(),
        }
    }
}
