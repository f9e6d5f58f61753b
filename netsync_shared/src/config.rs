//! Configuration system.
//!
//! Loads sync configuration from JSON strings (file IO left to app).
//!
//! Most thresholds here were tuned by feel against live traffic. They are
//! exposed so they can be adjusted without touching the reconciliation code.

use serde::{Deserialize, Serialize};

/// Root configuration for the client sync layer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SyncConfig {
    /// Address the snapshot feed listens on, e.g. `127.0.0.1:40100`.
    pub listen_addr: String,
    /// Local simulation tick rate.
    pub tick_hz: u32,

    /// Samples kept per peer by the latency averager.
    pub latency_window: usize,
    /// Freshness window is this many average round trips...
    pub stale_latency_factor: f32,
    /// ...but never shorter than this (ms)...
    pub stale_min_ms: u64,
    /// ...and never longer than this (ms).
    pub stale_max_ms: u64,

    /// Delay after seating before interpolation starts (ms).
    pub settle_ms: u64,
    /// Duration of the post-stop glide (ms).
    pub glide_ms: u64,
    /// Reported speed above which velocity blending is used.
    pub moving_speed: f32,

    /// Base divergence distance that forces a hard warp.
    pub warp_threshold: f32,
    /// Additional warp distance per unit of speed.
    pub warp_threshold_per_speed: f32,
    /// Lower bound of the "sunk below remote" z band.
    pub force_z_min_delta: f32,
    /// Upper bound of the "sunk below remote" z band.
    pub force_z_max_delta: f32,
    /// Remote vertical speed under which it counts as not climbing.
    pub force_z_max_vertical_speed: f32,
    /// Consecutive ticks in the band before local z is forced.
    pub force_z_ticks: u32,

    /// Orientation change (degrees) above which rotation is slerped.
    pub rotation_snap_deg: f32,
    /// Cap on the slerp factor while catching up.
    pub rotation_catchup_cap: f32,

    /// Cooldown between mounted rocket shots (ms).
    pub rocket_cooldown_ms: u64,
    /// Cooldown between heavy turret shots (ms).
    pub heavy_turret_cooldown_ms: u64,
    /// Cooldown between simulated hand-thrown shots (ms).
    pub fake_bullet_cooldown_ms: u64,
    /// Minimum interval between turret aim task updates (ms).
    pub turret_aim_interval_ms: u64,
    /// Idle time after firing before drive-by tasks are cleared (ms).
    pub driveby_clear_ms: u64,
    /// Damage of a mounted-gun shot from a hostile peer.
    pub mounted_damage: i32,

    /// Readiness polls before a model load is abandoned.
    pub model_load_retries: u32,
    /// Delay between readiness polls (ms).
    pub model_retry_interval_ms: u64,

    /// Peers whose shots never deal damage.
    pub friendly_peers: Vec<u32>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            listen_addr: "127.0.0.1:40100".to_string(),
            tick_hz: 60,
            latency_window: 20,
            stale_latency_factor: 10.0,
            stale_min_ms: 1_000,
            stale_max_ms: 10_000,
            settle_ms: 200,
            glide_ms: 1_000,
            moving_speed: 0.2,
            warp_threshold: 15.0,
            warp_threshold_per_speed: 10.0,
            force_z_min_delta: 0.4,
            force_z_max_delta: 10.0,
            force_z_max_vertical_speed: 0.01,
            force_z_ticks: 2,
            rotation_snap_deg: 1.0,
            rotation_catchup_cap: 1.5,
            rocket_cooldown_ms: 1_500,
            heavy_turret_cooldown_ms: 1_000,
            fake_bullet_cooldown_ms: 500,
            turret_aim_interval_ms: 30,
            driveby_clear_ms: 200,
            mounted_damage: 75,
            model_load_retries: 500,
            model_retry_interval_ms: 10,
            friendly_peers: Vec::new(),
        }
    }
}

impl SyncConfig {
    /// Parses config from JSON. Missing fields take their defaults.
    pub fn from_json_str(s: &str) -> serde_json::Result<Self> {
        serde_json::from_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_json_keeps_defaults() {
        let cfg = SyncConfig::from_json_str(r#"{ "tick_hz": 30, "warp_threshold": 20.0 }"#)
            .unwrap();
        assert_eq!(cfg.tick_hz, 30);
        assert_eq!(cfg.warp_threshold, 20.0);
        assert_eq!(cfg.glide_ms, SyncConfig::default().glide_ms);
    }
}
