//! Shared helpers for the integration tests.

use std::sync::Arc;
use std::time::{Duration, Instant};

use netsync_client::{weapons::Unarmed, HeadlessEngine, SyncSession};
use netsync_shared::{
    config::SyncConfig,
    ids::{ModelId, NetworkId, PeerId},
    math::Vec3,
    net::{SyncMessage, VehicleFlags, VehicleSnapshot},
};

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("info")
        .with_test_writer()
        .try_init();
}

/// Session over a fresh headless engine.
pub fn headless_session(cfg: SyncConfig) -> (SyncSession, Arc<HeadlessEngine>) {
    let engine = Arc::new(HeadlessEngine::new());
    let session = SyncSession::new(cfg, engine.clone(), Arc::new(Unarmed));
    (session, engine)
}

/// Produces consecutive snapshots for one vehicle.
pub struct SnapshotScript {
    pub vehicle: NetworkId,
    pub model: ModelId,
    pub peer: PeerId,
    pub latency_ms: f32,
    seq: u16,
}

impl SnapshotScript {
    pub fn new(vehicle: i32, model: u32, peer: u32) -> Self {
        Self {
            vehicle: NetworkId(vehicle),
            model: ModelId(model),
            peer: PeerId(peer),
            latency_ms: 0.0,
            seq: 0,
        }
    }

    pub fn sequence(&self) -> u16 {
        self.seq
    }

    pub fn next(&mut self, position: Vec3, velocity: Vec3, flags: VehicleFlags) -> SyncMessage {
        self.seq = self.seq.wrapping_add(1);
        let mut snap = VehicleSnapshot::new(self.vehicle, self.model, self.peer);
        snap.position = position;
        snap.velocity = velocity;
        snap.flags = flags;
        snap.latency_ms = self.latency_ms;
        snap.sequence = self.seq;
        SyncMessage::VehicleUpdate(snap)
    }
}

/// Drains the session's queue until `done` holds or `timeout` passes.
pub async fn pump_until<F>(session: &mut SyncSession, timeout: Duration, mut done: F) -> bool
where
    F: FnMut(&SyncSession) -> bool,
{
    let deadline = Instant::now() + timeout;
    loop {
        let now = Instant::now();
        session.process_inbound(now);
        session.poll_bindings(now);
        if done(session) {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

/// Waits until no vehicle is still waiting for its local object.
pub async fn settle_bindings(session: &mut SyncSession) -> bool {
    let deadline = Instant::now() + Duration::from_secs(2);
    while session.poll_bindings(Instant::now()) > 0 {
        if Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    true
}
