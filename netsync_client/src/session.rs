//! Sync session.
//!
//! Owns everything one connection needs: the registry, per-peer latency,
//! friendly peers and one [`VehicleSync`] per tracked vehicle. I/O tasks
//! push [`SyncMessage`]s into [`SyncSession::inbound`]; the tick loop calls
//! [`SyncSession::process_inbound`] then [`SyncSession::tick`]. Neither
//! waits on the engine: vehicles whose model is still streaming in are
//! picked up by a later tick.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;

use netsync_shared::{
    config::SyncConfig,
    ids::{NetworkId, PeerId},
    net::{SyncMessage, VehicleSnapshot},
};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::{
    engine::EngineEffects,
    latency::LatencyAverager,
    registry::EntityRegistry,
    vehicle::{TickContext, VehicleSync},
    weapons::WeaponCatalog,
};

/// Inbound queue depth; the feed waits when the tick falls this far behind.
pub const INBOUND_CAPACITY: usize = 1024;

/// Smoothed RTT for `peer`, capped at the longest freshness window so a
/// bogus sample cannot stretch reconciliation timing without bound.
fn capped_latency(latency: &HashMap<PeerId, LatencyAverager>, peer: PeerId, cap_ms: u64) -> f32 {
    latency
        .get(&peer)
        .map(LatencyAverager::average)
        .unwrap_or(0.0)
        .min(cap_ms as f32)
}

pub struct SyncSession {
    cfg: SyncConfig,
    engine: Arc<dyn EngineEffects>,
    catalog: Arc<dyn WeaponCatalog>,
    registry: Arc<EntityRegistry>,
    latency: HashMap<PeerId, LatencyAverager>,
    friendly: HashSet<PeerId>,
    vehicles: BTreeMap<NetworkId, VehicleSync>,
    /// Vehicle each peer last reported from.
    seated: HashMap<PeerId, NetworkId>,
    tx: mpsc::Sender<SyncMessage>,
    rx: mpsc::Receiver<SyncMessage>,
    disconnected: Option<String>,
}

impl SyncSession {
    pub fn new(
        cfg: SyncConfig,
        engine: Arc<dyn EngineEffects>,
        catalog: Arc<dyn WeaponCatalog>,
    ) -> Self {
        let registry = Arc::new(EntityRegistry::new(engine.clone(), &cfg));
        let friendly = cfg.friendly_peers.iter().copied().map(PeerId).collect();
        let (tx, rx) = mpsc::channel(INBOUND_CAPACITY);
        Self {
            cfg,
            engine,
            catalog,
            registry,
            latency: HashMap::new(),
            friendly,
            vehicles: BTreeMap::new(),
            seated: HashMap::new(),
            tx,
            rx,
            disconnected: None,
        }
    }

    /// Sender for I/O tasks.
    pub fn inbound(&self) -> mpsc::Sender<SyncMessage> {
        self.tx.clone()
    }

    pub fn registry(&self) -> &Arc<EntityRegistry> {
        &self.registry
    }

    pub fn config(&self) -> &SyncConfig {
        &self.cfg
    }

    pub fn vehicle(&self, id: NetworkId) -> Option<&VehicleSync> {
        self.vehicles.get(&id)
    }

    pub fn vehicle_count(&self) -> usize {
        self.vehicles.len()
    }

    /// Smoothed RTT for `peer`, 0 before any sample.
    pub fn latency_ms(&self, peer: PeerId) -> f32 {
        self.latency
            .get(&peer)
            .map(LatencyAverager::average)
            .unwrap_or(0.0)
    }

    pub fn set_friendly(&mut self, peer: PeerId, friendly: bool) {
        if friendly {
            self.friendly.insert(peer);
        } else {
            self.friendly.remove(&peer);
        }
    }

    /// Reason given by the server, once it ended the session.
    pub fn disconnect_reason(&self) -> Option<&str> {
        self.disconnected.as_deref()
    }

    fn record_latency(&mut self, peer: PeerId, rtt_ms: f32) {
        let window = self.cfg.latency_window;
        self.latency
            .entry(peer)
            .or_insert_with(|| LatencyAverager::new(window))
            .push(rtt_ms);
    }

    /// Applies every queued message. Returns how many were handled.
    pub fn process_inbound(&mut self, now: Instant) -> usize {
        let mut handled = 0;
        while let Ok(msg) = self.rx.try_recv() {
            self.apply(msg, now);
            handled += 1;
        }
        handled
    }

    fn apply(&mut self, msg: SyncMessage, now: Instant) {
        match msg {
            SyncMessage::VehicleUpdate(snap) => self.apply_vehicle(snap, now),
            SyncMessage::EntityDelete { id } => {
                self.vehicles.remove(&id);
                self.seated.retain(|_, v| *v != id);
                if !self.registry.destroy(id) {
                    debug!(net_id = %id, "delete for unknown entity");
                }
            }
            SyncMessage::MarkerUpsert { id, props } => {
                self.registry.upsert_network_marker(id, props);
            }
            SyncMessage::BlipCreate { id, position } => {
                if self.registry.contains_network(id) {
                    debug!(net_id = %id, "already bound; blip skipped");
                } else if self.registry.create_blip(position, id).is_none() {
                    warn!(net_id = %id, "engine refused blip");
                }
            }
            SyncMessage::LatencySample { peer, rtt_ms } => self.record_latency(peer, rtt_ms),
            SyncMessage::Disconnect { reason } => {
                info!(%reason, "server ended session");
                self.teardown();
                self.disconnected = Some(reason);
            }
        }
    }

    fn apply_vehicle(&mut self, snap: VehicleSnapshot, now: Instant) {
        if snap.latency_ms > 0.0 {
            self.record_latency(snap.peer, snap.latency_ms);
        }
        let latency = capped_latency(&self.latency, snap.peer, self.cfg.stale_max_ms);

        let sync = self
            .vehicles
            .entry(snap.vehicle)
            .or_insert_with(|| VehicleSync::new(snap.vehicle, snap.model, snap.peer));
        if !sync.apply_snapshot(&snap, now, &*self.engine, latency) {
            return;
        }
        if let Err(e) = sync.ensure_bound(&self.registry, &*self.engine, now) {
            // Retried on the next snapshot for this vehicle.
            warn!(net_id = %snap.vehicle, error = %e, "vehicle not bound");
        }

        let previous = self.seated.insert(snap.peer, snap.vehicle);
        if let Some(prev) = previous.filter(|v| *v != snap.vehicle) {
            if let Some(old) = self.vehicles.get_mut(&prev) {
                old.remove_occupant(snap.peer);
            }
        }
    }

    /// Collects finished background creations. Returns how many vehicles
    /// are still waiting for their object.
    pub fn poll_bindings(&mut self, now: Instant) -> usize {
        let mut waiting = 0;
        for (id, sync) in self.vehicles.iter_mut() {
            if !sync.is_binding() {
                continue;
            }
            if let Err(e) = sync.ensure_bound(&self.registry, &*self.engine, now) {
                warn!(net_id = %id, error = %e, "vehicle not bound");
            }
            if sync.is_binding() {
                waiting += 1;
            }
        }
        waiting
    }

    /// Advances every synchronizer, then draws markers.
    pub fn tick(&mut self, now: Instant) {
        self.poll_bindings(now);
        let player = self.engine.local_player();
        for sync in self.vehicles.values_mut() {
            let latency_ms = capped_latency(&self.latency, sync.peer(), self.cfg.stale_max_ms);
            let ctx = TickContext {
                now,
                engine: &*self.engine,
                registry: &self.registry,
                catalog: &*self.catalog,
                cfg: &self.cfg,
                player: &player,
                latency_ms,
                friendly: &self.friendly,
            };
            sync.tick(&ctx);
        }
        self.registry.draw_markers();
    }

    /// Drops all tracked state and removes every object this session
    /// created. Safe to call more than once.
    pub fn teardown(&mut self) {
        if !self.vehicles.is_empty() {
            info!(vehicles = self.vehicles.len(), "tearing down session");
        }
        self.vehicles.clear();
        self.seated.clear();
        self.latency.clear();
        self.registry.teardown();
    }
}
