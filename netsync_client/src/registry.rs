//! Entity handle registry.
//!
//! Maps network identities to engine handles and back, and owns the marker
//! pools. The network feed and the tick both touch it, so every operation
//! takes the single registry-wide lock; the two maps are only ever changed
//! together under that lock.
//!
//! Object creation may wait for the engine to stream a model in. That wait
//! happens without the lock; only the final binding is published under it.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use netsync_shared::{
    config::SyncConfig,
    ids::{LocalHandle, ModelId, NetworkId},
    marker::MarkerProperties,
    math::{Quat, Vec3},
};
use tracing::{debug, info, warn};

use crate::{engine::EngineEffects, error::SyncError};

/// LOD distance applied to network props so they stay visible at range.
const PROP_LOD_DISTANCE: f32 = 3000.0;

#[derive(Default)]
struct RegistryInner {
    by_net: HashMap<NetworkId, LocalHandle>,
    by_local: HashMap<LocalHandle, NetworkId>,
    /// Network ids whose local handle is a map blip. Always a subset of `by_net`.
    blips: HashSet<NetworkId>,
    markers: HashMap<NetworkId, MarkerProperties>,
    local_markers: BTreeMap<u32, MarkerProperties>,
    marker_counter: u32,
}

impl RegistryInner {
    fn bind(&mut self, net: NetworkId, local: LocalHandle) {
        if let Some(old_local) = self.by_net.remove(&net) {
            self.by_local.remove(&old_local);
            if old_local != local {
                debug!(%net, %old_local, %local, "rebinding network id");
            }
        }
        if let Some(old_net) = self.by_local.remove(&local) {
            self.by_net.remove(&old_net);
            self.blips.remove(&old_net);
            if old_net != net {
                debug!(%local, %old_net, %net, "local handle taken over");
            }
        }
        self.blips.remove(&net);
        self.by_net.insert(net, local);
        self.by_local.insert(local, net);
    }

    fn unbind(&mut self, net: NetworkId) -> Option<LocalHandle> {
        let local = self.by_net.remove(&net)?;
        self.by_local.remove(&local);
        self.blips.remove(&net);
        Some(local)
    }
}

/// Bidirectional network id ↔ local handle registry plus marker pools.
pub struct EntityRegistry {
    engine: Arc<dyn EngineEffects>,
    inner: Mutex<RegistryInner>,
    load_retries: u32,
    retry_interval: Duration,
}

impl EntityRegistry {
    pub fn new(engine: Arc<dyn EngineEffects>, cfg: &SyncConfig) -> Self {
        Self {
            engine,
            inner: Mutex::new(RegistryInner::default()),
            load_retries: cfg.model_load_retries.max(1),
            retry_interval: Duration::from_millis(cfg.model_retry_interval_ms),
        }
    }

    fn inner(&self) -> MutexGuard<'_, RegistryInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn resolve_local(&self, net: NetworkId) -> Option<LocalHandle> {
        self.inner().by_net.get(&net).copied()
    }

    pub fn resolve_network(&self, local: LocalHandle) -> Option<NetworkId> {
        self.inner().by_local.get(&local).copied()
    }

    pub fn contains_network(&self, net: NetworkId) -> bool {
        self.inner().by_net.contains_key(&net)
    }

    pub fn contains_local(&self, local: LocalHandle) -> bool {
        self.inner().by_local.contains_key(&local)
    }

    pub fn is_blip(&self, local: LocalHandle) -> bool {
        let inner = self.inner();
        inner
            .by_local
            .get(&local)
            .is_some_and(|net| inner.blips.contains(net))
    }

    pub fn len(&self) -> usize {
        self.inner().by_net.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner().by_net.is_empty()
    }

    /// All bound pairs, ordered by network id.
    pub fn pairs(&self) -> Vec<(NetworkId, LocalHandle)> {
        let mut pairs: Vec<_> = self.inner().by_net.iter().map(|(n, l)| (*n, *l)).collect();
        pairs.sort();
        pairs
    }

    /// Inserts or overwrites a pair. Any previous pair under either key is
    /// removed first, so the mapping stays one-to-one.
    pub fn bind(&self, net: NetworkId, local: LocalHandle) {
        self.inner().bind(net, local);
    }

    /// Removes the pair for `net`, returning the handle it was bound to.
    pub fn unbind(&self, net: NetworkId) -> Option<LocalHandle> {
        self.inner().unbind(net)
    }

    /// Removes the pair for `local`, returning the network id it was bound to.
    pub fn unbind_local(&self, local: LocalHandle) -> Option<NetworkId> {
        let mut inner = self.inner();
        let net = inner.by_local.get(&local).copied()?;
        inner.unbind(net);
        Some(net)
    }

    /// Loads `model`, spawns a vehicle and binds it to `net`.
    pub async fn materialize_vehicle(
        &self,
        model: ModelId,
        position: Vec3,
        rotation: Vec3,
        net: NetworkId,
    ) -> Result<LocalHandle, SyncError> {
        self.load_model(model).await?;

        let Some(handle) = self.engine.spawn_vehicle(model, position, rotation.z) else {
            self.engine.release_model(model);
            warn!(%net, model = model.0, "engine refused vehicle spawn");
            return Err(SyncError::SpawnFailed { model });
        };
        self.engine
            .set_rotation(handle, Quat::from_euler_degrees(rotation));
        // Damage stays off until the first state sync says otherwise.
        self.engine.set_invincible(handle, true);

        let bound = self.publish(net, handle);
        self.engine.release_model(model);
        let bound = bound?;
        if bound == handle {
            info!(%net, %handle, "vehicle materialized");
        }
        Ok(bound)
    }

    /// Loads `model`, spawns a prop and binds it to `net`.
    pub async fn materialize_prop(
        &self,
        model: ModelId,
        position: Vec3,
        rotation: Vec3,
        dynamic: bool,
        net: NetworkId,
    ) -> Result<LocalHandle, SyncError> {
        self.load_model(model).await?;

        let Some(handle) = self.engine.spawn_prop(model, position, rotation, dynamic) else {
            self.engine.release_model(model);
            warn!(%net, model = model.0, "engine refused prop spawn");
            return Err(SyncError::SpawnFailed { model });
        };
        self.engine
            .set_rotation(handle, Quat::from_euler_degrees(rotation));
        self.engine.set_position(handle, position);
        self.engine.set_lod_distance(handle, PROP_LOD_DISTANCE);
        if !dynamic {
            self.engine.set_frozen(handle, true);
        }

        let bound = self.publish(net, handle);
        self.engine.release_model(model);
        let bound = bound?;
        if bound == handle {
            debug!(%net, %handle, dynamic, "prop materialized");
        }
        Ok(bound)
    }

    async fn load_model(&self, model: ModelId) -> Result<(), SyncError> {
        for _ in 0..self.load_retries {
            if self.engine.is_model_loaded(model) {
                return Ok(());
            }
            self.engine.request_model(model);
            if self.engine.is_model_loaded(model) {
                return Ok(());
            }
            tokio::time::sleep(self.retry_interval).await;
        }
        warn!(
            model = model.0,
            attempts = self.load_retries,
            "model load abandoned"
        );
        Err(SyncError::ResourceLoad {
            model,
            attempts: self.load_retries,
        })
    }

    /// Binds a freshly spawned object. First writer wins:
    ///
    /// - `net` already bound to a live object: that object is kept, the
    ///   new one deleted, and the existing handle returned;
    /// - `handle` already registered under another id: nothing is bound and
    ///   the object is left to its owner.
    fn publish(&self, net: NetworkId, handle: LocalHandle) -> Result<LocalHandle, SyncError> {
        let existing = {
            let mut inner = self.inner();
            if let Some(owner) = inner.by_local.get(&handle).copied() {
                if owner == net {
                    return Ok(handle);
                }
                debug!(%net, %handle, %owner, "spawned handle already registered");
                return Err(SyncError::HandleTaken { handle, owner });
            }
            match inner.by_net.get(&net).copied() {
                Some(other) if self.engine.transform(other).is_some() => other,
                _ => {
                    inner.bind(net, handle);
                    return Ok(handle);
                }
            }
        };
        debug!(%net, %handle, %existing, "lost the race; keeping existing object");
        self.engine.delete_entity(handle);
        Ok(existing)
    }

    /// Drops an object nobody is waiting for any more. Unbinds it if it is
    /// still bound to `net` and deletes it unless another id owns it.
    pub fn discard(&self, net: NetworkId, handle: LocalHandle) {
        let ours = {
            let mut inner = self.inner();
            match inner.by_local.get(&handle).copied() {
                Some(owner) if owner == net => {
                    inner.unbind(net);
                    true
                }
                Some(_) => false,
                None => true,
            }
        };
        if ours && self.engine.transform(handle).is_some() {
            debug!(%net, %handle, "discarding unclaimed object");
            self.engine.delete_entity(handle);
        }
    }

    /// Creates a map blip for `net`.
    pub fn create_blip(&self, position: Vec3, net: NetworkId) -> Option<LocalHandle> {
        let handle = self.engine.create_blip(position)?;
        let mut inner = self.inner();
        inner.bind(net, handle);
        inner.blips.insert(net);
        Some(handle)
    }

    /// Unbinds `net` and removes its engine object and marker, if any.
    pub fn destroy(&self, net: NetworkId) -> bool {
        let (local, was_blip, had_marker) = {
            let mut inner = self.inner();
            let was_blip = inner.blips.contains(&net);
            let had_marker = inner.markers.remove(&net).is_some();
            (inner.unbind(net), was_blip, had_marker)
        };
        match local {
            Some(local) if was_blip => self.engine.remove_blip(local),
            Some(local) => self.engine.delete_entity(local),
            None => {}
        }
        local.is_some() || had_marker
    }

    pub fn create_local_marker(&self, props: MarkerProperties) -> u32 {
        let mut inner = self.inner();
        inner.marker_counter += 1;
        let id = inner.marker_counter;
        inner.local_markers.insert(id, props);
        id
    }

    pub fn delete_local_marker(&self, id: u32) -> bool {
        self.inner().local_markers.remove(&id).is_some()
    }

    pub fn local_marker(&self, id: u32) -> Option<MarkerProperties> {
        self.inner().local_markers.get(&id).copied()
    }

    pub fn upsert_network_marker(&self, net: NetworkId, props: MarkerProperties) {
        self.inner().markers.insert(net, props);
    }

    pub fn remove_network_marker(&self, net: NetworkId) -> bool {
        self.inner().markers.remove(&net).is_some()
    }

    pub fn network_marker(&self, net: NetworkId) -> Option<MarkerProperties> {
        self.inner().markers.get(&net).copied()
    }

    /// Draws network markers, then local ones.
    pub fn draw_markers(&self) {
        let markers: Vec<MarkerProperties> = {
            let inner = self.inner();
            inner
                .markers
                .values()
                .chain(inner.local_markers.values())
                .copied()
                .collect()
        };
        for props in &markers {
            self.engine.draw_marker(props);
        }
    }

    /// Deletes every tracked object and empties all pools.
    ///
    /// Safe to call repeatedly; a second call finds nothing to do.
    pub fn teardown(&self) {
        let (pairs, blips) = {
            let mut inner = self.inner();
            let pairs = std::mem::take(&mut inner.by_net);
            let blips = std::mem::take(&mut inner.blips);
            inner.by_local.clear();
            inner.markers.clear();
            inner.local_markers.clear();
            inner.marker_counter = 0;
            (pairs, blips)
        };

        if !pairs.is_empty() {
            info!(entities = pairs.len(), "tearing down registry");
        }
        for (net, local) in pairs {
            if blips.contains(&net) {
                self.engine.remove_blip(local);
            } else {
                self.engine.delete_entity(local);
            }
        }
    }
}
