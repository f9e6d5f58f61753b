//! Remote vehicle synchronization.
//!
//! A [`VehicleSync`] owns the last authoritative state of one networked
//! vehicle and drives the matching local object every tick:
//!
//! ```text
//! Unbound --first snapshot--> BoundIdle --snapshot, remote authority--> Interpolating
//!    ^                            ^   \                                   |      ^
//!    |                            |    `--local player drives-------------'      |
//!    `--object vanished           |                                              |
//!                                 Stale <--no snapshot within freshness window---'
//!                                   `---------------snapshot----------------------^
//! ```
//!
//! Every peer sitting in the vehicle streams its own snapshots. Only the
//! driver's stream (or a driverless one) moves the body; passengers only
//! report their seat, aim and fire. Sequence numbers are tracked per peer.
//!
//! Position is reconciled by steering velocity rather than writing
//! positions, with latency-scaled gains. Large divergence is treated as a
//! desync and warped away. Ancillary vehicle state (siren, horn, burnout,
//! destroyed) is applied only on flag edges.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use netsync_shared::{
    config::SyncConfig,
    ids::{LocalHandle, ModelId, NetworkId, PeerId, Seat, WeaponId},
    math::{Quat, Vec3},
    net::{sequence_greater_than, VehicleFlags, VehicleSnapshot},
};
use tokio::sync::oneshot::{self, error::TryRecvError};
use tracing::{debug, warn};

use crate::{
    authority::{self, Authority, EntryPlan},
    engine::{EngineEffects, LocalPlayer, TaskRequest, Transform, VehicleEffect},
    error::SyncError,
    registry::EntityRegistry,
    weapons::{WeaponCatalog, WeaponInputs, WeaponSync},
};

/// Horn press long enough to outlast any snapshot gap.
const HORN_HOLD_MS: u32 = 99_999;
/// Below this reported speed an exiting occupant opens the door and steps out.
const CALM_EXIT_SPEED: f32 = 1.0;

/// Body flags applied to the engine on edges only.
const EDGE_FLAGS: VehicleFlags = VehicleFlags::SIREN
    .union(VehicleFlags::HORN)
    .union(VehicleFlags::BURNOUT)
    .union(VehicleFlags::DESTROYED);

/// Lifecycle of a synchronized vehicle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    /// No local object yet.
    Unbound,
    /// Local object exists but is not being driven from the network.
    BoundIdle,
    /// Network snapshots drive the local object.
    Interpolating,
    /// Snapshots stopped arriving; pose is frozen.
    Stale,
}

/// Last authoritative body state of a vehicle, as reported by whoever
/// drives it.
#[derive(Debug, Clone)]
pub struct RemoteVehicleState {
    pub net_id: NetworkId,
    pub model: ModelId,
    /// Peer whose snapshots last moved the body.
    pub peer: PeerId,
    pub handle: Option<LocalHandle>,
    pub position: Vec3,
    /// Position from the body snapshot before the latest one.
    pub last_position: Option<Vec3>,
    pub rotation: Quat,
    /// Euler degrees as received; weapons aim along it.
    pub rotation_euler: Vec3,
    pub last_rotation: Option<Quat>,
    pub velocity: Vec3,
    pub speed: f32,
    pub last_speed: f32,
    pub engine_health: f32,
    pub rpm: f32,
    pub steering: f32,
    pub flags: VehicleFlags,
    /// Sequence of the last snapshot that moved the body.
    pub sequence: Option<u16>,
    pub updated_at: Option<Instant>,
}

impl RemoteVehicleState {
    fn new(net_id: NetworkId, model: ModelId, peer: PeerId) -> Self {
        Self {
            net_id,
            model,
            peer,
            handle: None,
            position: Vec3::ZERO,
            last_position: None,
            rotation: Quat::IDENTITY,
            rotation_euler: Vec3::ZERO,
            last_rotation: None,
            velocity: Vec3::ZERO,
            speed: 0.0,
            last_speed: 0.0,
            engine_health: 1000.0,
            rpm: 0.0,
            steering: 0.0,
            flags: VehicleFlags::empty(),
            sequence: None,
            updated_at: None,
        }
    }
}

/// What one peer last reported about its place in the vehicle.
#[derive(Debug, Clone)]
pub struct OccupantState {
    pub peer: PeerId,
    pub character: Option<NetworkId>,
    pub seat: Option<Seat>,
    pub flags: VehicleFlags,
    pub weapon: WeaponId,
    pub aim: Vec3,
    /// Newest sequence accepted from this peer.
    pub sequence: u16,
}

#[derive(Debug)]
struct Occupant {
    state: OccupantState,
    /// Character's local handle, resolved every tick.
    handle: Option<LocalHandle>,
    /// Seat the character was placed in locally.
    seated_in: Option<Seat>,
    exiting: bool,
    weapons: WeaponSync,
}

impl Occupant {
    fn new(snap: &VehicleSnapshot) -> Self {
        Self {
            state: OccupantState {
                peer: snap.peer,
                character: snap.occupant,
                seat: snap.seat,
                flags: snap.flags,
                weapon: snap.weapon,
                aim: snap.aim,
                sequence: snap.sequence,
            },
            handle: None,
            seated_in: None,
            exiting: false,
            weapons: WeaponSync::default(),
        }
    }

    fn is_driver(&self) -> bool {
        self.state.seat == Some(Seat::Driver)
    }

    fn weapon_inputs<'a>(
        &self,
        ctx: &TickContext<'a>,
        vehicle: LocalHandle,
        body: &RemoteVehicleState,
    ) -> WeaponInputs<'a> {
        WeaponInputs {
            now: ctx.now,
            engine: ctx.engine,
            catalog: ctx.catalog,
            cfg: ctx.cfg,
            vehicle,
            model: body.model,
            seat: self.state.seat,
            ped: self.handle,
            flags: self.state.flags,
            weapon: self.state.weapon,
            aim: self.state.aim,
            rotation: body.rotation_euler,
            friendly: ctx.friendly.contains(&self.state.peer),
        }
    }
}

/// A snapshot from the driver, or from nobody in particular, moves the body.
fn drives_body(seat: Option<Seat>) -> bool {
    matches!(seat, None | Some(Seat::Driver))
}

/// How far ahead of `now` an interpolation leg ends.
fn lead_time(latency_ms: f32) -> Duration {
    Duration::try_from_secs_f32(latency_ms / 1000.0).unwrap_or(Duration::ZERO)
}

/// Current interpolation leg: from where the local object was when the
/// snapshot arrived toward the snapshot position.
#[derive(Debug, Clone, Copy, Default)]
struct Interpolation {
    start: Vec3,
    /// `None` once interpolation was aborted by a warp.
    finish: Option<Instant>,
}

impl Interpolation {
    fn active(&self) -> bool {
        self.finish.is_some()
    }

    fn abort(&mut self) {
        self.finish = None;
    }
}

/// Last continuous values written, so unchanged values are not re-sent.
#[derive(Debug, Clone, Copy, Default)]
struct Written {
    health: Option<f32>,
    rpm: Option<f32>,
    steering: Option<f32>,
    brake_lights: Option<bool>,
}

/// Everything a tick reads besides the vehicle's own state.
pub struct TickContext<'a> {
    pub now: Instant,
    pub engine: &'a dyn EngineEffects,
    pub registry: &'a EntityRegistry,
    pub catalog: &'a dyn WeaponCatalog,
    pub cfg: &'a SyncConfig,
    pub player: &'a LocalPlayer,
    /// Smoothed round trip of the peer driving the body, in milliseconds.
    pub latency_ms: f32,
    /// Non-hostile peers; their shots do no damage.
    pub friendly: &'a HashSet<PeerId>,
}

/// Outcome of the divergence guard.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Guard {
    Clear,
    Warped,
    ForcedZ,
}

type Materialized = oneshot::Receiver<Result<LocalHandle, SyncError>>;

/// Drives one remote vehicle.
#[derive(Debug)]
pub struct VehicleSync {
    state: RemoteVehicleState,
    phase: SyncState,
    interp: Interpolation,
    /// Edge flags as last applied to the engine.
    applied: VehicleFlags,
    written: Written,
    occupants: BTreeMap<PeerId, Occupant>,
    /// Interpolation waits until this long after seating.
    settled_at: Option<Instant>,
    /// Last tick spent velocity blending.
    last_moving_at: Option<Instant>,
    /// Start of the current post-stop glide.
    glide_from: Option<Vec3>,
    force_z_ticks: u32,
    frozen_at: Option<Vec3>,
    /// Object creation running in the background.
    pending: Option<Materialized>,
}

impl VehicleSync {
    pub fn new(net_id: NetworkId, model: ModelId, peer: PeerId) -> Self {
        Self {
            state: RemoteVehicleState::new(net_id, model, peer),
            phase: SyncState::Unbound,
            interp: Interpolation::default(),
            applied: VehicleFlags::empty(),
            written: Written::default(),
            occupants: BTreeMap::new(),
            settled_at: None,
            last_moving_at: None,
            glide_from: None,
            force_z_ticks: 0,
            frozen_at: None,
            pending: None,
        }
    }

    pub fn net_id(&self) -> NetworkId {
        self.state.net_id
    }

    /// Peer driving the body.
    pub fn peer(&self) -> PeerId {
        self.state.peer
    }

    pub fn handle(&self) -> Option<LocalHandle> {
        self.state.handle
    }

    pub fn phase(&self) -> SyncState {
        self.phase
    }

    pub fn state(&self) -> &RemoteVehicleState {
        &self.state
    }

    pub fn occupant(&self, peer: PeerId) -> Option<&OccupantState> {
        self.occupants.get(&peer).map(|o| &o.state)
    }

    /// Whether the local object is still being created.
    pub fn is_binding(&self) -> bool {
        self.pending.is_some()
    }

    /// Forgets a peer that moved to another vehicle.
    pub fn remove_occupant(&mut self, peer: PeerId) -> bool {
        self.occupants.remove(&peer).is_some()
    }

    /// Records a snapshot from one peer.
    ///
    /// Returns `false` if the snapshot is older than one already applied
    /// from the same peer.
    pub fn apply_snapshot(
        &mut self,
        snap: &VehicleSnapshot,
        now: Instant,
        engine: &dyn EngineEffects,
        latency_ms: f32,
    ) -> bool {
        if let Some(occ) = self.occupants.get(&snap.peer) {
            let last = occ.state.sequence;
            if !sequence_greater_than(snap.sequence, last) {
                debug!(net_id = %snap.vehicle, peer = snap.peer.0, seq = snap.sequence, last, "dropping out-of-order snapshot");
                return false;
            }
        }
        self.record_occupant(snap);
        self.state.model = snap.model;

        if drives_body(snap.seat) {
            self.apply_body(snap, now, engine, latency_ms);
        } else if self.state.updated_at.is_none() {
            // Nobody has driven it yet: create it where the passenger sees it.
            self.state.position = snap.position;
            self.state.rotation_euler = snap.rotation;
            self.state.rotation = Quat::from_euler_degrees(snap.rotation);
        }
        true
    }

    fn record_occupant(&mut self, snap: &VehicleSnapshot) {
        if let Some(seat) = snap.seat {
            // A seat holds one character; whoever reported it last has it.
            for (peer, other) in self.occupants.iter_mut() {
                if *peer != snap.peer && other.state.seat == Some(seat) {
                    other.state.seat = None;
                    other.seated_in = None;
                }
            }
        }

        let occ = self
            .occupants
            .entry(snap.peer)
            .or_insert_with(|| Occupant::new(snap));
        let s = &mut occ.state;
        if s.character != snap.occupant {
            occ.seated_in = None;
            occ.weapons.mark_dirty();
        }
        s.character = snap.occupant;
        s.seat = snap.seat;
        s.flags = snap.flags;
        s.weapon = snap.weapon;
        s.aim = snap.aim;
        s.sequence = snap.sequence;
    }

    fn apply_body(
        &mut self,
        snap: &VehicleSnapshot,
        now: Instant,
        engine: &dyn EngineEffects,
        latency_ms: f32,
    ) {
        let s = &mut self.state;
        if s.updated_at.is_some() {
            s.last_position = Some(s.position);
            s.last_rotation = Some(s.rotation);
            s.last_speed = s.speed;
        }
        s.peer = snap.peer;
        s.position = snap.position;
        s.rotation_euler = snap.rotation;
        s.rotation = Quat::from_euler_degrees(snap.rotation);
        s.velocity = snap.velocity;
        s.speed = snap.speed();
        s.engine_health = snap.engine_health;
        s.rpm = snap.rpm;
        s.steering = snap.steering;
        s.flags = snap.flags;
        s.sequence = Some(snap.sequence);
        s.updated_at = Some(now);

        let local = s
            .handle
            .and_then(|h| engine.transform(h))
            .map(|t| t.position);
        self.interp = Interpolation {
            start: local.unwrap_or(snap.position),
            finish: Some(now.checked_add(lead_time(latency_ms)).unwrap_or(now)),
        };

        if let Some(handle) = self.state.handle {
            self.enter_driven_phase(handle, &engine.local_player());
        }
    }

    fn enter_driven_phase(&mut self, handle: LocalHandle, player: &LocalPlayer) {
        self.phase = match authority::resolve(handle, player) {
            Authority::Local => SyncState::BoundIdle,
            Authority::Remote => SyncState::Interpolating,
        };
        self.frozen_at = None;
    }

    fn resolve_occupants(&mut self, registry: &EntityRegistry) {
        for occ in self.occupants.values_mut() {
            occ.handle = occ.state.character.and_then(|c| registry.resolve_local(c));
        }
    }

    /// Makes sure a local object exists for this vehicle and the remote
    /// occupants sit in it.
    ///
    /// Creating the object may wait for a model to stream in, so it runs
    /// as a background task; later calls pick up the result. Returns the
    /// creation error once, when the task gave up.
    pub fn ensure_bound(
        &mut self,
        registry: &Arc<EntityRegistry>,
        engine: &dyn EngineEffects,
        now: Instant,
    ) -> Result<(), SyncError> {
        let player = engine.local_player();
        self.resolve_occupants(registry);

        if let Some(vehicle) = self.state.handle {
            if self.warp_local_to_driver(engine, vehicle, &player) {
                return Ok(());
            }
        }

        let net_id = self.state.net_id;
        let still_bound = self.state.handle.is_some_and(|h| {
            registry.resolve_network(h) == Some(net_id) && engine.transform(h).is_some()
        });
        if still_bound {
            if let Some(vehicle) = self.state.handle {
                self.seat_occupants(engine, vehicle, now);
            }
            return Ok(());
        }

        match self.pending.as_mut().map(|rx| rx.try_recv()) {
            Some(Err(TryRecvError::Empty)) => return Ok(()),
            Some(Ok(result)) => {
                self.pending = None;
                let handle = result?;
                self.bind_local(handle, engine, &player, now);
                return Ok(());
            }
            Some(Err(TryRecvError::Closed)) => {
                warn!(net_id = %net_id, "materialization task went away");
                self.pending = None;
            }
            None => {}
        }

        let existing = registry
            .resolve_local(net_id)
            .filter(|h| engine.transform(*h).is_some());
        match existing {
            Some(handle) => self.bind_local(handle, engine, &player, now),
            None => self.start_materialization(registry),
        }
        Ok(())
    }

    fn start_materialization(&mut self, registry: &Arc<EntityRegistry>) {
        let (tx, rx) = oneshot::channel();
        let registry = Arc::clone(registry);
        let s = &self.state;
        let (net, model, position, rotation) = (s.net_id, s.model, s.position, s.rotation_euler);

        debug!(%net, model = model.0, "materializing vehicle");
        tokio::spawn(async move {
            let result = registry
                .materialize_vehicle(model, position, rotation, net)
                .await;
            if let Err(Ok(handle)) = tx.send(result) {
                // The vehicle was dropped while its model loaded.
                registry.discard(net, handle);
            }
        });
        self.pending = Some(rx);
    }

    fn bind_local(
        &mut self,
        handle: LocalHandle,
        engine: &dyn EngineEffects,
        player: &LocalPlayer,
        now: Instant,
    ) {
        self.state.handle = Some(handle);
        self.applied = VehicleFlags::empty();
        self.written = Written::default();
        self.force_z_ticks = 0;
        self.settled_at = Some(now);
        for occ in self.occupants.values_mut() {
            occ.seated_in = None;
        }

        engine.vehicle_effect(handle, VehicleEffect::EngineRunning(true));
        engine.set_invincible(handle, true);
        if engine.is_helicopter(self.state.model) {
            engine.vehicle_effect(handle, VehicleEffect::HeliBladesFullSpeed);
        }
        self.seat_occupants(engine, handle, now);
        self.enter_driven_phase(handle, player);
    }

    /// Swaps seats in place when the local player claims the driver seat
    /// from the front passenger seat. Returns true if it did.
    fn warp_local_to_driver(
        &mut self,
        engine: &dyn EngineEffects,
        vehicle: LocalHandle,
        player: &LocalPlayer,
    ) -> bool {
        let Some(driver) = self.occupants.values_mut().find(|o| o.is_driver()) else {
            return false;
        };
        let plan = authority::plan_entry(
            vehicle,
            driver.state.seat,
            driver.seated_in.is_some(),
            player,
        );
        if plan != EntryPlan::WarpLocalToDriver {
            return false;
        }
        if let (Some(ped), Some(local_ped)) = (driver.handle, player.ped) {
            engine.request_task(ped, TaskRequest::WarpOutOfVehicle { vehicle });
            engine.request_task(
                local_ped,
                TaskRequest::WarpIntoVehicle {
                    vehicle,
                    seat: Seat::Driver,
                },
            );
            driver.seated_in = None;
            debug!(net_id = %self.state.net_id, "local player re-entered as driver");
        }
        true
    }

    fn seat_occupants(&mut self, engine: &dyn EngineEffects, vehicle: LocalHandle, now: Instant) {
        for occ in self.occupants.values_mut() {
            let flags = occ.state.flags;
            if flags.contains(VehicleFlags::EXITING) || occ.seated_in == occ.state.seat {
                continue;
            }
            let (Some(ped), Some(seat)) = (occ.handle, occ.state.seat) else {
                occ.seated_in = None;
                continue;
            };
            let task = if flags.contains(VehicleFlags::ENTERING) {
                TaskRequest::EnterVehicle { vehicle, seat }
            } else {
                TaskRequest::SetIntoVehicle { vehicle, seat }
            };
            engine.request_task(ped, task);
            occ.seated_in = Some(seat);
            if seat == Seat::Driver {
                self.settled_at = Some(now);
            }
        }
    }

    /// Advances reconciliation by one simulation tick.
    pub fn tick(&mut self, ctx: &TickContext<'_>) {
        let Some(handle) = self.state.handle else { return };
        let Some(current) = ctx.engine.transform(handle) else {
            warn!(net_id = %self.state.net_id, %handle, "local vehicle vanished");
            self.state.handle = None;
            self.phase = SyncState::Unbound;
            return;
        };
        self.resolve_occupants(ctx.registry);

        for occ in self.occupants.values_mut() {
            let inputs = occ.weapon_inputs(ctx, handle, &self.state);
            occ.weapons.update_occupant(&inputs);
        }
        let driver_exiting = self.update_exits(ctx, handle);
        self.update_ancillary(ctx, handle);

        if authority::resolve(handle, ctx.player) == Authority::Local {
            // The local player drives: the body is theirs, everything
            // around it still follows the network.
            self.phase = SyncState::BoundIdle;
            return;
        }
        if self.phase == SyncState::BoundIdle {
            // Authority just came back from the local player.
            self.enter_driven_phase(handle, ctx.player);
        }
        if driver_exiting {
            return;
        }

        if self.is_stale(ctx) {
            if self.frozen_at.is_none() {
                debug!(net_id = %self.state.net_id, "no fresh snapshot; freezing pose");
            }
            let frozen = *self.frozen_at.get_or_insert(current.position);
            self.phase = SyncState::Stale;
            ctx.engine.set_position(handle, frozen);
            ctx.engine.set_velocity(handle, Vec3::ZERO);
        } else {
            self.update_position(ctx, handle, &current);
            self.update_rotation(ctx, handle);
        }

        for occ in self.occupants.values_mut() {
            let inputs = occ.weapon_inputs(ctx, handle, &self.state);
            occ.weapons.update_driver_mounted(&inputs);
        }
    }

    /// Handles occupants leaving. Returns true while the driver is exiting.
    fn update_exits(&mut self, ctx: &TickContext<'_>, vehicle: LocalHandle) -> bool {
        let calm = self.state.speed < CALM_EXIT_SPEED;
        let mut driver_exiting = false;

        for occ in self.occupants.values_mut() {
            let exiting = occ.state.flags.contains(VehicleFlags::EXITING);
            if exiting && !occ.exiting {
                if let Some(ped) = occ.handle {
                    ctx.engine.request_task(ped, TaskRequest::ClearAll);
                    if calm {
                        if let Some(seat) = occ.state.seat {
                            ctx.engine
                                .vehicle_effect(vehicle, VehicleEffect::OpenDoor(seat.door_index()));
                        }
                    }
                    ctx.engine.request_task(
                        ped,
                        TaskRequest::LeaveVehicle {
                            vehicle,
                            jump: !calm,
                        },
                    );
                }
                occ.seated_in = None;
            }
            if !exiting && occ.exiting {
                occ.weapons.mark_dirty();
            }
            occ.exiting = exiting;
            driver_exiting |= exiting && occ.is_driver();
        }
        driver_exiting
    }

    fn update_ancillary(&mut self, ctx: &TickContext<'_>, vehicle: LocalHandle) {
        let engine = ctx.engine;
        let s = &self.state;
        let changed = (s.flags ^ self.applied) & EDGE_FLAGS;

        if changed.contains(VehicleFlags::DESTROYED) {
            if s.flags.contains(VehicleFlags::DESTROYED) {
                engine.set_invincible(vehicle, false);
                engine.vehicle_effect(vehicle, VehicleEffect::Explode);
            } else {
                engine.set_invincible(vehicle, true);
                engine.vehicle_effect(vehicle, VehicleEffect::Repair);
            }
        }

        if changed.contains(VehicleFlags::SIREN) {
            engine.vehicle_effect(
                vehicle,
                VehicleEffect::Siren(s.flags.contains(VehicleFlags::SIREN)),
            );
        }

        if changed.contains(VehicleFlags::HORN) {
            let duration_ms = if s.flags.contains(VehicleFlags::HORN) {
                HORN_HOLD_MS
            } else {
                1
            };
            engine.vehicle_effect(vehicle, VehicleEffect::Horn { duration_ms });
        }

        if changed.contains(VehicleFlags::BURNOUT) {
            let on = s.flags.contains(VehicleFlags::BURNOUT);
            engine.vehicle_effect(vehicle, VehicleEffect::Burnout(on));
            let driver = self.occupants.values().find(|o| o.is_driver());
            if let Some(ped) = driver.and_then(|o| o.handle) {
                let task = if on {
                    TaskRequest::BurnoutAction { vehicle }
                } else {
                    TaskRequest::ClearAll
                };
                engine.request_task(ped, task);
            }
        }

        self.applied = s.flags & EDGE_FLAGS;

        let brake = s.speed > ctx.cfg.moving_speed && s.last_speed > s.speed;
        let (health, rpm, steering) = (s.engine_health, s.rpm, s.steering);
        let w = &mut self.written;
        if w.health != Some(health) {
            engine.vehicle_effect(vehicle, VehicleEffect::EngineHealth(health));
            w.health = Some(health);
        }
        if w.brake_lights != Some(brake) {
            engine.vehicle_effect(vehicle, VehicleEffect::BrakeLights(brake));
            w.brake_lights = Some(brake);
        }
        if w.rpm != Some(rpm) {
            engine.vehicle_effect(vehicle, VehicleEffect::Rpm(rpm));
            w.rpm = Some(rpm);
        }
        if w.steering != Some(steering) {
            engine.vehicle_effect(vehicle, VehicleEffect::Steering(steering.to_radians()));
            w.steering = Some(steering);
        }
    }

    /// Freshness window grows with latency, within configured bounds.
    fn freshness_window(&self, ctx: &TickContext<'_>) -> Duration {
        let scaled = (ctx.latency_ms.max(0.0) * ctx.cfg.stale_latency_factor) as u64;
        let ms = scaled.clamp(ctx.cfg.stale_min_ms, ctx.cfg.stale_max_ms.max(ctx.cfg.stale_min_ms));
        Duration::from_millis(ms)
    }

    fn is_stale(&self, ctx: &TickContext<'_>) -> bool {
        match self.state.updated_at {
            Some(t) => ctx.now.saturating_duration_since(t) > self.freshness_window(ctx),
            None => true,
        }
    }

    fn settled(&self, ctx: &TickContext<'_>) -> bool {
        self.settled_at.is_some_and(|t| {
            ctx.now.saturating_duration_since(t) >= Duration::from_millis(ctx.cfg.settle_ms)
        })
    }

    fn update_position(&mut self, ctx: &TickContext<'_>, handle: LocalHandle, current: &Transform) {
        let s = &self.state;
        let moving = s.speed > ctx.cfg.moving_speed || s.flags.contains(VehicleFlags::BURNOUT);
        let settled = self.settled(ctx);
        let has_history = s.last_position.is_some();

        if moving && self.interp.active() && has_history && settled {
            self.blend_velocity(ctx, handle, current);
            self.last_moving_at = Some(ctx.now);
            self.glide_from = None;
            return;
        }

        let glide_window = Duration::from_millis(ctx.cfg.glide_ms);
        let gliding = self.last_moving_at.and_then(|t| {
            let elapsed = ctx.now.saturating_duration_since(t);
            (elapsed <= glide_window).then_some(elapsed)
        });
        let target = match (gliding, s.last_position) {
            (Some(elapsed), Some(last)) if settled && self.interp.active() => {
                // Glide toward where the vehicle would be had it kept its
                // last displacement, instead of extrapolating without bound.
                let from = *self.glide_from.get_or_insert(current.position);
                let ahead = s.position + (s.position - last);
                let t = elapsed.as_secs_f32() / glide_window.as_secs_f32().max(f32::EPSILON);
                from.lerp(ahead, t)
            }
            _ => {
                self.glide_from = None;
                s.position
            }
        };
        ctx.engine.set_position(handle, target);
        ctx.engine.set_velocity(handle, s.velocity);
    }

    fn blend_velocity(&mut self, ctx: &TickContext<'_>, handle: LocalHandle, current: &Transform) {
        if self.divergence_guard(ctx, handle, current) == Guard::Warped {
            ctx.engine.set_velocity(handle, self.state.velocity);
            return;
        }

        let s = &self.state;
        let delta = s.position - self.interp.start;
        let latency = ctx.latency_ms.max(0.0);
        let pos_force = 1.10 + (latency / 2500.0).sqrt() + s.speed / 250.0;
        let vel_force = 0.97 + (latency / 5000.0).sqrt() + s.speed / 750.0;

        let velocity = if current.velocity.len() > s.velocity.len() {
            // Already faster than the sample: settle onto its velocity.
            s.velocity * vel_force + delta * 3.0
        } else {
            s.velocity * (vel_force - 0.20) + delta * pos_force
        };
        ctx.engine.set_velocity(handle, velocity);
    }

    /// Hard-warps on gross divergence and un-sinks vehicles that drifted
    /// under the remote's ground height.
    fn divergence_guard(&mut self, ctx: &TickContext<'_>, handle: LocalHandle, current: &Transform) -> Guard {
        let cfg = ctx.cfg;
        let s = &self.state;

        let threshold = cfg.warp_threshold + cfg.warp_threshold_per_speed * s.speed;
        if current.position.distance_sq(s.position) > threshold * threshold {
            debug!(net_id = %s.net_id, "desync detected; hard warp");
            self.interp.abort();
            ctx.engine.set_position(handle, s.position);
            return Guard::Warped;
        }

        let mut below = false;
        if !ctx.engine.is_aircraft(s.model) {
            let dz = s.position.z - current.position.z;
            below = dz > cfg.force_z_min_delta
                && dz < cfg.force_z_max_delta
                && s.velocity.z.abs() < cfg.force_z_max_vertical_speed;
        }

        if !below {
            self.force_z_ticks = 0;
            return Guard::Clear;
        }
        self.force_z_ticks += 1;
        if self.force_z_ticks >= cfg.force_z_ticks {
            ctx.engine
                .set_position(handle, current.position.with_z(s.position.z));
            self.interp.abort();
            return Guard::ForcedZ;
        }
        Guard::Clear
    }

    fn update_rotation(&self, ctx: &TickContext<'_>, handle: LocalHandle) {
        let s = &self.state;
        let rotation = match s.last_rotation {
            Some(prev)
                if prev.angle_to_degrees(s.rotation) > ctx.cfg.rotation_snap_deg
                    && self.settled(ctx) =>
            {
                let since_ms = s
                    .updated_at
                    .map(|t| ctx.now.saturating_duration_since(t).as_secs_f32() * 1000.0)
                    .unwrap_or(0.0);
                let cap = ctx.cfg.rotation_catchup_cap;
                let t = if ctx.latency_ms > f32::EPSILON {
                    (since_ms / ctx.latency_ms).min(cap)
                } else {
                    cap
                };
                prev.slerp(s.rotation, t)
            }
            _ => s.rotation,
        };
        ctx.engine.set_rotation(handle, rotation);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{EffectRecord, HeadlessEngine};
    use crate::weapons::Unarmed;

    const CAR: ModelId = ModelId(0x4E0C_F6CA);
    const NET: NetworkId = NetworkId(42);
    const GUNNER: NetworkId = NetworkId(901);
    const TICK: Duration = Duration::from_millis(16);

    /// A car with a roof gun worked from the front passenger seat.
    struct RoofGun;

    impl WeaponCatalog for RoofGun {
        fn seat_has_turret(&self, _vehicle: ModelId, seat: Seat) -> bool {
            seat == Seat::Passenger(0)
        }
        fn has_mounted_guns(&self, _vehicle: ModelId) -> bool {
            false
        }
        fn muzzle_offset(&self, _vehicle: ModelId, _rocket: bool) -> Vec3 {
            Vec3::new(0.0, 0.0, 1.5)
        }
        fn has_parallel_weapon(&self, _vehicle: ModelId, _rocket: bool) -> bool {
            false
        }
        fn muzzle_differs_from_gun_position(&self, _vehicle: ModelId) -> bool {
            false
        }
        fn turret_length(&self, _vehicle: ModelId) -> f32 {
            1.0
        }
        fn is_heavy_turret(&self, _vehicle: ModelId) -> bool {
            false
        }
        fn turret_weapon(&self, _vehicle: ModelId) -> WeaponId {
            WeaponId(0x1B06_D571)
        }
        fn turret_damage(&self, _vehicle: ModelId) -> i32 {
            40
        }
        fn is_rocket(&self, _weapon: WeaponId) -> bool {
            false
        }
        fn mounted_weapon(&self, _vehicle: ModelId, current: WeaponId, _rocket: bool) -> WeaponId {
            current
        }
        fn needs_fake_bullets(&self, _weapon: WeaponId) -> bool {
            false
        }
        fn weapon_damage(&self, _weapon: WeaponId) -> i32 {
            0
        }
    }

    struct Rig {
        engine: Arc<HeadlessEngine>,
        registry: Arc<EntityRegistry>,
        catalog: Box<dyn WeaponCatalog>,
        cfg: SyncConfig,
        sync: VehicleSync,
        player: LocalPlayer,
        friendly: HashSet<PeerId>,
        t0: Instant,
        seq: u16,
        latency_ms: f32,
    }

    impl Rig {
        fn new(cfg: SyncConfig) -> Self {
            let engine = Arc::new(HeadlessEngine::new());
            let registry = Arc::new(EntityRegistry::new(engine.clone(), &cfg));
            Self {
                engine,
                registry,
                catalog: Box::new(Unarmed),
                cfg,
                sync: VehicleSync::new(NET, CAR, PeerId(1)),
                player: LocalPlayer::default(),
                friendly: HashSet::new(),
                t0: Instant::now(),
                seq: 0,
                latency_ms: 100.0,
            }
        }

        fn settled() -> Self {
            Self::new(SyncConfig {
                settle_ms: 0,
                ..SyncConfig::default()
            })
        }

        /// Spawns the local object ahead of time at `at`.
        fn prebind(&self, at: Vec3) -> LocalHandle {
            self.engine.request_model(CAR);
            let h = self.engine.spawn_vehicle(CAR, at, 0.0).unwrap();
            self.registry.bind(NET, h);
            h
        }

        fn snap(&mut self, position: Vec3, velocity: Vec3, flags: VehicleFlags) -> VehicleSnapshot {
            self.seq = self.seq.wrapping_add(1);
            let mut s = VehicleSnapshot::new(NET, CAR, PeerId(1));
            s.position = position;
            s.velocity = velocity;
            s.flags = flags;
            s.sequence = self.seq;
            s
        }

        fn turned(&mut self, yaw: f32) -> VehicleSnapshot {
            let mut s = self.snap(Vec3::ZERO, Vec3::ZERO, VehicleFlags::empty());
            s.rotation = Vec3::new(0.0, 0.0, yaw);
            s
        }

        async fn feed(&mut self, snap: VehicleSnapshot, at: Instant) {
            let engine: &dyn EngineEffects = &*self.engine;
            assert!(self.sync.apply_snapshot(&snap, at, engine, self.latency_ms));
            self.bind(at).await;
        }

        /// Runs `ensure_bound` until any background creation has landed.
        async fn bind(&mut self, at: Instant) {
            self.sync
                .ensure_bound(&self.registry, &*self.engine, at)
                .unwrap();
            while self.sync.is_binding() {
                tokio::task::yield_now().await;
                self.sync
                    .ensure_bound(&self.registry, &*self.engine, at)
                    .unwrap();
            }
        }

        fn tick(&mut self, at: Instant) {
            let ctx = TickContext {
                now: at,
                engine: &*self.engine,
                registry: &self.registry,
                catalog: &*self.catalog,
                cfg: &self.cfg,
                player: &self.player,
                latency_ms: self.latency_ms,
                friendly: &self.friendly,
            };
            self.sync.tick(&ctx);
        }

        fn pos(&self) -> Vec3 {
            self.engine
                .transform(self.sync.handle().unwrap())
                .unwrap()
                .position
        }

        fn rotation(&self) -> Quat {
            self.engine
                .transform(self.sync.handle().unwrap())
                .unwrap()
                .rotation
        }
    }

    fn yaw(deg: f32) -> Quat {
        Quat::from_euler_degrees(Vec3::new(0.0, 0.0, deg))
    }

    #[tokio::test]
    async fn first_snapshot_materializes_and_interpolates() {
        let mut rig = Rig::settled();
        assert_eq!(rig.sync.phase(), SyncState::Unbound);
        let s = rig.snap(Vec3::new(5.0, 5.0, 0.0), Vec3::ZERO, VehicleFlags::empty());
        let t0 = rig.t0;
        rig.feed(s, t0).await;

        let h = rig.sync.handle().unwrap();
        assert_eq!(rig.registry.resolve_local(NET), Some(h));
        assert_eq!(rig.sync.phase(), SyncState::Interpolating);
    }

    #[tokio::test]
    async fn binding_waits_for_creation_without_blocking() {
        let mut rig = Rig::settled();
        let t0 = rig.t0;
        let s = rig.snap(Vec3::ZERO, Vec3::ZERO, VehicleFlags::empty());
        let engine: &dyn EngineEffects = &*rig.engine;
        assert!(rig.sync.apply_snapshot(&s, t0, engine, 0.0));

        // Creation is handed off; nothing is bound until it reports back.
        rig.sync.ensure_bound(&rig.registry, &*rig.engine, t0).unwrap();
        assert!(rig.sync.is_binding());
        assert_eq!(rig.sync.phase(), SyncState::Unbound);

        rig.bind(t0).await;
        assert!(!rig.sync.is_binding());
        assert_eq!(rig.registry.resolve_local(NET), rig.sync.handle());
    }

    #[tokio::test]
    async fn dropped_sync_discards_late_object() {
        let mut rig = Rig::settled();
        let t0 = rig.t0;
        let s = rig.snap(Vec3::ZERO, Vec3::ZERO, VehicleFlags::empty());
        let engine: &dyn EngineEffects = &*rig.engine;
        rig.sync.apply_snapshot(&s, t0, engine, 0.0);
        rig.sync.ensure_bound(&rig.registry, &*rig.engine, t0).unwrap();

        rig.sync = VehicleSync::new(NET, CAR, PeerId(1));
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        assert!(rig.registry.is_empty());
        assert_eq!(rig.engine.object_count(), 0);
    }

    #[tokio::test]
    async fn out_of_order_snapshot_is_dropped() {
        let mut rig = Rig::settled();
        let t0 = rig.t0;
        let newer = rig.snap(Vec3::new(1.0, 0.0, 0.0), Vec3::ZERO, VehicleFlags::empty());
        let mut older = newer.clone();
        older.sequence = newer.sequence.wrapping_sub(1);
        rig.feed(newer, t0).await;

        let engine: &dyn EngineEffects = &*rig.engine;
        assert!(!rig.sync.apply_snapshot(&older, t0, engine, 0.0));
        assert_eq!(rig.sync.state().position, Vec3::new(1.0, 0.0, 0.0));
    }

    #[tokio::test]
    async fn passenger_stream_never_moves_the_body() {
        let mut rig = Rig::settled();
        let t0 = rig.t0;
        let mut drive = rig.snap(Vec3::new(10.0, 0.0, 0.0), Vec3::ZERO, VehicleFlags::empty());
        drive.seat = Some(Seat::Driver);
        drive.sequence = 500;
        rig.feed(drive.clone(), t0).await;

        let engine: &dyn EngineEffects = &*rig.engine;
        let mut ride = VehicleSnapshot::new(NET, CAR, PeerId(2));
        ride.position = Vec3::new(-50.0, 0.0, 0.0);
        ride.seat = Some(Seat::Passenger(0));
        ride.flags = VehicleFlags::AIMING;
        ride.sequence = 501;
        assert!(rig.sync.apply_snapshot(&ride, t0, engine, 0.0));
        assert_eq!(rig.sync.state().position, Vec3::new(10.0, 0.0, 0.0));
        assert_eq!(rig.sync.peer(), PeerId(1));
        let seen = rig.sync.occupant(PeerId(2)).unwrap();
        assert_eq!(seen.seat, Some(Seat::Passenger(0)));
        assert!(seen.flags.contains(VehicleFlags::AIMING));

        // Each peer counts on its own.
        let mut rear = VehicleSnapshot::new(NET, CAR, PeerId(3));
        rear.seat = Some(Seat::Passenger(1));
        rear.sequence = 7;
        assert!(rig.sync.apply_snapshot(&rear, t0, engine, 0.0));
        drive.sequence = 499;
        assert!(!rig.sync.apply_snapshot(&drive, t0, engine, 0.0));

        rig.tick(t0);
        assert_eq!(rig.pos(), Vec3::new(10.0, 0.0, 0.0));
    }

    #[tokio::test]
    async fn new_driver_takes_the_seat_from_the_old_one() {
        let mut rig = Rig::settled();
        let t0 = rig.t0;
        let mut first = rig.snap(Vec3::ZERO, Vec3::ZERO, VehicleFlags::empty());
        first.seat = Some(Seat::Driver);
        rig.feed(first, t0).await;

        let mut second = VehicleSnapshot::new(NET, CAR, PeerId(2));
        second.position = Vec3::new(4.0, 0.0, 0.0);
        second.seat = Some(Seat::Driver);
        second.sequence = 1;
        rig.feed(second, t0 + TICK).await;

        assert_eq!(rig.sync.peer(), PeerId(2));
        assert_eq!(rig.sync.occupant(PeerId(1)).unwrap().seat, None);
        assert_eq!(rig.sync.state().position, Vec3::new(4.0, 0.0, 0.0));
        assert!(rig.sync.remove_occupant(PeerId(1)));
        assert!(rig.sync.occupant(PeerId(1)).is_none());
    }

    #[tokio::test]
    async fn absurd_latency_does_not_break_the_leg() {
        let mut rig = Rig::settled();
        rig.prebind(Vec3::ZERO);
        let mut now = rig.t0;
        let vel = Vec3::new(10.0, 0.0, 0.0);

        for latency in [1e30, f32::INFINITY, f32::NAN, -5.0] {
            rig.latency_ms = latency;
            let s = rig.snap(Vec3::new(0.5, 0.0, 0.0), vel, VehicleFlags::empty());
            rig.feed(s, now).await;
            rig.tick(now);
            now += TICK;
        }
        assert_eq!(rig.sync.phase(), SyncState::Interpolating);
        let p = rig.pos();
        assert!(p.x.is_finite() && p.y.is_finite() && p.z.is_finite());
    }

    #[tokio::test]
    async fn stationary_target_converges_monotonically() {
        let mut rig = Rig::settled();
        let target = Vec3::new(10.0, -4.0, 1.0);
        rig.prebind(Vec3::new(0.0, 0.0, 1.0));

        let mut now = rig.t0;
        let mut last = rig.pos().distance_sq(target);
        let mut reached = None;
        for i in 0..120 {
            let s = rig.snap(target, Vec3::ZERO, VehicleFlags::empty());
            rig.feed(s, now).await;
            rig.tick(now);
            rig.engine.step(TICK.as_secs_f32());

            let d = rig.pos().distance_sq(target);
            assert!(d <= last, "distance grew at tick {i}: {last} -> {d}");
            last = d;
            if d < 1e-6 && reached.is_none() {
                reached = Some(i);
            }
            now += TICK;
        }
        assert!(reached.is_some_and(|i| i < 60));
    }

    #[tokio::test]
    async fn moving_target_is_caught_by_velocity_blend() {
        let mut rig = Rig::settled();
        rig.prebind(Vec3::new(-8.0, 0.0, 0.0));
        let vel = Vec3::new(10.0, 0.0, 0.0);
        let mut now = rig.t0;

        // First sample only gives the blend its history.
        let s = rig.snap(Vec3::ZERO, vel, VehicleFlags::empty());
        rig.feed(s, now).await;

        let mut gaps = Vec::new();
        for k in 1..=300 {
            now += TICK;
            let target = Vec3::new(k as f32 * 0.16, 0.0, 0.0);
            let s = rig.snap(target, vel, VehicleFlags::empty());
            rig.feed(s, now).await;
            rig.tick(now);
            rig.engine.step(TICK.as_secs_f32());
            gaps.push(rig.pos().distance_sq(target).sqrt());
        }

        // Steered, not teleported: the first tick still leaves most of the gap.
        assert!(gaps[0] > 5.0, "first gap {}", gaps[0]);
        assert!(gaps[0] < 8.2);
        let tail = gaps[200..].iter().copied().fold(0.0_f32, f32::max);
        assert!(tail < 1.0, "did not settle behind the target: {tail}");
    }

    #[tokio::test]
    async fn glide_after_stop_is_bounded_and_monotonic() {
        let mut rig = Rig::settled();
        rig.prebind(Vec3::ZERO);
        let mut now = rig.t0;

        // Drive along +x for a while.
        let vel = Vec3::new(10.0, 0.0, 0.0);
        for i in 0..30 {
            let s = rig.snap(Vec3::new(i as f32 * 0.16, 0.0, 0.0), vel, VehicleFlags::empty());
            rig.feed(s, now).await;
            rig.tick(now);
            rig.engine.step(TICK.as_secs_f32());
            now += TICK;
        }

        // Stop at a fixed point and keep reporting it.
        let stop = Vec3::new(5.0, 0.0, 0.0);
        let mut last = f32::MAX;
        for _ in 0..90 {
            let s = rig.snap(stop, Vec3::ZERO, VehicleFlags::empty());
            rig.feed(s, now).await;
            rig.tick(now);
            rig.engine.step(TICK.as_secs_f32());
            let d = rig.pos().distance_sq(stop);
            assert!(d <= last + 1e-4);
            last = d;
            now += TICK;
        }
        assert!(last < 1e-6);
    }

    #[tokio::test]
    async fn gross_divergence_hard_warps() {
        let mut rig = Rig::settled();
        rig.prebind(Vec3::ZERO);
        let t0 = rig.t0;
        let vel = Vec3::new(10.0, 0.0, 0.0);

        let s = rig.snap(Vec3::new(1.0, 0.0, 0.0), vel, VehicleFlags::empty());
        rig.feed(s, t0).await;
        rig.tick(t0);

        let far = Vec3::new(1_000.0, 0.0, 0.0);
        let s = rig.snap(far, vel, VehicleFlags::empty());
        rig.feed(s, t0 + TICK).await;
        rig.tick(t0 + TICK);
        assert_eq!(rig.pos(), far);
    }

    #[tokio::test]
    async fn small_divergence_blends_velocity() {
        let mut rig = Rig::settled();
        rig.latency_ms = 0.0;
        rig.prebind(Vec3::ZERO);
        let t0 = rig.t0;
        let vel = Vec3::new(10.0, 0.0, 0.0);

        let s = rig.snap(Vec3::ZERO, vel, VehicleFlags::empty());
        rig.feed(s, t0).await;
        let s = rig.snap(Vec3::new(2.0, 0.0, 0.0), vel, VehicleFlags::empty());
        rig.feed(s, t0 + TICK).await;
        rig.tick(t0 + TICK);

        let h = rig.sync.handle().unwrap();
        let t = rig.engine.transform(h).unwrap();
        assert_eq!(t.position, Vec3::ZERO);
        // Local object at rest: velocity = v * (vel_force - 0.2) + delta * pos_force.
        let vel_force = 0.97 + 10.0 / 750.0;
        let pos_force = 1.10 + 10.0 / 250.0;
        let expected = 10.0 * (vel_force - 0.20) + 2.0 * pos_force;
        assert!((t.velocity.x - expected).abs() < 1e-4);
    }

    #[tokio::test]
    async fn small_turn_is_written_directly() {
        let mut rig = Rig::settled();
        rig.prebind(Vec3::ZERO);
        let t0 = rig.t0;
        let s = rig.turned(0.0);
        rig.feed(s, t0).await;
        let t1 = t0 + TICK;
        let s = rig.turned(0.5);
        rig.feed(s, t1).await;

        rig.tick(t1 + Duration::from_millis(50));
        assert_eq!(rig.rotation(), yaw(0.5));
    }

    #[tokio::test]
    async fn large_turn_slerps_by_elapsed_over_latency() {
        let mut rig = Rig::settled();
        rig.prebind(Vec3::ZERO);
        let t0 = rig.t0;
        let s = rig.turned(0.0);
        rig.feed(s, t0).await;
        let t1 = t0 + TICK;
        let s = rig.turned(40.0);
        rig.feed(s, t1).await;

        // Half the latency in: halfway between the two samples.
        rig.tick(t1 + Duration::from_millis(50));
        let got = rig.rotation();
        assert!(got.angle_to_degrees(yaw(20.0)) < 0.1, "{got:?}");
        assert!(got.angle_to_degrees(yaw(20.0)) < got.angle_to_degrees(yaw(40.0)));
    }

    #[tokio::test]
    async fn late_turn_extrapolates_up_to_the_cap() {
        let mut rig = Rig::settled();
        rig.prebind(Vec3::ZERO);
        let t0 = rig.t0;
        let s = rig.turned(0.0);
        rig.feed(s, t0).await;
        let t1 = t0 + TICK;
        let s = rig.turned(40.0);
        rig.feed(s, t1).await;

        // Three latencies late, but catch-up stops at 1.5.
        rig.tick(t1 + Duration::from_millis(300));
        let got = rig.rotation();
        assert!(got.angle_to_degrees(yaw(60.0)) < 0.1, "{got:?}");
    }

    #[tokio::test]
    async fn sunk_vehicle_is_lifted_after_consecutive_ticks() {
        let mut rig = Rig::settled();
        rig.prebind(Vec3::new(0.0, 0.0, 9.0));
        let mut now = rig.t0;
        let vel = Vec3::new(5.0, 0.0, 0.0);

        let s = rig.snap(Vec3::new(0.0, 0.0, 10.0), vel, VehicleFlags::empty());
        rig.feed(s, now).await;
        now += TICK;

        let s = rig.snap(Vec3::new(0.0, 0.0, 10.0), vel, VehicleFlags::empty());
        rig.feed(s, now).await;
        rig.tick(now);
        assert_eq!(rig.pos().z, 9.0);

        now += TICK;
        let s = rig.snap(Vec3::new(0.0, 0.0, 10.0), vel, VehicleFlags::empty());
        rig.feed(s, now).await;
        rig.tick(now);
        assert_eq!(rig.pos().z, 10.0);
    }

    #[tokio::test]
    async fn siren_effects_fire_on_edges_only() {
        let mut rig = Rig::settled();
        let mut now = rig.t0;
        for flags in [VehicleFlags::empty(), VehicleFlags::SIREN, VehicleFlags::empty()] {
            let s = rig.snap(Vec3::ZERO, Vec3::ZERO, flags);
            rig.feed(s, now).await;
            rig.tick(now);
            now += TICK;
        }
        // Holding a value produces no further calls.
        rig.tick(now);

        let sirens: Vec<_> = rig
            .engine
            .effects()
            .into_iter()
            .filter_map(|e| match e {
                EffectRecord::Vehicle(_, VehicleEffect::Siren(on)) => Some(on),
                _ => None,
            })
            .collect();
        assert_eq!(sirens, vec![true, false]);
    }

    #[tokio::test]
    async fn destroyed_edge_explodes_then_repairs() {
        let mut rig = Rig::settled();
        let mut now = rig.t0;
        for flags in [VehicleFlags::DESTROYED, VehicleFlags::DESTROYED, VehicleFlags::empty()] {
            let s = rig.snap(Vec3::ZERO, Vec3::ZERO, flags);
            rig.feed(s, now).await;
            rig.tick(now);
            now += TICK;
        }
        let fx: Vec<_> = rig
            .engine
            .effects()
            .into_iter()
            .filter(|e| {
                matches!(
                    e,
                    EffectRecord::Vehicle(_, VehicleEffect::Explode | VehicleEffect::Repair)
                )
            })
            .collect();
        let h = rig.sync.handle().unwrap();
        assert_eq!(
            fx,
            vec![
                EffectRecord::Vehicle(h, VehicleEffect::Explode),
                EffectRecord::Vehicle(h, VehicleEffect::Repair),
            ]
        );
        assert_eq!(rig.engine.is_invincible(h), Some(true));
    }

    #[tokio::test]
    async fn stale_vehicle_freezes_but_keeps_flags() {
        let mut rig = Rig::settled();
        rig.latency_ms = 50.0;
        rig.prebind(Vec3::ZERO);
        let mut now = rig.t0;
        let vel = Vec3::new(3.0, 0.0, 0.0);

        for i in 0..3 {
            let s = rig.snap(Vec3::new(i as f32 * 0.05, 0.0, 0.0), vel, VehicleFlags::SIREN);
            rig.feed(s, now).await;
            rig.tick(now);
            rig.engine.step(TICK.as_secs_f32());
            now += TICK;
        }

        // Well past the freshness window (50ms * 10, floored at 1s).
        now += Duration::from_millis(1_500);
        rig.tick(now);
        assert_eq!(rig.sync.phase(), SyncState::Stale);
        let frozen = rig.pos();

        for _ in 0..10 {
            rig.engine.step(TICK.as_secs_f32());
            now += TICK;
            rig.tick(now);
            assert_eq!(rig.pos(), frozen);
        }
        assert!(rig.sync.state().flags.contains(VehicleFlags::SIREN));
        let siren_calls = rig
            .engine
            .effects()
            .iter()
            .filter(|e| matches!(e, EffectRecord::Vehicle(_, VehicleEffect::Siren(_))))
            .count();
        assert_eq!(siren_calls, 1);

        // A fresh snapshot resumes interpolation.
        let s = rig.snap(Vec3::new(1.0, 0.0, 0.0), vel, VehicleFlags::SIREN);
        rig.feed(s, now).await;
        assert_eq!(rig.sync.phase(), SyncState::Interpolating);
    }

    #[tokio::test]
    async fn local_driver_suppresses_network_writes() {
        let mut rig = Rig::settled();
        let h = rig.prebind(Vec3::ZERO);
        let ped = rig.engine.spawn_ped(Vec3::ZERO);
        rig.player = LocalPlayer {
            ped: Some(ped),
            seated: Some((h, Seat::Driver)),
            entering: None,
        };
        rig.engine.set_local_player(rig.player);

        let t0 = rig.t0;
        let s = rig.snap(Vec3::new(3.0, 0.0, 0.0), Vec3::ZERO, VehicleFlags::empty());
        rig.feed(s, t0).await;
        assert_eq!(rig.sync.phase(), SyncState::BoundIdle);
        rig.tick(t0);
        assert_eq!(rig.pos(), Vec3::ZERO);

        // Player gets out: the same tracked vehicle goes back to remote control.
        rig.player.seated = None;
        rig.tick(t0 + TICK);
        assert_eq!(rig.sync.phase(), SyncState::Interpolating);
        assert_eq!(rig.sync.handle(), Some(h));
        assert_eq!(rig.pos(), Vec3::new(3.0, 0.0, 0.0));
    }

    #[tokio::test]
    async fn local_driver_still_sees_remote_gunner_and_siren() {
        let mut rig = Rig::settled();
        rig.catalog = Box::new(RoofGun);
        let h = rig.prebind(Vec3::ZERO);
        let me = rig.engine.spawn_ped(Vec3::ZERO);
        rig.player = LocalPlayer {
            ped: Some(me),
            seated: Some((h, Seat::Driver)),
            entering: None,
        };
        rig.engine.set_local_player(rig.player);
        let gunner = rig.engine.spawn_ped(Vec3::ZERO);
        rig.registry.bind(GUNNER, gunner);

        let t0 = rig.t0;
        let body = rig.snap(Vec3::new(3.0, 0.0, 0.0), Vec3::ZERO, VehicleFlags::SIREN);
        rig.feed(body, t0).await;
        let mut gun = VehicleSnapshot::new(NET, CAR, PeerId(2));
        gun.occupant = Some(GUNNER);
        gun.seat = Some(Seat::Passenger(0));
        gun.flags = VehicleFlags::SHOOTING;
        gun.aim = Vec3::new(0.0, 50.0, 0.0);
        gun.sequence = 1;
        rig.feed(gun, t0).await;

        let mut now = t0;
        for _ in 0..3 {
            rig.tick(now);
            now += TICK;
        }

        assert_eq!(rig.sync.phase(), SyncState::BoundIdle);
        assert_eq!(rig.pos(), Vec3::ZERO);
        let fx = rig.engine.effects();
        assert!(fx.contains(&EffectRecord::Task(
            gunner,
            TaskRequest::SetIntoVehicle {
                vehicle: h,
                seat: Seat::Passenger(0)
            }
        )));
        let shots = fx.iter().filter(|e| matches!(e, EffectRecord::Shot(_))).count();
        assert_eq!(shots, 3);
        let sirens = fx
            .iter()
            .filter(|e| matches!(e, EffectRecord::Vehicle(_, VehicleEffect::Siren(true))))
            .count();
        assert_eq!(sirens, 1);
    }

    #[tokio::test]
    async fn slow_exit_opens_door_and_leaves() {
        let mut rig = Rig::settled();
        let ped = rig.engine.spawn_ped(Vec3::ZERO);
        rig.registry.bind(NetworkId(900), ped);
        let t0 = rig.t0;

        let mut s = rig.snap(Vec3::ZERO, Vec3::ZERO, VehicleFlags::empty());
        s.occupant = Some(NetworkId(900));
        s.seat = Some(Seat::Driver);
        rig.feed(s.clone(), t0).await;
        rig.tick(t0);

        s.flags = VehicleFlags::EXITING;
        s.sequence += 1;
        rig.feed(s, t0 + TICK).await;
        rig.tick(t0 + TICK);

        let h = rig.sync.handle().unwrap();
        let fx = rig.engine.effects();
        assert!(fx.contains(&EffectRecord::Task(
            ped,
            TaskRequest::SetIntoVehicle {
                vehicle: h,
                seat: Seat::Driver
            }
        )));
        assert!(fx.contains(&EffectRecord::Vehicle(h, VehicleEffect::OpenDoor(0))));
        assert!(fx.contains(&EffectRecord::Task(
            ped,
            TaskRequest::LeaveVehicle {
                vehicle: h,
                jump: false
            }
        )));
    }
}
