//! Engine effects abstraction.
//!
//! The sync layer never calls native engine functions directly. Everything it
//! needs (spawning, transform writes, vehicle effects, tasks, shots) goes
//! through [`EngineEffects`], so reconciliation can run against
//! [`HeadlessEngine`] in tests and in the standalone client.

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};

use netsync_shared::{
    ids::{LocalHandle, ModelId, Seat, WeaponId},
    marker::MarkerProperties,
    math::{Quat, Vec3},
};
use tracing::debug;

/// Physical state of a simulation object.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Transform {
    pub position: Vec3,
    pub rotation: Quat,
    pub velocity: Vec3,
}

/// One-shot or stateful effect applied to a vehicle.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum VehicleEffect {
    Siren(bool),
    /// Sound the horn for the given duration.
    Horn { duration_ms: u32 },
    Burnout(bool),
    BrakeLights(bool),
    Rpm(f32),
    /// Steering angle in radians.
    Steering(f32),
    EngineHealth(f32),
    EngineRunning(bool),
    Explode,
    Repair,
    HeliBladesFullSpeed,
    OpenDoor(u8),
}

/// Task or animation request for a character.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TaskRequest {
    EnterVehicle { vehicle: LocalHandle, seat: Seat },
    SetIntoVehicle { vehicle: LocalHandle, seat: Seat },
    WarpIntoVehicle { vehicle: LocalHandle, seat: Seat },
    WarpOutOfVehicle { vehicle: LocalHandle },
    /// Leave the vehicle; `jump` bails out of a moving one.
    LeaveVehicle { vehicle: LocalHandle, jump: bool },
    BurnoutAction { vehicle: LocalHandle },
    EquipWeapon(WeaponId),
    AimTurretAt(Vec3),
    DriveByStart(Vec3),
    DriveByRetarget(Vec3),
    DriveByClear,
    ShootAt(Vec3),
    DriveByThrow { right_side: bool },
    ClearAll,
}

/// Character bones used as shot origins.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Bone {
    LeftHand,
    RightHand,
}

/// Single ballistic effect between two points.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Shot {
    pub origin: Vec3,
    pub target: Vec3,
    pub damage: i32,
    pub weapon: WeaponId,
    pub owner: Option<LocalHandle>,
}

/// Where the local player currently is.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct LocalPlayer {
    pub ped: Option<LocalHandle>,
    /// Vehicle and seat the player is sitting in.
    pub seated: Option<(LocalHandle, Seat)>,
    /// Vehicle and seat the player is trying to enter.
    pub entering: Option<(LocalHandle, Seat)>,
}

/// Capability surface of the local engine.
pub trait EngineEffects: Send + Sync {
    fn request_model(&self, model: ModelId);
    fn is_model_loaded(&self, model: ModelId) -> bool;
    fn release_model(&self, model: ModelId);
    fn is_aircraft(&self, model: ModelId) -> bool;
    fn is_helicopter(&self, model: ModelId) -> bool;

    fn spawn_vehicle(&self, model: ModelId, position: Vec3, heading: f32) -> Option<LocalHandle>;
    fn spawn_prop(
        &self,
        model: ModelId,
        position: Vec3,
        rotation: Vec3,
        dynamic: bool,
    ) -> Option<LocalHandle>;
    fn create_blip(&self, position: Vec3) -> Option<LocalHandle>;
    fn delete_entity(&self, handle: LocalHandle);
    fn remove_blip(&self, handle: LocalHandle);

    /// Current transform, or `None` once the object is gone.
    fn transform(&self, handle: LocalHandle) -> Option<Transform>;
    fn set_position(&self, handle: LocalHandle, position: Vec3);
    fn set_rotation(&self, handle: LocalHandle, rotation: Quat);
    fn set_velocity(&self, handle: LocalHandle, velocity: Vec3);
    /// World position of an offset expressed in the object's frame.
    fn offset_to_world(&self, handle: LocalHandle, offset: Vec3) -> Vec3;
    fn set_invincible(&self, handle: LocalHandle, invincible: bool);
    fn set_frozen(&self, handle: LocalHandle, frozen: bool);
    fn set_lod_distance(&self, handle: LocalHandle, distance: f32);

    fn vehicle_effect(&self, vehicle: LocalHandle, effect: VehicleEffect);
    fn request_task(&self, ped: LocalHandle, task: TaskRequest);
    fn fire_shot(&self, shot: Shot);
    fn bone_position(&self, ped: LocalHandle, bone: Bone) -> Vec3;

    fn draw_marker(&self, props: &MarkerProperties);
    fn local_player(&self) -> LocalPlayer;
}

/// Everything a [`HeadlessEngine`] was asked to do, in order.
#[derive(Debug, Clone, PartialEq)]
pub enum EffectRecord {
    Spawn(LocalHandle, ModelId),
    Delete(LocalHandle),
    RemoveBlip(LocalHandle),
    Vehicle(LocalHandle, VehicleEffect),
    Task(LocalHandle, TaskRequest),
    Shot(Shot),
    Marker(MarkerProperties),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ObjectKind {
    Vehicle,
    Prop,
    Ped,
    Blip,
}

#[derive(Debug, Clone)]
struct HeadlessObject {
    kind: ObjectKind,
    transform: Transform,
    frozen: bool,
    invincible: bool,
}

#[derive(Default)]
struct HeadlessState {
    next_handle: u32,
    objects: HashMap<LocalHandle, HeadlessObject>,
    loaded: HashSet<ModelId>,
    /// Remaining readiness polls per model before it reports loaded.
    pending_loads: HashMap<ModelId, u32>,
    broken: HashSet<ModelId>,
    aircraft: HashSet<ModelId>,
    helicopters: HashSet<ModelId>,
    local_player: LocalPlayer,
    log: Vec<EffectRecord>,
}

impl HeadlessState {
    fn alloc(&mut self, kind: ObjectKind, position: Vec3, rotation: Quat) -> LocalHandle {
        loop {
            self.next_handle = self.next_handle.wrapping_add(1);
            if let Some(handle) = LocalHandle::new(self.next_handle) {
                if !self.objects.contains_key(&handle) {
                    self.objects.insert(
                        handle,
                        HeadlessObject {
                            kind,
                            transform: Transform {
                                position,
                                rotation,
                                velocity: Vec3::ZERO,
                            },
                            frozen: false,
                            invincible: false,
                        },
                    );
                    return handle;
                }
            }
        }
    }
}

/// In-memory engine: integrates velocities on [`HeadlessEngine::step`] and
/// records every effect request.
#[derive(Default)]
pub struct HeadlessEngine {
    state: Mutex<HeadlessState>,
}

impl HeadlessEngine {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, HeadlessState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Model becomes ready after `polls` readiness checks.
    pub fn set_model_load_delay(&self, model: ModelId, polls: u32) {
        self.state().pending_loads.insert(model, polls);
    }

    /// Model never finishes loading.
    pub fn break_model(&self, model: ModelId) {
        self.state().broken.insert(model);
    }

    pub fn mark_aircraft(&self, model: ModelId, helicopter: bool) {
        let mut state = self.state();
        state.aircraft.insert(model);
        if helicopter {
            state.helicopters.insert(model);
        }
    }

    /// Spawns a character (for occupants and the local player).
    pub fn spawn_ped(&self, position: Vec3) -> LocalHandle {
        self.state().alloc(ObjectKind::Ped, position, Quat::IDENTITY)
    }

    pub fn set_local_player(&self, player: LocalPlayer) {
        self.state().local_player = player;
    }

    pub fn is_invincible(&self, handle: LocalHandle) -> Option<bool> {
        self.state().objects.get(&handle).map(|o| o.invincible)
    }

    pub fn is_frozen(&self, handle: LocalHandle) -> Option<bool> {
        self.state().objects.get(&handle).map(|o| o.frozen)
    }

    pub fn object_count(&self) -> usize {
        self.state().objects.len()
    }

    /// Advances physics: every unfrozen object moves by its velocity.
    pub fn step(&self, dt_sec: f32) {
        for obj in self.state().objects.values_mut() {
            if !obj.frozen && obj.kind != ObjectKind::Blip {
                obj.transform.position += obj.transform.velocity * dt_sec;
            }
        }
    }

    /// Recorded effects since the last drain.
    pub fn drain_effects(&self) -> Vec<EffectRecord> {
        std::mem::take(&mut self.state().log)
    }

    pub fn effects(&self) -> Vec<EffectRecord> {
        self.state().log.clone()
    }
}

impl EngineEffects for HeadlessEngine {
    fn request_model(&self, model: ModelId) {
        let mut state = self.state();
        if state.broken.contains(&model) || state.loaded.contains(&model) {
            return;
        }
        let left = state.pending_loads.get(&model).copied().unwrap_or(0);
        if left == 0 {
            state.pending_loads.remove(&model);
            state.loaded.insert(model);
        } else {
            state.pending_loads.insert(model, left - 1);
        }
    }

    fn is_model_loaded(&self, model: ModelId) -> bool {
        self.state().loaded.contains(&model)
    }

    fn release_model(&self, model: ModelId) {
        self.state().loaded.remove(&model);
    }

    fn is_aircraft(&self, model: ModelId) -> bool {
        self.state().aircraft.contains(&model)
    }

    fn is_helicopter(&self, model: ModelId) -> bool {
        self.state().helicopters.contains(&model)
    }

    fn spawn_vehicle(&self, model: ModelId, position: Vec3, heading: f32) -> Option<LocalHandle> {
        let mut state = self.state();
        if !state.loaded.contains(&model) {
            return None;
        }
        let rotation = Quat::from_euler_degrees(Vec3::new(0.0, 0.0, heading));
        let handle = state.alloc(ObjectKind::Vehicle, position, rotation);
        state.log.push(EffectRecord::Spawn(handle, model));
        debug!(%handle, model = model.0, "headless: spawned vehicle");
        Some(handle)
    }

    fn spawn_prop(
        &self,
        model: ModelId,
        position: Vec3,
        rotation: Vec3,
        _dynamic: bool,
    ) -> Option<LocalHandle> {
        let mut state = self.state();
        if !state.loaded.contains(&model) {
            return None;
        }
        let handle = state.alloc(
            ObjectKind::Prop,
            position,
            Quat::from_euler_degrees(rotation),
        );
        state.log.push(EffectRecord::Spawn(handle, model));
        Some(handle)
    }

    fn create_blip(&self, position: Vec3) -> Option<LocalHandle> {
        Some(self.state().alloc(ObjectKind::Blip, position, Quat::IDENTITY))
    }

    fn delete_entity(&self, handle: LocalHandle) {
        let mut state = self.state();
        state.objects.remove(&handle);
        state.log.push(EffectRecord::Delete(handle));
    }

    fn remove_blip(&self, handle: LocalHandle) {
        let mut state = self.state();
        state.objects.remove(&handle);
        state.log.push(EffectRecord::RemoveBlip(handle));
    }

    fn transform(&self, handle: LocalHandle) -> Option<Transform> {
        self.state().objects.get(&handle).map(|o| o.transform)
    }

    fn set_position(&self, handle: LocalHandle, position: Vec3) {
        if let Some(obj) = self.state().objects.get_mut(&handle) {
            obj.transform.position = position;
        }
    }

    fn set_rotation(&self, handle: LocalHandle, rotation: Quat) {
        if let Some(obj) = self.state().objects.get_mut(&handle) {
            obj.transform.rotation = rotation;
        }
    }

    fn set_velocity(&self, handle: LocalHandle, velocity: Vec3) {
        if let Some(obj) = self.state().objects.get_mut(&handle) {
            obj.transform.velocity = velocity;
        }
    }

    fn offset_to_world(&self, handle: LocalHandle, offset: Vec3) -> Vec3 {
        self.state()
            .objects
            .get(&handle)
            .map(|o| o.transform.position + o.transform.rotation.rotate(offset))
            .unwrap_or(offset)
    }

    fn set_invincible(&self, handle: LocalHandle, invincible: bool) {
        if let Some(obj) = self.state().objects.get_mut(&handle) {
            obj.invincible = invincible;
        }
    }

    fn set_frozen(&self, handle: LocalHandle, frozen: bool) {
        if let Some(obj) = self.state().objects.get_mut(&handle) {
            obj.frozen = frozen;
        }
    }

    fn set_lod_distance(&self, _handle: LocalHandle, _distance: f32) {}

    fn vehicle_effect(&self, vehicle: LocalHandle, effect: VehicleEffect) {
        self.state().log.push(EffectRecord::Vehicle(vehicle, effect));
    }

    fn request_task(&self, ped: LocalHandle, task: TaskRequest) {
        self.state().log.push(EffectRecord::Task(ped, task));
    }

    fn fire_shot(&self, shot: Shot) {
        debug!(damage = shot.damage, weapon = shot.weapon.0, "headless: shot");
        self.state().log.push(EffectRecord::Shot(shot));
    }

    fn bone_position(&self, ped: LocalHandle, bone: Bone) -> Vec3 {
        let side = match bone {
            Bone::LeftHand => -0.3,
            Bone::RightHand => 0.3,
        };
        self.offset_to_world(ped, Vec3::new(side, 0.2, 0.5))
    }

    fn draw_marker(&self, props: &MarkerProperties) {
        self.state().log.push(EffectRecord::Marker(*props));
    }

    fn local_player(&self) -> LocalPlayer {
        self.state().local_player
    }
}
