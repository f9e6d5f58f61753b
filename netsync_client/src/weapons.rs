//! Weapon synchronization for vehicle occupants.
//!
//! Three cases, picked by seat and vehicle:
//! - turret seats aim and fire the vehicle's turret,
//! - drivers of armed vehicles fire the mounted guns or rockets,
//! - everyone else does a handheld drive-by.
//!
//! Shots are replayed locally as single ballistic effects; they carry no
//! damage when the shooter is a friendly peer. Weapon data (offsets, damage,
//! which seats have guns) comes from a [`WeaponCatalog`].

use std::time::{Duration, Instant};

use netsync_shared::{
    config::SyncConfig,
    ids::{LocalHandle, ModelId, Seat, WeaponId},
    math::{direction_to_rotation, rotation_to_direction, Vec3},
    net::VehicleFlags,
};

use crate::engine::{Bone, EngineEffects, Shot, TaskRequest};

/// Length of a replayed shot.
const SHOT_RANGE: f32 = 100.0;

/// Weapon and vehicle-armament tables.
pub trait WeaponCatalog: Send + Sync {
    /// Whether `seat` of `vehicle` operates a turret.
    fn seat_has_turret(&self, vehicle: ModelId, seat: Seat) -> bool;
    /// Whether the driver of `vehicle` controls mounted guns.
    fn has_mounted_guns(&self, vehicle: ModelId) -> bool;
    /// Muzzle position in the vehicle frame.
    fn muzzle_offset(&self, vehicle: ModelId, rocket: bool) -> Vec3;
    /// Whether the weapon is mounted in mirrored pairs.
    fn has_parallel_weapon(&self, vehicle: ModelId, rocket: bool) -> bool;
    /// Whether the turret pivot is offset from the muzzle.
    fn muzzle_differs_from_gun_position(&self, vehicle: ModelId) -> bool;
    fn turret_length(&self, vehicle: ModelId) -> f32;
    /// Heavy turrets (tank cannons) are rate limited.
    fn is_heavy_turret(&self, vehicle: ModelId) -> bool;
    fn turret_weapon(&self, vehicle: ModelId) -> WeaponId;
    fn turret_damage(&self, vehicle: ModelId) -> i32;
    fn is_rocket(&self, weapon: WeaponId) -> bool;
    /// Weapon actually fired by a mounted gun when `current` is selected.
    fn mounted_weapon(&self, vehicle: ModelId, current: WeaponId, rocket: bool) -> WeaponId;
    /// Thrown weapons are simulated with scripted shots instead of engine fire.
    fn needs_fake_bullets(&self, weapon: WeaponId) -> bool;
    fn weapon_damage(&self, weapon: WeaponId) -> i32;
}

/// Catalog for a world with no armed vehicles.
#[derive(Debug, Default, Clone, Copy)]
pub struct Unarmed;

impl WeaponCatalog for Unarmed {
    fn seat_has_turret(&self, _vehicle: ModelId, _seat: Seat) -> bool {
        false
    }
    fn has_mounted_guns(&self, _vehicle: ModelId) -> bool {
        false
    }
    fn muzzle_offset(&self, _vehicle: ModelId, _rocket: bool) -> Vec3 {
        Vec3::ZERO
    }
    fn has_parallel_weapon(&self, _vehicle: ModelId, _rocket: bool) -> bool {
        false
    }
    fn muzzle_differs_from_gun_position(&self, _vehicle: ModelId) -> bool {
        false
    }
    fn turret_length(&self, _vehicle: ModelId) -> f32 {
        0.0
    }
    fn is_heavy_turret(&self, _vehicle: ModelId) -> bool {
        false
    }
    fn turret_weapon(&self, _vehicle: ModelId) -> WeaponId {
        WeaponId::UNARMED
    }
    fn turret_damage(&self, _vehicle: ModelId) -> i32 {
        0
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

/// Everything a weapon update reads for one vehicle.
pub struct WeaponInputs<'a> {
    pub now: Instant,
    pub engine: &'a dyn EngineEffects,
    pub catalog: &'a dyn WeaponCatalog,
    pub cfg: &'a SyncConfig,
    pub vehicle: LocalHandle,
    pub model: ModelId,
    pub seat: Option<Seat>,
    pub ped: Option<LocalHandle>,
    pub flags: VehicleFlags,
    pub weapon: WeaponId,
    pub aim: Vec3,
    /// Vehicle rotation in Euler degrees.
    pub rotation: Vec3,
    pub friendly: bool,
}

impl WeaponInputs<'_> {
    fn shooting(&self) -> bool {
        self.flags.contains(VehicleFlags::SHOOTING)
    }

    fn aiming(&self) -> bool {
        self.flags.contains(VehicleFlags::AIMING)
    }

    fn damage(&self, hostile: i32) -> i32 {
        if self.friendly {
            0
        } else {
            hostile
        }
    }
}

fn cooled_down(last: Option<Instant>, now: Instant, cooldown_ms: u64) -> bool {
    last.map_or(true, |t| {
        now.saturating_duration_since(t) >= Duration::from_millis(cooldown_ms)
    })
}

fn mirrored(v: Vec3) -> Vec3 {
    Vec3::new(-v.x, v.y, v.z)
}

/// Weapon state of one occupant.
#[derive(Debug, Default, Clone)]
pub struct WeaponSync {
    last_rocket_shot: Option<Instant>,
    last_turret_shot: Option<Instant>,
    last_fake_shot: Option<Instant>,
    last_aim_update: Option<Instant>,
    /// Next parallel-mount shot comes from the left side.
    left_side: bool,
    /// Drive-by task currently running.
    driveby_active: bool,
    equipped: Option<WeaponId>,
}

impl WeaponSync {
    /// Forces the occupant's weapon to be handed out again.
    pub fn mark_dirty(&mut self) {
        self.equipped = None;
    }

    /// Turret or handheld fire for whichever seat the occupant is in.
    pub fn update_occupant(&mut self, w: &WeaponInputs<'_>) {
        let Some(seat) = w.seat else { return };
        if w.catalog.seat_has_turret(w.model, seat) {
            self.update_turret(w, seat);
        } else if !w.catalog.has_mounted_guns(w.model) || seat != Seat::Driver {
            self.update_driveby(w, seat);
        }
    }

    fn update_turret(&mut self, w: &WeaponInputs<'_>, seat: Seat) {
        if cooled_down(self.last_aim_update, w.now, w.cfg.turret_aim_interval_ms) {
            if let Some(ped) = w.ped {
                w.engine.request_task(ped, TaskRequest::AimTurretAt(w.aim));
            }
            self.last_aim_update = Some(w.now);
        }

        if !w.shooting() {
            return;
        }
        if w.catalog.is_heavy_turret(w.model)
            && !cooled_down(self.last_turret_shot, w.now, w.cfg.heavy_turret_cooldown_ms)
        {
            return;
        }
        self.last_turret_shot = Some(w.now);

        let muzzle = w.catalog.muzzle_offset(w.model, false);
        let mut pivot = w.engine.offset_to_world(w.vehicle, muzzle);
        if w.catalog.has_parallel_weapon(w.model, false) && seat == Seat::Passenger(1) {
            pivot = w.engine.offset_to_world(w.vehicle, mirrored(muzzle));
        }

        if w.catalog.muzzle_differs_from_gun_position(w.model) {
            // Swing the muzzle around the pivot to face the aim point, flat.
            let heading = direction_to_rotation(w.aim - pivot).z;
            let flat = rotation_to_direction(Vec3::new(0.0, 0.0, heading)).normalized();
            pivot = pivot + flat * w.catalog.muzzle_offset(w.model, true).len();
        }

        let dir = (w.aim - pivot).normalized();
        let origin = pivot + dir * w.catalog.turret_length(w.model);
        w.engine.fire_shot(Shot {
            origin,
            target: origin + dir * SHOT_RANGE,
            damage: w.damage(w.catalog.turret_damage(w.model)),
            weapon: w.catalog.turret_weapon(w.model),
            owner: w.ped,
        });
    }

    fn update_driveby(&mut self, w: &WeaponInputs<'_>, seat: Seat) {
        let Some(ped) = w.ped else { return };

        if self.equipped != Some(w.weapon) {
            w.engine.request_task(ped, TaskRequest::EquipWeapon(w.weapon));
            self.equipped = Some(w.weapon);
        }

        if w.shooting() || w.aiming() {
            let task = if self.driveby_active {
                TaskRequest::DriveByRetarget(w.aim)
            } else {
                TaskRequest::DriveByStart(w.aim)
            };
            w.engine.request_task(ped, task);

            let right_side = (seat.raw() + 2) % 2 == 0;
            let fake = w.catalog.needs_fake_bullets(w.weapon);
            if fake {
                w.engine
                    .request_task(ped, TaskRequest::DriveByThrow { right_side });
            }

            if w.shooting() {
                if !fake {
                    w.engine.request_task(ped, TaskRequest::ShootAt(w.aim));
                } else if cooled_down(self.last_fake_shot, w.now, w.cfg.fake_bullet_cooldown_ms) {
                    self.last_fake_shot = Some(w.now);
                    let bone = if right_side {
                        Bone::RightHand
                    } else {
                        Bone::LeftHand
                    };
                    w.engine.fire_shot(Shot {
                        origin: w.engine.bone_position(ped, bone),
                        target: w.aim,
                        damage: w.damage(w.catalog.weapon_damage(w.weapon)),
                        weapon: w.weapon,
                        owner: Some(ped),
                    });
                }
            }

            self.last_aim_update = Some(w.now);
            self.driveby_active = true;
            return;
        }

        if self.driveby_active && cooled_down(self.last_aim_update, w.now, w.cfg.driveby_clear_ms)
        {
            w.engine.request_task(ped, TaskRequest::ClearAll);
            w.engine.request_task(ped, TaskRequest::DriveByClear);
            self.driveby_active = false;
        }
    }

    /// Mounted guns or rockets fired by the driver.
    pub fn update_driver_mounted(&mut self, w: &WeaponInputs<'_>) {
        if !w.shooting()
            || w.weapon.is_unarmed()
            || w.seat != Some(Seat::Driver)
            || !w.catalog.has_mounted_guns(w.model)
        {
            return;
        }

        let rocket = w.catalog.is_rocket(w.weapon);
        if rocket {
            if !cooled_down(self.last_rocket_shot, w.now, w.cfg.rocket_cooldown_ms) {
                return;
            }
            self.last_rocket_shot = Some(w.now);
        }

        let mut muzzle = w.catalog.muzzle_offset(w.model, rocket);
        if w.catalog.has_parallel_weapon(w.model, rocket) && self.left_side {
            muzzle = mirrored(muzzle);
        }
        self.left_side = !self.left_side;

        let origin = w.engine.offset_to_world(w.vehicle, muzzle);
        w.engine.fire_shot(Shot {
            origin,
            target: origin + rotation_to_direction(w.rotation) * SHOT_RANGE,
            damage: w.damage(w.cfg.mounted_damage),
            weapon: w.catalog.mounted_weapon(w.model, w.weapon, rocket),
            owner: w.ped,
        });
    }
}
