//! Math types.
//!
//! This module intentionally stays small and deterministic.
//! It avoids SIMD/unsafe and focuses on stable semantics.
//!
//! Rotations travel over the wire as Euler angles in degrees (pitch about X,
//! roll about Y, yaw about Z). Internally they are turned into [`Quat`] so
//! blending never goes through gimbal-locked Euler space.

use std::ops::{Add, AddAssign, Mul, Neg, Sub};

use serde::{Deserialize, Serialize};

/// 3D vector.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct Vec3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Vec3 {
    pub const ZERO: Self = Self {
        x: 0.0,
        y: 0.0,
        z: 0.0,
    };

    pub const fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    pub fn dot(self, rhs: Self) -> f32 {
        self.x * rhs.x + self.y * rhs.y + self.z * rhs.z
    }

    pub fn len_sq(self) -> f32 {
        self.dot(self)
    }

    pub fn len(self) -> f32 {
        self.len_sq().sqrt()
    }

    pub fn distance_sq(self, other: Self) -> f32 {
        (self - other).len_sq()
    }

    /// Returns the unit vector, or zero for a degenerate input.
    pub fn normalized(self) -> Self {
        let len = self.len();
        if len <= f32::EPSILON {
            Self::ZERO
        } else {
            self * (1.0 / len)
        }
    }

    pub fn with_z(self, z: f32) -> Self {
        Self::new(self.x, self.y, z)
    }

    pub fn lerp(self, to: Self, t: f32) -> Self {
        let t = t.clamp(0.0, 1.0);
        Self::new(
            self.x + (to.x - self.x) * t,
            self.y + (to.y - self.y) * t,
            self.z + (to.z - self.z) * t,
        )
    }
}

impl Add for Vec3 {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        Self::new(self.x + rhs.x, self.y + rhs.y, self.z + rhs.z)
    }
}

impl AddAssign for Vec3 {
    fn add_assign(&mut self, rhs: Self) {
        *self = *self + rhs;
    }
}

impl Sub for Vec3 {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self {
        Self::new(self.x - rhs.x, self.y - rhs.y, self.z - rhs.z)
    }
}

impl Mul<f32> for Vec3 {
    type Output = Self;

    fn mul(self, rhs: f32) -> Self {
        Self::new(self.x * rhs, self.y * rhs, self.z * rhs)
    }
}

impl Neg for Vec3 {
    type Output = Self;

    fn neg(self) -> Self {
        Self::new(-self.x, -self.y, -self.z)
    }
}

/// Unit quaternion.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Quat {
    pub x: f32,
    pub y: f32,
    pub z: f32,
    pub w: f32,
}

impl Default for Quat {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl Quat {
    pub const IDENTITY: Self = Self {
        x: 0.0,
        y: 0.0,
        z: 0.0,
        w: 1.0,
    };

    pub const fn new(x: f32, y: f32, z: f32, w: f32) -> Self {
        Self { x, y, z, w }
    }

    /// Builds an orientation from Euler degrees (`x` pitch, `y` roll, `z` yaw).
    ///
    /// Composition order is yaw, then pitch, then roll.
    pub fn from_euler_degrees(rot: Vec3) -> Self {
        let (sp, cp) = (rot.x.to_radians() * 0.5).sin_cos();
        let (sr, cr) = (rot.y.to_radians() * 0.5).sin_cos();
        let (sy, cy) = (rot.z.to_radians() * 0.5).sin_cos();

        let yaw = Self::new(0.0, 0.0, sy, cy);
        let pitch = Self::new(sp, 0.0, 0.0, cp);
        let roll = Self::new(0.0, sr, 0.0, cr);
        yaw.mul_quat(pitch).mul_quat(roll).normalized()
    }

    /// Hamilton product `self * rhs`.
    pub fn mul_quat(self, rhs: Self) -> Self {
        Self::new(
            self.w * rhs.x + self.x * rhs.w + self.y * rhs.z - self.z * rhs.y,
            self.w * rhs.y - self.x * rhs.z + self.y * rhs.w + self.z * rhs.x,
            self.w * rhs.z + self.x * rhs.y - self.y * rhs.x + self.z * rhs.w,
            self.w * rhs.w - self.x * rhs.x - self.y * rhs.y - self.z * rhs.z,
        )
    }

    pub fn dot(self, rhs: Self) -> f32 {
        self.x * rhs.x + self.y * rhs.y + self.z * rhs.z + self.w * rhs.w
    }

    pub fn normalized(self) -> Self {
        let len = self.dot(self).sqrt();
        if len <= f32::EPSILON {
            Self::IDENTITY
        } else {
            let inv = 1.0 / len;
            Self::new(self.x * inv, self.y * inv, self.z * inv, self.w * inv)
        }
    }

    /// Rotates `v` by this orientation.
    pub fn rotate(self, v: Vec3) -> Vec3 {
        let u = Vec3::new(self.x, self.y, self.z);
        let uv = cross(u, v);
        let uuv = cross(u, uv);
        v + uv * (2.0 * self.w) + uuv * 2.0
    }

    /// Smallest rotation angle between two orientations, in degrees.
    pub fn angle_to_degrees(self, other: Self) -> f32 {
        let d = self.dot(other).abs().min(1.0);
        (2.0 * d.acos()).to_degrees()
    }

    /// Spherical interpolation along the shortest arc.
    ///
    /// `t` is not clamped: values above 1 continue along the same arc, which
    /// is what lets a late orientation catch up past the last sample.
    pub fn slerp(self, to: Self, t: f32) -> Self {
        let mut to = to;
        let mut cos = self.dot(to);
        if cos < 0.0 {
            to = Self::new(-to.x, -to.y, -to.z, -to.w);
            cos = -cos;
        }

        if cos > 0.9995 {
            // Nearly parallel; lerp avoids dividing by a vanishing sine.
            return Self::new(
                self.x + (to.x - self.x) * t,
                self.y + (to.y - self.y) * t,
                self.z + (to.z - self.z) * t,
                self.w + (to.w - self.w) * t,
            )
            .normalized();
        }

        let theta = cos.acos();
        let sin = theta.sin();
        let a = ((1.0 - t) * theta).sin() / sin;
        let b = (t * theta).sin() / sin;
        Self::new(
            self.x * a + to.x * b,
            self.y * a + to.y * b,
            self.z * a + to.z * b,
            self.w * a + to.w * b,
        )
        .normalized()
    }
}

pub fn cross(a: Vec3, b: Vec3) -> Vec3 {
    Vec3::new(
        a.y * b.z - a.z * b.y,
        a.z * b.x - a.x * b.z,
        a.x * b.y - a.y * b.x,
    )
}

/// Forward unit vector for an Euler rotation in degrees.
pub fn rotation_to_direction(rot: Vec3) -> Vec3 {
    let yaw = rot.z.to_radians();
    let pitch = rot.x.to_radians();
    let horizontal = pitch.cos().abs();
    Vec3::new(-yaw.sin() * horizontal, yaw.cos() * horizontal, pitch.sin())
}

/// Euler rotation (degrees, roll zero) that faces along `dir`.
pub fn direction_to_rotation(dir: Vec3) -> Vec3 {
    let dir = dir.normalized();
    let yaw = (-dir.x).atan2(dir.y).to_degrees();
    let pitch = dir.z.clamp(-1.0, 1.0).asin().to_degrees();
    Vec3::new(pitch, 0.0, yaw)
}
