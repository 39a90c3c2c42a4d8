//! Math types.
//!
//! Kept small and deterministic. `Vec3` carries both world positions and
//! Euler orientations (radians, XYZ order; x = pitch, y = yaw, z = roll).

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// 3D vector.
///
/// Decoding rejects components that do not fit a finite `f32`; JSON encodes
/// infinities as `null`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
#[serde(try_from = "RawVec3")]
pub struct Vec3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("vector component is not a finite f32")]
pub struct NonFiniteError;

#[derive(Deserialize)]
struct RawVec3 {
    x: f32,
    y: f32,
    z: f32,
}

impl TryFrom<RawVec3> for Vec3 {
    type Error = NonFiniteError;

    fn try_from(raw: RawVec3) -> Result<Self, Self::Error> {
        let v = Vec3::new(raw.x, raw.y, raw.z);
        if v.is_finite() {
            Ok(v)
        } else {
            Err(NonFiniteError)
        }
    }
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

    pub fn add(self, rhs: Self) -> Self {
        Self::new(self.x + rhs.x, self.y + rhs.y, self.z + rhs.z)
    }

    pub fn scale(self, s: f32) -> Self {
        Self::new(self.x * s, self.y * s, self.z * s)
    }

    pub fn dot(self, rhs: Self) -> f32 {
        self.x * rhs.x + self.y * rhs.y + self.z * rhs.z
    }

    pub fn len_sq(self) -> f32 {
        self.dot(self)
    }

    pub fn is_finite(self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.z.is_finite()
    }
}
