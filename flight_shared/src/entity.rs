//! Entity model.
//!
//! One `EntityState` exists per connected client. The id and color are fixed
//! at creation; position and orientation are whatever the owning client last
//! reported.

use std::fmt;

use rand::{distributions::Alphanumeric, seq::SliceRandom, Rng};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::math::Vec3;

/// Length of generated entity ids.
pub const ENTITY_ID_LEN: usize = 20;

/// Spawn position: above the ground plane at the world origin.
pub const SPAWN_POSITION: Vec3 = Vec3::new(0.0, 10.0, 0.0);

/// Bright, mutually distinct vehicle colors.
pub const PALETTE: [&str; 8] = [
    "#FF0000", "#00FF00", "#0000FF", "#FFFF00", "#FF00FF", "#00FFFF", "#FF8000", "#8000FF",
];

/// Opaque per-connection entity id.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(pub String);

impl EntityId {
    /// Generates a random alphanumeric id. Uniqueness is the caller's concern.
    pub fn random<R: Rng + ?Sized>(rng: &mut R) -> Self {
        let s: String = rng
            .sample_iter(&Alphanumeric)
            .take(ENTITY_ID_LEN)
            .map(char::from)
            .collect();
        EntityId(s)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for EntityId {
    fn from(s: &str) -> Self {
        EntityId(s.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ColorError {
    #[error("color must look like #RRGGBB, got {0:?}")]
    Malformed(String),
}

/// Display color as a `#RRGGBB` hex string.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Color(String);

impl Color {
    pub fn parse(s: &str) -> Result<Self, ColorError> {
        let hex = s
            .strip_prefix('#')
            .ok_or_else(|| ColorError::Malformed(s.to_string()))?;
        if hex.len() != 6 || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(ColorError::Malformed(s.to_string()));
        }
        Ok(Color(s.to_ascii_uppercase()))
    }

    /// Picks a palette color.
    pub fn random<R: Rng + ?Sized>(rng: &mut R) -> Self {
        let hex = PALETTE.choose(rng).copied().unwrap_or(PALETTE[0]);
        Color(hex.to_string())
    }

    /// Packed `0xRRGGBB` value for renderers.
    pub fn rgb(&self) -> u32 {
        u32::from_str_radix(&self.0[1..], 16).unwrap_or(0)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for Color {
    type Error = ColorError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Color::parse(&s)
    }
}

impl From<Color> for String {
    fn from(c: Color) -> Self {
        c.0
    }
}

/// Replicated state of one client's vehicle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityState {
    pub id: EntityId,
    pub position: Vec3,
    /// Euler angles in radians; axis mapping as in [`crate::math`].
    pub orientation: Vec3,
    pub color: Color,
}

impl EntityState {
    /// Default state for a freshly connected client.
    pub fn spawn(id: EntityId, color: Color) -> Self {
        Self {
            id,
            position: SPAWN_POSITION,
            orientation: Vec3::ZERO,
            color,
        }
    }
}
