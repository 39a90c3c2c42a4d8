//! Flight controls.
//!
//! Turns sampled control input into the pose the client reports to the
//! server. Keyboard/gamepad mapping is left to the embedding application;
//! this module only sees normalized axes.

use flight_shared::{entity::SPAWN_POSITION, math::Vec3};

/// Radians of roll per step at full deflection.
pub const ROLL_RATE: f32 = 0.03;
pub const PITCH_RATE: f32 = 0.02;
pub const YAW_RATE: f32 = 0.02;

pub const MIN_SPEED: f32 = 0.5;
pub const MAX_SPEED: f32 = 3.0;
pub const START_SPEED: f32 = 1.0;
/// Speed change per step at full throttle.
pub const SPEED_STEP: f32 = 0.05;

/// Lowest altitude the aircraft may reach.
pub const GROUND_FLOOR: f32 = 5.0;

/// Control axes for one step, each in `[-1, 1]`.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ControlInput {
    /// Positive rolls left.
    pub roll: f32,
    /// Positive raises the nose.
    pub pitch: f32,
    /// Positive turns left.
    pub yaw: f32,
    /// Positive accelerates.
    pub throttle: f32,
}

impl ControlInput {
    fn clamped(self) -> Self {
        Self {
            roll: self.roll.clamp(-1.0, 1.0),
            pitch: self.pitch.clamp(-1.0, 1.0),
            yaw: self.yaw.clamp(-1.0, 1.0),
            throttle: self.throttle.clamp(-1.0, 1.0),
        }
    }
}

/// Locally simulated vehicle.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Aircraft {
    pub position: Vec3,
    /// Euler angles, XYZ order: x = pitch, y = yaw, z = roll.
    pub orientation: Vec3,
    pub speed: f32,
}

impl Default for Aircraft {
    fn default() -> Self {
        Self {
            position: SPAWN_POSITION,
            orientation: Vec3::ZERO,
            speed: START_SPEED,
        }
    }
}

impl Aircraft {
    /// Unit vector the nose points along: `(0, 0, -1)` rotated by the
    /// XYZ Euler orientation.
    pub fn forward(&self) -> Vec3 {
        let (sx, cx) = self.orientation.x.sin_cos();
        let (sy, cy) = self.orientation.y.sin_cos();
        Vec3::new(-sy, sx * cy, -cx * cy)
    }

    /// Advances one step.
    pub fn step(&mut self, input: ControlInput) {
        let input = input.clamped();
        self.orientation.z += ROLL_RATE * input.roll;
        self.orientation.x += PITCH_RATE * input.pitch;
        self.orientation.y += YAW_RATE * input.yaw;
        self.speed = (self.speed + SPEED_STEP * input.throttle).clamp(MIN_SPEED, MAX_SPEED);

        self.position = self.position.add(self.forward().scale(self.speed));

        if self.position.y < GROUND_FLOOR {
            self.position.y = GROUND_FLOOR;
            // Level a nose-down attitude at the floor.
            if self.orientation.x < 0.0 {
                self.orientation.x = 0.0;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(a: Vec3, b: Vec3) -> bool {
        let d = a.add(b.scale(-1.0));
        d.len_sq() < 1e-8
    }

    #[test]
    fn level_flight_goes_down_negative_z() {
        let mut plane = Aircraft::default();
        plane.step(ControlInput::default());
        assert!(approx(plane.position, Vec3::new(0.0, 10.0, -1.0)));
    }

    #[test]
    fn forward_is_unit_length() {
        let plane = Aircraft {
            orientation: Vec3::new(0.4, -1.2, 0.7),
            ..Default::default()
        };
        assert!((plane.forward().len_sq() - 1.0).abs() < 1e-5);
    }

    #[test]
    fn nose_up_climbs() {
        let mut plane = Aircraft::default();
        for _ in 0..10 {
            plane.step(ControlInput {
                pitch: 1.0,
                ..Default::default()
            });
        }
        assert!(plane.position.y > 10.0);
        assert!((plane.orientation.x - 10.0 * PITCH_RATE).abs() < 1e-5);
    }

    #[test]
    fn controls_map_to_pitch_yaw_roll_axes() {
        let mut plane = Aircraft::default();
        plane.step(ControlInput {
            roll: 1.0,
            pitch: 0.5,
            yaw: -1.0,
            throttle: 0.0,
        });
        assert!(approx(
            plane.orientation,
            Vec3::new(0.5 * PITCH_RATE, -YAW_RATE, ROLL_RATE)
        ));
    }

    #[test]
    fn speed_is_clamped() {
        let mut plane = Aircraft::default();
        for _ in 0..200 {
            plane.step(ControlInput {
                throttle: 1.0,
                ..Default::default()
            });
        }
        assert_eq!(plane.speed, MAX_SPEED);
        for _ in 0..200 {
            plane.step(ControlInput {
                throttle: -5.0,
                ..Default::default()
            });
        }
        assert_eq!(plane.speed, MIN_SPEED);
    }

    #[test]
    fn floor_stops_descent_and_levels_nose() {
        let mut plane = Aircraft {
            orientation: Vec3::new(-0.5, 0.0, 0.0),
            ..Default::default()
        };
        for _ in 0..100 {
            plane.step(ControlInput::default());
        }
        assert_eq!(plane.position.y, GROUND_FLOOR);
        assert_eq!(plane.orientation.x, 0.0);
    }
}
