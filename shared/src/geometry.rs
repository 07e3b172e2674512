//! Planar world coordinates shared by content definitions and the simulation.

use serde::{Deserialize, Serialize};

/// A 2D position (x, z in world coordinates)
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Vec2 {
    pub x: f32,
    pub z: f32,
}

impl Vec2 {
    pub fn new(x: f32, z: f32) -> Self {
        Self { x, z }
    }

    pub fn length(&self) -> f32 {
        (self.x * self.x + self.z * self.z).sqrt()
    }

    pub fn distance_to(&self, other: Vec2) -> f32 {
        (other - *self).length()
    }

    /// Point `t` of the way from `self` to `other` (0.0 = self, 1.0 = other)
    pub fn lerp(&self, other: Vec2, t: f32) -> Vec2 {
        *self + (other - *self) * t
    }
}

impl std::ops::Add for Vec2 {
    type Output = Vec2;
    fn add(self, rhs: Vec2) -> Vec2 {
        Vec2 { x: self.x + rhs.x, z: self.z + rhs.z }
    }
}

impl std::ops::Sub for Vec2 {
    type Output = Vec2;
    fn sub(self, rhs: Vec2) -> Vec2 {
        Vec2 { x: self.x - rhs.x, z: self.z - rhs.z }
    }
}

impl std::ops::Mul<f32> for Vec2 {
    type Output = Vec2;
    fn mul(self, rhs: f32) -> Vec2 {
        Vec2 { x: self.x * rhs, z: self.z * rhs }
    }
}

/// Axis-aligned rectangle (spawn areas, leash bounds)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Rect {
    /// Minimum corner (smallest x, z)
    pub min: Vec2,
    /// Maximum corner (largest x, z)
    pub max: Vec2,
}

impl Rect {
    /// Create a rect from two corners in any order
    pub fn from_corners(x1: f32, z1: f32, x2: f32, z2: f32) -> Self {
        Self {
            min: Vec2::new(x1.min(x2), z1.min(z2)),
            max: Vec2::new(x1.max(x2), z1.max(z2)),
        }
    }

    pub fn contains(&self, point: Vec2) -> bool {
        point.x >= self.min.x && point.x <= self.max.x &&
        point.z >= self.min.z && point.z <= self.max.z
    }

    /// Nearest point inside the rect
    pub fn clamp(&self, point: Vec2) -> Vec2 {
        Vec2::new(
            point.x.clamp(self.min.x, self.max.x),
            point.z.clamp(self.min.z, self.max.z),
        )
    }

    pub fn center(&self) -> Vec2 {
        self.min.lerp(self.max, 0.5)
    }
}
