// src/tilt.rs
use nalgebra::{Vector3, Vector4};
use tracing::info;

/// Rotation in the y-z plane that cancels the sensor's pitch relative to
/// the floor. `x` is never touched.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TiltCompensation {
    angle: f64,
    cos: f64,
    sin: f64,
}

impl Default for TiltCompensation {
    fn default() -> Self {
        Self::from_angle(0.0)
    }
}

impl TiltCompensation {
    pub fn from_angle(angle: f64) -> Self {
        Self {
            angle,
            cos: angle.cos(),
            sin: angle.sin(),
        }
    }

    /// Tilt from the floor plane `(x, y, z, w)` reported by the sensor.
    /// A missing plane means no correction.
    pub fn from_floor_plane(floor: Option<Vector4<f64>>) -> Self {
        let angle = floor.map_or(0.0, |plane| plane.z.atan2(plane.y));
        info!(tilt_rad = angle, tilt_deg = angle.to_degrees(), "floor tilt computed");
        Self::from_angle(angle)
    }

    pub fn angle(&self) -> f64 {
        self.angle
    }

    pub fn inverse(&self) -> Self {
        Self::from_angle(-self.angle)
    }

    pub fn apply(&self, position: Vector3<f64>) -> Vector3<f64> {
        if self.angle == 0.0 {
            return position;
        }
        Vector3::new(
            position.x,
            position.y * self.cos + position.z * self.sin,
            position.z * self.cos - position.y * self.sin,
        )
    }
}
