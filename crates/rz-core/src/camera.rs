//! Look-at camera that emits the camera component body

use glam::Vec3;

use crate::component::{Component, ComponentType};

/// WGSL body of the built-in pinhole camera
///
/// Reads the pixel `uv` and image `size`, writes `out_position` and
/// `out_direction`. Pixel rows grow downwards.
const PINHOLE_BODY: &str = r#"
let ro = ${origin}.xyz;
let ww = normalize(${target}.xyz - ro);
let uu = normalize(cross(ww, ${up}.xyz));
let vv = normalize(cross(uu, ww));
let p = vec2<f32>(2.0 * uv.x - size.x, size.y - 2.0 * uv.y) / size.y;
out_position = ro;
out_direction = normalize(p.x * uu + p.y * vv + ww / tan(${fov}.x * 0.5));
"#;

/// A camera orbiting a target point
#[derive(Debug, Clone)]
pub struct Camera {
    pub position: Vec3,
    pub target: Vec3,
    pub up: Vec3,
    /// Vertical field of view in radians
    pub fov: f32,
}

impl Default for Camera {
    fn default() -> Self {
        Self {
            position: Vec3::new(0.0, 1.5, 5.0),
            target: Vec3::ZERO,
            up: Vec3::Y,
            fov: 60.0_f32.to_radians(),
        }
    }
}

impl Camera {
    /// Create a camera looking at a target from a position
    pub fn look_at(position: Vec3, target: Vec3) -> Self {
        Self {
            position,
            target,
            ..Default::default()
        }
    }

    /// Forward direction (normalized)
    pub fn forward(&self) -> Vec3 {
        (self.target - self.position).normalize()
    }

    pub fn distance(&self) -> f32 {
        (self.position - self.target).length()
    }

    /// Orbit around the target point
    ///
    /// `delta_x` turns around the up axis, `delta_y` tilts towards the pole.
    pub fn orbit(&mut self, delta_x: f32, delta_y: f32) {
        let radius = self.distance();
        let offset = self.position - self.target;
        let mut theta = offset.x.atan2(offset.z);
        let mut phi = (offset.y / radius).clamp(-0.999, 0.999).acos();

        theta -= delta_x;
        phi = (phi - delta_y).clamp(0.01, std::f32::consts::PI - 0.01);

        self.position = self.target
            + Vec3::new(
                radius * phi.sin() * theta.sin(),
                radius * phi.cos(),
                radius * phi.sin() * theta.cos(),
            );
    }

    /// Build the camera component the compiler turns into the camera kernel
    pub fn to_component(&self) -> Component {
        Component::new("Pinhole Camera", ComponentType::Camera3d)
            .with_code(PINHOLE_BODY)
            .with_value("origin", self.position)
            .with_value("target", self.target)
            .with_value("up", self.up)
            .with_value("fov", self.fov)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_camera_orbit_keeps_distance() {
        let mut camera = Camera::default();
        let initial = camera.distance();
        camera.orbit(0.4, 0.2);
        assert_relative_eq!(camera.distance(), initial, epsilon = 1e-4);
    }

    #[test]
    fn test_component_carries_placement() {
        let camera = Camera::look_at(Vec3::new(1.0, 2.0, 3.0), Vec3::ZERO);
        let component = camera.to_component();
        assert_eq!(component.component_type, ComponentType::Camera3d);
        assert_eq!(component.values["origin"].0, [1.0, 2.0, 3.0, 0.0]);
        assert!(component.code.contains("out_direction"));
        assert!(component.code.contains("${fov}"));
    }
}
