//! Light uniforms uploaded for every shadow and material pass
//!
//! Shadows and materials run once per light. The sun is always light 0,
//! point lights follow in scene order.

use bytemuck::{Pod, Zeroable};
use glam::Vec3;
use rz_core::light::{PointLight, Sun};
use rz_core::scene::Scene;

/// GPU-ready light description
/// This struct must match the WGSL `LightData` layout exactly
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct LightUniforms {
    /// Direction to the sun or point light position; `w` is the fog density
    pub position: [f32; 4],
    /// `x` key light, `y` spherical, `z` index, `w` index of the last light
    pub kind: [f32; 4],
    pub color: [f32; 4],
}

impl LightUniforms {
    pub fn sun(sun: &Sun, last_index: usize, fog_density: f32) -> Self {
        // Default to up if zero
        let direction = sun.direction.try_normalize().unwrap_or(Vec3::Y);
        Self {
            position: direction.extend(fog_density).to_array(),
            kind: [1.0, 0.0, 0.0, last_index as f32],
            color: (sun.color * sun.intensity).extend(1.0).to_array(),
        }
    }

    /// Point light `index` of the scene, numbered from 1
    pub fn point(light: &PointLight, index: usize, last_index: usize, fog_density: f32) -> Self {
        Self {
            position: light.position.extend(fog_density).to_array(),
            kind: [0.0, 1.0, index as f32, last_index as f32],
            color: (light.color * light.intensity).extend(1.0).to_array(),
        }
    }

    /// Whether this is the last light of a pass sequence
    pub fn is_last(&self) -> bool {
        (self.kind[2] - self.kind[3]).abs() < 0.5
    }
}

impl Default for LightUniforms {
    fn default() -> Self {
        LightUniforms::sun(&Sun::default(), 0, 0.0)
    }
}

/// Sun followed by every point light of the scene
pub fn scene_lights(scene: &Scene) -> Vec<LightUniforms> {
    let last = scene.lights.len();
    let fog = scene.world.fog_density;
    std::iter::once(LightUniforms::sun(&scene.sun, last, fog))
        .chain(
            scene
                .lights
                .iter()
                .enumerate()
                .map(|(i, light)| LightUniforms::point(light, i + 1, last, fog)),
        )
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use rz_core::camera::Camera;

    #[test]
    fn test_layout_matches_wgsl() {
        assert_eq!(std::mem::size_of::<LightUniforms>(), 48);
    }

    #[test]
    fn test_sun_is_light_zero() {
        let scene = Scene::new(Camera::default().to_component())
            .with_light(PointLight::new(Vec3::new(1.0, 2.0, 3.0), Vec3::ONE, 2.0))
            .with_light(PointLight::new(Vec3::ZERO, Vec3::X, 1.0));
        let lights = scene_lights(&scene);
        assert_eq!(lights.len(), 3);
        assert_relative_eq!(lights[0].kind[0], 1.0);
        assert!(!lights[0].is_last());
        assert_relative_eq!(lights[1].kind[2], 1.0);
        assert_relative_eq!(lights[1].color[0], 2.0);
        assert!(lights[2].is_last());
    }

    #[test]
    fn test_sun_direction_is_normalized() {
        let sun = Sun {
            direction: Vec3::new(0.0, 3.0, 4.0),
            ..Sun::default()
        };
        let light = LightUniforms::sun(&sun, 0, 0.25);
        assert_relative_eq!(light.position[1], 0.6);
        assert_relative_eq!(light.position[3], 0.25);
        assert!(light.is_last());
    }
}
