//! Sun, point lights and global atmosphere

use glam::Vec3;

use crate::component::Component;

/// Directional key light
#[derive(Debug, Clone)]
pub struct Sun {
    /// Direction towards the sun (normalized on upload)
    pub direction: Vec3,
    pub color: Vec3,
    pub intensity: f32,
}

impl Default for Sun {
    fn default() -> Self {
        Self {
            direction: Vec3::new(0.8, 0.6, 0.4),
            color: Vec3::new(1.0, 0.95, 0.85),
            intensity: 1.0,
        }
    }
}

/// A spherical point light
///
/// The optional component body shapes the emitted light; it becomes the
/// `light{index}` helper of every object kernel.
#[derive(Debug, Clone)]
pub struct PointLight {
    pub position: Vec3,
    pub color: Vec3,
    pub intensity: f32,
    pub component: Option<Component>,
}

impl PointLight {
    pub fn new(position: Vec3, color: Vec3, intensity: f32) -> Self {
        Self {
            position,
            color,
            intensity,
            component: None,
        }
    }

    pub fn with_component(mut self, component: Component) -> Self {
        self.component = Some(component);
        self
    }
}

/// Scene-wide atmosphere settings
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct World {
    pub fog_density: f32,
    pub max_fog_distance: f32,
}

impl Default for World {
    fn default() -> Self {
        Self {
            fog_density: 0.0,
            max_fog_distance: 10.0,
        }
    }
}
