//! Scene description handed to the compiler

use crate::component::{Component, ComponentType};
use crate::error::{Error, Result};
use crate::light::{PointLight, Sun, World};
use crate::stage::{StageItem, StageItemId};
use crate::terrain::Terrain;

/// Optional scene-wide components replacing the built-in render stages
#[derive(Debug, Clone, Default)]
pub struct RenderComponents {
    pub ray_march: Option<Component>,
    pub normal: Option<Component>,
    pub ao: Option<Component>,
    pub shadows: Option<Component>,
    /// UV mapping used by materials without their own
    pub uv_map: Option<Component>,
}

/// A complete scene: camera, objects, lights and environment
#[derive(Debug, Clone)]
pub struct Scene {
    pub camera: Component,
    pub background: Option<Component>,
    /// Root stage items, each compiled into its own instance
    pub objects: Vec<StageItem>,
    pub sun: Sun,
    pub lights: Vec<PointLight>,
    /// Participating media density bodies
    pub fog: Vec<Component>,
    pub world: World,
    pub render: RenderComponents,
    /// Height-field terrain used by the ground object
    pub terrain: Option<Terrain>,
}

impl Scene {
    pub fn new(camera: Component) -> Self {
        Self {
            camera,
            background: None,
            objects: Vec::new(),
            sun: Sun::default(),
            lights: Vec::new(),
            fog: Vec::new(),
            world: World::default(),
            render: RenderComponents::default(),
            terrain: None,
        }
    }

    pub fn with_background(mut self, background: Component) -> Self {
        self.background = Some(background);
        self
    }

    pub fn with_object(mut self, item: StageItem) -> Self {
        self.objects.push(item);
        self
    }

    pub fn with_light(mut self, light: PointLight) -> Self {
        self.lights.push(light);
        self
    }

    pub fn with_fog(mut self, fog: Component) -> Self {
        self.fog.push(fog);
        self
    }

    pub fn with_terrain(mut self, terrain: Terrain) -> Self {
        self.terrain = Some(terrain);
        self
    }

    /// Find a root object by id
    pub fn object(&self, id: StageItemId) -> Option<&StageItem> {
        self.objects.iter().find(|item| item.id == id)
    }

    /// Check the component roles before compiling
    pub fn validate(&self) -> Result<()> {
        if self.camera.component_type != ComponentType::Camera3d {
            return Err(Error::InvalidComponent {
                name: self.camera.name.clone(),
                reason: "camera slot needs a camera component".into(),
            });
        }
        if self.objects.iter().filter(|item| item.is_ground()).count() > 1 {
            return Err(Error::InvalidScene(
                "a scene can only hold one ground object".into(),
            ));
        }
        if self.terrain.is_some() && !self.objects.iter().any(StageItem::is_ground) {
            return Err(Error::InvalidScene(
                "terrain needs a ground object to attach to".into(),
            ));
        }
        for item in &self.objects {
            validate_item(item)?;
        }
        Ok(())
    }
}

fn validate_item(item: &StageItem) -> Result<()> {
    for shape in &item.shapes {
        if !shape.component_type.is_shape() {
            return Err(Error::InvalidComponent {
                name: shape.name.clone(),
                reason: format!("'{}' holds a non-shape component", item.name),
            });
        }
    }
    if let Some(slot) = &item.material {
        if slot.material.component_type != ComponentType::Material3d {
            return Err(Error::InvalidComponent {
                name: slot.material.name.clone(),
                reason: "material slot needs a material component".into(),
            });
        }
    }
    item.children.iter().try_for_each(validate_item)
}
