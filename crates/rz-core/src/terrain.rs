//! Terrain description: layers, slope materials and the base height map

use crate::component::Component;
use crate::heightmap::HeightMapSettings;
use crate::stage::{MaterialSlot, StageItem};

/// How a layer combines into the running height
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayerBlend {
    Add,
    Subtract,
    /// Raise the terrain only where the layer, lowered by 0.5, exceeds it;
    /// only a winning `Max` layer claims the material
    Max,
}

/// How the shapes of a layer scale its factor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShapesBlend {
    /// Factor weighted by the (absolute) shape distance
    FactorTimesShape,
    /// Constant factor inside the shapes
    Factor,
}

/// Noise feeding a terrain layer
#[derive(Debug, Clone)]
pub enum LayerNoise {
    None,
    TwoD(Component),
    ThreeD(Component),
    Image(Component),
}

/// Object instanced over the cells of a layer
#[derive(Debug, Clone)]
pub struct ScatteredObject {
    pub item: StageItem,
    /// Cell size in world units
    pub spacing: f32,
    /// Fraction of cells that receive an instance
    pub visible: f32,
    /// Position jitter amount
    pub random: f32,
}

/// A single terrain layer
#[derive(Debug, Clone)]
pub struct TerrainLayer {
    /// 2D shapes limiting where the layer applies
    pub shapes: Vec<Component>,
    pub shape_factor: f32,
    pub shapes_blend: ShapesBlend,
    pub blend: LayerBlend,
    pub noise: LayerNoise,
    pub material: Option<MaterialSlot>,
    pub object: Option<ScatteredObject>,
}

impl TerrainLayer {
    pub fn new(blend: LayerBlend, noise: LayerNoise) -> Self {
        Self {
            shapes: Vec::new(),
            shape_factor: 1.0,
            shapes_blend: ShapesBlend::FactorTimesShape,
            blend,
            noise,
            material: None,
            object: None,
        }
    }

    pub fn with_material(mut self, material: MaterialSlot) -> Self {
        self.material = Some(material);
        self
    }

    pub fn with_shape(mut self, shape: Component) -> Self {
        self.shapes.push(shape);
        self
    }

    pub fn with_object(mut self, object: ScatteredObject) -> Self {
        self.object = Some(object);
        self
    }
}

/// Terrain material selected by slope
#[derive(Debug, Clone)]
pub struct TerrainMaterial {
    pub slot: MaterialSlot,
    pub min_slope: f32,
    pub max_slope: f32,
}

/// Height-field terrain attached to the ground object
#[derive(Debug, Clone)]
pub struct Terrain {
    /// Extent of the height texture in world units
    pub size: f32,
    pub scale: f32,
    pub height_scale: f32,
    /// Material 0 is the default, the others are chosen by slope
    pub materials: Vec<TerrainMaterial>,
    pub layers: Vec<TerrainLayer>,
    /// Custom ray-marcher; the built-in one is used when absent
    pub ray_marcher: Option<Component>,
    /// Base height map generation
    pub height_map: HeightMapSettings,
}

impl Default for Terrain {
    fn default() -> Self {
        Self {
            size: 256.0,
            scale: 1.0,
            height_scale: 1.0,
            materials: Vec::new(),
            layers: Vec::new(),
            ray_marcher: None,
            height_map: HeightMapSettings::default(),
        }
    }
}
