//! # rz Core
//!
//! The component model of rz: procedural components, the stage item
//! hierarchy that groups them, and the scene the compiler turns into GPU
//! kernels.
//!
//! ## Conventions
//!
//! - **Angles**: component parameters store degrees, the camera stores radians
//! - **Coordinate system**: right-handed, Y-up
//! - **Parameters**: every value is a `[f32; 4]` slot, scalars live in `x`

pub mod camera;
pub mod component;
pub mod heightmap;
pub mod light;
pub mod scene;
pub mod stage;
pub mod terrain;

mod error;

pub use error::{Error, Result};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::camera::Camera;
    pub use crate::component::{
        Component, ComponentId, ComponentType, ParamValue, PropertyConnection, TextureRef,
    };
    pub use crate::heightmap::{HeightMap, HeightMapSettings};
    pub use crate::light::{PointLight, Sun, World};
    pub use crate::scene::{RenderComponents, Scene};
    pub use crate::stage::{MaterialSlot, StageItem, StageItemId, StageType};
    pub use crate::terrain::{
        LayerBlend, LayerNoise, ScatteredObject, ShapesBlend, Terrain, TerrainLayer,
        TerrainMaterial,
    };

    pub use glam::{Vec2, Vec3, Vec4};

    pub use crate::{Error, Result};
}
