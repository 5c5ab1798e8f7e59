//! Procedural components
//!
//! A [`Component`] is the leaf unit of a scene: a type tag, a set of named
//! parameters and a body of WGSL statements produced by the node editor.
//! The compiler treats the body as opaque text; parameters are referenced
//! from it through `${name}` placeholders which the fragment resolver turns
//! into `data[index]` reads.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

use glam::{Vec3, Vec4};
use serde::{Deserialize, Serialize};

static NEXT_COMPONENT_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identity of a component
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ComponentId(pub u64);

impl ComponentId {
    /// Allocate a fresh id
    pub fn next() -> Self {
        Self(NEXT_COMPONENT_ID.fetch_add(1, Ordering::Relaxed))
    }
}

/// Role of a component inside the scene
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[non_exhaustive]
pub enum ComponentType {
    Sdf2d,
    Sdf3d,
    Transform2d,
    Transform3d,
    Material3d,
    UvMap3d,
    Pattern,
    Domain3d,
    Modifier3d,
    Boolean,
    Light3d,
    Camera3d,
    SkyDome,
    Ground3d,
    Fog3d,
    RayMarch3d,
    Normal3d,
    Ao3d,
    Shadows3d,
    Noise2d,
    Noise3d,
    Image,
}

impl ComponentType {
    /// Whether this component contributes a distance to the scene
    pub fn is_shape(self) -> bool {
        matches!(self, Self::Sdf2d | Self::Sdf3d)
    }
}

/// A four-lane numeric parameter, stored the way the data buffer holds it
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ParamValue(pub [f32; 4]);

impl ParamValue {
    pub fn x(self) -> f32 {
        self.0[0]
    }
}

impl From<f32> for ParamValue {
    fn from(v: f32) -> Self {
        Self([v, 0.0, 0.0, 0.0])
    }
}

impl From<[f32; 3]> for ParamValue {
    fn from(v: [f32; 3]) -> Self {
        Self([v[0], v[1], v[2], 0.0])
    }
}

impl From<[f32; 4]> for ParamValue {
    fn from(v: [f32; 4]) -> Self {
        Self(v)
    }
}

impl From<Vec3> for ParamValue {
    fn from(v: Vec3) -> Self {
        Self(v.extend(0.0).to_array())
    }
}

impl From<Vec4> for ParamValue {
    fn from(v: Vec4) -> Self {
        Self(v.to_array())
    }
}

/// Connects a material property (for example `bump`) to a generated pattern
/// function and the output terminal that feeds it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PropertyConnection {
    /// Name of the connected material property
    pub property: String,
    /// Field of `PatternOut` that carries the value
    pub terminal: String,
    /// Name of the generated WGSL helper to call
    pub function: String,
}

/// An image the component samples
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TextureRef {
    /// Identifier used in the generated code
    pub name: String,
    /// Where the image lives on disk
    pub path: String,
}

/// Leaf unit of the scene
#[derive(Debug, Clone)]
pub struct Component {
    pub id: ComponentId,
    pub name: String,
    pub component_type: ComponentType,
    /// Named parameters; transform parameters start with an underscore
    pub values: BTreeMap<String, ParamValue>,
    /// Body statements
    pub code: String,
    /// Helper declarations emitted once at module scope
    pub global_code: String,
    pub property_connections: Vec<PropertyConnection>,
    pub textures: Vec<TextureRef>,
    /// Combinator merging this shape into the running scene distance
    pub sub_component: Option<Box<Component>>,
}

impl Component {
    /// Create a component with a fresh id and an empty body
    pub fn new(name: impl Into<String>, component_type: ComponentType) -> Self {
        Self {
            id: ComponentId::next(),
            name: name.into(),
            component_type,
            values: BTreeMap::new(),
            code: String::new(),
            global_code: String::new(),
            property_connections: Vec::new(),
            textures: Vec::new(),
            sub_component: None,
        }
    }

    /// Set the body statements
    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = code.into();
        self
    }

    /// Set the module-scope helper code
    pub fn with_globals(mut self, code: impl Into<String>) -> Self {
        self.global_code = code.into();
        self
    }

    /// Set a named parameter
    pub fn with_value(mut self, name: impl Into<String>, value: impl Into<ParamValue>) -> Self {
        self.values.insert(name.into(), value.into());
        self
    }

    /// Attach a combinator (union, subtract, ...) for this shape
    pub fn with_combinator(mut self, combinator: Component) -> Self {
        self.sub_component = Some(Box::new(combinator));
        self
    }

    /// Connect a property to a pattern function terminal
    pub fn with_connection(
        mut self,
        property: impl Into<String>,
        terminal: impl Into<String>,
        function: impl Into<String>,
    ) -> Self {
        self.property_connections.push(PropertyConnection {
            property: property.into(),
            terminal: terminal.into(),
            function: function.into(),
        });
        self
    }

    /// Reference an image texture
    pub fn with_texture(mut self, name: impl Into<String>, path: impl Into<String>) -> Self {
        self.textures.push(TextureRef {
            name: name.into(),
            path: path.into(),
        });
        self
    }

    /// Scalar value of a parameter, if present
    pub fn value(&self, name: &str) -> Option<f32> {
        self.values.get(name).map(|v| v.x())
    }

    /// The connection feeding the `bump` property, if any
    pub fn bump_connection(&self) -> Option<&PropertyConnection> {
        self.property_connections
            .iter()
            .find(|conn| conn.property == "bump")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_component_ids_are_unique() {
        let a = Component::new("a", ComponentType::Sdf3d);
        let b = Component::new("b", ComponentType::Sdf3d);
        assert_ne!(a.id, b.id);
        assert_eq!(a.clone().id, a.id);
    }

    #[test]
    fn test_values() {
        let c = Component::new("sphere", ComponentType::Sdf3d)
            .with_value("radius", 0.5)
            .with_value("color", [1.0, 0.5, 0.25]);
        assert_eq!(c.value("radius"), Some(0.5));
        assert_eq!(c.values["color"].0, [1.0, 0.5, 0.25, 0.0]);
        assert_eq!(c.value("missing"), None);
    }

    #[test]
    fn test_bump_connection() {
        let m = Component::new("stone", ComponentType::Material3d).with_connection(
            "bump",
            "mask",
            "pattern_noise",
        );
        let conn = m.bump_connection().unwrap();
        assert_eq!(conn.terminal, "mask");
        assert_eq!(conn.function, "pattern_noise");
    }
}
