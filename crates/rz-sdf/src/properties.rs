//! Parameter slots and texture bindings collected while compiling
//!
//! Every parameter a component body references becomes one `vec4<f32>`
//! slot of the `data` storage buffer. Slot 0 is reserved for the frame
//! globals (`x` = time, `z` = seed).

use std::collections::HashMap;

use rz_core::component::{Component, ComponentId, ParamValue, TextureRef};

/// Number of leading slots owned by the frame globals
pub const RESERVED_SLOTS: usize = 1;

/// Key used for scene-wide values that belong to no component
pub const GLOBAL_OWNER: ComponentId = ComponentId(0);

/// Value a transform parameter takes when the component does not set it
pub fn transform_default(name: &str) -> f32 {
    match name {
        "_scale" => 1.0,
        "_bb_x" | "_bb_y" | "_bb_z" => 5.0,
        _ => 0.0,
    }
}

/// Ordered parameter slots of one compiled instance
///
/// Collecting the same `(component, name)` twice yields the same slot.
#[derive(Debug, Clone)]
pub struct PropertyTable {
    slots: Vec<[f32; 4]>,
    owners: Vec<Option<(ComponentId, String)>>,
    index: HashMap<(ComponentId, String), usize>,
}

impl Default for PropertyTable {
    fn default() -> Self {
        Self::new()
    }
}

impl PropertyTable {
    pub fn new() -> Self {
        Self {
            slots: vec![[0.0; 4]; RESERVED_SLOTS],
            owners: vec![None; RESERVED_SLOTS],
            index: HashMap::new(),
        }
    }

    /// Register a parameter and return its slot
    pub fn collect(&mut self, owner: ComponentId, name: &str, value: ParamValue) -> usize {
        let key = (owner, name.to_string());
        if let Some(&slot) = self.index.get(&key) {
            return slot;
        }
        let slot = self.slots.len();
        self.slots.push(value.0);
        self.owners.push(Some(key.clone()));
        self.index.insert(key, slot);
        slot
    }

    /// Register a transform parameter, falling back to its default value
    pub fn collect_transform(&mut self, component: &Component, name: &str) -> usize {
        let value = component
            .values
            .get(name)
            .copied()
            .unwrap_or_else(|| ParamValue::from(transform_default(name)));
        self.collect(component.id, name, value)
    }

    /// Register a scene-wide scalar
    pub fn collect_global(&mut self, name: &str, value: f32) -> usize {
        self.collect(GLOBAL_OWNER, name, ParamValue::from(value))
    }

    pub fn slot_of(&self, owner: ComponentId, name: &str) -> Option<usize> {
        self.index.get(&(owner, name.to_string())).copied()
    }

    /// Overwrite the value of a collected parameter
    ///
    /// Returns `false` when the parameter was never collected.
    pub fn set(&mut self, owner: ComponentId, name: &str, value: ParamValue) -> bool {
        match self.slot_of(owner, name) {
            Some(slot) => {
                self.slots[slot] = value.0;
                true
            }
            None => false,
        }
    }

    /// Owner and name of a slot; `None` for reserved slots
    pub fn owner(&self, slot: usize) -> Option<(ComponentId, &str)> {
        self.owners
            .get(slot)
            .and_then(|owner| owner.as_ref())
            .map(|(id, name)| (*id, name.as_str()))
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.len() == RESERVED_SLOTS
    }

    /// Slot contents in buffer order
    pub fn slots(&self) -> &[[f32; 4]] {
        &self.slots
    }
}

/// Deduplicated textures bound after a start offset of bind group 1
///
/// The binding right after the last texture holds the light uniform.
#[derive(Debug, Clone, Default)]
pub struct TextureList {
    start: u32,
    textures: Vec<TextureRef>,
}

impl TextureList {
    pub fn new(start: u32) -> Self {
        Self {
            start,
            textures: Vec::new(),
        }
    }

    /// Add a texture, returning its binding
    pub fn add(&mut self, texture: &TextureRef) -> u32 {
        if let Some(binding) = self.binding(&texture.name) {
            return binding;
        }
        self.textures.push(texture.clone());
        self.start + self.textures.len() as u32 - 1
    }

    pub fn binding(&self, name: &str) -> Option<u32> {
        self.textures
            .iter()
            .position(|t| t.name == name)
            .map(|i| self.start + i as u32)
    }

    pub fn start(&self) -> u32 {
        self.start
    }

    /// First binding after the textures
    pub fn after_offset(&self) -> u32 {
        self.start + self.textures.len() as u32
    }

    pub fn len(&self) -> usize {
        self.textures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.textures.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &TextureRef> {
        self.textures.iter()
    }

    /// Module-scope declarations of every texture
    pub fn header_code(&self) -> String {
        let mut code = String::new();
        for (i, texture) in self.textures.iter().enumerate() {
            code.push_str(&format!(
                "@group(1) @binding({}) var {}: texture_2d<f32>;\n",
                self.start + i as u32,
                texture.name
            ));
        }
        code
    }

    /// Per-function `{name}_size` definitions
    pub fn definitions_code(&self) -> String {
        let mut code = String::new();
        for texture in &self.textures {
            code.push_str(&format!(
                "    let {0}_size = vec2<f32>(textureDimensions({0}));\n",
                texture.name
            ));
        }
        code
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rz_core::component::ComponentType;

    fn texture(name: &str) -> TextureRef {
        TextureRef {
            name: name.into(),
            path: format!("{name}.png"),
        }
    }

    #[test]
    fn test_collect_is_idempotent() {
        let mut table = PropertyTable::new();
        let id = ComponentId(42);
        let a = table.collect(id, "radius", ParamValue::from(0.5));
        let b = table.collect(id, "radius", ParamValue::from(9.0));
        assert_eq!(a, b);
        assert_eq!(a, RESERVED_SLOTS);
        assert_eq!(table.slots()[a], [0.5, 0.0, 0.0, 0.0]);
        assert_eq!(table.owner(a), Some((id, "radius")));
        assert_eq!(table.owner(0), None);
    }

    #[test]
    fn test_distinct_owners_get_distinct_slots() {
        let mut table = PropertyTable::new();
        let a = table.collect(ComponentId(1), "radius", ParamValue::from(1.0));
        let b = table.collect(ComponentId(2), "radius", ParamValue::from(2.0));
        assert_ne!(a, b);
        assert_eq!(table.len(), 3);
    }

    #[test]
    fn test_transform_defaults() {
        let mut table = PropertyTable::new();
        let transform = Component::new("t", ComponentType::Transform3d).with_value("_posX", 2.0);
        let pos = table.collect_transform(&transform, "_posX");
        let scale = table.collect_transform(&transform, "_scale");
        let bb = table.collect_transform(&transform, "_bb_y");
        let rot = table.collect_transform(&transform, "_rotateZ");
        assert_eq!(table.slots()[pos][0], 2.0);
        assert_eq!(table.slots()[scale][0], 1.0);
        assert_eq!(table.slots()[bb][0], 5.0);
        assert_eq!(table.slots()[rot][0], 0.0);
    }

    #[test]
    fn test_set_updates_collected_only() {
        let mut table = PropertyTable::new();
        let id = ComponentId(7);
        let slot = table.collect(id, "size", ParamValue::from(1.0));
        assert!(table.set(id, "size", ParamValue::from(3.0)));
        assert_eq!(table.slots()[slot][0], 3.0);
        assert!(!table.set(id, "missing", ParamValue::from(3.0)));
    }

    #[test]
    fn test_texture_list_dedups_and_offsets() {
        let mut list = TextureList::new(2);
        assert_eq!(list.add(&texture("rock")), 2);
        assert_eq!(list.add(&texture("moss")), 3);
        assert_eq!(list.add(&texture("rock")), 2);
        assert_eq!(list.len(), 2);
        assert_eq!(list.after_offset(), 4);
        assert!(
            list.header_code()
                .contains("@group(1) @binding(3) var moss: texture_2d<f32>;")
        );
        assert!(
            list.definitions_code()
                .contains("let rock_size = vec2<f32>(textureDimensions(rock));")
        );
    }

    #[test]
    fn test_empty_texture_list() {
        let list = TextureList::new(0);
        assert!(list.is_empty());
        assert_eq!(list.after_offset(), 0);
        assert!(list.header_code().is_empty());
    }
}
