//! Hierarchical scene nodes

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

use crate::component::Component;

static NEXT_STAGE_ITEM_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identity of a stage item
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct StageItemId(pub u64);

impl StageItemId {
    /// Allocate a fresh id
    pub fn next() -> Self {
        Self(NEXT_STAGE_ITEM_ID.fetch_add(1, Ordering::Relaxed))
    }
}

/// Dimensionality of the stage a stream compiles for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StageType {
    Sdf2d,
    Sdf3d,
}

/// A material together with the nodes that shape its evaluation
#[derive(Debug, Clone)]
pub struct MaterialSlot {
    pub material: Component,
    /// Patterns the material body may call
    pub patterns: Vec<Component>,
    /// Maps the hit position to `uv`
    pub uv_map: Option<Component>,
}

impl MaterialSlot {
    pub fn new(material: Component) -> Self {
        Self {
            material,
            patterns: Vec::new(),
            uv_map: None,
        }
    }

    pub fn with_uv_map(mut self, uv_map: Component) -> Self {
        self.uv_map = Some(uv_map);
        self
    }

    pub fn with_pattern(mut self, pattern: Component) -> Self {
        self.patterns.push(pattern);
        self
    }
}

/// Hierarchical scene node
///
/// Holds the component slots (transform, material, ground) and the component
/// lists (shapes, domain warps, modifiers) of one group, plus its children.
/// Domain warps and modifiers apply to every shape of the group.
#[derive(Debug, Clone)]
pub struct StageItem {
    pub id: StageItemId,
    pub name: String,
    pub transform: Option<Component>,
    pub material: Option<MaterialSlot>,
    /// Analytic ground or terrain root; only meaningful on root items
    pub ground: Option<Component>,
    pub shapes: Vec<Component>,
    pub domains: Vec<Component>,
    pub modifiers: Vec<Component>,
    pub children: Vec<StageItem>,
    /// Disabled roots are compiled but skipped while rendering
    pub disabled: bool,
}

impl StageItem {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: StageItemId::next(),
            name: name.into(),
            transform: None,
            material: None,
            ground: None,
            shapes: Vec::new(),
            domains: Vec::new(),
            modifiers: Vec::new(),
            children: Vec::new(),
            disabled: false,
        }
    }

    pub fn with_transform(mut self, transform: Component) -> Self {
        self.transform = Some(transform);
        self
    }

    pub fn with_material(mut self, material: MaterialSlot) -> Self {
        self.material = Some(material);
        self
    }

    pub fn with_ground(mut self, ground: Component) -> Self {
        self.ground = Some(ground);
        self
    }

    pub fn with_shape(mut self, shape: Component) -> Self {
        self.shapes.push(shape);
        self
    }

    pub fn with_domain(mut self, domain: Component) -> Self {
        self.domains.push(domain);
        self
    }

    pub fn with_modifier(mut self, modifier: Component) -> Self {
        self.modifiers.push(modifier);
        self
    }

    pub fn with_child(mut self, child: StageItem) -> Self {
        self.children.push(child);
        self
    }

    pub fn disabled(mut self, disabled: bool) -> Self {
        self.disabled = disabled;
        self
    }

    /// Whether this item only carries a ground (no shapes of its own)
    pub fn is_ground(&self) -> bool {
        self.shapes.is_empty() && self.ground.is_some()
    }

    /// Total number of shape components in this subtree
    pub fn shape_count(&self) -> usize {
        self.shapes.len()
            + self
                .children
                .iter()
                .map(StageItem::shape_count)
                .sum::<usize>()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::component::ComponentType;

    #[test]
    fn test_shape_count_recurses() {
        let item = StageItem::new("root")
            .with_shape(Component::new("a", ComponentType::Sdf3d))
            .with_child(
                StageItem::new("child")
                    .with_shape(Component::new("b", ComponentType::Sdf3d))
                    .with_shape(Component::new("c", ComponentType::Sdf2d)),
            );
        assert_eq!(item.shape_count(), 3);
    }

    #[test]
    fn test_ground_item() {
        let ground = StageItem::new("ground").with_ground(Component::new(
            "plane",
            ComponentType::Ground3d,
        ));
        assert!(ground.is_ground());
        assert!(!StageItem::new("empty").is_ground());
    }
}
