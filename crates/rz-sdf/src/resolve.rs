//! Turning a component into WGSL statements
//!
//! The node editor's dry-run compiler is opaque to the stream; it only sees
//! a [`FragmentResolver`]. [`PlaceholderResolver`] is the default: component
//! bodies already hold WGSL and reference their parameters as `${name}`.

use rz_core::component::Component;

use crate::error::{Result, ShaderError};
use crate::properties::{PropertyTable, TextureList};

/// Resolved body and module-scope helpers of one component
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolvedFragment {
    pub code: String,
    pub globals: String,
}

/// Resolves a component against the tables of the instance being built
pub trait FragmentResolver: Send + Sync {
    fn resolve(
        &self,
        component: &Component,
        properties: &mut PropertyTable,
        textures: &mut TextureList,
    ) -> Result<ResolvedFragment>;
}

/// Replaces `${name}` with `data[slot]`
#[derive(Debug, Clone, Copy, Default)]
pub struct PlaceholderResolver;

impl FragmentResolver for PlaceholderResolver {
    fn resolve(
        &self,
        component: &Component,
        properties: &mut PropertyTable,
        textures: &mut TextureList,
    ) -> Result<ResolvedFragment> {
        for texture in &component.textures {
            textures.add(texture);
        }
        Ok(ResolvedFragment {
            code: substitute(component, &component.code, properties)?,
            globals: substitute(component, &component.global_code, properties)?,
        })
    }
}

fn substitute(component: &Component, text: &str, properties: &mut PropertyTable) -> Result<String> {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(open) = rest.find("${") {
        out.push_str(&rest[..open]);
        let after = &rest[open + 2..];
        let close = after
            .find('}')
            .ok_or_else(|| ShaderError::UnterminatedPlaceholder {
                component: component.name.clone(),
            })?;
        let name = after[..close].trim();
        let value = component
            .values
            .get(name)
            .copied()
            .ok_or_else(|| ShaderError::UnknownParameter {
                component: component.name.clone(),
                name: name.to_string(),
            })?;
        let slot = properties.collect(component.id, name, value);
        out.push_str(&format!("data[{slot}]"));
        rest = &after[close + 1..];
    }
    out.push_str(rest);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rz_core::component::ComponentType;

    #[test]
    fn test_placeholders_become_data_reads() {
        let sphere = Component::new("sphere", ComponentType::Sdf3d)
            .with_value("radius", 0.5)
            .with_code("out_distance = length(position) - ${radius}.x;")
            .with_globals("const R = ${ radius }.x;");
        let mut properties = PropertyTable::new();
        let mut textures = TextureList::new(0);
        let fragment = PlaceholderResolver
            .resolve(&sphere, &mut properties, &mut textures)
            .unwrap();
        assert_eq!(fragment.code, "out_distance = length(position) - data[1].x;");
        assert_eq!(fragment.globals, "const R = data[1].x;");
        assert_eq!(properties.len(), 2);
    }

    #[test]
    fn test_unknown_parameter_is_an_error() {
        let shape = Component::new("box", ComponentType::Sdf3d).with_code("${size}");
        let err = PlaceholderResolver
            .resolve(&shape, &mut PropertyTable::new(), &mut TextureList::new(0))
            .unwrap_err();
        assert!(matches!(err, ShaderError::UnknownParameter { ref name, .. } if name == "size"));
    }

    #[test]
    fn test_unterminated_placeholder() {
        let shape = Component::new("box", ComponentType::Sdf3d)
            .with_value("size", 1.0)
            .with_code("${size");
        let err = PlaceholderResolver
            .resolve(&shape, &mut PropertyTable::new(), &mut TextureList::new(0))
            .unwrap_err();
        assert!(matches!(err, ShaderError::UnterminatedPlaceholder { .. }));
    }

    #[test]
    fn test_textures_are_registered() {
        let material = Component::new("rock", ComponentType::Material3d)
            .with_texture("rock_albedo", "rock.png");
        let mut textures = TextureList::new(1);
        PlaceholderResolver
            .resolve(&material, &mut PropertyTable::new(), &mut textures)
            .unwrap();
        assert_eq!(textures.binding("rock_albedo"), Some(1));
    }
}
