//! rz SDF - Scene-to-shader compiler
//!
//! Walks a stage item hierarchy and emits one WGSL module per root object,
//! together with the tables the renderer needs to feed it: the parameter
//! slots of the `data` buffer, the texture bindings and the shape/material
//! id maps used to resolve a pixel back to the item that drew it.
//!
//! ## Key Types
//!
//! - [`SdfStream`] - Streams one root object into a [`CompiledInstance`]
//! - [`CodeBuilder`] - Builds every module of a scene and caches them
//! - [`PropertyTable`] / [`TextureList`] - Parameter and texture collection
//! - [`IdAllocator`] / [`MaterialStack`] - Shape and material ids
//! - [`ShaderBackend`] - Where finished modules are compiled into pipelines
//!
//! ## Example
//!
//! ```rust
//! use std::sync::Arc;
//! use rz_core::prelude::*;
//! use rz_sdf::{CodeBuilder, CompileContext, CompiledInstance, KernelHandle, PlaceholderResolver,
//!     ShaderBackend, ShaderError};
//!
//! struct NullBackend;
//!
//! impl ShaderBackend for NullBackend {
//!     fn compile(&self, _: &CompiledInstance) -> std::result::Result<KernelHandle, ShaderError> {
//!         Ok(KernelHandle(0))
//!     }
//! }
//!
//! let scene = Scene::new(Camera::default().to_component()).with_object(
//!     StageItem::new("ball").with_shape(
//!         Component::new("sphere", ComponentType::Sdf3d)
//!             .with_value("radius", 1.0)
//!             .with_code("        out_distance = length(position) - ${radius}.x;"),
//!     ),
//! );
//!
//! let mut builder = CodeBuilder::new(CompileContext::new(
//!     Arc::new(PlaceholderResolver),
//!     Arc::new(NullBackend),
//! ));
//! let kernels = builder.build_scene(&scene).unwrap();
//! assert!(!kernels.is_compiling());
//! ```

mod builder;
mod error;
mod ids;
mod instance;
mod properties;
mod resolve;
mod sections;
mod stream;
mod terrain;

pub mod templates;

pub use builder::{CacheKey, CodeBuilder, CompileCache, CompileContext, ObjectKernels, SceneKernels};
pub use error::{Result, ShaderError};
pub use ids::{IdAllocator, IdEntry, MaterialStack};
pub use instance::{
    submit, CompileSlot, CompileState, CompiledInstance, KernelEntry, KernelHandle, ShaderBackend,
    Submit,
};
pub use properties::{transform_default, PropertyTable, TextureList, GLOBAL_OWNER, RESERVED_SLOTS};
pub use resolve::{FragmentResolver, PlaceholderResolver, ResolvedFragment};
pub use sections::{unresolved_tokens, CodeSections, Section, Substitutions};
pub use stream::SdfStream;
