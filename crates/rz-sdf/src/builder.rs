//! Scene build pass
//!
//! [`CodeBuilder`] compiles one module per root object plus the shared camera
//! and background modules. Instances are cached per stage item and reused
//! until invalidated; a reused instance keeps its shape ids, and fresh
//! instances are numbered past every cached range.

use std::collections::HashMap;
use std::ops::Range;
use std::sync::Arc;

use rz_core::component::{Component, ComponentId};
use rz_core::scene::Scene;
use rz_core::stage::{StageItem, StageItemId, StageType};
use tracing::{debug, info};

use crate::error::{Result, ShaderError};
use crate::ids::IdEntry;
use crate::instance::{
    submit, CompileSlot, CompileState, CompiledInstance, KernelEntry, ShaderBackend, Submit,
};
use crate::properties::{PropertyTable, TextureList};
use crate::resolve::FragmentResolver;
use crate::sections::{unresolved_tokens, CodeSections, Section, Substitutions};
use crate::stream::SdfStream;
use crate::templates::{self, defaults};

/// Everything a build pass needs besides the scene
#[derive(Clone)]
pub struct CompileContext {
    pub resolver: Arc<dyn FragmentResolver>,
    pub backend: Arc<dyn ShaderBackend>,
    /// First group(1) binding used for component textures
    pub texture_start: u32,
    pub submit: Submit,
    pub stage_type: StageType,
}

impl CompileContext {
    pub fn new(resolver: Arc<dyn FragmentResolver>, backend: Arc<dyn ShaderBackend>) -> Self {
        Self {
            resolver,
            backend,
            texture_start: 0,
            submit: Submit::Sync,
            stage_type: StageType::Sdf3d,
        }
    }

    pub fn with_submit(mut self, submit: Submit) -> Self {
        self.submit = submit;
        self
    }

    pub fn with_texture_start(mut self, start: u32) -> Self {
        self.texture_start = start;
        self
    }

    pub fn with_stage_type(mut self, stage_type: StageType) -> Self {
        self.stage_type = stage_type;
        self
    }
}

/// What a cached module was built from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CacheKey {
    Item(StageItemId),
    Component(ComponentId),
    DefaultBackground,
}

#[derive(Debug, Clone)]
struct CacheEntry {
    slot: CompileSlot,
    ids: Range<u32>,
}

/// Compile slots kept across builds
#[derive(Debug, Default)]
pub struct CompileCache {
    entries: HashMap<CacheKey, CacheEntry>,
}

impl CompileCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: CacheKey) -> Option<&CompileSlot> {
        self.entries.get(&key).map(|entry| &entry.slot)
    }

    /// Shape id range of a cached object module
    pub fn id_range(&self, key: CacheKey) -> Option<Range<u32>> {
        self.entries.get(&key).map(|entry| entry.ids.clone())
    }

    fn insert(&mut self, key: CacheKey, slot: CompileSlot, ids: Range<u32>) {
        self.entries.insert(key, CacheEntry { slot, ids });
    }

    /// Drop one module; returns whether it was cached
    pub fn invalidate(&mut self, key: CacheKey) -> bool {
        self.entries.remove(&key).is_some()
    }

    pub fn invalidate_all(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// The compiled module of one root object
#[derive(Debug, Clone)]
pub struct ObjectKernels {
    pub item: StageItemId,
    pub name: String,
    /// Compiled, but skipped by every pass
    pub disabled: bool,
    pub slot: CompileSlot,
}

/// Every module of a built scene
#[derive(Debug, Clone)]
pub struct SceneKernels {
    pub camera: CompileSlot,
    pub background: CompileSlot,
    pub objects: Vec<ObjectKernels>,
}

impl SceneKernels {
    /// Camera, background and object slots
    pub fn slots(&self) -> impl Iterator<Item = &CompileSlot> {
        [&self.camera, &self.background]
            .into_iter()
            .chain(self.objects.iter().map(|object| &object.slot))
    }

    /// Whether any module has not finished compiling
    pub fn is_compiling(&self) -> bool {
        self.slots()
            .any(|slot| !matches!(*slot.lock(), CompileState::Compiled(_)))
    }

    /// Labels of finished modules without a pipeline
    pub fn failures(&self) -> Vec<String> {
        self.slots()
            .filter_map(|slot| {
                let state = slot.lock();
                state
                    .instance()
                    .filter(|instance| !instance.is_ready())
                    .map(|instance| instance.label.clone())
            })
            .collect()
    }

    /// Root object and origin of a shape id found in the shape buffer
    pub fn lookup_shape(&self, id: u32) -> Option<(StageItemId, IdEntry)> {
        self.objects.iter().find_map(|object| {
            let state = object.slot.lock();
            let entry = state.instance()?.ids.get(&id)?.clone();
            Some((object.item, entry))
        })
    }

    /// Stage item that declared a material id
    pub fn lookup_material(&self, id: u32) -> Option<StageItemId> {
        self.objects.iter().find_map(|object| {
            let state = object.slot.lock();
            state.instance()?.materials.get(&id).copied()
        })
    }
}

/// Builds and caches the modules of a scene
pub struct CodeBuilder {
    context: CompileContext,
    cache: CompileCache,
}

impl CodeBuilder {
    pub fn new(context: CompileContext) -> Self {
        Self {
            context,
            cache: CompileCache::new(),
        }
    }

    pub fn context(&self) -> &CompileContext {
        &self.context
    }

    pub fn cache(&self) -> &CompileCache {
        &self.cache
    }

    /// Force a root object to recompile on the next build
    pub fn invalidate(&mut self, item: StageItemId) -> bool {
        self.cache.invalidate(CacheKey::Item(item))
    }

    pub fn invalidate_all(&mut self) {
        self.cache.invalidate_all();
    }

    /// Compile every module the scene needs, reusing cached ones
    pub fn build_scene(&mut self, scene: &Scene) -> Result<SceneKernels> {
        scene
            .validate()
            .map_err(|e| ShaderError::InvalidHierarchy(e.to_string()))?;

        let camera = self.build_camera(scene);
        let background = self.build_background(scene);

        let mut next_id = scene
            .objects
            .iter()
            .filter_map(|item| self.cache.id_range(CacheKey::Item(item.id)))
            .map(|range| range.end)
            .max()
            .unwrap_or(0);

        let mut objects = Vec::with_capacity(scene.objects.len());
        let mut reused = 0;
        for item in &scene.objects {
            let key = CacheKey::Item(item.id);
            let slot = if let Some(slot) = self.cache.get(key) {
                debug!(object = %item.name, "Reusing compiled object");
                reused += 1;
                Arc::clone(slot)
            } else {
                let instance = self.compile_object(scene, item, next_id);
                let ids = instance.id_start..instance.id_end;
                next_id = ids.end;
                let slot = submit(instance, &self.context.backend, self.context.submit);
                self.cache.insert(key, Arc::clone(&slot), ids);
                slot
            };
            objects.push(ObjectKernels {
                item: item.id,
                name: item.name.clone(),
                disabled: item.disabled,
                slot,
            });
        }

        info!(
            objects = objects.len(),
            reused,
            next_id,
            "Built scene"
        );
        Ok(SceneKernels {
            camera,
            background,
            objects,
        })
    }

    /// Stream one root object starting at `id_start`
    pub fn compile_object(&self, scene: &Scene, item: &StageItem, id_start: u32) -> CompiledInstance {
        let mut stream = SdfStream::new(self.context.resolver.as_ref(), scene, self.context.texture_start);
        stream.open_stream(
            self.context.stage_type,
            id_start,
            &scene.camera,
            item.ground.as_ref(),
            scene.background.as_ref(),
        );
        stream.stream_item(item);
        stream.finish()
    }

    pub fn build_camera(&mut self, scene: &Scene) -> CompileSlot {
        let key = CacheKey::Component(scene.camera.id);
        if let Some(slot) = self.cache.get(key) {
            return Arc::clone(slot);
        }
        let mut module = StandaloneModule::new("camera", KernelEntry::Camera, self.context.texture_start);
        let code = module.resolve(self.context.resolver.as_ref(), &scene.camera);
        module
            .sections
            .push(Section::Camera, &templates::camera_kernel(&code));
        let slot = submit(module.finish(), &self.context.backend, self.context.submit);
        self.cache.insert(key, Arc::clone(&slot), 0..0);
        slot
    }

    pub fn build_background(&mut self, scene: &Scene) -> CompileSlot {
        let key = scene
            .background
            .as_ref()
            .map_or(CacheKey::DefaultBackground, |bg| CacheKey::Component(bg.id));
        if let Some(slot) = self.cache.get(key) {
            return Arc::clone(slot);
        }
        let mut module =
            StandaloneModule::new("background", KernelEntry::Background, self.context.texture_start);
        let code = match &scene.background {
            Some(component) => module.resolve(self.context.resolver.as_ref(), component),
            None => defaults::BACKGROUND.to_string(),
        };
        module
            .sections
            .push(Section::Background, &templates::background_function(&code));
        module
            .sections
            .push(Section::Background, &templates::background_kernel());
        let slot = submit(module.finish(), &self.context.backend, self.context.submit);
        self.cache.insert(key, Arc::clone(&slot), 0..0);
        slot
    }
}

/// A single-entry module outside any stream
struct StandaloneModule {
    label: &'static str,
    entry: KernelEntry,
    sections: CodeSections,
    properties: PropertyTable,
    textures: TextureList,
    diagnostics: Vec<ShaderError>,
}

impl StandaloneModule {
    fn new(label: &'static str, entry: KernelEntry, texture_start: u32) -> Self {
        let mut sections = CodeSections::new();
        sections.push(Section::Header, templates::HEADER);
        Self {
            label,
            entry,
            sections,
            properties: PropertyTable::new(),
            textures: TextureList::new(texture_start),
            diagnostics: Vec::new(),
        }
    }

    fn resolve(&mut self, resolver: &dyn FragmentResolver, component: &Component) -> String {
        match resolver.resolve(component, &mut self.properties, &mut self.textures) {
            Ok(fragment) => {
                if !fragment.globals.is_empty() {
                    self.sections.push(Section::Header, &fragment.globals);
                    self.sections.push(Section::Header, "\n");
                }
                fragment.code
            }
            Err(e) => {
                self.diagnostics.push(e);
                String::new()
            }
        }
    }

    fn finish(mut self) -> CompiledInstance {
        let mut subs = Substitutions::new();
        subs.insert(templates::TEXTURE_HEADER_TOKEN, self.textures.header_code());
        subs.insert(
            templates::AFTER_TEXTURE_OFFSET_TOKEN,
            self.textures.after_offset().to_string(),
        );
        subs.insert(
            templates::TEXTURE_DEFINITIONS_TOKEN,
            self.textures.definitions_code(),
        );
        subs.insert(
            &format!("{}_FUNCDATA", self.entry.token()),
            templates::funcdata_code(self.entry),
        );
        let source = subs.apply(&self.sections.assemble());
        let remaining = unresolved_tokens(&source);
        if !remaining.is_empty() {
            self.diagnostics.push(ShaderError::UnresolvedTokens {
                label: self.label.to_string(),
                tokens: remaining,
            });
        }
        CompiledInstance {
            label: self.label.to_string(),
            stage_type: StageType::Sdf3d,
            source,
            entries: vec![self.entry],
            properties: self.properties,
            textures: self.textures,
            ids: Default::default(),
            materials: Default::default(),
            id_start: 0,
            id_end: 0,
            root: None,
            diagnostics: self.diagnostics,
            pipeline: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instance::KernelHandle;
    use crate::resolve::PlaceholderResolver;
    use rz_core::camera::Camera;
    use rz_core::component::ComponentType;
    use std::sync::atomic::{AtomicU64, Ordering};

    #[derive(Default)]
    struct CountingBackend(AtomicU64);

    impl ShaderBackend for CountingBackend {
        fn compile(&self, _instance: &CompiledInstance) -> std::result::Result<KernelHandle, ShaderError> {
            Ok(KernelHandle(self.0.fetch_add(1, Ordering::SeqCst)))
        }
    }

    fn sphere() -> Component {
        Component::new("sphere", ComponentType::Sdf3d).with_code("        out_distance = length(position) - 1.0;")
    }

    fn scene() -> Scene {
        Scene::new(Camera::default().to_component())
            .with_object(StageItem::new("a").with_shape(sphere()).with_shape(sphere()))
            .with_object(StageItem::new("b").with_shape(sphere()).disabled(true))
    }

    fn builder(backend: Arc<CountingBackend>) -> CodeBuilder {
        CodeBuilder::new(CompileContext::new(Arc::new(PlaceholderResolver), backend))
    }

    fn ids(slot: &CompileSlot) -> Vec<u32> {
        slot.lock().instance().unwrap().ids.keys().copied().collect()
    }

    #[test]
    fn test_objects_get_consecutive_ids() {
        let scene = scene();
        let kernels = builder(Arc::default()).build_scene(&scene).unwrap();
        assert_eq!(ids(&kernels.objects[0].slot), vec![0, 1]);
        assert_eq!(ids(&kernels.objects[1].slot), vec![2]);
        assert!(kernels.objects[1].disabled);
        assert!(!kernels.is_compiling());
        assert!(kernels.failures().is_empty());
    }

    #[test]
    fn test_cached_objects_keep_ids() {
        let scene = scene();
        let backend = Arc::new(CountingBackend::default());
        let mut builder = builder(Arc::clone(&backend));
        builder.build_scene(&scene).unwrap();
        let compiled = backend.0.load(Ordering::SeqCst);

        assert!(builder.invalidate(scene.objects[0].id));
        let kernels = builder.build_scene(&scene).unwrap();
        // Only the invalidated object recompiles
        assert_eq!(backend.0.load(Ordering::SeqCst), compiled + 1);
        assert_eq!(ids(&kernels.objects[1].slot), vec![2]);
        assert_eq!(ids(&kernels.objects[0].slot), vec![3, 4]);
    }

    #[test]
    fn test_camera_and_background_modules() {
        let scene = scene();
        let kernels = builder(Arc::default()).build_scene(&scene).unwrap();
        let camera = kernels.camera.lock();
        let camera = camera.instance().unwrap();
        assert!(camera.source.contains("fn camera("));
        assert!(camera.diagnostics.is_empty(), "{:?}", camera.diagnostics);
        let background = kernels.background.lock();
        let background = background.instance().unwrap();
        assert!(background.source.contains("fn background_pass("));
        assert!(background.has_entry(KernelEntry::Background));
    }

    #[test]
    fn test_lookup_shape_and_material() {
        let root = StageItem::new("root")
            .with_material(rz_core::stage::MaterialSlot::new(Component::new(
                "red",
                ComponentType::Material3d,
            )))
            .with_shape(sphere());
        let root_id = root.id;
        let scene = Scene::new(Camera::default().to_component()).with_object(root);
        let kernels = builder(Arc::default()).build_scene(&scene).unwrap();
        let (object, entry) = kernels.lookup_shape(0).unwrap();
        assert_eq!(object, root_id);
        assert_eq!(entry.hierarchy, vec![root_id]);
        assert_eq!(kernels.lookup_material(0), Some(root_id));
        assert!(kernels.lookup_shape(7).is_none());
    }

    #[test]
    fn test_invalid_scene_is_rejected() {
        let scene = Scene::new(Component::new("not a camera", ComponentType::Sdf3d));
        let result = builder(Arc::default()).build_scene(&scene);
        assert!(matches!(result, Err(ShaderError::InvalidHierarchy(_))));
    }
}
