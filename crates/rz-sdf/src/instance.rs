//! Compiled instances and their compile state

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::Mutex;
use rz_core::stage::{StageItemId, StageType};
use tracing::{debug, warn};

use crate::error::ShaderError;
use crate::ids::IdEntry;
use crate::properties::{PropertyTable, TextureList};

/// Compute entry points a module can expose
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KernelEntry {
    Camera,
    Background,
    HitAndNormals,
    Ao,
    Shadow,
    Material,
}

impl KernelEntry {
    /// WGSL function name
    pub fn name(self) -> &'static str {
        match self {
            Self::Camera => "camera",
            Self::Background => "background_pass",
            Self::HitAndNormals => "hit_and_normals",
            Self::Ao => "compute_ao",
            Self::Shadow => "compute_shadow",
            Self::Material => "compute_material",
        }
    }

    /// Prefix of the `__{TOKEN}_FUNCDATA__` sentinel
    pub fn token(self) -> &'static str {
        match self {
            Self::Camera => "CAMERA",
            Self::Background => "BACKGROUND",
            Self::HitAndNormals => "HIT_AND_NORMALS",
            Self::Ao => "AO",
            Self::Shadow => "SHADOW",
            Self::Material => "MATERIAL",
        }
    }
}

/// Backend-side handle of a compiled module
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct KernelHandle(pub u64);

/// What a stream produced for one root object
#[derive(Debug, Clone)]
pub struct CompiledInstance {
    pub label: String,
    pub stage_type: StageType,
    pub source: String,
    pub entries: Vec<KernelEntry>,
    pub properties: PropertyTable,
    pub textures: TextureList,
    /// Shape id to the component that produced it
    pub ids: BTreeMap<u32, IdEntry>,
    /// Material id to the stage item that declared it
    pub materials: BTreeMap<u32, StageItemId>,
    pub id_start: u32,
    /// First id not used by this instance
    pub id_end: u32,
    pub root: Option<StageItemId>,
    /// Problems found while streaming; a non-empty list skips compilation
    pub diagnostics: Vec<ShaderError>,
    /// `None` until compiled, and after a failed compile
    pub pipeline: Option<KernelHandle>,
}

impl CompiledInstance {
    pub fn has_entry(&self, entry: KernelEntry) -> bool {
        self.entries.contains(&entry)
    }

    /// Whether the backend accepted the module
    pub fn is_ready(&self) -> bool {
        self.pipeline.is_some()
    }
}

/// Turns WGSL modules into GPU pipelines
pub trait ShaderBackend: Send + Sync {
    fn compile(&self, instance: &CompiledInstance) -> Result<KernelHandle, ShaderError>;
}

/// Compile progress of one root object
#[derive(Debug, Clone, Default)]
pub enum CompileState {
    #[default]
    NotCompiled,
    Compiling,
    Compiled(Arc<CompiledInstance>),
}

impl CompileState {
    /// The instance, once compilation has finished
    pub fn instance(&self) -> Option<&Arc<CompiledInstance>> {
        match self {
            Self::Compiled(instance) => Some(instance),
            Self::NotCompiled | Self::Compiling => None,
        }
    }
}

/// Shared compile state, written by the compile task and read by the scheduler
pub type CompileSlot = Arc<Mutex<CompileState>>;

/// How a closed stream reaches the backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Submit {
    #[default]
    Sync,
    /// Compile on the rayon pool; the slot reads `Compiling` meanwhile
    Async,
}

/// Compile an instance into a fresh slot
pub fn submit(mut instance: CompiledInstance, backend: &Arc<dyn ShaderBackend>, mode: Submit) -> CompileSlot {
    if !instance.diagnostics.is_empty() {
        warn!(
            label = %instance.label,
            errors = instance.diagnostics.len(),
            "Skipping compilation of invalid module"
        );
        return Arc::new(Mutex::new(CompileState::Compiled(Arc::new(instance))));
    }
    match mode {
        Submit::Sync => {
            compile_into(&mut instance, backend.as_ref());
            Arc::new(Mutex::new(CompileState::Compiled(Arc::new(instance))))
        }
        Submit::Async => {
            let slot = Arc::new(Mutex::new(CompileState::Compiling));
            let task_slot = Arc::clone(&slot);
            let backend = Arc::clone(backend);
            rayon::spawn(move || {
                compile_into(&mut instance, backend.as_ref());
                *task_slot.lock() = CompileState::Compiled(Arc::new(instance));
            });
            slot
        }
    }
}

fn compile_into(instance: &mut CompiledInstance, backend: &dyn ShaderBackend) {
    match backend.compile(instance) {
        Ok(handle) => {
            debug!(label = %instance.label, handle = handle.0, "Compiled module");
            instance.pipeline = Some(handle);
        }
        Err(e) => {
            warn!(label = %instance.label, "Shader compilation failed: {e}");
            instance.diagnostics.push(e);
            instance.pipeline = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::time::Duration;

    struct CountingBackend(AtomicU64);

    impl ShaderBackend for CountingBackend {
        fn compile(&self, _instance: &CompiledInstance) -> Result<KernelHandle, ShaderError> {
            Ok(KernelHandle(self.0.fetch_add(1, Ordering::SeqCst)))
        }
    }

    struct FailingBackend;

    impl ShaderBackend for FailingBackend {
        fn compile(&self, _instance: &CompiledInstance) -> Result<KernelHandle, ShaderError> {
            Err(ShaderError::Backend("type mismatch".into()))
        }
    }

    fn instance() -> CompiledInstance {
        CompiledInstance {
            label: "test".into(),
            stage_type: StageType::Sdf3d,
            source: String::new(),
            entries: vec![KernelEntry::HitAndNormals],
            properties: PropertyTable::new(),
            textures: TextureList::new(0),
            ids: BTreeMap::new(),
            materials: BTreeMap::new(),
            id_start: 0,
            id_end: 0,
            root: None,
            diagnostics: Vec::new(),
            pipeline: None,
        }
    }

    #[test]
    fn test_sync_submit_compiles() {
        let backend: Arc<dyn ShaderBackend> = Arc::new(CountingBackend(AtomicU64::new(4)));
        let slot = submit(instance(), &backend, Submit::Sync);
        let state = slot.lock();
        let compiled = state.instance().unwrap();
        assert_eq!(compiled.pipeline, Some(KernelHandle(4)));
        assert!(compiled.has_entry(KernelEntry::HitAndNormals));
    }

    #[test]
    fn test_failed_compile_has_no_pipeline() {
        let backend: Arc<dyn ShaderBackend> = Arc::new(FailingBackend);
        let slot = submit(instance(), &backend, Submit::Sync);
        let state = slot.lock();
        let compiled = state.instance().unwrap();
        assert!(!compiled.is_ready());
        assert_eq!(compiled.diagnostics.len(), 1);
    }

    #[test]
    fn test_invalid_instance_skips_backend() {
        let backend: Arc<dyn ShaderBackend> = Arc::new(CountingBackend(AtomicU64::new(0)));
        let mut invalid = instance();
        invalid
            .diagnostics
            .push(ShaderError::InvalidHierarchy("bad".into()));
        let slot = submit(invalid, &backend, Submit::Async);
        assert!(!slot.lock().instance().unwrap().is_ready());
    }

    #[test]
    fn test_async_submit_finishes() {
        let backend: Arc<dyn ShaderBackend> = Arc::new(CountingBackend(AtomicU64::new(1)));
        let slot = submit(instance(), &backend, Submit::Async);
        for _ in 0..500 {
            if slot.lock().instance().is_some() {
                break;
            }
            std::thread::sleep(Duration::from_millis(2));
        }
        assert!(slot.lock().instance().unwrap().is_ready());
    }
}
