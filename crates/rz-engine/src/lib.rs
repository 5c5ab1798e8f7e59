//! rz Engine - Scene builds and renders behind one API
//!
//! The engine owns the code builder, the render pipeline and the current
//! scene. Renders run as tokio tasks that step the pipeline one chunk at a
//! time.
//!
//! ## Example
//!
//! ```ignore
//! use rz_engine::{Engine, EngineConfig, demo_scene};
//! use rz_render::{RecordingBackend, RecordingCompiler};
//!
//! let mut engine = Engine::new(EngineConfig::default(), Arc::new(RecordingCompiler::new()));
//! engine.load_scene(demo_scene())?;
//!
//! let backend = Arc::new(Mutex::new(RecordingBackend::new()));
//! let image = engine.render(backend).await?;
//! ```

pub mod config;
pub mod export;
pub mod runner;
pub mod scene;

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use image::Rgba32FImage;
use parking_lot::Mutex;
use rz_core::scene::Scene;
use rz_core::stage::StageItemId;
use rz_render::{CancelHandle, GpuBackend, Pipeline3D, RenderStatus, Step};
use rz_sdf::{
    CodeBuilder, CompileContext, CompiledInstance, FragmentResolver, IdEntry, PlaceholderResolver,
    SceneKernels, ShaderBackend, Submit,
};
use tokio::sync::mpsc;
use tracing::{info, warn};

pub use config::{EngineConfig, Output};
pub use export::{ExportFormat, save_image};
pub use runner::Backoff;
pub use scene::{SceneError, demo_scene};

/// Messages a render task sends back to [`Engine::render_with_progress`]
#[derive(Debug)]
enum RenderEvent {
    Progress { done: u32, total: u32 },
    Finished(Rgba32FImage),
}

/// The rz engine
pub struct Engine {
    config: EngineConfig,
    builder: CodeBuilder,
    pipeline: Arc<Mutex<Pipeline3D>>,
    scene: Option<Scene>,
}

impl Engine {
    /// Engine compiling through `compiler`, with built-in fragments only
    pub fn new(config: EngineConfig, compiler: Arc<dyn ShaderBackend>) -> Self {
        Self::with_resolver(config, Arc::new(PlaceholderResolver), compiler)
    }

    pub fn with_resolver(
        config: EngineConfig,
        resolver: Arc<dyn FragmentResolver>,
        compiler: Arc<dyn ShaderBackend>,
    ) -> Self {
        let submit = if config.async_compile {
            Submit::Async
        } else {
            Submit::Sync
        };
        let builder = CodeBuilder::new(CompileContext::new(resolver, compiler).with_submit(submit));
        let mut pipeline = Pipeline3D::new().with_chunk_rows(config.chunk_rows);
        pipeline.set_minimal_preview(config.minimal_preview);

        Self {
            config,
            builder,
            pipeline: Arc::new(Mutex::new(pipeline)),
            scene: None,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    // ========================================================================
    // Scene Operations
    // ========================================================================

    /// Validate and build `scene`, replacing the current one
    pub fn load_scene(&mut self, scene: Scene) -> Result<()> {
        scene.validate().map_err(SceneError::from)?;
        info!(objects = scene.objects.len(), lights = scene.lights.len(), "Loading scene");
        self.scene = Some(scene);
        self.rebuild()
    }

    pub fn scene(&self) -> Option<&Scene> {
        self.scene.as_ref()
    }

    /// Mutable access to the scene; call [`Engine::invalidate`] or
    /// [`Engine::rebuild`] after editing it
    pub fn scene_mut(&mut self) -> Option<&mut Scene> {
        self.scene.as_mut()
    }

    /// Build the current scene, reusing cached modules
    pub fn rebuild(&mut self) -> Result<()> {
        let scene = self.scene.as_ref().ok_or(SceneError::NoScene)?;
        self.pipeline
            .lock()
            .build(&mut self.builder, scene)
            .map_err(SceneError::from)?;
        Ok(())
    }

    /// Recompile one object and rebuild
    pub fn invalidate(&mut self, item: StageItemId) -> Result<()> {
        if !self.builder.invalidate(item) {
            warn!(item = item.0, "Invalidated object was not cached");
        }
        self.rebuild()
    }

    /// Recompile every module and rebuild
    pub fn invalidate_all(&mut self) -> Result<()> {
        self.builder.invalidate_all();
        self.rebuild()
    }

    // ========================================================================
    // Module Inspection
    // ========================================================================

    pub fn kernels(&self) -> Option<SceneKernels> {
        self.pipeline.lock().kernels().cloned()
    }

    pub fn is_compiling(&self) -> bool {
        self.kernels().is_some_and(|kernels| kernels.is_compiling())
    }

    /// Labels of modules that failed to compile
    pub fn failures(&self) -> Vec<String> {
        self.kernels().map(|kernels| kernels.failures()).unwrap_or_default()
    }

    /// Wait until every module has finished compiling
    pub async fn wait_compiled(&self) -> Result<()> {
        if self.scene.is_none() {
            bail!(SceneError::NoScene);
        }
        let mut backoff = self.config.backoff();
        while self.is_compiling() {
            tokio::time::sleep(backoff.next_delay()).await;
        }
        Ok(())
    }

    /// Camera, background and object modules that finished compiling
    pub fn modules(&self) -> Vec<Arc<CompiledInstance>> {
        let Some(kernels) = self.kernels() else {
            return Vec::new();
        };
        kernels
            .slots()
            .filter_map(|slot| slot.lock().instance().cloned())
            .collect()
    }

    /// Shape ids of every object module, keyed by object name
    pub fn id_map(&self) -> BTreeMap<String, BTreeMap<u32, IdEntry>> {
        let Some(kernels) = self.kernels() else {
            return BTreeMap::new();
        };
        kernels
            .objects
            .iter()
            .filter_map(|object| {
                let state = object.slot.lock();
                let ids = state.instance()?.ids.clone();
                Some((object.name.clone(), ids))
            })
            .collect()
    }

    // ========================================================================
    // Rendering
    // ========================================================================

    /// Stop the render in flight
    pub fn cancel(&self) {
        self.pipeline.lock().cancel();
    }

    /// Handle that cancels renders from another thread
    pub fn cancel_handle(&self) -> CancelHandle {
        self.pipeline.lock().cancel_handle()
    }

    /// Render the current scene with the configured settings
    pub async fn render<B>(&self, backend: Arc<Mutex<B>>) -> Result<Rgba32FImage>
    where
        B: GpuBackend + Send + 'static,
    {
        self.render_with_progress(backend, |_, _| {}).await
    }

    /// Render, reporting `(chunks done, chunks total)` as the task runs
    ///
    /// Modules that fail to compile produce the diagnostic frame rather
    /// than an error; [`Engine::failures`] lists them.
    pub async fn render_with_progress<B, F>(
        &self,
        backend: Arc<Mutex<B>>,
        mut on_progress: F,
    ) -> Result<Rgba32FImage>
    where
        B: GpuBackend + Send + 'static,
        F: FnMut(u32, u32),
    {
        if self.scene.is_none() {
            bail!(SceneError::NoScene);
        }
        let (width, height) = (self.config.width, self.config.height);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let progress_tx = tx.clone();
        let settings = self
            .config
            .render_settings()
            .on_progress(move |done, total| {
                let _ = progress_tx.send(RenderEvent::Progress { done, total });
            })
            .on_finished(move |image| {
                let _ = tx.send(RenderEvent::Finished(image));
            });

        let status = self
            .pipeline
            .lock()
            .render(width, height, settings)
            .map_err(SceneError::from)?;
        let task = match status {
            RenderStatus::Failed(labels) => {
                warn!(failed = ?labels, "Rendering diagnostic frame");
                None
            }
            RenderStatus::Started(generation) | RenderStatus::Compiling(generation) => {
                info!(generation, width, height, "Render started");
                Some(runner::spawn(
                    Arc::clone(&self.pipeline),
                    backend,
                    generation,
                    self.config.backoff(),
                ))
            }
        };

        // The channel closes once the pipeline drops the settings
        let mut image = None;
        while let Some(event) = rx.recv().await {
            match event {
                RenderEvent::Progress { done, total } => on_progress(done, total),
                RenderEvent::Finished(finished) => image = Some(finished),
            }
        }

        let step = match task {
            Some(task) => Some(task.await.context("Render task panicked")?),
            None => None,
        };
        match (image, step) {
            (Some(image), _) => Ok(image),
            (None, Some(Step::Failed(e))) => Err(SceneError::Render(e).into()),
            (None, step) => bail!("Render ended without an image ({step:?})"),
        }
    }
}
