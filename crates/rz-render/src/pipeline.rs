//! The staged deferred pipeline
//!
//! [`Pipeline3D`] drives the compiled modules of a scene through
//! HitAndNormals, Ao, ShadowsAndMaterials and Reflection. Rows are rendered in
//! chunks, every chunk runs its reflection bounces, and whole frames are
//! accumulated over samples.
//!
//! Rendering is cooperative: [`Pipeline3D::step`] does one stage of one chunk
//! and returns, so the host decides when to continue. A render is identified
//! by its generation; stepping a stale generation does nothing.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use rz_core::heightmap::HeightMap;
use rz_core::scene::Scene;
use rz_sdf::{CodeBuilder, CompiledInstance, KernelEntry, SceneKernels};
use tracing::{debug, info, warn};

use crate::backend::{BufferId, FrameUniforms, GpuBackend, KernelPass, UtilityOp, UtilityPass};
use crate::environment::{LightUniforms, scene_lights};
use crate::error::{BackendError, Result};
use crate::output::{diagnostic_frame, to_image};
use crate::settings::RenderSettings;
use crate::stage::{OutputType, Stage};
use crate::state::PipelineState;

/// Rows rendered per step
pub const DEFAULT_CHUNK_ROWS: u32 = 50;

/// Distance mapped to white in depth output
pub const DEFAULT_DEPTH_FAR: f32 = 100.0;

const NO_HIT: [f32; 4] = [1000.0, 1000.0, -1.0, -1.0];
const DEAD_RAY: [f32; 4] = [1.0e20; 4];
const COLOR_INIT: [f32; 4] = [0.0, 0.0, 0.0, 1.0];
const MASK_INIT: [f32; 4] = [1.0, 1.0, 1.0, 0.0];
const DENSITY_INIT: [f32; 4] = [0.0, 0.0, 0.0, 1.0];
const META_INIT: [f32; 4] = [1.0, 1.0, 0.0, 0.0];

/// Buffers that live for a whole render
const FRAME_BUFFERS: [BufferId; 8] = [
    BufferId::RayOrigin,
    BufferId::RayDirection,
    BufferId::Normal,
    BufferId::Color,
    BufferId::Mask,
    BufferId::Density,
    BufferId::Back,
    BufferId::Accumulation,
];

/// Result of starting a render
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RenderStatus {
    /// Rendering begins on the next step
    Started(u64),
    /// Modules are still compiling; steps wait until they are done
    Compiling(u64),
    /// A module failed to compile and a diagnostic frame was delivered
    Failed(Vec<String>),
}

impl RenderStatus {
    pub fn generation(&self) -> Option<u64> {
        match self {
            Self::Started(generation) | Self::Compiling(generation) => Some(*generation),
            Self::Failed(_) => None,
        }
    }
}

/// What one call to [`Pipeline3D::step`] did
#[derive(Debug, Clone, PartialEq)]
pub enum Step {
    /// A unit of work ran; call again
    Continue,
    /// Modules are compiling; call again later
    Waiting,
    /// The image was delivered
    Finished,
    /// The generation is stale; stop stepping it
    Abandoned,
    /// Nothing to do
    Idle,
    Failed(BackendError),
}

impl Step {
    /// Whether the caller should stop stepping this generation
    pub fn is_done(&self) -> bool {
        !matches!(self, Self::Continue | Self::Waiting)
    }
}

/// Cancels the render of a pipeline from anywhere
#[derive(Debug, Clone)]
pub struct CancelHandle(Arc<AtomicU64>);

impl CancelHandle {
    pub fn cancel(&self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }

    pub fn generation(&self) -> u64 {
        self.0.load(Ordering::SeqCst)
    }
}

/// Modules of a render, taken from their compile slots once compiled
struct ActiveModules {
    camera: Arc<CompiledInstance>,
    background: Arc<CompiledInstance>,
    objects: Vec<Arc<CompiledInstance>>,
}

impl ActiveModules {
    /// Labels of modules without a pipeline
    fn failures(&self) -> Vec<String> {
        std::iter::once(&self.camera)
            .chain(std::iter::once(&self.background))
            .chain(self.objects.iter())
            .filter(|instance| !instance.is_ready())
            .map(|instance| instance.label.clone())
            .collect()
    }
}

pub struct Pipeline3D {
    kernels: Option<SceneKernels>,
    active: Option<ActiveModules>,
    lights: Vec<LightUniforms>,
    terrain: Option<HeightMap>,
    state: PipelineState,
    settings: Option<RenderSettings>,
    size: (u32, u32),
    generation: Arc<AtomicU64>,
    pending_start: bool,
    prepared: bool,
    minimal_preview: bool,
    chunk_rows: u32,
    depth_far: f32,
}

impl Default for Pipeline3D {
    fn default() -> Self {
        Self::new()
    }
}

impl Pipeline3D {
    pub fn new() -> Self {
        Self {
            kernels: None,
            active: None,
            lights: Vec::new(),
            terrain: None,
            state: PipelineState::new(),
            settings: None,
            size: (0, 0),
            generation: Arc::new(AtomicU64::new(0)),
            pending_start: false,
            prepared: false,
            minimal_preview: false,
            chunk_rows: DEFAULT_CHUNK_ROWS,
            depth_far: DEFAULT_DEPTH_FAR,
        }
    }

    pub fn with_chunk_rows(mut self, rows: u32) -> Self {
        self.chunk_rows = rows.max(1);
        self
    }

    pub fn with_depth_far(mut self, far: f32) -> Self {
        self.depth_far = far;
        self
    }

    /// Replace the hit passes with a flat-shaded preview
    pub fn set_minimal_preview(&mut self, enabled: bool) {
        self.minimal_preview = enabled;
    }

    pub fn state(&self) -> &PipelineState {
        &self.state
    }

    pub fn stage(&self) -> Stage {
        self.state.stage
    }

    pub fn kernels(&self) -> Option<&SceneKernels> {
        self.kernels.as_ref()
    }

    /// Generation of the most recent render or cancel
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle(Arc::clone(&self.generation))
    }

    /// Compile the scene, reusing modules the builder has cached
    ///
    /// Any render in flight is cancelled.
    pub fn build(&mut self, builder: &mut CodeBuilder, scene: &Scene) -> rz_sdf::Result<()> {
        self.cancel();
        let kernels = builder.build_scene(scene)?;
        self.lights = scene_lights(scene);
        self.terrain = scene
            .terrain
            .as_ref()
            .map(|terrain| HeightMap::generate(&terrain.height_map));
        self.kernels = Some(kernels);
        self.state.stage = Stage::Compiled;
        info!(
            lights = self.lights.len(),
            terrain = self.terrain.is_some(),
            "Pipeline built"
        );
        Ok(())
    }

    /// Stop the current render without delivering anything
    pub fn cancel(&mut self) {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        if self.settings.take().is_some() {
            debug!(generation, "Render cancelled");
        }
        self.pending_start = false;
        self.active = None;
        if self.state.stage.is_rendering() {
            self.state.stage = Stage::Compiled;
        }
    }

    /// Start rendering a `width` x `height` image
    ///
    /// Returns the generation to pass to [`Pipeline3D::step`].
    pub fn render(&mut self, width: u32, height: u32, settings: RenderSettings) -> Result<RenderStatus> {
        if width == 0 || height == 0 {
            return Err(BackendError::InvalidSize { width, height });
        }
        let Some(kernels) = &self.kernels else {
            return Err(BackendError::NotBuilt);
        };
        let compiling = kernels.is_compiling();

        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.state.reset(generation);
        self.state.stage = Stage::Compiled;
        self.size = (width, height);
        self.settings = Some(settings);
        self.prepared = false;
        self.active = None;

        if compiling {
            debug!(generation, "Waiting for modules to compile");
            self.pending_start = true;
            return Ok(RenderStatus::Compiling(generation));
        }
        self.pending_start = false;
        Ok(self.start())
    }

    /// Run one unit of work of render `generation`
    pub fn step(&mut self, backend: &mut dyn GpuBackend, generation: u64) -> Step {
        let current = self.generation.load(Ordering::SeqCst);
        if generation != current {
            if self.state.generation == generation && self.settings.is_some() {
                // Cancelled through a handle
                debug!(generation, "Dropping cancelled render");
                self.settings = None;
                self.active = None;
                self.pending_start = false;
                self.state.stage = Stage::Compiled;
            }
            return Step::Abandoned;
        }
        if self.settings.is_none() {
            return Step::Idle;
        }
        if self.pending_start {
            if self.kernels.as_ref().is_some_and(SceneKernels::is_compiling) {
                return Step::Waiting;
            }
            self.pending_start = false;
            if let RenderStatus::Failed(_) = self.start() {
                return Step::Finished;
            }
            return Step::Continue;
        }
        if !self.state.stage.is_rendering() {
            return Step::Idle;
        }

        match self.advance(backend) {
            Ok(step) => step,
            Err(e) => {
                warn!(generation, stage = %self.state.stage, "Render failed: {e}");
                self.settings = None;
                self.active = None;
                self.state.stage = Stage::Finished;
                Step::Failed(e)
            }
        }
    }

    /// Snapshot compiled modules, or deliver the diagnostic frame
    fn start(&mut self) -> RenderStatus {
        let generation = self.state.generation;
        let active = self.kernels.as_ref().and_then(collect_modules);
        let failures = match &active {
            Some(active) => active.failures(),
            None => self
                .kernels
                .as_ref()
                .map(SceneKernels::failures)
                .unwrap_or_default(),
        };
        if !failures.is_empty() || active.is_none() {
            warn!(generation, failed = ?failures, "Delivering diagnostic frame");
            let (width, height) = self.size;
            if let Some(mut settings) = self.settings.take() {
                settings.finish(diagnostic_frame(width, height));
            }
            self.state.stage = Stage::Finished;
            return RenderStatus::Failed(failures);
        }
        self.active = active;
        self.state.stage = Stage::HitAndNormals;
        debug!(generation, "Render started");
        RenderStatus::Started(generation)
    }

    fn advance(&mut self, backend: &mut dyn GpuBackend) -> Result<Step> {
        if !self.prepared {
            self.prepare(backend)?;
        }
        let stage = self.state.stage;
        debug!(
            %stage,
            line = self.state.line_start,
            reflection = self.state.reflection,
            sample = self.state.sample,
            "Running stage"
        );
        match stage {
            Stage::HitAndNormals => self.hit_and_normals(backend),
            Stage::Ao => self.ambient_occlusion(backend),
            Stage::ShadowsAndMaterials => self.shadows_and_materials(backend),
            Stage::Reflection => self.reflection(backend),
            Stage::None | Stage::Compiled | Stage::Finished => Ok(Step::Idle),
        }
    }

    /// Size buffers and upload parameters once per render
    fn prepare(&mut self, backend: &mut dyn GpuBackend) -> Result<()> {
        let (width, height) = self.size;
        backend.resize(width, height)?;
        for buffer in FRAME_BUFFERS {
            backend.ensure(buffer)?;
        }
        for buffer in self.state.shape.both() {
            backend.ensure(buffer)?;
        }
        for buffer in self.state.meta.both() {
            backend.ensure(buffer)?;
        }
        let (time, seed) = self
            .settings
            .as_ref()
            .map_or((0.0, 0.0), |settings| (settings.time, settings.seed));
        if let Some(active) = &self.active {
            for instance in std::iter::once(&active.camera)
                .chain(std::iter::once(&active.background))
                .chain(active.objects.iter())
            {
                if let Some(pipeline) = instance.pipeline {
                    let mut slots = instance.properties.slots().to_vec();
                    if let Some(globals) = slots.first_mut() {
                        *globals = [time, 0.0, seed, 0.0];
                    }
                    backend.upload_data(pipeline, &slots)?;
                }
            }
        }
        match &self.terrain {
            Some(map) => backend.upload_terrain(&map.heights, map.resolution)?,
            None => backend.upload_terrain(&[0.0], 1)?,
        }
        self.prepared = true;
        Ok(())
    }

    fn output(&self) -> OutputType {
        self.settings
            .as_ref()
            .map_or(OutputType::FinalImage, |settings| settings.output)
    }

    fn bounce_count(&self) -> u32 {
        if self.minimal_preview {
            return 1;
        }
        self.settings.as_ref().map_or(1, RenderSettings::bounce_count)
    }

    fn sample_count(&self) -> u32 {
        if self.minimal_preview {
            return 1;
        }
        self.settings.as_ref().map_or(1, RenderSettings::sample_count)
    }

    fn chunk_count(&self) -> u32 {
        self.size.1.div_ceil(self.chunk_rows)
    }

    fn rows(&self) -> u32 {
        self.chunk_rows.min(self.size.1 - self.state.line_start)
    }

    /// Frame uniforms of the current chunk
    fn frame(&self) -> FrameUniforms {
        let (width, height) = self.size;
        let mut frame = FrameUniforms::new(width, height).with_rows(self.state.line_start, self.rows());
        frame.sample_index = self.state.sample + 1;
        frame.reflection = self.state.reflection;
        frame.jitter = u32::from(self.sample_count() > 1);
        frame.time = self.settings.as_ref().map_or(0.0, |settings| settings.time);
        frame
    }

    /// Frame uniforms covering every row
    fn full_frame(&self) -> FrameUniforms {
        let mut frame = self.frame();
        frame.line_start = 0;
        frame.line_count = self.size.1;
        frame
    }

    fn objects(&self) -> Vec<Arc<CompiledInstance>> {
        self.active
            .as_ref()
            .map(|active| active.objects.clone())
            .unwrap_or_default()
    }

    fn kernel_pass(
        &self,
        instance: &CompiledInstance,
        entry: KernelEntry,
        frame: FrameUniforms,
        light: LightUniforms,
    ) -> Result<KernelPass> {
        let pipeline = instance.pipeline.ok_or(BackendError::NotBuilt)?;
        Ok(KernelPass {
            pipeline,
            entry,
            label: instance.label.clone(),
            frame,
            light,
            bindings: self.state.kernel_bindings(),
        })
    }

    fn clear(&self, backend: &mut dyn GpuBackend, buffer: BufferId, value: [f32; 4]) -> Result<()> {
        backend.utility(
            &UtilityPass::new(UtilityOp::Clear, self.frame().with_value(value)).target(0, buffer),
        )
    }

    /// Primary rays and background of a new sample
    fn begin_sample(&self, backend: &mut dyn GpuBackend) -> Result<()> {
        let Some(active) = &self.active else {
            return Err(BackendError::NotBuilt);
        };
        let frame = self.full_frame();
        let light = LightUniforms::default();
        let camera = self.kernel_pass(&active.camera, KernelEntry::Camera, frame, light)?;
        backend.dispatch(&camera)?;
        let background = self.kernel_pass(&active.background, KernelEntry::Background, frame, light)?;
        backend.dispatch(&background)
    }

    fn hit_and_normals(&mut self, backend: &mut dyn GpuBackend) -> Result<Step> {
        if self.state.line_start == 0 && self.state.reflection == 0 {
            self.begin_sample(backend)?;
        }
        let frame = self.frame();
        if self.state.reflection == 0 {
            self.clear(backend, BufferId::Color, COLOR_INIT)?;
            self.clear(backend, BufferId::Mask, MASK_INIT)?;
            self.clear(backend, BufferId::Density, DENSITY_INIT)?;
        }
        for buffer in self.state.meta.both() {
            backend.ensure(buffer)?;
        }
        self.clear(backend, self.state.shape.current(), NO_HIT)?;
        self.clear(backend, self.state.meta.current(), META_INIT)?;

        let light = self.lights.first().copied().unwrap_or_default();
        for object in self.objects() {
            let pass = self.kernel_pass(&object, KernelEntry::HitAndNormals, frame, light)?;
            backend.dispatch(&pass)?;
            self.state.shape.swap();
            self.state.meta.swap();
        }

        if self.minimal_preview {
            backend.utility(
                &UtilityPass::new(UtilityOp::Preview, frame)
                    .source(0, self.state.shape.current())
                    .source(1, BufferId::Normal)
                    .source(2, BufferId::Back)
                    .target(0, BufferId::Color),
            )?;
            return self.finish_chunk(backend);
        }
        if self.output() == OutputType::DepthMap {
            backend.utility(
                &UtilityPass::new(
                    UtilityOp::DepthView,
                    frame.with_value([self.depth_far, 0.0, 0.0, 0.0]),
                )
                .source(0, self.state.shape.current())
                .target(0, BufferId::Color),
            )?;
            return self.finish_chunk(backend);
        }
        self.state.stage = Stage::Ao;
        Ok(Step::Continue)
    }

    fn ambient_occlusion(&mut self, backend: &mut dyn GpuBackend) -> Result<Step> {
        let frame = self.frame();
        let light = self.lights.first().copied().unwrap_or_default();
        for object in self.objects() {
            let pass = self.kernel_pass(&object, KernelEntry::Ao, frame, light)?;
            backend.dispatch(&pass)?;
            self.state.meta.swap();
        }
        if self.output() == OutputType::Ao {
            backend.release(self.state.meta.other());
            backend.utility(
                &UtilityPass::new(UtilityOp::AoView, frame)
                    .source(0, self.state.meta.current())
                    .target(0, BufferId::Color),
            )?;
            return self.finish_chunk(backend);
        }
        self.state.stage = Stage::ShadowsAndMaterials;
        Ok(Step::Continue)
    }

    fn shadows_and_materials(&mut self, backend: &mut dyn GpuBackend) -> Result<Step> {
        let frame = self.frame();
        let output = self.output();
        let shading = !output.is_auxiliary();
        if shading {
            for buffer in self.state.refl_dir.both() {
                backend.ensure(buffer)?;
            }
            self.clear(backend, self.state.refl_dir.current(), DEAD_RAY)?;
        }

        // Auxiliary views show the sun only
        let lights = if shading {
            self.lights.clone()
        } else {
            self.lights.iter().take(1).copied().collect()
        };
        let objects = self.objects();
        for light in lights {
            backend.utility(
                &UtilityPass::new(UtilityOp::ClearShadow, self.full_frame())
                    .source(0, self.state.meta.current())
                    .target(0, self.state.meta.other()),
            )?;
            self.state.meta.swap();
            for object in &objects {
                let pass = self.kernel_pass(object, KernelEntry::Shadow, frame, light)?;
                backend.dispatch(&pass)?;
                self.state.meta.swap();
            }
            if !shading {
                continue;
            }
            for object in &objects {
                let pass = self.kernel_pass(object, KernelEntry::Material, frame, light)?;
                backend.dispatch(&pass)?;
                self.state.refl_dir.swap();
            }
        }
        // Meta is rebuilt by the next hit pass
        backend.release(self.state.meta.other());

        match output {
            OutputType::Shadows => {
                backend.utility(
                    &UtilityPass::new(UtilityOp::ShadowView, frame)
                        .source(0, self.state.meta.current())
                        .target(0, BufferId::Color),
                )?;
                self.finish_chunk(backend)
            }
            OutputType::FogDensity => {
                backend.utility(
                    &UtilityPass::new(UtilityOp::DensityView, frame)
                        .source(0, BufferId::Density)
                        .target(0, BufferId::Color),
                )?;
                self.finish_chunk(backend)
            }
            OutputType::FinalImage | OutputType::DepthMap | OutputType::Ao => {
                self.state.stage = Stage::Reflection;
                Ok(Step::Continue)
            }
        }
    }

    fn reflection(&mut self, backend: &mut dyn GpuBackend) -> Result<Step> {
        let last = self.state.reflection + 1 >= self.bounce_count();
        let frame = self
            .frame()
            .with_value([if last { 1.0 } else { 0.0 }, 0.0, 0.0, 0.0]);
        for buffer in self.state.refl_color.both() {
            backend.ensure(buffer)?;
        }
        backend.utility(
            &UtilityPass::new(UtilityOp::Reflect, frame)
                .source(0, self.state.shape.current())
                .source(1, self.state.refl_dir.current())
                .source(2, BufferId::Density)
                .source(3, self.state.refl_color.current())
                .target(0, BufferId::RayOrigin)
                .target(1, BufferId::RayDirection)
                .target(2, self.state.refl_color.other())
                .target(3, BufferId::Color),
        )?;
        self.state.refl_color.swap();
        backend.release(self.state.refl_color.other());
        backend.release(self.state.refl_dir.other());

        if last {
            return self.finish_chunk(backend);
        }
        self.state.reflection += 1;
        self.state.stage = Stage::HitAndNormals;
        Ok(Step::Continue)
    }

    /// Report progress and move to the next chunk, sample or the end
    fn finish_chunk(&mut self, backend: &mut dyn GpuBackend) -> Result<Step> {
        let chunks = self.chunk_count();
        let chunk = self.state.line_start / self.chunk_rows;
        let done = self.state.sample * chunks + chunk + 1;
        let total = self.sample_count() * chunks;
        if let Some(settings) = self.settings.as_mut() {
            settings.report_progress(done, total);
        }

        let rows = self.rows();
        self.state.next_chunk(rows);
        if self.state.line_start < self.size.1 {
            self.state.stage = Stage::HitAndNormals;
            return Ok(Step::Continue);
        }

        if self.minimal_preview {
            return self.finish(backend, UtilityOp::CopyGamma, BufferId::Color);
        }
        if self.output().is_auxiliary() {
            return self.finish(backend, UtilityOp::Copy, BufferId::Color);
        }

        backend.utility(
            &UtilityPass::new(UtilityOp::Accumulate, self.full_frame())
                .source(0, BufferId::Color)
                .target(0, BufferId::Accumulation),
        )?;
        if self.state.sample + 1 < self.sample_count() {
            self.state.next_sample();
            self.state.stage = Stage::HitAndNormals;
            debug!(sample = self.state.sample, "Next sample");
            return Ok(Step::Continue);
        }
        self.finish(backend, UtilityOp::CopyGamma, BufferId::Accumulation)
    }

    fn finish(&mut self, backend: &mut dyn GpuBackend, op: UtilityOp, source: BufferId) -> Result<Step> {
        backend.ensure(BufferId::Output)?;
        backend.utility(
            &UtilityPass::new(op, self.full_frame())
                .source(0, source)
                .target(0, BufferId::Output),
        )?;
        let pixels = backend.read(BufferId::Output)?;
        for buffer in self.state.idle_buffers() {
            backend.release(buffer);
        }

        let (width, height) = self.size;
        self.state.stage = Stage::Finished;
        self.active = None;
        if let Some(mut settings) = self.settings.take() {
            settings.finish(to_image(width, height, &pixels));
        }
        info!(
            generation = self.state.generation,
            width,
            height,
            samples = self.state.sample + 1,
            "Render finished"
        );
        Ok(Step::Finished)
    }
}

/// Compiled modules of every enabled object, `None` while any is compiling
fn collect_modules(kernels: &SceneKernels) -> Option<ActiveModules> {
    let camera = kernels.camera.lock().instance().cloned()?;
    let background = kernels.background.lock().instance().cloned()?;
    let objects = kernels
        .objects
        .iter()
        .filter(|object| !object.disabled)
        .map(|object| object.slot.lock().instance().cloned())
        .collect::<Option<Vec<_>>>()?;
    Some(ActiveModules {
        camera,
        background,
        objects,
    })
}
