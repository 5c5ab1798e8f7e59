//! rz Render - Staged deferred raymarching on the GPU
//!
//! This crate schedules the modules produced by `rz-sdf` through a deferred
//! pipeline and delivers the finished image.
//!
//! ## Features
//!
//! - Hit/normal, ambient occlusion, shadow/material and reflection stages
//! - Scanline chunks, reflection bounces and sample accumulation
//! - Cooperative stepping with generation-based cancellation
//! - Depth, AO, shadow and fog-density debug outputs
//! - A wgpu backend and a recording backend for tests and tracing
//!
//! ## Example
//!
//! ```rust,ignore
//! use rz_render::{Pipeline3D, RenderSettings, WgpuBackend, init_headless};
//!
//! let (device, queue) = pollster::block_on(init_headless())?;
//! let mut backend = WgpuBackend::new(device, queue)?;
//! let mut builder = CodeBuilder::new(CompileContext::new(resolver, backend.compiler()));
//!
//! let mut pipeline = Pipeline3D::new();
//! pipeline.build(&mut builder, &scene)?;
//! let status = pipeline.render(800, 600, RenderSettings::new().on_finished(|image| save(image)))?;
//! if let Some(generation) = status.generation() {
//!     while !pipeline.step(&mut backend, generation).is_done() {}
//! }
//! ```

pub mod backend;
pub mod environment;
pub mod output;
pub mod pipeline;
pub mod recording;
pub mod settings;
pub mod stage;
pub mod wgpu_backend;

mod error;
mod pingpong;
mod state;

// Re-export wgpu for hosts that create their own device
pub use wgpu;

pub use backend::{
    BufferId, FrameUniforms, GpuBackend, KernelBindings, KernelPass, UtilityOp, UtilityPass,
};
pub use environment::{LightUniforms, scene_lights};
pub use error::{BackendError, Result};
pub use output::{DIAGNOSTIC_COLOR, diagnostic_frame, to_image, to_rgba8};
pub use pingpong::PingPong;
pub use pipeline::{
    CancelHandle, DEFAULT_CHUNK_ROWS, DEFAULT_DEPTH_FAR, Pipeline3D, RenderStatus, Step,
};
pub use recording::{RecordedOp, RecordingBackend, RecordingCompiler};
pub use settings::{FinishedCallback, ProgressCallback, RenderSettings};
pub use stage::{OutputType, Stage};
pub use state::PipelineState;
pub use wgpu_backend::{WgpuBackend, WgpuCompiler, init_headless};
