//! The GPU seam of the scheduler
//!
//! The scheduler never touches a device directly. It describes each unit of
//! work as a [`KernelPass`] (a compiled entry point of an object module) or a
//! [`UtilityPass`] (one of the fixed helper kernels) and hands it to a
//! [`GpuBackend`].

use bytemuck::{Pod, Zeroable};
use rz_sdf::{KernelEntry, KernelHandle};

use crate::environment::LightUniforms;
use crate::error::Result;

/// Per-pixel buffers owned by the backend, one `vec4<f32>` per pixel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum BufferId {
    RayOrigin,
    RayDirection,
    ShapeA,
    ShapeB,
    Normal,
    MetaA,
    MetaB,
    Color,
    Mask,
    Density,
    Back,
    ReflColorA,
    ReflColorB,
    ReflDirA,
    ReflDirB,
    Accumulation,
    Output,
}

impl BufferId {
    pub const ALL: [BufferId; 17] = [
        BufferId::RayOrigin,
        BufferId::RayDirection,
        BufferId::ShapeA,
        BufferId::ShapeB,
        BufferId::Normal,
        BufferId::MetaA,
        BufferId::MetaB,
        BufferId::Color,
        BufferId::Mask,
        BufferId::Density,
        BufferId::Back,
        BufferId::ReflColorA,
        BufferId::ReflColorB,
        BufferId::ReflDirA,
        BufferId::ReflDirB,
        BufferId::Accumulation,
        BufferId::Output,
    ];

    pub fn label(self) -> &'static str {
        match self {
            Self::RayOrigin => "ray origin",
            Self::RayDirection => "ray direction",
            Self::ShapeA => "shape a",
            Self::ShapeB => "shape b",
            Self::Normal => "normal",
            Self::MetaA => "meta a",
            Self::MetaB => "meta b",
            Self::Color => "color",
            Self::Mask => "mask",
            Self::Density => "density",
            Self::Back => "background",
            Self::ReflColorA => "reflection color a",
            Self::ReflColorB => "reflection color b",
            Self::ReflDirA => "reflection direction a",
            Self::ReflDirB => "reflection direction b",
            Self::Accumulation => "accumulation",
            Self::Output => "output",
        }
    }
}

/// The `Frame` uniform of every kernel
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct FrameUniforms {
    pub size: [f32; 2],
    pub line_start: u32,
    pub line_count: u32,
    /// 1-based index of the sample being rendered
    pub sample_index: u32,
    pub reflection: u32,
    /// Non-zero to jitter camera rays inside the pixel
    pub jitter: u32,
    pub time: f32,
    /// Free operand of utility kernels
    pub value: [f32; 4],
}

impl FrameUniforms {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            size: [width as f32, height as f32],
            line_start: 0,
            line_count: height,
            sample_index: 1,
            reflection: 0,
            jitter: 0,
            time: 0.0,
            value: [0.0; 4],
        }
    }

    pub fn with_rows(mut self, start: u32, count: u32) -> Self {
        self.line_start = start;
        self.line_count = count;
        self
    }

    pub fn with_value(mut self, value: [f32; 4]) -> Self {
        self.value = value;
        self
    }
}

/// Which half of each double-buffered pair a kernel reads and writes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KernelBindings {
    pub shape_in: BufferId,
    pub shape_out: BufferId,
    pub meta_in: BufferId,
    pub meta_out: BufferId,
    pub refl_dir_in: BufferId,
    pub refl_dir_out: BufferId,
}

/// One dispatch of a compiled entry point
#[derive(Debug, Clone, PartialEq)]
pub struct KernelPass {
    pub pipeline: KernelHandle,
    pub entry: KernelEntry,
    /// Module label, for logs
    pub label: String,
    pub frame: FrameUniforms,
    pub light: LightUniforms,
    pub bindings: KernelBindings,
}

/// The fixed helper kernels of the scheduler
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UtilityOp {
    /// `dst_a = value` over the frame rows
    Clear,
    /// Copy `src_a` into `dst_a` resetting the shadow lane to 1
    ClearShadow,
    Copy,
    /// Copy with display gamma
    CopyGamma,
    /// Running mean of `src_a` into `dst_a`
    Accumulate,
    /// Hit distance over `value.x` as grey
    DepthView,
    AoView,
    ShadowView,
    DensityView,
    /// Flat shading from shape, normal and background
    Preview,
    /// Turn material reflection rays into the next bounce
    Reflect,
}

impl UtilityOp {
    /// WGSL entry point in the utility module
    pub fn entry_point(self) -> &'static str {
        match self {
            Self::Clear => "clear",
            Self::ClearShadow => "clear_shadow",
            Self::Copy => "copy",
            Self::CopyGamma => "copy_gamma",
            Self::Accumulate => "accumulate",
            Self::DepthView => "depth_view",
            Self::AoView => "ao_view",
            Self::ShadowView => "shadow_view",
            Self::DensityView => "density_view",
            Self::Preview => "preview",
            Self::Reflect => "reflect_rays",
        }
    }

    pub const ALL: [UtilityOp; 11] = [
        UtilityOp::Clear,
        UtilityOp::ClearShadow,
        UtilityOp::Copy,
        UtilityOp::CopyGamma,
        UtilityOp::Accumulate,
        UtilityOp::DepthView,
        UtilityOp::AoView,
        UtilityOp::ShadowView,
        UtilityOp::DensityView,
        UtilityOp::Preview,
        UtilityOp::Reflect,
    ];
}

/// One dispatch of a helper kernel
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct UtilityPass {
    pub op: UtilityOp,
    pub frame: FrameUniforms,
    /// `src_a..src_d`, read only
    pub sources: [Option<BufferId>; 4],
    /// `dst_a..dst_d`
    pub targets: [Option<BufferId>; 4],
}

impl UtilityPass {
    pub fn new(op: UtilityOp, frame: FrameUniforms) -> Self {
        Self {
            op,
            frame,
            sources: [None; 4],
            targets: [None; 4],
        }
    }

    pub fn source(mut self, index: usize, buffer: BufferId) -> Self {
        self.sources[index] = Some(buffer);
        self
    }

    pub fn target(mut self, index: usize, buffer: BufferId) -> Self {
        self.targets[index] = Some(buffer);
        self
    }

    /// Every buffer the pass touches
    pub fn buffers(&self) -> impl Iterator<Item = BufferId> + '_ {
        self.sources.iter().chain(self.targets.iter()).flatten().copied()
    }
}

/// Executes passes and owns the pixel buffers
pub trait GpuBackend {
    /// Set the image size; buffers are reallocated lazily
    fn resize(&mut self, width: u32, height: u32) -> Result<()>;

    /// Allocate a buffer if it is not resident
    fn ensure(&mut self, buffer: BufferId) -> Result<()>;

    /// Free a buffer until the next `ensure`
    fn release(&mut self, buffer: BufferId);

    /// Replace the `data` slots bound to a pipeline
    fn upload_data(&mut self, pipeline: KernelHandle, slots: &[[f32; 4]]) -> Result<()>;

    /// Replace the terrain height grid, `resolution` texels per side
    fn upload_terrain(&mut self, heights: &[f32], resolution: u32) -> Result<()>;

    fn dispatch(&mut self, pass: &KernelPass) -> Result<()>;

    fn utility(&mut self, pass: &UtilityPass) -> Result<()>;

    /// Copy a buffer back to the CPU
    fn read(&mut self, buffer: BufferId) -> Result<Vec<[f32; 4]>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_layout_matches_wgsl() {
        assert_eq!(std::mem::size_of::<FrameUniforms>(), 48);
        assert_eq!(std::mem::offset_of!(FrameUniforms, value), 32);
    }

    #[test]
    fn test_utility_pass_buffers() {
        let pass = UtilityPass::new(UtilityOp::Copy, FrameUniforms::new(4, 4))
            .source(0, BufferId::Color)
            .target(0, BufferId::Output);
        assert_eq!(pass.buffers().collect::<Vec<_>>(), vec![BufferId::Color, BufferId::Output]);
    }
}
