//! Mutable scheduler state

use crate::backend::{BufferId, KernelBindings};
use crate::pingpong::PingPong;
use crate::stage::Stage;

/// Scheduler-owned progress of the current render
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineState {
    pub stage: Stage,
    /// First row of the current chunk
    pub line_start: u32,
    /// Bounce inside the current chunk, 0 for camera rays
    pub reflection: u32,
    /// Samples completed
    pub sample: u32,
    /// Generation of the render this state belongs to
    pub generation: u64,
    pub shape: PingPong<BufferId>,
    pub meta: PingPong<BufferId>,
    pub refl_color: PingPong<BufferId>,
    pub refl_dir: PingPong<BufferId>,
}

impl Default for PipelineState {
    fn default() -> Self {
        Self::new()
    }
}

impl PipelineState {
    pub fn new() -> Self {
        Self {
            stage: Stage::None,
            line_start: 0,
            reflection: 0,
            sample: 0,
            generation: 0,
            shape: PingPong::new(BufferId::ShapeA, BufferId::ShapeB),
            meta: PingPong::new(BufferId::MetaA, BufferId::MetaB),
            refl_color: PingPong::new(BufferId::ReflColorA, BufferId::ReflColorB),
            refl_dir: PingPong::new(BufferId::ReflDirA, BufferId::ReflDirB),
        }
    }

    /// Start over for a new render
    pub fn reset(&mut self, generation: u64) {
        self.line_start = 0;
        self.reflection = 0;
        self.sample = 0;
        self.generation = generation;
        self.shape.reset();
        self.meta.reset();
        self.refl_color.reset();
        self.refl_dir.reset();
    }

    /// Move to the next chunk, resetting the bounce
    pub fn next_chunk(&mut self, rows: u32) {
        self.line_start += rows;
        self.reflection = 0;
    }

    /// Move to the next sample, resetting chunk and bounce
    pub fn next_sample(&mut self) {
        self.sample += 1;
        self.line_start = 0;
        self.reflection = 0;
    }

    pub fn kernel_bindings(&self) -> KernelBindings {
        KernelBindings {
            shape_in: self.shape.current(),
            shape_out: self.shape.other(),
            meta_in: self.meta.current(),
            meta_out: self.meta.other(),
            refl_dir_in: self.refl_dir.current(),
            refl_dir_out: self.refl_dir.other(),
        }
    }

    /// Write halves of every pair, free between passes
    pub fn idle_buffers(&self) -> [BufferId; 4] {
        [
            self.shape.other(),
            self.meta.other(),
            self.refl_color.other(),
            self.refl_dir.other(),
        ]
    }
}
