//! Backends that record work instead of running it
//!
//! Used by tests and by `rz trace` to inspect the pass sequence of a render
//! without a GPU.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use rz_sdf::{CompiledInstance, KernelEntry, KernelHandle, ShaderBackend, ShaderError};

use crate::backend::{BufferId, GpuBackend, KernelPass, UtilityOp, UtilityPass};
use crate::error::{BackendError, Result};

/// One call made on a [`RecordingBackend`]
#[derive(Debug, Clone, PartialEq)]
pub enum RecordedOp {
    Resize { width: u32, height: u32 },
    Ensure(BufferId),
    Release(BufferId),
    UploadData { pipeline: KernelHandle, slots: usize },
    UploadTerrain { resolution: u32 },
    Dispatch {
        entry: KernelEntry,
        label: String,
        line_start: u32,
        reflection: u32,
        sample: u32,
    },
    Utility { op: UtilityOp, line_start: u32 },
    Read(BufferId),
}

/// A [`GpuBackend`] that keeps a log and answers reads with a flat color
#[derive(Debug, Clone)]
pub struct RecordingBackend {
    ops: Vec<RecordedOp>,
    resident: BTreeSet<BufferId>,
    size: (u32, u32),
    fill: [f32; 4],
}

impl Default for RecordingBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl RecordingBackend {
    pub fn new() -> Self {
        Self {
            ops: Vec::new(),
            resident: BTreeSet::new(),
            size: (0, 0),
            fill: [0.0, 0.0, 0.0, 1.0],
        }
    }

    /// Color returned for every pixel of a read
    pub fn with_fill(mut self, fill: [f32; 4]) -> Self {
        self.fill = fill;
        self
    }

    pub fn ops(&self) -> &[RecordedOp] {
        &self.ops
    }

    pub fn clear(&mut self) {
        self.ops.clear();
    }

    pub fn is_resident(&self, buffer: BufferId) -> bool {
        self.resident.contains(&buffer)
    }

    /// Entry points in dispatch order
    pub fn entries(&self) -> Vec<KernelEntry> {
        self.ops
            .iter()
            .filter_map(|op| match op {
                RecordedOp::Dispatch { entry, .. } => Some(*entry),
                _ => None,
            })
            .collect()
    }

    pub fn dispatches(&self, entry: KernelEntry) -> usize {
        self.entries().into_iter().filter(|e| *e == entry).count()
    }

    pub fn utilities(&self, op: UtilityOp) -> usize {
        self.ops
            .iter()
            .filter(|recorded| matches!(recorded, RecordedOp::Utility { op: o, .. } if *o == op))
            .count()
    }

    /// Human-readable log, one op per line
    pub fn describe(&self) -> String {
        let mut out = String::new();
        for op in &self.ops {
            let line = match op {
                RecordedOp::Resize { width, height } => format!("resize {width}x{height}"),
                RecordedOp::Ensure(buffer) => format!("ensure {}", buffer.label()),
                RecordedOp::Release(buffer) => format!("release {}", buffer.label()),
                RecordedOp::UploadData { pipeline, slots } => {
                    format!("upload {slots} slots to pipeline {}", pipeline.0)
                }
                RecordedOp::UploadTerrain { resolution } => {
                    format!("upload terrain {resolution}x{resolution}")
                }
                RecordedOp::Dispatch {
                    entry,
                    label,
                    line_start,
                    reflection,
                    sample,
                } => format!(
                    "dispatch {} of {label} (line {line_start}, bounce {reflection}, sample {sample})",
                    entry.name()
                ),
                RecordedOp::Utility { op, line_start } => {
                    format!("utility {} (line {line_start})", op.entry_point())
                }
                RecordedOp::Read(buffer) => format!("read {}", buffer.label()),
            };
            out.push_str(&line);
            out.push('\n');
        }
        out
    }

    fn require(&self, buffer: BufferId) -> Result<()> {
        if self.resident.contains(&buffer) {
            Ok(())
        } else {
            Err(BackendError::MissingBuffer(buffer))
        }
    }
}

/// Buffers an entry point reads or writes besides the frame-wide ones
fn kernel_buffers(pass: &KernelPass) -> Vec<BufferId> {
    let b = &pass.bindings;
    match pass.entry {
        KernelEntry::Camera | KernelEntry::Background => vec![BufferId::RayOrigin, BufferId::RayDirection],
        KernelEntry::HitAndNormals => vec![b.shape_in, b.shape_out, b.meta_in, b.meta_out],
        KernelEntry::Ao | KernelEntry::Shadow => vec![b.shape_in, b.meta_in, b.meta_out],
        KernelEntry::Material => vec![b.shape_in, b.meta_in, b.refl_dir_in, b.refl_dir_out],
    }
}

impl GpuBackend for RecordingBackend {
    fn resize(&mut self, width: u32, height: u32) -> Result<()> {
        if width == 0 || height == 0 {
            return Err(BackendError::InvalidSize { width, height });
        }
        if self.size != (width, height) {
            self.resident.clear();
        }
        self.size = (width, height);
        self.ops.push(RecordedOp::Resize { width, height });
        Ok(())
    }

    fn ensure(&mut self, buffer: BufferId) -> Result<()> {
        if self.resident.insert(buffer) {
            self.ops.push(RecordedOp::Ensure(buffer));
        }
        Ok(())
    }

    fn release(&mut self, buffer: BufferId) {
        if self.resident.remove(&buffer) {
            self.ops.push(RecordedOp::Release(buffer));
        }
    }

    fn upload_data(&mut self, pipeline: KernelHandle, slots: &[[f32; 4]]) -> Result<()> {
        self.ops.push(RecordedOp::UploadData {
            pipeline,
            slots: slots.len(),
        });
        Ok(())
    }

    fn upload_terrain(&mut self, _heights: &[f32], resolution: u32) -> Result<()> {
        self.ops.push(RecordedOp::UploadTerrain { resolution });
        Ok(())
    }

    fn dispatch(&mut self, pass: &KernelPass) -> Result<()> {
        for buffer in kernel_buffers(pass) {
            self.require(buffer)?;
        }
        self.ops.push(RecordedOp::Dispatch {
            entry: pass.entry,
            label: pass.label.clone(),
            line_start: pass.frame.line_start,
            reflection: pass.frame.reflection,
            sample: pass.frame.sample_index,
        });
        Ok(())
    }

    fn utility(&mut self, pass: &UtilityPass) -> Result<()> {
        for buffer in pass.buffers() {
            self.require(buffer)?;
        }
        self.ops.push(RecordedOp::Utility {
            op: pass.op,
            line_start: pass.frame.line_start,
        });
        Ok(())
    }

    fn read(&mut self, buffer: BufferId) -> Result<Vec<[f32; 4]>> {
        self.require(buffer)?;
        self.ops.push(RecordedOp::Read(buffer));
        let (width, height) = self.size;
        Ok(vec![self.fill; (width * height) as usize])
    }
}

/// A [`ShaderBackend`] handing out sequential handles
///
/// Modules whose label is listed with [`RecordingCompiler::failing_on`] are
/// rejected.
#[derive(Debug, Default)]
pub struct RecordingCompiler {
    next: AtomicU64,
    failing: Vec<String>,
    compiled: Mutex<Vec<String>>,
}

impl RecordingCompiler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_on(mut self, label: impl Into<String>) -> Self {
        self.failing.push(label.into());
        self
    }

    /// Labels of every module compiled so far, in order
    pub fn compiled(&self) -> Vec<String> {
        self.compiled.lock().clone()
    }
}

impl ShaderBackend for RecordingCompiler {
    fn compile(&self, instance: &CompiledInstance) -> std::result::Result<KernelHandle, ShaderError> {
        self.compiled.lock().push(instance.label.clone());
        if self.failing.contains(&instance.label) {
            return Err(ShaderError::Backend(format!("{} rejected", instance.label)));
        }
        Ok(KernelHandle(self.next.fetch_add(1, Ordering::SeqCst)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::FrameUniforms;

    #[test]
    fn test_missing_buffer_is_an_error() {
        let mut backend = RecordingBackend::new();
        backend.resize(4, 4).unwrap();
        let pass = UtilityPass::new(UtilityOp::Copy, FrameUniforms::new(4, 4))
            .source(0, BufferId::Color)
            .target(0, BufferId::Output);
        assert_eq!(
            backend.utility(&pass),
            Err(BackendError::MissingBuffer(BufferId::Color))
        );
        backend.ensure(BufferId::Color).unwrap();
        backend.ensure(BufferId::Output).unwrap();
        assert!(backend.utility(&pass).is_ok());
        assert_eq!(backend.utilities(UtilityOp::Copy), 1);
    }

    #[test]
    fn test_resize_drops_buffers() {
        let mut backend = RecordingBackend::new();
        backend.resize(4, 4).unwrap();
        backend.ensure(BufferId::Color).unwrap();
        backend.resize(8, 4).unwrap();
        assert!(!backend.is_resident(BufferId::Color));
        backend.ensure(BufferId::Color).unwrap();
        assert_eq!(backend.read(BufferId::Color).unwrap().len(), 32);
    }
}
