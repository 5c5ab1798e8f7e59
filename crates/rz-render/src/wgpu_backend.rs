//! GPU execution of the pipeline with wgpu
//!
//! [`WgpuBackend`] owns the per-pixel buffers and runs passes. Its
//! [`WgpuCompiler`] turns compiled modules into compute pipelines and can be
//! handed to the SDF compiler as its [`ShaderBackend`]. Both share one table
//! of pipelines keyed by [`KernelHandle`].

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::Context;
use parking_lot::Mutex;
use rz_core::component::TextureRef;
use rz_sdf::{CompiledInstance, KernelEntry, KernelHandle, ShaderBackend, ShaderError};
use tracing::{debug, info, warn};
use wgpu::util::DeviceExt;

use crate::backend::{BufferId, FrameUniforms, GpuBackend, KernelPass, UtilityOp, UtilityPass};
use crate::error::{BackendError, Result};

const UTILITY_SHADER: &str = include_str!("shaders/utility.wgsl");

/// Bytes of one pixel in every pipeline buffer
const PIXEL_BYTES: u64 = 16;

const WORKGROUP: u32 = 8;

/// Pipelines of one compiled module
struct GpuKernels {
    label: String,
    pipelines: HashMap<KernelEntry, wgpu::ComputePipeline>,
    light_layout: wgpu::BindGroupLayout,
    textures: Vec<(u32, wgpu::TextureView)>,
    light_binding: u32,
}

type KernelTable = Arc<Mutex<HashMap<u64, GpuKernels>>>;

fn storage_entry(binding: u32, read_only: bool) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Storage { read_only },
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}

fn uniform_entry(binding: u32) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Uniform,
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}

/// Bind group 0 of every generated module
fn kernel_layout(device: &wgpu::Device) -> wgpu::BindGroupLayout {
    let read_only = [0, 4, 7, 13, 15];
    let mut entries: Vec<_> = (0..16)
        .map(|binding| {
            if binding == 1 {
                uniform_entry(binding)
            } else {
                storage_entry(binding, read_only.contains(&binding))
            }
        })
        .collect();
    entries.push(wgpu::BindGroupLayoutEntry {
        binding: 16,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
        count: None,
    });
    device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
        label: Some("Kernel Bind Group Layout"),
        entries: &entries,
    })
}

/// Bind group 1 of a module: its textures, then the light uniform
fn light_layout(device: &wgpu::Device, instance: &CompiledInstance) -> wgpu::BindGroupLayout {
    let start = instance.textures.start();
    let mut entries: Vec<_> = (0..instance.textures.len() as u32)
        .map(|i| wgpu::BindGroupLayoutEntry {
            binding: start + i,
            visibility: wgpu::ShaderStages::COMPUTE,
            ty: wgpu::BindingType::Texture {
                sample_type: wgpu::TextureSampleType::Float { filterable: true },
                view_dimension: wgpu::TextureViewDimension::D2,
                multisampled: false,
            },
            count: None,
        })
        .collect();
    entries.push(uniform_entry(instance.textures.after_offset()));
    device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
        label: Some("Light Bind Group Layout"),
        entries: &entries,
    })
}

/// Compiles modules into the shared pipeline table
pub struct WgpuCompiler {
    device: Arc<wgpu::Device>,
    queue: Arc<wgpu::Queue>,
    kernel_layout: wgpu::BindGroupLayout,
    kernels: KernelTable,
    next: AtomicU64,
}

impl WgpuCompiler {
    fn load_texture(&self, texture: &TextureRef) -> wgpu::TextureView {
        let image = match image::open(&texture.path) {
            Ok(image) => image.to_rgba8(),
            Err(e) => {
                warn!(name = %texture.name, path = %texture.path, "Failed to load texture: {e}");
                image::RgbaImage::from_pixel(1, 1, image::Rgba([255, 255, 255, 255]))
            }
        };
        let (width, height) = image.dimensions();
        let size = wgpu::Extent3d {
            width,
            height,
            depth_or_array_layers: 1,
        };
        let gpu_texture = self.device.create_texture(&wgpu::TextureDescriptor {
            label: Some(texture.name.as_str()),
            size,
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: wgpu::TextureFormat::Rgba8Unorm,
            usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        });
        self.queue.write_texture(
            wgpu::TexelCopyTextureInfo {
                texture: &gpu_texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            image.as_raw(),
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(4 * width),
                rows_per_image: Some(height),
            },
            size,
        );
        gpu_texture.create_view(&wgpu::TextureViewDescriptor::default())
    }
}

impl ShaderBackend for WgpuCompiler {
    fn compile(&self, instance: &CompiledInstance) -> std::result::Result<KernelHandle, ShaderError> {
        let light_layout = light_layout(&self.device, instance);
        let layout = self.device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some(instance.label.as_str()),
            bind_group_layouts: &[&self.kernel_layout, &light_layout],
            push_constant_ranges: &[],
        });

        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let module = self.device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some(instance.label.as_str()),
            source: wgpu::ShaderSource::Wgsl(instance.source.as_str().into()),
        });
        let pipelines: HashMap<_, _> = instance
            .entries
            .iter()
            .map(|entry| {
                let pipeline = self
                    .device
                    .create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                        label: Some(entry.name()),
                        layout: Some(&layout),
                        module: &module,
                        entry_point: Some(entry.name()),
                        compilation_options: wgpu::PipelineCompilationOptions::default(),
                        cache: None,
                    });
                (*entry, pipeline)
            })
            .collect();
        if let Some(error) = pollster::block_on(self.device.pop_error_scope()) {
            return Err(ShaderError::Backend(error.to_string()));
        }

        let start = instance.textures.start();
        let textures = instance
            .textures
            .iter()
            .enumerate()
            .map(|(i, texture)| (start + i as u32, self.load_texture(texture)))
            .collect();

        let handle = self.next.fetch_add(1, Ordering::SeqCst);
        self.kernels.lock().insert(
            handle,
            GpuKernels {
                label: instance.label.clone(),
                pipelines,
                light_layout,
                textures,
                light_binding: instance.textures.after_offset(),
            },
        );
        debug!(label = %instance.label, handle, "Created compute pipelines");
        Ok(KernelHandle(handle))
    }
}

/// The helper kernels of the scheduler
struct UtilityKernels {
    layout: wgpu::BindGroupLayout,
    pipelines: HashMap<UtilityOp, wgpu::ComputePipeline>,
}

impl UtilityKernels {
    fn new(device: &wgpu::Device) -> Result<Self> {
        let mut entries = vec![uniform_entry(0)];
        entries.extend((1..5).map(|binding| storage_entry(binding, true)));
        entries.extend((5..9).map(|binding| storage_entry(binding, false)));
        let layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Utility Bind Group Layout"),
            entries: &entries,
        });
        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Utility Pipeline Layout"),
            bind_group_layouts: &[&layout],
            push_constant_ranges: &[],
        });

        device.push_error_scope(wgpu::ErrorFilter::Validation);
        let module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("Utility Shader"),
            source: wgpu::ShaderSource::Wgsl(UTILITY_SHADER.into()),
        });
        let pipelines = UtilityOp::ALL
            .iter()
            .map(|op| {
                let pipeline = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                    label: Some(op.entry_point()),
                    layout: Some(&pipeline_layout),
                    module: &module,
                    entry_point: Some(op.entry_point()),
                    compilation_options: wgpu::PipelineCompilationOptions::default(),
                    cache: None,
                });
                (*op, pipeline)
            })
            .collect();
        if let Some(error) = pollster::block_on(device.pop_error_scope()) {
            return Err(BackendError::Device(error.to_string()));
        }
        Ok(Self { layout, pipelines })
    }
}

/// Runs passes on a wgpu device
pub struct WgpuBackend {
    device: Arc<wgpu::Device>,
    queue: Arc<wgpu::Queue>,
    kernel_layout: wgpu::BindGroupLayout,
    kernels: KernelTable,
    utility: UtilityKernels,
    sampler: wgpu::Sampler,
    size: (u32, u32),
    buffers: HashMap<BufferId, wgpu::Buffer>,
    data: HashMap<u64, wgpu::Buffer>,
    terrain: wgpu::Buffer,
    dummy_read: wgpu::Buffer,
    dummy_write: wgpu::Buffer,
}

impl WgpuBackend {
    pub fn new(device: Arc<wgpu::Device>, queue: Arc<wgpu::Queue>) -> Result<Self> {
        let utility = UtilityKernels::new(&device)?;
        let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("Linear Sampler"),
            address_mode_u: wgpu::AddressMode::Repeat,
            address_mode_v: wgpu::AddressMode::Repeat,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            ..Default::default()
        });
        let dummy = |label, usage| {
            device.create_buffer(&wgpu::BufferDescriptor {
                label: Some(label),
                size: PIXEL_BYTES,
                usage,
                mapped_at_creation: false,
            })
        };
        let dummy_read = dummy("Dummy Read Buffer", wgpu::BufferUsages::STORAGE);
        let dummy_write = dummy("Dummy Write Buffer", wgpu::BufferUsages::STORAGE);
        let terrain = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Terrain Buffer"),
            contents: bytemuck::cast_slice(&[0.0f32]),
            usage: wgpu::BufferUsages::STORAGE,
        });
        Ok(Self {
            kernel_layout: kernel_layout(&device),
            kernels: Arc::new(Mutex::new(HashMap::new())),
            utility,
            sampler,
            size: (0, 0),
            buffers: HashMap::new(),
            data: HashMap::new(),
            terrain,
            dummy_read,
            dummy_write,
            device,
            queue,
        })
    }

    /// A compiler whose pipelines this backend can run
    pub fn compiler(&self) -> Arc<dyn ShaderBackend> {
        Arc::new(WgpuCompiler {
            device: Arc::clone(&self.device),
            queue: Arc::clone(&self.queue),
            kernel_layout: self.kernel_layout.clone(),
            kernels: Arc::clone(&self.kernels),
            next: AtomicU64::new(0),
        })
    }

    fn buffer_size(&self) -> u64 {
        u64::from(self.size.0) * u64::from(self.size.1) * PIXEL_BYTES
    }

    fn buffer(&self, id: BufferId) -> Result<&wgpu::Buffer> {
        self.buffers.get(&id).ok_or(BackendError::MissingBuffer(id))
    }

    fn read_binding(&self, id: Option<BufferId>) -> &wgpu::Buffer {
        id.and_then(|id| self.buffers.get(&id)).unwrap_or(&self.dummy_read)
    }

    fn write_binding(&self, id: Option<BufferId>) -> &wgpu::Buffer {
        id.and_then(|id| self.buffers.get(&id)).unwrap_or(&self.dummy_write)
    }

    fn uniform<T: bytemuck::Pod>(&self, label: &str, value: &T) -> wgpu::Buffer {
        self.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some(label),
            contents: bytemuck::bytes_of(value),
            usage: wgpu::BufferUsages::UNIFORM,
        })
    }

    fn workgroups(&self) -> (u32, u32) {
        (self.size.0.div_ceil(WORKGROUP), self.size.1.div_ceil(WORKGROUP))
    }

    fn submit(&self, label: &str, pipeline: &wgpu::ComputePipeline, groups: &[&wgpu::BindGroup]) {
        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some(label) });
        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some(label),
                timestamp_writes: None,
            });
            pass.set_pipeline(pipeline);
            for (index, group) in groups.iter().enumerate() {
                pass.set_bind_group(index as u32, *group, &[]);
            }
            let (x, y) = self.workgroups();
            pass.dispatch_workgroups(x, y, 1);
        }
        self.queue.submit(std::iter::once(encoder.finish()));
    }
}

impl GpuBackend for WgpuBackend {
    fn resize(&mut self, width: u32, height: u32) -> Result<()> {
        if width == 0 || height == 0 {
            return Err(BackendError::InvalidSize { width, height });
        }
        if self.size != (width, height) {
            debug!(width, height, "Resizing pipeline buffers");
            self.buffers.clear();
            self.size = (width, height);
        }
        Ok(())
    }

    fn ensure(&mut self, buffer: BufferId) -> Result<()> {
        if self.size.0 == 0 || self.size.1 == 0 {
            return Err(BackendError::InvalidSize {
                width: self.size.0,
                height: self.size.1,
            });
        }
        if !self.buffers.contains_key(&buffer) {
            let gpu_buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
                label: Some(buffer.label()),
                size: self.buffer_size(),
                usage: wgpu::BufferUsages::STORAGE
                    | wgpu::BufferUsages::COPY_SRC
                    | wgpu::BufferUsages::COPY_DST,
                mapped_at_creation: false,
            });
            self.buffers.insert(buffer, gpu_buffer);
        }
        Ok(())
    }

    fn release(&mut self, buffer: BufferId) {
        if let Some(gpu_buffer) = self.buffers.remove(&buffer) {
            gpu_buffer.destroy();
        }
    }

    fn upload_data(&mut self, pipeline: KernelHandle, slots: &[[f32; 4]]) -> Result<()> {
        if !self.kernels.lock().contains_key(&pipeline.0) {
            return Err(BackendError::UnknownPipeline(pipeline.0));
        }
        let zero = [[0.0f32; 4]];
        let slots = if slots.is_empty() { &zero[..] } else { slots };
        let buffer = self.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Data Buffer"),
            contents: bytemuck::cast_slice(slots),
            usage: wgpu::BufferUsages::STORAGE,
        });
        self.data.insert(pipeline.0, buffer);
        Ok(())
    }

    fn upload_terrain(&mut self, heights: &[f32], resolution: u32) -> Result<()> {
        let zero = [0.0f32];
        let heights = if heights.is_empty() { &zero[..] } else { heights };
        self.terrain = self.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Terrain Buffer"),
            contents: bytemuck::cast_slice(heights),
            usage: wgpu::BufferUsages::STORAGE,
        });
        debug!(resolution, "Uploaded terrain heights");
        Ok(())
    }

    fn dispatch(&mut self, pass: &KernelPass) -> Result<()> {
        let kernels = self.kernels.lock();
        let module = kernels
            .get(&pass.pipeline.0)
            .ok_or(BackendError::UnknownPipeline(pass.pipeline.0))?;
        let pipeline = module
            .pipelines
            .get(&pass.entry)
            .ok_or(BackendError::UnknownPipeline(pass.pipeline.0))?;
        let data = self
            .data
            .get(&pass.pipeline.0)
            .ok_or(BackendError::UnknownPipeline(pass.pipeline.0))?;

        let frame = self.uniform("Frame Uniforms", &pass.frame);
        let light = self.uniform("Light Uniforms", &pass.light);
        let b = &pass.bindings;
        let storage: [(u32, &wgpu::Buffer); 14] = [
            (0, data),
            (2, self.write_binding(Some(BufferId::RayOrigin))),
            (3, self.write_binding(Some(BufferId::RayDirection))),
            (4, self.read_binding(Some(b.shape_in))),
            (5, self.write_binding(Some(b.shape_out))),
            (6, self.write_binding(Some(BufferId::Normal))),
            (7, self.read_binding(Some(b.meta_in))),
            (8, self.write_binding(Some(b.meta_out))),
            (9, self.write_binding(Some(BufferId::Color))),
            (10, self.write_binding(Some(BufferId::Mask))),
            (11, self.write_binding(Some(BufferId::Density))),
            (12, self.write_binding(Some(BufferId::Back))),
            (13, self.read_binding(Some(b.refl_dir_in))),
            (14, self.write_binding(Some(b.refl_dir_out))),
        ];
        let mut entries: Vec<_> = storage
            .iter()
            .map(|(binding, buffer)| wgpu::BindGroupEntry {
                binding: *binding,
                resource: buffer.as_entire_binding(),
            })
            .collect();
        entries.push(wgpu::BindGroupEntry {
            binding: 1,
            resource: frame.as_entire_binding(),
        });
        entries.push(wgpu::BindGroupEntry {
            binding: 15,
            resource: self.terrain.as_entire_binding(),
        });
        entries.push(wgpu::BindGroupEntry {
            binding: 16,
            resource: wgpu::BindingResource::Sampler(&self.sampler),
        });
        let group0 = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Kernel Bind Group"),
            layout: &self.kernel_layout,
            entries: &entries,
        });

        let mut entries: Vec<_> = module
            .textures
            .iter()
            .map(|(binding, view)| wgpu::BindGroupEntry {
                binding: *binding,
                resource: wgpu::BindingResource::TextureView(view),
            })
            .collect();
        entries.push(wgpu::BindGroupEntry {
            binding: module.light_binding,
            resource: light.as_entire_binding(),
        });
        let group1 = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Light Bind Group"),
            layout: &module.light_layout,
            entries: &entries,
        });

        self.submit(&module.label, pipeline, &[&group0, &group1]);
        Ok(())
    }

    fn utility(&mut self, pass: &UtilityPass) -> Result<()> {
        for buffer in pass.buffers() {
            self.buffer(buffer)?;
        }
        let pipeline = self
            .utility
            .pipelines
            .get(&pass.op)
            .ok_or_else(|| BackendError::Device(format!("missing utility {}", pass.op.entry_point())))?;
        let frame = self.uniform::<FrameUniforms>("Frame Uniforms", &pass.frame);

        let mut entries = vec![wgpu::BindGroupEntry {
            binding: 0,
            resource: frame.as_entire_binding(),
        }];
        for (i, source) in pass.sources.iter().enumerate() {
            entries.push(wgpu::BindGroupEntry {
                binding: 1 + i as u32,
                resource: self.read_binding(*source).as_entire_binding(),
            });
        }
        for (i, target) in pass.targets.iter().enumerate() {
            entries.push(wgpu::BindGroupEntry {
                binding: 5 + i as u32,
                resource: self.write_binding(*target).as_entire_binding(),
            });
        }
        let group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Utility Bind Group"),
            layout: &self.utility.layout,
            entries: &entries,
        });
        self.submit(pass.op.entry_point(), pipeline, &[&group]);
        Ok(())
    }

    fn read(&mut self, buffer: BufferId) -> Result<Vec<[f32; 4]>> {
        let source = self.buffer(buffer)?;
        let size = self.buffer_size();
        let staging = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Staging Buffer"),
            size,
            usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
            mapped_at_creation: false,
        });
        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Readback Encoder"),
            });
        encoder.copy_buffer_to_buffer(source, 0, &staging, 0, size);
        self.queue.submit(std::iter::once(encoder.finish()));

        let slice = staging.slice(..);
        let (tx, rx) = std::sync::mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = tx.send(result);
        });
        self.device
            .poll(wgpu::PollType::Wait)
            .map_err(|e| BackendError::Readback(e.to_string()))?;
        rx.recv()
            .map_err(|e| BackendError::Readback(e.to_string()))?
            .map_err(|e| BackendError::Readback(e.to_string()))?;

        let pixels = {
            let data = slice.get_mapped_range();
            bytemuck::pod_collect_to_vec::<u8, [f32; 4]>(&data)
        };
        staging.unmap();
        Ok(pixels)
    }
}

/// Initialize wgpu for headless rendering
///
/// Requests the adapter's own limits; the kernels bind more storage
/// buffers than the defaults allow.
pub async fn init_headless() -> anyhow::Result<(Arc<wgpu::Device>, Arc<wgpu::Queue>)> {
    let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
        backends: wgpu::Backends::all(),
        ..Default::default()
    });

    let adapter = instance
        .request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::HighPerformance,
            compatible_surface: None,
            force_fallback_adapter: false,
        })
        .await
        .context("Failed to find an appropriate adapter")?;
    info!(adapter = %adapter.get_info().name, "Using GPU adapter");

    let (device, queue) = adapter
        .request_device(&wgpu::DeviceDescriptor {
            label: Some("rz Device"),
            required_features: wgpu::Features::empty(),
            required_limits: adapter.limits(),
            memory_hints: wgpu::MemoryHints::default(),
            trace: wgpu::Trace::Off,
        })
        .await
        .context("Failed to create device")?;

    Ok((Arc::new(device), Arc::new(queue)))
}
