use std::collections::HashMap;

use posepipe_core::{PoseError, Result, SyncFence, MODEL_INPUT_BYTES};
use posepipe_gpu::{CameraImage, SharedBufferHandle};

use crate::backend::{DispatchParams, GraphicsBackend};
use crate::workgroup::WorkGroupLimits;

const SHADER_TEMPLATE: &str = include_str!("shaders/resample.wgsl");

struct OutputBinding {
    host: SharedBufferHandle,
    storage: wgpu::Buffer,
    staging: wgpu::Buffer,
}

/// Imported camera buffer: the sampled texture and the bind group that
/// connects it to the output tensor. Pixels are uploaded per frame.
pub struct WgpuImageView {
    texture: wgpu::Texture,
    size: wgpu::Extent3d,
    bind_group: wgpu::BindGroup,
}

/// Vulkan compute through wgpu.
///
/// The tensor is produced in a device-local storage buffer and copied into
/// the shared buffer after the queue drains, so dispatches always block and
/// fence export is not offered.
pub struct WgpuDevice {
    device: wgpu::Device,
    queue: wgpu::Queue,
    adapter_name: String,
    limits: WorkGroupLimits,
    bind_group_layout: wgpu::BindGroupLayout,
    pipeline_layout: wgpu::PipelineLayout,
    /// Compiled pipelines by work-group size.
    pipelines: HashMap<u32, wgpu::ComputePipeline>,
    sampler: wgpu::Sampler,
    uniforms: wgpu::Buffer,
    output: Option<OutputBinding>,
    // Declared last so the instance outlives the device and queue.
    _instance: wgpu::Instance,
}

impl WgpuDevice {
    /// Open the first Vulkan adapter. Fails when none is present.
    pub fn new() -> Result<Self> {
        pollster::block_on(Self::init_async())
    }

    async fn init_async() -> Result<Self> {
        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
            backends: wgpu::Backends::VULKAN,
            ..Default::default()
        });
        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                force_fallback_adapter: false,
                compatible_surface: None,
            })
            .await
            .ok_or_else(|| PoseError::Graphics("no Vulkan adapter available".into()))?;

        let info = adapter.get_info();
        let adapter_limits = adapter.limits();

        let (device, queue): (wgpu::Device, wgpu::Queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("posepipe"),
                    required_features: wgpu::Features::empty(),
                    required_limits: adapter_limits.clone(),
                    memory_hints: wgpu::MemoryHints::default(),
                },
                None,
            )
            .await
            .map_err(|e| PoseError::Graphics(format!("device request failed: {e}")))?;

        // Each axis is queried separately.
        let limits = WorkGroupLimits {
            max_size_x: adapter_limits.max_compute_workgroup_size_x,
            max_size_y: adapter_limits.max_compute_workgroup_size_y,
            max_invocations: adapter_limits.max_compute_invocations_per_workgroup,
        };

        let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("resample"),
            entries: &[
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::COMPUTE,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 1,
                    visibility: wgpu::ShaderStages::COMPUTE,
                    ty: wgpu::BindingType::Texture {
                        sample_type: wgpu::TextureSampleType::Float { filterable: true },
                        view_dimension: wgpu::TextureViewDimension::D2,
                        multisampled: false,
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 2,
                    visibility: wgpu::ShaderStages::COMPUTE,
                    ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 3,
                    visibility: wgpu::ShaderStages::COMPUTE,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Storage { read_only: false },
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
            ],
        });
        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("resample"),
            bind_group_layouts: &[&bind_group_layout],
            push_constant_ranges: &[],
        });

        let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("camera"),
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            address_mode_w: wgpu::AddressMode::ClampToEdge,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            mipmap_filter: wgpu::FilterMode::Nearest,
            ..Default::default()
        });

        let uniforms = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("resample::params"),
            size: std::mem::size_of::<[f32; 16]>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        tracing::info!(
            adapter = %info.name,
            backend = ?info.backend,
            device_type = ?info.device_type,
            "wgpu device ready"
        );

        Ok(Self {
            device,
            queue,
            adapter_name: info.name,
            limits,
            bind_group_layout,
            pipeline_layout,
            pipelines: HashMap::new(),
            sampler,
            uniforms,
            output: None,
            _instance: instance,
        })
    }

    pub fn adapter_name(&self) -> &str {
        &self.adapter_name
    }

    fn ensure_pipeline(&mut self, work_group_size: u32) {
        let device = &self.device;
        let layout = &self.pipeline_layout;
        self.pipelines.entry(work_group_size).or_insert_with(|| {
            let source = SHADER_TEMPLATE.replace("{{WG}}", &work_group_size.to_string());
            let module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some("resample"),
                source: wgpu::ShaderSource::Wgsl(source.into()),
            });
            tracing::debug!(work_group_size, "compiled resample pipeline");
            device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                label: Some("resample"),
                layout: Some(layout),
                module: &module,
                entry_point: "resample",
                compilation_options: wgpu::PipelineCompilationOptions::default(),
                cache: None,
            })
        });
    }

    /// Copy the finished tensor into the shared buffer.
    fn read_back(&self, output: &OutputBinding) -> Result<()> {
        let slice = output.staging.slice(..);
        let (tx, rx) = std::sync::mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |r| {
            let _ = tx.send(r);
        });
        self.device.poll(wgpu::Maintain::Wait);
        rx.recv()
            .map_err(|_| PoseError::Graphics("readback callback never fired".into()))?
            .map_err(|e| PoseError::Graphics(format!("readback map failed: {e}")))?;

        {
            let mapped = slice.get_mapped_range();
            let mut host = output.host.write_bytes()?;
            host[..MODEL_INPUT_BYTES].copy_from_slice(&mapped[..MODEL_INPUT_BYTES]);
        }
        output.staging.unmap();
        Ok(())
    }
}

impl GraphicsBackend for WgpuDevice {
    type View = WgpuImageView;

    fn name(&self) -> &'static str {
        "wgpu"
    }

    fn work_group_limits(&self) -> WorkGroupLimits {
        self.limits
    }

    fn supports_fence_export(&self) -> bool {
        false
    }

    fn bind_output(&mut self, target: SharedBufferHandle) -> Result<()> {
        let storage = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("resample::tensor"),
            size: MODEL_INPUT_BYTES as u64,
            usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_SRC,
            mapped_at_creation: false,
        });
        let staging = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("resample::readback"),
            size: MODEL_INPUT_BYTES as u64,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        tracing::debug!(buffer = target.id(), "wgpu output bound");
        self.output = Some(OutputBinding {
            host: target,
            storage,
            staging,
        });
        Ok(())
    }

    fn import_image(&mut self, image: &CameraImage) -> Result<Self::View> {
        let output = self
            .output
            .as_ref()
            .ok_or_else(|| PoseError::Contract("image import before output bind".into()))?;

        let size = wgpu::Extent3d {
            width: image.width(),
            height: image.height(),
            depth_or_array_layers: 1,
        };
        let texture = self.device.create_texture(&wgpu::TextureDescriptor {
            label: Some("camera"),
            size,
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: wgpu::TextureFormat::Rgba8Unorm,
            usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());

        let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("resample"),
            layout: &self.bind_group_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: self.uniforms.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::TextureView(&view),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: wgpu::BindingResource::Sampler(&self.sampler),
                },
                wgpu::BindGroupEntry {
                    binding: 3,
                    resource: output.storage.as_entire_binding(),
                },
            ],
        });

        Ok(WgpuImageView {
            texture,
            size,
            bind_group,
        })
    }

    fn update_view(&mut self, view: &mut Self::View, image: &CameraImage) -> Result<()> {
        if view.size.width != image.width() || view.size.height != image.height() {
            tracing::debug!(
                width = image.width(),
                height = image.height(),
                "camera buffer changed shape, re-importing"
            );
            *view = self.import_image(image)?;
        }
        self.queue.write_texture(
            wgpu::ImageCopyTexture {
                texture: &view.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            image.pixels(),
            wgpu::ImageDataLayout {
                offset: 0,
                bytes_per_row: Some(image.width() * 4),
                rows_per_image: Some(image.height()),
            },
            view.size,
        );
        Ok(())
    }

    fn dispatch(&mut self, view: &Self::View, params: &DispatchParams) -> Result<SyncFence> {
        self.queue.write_buffer(
            &self.uniforms,
            0,
            bytemuck::cast_slice(params.transform.as_array()),
        );

        self.ensure_pipeline(params.work_group_size);
        let pipeline = &self.pipelines[&params.work_group_size];
        let Some(output) = self.output.as_ref() else {
            return Err(PoseError::Contract("dispatch before output bind".into()));
        };

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("resample"),
            });
        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("resample"),
                timestamp_writes: None,
            });
            pass.set_pipeline(pipeline);
            pass.set_bind_group(0, &view.bind_group, &[]);
            pass.dispatch_workgroups(params.group_count.0, params.group_count.1, 1);
        }
        encoder.copy_buffer_to_buffer(
            &output.storage,
            0,
            &output.staging,
            0,
            MODEL_INPUT_BYTES as u64,
        );
        self.queue.submit(std::iter::once(encoder.finish()));

        self.read_back(output)?;
        Ok(SyncFence::none())
    }
}
