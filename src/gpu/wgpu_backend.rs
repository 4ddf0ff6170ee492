// SPDX-License-Identifier: GPL-3.0-only

//! wgpu compute backend
//!
//! Plane textures are sampled with `textureLoad` and the conversion writes a
//! `rgba8unorm` storage texture. BGRA targets are stored as RGBA with the
//! red and blue channels swapped by the shader, so the storage format stays
//! the same for both channel orders.

use super::{
    GpuBackend, GpuError, ProgramId, ProgramInputs, TextureDesc, TextureFormat, TextureHandle,
};
use crate::constants::gpu::{CONVERT_WORKGROUP_SIZE, MIPMAP_WORKGROUP_SIZE};
use crate::shaders::{ConvertParams, MIPMAP_SHADER, YUV_TO_RGBA_SHADER, compute_dispatch_size};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

struct WgpuTexture {
    texture: wgpu::Texture,
    desc: TextureDesc,
}

/// Information about the created GPU device
#[derive(Debug, Clone)]
pub struct GpuDeviceInfo {
    /// Name of the GPU adapter
    pub adapter_name: String,
    /// Backend being used (Vulkan, Metal, DX12, etc.)
    pub backend: wgpu::Backend,
}

/// Create a wgpu device and queue for compute work.
pub async fn create_compute_device(
    label: &str,
) -> Result<(Arc<wgpu::Device>, Arc<wgpu::Queue>, GpuDeviceInfo), GpuError> {
    info!(label = label, "Creating GPU device for compute");

    let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
        backends: wgpu::Backends::VULKAN,
        ..Default::default()
    });

    let adapter = instance
        .request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::HighPerformance,
            compatible_surface: None,
            force_fallback_adapter: false,
        })
        .await
        .map_err(|e| GpuError::AdapterUnavailable(e.to_string()))?;

    let adapter_info = adapter.get_info();

    info!(
        adapter = %adapter_info.name,
        backend = ?adapter_info.backend,
        "GPU adapter selected for compute"
    );

    let (device, queue) = adapter
        .request_device(&wgpu::DeviceDescriptor {
            label: Some(label),
            required_features: wgpu::Features::empty(),
            required_limits: adapter.limits(),
            memory_hints: wgpu::MemoryHints::Performance,
            ..Default::default()
        })
        .await
        .map_err(|e| GpuError::AdapterUnavailable(format!("Failed to create GPU device: {}", e)))?;

    let info = GpuDeviceInfo {
        adapter_name: adapter_info.name.clone(),
        backend: adapter_info.backend,
    };

    Ok((Arc::new(device), Arc::new(queue), info))
}

/// Helper for async buffer readback (map, poll, read, unmap)
pub async fn read_buffer_async(
    device: &wgpu::Device,
    buffer: &wgpu::Buffer,
) -> Result<Vec<u8>, GpuError> {
    let slice = buffer.slice(..);
    let (sender, receiver) = futures::channel::oneshot::channel();

    slice.map_async(wgpu::MapMode::Read, move |result| {
        let _ = sender.send(result);
    });

    device
        .poll(wgpu::PollType::wait_indefinitely())
        .map_err(|e| GpuError::DeviceLost(e.to_string()))?;

    receiver
        .await
        .map_err(|_| GpuError::Readback("Failed to receive buffer mapping".to_string()))?
        .map_err(|e| GpuError::Readback(format!("Failed to map buffer: {:?}", e)))?;

    let data = slice.get_mapped_range().to_vec();
    buffer.unmap();

    Ok(data)
}

fn plane_texture_entry(binding: u32) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::Texture {
            sample_type: wgpu::TextureSampleType::Float { filterable: false },
            view_dimension: wgpu::TextureViewDimension::D2,
            multisampled: false,
        },
        count: None,
    }
}

fn storage_output_entry(binding: u32) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::StorageTexture {
            access: wgpu::StorageTextureAccess::WriteOnly,
            format: wgpu::TextureFormat::Rgba8Unorm,
            view_dimension: wgpu::TextureViewDimension::D2,
        },
        count: None,
    }
}

/// Create the bind group layout for the YUV→RGBA compute shader
///
/// Bindings:
/// - 0: tex_y (Y plane)
/// - 1: tex_uv (UV/VU plane, or U plane for I420)
/// - 2: tex_v (V plane for I420)
/// - 3: output (RGBA storage texture)
/// - 4: params (uniform buffer)
fn create_convert_bind_group_layout(device: &wgpu::Device) -> wgpu::BindGroupLayout {
    device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
        label: Some("yuv_convert_bind_group_layout"),
        entries: &[
            plane_texture_entry(0),
            plane_texture_entry(1),
            plane_texture_entry(2),
            storage_output_entry(3),
            wgpu::BindGroupLayoutEntry {
                binding: 4,
                visibility: wgpu::ShaderStages::COMPUTE,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Uniform,
                    has_dynamic_offset: false,
                    min_binding_size: None,
                },
                count: None,
            },
        ],
    })
}

/// Create the bind group layout for one mip downsample step
fn create_mipmap_bind_group_layout(device: &wgpu::Device) -> wgpu::BindGroupLayout {
    device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
        label: Some("mipmap_bind_group_layout"),
        entries: &[plane_texture_entry(0), storage_output_entry(1)],
    })
}

fn create_compute_pipeline(
    device: &wgpu::Device,
    bind_group_layout: &wgpu::BindGroupLayout,
    source: &str,
    label: &str,
) -> wgpu::ComputePipeline {
    let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
        label: Some(label),
        source: wgpu::ShaderSource::Wgsl(source.into()),
    });

    let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
        label: Some(label),
        bind_group_layouts: &[bind_group_layout],
        push_constant_ranges: &[],
    });

    device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
        label: Some(label),
        layout: Some(&pipeline_layout),
        module: &shader,
        entry_point: Some("main"),
        compilation_options: Default::default(),
        cache: None,
    })
}

fn wgpu_format(format: TextureFormat) -> wgpu::TextureFormat {
    match format {
        TextureFormat::R8 => wgpu::TextureFormat::R8Unorm,
        TextureFormat::Rg8 => wgpu::TextureFormat::Rg8Unorm,
        TextureFormat::Rgba8 | TextureFormat::Bgra8 => wgpu::TextureFormat::Rgba8Unorm,
    }
}

fn single_level_view(texture: &wgpu::Texture, level: u32) -> wgpu::TextureView {
    texture.create_view(&wgpu::TextureViewDescriptor {
        base_mip_level: level,
        mip_level_count: Some(1),
        ..Default::default()
    })
}

/// [`GpuBackend`] running the conversion as wgpu compute passes
pub struct WgpuBackend {
    device: Arc<wgpu::Device>,
    queue: Arc<wgpu::Queue>,
    info: GpuDeviceInfo,
    convert_pipeline: wgpu::ComputePipeline,
    convert_layout: wgpu::BindGroupLayout,
    mipmap_pipeline: wgpu::ComputePipeline,
    mipmap_layout: wgpu::BindGroupLayout,
    uniform_buffer: wgpu::Buffer,
    textures: HashMap<u64, WgpuTexture>,
    next_id: u64,
}

impl WgpuBackend {
    pub async fn new(label: &str) -> Result<Self, GpuError> {
        let (device, queue, info) = create_compute_device(label).await?;

        let convert_layout = create_convert_bind_group_layout(&device);
        let convert_pipeline =
            create_compute_pipeline(&device, &convert_layout, YUV_TO_RGBA_SHADER, "yuv_to_rgba");
        let mipmap_layout = create_mipmap_bind_group_layout(&device);
        let mipmap_pipeline =
            create_compute_pipeline(&device, &mipmap_layout, MIPMAP_SHADER, "mipmap");

        let uniform_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("yuv_convert_uniform_buffer"),
            size: std::mem::size_of::<ConvertParams>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        info!(adapter = %info.adapter_name, "wgpu conversion backend ready");

        Ok(Self {
            device,
            queue,
            info,
            convert_pipeline,
            convert_layout,
            mipmap_pipeline,
            mipmap_layout,
            uniform_buffer,
            textures: HashMap::new(),
            next_id: 1,
        })
    }

    pub fn device_info(&self) -> &GpuDeviceInfo {
        &self.info
    }

    fn texture(&self, handle: TextureHandle) -> Result<&WgpuTexture, GpuError> {
        self.textures
            .get(&handle.0)
            .ok_or(GpuError::UnknownTexture(handle))
    }
}

impl GpuBackend for WgpuBackend {
    fn name(&self) -> &str {
        "wgpu"
    }

    fn max_texture_dimension(&self) -> u32 {
        self.device.limits().max_texture_dimension_2d
    }

    fn create_texture(&mut self, desc: &TextureDesc) -> Result<TextureHandle, GpuError> {
        let max = self.max_texture_dimension();
        if desc.width == 0 || desc.height == 0 || desc.width > max || desc.height > max {
            return Err(GpuError::Allocation(format!(
                "texture size {}x{} outside 1..={}",
                desc.width, desc.height, max
            )));
        }

        let usage = if desc.format.is_color_output() {
            wgpu::TextureUsages::STORAGE_BINDING
                | wgpu::TextureUsages::TEXTURE_BINDING
                | wgpu::TextureUsages::COPY_SRC
        } else {
            wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST
        };

        let texture = self.device.create_texture(&wgpu::TextureDescriptor {
            label: Some("pipeline_texture"),
            size: wgpu::Extent3d {
                width: desc.width,
                height: desc.height,
                depth_or_array_layers: 1,
            },
            mip_level_count: desc.mip_levels,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: wgpu_format(desc.format),
            usage,
            view_formats: &[],
        });

        let handle = TextureHandle(self.next_id);
        self.next_id += 1;
        self.textures.insert(handle.0, WgpuTexture { texture, desc: *desc });
        debug!(
            texture = %handle,
            width = desc.width,
            height = desc.height,
            format = ?desc.format,
            "Texture created"
        );
        Ok(handle)
    }

    fn destroy_texture(&mut self, handle: TextureHandle) -> Result<(), GpuError> {
        let entry = self
            .textures
            .remove(&handle.0)
            .ok_or(GpuError::UnknownTexture(handle))?;
        entry.texture.destroy();
        Ok(())
    }

    fn upload(
        &mut self,
        handle: TextureHandle,
        data: &[u8],
        bytes_per_row: u32,
    ) -> Result<(), GpuError> {
        let entry = self.texture(handle)?;
        let desc = entry.desc;
        let row_len = desc.width * desc.format.bytes_per_pixel();
        if bytes_per_row < row_len {
            return Err(GpuError::InvalidUpload(format!(
                "stride {} shorter than row {}",
                bytes_per_row, row_len
            )));
        }
        let needed = bytes_per_row as usize * (desc.height as usize - 1) + row_len as usize;
        if data.len() < needed {
            return Err(GpuError::InvalidUpload(format!(
                "{} bytes supplied, {} needed",
                data.len(),
                needed
            )));
        }

        self.queue.write_texture(
            wgpu::TexelCopyTextureInfo {
                texture: &entry.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            &data[..needed],
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(bytes_per_row),
                rows_per_image: Some(desc.height),
            },
            wgpu::Extent3d {
                width: desc.width,
                height: desc.height,
                depth_or_array_layers: 1,
            },
        );
        Ok(())
    }

    fn run_program(
        &mut self,
        program: ProgramId,
        inputs: &ProgramInputs,
        target: TextureHandle,
    ) -> Result<(), GpuError> {
        match program {
            ProgramId::YuvToRgb => {
                let [y, uv, v] = inputs.planes;
                let y_view = single_level_view(&self.texture(y)?.texture, 0);
                let uv_view = single_level_view(&self.texture(uv)?.texture, 0);
                let v_view = single_level_view(&self.texture(v)?.texture, 0);
                let output = self.texture(target)?;
                let output_view = single_level_view(&output.texture, 0);

                self.queue
                    .write_buffer(&self.uniform_buffer, 0, bytemuck::bytes_of(&inputs.params));

                let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
                    label: Some("yuv_convert_bind_group"),
                    layout: &self.convert_layout,
                    entries: &[
                        wgpu::BindGroupEntry {
                            binding: 0,
                            resource: wgpu::BindingResource::TextureView(&y_view),
                        },
                        wgpu::BindGroupEntry {
                            binding: 1,
                            resource: wgpu::BindingResource::TextureView(&uv_view),
                        },
                        wgpu::BindGroupEntry {
                            binding: 2,
                            resource: wgpu::BindingResource::TextureView(&v_view),
                        },
                        wgpu::BindGroupEntry {
                            binding: 3,
                            resource: wgpu::BindingResource::TextureView(&output_view),
                        },
                        wgpu::BindGroupEntry {
                            binding: 4,
                            resource: self.uniform_buffer.as_entire_binding(),
                        },
                    ],
                });

                let mut encoder = self
                    .device
                    .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                        label: Some("yuv_convert_encoder"),
                    });
                {
                    let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                        label: Some("yuv_to_rgba_pass"),
                        timestamp_writes: None,
                    });
                    pass.set_pipeline(&self.convert_pipeline);
                    pass.set_bind_group(0, &bind_group, &[]);
                    pass.dispatch_workgroups(
                        compute_dispatch_size(output.desc.width, CONVERT_WORKGROUP_SIZE),
                        compute_dispatch_size(output.desc.height, CONVERT_WORKGROUP_SIZE),
                        1,
                    );
                }
                self.queue.submit(std::iter::once(encoder.finish()));
                Ok(())
            }
        }
    }

    fn generate_mipmaps(&mut self, handle: TextureHandle) -> Result<(), GpuError> {
        let entry = self.texture(handle)?;
        if entry.desc.mip_levels <= 1 {
            return Ok(());
        }

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("mipmap_encoder"),
            });

        for level in 1..entry.desc.mip_levels {
            let src_view = single_level_view(&entry.texture, level - 1);
            let dst_view = single_level_view(&entry.texture, level);
            let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some("mipmap_bind_group"),
                layout: &self.mipmap_layout,
                entries: &[
                    wgpu::BindGroupEntry {
                        binding: 0,
                        resource: wgpu::BindingResource::TextureView(&src_view),
                    },
                    wgpu::BindGroupEntry {
                        binding: 1,
                        resource: wgpu::BindingResource::TextureView(&dst_view),
                    },
                ],
            });

            let dst_width = (entry.desc.width >> level).max(1);
            let dst_height = (entry.desc.height >> level).max(1);
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("mipmap_pass"),
                timestamp_writes: None,
            });
            pass.set_pipeline(&self.mipmap_pipeline);
            pass.set_bind_group(0, &bind_group, &[]);
            pass.dispatch_workgroups(
                compute_dispatch_size(dst_width, MIPMAP_WORKGROUP_SIZE),
                compute_dispatch_size(dst_height, MIPMAP_WORKGROUP_SIZE),
                1,
            );
        }

        self.queue.submit(std::iter::once(encoder.finish()));
        Ok(())
    }

    fn read_texture(&mut self, handle: TextureHandle) -> Result<Vec<u8>, GpuError> {
        let entry = self.texture(handle)?;
        let desc = entry.desc;
        let row_len = desc.width * desc.format.bytes_per_pixel();
        // Buffer copies need 256-byte aligned rows
        let padded_row = row_len.div_ceil(wgpu::COPY_BYTES_PER_ROW_ALIGNMENT)
            * wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;

        let staging = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("readback_staging_buffer"),
            size: padded_row as u64 * desc.height as u64,
            usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
            mapped_at_creation: false,
        });

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("readback_encoder"),
            });
        encoder.copy_texture_to_buffer(
            wgpu::TexelCopyTextureInfo {
                texture: &entry.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::TexelCopyBufferInfo {
                buffer: &staging,
                layout: wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(padded_row),
                    rows_per_image: Some(desc.height),
                },
            },
            wgpu::Extent3d {
                width: desc.width,
                height: desc.height,
                depth_or_array_layers: 1,
            },
        );
        self.queue.submit(std::iter::once(encoder.finish()));

        let padded = pollster::block_on(read_buffer_async(&self.device, &staging))?;
        let mut data = Vec::with_capacity(row_len as usize * desc.height as usize);
        for row in padded.chunks(padded_row as usize).take(desc.height as usize) {
            data.extend_from_slice(&row[..row_len as usize]);
        }
        Ok(data)
    }

    fn texture_desc(&self, handle: TextureHandle) -> Option<TextureDesc> {
        self.textures.get(&handle.0).map(|t| t.desc)
    }
}
