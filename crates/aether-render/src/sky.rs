//! Full-screen sky pass reading a bound scattering model: sky radiance, the
//! sun disc and a lit planet surface with aerial perspective, tone mapped
//! with the model's exposure and white point.

use std::sync::mpsc;

use aether_scattering::{PropertyBlock, names};
use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec3};

use crate::backend::{WgpuBackend, WgpuTexture};
use crate::readback::ReadbackError;
use crate::shader::SKY;

#[derive(Debug, thiserror::Error)]
pub enum SkyError {
    #[error("material property '{0}' is not bound")]
    MissingProperty(&'static str),

    #[error("texture '{0}' was released")]
    Released(&'static str),
}

/// Sky material parameters. Matches `Material` in `sky.wgsl`.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct MaterialUniform {
    pub solar_irradiance: [f32; 3],
    pub sun_angular_radius: f32,
    pub rayleigh_scattering: [f32; 3],
    pub bottom_radius: f32,
    pub mie_scattering: [f32; 3],
    pub top_radius: f32,
    pub mie_extinction: [f32; 3],
    pub mie_phase_function_g: f32,
    pub mie_scattering_to_extinction: [f32; 3],
    pub mu_s_min: f32,
    pub sky_spectral_radiance_to_luminance: [f32; 3],
    pub exposure: f32,
    pub sun_spectral_radiance_to_luminance: [f32; 3],
    pub combined_scattering_textures: u32,
    pub earth_center: [f32; 3],
    pub use_luminance: u32,
    pub sun_direction: [f32; 3],
    pub _pad0: f32,
    pub white_point: [f32; 3],
    pub _pad1: f32,
    /// (tan, cos) of the sun's angular radius.
    pub sun_size: [f32; 2],
    pub _pad2: [f32; 2],
    pub transmittance_size: [u32; 2],
    pub irradiance_size: [u32; 2],
    /// (nu, mu_s, mu, r)
    pub scattering_size: [u32; 4],
}

static_assertions::assert_eq_size!(MaterialUniform, [u8; 208]);

impl MaterialUniform {
    /// Gather everything a model bound into `properties`.
    pub fn from_properties<T>(properties: &PropertyBlock<T>) -> Result<Self, SkyError> {
        let float = |name: &'static str| {
            properties
                .float(name)
                .ok_or(SkyError::MissingProperty(name))
        };
        let int = |name: &'static str| properties.int(name).ok_or(SkyError::MissingProperty(name));
        let size = |name: &'static str| int(name).map(|value| value.max(0) as u32);
        let vector = |name: &'static str| {
            properties
                .vector(name)
                .ok_or(SkyError::MissingProperty(name))
        };
        let rgb = |name: &'static str| vector(name).map(|value| value.truncate().to_array());

        let sun_size = vector(names::SUN_SIZE)?;
        Ok(Self {
            solar_irradiance: rgb(names::SOLAR_IRRADIANCE)?,
            sun_angular_radius: float(names::SUN_ANGULAR_RADIUS)?,
            rayleigh_scattering: rgb(names::RAYLEIGH_SCATTERING)?,
            bottom_radius: float(names::BOTTOM_RADIUS)?,
            mie_scattering: rgb(names::MIE_SCATTERING)?,
            top_radius: float(names::TOP_RADIUS)?,
            mie_extinction: rgb(names::MIE_EXTINCTION)?,
            mie_phase_function_g: float(names::MIE_PHASE_FUNCTION_G)?,
            mie_scattering_to_extinction: rgb(names::MIE_SCATTERING_TO_EXTINCTION)?,
            mu_s_min: float(names::MU_S_MIN)?,
            sky_spectral_radiance_to_luminance: rgb(names::SKY_SPECTRAL_RADIANCE_TO_LUMINANCE)?,
            exposure: float(names::EXPOSURE)?,
            sun_spectral_radiance_to_luminance: rgb(names::SUN_SPECTRAL_RADIANCE_TO_LUMINANCE)?,
            combined_scattering_textures: size(names::COMBINED_SCATTERING_TEXTURES)?,
            earth_center: rgb(names::EARTH_CENTER)?,
            use_luminance: size(names::USE_LUMINANCE)?,
            sun_direction: rgb(names::SUN_DIRECTION)?,
            _pad0: 0.0,
            white_point: rgb(names::WHITE_POINT)?,
            _pad1: 0.0,
            sun_size: [sun_size.x, sun_size.y],
            _pad2: [0.0; 2],
            transmittance_size: [
                size(names::TRANSMITTANCE_TEXTURE_WIDTH)?,
                size(names::TRANSMITTANCE_TEXTURE_HEIGHT)?,
            ],
            irradiance_size: [
                size(names::IRRADIANCE_TEXTURE_WIDTH)?,
                size(names::IRRADIANCE_TEXTURE_HEIGHT)?,
            ],
            scattering_size: [
                size(names::SCATTERING_TEXTURE_NU_SIZE)?,
                size(names::SCATTERING_TEXTURE_MU_S_SIZE)?,
                size(names::SCATTERING_TEXTURE_MU_SIZE)?,
                size(names::SCATTERING_TEXTURE_R_SIZE)?,
            ],
        })
    }
}

/// Camera of the sky pass, in the model's length unit.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct SkyCamera {
    pub clip_to_view: [[f32; 4]; 4],
    pub view_to_world: [[f32; 4]; 4],
    pub position: [f32; 3],
    pub _pad0: f32,
}

static_assertions::assert_eq_size!(SkyCamera, [u8; 144]);

impl SkyCamera {
    pub fn new(view: Mat4, projection: Mat4) -> Self {
        let view_to_world = view.inverse();
        Self {
            clip_to_view: projection.inverse().to_cols_array_2d(),
            view_to_world: view_to_world.to_cols_array_2d(),
            position: view_to_world.w_axis.truncate().to_array(),
            _pad0: 0.0,
        }
    }

    /// Right-handed perspective camera at `position` looking at `target`.
    pub fn look_at(position: Vec3, target: Vec3, up: Vec3, fov_y: f32, aspect: f32) -> Self {
        let view = Mat4::look_at_rh(position, target, up);
        let projection = Mat4::perspective_rh(fov_y, aspect, 0.1, 1.0e4);
        Self::new(view, projection)
    }
}

fn lut_entry(binding: u32, view_dimension: wgpu::TextureViewDimension) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::FRAGMENT,
        ty: wgpu::BindingType::Texture {
            sample_type: wgpu::TextureSampleType::Float { filterable: false },
            view_dimension,
            multisampled: false,
        },
        count: None,
    }
}

fn uniform_entry(binding: u32) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::VERTEX_FRAGMENT,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Uniform,
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}

/// Full-screen sky renderer.
pub struct SkyRenderer {
    pub pipeline: wgpu::RenderPipeline,
    pub bind_group_layout: wgpu::BindGroupLayout,
    pub material_buffer: wgpu::Buffer,
    pub camera_buffer: wgpu::Buffer,
    pub target_format: wgpu::TextureFormat,
}

impl SkyRenderer {
    pub fn new(device: &wgpu::Device, target_format: wgpu::TextureFormat) -> Self {
        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("sky-shader"),
            source: wgpu::ShaderSource::Wgsl(SKY.into()),
        });

        let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("sky-bind-group-layout"),
            entries: &[
                uniform_entry(0),
                uniform_entry(1),
                lut_entry(2, wgpu::TextureViewDimension::D2),
                lut_entry(3, wgpu::TextureViewDimension::D3),
                lut_entry(4, wgpu::TextureViewDimension::D2),
                lut_entry(5, wgpu::TextureViewDimension::D3),
            ],
        });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("sky-pipeline-layout"),
            bind_group_layouts: &[&bind_group_layout],
            immediate_size: 0,
        });

        let pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some("sky-pipeline"),
            layout: Some(&pipeline_layout),
            vertex: wgpu::VertexState {
                module: &shader,
                entry_point: Some("vs_fullscreen"),
                buffers: &[],
                compilation_options: wgpu::PipelineCompilationOptions::default(),
            },
            primitive: wgpu::PrimitiveState {
                topology: wgpu::PrimitiveTopology::TriangleList,
                ..Default::default()
            },
            depth_stencil: None,
            multisample: wgpu::MultisampleState::default(),
            fragment: Some(wgpu::FragmentState {
                module: &shader,
                entry_point: Some("fs_sky"),
                targets: &[Some(wgpu::ColorTargetState {
                    format: target_format,
                    blend: None,
                    write_mask: wgpu::ColorWrites::ALL,
                })],
                compilation_options: wgpu::PipelineCompilationOptions::default(),
            }),
            multiview_mask: None,
            cache: None,
        });

        let material_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("sky-material-uniform"),
            size: std::mem::size_of::<MaterialUniform>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let camera_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("sky-camera-uniform"),
            size: std::mem::size_of::<SkyCamera>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        Self {
            pipeline,
            bind_group_layout,
            material_buffer,
            camera_buffer,
            target_format,
        }
    }

    pub fn update_material(&self, queue: &wgpu::Queue, material: &MaterialUniform) {
        queue.write_buffer(&self.material_buffer, 0, bytemuck::cast_slice(&[*material]));
    }

    pub fn update_camera(&self, queue: &wgpu::Queue, camera: &SkyCamera) {
        queue.write_buffer(&self.camera_buffer, 0, bytemuck::cast_slice(&[*camera]));
    }

    /// Bind the lookup textures a model bound into `properties`.
    pub fn create_bind_group(
        &self,
        backend: &WgpuBackend,
        properties: &PropertyBlock<WgpuTexture>,
    ) -> Result<wgpu::BindGroup, SkyError> {
        let view = |name: &'static str| -> Result<wgpu::TextureView, SkyError> {
            let texture = properties
                .texture(name)
                .ok_or(SkyError::MissingProperty(name))?;
            let sampled = backend
                .sampled_texture(texture)
                .ok_or(SkyError::Released(texture.descriptor().label))?;
            Ok(sampled.create_view(&wgpu::TextureViewDescriptor::default()))
        };
        let transmittance = view(names::TRANSMITTANCE_TEXTURE)?;
        let scattering = view(names::SCATTERING_TEXTURE)?;
        let irradiance = view(names::IRRADIANCE_TEXTURE)?;
        let single_mie = view(names::SINGLE_MIE_SCATTERING_TEXTURE)?;

        Ok(backend.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("sky-bind-group"),
            layout: &self.bind_group_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: self.material_buffer.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: self.camera_buffer.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: wgpu::BindingResource::TextureView(&transmittance),
                },
                wgpu::BindGroupEntry {
                    binding: 3,
                    resource: wgpu::BindingResource::TextureView(&scattering),
                },
                wgpu::BindGroupEntry {
                    binding: 4,
                    resource: wgpu::BindingResource::TextureView(&irradiance),
                },
                wgpu::BindGroupEntry {
                    binding: 5,
                    resource: wgpu::BindingResource::TextureView(&single_mie),
                },
            ],
        }))
    }

    /// Record the sky as a full-screen triangle.
    pub fn render<'a>(&'a self, render_pass: &mut wgpu::RenderPass<'a>, bind_group: &'a wgpu::BindGroup) {
        render_pass.set_pipeline(&self.pipeline);
        render_pass.set_bind_group(0, bind_group, &[]);
        render_pass.draw(0..3, 0..1);
    }

    /// Render into a new `width` x `height` texture and read it back as
    /// tightly packed rows of 4-byte pixels. The target format must have
    /// 4-byte texels.
    pub fn render_offscreen(
        &self,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        bind_group: &wgpu::BindGroup,
        width: u32,
        height: u32,
    ) -> Result<Vec<u8>, ReadbackError> {
        let target = device.create_texture(&wgpu::TextureDescriptor {
            label: Some("sky-target"),
            size: wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: self.target_format,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::COPY_SRC,
            view_formats: &[],
        });
        let view = target.create_view(&wgpu::TextureViewDescriptor::default());

        let bytes_per_pixel = 4;
        let unpadded_bytes_per_row = width * bytes_per_pixel;
        let padded_bytes_per_row = unpadded_bytes_per_row.div_ceil(wgpu::COPY_BYTES_PER_ROW_ALIGNMENT)
            * wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;
        let staging = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("sky-readback"),
            size: u64::from(padded_bytes_per_row) * u64::from(height),
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("sky-offscreen"),
        });
        {
            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("sky-pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &view,
                    depth_slice: None,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(wgpu::Color::BLACK),
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: None,
                timestamp_writes: None,
                occlusion_query_set: None,
                multiview_mask: None,
            });
            self.render(&mut pass, bind_group);
        }
        encoder.copy_texture_to_buffer(
            wgpu::TexelCopyTextureInfo {
                texture: &target,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::TexelCopyBufferInfo {
                buffer: &staging,
                layout: wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(padded_bytes_per_row),
                    rows_per_image: Some(height),
                },
            },
            wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
        );
        queue.submit(std::iter::once(encoder.finish()));

        let slice = staging.slice(..);
        let (tx, rx) = mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = tx.send(result);
        });
        device.poll(wgpu::PollType::wait_indefinitely())?;
        rx.recv().map_err(|_| ReadbackError::CallbackDropped)??;

        let mut pixels = Vec::with_capacity((unpadded_bytes_per_row * height) as usize);
        {
            let mapped = slice.get_mapped_range();
            for row in 0..height {
                let start = (row * padded_bytes_per_row) as usize;
                let end = start + unpadded_bytes_per_row as usize;
                pixels.extend_from_slice(&mapped[start..end]);
            }
        }
        staging.unmap();
        Ok(pixels)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::create_test_device_queue;
    use aether_scattering::{
        CpuBackend, CpuTexture, SampleCounts, ScatteringConfig, ScatteringModel,
        ScatteringResources, TextureLayout,
    };
    use std::sync::Arc;

    fn compact_config() -> ScatteringConfig {
        ScatteringConfig {
            layout: TextureLayout::compact(),
            samples: SampleCounts::compact(),
            ..ScatteringConfig::default()
        }
    }

    #[test]
    fn test_material_uniform_reads_bound_model() {
        let mut resources = ScatteringResources::<CpuBackend>::new();
        resources.set_precompute(Arc::new(CpuBackend::new()));
        let mut model = ScatteringModel::new(compact_config());
        model.init(&resources, 1).expect("init");
        model.sun_direction = Vec3::new(0.0, 2.0, 0.0);

        let mut block = PropertyBlock::<CpuTexture>::new();
        model.bind_to_material(&mut block).expect("bind");
        let material = MaterialUniform::from_properties(&block).expect("complete material");

        assert_eq!(material.scattering_size, [4, 4, 8, 4], "(nu, mu_s, mu, r)");
        assert_eq!(material.transmittance_size, [32, 16]);
        assert_eq!(material.sun_direction, [0.0, 1.0, 0.0], "normalized sun");
        assert_eq!(material.exposure, 10.0);
        assert!(material.top_radius > material.bottom_radius);
    }

    #[test]
    fn test_material_uniform_names_the_missing_property() {
        let block = PropertyBlock::<CpuTexture>::new();
        let error = MaterialUniform::from_properties(&block).expect_err("empty block");
        assert!(matches!(error, SkyError::MissingProperty(_)));
    }

    #[test]
    fn test_sky_camera_position_comes_from_view() {
        let position = Vec3::new(1.0, 2.0, 3.0);
        let camera = SkyCamera::look_at(position, Vec3::new(1.0, 2.0, 0.0), Vec3::Y, 1.0, 1.5);
        let p = Vec3::from_array(camera.position);
        assert!((p - position).length() < 1e-4, "got {p:?}");
    }

    #[test]
    fn test_render_sky_offscreen() {
        let Some((device, queue)) = create_test_device_queue() else {
            return;
        };
        let backend = Arc::new(
            crate::WgpuBackend::new(Arc::clone(&device), Arc::clone(&queue)).expect("backend"),
        );
        let mut resources = ScatteringResources::<crate::WgpuBackend>::new();
        resources.set_precompute(Arc::clone(&backend));

        let mut model = ScatteringModel::new(compact_config());
        model.init(&resources, 2).expect("init");
        model.sun_direction = Vec3::new(0.0, 0.5, -1.0);
        let mut block = PropertyBlock::<WgpuTexture>::new();
        model.bind_to_material(&mut block).expect("bind");

        let renderer = SkyRenderer::new(&device, wgpu::TextureFormat::Rgba8Unorm);
        let material = MaterialUniform::from_properties(&block).expect("material");
        renderer.update_material(&queue, &material);
        let camera = SkyCamera::look_at(
            Vec3::new(0.0, 0.5, 0.0),
            Vec3::new(0.0, 0.5, -1.0),
            Vec3::Y,
            1.0,
            1.0,
        );
        renderer.update_camera(&queue, &camera);
        let bind_group = renderer.create_bind_group(&backend, &block).expect("bind group");

        let pixels = renderer
            .render_offscreen(&device, &queue, &bind_group, 16, 16)
            .expect("readback");
        assert_eq!(pixels.len(), 16 * 16 * 4);
        assert!(pixels.chunks(4).all(|pixel| pixel[3] == 255), "opaque output");
        assert!(pixels.chunks(4).any(|pixel| pixel[2] > 0), "sky is not black");

        model.release();
        assert!(matches!(
            renderer.create_bind_group(&backend, &block),
            Err(SkyError::Released(_))
        ));
    }
}
