//! [`PrecomputeBackend`] running the kernels as wgpu compute passes.
//!
//! Lookup textures live in storage buffers of `vec4<f32>` texels laid out
//! like the CPU backend's (x fastest, then y, then z). The kernels filter
//! them by hand, so no format or filtering support is required while
//! precomputing. Consumers get real textures from
//! [`WgpuBackend::sampled_texture`].

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use aether_scattering::{
    Dispatch, Pass, PassKind, PrecomputeBackend, TexelPrecision, TextureDescriptor,
    AtmosphereUniform,
};
use bytemuck::{Pod, Zeroable};
use wgpu::util::DeviceExt;

use crate::shader::{ShaderError, ShaderLibrary};

const TEXEL_BYTES: u64 = 16;

/// Uniform block shared by every precompute kernel. Matches
/// `PassParameters` in `common.wgsl`.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct PassUniform {
    /// (offset 0)
    pub atmosphere: AtmosphereUniform,
    /// Columns of a mat3x3, each padded to 16 bytes. (offset 288)
    pub luminance_from_radiance: [[f32; 4]; 3],
    /// (offset 336)
    pub transmittance_size: [u32; 2],
    /// (offset 344)
    pub irradiance_size: [u32; 2],
    /// (nu, mu_s, mu, r). (offset 352)
    pub scattering_size: [u32; 4],
    /// (offset 368)
    pub transmittance_samples: u32,
    /// (offset 372)
    pub single_scattering_samples: u32,
    /// (offset 376)
    pub scattering_density_samples: u32,
    /// (offset 380)
    pub indirect_irradiance_samples: u32,
    /// (offset 384)
    pub multiple_scattering_samples: u32,
    /// (offset 388)
    pub scattering_order: u32,
    /// (offset 392)
    pub blend: u32,
    /// (offset 396)
    pub half_precision: u32,
    /// (offset 400)
    pub has_single_mie: u32,
    /// Padding to 416 bytes. (offset 404)
    pub _pad: [u32; 3],
}

static_assertions::assert_eq_size!(PassUniform, [u8; 416]);

impl PassUniform {
    pub fn new<T>(dispatch: &Dispatch<'_, T>, half_precision: bool, has_single_mie: bool) -> Self {
        let layout = &dispatch.layout;
        let samples = &dispatch.samples;
        let m = dispatch.luminance_from_radiance;
        Self {
            atmosphere: *dispatch.atmosphere,
            luminance_from_radiance: [
                m.x_axis.extend(0.0).to_array(),
                m.y_axis.extend(0.0).to_array(),
                m.z_axis.extend(0.0).to_array(),
            ],
            transmittance_size: [layout.transmittance_width, layout.transmittance_height],
            irradiance_size: [layout.irradiance_width, layout.irradiance_height],
            scattering_size: [
                layout.scattering_nu,
                layout.scattering_mu_s,
                layout.scattering_mu,
                layout.scattering_r,
            ],
            transmittance_samples: samples.transmittance,
            single_scattering_samples: samples.single_scattering,
            scattering_density_samples: samples.scattering_density,
            indirect_irradiance_samples: samples.indirect_irradiance,
            multiple_scattering_samples: samples.multiple_scattering,
            scattering_order: dispatch.scattering_order,
            blend: u32::from(dispatch.blend),
            half_precision: u32::from(half_precision),
            has_single_mie: u32::from(has_single_mie),
            _pad: [0; 3],
        }
    }
}

#[derive(Debug)]
struct WgpuTextureInner {
    descriptor: TextureDescriptor,
    buffer: wgpu::Buffer,
    released: AtomicBool,
    sampled: Mutex<Option<Arc<wgpu::Texture>>>,
}

/// Shared handle to a lookup texture in GPU memory.
#[derive(Clone, Debug)]
pub struct WgpuTexture {
    inner: Arc<WgpuTextureInner>,
}

impl WgpuTexture {
    pub fn descriptor(&self) -> &TextureDescriptor {
        &self.inner.descriptor
    }

    pub fn is_released(&self) -> bool {
        self.inner.released.load(Ordering::Acquire)
    }

    pub fn same_texture(&self, other: &WgpuTexture) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub(crate) fn buffer(&self) -> &wgpu::Buffer {
        &self.inner.buffer
    }

    fn invalidate_sampled(&self) {
        self.inner
            .sampled
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }
}

impl PartialEq for WgpuTexture {
    fn eq(&self, other: &Self) -> bool {
        self.same_texture(other)
    }
}

/// Storage bindings of a kernel after the uniform at binding 0, in binding
/// order. `true` marks a read-only input.
fn storage_bindings(kind: PassKind) -> &'static [bool] {
    match kind {
        PassKind::Transmittance => &[false],
        PassKind::DirectIrradiance => &[true, false, false],
        PassKind::SingleScattering => &[true, false, false, false, false],
        PassKind::ScatteringDensity => &[true, true, true, true, true, false],
        PassKind::IndirectIrradiance => &[true, true, true, false, false],
        PassKind::MultipleScattering => &[true, true, false, false],
    }
}

/// Textures bound by a pass, in [`storage_bindings`] order. `None` stands
/// for the unused single Mie slot in combined mode.
fn bound_textures<'a>(pass: &Pass<'a, WgpuTexture>) -> Vec<Option<&'a WgpuTexture>> {
    match *pass {
        Pass::Transmittance { transmittance } => vec![Some(transmittance)],
        Pass::DirectIrradiance {
            transmittance,
            delta_irradiance,
            irradiance,
        } => vec![Some(transmittance), Some(delta_irradiance), Some(irradiance)],
        Pass::SingleScattering {
            transmittance,
            delta_rayleigh,
            delta_mie,
            scattering,
            single_mie,
        } => vec![
            Some(transmittance),
            Some(delta_rayleigh),
            Some(delta_mie),
            Some(scattering),
            single_mie,
        ],
        Pass::ScatteringDensity {
            transmittance,
            delta_rayleigh,
            delta_mie,
            delta_multiple,
            delta_irradiance,
            delta_density,
        } => vec![
            Some(transmittance),
            Some(delta_rayleigh),
            Some(delta_mie),
            Some(delta_multiple),
            Some(delta_irradiance),
            Some(delta_density),
        ],
        Pass::IndirectIrradiance {
            delta_rayleigh,
            delta_mie,
            delta_multiple,
            delta_irradiance,
            irradiance,
        } => vec![
            Some(delta_rayleigh),
            Some(delta_mie),
            Some(delta_multiple),
            Some(delta_irradiance),
            Some(irradiance),
        ],
        Pass::MultipleScattering {
            transmittance,
            delta_density,
            delta_multiple,
            scattering,
        } => vec![
            Some(transmittance),
            Some(delta_density),
            Some(delta_multiple),
            Some(scattering),
        ],
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

pub(crate) fn sampled_format(precision: TexelPrecision) -> wgpu::TextureFormat {
    match precision {
        TexelPrecision::Half => wgpu::TextureFormat::Rgba16Float,
        TexelPrecision::Full => wgpu::TextureFormat::Rgba32Float,
    }
}

struct ComputeKernel {
    layout: wgpu::BindGroupLayout,
    pipeline: wgpu::ComputePipeline,
}

fn build_kernel(
    device: &wgpu::Device,
    label: &str,
    module: &wgpu::ShaderModule,
    entries: &[wgpu::BindGroupLayoutEntry],
) -> ComputeKernel {
    let layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
        label: Some(label),
        entries,
    });
    let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
        label: Some(label),
        bind_group_layouts: &[&layout],
        immediate_size: 0,
    });
    let pipeline = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
        label: Some(label),
        layout: Some(&pipeline_layout),
        module,
        entry_point: Some("main"),
        compilation_options: Default::default(),
        cache: None,
    });
    ComputeKernel { layout, pipeline }
}

/// Precompute backend on a wgpu device.
///
/// Dispatches are recorded into one pending command encoder, which is
/// submitted at every barrier.
pub struct WgpuBackend {
    pub(crate) device: Arc<wgpu::Device>,
    pub(crate) queue: Arc<wgpu::Queue>,
    kernels: HashMap<PassKind, ComputeKernel>,
    finalize: HashMap<(bool, TexelPrecision), ComputeKernel>,
    placeholder: wgpu::Buffer,
    pending: Mutex<Option<wgpu::CommandEncoder>>,
    live_textures: AtomicUsize,
    submissions: AtomicUsize,
}

impl std::fmt::Debug for WgpuBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WgpuBackend")
            .field("live_textures", &self.live_texture_count())
            .field("submissions", &self.submission_count())
            .finish_non_exhaustive()
    }
}

impl WgpuBackend {
    /// Compile every kernel and build its pipeline.
    pub fn new(device: Arc<wgpu::Device>, queue: Arc<wgpu::Queue>) -> Result<Self, ShaderError> {
        let mut library = ShaderLibrary::new();

        let mut kernels = HashMap::new();
        for kind in PassKind::ALL {
            let module = library.load_pass(&device, kind)?;
            let mut entries = vec![uniform_entry(0)];
            entries.extend(
                storage_bindings(kind)
                    .iter()
                    .zip(1u32..)
                    .map(|(&read_only, binding)| storage_entry(binding, read_only)),
            );
            kernels.insert(kind, build_kernel(&device, kind.name(), &module, &entries));
        }

        let mut finalize = HashMap::new();
        for three_d in [false, true] {
            for precision in [TexelPrecision::Half, TexelPrecision::Full] {
                let module = library.load_finalize(&device, three_d, precision)?;
                let view_dimension = if three_d {
                    wgpu::TextureViewDimension::D3
                } else {
                    wgpu::TextureViewDimension::D2
                };
                let entries = [
                    uniform_entry(0),
                    storage_entry(1, true),
                    wgpu::BindGroupLayoutEntry {
                        binding: 2,
                        visibility: wgpu::ShaderStages::COMPUTE,
                        ty: wgpu::BindingType::StorageTexture {
                            access: wgpu::StorageTextureAccess::WriteOnly,
                            format: sampled_format(precision),
                            view_dimension,
                        },
                        count: None,
                    },
                ];
                let label = crate::shader::finalize_name(three_d, precision);
                finalize.insert(
                    (three_d, precision),
                    build_kernel(&device, &label, &module, &entries),
                );
            }
        }

        let placeholder = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("aether-placeholder-texels"),
            size: TEXEL_BYTES,
            usage: wgpu::BufferUsages::STORAGE,
            mapped_at_creation: false,
        });

        log::info!("Built {} precompute pipelines", kernels.len() + finalize.len());

        Ok(Self {
            device,
            queue,
            kernels,
            finalize,
            placeholder,
            pending: Mutex::new(None),
            live_textures: AtomicUsize::new(0),
            submissions: AtomicUsize::new(0),
        })
    }

    /// Textures created and not yet released.
    pub fn live_texture_count(&self) -> usize {
        self.live_textures.load(Ordering::Relaxed)
    }

    /// Command buffers submitted so far.
    pub fn submission_count(&self) -> usize {
        self.submissions.load(Ordering::Relaxed)
    }

    pub(crate) fn submit_pending(&self) {
        let encoder = self
            .pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(encoder) = encoder {
            self.queue.submit(std::iter::once(encoder.finish()));
            self.submissions.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// A sampled copy of `texture` for sky and water shaders: 2D or 3D,
    /// `Rgba16Float` or `Rgba32Float` after the texture's precision. Built on
    /// first use and cached until a later dispatch writes the texture.
    /// `None` once released.
    pub fn sampled_texture(&self, texture: &WgpuTexture) -> Option<Arc<wgpu::Texture>> {
        if texture.is_released() {
            return None;
        }
        let mut cached = texture
            .inner
            .sampled
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(sampled) = cached.as_ref() {
            return Some(Arc::clone(sampled));
        }

        let desc = texture.descriptor();
        let three_d = desc.three_d;
        let kernel = self.finalize.get(&(three_d, desc.precision))?;
        let sampled = self.device.create_texture(&wgpu::TextureDescriptor {
            label: Some(desc.label),
            size: wgpu::Extent3d {
                width: desc.width,
                height: desc.height,
                depth_or_array_layers: desc.depth,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: if three_d {
                wgpu::TextureDimension::D3
            } else {
                wgpu::TextureDimension::D2
            },
            format: sampled_format(desc.precision),
            usage: wgpu::TextureUsages::TEXTURE_BINDING
                | wgpu::TextureUsages::STORAGE_BINDING
                | wgpu::TextureUsages::COPY_SRC,
            view_formats: &[],
        });
        let view = sampled.create_view(&wgpu::TextureViewDescriptor::default());

        let extent = [desc.width, desc.height, desc.depth, 0];
        let extent_buffer = self
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("aether-finalize-extent"),
                contents: bytemuck::cast_slice(&extent),
                usage: wgpu::BufferUsages::UNIFORM,
            });
        let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some(desc.label),
            layout: &kernel.layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: extent_buffer.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: texture.buffer().as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: wgpu::BindingResource::TextureView(&view),
                },
            ],
        });

        self.submit_pending();
        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("aether-finalize"),
            });
        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("aether-finalize"),
                timestamp_writes: None,
            });
            pass.set_pipeline(&kernel.pipeline);
            pass.set_bind_group(0, &bind_group, &[]);
            let [x, y, z] = desc.workgroups();
            pass.dispatch_workgroups(x, y, z);
        }
        self.queue.submit(std::iter::once(encoder.finish()));
        self.submissions.fetch_add(1, Ordering::Relaxed);

        let sampled = Arc::new(sampled);
        *cached = Some(Arc::clone(&sampled));
        Some(sampled)
    }
}

impl PrecomputeBackend for WgpuBackend {
    type Texture = WgpuTexture;

    fn create_texture(&self, descriptor: &TextureDescriptor) -> WgpuTexture {
        log::debug!(
            "Allocating {}x{}x{} {:?} texture '{}'",
            descriptor.width,
            descriptor.height,
            descriptor.depth,
            descriptor.precision,
            descriptor.label
        );
        // wgpu zero-initializes new buffers.
        let buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(descriptor.label),
            size: descriptor.texel_count().max(1) as u64 * TEXEL_BYTES,
            usage: wgpu::BufferUsages::STORAGE
                | wgpu::BufferUsages::COPY_SRC
                | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        self.live_textures.fetch_add(1, Ordering::Relaxed);
        WgpuTexture {
            inner: Arc::new(WgpuTextureInner {
                descriptor: descriptor.clone(),
                buffer,
                released: AtomicBool::new(false),
                sampled: Mutex::new(None),
            }),
        }
    }

    fn release_texture(&self, texture: &WgpuTexture) {
        if texture.inner.released.swap(true, Ordering::AcqRel) {
            return;
        }
        // Work still referencing the buffer must be submitted first.
        self.submit_pending();
        texture.inner.buffer.destroy();
        if let Some(sampled) = texture
            .inner
            .sampled
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            sampled.destroy();
        }
        self.live_textures.fetch_sub(1, Ordering::Relaxed);
    }

    fn dispatch(&self, dispatch: &Dispatch<'_, WgpuTexture>) {
        let kind = dispatch.pass.kind();
        let Some(kernel) = self.kernels.get(&kind) else {
            log::error!("No pipeline for pass {}", kind.name());
            return;
        };
        let textures = bound_textures(&dispatch.pass);
        let flags = storage_bindings(kind);

        // Every texture of a model shares one precision.
        let half_precision = textures
            .iter()
            .flatten()
            .next()
            .is_some_and(|texture| texture.descriptor().precision == TexelPrecision::Half);
        let has_single_mie = textures.iter().all(Option::is_some);
        let uniform = PassUniform::new(dispatch, half_precision, has_single_mie);
        log::debug!(
            "GPU dispatch {} (order {}, blend {}) {:?}",
            kind.name(),
            dispatch.scattering_order,
            dispatch.blend,
            dispatch.workgroups
        );

        let uniform_buffer = self
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some(kind.name()),
                contents: bytemuck::bytes_of(&uniform),
                usage: wgpu::BufferUsages::UNIFORM,
            });

        let mut entries = vec![wgpu::BindGroupEntry {
            binding: 0,
            resource: uniform_buffer.as_entire_binding(),
        }];
        for (texture, binding) in textures.iter().zip(1u32..) {
            let buffer = texture.map_or(&self.placeholder, |texture| texture.buffer());
            entries.push(wgpu::BindGroupEntry {
                binding,
                resource: buffer.as_entire_binding(),
            });
        }
        for (texture, &read_only) in textures.iter().zip(flags) {
            if let (Some(texture), false) = (texture, read_only) {
                texture.invalidate_sampled();
            }
        }

        let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some(kind.name()),
            layout: &kernel.layout,
            entries: &entries,
        });

        let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        let encoder = pending.get_or_insert_with(|| {
            self.device
                .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                    label: Some("aether-precompute"),
                })
        });
        let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
            label: Some(kind.name()),
            timestamp_writes: None,
        });
        pass.set_pipeline(&kernel.pipeline);
        pass.set_bind_group(0, &bind_group, &[]);
        let [x, y, z] = dispatch.workgroups;
        pass.dispatch_workgroups(x, y, z);
    }

    fn barrier(&self) {
        self.submit_pending();
    }

    fn finish(&self) {
        self.submit_pending();
        if let Err(error) = self.device.poll(wgpu::PollType::wait_indefinitely()) {
            log::error!("Waiting for precompute work failed: {error}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::create_test_device_queue;
    use aether_scattering::{
        CpuBackend, ModelTextures, PrecomputeOrchestrator, SampleCounts, ScatteringConfig,
        TextureLayout,
    };
    use glam::Mat3;

    fn compact_config() -> ScatteringConfig {
        ScatteringConfig {
            layout: TextureLayout::compact(),
            samples: SampleCounts::compact(),
            ..ScatteringConfig::default()
        }
    }

    fn create_test_backend() -> Option<WgpuBackend> {
        let (device, queue) = create_test_device_queue()?;
        WgpuBackend::new(device, queue).ok()
    }

    #[test]
    fn test_pass_uniform_packs_layout_and_flags() {
        let config = compact_config();
        let atmosphere = AtmosphereUniform::from_config(&config, [680.0, 550.0, 440.0]);
        let texture = 0u8;
        let dispatch = Dispatch {
            pass: Pass::Transmittance {
                transmittance: &texture,
            },
            workgroups: [4, 2, 1],
            atmosphere: &atmosphere,
            layout: config.layout,
            samples: config.samples,
            luminance_from_radiance: Mat3::from_diagonal(glam::Vec3::new(1.0, 2.0, 3.0)),
            scattering_order: 3,
            blend: true,
        };
        let uniform = PassUniform::new(&dispatch, true, false);
        assert_eq!(uniform.scattering_size, [4, 4, 8, 4], "(nu, mu_s, mu, r)");
        assert_eq!(uniform.transmittance_size, [32, 16]);
        assert_eq!(uniform.luminance_from_radiance[1], [0.0, 2.0, 0.0, 0.0]);
        assert_eq!(uniform.blend, 1);
        assert_eq!(uniform.half_precision, 1);
        assert_eq!(uniform.has_single_mie, 0);
        assert_eq!(uniform.scattering_order, 3);
        assert_eq!(uniform.atmosphere, atmosphere);
    }

    #[test]
    fn test_binding_tables_match_pass_arity() {
        assert_eq!(storage_bindings(PassKind::ScatteringDensity).len(), 6);
        for kind in PassKind::ALL {
            let flags = storage_bindings(kind);
            assert!(
                flags.iter().any(|read_only| !read_only),
                "{} writes something",
                kind.name()
            );
        }
    }

    #[test]
    fn test_create_and_release_textures() {
        let Some(backend) = create_test_backend() else {
            return;
        };
        let desc = TextureDescriptor::new_2d("irradiance", 8, 4, TexelPrecision::Full);
        let texture = backend.create_texture(&desc);
        assert_eq!(backend.live_texture_count(), 1);
        assert_eq!(texture.buffer().size(), 8 * 4 * 16);

        backend.release_texture(&texture);
        backend.release_texture(&texture);
        assert!(texture.is_released());
        assert_eq!(backend.live_texture_count(), 0, "double release is a no-op");
        assert!(backend.sampled_texture(&texture).is_none());
    }

    #[test]
    fn test_precompute_matches_cpu_backend() {
        let Some(backend) = create_test_backend() else {
            return;
        };
        let config = compact_config();

        let gpu_textures = ModelTextures::allocate(&backend, &config);
        PrecomputeOrchestrator::new(&backend, &config).run(&gpu_textures, 4);

        let cpu = CpuBackend::new();
        let cpu_textures = ModelTextures::allocate(&cpu, &config);
        PrecomputeOrchestrator::new(&cpu, &config).run(&cpu_textures, 4);

        let pairs = [
            (&gpu_textures.transmittance, &cpu_textures.transmittance),
            (&gpu_textures.irradiance, &cpu_textures.irradiance),
            (&gpu_textures.scattering, &cpu_textures.scattering),
        ];
        for (gpu_texture, cpu_texture) in pairs {
            let gpu_texels = backend.read_texels(gpu_texture).expect("readback");
            let cpu_texels = cpu_texture.read_texels().expect("cpu texels");
            assert_eq!(gpu_texels.len(), cpu_texels.len());
            for (index, (g, c)) in gpu_texels.iter().zip(&cpu_texels).enumerate() {
                for lane in 0..4 {
                    let tolerance = 1e-3 + 2e-2 * c[lane].abs();
                    assert!(
                        (g[lane] - c[lane]).abs() <= tolerance,
                        "{} texel {index} lane {lane}: gpu {} vs cpu {}",
                        gpu_texture.descriptor().label,
                        g[lane],
                        c[lane]
                    );
                }
            }
        }

        let sampled = backend
            .sampled_texture(&gpu_textures.scattering)
            .expect("sampled scattering");
        assert_eq!(sampled.dimension(), wgpu::TextureDimension::D3);
        let again = backend
            .sampled_texture(&gpu_textures.scattering)
            .expect("cached");
        assert!(Arc::ptr_eq(&sampled, &again), "sampled copy is cached");

        gpu_textures.release(&backend);
        assert_eq!(backend.live_texture_count(), 0);
    }
}
