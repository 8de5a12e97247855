//! Reference backend evaluating the kernels on the CPU, one texel at a time.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock, RwLockReadGuard};

use glam::{Mat3, Vec3};

use crate::backend::{Dispatch, Pass, PassKind, PrecomputeBackend, TexelPrecision, TextureDescriptor};
use crate::kernels::{Kernels, Lut, ScatteringInputs, rayleigh_phase_function};

#[derive(Debug)]
struct CpuTextureInner {
    descriptor: TextureDescriptor,
    texels: RwLock<Option<Vec<[f32; 4]>>>,
}

/// Shared handle to texels in main memory. `None` once released.
#[derive(Clone, Debug)]
pub struct CpuTexture {
    inner: Arc<CpuTextureInner>,
}

struct TexelsGuard<'a> {
    descriptor: &'a TextureDescriptor,
    texels: RwLockReadGuard<'a, Option<Vec<[f32; 4]>>>,
}

impl TexelsGuard<'_> {
    fn lut(&self) -> Lut<'_> {
        let texels = self.texels.as_deref().unwrap_or(&[]);
        Lut::new(
            texels,
            self.descriptor.width,
            self.descriptor.height,
            self.descriptor.depth,
        )
    }
}

fn quantize(value: f32, precision: TexelPrecision) -> f32 {
    match precision {
        TexelPrecision::Half => half::f16::from_f32(value).to_f32(),
        TexelPrecision::Full => value,
    }
}

impl CpuTexture {
    pub fn descriptor(&self) -> &TextureDescriptor {
        &self.inner.descriptor
    }

    pub fn is_released(&self) -> bool {
        self.inner
            .texels
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_none()
    }

    /// Copy of every texel, or `None` if the texture was released.
    pub fn read_texels(&self) -> Option<Vec<[f32; 4]>> {
        self.inner
            .texels
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn texel(&self, x: u32, y: u32, z: u32) -> Option<[f32; 4]> {
        let desc = &self.inner.descriptor;
        if x >= desc.width || y >= desc.height || z >= desc.depth {
            return None;
        }
        let index = ((z * desc.height + y) * desc.width + x) as usize;
        self.inner
            .texels
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .and_then(|texels| texels.get(index).copied())
    }

    pub fn same_texture(&self, other: &CpuTexture) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    fn guard(&self) -> TexelsGuard<'_> {
        TexelsGuard {
            descriptor: &self.inner.descriptor,
            texels: self
                .inner
                .texels
                .read()
                .unwrap_or_else(PoisonError::into_inner),
        }
    }

    /// Evaluate `kernel` at every texel center, in storage order.
    fn evaluate_with<T>(&self, kernel: impl Fn(Vec3) -> T) -> Vec<T> {
        let desc = &self.inner.descriptor;
        let mut values = Vec::with_capacity(desc.texel_count());
        for z in 0..desc.depth {
            for y in 0..desc.height {
                for x in 0..desc.width {
                    values.push(kernel(Vec3::new(
                        x as f32 + 0.5,
                        y as f32 + 0.5,
                        z as f32 + 0.5,
                    )));
                }
            }
        }
        values
    }

    fn evaluate(&self, kernel: impl Fn(Vec3) -> Vec3) -> Vec<[f32; 4]> {
        self.evaluate_with(|frag| rgb(kernel(frag)))
    }

    fn store(&self, values: &[[f32; 4]], blend: bool) {
        let precision = self.inner.descriptor.precision;
        let mut texels = self
            .inner
            .texels
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let Some(texels) = texels.as_mut() else {
            log::warn!("Dispatch wrote to released texture '{}'", self.inner.descriptor.label);
            return;
        };
        for (texel, value) in texels.iter_mut().zip(values) {
            for (channel, v) in texel.iter_mut().zip(value) {
                let sum = if blend { *channel + v } else { *v };
                *channel = quantize(sum, precision);
            }
        }
    }
}

impl PartialEq for CpuTexture {
    fn eq(&self, other: &Self) -> bool {
        self.same_texture(other)
    }
}

/// A dispatch that went through [`CpuBackend`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DispatchRecord {
    pub kind: PassKind,
    pub scattering_order: u32,
    pub blend: bool,
}

/// [`PrecomputeBackend`] running every kernel synchronously on the calling
/// thread.
///
/// Intended for tests and previews with a compact texture layout; the full
/// resolution tables take minutes.
#[derive(Debug, Default)]
pub struct CpuBackend {
    live_textures: AtomicUsize,
    barriers: AtomicUsize,
    dispatches: Mutex<Vec<DispatchRecord>>,
}

impl CpuBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Textures created and not yet released.
    pub fn live_texture_count(&self) -> usize {
        self.live_textures.load(Ordering::Relaxed)
    }

    pub fn barrier_count(&self) -> usize {
        self.barriers.load(Ordering::Relaxed)
    }

    pub fn dispatch_log(&self) -> Vec<DispatchRecord> {
        self.dispatches
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

fn rgb(v: Vec3) -> [f32; 4] {
    v.extend(0.0).to_array()
}

impl PrecomputeBackend for CpuBackend {
    type Texture = CpuTexture;

    fn create_texture(&self, descriptor: &TextureDescriptor) -> CpuTexture {
        log::debug!(
            "Allocating {}x{}x{} {:?} texture '{}'",
            descriptor.width,
            descriptor.height,
            descriptor.depth,
            descriptor.precision,
            descriptor.label
        );
        self.live_textures.fetch_add(1, Ordering::Relaxed);
        CpuTexture {
            inner: Arc::new(CpuTextureInner {
                descriptor: descriptor.clone(),
                texels: RwLock::new(Some(vec![[0.0; 4]; descriptor.texel_count()])),
            }),
        }
    }

    fn release_texture(&self, texture: &CpuTexture) {
        let mut texels = texture
            .inner
            .texels
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        if texels.take().is_some() {
            self.live_textures.fetch_sub(1, Ordering::Relaxed);
        }
    }

    fn dispatch(&self, dispatch: &Dispatch<'_, CpuTexture>) {
        let kernels = Kernels::new(dispatch.atmosphere, dispatch.layout, dispatch.samples);
        let luminance: Mat3 = dispatch.luminance_from_radiance;
        let order = dispatch.scattering_order;
        let blend = dispatch.blend;
        log::debug!(
            "CPU dispatch {} (order {order}, blend {blend})",
            dispatch.pass.kind().name()
        );

        match &dispatch.pass {
            Pass::Transmittance { transmittance } => {
                let values =
                    transmittance.evaluate(|frag| kernels.transmittance_texel(frag.truncate()));
                transmittance.store(&values, false);
            }
            Pass::DirectIrradiance {
                transmittance,
                delta_irradiance,
                irradiance,
            } => {
                let values = {
                    let t = transmittance.guard();
                    delta_irradiance
                        .evaluate(|frag| kernels.direct_irradiance_texel(&t.lut(), frag.truncate()))
                };
                delta_irradiance.store(&values, false);
                // Direct irradiance is kept out of the accumulated irradiance.
                if !blend {
                    irradiance.store(&vec![[0.0; 4]; values.len()], false);
                }
            }
            Pass::SingleScattering {
                transmittance,
                delta_rayleigh,
                delta_mie,
                scattering,
                single_mie,
            } => {
                let pairs = {
                    let t = transmittance.guard();
                    delta_rayleigh
                        .evaluate_with(|frag| kernels.single_scattering_texel(&t.lut(), frag))
                };
                let rayleigh: Vec<[f32; 4]> = pairs.iter().map(|(r, _)| rgb(*r)).collect();
                let mie: Vec<[f32; 4]> = pairs.iter().map(|(_, m)| rgb(*m)).collect();
                delta_rayleigh.store(&rayleigh, false);
                delta_mie.store(&mie, false);

                let combined: Vec<[f32; 4]> = pairs
                    .iter()
                    .map(|(r, m)| {
                        let mie = luminance * *m;
                        (luminance * *r).extend(mie.x).to_array()
                    })
                    .collect();
                scattering.store(&combined, blend);

                if let Some(single_mie) = single_mie {
                    let converted: Vec<[f32; 4]> =
                        pairs.iter().map(|(_, m)| rgb(luminance * *m)).collect();
                    single_mie.store(&converted, blend);
                }
            }
            Pass::ScatteringDensity {
                transmittance,
                delta_rayleigh,
                delta_mie,
                delta_multiple,
                delta_irradiance,
                delta_density,
            } => {
                let values = {
                    let t = transmittance.guard();
                    let rayleigh = delta_rayleigh.guard();
                    let mie = delta_mie.guard();
                    let multiple = delta_multiple.guard();
                    let irradiance = delta_irradiance.guard();
                    let inputs = ScatteringInputs {
                        single_rayleigh: rayleigh.lut(),
                        single_mie: mie.lut(),
                        multiple: multiple.lut(),
                    };
                    delta_density.evaluate(|frag| {
                        kernels.scattering_density_texel(
                            &t.lut(),
                            &inputs,
                            &irradiance.lut(),
                            frag,
                            order,
                        )
                    })
                };
                delta_density.store(&values, false);
            }
            Pass::IndirectIrradiance {
                delta_rayleigh,
                delta_mie,
                delta_multiple,
                delta_irradiance,
                irradiance,
            } => {
                let values = {
                    let rayleigh = delta_rayleigh.guard();
                    let mie = delta_mie.guard();
                    let multiple = delta_multiple.guard();
                    let inputs = ScatteringInputs {
                        single_rayleigh: rayleigh.lut(),
                        single_mie: mie.lut(),
                        multiple: multiple.lut(),
                    };
                    delta_irradiance.evaluate_with(|frag| {
                        kernels.indirect_irradiance_texel(&inputs, frag.truncate(), order)
                    })
                };
                let delta: Vec<[f32; 4]> = values.iter().map(|e| rgb(*e)).collect();
                delta_irradiance.store(&delta, false);
                let converted: Vec<[f32; 4]> =
                    values.iter().map(|e| rgb(luminance * *e)).collect();
                irradiance.store(&converted, blend);
            }
            Pass::MultipleScattering {
                transmittance,
                delta_density,
                delta_multiple,
                scattering,
            } => {
                let texels = {
                    let t = transmittance.guard();
                    let density = delta_density.guard();
                    delta_multiple.evaluate_with(|frag| {
                        kernels.multiple_scattering_texel(&t.lut(), &density.lut(), frag)
                    })
                };
                let delta: Vec<[f32; 4]> = texels.iter().map(|(l, _)| rgb(*l)).collect();
                delta_multiple.store(&delta, false);
                let accumulated: Vec<[f32; 4]> = texels
                    .iter()
                    .map(|(l, nu)| rgb(luminance * *l / rayleigh_phase_function(*nu)))
                    .collect();
                scattering.store(&accumulated, blend);
            }
        }

        self.dispatches
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(DispatchRecord {
                kind: dispatch.pass.kind(),
                scattering_order: order,
                blend,
            });
    }

    fn barrier(&self) {
        // Dispatches complete before returning.
        self.barriers.fetch_add(1, Ordering::Relaxed);
    }

    fn finish(&self) {}
}
