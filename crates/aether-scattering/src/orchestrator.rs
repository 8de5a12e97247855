//! Ordered precompute pipeline: transmittance, direct irradiance, single
//! scattering, then one density / indirect irradiance / multiple scattering
//! round per additional scattering order.

use std::time::Instant;

use glam::{Mat3, Vec3};

use crate::backend::{Dispatch, Pass, PrecomputeBackend, TexelPrecision, TextureDescriptor};
use crate::config::ScatteringConfig;
use crate::spectrum::{self, LAMBDA_MAX, LAMBDA_MIN, RGB_LAMBDAS};
use crate::uniform::AtmosphereUniform;

/// Textures a model keeps after precomputation.
#[derive(Clone, Debug)]
pub struct ModelTextures<T> {
    pub transmittance: T,
    pub scattering: T,
    pub irradiance: T,
    /// Separate single Mie scattering, only when textures are not combined.
    pub single_mie: Option<T>,
    /// 1x1x1 stand-in bound to the single Mie slot in combined mode.
    pub empty_single_mie: Option<T>,
}

impl<T: Clone> ModelTextures<T> {
    /// Allocate every texture the model owns, sized by `config.layout`.
    pub fn allocate<B>(backend: &B, config: &ScatteringConfig) -> Self
    where
        B: PrecomputeBackend<Texture = T>,
    {
        let layout = &config.layout;
        let precision = TexelPrecision::from_half_flag(config.half_precision);
        let scattering_descriptor = |label| {
            TextureDescriptor::new_3d(
                label,
                layout.scattering_width(),
                layout.scattering_height(),
                layout.scattering_depth(),
                precision,
            )
        };

        let (single_mie, empty_single_mie) = if config.combine_scattering_textures {
            let empty = TextureDescriptor::new_3d("empty_single_mie_scattering", 1, 1, 1, precision);
            (None, Some(backend.create_texture(&empty)))
        } else {
            let descriptor = scattering_descriptor("single_mie_scattering");
            (Some(backend.create_texture(&descriptor)), None)
        };

        Self {
            transmittance: backend.create_texture(&TextureDescriptor::new_2d(
                "transmittance",
                layout.transmittance_width,
                layout.transmittance_height,
                precision,
            )),
            scattering: backend.create_texture(&scattering_descriptor("scattering")),
            irradiance: backend.create_texture(&TextureDescriptor::new_2d(
                "irradiance",
                layout.irradiance_width,
                layout.irradiance_height,
                precision,
            )),
            single_mie,
            empty_single_mie,
        }
    }

    /// The texture to bind to the single Mie slot.
    pub fn single_mie_binding(&self) -> Option<&T> {
        self.single_mie.as_ref().or(self.empty_single_mie.as_ref())
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> {
        [&self.transmittance, &self.scattering, &self.irradiance]
            .into_iter()
            .chain(self.single_mie.iter())
            .chain(self.empty_single_mie.iter())
    }

    pub fn release<B>(&self, backend: &B)
    where
        B: PrecomputeBackend<Texture = T>,
    {
        for texture in self.iter() {
            backend.release_texture(texture);
        }
    }
}

/// Scratch textures, alive only during precomputation.
struct DeltaTextures<T> {
    irradiance: T,
    rayleigh_scattering: T,
    mie_scattering: T,
    multiple_scattering: T,
    scattering_density: T,
}

impl<T: Clone> DeltaTextures<T> {
    fn allocate<B>(backend: &B, config: &ScatteringConfig) -> Self
    where
        B: PrecomputeBackend<Texture = T>,
    {
        let layout = &config.layout;
        let precision = TexelPrecision::from_half_flag(config.half_precision);
        let scattering = |label| {
            backend.create_texture(&TextureDescriptor::new_3d(
                label,
                layout.scattering_width(),
                layout.scattering_height(),
                layout.scattering_depth(),
                precision,
            ))
        };
        Self {
            irradiance: backend.create_texture(&TextureDescriptor::new_2d(
                "delta_irradiance",
                layout.irradiance_width,
                layout.irradiance_height,
                precision,
            )),
            rayleigh_scattering: scattering("delta_rayleigh_scattering"),
            mie_scattering: scattering("delta_mie_scattering"),
            multiple_scattering: scattering("delta_multiple_scattering"),
            scattering_density: scattering("delta_scattering_density"),
        }
    }

    fn release<B>(&self, backend: &B)
    where
        B: PrecomputeBackend<Texture = T>,
    {
        for texture in [
            &self.irradiance,
            &self.rayleigh_scattering,
            &self.mie_scattering,
            &self.multiple_scattering,
            &self.scattering_density,
        ] {
            backend.release_texture(texture);
        }
    }
}

/// Three wavelengths processed together, and how their radiance is folded
/// into the stored values.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct WavelengthBatch {
    /// nm.
    pub lambdas: [f64; 3],
    pub luminance_from_radiance: Mat3,
    /// Accumulate into the textures written by earlier batches.
    pub blend: bool,
}

/// Batches needed for `config`: a single RGB batch, or in precomputed
/// luminance mode enough batches to cover the configured wavelength count,
/// spread uniformly over the visible range.
pub fn wavelength_batches(config: &ScatteringConfig) -> Vec<WavelengthBatch> {
    if !config.precomputes_luminance() {
        return vec![WavelengthBatch {
            lambdas: RGB_LAMBDAS,
            luminance_from_radiance: Mat3::IDENTITY,
            blend: false,
        }];
    }

    let iterations = config.num_precomputed_wavelengths.div_ceil(3);
    let delta_lambda = (LAMBDA_MAX - LAMBDA_MIN) / (3.0 * f64::from(iterations));
    (0..iterations)
        .map(|i| {
            let base = LAMBDA_MIN + 3.0 * f64::from(i) * delta_lambda;
            let lambdas = [0.5, 1.5, 2.5].map(|offset| base + offset * delta_lambda);
            // Column k converts radiance at lambdas[k] to linear sRGB.
            let column = |lambda: f64| {
                Vec3::new(
                    spectrum::srgb_coefficient(lambda, 0, delta_lambda) as f32,
                    spectrum::srgb_coefficient(lambda, 1, delta_lambda) as f32,
                    spectrum::srgb_coefficient(lambda, 2, delta_lambda) as f32,
                )
            };
            WavelengthBatch {
                lambdas,
                luminance_from_radiance: Mat3::from_cols(
                    column(lambdas[0]),
                    column(lambdas[1]),
                    column(lambdas[2]),
                ),
                blend: i > 0,
            }
        })
        .collect()
}

/// Runs the precompute passes of one model against a backend.
pub struct PrecomputeOrchestrator<'a, B: PrecomputeBackend> {
    backend: &'a B,
    config: &'a ScatteringConfig,
}

impl<'a, B: PrecomputeBackend> PrecomputeOrchestrator<'a, B> {
    pub fn new(backend: &'a B, config: &'a ScatteringConfig) -> Self {
        Self { backend, config }
    }

    /// Fill `textures` with `scattering_orders` orders of scattering and
    /// block until the backend has finished. Scratch textures are released
    /// before returning.
    pub fn run(&self, textures: &ModelTextures<B::Texture>, scattering_orders: u32) {
        let start = Instant::now();
        let deltas = DeltaTextures::allocate(self.backend, self.config);
        let batches = wavelength_batches(self.config);
        log::info!(
            "Precomputing {} scattering orders in {} wavelength batch(es)",
            scattering_orders,
            batches.len()
        );

        for batch in &batches {
            self.precompute_batch(textures, &deltas, batch, scattering_orders);
        }

        // Transmittance is always stored at the RGB wavelengths.
        if batches.len() > 1 {
            let atmosphere = AtmosphereUniform::from_config(self.config, RGB_LAMBDAS);
            self.submit(
                Pass::Transmittance {
                    transmittance: &textures.transmittance,
                },
                &atmosphere,
                Mat3::IDENTITY,
                0,
                false,
            );
        }

        self.backend.finish();
        deltas.release(self.backend);
        log::info!("Precomputation finished in {:.2?}", start.elapsed());
    }

    fn precompute_batch(
        &self,
        textures: &ModelTextures<B::Texture>,
        deltas: &DeltaTextures<B::Texture>,
        batch: &WavelengthBatch,
        scattering_orders: u32,
    ) {
        let atmosphere = AtmosphereUniform::from_config(self.config, batch.lambdas);
        let luminance = batch.luminance_from_radiance;
        log::debug!("Wavelength batch {:?} nm", batch.lambdas);

        self.submit(
            Pass::Transmittance {
                transmittance: &textures.transmittance,
            },
            &atmosphere,
            Mat3::IDENTITY,
            0,
            false,
        );
        self.submit(
            Pass::DirectIrradiance {
                transmittance: &textures.transmittance,
                delta_irradiance: &deltas.irradiance,
                irradiance: &textures.irradiance,
            },
            &atmosphere,
            luminance,
            0,
            batch.blend,
        );
        self.submit(
            Pass::SingleScattering {
                transmittance: &textures.transmittance,
                delta_rayleigh: &deltas.rayleigh_scattering,
                delta_mie: &deltas.mie_scattering,
                scattering: &textures.scattering,
                single_mie: textures.single_mie.as_ref(),
            },
            &atmosphere,
            luminance,
            1,
            batch.blend,
        );

        for order in 2..=scattering_orders {
            self.submit(
                Pass::ScatteringDensity {
                    transmittance: &textures.transmittance,
                    delta_rayleigh: &deltas.rayleigh_scattering,
                    delta_mie: &deltas.mie_scattering,
                    delta_multiple: &deltas.multiple_scattering,
                    delta_irradiance: &deltas.irradiance,
                    delta_density: &deltas.scattering_density,
                },
                &atmosphere,
                luminance,
                order,
                false,
            );
            self.submit(
                Pass::IndirectIrradiance {
                    delta_rayleigh: &deltas.rayleigh_scattering,
                    delta_mie: &deltas.mie_scattering,
                    delta_multiple: &deltas.multiple_scattering,
                    delta_irradiance: &deltas.irradiance,
                    irradiance: &textures.irradiance,
                },
                &atmosphere,
                luminance,
                order - 1,
                true,
            );
            self.submit(
                Pass::MultipleScattering {
                    transmittance: &textures.transmittance,
                    delta_density: &deltas.scattering_density,
                    delta_multiple: &deltas.multiple_scattering,
                    scattering: &textures.scattering,
                },
                &atmosphere,
                luminance,
                order,
                true,
            );
        }
    }

    /// Dispatch one pass over its first output, then fence it off from the
    /// passes reading it.
    fn submit(
        &self,
        pass: Pass<'_, B::Texture>,
        atmosphere: &AtmosphereUniform,
        luminance_from_radiance: Mat3,
        scattering_order: u32,
        blend: bool,
    ) {
        let layout = &self.config.layout;
        let extent = match &pass {
            Pass::Transmittance { .. } => TextureDescriptor::new_2d(
                "transmittance",
                layout.transmittance_width,
                layout.transmittance_height,
                TexelPrecision::Full,
            ),
            Pass::DirectIrradiance { .. } | Pass::IndirectIrradiance { .. } => {
                TextureDescriptor::new_2d(
                    "irradiance",
                    layout.irradiance_width,
                    layout.irradiance_height,
                    TexelPrecision::Full,
                )
            }
            Pass::SingleScattering { .. }
            | Pass::ScatteringDensity { .. }
            | Pass::MultipleScattering { .. } => TextureDescriptor::new_3d(
                "scattering",
                layout.scattering_width(),
                layout.scattering_height(),
                layout.scattering_depth(),
                TexelPrecision::Full,
            ),
        };

        let dispatch = Dispatch {
            workgroups: extent.workgroups(),
            pass,
            atmosphere,
            layout: self.config.layout,
            samples: self.config.samples,
            luminance_from_radiance,
            scattering_order,
            blend,
        };
        log::debug!(
            "Dispatching {} order {} with {:?} workgroups",
            dispatch.pass.kind().name(),
            scattering_order,
            dispatch.workgroups
        );
        self.backend.dispatch(&dispatch);
        self.backend.barrier();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::PassKind;
    use crate::config::{LuminanceMode, SampleCounts, TextureLayout};
    use crate::cpu::CpuBackend;

    fn compact_config() -> ScatteringConfig {
        ScatteringConfig {
            layout: TextureLayout::compact(),
            samples: SampleCounts::compact(),
            ..ScatteringConfig::default()
        }
    }

    fn scattering_energy(texels: &[[f32; 4]]) -> f64 {
        texels
            .iter()
            .map(|t| f64::from(t[0] + t[1] + t[2]))
            .sum()
    }

    #[test]
    fn test_rgb_batch_uses_identity() {
        let batches = wavelength_batches(&compact_config());
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].lambdas, RGB_LAMBDAS);
        assert_eq!(batches[0].luminance_from_radiance, Mat3::IDENTITY);
        assert!(!batches[0].blend);
    }

    #[test]
    fn test_precomputed_luminance_batches_cover_visible_range() {
        let config = ScatteringConfig {
            luminance: LuminanceMode::Precomputed,
            ..compact_config()
        };
        let batches = wavelength_batches(&config);
        assert_eq!(batches.len(), 5, "15 wavelengths, three per batch");
        assert!(!batches[0].blend);
        assert!(batches[1..].iter().all(|batch| batch.blend));
        let lambdas: Vec<f64> = batches.iter().flat_map(|b| b.lambdas).collect();
        assert!(lambdas.windows(2).all(|pair| pair[1] > pair[0]));
        assert!(lambdas[0] > LAMBDA_MIN && lambdas[14] < LAMBDA_MAX);
        // 360 + 0.5 * 470 / 15
        assert!((lambdas[0] - 375.666_666).abs() < 1e-3);
    }

    #[test]
    fn test_dispatch_order_and_barriers() {
        let backend = CpuBackend::new();
        let config = compact_config();
        let textures = ModelTextures::allocate(&backend, &config);
        PrecomputeOrchestrator::new(&backend, &config).run(&textures, 3);

        let kinds: Vec<(PassKind, u32)> = backend
            .dispatch_log()
            .iter()
            .map(|record| (record.kind, record.scattering_order))
            .collect();
        assert_eq!(
            kinds,
            vec![
                (PassKind::Transmittance, 0),
                (PassKind::DirectIrradiance, 0),
                (PassKind::SingleScattering, 1),
                (PassKind::ScatteringDensity, 2),
                (PassKind::IndirectIrradiance, 1),
                (PassKind::MultipleScattering, 2),
                (PassKind::ScatteringDensity, 3),
                (PassKind::IndirectIrradiance, 2),
                (PassKind::MultipleScattering, 3),
            ]
        );
        assert_eq!(
            backend.barrier_count(),
            kinds.len(),
            "every dispatch is fenced before the next one reads it"
        );
    }

    #[test]
    fn test_scratch_textures_are_released() {
        let backend = CpuBackend::new();
        let config = compact_config();
        let textures = ModelTextures::allocate(&backend, &config);
        assert_eq!(backend.live_texture_count(), 4);
        PrecomputeOrchestrator::new(&backend, &config).run(&textures, 2);
        assert_eq!(
            backend.live_texture_count(),
            4,
            "only transmittance, scattering, irradiance and the empty single mie remain"
        );
        textures.release(&backend);
        assert_eq!(backend.live_texture_count(), 0);
    }

    #[test]
    fn test_separate_single_mie_texture() {
        let backend = CpuBackend::new();
        let config = ScatteringConfig {
            combine_scattering_textures: false,
            ..compact_config()
        };
        let textures = ModelTextures::allocate(&backend, &config);
        assert!(textures.empty_single_mie.is_none());
        PrecomputeOrchestrator::new(&backend, &config).run(&textures, 1);

        let single_mie = textures.single_mie.as_ref().expect("separate single mie");
        let scattering = textures.scattering.read_texels().expect("scattering texels");
        let mie = single_mie.read_texels().expect("single mie texels");
        for (s, m) in scattering.iter().zip(&mie) {
            assert!(
                (s[3] - m[0]).abs() <= 1e-6 * m[0].abs().max(1.0),
                "scattering alpha holds single mie red"
            );
        }
        assert!(scattering_energy(&mie) > 0.0);
    }

    #[test]
    fn test_every_texel_is_non_negative() {
        let backend = CpuBackend::new();
        let config = compact_config();
        let textures = ModelTextures::allocate(&backend, &config);
        PrecomputeOrchestrator::new(&backend, &config).run(&textures, 4);

        for texture in textures.iter() {
            let texels = texture.read_texels().expect("texture alive");
            for texel in texels {
                assert!(
                    texel.iter().all(|c| c.is_finite() && *c >= 0.0),
                    "negative or non-finite texel {texel:?} in '{}'",
                    texture.descriptor().label
                );
            }
        }
    }

    #[test]
    fn test_each_order_adds_energy() {
        let config = compact_config();
        let mut previous = 0.0;
        let mut previous_irradiance = 0.0;
        for orders in 1..=6 {
            let backend = CpuBackend::new();
            let textures = ModelTextures::allocate(&backend, &config);
            PrecomputeOrchestrator::new(&backend, &config).run(&textures, orders);
            let energy =
                scattering_energy(&textures.scattering.read_texels().expect("scattering texels"));
            let irradiance =
                scattering_energy(&textures.irradiance.read_texels().expect("irradiance texels"));
            assert!(
                energy >= previous,
                "{orders} orders gave {energy}, fewer orders gave {previous}"
            );
            assert!(irradiance >= previous_irradiance);
            previous = energy;
            previous_irradiance = irradiance;
        }
        assert!(previous > 0.0);
    }

    #[test]
    fn test_half_precision_texels_are_representable() {
        let backend = CpuBackend::new();
        let config = ScatteringConfig {
            half_precision: true,
            ..compact_config()
        };
        let textures = ModelTextures::allocate(&backend, &config);
        PrecomputeOrchestrator::new(&backend, &config).run(&textures, 2);
        let texels = textures.scattering.read_texels().expect("scattering texels");
        for c in texels.iter().flatten() {
            assert_eq!(*c, half::f16::from_f32(*c).to_f32());
        }
    }

    #[test]
    fn test_precomputed_luminance_restores_rgb_transmittance() {
        let config = ScatteringConfig {
            luminance: LuminanceMode::Precomputed,
            ..compact_config()
        };
        let backend = CpuBackend::new();
        let textures = ModelTextures::allocate(&backend, &config);
        PrecomputeOrchestrator::new(&backend, &config).run(&textures, 2);
        let log = backend.dispatch_log();
        assert_eq!(
            log.last().map(|record| record.kind),
            Some(PassKind::Transmittance),
            "transmittance is recomputed at the RGB wavelengths last"
        );

        let rgb_backend = CpuBackend::new();
        let rgb_config = compact_config();
        let rgb = ModelTextures::allocate(&rgb_backend, &rgb_config);
        PrecomputeOrchestrator::new(&rgb_backend, &rgb_config).run(&rgb, 1);
        assert_eq!(
            textures.transmittance.read_texels(),
            rgb.transmittance.read_texels()
        );
    }
}
