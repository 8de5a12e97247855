//! Kernel parameters for one batch of three wavelengths, laid out for a WGSL
//! uniform buffer.

use bytemuck::{Pod, Zeroable};

use crate::config::ScatteringConfig;
use crate::density::{DensityProfile, DensityProfileLayer, MAX_DENSITY_LAYERS};

/// One density layer in length units. 32 bytes, so arrays of layers keep the
/// 16-byte stride uniform buffers require.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct DensityLayerUniform {
    /// (offset 0)
    pub width: f32,
    /// (offset 4)
    pub exp_term: f32,
    /// (offset 8)
    pub exp_scale: f32,
    /// (offset 12)
    pub linear_term: f32,
    /// (offset 16)
    pub constant_term: f32,
    /// Padding to 32 bytes. (offset 20)
    pub _pad: [f32; 3],
}

impl From<&DensityProfileLayer> for DensityLayerUniform {
    fn from(layer: &DensityProfileLayer) -> Self {
        Self {
            width: layer.width as f32,
            exp_term: layer.exp_term as f32,
            exp_scale: layer.exp_scale as f32,
            linear_term: layer.linear_term as f32,
            constant_term: layer.constant_term as f32,
            _pad: [0.0; 3],
        }
    }
}

/// GPU-side atmosphere parameters. Matches `AtmosphereParameters` in the
/// precompute shaders.
///
/// vec3<f32> has 16-byte alignment in WGSL, so every RGB triple is followed
/// by a scalar that fills the fourth lane.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct AtmosphereUniform {
    /// Solar irradiance at the top of the atmosphere. (offset 0)
    pub solar_irradiance: [f32; 3],
    /// Radians. (offset 12)
    pub sun_angular_radius: f32,
    /// Per length unit. (offset 16)
    pub rayleigh_scattering: [f32; 3],
    /// Length units. (offset 28)
    pub bottom_radius: f32,
    /// Per length unit. (offset 32)
    pub mie_scattering: [f32; 3],
    /// Length units. (offset 44)
    pub top_radius: f32,
    /// Per length unit. (offset 48)
    pub mie_extinction: [f32; 3],
    /// (offset 60)
    pub mie_phase_function_g: f32,
    /// Per length unit. (offset 64)
    pub absorption_extinction: [f32; 3],
    /// Cosine of the maximum sun zenith angle. (offset 76)
    pub mu_s_min: f32,
    /// (offset 80)
    pub ground_albedo: [f32; 3],
    /// Padding to align the density layers to 16 bytes. (offset 92)
    pub _pad0: f32,
    /// (offset 96)
    pub rayleigh_density: [DensityLayerUniform; MAX_DENSITY_LAYERS],
    /// (offset 160)
    pub mie_density: [DensityLayerUniform; MAX_DENSITY_LAYERS],
    /// (offset 224)
    pub absorption_density: [DensityLayerUniform; MAX_DENSITY_LAYERS],
}

static_assertions::assert_eq_size!(DensityLayerUniform, [u8; 32]);
static_assertions::assert_eq_size!(AtmosphereUniform, [u8; 288]);

fn kernel_profile(
    profile: &DensityProfile,
    length_unit: f64,
) -> [DensityLayerUniform; MAX_DENSITY_LAYERS] {
    profile
        .kernel_layers(length_unit)
        .map(|layer| DensityLayerUniform::from(&layer))
}

impl AtmosphereUniform {
    /// Sample `config` at `lambdas` (nm) and convert every length to the
    /// configured length unit.
    pub fn from_config(config: &ScatteringConfig, lambdas: [f64; 3]) -> Self {
        let spectrum = &config.spectrum;
        let unit = config.length_unit_in_meters;
        Self {
            solar_irradiance: spectrum.at(&spectrum.solar_irradiance, lambdas, 1.0),
            sun_angular_radius: config.sun_angular_radius as f32,
            rayleigh_scattering: spectrum.at(&spectrum.rayleigh_scattering, lambdas, unit),
            bottom_radius: (config.bottom_radius / unit) as f32,
            mie_scattering: spectrum.at(&spectrum.mie_scattering, lambdas, unit),
            top_radius: (config.top_radius / unit) as f32,
            mie_extinction: spectrum.at(&spectrum.mie_extinction, lambdas, unit),
            mie_phase_function_g: config.mie_phase_function_g as f32,
            absorption_extinction: spectrum.at(&spectrum.absorption_extinction, lambdas, unit),
            mu_s_min: config.mu_s_min() as f32,
            ground_albedo: spectrum.at(&spectrum.ground_albedo, lambdas, 1.0),
            _pad0: 0.0,
            rayleigh_density: kernel_profile(&config.rayleigh_density, unit),
            mie_density: kernel_profile(&config.mie_density, unit),
            absorption_density: kernel_profile(&config.absorption_density, unit),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spectrum::RGB_LAMBDAS;

    #[test]
    fn test_uniform_alignment() {
        assert_eq!(std::mem::size_of::<AtmosphereUniform>() % 16, 0);
        assert_eq!(std::mem::offset_of!(AtmosphereUniform, rayleigh_density), 96);
        assert_eq!(std::mem::offset_of!(AtmosphereUniform, absorption_density), 224);
    }

    #[test]
    fn test_from_config_scales_to_length_unit() {
        let config = ScatteringConfig::default();
        let uniform = AtmosphereUniform::from_config(&config, RGB_LAMBDAS);
        assert!((uniform.bottom_radius - 63.6).abs() < 1e-4);
        assert!((uniform.top_radius - 64.2).abs() < 1e-4);
        // 5.802e-6 m^-1 at 680 nm, times 1e5 m per unit.
        assert!((uniform.rayleigh_scattering[0] - 0.5802).abs() < 1e-3);
        assert!(uniform.rayleigh_scattering[2] > uniform.rayleigh_scattering[0]);
        assert!((uniform.mu_s_min + 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_single_layer_profiles_are_padded_in_front() {
        let config = ScatteringConfig::default();
        let uniform = AtmosphereUniform::from_config(&config, RGB_LAMBDAS);
        assert_eq!(uniform.rayleigh_density[0], DensityLayerUniform::default());
        assert_eq!(uniform.rayleigh_density[1].exp_term, 1.0);
        assert!((uniform.rayleigh_density[1].exp_scale + 12.5).abs() < 1e-4);
        assert!((uniform.absorption_density[0].width - 0.25).abs() < 1e-6);
    }
}
