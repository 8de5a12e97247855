//! Reference atmosphere: measured solar spectrum, ozone cross sections and
//! Earth-like Rayleigh/Mie constants, turned into a [`ScatteringConfig`].

use std::f64::consts::PI;

use glam::Vec3;

use crate::config::{LuminanceMode, SampleCounts, ScatteringConfig, TextureLayout};
use crate::density::{DensityProfile, DensityProfileLayer};
use crate::spectrum::{self, SpectralSamples};

/// First sampled wavelength, nm.
pub const REFERENCE_LAMBDA_MIN: u32 = 360;
/// Last sampled wavelength, nm.
pub const REFERENCE_LAMBDA_MAX: u32 = 830;
/// Sampling step, nm.
pub const REFERENCE_LAMBDA_STEP: u32 = 10;

/// ASTM G-173 extraterrestrial solar irradiance averaged over 10 nm bins
/// starting at 360 nm, W m^-2 nm^-1.
pub const SOLAR_IRRADIANCE: [f64; 48] = [
    1.11776, 1.14259, 1.01249, 1.14716, 1.72765, 1.73054, 1.6887, 1.61253, 1.91198, 2.03474,
    2.02042, 2.02212, 1.93377, 1.95809, 1.91686, 1.8298, 1.8685, 1.8931, 1.85149, 1.8504, 1.8341,
    1.8345, 1.8147, 1.78158, 1.7533, 1.6965, 1.68194, 1.64654, 1.6048, 1.52143, 1.55622, 1.5113,
    1.474, 1.4482, 1.41018, 1.36775, 1.34188, 1.31429, 1.28303, 1.26758, 1.2367, 1.2082, 1.18737,
    1.14683, 1.12362, 1.1058, 1.07124, 1.04992,
];

/// Ozone absorption cross section at 233 K averaged over 10 nm bins starting
/// at 360 nm, m^2.
pub const OZONE_CROSS_SECTION: [f64; 48] = [
    1.18e-27, 2.182e-28, 2.818e-28, 6.636e-28, 1.527e-27, 2.763e-27, 5.52e-27, 8.451e-27,
    1.582e-26, 2.316e-26, 3.669e-26, 4.924e-26, 7.752e-26, 9.016e-26, 1.48e-25, 1.602e-25,
    2.139e-25, 2.755e-25, 3.091e-25, 3.5e-25, 4.266e-25, 4.672e-25, 4.398e-25, 4.701e-25,
    5.019e-25, 4.305e-25, 3.74e-25, 3.215e-25, 2.662e-25, 2.238e-25, 1.852e-25, 1.473e-25,
    1.209e-25, 9.423e-26, 7.455e-26, 6.566e-26, 5.105e-26, 4.15e-26, 4.228e-26, 3.237e-26,
    2.451e-26, 2.801e-26, 2.534e-26, 1.624e-26, 1.465e-26, 2.078e-26, 1.383e-26, 7.105e-27,
];

/// Molecules per m^2 in one Dobson unit.
pub const DOBSON_UNIT: f64 = 2.687e20;
/// Peak ozone number density giving 300 DU over the 15 km equivalent
/// thickness of the ozone profile, m^-3.
pub const MAX_OZONE_NUMBER_DENSITY: f64 = 300.0 * DOBSON_UNIT / 15000.0;
/// Flat solar spectrum used when the measured one is disabled, W m^-2 nm^-1.
pub const CONSTANT_SOLAR_IRRADIANCE: f64 = 1.5;

/// Physical constants of a planet's atmosphere, before sampling.
#[derive(Clone, Debug, PartialEq)]
pub struct ReferenceAtmosphere {
    /// Planet radius in meters.
    pub bottom_radius: f64,
    /// Top of the atmosphere in meters from the planet center.
    pub top_radius: f64,
    /// Meters per engine length unit.
    pub length_unit_in_meters: f64,
    /// Radians.
    pub sun_angular_radius: f64,
    /// m^-1 um^4.
    pub rayleigh: f64,
    pub rayleigh_scale_height: f64,
    pub mie_scale_height: f64,
    pub mie_angstrom_alpha: f64,
    pub mie_angstrom_beta: f64,
    pub mie_single_scattering_albedo: f64,
    pub mie_phase_function_g: f64,
    pub ground_albedo: f64,
    pub use_ozone: bool,
    pub use_constant_solar_spectrum: bool,
    pub half_precision: bool,
    pub combine_scattering_textures: bool,
    pub luminance: LuminanceMode,
    /// Initial world-space planet center, if the preset has one.
    pub planet_center: Option<Vec3>,
    /// Initial direction towards the sun.
    pub sun_direction: Vec3,
}

impl Default for ReferenceAtmosphere {
    fn default() -> Self {
        Self::earth()
    }
}

impl ReferenceAtmosphere {
    /// Earth at real scale, 100 km length unit.
    pub fn earth() -> Self {
        Self {
            bottom_radius: 6_360_000.0,
            top_radius: 6_420_000.0,
            length_unit_in_meters: 100_000.0,
            sun_angular_radius: 0.00935 / 2.0,
            rayleigh: 1.24062e-6,
            rayleigh_scale_height: 8000.0,
            mie_scale_height: 1200.0,
            mie_angstrom_alpha: 0.0,
            mie_angstrom_beta: 5.328e-3,
            mie_single_scattering_albedo: 0.9,
            mie_phase_function_g: 0.8,
            ground_albedo: 0.1,
            use_ozone: true,
            use_constant_solar_spectrum: false,
            half_precision: false,
            combine_scattering_textures: true,
            luminance: LuminanceMode::None,
            planet_center: None,
            sun_direction: Vec3::Y,
        }
    }

    /// Small test planet: 600 km radius, 70 km of atmosphere with scale
    /// heights shrunk to 80 %, meter length unit scaled by 100.
    pub fn test_planet() -> Self {
        Self {
            bottom_radius: 600_000.0,
            top_radius: 670_000.0,
            length_unit_in_meters: 100.0,
            rayleigh_scale_height: 8000.0 * 0.8,
            mie_scale_height: 1200.0 * 0.8,
            planet_center: Some(Vec3::new(0.0, 0.0, 7005.0)),
            sun_direction: Vec3::NEG_Z,
            ..Self::earth()
        }
    }

    /// Largest sun zenith angle kept in the scattering texture. Half precision
    /// cannot represent the very dim values past 102 degrees.
    pub fn max_sun_zenith_angle(&self) -> f64 {
        let degrees = if self.half_precision { 102.0 } else { 120.0 };
        degrees / 180.0 * PI
    }

    pub fn rayleigh_density(&self) -> DensityProfile {
        DensityProfile::single(DensityProfileLayer::exponential(self.rayleigh_scale_height))
    }

    pub fn mie_density(&self) -> DensityProfile {
        DensityProfile::single(DensityProfileLayer::exponential(self.mie_scale_height))
    }

    /// Ozone: linear increase from 10 km to a peak at 25 km, then linear
    /// decrease to zero at 40 km.
    pub fn absorption_density(&self) -> DensityProfile {
        DensityProfile::new(vec![
            DensityProfileLayer::linear(25000.0, 1.0 / 15000.0, -2.0 / 3.0),
            DensityProfileLayer::linear(0.0, -1.0 / 15000.0, 8.0 / 3.0),
        ])
    }

    /// Sample every constant at 360..=830 nm every 10 nm.
    pub fn spectral_samples(&self) -> SpectralSamples {
        let mut samples = SpectralSamples::default();
        for (index, lambda) in (REFERENCE_LAMBDA_MIN..=REFERENCE_LAMBDA_MAX)
            .step_by(REFERENCE_LAMBDA_STEP as usize)
            .enumerate()
        {
            let lambda = f64::from(lambda);
            samples.wavelengths.push(lambda);
            samples.solar_irradiance.push(if self.use_constant_solar_spectrum {
                CONSTANT_SOLAR_IRRADIANCE
            } else {
                SOLAR_IRRADIANCE[index]
            });
            samples
                .rayleigh_scattering
                .push(spectrum::rayleigh_scattering(self.rayleigh, lambda));
            samples.mie_scattering.push(spectrum::mie_scattering(
                self.mie_angstrom_beta,
                self.mie_angstrom_alpha,
                self.mie_scale_height,
                self.mie_single_scattering_albedo,
                lambda,
            ));
            samples.mie_extinction.push(spectrum::mie_extinction(
                self.mie_angstrom_beta,
                self.mie_angstrom_alpha,
                self.mie_scale_height,
                lambda,
            ));
            samples.absorption_extinction.push(if self.use_ozone {
                MAX_OZONE_NUMBER_DENSITY * OZONE_CROSS_SECTION[index]
            } else {
                0.0
            });
            samples.ground_albedo.push(self.ground_albedo);
        }
        samples
    }

    /// Full model configuration with the default texture resolution.
    pub fn scattering_config(&self) -> ScatteringConfig {
        ScatteringConfig {
            spectrum: self.spectral_samples(),
            sun_angular_radius: self.sun_angular_radius,
            bottom_radius: self.bottom_radius,
            top_radius: self.top_radius,
            rayleigh_density: self.rayleigh_density(),
            mie_density: self.mie_density(),
            absorption_density: self.absorption_density(),
            mie_phase_function_g: self.mie_phase_function_g,
            max_sun_zenith_angle: self.max_sun_zenith_angle(),
            length_unit_in_meters: self.length_unit_in_meters,
            num_precomputed_wavelengths: ScatteringConfig::DEFAULT_PRECOMPUTED_WAVELENGTHS,
            combine_scattering_textures: self.combine_scattering_textures,
            half_precision: self.half_precision,
            luminance: self.luminance,
            layout: TextureLayout::default(),
            samples: SampleCounts::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reference_spectrum_has_48_samples() {
        let samples = ReferenceAtmosphere::earth().spectral_samples();
        assert_eq!(samples.len(), 48);
        assert_eq!(samples.wavelengths.first(), Some(&360.0));
        assert_eq!(samples.wavelengths.last(), Some(&830.0));
        assert!(samples.validate().is_ok());
    }

    #[test]
    fn test_constant_solar_spectrum_and_ozone_toggles() {
        let mut reference = ReferenceAtmosphere::earth();
        reference.use_constant_solar_spectrum = true;
        reference.use_ozone = false;
        let samples = reference.spectral_samples();
        assert!(samples.solar_irradiance.iter().all(|v| *v == CONSTANT_SOLAR_IRRADIANCE));
        assert!(samples.absorption_extinction.iter().all(|v| *v == 0.0));
    }

    #[test]
    fn test_ozone_peak_density_matches_300_dobson_units() {
        assert!((MAX_OZONE_NUMBER_DENSITY - 5.374e18).abs() < 1e15);
        let samples = ReferenceAtmosphere::earth().spectral_samples();
        // Chappuis band peaks around 600 nm.
        let peak = samples
            .absorption_extinction
            .iter()
            .cloned()
            .fold(0.0_f64, f64::max);
        assert_eq!(peak, MAX_OZONE_NUMBER_DENSITY * 5.019e-25);
    }

    #[test]
    fn test_max_sun_zenith_depends_on_precision() {
        let mut reference = ReferenceAtmosphere::earth();
        assert!((reference.max_sun_zenith_angle().to_degrees() - 120.0).abs() < 1e-9);
        reference.half_precision = true;
        assert!((reference.max_sun_zenith_angle().to_degrees() - 102.0).abs() < 1e-9);
    }

    #[test]
    fn test_test_planet_preset() {
        let planet = ReferenceAtmosphere::test_planet();
        assert_eq!(planet.bottom_radius, 600_000.0);
        assert_eq!(planet.top_radius, 670_000.0);
        assert_eq!(planet.length_unit_in_meters, 100.0);
        assert!((planet.rayleigh_scale_height - 6400.0).abs() < 1e-9);
        assert_eq!(planet.planet_center, Some(Vec3::new(0.0, 0.0, 7005.0)));
        assert!(planet.scattering_config().validate(1).is_ok());
    }

    #[test]
    fn test_earth_config_is_valid() {
        let config = ReferenceAtmosphere::earth().scattering_config();
        assert!(config.validate(6).is_ok());
        assert!(config.combine_scattering_textures);
        assert_eq!(config.luminance, LuminanceMode::None);
    }
}
