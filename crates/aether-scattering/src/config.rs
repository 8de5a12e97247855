//! Precomputation parameters, fixed once a model is initialized.

use crate::density::DensityProfile;
use crate::error::ScatteringError;
use crate::reference::ReferenceAtmosphere;
use crate::spectrum::SpectralSamples;

/// What the precomputed textures store.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum LuminanceMode {
    /// Radiance at the three RGB wavelengths.
    #[default]
    None,
    /// Radiance at the RGB wavelengths, converted to luminance at render
    /// time with fixed per-channel factors.
    Approximate,
    /// Luminance integrated over many wavelengths during precomputation.
    Precomputed,
}

/// Resolution of every lookup texture.
///
/// The scattering textures are 4D tables packed into 3D textures of extent
/// `nu * mu_s` x `mu` x `r`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TextureLayout {
    pub transmittance_width: u32,
    pub transmittance_height: u32,
    pub scattering_r: u32,
    pub scattering_mu: u32,
    pub scattering_mu_s: u32,
    pub scattering_nu: u32,
    pub irradiance_width: u32,
    pub irradiance_height: u32,
}

impl Default for TextureLayout {
    fn default() -> Self {
        Self {
            transmittance_width: 256,
            transmittance_height: 64,
            scattering_r: 32,
            scattering_mu: 128,
            scattering_mu_s: 32,
            scattering_nu: 8,
            irradiance_width: 64,
            irradiance_height: 16,
        }
    }
}

impl TextureLayout {
    /// Small tables, fast enough for the CPU backend in tests and previews.
    pub fn compact() -> Self {
        Self {
            transmittance_width: 32,
            transmittance_height: 16,
            scattering_r: 4,
            scattering_mu: 8,
            scattering_mu_s: 4,
            scattering_nu: 4,
            irradiance_width: 8,
            irradiance_height: 4,
        }
    }

    pub fn scattering_width(&self) -> u32 {
        self.scattering_nu * self.scattering_mu_s
    }

    pub fn scattering_height(&self) -> u32 {
        self.scattering_mu
    }

    pub fn scattering_depth(&self) -> u32 {
        self.scattering_r
    }

    pub fn validate(&self) -> Result<(), ScatteringError> {
        let extents = [
            ("transmittance width", self.transmittance_width),
            ("transmittance height", self.transmittance_height),
            ("scattering r", self.scattering_r),
            ("scattering mu", self.scattering_mu),
            ("scattering mu_s", self.scattering_mu_s),
            ("scattering nu", self.scattering_nu),
            ("irradiance width", self.irradiance_width),
            ("irradiance height", self.irradiance_height),
        ];
        for (name, extent) in extents {
            if extent < 2 {
                return Err(ScatteringError::invalid(format!(
                    "{name} must be at least 2, got {extent}"
                )));
            }
        }
        // The mu axis is split into a ground half and a sky half.
        if self.scattering_mu % 2 != 0 {
            return Err(ScatteringError::invalid(format!(
                "scattering mu must be even, got {}",
                self.scattering_mu
            )));
        }
        Ok(())
    }
}

/// Quadrature sample counts of the precompute kernels.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SampleCounts {
    /// Intervals along a ray to the top of the atmosphere.
    pub transmittance: u32,
    /// Intervals along a view ray for single scattering.
    pub single_scattering: u32,
    /// Polar steps over the sphere; azimuth uses twice as many.
    pub scattering_density: u32,
    /// Half the polar steps and a quarter of the azimuth steps over the
    /// upper hemisphere.
    pub indirect_irradiance: u32,
    /// Intervals along a view ray for multiple scattering.
    pub multiple_scattering: u32,
}

impl Default for SampleCounts {
    fn default() -> Self {
        Self {
            transmittance: 500,
            single_scattering: 50,
            scattering_density: 16,
            indirect_irradiance: 32,
            multiple_scattering: 50,
        }
    }
}

impl SampleCounts {
    pub fn compact() -> Self {
        Self {
            transmittance: 64,
            single_scattering: 12,
            scattering_density: 4,
            indirect_irradiance: 4,
            multiple_scattering: 12,
        }
    }

    pub fn validate(&self) -> Result<(), ScatteringError> {
        let counts = [
            ("transmittance", self.transmittance),
            ("single scattering", self.single_scattering),
            ("scattering density", self.scattering_density),
            ("multiple scattering", self.multiple_scattering),
        ];
        for (name, count) in counts {
            if count < 1 {
                return Err(ScatteringError::invalid(format!(
                    "{name} sample count must be at least 1"
                )));
            }
        }
        if self.indirect_irradiance < 2 {
            return Err(ScatteringError::invalid(
                "indirect irradiance sample count must be at least 2",
            ));
        }
        Ok(())
    }
}

/// Everything a [`ScatteringModel`](crate::ScatteringModel) needs to
/// precompute its textures. Lengths are in meters.
#[derive(Clone, Debug, PartialEq)]
pub struct ScatteringConfig {
    pub spectrum: SpectralSamples,
    /// Radians.
    pub sun_angular_radius: f64,
    pub bottom_radius: f64,
    pub top_radius: f64,
    pub rayleigh_density: DensityProfile,
    pub mie_density: DensityProfile,
    pub absorption_density: DensityProfile,
    pub mie_phase_function_g: f64,
    /// Radians. Sun directions further from the zenith are not precomputed.
    pub max_sun_zenith_angle: f64,
    /// Meters per engine length unit. Every length and coefficient handed to
    /// the kernels and to the material is expressed in this unit.
    pub length_unit_in_meters: f64,
    /// Wavelengths integrated in [`LuminanceMode::Precomputed`].
    pub num_precomputed_wavelengths: u32,
    /// Store single Mie scattering in the alpha channel of the scattering
    /// texture instead of a texture of its own.
    pub combine_scattering_textures: bool,
    pub half_precision: bool,
    pub luminance: LuminanceMode,
    pub layout: TextureLayout,
    pub samples: SampleCounts,
}

impl Default for ScatteringConfig {
    fn default() -> Self {
        ReferenceAtmosphere::earth().scattering_config()
    }
}

impl ScatteringConfig {
    pub const DEFAULT_PRECOMPUTED_WAVELENGTHS: u32 = 15;

    /// Luminance is integrated over more wavelengths than one RGB batch. With
    /// three or fewer precomputed wavelengths the textures hold RGB radiance
    /// and the model behaves as [`LuminanceMode::Approximate`].
    pub fn precomputes_luminance(&self) -> bool {
        self.luminance == LuminanceMode::Precomputed && self.num_precomputed_wavelengths > 3
    }

    /// Cosine of the maximum sun zenith angle.
    pub fn mu_s_min(&self) -> f64 {
        self.max_sun_zenith_angle.cos()
    }

    /// Check every parameter before any texture is allocated.
    pub fn validate(&self, scattering_orders: u32) -> Result<(), ScatteringError> {
        self.spectrum.validate()?;

        if !(self.bottom_radius.is_finite() && self.bottom_radius > 0.0) {
            return Err(ScatteringError::invalid(format!(
                "bottom radius must be positive, got {}",
                self.bottom_radius
            )));
        }
        if !(self.top_radius.is_finite() && self.top_radius > self.bottom_radius) {
            return Err(ScatteringError::invalid(format!(
                "top radius {} must be greater than bottom radius {}",
                self.top_radius, self.bottom_radius
            )));
        }
        if !(self.length_unit_in_meters.is_finite() && self.length_unit_in_meters > 0.0) {
            return Err(ScatteringError::invalid(format!(
                "length unit must be positive, got {}",
                self.length_unit_in_meters
            )));
        }
        if !(0.0..std::f64::consts::FRAC_PI_2).contains(&self.sun_angular_radius) {
            return Err(ScatteringError::invalid(format!(
                "sun angular radius {} is outside [0, pi/2)",
                self.sun_angular_radius
            )));
        }
        if !(self.mie_phase_function_g > -1.0 && self.mie_phase_function_g < 1.0) {
            return Err(ScatteringError::invalid(format!(
                "mie phase function g must be in (-1, 1), got {}",
                self.mie_phase_function_g
            )));
        }
        if !(self.max_sun_zenith_angle > 0.0
            && self.max_sun_zenith_angle <= std::f64::consts::PI)
        {
            return Err(ScatteringError::invalid(format!(
                "max sun zenith angle {} is outside (0, pi]",
                self.max_sun_zenith_angle
            )));
        }
        if self.luminance == LuminanceMode::Precomputed && self.num_precomputed_wavelengths == 0 {
            return Err(ScatteringError::invalid(
                "precomputed luminance needs at least one wavelength",
            ));
        }
        if scattering_orders < 1 {
            return Err(ScatteringError::invalid(
                "scattering order count must be at least 1",
            ));
        }

        self.rayleigh_density.validate("rayleigh")?;
        self.mie_density.validate("mie")?;
        self.absorption_density.validate("absorption")?;
        self.layout.validate()?;
        self.samples.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::density::DensityProfileLayer;

    fn compact_config() -> ScatteringConfig {
        ScatteringConfig {
            layout: TextureLayout::compact(),
            samples: SampleCounts::compact(),
            ..ScatteringConfig::default()
        }
    }

    #[test]
    fn test_default_layout_extents() {
        let layout = TextureLayout::default();
        assert_eq!(layout.scattering_width(), 256);
        assert_eq!(layout.scattering_height(), 128);
        assert_eq!(layout.scattering_depth(), 32);
        assert!(layout.validate().is_ok());
        assert!(TextureLayout::compact().validate().is_ok());
    }

    #[test]
    fn test_layout_rejects_odd_mu_and_tiny_extents() {
        let odd = TextureLayout {
            scattering_mu: 7,
            ..TextureLayout::compact()
        };
        assert!(odd.validate().is_err(), "odd mu cannot be split in halves");
        let tiny = TextureLayout {
            irradiance_height: 1,
            ..TextureLayout::compact()
        };
        assert!(tiny.validate().is_err());
    }

    #[test]
    fn test_sample_counts_validation() {
        assert!(SampleCounts::default().validate().is_ok());
        let zero = SampleCounts {
            transmittance: 0,
            ..SampleCounts::default()
        };
        assert!(zero.validate().is_err());
        let hemisphere = SampleCounts {
            indirect_irradiance: 1,
            ..SampleCounts::default()
        };
        assert!(hemisphere.validate().is_err());
    }

    #[test]
    fn test_radii_must_be_ordered() {
        let mut config = compact_config();
        config.top_radius = config.bottom_radius;
        assert!(matches!(
            config.validate(4),
            Err(ScatteringError::InvalidConfiguration(_))
        ));
        config.bottom_radius = -1.0;
        assert!(config.validate(4).is_err());
    }

    #[test]
    fn test_empty_spectrum_is_rejected() {
        let mut config = compact_config();
        config.spectrum = SpectralSamples::default();
        assert!(config.validate(4).is_err());
    }

    #[test]
    fn test_empty_profile_is_rejected() {
        let mut config = compact_config();
        config.mie_density = DensityProfile::new(Vec::new());
        assert!(config.validate(4).is_err());
        config.mie_density = DensityProfile::single(DensityProfileLayer::exponential(1200.0));
        assert!(config.validate(4).is_ok());
    }

    #[test]
    fn test_zero_orders_and_bad_g_are_rejected() {
        let config = compact_config();
        assert!(config.validate(0).is_err());
        let forward = ScatteringConfig {
            mie_phase_function_g: 1.0,
            ..compact_config()
        };
        assert!(forward.validate(4).is_err());
    }

    #[test]
    fn test_spectral_luminance_needs_more_than_three_wavelengths() {
        let mut config = compact_config();
        assert!(!config.precomputes_luminance());
        config.luminance = LuminanceMode::Precomputed;
        assert!(config.precomputes_luminance(), "15 wavelengths by default");
        config.num_precomputed_wavelengths = 3;
        assert!(!config.precomputes_luminance());
    }

    #[test]
    fn test_mu_s_min_is_cosine_of_max_zenith() {
        let config = compact_config();
        assert!((config.mu_s_min() - (-0.5)).abs() < 1e-12);
    }
}
