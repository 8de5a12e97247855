//! Configuration structs with presets, defaults and RON persistence.

use std::path::{Path, PathBuf};

use aether_scattering::{
    EffectParameters, LuminanceMode, ReferenceAtmosphere, SampleCounts, ScatteringConfig,
    TextureLayout,
};
use glam::Vec3;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Top-level bake configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Physical description of the planet and its atmosphere.
    pub atmosphere: AtmosphereConfig,
    /// Precompute quality settings.
    pub precompute: PrecomputeConfig,
    /// Render-time exposure and white balance.
    pub effect: EffectConfig,
    /// What the bake writes and where.
    pub output: OutputConfig,
    /// Debug/development settings.
    pub debug: DebugConfig,
}

/// The two calibrations the constants are known to work with.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, clap::ValueEnum)]
pub enum AtmospherePreset {
    /// Earth at real scale.
    #[default]
    Earth,
    /// 600 km planet used by the test scene.
    TestPlanet,
}

impl AtmospherePreset {
    pub fn reference(self) -> ReferenceAtmosphere {
        match self {
            AtmospherePreset::Earth => ReferenceAtmosphere::earth(),
            AtmospherePreset::TestPlanet => ReferenceAtmosphere::test_planet(),
        }
    }
}

/// Planet radii, length unit and the constants the spectra are built from.
/// Lengths are meters.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AtmosphereConfig {
    /// Preset the values below were taken from.
    pub preset: AtmospherePreset,
    pub bottom_radius_m: f64,
    pub top_radius_m: f64,
    /// Meters per engine length unit.
    pub length_unit_m: f64,
    /// Radians.
    pub sun_angular_radius: f64,
    /// Rayleigh scattering constant, m^-1 um^4.
    pub rayleigh: f64,
    pub rayleigh_scale_height_m: f64,
    pub mie_scale_height_m: f64,
    pub mie_angstrom_alpha: f64,
    pub mie_angstrom_beta: f64,
    pub mie_single_scattering_albedo: f64,
    pub mie_phase_function_g: f64,
    pub ground_albedo: f64,
    pub use_ozone: bool,
    pub use_constant_solar_spectrum: bool,
    /// World-space planet center in length units. `None` puts the origin on
    /// the ground.
    pub planet_center: Option<[f32; 3]>,
    /// Direction towards the sun.
    pub sun_direction: [f32; 3],
}

impl AtmosphereConfig {
    pub fn from_preset(preset: AtmospherePreset) -> Self {
        let reference = preset.reference();
        Self {
            preset,
            bottom_radius_m: reference.bottom_radius,
            top_radius_m: reference.top_radius,
            length_unit_m: reference.length_unit_in_meters,
            sun_angular_radius: reference.sun_angular_radius,
            rayleigh: reference.rayleigh,
            rayleigh_scale_height_m: reference.rayleigh_scale_height,
            mie_scale_height_m: reference.mie_scale_height,
            mie_angstrom_alpha: reference.mie_angstrom_alpha,
            mie_angstrom_beta: reference.mie_angstrom_beta,
            mie_single_scattering_albedo: reference.mie_single_scattering_albedo,
            mie_phase_function_g: reference.mie_phase_function_g,
            ground_albedo: reference.ground_albedo,
            use_ozone: reference.use_ozone,
            use_constant_solar_spectrum: reference.use_constant_solar_spectrum,
            planet_center: reference.planet_center.map(|center| center.to_array()),
            sun_direction: reference.sun_direction.to_array(),
        }
    }
}

impl Default for AtmosphereConfig {
    fn default() -> Self {
        Self::from_preset(AtmospherePreset::Earth)
    }
}

/// Serializable mirror of [`LuminanceMode`].
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, clap::ValueEnum)]
pub enum LuminanceSetting {
    #[default]
    None,
    Approximate,
    Precomputed,
}

impl From<LuminanceSetting> for LuminanceMode {
    fn from(setting: LuminanceSetting) -> Self {
        match setting {
            LuminanceSetting::None => LuminanceMode::None,
            LuminanceSetting::Approximate => LuminanceMode::Approximate,
            LuminanceSetting::Precomputed => LuminanceMode::Precomputed,
        }
    }
}

/// Texture sizes and sample counts.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, clap::ValueEnum)]
pub enum Resolution {
    /// 256x64 transmittance, 256x128x32 scattering, 64x16 irradiance.
    #[default]
    Full,
    /// Small tables, fast enough for the CPU backend.
    Compact,
}

impl Resolution {
    pub fn layout(self) -> TextureLayout {
        match self {
            Resolution::Full => TextureLayout::default(),
            Resolution::Compact => TextureLayout::compact(),
        }
    }

    pub fn samples(self) -> SampleCounts {
        match self {
            Resolution::Full => SampleCounts::default(),
            Resolution::Compact => SampleCounts::compact(),
        }
    }
}

/// Precompute settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PrecomputeConfig {
    /// Number of scattering orders, at least 1.
    pub scattering_orders: u32,
    pub luminance: LuminanceSetting,
    /// Wavelengths integrated when luminance is precomputed.
    pub precomputed_wavelengths: u32,
    pub half_precision: bool,
    /// Store single Mie scattering in the scattering texture's alpha.
    pub combine_scattering_textures: bool,
    pub resolution: Resolution,
}

impl Default for PrecomputeConfig {
    fn default() -> Self {
        Self {
            scattering_orders: 4,
            luminance: LuminanceSetting::None,
            precomputed_wavelengths: ScatteringConfig::DEFAULT_PRECOMPUTED_WAVELENGTHS,
            half_precision: false,
            combine_scattering_textures: true,
            resolution: Resolution::Full,
        }
    }
}

/// Render-time effect settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EffectConfig {
    pub exposure: f32,
    pub white_balance: bool,
}

impl Default for EffectConfig {
    fn default() -> Self {
        let defaults = EffectParameters::default();
        Self {
            exposure: defaults.exposure,
            white_balance: defaults.do_white_balance,
        }
    }
}

impl EffectConfig {
    pub fn parameters(&self) -> EffectParameters {
        EffectParameters {
            exposure: self.exposure,
            do_white_balance: self.white_balance,
        }
    }
}

/// Bake output settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct OutputConfig {
    /// Directory the PNG files are written to.
    pub directory: PathBuf,
    /// Write tone-mapped slices of every lookup texture.
    pub dump_luts: bool,
    /// Render the sky from the ground and write it as `sky.png`.
    pub sky_preview: bool,
    pub preview_width: u32,
    pub preview_height: u32,
    /// Camera height above the ground in meters.
    pub preview_altitude_m: f64,
    /// Vertical field of view in degrees.
    pub preview_fov_degrees: f32,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("aether-out"),
            dump_luts: true,
            sky_preview: true,
            preview_width: 640,
            preview_height: 360,
            preview_altitude_m: 1000.0,
            preview_fov_degrees: 60.0,
        }
    }
}

/// Debug/development configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DebugConfig {
    /// Log level override (e.g., "debug", "info", "warn").
    pub log_level: String,
    /// Precompute on the CPU even when a GPU is available.
    pub force_cpu: bool,
}

impl Default for DebugConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            force_cpu: false,
        }
    }
}

/// Platform config directory for the bake tool, e.g. `~/.config/aether`.
pub fn default_config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("aether")
}

// --- Conversion into model parameters ---

impl Config {
    /// The atmosphere as physical constants, with this config's precision,
    /// texture mode and luminance mode.
    pub fn reference_atmosphere(&self) -> ReferenceAtmosphere {
        let atmosphere = &self.atmosphere;
        let precompute = &self.precompute;
        ReferenceAtmosphere {
            bottom_radius: atmosphere.bottom_radius_m,
            top_radius: atmosphere.top_radius_m,
            length_unit_in_meters: atmosphere.length_unit_m,
            sun_angular_radius: atmosphere.sun_angular_radius,
            rayleigh: atmosphere.rayleigh,
            rayleigh_scale_height: atmosphere.rayleigh_scale_height_m,
            mie_scale_height: atmosphere.mie_scale_height_m,
            mie_angstrom_alpha: atmosphere.mie_angstrom_alpha,
            mie_angstrom_beta: atmosphere.mie_angstrom_beta,
            mie_single_scattering_albedo: atmosphere.mie_single_scattering_albedo,
            mie_phase_function_g: atmosphere.mie_phase_function_g,
            ground_albedo: atmosphere.ground_albedo,
            use_ozone: atmosphere.use_ozone,
            use_constant_solar_spectrum: atmosphere.use_constant_solar_spectrum,
            half_precision: precompute.half_precision,
            combine_scattering_textures: precompute.combine_scattering_textures,
            luminance: precompute.luminance.into(),
            planet_center: atmosphere.planet_center.map(Vec3::from_array),
            sun_direction: Vec3::from_array(atmosphere.sun_direction),
        }
    }

    /// Full model configuration, validated for the configured number of
    /// scattering orders.
    pub fn scattering_config(&self) -> Result<ScatteringConfig, ConfigError> {
        let mut config = self.reference_atmosphere().scattering_config();
        config.num_precomputed_wavelengths = self.precompute.precomputed_wavelengths;
        config.layout = self.precompute.resolution.layout();
        config.samples = self.precompute.resolution.samples();
        config.validate(self.precompute.scattering_orders)?;
        Ok(config)
    }
}

// --- Load / Save / Reload ---

impl Config {
    /// Load config from the given directory, or create a default config file.
    pub fn load_or_create(config_dir: &Path) -> Result<Self, ConfigError> {
        let config_path = config_dir.join("config.ron");

        if config_path.exists() {
            let contents = std::fs::read_to_string(&config_path).map_err(ConfigError::ReadError)?;
            let config: Config = ron::from_str(&contents).map_err(ConfigError::ParseError)?;
            log::info!("Loaded config from {}", config_path.display());
            Ok(config)
        } else {
            let config = Config::default();
            config.save(config_dir)?;
            log::info!("Created default config at {}", config_path.display());
            Ok(config)
        }
    }

    /// Save config to the given directory as `config.ron`.
    pub fn save(&self, config_dir: &Path) -> Result<(), ConfigError> {
        std::fs::create_dir_all(config_dir).map_err(ConfigError::WriteError)?;

        let config_path = config_dir.join("config.ron");
        let pretty = ron::ser::PrettyConfig::new()
            .depth_limit(3)
            .separate_tuple_members(true)
            .enumerate_arrays(false);

        let serialized =
            ron::ser::to_string_pretty(self, pretty).map_err(ConfigError::SerializeError)?;

        std::fs::write(&config_path, serialized).map_err(ConfigError::WriteError)?;
        Ok(())
    }

    /// Re-read `config.ron`: `Some(new_config)` if it differs from `self`.
    pub fn reload(&self, config_dir: &Path) -> Result<Option<Self>, ConfigError> {
        let config_path = config_dir.join("config.ron");
        let contents = std::fs::read_to_string(&config_path).map_err(ConfigError::ReadError)?;
        let new_config: Config = ron::from_str(&contents).map_err(ConfigError::ParseError)?;

        if &new_config != self {
            log::info!("Config reloaded with changes");
            Ok(Some(new_config))
        } else {
            Ok(None)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_serializes() {
        let config = Config::default();
        let ron_str =
            ron::ser::to_string_pretty(&config, ron::ser::PrettyConfig::new().depth_limit(3))
                .unwrap();
        assert!(ron_str.contains("preset: Earth"));
        assert!(ron_str.contains("scattering_orders: 4"));
    }

    #[test]
    fn test_config_roundtrip() {
        let mut config = Config::default();
        config.atmosphere = AtmosphereConfig::from_preset(AtmospherePreset::TestPlanet);
        config.precompute.luminance = LuminanceSetting::Precomputed;
        let ron_str = ron::to_string(&config).unwrap();
        let deserialized: Config = ron::from_str(&ron_str).unwrap();
        assert_eq!(config, deserialized);
    }

    #[test]
    fn test_missing_section_uses_default() {
        let ron_str = "(precompute: (scattering_orders: 2), debug: ())";
        let config: Config = ron::from_str(ron_str).unwrap();
        assert_eq!(config.precompute.scattering_orders, 2);
        assert_eq!(config.atmosphere, AtmosphereConfig::default());
        assert_eq!(config.effect.exposure, 10.0);
    }

    #[test]
    fn test_extra_field_ignored() {
        let result: Result<Config, _> = ron::from_str("(future_setting: true)");
        assert!(result.is_ok());
    }

    #[test]
    fn test_presets_carry_their_calibration() {
        let earth = AtmosphereConfig::from_preset(AtmospherePreset::Earth);
        assert_eq!(earth.bottom_radius_m, 6_360_000.0);
        assert_eq!(earth.top_radius_m, 6_420_000.0);
        assert_eq!(earth.planet_center, None);

        let test = AtmosphereConfig::from_preset(AtmospherePreset::TestPlanet);
        assert_eq!(test.bottom_radius_m, 600_000.0);
        assert_eq!(test.length_unit_m, 100.0);
        assert_eq!(test.planet_center, Some([0.0, 0.0, 7005.0]));
        assert_eq!(test.sun_direction, [0.0, 0.0, -1.0]);
    }

    #[test]
    fn test_reference_atmosphere_matches_preset() {
        let mut config = Config::default();
        config.atmosphere = AtmosphereConfig::from_preset(AtmospherePreset::TestPlanet);
        assert_eq!(config.reference_atmosphere(), ReferenceAtmosphere::test_planet());
    }

    #[test]
    fn test_scattering_config_applies_precompute_settings() {
        let mut config = Config::default();
        config.precompute.resolution = Resolution::Compact;
        config.precompute.half_precision = true;
        config.precompute.luminance = LuminanceSetting::Approximate;
        let scattering = config.scattering_config().expect("valid config");
        assert_eq!(scattering.layout, TextureLayout::compact());
        assert!(scattering.half_precision);
        assert_eq!(scattering.luminance, LuminanceMode::Approximate);
    }

    #[test]
    fn test_invalid_atmosphere_is_rejected() {
        let mut config = Config::default();
        config.atmosphere.top_radius_m = config.atmosphere.bottom_radius_m;
        assert!(matches!(
            config.scattering_config(),
            Err(ConfigError::Invalid(_))
        ));

        let mut zero_orders = Config::default();
        zero_orders.precompute.scattering_orders = 0;
        assert!(zero_orders.scattering_config().is_err(), "at least one order");
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.precompute.scattering_orders = 6;
        config.output.directory = PathBuf::from("luts");

        config.save(dir.path()).unwrap();
        let loaded = Config::load_or_create(dir.path()).unwrap();
        assert_eq!(config, loaded);
    }

    #[test]
    fn test_load_or_create_writes_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load_or_create(dir.path()).unwrap();
        assert_eq!(config, Config::default());
        assert!(dir.path().join("config.ron").exists());
    }

    #[test]
    fn test_reload_detects_changes() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::default();
        config.save(dir.path()).unwrap();

        let mut modified = config.clone();
        modified.effect.exposure = 2.5;
        modified.save(dir.path()).unwrap();

        let result = config.reload(dir.path()).unwrap();
        assert_eq!(result.map(|c| c.effect.exposure), Some(2.5));
        assert!(modified.reload(dir.path()).unwrap().is_none());
    }

    #[test]
    fn test_invalid_ron_produces_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("config.ron"), "{{not valid}}").unwrap();
        assert!(matches!(
            Config::load_or_create(dir.path()),
            Err(ConfigError::ParseError(_))
        ));
    }
}
