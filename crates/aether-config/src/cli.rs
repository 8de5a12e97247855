//! Command-line arguments of the bake tool.

use std::path::PathBuf;

use clap::Parser;

use crate::config::{AtmosphereConfig, AtmospherePreset, LuminanceSetting, Resolution};
use crate::Config;

/// Precomputes atmospheric scattering lookup textures.
///
/// CLI values override settings loaded from `config.ron`.
#[derive(Parser, Debug, Default)]
#[command(name = "aether-bake", about = "Precompute atmospheric scattering textures")]
pub struct CliArgs {
    /// Atmosphere preset. Replaces the whole atmosphere section.
    #[arg(long, value_enum)]
    pub preset: Option<AtmospherePreset>,

    /// Number of scattering orders.
    #[arg(long)]
    pub orders: Option<u32>,

    /// Luminance mode.
    #[arg(long, value_enum)]
    pub luminance: Option<LuminanceSetting>,

    /// Store textures as 16-bit floats.
    #[arg(long)]
    pub half_precision: bool,

    /// Keep single Mie scattering in its own texture.
    #[arg(long)]
    pub no_combine: bool,

    /// Texture sizes.
    #[arg(long, value_enum)]
    pub resolution: Option<Resolution>,

    /// Exposure used by the sky preview.
    #[arg(long)]
    pub exposure: Option<f32>,

    /// White balance the sky preview.
    #[arg(long)]
    pub white_balance: bool,

    /// Output directory.
    #[arg(long)]
    pub output: Option<PathBuf>,

    /// Precompute on the CPU.
    #[arg(long)]
    pub cpu: bool,

    /// Log level (error, warn, info, debug, trace).
    #[arg(long)]
    pub log_level: Option<String>,

    /// Path to config directory (overrides default location).
    #[arg(long)]
    pub config: Option<PathBuf>,
}

impl Config {
    /// Apply CLI overrides to a loaded config.
    pub fn apply_cli_overrides(&mut self, args: &CliArgs) {
        if let Some(preset) = args.preset {
            self.atmosphere = AtmosphereConfig::from_preset(preset);
        }
        if let Some(orders) = args.orders {
            self.precompute.scattering_orders = orders;
        }
        if let Some(luminance) = args.luminance {
            self.precompute.luminance = luminance;
        }
        if args.half_precision {
            self.precompute.half_precision = true;
        }
        if args.no_combine {
            self.precompute.combine_scattering_textures = false;
        }
        if let Some(resolution) = args.resolution {
            self.precompute.resolution = resolution;
        }
        if let Some(exposure) = args.exposure {
            self.effect.exposure = exposure;
        }
        if args.white_balance {
            self.effect.white_balance = true;
        }
        if let Some(ref dir) = args.output {
            self.output.directory = dir.clone();
        }
        if args.cpu {
            self.debug.force_cpu = true;
        }
        if let Some(ref level) = args.log_level {
            self.debug.log_level = level.clone();
        }
    }
}
