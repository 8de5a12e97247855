//! Configuration for the Aether bake tool.
//!
//! Settings persist to disk as RON files and can be overridden from the
//! command line. The atmosphere section holds physical constants, so any
//! planet can be described without touching code.

mod cli;
mod config;
mod error;

pub use cli::CliArgs;
pub use config::{
    AtmosphereConfig, AtmospherePreset, Config, DebugConfig, EffectConfig, LuminanceSetting,
    OutputConfig, PrecomputeConfig, Resolution, default_config_dir,
};
pub use error::ConfigError;
