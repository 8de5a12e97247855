//! Bake tool that precomputes atmospheric scattering lookup textures.
//!
//! Configuration is loaded from `config.ron` and can be overridden via CLI flags.
//! Run with `cargo run -p aether-bake` to bake the Earth preset on the GPU.
//! Run with `cargo run -p aether-bake -- --preset test-planet --cpu --resolution compact`
//! to bake the small test planet without a GPU.

mod lut;
mod preview;

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use aether_config::{CliArgs, Config, ConfigError};
use aether_render::{
    GpuContext, ReadbackError, ShaderError, SkyError, WgpuBackend, init_gpu_context_blocking,
};
use aether_scattering::{
    CpuBackend, ModelArena, ModelHandle, PrecomputeBackend, ScatteringConfig, ScatteringError,
    ScatteringModel, ScatteringResources,
};
use clap::Parser;
use tracing::{error, info, warn};

use crate::lut::{TexelSource, dump_textures};

#[derive(Debug, thiserror::Error)]
pub enum BakeError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Scattering(#[from] ScatteringError),

    #[error(transparent)]
    Shader(#[from] ShaderError),

    #[error(transparent)]
    Readback(#[from] ReadbackError),

    #[error(transparent)]
    Sky(#[from] SkyError),

    #[error("texture '{0}' was released before it was written")]
    Released(&'static str),

    #[error("model was removed from the arena")]
    MissingModel,

    #[error("model arena has no handles left")]
    ArenaFull,

    #[error("sky preview size does not match the rendered pixels")]
    PreviewSize,

    #[error("failed to encode image: {0}")]
    Image(#[from] image::ImageError),

    #[error("failed to write output: {0}")]
    Io(#[from] std::io::Error),
}

/// What a finished bake produced.
#[derive(Debug, Default)]
pub struct BakeSummary {
    pub backend: &'static str,
    pub written: Vec<PathBuf>,
}

fn main() -> ExitCode {
    let args = CliArgs::parse();

    // Resolve config directory
    let config_dir = args
        .config
        .clone()
        .unwrap_or_else(aether_config::default_config_dir);

    // Load or create config, then apply CLI overrides
    let mut config = Config::load_or_create(&config_dir).unwrap_or_else(|e| {
        eprintln!("Failed to load config: {e}, using defaults");
        Config::default()
    });
    config.apply_cli_overrides(&args);

    let log_dir = config_dir.join("logs");
    aether_log::init_logging(Some(&log_dir), cfg!(debug_assertions), Some(&config));

    match bake(&config) {
        Ok(summary) => {
            info!(
                backend = summary.backend,
                files = summary.written.len(),
                "Bake finished"
            );
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("Bake failed: {e}");
            ExitCode::FAILURE
        }
    }
}

/// Precompute the configured atmosphere and write the requested outputs.
/// Uses the GPU unless it is unavailable or `debug.force_cpu` is set.
pub fn bake(config: &Config) -> Result<BakeSummary, BakeError> {
    let scattering = config.scattering_config()?;
    info!(
        preset = ?config.atmosphere.preset,
        orders = config.precompute.scattering_orders,
        luminance = ?scattering.luminance,
        half_precision = scattering.half_precision,
        combined = scattering.combine_scattering_textures,
        "Baking atmosphere"
    );

    if !config.debug.force_cpu {
        match init_gpu_context_blocking() {
            Ok(context) => return bake_gpu(&context, config, scattering),
            Err(e) => warn!("GPU unavailable ({e}), precomputing on the CPU"),
        }
    }
    bake_cpu(config, scattering)
}

fn bake_gpu(
    context: &GpuContext,
    config: &Config,
    scattering: ScatteringConfig,
) -> Result<BakeSummary, BakeError> {
    let backend = Arc::new(WgpuBackend::new(
        Arc::clone(&context.device),
        Arc::clone(&context.queue),
    )?);
    let (mut arena, handle) = precompute(Arc::clone(&backend), config, scattering)?;

    let mut written = write_luts(backend.as_ref(), &arena, handle, config)?;
    if config.output.sky_preview {
        written.push(preview::render_sky_preview(
            &backend,
            &context.device,
            &context.queue,
            &arena,
            handle,
            &config.output,
            &config.output.directory,
        )?);
    }

    arena.release_all();
    info!(live_textures = backend.live_texture_count(), "GPU resources released");
    Ok(BakeSummary {
        backend: "gpu",
        written,
    })
}

fn bake_cpu(config: &Config, scattering: ScatteringConfig) -> Result<BakeSummary, BakeError> {
    let backend = Arc::new(CpuBackend::new());
    let (mut arena, handle) = precompute(Arc::clone(&backend), config, scattering)?;

    let written = write_luts(backend.as_ref(), &arena, handle, config)?;
    if config.output.sky_preview {
        info!("Sky preview needs a GPU, skipped");
    }

    arena.release_all();
    Ok(BakeSummary {
        backend: "cpu",
        written,
    })
}

/// Register `backend`, create the model in a fresh arena and run every
/// precompute pass.
fn precompute<B: PrecomputeBackend>(
    backend: Arc<B>,
    config: &Config,
    scattering: ScatteringConfig,
) -> Result<(ModelArena<B>, ModelHandle), BakeError> {
    let mut resources = ScatteringResources::<B>::new();
    resources.set_precompute(backend);

    let reference = config.reference_atmosphere();
    let mut model = ScatteringModel::new(scattering);
    model.planet_center = reference.planet_center;
    model.sun_direction = reference.sun_direction;
    model.effect = config.effect.parameters();

    let start = std::time::Instant::now();
    model.init(&resources, config.precompute.scattering_orders)?;
    info!(elapsed_ms = start.elapsed().as_millis() as u64, "Precompute finished");

    let mut arena = ModelArena::new();
    let handle = arena.insert(model).ok_or(BakeError::ArenaFull)?;
    Ok((arena, handle))
}

fn write_luts<B: TexelSource>(
    backend: &B,
    arena: &ModelArena<B>,
    handle: ModelHandle,
    config: &Config,
) -> Result<Vec<PathBuf>, BakeError> {
    if !config.output.dump_luts {
        return Ok(Vec::new());
    }
    let model = arena.get(handle).ok_or(BakeError::MissingModel)?;
    let textures = model.textures().ok_or(ScatteringError::NotInitialized)?;
    dump_textures(backend, textures, &config.output.directory)
}
