//! Precomputed atmospheric scattering: transmittance, multiple scattering and
//! ground irradiance lookup textures for a spherical planet, plus the binding
//! contract that hands them to sky and water shaders.
//!
//! The math lives in [`kernels`]; a [`PrecomputeBackend`] evaluates it per
//! texel. [`CpuBackend`] runs the kernels directly and serves as the
//! reference for GPU backends.

pub mod backend;
pub mod config;
pub mod cpu;
pub mod density;
pub mod effect;
pub mod error;
pub mod kernels;
pub mod material;
pub mod model;
pub mod orchestrator;
pub mod reference;
pub mod registry;
pub mod spectrum;
pub mod uniform;

pub use backend::{
    Dispatch, Pass, PassKind, PrecomputeBackend, TexelPrecision, TextureDescriptor,
    WORKGROUP_SIZE,
};
pub use config::{LuminanceMode, SampleCounts, ScatteringConfig, TextureLayout};
pub use cpu::{CpuBackend, CpuTexture, DispatchRecord};
pub use density::{DensityProfile, DensityProfileLayer, MAX_DENSITY_LAYERS};
pub use effect::EffectParameters;
pub use error::ScatteringError;
pub use material::{MaterialProperties, PropertyBlock, PropertyValue, names};
pub use model::{RuntimeConstants, ScatteringModel};
pub use orchestrator::{ModelTextures, PrecomputeOrchestrator, WavelengthBatch, wavelength_batches};
pub use reference::ReferenceAtmosphere;
pub use registry::{ModelArena, ModelHandle, ScatteringResources};
pub use spectrum::SpectralSamples;
pub use uniform::{AtmosphereUniform, DensityLayerUniform};
