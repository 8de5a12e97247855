//! WGSL composition and shader module caching.
//!
//! Every precompute kernel is the shared `common.wgsl` prelude followed by
//! the kernel's own bindings and entry point. The finalize kernel is a
//! template specialized per texture dimension and storage format.

use log::{debug, info};
use std::{collections::HashMap, sync::Arc};
use thiserror::Error;
use wgpu::{ShaderModuleDescriptor, ShaderSource};

use aether_scattering::{PassKind, TexelPrecision};

const COMMON: &str = include_str!("shaders/common.wgsl");
const TRANSMITTANCE: &str = include_str!("shaders/transmittance.wgsl");
const DIRECT_IRRADIANCE: &str = include_str!("shaders/direct_irradiance.wgsl");
const SINGLE_SCATTERING: &str = include_str!("shaders/single_scattering.wgsl");
const SCATTERING_DENSITY: &str = include_str!("shaders/scattering_density.wgsl");
const INDIRECT_IRRADIANCE: &str = include_str!("shaders/indirect_irradiance.wgsl");
const MULTIPLE_SCATTERING: &str = include_str!("shaders/multiple_scattering.wgsl");
const FINALIZE: &str = include_str!("shaders/finalize.wgsl");
pub(crate) const SKY: &str = include_str!("shaders/sky.wgsl");

/// Error types for shader lookups.
#[derive(Debug, Error)]
pub enum ShaderError {
    #[error("shader '{name}' not found in library")]
    NotLoaded { name: String },
}

/// Full WGSL source of a precompute kernel.
pub fn pass_source(kind: PassKind) -> String {
    let body = match kind {
        PassKind::Transmittance => TRANSMITTANCE,
        PassKind::DirectIrradiance => DIRECT_IRRADIANCE,
        PassKind::SingleScattering => SINGLE_SCATTERING,
        PassKind::ScatteringDensity => SCATTERING_DENSITY,
        PassKind::IndirectIrradiance => INDIRECT_IRRADIANCE,
        PassKind::MultipleScattering => MULTIPLE_SCATTERING,
    };
    format!("{COMMON}\n{body}")
}

/// WGSL format name of a sampled LUT at the given precision.
pub fn storage_format_name(precision: TexelPrecision) -> &'static str {
    match precision {
        TexelPrecision::Half => "rgba16float",
        TexelPrecision::Full => "rgba32float",
    }
}

/// Source of the kernel copying a LUT buffer into a 2D or 3D storage texture.
pub fn finalize_source(three_d: bool, precision: TexelPrecision) -> String {
    let format = storage_format_name(precision);
    let (texture, coords) = if three_d {
        (
            format!("texture_storage_3d<{format}, write>"),
            "vec3<i32>(id)",
        )
    } else {
        (
            format!("texture_storage_2d<{format}, write>"),
            "vec2<i32>(id.xy)",
        )
    };
    FINALIZE
        .replace("STORAGE_TEXTURE", &texture)
        .replace("STORE_COORDS", coords)
}

/// Name a finalize variant is cached under.
pub fn finalize_name(three_d: bool, precision: TexelPrecision) -> String {
    let dim = if three_d { "3d" } else { "2d" };
    format!("finalize_{dim}_{}", storage_format_name(precision))
}

/// Registry of compiled shader modules, keyed by name.
pub struct ShaderLibrary {
    modules: HashMap<String, Arc<wgpu::ShaderModule>>,
}

impl ShaderLibrary {
    /// Create a new empty shader library.
    pub fn new() -> Self {
        Self {
            modules: HashMap::new(),
        }
    }

    /// Compile a shader from a WGSL source string, replacing any module
    /// already cached under `name`. Invalid WGSL surfaces through the
    /// device's validation error handler.
    pub fn load_from_source(
        &mut self,
        device: &wgpu::Device,
        name: &str,
        source: &str,
    ) -> Result<Arc<wgpu::ShaderModule>, ShaderError> {
        debug!("Loading shader '{}' from source", name);

        let module = device.create_shader_module(ShaderModuleDescriptor {
            label: Some(name),
            source: ShaderSource::Wgsl(source.into()),
        });

        let arc_module = Arc::new(module);
        let replaced = self
            .modules
            .insert(name.to_string(), arc_module.clone())
            .is_some();

        if replaced {
            info!("Replaced shader '{}'", name);
        } else {
            debug!("Loaded shader '{}'", name);
        }

        Ok(arc_module)
    }

    /// Compile the kernel for `kind`, or return the cached module.
    pub fn load_pass(
        &mut self,
        device: &wgpu::Device,
        kind: PassKind,
    ) -> Result<Arc<wgpu::ShaderModule>, ShaderError> {
        if let Some(module) = self.get(kind.name()) {
            return Ok(module);
        }
        self.load_from_source(device, kind.name(), &pass_source(kind))
    }

    /// Compile the finalize variant, or return the cached module.
    pub fn load_finalize(
        &mut self,
        device: &wgpu::Device,
        three_d: bool,
        precision: TexelPrecision,
    ) -> Result<Arc<wgpu::ShaderModule>, ShaderError> {
        let name = finalize_name(three_d, precision);
        if let Some(module) = self.get(&name) {
            return Ok(module);
        }
        self.load_from_source(device, &name, &finalize_source(three_d, precision))
    }

    /// Get a previously loaded shader by name.
    pub fn get(&self, name: &str) -> Option<Arc<wgpu::ShaderModule>> {
        self.modules.get(name).cloned()
    }

    /// Like [`get`](Self::get), but a missing module is an error.
    pub fn require(&self, name: &str) -> Result<Arc<wgpu::ShaderModule>, ShaderError> {
        self.get(name).ok_or_else(|| ShaderError::NotLoaded {
            name: name.to_string(),
        })
    }

    /// Number of loaded shaders.
    pub fn len(&self) -> usize {
        self.modules.len()
    }

    /// Check if the shader library is empty.
    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }
}

impl Default for ShaderLibrary {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::create_test_device_queue;

    #[test]
    fn test_pass_sources_start_with_the_common_prelude() {
        for kind in PassKind::ALL {
            let source = pass_source(kind);
            assert!(source.starts_with(COMMON), "{} lacks the prelude", kind.name());
            assert!(source.contains("fn lut_fetch("), "{} defines lut_fetch", kind.name());
            assert!(source.contains("fn main("), "{} has an entry point", kind.name());
        }
    }

    #[test]
    fn test_finalize_template_is_fully_substituted() {
        for three_d in [false, true] {
            for precision in [TexelPrecision::Half, TexelPrecision::Full] {
                let source = finalize_source(three_d, precision);
                assert!(!source.contains("STORAGE_TEXTURE"));
                assert!(!source.contains("STORE_COORDS"));
                assert!(source.contains(storage_format_name(precision)));
            }
        }
        assert!(finalize_source(true, TexelPrecision::Full).contains("texture_storage_3d"));
        assert_eq!(
            finalize_name(false, TexelPrecision::Half),
            "finalize_2d_rgba16float"
        );
    }

    #[test]
    fn test_shader_library_starts_empty() {
        let library = ShaderLibrary::new();
        assert!(library.is_empty());
        assert!(matches!(
            library.require("transmittance"),
            Err(ShaderError::NotLoaded { .. })
        ));
    }

    #[test]
    fn test_every_kernel_compiles() {
        let Some((device, _queue)) = create_test_device_queue() else {
            return;
        };
        let mut library = ShaderLibrary::new();
        for kind in PassKind::ALL {
            let result = library.load_pass(&device, kind);
            assert!(result.is_ok(), "{} failed: {:?}", kind.name(), result.err());
        }
        for three_d in [false, true] {
            for precision in [TexelPrecision::Half, TexelPrecision::Full] {
                assert!(library.load_finalize(&device, three_d, precision).is_ok());
            }
        }
        assert!(library.load_from_source(&device, "sky", SKY).is_ok());
        assert_eq!(library.len(), PassKind::ALL.len() + 5);
    }

    #[test]
    fn test_cache_returns_same_module_for_same_pass() {
        let Some((device, _queue)) = create_test_device_queue() else {
            return;
        };
        let mut library = ShaderLibrary::new();
        let a = library.load_pass(&device, PassKind::Transmittance).unwrap();
        let b = library.load_pass(&device, PassKind::Transmittance).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }
}
