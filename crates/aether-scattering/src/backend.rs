//! The compute-dispatch seam between the precompute pipeline and whatever
//! executes its kernels.

use glam::Mat3;

use crate::config::{SampleCounts, TextureLayout};
use crate::uniform::AtmosphereUniform;

/// Compute workgroup size of every precompute kernel.
pub const WORKGROUP_SIZE: [u32; 3] = [8, 8, 1];

/// Storage precision of a lookup texture.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TexelPrecision {
    /// 16-bit floats per channel.
    Half,
    /// 32-bit floats per channel.
    Full,
}

impl TexelPrecision {
    pub fn from_half_flag(half_precision: bool) -> Self {
        if half_precision { Self::Half } else { Self::Full }
    }
}

/// An RGBA float texture to allocate. `depth` is 1 for 2D textures.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TextureDescriptor {
    pub label: &'static str,
    pub width: u32,
    pub height: u32,
    pub depth: u32,
    /// Sampled as a 3D texture, even when `depth` is 1.
    pub three_d: bool,
    pub precision: TexelPrecision,
}

impl TextureDescriptor {
    pub fn new_2d(label: &'static str, width: u32, height: u32, precision: TexelPrecision) -> Self {
        Self {
            label,
            width,
            height,
            depth: 1,
            three_d: false,
            precision,
        }
    }

    pub fn new_3d(
        label: &'static str,
        width: u32,
        height: u32,
        depth: u32,
        precision: TexelPrecision,
    ) -> Self {
        Self {
            label,
            width,
            height,
            depth,
            three_d: true,
            precision,
        }
    }

    pub fn texel_count(&self) -> usize {
        self.width as usize * self.height as usize * self.depth as usize
    }

    /// Workgroup counts covering every texel once.
    pub fn workgroups(&self) -> [u32; 3] {
        [
            self.width.div_ceil(WORKGROUP_SIZE[0]),
            self.height.div_ceil(WORKGROUP_SIZE[1]),
            self.depth.div_ceil(WORKGROUP_SIZE[2]),
        ]
    }
}

/// Names of the precompute kernels.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PassKind {
    Transmittance,
    DirectIrradiance,
    SingleScattering,
    ScatteringDensity,
    IndirectIrradiance,
    MultipleScattering,
}

impl PassKind {
    pub const ALL: [PassKind; 6] = [
        PassKind::Transmittance,
        PassKind::DirectIrradiance,
        PassKind::SingleScattering,
        PassKind::ScatteringDensity,
        PassKind::IndirectIrradiance,
        PassKind::MultipleScattering,
    ];

    pub fn name(self) -> &'static str {
        match self {
            PassKind::Transmittance => "transmittance",
            PassKind::DirectIrradiance => "direct_irradiance",
            PassKind::SingleScattering => "single_scattering",
            PassKind::ScatteringDensity => "scattering_density",
            PassKind::IndirectIrradiance => "indirect_irradiance",
            PassKind::MultipleScattering => "multiple_scattering",
        }
    }
}

/// One pass and the textures it reads and writes.
///
/// Inputs are never outputs of the same pass, except for accumulation
/// targets which are read back only when [`Dispatch::blend`] is set.
#[derive(Debug)]
pub enum Pass<'a, T> {
    /// Writes `transmittance`.
    Transmittance { transmittance: &'a T },
    /// Writes `delta_irradiance`; clears `irradiance` unless blending.
    DirectIrradiance {
        transmittance: &'a T,
        delta_irradiance: &'a T,
        irradiance: &'a T,
    },
    /// Writes the single scattering deltas and seeds the accumulated
    /// scattering. `single_mie` is `None` in combined mode.
    SingleScattering {
        transmittance: &'a T,
        delta_rayleigh: &'a T,
        delta_mie: &'a T,
        scattering: &'a T,
        single_mie: Option<&'a T>,
    },
    /// Writes `delta_density` from the previous order's radiance.
    ScatteringDensity {
        transmittance: &'a T,
        delta_rayleigh: &'a T,
        delta_mie: &'a T,
        delta_multiple: &'a T,
        delta_irradiance: &'a T,
        delta_density: &'a T,
    },
    /// Writes `delta_irradiance` and adds it into `irradiance`.
    IndirectIrradiance {
        delta_rayleigh: &'a T,
        delta_mie: &'a T,
        delta_multiple: &'a T,
        delta_irradiance: &'a T,
        irradiance: &'a T,
    },
    /// Writes `delta_multiple` and adds it into `scattering`.
    MultipleScattering {
        transmittance: &'a T,
        delta_density: &'a T,
        delta_multiple: &'a T,
        scattering: &'a T,
    },
}

impl<T> Pass<'_, T> {
    pub fn kind(&self) -> PassKind {
        match self {
            Pass::Transmittance { .. } => PassKind::Transmittance,
            Pass::DirectIrradiance { .. } => PassKind::DirectIrradiance,
            Pass::SingleScattering { .. } => PassKind::SingleScattering,
            Pass::ScatteringDensity { .. } => PassKind::ScatteringDensity,
            Pass::IndirectIrradiance { .. } => PassKind::IndirectIrradiance,
            Pass::MultipleScattering { .. } => PassKind::MultipleScattering,
        }
    }
}

/// A single compute dispatch.
#[derive(Debug)]
pub struct Dispatch<'a, T> {
    pub pass: Pass<'a, T>,
    /// Workgroup counts, derived from the extent of the pass's first output.
    pub workgroups: [u32; 3],
    pub atmosphere: &'a AtmosphereUniform,
    pub layout: TextureLayout,
    pub samples: SampleCounts,
    /// Converts radiance at the batch's three wavelengths to the stored
    /// quantity. Identity unless luminance is precomputed.
    pub luminance_from_radiance: Mat3,
    pub scattering_order: u32,
    /// Add into accumulation targets instead of overwriting them.
    pub blend: bool,
}

/// Executes precompute kernels and owns the memory they write.
///
/// Dispatches run in submission order. A dispatch may read the output of an
/// earlier one only after a [`barrier`](Self::barrier).
pub trait PrecomputeBackend {
    type Texture: Clone + std::fmt::Debug;

    fn create_texture(&self, descriptor: &TextureDescriptor) -> Self::Texture;

    /// Free the texture's memory. Releasing an already released texture does
    /// nothing.
    fn release_texture(&self, texture: &Self::Texture);

    fn dispatch(&self, dispatch: &Dispatch<'_, Self::Texture>);

    fn barrier(&self);

    /// Block until every submitted dispatch has completed.
    fn finish(&self);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_workgroups_cover_every_texel() {
        let desc = TextureDescriptor::new_3d("scattering", 256, 128, 32, TexelPrecision::Full);
        assert_eq!(desc.workgroups(), [32, 16, 32]);
        let odd = TextureDescriptor::new_2d("irradiance", 9, 4, TexelPrecision::Half);
        assert_eq!(odd.workgroups(), [2, 1, 1]);
        assert_eq!(odd.texel_count(), 36);
    }

    #[test]
    fn test_pass_names_are_unique() {
        let mut names: Vec<_> = PassKind::ALL.iter().map(|kind| kind.name()).collect();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), PassKind::ALL.len());
    }

    #[test]
    fn test_precision_from_flag() {
        assert_eq!(TexelPrecision::from_half_flag(true), TexelPrecision::Half);
        assert_eq!(TexelPrecision::from_half_flag(false), TexelPrecision::Full);
    }
}
